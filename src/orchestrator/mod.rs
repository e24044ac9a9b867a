//! The installation state machine.
//!
//! Drives the fixed step sequence (prepare-binary, authenticate,
//! test-connection, configure-parent, configure-subfolder,
//! select-local-folder, install), choosing the fallback branch at each step
//! and classifying every result as success, recoverable or fatal. Fatal
//! failures at the first three steps halt the run with exit code 1 after a
//! "press Enter" pause; everything after that degrades and still reaches
//! the closing summary.

use crate::config::SettingsStore;
use crate::events::{EventKind, EventLog};
use crate::models::{InstallPaths, SetupState, Step, StepOutcome};
use crate::services::{
    AuthService, InstallReport, InstallService, ProvisionService, RemoteService, picker, process,
    remote_path,
};
use crate::ui::Ui;
use anyhow::{Context, Result};
use serde_json::json;
use std::fs;

const BANNER_TITLE: &str = "AUTO DRIVE FETCH";
const AUTH_BANNER: &str = "DRIVE AUTHENTICATION";

/// Default names applied when a prompt is left blank.
const DEFAULT_PARENT_FOLDER: &str = "ZEN BACKUP";
const DEFAULT_SUBFOLDER: &str = "Backup";
const DEFAULT_LOCAL_NAME: &str = "MyBackup";

pub struct Orchestrator<'a> {
    paths: &'a InstallPaths,
    settings: SettingsStore,
    events: EventLog,
    ui: Ui,
    provision: ProvisionService,
    auth: AuthService,
    remote: RemoteService,
    installer: InstallService,
    state: SetupState,
    report: Option<InstallReport>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(paths: &'a InstallPaths) -> Self {
        Self {
            settings: SettingsStore::new(paths),
            events: EventLog::new(paths.event_log()),
            ui: Ui::new(),
            provision: ProvisionService::new(paths),
            auth: AuthService::new(paths),
            remote: RemoteService::new(paths),
            installer: InstallService::new(paths),
            state: SetupState::default(),
            report: None,
            paths,
        }
    }

    /// Run the whole sequence. Returns the process exit code.
    pub async fn run(&mut self) -> Result<i32> {
        self.events
            .record(EventKind::SessionStart, "Drive backup setup started");
        self.ui.banner(BANNER_TITLE);
        self.ui
            .subheader("One click setup * 5 min sync * Portable * Zero login");
        self.ui.separator();

        self.state.elevated = process::is_elevated().await;
        tracing::info!("Elevated privileges: {}", self.state.elevated);

        self.begin(Step::PrepareBinary);
        let outcome = self.prepare_binary().await;
        if let Some(code) = self.conclude(Step::PrepareBinary, outcome).await {
            return Ok(code);
        }

        self.begin(Step::Authenticate);
        let outcome = self.authenticate().await?;
        if let Some(code) = self.conclude(Step::Authenticate, outcome).await {
            return Ok(code);
        }

        self.begin(Step::TestConnection);
        let outcome = self.test_connection().await;
        if let Some(code) = self.conclude(Step::TestConnection, outcome).await {
            return Ok(code);
        }

        self.begin(Step::ConfigureParent);
        let outcome = self.configure_parent().await?;
        if let Some(code) = self.conclude(Step::ConfigureParent, outcome).await {
            return Ok(code);
        }

        self.begin(Step::ConfigureSubfolder);
        let outcome = self.configure_subfolder().await?;
        if let Some(code) = self.conclude(Step::ConfigureSubfolder, outcome).await {
            return Ok(code);
        }

        self.begin(Step::SelectLocalFolder);
        let outcome = self.select_local_folder().await?;
        if let Some(code) = self.conclude(Step::SelectLocalFolder, outcome).await {
            return Ok(code);
        }

        self.begin(Step::Install);
        let outcome = self.install().await;
        let install_ok = matches!(outcome, StepOutcome::Success);
        if let Some(code) = self.conclude(Step::Install, outcome).await {
            return Ok(code);
        }

        self.summary(install_ok);
        self.events
            .record(EventKind::SessionEnd, session_end_message(install_ok));
        self.ui.pause("Press Enter to exit...").await;
        Ok(0)
    }

    fn begin(&self, step: Step) {
        self.ui.step(step.number(), step.description());
        self.events.record(
            EventKind::Step,
            &format!("Step {}: {}", step.number(), step.description()),
        );
    }

    /// Classify a step's outcome. Returns an exit code when the run must
    /// halt; fatal failures outside the fatal gates are downgraded to
    /// warnings so the summary still prints.
    async fn conclude(&self, step: Step, outcome: StepOutcome) -> Option<i32> {
        match outcome {
            StepOutcome::Success => None,
            StepOutcome::RecoverableFailure(msg) => {
                self.ui.warning(&msg);
                tracing::warn!("Step {}: {}", step.number(), msg);
                None
            }
            StepOutcome::FatalFailure(msg) => {
                self.events.record(EventKind::Fatal, &msg);
                self.ui.error(&msg);
                if step.is_fatal_gate() {
                    self.ui.pause("Press Enter to exit...").await;
                    Some(1)
                } else {
                    None
                }
            }
        }
    }

    /// Step 1: ensure the sync binary is present, downloading and
    /// extracting the release archive if necessary. The download loop
    /// blocks, so it runs on a blocking worker; the spinner handle is
    /// shared with the tick callback.
    async fn prepare_binary(&mut self) -> StepOutcome {
        let bar = self.ui.spinner("Downloading rclone...");
        let service = self.provision.clone();
        let ticker = bar.clone();
        let result =
            tokio::task::spawn_blocking(move || service.ensure_binary(&mut || ticker.tick()))
                .await;
        bar.finish_and_clear();

        match result {
            Ok(Ok(outcome)) => {
                if let Some(via) = outcome.downloaded_via {
                    let mb = outcome.archive_bytes.unwrap_or(0) as f64 / (1024.0 * 1024.0);
                    self.ui
                        .success(&format!("Download complete ({via}) - {mb:.1} MB"));
                }
                self.state.binary_path = Some(outcome.binary);
                self.ui.success("rclone ready");
                StepOutcome::Success
            }
            Ok(Err(e)) => StepOutcome::FatalFailure(e.to_string()),
            Err(e) => StepOutcome::FatalFailure(format!("Download worker failed: {e}")),
        }
    }

    /// Step 2: the four-stage auth chain. First success wins; all four
    /// failing is fatal.
    async fn authenticate(&mut self) -> Result<StepOutcome> {
        // Stage 1: an existing config that validates means no further
        // action - and no auth prompt - on repeat runs.
        if self.auth.is_config_valid().await {
            self.ui.success("Existing drive authentication is valid.");
            self.events
                .record(EventKind::AuthValid, "Existing config is valid");
            self.state.config_path = Some(self.auth.config_path().to_path_buf());
            return Ok(StepOutcome::Success);
        }

        // Stage 2: a config carried next to the installer.
        if let Some(source) = self.auth.adopt_candidate_config().await {
            self.ui
                .info(&format!("Copied existing config from {source}"));
            if self.auth.is_config_valid().await {
                self.ui.success("Existing drive authentication is valid.");
                self.events
                    .record(EventKind::AuthValid, "Candidate config adopted and valid");
                self.state.config_path = Some(self.auth.config_path().to_path_buf());
                return Ok(StepOutcome::Success);
            }
        }

        // Stage 3: automatic browser auth. Not available under elevation.
        if self.state.elevated {
            self.ui.separator();
            self.ui.banner(AUTH_BANNER);
            self.ui
                .info("Running as Administrator - automatic authentication not available.");
            self.ui
                .info("Switching to manual authentication (config will be auto-copied).");
        } else {
            self.ui.separator();
            self.ui.banner(AUTH_BANNER);
            self.events.record(
                EventKind::Auth,
                "Starting automatic authentication (non-admin)",
            );
            self.ui.info("A browser window will open automatically.");
            self.ui
                .info("Please log in to your account and grant access.");
            self.ui
                .info("Setup continues automatically after success.");

            match self.auth.auto_auth().await {
                Ok(()) => {
                    self.ui.success("Authentication successful!");
                    self.events
                        .record(EventKind::AuthSuccess, "Drive authenticated");
                    self.state.config_path = Some(self.auth.config_path().to_path_buf());
                    return Ok(StepOutcome::Success);
                }
                Err(e) => {
                    self.ui.warning(&format!(
                        "Automatic authentication failed ({e}). Switching to manual method..."
                    ));
                    self.events
                        .record(EventKind::AuthFailed, "Automatic authentication failed");
                }
            }
        }

        // Stage 4: manual guided auth.
        if self.manual_auth().await {
            self.state.config_path = Some(self.auth.config_path().to_path_buf());
            return Ok(StepOutcome::Success);
        }
        Ok(StepOutcome::FatalFailure(
            "Authentication failed. Config is invalid or missing.".to_string(),
        ))
    }

    /// Guided manual flow: show the literal command, wait for the user,
    /// then adopt the config from the tool's default location.
    async fn manual_auth(&self) -> bool {
        self.ui.separator();
        self.ui.banner(AUTH_BANNER);
        self.events
            .record(EventKind::Auth, "Starting manual authentication");

        self.ui.plain("");
        self.ui.centered_line("1. Open a terminal window");
        self.ui
            .centered_line("2. Copy and paste this command, then press Enter:");
        self.ui.plain("");
        self.ui.centered_line(&self.auth.manual_command());
        self.ui.plain("");
        self.ui
            .centered_line("3. A browser opens -> log in -> allow access");
        self.ui
            .centered_line("4. After you see 'Success!', return here.");
        self.ui
            .pause("Press Enter AFTER authentication is complete...")
            .await;

        match self.auth.adopt_default_config().await {
            Some(source) => self.ui.success(&format!("Config copied from: {source}")),
            None => {
                self.ui
                    .warning("Could not auto-copy the config. You may need to copy rclone.conf to:");
                self.ui.info(self.auth.config_path().as_str());
            }
        }

        if self.auth.is_config_valid().await {
            self.ui.success("Authentication successful! Config is valid.");
            self.events
                .record(EventKind::AuthSuccess, "Drive authenticated");
            true
        } else {
            self.events.record(
                EventKind::AuthFailed,
                "Config still invalid after manual attempt",
            );
            false
        }
    }

    /// Step 3: reachability probe against the remote.
    async fn test_connection(&mut self) -> StepOutcome {
        match self.remote.test_connection().await {
            Ok(out) if out.success() => {
                self.ui.success("Connected to the drive");
                self.events.record(
                    EventKind::ConnectionSuccess,
                    "Successfully connected to the drive",
                );
                StepOutcome::Success
            }
            Ok(out) => {
                self.events.record_with_details(
                    EventKind::ConnectionFailed,
                    "lsd probe failed",
                    Some(json!({ "stderr": out.stderr.trim() })),
                );
                StepOutcome::FatalFailure(
                    "Cannot connect to the drive. Check your internet connection.".to_string(),
                )
            }
            Err(e) => {
                self.events.record_with_details(
                    EventKind::ConnectionFailed,
                    "lsd probe failed",
                    Some(json!({ "error": e.to_string() })),
                );
                StepOutcome::FatalFailure(
                    "Cannot connect to the drive. Check your internet connection.".to_string(),
                )
            }
        }
    }

    /// Step 4: parent folder name - persisted on first run, reused on
    /// every run after that without re-prompting.
    async fn configure_parent(&mut self) -> Result<StepOutcome> {
        if let Some(saved) = self.settings.parent_folder() {
            self.ui
                .info(&format!("Using saved parent folder: {saved}"));
            self.state.parent_folder = Some(saved);
            return Ok(StepOutcome::Success);
        }

        self.ui
            .info("No parent folder configured. This will be the main folder on your drive");
        self.ui
            .info("where all backups are stored. New or existing names both work.");
        let mut name = self.ui.prompt("Enter parent folder name").await?;
        if name.is_empty() {
            name = DEFAULT_PARENT_FOLDER.to_string();
            self.ui.info(&format!("Using default name: {name}"));
        }
        match self.settings.set_parent_folder(&name) {
            Ok(()) => {
                self.events.record(
                    EventKind::SettingsSaved,
                    &format!("Parent folder saved: {name}"),
                );
                self.ui.success(&format!("Parent folder set to: {name}"));
                self.state.parent_folder = Some(name);
                Ok(StepOutcome::Success)
            }
            Err(e) => {
                // The name is still usable this run; only persistence failed.
                self.state.parent_folder = Some(name);
                Ok(StepOutcome::RecoverableFailure(format!(
                    "Could not save settings: {e}"
                )))
            }
        }
    }

    /// Step 5: subfolder name (asked every run, never persisted) and the
    /// remote mkdir with the tolerate-and-continue policy.
    async fn configure_subfolder(&mut self) -> Result<StepOutcome> {
        let parent = self
            .state
            .parent_folder
            .clone()
            .context("parent folder must be configured before the subfolder")?;
        self.ui.info(&format!("Parent folder: {parent}"));

        let mut child = self.ui.prompt("Enter name for the NEW subfolder").await?;
        if child.is_empty() {
            child = DEFAULT_SUBFOLDER.to_string();
            self.ui.info(&format!("Using default name: {child}"));
        }

        let destination = remote_path(&parent, &child);
        self.ui.plain(&format!("\n   Creating {destination}..."));
        self.state.subfolder = Some(child.clone());
        self.state.remote_path = Some(destination.clone());

        match self.remote.make_remote_dir(&destination).await {
            Ok(out) if out.success() => {
                self.ui
                    .success(&format!("Subfolder '{child}' ready inside '{parent}'."));
                self.events.record(
                    EventKind::FolderCreated,
                    &format!("Created subfolder: {destination}"),
                );
                Ok(StepOutcome::Success)
            }
            Ok(out) => {
                // Deliberately not distinguished from a genuine failure;
                // the path is used regardless.
                self.events.record_with_details(
                    EventKind::FolderExists,
                    "Subfolder already exists or creation warning",
                    Some(json!({ "stderr": out.stderr.trim() })),
                );
                Ok(StepOutcome::RecoverableFailure(format!(
                    "{} (subfolder may already exist - using it)",
                    out.stderr.trim()
                )))
            }
            Err(e) => {
                self.events.record_with_details(
                    EventKind::FolderExists,
                    "Subfolder creation did not complete",
                    Some(json!({ "error": e.to_string() })),
                );
                Ok(StepOutcome::RecoverableFailure(format!(
                    "{e} (could not verify the subfolder - using the path anyway)"
                )))
            }
        }
    }

    /// Step 6: folder picker chain with the manual terminal fallback.
    async fn select_local_folder(&mut self) -> Result<StepOutcome> {
        self.ui.info("Opening the folder picker...");

        let local_path = match picker::pick_local_folder().await {
            Some(path) => {
                self.ui.success(&format!("Selected folder: {path}"));
                path
            }
            None => {
                self.ui
                    .warning("Folder picker cancelled or failed. Using fallback method.");
                let mut name = self
                    .ui
                    .prompt("Local backup folder name (created under DriveBackup)")
                    .await?;
                if name.is_empty() {
                    name = DEFAULT_LOCAL_NAME.to_string();
                    self.ui.info(&format!("Using default name: {name}"));
                }
                let path = self.paths.backup_root.join(&name);
                fs::create_dir_all(&path)
                    .with_context(|| format!("Failed to create fallback folder {path}"))?;
                self.ui.success(&format!("Local folder: {path}"));
                path
            }
        };

        let local_name = local_path
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_LOCAL_NAME.to_string());
        self.events.record(
            EventKind::LocalFolder,
            &format!("Local folder ready: {local_path}"),
        );
        self.state.local_path = Some(local_path);
        self.state.local_name = Some(local_name);
        Ok(StepOutcome::Success)
    }

    /// Step 7: materialize scripts, swap the startup entry, launch the
    /// loop, register exclusions. Failure here is reported but the summary
    /// still prints.
    async fn install(&mut self) -> StepOutcome {
        let (Some(local_name), Some(remote), Some(local)) = (
            self.state.local_name.as_deref(),
            self.state.remote_path.as_deref(),
            self.state.local_path.as_deref(),
        ) else {
            return StepOutcome::FatalFailure(
                "Installation skipped: missing folder selection".to_string(),
            );
        };

        self.ui
            .info(&format!("Target directory: {}", self.paths.install_dir));

        match self
            .installer
            .install(local_name, remote, local, self.state.elevated)
            .await
        {
            Ok(report) => {
                self.ui.success("Created sync script.");
                self.events.record(
                    EventKind::SyncScriptCreated,
                    &format!("Sync script created: {}", report.scripts.sync_script),
                );
                self.ui.success("Created loop script.");
                self.events.record(
                    EventKind::LoopScriptCreated,
                    &format!("Loop script created: {}", report.scripts.loop_script),
                );

                if report.startup_registered {
                    self.ui.success("Startup entry updated.");
                    self.events.record(
                        EventKind::StartupShortcut,
                        &format!("Startup entry created: {}", report.startup_entry),
                    );
                } else {
                    self.ui
                        .warning("Could not create the startup entry. To start the loop at login,");
                    self.ui.info(&format!(
                        "place a link to {} into {}",
                        report.scripts.loop_script,
                        report
                            .startup_entry
                            .parent()
                            .map(|p| p.to_string())
                            .unwrap_or_default()
                    ));
                    self.events.record(
                        EventKind::StartupShortcutFailed,
                        &format!("Failed to create startup entry: {}", report.startup_entry),
                    );
                }

                if report.loop_launched {
                    self.ui
                        .info("Background sync loop started. First sync runs within 5 minutes.");
                    self.events
                        .record(EventKind::LoopStarted, "Background sync loop initiated");
                } else {
                    self.ui
                        .warning("The loop could not be started now; it will start at next login.");
                }

                for exclusion in &report.exclusions {
                    use crate::services::ExclusionStatus;
                    match &exclusion.status {
                        ExclusionStatus::Applied => {
                            self.ui.success(&format!("{} added.", exclusion.label))
                        }
                        ExclusionStatus::AlreadyPresent => self.ui.info(&format!(
                            "{} already present (non-critical).",
                            exclusion.label
                        )),
                        ExclusionStatus::Skipped(reason) => self
                            .ui
                            .info(&format!("{} skipped: {}", exclusion.label, reason)),
                        ExclusionStatus::Failed(_) => self.ui.info(&format!(
                            "{} not applied (non-critical).",
                            exclusion.label
                        )),
                    }
                }
                if !self.state.elevated {
                    self.ui.warning(
                        "Not running as Administrator - skipping Defender/firewall exclusions.",
                    );
                }

                self.state.scripts = Some(report.scripts.clone());
                self.report = Some(report);
                self.ui.success("System installation complete!");
                StepOutcome::Success
            }
            Err(e) => StepOutcome::FatalFailure(format!("System installation failed: {e}")),
        }
    }

    /// Closing summary: everything the user needs to verify, find or stop
    /// the backup loop. Prints whatever is known even after a failed
    /// install step, under a banner that says so.
    fn summary(&self, install_ok: bool) {
        self.ui.separator();
        self.ui
            .banner(if install_ok { "SETUP COMPLETE" } else { "SETUP INCOMPLETE" });
        if !install_ok {
            self.ui
                .plain("   The system installation did not complete. Re-run the installer");
            self.ui
                .plain("   to finish; everything already set up below will be reused.");
        }

        if let Some(local) = &self.state.local_path {
            self.ui.plain(&format!("   Local folder:  {local}"));
        }
        if let Some(remote) = &self.state.remote_path {
            self.ui.plain(&format!("   Drive folder:  {remote}"));
        }

        self.ui.plain("\n   Automatic sync:");
        self.ui.plain("      - runs every 5 minutes (hidden)");
        self.ui.plain("      - starts automatically when you log in");

        self.ui.plain("\n   Verification:");
        if let Some(report) = &self.report {
            self.ui
                .plain(&format!("      - startup entry: {}", report.startup_entry));
        }
        let loop_process = if cfg!(windows) { "wscript.exe" } else { "sh" };
        self.ui.plain(&format!(
            "      - process:       {loop_process} (in the task manager)"
        ));
        self.ui
            .plain(&format!("      - log file:      {}", self.events.path()));

        self.ui.plain("\n   Permanent location:");
        self.ui
            .plain(&format!("      - system folder: {}", self.paths.install_dir));
        self.ui.plain(&format!(
            "      - settings:      {} (auto saved)",
            self.settings.path()
        ));

        self.ui.plain("\n   To stop the sync:");
        self.ui
            .plain("      - delete the startup entry, or kill the loop process");

        self.ui.plain("");
        self.ui.banner(BANNER_TITLE);
    }
}

/// Message recorded as SESSION_END. A run that reached the summary with a
/// failed install step still exits 0, but must not claim success.
fn session_end_message(install_ok: bool) -> &'static str {
    if install_ok {
        "Setup completed successfully"
    } else {
        "Setup finished but the system installation did not complete"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_end_reflects_install_outcome() {
        assert_eq!(session_end_message(true), "Setup completed successfully");
        assert!(!session_end_message(false).contains("successfully"));
        assert!(session_end_message(false).contains("did not complete"));
    }
}
