//! Materializes the generated artifacts into the permanent system location,
//! registers the startup entry, launches the background loop, and (under
//! elevation) registers security exclusions.
//!
//! The binary and config are expected to already sit in the install
//! directory - earlier steps provision them straight to their final
//! location - so this service verifies rather than copies.

use crate::models::{InstallPaths, ScriptSet};
use crate::services::process::{self, CommandOutput, PROBE_TIMEOUT, ProcessError};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io;
use thiserror::Error;

/// Pause between sync cycles, in milliseconds (5 minutes). Each cycle
/// blocks until the previous sync invocation finishes, so runs never
/// overlap.
pub const SYNC_INTERVAL_MS: u64 = 300_000;

/// Display name of the outbound firewall rule for the sync binary.
pub const FIREWALL_RULE_NAME: &str = "Auto Drive Fetch - rclone";

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("required artifact missing from install directory: {0}")]
    MissingArtifact(Utf8PathBuf),

    #[error("no startup directory could be resolved on this system")]
    NoStartupDir,

    #[error("failed to write {path}: {source}")]
    Write {
        path: Utf8PathBuf,
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result of one best-effort exclusion registration.
#[derive(Debug, Clone)]
pub struct ExclusionOutcome {
    pub label: &'static str,
    pub status: ExclusionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExclusionStatus {
    /// The snippet confirmed a new registration.
    Applied,
    /// The snippet ran cleanly but registered nothing: the item was already
    /// present, or the refusal was swallowed by its catch block.
    AlreadyPresent,
    /// Not attempted (missing target file, unsupported platform).
    Skipped(String),
    Failed(String),
}

/// What the install step accomplished, for reporting.
#[derive(Debug, Clone)]
pub struct InstallReport {
    pub scripts: ScriptSet,
    pub startup_registered: bool,
    pub startup_entry: Utf8PathBuf,
    pub loop_launched: bool,
    pub exclusions: Vec<ExclusionOutcome>,
}

pub struct InstallService {
    install_dir: Utf8PathBuf,
    binary: Utf8PathBuf,
    config: Utf8PathBuf,
    startup_dir: Option<Utf8PathBuf>,
}

impl InstallService {
    pub fn new(paths: &InstallPaths) -> Self {
        Self {
            install_dir: paths.install_dir.clone(),
            binary: paths.binary(),
            config: paths.config(),
            startup_dir: paths.startup_dir(),
        }
    }

    /// Full installation: verify artifacts, write the three scripts, swap
    /// the startup entry, launch the loop detached, and register exclusions
    /// when elevated. Exclusion failures never fail the install.
    pub async fn install(
        &self,
        local_name: &str,
        remote_path: &str,
        local_path: &Utf8Path,
        elevated: bool,
    ) -> Result<InstallReport, InstallError> {
        fs::create_dir_all(&self.install_dir)?;
        for required in [&self.binary, &self.config] {
            if !required.exists() {
                return Err(InstallError::MissingArtifact(required.clone()));
            }
        }

        let scripts = self.write_scripts(local_name, remote_path, local_path)?;

        let startup_entry = self.startup_entry_path(local_name)?;
        let startup_registered = self.register_startup(local_name, &scripts, &startup_entry).await;

        let loop_launched = match launch_detached(&scripts.loop_script) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to launch the background loop: {}", e);
                false
            }
        };

        let exclusions = if elevated {
            self.register_exclusions(&scripts).await
        } else {
            Vec::new()
        };

        Ok(InstallReport {
            scripts,
            startup_registered,
            startup_entry,
            loop_launched,
            exclusions,
        })
    }

    /// Render and write the sync script, the loop script and the log
    /// helper into the install directory.
    fn write_scripts(
        &self,
        local_name: &str,
        remote_path: &str,
        local_path: &Utf8Path,
    ) -> Result<ScriptSet, InstallError> {
        let (sync_name, loop_name, helper_name) = if cfg!(windows) {
            (
                format!("sync_{local_name}.bat"),
                format!("sync_loop_{local_name}.vbs"),
                "log_sync.ps1".to_string(),
            )
        } else {
            (
                format!("sync_{local_name}.sh"),
                format!("sync_loop_{local_name}.sh"),
                "log_sync.sh".to_string(),
            )
        };
        let sync_script = self.install_dir.join(sync_name);
        let loop_script = self.install_dir.join(loop_name);
        let log_helper = self.install_dir.join(helper_name);

        let (sync_body, loop_body, helper_body) = if cfg!(windows) {
            (
                render_sync_script_bat(
                    &self.install_dir,
                    &self.binary,
                    &self.config,
                    local_path,
                    remote_path,
                    &log_helper,
                ),
                render_loop_script_vbs(&sync_script),
                render_log_helper_ps1().to_string(),
            )
        } else {
            (
                render_sync_script_sh(
                    &self.install_dir,
                    &self.binary,
                    &self.config,
                    local_path,
                    remote_path,
                    &log_helper,
                ),
                render_loop_script_sh(&sync_script),
                render_log_helper_sh().to_string(),
            )
        };

        write_script(&sync_script, &sync_body)?;
        write_script(&loop_script, &loop_body)?;
        write_script(&log_helper, &helper_body)?;
        tracing::info!("Generated scripts for '{}' in {}", local_name, self.install_dir);

        Ok(ScriptSet {
            sync_script,
            loop_script,
            log_helper,
        })
    }

    fn startup_entry_path(&self, local_name: &str) -> Result<Utf8PathBuf, InstallError> {
        let dir = self.startup_dir.as_ref().ok_or(InstallError::NoStartupDir)?;
        let file = if cfg!(windows) {
            format!("Drive Sync - {local_name}.lnk")
        } else {
            format!("drive-sync-{local_name}.desktop")
        };
        Ok(dir.join(file))
    }

    /// Remove any previous startup entry for this display name, then
    /// register a new one pointing at the loop script.
    async fn register_startup(
        &self,
        local_name: &str,
        scripts: &ScriptSet,
        entry: &Utf8Path,
    ) -> bool {
        if entry.exists() {
            if let Err(e) = fs::remove_file(entry) {
                tracing::warn!("Could not remove old startup entry {}: {}", entry, e);
            } else {
                tracing::info!("Removed old startup entry {}", entry);
            }
        }

        if cfg!(windows) {
            let script = format!(
                r#"
$WScriptShell = New-Object -ComObject WScript.Shell
$shortcut = $WScriptShell.CreateShortcut("{entry}")
$shortcut.TargetPath = "wscript.exe"
$shortcut.Arguments = '"{loop_script}"'
$shortcut.WorkingDirectory = "{install_dir}"
$shortcut.Description = "Drive backup - {local_name}"
$shortcut.Save()
"#,
                entry = entry,
                loop_script = scripts.loop_script,
                install_dir = self.install_dir,
            );
            match process::run_powershell(&script, PROBE_TIMEOUT).await {
                Ok(out) if out.success() && entry.exists() => true,
                Ok(out) => {
                    tracing::warn!("Shortcut creation failed: {}", out.stderr.trim());
                    false
                }
                Err(e) => {
                    tracing::warn!("Shortcut creation failed: {}", e);
                    false
                }
            }
        } else {
            if let Some(dir) = entry.parent() {
                if fs::create_dir_all(dir).is_err() {
                    return false;
                }
            }
            let body = format!(
                "[Desktop Entry]\nType=Application\nName=Drive Sync - {local_name}\n\
                 Exec={}\nX-GNOME-Autostart-enabled=true\n",
                scripts.loop_script
            );
            match fs::write(entry, body) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("Autostart entry creation failed: {}", e);
                    false
                }
            }
        }
    }

    /// Register Defender exclusions (folder, process, both generated files)
    /// plus one outbound firewall allow rule. Each item is independent; a
    /// failure is recorded and the next item still runs. Re-running never
    /// errors on already-present entries: the Defender snippets swallow the
    /// duplicate case, the firewall snippet checks for the rule first.
    pub async fn register_exclusions(&self, scripts: &ScriptSet) -> Vec<ExclusionOutcome> {
        if !cfg!(windows) {
            return vec![ExclusionOutcome {
                label: "Security exclusions",
                status: ExclusionStatus::Skipped("only supported on Windows".to_string()),
            }];
        }

        let mut outcomes = Vec::new();

        outcomes.push(
            self.defender_exclusion(
                "Defender folder exclusion",
                "ExclusionPath",
                self.install_dir.as_str(),
            )
            .await,
        );

        if self.binary.exists() {
            outcomes.push(
                self.defender_exclusion(
                    "Defender process exclusion",
                    "ExclusionProcess",
                    self.binary.as_str(),
                )
                .await,
            );
        } else {
            outcomes.push(ExclusionOutcome {
                label: "Defender process exclusion",
                status: ExclusionStatus::Skipped(format!("{} not found", self.binary)),
            });
        }

        for (label, target) in [
            ("Defender sync-script exclusion", &scripts.sync_script),
            ("Defender loop-script exclusion", &scripts.loop_script),
        ] {
            if target.exists() {
                outcomes.push(
                    self.defender_exclusion(label, "ExclusionPath", target.as_str())
                        .await,
                );
            } else {
                outcomes.push(ExclusionOutcome {
                    label,
                    status: ExclusionStatus::Skipped(format!("{} not found", target)),
                });
            }
        }

        outcomes.push(self.firewall_rule().await);
        outcomes
    }

    async fn defender_exclusion(
        &self,
        label: &'static str,
        parameter: &str,
        target: &str,
    ) -> ExclusionOutcome {
        let script = render_defender_script(parameter, target);
        let status = classify_registration(process::run_powershell(&script, PROBE_TIMEOUT).await);
        ExclusionOutcome { label, status }
    }

    async fn firewall_rule(&self) -> ExclusionOutcome {
        let label = "Firewall outbound rule";
        if !self.binary.exists() {
            return ExclusionOutcome {
                label,
                status: ExclusionStatus::Skipped(format!("{} not found", self.binary)),
            };
        }
        let script = render_firewall_script(&self.binary);
        let status = classify_registration(process::run_powershell(&script, PROBE_TIMEOUT).await);
        ExclusionOutcome { label, status }
    }
}

/// Map a registration snippet's result onto a status. The snippets print
/// `Success` only when they actually registered something; a clean exit
/// without the marker means the item was already present or the refusal
/// was swallowed.
fn classify_registration(
    result: Result<CommandOutput, ProcessError>,
) -> ExclusionStatus {
    match result {
        Ok(out) if out.success() && out.stdout.contains("Success") => ExclusionStatus::Applied,
        Ok(out) if out.success() => ExclusionStatus::AlreadyPresent,
        Ok(out) => ExclusionStatus::Failed(out.stderr.trim().to_string()),
        Err(e) => ExclusionStatus::Failed(e.to_string()),
    }
}

fn write_script(path: &Utf8Path, body: &str) -> Result<(), InstallError> {
    fs::write(path, body).map_err(|source| InstallError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(|source| {
            InstallError::Write {
                path: path.to_path_buf(),
                source,
            }
        })?;
    }
    Ok(())
}

/// Launch the loop script as a detached background process and drop the
/// handle immediately: the installer does not own or supervise the loop.
fn launch_detached(loop_script: &Utf8Path) -> io::Result<()> {
    let mut command = if cfg!(windows) {
        let mut c = std::process::Command::new("wscript.exe");
        c.arg(loop_script.as_str());
        c
    } else {
        let mut c = std::process::Command::new("sh");
        c.arg(loop_script.as_str());
        c
    };
    command
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()?;
    // The Child is dropped here on purpose; std children keep running.
    Ok(())
}

// ---- script renderers -------------------------------------------------
//
// Pure string builders so their exact content is unit-testable on any
// host, independent of which platform's set gets written at install time.

pub fn render_sync_script_bat(
    install_dir: &Utf8Path,
    binary: &Utf8Path,
    config: &Utf8Path,
    local_path: &Utf8Path,
    remote_path: &str,
    log_helper: &Utf8Path,
) -> String {
    format!(
        r#"@echo off
cd /d "{install_dir}"
"{binary}" --config "{config}" sync "{local_path}" "{remote_path}" --progress
set EXITCODE=%errorlevel%
powershell -NoProfile -ExecutionPolicy Bypass -File "{log_helper}" %EXITCODE% "{local_path}" "{remote_path}"
if %EXITCODE% equ 0 (
    echo Sync successful at %date% %time%
) else (
    echo Sync failed!
    pause
)
"#
    )
}

/// Defender exclusion snippet. The empty catch block swallows "already
/// exists" so re-runs stay quiet; the `Success` marker is printed only on
/// an actual registration.
pub fn render_defender_script(parameter: &str, target: &str) -> String {
    format!(
        "try {{ Add-MpPreference -{parameter} '{target}' -ErrorAction Stop; \
         Write-Output 'Success' }} catch {{}}"
    )
}

/// Firewall snippet. Creates the outbound allow rule only when no rule
/// with that display name exists, so re-runs never duplicate it.
pub fn render_firewall_script(binary: &Utf8Path) -> String {
    format!(
        r#"
try {{
    $ruleName = "{FIREWALL_RULE_NAME}"
    $existing = Get-NetFirewallRule -DisplayName $ruleName -ErrorAction SilentlyContinue
    if (-not $existing) {{
        New-NetFirewallRule -DisplayName $ruleName -Direction Outbound -Program '{binary}' -Action Allow -Profile Any -ErrorAction Stop
        Write-Output "Success"
    }}
}} catch {{}}
"#
    )
}

pub fn render_loop_script_vbs(sync_script: &Utf8Path) -> String {
    format!(
        r#"Set WshShell = CreateObject("WScript.Shell")
Do While True
    WshShell.Run "cmd /c ""{sync_script}""", 0, True
    WScript.Sleep {SYNC_INTERVAL_MS}   ' 5 minutes
Loop
"#
    )
}

/// JSON log helper: appends one record (exit code, local, remote) to
/// `log.json` next to itself, rewriting the whole array each time.
pub fn render_log_helper_ps1() -> &'static str {
    r#"param([string]$ExitCode, [string]$LocalPath, [string]$RemotePath)
$logFile = Join-Path $PSScriptRoot "log.json"
$succeeded = ($ExitCode -eq "0")
$entry = [ordered]@{
    timestamp = (Get-Date).ToString("o")
    event     = if ($succeeded) { "SYNC_SUCCESS" } else { "SYNC_FAILED" }
    message   = if ($succeeded) { "Sync successful" } else { "Sync failed" }
    details   = [ordered]@{ exitcode = $ExitCode; local = $LocalPath; remote = $RemotePath }
}
$entries = @()
if (Test-Path $logFile) {
    try { $entries = @(Get-Content $logFile -Raw | ConvertFrom-Json) } catch { $entries = @() }
}
$entries += [pscustomobject]$entry
ConvertTo-Json @($entries) -Depth 5 | Set-Content $logFile -Encoding UTF8
"#
}

pub fn render_sync_script_sh(
    install_dir: &Utf8Path,
    binary: &Utf8Path,
    config: &Utf8Path,
    local_path: &Utf8Path,
    remote_path: &str,
    log_helper: &Utf8Path,
) -> String {
    format!(
        r#"#!/bin/sh
cd "{install_dir}" || exit 1
"{binary}" --config "{config}" sync "{local_path}" "{remote_path}" --progress
code=$?
"{log_helper}" "$code" "{local_path}" "{remote_path}"
exit "$code"
"#
    )
}

pub fn render_loop_script_sh(sync_script: &Utf8Path) -> String {
    let seconds = SYNC_INTERVAL_MS / 1000;
    format!(
        r#"#!/bin/sh
while :; do
    "{sync_script}"
    sleep {seconds}
done
"#
    )
}

pub fn render_log_helper_sh() -> &'static str {
    r#"#!/bin/sh
log="$(dirname "$0")/log.json"
code="$1"
local_path="$2"
remote_path="$3"
if [ "$code" = "0" ]; then
    event=SYNC_SUCCESS
    message="Sync successful"
else
    event=SYNC_FAILED
    message="Sync failed"
fi
entry=$(printf '{"timestamp":"%s","event":"%s","message":"%s","details":{"exitcode":"%s","local":"%s","remote":"%s"}}' \
    "$(date +%Y-%m-%dT%H:%M:%S)" "$event" "$message" "$code" "$local_path" "$remote_path")
if [ ! -s "$log" ] || [ "$(cat "$log")" = "[]" ]; then
    printf '[\n  %s\n]\n' "$entry" > "$log"
else
    tmp="${log}.tmp"
    sed -e '$ d' "$log" > "$tmp"
    printf ',\n  %s\n]\n' "$entry" >> "$tmp"
    mv "$tmp" "$log"
fi
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_paths() -> (Utf8PathBuf, Utf8PathBuf, Utf8PathBuf, Utf8PathBuf, Utf8PathBuf) {
        let install = Utf8PathBuf::from("C:/Users/me/AppData/Local/.systembackup");
        (
            install.clone(),
            install.join("rclone.exe"),
            install.join("rclone.conf"),
            install.join("log_sync.ps1"),
            Utf8PathBuf::from("C:/Users/me/Docs"),
        )
    }

    #[test]
    fn test_sync_script_invokes_one_directional_sync() {
        let (install, binary, config, helper, local) = sample_paths();
        let body = render_sync_script_bat(
            &install,
            &binary,
            &config,
            &local,
            "gdrive:Projects/2024-01",
            &helper,
        );
        assert!(body.contains("sync \"C:/Users/me/Docs\" \"gdrive:Projects/2024-01\" --progress"));
        assert!(body.contains("--config"));
        assert!(body.contains("%EXITCODE%"));
        assert!(body.contains("log_sync.ps1"));
    }

    #[test]
    fn test_loop_script_sleeps_five_minutes() {
        let body = render_loop_script_vbs(Utf8Path::new("C:/x/sync_Docs.bat"));
        assert!(body.contains("WScript.Sleep 300000"));
        assert!(body.contains("Do While True"));
        // Third Run argument True = wait for the sync to finish before
        // sleeping, so cycles never overlap.
        assert!(body.contains(", 0, True"));
    }

    #[test]
    fn test_sh_loop_script_sleeps_five_minutes() {
        let body = render_loop_script_sh(Utf8Path::new("/x/sync_Docs.sh"));
        assert!(body.contains("sleep 300"));
        assert!(body.contains("while :"));
    }

    #[test]
    fn test_log_helpers_distinguish_outcomes() {
        assert!(render_log_helper_ps1().contains("SYNC_SUCCESS"));
        assert!(render_log_helper_ps1().contains("SYNC_FAILED"));
        assert!(render_log_helper_sh().contains("SYNC_SUCCESS"));
        assert!(render_log_helper_sh().contains("SYNC_FAILED"));
    }

    #[test]
    fn test_firewall_script_checks_before_creating() {
        let script = render_firewall_script(Utf8Path::new("C:/x/rclone.exe"));

        let check = script.find("Get-NetFirewallRule").unwrap();
        let create = script.find("New-NetFirewallRule").unwrap();
        assert!(check < create);
        // One rule name, shared by the check and the creation.
        assert_eq!(script.matches(FIREWALL_RULE_NAME).count(), 1);
        assert!(script.contains("Write-Output \"Success\""));
    }

    #[test]
    fn test_defender_script_marks_actual_registration() {
        let script = render_defender_script("ExclusionPath", "C:/x");
        assert!(script.contains("Add-MpPreference -ExclusionPath 'C:/x'"));
        assert!(script.contains("Write-Output 'Success'"));
    }

    #[test]
    fn test_registration_classification() {
        let out = |code: i32, stdout: &str, stderr: &str| CommandOutput {
            code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        };

        assert_eq!(
            classify_registration(Ok(out(0, "Success\n", ""))),
            ExclusionStatus::Applied
        );
        // Clean exit without the marker: the catch block swallowed it or
        // the rule already existed.
        assert_eq!(
            classify_registration(Ok(out(0, "", ""))),
            ExclusionStatus::AlreadyPresent
        );
        assert!(matches!(
            classify_registration(Ok(out(1, "", "access denied"))),
            ExclusionStatus::Failed(_)
        ));
    }

    #[test]
    fn test_sh_sync_script_propagates_exit_code() {
        let install = Utf8PathBuf::from("/home/me/.local/share/.systembackup");
        let body = render_sync_script_sh(
            &install,
            &install.join("rclone"),
            &install.join("rclone.conf"),
            Utf8Path::new("/home/me/Docs"),
            "gdrive:Projects/2024-01",
            &install.join("log_sync.sh"),
        );
        assert!(body.contains("code=$?"));
        assert!(body.contains("exit \"$code\""));
        assert!(body.contains("gdrive:Projects/2024-01"));
    }
}
