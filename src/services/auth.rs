//! Remote credential management for the `gdrive:` remote.
//!
//! Supplies the mechanics of the four-stage auth chain (existing config,
//! candidate config beside the installer, automatic browser auth, manual
//! guided auth); the orchestrator decides which stage to try next.

use crate::models::InstallPaths;
use crate::services::process::{self, PROBE_TIMEOUT, ProcessError};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::fs;
use std::time::Duration;
use thiserror::Error;

/// Name of the configured remote. Fixed: the generated scripts, the
/// validation probes and the remote path format all assume it.
pub const REMOTE_NAME: &str = "gdrive";

/// Shorter budget for probing a candidate config that may well be stale.
const CANDIDATE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Authentication command failed with exit code {0}")]
    CommandFailed(i32),

    #[error("Config is still invalid after authentication")]
    StillInvalid,

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Service wrapping every rclone invocation the auth chain needs.
///
/// Stateless: holds only resolved paths plus a precompiled pattern for
/// parsing `rclone config file` output.
pub struct AuthService {
    binary: Utf8PathBuf,
    config: Utf8PathBuf,
    candidate: Utf8PathBuf,
    conf_line: Regex,
}

impl AuthService {
    pub fn new(paths: &InstallPaths) -> Self {
        Self {
            binary: paths.binary(),
            config: paths.config(),
            candidate: paths.candidate_config(),
            // Matches the path line in `rclone config file` output.
            conf_line: Regex::new(r"(?m)^\s*(.+rclone\.conf)\s*$").expect("valid conf-line regex"),
        }
    }

    pub fn config_path(&self) -> &Utf8Path {
        &self.config
    }

    /// The literal command shown in the manual auth instructions.
    pub fn manual_command(&self) -> String {
        format!("\"{}\" config create {} drive", self.binary, REMOTE_NAME)
    }

    /// Validation procedure: the config file must exist, `listremotes` must
    /// exit zero and mention the remote, and a lightweight `lsd` probe
    /// against the remote must also exit zero. A config that names the
    /// remote but cannot reach it is invalid.
    pub async fn is_config_valid(&self) -> bool {
        if !self.config.exists() {
            return false;
        }
        if !self.names_remote(&self.config, PROBE_TIMEOUT).await {
            return false;
        }
        let probe = process::run(
            self.binary.as_str(),
            [
                "--config",
                self.config.as_str(),
                "lsd",
                &format!("{REMOTE_NAME}:"),
            ],
            PROBE_TIMEOUT,
        )
        .await;
        matches!(probe, Ok(out) if out.success())
    }

    /// Stage 2: a config carried next to the installer is probed directly;
    /// if it names the remote it is copied into place. Returns the adopted
    /// source path on success.
    pub async fn adopt_candidate_config(&self) -> Option<Utf8PathBuf> {
        if !self.candidate.exists() || self.candidate == self.config {
            return None;
        }
        if !self.names_remote(&self.candidate, CANDIDATE_TIMEOUT).await {
            return None;
        }
        match fs::copy(&self.candidate, &self.config) {
            Ok(_) => {
                tracing::info!("Adopted candidate config from {}", self.candidate);
                Some(self.candidate.clone())
            }
            Err(e) => {
                tracing::warn!("Failed to copy candidate config: {}", e);
                None
            }
        }
    }

    /// Stage 3: non-interactive remote creation, which opens the system
    /// browser for consent. Blocks without timeout until the user finishes
    /// the flow, then re-validates.
    pub async fn auto_auth(&self) -> Result<(), AuthError> {
        let code = process::run_interactive(
            self.binary.as_str(),
            [
                "--config",
                self.config.as_str(),
                "config",
                "create",
                REMOTE_NAME,
                "drive",
                "config_is_local=false",
            ],
        )
        .await?;
        if code != 0 {
            return Err(AuthError::CommandFailed(code));
        }
        if self.is_config_valid().await {
            Ok(())
        } else {
            Err(AuthError::StillInvalid)
        }
    }

    /// Stage 4 helper: after the user ran the manual command, locate the
    /// tool's default config location and copy it into place.
    pub async fn adopt_default_config(&self) -> Option<Utf8PathBuf> {
        let source = self.locate_default_config().await?;
        if source == self.config {
            return Some(source);
        }
        match fs::copy(&source, &self.config) {
            Ok(_) => {
                tracing::info!("Copied config from {}", source);
                Some(source)
            }
            Err(e) => {
                tracing::warn!("Failed to copy config from {}: {}", source, e);
                None
            }
        }
    }

    /// Ask the tool where its default config lives (`rclone config file`
    /// prints a descriptive line followed by the path).
    pub async fn locate_default_config(&self) -> Option<Utf8PathBuf> {
        let out = process::run(self.binary.as_str(), ["config", "file"], PROBE_TIMEOUT)
            .await
            .ok()?;
        if !out.success() {
            return None;
        }
        let path = self
            .conf_line
            .captures(&out.stdout)
            .and_then(|c| c.get(1))
            .map(|m| Utf8PathBuf::from(m.as_str().trim()))?;
        path.exists().then_some(path)
    }

    /// `listremotes` with the given config mentions the expected remote.
    async fn names_remote(&self, config: &Utf8Path, limit: Duration) -> bool {
        let result = process::run(
            self.binary.as_str(),
            ["--config", config.as_str(), "listremotes"],
            limit,
        )
        .await;
        matches!(result, Ok(out) if out.success() && out.stdout.contains(&format!("{REMOTE_NAME}:")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_command_names_remote_and_binary() {
        let paths = InstallPaths::new(
            Utf8PathBuf::from("/tmp/work"),
            Utf8PathBuf::from("/tmp/install"),
        );
        let service = AuthService::new(&paths);
        let cmd = service.manual_command();
        assert!(cmd.contains("config create gdrive drive"));
        assert!(cmd.contains("rclone"));
    }

    #[test]
    fn test_conf_line_pattern() {
        let paths = InstallPaths::new(
            Utf8PathBuf::from("/tmp/work"),
            Utf8PathBuf::from("/tmp/install"),
        );
        let service = AuthService::new(&paths);

        let output = "Configuration file is stored at:\n/home/user/.config/rclone/rclone.conf\n";
        let captured = service
            .conf_line
            .captures(output)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str());
        assert_eq!(captured, Some("/home/user/.config/rclone/rclone.conf"));
    }

    #[tokio::test]
    async fn test_missing_config_is_invalid() {
        let temp = tempfile::TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        let paths = InstallPaths::new(root.join("work"), root.join("install"));
        let service = AuthService::new(&paths);
        assert!(!service.is_config_valid().await);
    }
}
