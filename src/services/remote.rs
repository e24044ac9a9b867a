//! Remote-side probes and layout: connection test and the two-level
//! destination directory.

use crate::models::InstallPaths;
use crate::services::auth::REMOTE_NAME;
use crate::services::process::{self, CommandOutput, PROBE_TIMEOUT, ProcessError};
use camino::Utf8PathBuf;

/// Build the full remote destination string, e.g. `gdrive:Projects/2024-01`.
pub fn remote_path(parent: &str, child: &str) -> String {
    format!("{REMOTE_NAME}:{parent}/{child}")
}

pub struct RemoteService {
    binary: Utf8PathBuf,
    config: Utf8PathBuf,
}

impl RemoteService {
    pub fn new(paths: &InstallPaths) -> Self {
        Self {
            binary: paths.binary(),
            config: paths.config(),
        }
    }

    /// Lightweight reachability probe (`lsd` against the remote root).
    pub async fn test_connection(&self) -> Result<CommandOutput, ProcessError> {
        process::run(
            self.binary.as_str(),
            [
                "--config",
                self.config.as_str(),
                "lsd",
                &format!("{REMOTE_NAME}:"),
            ],
            PROBE_TIMEOUT,
        )
        .await
    }

    /// Issue `mkdir` for the destination path. A non-zero exit is reported
    /// to the caller but deliberately not distinguished from "directory
    /// already exists" - the path is used regardless.
    pub async fn make_remote_dir(&self, path: &str) -> Result<CommandOutput, ProcessError> {
        process::run(
            self.binary.as_str(),
            ["--config", self.config.as_str(), "mkdir", path],
            PROBE_TIMEOUT,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_path_format() {
        assert_eq!(remote_path("Projects", "2024-01"), "gdrive:Projects/2024-01");
        assert_eq!(remote_path("ZEN BACKUP", "Backup"), "gdrive:ZEN BACKUP/Backup");
    }
}
