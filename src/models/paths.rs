use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

/// Name of the external sync binary on the current platform.
pub fn binary_name() -> &'static str {
    if cfg!(windows) { "rclone.exe" } else { "rclone" }
}

/// Every filesystem location the installer touches, resolved once at startup
/// and passed by reference into the services.
///
/// The permanent install directory (`.systembackup` under the platform's
/// local-data directory) is created eagerly so that all artifacts - binary,
/// config, settings, event log, generated scripts - land directly in their
/// final location. Re-running the installer from anywhere finds them again.
#[derive(Debug, Clone)]
pub struct InstallPaths {
    /// Directory the installer was launched from. A candidate `rclone.conf`
    /// carried next to the installer (portable USB setup) is looked up here.
    pub work_dir: Utf8PathBuf,
    /// Permanent system location, e.g. `%LOCALAPPDATA%\.systembackup`.
    pub install_dir: Utf8PathBuf,
    /// Fallback root for locally created backup folders when the folder
    /// picker is cancelled.
    pub backup_root: Utf8PathBuf,
}

impl InstallPaths {
    /// Resolve all paths from the process environment and create the install
    /// directory. On Windows the directory is additionally marked hidden
    /// (best effort, matching how the loop script itself stays out of sight).
    pub fn discover() -> Result<Self> {
        let work_dir = Utf8PathBuf::try_from(
            std::env::current_dir().context("Failed to resolve current directory")?,
        )
        .context("Current directory is not valid UTF-8")?;

        let data_dir = dirs::data_local_dir()
            .context("Could not determine the platform local-data directory")?;
        let install_dir = Utf8PathBuf::try_from(data_dir)
            .context("Local-data directory is not valid UTF-8")?
            .join(".systembackup");

        let paths = Self::new(work_dir, install_dir);
        paths.ensure_install_dir()?;
        Ok(paths)
    }

    /// Build paths from explicit directories. Used by `discover()` and by
    /// tests that point the installer at temporary locations.
    pub fn new(work_dir: Utf8PathBuf, install_dir: Utf8PathBuf) -> Self {
        let backup_root = work_dir.join("DriveBackup");
        Self {
            work_dir,
            install_dir,
            backup_root,
        }
    }

    /// Create the install directory and hide it on Windows.
    pub fn ensure_install_dir(&self) -> Result<()> {
        if !self.install_dir.exists() {
            fs::create_dir_all(&self.install_dir).with_context(|| {
                format!("Failed to create install directory: {}", self.install_dir)
            })?;
        }
        if cfg!(windows) {
            // Hidden attribute keeps the folder out of casual view; failure
            // is irrelevant to correctness.
            let _ = std::process::Command::new("attrib")
                .args(["+h", self.install_dir.as_str()])
                .output();
        }
        Ok(())
    }

    /// Final location of the sync binary.
    pub fn binary(&self) -> Utf8PathBuf {
        self.install_dir.join(binary_name())
    }

    /// Final location of the validated rclone config.
    pub fn config(&self) -> Utf8PathBuf {
        self.install_dir.join("rclone.conf")
    }

    /// A config carried next to the installer, probed before any auth flow.
    pub fn candidate_config(&self) -> Utf8PathBuf {
        self.work_dir.join("rclone.conf")
    }

    /// Downloaded release archive.
    pub fn archive(&self) -> Utf8PathBuf {
        self.install_dir.join("rclone.zip")
    }

    /// Scratch directory the archive is extracted into; removed afterwards.
    pub fn extract_scratch(&self) -> Utf8PathBuf {
        self.install_dir.join("rclone")
    }

    /// The append-only JSON event log.
    pub fn event_log(&self) -> Utf8PathBuf {
        self.install_dir.join("log.json")
    }

    /// Directory for the rotating tracing logs.
    pub fn tracing_dir(&self) -> Utf8PathBuf {
        self.install_dir.join("logs")
    }

    /// Settings file: prefer the install directory once it exists, otherwise
    /// fall back to the directory the installer runs from.
    pub fn settings_file(&self) -> Utf8PathBuf {
        if self.install_dir.exists() {
            self.install_dir.join("settings.json")
        } else {
            self.work_dir.join("settings.json")
        }
    }

    /// Platform startup directory, if one can be resolved.
    ///
    /// Windows: the per-user Start Menu `Startup` folder. Elsewhere: the XDG
    /// autostart directory.
    pub fn startup_dir(&self) -> Option<Utf8PathBuf> {
        if cfg!(windows) {
            let appdata = std::env::var("APPDATA").ok()?;
            Some(
                Utf8Path::new(&appdata)
                    .join("Microsoft")
                    .join("Windows")
                    .join("Start Menu")
                    .join("Programs")
                    .join("Startup"),
            )
        } else {
            let config = Utf8PathBuf::try_from(dirs::config_dir()?).ok()?;
            Some(config.join("autostart"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn paths_in(temp: &TempDir) -> InstallPaths {
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        InstallPaths::new(root.join("work"), root.join("install"))
    }

    #[test]
    fn test_artifacts_live_under_install_dir() {
        let temp = TempDir::new().unwrap();
        let paths = paths_in(&temp);

        assert_eq!(paths.binary().parent().unwrap(), paths.install_dir);
        assert_eq!(paths.config().parent().unwrap(), paths.install_dir);
        assert_eq!(paths.archive().parent().unwrap(), paths.install_dir);
        assert_eq!(paths.event_log().file_name().unwrap(), "log.json");
    }

    #[test]
    fn test_settings_file_prefers_install_dir_once_created() {
        let temp = TempDir::new().unwrap();
        let paths = paths_in(&temp);

        // Install dir does not exist yet: settings stay beside the installer.
        assert_eq!(paths.settings_file().parent().unwrap(), paths.work_dir);

        paths.ensure_install_dir().unwrap();
        assert_eq!(paths.settings_file().parent().unwrap(), paths.install_dir);
    }

    #[test]
    fn test_candidate_config_is_in_work_dir() {
        let temp = TempDir::new().unwrap();
        let paths = paths_in(&temp);
        assert_eq!(paths.candidate_config().parent().unwrap(), paths.work_dir);
    }
}
