//! Ensures the rclone binary is present in the install directory.
//!
//! If the binary is missing, a release archive is obtained through an
//! ordered list of transport strategies (direct HTTP client, then a shell
//! web client), extracted, and the executable relocated to its final path.
//! Each transport runs on a worker thread while the caller's tick callback
//! animates a progress indicator; this is a cooperative wait over exactly
//! one unit of background work, not parallel fan-out.

use crate::models::{InstallPaths, binary_name};
use camino::Utf8PathBuf;
use std::fmt;
use std::fs;
use std::io;
use std::time::{Duration, Instant};
use thiserror::Error;
use walkdir::WalkDir;

/// Overall time budget for a single transport strategy.
const TRANSPORT_TIMEOUT: Duration = Duration::from_secs(120);

/// Interval between progress ticks while a transport runs.
const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Official release archive for the current platform.
pub fn archive_url() -> &'static str {
    if cfg!(target_os = "windows") {
        "https://downloads.rclone.org/rclone-current-windows-amd64.zip"
    } else if cfg!(target_os = "macos") {
        "https://downloads.rclone.org/rclone-current-osx-amd64.zip"
    } else {
        "https://downloads.rclone.org/rclone-current-linux-amd64.zip"
    }
}

/// Human-facing page for manual remediation.
pub const MANUAL_DOWNLOAD_PAGE: &str = "https://rclone.org/downloads/";

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error(
        "could not download the rclone archive; download it manually from {page} \
         (direct link: {url}) and place it at {target}"
    )]
    AllTransportsFailed {
        page: &'static str,
        url: &'static str,
        target: Utf8PathBuf,
    },

    #[error("no {name} found anywhere in the extracted archive")]
    ExecutableNotFound { name: &'static str },

    #[error("failed to open archive {path}: {source}")]
    ArchiveOpen {
        path: Utf8PathBuf,
        source: io::Error,
    },

    #[error("failed to extract archive: {0}")]
    Extract(#[from] zip::result::ZipError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Transport strategies, attempted in order. Each is a qualitatively
/// different mechanism, not a retry of the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    HttpClient,
    ShellWebClient,
}

/// One download mechanism: fetch `url` into the destination file.
type TransportFn = fn(&str, &Utf8PathBuf) -> Result<(), String>;

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::HttpClient => write!(f, "HTTP client"),
            Transport::ShellWebClient => write!(f, "shell web client"),
        }
    }
}

/// How the binary came to be present.
#[derive(Debug, Clone)]
pub struct ProvisionOutcome {
    pub binary: Utf8PathBuf,
    /// `None` when the binary (or archive) was already on disk.
    pub downloaded_via: Option<Transport>,
    /// Size of the downloaded archive in bytes, when a download happened.
    pub archive_bytes: Option<u64>,
}

#[derive(Clone)]
pub struct ProvisionService {
    archive: Utf8PathBuf,
    scratch: Utf8PathBuf,
    target: Utf8PathBuf,
    url: &'static str,
    transports: Vec<(Transport, TransportFn)>,
}

impl ProvisionService {
    pub fn new(paths: &InstallPaths) -> Self {
        Self::with_transports(
            paths,
            vec![
                (Transport::HttpClient, http_download),
                (Transport::ShellWebClient, shell_download),
            ],
        )
    }

    /// Construct with an explicit transport list. Tests substitute stub
    /// download functions here.
    fn with_transports(paths: &InstallPaths, transports: Vec<(Transport, TransportFn)>) -> Self {
        Self {
            archive: paths.archive(),
            scratch: paths.extract_scratch(),
            target: paths.binary(),
            url: archive_url(),
            transports,
        }
    }

    /// Ensure the binary exists at its target path, downloading and
    /// extracting if necessary. Idempotent: an already-present binary
    /// returns immediately with no network access.
    ///
    /// `tick` is invoked roughly every 100 ms while a transport strategy
    /// runs, so the caller can animate a spinner.
    pub fn ensure_binary(
        &self,
        tick: &mut dyn FnMut(),
    ) -> Result<ProvisionOutcome, ProvisionError> {
        if self.target.exists() {
            tracing::info!("Binary already present at {}", self.target);
            return Ok(ProvisionOutcome {
                binary: self.target.clone(),
                downloaded_via: None,
                archive_bytes: None,
            });
        }

        let mut downloaded_via = None;
        let mut archive_bytes = None;
        if !self.archive.exists() {
            let (via, bytes) = self.download_archive(tick)?;
            downloaded_via = Some(via);
            archive_bytes = Some(bytes);
        }

        self.extract_and_relocate()?;
        Ok(ProvisionOutcome {
            binary: self.target.clone(),
            downloaded_via,
            archive_bytes,
        })
    }

    /// Try each transport in order until one leaves a non-empty archive on
    /// disk. A zero-byte or missing result counts as failure and the partial
    /// artifact is deleted before the next attempt.
    fn download_archive(
        &self,
        tick: &mut dyn FnMut(),
    ) -> Result<(Transport, u64), ProvisionError> {
        for &(transport, download) in &self.transports {
            tracing::info!("Downloading {} via {}", self.url, transport);
            match self.run_transport(download, tick) {
                Ok(()) => {
                    let size = self.archive.metadata().map(|m| m.len()).unwrap_or(0);
                    if size > 0 {
                        tracing::info!("Download complete via {} ({} bytes)", transport, size);
                        return Ok((transport, size));
                    }
                    tracing::warn!("{} produced an empty file, discarding", transport);
                    let _ = fs::remove_file(&self.archive);
                }
                Err(e) => {
                    tracing::warn!("{} download failed: {}", transport, e);
                    let _ = fs::remove_file(&self.archive);
                }
            }
        }
        Err(ProvisionError::AllTransportsFailed {
            page: MANUAL_DOWNLOAD_PAGE,
            url: self.url,
            target: self.archive.clone(),
        })
    }

    /// Run one transport on a worker thread, ticking the caller until it
    /// finishes, then propagate its outcome.
    fn run_transport(&self, download: TransportFn, tick: &mut dyn FnMut()) -> Result<(), String> {
        let url = self.url;
        let dest = self.archive.clone();
        let worker = std::thread::spawn(move || download(url, &dest));

        while !worker.is_finished() {
            tick();
            std::thread::sleep(TICK_INTERVAL);
        }
        worker
            .join()
            .unwrap_or_else(|_| Err("download worker panicked".to_string()))
    }

    /// Extract the archive into the scratch directory, move the first
    /// executable found by name to the target path, and remove the scratch
    /// tree. With duplicate executables in the archive the first match wins;
    /// the walk order is not defined, which is a known limitation inherited
    /// from the original tool.
    fn extract_and_relocate(&self) -> Result<(), ProvisionError> {
        fs::create_dir_all(&self.scratch)?;

        let file = fs::File::open(&self.archive).map_err(|source| ProvisionError::ArchiveOpen {
            path: self.archive.clone(),
            source,
        })?;
        let mut zip = zip::ZipArchive::new(file)?;
        zip.extract(&self.scratch)?;

        let name = binary_name();
        let found = WalkDir::new(&self.scratch)
            .into_iter()
            .filter_map(Result::ok)
            .find(|entry| entry.file_type().is_file() && entry.file_name() == name)
            .ok_or(ProvisionError::ExecutableNotFound { name })?;

        move_file(found.path(), self.target.as_std_path())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.target, fs::Permissions::from_mode(0o755))?;
        }

        // Scratch removal is cleanup only.
        let _ = fs::remove_dir_all(&self.scratch);
        Ok(())
    }
}

/// Rename with copy+delete fallback for cross-device moves.
fn move_file(from: &std::path::Path, to: &std::path::Path) -> io::Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to)?;
    fs::remove_file(from)
}

/// Transport 1: direct HTTP GET streamed to disk.
fn http_download(url: &str, dest: &Utf8PathBuf) -> Result<(), String> {
    let agent = ureq::AgentBuilder::new().timeout(TRANSPORT_TIMEOUT).build();
    let response = agent.get(url).call().map_err(|e| e.to_string())?;
    let mut reader = response.into_reader();
    let mut file = fs::File::create(dest).map_err(|e| e.to_string())?;
    io::copy(&mut reader, &mut file).map_err(|e| e.to_string())?;
    Ok(())
}

/// Transport 2: hand the download to the OS shell's web client
/// (PowerShell's WebClient on Windows, curl elsewhere). Enforces its own
/// deadline by polling the child and killing it on overrun.
fn shell_download(url: &str, dest: &Utf8PathBuf) -> Result<(), String> {
    let mut child = if cfg!(target_os = "windows") {
        let script = format!(
            "$wc = New-Object System.Net.WebClient; $wc.DownloadFile('{}', '{}')",
            url, dest
        );
        std::process::Command::new("powershell")
            .args(["-NoProfile", "-Command", &script])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
    } else {
        std::process::Command::new("curl")
            .args(["-fsSL", "-o", dest.as_str(), url])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
    }
    .map_err(|e| e.to_string())?;

    let deadline = Instant::now() + TRANSPORT_TIMEOUT;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                if status.success() {
                    return Ok(());
                }
                return Err(format!("shell download exited with {}", status));
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(format!("shell download timed out after {:?}", TRANSPORT_TIMEOUT));
                }
                std::thread::sleep(Duration::from_millis(200));
            }
            Err(e) => return Err(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn service_in(temp: &TempDir) -> ProvisionService {
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        let paths = InstallPaths::new(root.join("work"), root.join("install"));
        paths.ensure_install_dir().unwrap();
        ProvisionService::new(&paths)
    }

    fn service_with_transports(
        temp: &TempDir,
        transports: Vec<(Transport, TransportFn)>,
    ) -> ProvisionService {
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        let paths = InstallPaths::new(root.join("work"), root.join("install"));
        paths.ensure_install_dir().unwrap();
        ProvisionService::with_transports(&paths, transports)
    }

    /// Simulates a transport that "succeeds" but delivers nothing.
    fn zero_byte_download(_url: &str, dest: &Utf8PathBuf) -> Result<(), String> {
        fs::File::create(dest).map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Delivers a small but real archive containing the executable.
    fn stub_archive_download(_url: &str, dest: &Utf8PathBuf) -> Result<(), String> {
        let file = fs::File::create(dest).map_err(|e| e.to_string())?;
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file(binary_name(), options).map_err(|e| e.to_string())?;
        zip.write_all(b"payload").map_err(|e| e.to_string())?;
        zip.finish().map_err(|e| e.to_string())?;
        Ok(())
    }

    fn write_archive_with(service: &ProvisionService, entries: &[(&str, &[u8])]) {
        let file = fs::File::create(&service.archive).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_existing_binary_short_circuits() {
        let temp = TempDir::new().unwrap();
        let service = service_in(&temp);
        fs::write(&service.target, b"fake").unwrap();

        let mut ticks = 0usize;
        let outcome = service.ensure_binary(&mut || ticks += 1).unwrap();
        assert_eq!(outcome.binary, service.target);
        assert!(outcome.downloaded_via.is_none());
        // No download happened, so the tick callback never ran.
        assert_eq!(ticks, 0);
    }

    #[test]
    fn test_extracts_executable_from_nested_archive() {
        let temp = TempDir::new().unwrap();
        let service = service_in(&temp);
        let nested = format!("rclone-v1.68.0/{}", binary_name());
        write_archive_with(
            &service,
            &[("rclone-v1.68.0/README.txt", b"doc"), (&nested, b"#!bin")],
        );

        let outcome = service.ensure_binary(&mut || {}).unwrap();
        assert!(outcome.binary.exists());
        assert_eq!(fs::read(&outcome.binary).unwrap(), b"#!bin");
        // Scratch directory is removed after relocation.
        assert!(!service.scratch.exists());
        // The archive was already present, so nothing was downloaded.
        assert!(outcome.downloaded_via.is_none());
    }

    #[test]
    fn test_archive_without_executable_fails() {
        let temp = TempDir::new().unwrap();
        let service = service_in(&temp);
        write_archive_with(&service, &[("docs/README.txt", b"doc")]);

        let err = service.ensure_binary(&mut || {}).unwrap_err();
        assert!(matches!(err, ProvisionError::ExecutableNotFound { .. }));
    }

    #[test]
    fn test_empty_download_falls_through_to_next_transport() {
        let temp = TempDir::new().unwrap();
        let service = service_with_transports(
            &temp,
            vec![
                (Transport::HttpClient, zero_byte_download),
                (Transport::ShellWebClient, stub_archive_download),
            ],
        );

        let outcome = service.ensure_binary(&mut || {}).unwrap();
        assert_eq!(outcome.downloaded_via, Some(Transport::ShellWebClient));
        assert!(outcome.archive_bytes.unwrap() > 0);
        assert_eq!(fs::read(&outcome.binary).unwrap(), b"payload");
    }

    #[test]
    fn test_empty_downloads_from_every_transport_fail() {
        let temp = TempDir::new().unwrap();
        let service = service_with_transports(
            &temp,
            vec![
                (Transport::HttpClient, zero_byte_download),
                (Transport::ShellWebClient, zero_byte_download),
            ],
        );

        let err = service.ensure_binary(&mut || {}).unwrap_err();
        assert!(matches!(err, ProvisionError::AllTransportsFailed { .. }));
        // The empty artifacts were deleted, not left for a later run to trust.
        assert!(!service.archive.exists());
    }

    #[test]
    fn test_all_transports_failed_names_remediation() {
        let err = ProvisionError::AllTransportsFailed {
            page: MANUAL_DOWNLOAD_PAGE,
            url: archive_url(),
            target: Utf8PathBuf::from("/tmp/rclone.zip"),
        };
        let msg = err.to_string();
        assert!(msg.contains(MANUAL_DOWNLOAD_PAGE));
        assert!(msg.contains("/tmp/rclone.zip"));
    }
}
