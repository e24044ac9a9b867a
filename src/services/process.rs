//! Timeout-wrapped subprocess execution.
//!
//! Every external command the installer runs (rclone invocations, PowerShell
//! snippets, shell probes) goes through this module so that a hung command
//! can never hang the installer. The single exception is
//! [`run_interactive`], used for the browser-based auth flow, which blocks
//! on user interaction by design.

use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

/// Default timeout for quick probes (listremotes, lsd, mkdir, dialogs).
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Process error: {0}")]
    Io(#[from] std::io::Error),
}

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Run a program with arguments, capturing output, bounded by `limit`.
pub async fn run<I, S>(
    program: &str,
    args: I,
    limit: Duration,
) -> Result<CommandOutput, ProcessError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let start = Instant::now();
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let output = timeout(limit, cmd.output()).await.map_err(|_| {
        tracing::warn!("{} timed out after {:?}", program, limit);
        ProcessError::Timeout(limit)
    })??;

    let result = CommandOutput {
        code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    tracing::debug!(
        "{} finished in {:.2}s with exit code {}",
        program,
        start.elapsed().as_secs_f32(),
        result.code
    );
    Ok(result)
}

/// Run a program with inherited stdio and no timeout.
///
/// Used only for interactive flows (the `rclone config create` browser
/// round-trip) that legitimately block until the user finishes.
pub async fn run_interactive<I, S>(program: &str, args: I) -> Result<i32, ProcessError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    tracing::info!("Running interactive command: {}", program);
    let status = Command::new(program).args(args).status().await?;
    Ok(status.code().unwrap_or(-1))
}

/// Run a PowerShell snippet, bounded by `limit`.
pub async fn run_powershell(script: &str, limit: Duration) -> Result<CommandOutput, ProcessError> {
    run("powershell", ["-NoProfile", "-Command", script], limit).await
}

/// Run a command line through the platform shell, bounded by `limit`.
pub async fn run_shell(command: &str, limit: Duration) -> Result<CommandOutput, ProcessError> {
    if cfg!(target_os = "windows") {
        run("cmd", ["/C", command], limit).await
    } else {
        run("sh", ["-c", command], limit).await
    }
}

/// Whether the process runs with administrator rights.
///
/// Elevation disables the interactive browser auth flow and enables the
/// Defender/firewall exclusion registration.
pub async fn is_elevated() -> bool {
    if cfg!(target_os = "windows") {
        let script = "[Security.Principal.WindowsPrincipal]::new(\
                      [Security.Principal.WindowsIdentity]::GetCurrent()).IsInRole(\
                      [Security.Principal.WindowsBuiltInRole]::Administrator)";
        match run_powershell(script, PROBE_TIMEOUT).await {
            Ok(out) => out.success() && out.stdout.trim().eq_ignore_ascii_case("true"),
            Err(_) => false,
        }
    } else {
        match run("id", ["-u"], PROBE_TIMEOUT).await {
            Ok(out) => out.success() && out.stdout.trim() == "0",
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_captures_output() {
        let out = run_shell("echo hello", PROBE_TIMEOUT).await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_reports_nonzero_exit() {
        let out = run_shell("exit 3", PROBE_TIMEOUT).await.unwrap();
        assert!(!out.success());
        assert_eq!(out.code, 3);
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let limit = Duration::from_millis(200);
        let result = run_shell("sleep 5", limit).await;
        assert!(matches!(result, Err(ProcessError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_missing_program_is_io_error() {
        let result = run("definitely-not-a-real-program", ["x"], PROBE_TIMEOUT).await;
        assert!(matches!(result, Err(ProcessError::Io(_))));
    }
}
