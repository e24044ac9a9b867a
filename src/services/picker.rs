//! Local folder selection via an ordered chain of OS dialog mechanisms.
//!
//! Order: native dialog (rfd) on a worker thread, then three PowerShell
//! dialog variants of decreasing modernity. Each mechanism runs with a
//! bounded wait; the first one that returns an existing path wins. When
//! every mechanism fails or is cancelled, the orchestrator falls back to a
//! manual text prompt.

use crate::services::process::{self, PROBE_TIMEOUT};
use camino::Utf8PathBuf;
use std::sync::mpsc;
use std::time::Duration;

const DIALOG_TITLE: &str = "Select the folder you want to back up";

/// Modern COM shell dialog.
const PS_SHELL_APPLICATION: &str = r#"
$shell = New-Object -ComObject Shell.Application
$folder = $shell.BrowseForFolder(0, 'Select the folder you want to back up', 0, 0)
if ($folder) {
    $folder.Self.Path
}
"#;

/// OpenFileDialog repurposed as a folder picker.
const PS_OPEN_FILE_DIALOG: &str = r#"
Add-Type -AssemblyName System.Windows.Forms
$dialog = New-Object System.Windows.Forms.OpenFileDialog
$dialog.ValidateNames = $false
$dialog.CheckFileExists = $false
$dialog.CheckPathExists = $true
$dialog.FileName = "Select Folder"
$dialog.Title = "Select the folder you want to back up"
if ($dialog.ShowDialog() -eq [System.Windows.Forms.DialogResult]::OK) {
    [System.IO.Path]::GetDirectoryName($dialog.FileName)
}
"#;

/// Legacy folder browser.
const PS_FOLDER_BROWSER: &str = r#"
Add-Type -AssemblyName System.Windows.Forms
$folderBrowser = New-Object System.Windows.Forms.FolderBrowserDialog
$folderBrowser.Description = 'Select the folder you want to back up'
$folderBrowser.ShowNewFolderButton = $true
$result = $folderBrowser.ShowDialog()
if ($result -eq [System.Windows.Forms.DialogResult]::OK) {
    $folderBrowser.SelectedPath
}
"#;

/// Run the dialog chain. Returns the selected folder, or `None` if every
/// mechanism failed, timed out or was cancelled.
pub async fn pick_local_folder() -> Option<Utf8PathBuf> {
    // The bounded wait is a blocking recv; keep it off the async workers.
    let native = tokio::task::spawn_blocking(|| native_dialog(PROBE_TIMEOUT))
        .await
        .unwrap_or(None);
    if let Some(path) = native {
        tracing::info!("Folder picked via native dialog: {}", path);
        return Some(path);
    }

    for (label, script) in [
        ("Shell.Application", PS_SHELL_APPLICATION),
        ("OpenFileDialog", PS_OPEN_FILE_DIALOG),
        ("FolderBrowserDialog", PS_FOLDER_BROWSER),
    ] {
        if let Some(path) = powershell_dialog(script).await {
            tracing::info!("Folder picked via {} dialog: {}", label, path);
            return Some(path);
        }
    }
    None
}

/// Mechanism 1: rfd's native picker on a worker thread, abandoned after the
/// bounded wait expires. An abandoned dialog thread is left to die with the
/// process; the installer never blocks on it again.
fn native_dialog(limit: Duration) -> Option<Utf8PathBuf> {
    let (sender, receiver) = mpsc::channel();
    std::thread::spawn(move || {
        let picked = rfd::FileDialog::new().set_title(DIALOG_TITLE).pick_folder();
        let _ = sender.send(picked);
    });

    let picked = receiver.recv_timeout(limit).ok()??;
    let path = Utf8PathBuf::try_from(picked).ok()?;
    path.is_dir().then_some(path)
}

/// Mechanisms 2-4: a PowerShell dialog snippet whose stdout is the chosen
/// path. On hosts without PowerShell the command simply errors and the
/// chain moves on.
async fn powershell_dialog(script: &str) -> Option<Utf8PathBuf> {
    let out = process::run_powershell(script, PROBE_TIMEOUT).await.ok()?;
    if !out.success() {
        return None;
    }
    let trimmed = out.stdout.trim();
    if trimmed.is_empty() {
        return None;
    }
    let path = Utf8PathBuf::from(trimmed);
    path.is_dir().then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_powershell_snippets_mention_their_dialogs() {
        assert!(PS_SHELL_APPLICATION.contains("Shell.Application"));
        assert!(PS_OPEN_FILE_DIALOG.contains("OpenFileDialog"));
        assert!(PS_FOLDER_BROWSER.contains("FolderBrowserDialog"));
    }

    #[tokio::test]
    async fn test_powershell_dialog_rejects_missing_paths() {
        // Without PowerShell (or with it printing nothing useful) the
        // mechanism must yield None rather than an invented path.
        let result = powershell_dialog("Write-Output '/definitely/not/a/real/dir'").await;
        assert!(result.is_none());
    }
}
