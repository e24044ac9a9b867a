//! Append-only JSON event log (`log.json`).
//!
//! Every run appends structured records to a single JSON array that the
//! generated log helper script also writes to between runs. Appending is a
//! full read-modify-rewrite; corrupt or non-array content is silently
//! treated as empty. Writing the log is best effort - a failure is traced
//! and swallowed, never surfaced to the user.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fs;

/// Event vocabulary of the log. Serialized in SCREAMING_SNAKE_CASE, e.g.
/// `SESSION_START` and `AUTH_FAILED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Step,
    Success,
    Error,
    Info,
    Warning,
    SettingsSaved,
    Auth,
    AuthValid,
    AuthSuccess,
    AuthFailed,
    ConnectionSuccess,
    ConnectionFailed,
    FolderCreated,
    FolderExists,
    LocalFolder,
    SyncScriptCreated,
    LoopScriptCreated,
    StartupShortcut,
    StartupShortcutFailed,
    LoopStarted,
    SyncSuccess,
    SyncFailed,
    Fatal,
    SessionStart,
    SessionEnd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// ISO-8601 local timestamp.
    pub timestamp: String,
    pub event: EventKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct EventLog {
    path: Utf8PathBuf,
}

impl EventLog {
    pub fn new(path: Utf8PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn record(&self, event: EventKind, message: &str) {
        self.record_with_details(event, message, None);
    }

    pub fn record_with_details(
        &self,
        event: EventKind,
        message: &str,
        details: Option<serde_json::Value>,
    ) {
        let mut entries = self.entries();
        entries.push(EventRecord {
            timestamp: chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            event,
            message: message.to_string(),
            details,
        });
        match serde_json::to_string_pretty(&entries) {
            Ok(json) => {
                if let Err(e) = fs::write(&self.path, json) {
                    tracing::warn!("Failed to write event log {}: {}", self.path, e);
                }
            }
            Err(e) => tracing::warn!("Failed to serialize event log: {}", e),
        }
    }

    /// All recorded entries. Missing, corrupt or non-array content reads as
    /// an empty log.
    pub fn entries(&self) -> Vec<EventRecord> {
        let Ok(contents) = fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        serde_json::from_str(&contents).unwrap_or_default()
    }
}
