//! Integration tests for the JSON event log
//!
//! These tests verify:
//! - The SCREAMING_SNAKE_CASE wire format shared with the log helper script
//! - Structured details on failure records
//! - Recovery from corrupt log content

use autodrive::{EventKind, EventLog};
use camino::Utf8PathBuf;
use serde_json::{Value, json};
use std::fs;
use tempfile::TempDir;

fn create_test_log() -> (TempDir, EventLog) {
    let temp_dir = TempDir::new().unwrap();
    let path = Utf8PathBuf::try_from(temp_dir.path().to_path_buf())
        .unwrap()
        .join("log.json");
    (temp_dir, EventLog::new(path))
}

#[test]
fn test_wire_format_is_screaming_snake_case() {
    let (_temp_dir, log) = create_test_log();

    log.record(EventKind::SessionStart, "started");
    log.record(EventKind::AuthFailed, "no config");

    let raw = fs::read_to_string(log.path()).unwrap();
    let parsed: Value = serde_json::from_str(&raw).unwrap();
    let array = parsed.as_array().unwrap();
    assert_eq!(array[0]["event"], json!("SESSION_START"));
    assert_eq!(array[1]["event"], json!("AUTH_FAILED"));
    // The shell log helper appends entries with these exact keys
    assert!(array[0]["timestamp"].is_string());
    assert!(array[0].get("details").is_none());
}

#[test]
fn test_details_are_recorded() {
    let (_temp_dir, log) = create_test_log();

    log.record_with_details(
        EventKind::ConnectionFailed,
        "lsd probe failed",
        Some(json!({ "stderr": "couldn't connect" })),
    );

    let entries = log.entries();
    assert_eq!(entries.len(), 1);
    let details = entries[0].details.as_ref().unwrap();
    assert_eq!(details["stderr"], json!("couldn't connect"));
}

#[test]
fn test_corrupt_log_is_treated_as_empty() {
    let (_temp_dir, log) = create_test_log();

    fs::write(log.path(), "[{\"truncated\": ").unwrap();
    assert!(log.entries().is_empty());

    // Recording over corrupt content starts a fresh array
    log.record(EventKind::SessionStart, "started");
    assert_eq!(log.entries().len(), 1);
}

#[test]
fn test_non_array_content_is_treated_as_empty() {
    let (_temp_dir, log) = create_test_log();

    fs::write(log.path(), "{\"event\": \"SESSION_START\"}").unwrap();
    assert!(log.entries().is_empty());
}
