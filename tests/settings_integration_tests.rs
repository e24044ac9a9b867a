//! Integration tests for SettingsStore and settings file handling
//!
//! These tests verify:
//! - Loading when no settings file exists yet
//! - Round-tripping the parent folder name across store instances
//! - Preservation of unrelated keys on update
//! - Recovery from a corrupt settings file

use autodrive::SettingsStore;
use camino::Utf8PathBuf;
use serde_json::{Value, json};
use std::fs;
use tempfile::TempDir;

fn create_test_store() -> (TempDir, SettingsStore) {
    let temp_dir = TempDir::new().unwrap();
    let path = Utf8PathBuf::try_from(temp_dir.path().to_path_buf())
        .unwrap()
        .join("settings.json");
    (temp_dir, SettingsStore::at(path))
}

#[test]
fn test_missing_file_yields_no_parent_folder() {
    let (_temp_dir, store) = create_test_store();

    assert!(store.load().is_empty());
    assert!(store.parent_folder().is_none());
}

#[test]
fn test_parent_folder_survives_reopen() {
    let (_temp_dir, store) = create_test_store();

    store.set_parent_folder("ZEN BACKUP").unwrap();

    // A fresh store pointed at the same file sees the saved value, the way
    // a re-run of the installer does
    let reopened = SettingsStore::at(store.path().to_path_buf());
    assert_eq!(reopened.parent_folder().as_deref(), Some("ZEN BACKUP"));
}

#[test]
fn test_update_preserves_unrelated_keys() {
    let (_temp_dir, store) = create_test_store();

    store.set("theme", json!("dark")).unwrap();
    store.set_parent_folder("Projects").unwrap();
    store.set_parent_folder("Archive").unwrap();

    let settings = store.load();
    assert_eq!(settings.get("theme"), Some(&Value::String("dark".into())));
    assert_eq!(store.parent_folder().as_deref(), Some("Archive"));
}

#[test]
fn test_settings_file_is_valid_pretty_json() {
    let (_temp_dir, store) = create_test_store();

    store.set_parent_folder("ZEN BACKUP").unwrap();

    let raw = fs::read_to_string(store.path()).unwrap();
    let parsed: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed["parent_folder"], json!("ZEN BACKUP"));
    // Pretty output, not a single line
    assert!(raw.contains('\n'));
}

#[test]
fn test_corrupt_file_recovers_to_empty() {
    let (_temp_dir, store) = create_test_store();

    fs::write(store.path(), "{not json at all").unwrap();
    assert!(store.load().is_empty());
    assert!(store.parent_folder().is_none());

    // Writing over the corrupt file works and yields a clean store
    store.set_parent_folder("Fresh").unwrap();
    assert_eq!(store.parent_folder().as_deref(), Some("Fresh"));
}
