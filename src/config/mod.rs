use crate::models::InstallPaths;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde_json::Value;
use std::fs;

/// Settings key holding the persisted parent folder name.
pub const PARENT_FOLDER_KEY: &str = "parent_folder";

/// Key-value settings persisted as a single JSON object (`settings.json`).
///
/// The file lives in the permanent install directory once that exists,
/// otherwise next to the installer. Every update is a full
/// read-modify-write so unrelated keys written by other runs survive;
/// corrupt or missing content is treated as an empty object.
///
/// Only `parent_folder` is read back today. The subfolder name is
/// deliberately never stored: it is prompted fresh on every run.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: Utf8PathBuf,
}

impl SettingsStore {
    pub fn new(paths: &InstallPaths) -> Self {
        Self {
            path: paths.settings_file(),
        }
    }

    /// Open a store at an explicit location (tests).
    pub fn at(path: Utf8PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Load the whole settings object. Missing or unparseable files yield an
    /// empty map; a broken settings file must never stop the installer.
    pub fn load(&self) -> IndexMap<String, Value> {
        if !self.path.exists() {
            return IndexMap::new();
        }
        match fs::read_to_string(&self.path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!("Settings file {} is corrupt ({}), starting fresh", self.path, e);
                    IndexMap::new()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read settings file {}: {}", self.path, e);
                IndexMap::new()
            }
        }
    }

    /// Read-modify-write a single key.
    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut settings = self.load();
        settings.insert(key.to_string(), value);
        let json = serde_json::to_string_pretty(&settings)
            .context("Failed to serialize settings to JSON")?;
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write settings file: {}", self.path))?;
        tracing::info!("Saved settings to {}", self.path);
        Ok(())
    }

    /// The persisted parent folder name, if one was saved by a previous run.
    pub fn parent_folder(&self) -> Option<String> {
        self.load()
            .get(PARENT_FOLDER_KEY)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn set_parent_folder(&self, name: &str) -> Result<()> {
        self.set(PARENT_FOLDER_KEY, Value::String(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(temp: &TempDir) -> SettingsStore {
        let path = Utf8PathBuf::try_from(temp.path().join("settings.json")).unwrap();
        SettingsStore::at(path)
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);
        assert!(store.load().is_empty());
        assert_eq!(store.parent_folder(), None);
    }

    #[test]
    fn test_parent_folder_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);

        store.set_parent_folder("Projects").unwrap();
        assert_eq!(store.parent_folder(), Some("Projects".to_string()));

        // Reloading from disk returns the identical value.
        let reopened = SettingsStore::at(store.path().to_path_buf());
        assert_eq!(reopened.parent_folder(), Some("Projects".to_string()));
    }

    #[test]
    fn test_set_preserves_other_keys() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);

        store.set("other", Value::from(42)).unwrap();
        store.set_parent_folder("Projects").unwrap();

        let settings = store.load();
        assert_eq!(settings.get("other"), Some(&Value::from(42)));
        assert_eq!(settings.get(PARENT_FOLDER_KEY), Some(&Value::from("Projects")));
    }

    #[test]
    fn test_corrupt_file_treated_as_empty() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);

        std::fs::write(store.path(), "{not json").unwrap();
        assert!(store.load().is_empty());

        // And writes recover the file.
        store.set_parent_folder("Projects").unwrap();
        assert_eq!(store.parent_folder(), Some("Projects".to_string()));
    }
}
