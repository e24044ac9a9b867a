// AutoDrive - one-shot setup for a scheduled drive backup
//
// This is the library crate containing the setup services and data model.
// The binary crate (main.rs) provides the interactive entry point.

pub mod config;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod ui;

// Re-export commonly used types for convenience
pub use config::SettingsStore;
pub use events::{EventKind, EventLog};
pub use models::{InstallPaths, SetupState, Step, StepOutcome};
pub use orchestrator::Orchestrator;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
