//! Data models for the installer.
//!
//! - [`InstallPaths`]: every filesystem location, resolved once at startup and
//!   passed by reference into the services (no hidden module-level globals)
//! - [`SetupState`]: the append-only per-run state carried between steps
//! - [`Step`] / [`StepOutcome`]: the installation state machine vocabulary
//! - [`ScriptSet`]: paths of the generated sync/loop/log artifacts

pub mod paths;
pub mod state;

pub use paths::{InstallPaths, binary_name};
pub use state::{ScriptSet, SetupState, Step, StepOutcome};
