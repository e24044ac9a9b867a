//! Services module - the mechanics behind each installation step.
//!
//! These services are UI-free: they talk to the filesystem, the network and
//! external processes, and report structured results that the orchestrator
//! turns into terminal output and event-log entries.
//!
//! # Components
//!
//! - [`process`]: timeout-wrapped subprocess execution (every external
//!   command goes through here so a hung command can never hang the
//!   installer) plus the elevation probe.
//! - [`ProvisionService`]: obtains the rclone binary - archive download via
//!   ordered transport strategies with a cooperative progress tick, zip
//!   extraction, executable relocation.
//! - [`AuthService`]: the four-stage credential chain for the `gdrive:`
//!   remote and the three-check config validation procedure.
//! - [`RemoteService`]: connection probe and tolerant remote `mkdir`.
//! - [`picker`]: the folder-dialog fallback chain for choosing the local
//!   backup source.
//! - [`InstallService`]: generates the sync/loop/log-helper scripts,
//!   replaces the startup entry, launches the loop detached, and registers
//!   best-effort security exclusions under elevation.
//!
//! # Design Philosophy
//!
//! - **Stateless**: services hold resolved paths, nothing else; all other
//!   inputs are explicit parameters
//! - **Bounded**: non-interactive external commands always carry a timeout
//! - **Tolerant**: expected failures (missing dialog backend, existing
//!   remote directory, duplicate exclusion) degrade, they never abort

pub mod auth;
pub mod install;
pub mod picker;
pub mod process;
pub mod provision;
pub mod remote;

pub use auth::{AuthError, AuthService, REMOTE_NAME};
pub use install::{
    ExclusionOutcome, ExclusionStatus, InstallError, InstallReport, InstallService,
    SYNC_INTERVAL_MS,
};
pub use provision::{ProvisionError, ProvisionOutcome, ProvisionService, Transport};
pub use remote::{RemoteService, remote_path};
