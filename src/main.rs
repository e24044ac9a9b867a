//! AutoDrive - one-shot setup for a scheduled drive backup
//!
//! Main entry point for the interactive installer.
//!
//! # Overview
//!
//! This binary crate drives the terminal setup wizard. It initializes:
//! - The permanent install directory (hidden `.systembackup` under local
//!   app data)
//! - Logging infrastructure (daily rotating files, no console output so
//!   the wizard owns stdout)
//! - Tokio async runtime (subprocess execution, timeouts)
//! - The [`Orchestrator`], which runs the seven setup steps in order
//!
//! # Execution Flow
//!
//! 1. Resolve paths and create the install directory
//! 2. Initialize logging → .systembackup/logs/autodrive.<date>.log
//! 3. Create tokio runtime with 4 worker threads
//! 4. Run the orchestrator (blocks on user interaction)
//! 5. Shutdown the runtime with a 5s timeout and exit with the
//!    orchestrator's code (1 on a fatal early step, 0 otherwise)
//!
//! # Platform
//!
//! Primary platform: Windows 10/11 (x86_64)
//! Secondary: Linux/macOS via the shell-script renderings

use anyhow::Result;
use autodrive::{APP_NAME, InstallPaths, Orchestrator, VERSION};

fn main() -> Result<()> {
    let paths = InstallPaths::discover()?;
    paths.ensure_install_dir()?;

    // File-only logging; stdout belongs to the wizard.
    let _guard = autodrive::logging::setup_logging(&paths.tracing_dir(), APP_NAME, false)?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);
    tracing::info!("Install directory: {}", paths.install_dir);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(4)
        .thread_name("autodrive-worker")
        .build()?;

    let exit_code = runtime.block_on(async {
        let mut orchestrator = Orchestrator::new(&paths);
        orchestrator.run().await
    });

    runtime.shutdown_timeout(std::time::Duration::from_secs(5));

    match exit_code {
        Ok(0) => {
            tracing::info!("Setup finished successfully");
            Ok(())
        }
        Ok(code) => {
            tracing::error!("Setup halted with exit code {}", code);
            std::process::exit(code);
        }
        Err(e) => {
            tracing::error!("Setup failed: {:#}", e);
            Err(e)
        }
    }
}
