use camino::Utf8PathBuf;

/// The fixed steps of the installation state machine, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    PrepareBinary,
    Authenticate,
    TestConnection,
    ConfigureParent,
    ConfigureSubfolder,
    SelectLocalFolder,
    Install,
}

impl Step {
    /// 1-based position shown to the user.
    pub fn number(self) -> usize {
        match self {
            Step::PrepareBinary => 1,
            Step::Authenticate => 2,
            Step::TestConnection => 3,
            Step::ConfigureParent => 4,
            Step::ConfigureSubfolder => 5,
            Step::SelectLocalFolder => 6,
            Step::Install => 7,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Step::PrepareBinary => "Preparing rclone",
            Step::Authenticate => "Drive authentication",
            Step::TestConnection => "Testing connection",
            Step::ConfigureParent => "Configuring parent folder on the drive",
            Step::ConfigureSubfolder => "Configuring destination subfolder",
            Step::SelectLocalFolder => "Selecting local folder to back up",
            Step::Install => "Installing to permanent system location",
        }
    }

    /// Failure at any of these steps halts the whole run.
    pub fn is_fatal_gate(self) -> bool {
        matches!(
            self,
            Step::PrepareBinary | Step::Authenticate | Step::TestConnection
        )
    }
}

/// Outcome of a single step. Every step produces exactly one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Success,
    /// Logged as a warning; execution continues with the step's value.
    RecoverableFailure(String),
    /// Halts the orchestrator (at the fatal gates) with remediation text.
    FatalFailure(String),
}

impl StepOutcome {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StepOutcome::FatalFailure(_))
    }
}

/// Paths of the generated artifacts inside the install directory.
#[derive(Debug, Clone)]
pub struct ScriptSet {
    pub sync_script: Utf8PathBuf,
    pub loop_script: Utf8PathBuf,
    pub log_helper: Utf8PathBuf,
}

/// In-memory state carried forward through the steps of a single run.
///
/// Append-only: once a field is set it is never contradicted later in the
/// same run. Values that must survive the process (the parent folder name)
/// go through the settings store instead.
#[derive(Debug, Clone, Default)]
pub struct SetupState {
    pub binary_path: Option<Utf8PathBuf>,
    pub config_path: Option<Utf8PathBuf>,
    /// Persisted across runs via the settings store.
    pub parent_folder: Option<String>,
    /// Prompted fresh every run, never persisted.
    pub subfolder: Option<String>,
    /// Full remote destination, e.g. `gdrive:Projects/2024-01`.
    pub remote_path: Option<String>,
    pub local_path: Option<Utf8PathBuf>,
    /// Leaf name of the local folder; used to name generated artifacts.
    pub local_name: Option<String>,
    pub scripts: Option<ScriptSet>,
    /// Whether the process runs with administrator rights.
    pub elevated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_order_and_gates() {
        assert_eq!(Step::PrepareBinary.number(), 1);
        assert_eq!(Step::Install.number(), 7);
        assert!(Step::PrepareBinary.is_fatal_gate());
        assert!(Step::Authenticate.is_fatal_gate());
        assert!(Step::TestConnection.is_fatal_gate());
        assert!(!Step::ConfigureParent.is_fatal_gate());
        assert!(!Step::Install.is_fatal_gate());
    }

    #[test]
    fn test_outcome_fatality() {
        assert!(!StepOutcome::Success.is_fatal());
        assert!(!StepOutcome::RecoverableFailure("exists".into()).is_fatal());
        assert!(StepOutcome::FatalFailure("no network".into()).is_fatal());
    }
}
