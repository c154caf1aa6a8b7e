use std::{fmt, io, path::PathBuf};

use ml_core::MlError;
use scheduler::SchedulerErr;

/// The orchestrator module's result type.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// All errors that can occur while setting up and running a session.
#[derive(Debug)]
pub enum OrchestratorError {
    /// Invalid configuration, caught before any training resource is allocated.
    InvalidConfig(String),
    /// A task name outside the supported catalogue.
    UnknownTask(String),
    /// The output directory already holds files and overwriting wasn't allowed.
    OutputDirNotEmpty(PathBuf),
    /// The training scheduler failed.
    Scheduler(SchedulerErr),
    /// A model or tokenizer backend failed outside the training loop.
    Backend(MlError),
    /// An underlying I/O error not covered by the above variants.
    Io(io::Error),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::UnknownTask(name) => write!(f, "unknown task: {name}"),
            Self::OutputDirNotEmpty(dir) => write!(
                f,
                "output directory ({}) is not empty, use overwrite_output_dir to reuse it",
                dir.display()
            ),
            Self::Scheduler(e) => write!(f, "scheduler error: {e}"),
            Self::Backend(e) => write!(f, "backend error: {e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Scheduler(e) => Some(e),
            Self::Backend(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SchedulerErr> for OrchestratorError {
    fn from(e: SchedulerErr) -> Self {
        Self::Scheduler(e)
    }
}

impl From<MlError> for OrchestratorError {
    fn from(e: MlError) -> Self {
        Self::Backend(e)
    }
}

impl From<io::Error> for OrchestratorError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
