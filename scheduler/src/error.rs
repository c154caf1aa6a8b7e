use std::{error::Error, fmt, io};

use ml_core::{DataError, MlError, TaskKind};

/// The scheduler module's result type.
pub type Result<T> = std::result::Result<T, SchedulerErr>;

/// Failures of the multi-task training scheduler.
#[derive(Debug)]
pub enum SchedulerErr {
    /// Every per-task group of a raw batch was empty.
    EmptyCompositeBatch,
    /// A checkpoint name could not be parsed back into a step number.
    ResumeParse(String),
    /// Features could not be rebuilt from the task's source examples.
    CacheRegeneration { task: TaskKind, source: MlError },
    /// The loss of a step was NaN or infinite.
    NonFiniteLoss { step: usize, loss: f32 },
    /// There is nothing to train on.
    NoTrainingData,
    Backend(MlError),
    Data(DataError),
    Io(io::Error),
    Serde(serde_json::Error),
}

impl fmt::Display for SchedulerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerErr::EmptyCompositeBatch => {
                write!(f, "empty composite batch: every per-task group was empty")
            }
            SchedulerErr::ResumeParse(name) => {
                write!(f, "cannot parse a global step out of checkpoint '{name}'")
            }
            SchedulerErr::CacheRegeneration { task, source } => {
                write!(f, "failed to regenerate features for {task}: {source}")
            }
            SchedulerErr::NonFiniteLoss { step, loss } => {
                write!(f, "non-finite loss {loss} at global step {step}")
            }
            SchedulerErr::NoTrainingData => write!(f, "no training instances available"),
            SchedulerErr::Backend(e) => write!(f, "backend error: {e}"),
            SchedulerErr::Data(e) => write!(f, "data error: {e}"),
            SchedulerErr::Io(e) => write!(f, "io error: {e}"),
            SchedulerErr::Serde(e) => write!(f, "serialization error: {e}"),
        }
    }
}

impl Error for SchedulerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SchedulerErr::CacheRegeneration { source, .. } => Some(source),
            SchedulerErr::Backend(e) => Some(e),
            SchedulerErr::Data(e) => Some(e),
            SchedulerErr::Io(e) => Some(e),
            SchedulerErr::Serde(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MlError> for SchedulerErr {
    fn from(value: MlError) -> Self {
        Self::Backend(value)
    }
}

impl From<DataError> for SchedulerErr {
    fn from(value: DataError) -> Self {
        Self::Data(value)
    }
}

impl From<io::Error> for SchedulerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for SchedulerErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}
