mod data;
mod dist;
mod error;
mod metrics;
mod model;
mod stats;
mod task;
mod tokenizer;

pub use data::{DataError, Dataset, Example, ExampleReader, Instance, Label, Split};
pub use dist::{LocalGroup, ProcessGroup};
pub use error::MlError;
pub use metrics::{Metrics, MetricsEngine, Predictions};
pub use model::{CheckpointModel, ModelBackend, ModelOutput, ParamTensor};
pub use stats::StepStats;
pub use task::{EvalVariant, OutputMode, TaskDescriptor, TaskId, TaskKind, UnknownTask};
pub use tokenizer::{Encoding, Tokenizer};
