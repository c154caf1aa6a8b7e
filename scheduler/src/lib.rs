//! Multi-task training scheduler.
//!
//! Decides which tasks feed every optimizer update, assembles per-task
//! sub-batches, accumulates gradients, checkpoints and resumes runs, and
//! closes the evaluation feedback loop of dynamic sampling.

pub mod batching;
pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod controller;
pub mod data;
mod error;
pub mod evaluation;
pub mod metrics;
pub mod optimization;
pub mod registry;
pub mod report;
pub mod sampling;
pub mod schedule;
pub mod state;

pub use batching::{Batch, BatchAssembler, SubBatch};
pub use cache::FeatureCache;
pub use checkpoint::CheckpointRecord;
pub use config::{
    BatchingMode, CacheConfig, EvalConfig, NonFiniteLossPolicy, SamplingPolicy, TrainerConfig,
};
pub use controller::{TrainOutcome, TrainingLoopController};
pub use error::{Result, SchedulerErr};
pub use evaluation::{EvalSet, EvaluationCoordinator, EvaluationResult};
pub use registry::{SampleRef, TaskDatasetRegistry};
pub use sampling::{MultiTaskSampler, SamplingWeightTable};
pub use state::{RunState, TrainingState};
