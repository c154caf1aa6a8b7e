use std::{num::NonZeroUsize, path::PathBuf};

use serde::{Deserialize, Serialize};

/// How the sampler interleaves tasks inside an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingPolicy {
    /// Every task is equally likely to be drawn while it has instances left.
    Uniform,
    /// Tasks are drawn proportionally to their remaining instances.
    #[default]
    Size,
    /// Tasks lagging behind their baseline score are drawn more often.
    Dynamic,
}

/// How a raw batch reaches the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchingMode {
    /// One merged forward pass; every task must share one label cardinality.
    Dense,
    /// One forward pass per task group.
    #[default]
    Split,
}

/// What a step does when its loss is NaN or infinite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonFiniteLossPolicy {
    #[default]
    Fail,
    /// Drops the accumulated gradients of the window and keeps going.
    Skip,
}

/// Immutable settings of the training loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    pub output_dir: PathBuf,
    pub train_batch_size: NonZeroUsize,
    /// Raw batches folded into a single optimizer update.
    pub accumulation_window: NonZeroUsize,
    pub learning_rate: f32,
    pub weight_decay: f32,
    pub adam_epsilon: f32,
    pub max_grad_norm: f32,
    pub num_train_epochs: usize,
    /// Hard cap on optimizer updates; `0` disables it.
    pub max_steps: usize,
    pub warmup_steps: usize,
    pub seed: u64,
    pub sampling_policy: SamplingPolicy,
    pub batching_mode: BatchingMode,
    pub dynamic_temperature: f64,
    pub non_finite_loss: NonFiniteLossPolicy,
    /// Checkpoint to resume from. `None` looks for the newest one in `output_dir`.
    pub resume_from: Option<PathBuf>,
    /// Reuse only the weights of `resume_from`, starting again at step 0.
    pub restart_from_scratch: bool,
}

impl TrainerConfig {
    /// Returns a configuration with the usual fine-tuning defaults.
    ///
    /// # Args
    /// * `output_dir` - Where checkpoints and reports are written.
    pub fn new(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            train_batch_size: NonZeroUsize::new(8).unwrap_or(NonZeroUsize::MIN),
            accumulation_window: NonZeroUsize::MIN,
            learning_rate: 5e-5,
            weight_decay: 0.0,
            adam_epsilon: 1e-8,
            max_grad_norm: 1.0,
            num_train_epochs: 3,
            max_steps: 0,
            warmup_steps: 0,
            seed: 42,
            sampling_policy: SamplingPolicy::default(),
            batching_mode: BatchingMode::default(),
            dynamic_temperature: 0.1,
            non_finite_loss: NonFiniteLossPolicy::default(),
            resume_from: None,
            restart_from_scratch: false,
        }
    }
}

/// Settings of held-out evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalConfig {
    pub eval_batch_size: NonZeroUsize,
    /// Root of the per-task `eval_results.txt` reports; `None` disables them.
    pub report_dir: Option<PathBuf>,
}

/// Settings of the on-disk feature cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Model identity part of the cache key.
    pub model_name: String,
    pub max_seq_length: usize,
    /// Ignore existing cache files and rebuild them.
    pub overwrite_cache: bool,
    /// Keep only the first examples of every split.
    pub reduced_run: bool,
}
