use std::{fs, path::Path, path::PathBuf};

use scheduler::{BatchingMode, NonFiniteLossPolicy, SamplingPolicy};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

/// The user-facing configuration of a multi-task run, read from JSON.
///
/// Every field except `task_names`, `data_dirs` and `output_dir` has a
/// default; unknown fields and unknown enum values are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Tasks trained jointly, e.g. `["mnli", "rte"]`.
    pub task_names: Vec<String>,
    /// Data directory of every task, in the order of `task_names`.
    pub data_dirs: Vec<PathBuf>,
    pub output_dir: PathBuf,
    /// Directory of a pretrained model, or just a name used in cache keys.
    pub model_name: String,
    pub max_seq_length: usize,

    pub train_batch_size: usize,
    pub eval_batch_size: usize,
    pub gradient_accumulation_window: usize,
    pub learning_rate: f32,
    pub weight_decay: f32,
    pub adam_epsilon: f32,
    pub max_grad_norm: f32,
    pub num_train_epochs: usize,
    pub max_steps: usize,
    pub warmup_steps: usize,
    pub seed: u64,

    pub sampling_policy: SamplingPolicy,
    pub batching_mode: BatchingMode,
    /// Single-task baseline of every task; empty when there are none.
    pub single_task_scores: Vec<f64>,
    pub dynamic_temperature: f64,
    pub non_finite_loss: NonFiniteLossPolicy,

    pub resume_from: Option<PathBuf>,
    pub restart_from_scratch: bool,
    pub reduced_run: bool,
    pub overwrite_output_dir: bool,
    pub overwrite_cache: bool,
    pub do_train: bool,
    pub do_eval: bool,
    pub eval_all_checkpoints: bool,

    pub embedding_dim: usize,
    pub vocab_size: usize,
    pub do_lower_case: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            task_names: Vec::new(),
            data_dirs: Vec::new(),
            output_dir: PathBuf::new(),
            model_name: "bag-of-embeddings".into(),
            max_seq_length: 128,
            train_batch_size: 8,
            eval_batch_size: 8,
            gradient_accumulation_window: 1,
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
            single_task_scores: Vec::new(),
            dynamic_temperature: 0.1,
            non_finite_loss: NonFiniteLossPolicy::default(),
            resume_from: None,
            restart_from_scratch: false,
            reduced_run: false,
            overwrite_output_dir: false,
            overwrite_cache: false,
            do_train: true,
            do_eval: true,
            eval_all_checkpoints: false,
            embedding_dim: 64,
            vocab_size: 8192,
            do_lower_case: true,
        }
    }
}

impl RunConfig {
    /// Parses a configuration from JSON text.
    ///
    /// # Errors
    /// Returns `OrchestratorError::InvalidConfig` on malformed JSON, unknown
    /// fields or unknown enum values such as a batching mode.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| OrchestratorError::InvalidConfig(e.to_string()))
    }

    /// Reads a configuration file.
    ///
    /// # Errors
    /// Returns `OrchestratorError::Io` if the file can't be read, or
    /// `OrchestratorError::InvalidConfig` if it doesn't parse.
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}
