use std::{collections::HashSet, num::NonZeroUsize, str::FromStr};

use log::warn;
use ml_core::{TaskDescriptor, TaskId, TaskKind};
use scheduler::{BatchingMode, CacheConfig, EvalConfig, SamplingPolicy, TrainerConfig};

use super::RunConfig;
use crate::error::{OrchestratorError, Result};

/// Train batch size of a reduced run.
const REDUCED_BATCH_SIZE: usize = 2;

/// Settings of the reference model and tokenizer.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendSpec {
    pub model_name: String,
    pub vocab_size: usize,
    pub embedding_dim: usize,
    pub do_lower_case: bool,
    /// One prediction head per distinct label count.
    pub head_sizes: Vec<usize>,
}

/// A validated run, split into the immutable config of every component.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSpec {
    pub tasks: Vec<TaskDescriptor>,
    pub trainer: TrainerConfig,
    pub eval: EvalConfig,
    pub cache: CacheConfig,
    pub backend: BackendSpec,
    pub do_train: bool,
    pub do_eval: bool,
    pub eval_all_checkpoints: bool,
    pub overwrite_output_dir: bool,
}

/// Validates a [`RunConfig`] and turns it into a [`RunSpec`].
#[derive(Debug, Default)]
pub struct Adapter;

impl Adapter {
    pub fn new() -> Self {
        Self
    }

    /// # Errors
    /// Returns `OrchestratorError::UnknownTask` for a task outside the
    /// catalogue, or `OrchestratorError::InvalidConfig` for any other
    /// inconsistent setting.
    pub fn adapt(&self, config: &RunConfig) -> Result<RunSpec> {
        let tasks = self.adapt_tasks(config)?;
        self.validate(config, &tasks)?;

        let train_batch_size = if config.reduced_run {
            REDUCED_BATCH_SIZE
        } else {
            config.train_batch_size
        };

        let trainer = TrainerConfig {
            output_dir: config.output_dir.clone(),
            train_batch_size: positive("train_batch_size", train_batch_size)?,
            accumulation_window: positive(
                "gradient_accumulation_window",
                config.gradient_accumulation_window,
            )?,
            learning_rate: config.learning_rate,
            weight_decay: config.weight_decay,
            adam_epsilon: config.adam_epsilon,
            max_grad_norm: config.max_grad_norm,
            num_train_epochs: config.num_train_epochs,
            max_steps: config.max_steps,
            warmup_steps: config.warmup_steps,
            seed: config.seed,
            sampling_policy: config.sampling_policy,
            batching_mode: config.batching_mode,
            dynamic_temperature: config.dynamic_temperature,
            non_finite_loss: config.non_finite_loss,
            resume_from: config.resume_from.clone(),
            restart_from_scratch: config.restart_from_scratch,
        };

        let eval = EvalConfig {
            eval_batch_size: positive("eval_batch_size", config.eval_batch_size)?,
            report_dir: Some(config.output_dir.clone()),
        };

        let cache = CacheConfig {
            model_name: config.model_name.clone(),
            max_seq_length: config.max_seq_length,
            overwrite_cache: config.overwrite_cache,
            reduced_run: config.reduced_run,
        };

        let mut head_sizes: Vec<usize> = tasks.iter().map(|task| task.label_count).collect();
        head_sizes.sort_unstable();
        head_sizes.dedup();

        let backend = BackendSpec {
            model_name: config.model_name.clone(),
            vocab_size: config.vocab_size,
            embedding_dim: config.embedding_dim,
            do_lower_case: config.do_lower_case,
            head_sizes,
        };

        Ok(RunSpec {
            tasks,
            trainer,
            eval,
            cache,
            backend,
            do_train: config.do_train,
            do_eval: config.do_eval,
            eval_all_checkpoints: config.eval_all_checkpoints,
            overwrite_output_dir: config.overwrite_output_dir,
        })
    }

    // -------------------------------------------------------------------------
    // Tasks
    // -------------------------------------------------------------------------

    fn adapt_tasks(&self, config: &RunConfig) -> Result<Vec<TaskDescriptor>> {
        if config.task_names.is_empty() {
            return Err(OrchestratorError::InvalidConfig("at least one task is required".into()));
        }

        if config.data_dirs.len() != config.task_names.len() {
            return Err(OrchestratorError::InvalidConfig(format!(
                "{} data directories given for {} tasks",
                config.data_dirs.len(),
                config.task_names.len()
            )));
        }

        let scores = &config.single_task_scores;
        if !scores.is_empty() && scores.len() != config.task_names.len() {
            return Err(OrchestratorError::InvalidConfig(format!(
                "{} single-task scores given for {} tasks",
                scores.len(),
                config.task_names.len()
            )));
        }

        let mut seen = HashSet::new();
        config
            .task_names
            .iter()
            .zip(&config.data_dirs)
            .enumerate()
            .map(|(i, (name, dir))| {
                let kind =
                    TaskKind::from_str(name).map_err(|e| OrchestratorError::UnknownTask(e.0))?;
                if !seen.insert(kind) {
                    return Err(OrchestratorError::InvalidConfig(format!(
                        "task {kind} is listed twice"
                    )));
                }

                Ok(TaskDescriptor::new(TaskId(i), kind, dir.clone(), scores.get(i).copied()))
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // Validation
    // -------------------------------------------------------------------------

    fn validate(&self, config: &RunConfig, tasks: &[TaskDescriptor]) -> Result<()> {
        if config.output_dir.as_os_str().is_empty() {
            return Err(OrchestratorError::InvalidConfig("output_dir is required".into()));
        }

        if config.max_seq_length < 2 {
            return Err(OrchestratorError::InvalidConfig(
                "max_seq_length must leave room for the special tokens".into(),
            ));
        }

        if config.vocab_size == 0 || config.embedding_dim == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "vocab_size and embedding_dim must be greater than 0".into(),
            ));
        }

        if !(config.learning_rate > 0.0) {
            return Err(OrchestratorError::InvalidConfig("learning_rate must be positive".into()));
        }

        if !(config.dynamic_temperature > 0.0 && config.dynamic_temperature.is_finite()) {
            return Err(OrchestratorError::InvalidConfig(
                "dynamic_temperature must be a positive number".into(),
            ));
        }

        if config.do_train && config.max_steps == 0 && config.num_train_epochs == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "either num_train_epochs or max_steps must be positive".into(),
            ));
        }

        // A dense batch goes through a single head.
        if config.batching_mode == BatchingMode::Dense {
            let first = tasks[0].label_count;
            if let Some(task) = tasks.iter().find(|task| task.label_count != first) {
                return Err(OrchestratorError::InvalidConfig(format!(
                    "dense batching needs one label count, but {} has {} labels and {} has {first}",
                    task.kind, task.label_count, tasks[0].kind
                )));
            }
        }

        if config.sampling_policy == SamplingPolicy::Dynamic
            && config.single_task_scores.is_empty()
        {
            warn!("dynamic sampling without single_task_scores behaves like size sampling");
        }

        Ok(())
    }
}

fn positive(field: &str, value: usize) -> Result<NonZeroUsize> {
    NonZeroUsize::new(value)
        .ok_or_else(|| OrchestratorError::InvalidConfig(format!("{field} must be greater than 0")))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn config(tasks: &[&str]) -> RunConfig {
        RunConfig {
            task_names: tasks.iter().map(|t| t.to_string()).collect(),
            data_dirs: tasks.iter().map(|t| PathBuf::from("glue").join(t)).collect(),
            output_dir: "out".into(),
            ..RunConfig::default()
        }
    }

    #[test]
    fn tasks_resolve_in_order_with_their_baselines() {
        let mut cfg = config(&["mnli", "sts-b", "rte"]);
        cfg.single_task_scores = vec![0.84, 0.88, 0.66];

        let spec = Adapter::new().adapt(&cfg).unwrap();

        let kinds: Vec<TaskKind> = spec.tasks.iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![TaskKind::Mnli, TaskKind::StsB, TaskKind::Rte]);
        assert_eq!(spec.tasks[2].id, TaskId(2));
        assert_eq!(spec.tasks[1].baseline_score, Some(0.88));
        assert_eq!(spec.backend.head_sizes, vec![1, 2, 3]);
        assert_eq!(spec.eval.report_dir, Some(PathBuf::from("out")));
    }

    #[test]
    fn unknown_tasks_are_rejected() {
        let err = Adapter::new().adapt(&config(&["rte", "squad"])).unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownTask(name) if name == "squad"));
    }

    #[test]
    fn dense_batching_needs_one_label_count() {
        let mut cfg = config(&["mnli", "rte"]);
        cfg.batching_mode = BatchingMode::Dense;
        assert!(matches!(Adapter::new().adapt(&cfg), Err(OrchestratorError::InvalidConfig(_))));

        let mut cfg = config(&["qnli", "rte"]);
        cfg.batching_mode = BatchingMode::Dense;
        assert!(Adapter::new().adapt(&cfg).is_ok());
    }

    #[test]
    fn zero_sizes_and_mismatched_lists_are_rejected() {
        let mut cfg = config(&["rte"]);
        cfg.gradient_accumulation_window = 0;
        assert!(matches!(Adapter::new().adapt(&cfg), Err(OrchestratorError::InvalidConfig(_))));

        let mut cfg = config(&["rte", "qnli"]);
        cfg.single_task_scores = vec![0.7];
        assert!(matches!(Adapter::new().adapt(&cfg), Err(OrchestratorError::InvalidConfig(_))));

        let mut cfg = config(&["rte"]);
        cfg.dynamic_temperature = 0.0;
        assert!(matches!(Adapter::new().adapt(&cfg), Err(OrchestratorError::InvalidConfig(_))));
    }

    #[test]
    fn reduced_runs_shrink_the_train_batch() {
        let mut cfg = config(&["rte"]);
        cfg.train_batch_size = 32;
        cfg.reduced_run = true;

        let spec = Adapter::new().adapt(&cfg).unwrap();
        assert_eq!(spec.trainer.train_batch_size.get(), 2);
        assert!(spec.cache.reduced_run);
    }
}
