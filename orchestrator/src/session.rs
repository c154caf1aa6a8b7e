use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, atomic::AtomicBool},
};

use log::{info, warn};
use ml_backends::{
    BagConfig, BagOfEmbeddings, DistributedModel, GlueMetrics, GlueTsvReader, HashingTokenizer,
    arch::CONFIG_FILE, tokenization::TOKENIZER_FILE,
};
use ml_core::{CheckpointModel, MetricsEngine, MlError, ProcessGroup, Tokenizer};
use scheduler::{
    EvalConfig, EvaluationCoordinator, EvaluationResult, FeatureCache, RunState, SamplingPolicy,
    TaskDatasetRegistry, TrainOutcome, TrainingLoopController,
    checkpoint::{self, TRAINING_ARGS_FILE},
    evaluation::load_eval_sets,
    report,
};

use crate::{
    configs::RunSpec,
    error::{OrchestratorError, Result},
};

/// How a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// `results.json` was already present; nothing was done.
    AlreadyDone,
    /// Stopped by the stop flag after checkpointing; a new session resumes it.
    Interrupted { global_step: usize },
    Completed {
        /// Last optimizer step, `None` if training was disabled.
        global_step: Option<usize>,
        results: EvaluationResult,
    },
}

/// One multi-task run on this process.
///
/// Every process of a data-parallel group runs its own session with its
/// own handle of the group; only the main rank writes shared artifacts.
pub struct Session<G> {
    spec: RunSpec,
    group: G,
    stop: Arc<AtomicBool>,
}

impl<G: ProcessGroup + Clone> Session<G> {
    /// Creates a new `Session`.
    ///
    /// # Arguments
    /// * `spec` - The validated run.
    /// * `group` - This process's handle of the process group.
    ///
    /// # Returns
    /// A new `Session` instance.
    pub fn new(spec: RunSpec, group: G) -> Self {
        Self {
            spec,
            group,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops training at the next raw batch once raised.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn spec(&self) -> &RunSpec {
        &self.spec
    }

    /// Runs the whole session: guards, dataset materialization, training,
    /// final evaluation and `results.json`.
    ///
    /// # Returns
    /// How the session ended.
    ///
    /// # Errors
    /// Returns `OrchestratorError::OutputDirNotEmpty` if the output directory
    /// can't be reused, or any scheduler or backend failure. `results.json`
    /// is never written on failure.
    pub fn run(&self) -> Result<RunOutcome> {
        let output_dir = &self.spec.trainer.output_dir;

        if report::results_exist(output_dir) {
            info!("{} already holds results, nothing to do", output_dir.display());
            return Ok(RunOutcome::AlreadyDone);
        }

        if self.spec.do_train && !self.spec.overwrite_output_dir && is_populated(output_dir)? {
            return Err(OrchestratorError::OutputDirNotEmpty(output_dir.clone()));
        }

        let tokenizer = self.main_rank_first(|| self.load_tokenizer())?;

        let reader = GlueTsvReader;
        let metrics = GlueMetrics;
        let cache = FeatureCache::new(&self.spec.cache, &reader, &tokenizer);

        let mut global_step = None;
        if self.spec.do_train {
            let model = self.main_rank_first(|| self.load_model())?;
            let outcome = self.train(model, &tokenizer, &cache, &metrics)?;
            if outcome.state == RunState::Interrupted {
                return Ok(RunOutcome::Interrupted {
                    global_step: outcome.global_step,
                });
            }
            global_step = Some(outcome.global_step);
        }

        let mut results = EvaluationResult::new();
        if self.spec.do_eval && self.group.is_main() {
            results = self.evaluate(&cache, &metrics)?;
        }

        if self.group.is_main() {
            report::write_results(output_dir, &results)?;
        }

        Ok(RunOutcome::Completed {
            global_step,
            results,
        })
    }

    /// Runs `f` on the main rank first; the other ranks run it once the main
    /// rank is done, e.g. to reuse what it wrote to disk.
    fn main_rank_first<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        if !self.group.is_main() {
            self.group.barrier();
        }

        let result = f();

        if self.group.is_main() {
            self.group.barrier();
        }

        result
    }

    fn load_tokenizer(&self) -> Result<HashingTokenizer> {
        let dir = Path::new(&self.spec.backend.model_name);
        if dir.join(TOKENIZER_FILE).is_file() {
            info!("loading tokenizer from {}", dir.display());
            return Ok(HashingTokenizer::from_pretrained(dir)?);
        }

        let backend = &self.spec.backend;
        Ok(HashingTokenizer::new(backend.vocab_size, backend.do_lower_case)?)
    }

    fn load_model(&self) -> Result<BagOfEmbeddings> {
        let dir = Path::new(&self.spec.backend.model_name);
        if dir.join(CONFIG_FILE).is_file() {
            info!("loading model from {}", dir.display());
            return Ok(BagOfEmbeddings::from_pretrained(dir)?);
        }

        let backend = &self.spec.backend;
        let config = BagConfig::new(
            backend.vocab_size,
            backend.embedding_dim,
            backend.head_sizes.iter().copied(),
        );
        Ok(BagOfEmbeddings::new(config, self.spec.trainer.seed)?)
    }

    fn build_registry(&self, cache: &FeatureCache<'_>) -> Result<TaskDatasetRegistry> {
        let mut registry = TaskDatasetRegistry::new();

        for task in &self.spec.tasks {
            let instances = cache.load_train(task, &self.group)?;
            info!(task = task.kind.name(), instances = instances.len(); "task registered");
            registry.register(task.clone(), instances);
        }

        Ok(registry)
    }

    /// Trains and, on completion, saves the final model into the output directory.
    fn train(
        &self,
        model: BagOfEmbeddings,
        tokenizer: &HashingTokenizer,
        cache: &FeatureCache<'_>,
        metrics: &dyn MetricsEngine,
    ) -> Result<TrainOutcome> {
        let trainer = &self.spec.trainer;
        let registry = self.build_registry(cache)?;

        let dynamic = trainer.sampling_policy == SamplingPolicy::Dynamic;
        let feedback_sets = if dynamic {
            self.main_rank_first(|| Ok(load_eval_sets(&self.spec.tasks, cache)?))?
        } else {
            Vec::new()
        };

        // Feedback passes write no reports.
        let feedback_config = EvalConfig {
            eval_batch_size: self.spec.eval.eval_batch_size,
            report_dir: None,
        };
        let evaluator = EvaluationCoordinator::new(&feedback_config, metrics, feedback_sets);

        let model = DistributedModel::new(model, self.group.clone());
        let mut controller = TrainingLoopController::new(trainer, &registry, model, &self.group)
            .with_tokenizer(tokenizer)
            .with_stop_flag(self.stop.clone());
        if dynamic {
            controller = controller.with_evaluator(&evaluator);
        }

        let outcome = controller.train()?;
        if outcome.state == RunState::Interrupted {
            warn!(step = outcome.global_step; "training interrupted, results are not written");
            return Ok(outcome);
        }

        info!(step = outcome.global_step, loss = outcome.mean_loss; "training done");

        if self.group.is_main() {
            let output_dir = &trainer.output_dir;
            fs::create_dir_all(output_dir)?;

            info!("saving model to {}", output_dir.display());
            let model = controller.into_model().into_inner();
            model.save(output_dir)?;
            tokenizer.save(output_dir)?;
            fs::write(
                output_dir.join(TRAINING_ARGS_FILE),
                serde_json::to_string_pretty(trainer).map_err(MlError::from)?,
            )?;
        }

        Ok(outcome)
    }

    /// Evaluates the final model, plus every checkpoint if asked to.
    ///
    /// With more than one model evaluated, checkpoint results are keyed as
    /// `<task>_<step>`.
    fn evaluate(
        &self,
        cache: &FeatureCache<'_>,
        metrics: &dyn MetricsEngine,
    ) -> Result<EvaluationResult> {
        let output_dir = &self.spec.trainer.output_dir;
        let sets = load_eval_sets(&self.spec.tasks, cache)?;
        let evaluator = EvaluationCoordinator::new(&self.spec.eval, metrics, sets);

        let mut targets: Vec<(PathBuf, Option<usize>)> = vec![(output_dir.clone(), None)];
        if self.spec.eval_all_checkpoints {
            targets.extend(
                checkpoint::list_checkpoints(output_dir)?
                    .into_iter()
                    .map(|record| (record.dir, Some(record.step))),
            );
        }

        let suffixed = targets.len() > 1;
        info!(models = targets.len(); "evaluating");

        let mut results = EvaluationResult::new();
        for (dir, step) in targets {
            let mut model = BagOfEmbeddings::from_pretrained(&dir)?;
            let prefix = step
                .and_then(|_| dir.file_name())
                .map(|name| name.to_string_lossy().into_owned());
            let result = evaluator.evaluate(&mut model, prefix.as_deref())?;

            for (key, values) in result {
                let key = match step {
                    Some(step) if suffixed => format!("{key}_{step}"),
                    _ => key,
                };
                results.insert(key, values);
            }
        }

        Ok(results)
    }
}

fn is_populated(dir: &Path) -> Result<bool> {
    if !dir.is_dir() {
        return Ok(false);
    }
    Ok(fs::read_dir(dir)?.next().is_some())
}
