use std::{
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use log::{debug, info, warn};
use ml_core::{DataError, Instance, ModelBackend, ProcessGroup, StepStats, Tokenizer};

use crate::{
    Result,
    batching::{Batch, BatchAssembler},
    checkpoint::{self, CheckpointContents},
    config::{NonFiniteLossPolicy, SamplingPolicy, TrainerConfig},
    data::{DataLoader, ShardSpec},
    error::SchedulerErr,
    evaluation::EvaluationCoordinator,
    metrics::TrainMetrics,
    optimization::{AdamW, LinearSchedule, clip_grad_norm},
    registry::{SampleRef, TaskDatasetRegistry},
    report,
    sampling::{MultiTaskSampler, SamplingWeightTable},
    schedule::Schedule,
    state::{RunState, TrainingState},
};

/// How a call to [`TrainingLoopController::train`] ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainOutcome {
    /// `Completed`, or `Interrupted` if the stop flag was raised.
    pub state: RunState,
    pub global_step: usize,
    /// Mean update loss over the updates made by this call.
    pub mean_loss: f64,
}

/// Drives epochs and optimizer updates over a multi-task registry.
///
/// Design:
/// - Owns `TrainingState`; every other component is driven through its
///   public operations.
/// - A raw batch is one forward/backward pass per task group; gradients
///   accumulate in the backend until the window closes.
/// - Checkpoints are written by the main rank at each epoch's midpoint and end.
pub struct TrainingLoopController<'a, M> {
    config: &'a TrainerConfig,
    registry: &'a TaskDatasetRegistry,
    group: &'a dyn ProcessGroup,
    model: M,
    tokenizer: Option<&'a dyn Tokenizer>,
    evaluator: Option<&'a EvaluationCoordinator<'a>>,
    stop: Arc<AtomicBool>,

    sampler: MultiTaskSampler,
    assembler: BatchAssembler,
    schedule: Schedule,
    shard: ShardSpec,
    optimizer: AdamW,
    lr_schedule: LinearSchedule,

    state: TrainingState,
    run_state: RunState,
    metrics: TrainMetrics,
}

impl<'a, M: ModelBackend> TrainingLoopController<'a, M> {
    /// Creates a controller in the `Idle` state.
    ///
    /// # Args
    /// * `config` - Settings of the run.
    /// * `registry` - Training instances of every task.
    /// * `model` - The shared model, possibly wrapped for data parallelism.
    /// * `group` - The process group this rank belongs to.
    pub fn new(
        config: &'a TrainerConfig,
        registry: &'a TaskDatasetRegistry,
        model: M,
        group: &'a dyn ProcessGroup,
    ) -> Self {
        let table = SamplingWeightTable::new(config.sampling_policy, registry.sizes());
        let shard = NonZeroUsize::new(group.world_size())
            .and_then(|world_size| ShardSpec::new(group.rank(), world_size))
            .unwrap_or_else(ShardSpec::single);

        Self {
            config,
            registry,
            group,
            model,
            tokenizer: None,
            evaluator: None,
            stop: Arc::new(AtomicBool::new(false)),
            sampler: MultiTaskSampler::new(table, config.seed),
            assembler: BatchAssembler::new(config.batching_mode),
            schedule: Schedule::new(config.accumulation_window),
            shard,
            optimizer: AdamW::new(config.weight_decay, config.adam_epsilon),
            lr_schedule: LinearSchedule::new(config.learning_rate, config.warmup_steps, 0),
            state: TrainingState::default(),
            run_state: RunState::Idle,
            metrics: TrainMetrics::default(),
        }
    }

    /// Saves the tokenizer state into every checkpoint.
    pub fn with_tokenizer(mut self, tokenizer: &'a dyn Tokenizer) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    /// Evaluator used for the feedback of the dynamic sampling policy.
    pub fn with_evaluator(mut self, evaluator: &'a EvaluationCoordinator<'a>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Flag that, once raised, stops the run at the next raw batch.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn metrics(&self) -> &TrainMetrics {
        &self.metrics
    }

    pub fn weight_table(&self) -> &SamplingWeightTable {
        self.sampler.table()
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    /// Optimizer updates per epoch on this rank.
    ///
    /// # Errors
    /// Returns `SchedulerErr::NoTrainingData` if an epoch can't fill a single window.
    pub fn steps_per_epoch(&self) -> Result<usize> {
        let raw_batches = self
            .shard
            .batches_per_rank(self.registry.total_instances(), self.config.train_batch_size);

        match self.schedule.updates_per_epoch(raw_batches) {
            0 => Err(SchedulerErr::NoTrainingData),
            steps => Ok(steps),
        }
    }

    /// Trains until the epoch budget or `max_steps` is exhausted, or the stop flag is raised.
    ///
    /// Resumes from `resume_from`, or else from the newest checkpoint of the
    /// output directory, when one exists.
    ///
    /// # Returns
    /// How the run ended, with its global step and mean update loss.
    ///
    /// # Errors
    /// Returns `SchedulerErr` on an empty composite batch, an unparsable
    /// resume checkpoint, a non-finite loss under the `fail` policy, or any
    /// backend or I/O failure.
    pub fn train(&mut self) -> Result<TrainOutcome> {
        let steps_per_epoch = self.steps_per_epoch()?;
        let max_steps = self.config.max_steps;

        let (t_total, num_epochs) = if max_steps > 0 {
            (max_steps, max_steps / steps_per_epoch + 1)
        } else {
            let epochs = self.config.num_train_epochs;
            (steps_per_epoch * epochs, epochs)
        };

        self.lr_schedule =
            LinearSchedule::new(self.config.learning_rate, self.config.warmup_steps, t_total);
        self.resume(steps_per_epoch)?;

        let start_step = self.state.global_step;
        self.run_state = RunState::Running;
        info!(
            tasks = self.registry.len(),
            instances = self.registry.total_instances(),
            epochs = num_epochs,
            steps_per_epoch = steps_per_epoch,
            total_steps = t_total,
            window = self.schedule.window.get();
            "running training"
        );

        let mut interrupted = false;
        while self.state.current_epoch < num_epochs && !self.reached_max_steps() {
            if !self.run_epoch()? {
                interrupted = true;
                break;
            }
        }

        self.run_state = if interrupted {
            RunState::Interrupted
        } else {
            RunState::Completed
        };

        let updates = self.state.global_step - start_step;
        let mean_loss = if updates > 0 {
            self.state.accumulated_loss / updates as f64
        } else {
            0.0
        };

        info!(
            step = self.state.global_step,
            updates = self.metrics.updates,
            skipped_windows = self.metrics.skipped_windows,
            compute_ms = self.metrics.compute_time.as_millis() as u64,
            checkpoint_ms = self.metrics.checkpoint_time.as_millis() as u64;
            "training finished: {:?}", self.run_state
        );

        Ok(TrainOutcome {
            state: self.run_state,
            global_step: self.state.global_step,
            mean_loss,
        })
    }

    fn reached_max_steps(&self) -> bool {
        self.config.max_steps > 0 && self.state.global_step >= self.config.max_steps
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Restores the latest checkpoint, if any.
    fn resume(&mut self, steps_per_epoch: usize) -> Result<()> {
        let source = match &self.config.resume_from {
            Some(dir) => Some(dir.clone()),
            None => {
                checkpoint::latest_checkpoint(&self.config.output_dir)?.map(|record| record.dir)
            }
        };

        let Some(dir) = source else {
            return Ok(());
        };

        self.run_state = RunState::Resuming;
        self.model.unwrap_model_mut().load(&dir)?;

        if self.config.restart_from_scratch {
            info!("warm-starting weights from {}, training from step 0", dir.display());
            return Ok(());
        }

        let global_step = checkpoint::parse_step(&dir)?;
        let restored = checkpoint::load_training_state(&dir)?;
        self.optimizer = restored.optimizer;
        self.lr_schedule = restored.schedule;
        self.sampler.restore_table(restored.table);
        self.state = TrainingState::resumed_at(global_step, steps_per_epoch);

        info!(
            step = global_step,
            epoch = self.state.current_epoch,
            skip = self.state.steps_to_skip_in_epoch;
            "resuming training from {}", dir.display()
        );

        Ok(())
    }

    /// Runs the current epoch.
    ///
    /// # Returns
    /// `false` if the run was interrupted.
    fn run_epoch(&mut self) -> Result<bool> {
        let epoch = self.state.current_epoch;
        let registry = self.registry;

        // Leftover batches of the previous epoch never make an update.
        self.model.zero_grad();
        self.metrics.clear_recent_losses();

        let stream = self.sampler.next_epoch_stream(registry, epoch);
        let mut loader = DataLoader::new(stream, self.shard, self.config.train_batch_size);
        let midpoint = loader.len() / 2;

        let skipped_windows = std::mem::take(&mut self.state.steps_to_skip_in_epoch);
        let mut batch_index = skipped_windows * self.schedule.window.get();
        loader.skip_batches(batch_index);

        debug!(epoch = epoch, batches = loader.len(), skipped = batch_index; "starting epoch");

        let mut window_loss = 0.0f32;
        let mut poisoned = false;

        loop {
            // An exhausted epoch still ends normally, so a stop raised on its
            // last batch keeps the loss line and the feedback of that epoch.
            let Some(raw) = loader.next_batch() else { break };
            let raw: Vec<SampleRef> = raw.to_vec();

            if self.stop_requested() {
                warn!(step = self.state.global_step; "stop requested, checkpointing");
                loader.close();
                self.checkpoint()?;
                return Ok(false);
            }

            if batch_index == midpoint && midpoint > 0 {
                self.checkpoint()?;
            }

            let stats = self.training_step(&raw)?;
            if !stats.loss().is_finite() {
                match self.config.non_finite_loss {
                    NonFiniteLossPolicy::Fail => {
                        return Err(SchedulerErr::NonFiniteLoss {
                            step: self.state.global_step,
                            loss: stats.loss(),
                        });
                    }
                    NonFiniteLossPolicy::Skip => poisoned = true,
                }
            }
            window_loss += stats.loss();

            if self.schedule.should_update(batch_index) {
                self.apply_update(window_loss, poisoned)?;
                window_loss = 0.0;
                poisoned = false;

                if self.reached_max_steps() {
                    info!(step = self.state.global_step; "reached max steps");
                    loader.close();
                    break;
                }
            }

            batch_index += 1;
        }

        self.end_epoch(epoch)?;
        Ok(true)
    }

    /// Forward and backward passes over one raw batch.
    fn training_step(&mut self, raw: &[SampleRef]) -> Result<StepStats> {
        let started = Instant::now();
        let registry = self.registry;

        let instances = raw
            .iter()
            .map(|&sample| registry.instance(sample))
            .collect::<std::result::Result<Vec<&Instance>, _>>()?;

        let batch = self.assembler.assemble(&instances)?;
        let scale = self.schedule.loss_scale();

        let mut total = 0.0f32;
        for pass in batch.passes() {
            let label_count = registry
                .get(pass.task)
                .map(|entry| entry.descriptor.label_count)
                .ok_or(DataError::OutOfBounds { index: pass.task.0 })?;

            total += self.model.forward_backward(&pass.instances, label_count, scale)?;
        }

        let stats = StepStats::new(batch.passes().len(), batch.len(), total * scale);
        self.metrics.add_raw_batch(stats.sub_batches(), stats.samples());
        self.metrics.compute_time += started.elapsed();

        if let Batch::Split(groups) = &batch {
            debug!(groups = groups.len(), samples = stats.samples(), loss = stats.loss(); "step");
        }

        Ok(stats)
    }

    /// Closes an accumulation window.
    ///
    /// Gradients are synchronized on every window so ranks stay aligned; a
    /// window with a non-finite loss or gradient norm is dropped without
    /// touching the weights, but still counts as a step.
    fn apply_update(&mut self, window_loss: f32, poisoned: bool) -> Result<()> {
        self.model.sync_gradients()?;

        let lr = self.lr_schedule.lr();
        let mut params = self.model.params();
        let norm = clip_grad_norm(&mut params, self.config.max_grad_norm);

        if poisoned || !norm.is_finite() {
            drop(params);
            self.metrics.skipped_windows += 1;
            warn!(
                step = self.state.global_step,
                loss = window_loss,
                grad_norm = norm;
                "non-finite window, dropping its gradients"
            );
        } else {
            self.optimizer.step(&mut params, lr)?;
            drop(params);
            self.metrics.push_update_loss(window_loss);
            self.state.accumulated_loss += f64::from(window_loss);
        }

        self.model.zero_grad();
        self.lr_schedule.advance();
        self.state.inc_step();
        self.metrics.bump_update();

        debug!(
            step = self.state.global_step,
            lr = lr,
            loss = window_loss,
            grad_norm = norm;
            "update applied"
        );
        Ok(())
    }

    /// Loss log, dynamic feedback and the end-of-epoch checkpoint.
    fn end_epoch(&mut self, epoch: usize) -> Result<()> {
        let loss = self.metrics.recent_loss_mean();
        info!(epoch = epoch, step = self.state.global_step, loss = loss; "epoch finished");

        if self.group.is_main() {
            report::append_loss_value(&self.config.output_dir, epoch, loss)?;
        }

        if !self.reached_max_steps() && self.config.sampling_policy == SamplingPolicy::Dynamic {
            if let Some(evaluator) = self.evaluator {
                let result = evaluator.evaluate(&mut self.model, None)?;
                self.sampler
                    .apply_feedback(self.registry, epoch, &result, self.config.dynamic_temperature);
            } else {
                warn!("dynamic sampling without an evaluator, keeping the current weights");
            }
        }

        self.checkpoint()?;
        self.state.current_epoch += 1;
        Ok(())
    }

    /// Writes a checkpoint for the current step from the main rank.
    fn checkpoint(&mut self) -> Result<()> {
        if !self.group.is_main() {
            return Ok(());
        }

        let previous = self.run_state;
        self.run_state = RunState::Checkpointing;
        let started = Instant::now();

        let contents = CheckpointContents {
            model: self.model.unwrap_model(),
            tokenizer: self.tokenizer,
            optimizer: &self.optimizer,
            schedule: &self.lr_schedule,
            table: self.sampler.table(),
            state: &self.state,
            config: self.config,
        };
        checkpoint::save_checkpoint(&self.config.output_dir, &contents)?;

        self.metrics.checkpoint_time += started.elapsed();
        self.run_state = previous;
        Ok(())
    }
}
