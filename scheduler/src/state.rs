use serde::{Deserialize, Serialize};

/// Lifecycle of a training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Resuming,
    Running,
    Checkpointing,
    /// Stopped by an external signal after writing a checkpoint.
    Interrupted,
    Completed,
}

/// Progress counters of the training loop, persisted in every checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    /// Optimizer updates applied so far.
    pub global_step: usize,
    pub current_epoch: usize,
    /// Updates of `current_epoch` to replay without training after a resume.
    pub steps_to_skip_in_epoch: usize,
    /// Sum of every step loss since the run (or resume) started.
    pub accumulated_loss: f64,
}

impl TrainingState {
    /// Derives where a run stopped from its global step.
    ///
    /// # Args
    /// * `global_step` - The step recovered from a checkpoint.
    /// * `steps_per_epoch` - Optimizer updates per epoch.
    pub fn resumed_at(global_step: usize, steps_per_epoch: usize) -> Self {
        let steps_per_epoch = steps_per_epoch.max(1);

        Self {
            global_step,
            current_epoch: global_step / steps_per_epoch,
            steps_to_skip_in_epoch: global_step % steps_per_epoch,
            accumulated_loss: 0.0,
        }
    }

    #[inline]
    pub fn inc_step(&mut self) {
        self.global_step += 1;
    }
}
