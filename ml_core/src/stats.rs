/// Statistics produced by a single training step.
///
/// This type keeps fields private to allow evolving the internal counters
/// without breaking the public API.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepStats {
    sub_batches: usize,
    samples: usize,
    loss: f32,
}

impl StepStats {
    /// Creates a new `StepStats`.
    ///
    /// # Args
    /// * `sub_batches` - Number of per-task sub-batches processed during the step.
    /// * `samples` - Total number of instances processed during the step.
    /// * `loss` - The step loss, already divided by the accumulation window.
    ///
    /// # Returns
    /// A `StepStats` instance containing the provided counters.
    pub fn new(sub_batches: usize, samples: usize, loss: f32) -> Self {
        Self {
            sub_batches,
            samples,
            loss,
        }
    }

    /// Returns the number of sub-batches processed in the step.
    pub fn sub_batches(&self) -> usize {
        self.sub_batches
    }

    /// Returns the number of instances processed in the step.
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Returns the scaled step loss.
    pub fn loss(&self) -> f32 {
        self.loss
    }
}
