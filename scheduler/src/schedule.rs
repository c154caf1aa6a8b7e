use std::num::NonZeroUsize;

/// Defines when accumulated gradients are applied.
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub window: NonZeroUsize,
}

impl Schedule {
    pub fn new(window: NonZeroUsize) -> Self {
        Self { window }
    }

    /// Returns true if this raw batch ends an accumulation window.
    #[inline]
    pub fn should_update(&self, batch_index: usize) -> bool {
        let n = self.window.get();
        (batch_index + 1) % n == 0
    }

    /// Number of optimizer updates a pass over `num_batches` raw batches makes.
    #[inline]
    pub fn updates_per_epoch(&self, num_batches: usize) -> usize {
        num_batches / self.window.get()
    }

    /// Scale applied to every loss so a window sums to a mean.
    #[inline]
    pub fn loss_scale(&self) -> f32 {
        1.0 / self.window.get() as f32
    }
}
