use std::{collections::VecDeque, time::Duration};

/// Number of update losses averaged into each `loss_values.txt` line.
pub const LOSS_WINDOW: usize = 10;

/// Counters of a training run, kept for observability.
#[derive(Debug, Default, Clone)]
pub struct TrainMetrics {
    pub compute_time: Duration,
    pub checkpoint_time: Duration,

    pub updates: u64,
    pub raw_batches: u64,
    pub sub_batches: u64,
    pub samples: u64,
    pub skipped_windows: u64,

    recent_losses: VecDeque<f32>,
}

impl TrainMetrics {
    #[inline]
    pub fn bump_update(&mut self) {
        self.updates += 1;
    }

    #[inline]
    pub fn add_raw_batch(&mut self, sub_batches: usize, samples: usize) {
        self.raw_batches += 1;
        self.sub_batches += sub_batches as u64;
        self.samples += samples as u64;
    }

    /// Records the loss of an optimizer update, keeping only the latest ones.
    pub fn push_update_loss(&mut self, loss: f32) {
        if self.recent_losses.len() == LOSS_WINDOW {
            self.recent_losses.pop_front();
        }
        self.recent_losses.push_back(loss);
    }

    /// Mean of the latest update losses, `NaN` if there are none.
    pub fn recent_loss_mean(&self) -> f64 {
        if self.recent_losses.is_empty() {
            return f64::NAN;
        }

        let sum: f64 = self.recent_losses.iter().map(|&l| f64::from(l)).sum();
        sum / self.recent_losses.len() as f64
    }

    /// Forgets the update losses of the previous epoch.
    pub fn clear_recent_losses(&mut self) {
        self.recent_losses.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_covers_only_the_latest_window() {
        let mut m = TrainMetrics::default();
        assert!(m.recent_loss_mean().is_nan());

        for i in 0..15 {
            m.push_update_loss(i as f32);
        }
        // 5..=14
        assert_eq!(m.recent_loss_mean(), 9.5);

        m.clear_recent_losses();
        assert!(m.recent_loss_mean().is_nan());
    }
}
