use serde::{Deserialize, Serialize};

/// Linear warmup from zero to the base rate, then linear decay back to zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearSchedule {
    base_lr: f32,
    warmup_steps: usize,
    total_steps: usize,
    step: usize,
}

impl LinearSchedule {
    /// # Args
    /// * `base_lr` - Peak learning rate, reached at the end of the warmup.
    /// * `warmup_steps` - Updates spent ramping up.
    /// * `total_steps` - Updates after which the rate reaches zero.
    pub fn new(base_lr: f32, warmup_steps: usize, total_steps: usize) -> Self {
        Self {
            base_lr,
            warmup_steps,
            total_steps,
            step: 0,
        }
    }

    /// Learning rate of the next update.
    pub fn lr(&self) -> f32 {
        self.base_lr * self.factor(self.step)
    }

    /// Moves to the next update.
    #[inline]
    pub fn advance(&mut self) {
        self.step += 1;
    }

    #[inline]
    pub fn step(&self) -> usize {
        self.step
    }

    fn factor(&self, step: usize) -> f32 {
        if step < self.warmup_steps {
            return step as f32 / self.warmup_steps.max(1) as f32;
        }

        let left = self.total_steps.saturating_sub(step) as f32;
        let span = self.total_steps.saturating_sub(self.warmup_steps).max(1) as f32;
        (left / span).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warms_up_then_decays_to_zero() {
        let mut s = LinearSchedule::new(1.0, 2, 6);
        let mut lrs = Vec::new();
        for _ in 0..7 {
            lrs.push(s.lr());
            s.advance();
        }
        assert_eq!(lrs, vec![0.0, 0.5, 1.0, 0.75, 0.5, 0.25, 0.0]);
    }

    #[test]
    fn no_warmup_starts_at_the_base_rate() {
        let s = LinearSchedule::new(0.1, 0, 10);
        assert_eq!(s.lr(), 0.1);
    }
}
