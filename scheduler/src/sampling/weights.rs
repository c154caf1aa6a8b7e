use log::{debug, info};
use ml_core::TaskId;
use serde::{Deserialize, Serialize};

use crate::config::SamplingPolicy;

/// Per-task sampling weights, owned by the sampler.
///
/// A weight is the probability mass of a single instance of the task, so the
/// chance of drawing a task next is its weight times what is left of it.
/// Under the uniform policy every task keeps its full initial mass until it
/// runs out, which makes the draw independent of task size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingWeightTable {
    policy: SamplingPolicy,
    sizes: Vec<usize>,
    weights: Vec<f64>,
    /// Epoch whose evaluation produced the current weights.
    feedback_epoch: Option<usize>,
}

impl SamplingWeightTable {
    /// Creates the initial table of a run.
    ///
    /// The dynamic policy starts from the size weights until the first
    /// evaluation feedback arrives.
    ///
    /// # Args
    /// * `policy` - The sampling policy of the run.
    /// * `sizes` - Instance count of every task, indexed by task id.
    pub fn new(policy: SamplingPolicy, sizes: Vec<usize>) -> Self {
        let weights = match policy {
            SamplingPolicy::Uniform => uniform_weights(&sizes),
            SamplingPolicy::Size | SamplingPolicy::Dynamic => size_weights(&sizes),
        };

        Self {
            policy,
            sizes,
            weights,
            feedback_epoch: None,
        }
    }

    #[inline]
    pub fn policy(&self) -> SamplingPolicy {
        self.policy
    }

    #[inline]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    #[inline]
    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// Returns the per-instance weight of `task`, zero for unknown tasks.
    pub fn weight(&self, task: TaskId) -> f64 {
        self.weights.get(task.0).copied().unwrap_or(0.0)
    }

    pub fn feedback_epoch(&self) -> Option<usize> {
        self.feedback_epoch
    }

    /// Relative probability of drawing `task` next.
    ///
    /// # Args
    /// * `task` - The candidate task.
    /// * `remaining` - Instances of the task not yet drawn this epoch.
    pub fn draw_mass(&self, task: TaskId, remaining: usize) -> f64 {
        if remaining == 0 {
            return 0.0;
        }

        let weight = self.weight(task);
        match self.policy {
            SamplingPolicy::Uniform => weight * self.sizes.get(task.0).copied().unwrap_or(0) as f64,
            SamplingPolicy::Size | SamplingPolicy::Dynamic => weight * remaining as f64,
        }
    }

    /// Recomputes the weights from the performance gap of every task.
    ///
    /// A task's weight is `exp(gap / temperature)`, normalized so a full epoch
    /// has unit mass. Non-dynamic tables ignore the feedback.
    ///
    /// # Args
    /// * `epoch` - The epoch the feedback was measured after.
    /// * `gaps` - `baseline - measured` per task, indexed by task id.
    /// * `temperature` - Softness of the reweighting; lower is greedier.
    pub fn apply_feedback(&mut self, epoch: usize, gaps: &[f64], temperature: f64) {
        if self.policy != SamplingPolicy::Dynamic {
            debug!(epoch = epoch; "ignoring sampling feedback for a static policy");
            return;
        }

        let max_gap = gaps.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let scores: Vec<f64> = gaps
            .iter()
            .map(|gap| ((gap - max_gap) / temperature).exp())
            .collect();

        let norm: f64 = scores
            .iter()
            .zip(&self.sizes)
            .map(|(score, &size)| score * size as f64)
            .sum();

        if norm > 0.0 && norm.is_finite() {
            self.weights = scores.iter().map(|score| score / norm).collect();
        }

        self.feedback_epoch = Some(epoch);
        info!(epoch = epoch; "sampling weights updated: {:?}", self.weights);
    }
}

fn uniform_weights(sizes: &[usize]) -> Vec<f64> {
    let tasks = sizes.iter().filter(|&&n| n > 0).count() as f64;
    sizes
        .iter()
        .map(|&n| if n == 0 { 0.0 } else { 1.0 / (tasks * n as f64) })
        .collect()
}

fn size_weights(sizes: &[usize]) -> Vec<f64> {
    let total: usize = sizes.iter().sum();
    let weight = if total == 0 { 0.0 } else { 1.0 / total as f64 };
    vec![weight; sizes.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_gives_every_task_the_same_mass() {
        let table = SamplingWeightTable::new(SamplingPolicy::Uniform, vec![100, 10]);
        let a = table.draw_mass(TaskId(0), 100);
        let b = table.draw_mass(TaskId(1), 10);
        assert!((a - b).abs() < 1e-12);
        assert!((a - 0.5).abs() < 1e-12);

        // Mass stays put while a task still has instances.
        assert_eq!(table.draw_mass(TaskId(1), 1), b);
        assert_eq!(table.draw_mass(TaskId(1), 0), 0.0);
    }

    #[test]
    fn size_mass_follows_remaining_instances() {
        let table = SamplingWeightTable::new(SamplingPolicy::Size, vec![100, 10]);
        assert!((table.draw_mass(TaskId(0), 100) - 100.0 / 110.0).abs() < 1e-12);
        assert!((table.draw_mass(TaskId(1), 5) - 5.0 / 110.0).abs() < 1e-12);
    }

    #[test]
    fn dynamic_starts_from_size_weights() {
        let dynamic = SamplingWeightTable::new(SamplingPolicy::Dynamic, vec![100, 10]);
        let size = SamplingWeightTable::new(SamplingPolicy::Size, vec![100, 10]);
        assert_eq!(dynamic.weights(), size.weights());
        assert_eq!(dynamic.feedback_epoch(), None);
    }

    #[test]
    fn larger_gaps_get_larger_weights() {
        let mut table = SamplingWeightTable::new(SamplingPolicy::Dynamic, vec![50, 50, 50]);
        table.apply_feedback(0, &[0.10, -0.05, 0.02], 0.1);

        let w = table.weights();
        assert!(w[0] > w[2]);
        assert!(w[2] > w[1]);
        assert_eq!(table.feedback_epoch(), Some(0));
    }

    #[test]
    fn lagging_large_task_gains_and_leading_small_task_loses() {
        let mut table = SamplingWeightTable::new(SamplingPolicy::Dynamic, vec![100, 10]);
        let before = table.weights().to_vec();

        // A: baseline 0.80, measured 0.75. B: baseline 0.70, measured 0.72.
        table.apply_feedback(0, &[0.80 - 0.75, 0.70 - 0.72], 0.1);
        let after = table.weights();

        assert!(after[0] > before[0]);
        assert!(after[1] <= before[1]);

        // Still a distribution over one epoch.
        let mass = after[0] * 100.0 + after[1] * 10.0;
        assert!((mass - 1.0).abs() < 1e-9);
    }

    #[test]
    fn static_policies_ignore_feedback() {
        let mut table = SamplingWeightTable::new(SamplingPolicy::Size, vec![3, 4]);
        let before = table.clone();
        table.apply_feedback(2, &[1.0, -1.0], 0.1);
        assert_eq!(table, before);
    }
}
