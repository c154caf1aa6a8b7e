use log::{debug, warn};
use ml_core::{Metrics, TaskId};
use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};

use super::SamplingWeightTable;
use crate::{
    evaluation::EvaluationResult,
    registry::{SampleRef, TaskDatasetRegistry},
};

const EPOCH_SEED_MIX: u64 = 0x9e37_79b9_7f4a_7c15;

/// Produces the per-epoch order in which instances of every task are visited.
///
/// Every epoch visits every instance of every task exactly once; the policy
/// only decides how tasks interleave. The order of an epoch depends solely on
/// the run seed, the epoch number and the weight table, so replaying an epoch
/// after a resume reproduces it exactly.
#[derive(Debug, Clone)]
pub struct MultiTaskSampler {
    table: SamplingWeightTable,
    seed: u64,
}

impl MultiTaskSampler {
    pub fn new(table: SamplingWeightTable, seed: u64) -> Self {
        Self { table, seed }
    }

    #[inline]
    pub fn table(&self) -> &SamplingWeightTable {
        &self.table
    }

    /// Replaces the weight table, e.g. with one restored from a checkpoint.
    pub fn restore_table(&mut self, table: SamplingWeightTable) {
        self.table = table;
    }

    /// Feeds an evaluation pass back into the weights of the next epochs.
    ///
    /// # Args
    /// * `registry` - Source of every task's baseline score.
    /// * `epoch` - The epoch that was just evaluated.
    /// * `result` - The evaluation pass.
    /// * `temperature` - Softness of the reweighting.
    pub fn apply_feedback(
        &mut self,
        registry: &TaskDatasetRegistry,
        epoch: usize,
        result: &EvaluationResult,
        temperature: f64,
    ) {
        let gaps = performance_gaps(registry, result);
        self.table.apply_feedback(epoch, &gaps, temperature);
    }

    /// Builds the ordered stream of one epoch.
    ///
    /// Each draw picks a task with probability proportional to its draw mass
    /// and then takes that task's next instance from a seeded shuffle. Tasks
    /// with nothing left have no mass and are never picked.
    pub fn next_epoch_stream(
        &self,
        registry: &TaskDatasetRegistry,
        epoch: usize,
    ) -> Vec<SampleRef> {
        let epoch_mix = (epoch as u64 + 1).wrapping_mul(EPOCH_SEED_MIX);
        let mut rng = StdRng::seed_from_u64(self.seed ^ epoch_mix);

        let mut queues: Vec<Vec<usize>> = registry
            .sizes()
            .into_iter()
            .map(|n| {
                let mut order: Vec<usize> = (0..n).collect();
                order.shuffle(&mut rng);
                order
            })
            .collect();

        let total: usize = queues.iter().map(Vec::len).sum();
        let mut stream = Vec::with_capacity(total);

        while stream.len() < total {
            let masses: Vec<f64> = queues
                .iter()
                .enumerate()
                .map(|(t, queue)| self.table.draw_mass(TaskId(t), queue.len()))
                .collect();

            let task = pick(&masses, &mut rng)
                .or_else(|| queues.iter().position(|queue| !queue.is_empty()));

            let Some(task) = task else { break };
            let Some(index) = queues[task].pop() else { break };
            stream.push(SampleRef::new(TaskId(task), index));
        }

        debug!(epoch = epoch, instances = stream.len(); "epoch stream generated");
        stream
    }
}

/// Draws an index with probability proportional to `masses`.
///
/// Returns `None` when no entry has positive mass.
fn pick<R: Rng>(masses: &[f64], rng: &mut R) -> Option<usize> {
    let total: f64 = masses.iter().sum();
    if !(total > 0.0 && total.is_finite()) {
        return None;
    }

    let target = rng.random::<f64>() * total;
    let mut acc = 0.0;
    let mut last = None;

    for (i, &mass) in masses.iter().enumerate() {
        if mass <= 0.0 {
            continue;
        }

        acc += mass;
        last = Some(i);
        if target < acc {
            return last;
        }
    }

    last
}

/// Returns `baseline - measured` of every task's primary metric.
///
/// Tasks without a baseline or without a measurement get a zero gap.
pub fn performance_gaps(registry: &TaskDatasetRegistry, result: &EvaluationResult) -> Vec<f64> {
    registry
        .descriptors()
        .map(|task| {
            let measured = result
                .get(task.kind.name())
                .and_then(|metrics: &Metrics| metrics.get(task.kind.primary_metric()))
                .copied();

            match (task.baseline_score, measured) {
                (Some(baseline), Some(measured)) => baseline - measured,
                _ => {
                    warn!(task = task.kind.name(); "no baseline or measurement, assuming no gap");
                    0.0
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeSet, path::PathBuf};

    use ml_core::{Instance, Label, TaskDescriptor, TaskKind};

    use super::*;
    use crate::config::SamplingPolicy;

    fn registry(sizes: &[usize]) -> TaskDatasetRegistry {
        let kinds = [TaskKind::Rte, TaskKind::Mrpc, TaskKind::Cola];
        let mut registry = TaskDatasetRegistry::new();

        for (&n, kind) in sizes.iter().zip(kinds) {
            let instances = (0..n)
                .map(|i| Instance {
                    input_ids: vec![i as u32],
                    attention_mask: vec![1],
                    token_type_ids: None,
                    label: Label::Class(0),
                    task: TaskId(0),
                })
                .collect();
            registry.register(
                TaskDescriptor::new(TaskId(0), kind, PathBuf::new(), Some(0.8)),
                instances,
            );
        }

        registry
    }

    fn sampler(policy: SamplingPolicy, registry: &TaskDatasetRegistry) -> MultiTaskSampler {
        MultiTaskSampler::new(SamplingWeightTable::new(policy, registry.sizes()), 13)
    }

    #[test]
    fn every_policy_covers_every_instance_exactly_once() {
        let registry = registry(&[37, 5, 0]);

        for policy in [SamplingPolicy::Uniform, SamplingPolicy::Size, SamplingPolicy::Dynamic] {
            let sampler = sampler(policy, &registry);
            for epoch in 0..3 {
                let stream = sampler.next_epoch_stream(&registry, epoch);
                let unique: BTreeSet<_> = stream.iter().copied().collect();

                assert_eq!(stream.len(), 42, "{policy:?}");
                assert_eq!(unique.len(), 42, "{policy:?}");
                assert!(stream.iter().all(|s| registry.instance(*s).is_ok()));
            }
        }
    }

    #[test]
    fn streams_are_reproducible_per_epoch() {
        let registry = registry(&[20, 20]);
        let sampler = sampler(SamplingPolicy::Size, &registry);

        assert_eq!(
            sampler.next_epoch_stream(&registry, 4),
            sampler.next_epoch_stream(&registry, 4)
        );
        assert_ne!(
            sampler.next_epoch_stream(&registry, 4),
            sampler.next_epoch_stream(&registry, 5)
        );
    }

    #[test]
    fn uniform_front_loads_the_small_task() {
        let registry = registry(&[200, 20]);
        let sampler = sampler(SamplingPolicy::Uniform, &registry);
        let stream = sampler.next_epoch_stream(&registry, 0);

        // The small task is drawn about half of the time until it runs out.
        let small_in_head = stream[..40].iter().filter(|s| s.task == TaskId(1)).count();
        assert!(small_in_head >= 10, "only {small_in_head} draws from the small task");
    }

    #[test]
    fn zero_weight_tasks_are_still_drained() {
        let registry = registry(&[3, 3]);
        let mut sampler = sampler(SamplingPolicy::Dynamic, &registry);

        // A huge negative gap underflows the second weight to zero.
        let mut table = sampler.table().clone();
        table.apply_feedback(0, &[0.0, -1e6], 0.1);
        sampler.restore_table(table);

        let stream = sampler.next_epoch_stream(&registry, 1);
        assert_eq!(stream.len(), 6);
        assert!(stream[..3].iter().all(|s| s.task == TaskId(0)));
    }

    #[test]
    fn gaps_use_the_primary_metric() {
        let registry = registry(&[1, 1]);
        let mut result = EvaluationResult::new();
        result.insert("rte".into(), Metrics::from([("acc".to_string(), 0.75)]));

        let gaps = performance_gaps(&registry, &result);
        assert!((gaps[0] - 0.05).abs() < 1e-12);
        assert_eq!(gaps[1], 0.0);
    }
}
