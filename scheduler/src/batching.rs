use ml_core::{Instance, TaskId};

use crate::{
    Result,
    config::BatchingMode,
    error::SchedulerErr,
};

/// Instances of a single task taking part in one step.
#[derive(Debug, Clone, PartialEq)]
pub struct SubBatch<'a> {
    pub task: TaskId,
    pub instances: Vec<&'a Instance>,
}

impl<'a> SubBatch<'a> {
    pub fn new(task: TaskId, instances: Vec<&'a Instance>) -> Self {
        Self { task, instances }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// What one step hands to the model.
#[derive(Debug, Clone, PartialEq)]
pub enum Batch<'a> {
    /// Every instance in a single forward pass, tagged with the first task.
    Dense(SubBatch<'a>),
    /// One forward pass per task, in order of first appearance.
    Split(Vec<SubBatch<'a>>),
}

impl<'a> Batch<'a> {
    /// The forward passes of this batch.
    pub fn passes(&self) -> &[SubBatch<'a>] {
        match self {
            Batch::Dense(batch) => std::slice::from_ref(batch),
            Batch::Split(groups) => groups,
        }
    }

    /// Total number of instances.
    pub fn len(&self) -> usize {
        self.passes().iter().map(SubBatch::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Turns raw sampler batches into model batches.
#[derive(Debug, Clone, Copy)]
pub struct BatchAssembler {
    mode: BatchingMode,
}

impl BatchAssembler {
    pub fn new(mode: BatchingMode) -> Self {
        Self { mode }
    }

    #[inline]
    pub fn mode(&self) -> BatchingMode {
        self.mode
    }

    /// Assembles a raw batch of instances.
    ///
    /// # Errors
    /// Returns `SchedulerErr::EmptyCompositeBatch` if `raw` is empty.
    pub fn assemble<'a>(&self, raw: &[&'a Instance]) -> Result<Batch<'a>> {
        let mut groups: Vec<SubBatch<'a>> = Vec::new();

        for &instance in raw {
            match groups.iter_mut().find(|group| group.task == instance.task) {
                Some(group) => group.instances.push(instance),
                None => groups.push(SubBatch::new(instance.task, vec![instance])),
            }
        }

        self.compose(groups)
    }

    /// Assembles a raw batch that already comes grouped by task.
    ///
    /// Empty groups are dropped and the remaining ones keep their order.
    ///
    /// # Errors
    /// Returns `SchedulerErr::EmptyCompositeBatch` if every group is empty.
    pub fn compose<'a>(&self, groups: Vec<SubBatch<'a>>) -> Result<Batch<'a>> {
        let groups: Vec<_> = groups.into_iter().filter(|group| !group.is_empty()).collect();

        let Some(first) = groups.first() else {
            return Err(SchedulerErr::EmptyCompositeBatch);
        };

        match self.mode {
            BatchingMode::Split => Ok(Batch::Split(groups)),
            BatchingMode::Dense => {
                let task = first.task;
                let instances = groups.into_iter().flat_map(|group| group.instances).collect();
                Ok(Batch::Dense(SubBatch::new(task, instances)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use ml_core::Label;

    use super::*;

    fn instance(task: usize, id: u32) -> Instance {
        Instance {
            input_ids: vec![id],
            attention_mask: vec![1],
            token_type_ids: None,
            label: Label::Class(0),
            task: TaskId(task),
        }
    }

    #[test]
    fn split_groups_are_homogeneous_and_ordered_by_first_appearance() {
        let pool = [instance(2, 0), instance(0, 1), instance(2, 2), instance(1, 3), instance(0, 4)];
        let raw: Vec<&Instance> = pool.iter().collect();

        let batch = BatchAssembler::new(BatchingMode::Split).assemble(&raw).unwrap();
        let passes = batch.passes();

        let order: Vec<TaskId> = passes.iter().map(|g| g.task).collect();
        assert_eq!(order, vec![TaskId(2), TaskId(0), TaskId(1)]);
        for group in passes {
            assert!(group.instances.iter().all(|i| i.task == group.task));
        }
        assert_eq!(batch.len(), 5);
    }

    #[test]
    fn dense_merges_everything_in_order() {
        let pool = [instance(0, 7), instance(1, 8), instance(0, 9)];
        let raw: Vec<&Instance> = pool.iter().collect();

        let batch = BatchAssembler::new(BatchingMode::Dense).assemble(&raw).unwrap();
        let Batch::Dense(merged) = batch else { panic!("expected a dense batch") };

        let ids: Vec<u32> = merged.instances.iter().map(|i| i.input_ids[0]).collect();
        assert_eq!(ids, vec![7, 9, 8]);
        assert_eq!(merged.task, TaskId(0));
    }

    #[test]
    fn empty_groups_are_dropped() {
        let a = instance(1, 0);
        let groups = vec![
            SubBatch::new(TaskId(0), vec![]),
            SubBatch::new(TaskId(1), vec![&a]),
        ];

        let batch = BatchAssembler::new(BatchingMode::Split).compose(groups).unwrap();
        assert_eq!(batch.passes().len(), 1);
    }

    #[test]
    fn only_empty_groups_is_an_empty_composite_batch() {
        let groups = vec![SubBatch::new(TaskId(0), vec![]), SubBatch::new(TaskId(1), vec![])];

        for mode in [BatchingMode::Split, BatchingMode::Dense] {
            let err = BatchAssembler::new(mode).compose(groups.clone());
            assert!(matches!(err, Err(SchedulerErr::EmptyCompositeBatch)));
        }
        assert!(matches!(
            BatchAssembler::new(BatchingMode::Split).assemble(&[]),
            Err(SchedulerErr::EmptyCompositeBatch)
        ));
    }
}
