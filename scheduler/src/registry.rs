use ml_core::{DataError, Dataset, Instance, TaskDescriptor, TaskId};

/// Position of one instance inside the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SampleRef {
    pub task: TaskId,
    pub index: usize,
}

impl SampleRef {
    pub fn new(task: TaskId, index: usize) -> Self {
        Self { task, index }
    }
}

/// One registered task with its training instances.
#[derive(Debug, Clone)]
pub struct TaskEntry {
    pub descriptor: TaskDescriptor,
    pub instances: Vec<Instance>,
}

/// Holds, per task, the materialized training instances and task metadata.
///
/// Task ids are positions in registration order.
#[derive(Debug, Clone, Default)]
pub struct TaskDatasetRegistry {
    tasks: Vec<TaskEntry>,
}

impl TaskDatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a task to the registry.
    ///
    /// The descriptor's id is rewritten to the task's position so ids always
    /// index the registry, and so are the ids carried by its instances.
    ///
    /// # Returns
    /// The id assigned to the task.
    pub fn register(
        &mut self,
        mut descriptor: TaskDescriptor,
        mut instances: Vec<Instance>,
    ) -> TaskId {
        let id = TaskId(self.tasks.len());
        descriptor.id = id;
        instances.iter_mut().for_each(|instance| instance.task = id);
        self.tasks.push(TaskEntry {
            descriptor,
            instances,
        });
        id
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: TaskId) -> Option<&TaskEntry> {
        self.tasks.get(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskEntry> {
        self.tasks.iter()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &TaskDescriptor> {
        self.tasks.iter().map(|entry| &entry.descriptor)
    }

    /// Returns the instance count of every task, indexed by task id.
    pub fn sizes(&self) -> Vec<usize> {
        self.tasks.iter().map(|entry| entry.instances.len()).collect()
    }

    pub fn total_instances(&self) -> usize {
        self.tasks.iter().map(|entry| entry.instances.len()).sum()
    }

    /// Resolves a sample reference.
    ///
    /// # Errors
    /// Returns `DataError::OutOfBounds` if either the task or the index is unknown.
    pub fn instance(&self, sample: SampleRef) -> Result<&Instance, DataError> {
        let entry = self
            .get(sample.task)
            .ok_or(DataError::OutOfBounds { index: sample.task.0 })?;
        Dataset::get(entry.instances.as_slice(), sample.index)
    }
}
