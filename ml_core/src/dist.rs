use crate::MlError;

/// The synchronization contract of a data-parallel process group.
///
/// Every process of a run executes the same control loop; they only meet at
/// barriers and, through a wrapped model, when averaging gradients.
pub trait ProcessGroup: Send + Sync {
    /// Index of this process inside the group.
    fn rank(&self) -> usize;

    /// Number of processes in the group.
    fn world_size(&self) -> usize;

    /// Blocks until every process of the group reached this point.
    fn barrier(&self);

    /// Replaces `buf` with its element-wise mean across the group.
    ///
    /// # Errors
    /// Returns `MlError::ShapeMismatch` if the processes disagree on the length.
    fn all_reduce_mean(&self, buf: &mut [f32]) -> Result<(), MlError>;

    /// Whether this process owns shared side effects (cache files, checkpoints, reports).
    fn is_main(&self) -> bool {
        self.rank() == 0
    }
}

/// A group made of the current process alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalGroup;

impl ProcessGroup for LocalGroup {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn barrier(&self) {}

    fn all_reduce_mean(&self, _buf: &mut [f32]) -> Result<(), MlError> {
        Ok(())
    }
}
