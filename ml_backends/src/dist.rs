use std::sync::{Arc, Barrier};

use log::debug;
use ml_core::{
    CheckpointModel, Instance, MlError, ModelBackend, ModelOutput, ParamTensor, ProcessGroup,
};
use parking_lot::Mutex;

struct Shared {
    barrier: Barrier,
    sum: Mutex<Vec<f32>>,
}

/// A process group whose members are threads of the current process.
///
/// Every member must take part in every collective call, in the same order,
/// or the group deadlocks.
#[derive(Clone)]
pub struct ThreadGroup {
    rank: usize,
    world_size: usize,
    shared: Arc<Shared>,
}

impl ThreadGroup {
    /// Creates the handles of a group of `world_size` members, one per rank.
    ///
    /// # Returns
    /// The handles ordered by rank, or an error if `world_size` is zero.
    pub fn new_group(world_size: usize) -> Result<Vec<Self>, MlError> {
        if world_size == 0 {
            return Err(MlError::InvalidInput("a process group needs at least one member"));
        }

        let shared = Arc::new(Shared {
            barrier: Barrier::new(world_size),
            sum: Mutex::new(Vec::new()),
        });

        Ok((0..world_size)
            .map(|rank| Self {
                rank,
                world_size,
                shared: shared.clone(),
            })
            .collect())
    }
}

impl ProcessGroup for ThreadGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn barrier(&self) {
        self.shared.barrier.wait();
    }

    fn all_reduce_mean(&self, buf: &mut [f32]) -> Result<(), MlError> {
        // Waits for the previous round to be cleared.
        self.shared.barrier.wait();

        let mut mismatch = None;
        {
            let mut sum = self.shared.sum.lock();
            if sum.is_empty() {
                sum.resize(buf.len(), 0.0);
            }

            if sum.len() == buf.len() {
                sum.iter_mut().zip(buf.iter()).for_each(|(s, g)| *s += g);
            } else {
                mismatch = Some(sum.len());
            }
        }

        self.shared.barrier.wait();

        if mismatch.is_none() {
            let sum = self.shared.sum.lock();
            let n = self.world_size as f32;
            buf.iter_mut().zip(sum.iter()).for_each(|(g, s)| *g = s / n);
        }

        if self.shared.barrier.wait().is_leader() {
            self.shared.sum.lock().clear();
        }

        match mismatch {
            Some(expected) => Err(MlError::ShapeMismatch {
                what: "all-reduce buffer",
                got: buf.len(),
                expected,
            }),
            None => Ok(()),
        }
    }
}

/// Wraps a model so gradients are averaged across a process group before
/// every optimizer update.
///
/// Checkpointing goes through [`ModelBackend::unwrap_model`], so the stored
/// weights are the inner model's, identical on every member.
pub struct DistributedModel<M, G> {
    model: M,
    group: G,
}

impl<M: ModelBackend, G: ProcessGroup> DistributedModel<M, G> {
    pub fn new(model: M, group: G) -> Self {
        Self { model, group }
    }

    pub fn into_inner(self) -> M {
        self.model
    }
}

impl<M: ModelBackend, G: ProcessGroup> ModelBackend for DistributedModel<M, G> {
    fn forward_backward(
        &mut self,
        batch: &[&Instance],
        num_labels: usize,
        loss_scale: f32,
    ) -> Result<f32, MlError> {
        self.model.forward_backward(batch, num_labels, loss_scale)
    }

    fn infer(&mut self, batch: &[&Instance], num_labels: usize) -> Result<ModelOutput, MlError> {
        self.model.infer(batch, num_labels)
    }

    fn params(&mut self) -> Vec<ParamTensor<'_>> {
        self.model.params()
    }

    fn zero_grad(&mut self) {
        self.model.zero_grad();
    }

    fn sync_gradients(&mut self) -> Result<(), MlError> {
        self.model.sync_gradients()?;

        for param in self.model.params() {
            self.group.all_reduce_mean(param.grads)?;
        }

        debug!(rank = self.group.rank(); "gradients averaged");
        Ok(())
    }

    fn unwrap_model(&self) -> &dyn CheckpointModel {
        self.model.unwrap_model()
    }

    fn unwrap_model_mut(&mut self) -> &mut dyn CheckpointModel {
        self.model.unwrap_model_mut()
    }
}
