use std::path::Path;

use crate::{Instance, MlError};

/// One named parameter tensor exposed to the optimizer.
///
/// `values` and `grads` always have the same length.
pub struct ParamTensor<'a> {
    pub name: &'a str,
    pub values: &'a mut [f32],
    pub grads: &'a mut [f32],
    /// Whether weight decay applies to this tensor's parameter group.
    pub decay: bool,
}

/// Result of an inference pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOutput {
    /// Mean loss over the batch.
    pub loss: f32,
    /// One row of `num_labels` logits per instance.
    pub logits: Vec<Vec<f32>>,
}

/// The persistable part of a model.
///
/// Wrappers (e.g. a gradient-averaging distributed wrapper) never implement
/// this themselves; they hand out the inner model through
/// [`ModelBackend::unwrap_model`].
pub trait CheckpointModel {
    /// Writes the model weights into `dir`.
    ///
    /// # Errors
    /// Returns `MlError::Io` or `MlError::Serialization` on failure.
    fn save(&self, dir: &Path) -> Result<(), MlError>;

    /// Replaces the model weights with the ones stored in `dir`.
    ///
    /// # Errors
    /// Returns `MlError` if the stored weights are missing or don't fit the model.
    fn load(&mut self, dir: &Path) -> Result<(), MlError>;
}

/// A trainable model shared by every task of a run.
///
/// The training loop treats this trait as a black box: it dispatches
/// instances together with the active task's label cardinality and receives
/// a loss, while gradients accumulate inside the backend until the loop
/// applies an update through [`ModelBackend::params`].
pub trait ModelBackend: Send {
    /// Runs a forward and backward pass over `batch`.
    ///
    /// Gradients of `loss * loss_scale` are *added* to the current gradient
    /// buffers, enabling sub-batch aggregation and gradient accumulation.
    ///
    /// # Args
    /// * `batch` - Instances sharing one label cardinality.
    /// * `num_labels` - Width of the prediction head to use.
    /// * `loss_scale` - Factor applied to the loss before backpropagation.
    ///
    /// # Returns
    /// The unscaled mean loss over `batch`.
    ///
    /// # Errors
    /// Returns `MlError` on shape violations or labels outside the head.
    fn forward_backward(
        &mut self,
        batch: &[&Instance],
        num_labels: usize,
        loss_scale: f32,
    ) -> Result<f32, MlError>;

    /// Runs inference over `batch` without touching gradients.
    ///
    /// # Errors
    /// Returns `MlError` on shape violations.
    fn infer(&mut self, batch: &[&Instance], num_labels: usize) -> Result<ModelOutput, MlError>;

    /// Exposes every parameter tensor with its gradient buffer.
    fn params(&mut self) -> Vec<ParamTensor<'_>>;

    /// Resets every gradient buffer to zero.
    fn zero_grad(&mut self);

    /// Hook invoked right before an optimizer update.
    ///
    /// Data-parallel wrappers average gradients across processes here.
    ///
    /// # Errors
    /// Returns `MlError` if the collective operation fails.
    fn sync_gradients(&mut self) -> Result<(), MlError> {
        Ok(())
    }

    /// Returns the underlying model for checkpointing.
    fn unwrap_model(&self) -> &dyn CheckpointModel;

    /// Returns the underlying model for restoring a checkpoint.
    fn unwrap_model_mut(&mut self) -> &mut dyn CheckpointModel;
}

impl<T: ModelBackend + ?Sized> ModelBackend for Box<T> {
    fn forward_backward(
        &mut self,
        batch: &[&Instance],
        num_labels: usize,
        loss_scale: f32,
    ) -> Result<f32, MlError> {
        (**self).forward_backward(batch, num_labels, loss_scale)
    }

    fn infer(&mut self, batch: &[&Instance], num_labels: usize) -> Result<ModelOutput, MlError> {
        (**self).infer(batch, num_labels)
    }

    fn params(&mut self) -> Vec<ParamTensor<'_>> {
        (**self).params()
    }

    fn zero_grad(&mut self) {
        (**self).zero_grad()
    }

    fn sync_gradients(&mut self) -> Result<(), MlError> {
        (**self).sync_gradients()
    }

    fn unwrap_model(&self) -> &dyn CheckpointModel {
        (**self).unwrap_model()
    }

    fn unwrap_model_mut(&mut self) -> &mut dyn CheckpointModel {
        (**self).unwrap_model_mut()
    }
}
