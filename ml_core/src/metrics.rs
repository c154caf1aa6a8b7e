use std::collections::BTreeMap;

use crate::{Label, MlError, TaskKind};

/// Metric name to value. Ordered so reports are stable.
pub type Metrics = BTreeMap<String, f64>;

/// Predictions collected over a held-out split.
#[derive(Debug, Clone, PartialEq)]
pub enum Predictions {
    /// Arg-max class per instance.
    Classes(Vec<usize>),
    /// Regressed value per instance.
    Values(Vec<f32>),
}

impl Predictions {
    pub fn len(&self) -> usize {
        match self {
            Predictions::Classes(p) => p.len(),
            Predictions::Values(p) => p.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scores predictions against gold labels for one task.
pub trait MetricsEngine: Send + Sync {
    /// # Errors
    /// Returns `MlError::ShapeMismatch` when `predictions` and `labels` differ
    /// in length, or `MlError::InvalidInput` when the prediction kind doesn't
    /// match the task's output mode.
    fn compute(
        &self,
        task: TaskKind,
        predictions: &Predictions,
        labels: &[Label],
    ) -> Result<Metrics, MlError>;
}
