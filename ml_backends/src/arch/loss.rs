use ml_core::{Label, MlError};
use ndarray::{Array2, ArrayView2, Axis};

/// A loss over a batch of logits and gold labels.
pub trait LossFn {
    /// Returns the mean loss over the batch.
    fn loss(&self, logits: ArrayView2<f32>, labels: &[Label]) -> Result<f32, MlError>;

    /// Returns the derivative of the mean loss with respect to `logits`.
    fn loss_prime(&self, logits: ArrayView2<f32>, labels: &[Label]) -> Result<Array2<f32>, MlError>;
}

/// Softmax cross-entropy for classification heads.
#[derive(Default, Clone, Copy)]
pub struct CrossEntropy;

impl CrossEntropy {
    /// Returns a new `CrossEntropy`.
    pub fn new() -> Self {
        Self
    }

    fn targets(logits: ArrayView2<f32>, labels: &[Label]) -> Result<Vec<usize>, MlError> {
        check_rows(logits, labels)?;
        let width = logits.ncols();

        labels
            .iter()
            .map(|label| match label.class() {
                Some(class) if class < width => Ok(class),
                Some(class) => Err(MlError::ShapeMismatch {
                    what: "class label",
                    got: class,
                    expected: width,
                }),
                None => Err(MlError::InvalidInput(
                    "regression label given to a classification head",
                )),
            })
            .collect()
    }
}

/// Row-wise softmax, shifted by the row maximum.
pub fn softmax(logits: ArrayView2<f32>) -> Array2<f32> {
    let mut probs = logits.to_owned();

    for mut row in probs.axis_iter_mut(Axis(0)) {
        let max = row.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
        row.mapv_inplace(|x| (x - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|x| x / sum);
    }

    probs
}

impl LossFn for CrossEntropy {
    fn loss(&self, logits: ArrayView2<f32>, labels: &[Label]) -> Result<f32, MlError> {
        let targets = Self::targets(logits, labels)?;
        let probs = softmax(logits);

        let total: f32 = targets
            .iter()
            .enumerate()
            .map(|(i, &t)| -probs[(i, t)].max(f32::MIN_POSITIVE).ln())
            .sum();

        Ok(total / targets.len().max(1) as f32)
    }

    fn loss_prime(
        &self,
        logits: ArrayView2<f32>,
        labels: &[Label],
    ) -> Result<Array2<f32>, MlError> {
        let targets = Self::targets(logits, labels)?;
        let mut d = softmax(logits);

        for (i, &t) in targets.iter().enumerate() {
            d[(i, t)] -= 1.0;
        }

        d /= targets.len().max(1) as f32;
        Ok(d)
    }
}

/// Mean squared error loss function for single-output regression heads.
#[derive(Default, Clone, Copy)]
pub struct Mse;

impl Mse {
    /// Returns a new `Mse`.
    pub fn new() -> Self {
        Self
    }
}

impl LossFn for Mse {
    fn loss(&self, logits: ArrayView2<f32>, labels: &[Label]) -> Result<f32, MlError> {
        check_rows(logits, labels)?;

        let total: f32 = logits
            .column(0)
            .iter()
            .zip(labels)
            .map(|(y_pred, y)| (y_pred - y.value()).powi(2))
            .sum();

        Ok(total / labels.len().max(1) as f32)
    }

    fn loss_prime(
        &self,
        logits: ArrayView2<f32>,
        labels: &[Label],
    ) -> Result<Array2<f32>, MlError> {
        check_rows(logits, labels)?;
        let n = labels.len().max(1) as f32;
        let mut d = Array2::<f32>::zeros(logits.raw_dim());

        for (i, y) in labels.iter().enumerate() {
            d[(i, 0)] = (logits[(i, 0)] - y.value()) * (2.0 / n);
        }

        Ok(d)
    }
}

fn check_rows(logits: ArrayView2<f32>, labels: &[Label]) -> Result<(), MlError> {
    if logits.nrows() != labels.len() {
        return Err(MlError::ShapeMismatch {
            what: "labels",
            got: labels.len(),
            expected: logits.nrows(),
        });
    }

    Ok(())
}
