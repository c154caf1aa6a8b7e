use std::collections::BTreeMap;

use ml_core::{MlError, ParamTensor};
use serde::{Deserialize, Serialize};

const BETA1: f32 = 0.9;
const BETA2: f32 = 0.999;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Moments {
    v: Vec<f32>,
    s: Vec<f32>,
}

/// Adam with decoupled weight decay.
///
/// Moments are keyed by tensor name so the state survives a checkpoint
/// independently of parameter ordering. Decay only applies to tensors flagged
/// with `decay`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdamW {
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    epsilon: f32,
    weight_decay: f32,
    moments: BTreeMap<String, Moments>,
}

impl AdamW {
    /// Creates a new `AdamW` optimizer.
    ///
    /// # Arguments
    /// * `weight_decay` - Decoupled decay rate of the decaying parameter group.
    /// * `epsilon` - Denominator term of the update.
    ///
    /// # Returns
    /// A new `AdamW` instance with no accumulated moments.
    pub fn new(weight_decay: f32, epsilon: f32) -> Self {
        Self {
            beta1: BETA1,
            beta2: BETA2,
            beta1_t: 1.,
            beta2_t: 1.,
            epsilon,
            weight_decay,
            moments: BTreeMap::new(),
        }
    }

    /// Applies one update to every parameter tensor.
    ///
    /// # Arguments
    /// * `params` - The model's parameters along with their gradients.
    /// * `lr` - The learning rate of this update.
    ///
    /// # Errors
    /// Returns `MlError::ShapeMismatch` if a tensor changed size between updates.
    pub fn step(&mut self, params: &mut [ParamTensor<'_>], lr: f32) -> Result<(), MlError> {
        let Self {
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            weight_decay: wd,
            ..
        } = *self;

        self.beta1_t *= b1;
        self.beta2_t *= b2;

        let bc1 = 1. - self.beta1_t;
        let bc2 = 1. - self.beta2_t;
        let step_size = lr * (bc2.sqrt() / bc1);

        for param in params.iter_mut() {
            if param.values.len() != param.grads.len() {
                return Err(MlError::ShapeMismatch {
                    what: "gradient",
                    got: param.grads.len(),
                    expected: param.values.len(),
                });
            }

            let len = param.values.len();
            let moments = self
                .moments
                .entry(param.name.to_string())
                .or_insert_with(|| Moments {
                    v: vec![0.; len],
                    s: vec![0.; len],
                });

            if moments.v.len() != len {
                return Err(MlError::ShapeMismatch {
                    what: "optimizer state",
                    got: moments.v.len(),
                    expected: len,
                });
            }

            let decay = if param.decay { lr * wd } else { 0. };

            param
                .values
                .iter_mut()
                .zip(param.grads.iter())
                .zip(moments.v.iter_mut())
                .zip(moments.s.iter_mut())
                .for_each(|(((p, g), v), s)| {
                    *v = b1 * *v + (1. - b1) * g;
                    *s = b2 * *s + (1. - b2) * g.powi(2);
                    *p -= step_size * *v / (s.sqrt() + eps);
                    *p -= decay * *p;
                });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param<'a>(
        name: &'a str,
        values: &'a mut [f32],
        grads: &'a mut [f32],
        decay: bool,
    ) -> ParamTensor<'a> {
        ParamTensor {
            name,
            values,
            grads,
            decay,
        }
    }

    #[test]
    fn first_step_moves_by_the_learning_rate() {
        let mut opt = AdamW::new(0.0, 1e-8);
        let (mut w, mut g) = (vec![1.0, -1.0], vec![0.5, -2.0]);

        opt.step(&mut [param("w", &mut w, &mut g, true)], 0.1).unwrap();

        // Bias-corrected Adam moves each coordinate by ~lr against the gradient sign.
        assert!((w[0] - 0.9).abs() < 1e-4);
        assert!((w[1] + 0.9).abs() < 1e-4);
    }

    #[test]
    fn decay_only_touches_the_decaying_group() {
        let mut opt = AdamW::new(0.5, 1e-8);
        let (mut w, mut gw) = (vec![2.0], vec![0.0]);
        let (mut b, mut gb) = (vec![2.0], vec![0.0]);

        opt.step(
            &mut [
                param("w", &mut w, &mut gw, true),
                param("b", &mut b, &mut gb, false),
            ],
            0.1,
        )
        .unwrap();

        assert!((w[0] - 2.0 * (1.0 - 0.05)).abs() < 1e-6);
        assert_eq!(b[0], 2.0);
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut opt = AdamW::new(0.01, 1e-8);
        let (mut w, mut g) = (vec![1.0; 3], vec![0.1; 3]);
        opt.step(&mut [param("w", &mut w, &mut g, true)], 0.01).unwrap();

        let restored: AdamW = serde_json::from_str(&serde_json::to_string(&opt).unwrap()).unwrap();
        assert_eq!(restored, opt);
    }

    #[test]
    fn resized_tensors_are_rejected() {
        let mut opt = AdamW::new(0.0, 1e-8);
        let (mut w, mut g) = (vec![1.0; 2], vec![0.1; 2]);
        opt.step(&mut [param("w", &mut w, &mut g, true)], 0.01).unwrap();

        let (mut w, mut g) = (vec![1.0; 3], vec![0.1; 3]);
        assert!(opt.step(&mut [param("w", &mut w, &mut g, true)], 0.01).is_err());
    }
}
