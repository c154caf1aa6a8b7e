use ml_core::ParamTensor;

/// Rescales all gradients so their global L2 norm is at most `max_norm`.
///
/// A non-positive `max_norm` disables clipping.
///
/// # Returns
/// The global norm before clipping.
pub fn clip_grad_norm(params: &mut [ParamTensor<'_>], max_norm: f32) -> f32 {
    let norm = params
        .iter()
        .flat_map(|p| p.grads.iter())
        .map(|g| g * g)
        .sum::<f32>()
        .sqrt();

    if max_norm > 0.0 && norm > max_norm {
        let scale = max_norm / (norm + 1e-6);
        params
            .iter_mut()
            .flat_map(|p| p.grads.iter_mut())
            .for_each(|g| *g *= scale);
    }

    norm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clips_to_the_global_norm() {
        let (mut a, mut ga) = (vec![0.0], vec![3.0]);
        let (mut b, mut gb) = (vec![0.0], vec![4.0]);
        let mut params = [
            ParamTensor {
                name: "a",
                values: &mut a,
                grads: &mut ga,
                decay: true,
            },
            ParamTensor {
                name: "b",
                values: &mut b,
                grads: &mut gb,
                decay: false,
            },
        ];

        assert_eq!(clip_grad_norm(&mut params, 1.0), 5.0);
        assert!((params[0].grads[0] - 0.6).abs() < 1e-5);
        assert!((params[1].grads[0] - 0.8).abs() < 1e-5);
    }

    #[test]
    fn small_gradients_are_untouched() {
        let (mut a, mut ga) = (vec![0.0], vec![0.3]);
        let mut params = [ParamTensor {
            name: "a",
            values: &mut a,
            grads: &mut ga,
            decay: true,
        }];
        clip_grad_norm(&mut params, 1.0);
        assert_eq!(params[0].grads[0], 0.3);
    }
}
