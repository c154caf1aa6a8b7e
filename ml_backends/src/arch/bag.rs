use std::{collections::BTreeMap, fs, path::Path};

use log::debug;
use ml_core::{CheckpointModel, Instance, Label, MlError, ModelBackend, ModelOutput, ParamTensor};
use ndarray::{Array2, ArrayView2, ArrayViewMut2, Axis, linalg};
use rand::{SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal};
use safetensors::{
    SafeTensors,
    tensor::{Dtype, TensorView},
};
use serde::{Deserialize, Serialize};

use super::loss::{CrossEntropy, LossFn, Mse};

pub const WEIGHTS_FILE: &str = "model.safetensors";
pub const CONFIG_FILE: &str = "config.json";

const INIT_STD: f32 = 0.02;

/// Shape of a [`BagOfEmbeddings`] model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BagConfig {
    pub vocab_size: usize,
    pub dim: usize,
    /// One prediction head per distinct label cardinality.
    pub head_sizes: Vec<usize>,
}

impl BagConfig {
    pub fn new(vocab_size: usize, dim: usize, head_sizes: impl IntoIterator<Item = usize>) -> Self {
        let mut head_sizes: Vec<_> = head_sizes.into_iter().collect();
        head_sizes.sort_unstable();
        head_sizes.dedup();

        Self {
            vocab_size,
            dim,
            head_sizes,
        }
    }
}

struct Tensor {
    name: String,
    shape: (usize, usize),
    values: Vec<f32>,
    grads: Vec<f32>,
    decay: bool,
}

impl Tensor {
    fn new<F: FnMut() -> f32>(name: String, shape: (usize, usize), decay: bool, init: F) -> Self {
        let len = shape.0 * shape.1;

        Self {
            name,
            shape,
            values: std::iter::repeat_with(init).take(len).collect(),
            grads: vec![0.0; len],
            decay,
        }
    }

    fn view(&self) -> Result<ArrayView2<'_, f32>, MlError> {
        ArrayView2::from_shape(self.shape, &self.values).map_err(|_| BAD_SHAPE)
    }

    fn grad_view_mut(&mut self) -> Result<ArrayViewMut2<'_, f32>, MlError> {
        ArrayViewMut2::from_shape(self.shape, &mut self.grads).map_err(|_| BAD_SHAPE)
    }

    fn as_param(&mut self) -> ParamTensor<'_> {
        ParamTensor {
            name: self.name.as_str(),
            values: self.values.as_mut_slice(),
            grads: self.grads.as_mut_slice(),
            decay: self.decay,
        }
    }
}

const BAD_SHAPE: MlError = MlError::InvalidInput("tensor shape does not match its buffer");

struct Head {
    weight: Tensor,
    bias: Tensor,
}

/// Mean-pooled token embeddings followed by one linear head per label
/// cardinality.
///
/// Heads with a single output are trained with squared error, wider heads
/// with softmax cross-entropy.
pub struct BagOfEmbeddings {
    config: BagConfig,
    embeddings: Tensor,
    heads: BTreeMap<usize, Head>,
}

impl BagOfEmbeddings {
    /// Creates a randomly initialized model.
    ///
    /// # Arguments
    /// * `config` - Vocabulary size, embedding width and head sizes.
    /// * `seed` - Seed for the weight initialization.
    ///
    /// # Returns
    /// A new model or an error if the configuration is degenerate.
    pub fn new(config: BagConfig, seed: u64) -> Result<Self, MlError> {
        if config.vocab_size == 0 || config.dim == 0 {
            return Err(MlError::InvalidInput("vocab_size and dim must be positive"));
        }
        if config.head_sizes.is_empty() || config.head_sizes.contains(&0) {
            return Err(MlError::InvalidInput("every head needs at least one output"));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let normal =
            Normal::new(0.0, INIT_STD).map_err(|_| MlError::InvalidInput("invalid init std"))?;
        let mut sample = || normal.sample(&mut rng);

        let embeddings = Tensor::new(
            "embeddings.weight".into(),
            (config.vocab_size, config.dim),
            true,
            &mut sample,
        );

        let heads = config
            .head_sizes
            .iter()
            .map(|&n| {
                let weight =
                    Tensor::new(format!("head_{n}.weight"), (config.dim, n), true, &mut sample);
                let bias = Tensor::new(format!("head_{n}.bias"), (1, n), false, || 0.0);
                (n, Head { weight, bias })
            })
            .collect();

        Ok(Self {
            config,
            embeddings,
            heads,
        })
    }

    /// Builds a model from a directory written by [`CheckpointModel::save`].
    ///
    /// # Errors
    /// Returns `MlError` if the config or weights are missing or inconsistent.
    pub fn from_pretrained(dir: &Path) -> Result<Self, MlError> {
        let config: BagConfig = serde_json::from_str(&fs::read_to_string(dir.join(CONFIG_FILE))?)?;
        let mut model = Self::new(config, 0)?;
        model.load(dir)?;
        Ok(model)
    }

    pub fn config(&self) -> &BagConfig {
        &self.config
    }

    fn tensors(&self) -> Vec<&Tensor> {
        std::iter::once(&self.embeddings)
            .chain(self.heads.values().flat_map(|h| [&h.weight, &h.bias]))
            .collect()
    }

    fn tensors_mut(&mut self) -> Vec<&mut Tensor> {
        std::iter::once(&mut self.embeddings)
            .chain(self.heads.values_mut().flat_map(|h| [&mut h.weight, &mut h.bias]))
            .collect()
    }

    /// Mean-pools the attended token embeddings of every instance.
    ///
    /// # Returns
    /// The pooled matrix and the number of attended tokens per row.
    fn pool(&self, batch: &[&Instance]) -> Result<(Array2<f32>, Vec<f32>), MlError> {
        let dim = self.config.dim;
        let mut pooled = Array2::<f32>::zeros((batch.len(), dim));
        let mut counts = Vec::with_capacity(batch.len());

        for (i, instance) in batch.iter().enumerate() {
            if instance.attention_mask.len() != instance.input_ids.len() {
                return Err(MlError::ShapeMismatch {
                    what: "attention mask",
                    got: instance.attention_mask.len(),
                    expected: instance.input_ids.len(),
                });
            }

            let mut row = pooled.row_mut(i);
            let mut count = 0;

            for tok in attended(instance) {
                let tok = self.check_token(tok)?;
                let embedding = &self.embeddings.values[tok * dim..(tok + 1) * dim];
                row.iter_mut().zip(embedding).for_each(|(r, e)| *r += e);
                count += 1;
            }

            let count = count.max(1) as f32;
            row.mapv_inplace(|x| x / count);
            counts.push(count);
        }

        Ok((pooled, counts))
    }

    fn check_token(&self, tok: u32) -> Result<usize, MlError> {
        let tok = tok as usize;
        if tok >= self.config.vocab_size {
            return Err(MlError::ShapeMismatch {
                what: "token id",
                got: tok,
                expected: self.config.vocab_size,
            });
        }

        Ok(tok)
    }

    fn head(&self, num_labels: usize) -> Result<&Head, MlError> {
        self.heads
            .get(&num_labels)
            .ok_or(MlError::InvalidInput("no prediction head for this label count"))
    }

    fn logits(&self, pooled: &Array2<f32>, num_labels: usize) -> Result<Array2<f32>, MlError> {
        let head = self.head(num_labels)?;
        let mut logits = pooled.dot(&head.weight.view()?);
        logits += &head.bias.view()?;
        Ok(logits)
    }
}

fn attended(instance: &Instance) -> impl Iterator<Item = u32> + '_ {
    instance
        .input_ids
        .iter()
        .zip(&instance.attention_mask)
        .filter(|&(_, &m)| m != 0)
        .map(|(&tok, _)| tok)
}

fn loss_fn(num_labels: usize) -> &'static dyn LossFn {
    if num_labels == 1 { &Mse } else { &CrossEntropy }
}

fn labels_of(batch: &[&Instance]) -> Vec<Label> {
    batch.iter().map(|instance| instance.label).collect()
}

impl ModelBackend for BagOfEmbeddings {
    fn forward_backward(
        &mut self,
        batch: &[&Instance],
        num_labels: usize,
        loss_scale: f32,
    ) -> Result<f32, MlError> {
        if batch.is_empty() {
            return Err(MlError::InvalidInput("empty batch"));
        }

        let (pooled, counts) = self.pool(batch)?;
        let logits = self.logits(&pooled, num_labels)?;
        let labels = labels_of(batch);
        let loss_fn = loss_fn(num_labels);

        let loss = loss_fn.loss(logits.view(), &labels)?;
        let d = loss_fn.loss_prime(logits.view(), &labels)? * loss_scale;

        let dim = self.config.dim;
        let head = self
            .heads
            .get_mut(&num_labels)
            .ok_or(MlError::InvalidInput("no prediction head for this label count"))?;

        let mut dw = head.weight.grad_view_mut()?;
        linalg::general_mat_mul(1.0, &pooled.t(), &d, 1.0, &mut dw);

        let mut db = head.bias.grad_view_mut()?;
        db += &d.sum_axis(Axis(0)).insert_axis(Axis(0));

        let d_pooled = d.dot(&head.weight.view()?.t());

        for ((instance, count), d_row) in batch.iter().zip(&counts).zip(d_pooled.rows()) {
            for tok in attended(instance) {
                let tok = tok as usize;
                let grads = &mut self.embeddings.grads[tok * dim..(tok + 1) * dim];
                grads.iter_mut().zip(d_row).for_each(|(g, d)| *g += d / count);
            }
        }

        debug!(batch = batch.len(), num_labels = num_labels; "forward/backward pass done");
        Ok(loss)
    }

    fn infer(&mut self, batch: &[&Instance], num_labels: usize) -> Result<ModelOutput, MlError> {
        let (pooled, _) = self.pool(batch)?;
        let logits = self.logits(&pooled, num_labels)?;
        let labels = labels_of(batch);

        let loss = if batch.is_empty() {
            0.0
        } else {
            loss_fn(num_labels).loss(logits.view(), &labels)?
        };

        Ok(ModelOutput {
            loss,
            logits: logits.rows().into_iter().map(|row| row.to_vec()).collect(),
        })
    }

    fn params(&mut self) -> Vec<ParamTensor<'_>> {
        self.tensors_mut().into_iter().map(Tensor::as_param).collect()
    }

    fn zero_grad(&mut self) {
        for tensor in self.tensors_mut() {
            tensor.grads.fill(0.0);
        }
    }

    fn unwrap_model(&self) -> &dyn CheckpointModel {
        self
    }

    fn unwrap_model_mut(&mut self) -> &mut dyn CheckpointModel {
        self
    }
}

fn safetensors_err<E: std::fmt::Display>(e: E) -> MlError {
    MlError::Serialization(e.to_string())
}

impl CheckpointModel for BagOfEmbeddings {
    fn save(&self, dir: &Path) -> Result<(), MlError> {
        fs::create_dir_all(dir)?;

        let views = self
            .tensors()
            .into_iter()
            .map(|t| {
                let bytes: &[u8] = bytemuck::cast_slice(&t.values);
                let view = TensorView::new(Dtype::F32, vec![t.shape.0, t.shape.1], bytes)
                    .map_err(safetensors_err)?;
                Ok((t.name.clone(), view))
            })
            .collect::<Result<Vec<_>, MlError>>()?;

        safetensors::serialize_to_file(views, &None, &dir.join(WEIGHTS_FILE))
            .map_err(safetensors_err)?;
        fs::write(dir.join(CONFIG_FILE), serde_json::to_string_pretty(&self.config)?)?;
        Ok(())
    }

    fn load(&mut self, dir: &Path) -> Result<(), MlError> {
        let bytes = fs::read(dir.join(WEIGHTS_FILE))?;
        let stored = SafeTensors::deserialize(&bytes).map_err(safetensors_err)?;

        for tensor in self.tensors_mut() {
            let view = stored.tensor(&tensor.name).map_err(safetensors_err)?;

            if view.dtype() != Dtype::F32 {
                return Err(MlError::InvalidInput("stored tensor is not f32"));
            }

            let (rows, cols) = tensor.shape;
            if view.shape() != [rows, cols] {
                return Err(MlError::ShapeMismatch {
                    what: "stored tensor",
                    got: view.shape().iter().product(),
                    expected: rows * cols,
                });
            }

            tensor.values = bytemuck::pod_collect_to_vec(view.data());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ml_core::TaskId;

    use super::*;

    fn instance(ids: &[u32], label: Label) -> Instance {
        Instance {
            input_ids: ids.to_vec(),
            attention_mask: ids.iter().map(|&t| u8::from(t != 0)).collect(),
            token_type_ids: None,
            label,
            task: TaskId(0),
        }
    }

    fn model() -> BagOfEmbeddings {
        BagOfEmbeddings::new(BagConfig::new(16, 4, [2, 1]), 7).unwrap()
    }

    #[test]
    fn gradients_accumulate_across_calls() {
        let mut m = model();
        let a = instance(&[1, 5, 0], Label::Class(1));

        m.forward_backward(&[&a], 2, 1.0).unwrap();
        let once: Vec<f32> = m.params()[0].grads.to_vec();
        m.forward_backward(&[&a], 2, 1.0).unwrap();
        let twice: Vec<f32> = m.params()[0].grads.to_vec();

        for (o, t) in once.iter().zip(&twice) {
            assert!((2.0 * o - t).abs() < 1e-6);
        }

        m.zero_grad();
        assert!(m.params().iter().all(|p| p.grads.iter().all(|&g| g == 0.0)));
    }

    #[test]
    fn loss_scale_scales_gradients_not_the_returned_loss() {
        let mut full = model();
        let mut half = model();
        let a = instance(&[2, 3], Label::Value(0.5));

        let l1 = full.forward_backward(&[&a], 1, 1.0).unwrap();
        let l2 = half.forward_backward(&[&a], 1, 0.5).unwrap();
        assert_eq!(l1, l2);

        let g1 = full.params()[0].grads.to_vec();
        let g2 = half.params()[0].grads.to_vec();
        for (a, b) in g1.iter().zip(&g2) {
            assert!((a * 0.5 - b).abs() < 1e-6);
        }
    }

    #[test]
    fn a_few_sgd_steps_reduce_the_loss() {
        let mut m = model();
        let a = instance(&[1, 2, 3], Label::Class(0));
        let b = instance(&[4, 5, 6], Label::Class(1));
        let batch = [&a, &b];

        let before = m.infer(&batch, 2).unwrap().loss;
        for _ in 0..50 {
            m.zero_grad();
            m.forward_backward(&batch, 2, 1.0).unwrap();
            for p in m.params() {
                p.values.iter_mut().zip(p.grads.iter()).for_each(|(v, g)| *v -= 0.5 * g);
            }
        }
        let after = m.infer(&batch, 2).unwrap().loss;

        assert!(after < before, "loss went from {before} to {after}");
    }

    #[test]
    fn out_of_vocabulary_tokens_are_rejected() {
        let mut m = model();
        let a = instance(&[99], Label::Class(0));
        assert!(m.forward_backward(&[&a], 2, 1.0).is_err());
    }

    #[test]
    fn unknown_head_is_rejected() {
        let mut m = model();
        let a = instance(&[1], Label::Class(0));
        assert!(m.infer(&[&a], 3).is_err());
    }

    #[test]
    fn save_then_from_pretrained_restores_logits() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = model();
        let a = instance(&[1, 2], Label::Class(0));

        m.save(dir.path()).unwrap();
        let mut restored = BagOfEmbeddings::from_pretrained(dir.path()).unwrap();

        assert_eq!(restored.config(), m.config());
        assert_eq!(
            restored.infer(&[&a], 2).unwrap().logits,
            m.infer(&[&a], 2).unwrap().logits
        );
    }
}
