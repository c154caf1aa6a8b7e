use std::{collections::BTreeMap, fmt::Write as _, fs, path::Path};

use log::info;
use ml_core::{
    Instance, Label, Metrics, MetricsEngine, ModelBackend, OutputMode, Predictions, TaskDescriptor,
    TaskKind,
};

use crate::{Result, cache::FeatureCache, config::EvalConfig};

/// Metrics per result key (`mnli`, `mnli-mm`, `rte`, ...).
pub type EvaluationResult = BTreeMap<String, Metrics>;

pub const EVAL_RESULTS_FILE: &str = "eval_results.txt";

/// One held-out split, ready for inference.
#[derive(Debug, Clone)]
pub struct EvalSet {
    /// Result key of the split.
    pub key: String,
    pub kind: TaskKind,
    /// Head width, shared by every split of the task.
    pub label_count: usize,
    pub instances: Vec<Instance>,
}

/// Loads every evaluation variant of every task through the feature cache.
///
/// # Errors
/// Returns `SchedulerErr::CacheRegeneration` if a split can't be featurized.
pub fn load_eval_sets<'t>(
    tasks: impl IntoIterator<Item = &'t TaskDescriptor>,
    cache: &FeatureCache<'_>,
) -> Result<Vec<EvalSet>> {
    let mut sets = Vec::new();

    for task in tasks {
        for variant in task.kind.eval_variants() {
            sets.push(EvalSet {
                key: variant.key.to_string(),
                kind: task.kind,
                label_count: task.label_count,
                instances: cache.load_dev(task, variant.key, variant.file)?,
            });
        }
    }

    Ok(sets)
}

/// Runs held-out inference and scores it.
pub struct EvaluationCoordinator<'a> {
    config: &'a EvalConfig,
    metrics: &'a dyn MetricsEngine,
    sets: Vec<EvalSet>,
}

impl<'a> EvaluationCoordinator<'a> {
    pub fn new(config: &'a EvalConfig, metrics: &'a dyn MetricsEngine, sets: Vec<EvalSet>) -> Self {
        Self {
            config,
            metrics,
            sets,
        }
    }

    pub fn sets(&self) -> &[EvalSet] {
        &self.sets
    }

    /// Evaluates `model` on every held-out split, in file order.
    ///
    /// # Args
    /// * `model` - The model to evaluate; gradients are left untouched.
    /// * `prefix` - Sub-directory of the per-split reports, e.g. a checkpoint name.
    ///
    /// # Returns
    /// The metrics of every split under its result key.
    ///
    /// # Errors
    /// Returns `SchedulerErr` if inference, scoring or writing a report fails.
    pub fn evaluate(
        &self,
        model: &mut dyn ModelBackend,
        prefix: Option<&str>,
    ) -> Result<EvaluationResult> {
        let mut result = EvaluationResult::new();

        for set in &self.sets {
            info!(task = set.key.as_str(), instances = set.instances.len(); "running evaluation");
            let metrics = self.evaluate_set(model, set)?;

            if let Some(dir) = &self.config.report_dir {
                let mut dir = dir.join(&set.key);
                if let Some(prefix) = prefix {
                    dir = dir.join(prefix);
                }
                write_report(&dir, &metrics)?;
            }

            result.insert(set.key.clone(), metrics);
        }

        Ok(result)
    }

    fn evaluate_set(&self, model: &mut dyn ModelBackend, set: &EvalSet) -> Result<Metrics> {
        let mut classes = Vec::new();
        let mut values = Vec::new();
        let mut gold: Vec<Label> = Vec::with_capacity(set.instances.len());

        for chunk in set.instances.chunks(self.config.eval_batch_size.get()) {
            let batch: Vec<&Instance> = chunk.iter().collect();
            let output = model.infer(&batch, set.label_count)?;

            for logits in &output.logits {
                match set.kind.output_mode() {
                    OutputMode::Classification => classes.push(argmax(logits)),
                    OutputMode::Regression => values.push(logits.first().copied().unwrap_or(0.0)),
                }
            }
            gold.extend(chunk.iter().map(|instance| instance.label));
        }

        let predictions = match set.kind.output_mode() {
            OutputMode::Classification => Predictions::Classes(classes),
            OutputMode::Regression => Predictions::Values(values),
        };

        Ok(self.metrics.compute(set.kind, &predictions, &gold)?)
    }
}

fn argmax(logits: &[f32]) -> usize {
    logits
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Writes sorted `name = value` lines into `dir/eval_results.txt`.
fn write_report(dir: &Path, metrics: &Metrics) -> Result<()> {
    fs::create_dir_all(dir)?;

    let mut report = String::new();
    for (name, value) in metrics {
        info!("  {name} = {value}");
        let _ = writeln!(report, "{name} = {value}");
    }

    fs::write(dir.join(EVAL_RESULTS_FILE), report)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use ml_core::{CheckpointModel, MlError, ModelOutput, ParamTensor, TaskId};

    use super::*;

    /// Predicts the first token id as the class, or as the value for regression.
    struct EchoModel {
        calls: usize,
    }

    impl CheckpointModel for EchoModel {
        fn save(&self, _dir: &Path) -> std::result::Result<(), MlError> {
            Ok(())
        }

        fn load(&mut self, _dir: &Path) -> std::result::Result<(), MlError> {
            Ok(())
        }
    }

    impl ModelBackend for EchoModel {
        fn forward_backward(
            &mut self,
            _: &[&Instance],
            _: usize,
            _: f32,
        ) -> std::result::Result<f32, MlError> {
            unreachable!("evaluation never trains")
        }

        fn infer(
            &mut self,
            batch: &[&Instance],
            num_labels: usize,
        ) -> std::result::Result<ModelOutput, MlError> {
            self.calls += 1;
            let logits = batch
                .iter()
                .map(|instance| {
                    let mut row = vec![0.0; num_labels];
                    let target = instance.input_ids[0] as usize % num_labels;
                    row[target] = instance.input_ids[0] as f32 + 1.0;
                    row
                })
                .collect();
            Ok(ModelOutput { loss: 0.0, logits })
        }

        fn params(&mut self) -> Vec<ParamTensor<'_>> {
            Vec::new()
        }

        fn zero_grad(&mut self) {}

        fn unwrap_model(&self) -> &dyn CheckpointModel {
            self
        }

        fn unwrap_model_mut(&mut self) -> &mut dyn CheckpointModel {
            self
        }
    }

    struct AccuracyOnly;

    impl MetricsEngine for AccuracyOnly {
        fn compute(
            &self,
            _task: TaskKind,
            predictions: &Predictions,
            labels: &[Label],
        ) -> std::result::Result<Metrics, MlError> {
            let Predictions::Classes(preds) = predictions else {
                return Err(MlError::InvalidInput("classes only"));
            };
            let hits = preds.iter().zip(labels).filter(|(p, l)| l.class() == Some(**p)).count();
            Ok(Metrics::from([("acc".to_string(), hits as f64 / labels.len() as f64)]))
        }
    }

    fn set(key: &str, labels: &[(u32, usize)]) -> EvalSet {
        EvalSet {
            key: key.into(),
            kind: TaskKind::Mnli,
            label_count: 3,
            instances: labels
                .iter()
                .map(|&(tok, class)| Instance {
                    input_ids: vec![tok],
                    attention_mask: vec![1],
                    token_type_ids: None,
                    label: Label::Class(class),
                    task: TaskId(0),
                })
                .collect(),
        }
    }

    #[test]
    fn variants_get_separate_keys_and_reports() {
        let out = tempfile::tempdir().unwrap();
        let config = EvalConfig {
            eval_batch_size: NonZeroUsize::new(2).unwrap(),
            report_dir: Some(out.path().to_path_buf()),
        };
        let sets = vec![
            set("mnli", &[(0, 0), (1, 1), (2, 2)]),
            set("mnli-mm", &[(0, 1), (1, 1)]),
        ];
        let coordinator = EvaluationCoordinator::new(&config, &AccuracyOnly, sets);
        let mut model = EchoModel { calls: 0 };

        let result = coordinator.evaluate(&mut model, Some("checkpoint-4")).unwrap();

        assert_eq!(result["mnli"]["acc"], 1.0);
        assert_eq!(result["mnli-mm"]["acc"], 0.5);
        // 3 instances in batches of 2, then 2 in one batch.
        assert_eq!(model.calls, 3);

        let report_path = out.path().join("mnli-mm/checkpoint-4").join(EVAL_RESULTS_FILE);
        let report = fs::read_to_string(report_path).unwrap();
        assert_eq!(report, "acc = 0.5\n");
    }

    #[test]
    fn argmax_picks_the_largest_logit() {
        assert_eq!(argmax(&[0.1, 2.0, -1.0]), 1);
        assert_eq!(argmax(&[]), 0);
    }
}
