use ml_core::{Label, Metrics, MetricsEngine, MlError, OutputMode, Predictions, TaskKind};

/// The GLUE scoring rules.
///
/// * `cola`: Matthews correlation (`mcc`).
/// * `mrpc`, `qqp`: accuracy, F1 of the positive class and their mean.
/// * `sts-b`: Pearson, Spearman and their mean.
/// * everything else: accuracy.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlueMetrics;

impl MetricsEngine for GlueMetrics {
    fn compute(
        &self,
        task: TaskKind,
        predictions: &Predictions,
        labels: &[Label],
    ) -> Result<Metrics, MlError> {
        if predictions.len() != labels.len() {
            return Err(MlError::ShapeMismatch {
                what: "predictions",
                got: predictions.len(),
                expected: labels.len(),
            });
        }

        let mut metrics = Metrics::new();

        match (task.output_mode(), predictions) {
            (OutputMode::Classification, Predictions::Classes(preds)) => {
                let gold = labels
                    .iter()
                    .map(|l| l.class().ok_or(MlError::InvalidInput("expected class labels")))
                    .collect::<Result<Vec<_>, _>>()?;

                match task {
                    TaskKind::Cola => {
                        metrics.insert("mcc".into(), matthews(preds, &gold));
                    }
                    TaskKind::Mrpc | TaskKind::Qqp => {
                        let acc = accuracy(preds, &gold);
                        let f1 = f1(preds, &gold);
                        metrics.insert("acc".into(), acc);
                        metrics.insert("f1".into(), f1);
                        metrics.insert("acc_and_f1".into(), (acc + f1) / 2.0);
                    }
                    _ => {
                        metrics.insert("acc".into(), accuracy(preds, &gold));
                    }
                }
            }
            (OutputMode::Regression, Predictions::Values(preds)) => {
                let preds: Vec<f64> = preds.iter().map(|&p| f64::from(p)).collect();
                let gold: Vec<f64> = labels.iter().map(|l| f64::from(l.value())).collect();
                let pearson_r = pearson(&preds, &gold);
                let spearman_r = pearson(&ranks(&preds), &ranks(&gold));
                metrics.insert("pearson".into(), pearson_r);
                metrics.insert("spearmanr".into(), spearman_r);
                metrics.insert("corr".into(), (pearson_r + spearman_r) / 2.0);
            }
            _ => {
                return Err(MlError::InvalidInput(
                    "prediction kind does not match the task output mode",
                ));
            }
        }

        Ok(metrics)
    }
}

fn accuracy(preds: &[usize], gold: &[usize]) -> f64 {
    if gold.is_empty() {
        return 0.0;
    }

    let hits = preds.iter().zip(gold).filter(|(p, g)| p == g).count();
    hits as f64 / gold.len() as f64
}

/// Confusion counts for class 1 as the positive class: `(tp, tn, fp, fn)`.
fn confusion(preds: &[usize], gold: &[usize]) -> (f64, f64, f64, f64) {
    preds
        .iter()
        .zip(gold)
        .fold((0.0, 0.0, 0.0, 0.0), |(tp, tn, fp, fne), (&p, &g)| {
            match (p == 1, g == 1) {
                (true, true) => (tp + 1.0, tn, fp, fne),
                (false, false) => (tp, tn + 1.0, fp, fne),
                (true, false) => (tp, tn, fp + 1.0, fne),
                (false, true) => (tp, tn, fp, fne + 1.0),
            }
        })
}

fn f1(preds: &[usize], gold: &[usize]) -> f64 {
    let (tp, _, fp, fne) = confusion(preds, gold);
    let denom = 2.0 * tp + fp + fne;
    if denom == 0.0 { 0.0 } else { 2.0 * tp / denom }
}

fn matthews(preds: &[usize], gold: &[usize]) -> f64 {
    let (tp, tn, fp, fne) = confusion(preds, gold);
    let denom = ((tp + fp) * (tp + fne) * (tn + fp) * (tn + fne)).sqrt();
    if denom == 0.0 { 0.0 } else { (tp * tn - fp * fne) / denom }
}

fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len() as f64;
    if n == 0.0 {
        return 0.0;
    }

    let mx = x.iter().sum::<f64>() / n;
    let my = y.iter().sum::<f64>() / n;

    let (cov, vx, vy) = x.iter().zip(y).fold((0.0, 0.0, 0.0), |(c, vx, vy), (a, b)| {
        let (da, db) = (a - mx, b - my);
        (c + da * db, vx + da * da, vy + db * db)
    });

    let denom = (vx * vy).sqrt();
    if denom == 0.0 { 0.0 } else { cov / denom }
}

/// Fractional ranks, ties sharing the mean of their positions.
fn ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }

        let rank = (start + end + 1) as f64 / 2.0;
        for &i in &order[start..end] {
            ranks[i] = rank;
        }
        start = end;
    }

    ranks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes(v: &[usize]) -> Vec<Label> {
        v.iter().map(|&c| Label::Class(c)).collect()
    }

    #[test]
    fn cola_reports_mcc() {
        let m = GlueMetrics
            .compute(
                TaskKind::Cola,
                &Predictions::Classes(vec![1, 0, 1, 0]),
                &classes(&[1, 0, 1, 0]),
            )
            .unwrap();
        assert_eq!(m.keys().collect::<Vec<_>>(), vec!["mcc"]);
        assert!((m["mcc"] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn mrpc_reports_acc_f1_and_their_mean() {
        let m = GlueMetrics
            .compute(
                TaskKind::Mrpc,
                &Predictions::Classes(vec![1, 1, 0, 0]),
                &classes(&[1, 0, 0, 0]),
            )
            .unwrap();
        assert!((m["acc"] - 0.75).abs() < 1e-12);
        assert!((m["f1"] - 2.0 / 3.0).abs() < 1e-12);
        assert!((m["acc_and_f1"] - (0.75 + 2.0 / 3.0) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn stsb_reports_correlations() {
        let labels = [1.0, 2.0, 3.0, 4.0].map(Label::Value);
        let m = GlueMetrics
            .compute(
                TaskKind::StsB,
                &Predictions::Values(vec![10.0, 20.0, 30.0, 45.0]),
                &labels,
            )
            .unwrap();
        assert!((m["spearmanr"] - 1.0).abs() < 1e-12);
        assert!(m["pearson"] > 0.98);
        assert!((m["corr"] - (m["pearson"] + m["spearmanr"]) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn ties_share_their_mean_rank() {
        assert_eq!(ranks(&[3.0, 1.0, 3.0]), vec![2.5, 1.0, 2.5]);
    }

    #[test]
    fn mismatched_kinds_and_lengths_are_rejected() {
        let preds = Predictions::Values(vec![0.0]);
        let err = GlueMetrics.compute(TaskKind::Rte, &preds, &classes(&[0]));
        assert!(matches!(err, Err(MlError::InvalidInput(_))));

        let preds = Predictions::Classes(vec![0]);
        let err = GlueMetrics.compute(TaskKind::Rte, &preds, &classes(&[0, 1]));
        assert!(matches!(err, Err(MlError::ShapeMismatch { .. })));
    }
}
