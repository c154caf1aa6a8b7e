use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::Path,
};

use log::info;

use crate::{Result, evaluation::EvaluationResult};

pub const LOSS_VALUES_FILE: &str = "loss_values.txt";
pub const RESULTS_FILE: &str = "results.json";

/// Appends the loss line of one epoch to `output_dir/loss_values.txt`.
///
/// # Errors
/// Returns `SchedulerErr::Io` if the file can't be opened or written.
pub fn append_loss_value(output_dir: &Path, epoch: usize, loss: f64) -> Result<()> {
    fs::create_dir_all(output_dir)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(output_dir.join(LOSS_VALUES_FILE))?;

    writeln!(file, "epoch {epoch} loss {loss}")?;
    Ok(())
}

/// Whether a previous run already finished in `output_dir`.
pub fn results_exist(output_dir: &Path) -> bool {
    output_dir.join(RESULTS_FILE).is_file()
}

/// Writes the final metrics of a run, marking it as complete.
///
/// # Errors
/// Returns `SchedulerErr` if the results can't be serialized or written.
pub fn write_results(output_dir: &Path, results: &EvaluationResult) -> Result<()> {
    fs::create_dir_all(output_dir)?;
    let path = output_dir.join(RESULTS_FILE);
    fs::write(&path, serde_json::to_string_pretty(results)?)?;

    info!("results written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use ml_core::Metrics;

    use super::*;

    #[test]
    fn loss_lines_are_appended() {
        let out = tempfile::tempdir().unwrap();
        append_loss_value(out.path(), 0, 0.5).unwrap();
        append_loss_value(out.path(), 1, 0.25).unwrap();

        let text = fs::read_to_string(out.path().join(LOSS_VALUES_FILE)).unwrap();
        assert_eq!(text, "epoch 0 loss 0.5\nepoch 1 loss 0.25\n");
    }

    #[test]
    fn results_mark_the_run_as_done() {
        let out = tempfile::tempdir().unwrap();
        assert!(!results_exist(out.path()));

        let metrics = Metrics::from([("acc".to_string(), 0.75)]);
        let results = EvaluationResult::from([("rte".to_string(), metrics)]);
        write_results(out.path(), &results).unwrap();

        assert!(results_exist(out.path()));
        let text = fs::read_to_string(out.path().join(RESULTS_FILE)).unwrap();
        let back: EvaluationResult = serde_json::from_str(&text).unwrap();
        assert_eq!(back, results);
    }
}
