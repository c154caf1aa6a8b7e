use std::{fs, path::Path};

use log::warn;
use ml_core::{Example, ExampleReader, MlError, TaskKind};

/// Where a task keeps its fields inside a TSV row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layout {
    has_header: bool,
    text_a: usize,
    text_b: Option<usize>,
    /// `None` means the last column.
    label: Option<usize>,
}

impl Layout {
    const fn new(
        has_header: bool,
        text_a: usize,
        text_b: Option<usize>,
        label: Option<usize>,
    ) -> Self {
        Self {
            has_header,
            text_a,
            text_b,
            label,
        }
    }

    fn of(task: TaskKind) -> Self {
        match task {
            TaskKind::Cola => Self::new(false, 3, None, Some(1)),
            TaskKind::Sst2 => Self::new(true, 0, None, Some(1)),
            TaskKind::Mrpc => Self::new(true, 3, Some(4), Some(0)),
            TaskKind::StsB => Self::new(true, 7, Some(8), None),
            TaskKind::Qqp => Self::new(true, 3, Some(4), Some(5)),
            TaskKind::Mnli => Self::new(true, 8, Some(9), None),
            TaskKind::Qnli | TaskKind::Rte | TaskKind::Wnli => Self::new(true, 1, Some(2), None),
        }
    }

    fn example(&self, guid: String, cols: &[&str]) -> Option<Example> {
        let label = match self.label {
            Some(i) => cols.get(i)?,
            None => cols.last()?,
        };

        let text_b = match self.text_b {
            Some(i) => Some(cols.get(i)?.to_string()),
            None => None,
        };

        Some(Example {
            guid,
            text_a: cols.get(self.text_a)?.to_string(),
            text_b,
            label: label.to_string(),
        })
    }
}

/// Reads GLUE task splits stored as tab-separated files.
///
/// Fields are split on tabs with no quoting. Rows missing a column the task
/// needs are skipped with a warning.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlueTsvReader;

impl GlueTsvReader {
    /// Parses already loaded TSV text.
    pub fn parse(&self, task: TaskKind, set: &str, text: &str) -> Vec<Example> {
        let layout = Layout::of(task);
        let skip = usize::from(layout.has_header);

        text.lines()
            .enumerate()
            .skip(skip)
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(i, line)| {
                let cols: Vec<&str> = line.trim_end_matches('\r').split('\t').collect();
                let example = layout.example(format!("{set}-{i}"), &cols);
                if example.is_none() {
                    warn!(task = task.name(), row = i; "skipping malformed row");
                }
                example
            })
            .collect()
    }
}

impl ExampleReader for GlueTsvReader {
    fn read(&self, task: TaskKind, path: &Path) -> Result<Vec<Example>, MlError> {
        let text = fs::read_to_string(path)?;
        let set = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("examples");

        Ok(self.parse(task, set, &text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cola_has_no_header_and_single_text() {
        let text = "src\t1\t\tThe cat sat.\nsrc\t0\t*\tCat the sat.\n";
        let examples = GlueTsvReader.parse(TaskKind::Cola, "train", text);

        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0].text_a, "The cat sat.");
        assert_eq!(examples[0].text_b, None);
        assert_eq!(examples[1].label, "0");
        assert_eq!(examples[1].guid, "train-1");
    }

    #[test]
    fn rte_uses_the_last_column_as_label() {
        let text = "index\tsentence1\tsentence2\tlabel\n\
            0\tA man runs.\tSomeone moves.\tentailment\n";
        let examples = GlueTsvReader.parse(TaskKind::Rte, "dev", text);

        assert_eq!(examples.len(), 1);
        assert_eq!(examples[0].text_b.as_deref(), Some("Someone moves."));
        assert_eq!(examples[0].label, "entailment");
    }

    #[test]
    fn short_rows_are_skipped() {
        let text = "header\nq1\tq2\n0\tq\tw\t1\t2\t0\n";
        let examples = GlueTsvReader.parse(TaskKind::Mrpc, "train", text);

        assert_eq!(examples.len(), 1);
        assert_eq!(examples[0].text_a, "1");
        assert_eq!(examples[0].text_b.as_deref(), Some("2"));
        assert_eq!(examples[0].label, "0");
    }

    #[test]
    fn reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.tsv");
        fs::write(&path, "sentence\tlabel\ngreat movie\t1\r\n").unwrap();

        let examples = GlueTsvReader.read(TaskKind::Sst2, &path).unwrap();
        assert_eq!(examples[0].label, "1");
        assert_eq!(examples[0].guid, "train-1");
    }
}
