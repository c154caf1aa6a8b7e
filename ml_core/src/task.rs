use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

/// Whether a task predicts a class index or a real value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    Classification,
    Regression,
}

/// A held-out split of a task, evaluated under its own result key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalVariant {
    /// Result key, e.g. `mnli` or `mnli-mm`.
    pub key: &'static str,
    /// File name of the split inside the task's data directory.
    pub file: &'static str,
}

const DEV: &str = "dev.tsv";

/// The closed set of tasks a run may train on.
///
/// Task names are resolved once, at configuration time, into one of these
/// variants; everything downstream dispatches on the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskKind {
    #[serde(rename = "cola")]
    Cola,
    #[serde(rename = "sst-2")]
    Sst2,
    #[serde(rename = "mrpc")]
    Mrpc,
    #[serde(rename = "sts-b")]
    StsB,
    #[serde(rename = "qqp")]
    Qqp,
    #[serde(rename = "mnli")]
    Mnli,
    #[serde(rename = "qnli")]
    Qnli,
    #[serde(rename = "rte")]
    Rte,
    #[serde(rename = "wnli")]
    Wnli,
}

impl TaskKind {
    pub const ALL: [TaskKind; 9] = [
        TaskKind::Cola,
        TaskKind::Sst2,
        TaskKind::Mrpc,
        TaskKind::StsB,
        TaskKind::Qqp,
        TaskKind::Mnli,
        TaskKind::Qnli,
        TaskKind::Rte,
        TaskKind::Wnli,
    ];

    /// Returns the canonical lowercase task name.
    pub fn name(self) -> &'static str {
        match self {
            TaskKind::Cola => "cola",
            TaskKind::Sst2 => "sst-2",
            TaskKind::Mrpc => "mrpc",
            TaskKind::StsB => "sts-b",
            TaskKind::Qqp => "qqp",
            TaskKind::Mnli => "mnli",
            TaskKind::Qnli => "qnli",
            TaskKind::Rte => "rte",
            TaskKind::Wnli => "wnli",
        }
    }

    /// Returns the label vocabulary. Regression tasks have none.
    pub fn labels(self) -> &'static [&'static str] {
        match self {
            TaskKind::Cola | TaskKind::Sst2 | TaskKind::Mrpc | TaskKind::Qqp | TaskKind::Wnli => {
                &["0", "1"]
            }
            TaskKind::StsB => &[],
            TaskKind::Mnli => &["contradiction", "entailment", "neutral"],
            TaskKind::Qnli | TaskKind::Rte => &["entailment", "not_entailment"],
        }
    }

    pub fn output_mode(self) -> OutputMode {
        match self {
            TaskKind::StsB => OutputMode::Regression,
            _ => OutputMode::Classification,
        }
    }

    /// Returns the width of the prediction head for this task.
    ///
    /// Regression tasks use a single output.
    pub fn label_count(self) -> usize {
        match self.output_mode() {
            OutputMode::Regression => 1,
            OutputMode::Classification => self.labels().len(),
        }
    }

    /// Returns the held-out splits evaluated for this task.
    pub fn eval_variants(self) -> &'static [EvalVariant] {
        match self {
            TaskKind::Mnli => &[
                EvalVariant {
                    key: "mnli",
                    file: "dev_matched.tsv",
                },
                EvalVariant {
                    key: "mnli-mm",
                    file: "dev_mismatched.tsv",
                },
            ],
            TaskKind::Cola => &[EvalVariant {
                key: "cola",
                file: DEV,
            }],
            TaskKind::Sst2 => &[EvalVariant {
                key: "sst-2",
                file: DEV,
            }],
            TaskKind::Mrpc => &[EvalVariant {
                key: "mrpc",
                file: DEV,
            }],
            TaskKind::StsB => &[EvalVariant {
                key: "sts-b",
                file: DEV,
            }],
            TaskKind::Qqp => &[EvalVariant {
                key: "qqp",
                file: DEV,
            }],
            TaskKind::Qnli => &[EvalVariant {
                key: "qnli",
                file: DEV,
            }],
            TaskKind::Rte => &[EvalVariant {
                key: "rte",
                file: DEV,
            }],
            TaskKind::Wnli => &[EvalVariant {
                key: "wnli",
                file: DEV,
            }],
        }
    }

    /// Returns the metric compared against the task's baseline score.
    pub fn primary_metric(self) -> &'static str {
        match self {
            TaskKind::Cola => "mcc",
            TaskKind::Mrpc | TaskKind::Qqp => "acc_and_f1",
            TaskKind::StsB => "corr",
            _ => "acc",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returned when a task name is not part of the catalogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTask(pub String);

impl fmt::Display for UnknownTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task not found: {}", self.0)
    }
}

impl std::error::Error for UnknownTask {}

impl FromStr for TaskKind {
    type Err = UnknownTask;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        TaskKind::ALL
            .into_iter()
            .find(|kind| kind.name() == lower)
            .ok_or(UnknownTask(s.to_string()))
    }
}

/// Position of a task inside the run's task list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub usize);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Immutable description of one task taking part in a run.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDescriptor {
    pub id: TaskId,
    pub kind: TaskKind,
    pub label_count: usize,
    pub data_dir: PathBuf,
    /// Single-task reference score, only used by the dynamic sampling policy.
    pub baseline_score: Option<f64>,
}

impl TaskDescriptor {
    pub fn new(id: TaskId, kind: TaskKind, data_dir: PathBuf, baseline_score: Option<f64>) -> Self {
        Self {
            id,
            kind,
            label_count: kind.label_count(),
            data_dir,
            baseline_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for kind in TaskKind::ALL {
            assert_eq!(kind.name().parse::<TaskKind>(), Ok(kind));
        }
        assert_eq!("SST-2".parse::<TaskKind>(), Ok(TaskKind::Sst2));
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert_eq!(
            "mnli-mm".parse::<TaskKind>(),
            Err(UnknownTask("mnli-mm".into()))
        );
    }

    #[test]
    fn mnli_has_two_variants_with_one_label_count() {
        let variants = TaskKind::Mnli.eval_variants();
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[1].key, "mnli-mm");
        assert_eq!(TaskKind::Mnli.label_count(), 3);
    }

    #[test]
    fn regression_tasks_use_a_single_output() {
        assert_eq!(TaskKind::StsB.output_mode(), OutputMode::Regression);
        assert_eq!(TaskKind::StsB.label_count(), 1);
    }
}
