use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use ml_core::{CheckpointModel, Tokenizer};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    Result,
    config::TrainerConfig,
    error::SchedulerErr,
    optimization::{AdamW, LinearSchedule},
    sampling::SamplingWeightTable,
    state::TrainingState,
};

pub const CHECKPOINT_PREFIX: &str = "checkpoint-";
pub const OPTIMIZER_FILE: &str = "optimizer.json";
pub const SCHEDULER_FILE: &str = "scheduler.json";
pub const SAMPLER_FILE: &str = "sampler.json";
pub const TRAINER_STATE_FILE: &str = "trainer_state.json";
pub const TRAINING_ARGS_FILE: &str = "training_args.json";

/// A complete checkpoint directory on disk.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CheckpointRecord {
    pub step: usize,
    pub dir: PathBuf,
}

/// Everything a checkpoint captures.
pub struct CheckpointContents<'a> {
    pub model: &'a dyn CheckpointModel,
    pub tokenizer: Option<&'a dyn Tokenizer>,
    pub optimizer: &'a AdamW,
    pub schedule: &'a LinearSchedule,
    pub table: &'a SamplingWeightTable,
    pub state: &'a TrainingState,
    pub config: &'a TrainerConfig,
}

/// Optimizer-side state restored from a checkpoint.
#[derive(Debug, Clone)]
pub struct RestoredState {
    pub optimizer: AdamW,
    pub schedule: LinearSchedule,
    pub table: SamplingWeightTable,
}

/// Returns the directory of the checkpoint taken at `step`.
pub fn checkpoint_dir(output_dir: &Path, step: usize) -> PathBuf {
    output_dir.join(format!("{CHECKPOINT_PREFIX}{step}"))
}

/// Parses the global step back out of a checkpoint directory name.
///
/// # Errors
/// Returns `SchedulerErr::ResumeParse` if the name doesn't end in `-<step>`.
pub fn parse_step(dir: &Path) -> Result<usize> {
    let name = dir
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();

    name.rsplit_once('-')
        .and_then(|(_, step)| step.parse().ok())
        .ok_or_else(|| SchedulerErr::ResumeParse(dir.display().to_string()))
}

/// Lists the checkpoints of `output_dir`, oldest first.
///
/// Entries that are not checkpoint directories are ignored.
///
/// # Errors
/// Returns `SchedulerErr::Io` if `output_dir` exists but can't be read.
pub fn list_checkpoints(output_dir: &Path) -> Result<Vec<CheckpointRecord>> {
    if !output_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut records = Vec::new();
    for entry in fs::read_dir(output_dir)? {
        let dir = entry?.path();
        let is_checkpoint = dir
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(CHECKPOINT_PREFIX));

        if !is_checkpoint || !dir.is_dir() {
            continue;
        }

        match parse_step(&dir) {
            Ok(step) => records.push(CheckpointRecord { step, dir }),
            Err(e) => warn!("ignoring {}: {e}", dir.display()),
        }
    }

    records.sort();
    Ok(records)
}

/// Returns the newest checkpoint of `output_dir`, if any.
///
/// # Errors
/// Returns `SchedulerErr::Io` if `output_dir` exists but can't be read.
pub fn latest_checkpoint(output_dir: &Path) -> Result<Option<CheckpointRecord>> {
    Ok(list_checkpoints(output_dir)?.pop())
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

/// Writes a checkpoint for the current global step.
///
/// The record is assembled in a hidden directory and renamed into place, so
/// a checkpoint directory is either complete or absent. A record that
/// already exists for this step is left untouched.
///
/// # Returns
/// The new record, or `None` if the step was already checkpointed.
///
/// # Errors
/// Returns `SchedulerErr` if any part fails to serialize or write.
pub fn save_checkpoint(
    output_dir: &Path,
    contents: &CheckpointContents<'_>,
) -> Result<Option<CheckpointRecord>> {
    let step = contents.state.global_step;
    let dir = checkpoint_dir(output_dir, step);

    if dir.exists() {
        debug!(step = step; "checkpoint already exists, skipping");
        return Ok(None);
    }

    let tmp = output_dir.join(format!(".{CHECKPOINT_PREFIX}{step}.tmp"));
    if tmp.exists() {
        fs::remove_dir_all(&tmp)?;
    }
    fs::create_dir_all(&tmp)?;

    contents.model.save(&tmp)?;
    if let Some(tokenizer) = contents.tokenizer {
        tokenizer.save(&tmp)?;
    }
    write_json(&tmp.join(OPTIMIZER_FILE), contents.optimizer)?;
    write_json(&tmp.join(SCHEDULER_FILE), contents.schedule)?;
    write_json(&tmp.join(SAMPLER_FILE), contents.table)?;
    write_json(&tmp.join(TRAINER_STATE_FILE), contents.state)?;
    write_json(&tmp.join(TRAINING_ARGS_FILE), contents.config)?;

    fs::rename(&tmp, &dir)?;
    info!(step = step; "saved checkpoint to {}", dir.display());

    Ok(Some(CheckpointRecord { step, dir }))
}

/// Reads the optimizer, learning-rate schedule and sampler state of a checkpoint.
///
/// # Errors
/// Returns `SchedulerErr` if a file is missing or malformed.
pub fn load_training_state(dir: &Path) -> Result<RestoredState> {
    Ok(RestoredState {
        optimizer: read_json(&dir.join(OPTIMIZER_FILE))?,
        schedule: read_json(&dir.join(SCHEDULER_FILE))?,
        table: read_json(&dir.join(SAMPLER_FILE))?,
    })
}
