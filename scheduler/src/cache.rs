use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{info, warn};
use ml_core::{
    Example, ExampleReader, Instance, Label, MlError, OutputMode, ProcessGroup, Split,
    TaskDescriptor, TaskKind, Tokenizer,
};

use crate::{Result, config::CacheConfig, error::SchedulerErr};

/// Examples kept per split in a reduced run.
pub const REDUCED_EXAMPLES: usize = 2;

/// Converts raw examples into instances of `task`.
///
/// # Errors
/// Returns `MlError::UnknownLabel` if a label is outside the task's label set
/// or, for regression tasks, not a number.
pub fn featurize(
    task: &TaskDescriptor,
    examples: &[Example],
    tokenizer: &dyn Tokenizer,
    max_len: usize,
) -> std::result::Result<Vec<Instance>, MlError> {
    examples
        .iter()
        .map(|example| {
            let encoding = tokenizer.encode(&example.text_a, example.text_b.as_deref(), max_len);
            let token_type_ids = tokenizer.uses_segment_ids().then_some(encoding.token_type_ids);

            Ok(Instance {
                input_ids: encoding.input_ids,
                attention_mask: encoding.attention_mask,
                token_type_ids,
                label: map_label(task.kind, &example.label)?,
                task: task.id,
            })
        })
        .collect()
}

fn map_label(kind: TaskKind, raw: &str) -> std::result::Result<Label, MlError> {
    let unknown = || MlError::UnknownLabel {
        task: kind.name(),
        label: raw.to_string(),
    };

    match kind.output_mode() {
        OutputMode::Classification => kind
            .labels()
            .iter()
            .position(|label| *label == raw.trim())
            .map(Label::Class)
            .ok_or_else(unknown),
        OutputMode::Regression => raw.trim().parse().map(Label::Value).map_err(|_| unknown()),
    }
}

/// The on-disk feature cache of a run.
///
/// Cache files live next to the task data and are keyed by split, model
/// identity, maximum sequence length and task key.
pub struct FeatureCache<'a> {
    config: &'a CacheConfig,
    reader: &'a dyn ExampleReader,
    tokenizer: &'a dyn Tokenizer,
}

impl<'a> FeatureCache<'a> {
    pub fn new(
        config: &'a CacheConfig,
        reader: &'a dyn ExampleReader,
        tokenizer: &'a dyn Tokenizer,
    ) -> Self {
        Self {
            config,
            reader,
            tokenizer,
        }
    }

    /// Returns the cache file of one split of a task.
    ///
    /// # Args
    /// * `data_dir` - The task's data directory.
    /// * `split` - Train or dev.
    /// * `key` - The task or evaluation variant key, e.g. `mnli-mm`.
    pub fn cache_path(&self, data_dir: &Path, split: Split, key: &str) -> PathBuf {
        let model = self
            .config
            .model_name
            .rsplit('/')
            .find(|part| !part.is_empty())
            .unwrap_or(self.config.model_name.as_str());

        data_dir.join(format!(
            "cached_{}_{}_{}_{}",
            split.as_str(),
            model,
            self.config.max_seq_length,
            key
        ))
    }

    /// Materializes the training instances of a task.
    ///
    /// Non-main ranks wait until the main rank has populated the cache and
    /// then read it; the main rank releases them once it is done.
    ///
    /// # Errors
    /// Returns `SchedulerErr::CacheRegeneration` if the features can't be rebuilt.
    pub fn load_train(
        &self,
        task: &TaskDescriptor,
        group: &dyn ProcessGroup,
    ) -> Result<Vec<Instance>> {
        if !group.is_main() {
            group.barrier();
        }

        let instances = self.load_or_build(
            task,
            Split::Train,
            task.kind.name(),
            &task.data_dir.join(TRAIN_FILE),
            group.is_main(),
        );

        if group.is_main() {
            group.barrier();
        }

        instances
    }

    /// Materializes one held-out split of a task.
    ///
    /// # Errors
    /// Returns `SchedulerErr::CacheRegeneration` if the features can't be rebuilt.
    pub fn load_dev(&self, task: &TaskDescriptor, key: &str, file: &str) -> Result<Vec<Instance>> {
        self.load_or_build(task, Split::Dev, key, &task.data_dir.join(file), true)
    }

    fn load_or_build(
        &self,
        task: &TaskDescriptor,
        split: Split,
        key: &str,
        source: &Path,
        write: bool,
    ) -> Result<Vec<Instance>> {
        let path = self.cache_path(&task.data_dir, split, key);

        if path.exists() && !self.config.overwrite_cache {
            match self.read(&path) {
                Ok(mut instances) => {
                    info!(task = key; "loading features from cached file {}", path.display());
                    self.shrink(&mut instances);
                    instances.iter_mut().for_each(|instance| instance.task = task.id);
                    return Ok(instances);
                }
                Err(e) => warn!(task = key; "unreadable cache file {}: {e}", path.display()),
            }
        }

        info!(task = key; "creating features from dataset file at {}", source.display());
        let regeneration = |source: MlError| SchedulerErr::CacheRegeneration {
            task: task.kind,
            source,
        };

        let mut examples = self.reader.read(task.kind, source).map_err(regeneration)?;
        self.shrink(&mut examples);
        let instances = featurize(task, &examples, self.tokenizer, self.config.max_seq_length)
            .map_err(regeneration)?;

        // Reduced runs never write, so a full run can't pick up a shrunk cache.
        if write && !self.config.reduced_run {
            info!(task = key; "saving features into cached file {}", path.display());
            fs::write(&path, serde_json::to_vec(&instances)?)?;
        }

        Ok(instances)
    }

    fn read(&self, path: &Path) -> Result<Vec<Instance>> {
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }

    fn shrink<T>(&self, items: &mut Vec<T>) {
        if self.config.reduced_run {
            items.truncate(REDUCED_EXAMPLES);
        }
    }
}

/// File name of every task's training split.
pub const TRAIN_FILE: &str = "train.tsv";

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ml_core::{Encoding, LocalGroup, TaskId};

    use super::*;

    #[derive(Default)]
    struct LineReader {
        reads: AtomicUsize,
    }

    impl LineReader {
        fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    impl ExampleReader for LineReader {
        fn read(&self, _task: TaskKind, path: &Path) -> std::result::Result<Vec<Example>, MlError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let text = fs::read_to_string(path)?;
            Ok(text
                .lines()
                .enumerate()
                .map(|(i, line)| {
                    let (text, label) = line.split_once('|').unwrap_or((line, ""));
                    Example {
                        guid: i.to_string(),
                        text_a: text.to_string(),
                        text_b: None,
                        label: label.to_string(),
                    }
                })
                .collect())
        }
    }

    struct LenTokenizer;

    impl Tokenizer for LenTokenizer {
        fn identity(&self) -> &str {
            "len"
        }

        fn encode(&self, text_a: &str, _text_b: Option<&str>, max_len: usize) -> Encoding {
            let mut input_ids = vec![text_a.len() as u32];
            input_ids.resize(max_len, 0);
            Encoding {
                attention_mask: input_ids.iter().map(|&t| u8::from(t != 0)).collect(),
                token_type_ids: vec![0; max_len],
                input_ids,
            }
        }

        fn save(&self, _dir: &Path) -> std::result::Result<(), MlError> {
            Ok(())
        }
    }

    fn setup(lines: &str) -> (tempfile::TempDir, TaskDescriptor) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(TRAIN_FILE), lines).unwrap();
        let task = TaskDescriptor::new(TaskId(3), TaskKind::Sst2, dir.path().to_path_buf(), None);
        (dir, task)
    }

    fn config(overwrite_cache: bool, reduced_run: bool) -> CacheConfig {
        CacheConfig {
            model_name: "models/bag/".into(),
            max_seq_length: 4,
            overwrite_cache,
            reduced_run,
        }
    }

    #[test]
    fn second_load_hits_the_cache() {
        let (_dir, task) = setup("good|1\nbad|0\nfine|1\n");
        let cfg = config(false, false);
        let reader = LineReader::default();
        let cache = FeatureCache::new(&cfg, &reader, &LenTokenizer);

        let first = cache.load_train(&task, &LocalGroup).unwrap();
        let second = cache.load_train(&task, &LocalGroup).unwrap();

        assert_eq!(reader.reads(), 1);
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
        assert_eq!(first[1].label, Label::Class(0));
        let path = cache.cache_path(&task.data_dir, Split::Train, "sst-2");
        assert!(path.ends_with("cached_train_bag_4_sst-2"));
    }

    #[test]
    fn overwrite_and_corruption_regenerate() {
        let (_dir, task) = setup("good|1\n");
        let reader = LineReader::default();

        let cfg = config(true, false);
        let cache = FeatureCache::new(&cfg, &reader, &LenTokenizer);
        cache.load_train(&task, &LocalGroup).unwrap();
        cache.load_train(&task, &LocalGroup).unwrap();
        assert_eq!(reader.reads(), 2);

        let cfg = config(false, false);
        let cache = FeatureCache::new(&cfg, &reader, &LenTokenizer);
        fs::write(cache.cache_path(&task.data_dir, Split::Train, "sst-2"), "{ truncated").unwrap();
        assert_eq!(cache.load_train(&task, &LocalGroup).unwrap().len(), 1);
        assert_eq!(reader.reads(), 3);
    }

    #[test]
    fn unknown_labels_fail_regeneration() {
        let (_dir, task) = setup("good|maybe\n");
        let cfg = config(false, false);
        let reader = LineReader::default();
        let cache = FeatureCache::new(&cfg, &reader, &LenTokenizer);

        let err = cache.load_train(&task, &LocalGroup).unwrap_err();
        assert!(matches!(err, SchedulerErr::CacheRegeneration { task: TaskKind::Sst2, .. }));
    }

    #[test]
    fn reduced_runs_keep_two_examples_and_never_write() {
        let (_dir, task) = setup("a|1\nb|0\nc|1\nd|0\n");
        let cfg = config(false, true);
        let reader = LineReader::default();
        let cache = FeatureCache::new(&cfg, &reader, &LenTokenizer);

        assert_eq!(cache.load_train(&task, &LocalGroup).unwrap().len(), 2);
        assert!(!cache.cache_path(&task.data_dir, Split::Train, "sst-2").exists());
    }

    #[test]
    fn regression_labels_are_parsed() {
        let task = TaskDescriptor::new(TaskId(0), TaskKind::StsB, PathBuf::new(), None);
        let examples = [Example {
            guid: "0".into(),
            text_a: "a".into(),
            text_b: Some("b".into()),
            label: "3.5".into(),
        }];

        let instances = featurize(&task, &examples, &LenTokenizer, 2).unwrap();
        assert_eq!(instances[0].label, Label::Value(3.5));
        assert!(instances[0].token_type_ids.is_some());
    }
}
