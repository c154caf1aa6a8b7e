use std::{fmt, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    MlError,
    task::{TaskId, TaskKind},
};

/// Errors produced while accessing dataset samples.
#[derive(Debug)]
pub enum DataError {
    /// The requested sample index is out of bounds.
    OutOfBounds { index: usize },

    /// The dataset could not provide a valid sample due to domain constraints.
    InvalidSample(&'static str),
}

impl fmt::Display for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataError::OutOfBounds { index } => write!(f, "sample index {index} is out of bounds"),
            DataError::InvalidSample(msg) => write!(f, "invalid sample: {msg}"),
        }
    }
}

impl std::error::Error for DataError {}

/// Which side of a task's data an artifact belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Dev,
}

impl Split {
    pub fn as_str(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Dev => "dev",
        }
    }
}

/// A raw text example, as read from a task's data source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Example {
    pub guid: String,
    pub text_a: String,
    pub text_b: Option<String>,
    pub label: String,
}

/// Gold label of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Class(usize),
    Value(f32),
}

impl Label {
    /// Returns the class index, if this is a classification label.
    pub fn class(self) -> Option<usize> {
        match self {
            Label::Class(c) => Some(c),
            Label::Value(_) => None,
        }
    }

    /// Returns the label as a real number.
    pub fn value(self) -> f32 {
        match self {
            Label::Class(c) => c as f32,
            Label::Value(v) => v,
        }
    }
}

/// A tokenized, fixed-length training or evaluation instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u8>,
    /// Segment ids; absent for model families that don't use them.
    pub token_type_ids: Option<Vec<u32>>,
    pub label: Label,
    pub task: TaskId,
}

impl Instance {
    /// Returns the fixed sequence length of this instance.
    #[inline]
    pub fn seq_len(&self) -> usize {
        self.input_ids.len()
    }
}

/// A collection of instances that can be indexed.
///
/// A `Dataset` is responsible only for *providing access* to instances. It
/// does not decide ordering, batching or which task is drawn next.
pub trait Dataset {
    /// Returns the number of instances.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetches an instance by index.
    ///
    /// # Errors
    /// Returns `DataError::OutOfBounds` if `index` is invalid.
    fn get(&self, index: usize) -> Result<&Instance, DataError>;
}

impl Dataset for [Instance] {
    fn len(&self) -> usize {
        <[Instance]>::len(self)
    }

    fn get(&self, index: usize) -> Result<&Instance, DataError> {
        <[Instance]>::get(self, index).ok_or(DataError::OutOfBounds { index })
    }
}

/// Reads the raw examples of a task split from its data source.
pub trait ExampleReader: Send + Sync {
    /// # Args
    /// * `task` - Task whose column layout applies.
    /// * `path` - File holding the split.
    ///
    /// # Errors
    /// Returns `MlError::Io` if the source can't be read.
    fn read(&self, task: TaskKind, path: &Path) -> Result<Vec<Example>, MlError>;
}
