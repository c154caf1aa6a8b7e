use std::{fmt, io};

/// Errors produced by model, tokenizer and metrics backends.
#[derive(Debug)]
pub enum MlError {
    /// An input is invalid for semantic or domain reasons.
    InvalidInput(&'static str),

    /// A shape invariant was violated (e.g. mismatched lengths).
    ShapeMismatch {
        /// Human-readable context for the mismatch (e.g. "params", "batch").
        what: &'static str,
        /// Observed value.
        got: usize,
        /// Expected value.
        expected: usize,
    },

    /// A label does not belong to the task's label set.
    UnknownLabel { task: &'static str, label: String },

    /// Reading or writing backend state failed.
    Io(io::Error),

    /// Backend state could not be encoded or decoded.
    Serialization(String),
}

impl fmt::Display for MlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            MlError::ShapeMismatch { what, got, expected } => {
                write!(f, "shape mismatch for {what}: got {got}, expected {expected}")
            }
            MlError::UnknownLabel { task, label } => {
                write!(f, "label '{label}' is not part of task {task}")
            }
            MlError::Io(e) => write!(f, "io error: {e}"),
            MlError::Serialization(msg) => write!(f, "serialization error: {msg}"),
        }
    }
}

impl std::error::Error for MlError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MlError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for MlError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for MlError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}
