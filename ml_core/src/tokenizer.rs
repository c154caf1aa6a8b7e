use std::path::Path;

use crate::MlError;

/// Fixed-length token arrays produced for one example.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoding {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u8>,
    pub token_type_ids: Vec<u32>,
}

/// Converts raw text into fixed-length token arrays.
///
/// Implementations must be deterministic given their identity and the
/// requested maximum length, since encoded features are cached on disk keyed
/// by both.
pub trait Tokenizer: Send + Sync {
    /// Stable identity used to key feature caches.
    fn identity(&self) -> &str;

    /// Whether encoded instances should carry segment ids.
    fn uses_segment_ids(&self) -> bool {
        true
    }

    /// Encodes a single or paired text into exactly `max_len` positions.
    fn encode(&self, text_a: &str, text_b: Option<&str>, max_len: usize) -> Encoding;

    /// Persists the tokenizer state into `dir`.
    ///
    /// # Errors
    /// Returns `MlError::Io` or `MlError::Serialization` on failure.
    fn save(&self, dir: &Path) -> Result<(), MlError>;
}
