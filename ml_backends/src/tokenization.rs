use std::{fs, path::Path};

use ml_core::{Encoding, MlError, Tokenizer};
use serde::{Deserialize, Serialize};

pub const TOKENIZER_FILE: &str = "tokenizer.json";

pub const PAD_ID: u32 = 0;
pub const CLS_ID: u32 = 1;
pub const SEP_ID: u32 = 2;
/// Ids below this value never come out of the word hash.
pub const RESERVED_IDS: u32 = 4;

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct HashingState {
    vocab_size: u32,
    do_lower_case: bool,
}

/// Word-level tokenizer mapping every word to a hashed bucket.
///
/// Words are maximal runs of alphanumeric characters. Pairs are encoded as
/// `[CLS] a [SEP] b [SEP]`, with segment id 1 on the second text.
#[derive(Debug, Clone)]
pub struct HashingTokenizer {
    state: HashingState,
    identity: String,
}

impl HashingTokenizer {
    /// # Errors
    /// Returns `MlError::InvalidInput` if the vocabulary leaves no room for words.
    pub fn new(vocab_size: usize, do_lower_case: bool) -> Result<Self, MlError> {
        let vocab_size = u32::try_from(vocab_size)
            .map_err(|_| MlError::InvalidInput("vocab_size does not fit in a token id"))?;

        if vocab_size <= RESERVED_IDS {
            return Err(MlError::InvalidInput("vocab_size must exceed the reserved ids"));
        }

        Ok(Self::from_state(HashingState {
            vocab_size,
            do_lower_case,
        }))
    }

    /// Restores a tokenizer written by [`Tokenizer::save`].
    ///
    /// # Errors
    /// Returns `MlError` if the file is missing or malformed.
    pub fn from_pretrained(dir: &Path) -> Result<Self, MlError> {
        let text = fs::read_to_string(dir.join(TOKENIZER_FILE))?;
        let state: HashingState = serde_json::from_str(&text)?;
        Self::new(state.vocab_size as usize, state.do_lower_case)
    }

    fn from_state(state: HashingState) -> Self {
        let case = if state.do_lower_case { "uncased" } else { "cased" };
        let identity = format!("hashing-{}-{case}", state.vocab_size);
        Self { state, identity }
    }

    pub fn vocab_size(&self) -> usize {
        self.state.vocab_size as usize
    }

    fn word_id(&self, word: &str) -> u32 {
        let hash = word
            .bytes()
            .fold(FNV_OFFSET, |h, b| (h ^ u32::from(b)).wrapping_mul(FNV_PRIME));
        RESERVED_IDS + hash % (self.state.vocab_size - RESERVED_IDS)
    }

    fn tokenize(&self, text: &str) -> Vec<u32> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
            .map(|word| {
                if self.state.do_lower_case {
                    self.word_id(&word.to_lowercase())
                } else {
                    self.word_id(word)
                }
            })
            .collect()
    }
}

/// Trims the longer sequence one token at a time until both fit in `budget`.
fn truncate_longest_first(a: &mut Vec<u32>, b: &mut Vec<u32>, budget: usize) {
    while a.len() + b.len() > budget {
        if a.len() >= b.len() {
            a.pop();
        } else {
            b.pop();
        }
    }
}

impl Tokenizer for HashingTokenizer {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn encode(&self, text_a: &str, text_b: Option<&str>, max_len: usize) -> Encoding {
        let mut a = self.tokenize(text_a);
        let mut b = text_b.map(|t| self.tokenize(t)).unwrap_or_default();
        let specials = if text_b.is_some() { 3 } else { 2 };
        truncate_longest_first(&mut a, &mut b, max_len.saturating_sub(specials));

        let mut input_ids = Vec::with_capacity(max_len);
        let mut token_type_ids = Vec::with_capacity(max_len);

        input_ids.push(CLS_ID);
        input_ids.extend(&a);
        input_ids.push(SEP_ID);
        token_type_ids.resize(input_ids.len(), 0);

        if text_b.is_some() {
            input_ids.extend(&b);
            input_ids.push(SEP_ID);
            token_type_ids.resize(input_ids.len(), 1);
        }

        input_ids.truncate(max_len);
        token_type_ids.truncate(max_len);
        let mut attention_mask = vec![1; input_ids.len()];

        input_ids.resize(max_len, PAD_ID);
        token_type_ids.resize(max_len, 0);
        attention_mask.resize(max_len, 0);

        Encoding {
            input_ids,
            attention_mask,
            token_type_ids,
        }
    }

    fn save(&self, dir: &Path) -> Result<(), MlError> {
        fs::create_dir_all(dir)?;
        fs::write(dir.join(TOKENIZER_FILE), serde_json::to_string_pretty(&self.state)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_text_is_wrapped_and_padded() {
        let tok = HashingTokenizer::new(100, true).unwrap();
        let enc = tok.encode("Hello, world", None, 6);

        assert_eq!(enc.input_ids.len(), 6);
        assert_eq!(enc.input_ids[0], CLS_ID);
        assert_eq!(enc.input_ids[3], SEP_ID);
        assert_eq!(&enc.input_ids[4..], &[PAD_ID, PAD_ID]);
        assert_eq!(enc.attention_mask, vec![1, 1, 1, 1, 0, 0]);
        assert!(enc.token_type_ids.iter().all(|&t| t == 0));
    }

    #[test]
    fn pairs_get_segment_ids_and_longest_first_truncation() {
        let tok = HashingTokenizer::new(100, true).unwrap();
        let enc = tok.encode("a b c d e", Some("x y"), 8);

        // 5 words budget: a keeps 3, b keeps 2.
        assert_eq!(enc.input_ids.iter().filter(|&&t| t == SEP_ID).count(), 2);
        assert_eq!(enc.token_type_ids, vec![0, 0, 0, 0, 0, 1, 1, 1]);
        assert!(enc.attention_mask.iter().all(|&m| m == 1));
    }

    #[test]
    fn lower_casing_merges_words() {
        let uncased = HashingTokenizer::new(1000, true).unwrap();
        let cased = HashingTokenizer::new(1000, false).unwrap();

        assert_eq!(uncased.encode("Word", None, 4), uncased.encode("word", None, 4));
        assert_ne!(cased.identity(), uncased.identity());
    }

    #[test]
    fn ids_stay_inside_the_vocabulary() {
        let tok = HashingTokenizer::new(10, false).unwrap();
        let enc = tok.encode("the quick brown fox jumps", None, 16);
        assert!(enc.input_ids.iter().all(|&t| t < 10));
    }

    #[test]
    fn tiny_vocabularies_are_rejected() {
        assert!(HashingTokenizer::new(RESERVED_IDS as usize, true).is_err());
    }

    #[test]
    fn save_and_reload_keep_the_identity() {
        let dir = tempfile::tempdir().unwrap();
        let tok = HashingTokenizer::new(64, true).unwrap();
        tok.save(dir.path()).unwrap();

        let loaded = HashingTokenizer::from_pretrained(dir.path()).unwrap();
        assert_eq!(loaded.identity(), tok.identity());
    }
}
