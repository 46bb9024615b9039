//! Token counting consistent with the embedding providers' tokenization.

use std::sync::Arc;

use tiktoken_rs::{CoreBPE, cl100k_base};

use crate::types::IndexError;

/// Counts tokens the way the provider-side BPE tokenizer does.
///
/// Cheap to clone; the underlying encoder is shared.
#[derive(Clone)]
pub struct TokenCounter {
    bpe: Arc<CoreBPE>,
}

impl TokenCounter {
    /// Loads the `cl100k_base` encoding.
    pub fn new() -> Result<Self, IndexError> {
        let bpe = cl100k_base()
            .map_err(|err| IndexError::Config(format!("failed to load tokenizer: {err}")))?;
        Ok(Self { bpe: Arc::new(bpe) })
    }

    /// Number of tokens in `text`.
    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter").finish_non_exhaustive()
    }
}
