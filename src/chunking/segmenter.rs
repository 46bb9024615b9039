//! Sentence segmentation over Unicode sentence boundaries.

use unicode_segmentation::UnicodeSegmentation;

/// Splits raw text into trimmed, non-empty sentences.
#[derive(Clone, Copy, Debug, Default)]
pub struct SentenceSegmenter;

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self
    }

    /// Returns the sentences of `text` in order, trimmed, empties dropped.
    pub fn segment(&self, text: &str) -> Vec<String> {
        text.split_sentence_bounds()
            .map(str::trim)
            .filter(|sentence| !sentence.is_empty())
            .map(ToOwned::to_owned)
            .collect()
    }
}
