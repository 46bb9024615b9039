//! Greedy sentence accumulation into token-bounded chunks.

use std::collections::VecDeque;

use tracing::warn;

use crate::chunking::segmenter::SentenceSegmenter;
use crate::chunking::tokenizer::TokenCounter;
use crate::types::IndexError;

/// Splits text into token-bounded chunks with a sliding sentence overlap.
///
/// Sentences are accumulated greedily while the joined chunk stays under the
/// token budget. When the next sentence would overflow, the chunk is emitted
/// and the next one is seeded from a trailing-sentence queue capped at the
/// overlap budget (oldest sentences evicted first). Sentences that alone
/// exceed the budget are force-split and re-queued; chunking never fails.
#[derive(Clone, Debug)]
pub struct TextChunker {
    segmenter: SentenceSegmenter,
    counter: TokenCounter,
}

impl TextChunker {
    pub fn new() -> Result<Self, IndexError> {
        Ok(Self {
            segmenter: SentenceSegmenter::new(),
            counter: TokenCounter::new()?,
        })
    }

    /// Builds a chunker around an existing counter, sharing its encoder.
    pub fn with_counter(counter: TokenCounter) -> Self {
        Self {
            segmenter: SentenceSegmenter::new(),
            counter,
        }
    }

    /// The token counter this chunker measures with.
    pub fn token_counter(&self) -> &TokenCounter {
        &self.counter
    }

    /// Splits `text` into ordered chunks of fewer than `max_tokens` tokens,
    /// with consecutive chunks sharing at most `max_overlap_tokens` tokens of
    /// trailing context. Empty or whitespace-only input yields no chunks.
    pub fn split_into_chunks(
        &self,
        text: &str,
        max_tokens: usize,
        max_overlap_tokens: usize,
    ) -> Vec<String> {
        if max_tokens == 0 {
            return Vec::new();
        }

        let mut pending: VecDeque<String> = self.segmenter.segment(text).into();
        let mut chunks: Vec<String> = Vec::new();
        let mut current = String::new();
        // Trailing sentences carried into the next chunk, with token counts.
        let mut overlap: VecDeque<(String, usize)> = VecDeque::new();
        let mut overlap_tokens = 0usize;

        while let Some(sentence) = pending.pop_front() {
            let sentence = sentence.trim().to_string();
            if sentence.is_empty() {
                continue;
            }
            let tokens = self.counter.count(&sentence);

            if tokens >= max_tokens {
                let pieces = self.force_split(&sentence, max_tokens);
                if pieces.len() == 1 && pieces[0] == sentence {
                    // Cannot be divided further; emit as its own oversized chunk.
                    warn!(tokens, max_tokens, "unsplittable sentence emitted whole");
                    if !current.is_empty() {
                        chunks.push(std::mem::take(&mut current));
                    }
                    chunks.push(sentence);
                    overlap.clear();
                    overlap_tokens = 0;
                    continue;
                }
                warn!(
                    tokens,
                    max_tokens,
                    pieces = pieces.len(),
                    "sentence exceeds chunk budget, force-splitting"
                );
                for piece in pieces.into_iter().rev() {
                    pending.push_front(piece);
                }
                continue;
            }

            if current.is_empty() {
                current = sentence.clone();
            } else {
                let candidate = format!("{current} {sentence}");
                if self.counter.count(&candidate) < max_tokens {
                    current = candidate;
                } else {
                    // Close the running chunk and seed the next from the overlap.
                    let closed = current.trim().to_string();
                    if !closed.is_empty() {
                        chunks.push(closed);
                    }
                    current = self.seed_from_overlap(
                        &mut overlap,
                        &mut overlap_tokens,
                        &sentence,
                        max_tokens,
                    );
                }
            }

            overlap.push_back((sentence, tokens));
            overlap_tokens += tokens;
            while overlap_tokens > max_overlap_tokens {
                match overlap.pop_front() {
                    Some((_, evicted)) => overlap_tokens -= evicted,
                    None => break,
                }
            }
        }

        let tail = current.trim().to_string();
        if !tail.is_empty() {
            chunks.push(tail);
        }
        chunks
    }

    /// Joins the overlap queue with the triggering sentence, evicting oldest
    /// overlap sentences until the seed fits under the chunk budget.
    fn seed_from_overlap(
        &self,
        overlap: &mut VecDeque<(String, usize)>,
        overlap_tokens: &mut usize,
        sentence: &str,
        max_tokens: usize,
    ) -> String {
        loop {
            let seed = overlap
                .iter()
                .map(|(text, _)| text.as_str())
                .chain(std::iter::once(sentence))
                .collect::<Vec<_>>()
                .join(" ");
            if overlap.is_empty() || self.counter.count(&seed) < max_tokens {
                return seed;
            }
            if let Some((_, evicted)) = overlap.pop_front() {
                *overlap_tokens -= evicted;
            }
        }
    }

    /// Splits an oversized sentence into pieces of roughly `max_tokens / 4`
    /// tokens: first at word boundaries, then by proportional char-boundary
    /// byte division for single words that still exceed the piece target.
    fn force_split(&self, sentence: &str, max_tokens: usize) -> Vec<String> {
        let target = (max_tokens / 4).max(1);
        let mut pieces: Vec<String> = Vec::new();
        let mut piece = String::new();

        for word in sentence.split_whitespace() {
            let word_tokens = self.counter.count(word);
            if word_tokens > target {
                if !piece.is_empty() {
                    pieces.push(std::mem::take(&mut piece));
                }
                pieces.extend(split_word_by_bytes(word, word_tokens, target));
                continue;
            }

            if piece.is_empty() {
                piece = word.to_string();
                continue;
            }
            let candidate = format!("{piece} {word}");
            if self.counter.count(&candidate) <= target {
                piece = candidate;
            } else {
                pieces.push(std::mem::take(&mut piece));
                piece = word.to_string();
            }
        }
        if !piece.is_empty() {
            pieces.push(piece);
        }
        pieces
    }
}

/// Divides a single word into `ceil(word_tokens / target)` pieces of roughly
/// equal byte length, cutting only at char boundaries.
fn split_word_by_bytes(word: &str, word_tokens: usize, target: usize) -> Vec<String> {
    let parts = word_tokens.div_ceil(target).max(1);
    let bytes_per_part = word.len().div_ceil(parts).max(1);

    let mut pieces = Vec::with_capacity(parts);
    let mut piece = String::new();
    for ch in word.chars() {
        piece.push(ch);
        if piece.len() >= bytes_per_part {
            pieces.push(std::mem::take(&mut piece));
        }
    }
    if !piece.is_empty() {
        pieces.push(piece);
    }
    pieces
}
