//! Token-bounded text chunking with sliding sentence overlap.
//!
//! ```text
//! raw text ──► SentenceSegmenter ──► pending sentence queue
//!                                          │
//!                                          ▼
//!                     TextChunker (greedy accumulation, TokenCounter)
//!                         │                        │
//!                         ▼                        ▼
//!                  emitted chunks        trailing-overlap queue
//! ```
//!
//! Oversized sentences are force-split iteratively (word boundaries first,
//! then proportional byte division) and re-queued, so chunking never fails.

pub mod chunker;
pub mod segmenter;
pub mod tokenizer;

pub use chunker::TextChunker;
pub use segmenter::SentenceSegmenter;
pub use tokenizer::TokenCounter;
