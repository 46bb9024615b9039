//! ```text
//! Corpus snapshot ──► builder::IndexBuilder::rebuild
//!                        │
//!                        ├─► chunking::TextChunker ──► sentence-bounded,
//!                        │      token-budgeted chunks with sliding overlap
//!                        │
//!                        ├─► providers::ProviderAdapter ──► embeddings
//!                        │      (openai / gemini / mock, retry + usage)
//!                        │
//!                        └─► index::VectorIndex ──► chunks + k-means
//!                               centroids in SQLite, per partition
//!
//! Query text ──► builder::IndexBuilder::query ──► ranked Chunk hits
//! ```
//!
pub mod builder;
pub mod chunking;
pub mod config;
pub mod index;
pub mod providers;
pub mod types;

pub use builder::{IndexBuilder, RebuildOptions, RebuildReport};
pub use chunking::{SentenceSegmenter, TextChunker, TokenCounter};
pub use config::IndexConfig;
pub use index::{SqliteVectorIndex, VectorIndex};
pub use providers::{
    ChatMessage, ChatRole, ModelDescriptor, ModelSelector, ProviderAdapter, ProviderFamily,
    ProviderSettings, UsageStats,
};
pub use types::{Chunk, IndexError, ProviderError, SourceDocument};
