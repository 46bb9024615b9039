//! Core data types and error taxonomy shared across the crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Width of the chunk-id range reserved per document.
///
/// Chunk ids are `ordinal * CHUNK_SLOT_SPAN + sequence`, so every document
/// owns a contiguous 100-slot range keyed by its stable ordinal.
pub const CHUNK_SLOT_SPAN: i64 = 100;

/// Highest usable sequence within a document's slot range (`sequence < 99`).
pub const MAX_CHUNKS_PER_DOCUMENT: usize = 99;

/// A bounded span of source text paired with its embedding vector.
///
/// Chunks are replaced wholesale when their source document changes; they are
/// never mutated in place. `score` is populated only on query results.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Integer id: `ordinal * 100 + sequence`, unique within the index.
    pub id: i64,
    /// Identifier of the source document.
    pub doc_id: String,
    /// Language tag, empty when the corpus is not language-tagged.
    pub language: String,
    /// Chunk text.
    pub content: String,
    /// Unit-normalized embedding vector; length equals the index dimension.
    pub embedding: Vec<f32>,
    /// When this chunk was computed, used for staleness detection.
    pub created_at: DateTime<Utc>,
    /// Similarity to the query vector; set on query results only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl Chunk {
    /// First chunk id of the slot range owned by a document ordinal.
    pub fn first_id_for_ordinal(ordinal: i64) -> i64 {
        ordinal * CHUNK_SLOT_SPAN
    }

    /// Sequence of this chunk within its document's slot range.
    pub fn sequence(&self) -> i64 {
        self.id.rem_euclid(CHUNK_SLOT_SPAN)
    }
}

/// A document as presented by the host corpus. Read-only to this crate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceDocument {
    /// Stable identifier within the corpus.
    pub id: String,
    /// Stable ordinal used to derive the chunk-id range.
    pub ordinal: i64,
    /// Raw text body.
    pub body: String,
    /// Language tag, empty if untagged.
    #[serde(default)]
    pub language: String,
    /// Last modification time, compared against stored chunk timestamps.
    pub last_modified: DateTime<Utc>,
    /// Hidden documents are skipped during indexing.
    pub visible: bool,
}

/// Failures raised by the provider adapter layer.
///
/// `Transport`, `Protocol`, and `Upstream` are retried up to the configured
/// budget before being surfaced; `Config` and `Encode` are fatal immediately.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No response came back at all (connection refused, timeout, ...).
    #[error("transport failure: {0}")]
    Transport(String),

    /// A response arrived but was not valid structured data.
    #[error("malformed provider response: {0}")]
    Protocol(String),

    /// The provider answered with an explicit error envelope.
    #[error("provider rejected request ({code}): {message}")]
    Upstream {
        /// Provider- or HTTP-level error code, `"unknown"` if absent.
        code: String,
        /// Human-readable message from the error envelope.
        message: String,
    },

    /// Missing or invalid credentials, unknown model, bad endpoint.
    #[error("provider configuration error: {0}")]
    Config(String),

    /// The outbound payload could not be serialized. Never retried.
    #[error("failed to encode request payload: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ProviderError {
    /// Whether the retry loop should attempt this request again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Transport(_)
                | ProviderError::Protocol(_)
                | ProviderError::Upstream { .. }
        )
    }
}

/// Failures raised by the vector index and the orchestration around it.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Backend I/O failure.
    #[error("storage failure: {0}")]
    Storage(String),

    /// A clustering pass failed; the partition's centroids were rolled back.
    #[error("clustering failed: {0}")]
    Clustering(String),

    /// Invalid configuration (dimensions, patterns, tokenizer assets).
    #[error("index configuration error: {0}")]
    Config(String),

    /// A provider call failed beyond its retry budget.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}
