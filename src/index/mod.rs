//! Cluster-accelerated vector index.
//!
//! ```text
//!                   ┌──────────────────┐
//!                   │ VectorIndex trait│
//!                   │   (async CRUD +  │
//!                   │  similarity API) │
//!                   └────────┬─────────┘
//!                            │
//!                            ▼
//!                  ┌───────────────────┐
//!                  │ SqliteVectorIndex │──► kmeans::cluster_vectors
//!                  │  (tokio-rusqlite) │      (pure, per partition)
//!                  └───────────────────┘
//! ```
//!
//! All stored and queried vectors are unit-normalized; similarity is the dot
//! product, equal to cosine similarity for unit vectors. Queries rank only
//! the chunks assigned to the single nearest centroid.

pub mod kmeans;
pub mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::types::{Chunk, IndexError};

pub use sqlite::SqliteVectorIndex;

/// Durable store of chunks and centroids with nearest-neighbor search.
///
/// `start_creation`/`finalize_creation` bracket a rebuild over the affected
/// partitions; queries are safe concurrently with each other but not with an
/// in-progress rebuild of the same partition (serialization is delegated to
/// the backend's own locking).
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Begins a rebuild. With `clear`, purges all chunks and clusters first.
    async fn start_creation(&self, clear: bool) -> Result<(), IndexError>;

    /// Fetches one chunk by id.
    async fn chunk(&self, id: i64) -> Result<Option<Chunk>, IndexError>;

    /// All chunks in the document's slot range, ordered by id.
    async fn document_chunks(&self, doc_id: &str, first_id: i64)
    -> Result<Vec<Chunk>, IndexError>;

    /// Signals that existing chunks for this range remain valid (staleness
    /// check passed); backends needing no bookkeeping may no-op.
    async fn reuse_document_chunks(&self, doc_id: &str, first_id: i64) -> Result<(), IndexError>;

    /// Removes every chunk in the document's slot range.
    async fn delete_document_chunks(&self, doc_id: &str, first_id: i64)
    -> Result<usize, IndexError>;

    /// Inserts or overwrites the given chunks.
    async fn add_document_chunks(&self, chunks: Vec<Chunk>) -> Result<(), IndexError>;

    /// Builds clusters for partitions lacking them, assigns every
    /// unassigned chunk to its nearest centroid, and compacts.
    async fn finalize_creation(&self) -> Result<(), IndexError>;

    /// Re-runs clustering and reassignment without a full rebuild.
    async fn run_maintenance(&self) -> Result<(), IndexError>;

    /// Chunks most similar to `query`, descending, at most `limit`, all at or
    /// above the configured threshold. `language` selects the partition when
    /// language partitioning is enabled.
    async fn similar_chunks(
        &self,
        query: &[f32],
        limit: usize,
        language: Option<&str>,
    ) -> Result<Vec<Chunk>, IndexError>;

    /// Free-form diagnostic map (chunk counts, cluster counts, backend id).
    async fn statistics(&self) -> Result<HashMap<String, serde_json::Value>, IndexError>;
}

/// Dot product; cosine similarity for unit vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Scales `vector` to unit length in place. Zero vectors are left untouched.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for component in vector.iter_mut() {
            *component /= norm;
        }
    }
}

/// Serializes an embedding as little-endian f32 bytes for blob storage.
pub(crate) fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for component in vector {
        bytes.extend_from_slice(&component.to_le_bytes());
    }
    bytes
}

/// Inverse of [`encode_embedding`].
pub(crate) fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>, IndexError> {
    if bytes.len() % 4 != 0 {
        return Err(IndexError::Storage(format!(
            "embedding blob of {} bytes is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|quad| f32::from_le_bytes([quad[0], quad[1], quad[2], quad[3]]))
        .collect())
}

/// Index of the centroid most similar to `vector`, if any exist.
pub(crate) fn nearest_centroid(centroids: &[Vec<f32>], vector: &[f32]) -> Option<usize> {
    centroids
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| {
            dot(a, vector)
                .partial_cmp(&dot(b, vector))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(index, _)| index)
}
