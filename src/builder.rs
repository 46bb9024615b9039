//! Orchestration of the indexing pipeline.
//!
//! The builder walks a corpus snapshot, decides per document whether the
//! stored chunks are still fresh, re-chunks and re-embeds what changed, and
//! finalizes the index so clusters cover every chunk. Queries embed the
//! caller's text with the same provider and delegate ranking to the index.

use std::sync::Arc;

use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chunking::TextChunker;
use crate::config::IndexConfig;
use crate::index::VectorIndex;
use crate::providers::ProviderAdapter;
use crate::types::{Chunk, IndexError, MAX_CHUNKS_PER_DOCUMENT, SourceDocument};

/// How a rebuild pass should treat existing index contents.
#[derive(Clone, Copy, Debug, Default)]
pub struct RebuildOptions {
    /// Drop all chunks and clusters first instead of reusing fresh ones.
    pub clear: bool,
}

/// Outcome counters for one rebuild pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    /// Documents that were chunked and embedded this pass.
    pub indexed_documents: usize,
    /// Documents whose stored chunks were still fresh.
    pub reused_documents: usize,
    /// Hidden or excluded documents.
    pub skipped_documents: usize,
    /// Chunks now standing in the index for the processed documents.
    pub chunk_count: usize,
    /// Chunks dropped because embedding failed beyond the retry budget.
    pub failed_chunks: usize,
}

/// Drives chunking, embedding, and index writes for a corpus.
pub struct IndexBuilder {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn ProviderAdapter>,
    chunker: TextChunker,
    config: IndexConfig,
    exclude: Option<Regex>,
}

impl IndexBuilder {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn ProviderAdapter>,
        config: IndexConfig,
    ) -> Result<Self, IndexError> {
        config.validate()?;
        let exclude = config.exclude_regex()?;
        Ok(Self {
            index,
            embedder,
            chunker: TextChunker::new()?,
            config,
            exclude,
        })
    }

    /// Brings the index up to date with the given corpus snapshot.
    ///
    /// Hidden and pattern-excluded documents are skipped and any chunks they
    /// left behind are removed. A document whose stored chunks are newer than
    /// its `last_modified` is reused untouched; everything else is re-chunked
    /// and re-embedded. Individual embedding failures drop the affected chunk
    /// and are tallied rather than aborting the pass.
    pub async fn rebuild(
        &self,
        documents: &[SourceDocument],
        options: RebuildOptions,
    ) -> Result<RebuildReport, IndexError> {
        self.index.start_creation(options.clear).await?;
        let mut report = RebuildReport::default();

        for document in documents {
            let first_id = Chunk::first_id_for_ordinal(document.ordinal);

            if !document.visible || self.is_excluded(&document.id) {
                self.index
                    .delete_document_chunks(&document.id, first_id)
                    .await?;
                report.skipped_documents += 1;
                continue;
            }

            if !options.clear {
                let existing = self.index.document_chunks(&document.id, first_id).await?;
                if let Some(first) = existing.first() {
                    if first.created_at > document.last_modified {
                        self.index
                            .reuse_document_chunks(&document.id, first_id)
                            .await?;
                        report.reused_documents += 1;
                        report.chunk_count += existing.len();
                        continue;
                    }
                }
            }

            let chunks = self.embed_document(document, first_id, &mut report).await;
            self.index
                .delete_document_chunks(&document.id, first_id)
                .await?;
            report.chunk_count += chunks.len();
            self.index.add_document_chunks(chunks).await?;
            report.indexed_documents += 1;
        }

        self.index.finalize_creation().await?;
        info!(
            indexed = report.indexed_documents,
            reused = report.reused_documents,
            skipped = report.skipped_documents,
            chunks = report.chunk_count,
            failed = report.failed_chunks,
            "rebuild complete"
        );
        Ok(report)
    }

    /// Chunks and embeds one document, keeping whatever chunks succeed.
    async fn embed_document(
        &self,
        document: &SourceDocument,
        first_id: i64,
        report: &mut RebuildReport,
    ) -> Vec<Chunk> {
        let pieces = self.chunker.split_into_chunks(
            &document.body,
            self.config.chunk_tokens,
            self.config.overlap_tokens,
        );
        if pieces.len() > MAX_CHUNKS_PER_DOCUMENT {
            warn!(
                doc_id = %document.id,
                produced = pieces.len(),
                kept = MAX_CHUNKS_PER_DOCUMENT,
                "document overflows its chunk-id range, dropping the tail"
            );
        }

        let mut chunks = Vec::new();
        for (sequence, content) in pieces.into_iter().take(MAX_CHUNKS_PER_DOCUMENT).enumerate() {
            match self.embedder.embedding(&content).await {
                Ok(embedding) => chunks.push(Chunk {
                    id: first_id + sequence as i64,
                    doc_id: document.id.clone(),
                    language: document.language.clone(),
                    content,
                    embedding,
                    created_at: Utc::now(),
                    score: None,
                }),
                Err(err) => {
                    warn!(doc_id = %document.id, sequence, error = %err, "embedding failed, dropping chunk");
                    report.failed_chunks += 1;
                }
            }
        }
        debug!(doc_id = %document.id, chunks = chunks.len(), "document embedded");
        chunks
    }

    /// Embeds `text` and returns the most similar chunks.
    pub async fn query(
        &self,
        text: &str,
        limit: usize,
        language: Option<&str>,
    ) -> Result<Vec<Chunk>, IndexError> {
        let embedding = self.embedder.embedding(text).await?;
        self.index.similar_chunks(&embedding, limit, language).await
    }

    /// Like [`query`](Self::query) but post-filters with `keep`.
    ///
    /// Twice `limit` candidates are fetched to leave the filter room; if the
    /// filter rejects more than half of them the result simply comes up
    /// short, there is no second fetch.
    pub async fn query_filtered<F>(
        &self,
        text: &str,
        limit: usize,
        language: Option<&str>,
        keep: F,
    ) -> Result<Vec<Chunk>, IndexError>
    where
        F: Fn(&Chunk) -> bool,
    {
        let embedding = self.embedder.embedding(text).await?;
        let mut results = self
            .index
            .similar_chunks(&embedding, limit * 2, language)
            .await?;
        results.retain(|chunk| keep(chunk));
        results.truncate(limit);
        Ok(results)
    }

    /// Runs the index's clustering maintenance pass.
    pub async fn run_maintenance(&self) -> Result<(), IndexError> {
        self.index.run_maintenance().await
    }

    /// Usage accumulated by the embedding provider so far.
    pub fn usage(&self) -> crate::providers::UsageStats {
        self.embedder.usage()
    }

    fn is_excluded(&self, doc_id: &str) -> bool {
        self.exclude
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(doc_id))
    }
}
