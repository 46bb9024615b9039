//! SQLite-backed vector index with per-partition k-means clusters.
//!
//! Two tables: `chunks` holds content plus a little-endian f32 embedding
//! blob and an optional cluster assignment, `clusters` holds one centroid
//! blob per `(partition, cluster_id)`. Partitions are language tags when
//! language partitioning is on, otherwise the single empty-string
//! partition.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio_rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, warn};

use crate::config::IndexConfig;
use crate::index::{
    VectorIndex, decode_embedding, dot, encode_embedding, kmeans, nearest_centroid, normalize,
};
use crate::types::{CHUNK_SLOT_SPAN, Chunk, IndexError};

const GLOBAL_PARTITION: &str = "";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chunks (
    id          INTEGER PRIMARY KEY,
    doc_id      TEXT    NOT NULL,
    language    TEXT    NOT NULL,
    content     TEXT    NOT NULL,
    embedding   BLOB    NOT NULL,
    created_at  TEXT    NOT NULL,
    cluster_id  INTEGER
);
CREATE INDEX IF NOT EXISTS idx_chunks_doc ON chunks (doc_id);
CREATE INDEX IF NOT EXISTS idx_chunks_partition ON chunks (language, cluster_id);
CREATE TABLE IF NOT EXISTS clusters (
    language    TEXT    NOT NULL,
    cluster_id  INTEGER NOT NULL,
    centroid    BLOB    NOT NULL,
    PRIMARY KEY (language, cluster_id)
);
";

/// Raw row as it leaves a closure; embeddings and timestamps are decoded on
/// the async side so closures only deal in rusqlite errors.
struct ChunkRow {
    id: i64,
    doc_id: String,
    language: String,
    content: String,
    embedding: Vec<u8>,
    created_at: String,
}

impl ChunkRow {
    fn into_chunk(self) -> Result<Chunk, IndexError> {
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|err| {
                IndexError::Storage(format!("bad created_at on chunk {}: {err}", self.id))
            })?
            .with_timezone(&Utc);
        Ok(Chunk {
            id: self.id,
            doc_id: self.doc_id,
            language: self.language,
            content: self.content,
            embedding: decode_embedding(&self.embedding)?,
            created_at,
            score: None,
        })
    }
}

/// Column list matching the field order the `chunk_row!` sites read.
const SELECT_COLUMNS: &str = "id, doc_id, language, content, embedding, created_at";

macro_rules! chunk_row {
    () => {
        |row| {
            Ok(ChunkRow {
                id: row.get(0)?,
                doc_id: row.get(1)?,
                language: row.get(2)?,
                content: row.get(3)?,
                embedding: row.get(4)?,
                created_at: row.get(5)?,
            })
        }
    };
}

pub struct SqliteVectorIndex {
    conn: Connection,
    config: IndexConfig,
    in_rebuild: AtomicBool,
}

impl SqliteVectorIndex {
    /// Opens (creating if needed) an index database at `path`.
    pub async fn open(path: impl AsRef<Path>, config: IndexConfig) -> Result<Self, IndexError> {
        config.validate()?;
        let conn = Connection::open(path)
            .await
            .map_err(|err| IndexError::Storage(err.to_string()))?;
        Self::bootstrap(conn, config).await
    }

    /// In-memory index, handy for tests and throwaway corpora.
    pub async fn open_in_memory(config: IndexConfig) -> Result<Self, IndexError> {
        config.validate()?;
        let conn = Connection::open_in_memory()
            .await
            .map_err(|err| IndexError::Storage(err.to_string()))?;
        Self::bootstrap(conn, config).await
    }

    async fn bootstrap(conn: Connection, config: IndexConfig) -> Result<Self, IndexError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)
                .map_err(tokio_rusqlite::Error::Rusqlite)
        })
        .await
        .map_err(|err| IndexError::Storage(err.to_string()))?;
        Ok(Self {
            conn,
            config,
            in_rebuild: AtomicBool::new(false),
        })
    }

    /// Partition key for a query or chunk language.
    fn partition_for(&self, language: Option<&str>) -> String {
        if self.config.partition_by_language {
            language.unwrap_or(GLOBAL_PARTITION).to_string()
        } else {
            GLOBAL_PARTITION.to_string()
        }
    }

    /// Partitions that currently hold chunks.
    async fn live_partitions(&self) -> Result<Vec<String>, IndexError> {
        if !self.config.partition_by_language {
            return Ok(vec![GLOBAL_PARTITION.to_string()]);
        }
        self.conn
            .call(|conn| {
                let mut stmt = conn
                    .prepare("SELECT DISTINCT language FROM chunks")
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut partitions = Vec::new();
                for row in rows {
                    partitions.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(partitions)
            })
            .await
            .map_err(|err| IndexError::Storage(err.to_string()))
    }

    /// `WHERE` fragment selecting one partition's chunks. With partitioning
    /// off the global partition spans every row, so the bound parameter is
    /// compared to itself.
    fn partition_filter(&self) -> &'static str {
        if self.config.partition_by_language {
            "language = ?1"
        } else {
            "?1 = ?1"
        }
    }

    async fn centroids_for(&self, partition: &str) -> Result<Vec<Vec<f32>>, IndexError> {
        let partition = partition.to_string();
        let blobs = self
            .conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT centroid FROM clusters WHERE language = ?1 ORDER BY cluster_id",
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let rows = stmt
                    .query_map([&partition], |row| row.get::<_, Vec<u8>>(0))
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut blobs = Vec::new();
                for row in rows {
                    blobs.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(blobs)
            })
            .await
            .map_err(|err| IndexError::Storage(err.to_string()))?;

        blobs.iter().map(|blob| decode_embedding(blob)).collect()
    }

    /// Builds (or rebuilds) the centroid set for one partition from a random
    /// sample of its chunks, replacing the previous set and reassigning every
    /// chunk in the partition within a single transaction. A failure leaves
    /// the partition's old centroids and assignments untouched.
    async fn rebuild_partition_clusters(&self, partition: &str) -> Result<usize, IndexError> {
        let filter = self.partition_filter();
        let sample_size = self.config.cluster_sample_size;
        let partition_owned = partition.to_string();

        let (total, sample_blobs) = self
            .conn
            .call(move |conn| {
                let total: i64 = conn
                    .query_row(
                        &format!("SELECT COUNT(*) FROM chunks WHERE {filter}"),
                        [&partition_owned],
                        |row| row.get(0),
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT embedding FROM chunks WHERE {filter} \
                         ORDER BY RANDOM() LIMIT {sample_size}"
                    ))
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let rows = stmt
                    .query_map([&partition_owned], |row| row.get::<_, Vec<u8>>(0))
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut blobs = Vec::new();
                for row in rows {
                    blobs.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok((total as usize, blobs))
            })
            .await
            .map_err(|err| IndexError::Storage(err.to_string()))?;

        if total == 0 {
            debug!(partition, "no chunks, skipping cluster build");
            return Ok(0);
        }

        let samples = sample_blobs
            .iter()
            .map(|blob| decode_embedding(blob))
            .collect::<Result<Vec<_>, _>>()?;

        // Small partitions collapse into one cluster; pruning buys nothing
        // until there are several clusters' worth of chunks.
        let k = if samples.len() < 3 * self.config.cluster_size {
            1
        } else {
            total.div_ceil(self.config.cluster_size)
        };

        let mut rng = StdRng::from_os_rng();
        let centroids = kmeans::cluster_vectors(&samples, k, &mut rng)?;
        info!(
            partition,
            chunks = total,
            sampled = samples.len(),
            clusters = centroids.len(),
            "built partition centroids"
        );

        // Assignments for the whole partition are computed against the new
        // centroids and written in the same transaction that swaps them in,
        // so no commit point leaves centroids without matching assignments.
        let partition_owned = partition.to_string();
        let all_rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(&format!("SELECT id, embedding FROM chunks WHERE {filter}"))
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let rows = stmt
                    .query_map([&partition_owned], |row| {
                        Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut pending = Vec::new();
                for row in rows {
                    pending.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(pending)
            })
            .await
            .map_err(|err| IndexError::Storage(err.to_string()))?;

        let mut assignments = Vec::with_capacity(all_rows.len());
        for (id, blob) in &all_rows {
            let embedding = decode_embedding(blob)?;
            if let Some(cluster) = nearest_centroid(&centroids, &embedding) {
                assignments.push((*id, cluster as i64));
            }
        }

        let encoded: Vec<Vec<u8>> = centroids.iter().map(|c| encode_embedding(c)).collect();
        let partition_owned = partition.to_string();
        self.conn
            .call(move |conn| {
                let tx = conn
                    .transaction()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.execute("DELETE FROM clusters WHERE language = ?1", [&partition_owned])
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                for (cluster_id, blob) in encoded.iter().enumerate() {
                    tx.execute(
                        "INSERT INTO clusters (language, cluster_id, centroid) VALUES (?1, ?2, ?3)",
                        params![&partition_owned, cluster_id as i64, blob],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                }
                for (id, cluster) in &assignments {
                    tx.execute(
                        "UPDATE chunks SET cluster_id = ?1 WHERE id = ?2",
                        params![cluster, id],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                }
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await
            .map_err(|err| IndexError::Clustering(format!("centroid replace failed: {err}")))?;

        Ok(centroids.len())
    }

    /// Assigns every unassigned chunk in the partition to its nearest
    /// centroid. No-ops when the partition has no centroids yet.
    async fn assign_partition(&self, partition: &str) -> Result<usize, IndexError> {
        let centroids = self.centroids_for(partition).await?;
        if centroids.is_empty() {
            return Ok(0);
        }

        let filter = self.partition_filter();
        let partition_owned = partition.to_string();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT id, embedding FROM chunks \
                         WHERE {filter} AND cluster_id IS NULL"
                    ))
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let rows = stmt
                    .query_map([&partition_owned], |row| {
                        Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut pending = Vec::new();
                for row in rows {
                    pending.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(pending)
            })
            .await
            .map_err(|err| IndexError::Storage(err.to_string()))?;

        let mut assignments = Vec::with_capacity(rows.len());
        for (id, blob) in &rows {
            let embedding = decode_embedding(blob)?;
            if let Some(cluster) = nearest_centroid(&centroids, &embedding) {
                assignments.push((*id, cluster as i64));
            }
        }

        let assigned = assignments.len();
        self.conn
            .call(move |conn| {
                let tx = conn
                    .transaction()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                for (id, cluster) in &assignments {
                    tx.execute(
                        "UPDATE chunks SET cluster_id = ?1 WHERE id = ?2",
                        params![cluster, id],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                }
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await
            .map_err(|err| IndexError::Storage(err.to_string()))?;

        debug!(partition, assigned, "assigned chunks to centroids");
        Ok(assigned)
    }

    /// Candidate rows for a query: the nearest centroid's cluster when
    /// centroids exist, otherwise the whole partition (degraded scan).
    async fn candidate_rows(
        &self,
        partition: &str,
        query: &[f32],
    ) -> Result<Vec<ChunkRow>, IndexError> {
        let centroids = self.centroids_for(partition).await?;
        let cluster = nearest_centroid(&centroids, query);
        if cluster.is_none() {
            warn!(partition, "no centroids, falling back to full partition scan");
        }

        let filter = self.partition_filter();
        let partition_owned = partition.to_string();
        self.conn
            .call(move |conn| {
                let mut rows = Vec::new();
                match cluster {
                    Some(cluster) => {
                        let mut stmt = conn
                            .prepare(&format!(
                                "SELECT {SELECT_COLUMNS} FROM chunks \
                                 WHERE {filter} AND cluster_id = ?2"
                            ))
                            .map_err(tokio_rusqlite::Error::Rusqlite)?;
                        let mapped = stmt
                            .query_map(
                                params![&partition_owned, cluster as i64],
                                chunk_row!(),
                            )
                            .map_err(tokio_rusqlite::Error::Rusqlite)?;
                        for row in mapped {
                            rows.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                        }
                    }
                    None => {
                        let mut stmt = conn
                            .prepare(&format!(
                                "SELECT {SELECT_COLUMNS} FROM chunks WHERE {filter}"
                            ))
                            .map_err(tokio_rusqlite::Error::Rusqlite)?;
                        let mapped = stmt
                            .query_map([&partition_owned], chunk_row!())
                            .map_err(tokio_rusqlite::Error::Rusqlite)?;
                        for row in mapped {
                            rows.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                        }
                    }
                }
                Ok(rows)
            })
            .await
            .map_err(|err| IndexError::Storage(err.to_string()))
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn start_creation(&self, clear: bool) -> Result<(), IndexError> {
        self.in_rebuild.store(true, Ordering::SeqCst);
        if clear {
            self.conn
                .call(|conn| {
                    let tx = conn
                        .transaction()
                        .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    tx.execute("DELETE FROM chunks", [])
                        .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    tx.execute("DELETE FROM clusters", [])
                        .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                    Ok(())
                })
                .await
                .map_err(|err| IndexError::Storage(err.to_string()))?;
            info!("cleared index for full rebuild");
        }
        Ok(())
    }

    async fn chunk(&self, id: i64) -> Result<Option<Chunk>, IndexError> {
        let row = self
            .conn
            .call(move |conn| {
                conn.query_row(
                    &format!("SELECT {SELECT_COLUMNS} FROM chunks WHERE id = ?1"),
                    [id],
                    chunk_row!(),
                )
                .optional()
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map_err(|err| IndexError::Storage(err.to_string()))?;
        row.map(ChunkRow::into_chunk).transpose()
    }

    async fn document_chunks(
        &self,
        doc_id: &str,
        first_id: i64,
    ) -> Result<Vec<Chunk>, IndexError> {
        let doc_id = doc_id.to_string();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {SELECT_COLUMNS} FROM chunks \
                         WHERE doc_id = ?1 AND id >= ?2 AND id < ?3 ORDER BY id"
                    ))
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mapped = stmt
                    .query_map(
                        params![&doc_id, first_id, first_id + CHUNK_SLOT_SPAN],
                        chunk_row!(),
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut rows = Vec::new();
                for row in mapped {
                    rows.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(rows)
            })
            .await
            .map_err(|err| IndexError::Storage(err.to_string()))?;
        rows.into_iter().map(ChunkRow::into_chunk).collect()
    }

    async fn reuse_document_chunks(&self, doc_id: &str, _first_id: i64) -> Result<(), IndexError> {
        // Rows stay where they are; assignments survive untouched.
        debug!(doc_id, "reusing existing chunks");
        Ok(())
    }

    async fn delete_document_chunks(
        &self,
        doc_id: &str,
        first_id: i64,
    ) -> Result<usize, IndexError> {
        let doc_id = doc_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM chunks WHERE doc_id = ?1 AND id >= ?2 AND id < ?3",
                    params![&doc_id, first_id, first_id + CHUNK_SLOT_SPAN],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map_err(|err| IndexError::Storage(err.to_string()))
    }

    async fn add_document_chunks(&self, chunks: Vec<Chunk>) -> Result<(), IndexError> {
        if chunks.is_empty() {
            return Ok(());
        }
        for chunk in &chunks {
            if chunk.embedding.len() != self.config.embedding_dimension {
                return Err(IndexError::Storage(format!(
                    "chunk {} has dimension {}, index expects {}",
                    chunk.id,
                    chunk.embedding.len(),
                    self.config.embedding_dimension
                )));
            }
        }

        let rows: Vec<(i64, String, String, String, Vec<u8>, String)> = chunks
            .into_iter()
            .map(|mut chunk| {
                normalize(&mut chunk.embedding);
                (
                    chunk.id,
                    chunk.doc_id,
                    chunk.language,
                    chunk.content,
                    encode_embedding(&chunk.embedding),
                    chunk.created_at.to_rfc3339(),
                )
            })
            .collect();

        self.conn
            .call(move |conn| {
                let tx = conn
                    .transaction()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                for (id, doc_id, language, content, blob, created_at) in &rows {
                    tx.execute(
                        "INSERT OR REPLACE INTO chunks \
                         (id, doc_id, language, content, embedding, created_at, cluster_id) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)",
                        params![id, doc_id, language, content, blob, created_at],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                }
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await
            .map_err(|err| IndexError::Storage(err.to_string()))
    }

    async fn finalize_creation(&self) -> Result<(), IndexError> {
        for partition in self.live_partitions().await? {
            if self.centroids_for(&partition).await?.is_empty() {
                self.rebuild_partition_clusters(&partition).await?;
            }
            self.assign_partition(&partition).await?;
        }

        self.conn
            .call(|conn| {
                conn.execute_batch("PRAGMA optimize;")
                    .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map_err(|err| IndexError::Storage(err.to_string()))?;

        self.in_rebuild.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn run_maintenance(&self) -> Result<(), IndexError> {
        let partitions = self.live_partitions().await?;

        // Drop centroids of partitions that no longer hold chunks. Live
        // partitions keep their current centroids and assignments until
        // their own atomic rebuild below, so a failure partway through
        // leaves every untouched partition fully queryable.
        let keep = partitions.clone();
        self.conn
            .call(move |conn| {
                let tx = conn
                    .transaction()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut stmt = tx
                    .prepare("SELECT DISTINCT language FROM clusters")
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut stale = Vec::new();
                for row in rows {
                    let language = row.map_err(tokio_rusqlite::Error::Rusqlite)?;
                    if !keep.contains(&language) {
                        stale.push(language);
                    }
                }
                drop(stmt);

                for language in &stale {
                    tx.execute("DELETE FROM clusters WHERE language = ?1", [language])
                        .map_err(tokio_rusqlite::Error::Rusqlite)?;
                }
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await
            .map_err(|err| IndexError::Storage(err.to_string()))?;

        for partition in &partitions {
            self.rebuild_partition_clusters(partition).await?;
        }
        info!(partitions = partitions.len(), "index maintenance complete");
        Ok(())
    }

    async fn similar_chunks(
        &self,
        query: &[f32],
        limit: usize,
        language: Option<&str>,
    ) -> Result<Vec<Chunk>, IndexError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.config.embedding_dimension {
            return Err(IndexError::Config(format!(
                "query has dimension {}, index expects {}",
                query.len(),
                self.config.embedding_dimension
            )));
        }

        let mut query = query.to_vec();
        normalize(&mut query);

        let partition = self.partition_for(language);
        let rows = self.candidate_rows(&partition, &query).await?;
        let threshold = self.config.threshold_fraction();

        let mut scored = Vec::new();
        for row in rows {
            let mut chunk = row.into_chunk()?;
            let similarity = dot(&chunk.embedding, &query);
            if similarity >= threshold {
                chunk.score = Some(similarity);
                scored.push(chunk);
            }
        }
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn statistics(&self) -> Result<HashMap<String, serde_json::Value>, IndexError> {
        let (chunk_count, assigned, cluster_count, by_partition, storage_bytes) = self
            .conn
            .call(|conn| {
                let chunk_count: i64 = conn
                    .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let assigned: i64 = conn
                    .query_row(
                        "SELECT COUNT(*) FROM chunks WHERE cluster_id IS NOT NULL",
                        [],
                        |row| row.get(0),
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let cluster_count: i64 = conn
                    .query_row("SELECT COUNT(*) FROM clusters", [], |row| row.get(0))
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;

                let mut stmt = conn
                    .prepare("SELECT language, COUNT(*) FROM clusters GROUP BY language")
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut by_partition = serde_json::Map::new();
                for row in rows {
                    let (language, count) = row.map_err(tokio_rusqlite::Error::Rusqlite)?;
                    by_partition.insert(language, serde_json::json!(count));
                }
                drop(stmt);

                let page_count: i64 = conn
                    .query_row("PRAGMA page_count", [], |row| row.get(0))
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let page_size: i64 = conn
                    .query_row("PRAGMA page_size", [], |row| row.get(0))
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;

                Ok((
                    chunk_count,
                    assigned,
                    cluster_count,
                    by_partition,
                    page_count * page_size,
                ))
            })
            .await
            .map_err(|err| IndexError::Storage(err.to_string()))?;

        Ok(HashMap::from([
            ("backend".to_string(), serde_json::json!("sqlite")),
            ("chunks".to_string(), serde_json::json!(chunk_count)),
            ("assigned_chunks".to_string(), serde_json::json!(assigned)),
            ("clusters".to_string(), serde_json::json!(cluster_count)),
            (
                "partitions".to_string(),
                serde_json::json!(by_partition.len()),
            ),
            (
                "clusters_by_partition".to_string(),
                serde_json::Value::Object(by_partition),
            ),
            (
                "storage_bytes".to_string(),
                serde_json::json!(storage_bytes),
            ),
            (
                "in_rebuild".to_string(),
                serde_json::json!(self.in_rebuild.load(Ordering::SeqCst)),
            ),
        ]))
    }
}
