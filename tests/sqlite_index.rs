//! End-to-end behavior of the SQLite vector index.

use chrono::Utc;
use ragmill::index::{SqliteVectorIndex, VectorIndex};
use ragmill::{Chunk, IndexConfig};

fn config(dimension: usize) -> IndexConfig {
    IndexConfig {
        embedding_dimension: dimension,
        similarity_threshold: 50.0,
        ..Default::default()
    }
}

fn chunk(id: i64, doc_id: &str, language: &str, embedding: Vec<f32>) -> Chunk {
    Chunk {
        id,
        doc_id: doc_id.into(),
        language: language.into(),
        content: format!("chunk {id}"),
        embedding,
        created_at: Utc::now(),
        score: None,
    }
}

#[tokio::test]
async fn chunks_round_trip_with_order_and_timestamps() {
    let index = SqliteVectorIndex::open_in_memory(config(2)).await.unwrap();
    index
        .add_document_chunks(vec![
            chunk(102, "doc-a", "", vec![0.0, 1.0]),
            chunk(100, "doc-a", "", vec![1.0, 0.0]),
            chunk(101, "doc-a", "", vec![0.6, 0.8]),
        ])
        .await
        .unwrap();

    let fetched = index.chunk(101).await.unwrap().unwrap();
    assert_eq!(fetched.doc_id, "doc-a");
    assert_eq!(fetched.content, "chunk 101");
    // Stored vectors come back unit-normalized.
    let norm: f32 = fetched.embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-5);

    let all = index.document_chunks("doc-a", 100).await.unwrap();
    assert_eq!(
        all.iter().map(|c| c.id).collect::<Vec<_>>(),
        vec![100, 101, 102]
    );

    assert!(index.chunk(999).await.unwrap().is_none());
}

#[tokio::test]
async fn deletion_is_scoped_to_one_document_range() {
    let index = SqliteVectorIndex::open_in_memory(config(2)).await.unwrap();
    index
        .add_document_chunks(vec![
            chunk(100, "doc-a", "", vec![1.0, 0.0]),
            chunk(101, "doc-a", "", vec![0.0, 1.0]),
            chunk(200, "doc-b", "", vec![1.0, 0.0]),
        ])
        .await
        .unwrap();

    let deleted = index.delete_document_chunks("doc-a", 100).await.unwrap();
    assert_eq!(deleted, 2);
    assert!(index.document_chunks("doc-a", 100).await.unwrap().is_empty());
    assert_eq!(index.document_chunks("doc-b", 200).await.unwrap().len(), 1);
}

#[tokio::test]
async fn finalize_builds_clusters_and_assigns_every_chunk() {
    let index = SqliteVectorIndex::open_in_memory(config(2)).await.unwrap();
    index.start_creation(true).await.unwrap();
    index
        .add_document_chunks(vec![
            chunk(100, "doc-a", "", vec![1.0, 0.0]),
            chunk(101, "doc-a", "", vec![0.9, 0.1]),
            chunk(200, "doc-b", "", vec![0.0, 1.0]),
            chunk(201, "doc-b", "", vec![0.1, 0.9]),
        ])
        .await
        .unwrap();
    index.finalize_creation().await.unwrap();

    let stats = index.statistics().await.unwrap();
    assert_eq!(stats["chunks"], serde_json::json!(4));
    assert_eq!(stats["assigned_chunks"], serde_json::json!(4));
    assert!(stats["clusters"].as_i64().unwrap() >= 1);
    assert_eq!(stats["in_rebuild"], serde_json::json!(false));
}

#[tokio::test]
async fn queries_rank_filter_and_limit() {
    let index = SqliteVectorIndex::open_in_memory(config(2)).await.unwrap();
    index
        .add_document_chunks(vec![
            chunk(100, "doc-a", "", vec![1.0, 0.0]),
            chunk(101, "doc-a", "", vec![0.8, 0.6]),
            // Orthogonal to the query, below the 50% threshold.
            chunk(102, "doc-a", "", vec![0.0, 1.0]),
        ])
        .await
        .unwrap();
    index.finalize_creation().await.unwrap();

    let hits = index
        .similar_chunks(&[1.0, 0.0], 10, None)
        .await
        .unwrap();
    assert_eq!(hits.iter().map(|c| c.id).collect::<Vec<_>>(), vec![100, 101]);
    assert!(hits[0].score.unwrap() > hits[1].score.unwrap());
    assert!(hits.iter().all(|c| c.score.unwrap() >= 0.5));

    let limited = index.similar_chunks(&[1.0, 0.0], 1, None).await.unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].id, 100);

    assert!(index
        .similar_chunks(&[1.0, 0.0], 0, None)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn queries_work_before_any_clustering_pass() {
    let index = SqliteVectorIndex::open_in_memory(config(2)).await.unwrap();
    index
        .add_document_chunks(vec![chunk(100, "doc-a", "", vec![1.0, 0.0])])
        .await
        .unwrap();

    // No finalize yet, so the partition has no centroids.
    let hits = index.similar_chunks(&[1.0, 0.0], 5, None).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, 100);
}

#[tokio::test]
async fn wrong_query_dimension_is_rejected() {
    let index = SqliteVectorIndex::open_in_memory(config(2)).await.unwrap();
    assert!(index.similar_chunks(&[1.0, 0.0, 0.0], 5, None).await.is_err());
    assert!(index
        .add_document_chunks(vec![chunk(100, "doc-a", "", vec![1.0])])
        .await
        .is_err());
}

#[tokio::test]
async fn language_partitions_stay_isolated() {
    let mut config = config(2);
    config.partition_by_language = true;
    let index = SqliteVectorIndex::open_in_memory(config).await.unwrap();
    index
        .add_document_chunks(vec![
            chunk(100, "doc-en", "en", vec![1.0, 0.0]),
            chunk(200, "doc-de", "de", vec![1.0, 0.0]),
        ])
        .await
        .unwrap();
    index.finalize_creation().await.unwrap();

    let hits = index
        .similar_chunks(&[1.0, 0.0], 10, Some("en"))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].doc_id, "doc-en");

    let stats = index.statistics().await.unwrap();
    assert_eq!(stats["partitions"], serde_json::json!(2));
    assert_eq!(stats["clusters_by_partition"]["en"], serde_json::json!(1));
    assert_eq!(stats["clusters_by_partition"]["de"], serde_json::json!(1));
}

#[tokio::test]
async fn maintenance_reclusters_and_drops_stale_partitions() {
    let mut config = config(2);
    config.partition_by_language = true;
    let index = SqliteVectorIndex::open_in_memory(config).await.unwrap();
    index
        .add_document_chunks(vec![
            chunk(100, "doc-en", "en", vec![1.0, 0.0]),
            chunk(200, "doc-de", "de", vec![0.0, 1.0]),
        ])
        .await
        .unwrap();
    index.finalize_creation().await.unwrap();

    index.delete_document_chunks("doc-de", 200).await.unwrap();
    index.run_maintenance().await.unwrap();

    let stats = index.statistics().await.unwrap();
    assert_eq!(stats["partitions"], serde_json::json!(1));
    assert_eq!(stats["assigned_chunks"], serde_json::json!(1));
}

#[tokio::test]
async fn failed_maintenance_leaves_healthy_partitions_queryable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.sqlite");
    let mut config = config(2);
    config.partition_by_language = true;

    let index = SqliteVectorIndex::open(&path, config).await.unwrap();
    index
        .add_document_chunks(vec![
            chunk(100, "doc-en", "en", vec![1.0, 0.0]),
            chunk(200, "doc-de", "de", vec![0.0, 1.0]),
        ])
        .await
        .unwrap();
    index.finalize_creation().await.unwrap();

    // Corrupt the de partition's stored vector so its next clustering pass
    // fails while decoding.
    let raw = tokio_rusqlite::Connection::open(&path).await.unwrap();
    raw.call(|conn| {
        conn.execute("UPDATE chunks SET embedding = x'0102' WHERE id = 200", [])
            .map_err(tokio_rusqlite::Error::Rusqlite)
    })
    .await
    .unwrap();

    assert!(index.run_maintenance().await.is_err());

    // Partitions the failed pass did not replace keep centroids and
    // assignments consistent, so queries still return their chunks.
    let hits = index
        .similar_chunks(&[1.0, 0.0], 5, Some("en"))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].doc_id, "doc-en");
}

#[tokio::test]
async fn index_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.sqlite");

    {
        let index = SqliteVectorIndex::open(&path, config(2)).await.unwrap();
        index
            .add_document_chunks(vec![chunk(100, "doc-a", "", vec![1.0, 0.0])])
            .await
            .unwrap();
        index.finalize_creation().await.unwrap();
    }

    let reopened = SqliteVectorIndex::open(&path, config(2)).await.unwrap();
    let hits = reopened
        .similar_chunks(&[1.0, 0.0], 5, None)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].doc_id, "doc-a");
}

#[tokio::test]
async fn start_creation_with_clear_empties_the_index() {
    let index = SqliteVectorIndex::open_in_memory(config(2)).await.unwrap();
    index
        .add_document_chunks(vec![chunk(100, "doc-a", "", vec![1.0, 0.0])])
        .await
        .unwrap();
    index.finalize_creation().await.unwrap();

    index.start_creation(true).await.unwrap();
    let stats = index.statistics().await.unwrap();
    assert_eq!(stats["chunks"], serde_json::json!(0));
    assert_eq!(stats["clusters"], serde_json::json!(0));
    assert_eq!(stats["in_rebuild"], serde_json::json!(true));
}
