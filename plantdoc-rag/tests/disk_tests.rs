//! Persistence tests for the directory-backed vector index.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::{KeywordEmbedder, RecordingGenerator, corpus};
use plantdoc_rag::{
    Chunk, DiskVectorIndex, IndexEntry, IngestMode, RagConfig, RagError, RagPipeline, VectorIndex,
};

fn entry(id: &str, vector: Vec<f32>) -> IndexEntry {
    let mut metadata = HashMap::new();
    metadata.insert("crop".to_string(), "Tomato".to_string());
    IndexEntry {
        vector,
        chunk: Chunk {
            id: id.to_string(),
            text: format!("text of {id}"),
            document_id: "doc".to_string(),
            offset: 0,
            metadata,
        },
    }
}

#[tokio::test]
async fn persist_and_load_round_trip_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let index = DiskVectorIndex::new(dir.path());
    let entries = vec![
        entry("a", vec![0.1, 0.2, 0.3]),
        entry("b", vec![-1.5, 1.0e-7, 3.25]),
        entry("c", vec![0.333_333_34, 0.0, -0.0]),
    ];
    index.upsert(&entries).await.unwrap();
    index.set_embedding_model("keyword-hash-v1").await.unwrap();
    index.persist().await.unwrap();

    let reloaded = DiskVectorIndex::open(dir.path()).await.unwrap();
    assert_eq!(reloaded.len().await, 3);
    assert_eq!(reloaded.dimension().await, Some(3));
    assert_eq!(reloaded.embedding_model().await.as_deref(), Some("keyword-hash-v1"));

    let query = [0.1, 0.2, 0.3];
    let before = index.query(&query, 3).await.unwrap();
    let after = reloaded.query(&query, 3).await.unwrap();
    assert_eq!(before, after);
    assert_eq!(after[0].chunk.metadata["crop"], "Tomato");
}

#[tokio::test]
async fn appends_after_reload_are_additive() {
    let dir = tempfile::tempdir().unwrap();
    let index = DiskVectorIndex::new(dir.path());
    index.upsert(&[entry("a", vec![1.0, 0.0]), entry("b", vec![0.0, 1.0])]).await.unwrap();
    index.persist().await.unwrap();

    let reopened = DiskVectorIndex::open(dir.path()).await.unwrap();
    reopened.upsert(&[entry("c", vec![1.0, 1.0])]).await.unwrap();
    reopened.persist().await.unwrap();

    let lines = std::fs::read_to_string(dir.path().join("entries.jsonl")).unwrap();
    assert_eq!(lines.lines().count(), 3);
    let final_index = DiskVectorIndex::open(dir.path()).await.unwrap();
    assert_eq!(final_index.len().await, 3);
    assert!(final_index.contains("c").await);
}

#[tokio::test]
async fn replacing_a_persisted_entry_rewrites_it() {
    let dir = tempfile::tempdir().unwrap();
    let index = DiskVectorIndex::new(dir.path());
    index.upsert(&[entry("a", vec![1.0, 0.0]), entry("b", vec![0.0, 1.0])]).await.unwrap();
    index.persist().await.unwrap();

    index.upsert(&[entry("a", vec![0.0, 1.0])]).await.unwrap();
    index.persist().await.unwrap();

    let reloaded = DiskVectorIndex::open(dir.path()).await.unwrap();
    assert_eq!(reloaded.len().await, 2);
    let hits = reloaded.query(&[0.0, 1.0], 2).await.unwrap();
    assert!(hits.iter().all(|hit| (hit.score - 1.0).abs() < 1e-6));
    // Equal scores keep insertion order.
    assert_eq!(hits[0].chunk.id, "a");
}

#[tokio::test]
async fn unloaded_index_returns_empty_results() {
    let dir = tempfile::tempdir().unwrap();
    let index = DiskVectorIndex::new(dir.path().join("not-built"));
    assert!(index.is_empty().await);
    assert!(index.query(&[1.0, 0.0], 3).await.unwrap().is_empty());
}

#[tokio::test]
async fn opening_a_missing_index_is_index_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let err = DiskVectorIndex::open(dir.path().join("missing")).await.unwrap_err();
    assert!(matches!(err, RagError::IndexUnavailable { .. }));
    assert!(err.requires_reindex());
    assert!(err.to_string().contains("plantdoc build"));
}

#[tokio::test]
async fn corrupt_manifest_is_index_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("manifest.json"), b"{not json").unwrap();
    let err = DiskVectorIndex::open(dir.path()).await.unwrap_err();
    assert!(matches!(err, RagError::IndexUnavailable { .. }));
}

#[tokio::test]
async fn truncated_vectors_are_index_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let index = DiskVectorIndex::new(dir.path());
    index.upsert(&[entry("a", vec![1.0, 0.0]), entry("b", vec![0.0, 1.0])]).await.unwrap();
    index.persist().await.unwrap();

    let vectors = dir.path().join("vectors.f32");
    let bytes = std::fs::read(&vectors).unwrap();
    std::fs::write(&vectors, &bytes[..bytes.len() - 4]).unwrap();

    let err = DiskVectorIndex::open(dir.path()).await.unwrap_err();
    assert!(matches!(err, RagError::IndexUnavailable { .. }));
}

#[tokio::test]
async fn uncommitted_trailing_data_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let index = DiskVectorIndex::new(dir.path());
    index.upsert(&[entry("a", vec![1.0, 0.0])]).await.unwrap();
    index.persist().await.unwrap();

    // Simulate an append that crashed before the manifest was updated.
    let mut entries = std::fs::read_to_string(dir.path().join("entries.jsonl")).unwrap();
    entries.push_str(&serde_json::to_string(&entry("ghost", vec![0.0, 1.0]).chunk).unwrap());
    entries.push('\n');
    std::fs::write(dir.path().join("entries.jsonl"), entries).unwrap();

    let reloaded = DiskVectorIndex::open(dir.path()).await.unwrap();
    assert_eq!(reloaded.len().await, 1);
    assert!(!reloaded.contains("ghost").await);

    reloaded.upsert(&[entry("b", vec![0.0, 1.0])]).await.unwrap();
    reloaded.persist().await.unwrap();
    let lines = std::fs::read_to_string(dir.path().join("entries.jsonl")).unwrap();
    assert_eq!(lines.lines().count(), 2);
}

#[tokio::test]
async fn failed_append_is_rewritten_on_the_next_persist() {
    let dir = tempfile::tempdir().unwrap();
    let index = DiskVectorIndex::new(dir.path());
    index.upsert(&[entry("a", vec![1.0, 0.0]), entry("b", vec![0.0, 1.0])]).await.unwrap();
    index.persist().await.unwrap();

    // Block the vector file so the append fails after the entries file was extended.
    let vectors = dir.path().join("vectors.f32");
    let parked = dir.path().join("vectors.parked");
    std::fs::rename(&vectors, &parked).unwrap();
    std::fs::create_dir(&vectors).unwrap();

    index.upsert(&[entry("c", vec![0.6, 0.8])]).await.unwrap();
    let err = index.persist().await.unwrap_err();
    assert!(matches!(err, RagError::Storage { .. }));

    std::fs::remove_dir(&vectors).unwrap();
    std::fs::rename(&parked, &vectors).unwrap();
    index.persist().await.unwrap();

    let lines = std::fs::read_to_string(dir.path().join("entries.jsonl")).unwrap();
    assert_eq!(lines.lines().count(), 3);
    assert_eq!(std::fs::metadata(&vectors).unwrap().len(), 3 * 2 * 4);

    let reloaded = DiskVectorIndex::open(dir.path()).await.unwrap();
    let hits = reloaded.query(&[0.6, 0.8], 1).await.unwrap();
    assert_eq!(hits[0].chunk.id, "c");
    assert!((hits[0].score - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn failed_rewrite_keeps_the_committed_index() {
    let dir = tempfile::tempdir().unwrap();
    let index = DiskVectorIndex::new(dir.path());
    index.upsert(&[entry("a", vec![1.0, 0.0]), entry("b", vec![0.0, 1.0])]).await.unwrap();
    index.persist().await.unwrap();

    // Replacing a committed entry forces a rewrite; make its temporary file unwritable.
    let blocker = dir.path().join("vectors.f32.tmp");
    std::fs::create_dir(&blocker).unwrap();
    index.upsert(&[entry("a", vec![0.0, 1.0])]).await.unwrap();
    assert!(index.persist().await.is_err());

    let committed = DiskVectorIndex::open(dir.path()).await.unwrap();
    assert_eq!(committed.len().await, 2);
    let hits = committed.query(&[1.0, 0.0], 1).await.unwrap();
    assert_eq!(hits[0].chunk.id, "a");
    assert!((hits[0].score - 1.0).abs() < 1e-6);

    std::fs::remove_dir(&blocker).unwrap();
    index.persist().await.unwrap();
    let reloaded = DiskVectorIndex::open(dir.path()).await.unwrap();
    let hits = reloaded.query(&[0.0, 1.0], 2).await.unwrap();
    assert!(hits.iter().all(|hit| (hit.score - 1.0).abs() < 1e-6));
    assert!(!dir.path().join("entries.jsonl.tmp").exists());
}

#[tokio::test]
async fn clear_then_persist_empties_the_index() {
    let dir = tempfile::tempdir().unwrap();
    let index = DiskVectorIndex::new(dir.path());
    index.upsert(&[entry("a", vec![1.0, 0.0])]).await.unwrap();
    index.persist().await.unwrap();

    index.clear().await.unwrap();
    index.persist().await.unwrap();

    let reloaded = DiskVectorIndex::open(dir.path()).await.unwrap();
    assert!(reloaded.is_empty().await);
    assert_eq!(reloaded.dimension().await, None);
    reloaded.upsert(&[entry("a", vec![1.0, 0.0, 0.0])]).await.unwrap();
}

#[tokio::test]
async fn built_index_answers_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let pipeline = RagPipeline::builder()
            .config(RagConfig::default())
            .embedding_provider(Arc::new(KeywordEmbedder::new()))
            .vector_index(Arc::new(DiskVectorIndex::open_or_create(dir.path()).await.unwrap()))
            .generator(Arc::new(RecordingGenerator::new()))
            .build()
            .unwrap();
        let report = pipeline.build_index(&corpus(), IngestMode::SkipExisting).await.unwrap();
        assert_eq!(report.entry_count, corpus().len());
    }

    let generator = Arc::new(RecordingGenerator::new());
    let pipeline = RagPipeline::builder()
        .embedding_provider(Arc::new(KeywordEmbedder::new()))
        .vector_index(Arc::new(DiskVectorIndex::open(dir.path()).await.unwrap()))
        .generator(generator.clone())
        .build()
        .unwrap();
    pipeline.check_index_compatibility().await.unwrap();

    let answer = pipeline.answer("bacterial spot on tomato").await.unwrap();
    assert!(!answer.retrieval.is_empty());
    assert_eq!(generator.call_count(), 1);

    let again = pipeline.build_index(&corpus(), IngestMode::SkipExisting).await.unwrap();
    assert_eq!(again.entry_count, corpus().len());
    assert_eq!(again.chunks_indexed, 0);
}
