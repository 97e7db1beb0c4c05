//! Contract conformance runner for the embedded backend.
//!
//! Every test builds its own in-memory database (each one is a distinct
//! shared-cache namespace), so tests are fully isolated from each other.

use std::sync::Arc;

use ragweave::{StorageConfig, StorageFacade};

mod common;
use common::*;

async fn facade() -> StorageFacade {
    init_tracing();
    StorageFacade::connect(StorageConfig::sqlite_in_memory().with_dimension(DIM))
        .await
        .expect("connect sqlite facade")
}

#[tokio::test]
async fn test_project_isolation() {
    project_isolation(&facade().await).await;
}

#[tokio::test]
async fn test_name_normalization() {
    name_normalization(&facade().await).await;
}

#[tokio::test]
async fn test_entity_merge_union() {
    entity_merge_union(&facade().await).await;
}

#[tokio::test]
async fn test_relation_merge() {
    relation_merge(&facade().await).await;
}

#[tokio::test]
async fn test_self_loop_rejected() {
    self_loop_rejected(&facade().await).await;
}

#[tokio::test]
async fn test_graph_error_taxonomy() {
    graph_error_taxonomy(&facade().await).await;
}

#[tokio::test]
async fn test_bfs_limits() {
    bfs_limits(&facade().await).await;
}

#[tokio::test]
async fn test_bfs_bidirectional() {
    bfs_bidirectional(&facade().await).await;
}

#[tokio::test]
async fn test_shortest_path() {
    shortest_path(&facade().await).await;
}

#[tokio::test]
async fn test_node_degrees() {
    node_degrees(&facade().await).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_entity_upserts() {
    concurrent_entity_upserts(Arc::new(facade().await)).await;
}

#[tokio::test]
async fn test_vector_round_trip() {
    vector_round_trip(&facade().await, 100, 10).await;
}

#[tokio::test]
async fn test_vector_round_trip_large() {
    // larger corpus with a full-size embedding dimension
    let facade = StorageFacade::connect(StorageConfig::sqlite_in_memory().with_dimension(384))
        .await
        .expect("connect sqlite facade");
    let vectors = facade.vectors();
    let pid = make_project(&facade).await;

    let mut entries = Vec::new();
    for i in 0..1000 {
        entries.push(ragweave::records::VectorEntry::new(
            format!("{pid}/chunk-{i}"),
            &pid,
            ragweave::records::VectorKind::Chunk,
            format!("chunk {i}"),
            blended_vector(i, 384),
        ));
    }
    vectors.upsert_batch(entries).await.unwrap();

    let probe = blended_vector(123, 384);
    let hits = vectors
        .query(&probe, 10, &ragweave::stores::VectorFilter::project(&pid))
        .await
        .unwrap();
    assert_eq!(hits.len(), 10);
    assert_eq!(hits[0].entry.id, format!("{pid}/chunk-123"));
    assert!(hits[0].score > 0.9);
}

#[tokio::test]
async fn test_vector_validation_and_deletes() {
    vector_validation_and_deletes(&facade().await).await;
}

#[tokio::test]
async fn test_vector_filters_and_chunks() {
    vector_filters_and_chunks(&facade().await).await;
}

#[tokio::test]
async fn test_kv_contract() {
    kv_contract(&facade().await).await;
}

#[tokio::test]
async fn test_kv_clear_and_size() {
    // global clear/size assertions only make sense on a private database
    let facade = facade().await;
    let kv = facade.kv();
    kv.set("a", "1").await.unwrap();
    kv.set("b", "2").await.unwrap();
    assert_eq!(kv.size().await.unwrap(), 2);
    let keys = kv.keys(None).await.unwrap();
    assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    kv.clear().await.unwrap();
    assert_eq!(kv.size().await.unwrap(), 0);
}

#[tokio::test]
async fn test_cache_contract() {
    cache_contract(&facade().await).await;
}

#[tokio::test]
async fn test_doc_status_contract() {
    doc_status_contract(&facade().await).await;
}

#[tokio::test]
async fn test_doc_status_clear_and_size() {
    let facade = facade().await;
    let store = facade.doc_status();
    store
        .set_status(ragweave::records::DocumentStatus::pending("d1", "/a"))
        .await
        .unwrap();
    store
        .set_status(ragweave::records::DocumentStatus::pending("d2", "/b"))
        .await
        .unwrap();
    assert_eq!(store.size().await.unwrap(), 2);
    assert_eq!(store.all_statuses().await.unwrap().len(), 2);
    store.clear().await.unwrap();
    assert_eq!(store.size().await.unwrap(), 0);
}

#[tokio::test]
async fn test_cascade_delete() {
    cascade_delete(&facade().await).await;
}

#[tokio::test]
async fn test_vectors_size_spans_projects() {
    let facade = facade().await;
    let vectors = facade.vectors();
    let p_a = make_project(&facade).await;
    let p_b = make_project(&facade).await;
    for (pid, tag) in [(&p_a, "a"), (&p_b, "b")] {
        vectors
            .upsert(ragweave::records::VectorEntry::new(
                format!("{pid}/{tag}"),
                pid,
                ragweave::records::VectorKind::Chunk,
                tag,
                blended_vector(3, DIM),
            ))
            .await
            .unwrap();
    }
    assert_eq!(vectors.size().await.unwrap(), 2);

    // queries stay project-scoped even though size is global
    let hits = vectors
        .query(
            &blended_vector(3, DIM),
            10,
            &ragweave::stores::VectorFilter::project(&p_a),
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entry.project_id, p_a);
}
