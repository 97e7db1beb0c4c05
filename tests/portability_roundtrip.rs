//! Export/import round-trip over the embedded backend.

use ragweave::records::{
    CacheType, Document, DocumentStatus, Entity, Relation, VectorEntry, VectorKind,
};
use ragweave::stores::VectorFilter;
use ragweave::{StorageConfig, StorageError, StorageFacade};

mod common;
use common::*;

const CHUNK_TEXT: &str = "Alice works at TechCorp";

async fn facade() -> StorageFacade {
    init_tracing();
    StorageFacade::connect(StorageConfig::sqlite_in_memory().with_dimension(DIM))
        .await
        .expect("connect sqlite facade")
}

/// Populate a project with 2 entities, 1 relation, 1 document + chunk
/// vector, a status row, a cache entry, and a prefixed KV key.
async fn populate(facade: &StorageFacade) -> (String, String, Vec<f32>) {
    let pid = make_graph_project(facade).await;
    let graph = facade.graph();

    graph
        .upsert_entity(
            &pid,
            Entity::new("Alice", "PERSON", "Engineer").with_source_chunks(["c1"]),
        )
        .await
        .unwrap();
    graph
        .upsert_entity(
            &pid,
            Entity::new("TechCorp", "ORGANIZATION", "Employer").with_source_chunks(["c1"]),
        )
        .await
        .unwrap();
    graph
        .upsert_relation(
            &pid,
            Relation::new("Alice", "TechCorp", "works at")
                .with_weight(0.8)
                .with_source_chunks(["c1"]),
        )
        .await
        .unwrap();

    let document = Document::new(&pid, "text").with_file_name("bio.md");
    let doc_id = document.id.to_string();
    facade.projects().upsert_document(document).await.unwrap();

    let embedding = blended_vector(42, DIM);
    facade
        .vectors()
        .upsert(
            VectorEntry::new(format!("{pid}/c1"), &pid, VectorKind::Chunk, CHUNK_TEXT, embedding.clone())
                .with_chunk(&doc_id, 0),
        )
        .await
        .unwrap();

    facade
        .doc_status()
        .set_status(DocumentStatus::pending(&doc_id, "/data/bio.md").as_processing())
        .await
        .unwrap();
    facade
        .extraction_cache()
        .store(&pid, CacheType::EntityExtraction, Some("c1"), "hash-bio", "[alice, techcorp]", 64)
        .await
        .unwrap();
    facade
        .kv()
        .set(&format!("project:{pid}:ingest_state"), "done")
        .await
        .unwrap();

    (pid, doc_id, embedding)
}

#[tokio::test]
async fn export_then_import_reproduces_counts_and_bytes() {
    let facade = facade().await;
    let (pid, _doc_id, embedding) = populate(&facade).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("project.db");
    let summary = facade.export_project(&pid, &path).await.unwrap();
    assert_eq!(summary.entities, 2);
    assert_eq!(summary.relations, 1);
    assert_eq!(summary.vectors, 1);
    assert_eq!(summary.documents, 1);
    assert_eq!(summary.statuses, 1);
    assert_eq!(summary.cache_entries, 1);
    assert_eq!(summary.kv_entries, 1);

    // the portable file is a plain SQLite database, magic header first
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[..16], b"SQLite format 3\0");

    let fresh = facade.projects().create_project("imported").await.unwrap();
    let new_pid = fresh.id.to_string();
    let imported = facade.import_project(&path, &new_pid).await.unwrap();
    assert_eq!(imported.entities, 2);
    assert_eq!(imported.relations, 1);
    assert_eq!(imported.vectors, 1);

    let stats = facade.graph().stats(&new_pid).await.unwrap();
    assert_eq!(stats.entity_count, 2);
    assert_eq!(stats.relation_count, 1);

    // congruent entities and relation under the new project id
    let alice = facade
        .graph()
        .get_entity(&new_pid, "alice")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(alice.entity_type, "PERSON");
    assert_eq!(alice.description, "Engineer");
    assert_eq!(alice.source_chunk_ids, vec!["c1"]);
    let relation = facade
        .graph()
        .get_relation(&new_pid, "alice", "techcorp")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(relation.description, "works at");
    assert_eq!(relation.weight, 0.8);

    // vector content and bytes survive, under the new project scope
    let hits = facade
        .vectors()
        .query(&embedding, 1, &VectorFilter::project(&new_pid))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entry.content, CHUNK_TEXT);
    assert_eq!(hits[0].entry.vector, embedding);
    assert_eq!(hits[0].entry.project_id, new_pid);

    // documents were remapped to avoid id collisions inside the same store
    let docs = facade
        .projects()
        .documents_for_project(&new_pid)
        .await
        .unwrap();
    assert_eq!(docs.len(), 1);
    let status = facade
        .doc_status()
        .get_status(&docs[0].id.to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.file_path, "/data/bio.md");

    // kv key was re-prefixed
    let value = facade
        .kv()
        .get(&format!("project:{new_pid}:ingest_state"))
        .await
        .unwrap();
    assert_eq!(value.as_deref(), Some("done"));

    // the source project is untouched
    let original = facade.graph().stats(&pid).await.unwrap();
    assert_eq!(original.entity_count, 2);
}

#[tokio::test]
async fn export_rejects_unknown_project_and_existing_destination() {
    let facade = facade().await;
    let (pid, _, _) = populate(&facade).await;
    let dir = tempfile::tempdir().unwrap();

    let err = facade
        .export_project(&uuid::Uuid::new_v4().to_string(), dir.path().join("x.db"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidArgument { .. }));

    let path = dir.path().join("dup.db");
    facade.export_project(&pid, &path).await.unwrap();
    let err = facade.export_project(&pid, &path).await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidArgument { .. }));
}

#[tokio::test]
async fn import_validates_file_and_magic() {
    let facade = facade().await;
    let target = facade.projects().create_project("target").await.unwrap();
    let target_id = target.id.to_string();
    let dir = tempfile::tempdir().unwrap();

    let err = facade
        .import_project(dir.path().join("missing.db"), &target_id)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidArgument { .. }));

    let garbage = dir.path().join("garbage.db");
    std::fs::write(&garbage, b"definitely not a database file").unwrap();
    let err = facade.import_project(&garbage, &target_id).await.unwrap_err();
    assert!(matches!(err, StorageError::FileFormat { .. }));

    let err = facade
        .import_project(dir.path().join("missing.db"), "not-a-uuid")
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidArgument { .. }));
}
