//! Contract conformance harness.
//!
//! One abstract set of scenarios exercised through the facade, run by two
//! concrete runners (`contract_sqlite.rs`, `contract_postgres.rs`). The two
//! back ends must be observationally identical under every function here.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use ragweave::StorageFacade;
use ragweave::errors::StorageError;
use ragweave::records::{
    CacheType, Document, DocumentStatus, Entity, ProcessingStatus, Relation, VectorEntry,
    VectorKind,
};
use ragweave::stores::VectorFilter;
use uuid::Uuid;

/// Dimension the contract databases are migrated with.
pub const DIM: usize = 8;

static TRACING: Once = Once::new();

/// Route engine logs through the test writer; `RUST_LOG` filters as usual.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Deterministic normalized probe vector for slot `i`.
pub fn axis_vector(i: usize, dim: usize) -> Vec<f32> {
    let mut v = vec![0.0; dim];
    v[i % dim] = 1.0;
    v
}

/// Deterministic non-axis vector, normalized. Distinct seeds (within any
/// contiguous run of a few thousand) give distinct directions.
pub fn blended_vector(seed: u64, dim: usize) -> Vec<f32> {
    let mut v: Vec<f32> = (0..dim)
        .map(|i| (((seed.wrapping_mul(31).wrapping_add(i as u64 * 7)) % 13) as f32) + 1.0)
        .collect();
    v[0] += (seed % 4096) as f32 * 0.05;
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    for x in &mut v {
        *x /= norm;
    }
    v
}

pub async fn make_project(facade: &StorageFacade) -> String {
    let project = facade
        .projects()
        .create_project(&format!("contract-{}", Uuid::new_v4()))
        .await
        .expect("create project");
    project.id.to_string()
}

pub async fn make_graph_project(facade: &StorageFacade) -> String {
    let pid = make_project(facade).await;
    facade
        .graph()
        .create_project_graph(&pid)
        .await
        .expect("create graph");
    pid
}

/// Same-named entities in two projects never collide, and reads on one
/// project only ever see that project's rows.
pub async fn project_isolation(facade: &StorageFacade) {
    let graph = facade.graph();
    let p_a = make_graph_project(facade).await;
    let p_b = make_graph_project(facade).await;

    graph
        .upsert_entity(&p_a, Entity::new("Apple", "ORGANIZATION", "Tech company"))
        .await
        .unwrap();
    graph
        .upsert_entity(&p_b, Entity::new("Apple", "FOOD", "Red fruit"))
        .await
        .unwrap();

    let a = graph.get_entity(&p_a, "apple").await.unwrap().unwrap();
    let b = graph.get_entity(&p_b, "apple").await.unwrap().unwrap();
    assert_eq!(a.entity_type, "ORGANIZATION");
    assert_eq!(a.description, "Tech company");
    assert_eq!(b.entity_type, "FOOD");
    assert_eq!(b.description, "Red fruit");

    assert_eq!(graph.get_all_entities(&p_a).await.unwrap().len(), 1);
    assert_eq!(graph.get_all_entities(&p_b).await.unwrap().len(), 1);

    // relation endpoints need not pre-exist; upsert order is not prescribed
    graph
        .upsert_relation(&p_a, Relation::new("Apple", "Cupertino", "based in"))
        .await
        .unwrap();
    assert!(graph.get_all_relations(&p_b).await.unwrap().is_empty());
}

/// `getEntity(P, N)` is insensitive to case and whitespace of `N`.
pub async fn name_normalization(facade: &StorageFacade) {
    let graph = facade.graph();
    let pid = make_graph_project(facade).await;

    graph
        .upsert_entity(&pid, Entity::new("Alan Turing", "PERSON", "Mathematician"))
        .await
        .unwrap();

    for probe in ["alan turing", "Alan Turing", "  ALAN   TURING  ", "alan\tturing"] {
        let found = graph.get_entity(&pid, probe).await.unwrap();
        assert!(found.is_some(), "probe {probe:?} missed");
        assert_eq!(found.unwrap().name, "alan turing");
    }
}

/// Re-upserting an entity merges chunk sets and keeps one row.
pub async fn entity_merge_union(facade: &StorageFacade) {
    let graph = facade.graph();
    let pid = make_graph_project(facade).await;

    graph
        .upsert_entity(
            &pid,
            Entity::new("Apple", "ORGANIZATION", "Tech company").with_source_chunks(["c1", "c2"]),
        )
        .await
        .unwrap();
    graph
        .upsert_entity(
            &pid,
            Entity::new("apple", "", "").with_source_chunks(["c2", "c3"]),
        )
        .await
        .unwrap();

    let all = graph.get_all_entities(&pid).await.unwrap();
    assert_eq!(all.len(), 1);
    let entity = &all[0];
    assert_eq!(entity.source_chunk_ids, vec!["c1", "c2", "c3"]);
    assert_eq!(entity.entity_type, "ORGANIZATION");
    assert_eq!(entity.description, "Tech company");
}

/// Relation upserts merge on `(src, tgt)`: chunk-union, max weight.
pub async fn relation_merge(facade: &StorageFacade) {
    let graph = facade.graph();
    let pid = make_graph_project(facade).await;

    graph
        .upsert_entity(&pid, Entity::new("Alice", "PERSON", ""))
        .await
        .unwrap();
    graph
        .upsert_entity(&pid, Entity::new("TechCorp", "ORGANIZATION", ""))
        .await
        .unwrap();

    graph
        .upsert_relation(
            &pid,
            Relation::new("Alice", "TechCorp", "works at")
                .with_weight(0.4)
                .with_source_chunks(["c1"]),
        )
        .await
        .unwrap();
    graph
        .upsert_relation(
            &pid,
            Relation::new("alice", "techcorp", "")
                .with_weight(0.9)
                .with_keywords("employment")
                .with_source_chunks(["c2"]),
        )
        .await
        .unwrap();

    let relation = graph
        .get_relation(&pid, "Alice", "TechCorp")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(relation.description, "works at");
    assert_eq!(relation.keywords, "employment");
    assert_eq!(relation.weight, 0.9);
    assert_eq!(relation.source_chunk_ids, vec!["c1", "c2"]);

    let stats = graph.stats(&pid).await.unwrap();
    assert_eq!(stats.entity_count, 2);
    assert_eq!(stats.relation_count, 1);
}

/// Self-loops are rejected with InvalidArgument, before touching storage.
pub async fn self_loop_rejected(facade: &StorageFacade) {
    let graph = facade.graph();
    let pid = make_graph_project(facade).await;
    let err = graph
        .upsert_relation(&pid, Relation::new("Apple", " APPLE ", "loop"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidArgument { .. }));
}

/// Graph operations on a project whose graph was never created fail with
/// NotInitialized; malformed project ids fail with InvalidArgument.
pub async fn graph_error_taxonomy(facade: &StorageFacade) {
    let graph = facade.graph();
    let pid = make_project(facade).await;

    assert!(!graph.graph_exists(&pid).await.unwrap());
    let err = graph.get_entity(&pid, "anything").await.unwrap_err();
    assert!(matches!(err, StorageError::NotInitialized { .. }));
    let err = graph
        .upsert_entity(&pid, Entity::new("x", "", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotInitialized { .. }));

    let err = graph.get_entity("not-a-uuid", "x").await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidArgument { .. }));

    // deletion is idempotent, even for graphs that never existed
    graph.delete_project_graph(&pid).await.unwrap();
    graph.create_project_graph(&pid).await.unwrap();
    graph.create_project_graph(&pid).await.unwrap();
    assert!(graph.graph_exists(&pid).await.unwrap());
    graph.delete_project_graph(&pid).await.unwrap();
    assert!(!graph.graph_exists(&pid).await.unwrap());
}

fn star_entities() -> Vec<Entity> {
    ["A", "B", "C", "D", "E"]
        .into_iter()
        .map(|name| Entity::new(name, "NODE", ""))
        .collect()
}

fn star_relations() -> Vec<Relation> {
    ["B", "C", "D", "E"]
        .into_iter()
        .map(|tgt| Relation::new("A", tgt, "edge"))
        .collect()
}

/// BFS respects depth and node limits; depth 0 returns only the start.
pub async fn bfs_limits(facade: &StorageFacade) {
    let graph = facade.graph();
    let pid = make_graph_project(facade).await;
    graph.upsert_entities(&pid, star_entities()).await.unwrap();
    graph.upsert_relations(&pid, star_relations()).await.unwrap();

    let bounded = graph.traverse_bfs(&pid, "a", 10, 3).await.unwrap();
    assert!(!bounded.entities.is_empty() && bounded.entities.len() <= 3);
    assert_eq!(bounded.entities[0].name, "a");
    for relation in &bounded.relations {
        let names: Vec<&str> = bounded.entities.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&relation.src.as_str()));
        assert!(names.contains(&relation.tgt.as_str()));
    }

    let rooted = graph.traverse_bfs(&pid, "A", 0, 0).await.unwrap();
    assert_eq!(rooted.entities.len(), 1);
    assert_eq!(rooted.entities[0].name, "a");
    assert!(rooted.relations.is_empty());

    let full = graph.traverse(&pid, "a", 10).await.unwrap();
    assert_eq!(full.entities.len(), 5);
    assert_eq!(full.relations.len(), 4);

    // unknown start name is an empty subgraph, not an error
    let empty = graph.traverse_bfs(&pid, "nobody", 5, 0).await.unwrap();
    assert!(empty.entities.is_empty() && empty.relations.is_empty());
}

/// Traversal follows edges in both directions and dedups relations.
pub async fn bfs_bidirectional(facade: &StorageFacade) {
    let graph = facade.graph();
    let pid = make_graph_project(facade).await;
    graph.upsert_entities(&pid, star_entities()).await.unwrap();
    // chain a -> b -> c plus a back-edge c -> a
    graph
        .upsert_relations(
            &pid,
            vec![
                Relation::new("A", "B", ""),
                Relation::new("B", "C", ""),
                Relation::new("C", "A", ""),
            ],
        )
        .await
        .unwrap();

    // starting from c, the reverse edge b -> c still reaches b at depth 1
    let subgraph = graph.traverse_bfs(&pid, "c", 1, 0).await.unwrap();
    let names: Vec<&str> = subgraph.entities.iter().map(|e| e.name.as_str()).collect();
    assert!(names.contains(&"c") && names.contains(&"b") && names.contains(&"a"));

    let full = graph.traverse_bfs(&pid, "a", 5, 0).await.unwrap();
    assert_eq!(full.relations.len(), 3);
}

pub async fn shortest_path(facade: &StorageFacade) {
    let graph = facade.graph();
    let pid = make_graph_project(facade).await;
    let entities: Vec<Entity> = ["A", "B", "C", "D", "Z"]
        .into_iter()
        .map(|n| Entity::new(n, "NODE", ""))
        .collect();
    graph.upsert_entities(&pid, entities).await.unwrap();
    graph
        .upsert_relations(
            &pid,
            vec![
                Relation::new("A", "B", ""),
                Relation::new("B", "C", ""),
                Relation::new("C", "D", ""),
                Relation::new("A", "D", ""),
            ],
        )
        .await
        .unwrap();

    let path = graph.find_shortest_path(&pid, "a", "d").await.unwrap();
    let names: Vec<&str> = path.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["a", "d"]);

    let path = graph.find_shortest_path(&pid, "a", "c").await.unwrap();
    assert_eq!(path.len(), 3);
    assert_eq!(path[0].name, "a");
    assert_eq!(path[2].name, "c");

    // z is isolated
    assert!(graph.find_shortest_path(&pid, "a", "z").await.unwrap().is_empty());
    // identical endpoints collapse to a single entity
    let path = graph.find_shortest_path(&pid, "a", "A").await.unwrap();
    assert_eq!(path.len(), 1);
}

pub async fn node_degrees(facade: &StorageFacade) {
    let graph = facade.graph();
    let pid = make_graph_project(facade).await;
    graph.upsert_entities(&pid, star_entities()).await.unwrap();
    graph.upsert_relations(&pid, star_relations()).await.unwrap();

    let names = vec![
        "a".to_string(),
        "b".to_string(),
        "ghost".to_string(),
    ];
    let degrees = graph.node_degrees_batch(&pid, &names).await.unwrap();
    assert_eq!(degrees["a"], 4);
    assert_eq!(degrees["b"], 1);
    assert_eq!(degrees["ghost"], 0);

    let map = graph
        .entities_map_batch(&pid, &["A".to_string(), "E".to_string(), "ghost".to_string()])
        .await
        .unwrap();
    assert_eq!(map.len(), 2);
    assert!(map.contains_key("a") && map.contains_key("e"));
}

/// Ten concurrent upserts of the same key leave one row whose chunk set is
/// the union of all ten inputs.
pub async fn concurrent_entity_upserts(facade: Arc<StorageFacade>) {
    let pid = make_graph_project(&facade).await;

    let mut handles = Vec::new();
    for i in 0..10 {
        let graph = facade.graph();
        let pid = pid.clone();
        handles.push(tokio::spawn(async move {
            graph
                .upsert_entity(
                    &pid,
                    Entity::new("Apple", "ORGANIZATION", "Tech company")
                        .with_source_chunks([format!("chunk-{i}")]),
                )
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let all = facade.graph().get_all_entities(&pid).await.unwrap();
    assert_eq!(all.len(), 1);
    let expected: Vec<String> = (0..10).map(|i| format!("chunk-{i}")).collect();
    let mut expected = expected;
    expected.sort();
    assert_eq!(all[0].source_chunk_ids, expected);
}

/// Self-retrieval: an inserted vector is its own best match.
pub async fn vector_round_trip(facade: &StorageFacade, total: usize, k: usize) {
    let vectors = facade.vectors();
    let pid = make_project(facade).await;

    let mut entries = Vec::with_capacity(total);
    for i in 0..total {
        entries.push(VectorEntry::new(
            format!("{pid}/chunk-{i}"),
            &pid,
            VectorKind::Chunk,
            format!("chunk text {i}"),
            blended_vector(i as u64, DIM),
        ));
    }
    vectors.upsert_batch(entries).await.unwrap();

    let probe = blended_vector(7, DIM);
    let hits = vectors
        .query(&probe, k, &VectorFilter::project(&pid))
        .await
        .unwrap();
    assert_eq!(hits.len(), k.min(total));
    assert_eq!(hits[0].entry.id, format!("{pid}/chunk-7"));
    assert!(hits[0].score > 0.9, "self score {}", hits[0].score);
    for window in hits.windows(2) {
        assert!(window[0].score >= window[1].score);
    }
}

pub async fn vector_validation_and_deletes(facade: &StorageFacade) {
    let vectors = facade.vectors();
    let pid = make_project(facade).await;

    let err = vectors
        .upsert(VectorEntry::new(
            "bad-dim",
            &pid,
            VectorKind::Chunk,
            "",
            vec![0.0; DIM + 1],
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::DimensionMismatch { .. }));

    let err = vectors
        .upsert(VectorEntry::new(
            "no-project",
            "",
            VectorKind::Chunk,
            "",
            vec![0.0; DIM],
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidArgument { .. }));

    let id = format!("{pid}/v1");
    vectors
        .upsert(VectorEntry::new(
            &id,
            &pid,
            VectorKind::Entity,
            "apple",
            axis_vector(0, DIM),
        ))
        .await
        .unwrap();
    assert!(vectors.get(&id).await.unwrap().is_some());

    // replacing the row with the same id keeps a single copy
    vectors
        .upsert(VectorEntry::new(
            &id,
            &pid,
            VectorKind::Entity,
            "apple",
            axis_vector(1, DIM),
        ))
        .await
        .unwrap();
    let stored = vectors.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.vector, axis_vector(1, DIM));

    // entity-embedding deletion is scoped to the names given
    let deleted = vectors
        .delete_entity_embeddings(&pid, &["Apple".to_string()])
        .await
        .unwrap();
    assert_eq!(deleted, 1);

    // deleting a missing id is not an error
    assert_eq!(vectors.delete("never-existed").await.unwrap(), 0);
}

pub async fn vector_filters_and_chunks(facade: &StorageFacade) {
    let vectors = facade.vectors();
    let projects = facade.projects();
    let pid = make_project(facade).await;

    let document = Document::new(&pid, "text").with_file_name("report.md");
    let doc_id = document.id.to_string();
    projects.upsert_document(document).await.unwrap();

    let mut entries = Vec::new();
    for i in 0..4 {
        entries.push(
            VectorEntry::new(
                format!("{pid}/doc-chunk-{i}"),
                &pid,
                VectorKind::Chunk,
                format!("chunk {i}"),
                blended_vector(i, DIM),
            )
            .with_chunk(&doc_id, i as i64),
        );
    }
    entries.push(VectorEntry::new(
        format!("{pid}/entity-1"),
        &pid,
        VectorKind::Entity,
        "apple",
        blended_vector(40, DIM),
    ));
    vectors.upsert_batch(entries).await.unwrap();

    assert!(vectors.has_vectors(&doc_id).await.unwrap());
    let chunk_ids = vectors.chunk_ids_by_document(&pid, &doc_id).await.unwrap();
    assert_eq!(
        chunk_ids,
        (0..4).map(|i| format!("{pid}/doc-chunk-{i}")).collect::<Vec<_>>()
    );

    let only_entities = vectors
        .query(
            &blended_vector(40, DIM),
            10,
            &VectorFilter::project(&pid).with_kind(VectorKind::Entity),
        )
        .await
        .unwrap();
    assert_eq!(only_entities.len(), 1);
    assert_eq!(only_entities[0].entry.id, format!("{pid}/entity-1"));

    let id_set = vectors
        .query(
            &blended_vector(0, DIM),
            10,
            &VectorFilter::project(&pid)
                .with_ids([format!("{pid}/doc-chunk-0"), format!("{pid}/doc-chunk-1")]),
        )
        .await
        .unwrap();
    assert_eq!(id_set.len(), 2);

    // the unique (document, chunk_index) pair rejects duplicates under new ids
    let err = vectors
        .upsert(
            VectorEntry::new(
                format!("{pid}/dup"),
                &pid,
                VectorKind::Chunk,
                "dup",
                blended_vector(9, DIM),
            )
            .with_chunk(&doc_id, 0),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::ConstraintViolation { .. }));

    // deleting the document cascades to its chunk vectors
    projects.delete_document(&doc_id).await.unwrap();
    assert!(!vectors.has_vectors(&doc_id).await.unwrap());
}

pub async fn kv_contract(facade: &StorageFacade) {
    let kv = facade.kv();
    let pid = make_project(facade).await;
    let prefix = format!("project:{pid}:");

    kv.set(&format!("{prefix}alpha"), "1").await.unwrap();
    kv.set(&format!("{prefix}beta"), "2").await.unwrap();
    kv.set(&format!("{prefix}beta"), "2b").await.unwrap();

    assert_eq!(kv.get(&format!("{prefix}beta")).await.unwrap().as_deref(), Some("2b"));
    assert!(kv.exists(&format!("{prefix}alpha")).await.unwrap());
    assert!(!kv.exists(&format!("{prefix}gamma")).await.unwrap());

    let keys = kv.keys(Some(&format!("{prefix}%"))).await.unwrap();
    assert_eq!(keys.len(), 2);
    assert!(keys.iter().all(|k| k.starts_with(&prefix)));

    kv.set_batch(vec![
        (format!("{prefix}g1"), "x".to_string()),
        (format!("{prefix}g2"), "y".to_string()),
    ])
    .await
    .unwrap();
    let got = kv
        .get_batch(&[
            format!("{prefix}g1"),
            format!("{prefix}missing"),
            format!("{prefix}g2"),
        ])
        .await
        .unwrap();
    assert_eq!(got, vec![Some("x".to_string()), None, Some("y".to_string())]);

    assert_eq!(kv.delete(&format!("{prefix}alpha")).await.unwrap(), 1);
    assert_eq!(kv.delete(&format!("{prefix}alpha")).await.unwrap(), 0);
    let deleted = kv
        .delete_batch(&[format!("{prefix}g1"), format!("{prefix}g2")])
        .await
        .unwrap();
    assert_eq!(deleted, 2);
}

pub async fn cache_contract(facade: &StorageFacade) {
    let cache = facade.extraction_cache();
    let pid = make_project(facade).await;

    cache
        .store(&pid, CacheType::EntityExtraction, Some("chunk-1"), "hash-1", "[entities]", 120)
        .await
        .unwrap();
    cache
        .store(&pid, CacheType::Summarization, Some("chunk-1"), "hash-1", "summary", 40)
        .await
        .unwrap();

    let hit = cache
        .get(&pid, CacheType::EntityExtraction, "hash-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hit.result, "[entities]");
    assert_eq!(hit.tokens_used, 120);

    // replacement overwrites result and token count for the same key
    cache
        .store(&pid, CacheType::EntityExtraction, Some("chunk-1"), "hash-1", "[better]", 80)
        .await
        .unwrap();
    let hit = cache
        .get(&pid, CacheType::EntityExtraction, "hash-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hit.result, "[better]");
    assert_eq!(hit.tokens_used, 80);
    assert!(hit.updated_at >= hit.created_at);

    let by_chunk = cache.get_by_chunk_id(&pid, "chunk-1").await.unwrap();
    assert_eq!(by_chunk.len(), 2);

    assert!(cache.get(&pid, CacheType::Gleaning, "hash-1").await.unwrap().is_none());
    assert_eq!(cache.delete_by_project(&pid).await.unwrap(), 2);
    assert!(
        cache
            .get(&pid, CacheType::EntityExtraction, "hash-1")
            .await
            .unwrap()
            .is_none()
    );
}

pub async fn doc_status_contract(facade: &StorageFacade) {
    let store = facade.doc_status();
    let doc_a = format!("doc-{}", Uuid::new_v4());
    let doc_b = format!("doc-{}", Uuid::new_v4());

    let pending = DocumentStatus::pending(&doc_a, "/data/a.md");
    store.set_status(pending.clone()).await.unwrap();
    store
        .set_status(DocumentStatus::pending(&doc_b, "/data/b.md"))
        .await
        .unwrap();

    let processing = pending.as_processing();
    store.set_status(processing.clone()).await.unwrap();
    let loaded = store.get_status(&doc_a).await.unwrap().unwrap();
    assert_eq!(loaded.processing_status, ProcessingStatus::Processing);

    store
        .set_status(processing.as_completed(10, 4, 2))
        .await
        .unwrap();
    let loaded = store.get_status(&doc_a).await.unwrap().unwrap();
    assert_eq!(loaded.processing_status, ProcessingStatus::Completed);
    assert_eq!(loaded.chunk_count, 10);

    let pendings = store
        .statuses_by_processing_status(ProcessingStatus::Pending)
        .await
        .unwrap();
    assert!(pendings.iter().any(|s| s.doc_id == doc_b));
    assert!(pendings.iter().all(|s| s.doc_id != doc_a));

    let both = store
        .get_statuses(&[doc_a.clone(), doc_b.clone(), "ghost".to_string()])
        .await
        .unwrap();
    assert_eq!(both.len(), 2);

    assert_eq!(store.delete_statuses(&[doc_a.clone(), doc_b.clone()]).await.unwrap(), 2);
    assert!(store.get_status(&doc_a).await.unwrap().is_none());
}

/// Deleting a project removes every row tagged with it across sub-stores.
pub async fn cascade_delete(facade: &StorageFacade) {
    let pid = make_graph_project(facade).await;
    let graph = facade.graph();
    let vectors = facade.vectors();
    let kv = facade.kv();
    let cache = facade.extraction_cache();
    let status = facade.doc_status();
    let projects = facade.projects();

    let document = Document::new(&pid, "text");
    let doc_id = document.id.to_string();
    projects.upsert_document(document).await.unwrap();

    graph
        .upsert_entity(&pid, Entity::new("Alice", "PERSON", ""))
        .await
        .unwrap();
    vectors
        .upsert(
            VectorEntry::new(
                format!("{pid}/c0"),
                &pid,
                VectorKind::Chunk,
                "text",
                blended_vector(1, DIM),
            )
            .with_chunk(&doc_id, 0),
        )
        .await
        .unwrap();
    kv.set(&format!("project:{pid}:state"), "ingesting").await.unwrap();
    cache
        .store(&pid, CacheType::Gleaning, None, "h", "r", 1)
        .await
        .unwrap();
    status
        .set_status(DocumentStatus::pending(&doc_id, "/a"))
        .await
        .unwrap();

    projects.delete_project(&pid).await.unwrap();

    assert!(projects.get_project(&pid).await.unwrap().is_none());
    assert!(projects.documents_for_project(&pid).await.unwrap().is_empty());
    assert!(!graph.graph_exists(&pid).await.unwrap());
    assert!(vectors.get(&format!("{pid}/c0")).await.unwrap().is_none());
    assert!(kv.get(&format!("project:{pid}:state")).await.unwrap().is_none());
    assert!(cache.get(&pid, CacheType::Gleaning, "h").await.unwrap().is_none());
    assert!(status.get_status(&doc_id).await.unwrap().is_none());

    // idempotent: deleting again is fine
    projects.delete_project(&pid).await.unwrap();
}
