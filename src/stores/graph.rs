//! Graph sub-store contract: per-project entities, directed relations, and
//! bounded-memory BFS traversal.

use async_trait::async_trait;
use rustc_hash::FxHashMap;

use crate::errors::Result;
use crate::records::{Entity, GraphStats, Relation, Subgraph};

/// Per-project labeled property graph.
///
/// Entity and relation endpoints are addressed by normalized names
/// (lowercased, whitespace-collapsed); implementations normalize on both
/// read and write, so `getEntity("Apple")` and `getEntity(" apple ")` are
/// the same lookup.
///
/// Every operation other than `create_project_graph`/`graph_exists`/
/// `delete_project_graph` fails with `NotInitialized` when the project's
/// graph namespace does not exist. Malformed project ids fail with
/// `InvalidArgument`.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Establish the project's graph namespace. Idempotent.
    async fn create_project_graph(&self, project_id: &str) -> Result<()>;

    async fn graph_exists(&self, project_id: &str) -> Result<bool>;

    /// Drop the namespace and everything in it. Idempotent.
    async fn delete_project_graph(&self, project_id: &str) -> Result<()>;

    /// Insert or merge an entity. Merges union source-chunk sets and keep
    /// the most recent non-empty type/description. Empty names are rejected.
    async fn upsert_entity(&self, project_id: &str, entity: Entity) -> Result<()>;

    async fn upsert_entities(&self, project_id: &str, entities: Vec<Entity>) -> Result<()>;

    async fn get_entity(&self, project_id: &str, name: &str) -> Result<Option<Entity>>;

    async fn get_entities(&self, project_id: &str, names: &[String]) -> Result<Vec<Entity>>;

    /// Name → entity map for up to the batch limit of names per round-trip.
    /// Missing names are simply absent from the map.
    async fn entities_map_batch(
        &self,
        project_id: &str,
        names: &[String],
    ) -> Result<FxHashMap<String, Entity>>;

    async fn get_all_entities(&self, project_id: &str) -> Result<Vec<Entity>>;

    async fn delete_entity(&self, project_id: &str, name: &str) -> Result<()>;

    async fn delete_entities(&self, project_id: &str, names: &[String]) -> Result<()>;

    /// Insert or merge a directed relation. Self-loops are rejected with
    /// `InvalidArgument`; `(src, tgt)` conflicts merge descriptions and
    /// keywords, union chunk sets, and take the maximum weight.
    async fn upsert_relation(&self, project_id: &str, relation: Relation) -> Result<()>;

    async fn upsert_relations(&self, project_id: &str, relations: Vec<Relation>) -> Result<()>;

    async fn get_relation(
        &self,
        project_id: &str,
        src: &str,
        tgt: &str,
    ) -> Result<Option<Relation>>;

    /// All relations with the named entity as either endpoint.
    async fn relations_for_entity(&self, project_id: &str, name: &str) -> Result<Vec<Relation>>;

    async fn get_all_relations(&self, project_id: &str) -> Result<Vec<Relation>>;

    async fn delete_relation(&self, project_id: &str, src: &str, tgt: &str) -> Result<()>;

    /// Combined in+out degree per name; missing names map to 0.
    async fn node_degrees_batch(
        &self,
        project_id: &str,
        names: &[String],
    ) -> Result<FxHashMap<String, u64>>;

    /// Unbounded-node BFS to `max_depth`.
    async fn traverse(&self, project_id: &str, start: &str, max_depth: usize) -> Result<Subgraph> {
        self.traverse_bfs(project_id, start, max_depth, 0).await
    }

    /// Level-by-level BFS with one batched neighbor query per level.
    ///
    /// Stops at `max_depth`, at `max_nodes` discovered entities (`0` means
    /// unlimited), or when the frontier empties. A non-existent start entity
    /// yields an empty subgraph. One session serves the whole traversal.
    async fn traverse_bfs(
        &self,
        project_id: &str,
        start: &str,
        max_depth: usize,
        max_nodes: usize,
    ) -> Result<Subgraph>;

    /// Unweighted shortest path, endpoints inclusive; empty when unreachable.
    async fn find_shortest_path(
        &self,
        project_id: &str,
        src: &str,
        tgt: &str,
    ) -> Result<Vec<Entity>>;

    async fn stats(&self, project_id: &str) -> Result<GraphStats>;
}
