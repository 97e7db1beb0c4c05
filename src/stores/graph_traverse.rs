//! Level-by-level BFS shared by both graph backends.
//!
//! The walk is frontier-batched: each level issues *one* neighbor query for
//! the whole frontier (chunked only by the IN-list limit), so memory stays
//! bounded by the frontier and the visited set rather than the graph. Cycle
//! detection is the visited set over normalized names. Edges are followed in
//! both directions.
//!
//! Backends plug in through [`NeighborSource`], which wraps a single session
//! held for the whole traversal.

use async_trait::async_trait;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::errors::Result;
use crate::records::{Entity, Relation, Subgraph};

/// One traversal session against a project's graph.
#[async_trait]
pub(crate) trait NeighborSource {
    async fn entity_exists(&mut self, name: &str) -> Result<bool>;

    /// All relations with either endpoint in `names`.
    async fn relations_touching(&mut self, names: &[String]) -> Result<Vec<Relation>>;

    /// Hydrate entity records for the given names (order unspecified).
    async fn entities_by_name(&mut self, names: &[String]) -> Result<Vec<Entity>>;
}

/// Breadth-first expansion from `start` (already normalized).
///
/// Stops when the depth reaches `max_depth`, when `max_nodes` entities have
/// been discovered (`0` = unlimited), or when the frontier empties. Returns
/// entities in discovery order and the relations whose endpoints both made
/// it into the subgraph, deduplicated by `(src, tgt)`.
pub(crate) async fn traverse_bfs(
    source: &mut (dyn NeighborSource + Send),
    start: &str,
    max_depth: usize,
    max_nodes: usize,
) -> Result<Subgraph> {
    if start.is_empty() || !source.entity_exists(start).await? {
        return Ok(Subgraph::default());
    }

    let node_cap = if max_nodes == 0 { usize::MAX } else { max_nodes };
    let mut visited: FxHashSet<String> = FxHashSet::default();
    let mut discovery_order: Vec<String> = Vec::new();
    visited.insert(start.to_string());
    discovery_order.push(start.to_string());

    let mut collected: Vec<Relation> = Vec::new();
    let mut seen_edges: FxHashSet<(String, String)> = FxHashSet::default();

    let mut frontier = vec![start.to_string()];
    let mut depth = 0;

    while depth < max_depth && !frontier.is_empty() && visited.len() < node_cap {
        let mut next_frontier = Vec::new();
        for relation in source.relations_touching(&frontier).await? {
            let edge = (relation.src.clone(), relation.tgt.clone());
            if seen_edges.insert(edge) {
                collected.push(relation.clone());
            }
            for neighbor in [&relation.src, &relation.tgt] {
                if visited.contains(neighbor) {
                    continue;
                }
                if visited.len() >= node_cap {
                    break;
                }
                visited.insert(neighbor.clone());
                discovery_order.push(neighbor.clone());
                next_frontier.push(neighbor.clone());
            }
        }
        frontier = next_frontier;
        depth += 1;
    }

    let entities = hydrate_in_order(source, &discovery_order).await?;
    let relations = collected
        .into_iter()
        .filter(|r| visited.contains(&r.src) && visited.contains(&r.tgt))
        .collect();

    Ok(Subgraph {
        entities,
        relations,
    })
}

/// Unweighted shortest path between two normalized names, endpoints
/// inclusive. Empty when either endpoint is missing or no path exists.
pub(crate) async fn find_shortest_path(
    source: &mut (dyn NeighborSource + Send),
    src: &str,
    tgt: &str,
) -> Result<Vec<Entity>> {
    if src.is_empty() || tgt.is_empty() {
        return Ok(Vec::new());
    }
    if !source.entity_exists(src).await? || !source.entity_exists(tgt).await? {
        return Ok(Vec::new());
    }
    if src == tgt {
        return hydrate_in_order(source, &[src.to_string()]).await;
    }

    let mut parents: FxHashMap<String, String> = FxHashMap::default();
    let mut visited: FxHashSet<String> = FxHashSet::default();
    visited.insert(src.to_string());
    let mut frontier = vec![src.to_string()];
    let mut found = false;

    while !frontier.is_empty() && !found {
        let frontier_set: FxHashSet<&String> = frontier.iter().collect();
        let mut next_frontier = Vec::new();
        for relation in source.relations_touching(&frontier).await? {
            for (from, to) in [
                (&relation.src, &relation.tgt),
                (&relation.tgt, &relation.src),
            ] {
                if !frontier_set.contains(from) || visited.contains(to) {
                    continue;
                }
                visited.insert(to.clone());
                parents.insert(to.clone(), from.clone());
                if to == tgt {
                    found = true;
                }
                next_frontier.push(to.clone());
            }
        }
        frontier = next_frontier;
    }

    if !found {
        return Ok(Vec::new());
    }

    let mut path = vec![tgt.to_string()];
    let mut cursor = tgt;
    while let Some(parent) = parents.get(cursor) {
        path.push(parent.clone());
        cursor = parent;
    }
    path.reverse();
    hydrate_in_order(source, &path).await
}

async fn hydrate_in_order(
    source: &mut (dyn NeighborSource + Send),
    names: &[String],
) -> Result<Vec<Entity>> {
    let mut by_name: FxHashMap<String, Entity> = source
        .entities_by_name(names)
        .await?
        .into_iter()
        .map(|e| (e.name.clone(), e))
        .collect();
    Ok(names.iter().filter_map(|n| by_name.remove(n)).collect())
}
