//! Server-engine graph store.
//!
//! Merges are single-statement upserts: `ON CONFLICT … DO UPDATE` with a
//! jsonb union for chunk sets and `GREATEST` for weights, so concurrent
//! writers to the same `(project, name)` or `(project, src, tgt)` key
//! serialize inside the engine with no read-modify-write window.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use sqlx::Row;
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::types::Json;
use tracing::instrument;
use uuid::Uuid;

use crate::errors::{Result, StorageError, from_sqlx};
use crate::ident::{normalize_name, parse_project_id};
use crate::records::{Entity, GraphStats, Relation, Subgraph};
use crate::retry::{RetryObserver, RetryPolicy, with_retry};
use crate::sessions::PgSessions;
use crate::stores::graph::GraphStore;
use crate::stores::graph_traverse::{self, NeighborSource};
use crate::stores::{DEGREE_BATCH_LIMIT, ENTITY_BATCH_LIMIT};

const ENTITY_COLUMNS: &str = "name, type, description, source_chunk_ids, created_at, updated_at";
const RELATION_COLUMNS: &str =
    "src, tgt, description, keywords, weight, source_chunk_ids, created_at, updated_at";

const UPSERT_ENTITY: &str = r#"
    INSERT INTO graph_entities
        (project_id, name, type, description, source_chunk_ids, created_at, updated_at)
    VALUES ($1, $2, $3, $4, $5, $6, $6)
    ON CONFLICT (project_id, name) DO UPDATE SET
        type = CASE WHEN btrim(EXCLUDED.type) <> '' THEN EXCLUDED.type
                    ELSE graph_entities.type END,
        description = CASE WHEN btrim(EXCLUDED.description) <> '' THEN EXCLUDED.description
                           ELSE graph_entities.description END,
        source_chunk_ids = (
            SELECT COALESCE(jsonb_agg(DISTINCT value), '[]'::jsonb)
            FROM jsonb_array_elements(graph_entities.source_chunk_ids || EXCLUDED.source_chunk_ids)
        ),
        updated_at = EXCLUDED.updated_at"#;

const UPSERT_RELATION: &str = r#"
    INSERT INTO graph_relations
        (project_id, src, tgt, description, keywords, weight, source_chunk_ids,
         created_at, updated_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
    ON CONFLICT (project_id, src, tgt) DO UPDATE SET
        description = CASE WHEN btrim(EXCLUDED.description) <> '' THEN EXCLUDED.description
                           ELSE graph_relations.description END,
        keywords = CASE WHEN btrim(EXCLUDED.keywords) <> '' THEN EXCLUDED.keywords
                        ELSE graph_relations.keywords END,
        weight = GREATEST(graph_relations.weight, EXCLUDED.weight),
        source_chunk_ids = (
            SELECT COALESCE(jsonb_agg(DISTINCT value), '[]'::jsonb)
            FROM jsonb_array_elements(graph_relations.source_chunk_ids || EXCLUDED.source_chunk_ids)
        ),
        updated_at = EXCLUDED.updated_at"#;

pub struct PgGraphStore {
    sessions: Arc<PgSessions>,
    retry: RetryPolicy,
    observer: Arc<dyn RetryObserver>,
}

impl PgGraphStore {
    pub fn new(
        sessions: Arc<PgSessions>,
        retry: RetryPolicy,
        observer: Arc<dyn RetryObserver>,
    ) -> Self {
        Self {
            sessions,
            retry,
            observer,
        }
    }
}

fn entity_from_row(row: &PgRow) -> Result<Entity> {
    let chunk_ids: Json<Vec<String>> = row
        .try_get("source_chunk_ids")
        .map_err(|e| from_sqlx("graph row decode", e))?;
    Ok(Entity {
        name: row.try_get("name").map_err(|e| from_sqlx("graph row decode", e))?,
        entity_type: row.try_get("type").map_err(|e| from_sqlx("graph row decode", e))?,
        description: row
            .try_get("description")
            .map_err(|e| from_sqlx("graph row decode", e))?,
        source_chunk_ids: chunk_ids.0,
        created_at: row
            .try_get::<DateTime<Utc>, _>("created_at")
            .map_err(|e| from_sqlx("graph row decode", e))?,
        updated_at: row
            .try_get::<DateTime<Utc>, _>("updated_at")
            .map_err(|e| from_sqlx("graph row decode", e))?,
    })
}

fn relation_from_row(row: &PgRow) -> Result<Relation> {
    let chunk_ids: Json<Vec<String>> = row
        .try_get("source_chunk_ids")
        .map_err(|e| from_sqlx("graph row decode", e))?;
    Ok(Relation {
        src: row.try_get("src").map_err(|e| from_sqlx("graph row decode", e))?,
        tgt: row.try_get("tgt").map_err(|e| from_sqlx("graph row decode", e))?,
        description: row
            .try_get("description")
            .map_err(|e| from_sqlx("graph row decode", e))?,
        keywords: row
            .try_get("keywords")
            .map_err(|e| from_sqlx("graph row decode", e))?,
        weight: row.try_get("weight").map_err(|e| from_sqlx("graph row decode", e))?,
        source_chunk_ids: chunk_ids.0,
        created_at: row
            .try_get::<DateTime<Utc>, _>("created_at")
            .map_err(|e| from_sqlx("graph row decode", e))?,
        updated_at: row
            .try_get::<DateTime<Utc>, _>("updated_at")
            .map_err(|e| from_sqlx("graph row decode", e))?,
    })
}

async fn namespace_exists(conn: &mut PgConnection, project: Uuid) -> Result<bool> {
    let row = sqlx::query("SELECT 1 FROM graph_namespaces WHERE project_id = $1")
        .bind(project)
        .fetch_optional(conn)
        .await
        .map_err(|e| from_sqlx("graph.exists", e))?;
    Ok(row.is_some())
}

async fn require_namespace(conn: &mut PgConnection, project: Uuid) -> Result<()> {
    if namespace_exists(conn, project).await? {
        Ok(())
    } else {
        Err(StorageError::NotInitialized {
            project_id: project.to_string(),
        })
    }
}

fn validate_entity(entity: &Entity) -> Result<String> {
    let name = normalize_name(&entity.name);
    if name.is_empty() {
        return Err(StorageError::invalid_argument("entity name must not be empty"));
    }
    Ok(name)
}

fn validate_relation(relation: &Relation) -> Result<(String, String)> {
    let src = normalize_name(&relation.src);
    let tgt = normalize_name(&relation.tgt);
    if src.is_empty() || tgt.is_empty() {
        return Err(StorageError::invalid_argument(
            "relation endpoints must not be empty",
        ));
    }
    if src == tgt {
        return Err(StorageError::invalid_argument(format!(
            "self-loop relation rejected for {src:?}"
        )));
    }
    Ok((src, tgt))
}

async fn upsert_entity_on(
    conn: &mut PgConnection,
    project: Uuid,
    name: &str,
    entity: &Entity,
) -> Result<()> {
    let mut chunk_ids = entity.source_chunk_ids.clone();
    crate::records::normalize_chunk_set(&mut chunk_ids);
    sqlx::query(UPSERT_ENTITY)
        .bind(project)
        .bind(name)
        .bind(&entity.entity_type)
        .bind(&entity.description)
        .bind(Json(chunk_ids))
        .bind(Utc::now())
        .execute(conn)
        .await
        .map_err(|e| from_sqlx("graph.upsert_entity", e))?;
    Ok(())
}

async fn upsert_relation_on(
    conn: &mut PgConnection,
    project: Uuid,
    src: &str,
    tgt: &str,
    relation: &Relation,
) -> Result<()> {
    let mut chunk_ids = relation.source_chunk_ids.clone();
    crate::records::normalize_chunk_set(&mut chunk_ids);
    sqlx::query(UPSERT_RELATION)
        .bind(project)
        .bind(src)
        .bind(tgt)
        .bind(&relation.description)
        .bind(&relation.keywords)
        .bind(relation.weight)
        .bind(Json(chunk_ids))
        .bind(Utc::now())
        .execute(conn)
        .await
        .map_err(|e| from_sqlx("graph.upsert_relation", e))?;
    Ok(())
}

struct PgNeighborSource<'a> {
    conn: &'a mut PgConnection,
    project: Uuid,
}

#[async_trait]
impl NeighborSource for PgNeighborSource<'_> {
    async fn entity_exists(&mut self, name: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM graph_entities WHERE project_id = $1 AND name = $2",
        )
        .bind(self.project)
        .bind(name)
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(|e| from_sqlx("graph.traverse", e))?;
        Ok(row.is_some())
    }

    async fn relations_touching(&mut self, names: &[String]) -> Result<Vec<Relation>> {
        let mut relations = Vec::new();
        for chunk in names.chunks(DEGREE_BATCH_LIMIT) {
            let rows = sqlx::query(&format!(
                "SELECT {RELATION_COLUMNS} FROM graph_relations
                 WHERE project_id = $1 AND (src = ANY($2) OR tgt = ANY($2))"
            ))
            .bind(self.project)
            .bind(chunk.to_vec())
            .fetch_all(&mut *self.conn)
            .await
            .map_err(|e| from_sqlx("graph.traverse", e))?;
            for row in &rows {
                relations.push(relation_from_row(row)?);
            }
        }
        Ok(relations)
    }

    async fn entities_by_name(&mut self, names: &[String]) -> Result<Vec<Entity>> {
        let mut entities = Vec::new();
        for chunk in names.chunks(ENTITY_BATCH_LIMIT) {
            let rows = sqlx::query(&format!(
                "SELECT {ENTITY_COLUMNS} FROM graph_entities
                 WHERE project_id = $1 AND name = ANY($2)"
            ))
            .bind(self.project)
            .bind(chunk.to_vec())
            .fetch_all(&mut *self.conn)
            .await
            .map_err(|e| from_sqlx("graph.traverse", e))?;
            for row in &rows {
                entities.push(entity_from_row(row)?);
            }
        }
        Ok(entities)
    }
}

#[async_trait]
impl GraphStore for PgGraphStore {
    #[instrument(skip(self), err)]
    async fn create_project_graph(&self, project_id: &str) -> Result<()> {
        let project = parse_project_id(project_id)?;
        with_retry(&self.retry, &*self.observer, "graph.create", || async {
            let mut conn = self.sessions.acquire("graph.create").await?;
            sqlx::query(
                "INSERT INTO graph_namespaces (project_id, created_at) VALUES ($1, $2)
                 ON CONFLICT (project_id) DO NOTHING",
            )
            .bind(project)
            .bind(Utc::now())
            .execute(&mut *conn)
            .await
            .map_err(|e| from_sqlx("graph.create", e))?;
            Ok(())
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn graph_exists(&self, project_id: &str) -> Result<bool> {
        let project = parse_project_id(project_id)?;
        with_retry(&self.retry, &*self.observer, "graph.exists", || async {
            let mut conn = self.sessions.acquire("graph.exists").await?;
            namespace_exists(&mut conn, project).await
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn delete_project_graph(&self, project_id: &str) -> Result<()> {
        let project = parse_project_id(project_id)?;
        with_retry(&self.retry, &*self.observer, "graph.delete", || async {
            let mut tx = self.sessions.begin("graph.delete").await?;
            for sql in [
                "DELETE FROM graph_relations WHERE project_id = $1",
                "DELETE FROM graph_entities WHERE project_id = $1",
                "DELETE FROM graph_namespaces WHERE project_id = $1",
            ] {
                sqlx::query(sql)
                    .bind(project)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| from_sqlx("graph.delete", e))?;
            }
            tx.commit().await.map_err(|e| from_sqlx("graph.delete", e))
        })
        .await
    }

    #[instrument(skip(self, entity), err)]
    async fn upsert_entity(&self, project_id: &str, entity: Entity) -> Result<()> {
        let project = parse_project_id(project_id)?;
        let name = validate_entity(&entity)?;
        with_retry(&self.retry, &*self.observer, "graph.upsert_entity", || async {
            let mut conn = self.sessions.acquire("graph.upsert_entity").await?;
            require_namespace(&mut conn, project).await?;
            upsert_entity_on(&mut conn, project, &name, &entity).await
        })
        .await
    }

    #[instrument(skip(self, entities), err)]
    async fn upsert_entities(&self, project_id: &str, entities: Vec<Entity>) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }
        let project = parse_project_id(project_id)?;
        with_retry(&self.retry, &*self.observer, "graph.upsert_entities", || async {
            let mut tx = self.sessions.begin("graph.upsert_entities").await?;
            require_namespace(&mut tx, project).await?;
            for entity in &entities {
                let name = validate_entity(entity)?;
                upsert_entity_on(&mut tx, project, &name, entity).await?;
            }
            tx.commit()
                .await
                .map_err(|e| from_sqlx("graph.upsert_entities", e))
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn get_entity(&self, project_id: &str, name: &str) -> Result<Option<Entity>> {
        let project = parse_project_id(project_id)?;
        let name = normalize_name(name);
        with_retry(&self.retry, &*self.observer, "graph.get_entity", || async {
            let mut conn = self.sessions.acquire("graph.get_entity").await?;
            require_namespace(&mut conn, project).await?;
            sqlx::query(&format!(
                "SELECT {ENTITY_COLUMNS} FROM graph_entities WHERE project_id = $1 AND name = $2"
            ))
            .bind(project)
            .bind(&name)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| from_sqlx("graph.get_entity", e))?
            .map(|row| entity_from_row(&row))
            .transpose()
        })
        .await
    }

    #[instrument(skip(self, names), err)]
    async fn get_entities(&self, project_id: &str, names: &[String]) -> Result<Vec<Entity>> {
        let mut map = self.entities_map_batch(project_id, names).await?;
        Ok(names
            .iter()
            .filter_map(|n| map.remove(&normalize_name(n)))
            .collect())
    }

    #[instrument(skip(self, names), err)]
    async fn entities_map_batch(
        &self,
        project_id: &str,
        names: &[String],
    ) -> Result<FxHashMap<String, Entity>> {
        let project = parse_project_id(project_id)?;
        let normalized: Vec<String> = names.iter().map(|n| normalize_name(n)).collect();
        with_retry(&self.retry, &*self.observer, "graph.entities_map", || async {
            let mut conn = self.sessions.acquire("graph.entities_map").await?;
            require_namespace(&mut conn, project).await?;
            let mut source = PgNeighborSource {
                conn: &mut conn,
                project,
            };
            let entities = source.entities_by_name(&normalized).await?;
            Ok(entities.into_iter().map(|e| (e.name.clone(), e)).collect())
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn get_all_entities(&self, project_id: &str) -> Result<Vec<Entity>> {
        let project = parse_project_id(project_id)?;
        with_retry(&self.retry, &*self.observer, "graph.all_entities", || async {
            let mut conn = self.sessions.acquire("graph.all_entities").await?;
            require_namespace(&mut conn, project).await?;
            let rows = sqlx::query(&format!(
                "SELECT {ENTITY_COLUMNS} FROM graph_entities WHERE project_id = $1 ORDER BY name"
            ))
            .bind(project)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| from_sqlx("graph.all_entities", e))?;
            rows.iter().map(entity_from_row).collect()
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn delete_entity(&self, project_id: &str, name: &str) -> Result<()> {
        self.delete_entities(project_id, &[name.to_string()]).await
    }

    #[instrument(skip(self, names), err)]
    async fn delete_entities(&self, project_id: &str, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let project = parse_project_id(project_id)?;
        let normalized: Vec<String> = names.iter().map(|n| normalize_name(n)).collect();
        with_retry(&self.retry, &*self.observer, "graph.delete_entities", || async {
            let mut tx = self.sessions.begin("graph.delete_entities").await?;
            require_namespace(&mut tx, project).await?;
            for chunk in normalized.chunks(ENTITY_BATCH_LIMIT) {
                sqlx::query(
                    "DELETE FROM graph_entities WHERE project_id = $1 AND name = ANY($2)",
                )
                .bind(project)
                .bind(chunk.to_vec())
                .execute(&mut *tx)
                .await
                .map_err(|e| from_sqlx("graph.delete_entities", e))?;
            }
            tx.commit()
                .await
                .map_err(|e| from_sqlx("graph.delete_entities", e))
        })
        .await
    }

    #[instrument(skip(self, relation), err)]
    async fn upsert_relation(&self, project_id: &str, relation: Relation) -> Result<()> {
        let project = parse_project_id(project_id)?;
        let (src, tgt) = validate_relation(&relation)?;
        with_retry(&self.retry, &*self.observer, "graph.upsert_relation", || async {
            let mut conn = self.sessions.acquire("graph.upsert_relation").await?;
            require_namespace(&mut conn, project).await?;
            upsert_relation_on(&mut conn, project, &src, &tgt, &relation).await
        })
        .await
    }

    #[instrument(skip(self, relations), err)]
    async fn upsert_relations(&self, project_id: &str, relations: Vec<Relation>) -> Result<()> {
        if relations.is_empty() {
            return Ok(());
        }
        let project = parse_project_id(project_id)?;
        with_retry(&self.retry, &*self.observer, "graph.upsert_relations", || async {
            let mut tx = self.sessions.begin("graph.upsert_relations").await?;
            require_namespace(&mut tx, project).await?;
            for relation in &relations {
                let (src, tgt) = validate_relation(relation)?;
                upsert_relation_on(&mut tx, project, &src, &tgt, relation).await?;
            }
            tx.commit()
                .await
                .map_err(|e| from_sqlx("graph.upsert_relations", e))
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn get_relation(
        &self,
        project_id: &str,
        src: &str,
        tgt: &str,
    ) -> Result<Option<Relation>> {
        let project = parse_project_id(project_id)?;
        let src = normalize_name(src);
        let tgt = normalize_name(tgt);
        with_retry(&self.retry, &*self.observer, "graph.get_relation", || async {
            let mut conn = self.sessions.acquire("graph.get_relation").await?;
            require_namespace(&mut conn, project).await?;
            sqlx::query(&format!(
                "SELECT {RELATION_COLUMNS} FROM graph_relations
                 WHERE project_id = $1 AND src = $2 AND tgt = $3"
            ))
            .bind(project)
            .bind(&src)
            .bind(&tgt)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| from_sqlx("graph.get_relation", e))?
            .map(|row| relation_from_row(&row))
            .transpose()
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn relations_for_entity(&self, project_id: &str, name: &str) -> Result<Vec<Relation>> {
        let project = parse_project_id(project_id)?;
        let name = normalize_name(name);
        with_retry(&self.retry, &*self.observer, "graph.relations_for", || async {
            let mut conn = self.sessions.acquire("graph.relations_for").await?;
            require_namespace(&mut conn, project).await?;
            let rows = sqlx::query(&format!(
                "SELECT {RELATION_COLUMNS} FROM graph_relations
                 WHERE project_id = $1 AND (src = $2 OR tgt = $2)"
            ))
            .bind(project)
            .bind(&name)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| from_sqlx("graph.relations_for", e))?;
            rows.iter().map(relation_from_row).collect()
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn get_all_relations(&self, project_id: &str) -> Result<Vec<Relation>> {
        let project = parse_project_id(project_id)?;
        with_retry(&self.retry, &*self.observer, "graph.all_relations", || async {
            let mut conn = self.sessions.acquire("graph.all_relations").await?;
            require_namespace(&mut conn, project).await?;
            let rows = sqlx::query(&format!(
                "SELECT {RELATION_COLUMNS} FROM graph_relations
                 WHERE project_id = $1 ORDER BY src, tgt"
            ))
            .bind(project)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| from_sqlx("graph.all_relations", e))?;
            rows.iter().map(relation_from_row).collect()
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn delete_relation(&self, project_id: &str, src: &str, tgt: &str) -> Result<()> {
        let project = parse_project_id(project_id)?;
        let src = normalize_name(src);
        let tgt = normalize_name(tgt);
        with_retry(&self.retry, &*self.observer, "graph.delete_relation", || async {
            let mut conn = self.sessions.acquire("graph.delete_relation").await?;
            require_namespace(&mut conn, project).await?;
            sqlx::query(
                "DELETE FROM graph_relations WHERE project_id = $1 AND src = $2 AND tgt = $3",
            )
            .bind(project)
            .bind(&src)
            .bind(&tgt)
            .execute(&mut *conn)
            .await
            .map_err(|e| from_sqlx("graph.delete_relation", e))?;
            Ok(())
        })
        .await
    }

    #[instrument(skip(self, names), err)]
    async fn node_degrees_batch(
        &self,
        project_id: &str,
        names: &[String],
    ) -> Result<FxHashMap<String, u64>> {
        let project = parse_project_id(project_id)?;
        let normalized: Vec<String> = names.iter().map(|n| normalize_name(n)).collect();
        with_retry(&self.retry, &*self.observer, "graph.degrees", || async {
            let mut conn = self.sessions.acquire("graph.degrees").await?;
            require_namespace(&mut conn, project).await?;
            let mut degrees: FxHashMap<String, u64> =
                normalized.iter().map(|n| (n.clone(), 0)).collect();
            for chunk in normalized.chunks(DEGREE_BATCH_LIMIT) {
                let rows = sqlx::query(
                    r#"
                    SELECT name, SUM(cnt)::BIGINT AS degree FROM (
                        SELECT src AS name, COUNT(*) AS cnt FROM graph_relations
                            WHERE project_id = $1 AND src = ANY($2) GROUP BY src
                        UNION ALL
                        SELECT tgt AS name, COUNT(*) AS cnt FROM graph_relations
                            WHERE project_id = $1 AND tgt = ANY($2) GROUP BY tgt
                    ) t GROUP BY name"#,
                )
                .bind(project)
                .bind(chunk.to_vec())
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| from_sqlx("graph.degrees", e))?;
                for row in rows {
                    let name: String =
                        row.try_get("name").map_err(|e| from_sqlx("graph.degrees", e))?;
                    let degree: i64 =
                        row.try_get("degree").map_err(|e| from_sqlx("graph.degrees", e))?;
                    degrees.insert(name, degree.max(0) as u64);
                }
            }
            Ok(degrees)
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn traverse_bfs(
        &self,
        project_id: &str,
        start: &str,
        max_depth: usize,
        max_nodes: usize,
    ) -> Result<Subgraph> {
        let project = parse_project_id(project_id)?;
        let start = normalize_name(start);
        with_retry(&self.retry, &*self.observer, "graph.traverse", || async {
            let mut conn = self.sessions.acquire("graph.traverse").await?;
            require_namespace(&mut conn, project).await?;
            let mut source = PgNeighborSource {
                conn: &mut conn,
                project,
            };
            graph_traverse::traverse_bfs(&mut source, &start, max_depth, max_nodes).await
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn find_shortest_path(
        &self,
        project_id: &str,
        src: &str,
        tgt: &str,
    ) -> Result<Vec<Entity>> {
        let project = parse_project_id(project_id)?;
        let src = normalize_name(src);
        let tgt = normalize_name(tgt);
        with_retry(&self.retry, &*self.observer, "graph.shortest_path", || async {
            let mut conn = self.sessions.acquire("graph.shortest_path").await?;
            require_namespace(&mut conn, project).await?;
            let mut source = PgNeighborSource {
                conn: &mut conn,
                project,
            };
            graph_traverse::find_shortest_path(&mut source, &src, &tgt).await
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn stats(&self, project_id: &str) -> Result<GraphStats> {
        let project = parse_project_id(project_id)?;
        with_retry(&self.retry, &*self.observer, "graph.stats", || async {
            let mut conn = self.sessions.acquire("graph.stats").await?;
            require_namespace(&mut conn, project).await?;
            let entity_count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM graph_entities WHERE project_id = $1")
                    .bind(project)
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(|e| from_sqlx("graph.stats", e))?;
            let relation_count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM graph_relations WHERE project_id = $1")
                    .bind(project)
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(|e| from_sqlx("graph.stats", e))?;
            Ok(GraphStats {
                entity_count: entity_count.max(0) as u64,
                relation_count: relation_count.max(0) as u64,
            })
        })
        .await
    }
}
