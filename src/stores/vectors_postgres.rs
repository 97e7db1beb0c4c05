//! Server-engine vector store.
//!
//! Vectors are passed as `[x1,x2,…]` literals cast to the `vector` type in
//! SQL, and similarity ranking happens engine-side with the native cosine
//! operator, so no extra driver types are needed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::{PgConnection, PgRow};
use tracing::instrument;
use uuid::Uuid;

use crate::dialect::{parse_pgvector_text, pgvector_literal};
use crate::errors::{Result, StorageError, from_sqlx};
use crate::ident::{normalize_name, parse_project_id};
use crate::records::{VectorEntry, VectorKind};
use crate::retry::{RetryObserver, RetryPolicy, with_retry};
use crate::sessions::PgSessions;
use crate::stores::vectors::{VectorFilter, VectorMatch, VectorStore};

const VECTOR_COLUMNS: &str =
    "id, project_id, document_id, chunk_index, type, content, embedding::text AS embedding_text, created_at";

pub struct PgVectorStore {
    sessions: Arc<PgSessions>,
    dimension: usize,
    batch_chunk_size: usize,
    retry: RetryPolicy,
    observer: Arc<dyn RetryObserver>,
}

impl PgVectorStore {
    pub fn new(
        sessions: Arc<PgSessions>,
        dimension: usize,
        batch_chunk_size: usize,
        retry: RetryPolicy,
        observer: Arc<dyn RetryObserver>,
    ) -> Self {
        Self {
            sessions,
            dimension,
            batch_chunk_size,
            retry,
            observer,
        }
    }

    fn validate(&self, entry: &VectorEntry) -> Result<(Uuid, Option<Uuid>)> {
        if entry.project_id.trim().is_empty() {
            return Err(StorageError::invalid_argument(
                "vector metadata must carry a project id",
            ));
        }
        let project = parse_project_id(&entry.project_id)?;
        if entry.vector.len() != self.dimension {
            return Err(StorageError::DimensionMismatch {
                expected: self.dimension,
                actual: entry.vector.len(),
            });
        }
        let document = entry
            .document_id
            .as_deref()
            .map(parse_document_id)
            .transpose()?;
        Ok((project, document))
    }
}

fn parse_document_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| StorageError::InvalidArgument {
        message: format!("document id {raw:?} is not a valid UUID"),
    })
}

fn vector_from_row(row: &PgRow) -> Result<VectorEntry> {
    let kind: String = row.try_get("type").map_err(|e| from_sqlx("vector row decode", e))?;
    let embedding_text: String = row
        .try_get("embedding_text")
        .map_err(|e| from_sqlx("vector row decode", e))?;
    let document_id: Option<Uuid> = row
        .try_get("document_id")
        .map_err(|e| from_sqlx("vector row decode", e))?;
    Ok(VectorEntry {
        id: row.try_get("id").map_err(|e| from_sqlx("vector row decode", e))?,
        project_id: row
            .try_get::<Uuid, _>("project_id")
            .map_err(|e| from_sqlx("vector row decode", e))?
            .to_string(),
        kind: VectorKind::parse(&kind)?,
        content: row
            .try_get("content")
            .map_err(|e| from_sqlx("vector row decode", e))?,
        vector: parse_pgvector_text(&embedding_text)?,
        document_id: document_id.map(|id| id.to_string()),
        chunk_index: row
            .try_get("chunk_index")
            .map_err(|e| from_sqlx("vector row decode", e))?,
        created_at: row
            .try_get::<DateTime<Utc>, _>("created_at")
            .map_err(|e| from_sqlx("vector row decode", e))?,
    })
}

async fn upsert_on(
    conn: &mut PgConnection,
    project: Uuid,
    document: Option<Uuid>,
    entry: &VectorEntry,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO vectors
            (id, project_id, document_id, chunk_index, type, content, embedding, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7::vector, $8)
        ON CONFLICT (id) DO UPDATE SET
            project_id = EXCLUDED.project_id,
            document_id = EXCLUDED.document_id,
            chunk_index = EXCLUDED.chunk_index,
            type = EXCLUDED.type,
            content = EXCLUDED.content,
            embedding = EXCLUDED.embedding"#,
    )
    .bind(&entry.id)
    .bind(project)
    .bind(document)
    .bind(entry.chunk_index)
    .bind(entry.kind.as_str())
    .bind(&entry.content)
    .bind(pgvector_literal(&entry.vector))
    .bind(entry.created_at)
    .execute(conn)
    .await
    .map_err(|e| from_sqlx("vectors.upsert", e))?;
    Ok(())
}

#[async_trait]
impl VectorStore for PgVectorStore {
    #[instrument(skip(self), err)]
    async fn initialize(&self) -> Result<()> {
        let mut conn = self.sessions.acquire("vectors.initialize").await?;
        sqlx::query("SELECT COUNT(*) FROM vectors LIMIT 1")
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| from_sqlx("vectors.initialize", e))?;
        Ok(())
    }

    #[instrument(skip(self, entry), err)]
    async fn upsert(&self, entry: VectorEntry) -> Result<()> {
        let (project, document) = self.validate(&entry)?;
        with_retry(&self.retry, &*self.observer, "vectors.upsert", || async {
            let mut conn = self.sessions.acquire("vectors.upsert").await?;
            upsert_on(&mut conn, project, document, &entry).await
        })
        .await
    }

    #[instrument(skip(self, entries), err)]
    async fn upsert_batch(&self, entries: Vec<VectorEntry>) -> Result<()> {
        for chunk in entries.chunks(self.batch_chunk_size) {
            let validated: Vec<(Uuid, Option<Uuid>, &VectorEntry)> = chunk
                .iter()
                .map(|entry| self.validate(entry).map(|(p, d)| (p, d, entry)))
                .collect::<Result<_>>()?;
            with_retry(&self.retry, &*self.observer, "vectors.upsert_batch", || async {
                let mut tx = self.sessions.begin("vectors.upsert_batch").await?;
                for (project, document, entry) in &validated {
                    upsert_on(&mut tx, *project, *document, entry).await?;
                }
                tx.commit()
                    .await
                    .map_err(|e| from_sqlx("vectors.upsert_batch", e))
            })
            .await?;
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get(&self, id: &str) -> Result<Option<VectorEntry>> {
        with_retry(&self.retry, &*self.observer, "vectors.get", || async {
            let mut conn = self.sessions.acquire("vectors.get").await?;
            sqlx::query(&format!("SELECT {VECTOR_COLUMNS} FROM vectors WHERE id = $1"))
                .bind(id)
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| from_sqlx("vectors.get", e))?
                .map(|row| vector_from_row(&row))
                .transpose()
        })
        .await
    }

    #[instrument(skip(self, vector, filter), err)]
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<VectorMatch>> {
        if vector.len() != self.dimension {
            return Err(StorageError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        let project = parse_project_id(&filter.project_id)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let probe = pgvector_literal(vector);

        with_retry(&self.retry, &*self.observer, "vectors.query", || async {
            let mut conn = self.sessions.acquire("vectors.query").await?;

            let mut sql = format!(
                "SELECT {VECTOR_COLUMNS}, 1 - (embedding <=> $2::vector) AS score
                 FROM vectors WHERE project_id = $1"
            );
            let mut next_param = 3;
            if filter.kind.is_some() {
                sql.push_str(&format!(" AND type = ${next_param}"));
                next_param += 1;
            }
            if filter.ids.is_some() {
                sql.push_str(&format!(" AND id = ANY(${next_param})"));
                next_param += 1;
            }
            sql.push_str(&format!(
                " ORDER BY embedding <=> $2::vector ASC, created_at ASC, id ASC LIMIT ${next_param}"
            ));

            let mut query = sqlx::query(&sql).bind(project).bind(&probe);
            if let Some(kind) = filter.kind {
                query = query.bind(kind.as_str());
            }
            if let Some(ids) = &filter.ids {
                query = query.bind(ids.clone());
            }
            query = query.bind(k as i64);

            let rows = query
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| from_sqlx("vectors.query", e))?;
            let mut matches = Vec::with_capacity(rows.len());
            for row in &rows {
                let score: f64 = row.try_get("score").map_err(|e| from_sqlx("vectors.query", e))?;
                matches.push(VectorMatch {
                    entry: vector_from_row(row)?,
                    score: score as f32,
                });
            }
            Ok(matches)
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn delete(&self, id: &str) -> Result<u64> {
        with_retry(&self.retry, &*self.observer, "vectors.delete", || async {
            let mut conn = self.sessions.acquire("vectors.delete").await?;
            let result = sqlx::query("DELETE FROM vectors WHERE id = $1")
                .bind(id)
                .execute(&mut *conn)
                .await
                .map_err(|e| from_sqlx("vectors.delete", e))?;
            Ok(result.rows_affected())
        })
        .await
    }

    #[instrument(skip(self, ids), err)]
    async fn delete_batch(&self, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        with_retry(&self.retry, &*self.observer, "vectors.delete_batch", || async {
            let mut tx = self.sessions.begin("vectors.delete_batch").await?;
            let mut deleted = 0;
            for chunk in ids.chunks(self.batch_chunk_size) {
                deleted += sqlx::query("DELETE FROM vectors WHERE id = ANY($1)")
                    .bind(chunk.to_vec())
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| from_sqlx("vectors.delete_batch", e))?
                    .rows_affected();
            }
            tx.commit()
                .await
                .map_err(|e| from_sqlx("vectors.delete_batch", e))?;
            Ok(deleted)
        })
        .await
    }

    #[instrument(skip(self, entity_names), err)]
    async fn delete_entity_embeddings(
        &self,
        project_id: &str,
        entity_names: &[String],
    ) -> Result<u64> {
        if entity_names.is_empty() {
            return Ok(0);
        }
        let project = parse_project_id(project_id)?;
        let normalized: Vec<String> = entity_names.iter().map(|n| normalize_name(n)).collect();
        with_retry(&self.retry, &*self.observer, "vectors.delete_entities", || async {
            let mut conn = self.sessions.acquire("vectors.delete_entities").await?;
            let result = sqlx::query(
                "DELETE FROM vectors
                 WHERE project_id = $1 AND type = 'entity' AND content = ANY($2)",
            )
            .bind(project)
            .bind(normalized.clone())
            .execute(&mut *conn)
            .await
            .map_err(|e| from_sqlx("vectors.delete_entities", e))?;
            Ok(result.rows_affected())
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn chunk_ids_by_document(
        &self,
        project_id: &str,
        document_id: &str,
    ) -> Result<Vec<String>> {
        let project = parse_project_id(project_id)?;
        let document = parse_document_id(document_id)?;
        with_retry(&self.retry, &*self.observer, "vectors.chunk_ids", || async {
            let mut conn = self.sessions.acquire("vectors.chunk_ids").await?;
            sqlx::query_scalar(
                "SELECT id FROM vectors
                 WHERE project_id = $1 AND document_id = $2 AND type = 'chunk'
                 ORDER BY chunk_index",
            )
            .bind(project)
            .bind(document)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| from_sqlx("vectors.chunk_ids", e))
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn has_vectors(&self, document_id: &str) -> Result<bool> {
        let document = parse_document_id(document_id)?;
        with_retry(&self.retry, &*self.observer, "vectors.has_vectors", || async {
            let mut conn = self.sessions.acquire("vectors.has_vectors").await?;
            let row = sqlx::query("SELECT 1 FROM vectors WHERE document_id = $1 LIMIT 1")
                .bind(document)
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| from_sqlx("vectors.has_vectors", e))?;
            Ok(row.is_some())
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn size(&self) -> Result<u64> {
        with_retry(&self.retry, &*self.observer, "vectors.size", || async {
            let mut conn = self.sessions.acquire("vectors.size").await?;
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors")
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| from_sqlx("vectors.size", e))?;
            Ok(count.max(0) as u64)
        })
        .await
    }
}
