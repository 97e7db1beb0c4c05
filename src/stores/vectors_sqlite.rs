//! Embedded-engine vector store.
//!
//! Vectors live as packed little-endian f32 blobs. `query` is a per-project
//! linear scan: rows stream off the read session while a bounded heap keeps
//! the best `k` candidates, so memory stays O(k) regardless of project size.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::instrument;

use crate::dialect::{Dialect, cosine_similarity, decode_vector_blob, encode_vector_blob, parse_rfc3339};
use crate::errors::{Result, StorageError, from_sqlx};
use crate::ident::{normalize_name, parse_project_id};
use crate::records::{VectorEntry, VectorKind};
use crate::retry::{RetryObserver, RetryPolicy, with_retry};
use crate::sessions::SqliteSessions;
use crate::stores::vectors::{VectorFilter, VectorMatch, VectorStore};

const VECTOR_COLUMNS: &str =
    "id, project_id, document_id, chunk_index, type, content, embedding, created_at";

pub struct SqliteVectorStore {
    sessions: Arc<SqliteSessions>,
    dimension: usize,
    batch_chunk_size: usize,
    retry: RetryPolicy,
    observer: Arc<dyn RetryObserver>,
}

impl SqliteVectorStore {
    pub fn new(
        sessions: Arc<SqliteSessions>,
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

    fn validate(&self, entry: &VectorEntry) -> Result<String> {
        if entry.project_id.trim().is_empty() {
            return Err(StorageError::invalid_argument(
                "vector metadata must carry a project id",
            ));
        }
        let project = parse_project_id(&entry.project_id)?.to_string();
        if entry.vector.len() != self.dimension {
            return Err(StorageError::DimensionMismatch {
                expected: self.dimension,
                actual: entry.vector.len(),
            });
        }
        Ok(project)
    }
}

pub(crate) fn vector_from_row(row: &SqliteRow) -> Result<VectorEntry> {
    let kind: String = row.try_get("type").map_err(|e| from_sqlx("vector row decode", e))?;
    let blob: Vec<u8> = row
        .try_get("embedding")
        .map_err(|e| from_sqlx("vector row decode", e))?;
    Ok(VectorEntry {
        id: row.try_get("id").map_err(|e| from_sqlx("vector row decode", e))?,
        project_id: row
            .try_get("project_id")
            .map_err(|e| from_sqlx("vector row decode", e))?,
        kind: VectorKind::parse(&kind)?,
        content: row
            .try_get("content")
            .map_err(|e| from_sqlx("vector row decode", e))?,
        vector: decode_vector_blob(&blob)?,
        document_id: row
            .try_get("document_id")
            .map_err(|e| from_sqlx("vector row decode", e))?,
        chunk_index: row
            .try_get("chunk_index")
            .map_err(|e| from_sqlx("vector row decode", e))?,
        created_at: parse_rfc3339(
            &row.try_get::<String, _>("created_at")
                .map_err(|e| from_sqlx("vector row decode", e))?,
        ),
    })
}

async fn upsert_on(
    conn: &mut sqlx::sqlite::SqliteConnection,
    project: &str,
    entry: &VectorEntry,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO vectors
            (id, project_id, document_id, chunk_index, type, content, embedding, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT (id) DO UPDATE SET
            project_id = excluded.project_id,
            document_id = excluded.document_id,
            chunk_index = excluded.chunk_index,
            type = excluded.type,
            content = excluded.content,
            embedding = excluded.embedding"#,
    )
    .bind(&entry.id)
    .bind(project)
    .bind(&entry.document_id)
    .bind(entry.chunk_index)
    .bind(entry.kind.as_str())
    .bind(&entry.content)
    .bind(encode_vector_blob(&entry.vector))
    .bind(entry.created_at.to_rfc3339())
    .execute(conn)
    .await
    .map_err(|e| from_sqlx("vectors.upsert", e))?;
    Ok(())
}

/// Scan candidate ordered worst-first so the binary heap evicts correctly:
/// lower score is "greater", and among equal scores the later row loses.
struct Candidate {
    score: f32,
    seq: usize,
    entry: VectorEntry,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.score.total_cmp(&other.score) == Ordering::Equal && self.seq == other.seq
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    #[instrument(skip(self), err)]
    async fn initialize(&self) -> Result<()> {
        // Schema and indexes come from the migrator; nothing dimension-shaped
        // is materialized for blobs, so readiness is a connectivity probe.
        let mut conn = self.sessions.acquire_read("vectors.initialize").await?;
        sqlx::query("SELECT COUNT(*) FROM vectors LIMIT 1")
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| from_sqlx("vectors.initialize", e))?;
        Ok(())
    }

    #[instrument(skip(self, entry), err)]
    async fn upsert(&self, entry: VectorEntry) -> Result<()> {
        let project = self.validate(&entry)?;
        with_retry(&self.retry, &*self.observer, "vectors.upsert", || async {
            let mut conn = self.sessions.acquire_write("vectors.upsert").await?;
            upsert_on(&mut conn, &project, &entry).await
        })
        .await
    }

    #[instrument(skip(self, entries), err)]
    async fn upsert_batch(&self, entries: Vec<VectorEntry>) -> Result<()> {
        // Atomic per chunk: a permanent failure in a later chunk leaves
        // earlier chunks committed.
        for chunk in entries.chunks(self.batch_chunk_size) {
            let validated: Vec<(String, &VectorEntry)> = chunk
                .iter()
                .map(|entry| self.validate(entry).map(|p| (p, entry)))
                .collect::<Result<_>>()?;
            with_retry(&self.retry, &*self.observer, "vectors.upsert_batch", || async {
                let mut tx = self.sessions.begin_write("vectors.upsert_batch").await?;
                for (project, entry) in &validated {
                    upsert_on(&mut tx, project, entry).await?;
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
            let mut conn = self.sessions.acquire_read("vectors.get").await?;
            sqlx::query(&format!("SELECT {VECTOR_COLUMNS} FROM vectors WHERE id = ?1"))
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
        let project = parse_project_id(&filter.project_id)?.to_string();
        if k == 0 {
            return Ok(Vec::new());
        }

        with_retry(&self.retry, &*self.observer, "vectors.query", || async {
            let mut conn = self.sessions.acquire_read("vectors.query").await?;

            let mut sql = format!(
                "SELECT {VECTOR_COLUMNS} FROM vectors WHERE project_id = ?1"
            );
            let mut next_param = 2;
            if filter.kind.is_some() {
                sql.push_str(&format!(" AND type = ?{next_param}"));
                next_param += 1;
            }
            if let Some(ids) = &filter.ids {
                let in_list = Dialect::Sqlite.placeholders(next_param, ids.len());
                sql.push_str(&format!(" AND id IN ({in_list})"));
            }
            sql.push_str(" ORDER BY rowid");

            let mut query = sqlx::query(&sql).bind(&project);
            if let Some(kind) = filter.kind {
                query = query.bind(kind.as_str());
            }
            if let Some(ids) = &filter.ids {
                for id in ids {
                    query = query.bind(id);
                }
            }

            let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(k + 1);
            let mut seq = 0usize;
            let mut rows = query.fetch(&mut *conn);
            while let Some(row) = rows
                .try_next()
                .await
                .map_err(|e| from_sqlx("vectors.query", e))?
            {
                let entry = vector_from_row(&row)?;
                let score = cosine_similarity(vector, &entry.vector);
                heap.push(Candidate { score, seq, entry });
                if heap.len() > k {
                    heap.pop();
                }
                seq += 1;
            }

            Ok(heap
                .into_sorted_vec()
                .into_iter()
                .map(|c| VectorMatch {
                    score: c.score,
                    entry: c.entry,
                })
                .collect())
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn delete(&self, id: &str) -> Result<u64> {
        with_retry(&self.retry, &*self.observer, "vectors.delete", || async {
            let mut conn = self.sessions.acquire_write("vectors.delete").await?;
            let result = sqlx::query("DELETE FROM vectors WHERE id = ?1")
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
            let mut tx = self.sessions.begin_write("vectors.delete_batch").await?;
            let mut deleted = 0;
            for chunk in ids.chunks(self.batch_chunk_size) {
                let in_list = Dialect::Sqlite.placeholders(1, chunk.len());
                let sql = format!("DELETE FROM vectors WHERE id IN ({in_list})");
                let mut query = sqlx::query(&sql);
                for id in chunk {
                    query = query.bind(id);
                }
                deleted += query
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
        let project = parse_project_id(project_id)?.to_string();
        let normalized: Vec<String> = entity_names.iter().map(|n| normalize_name(n)).collect();
        with_retry(&self.retry, &*self.observer, "vectors.delete_entities", || async {
            let mut tx = self.sessions.begin_write("vectors.delete_entities").await?;
            let mut deleted = 0;
            for chunk in normalized.chunks(self.batch_chunk_size) {
                let in_list = Dialect::Sqlite.placeholders(2, chunk.len());
                let sql = format!(
                    "DELETE FROM vectors
                     WHERE project_id = ?1 AND type = 'entity' AND content IN ({in_list})"
                );
                let mut query = sqlx::query(&sql).bind(&project);
                for name in chunk {
                    query = query.bind(name);
                }
                deleted += query
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| from_sqlx("vectors.delete_entities", e))?
                    .rows_affected();
            }
            tx.commit()
                .await
                .map_err(|e| from_sqlx("vectors.delete_entities", e))?;
            Ok(deleted)
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn chunk_ids_by_document(
        &self,
        project_id: &str,
        document_id: &str,
    ) -> Result<Vec<String>> {
        let project = parse_project_id(project_id)?.to_string();
        with_retry(&self.retry, &*self.observer, "vectors.chunk_ids", || async {
            let mut conn = self.sessions.acquire_read("vectors.chunk_ids").await?;
            sqlx::query_scalar(
                "SELECT id FROM vectors
                 WHERE project_id = ?1 AND document_id = ?2 AND type = 'chunk'
                 ORDER BY chunk_index",
            )
            .bind(&project)
            .bind(document_id)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| from_sqlx("vectors.chunk_ids", e))
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn has_vectors(&self, document_id: &str) -> Result<bool> {
        with_retry(&self.retry, &*self.observer, "vectors.has_vectors", || async {
            let mut conn = self.sessions.acquire_read("vectors.has_vectors").await?;
            let row = sqlx::query("SELECT 1 FROM vectors WHERE document_id = ?1 LIMIT 1")
                .bind(document_id)
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
            let mut conn = self.sessions.acquire_read("vectors.size").await?;
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors")
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| from_sqlx("vectors.size", e))?;
            Ok(count.max(0) as u64)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(id: &str, score_vec: Vec<f32>) -> VectorEntry {
        VectorEntry {
            id: id.to_string(),
            project_id: "p".to_string(),
            kind: VectorKind::Chunk,
            content: String::new(),
            vector: score_vec,
            document_id: None,
            chunk_index: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn heap_keeps_best_k_and_breaks_ties_by_insertion() {
        let mut heap: BinaryHeap<Candidate> = BinaryHeap::new();
        let scored = [
            ("a", 0.5f32),
            ("b", 0.9),
            ("c", 0.9),
            ("d", 0.1),
            ("e", 0.7),
        ];
        for (seq, (id, score)) in scored.iter().enumerate() {
            heap.push(Candidate {
                score: *score,
                seq,
                entry: entry(id, vec![]),
            });
            if heap.len() > 3 {
                heap.pop();
            }
        }
        let ids: Vec<String> = heap
            .into_sorted_vec()
            .into_iter()
            .map(|c| c.entry.id)
            .collect();
        assert_eq!(ids, vec!["b", "c", "e"]);
    }
}
