//! Embedded-engine document-status store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use tracing::instrument;

use crate::dialect::{Dialect, parse_rfc3339};
use crate::errors::{Result, from_sqlx};
use crate::records::{DocumentStatus, ProcessingStatus};
use crate::retry::{RetryObserver, RetryPolicy, with_retry};
use crate::sessions::SqliteSessions;
use crate::stores::status::DocStatusStore;

const STATUS_COLUMNS: &str = "doc_id, file_path, processing_status, chunk_count, entity_count, \
                              relation_count, error_message, created_at, updated_at";

pub struct SqliteDocStatusStore {
    sessions: Arc<SqliteSessions>,
    batch_chunk_size: usize,
    retry: RetryPolicy,
    observer: Arc<dyn RetryObserver>,
}

impl SqliteDocStatusStore {
    pub fn new(
        sessions: Arc<SqliteSessions>,
        batch_chunk_size: usize,
        retry: RetryPolicy,
        observer: Arc<dyn RetryObserver>,
    ) -> Self {
        Self {
            sessions,
            batch_chunk_size,
            retry,
            observer,
        }
    }
}

pub(crate) fn status_from_row(row: &SqliteRow) -> Result<DocumentStatus> {
    let processing_status: String = row
        .try_get("processing_status")
        .map_err(|e| from_sqlx("status row decode", e))?;
    Ok(DocumentStatus {
        doc_id: row.try_get("doc_id").map_err(|e| from_sqlx("status row decode", e))?,
        file_path: row
            .try_get("file_path")
            .map_err(|e| from_sqlx("status row decode", e))?,
        processing_status: ProcessingStatus::parse(&processing_status)?,
        chunk_count: row
            .try_get("chunk_count")
            .map_err(|e| from_sqlx("status row decode", e))?,
        entity_count: row
            .try_get("entity_count")
            .map_err(|e| from_sqlx("status row decode", e))?,
        relation_count: row
            .try_get("relation_count")
            .map_err(|e| from_sqlx("status row decode", e))?,
        error_message: row
            .try_get("error_message")
            .map_err(|e| from_sqlx("status row decode", e))?,
        created_at: parse_rfc3339(
            &row.try_get::<String, _>("created_at")
                .map_err(|e| from_sqlx("status row decode", e))?,
        ),
        updated_at: parse_rfc3339(
            &row.try_get::<String, _>("updated_at")
                .map_err(|e| from_sqlx("status row decode", e))?,
        ),
    })
}

async fn upsert_on(conn: &mut SqliteConnection, record: &DocumentStatus) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO document_status
            (doc_id, file_path, processing_status, chunk_count, entity_count, relation_count,
             error_message, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT (doc_id) DO UPDATE SET
            file_path = excluded.file_path,
            processing_status = excluded.processing_status,
            chunk_count = excluded.chunk_count,
            entity_count = excluded.entity_count,
            relation_count = excluded.relation_count,
            error_message = excluded.error_message,
            updated_at = excluded.updated_at"#,
    )
    .bind(&record.doc_id)
    .bind(&record.file_path)
    .bind(record.processing_status.as_str())
    .bind(record.chunk_count)
    .bind(record.entity_count)
    .bind(record.relation_count)
    .bind(&record.error_message)
    .bind(record.created_at.to_rfc3339())
    .bind(Utc::now().to_rfc3339())
    .execute(conn)
    .await
    .map_err(|e| from_sqlx("status.set", e))?;
    Ok(())
}

#[async_trait]
impl DocStatusStore for SqliteDocStatusStore {
    #[instrument(skip(self, record), err)]
    async fn set_status(&self, record: DocumentStatus) -> Result<()> {
        with_retry(&self.retry, &*self.observer, "status.set", || async {
            let mut conn = self.sessions.acquire_write("status.set").await?;
            upsert_on(&mut conn, &record).await
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn get_status(&self, doc_id: &str) -> Result<Option<DocumentStatus>> {
        with_retry(&self.retry, &*self.observer, "status.get", || async {
            let mut conn = self.sessions.acquire_read("status.get").await?;
            sqlx::query(&format!(
                "SELECT {STATUS_COLUMNS} FROM document_status WHERE doc_id = ?1"
            ))
            .bind(doc_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| from_sqlx("status.get", e))?
            .map(|row| status_from_row(&row))
            .transpose()
        })
        .await
    }

    #[instrument(skip(self, records), err)]
    async fn set_statuses(&self, records: Vec<DocumentStatus>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        for chunk in records.chunks(self.batch_chunk_size) {
            with_retry(&self.retry, &*self.observer, "status.set_batch", || async {
                let mut tx = self.sessions.begin_write("status.set_batch").await?;
                for record in chunk {
                    upsert_on(&mut tx, record).await?;
                }
                tx.commit()
                    .await
                    .map_err(|e| from_sqlx("status.set_batch", e))
            })
            .await?;
        }
        Ok(())
    }

    #[instrument(skip(self, doc_ids), err)]
    async fn get_statuses(&self, doc_ids: &[String]) -> Result<Vec<DocumentStatus>> {
        if doc_ids.is_empty() {
            return Ok(Vec::new());
        }
        with_retry(&self.retry, &*self.observer, "status.get_batch", || async {
            let mut conn = self.sessions.acquire_read("status.get_batch").await?;
            let mut statuses = Vec::new();
            for chunk in doc_ids.chunks(self.batch_chunk_size) {
                let in_list = Dialect::Sqlite.placeholders(1, chunk.len());
                let sql = format!(
                    "SELECT {STATUS_COLUMNS} FROM document_status WHERE doc_id IN ({in_list})"
                );
                let mut query = sqlx::query(&sql);
                for doc_id in chunk {
                    query = query.bind(doc_id);
                }
                let rows = query
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(|e| from_sqlx("status.get_batch", e))?;
                for row in &rows {
                    statuses.push(status_from_row(row)?);
                }
            }
            Ok(statuses)
        })
        .await
    }

    #[instrument(skip(self, doc_ids), err)]
    async fn delete_statuses(&self, doc_ids: &[String]) -> Result<u64> {
        if doc_ids.is_empty() {
            return Ok(0);
        }
        with_retry(&self.retry, &*self.observer, "status.delete_batch", || async {
            let mut tx = self.sessions.begin_write("status.delete_batch").await?;
            let mut deleted = 0;
            for chunk in doc_ids.chunks(self.batch_chunk_size) {
                let in_list = Dialect::Sqlite.placeholders(1, chunk.len());
                let sql = format!("DELETE FROM document_status WHERE doc_id IN ({in_list})");
                let mut query = sqlx::query(&sql);
                for doc_id in chunk {
                    query = query.bind(doc_id);
                }
                deleted += query
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| from_sqlx("status.delete_batch", e))?
                    .rows_affected();
            }
            tx.commit()
                .await
                .map_err(|e| from_sqlx("status.delete_batch", e))?;
            Ok(deleted)
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn statuses_by_processing_status(
        &self,
        status: ProcessingStatus,
    ) -> Result<Vec<DocumentStatus>> {
        with_retry(&self.retry, &*self.observer, "status.by_status", || async {
            let mut conn = self.sessions.acquire_read("status.by_status").await?;
            let rows = sqlx::query(&format!(
                "SELECT {STATUS_COLUMNS} FROM document_status
                 WHERE processing_status = ?1 ORDER BY doc_id"
            ))
            .bind(status.as_str())
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| from_sqlx("status.by_status", e))?;
            rows.iter().map(status_from_row).collect()
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn all_statuses(&self) -> Result<Vec<DocumentStatus>> {
        with_retry(&self.retry, &*self.observer, "status.all", || async {
            let mut conn = self.sessions.acquire_read("status.all").await?;
            let rows = sqlx::query(&format!(
                "SELECT {STATUS_COLUMNS} FROM document_status ORDER BY doc_id"
            ))
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| from_sqlx("status.all", e))?;
            rows.iter().map(status_from_row).collect()
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn clear(&self) -> Result<()> {
        with_retry(&self.retry, &*self.observer, "status.clear", || async {
            let mut conn = self.sessions.acquire_write("status.clear").await?;
            sqlx::query("DELETE FROM document_status")
                .execute(&mut *conn)
                .await
                .map_err(|e| from_sqlx("status.clear", e))?;
            Ok(())
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn size(&self) -> Result<u64> {
        with_retry(&self.retry, &*self.observer, "status.size", || async {
            let mut conn = self.sessions.acquire_read("status.size").await?;
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM document_status")
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| from_sqlx("status.size", e))?;
            Ok(count.max(0) as u64)
        })
        .await
    }
}
