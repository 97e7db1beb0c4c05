//! Server-engine extraction cache.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::PgRow;
use tracing::instrument;
use uuid::Uuid;

use crate::errors::{Result, from_sqlx};
use crate::ident::parse_project_id;
use crate::records::{CacheType, ExtractionCache};
use crate::retry::{RetryObserver, RetryPolicy, with_retry};
use crate::sessions::PgSessions;
use crate::stores::cache::ExtractionCacheStore;

const CACHE_COLUMNS: &str =
    "id, project_id, cache_type, chunk_id, content_hash, result, tokens_used, created_at, updated_at";

pub struct PgExtractionCacheStore {
    sessions: Arc<PgSessions>,
    retry: RetryPolicy,
    observer: Arc<dyn RetryObserver>,
}

impl PgExtractionCacheStore {
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

fn cache_from_row(row: &PgRow) -> Result<ExtractionCache> {
    let cache_type: String = row
        .try_get("cache_type")
        .map_err(|e| from_sqlx("cache row decode", e))?;
    Ok(ExtractionCache {
        id: row.try_get("id").map_err(|e| from_sqlx("cache row decode", e))?,
        project_id: row
            .try_get::<Uuid, _>("project_id")
            .map_err(|e| from_sqlx("cache row decode", e))?
            .to_string(),
        cache_type: CacheType::parse(&cache_type)?,
        chunk_id: row
            .try_get("chunk_id")
            .map_err(|e| from_sqlx("cache row decode", e))?,
        content_hash: row
            .try_get("content_hash")
            .map_err(|e| from_sqlx("cache row decode", e))?,
        result: row
            .try_get("result")
            .map_err(|e| from_sqlx("cache row decode", e))?,
        tokens_used: row
            .try_get("tokens_used")
            .map_err(|e| from_sqlx("cache row decode", e))?,
        created_at: row
            .try_get::<DateTime<Utc>, _>("created_at")
            .map_err(|e| from_sqlx("cache row decode", e))?,
        updated_at: row
            .try_get::<DateTime<Utc>, _>("updated_at")
            .map_err(|e| from_sqlx("cache row decode", e))?,
    })
}

#[async_trait]
impl ExtractionCacheStore for PgExtractionCacheStore {
    #[instrument(skip(self, result), err)]
    async fn store(
        &self,
        project_id: &str,
        cache_type: CacheType,
        chunk_id: Option<&str>,
        content_hash: &str,
        result: &str,
        tokens_used: i64,
    ) -> Result<()> {
        let project = parse_project_id(project_id)?;
        with_retry(&self.retry, &*self.observer, "cache.store", || async {
            let mut conn = self.sessions.acquire("cache.store").await?;
            sqlx::query(
                r#"
                INSERT INTO extraction_cache
                    (id, project_id, cache_type, chunk_id, content_hash, result, tokens_used,
                     created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
                ON CONFLICT (project_id, cache_type, content_hash) DO UPDATE SET
                    result = EXCLUDED.result,
                    tokens_used = EXCLUDED.tokens_used,
                    chunk_id = EXCLUDED.chunk_id,
                    updated_at = EXCLUDED.updated_at"#,
            )
            .bind(Uuid::new_v4())
            .bind(project)
            .bind(cache_type.as_str())
            .bind(chunk_id)
            .bind(content_hash)
            .bind(result)
            .bind(tokens_used)
            .bind(Utc::now())
            .execute(&mut *conn)
            .await
            .map_err(|e| from_sqlx("cache.store", e))?;
            Ok(())
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn get(
        &self,
        project_id: &str,
        cache_type: CacheType,
        content_hash: &str,
    ) -> Result<Option<ExtractionCache>> {
        let project = parse_project_id(project_id)?;
        with_retry(&self.retry, &*self.observer, "cache.get", || async {
            let mut conn = self.sessions.acquire("cache.get").await?;
            sqlx::query(&format!(
                "SELECT {CACHE_COLUMNS} FROM extraction_cache
                 WHERE project_id = $1 AND cache_type = $2 AND content_hash = $3"
            ))
            .bind(project)
            .bind(cache_type.as_str())
            .bind(content_hash)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| from_sqlx("cache.get", e))?
            .map(|row| cache_from_row(&row))
            .transpose()
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn get_by_chunk_id(
        &self,
        project_id: &str,
        chunk_id: &str,
    ) -> Result<Vec<ExtractionCache>> {
        let project = parse_project_id(project_id)?;
        with_retry(&self.retry, &*self.observer, "cache.by_chunk", || async {
            let mut conn = self.sessions.acquire("cache.by_chunk").await?;
            let rows = sqlx::query(&format!(
                "SELECT {CACHE_COLUMNS} FROM extraction_cache
                 WHERE project_id = $1 AND chunk_id = $2 ORDER BY cache_type"
            ))
            .bind(project)
            .bind(chunk_id)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| from_sqlx("cache.by_chunk", e))?;
            rows.iter().map(cache_from_row).collect()
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn delete_by_project(&self, project_id: &str) -> Result<u64> {
        let project = parse_project_id(project_id)?;
        with_retry(&self.retry, &*self.observer, "cache.delete_project", || async {
            let mut conn = self.sessions.acquire("cache.delete_project").await?;
            let result = sqlx::query("DELETE FROM extraction_cache WHERE project_id = $1")
                .bind(project)
                .execute(&mut *conn)
                .await
                .map_err(|e| from_sqlx("cache.delete_project", e))?;
            Ok(result.rows_affected())
        })
        .await
    }
}
