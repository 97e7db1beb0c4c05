//! Server-engine KV store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rustc_hash::FxHashMap;
use sqlx::Row;
use tracing::instrument;

use crate::errors::{Result, from_sqlx};
use crate::retry::{RetryObserver, RetryPolicy, with_retry};
use crate::sessions::PgSessions;
use crate::stores::kv::KvStore;

pub struct PgKvStore {
    sessions: Arc<PgSessions>,
    batch_chunk_size: usize,
    retry: RetryPolicy,
    observer: Arc<dyn RetryObserver>,
}

impl PgKvStore {
    pub fn new(
        sessions: Arc<PgSessions>,
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

#[async_trait]
impl KvStore for PgKvStore {
    #[instrument(skip(self, value), err)]
    async fn set(&self, key: &str, value: &str) -> Result<()> {
        with_retry(&self.retry, &*self.observer, "kv.set", || async {
            let mut conn = self.sessions.acquire("kv.set").await?;
            sqlx::query(
                "INSERT INTO kv_store (key, value, updated_at) VALUES ($1, $2, $3)
                 ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value,
                                                 updated_at = EXCLUDED.updated_at",
            )
            .bind(key)
            .bind(value)
            .bind(Utc::now())
            .execute(&mut *conn)
            .await
            .map_err(|e| from_sqlx("kv.set", e))?;
            Ok(())
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn get(&self, key: &str) -> Result<Option<String>> {
        with_retry(&self.retry, &*self.observer, "kv.get", || async {
            let mut conn = self.sessions.acquire("kv.get").await?;
            sqlx::query_scalar("SELECT value FROM kv_store WHERE key = $1")
                .bind(key)
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| from_sqlx("kv.get", e))
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn delete(&self, key: &str) -> Result<u64> {
        with_retry(&self.retry, &*self.observer, "kv.delete", || async {
            let mut conn = self.sessions.acquire("kv.delete").await?;
            let result = sqlx::query("DELETE FROM kv_store WHERE key = $1")
                .bind(key)
                .execute(&mut *conn)
                .await
                .map_err(|e| from_sqlx("kv.delete", e))?;
            Ok(result.rows_affected())
        })
        .await
    }

    #[instrument(skip(self, pairs), err)]
    async fn set_batch(&self, pairs: Vec<(String, String)>) -> Result<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        for chunk in pairs.chunks(self.batch_chunk_size) {
            with_retry(&self.retry, &*self.observer, "kv.set_batch", || async {
                let mut tx = self.sessions.begin("kv.set_batch").await?;
                for (key, value) in chunk {
                    sqlx::query(
                        "INSERT INTO kv_store (key, value, updated_at) VALUES ($1, $2, $3)
                         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value,
                                                         updated_at = EXCLUDED.updated_at",
                    )
                    .bind(key)
                    .bind(value)
                    .bind(Utc::now())
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| from_sqlx("kv.set_batch", e))?;
                }
                tx.commit().await.map_err(|e| from_sqlx("kv.set_batch", e))
            })
            .await?;
        }
        Ok(())
    }

    #[instrument(skip(self, keys), err)]
    async fn get_batch(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        with_retry(&self.retry, &*self.observer, "kv.get_batch", || async {
            let mut conn = self.sessions.acquire("kv.get_batch").await?;
            let mut found: FxHashMap<String, String> = FxHashMap::default();
            for chunk in keys.chunks(self.batch_chunk_size) {
                let rows = sqlx::query("SELECT key, value FROM kv_store WHERE key = ANY($1)")
                    .bind(chunk.to_vec())
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(|e| from_sqlx("kv.get_batch", e))?;
                for row in rows {
                    let key: String = row.try_get("key").map_err(|e| from_sqlx("kv.get_batch", e))?;
                    let value: String =
                        row.try_get("value").map_err(|e| from_sqlx("kv.get_batch", e))?;
                    found.insert(key, value);
                }
            }
            Ok(keys.iter().map(|k| found.remove(k)).collect())
        })
        .await
    }

    #[instrument(skip(self, keys), err)]
    async fn delete_batch(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        with_retry(&self.retry, &*self.observer, "kv.delete_batch", || async {
            let mut tx = self.sessions.begin("kv.delete_batch").await?;
            let mut deleted = 0;
            for chunk in keys.chunks(self.batch_chunk_size) {
                deleted += sqlx::query("DELETE FROM kv_store WHERE key = ANY($1)")
                    .bind(chunk.to_vec())
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| from_sqlx("kv.delete_batch", e))?
                    .rows_affected();
            }
            tx.commit()
                .await
                .map_err(|e| from_sqlx("kv.delete_batch", e))?;
            Ok(deleted)
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn exists(&self, key: &str) -> Result<bool> {
        with_retry(&self.retry, &*self.observer, "kv.exists", || async {
            let mut conn = self.sessions.acquire("kv.exists").await?;
            let row = sqlx::query("SELECT 1 FROM kv_store WHERE key = $1")
                .bind(key)
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| from_sqlx("kv.exists", e))?;
            Ok(row.is_some())
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn keys(&self, pattern: Option<&str>) -> Result<Vec<String>> {
        with_retry(&self.retry, &*self.observer, "kv.keys", || async {
            let mut conn = self.sessions.acquire("kv.keys").await?;
            match pattern {
                Some(pattern) => {
                    sqlx::query_scalar("SELECT key FROM kv_store WHERE key LIKE $1 ORDER BY key")
                        .bind(pattern)
                        .fetch_all(&mut *conn)
                        .await
                        .map_err(|e| from_sqlx("kv.keys", e))
                }
                None => sqlx::query_scalar("SELECT key FROM kv_store ORDER BY key")
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(|e| from_sqlx("kv.keys", e)),
            }
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn clear(&self) -> Result<()> {
        with_retry(&self.retry, &*self.observer, "kv.clear", || async {
            let mut conn = self.sessions.acquire("kv.clear").await?;
            sqlx::query("DELETE FROM kv_store")
                .execute(&mut *conn)
                .await
                .map_err(|e| from_sqlx("kv.clear", e))?;
            Ok(())
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn size(&self) -> Result<u64> {
        with_retry(&self.retry, &*self.observer, "kv.size", || async {
            let mut conn = self.sessions.acquire("kv.size").await?;
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM kv_store")
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| from_sqlx("kv.size", e))?;
            Ok(count.max(0) as u64)
        })
        .await
    }
}
