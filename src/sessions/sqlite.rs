//! Embedded-engine sessions: single writer, bounded readers, WAL.

use std::str::FromStr;
use std::time::Duration;

use sqlx::Sqlite;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::config::SqliteConfig;
use crate::errors::{Result, from_acquire, from_sqlx};

/// Session manager for the embedded engine.
///
/// Writes go through a pool of exactly one connection, so the pool's acquire
/// queue is the write mutex and its acquire timeout is the bounded wait.
/// Reads come from a separate pool of `read_pool_size` connections. Under
/// WAL, readers never block behind the writer.
///
/// An in-memory path (`:memory:`) is backed by a process-local shared-cache
/// database with a unique name, so both pools observe the same data and the
/// database lives as long as this manager.
pub struct SqliteSessions {
    write: SqlitePool,
    read: SqlitePool,
    busy_timeout: Duration,
}

impl std::fmt::Debug for SqliteSessions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSessions")
            .field("busy_timeout", &self.busy_timeout)
            .finish()
    }
}

impl SqliteSessions {
    /// Open (or create) the database and configure every session with the
    /// engine pragmas: WAL, foreign keys, busy timeout, negative cache size,
    /// optional mmap, and temp-store mode.
    pub async fn open(config: &SqliteConfig) -> Result<Self> {
        let options = Self::connect_options(config)?;

        let write = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .acquire_timeout(config.busy_timeout)
            .connect_with(options.clone())
            .await
            .map_err(|e| from_sqlx("sqlite open (write pool)", e))?;

        let read = SqlitePoolOptions::new()
            .max_connections(config.read_pool_size)
            .acquire_timeout(config.busy_timeout)
            .connect_with(options)
            .await
            .map_err(|e| from_sqlx("sqlite open (read pool)", e))?;

        debug!(
            path = %config.path,
            readers = config.read_pool_size,
            wal = config.wal_mode,
            "opened embedded sessions"
        );

        Ok(Self {
            write,
            read,
            busy_timeout: config.busy_timeout,
        })
    }

    fn connect_options(config: &SqliteConfig) -> Result<SqliteConnectOptions> {
        let mut options = if config.is_in_memory() {
            // Distinct pools against a plain `:memory:` path would each get a
            // private database; a named shared-cache URI gives both pools one.
            let name = Uuid::new_v4().simple();
            SqliteConnectOptions::from_str(&format!(
                "sqlite:file:ragweave_{name}?mode=memory&cache=shared"
            ))
            .map_err(|e| from_sqlx("sqlite open", e))?
        } else {
            SqliteConnectOptions::new()
                .filename(&config.path)
                .create_if_missing(true)
        };

        options = options
            .journal_mode(if config.wal_mode {
                SqliteJournalMode::Wal
            } else {
                SqliteJournalMode::Delete
            })
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout)
            .pragma("cache_size", format!("-{}", config.cache_size_kb.abs()))
            .pragma("mmap_size", config.mmap_size.to_string())
            .pragma(
                "temp_store",
                if config.temp_store_file { "FILE" } else { "MEMORY" },
            )
            .pragma("case_sensitive_like", "1");
        Ok(options)
    }

    /// Acquire a read session, failing with `DatabaseLocked` after the
    /// configured bounded wait.
    pub async fn acquire_read(&self, operation: &'static str) -> Result<PoolConnection<Sqlite>> {
        let started = Instant::now();
        self.read
            .acquire()
            .await
            .map_err(|e| from_acquire(operation, started.elapsed(), e))
    }

    /// Acquire the exclusive write session.
    pub async fn acquire_write(&self, operation: &'static str) -> Result<PoolConnection<Sqlite>> {
        let started = Instant::now();
        self.write
            .acquire()
            .await
            .map_err(|e| from_acquire(operation, started.elapsed(), e))
    }

    /// Begin a transaction on the exclusive write session.
    pub async fn begin_write(
        &self,
        operation: &'static str,
    ) -> Result<sqlx::Transaction<'_, Sqlite>> {
        let started = Instant::now();
        self.write
            .begin()
            .await
            .map_err(|e| from_acquire(operation, started.elapsed(), e))
    }

    /// The single-connection write pool (for migrations and bulk copies).
    pub fn write_pool(&self) -> &SqlitePool {
        &self.write
    }

    pub fn read_pool(&self) -> &SqlitePool {
        &self.read
    }

    pub fn busy_timeout(&self) -> Duration {
        self.busy_timeout
    }

    /// Shut both pools down, draining in-flight sessions.
    pub async fn close(&self) {
        futures_util::future::join(self.write.close(), self.read.close()).await;
    }
}
