//! Server-engine sessions: stateless, pool-delegated.

use std::time::Duration;

use sqlx::Postgres;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::time::Instant;
use tracing::debug;

use crate::config::PostgresConfig;
use crate::errors::{Result, from_acquire, from_sqlx};

/// Session manager for the server engine. Pooling, keep-alive, and writer
/// coordination are delegated to the data source; the engine's MVCC provides
/// isolation, so there is no explicit writer serialization here.
pub struct PgSessions {
    pool: PgPool,
}

impl std::fmt::Debug for PgSessions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgSessions").finish()
    }
}

impl PgSessions {
    pub async fn open(config: &PostgresConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&config.url)
            .await
            .map_err(|e| from_sqlx("postgres connect", e))?;
        debug!(max_connections = config.max_connections, "opened server sessions");
        Ok(Self { pool })
    }

    /// Acquire one session for a single logical unit of work. Callers must
    /// not hold the session across unrelated awaits.
    pub async fn acquire(&self, operation: &'static str) -> Result<PoolConnection<Postgres>> {
        let started = Instant::now();
        self.pool
            .acquire()
            .await
            .map_err(|e| from_acquire(operation, started.elapsed(), e))
    }

    pub async fn begin(
        &self,
        operation: &'static str,
    ) -> Result<sqlx::Transaction<'_, Postgres>> {
        let started = Instant::now();
        self.pool
            .begin()
            .await
            .map_err(|e| from_acquire(operation, started.elapsed(), e))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
