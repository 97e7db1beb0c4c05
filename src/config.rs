//! Storage configuration and backend selection.
//!
//! The backend is an enum discriminant chosen once at startup; everything
//! else is plain data with builder-style `with_*` methods. Environment
//! fallbacks (via dotenvy) cover the common deployment knobs:
//!
//! - `RAGWEAVE_BACKEND` — `postgresql` or `sqlite`
//! - `RAGWEAVE_SQLITE_PATH` — file path or `:memory:`
//! - `RAGWEAVE_POSTGRES_URL` — data-source URL for the server backend

use std::time::Duration;

use crate::errors::{Result, StorageError};
use crate::retry::RetryPolicy;

/// Which backing engine the facade drives. Fixed for process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Postgres,
    Sqlite,
}

impl BackendKind {
    /// Parse a configured backend name, case-insensitively.
    ///
    /// Anything other than `postgresql` or `sqlite` fails startup.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "postgresql" => Ok(Self::Postgres),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(StorageError::InvalidConfiguration {
                message: format!("unknown storage backend {other:?}"),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgresql",
            Self::Sqlite => "sqlite",
        }
    }
}

/// Embedded-engine settings: pool sizes, busy timeout, and the pragmas every
/// session is configured with on open.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Filesystem path, or `:memory:` for a process-local database.
    pub path: String,
    /// Bounded pool of concurrent readers.
    pub read_pool_size: u32,
    /// Upper bound on waiting for a session (mutex wait and busy pragma).
    pub busy_timeout: Duration,
    /// Write-ahead logging; readers and the writer coexist under WAL.
    pub wal_mode: bool,
    /// Page-cache budget in KB, passed as a negative `cache_size` pragma.
    pub cache_size_kb: i64,
    /// Memory-map size in bytes; 0 disables mapping.
    pub mmap_size: u64,
    /// Spill temp structures to file instead of memory.
    pub temp_store_file: bool,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: "ragweave.db".to_string(),
            read_pool_size: 4,
            busy_timeout: Duration::from_secs(30),
            wal_mode: true,
            cache_size_kb: 2000,
            mmap_size: 256 * 1024 * 1024,
            temp_store_file: false,
        }
    }
}

impl SqliteConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn in_memory() -> Self {
        Self::new(":memory:")
    }

    /// Preset for constrained edge deployments: 500 KB cache, no mmap,
    /// file-backed temp store, two readers.
    #[must_use]
    pub fn edge(mut self) -> Self {
        self.read_pool_size = 2;
        self.cache_size_kb = 500;
        self.mmap_size = 0;
        self.temp_store_file = true;
        self
    }

    pub fn is_in_memory(&self) -> bool {
        self.path == ":memory:"
    }
}

/// Server-engine settings. Pooling is delegated to the data source.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 8,
        }
    }
}

/// Embedding dimension every vector row must match.
#[derive(Debug, Clone, Copy)]
pub struct VectorConfig {
    pub dimension: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self { dimension: 384 }
    }
}

/// Retry knobs, converted into a [`RetryPolicy`] when the facade is built.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub jitter: Duration,
    pub max_duration: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            jitter: Duration::from_millis(100),
            max_duration: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            enabled: self.enabled,
            max_retries: self.max_retries,
            base_delay: self.base_delay,
            jitter: self.jitter,
            max_duration: self.max_duration,
        }
    }
}

/// Top-level configuration handed to `StorageFacade::connect`.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: BackendKind,
    pub sqlite: SqliteConfig,
    pub postgres: Option<PostgresConfig>,
    pub vector: VectorConfig,
    pub retry: RetryConfig,
    /// Batched writes are applied atomically per chunk of this many rows.
    pub batch_chunk_size: usize,
}

impl StorageConfig {
    /// Embedded backend at the given path.
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            backend: BackendKind::Sqlite,
            sqlite: SqliteConfig::new(path),
            postgres: None,
            vector: VectorConfig::default(),
            retry: RetryConfig::default(),
            batch_chunk_size: 500,
        }
    }

    /// Embedded backend on a process-local in-memory database.
    pub fn sqlite_in_memory() -> Self {
        Self::sqlite(":memory:")
    }

    /// Server backend against the given data-source URL.
    pub fn postgres(url: impl Into<String>) -> Self {
        Self {
            backend: BackendKind::Postgres,
            sqlite: SqliteConfig::default(),
            postgres: Some(PostgresConfig::new(url)),
            vector: VectorConfig::default(),
            retry: RetryConfig::default(),
            batch_chunk_size: 500,
        }
    }

    /// Resolve backend and connection details from the environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let backend = std::env::var("RAGWEAVE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());
        let mut config = match BackendKind::parse(&backend)? {
            BackendKind::Sqlite => {
                let path = std::env::var("RAGWEAVE_SQLITE_PATH")
                    .unwrap_or_else(|_| "ragweave.db".to_string());
                Self::sqlite(path)
            }
            BackendKind::Postgres => {
                let url = std::env::var("RAGWEAVE_POSTGRES_URL").map_err(|_| {
                    StorageError::InvalidConfiguration {
                        message: "RAGWEAVE_POSTGRES_URL is required for the postgresql backend"
                            .to_string(),
                    }
                })?;
                Self::postgres(url)
            }
        };
        if let Ok(dim) = std::env::var("RAGWEAVE_VECTOR_DIMENSION") {
            config.vector.dimension = dim.parse().map_err(|_| {
                StorageError::InvalidConfiguration {
                    message: format!("RAGWEAVE_VECTOR_DIMENSION {dim:?} is not a positive integer"),
                }
            })?;
        }
        Ok(config)
    }

    /// Edge preset: smaller caches, smaller pools, smaller write batches.
    #[must_use]
    pub fn edge_preset(mut self) -> Self {
        self.sqlite = self.sqlite.edge();
        self.batch_chunk_size = 100;
        self
    }

    #[must_use]
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.vector.dimension = dimension;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_batch_chunk_size(mut self, size: usize) -> Self {
        self.batch_chunk_size = size;
        self
    }

    /// Reject malformed values before any connection is opened.
    pub fn validate(&self) -> Result<()> {
        if self.vector.dimension == 0 {
            return Err(invalid("vector.dimension must be positive"));
        }
        if self.batch_chunk_size == 0 {
            return Err(invalid("batch_chunk_size must be positive"));
        }
        match self.backend {
            BackendKind::Sqlite => {
                if self.sqlite.path.trim().is_empty() {
                    return Err(invalid("storage.sqlite.path must not be empty"));
                }
                if self.sqlite.read_pool_size == 0 {
                    return Err(invalid("storage.sqlite.readPoolSize must be positive"));
                }
                if self.sqlite.busy_timeout.is_zero() {
                    return Err(invalid("storage.sqlite.busyTimeoutMs must be positive"));
                }
            }
            BackendKind::Postgres => {
                let pg = self
                    .postgres
                    .as_ref()
                    .ok_or_else(|| invalid("postgresql backend requires a data-source URL"))?;
                if pg.url.trim().is_empty() {
                    return Err(invalid("storage.postgres.url must not be empty"));
                }
                if pg.max_connections == 0 {
                    return Err(invalid("storage.postgres.maxConnections must be positive"));
                }
            }
        }
        Ok(())
    }
}

fn invalid(message: &str) -> StorageError {
    StorageError::InvalidConfiguration {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_are_case_insensitive() {
        assert_eq!(BackendKind::parse("PostgreSQL").unwrap(), BackendKind::Postgres);
        assert_eq!(BackendKind::parse("SQLITE").unwrap(), BackendKind::Sqlite);
        assert_eq!(BackendKind::parse(" sqlite ").unwrap(), BackendKind::Sqlite);
    }

    #[test]
    fn unknown_backend_is_fatal() {
        let err = BackendKind::parse("mysql").unwrap_err();
        assert!(matches!(err, StorageError::InvalidConfiguration { .. }));
    }

    #[test]
    fn edge_preset_shrinks_resources() {
        let config = StorageConfig::sqlite_in_memory().edge_preset();
        assert_eq!(config.sqlite.read_pool_size, 2);
        assert_eq!(config.sqlite.cache_size_kb, 500);
        assert_eq!(config.sqlite.mmap_size, 0);
        assert!(config.sqlite.temp_store_file);
        assert_eq!(config.batch_chunk_size, 100);
    }

    #[test]
    fn validation_rejects_zero_dimension() {
        let config = StorageConfig::sqlite_in_memory().with_dimension(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn postgres_requires_url() {
        let mut config = StorageConfig::postgres("postgresql://localhost/ragweave");
        assert!(config.validate().is_ok());
        config.postgres = None;
        assert!(config.validate().is_err());
    }
}
