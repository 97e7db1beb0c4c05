//! The storage facade: one builder from configuration to the six sub-store
//! handles.
//!
//! Backend selection is an enum discriminant fixed at connect time. The
//! facade opens the sessions, runs migrations, and wires every sub-store
//! with the retry policy and observer; afterwards the handles are plain
//! `Arc<dyn …>` values safe to clone across tasks.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::config::{BackendKind, StorageConfig};
use crate::errors::{Result, StorageError};
use crate::migrate;
use crate::portability::{ExportSummary, ImportSummary, PortabilityService};
use crate::retry::{RetryObserver, TracingRetryObserver};
use crate::sessions::{PgSessions, SqliteSessions};
use crate::stores::{
    DocStatusStore, ExtractionCacheStore, GraphStore, KvStore, ProjectStore, VectorStore,
    cache_postgres::PgExtractionCacheStore, cache_sqlite::SqliteExtractionCacheStore,
    graph_postgres::PgGraphStore, graph_sqlite::SqliteGraphStore, kv_postgres::PgKvStore,
    kv_sqlite::SqliteKvStore, projects_postgres::PgProjectStore,
    projects_sqlite::SqliteProjectStore, status_postgres::PgDocStatusStore,
    status_sqlite::SqliteDocStatusStore, vectors_postgres::PgVectorStore,
    vectors_sqlite::SqliteVectorStore,
};

/// In-process entry point to the storage engine.
///
/// ```rust,no_run
/// use ragweave::{StorageConfig, StorageFacade};
///
/// # async fn example() -> ragweave::Result<()> {
/// let facade = StorageFacade::connect(StorageConfig::sqlite("ragweave.db")).await?;
/// let project = facade.projects().create_project("docs").await?;
/// facade.graph().create_project_graph(&project.id.to_string()).await?;
/// facade.close().await;
/// # Ok(())
/// # }
/// ```
pub struct StorageFacade {
    backend: BackendKind,
    sqlite: Option<Arc<SqliteSessions>>,
    postgres: Option<Arc<PgSessions>>,
    projects: Arc<dyn ProjectStore>,
    vectors: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    kv: Arc<dyn KvStore>,
    extraction_cache: Arc<dyn ExtractionCacheStore>,
    doc_status: Arc<dyn DocStatusStore>,
}

impl std::fmt::Debug for StorageFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageFacade")
            .field("backend", &self.backend)
            .finish()
    }
}

impl StorageFacade {
    /// Connect with the default (tracing) retry observer.
    pub async fn connect(config: StorageConfig) -> Result<Self> {
        Self::connect_with_observer(config, Arc::new(TracingRetryObserver)).await
    }

    /// Connect, directing retry events at the given observer.
    pub async fn connect_with_observer(
        config: StorageConfig,
        observer: Arc<dyn RetryObserver>,
    ) -> Result<Self> {
        config.validate()?;
        let retry = config.retry.policy();
        let dimension = config.vector.dimension;
        let batch = config.batch_chunk_size;

        let facade = match config.backend {
            BackendKind::Sqlite => {
                let sessions = Arc::new(SqliteSessions::open(&config.sqlite).await?);
                let applied = migrate::migrate_sqlite(sessions.write_pool()).await?;
                info!(backend = "sqlite", applied, "storage ready");
                Self {
                    backend: BackendKind::Sqlite,
                    projects: Arc::new(SqliteProjectStore::new(
                        sessions.clone(),
                        retry.clone(),
                        observer.clone(),
                    )),
                    vectors: Arc::new(SqliteVectorStore::new(
                        sessions.clone(),
                        dimension,
                        batch,
                        retry.clone(),
                        observer.clone(),
                    )),
                    graph: Arc::new(SqliteGraphStore::new(
                        sessions.clone(),
                        retry.clone(),
                        observer.clone(),
                    )),
                    kv: Arc::new(SqliteKvStore::new(
                        sessions.clone(),
                        batch,
                        retry.clone(),
                        observer.clone(),
                    )),
                    extraction_cache: Arc::new(SqliteExtractionCacheStore::new(
                        sessions.clone(),
                        retry.clone(),
                        observer.clone(),
                    )),
                    doc_status: Arc::new(SqliteDocStatusStore::new(
                        sessions.clone(),
                        batch,
                        retry.clone(),
                        observer,
                    )),
                    sqlite: Some(sessions),
                    postgres: None,
                }
            }
            BackendKind::Postgres => {
                let pg_config = config.postgres.as_ref().ok_or_else(|| {
                    StorageError::InvalidConfiguration {
                        message: "postgresql backend requires a data-source URL".to_string(),
                    }
                })?;
                let sessions = Arc::new(PgSessions::open(pg_config).await?);
                let applied = migrate::migrate_postgres(sessions.pool(), dimension).await?;
                info!(backend = "postgresql", applied, "storage ready");
                Self {
                    backend: BackendKind::Postgres,
                    projects: Arc::new(PgProjectStore::new(
                        sessions.clone(),
                        retry.clone(),
                        observer.clone(),
                    )),
                    vectors: Arc::new(PgVectorStore::new(
                        sessions.clone(),
                        dimension,
                        batch,
                        retry.clone(),
                        observer.clone(),
                    )),
                    graph: Arc::new(PgGraphStore::new(
                        sessions.clone(),
                        retry.clone(),
                        observer.clone(),
                    )),
                    kv: Arc::new(PgKvStore::new(
                        sessions.clone(),
                        batch,
                        retry.clone(),
                        observer.clone(),
                    )),
                    extraction_cache: Arc::new(PgExtractionCacheStore::new(
                        sessions.clone(),
                        retry.clone(),
                        observer.clone(),
                    )),
                    doc_status: Arc::new(PgDocStatusStore::new(
                        sessions.clone(),
                        batch,
                        retry.clone(),
                        observer,
                    )),
                    sqlite: None,
                    postgres: Some(sessions),
                }
            }
        };

        facade.vectors.initialize().await?;
        Ok(facade)
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn projects(&self) -> Arc<dyn ProjectStore> {
        self.projects.clone()
    }

    pub fn vectors(&self) -> Arc<dyn VectorStore> {
        self.vectors.clone()
    }

    pub fn graph(&self) -> Arc<dyn GraphStore> {
        self.graph.clone()
    }

    pub fn kv(&self) -> Arc<dyn KvStore> {
        self.kv.clone()
    }

    pub fn extraction_cache(&self) -> Arc<dyn ExtractionCacheStore> {
        self.extraction_cache.clone()
    }

    pub fn doc_status(&self) -> Arc<dyn DocStatusStore> {
        self.doc_status.clone()
    }

    /// The export/import service. Only the embedded backend supports
    /// portable files.
    pub fn portability(&self) -> Result<PortabilityService> {
        match &self.sqlite {
            Some(sessions) => Ok(PortabilityService::new(sessions.clone())),
            None => Err(StorageError::InvalidConfiguration {
                message: "project export/import requires the sqlite backend".to_string(),
            }),
        }
    }

    /// Copy one project into a standalone database file at `path`.
    pub async fn export_project(
        &self,
        project_id: &str,
        path: impl AsRef<Path>,
    ) -> Result<ExportSummary> {
        self.portability()?.export_project(project_id, path).await
    }

    /// Merge an exported file into `new_project_id`.
    pub async fn import_project(
        &self,
        path: impl AsRef<Path>,
        new_project_id: &str,
    ) -> Result<ImportSummary> {
        self.portability()?.import_project(path, new_project_id).await
    }

    /// Shut the backing pools down, draining in-flight sessions.
    pub async fn close(&self) {
        if let Some(sessions) = &self.sqlite {
            sessions.close().await;
        }
        if let Some(sessions) = &self.postgres {
            sessions.close().await;
        }
    }
}
