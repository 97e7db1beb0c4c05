//! Vector sub-store contract: fixed-dimension embeddings with metadata and
//! cosine-similarity top-k.

use async_trait::async_trait;

use crate::errors::Result;
use crate::records::{VectorEntry, VectorKind};

/// Restricts a similarity query. `project_id` is mandatory; reads are always
/// project-scoped even when an explicit id set is provided.
#[derive(Debug, Clone)]
pub struct VectorFilter {
    pub project_id: String,
    pub kind: Option<VectorKind>,
    pub ids: Option<Vec<String>>,
}

impl VectorFilter {
    pub fn project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            kind: None,
            ids: None,
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: VectorKind) -> Self {
        self.kind = Some(kind);
        self
    }

    #[must_use]
    pub fn with_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }
}

/// One query hit: the stored entry and its cosine similarity to the probe.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub entry: VectorEntry,
    pub score: f32,
}

/// Storage for fixed-dimension embeddings.
///
/// # Errors
///
/// - `DimensionMismatch` when a written vector's length differs from the
///   configured dimension.
/// - `InvalidArgument` when the project id is absent or malformed.
/// - `ConstraintViolation` when `(document_id, chunk_index)` collides for
///   chunk rows.
///
/// Zero-norm vectors are accepted on write but their ordering under `query`
/// is undefined; a zero-norm probe scores every row 0.0.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Idempotent readiness check for the configured dimension.
    async fn initialize(&self) -> Result<()>;

    /// Insert or fully replace the row with the same id.
    async fn upsert(&self, entry: VectorEntry) -> Result<()>;

    /// Upsert many entries, applied atomically per chunk of the configured
    /// batch size. A permanent failure in a later chunk leaves earlier
    /// chunks committed.
    async fn upsert_batch(&self, entries: Vec<VectorEntry>) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<VectorEntry>>;

    /// Top-`k` entries by cosine similarity, descending. Ties break by
    /// insertion order.
    async fn query(&self, vector: &[f32], k: usize, filter: &VectorFilter)
    -> Result<Vec<VectorMatch>>;

    /// Delete one row; deleting a missing id is not an error. Returns the
    /// number of rows removed.
    async fn delete(&self, id: &str) -> Result<u64>;

    async fn delete_batch(&self, ids: &[String]) -> Result<u64>;

    /// Remove only entity-kind rows whose content matches one of the given
    /// (normalized) entity names.
    async fn delete_entity_embeddings(
        &self,
        project_id: &str,
        entity_names: &[String],
    ) -> Result<u64>;

    /// Chunk-row ids for a document, scoped to the project, in chunk order.
    async fn chunk_ids_by_document(
        &self,
        project_id: &str,
        document_id: &str,
    ) -> Result<Vec<String>>;

    async fn has_vectors(&self, document_id: &str) -> Result<bool>;

    /// Total rows across all projects. Diagnostics only.
    async fn size(&self) -> Result<u64>;
}
