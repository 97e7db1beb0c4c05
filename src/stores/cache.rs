//! Extraction-cache sub-store contract: hash-keyed memoization of LLM
//! extraction output.

use async_trait::async_trait;

use crate::errors::Result;
use crate::records::{CacheType, ExtractionCache};

/// Memoized LLM extraction results, keyed by
/// `(project_id, cache_type, content_hash)`.
#[async_trait]
pub trait ExtractionCacheStore: Send + Sync {
    /// Insert or replace the entry for the key; replacement overwrites
    /// `result` and `tokens_used` and refreshes `updated_at`.
    async fn store(
        &self,
        project_id: &str,
        cache_type: CacheType,
        chunk_id: Option<&str>,
        content_hash: &str,
        result: &str,
        tokens_used: i64,
    ) -> Result<()>;

    async fn get(
        &self,
        project_id: &str,
        cache_type: CacheType,
        content_hash: &str,
    ) -> Result<Option<ExtractionCache>>;

    /// Every cache entry (across cache types) tied to a chunk.
    async fn get_by_chunk_id(
        &self,
        project_id: &str,
        chunk_id: &str,
    ) -> Result<Vec<ExtractionCache>>;

    /// Remove a project's entries; returns how many were deleted.
    async fn delete_by_project(&self, project_id: &str) -> Result<u64>;
}
