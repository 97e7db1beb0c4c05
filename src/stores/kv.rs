//! Generic string→string store with pattern enumeration.

use async_trait::async_trait;

use crate::errors::Result;

/// Opaque key/value map.
///
/// Project isolation is by key-prefix convention, not schema: callers prefix
/// keys with `project:<id>:` (see [`crate::ident::kv_project_prefix`]). The
/// store itself treats keys as opaque.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Insert or replace.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Delete one key; missing keys are not an error. Returns rows removed.
    async fn delete(&self, key: &str) -> Result<u64>;

    async fn set_batch(&self, pairs: Vec<(String, String)>) -> Result<()>;

    async fn get_batch(&self, keys: &[String]) -> Result<Vec<Option<String>>>;

    async fn delete_batch(&self, keys: &[String]) -> Result<u64>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Enumerate keys, optionally restricted by a SQL-LIKE pattern where `%`
    /// is the wildcard. `None` enumerates everything.
    async fn keys(&self, pattern: Option<&str>) -> Result<Vec<String>>;

    async fn clear(&self) -> Result<()>;

    async fn size(&self) -> Result<u64>;
}
