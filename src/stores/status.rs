//! Document-status sub-store contract.

use async_trait::async_trait;

use crate::errors::Result;
use crate::records::{DocumentStatus, ProcessingStatus};

/// Per-document processing state records, keyed by `doc_id`.
///
/// The state machine itself lives on [`DocumentStatus`]'s pure constructors
/// (`pending` → `as_processing` → `as_completed`/`as_failed`); this store
/// only persists the records.
#[async_trait]
pub trait DocStatusStore: Send + Sync {
    /// Insert or replace by `doc_id`.
    async fn set_status(&self, record: DocumentStatus) -> Result<()>;

    async fn get_status(&self, doc_id: &str) -> Result<Option<DocumentStatus>>;

    async fn set_statuses(&self, records: Vec<DocumentStatus>) -> Result<()>;

    async fn get_statuses(&self, doc_ids: &[String]) -> Result<Vec<DocumentStatus>>;

    async fn delete_statuses(&self, doc_ids: &[String]) -> Result<u64>;

    async fn statuses_by_processing_status(
        &self,
        status: ProcessingStatus,
    ) -> Result<Vec<DocumentStatus>>;

    async fn all_statuses(&self) -> Result<Vec<DocumentStatus>>;

    async fn clear(&self) -> Result<()>;

    async fn size(&self) -> Result<u64>;
}
