//! Project registry: the tenant boundary every other row hangs off.

use async_trait::async_trait;

use crate::errors::Result;
use crate::records::{Document, Project};

/// Projects and their documents.
///
/// `delete_project` is the cascade root: it removes every row tagged with
/// the project across all sub-stores (documents and vectors through foreign
/// keys, graph/cache/status/prefix-matched KV rows explicitly).
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn create_project(&self, name: &str) -> Result<Project>;

    async fn get_project(&self, project_id: &str) -> Result<Option<Project>>;

    async fn list_projects(&self) -> Result<Vec<Project>>;

    /// Remove the project and everything it owns. Deleting a missing
    /// project is not an error.
    async fn delete_project(&self, project_id: &str) -> Result<()>;

    /// Insert or replace a document row. The owning project must exist.
    async fn upsert_document(&self, document: Document) -> Result<()>;

    async fn get_document(&self, document_id: &str) -> Result<Option<Document>>;

    /// Delete a document; its chunk vectors go with it.
    async fn delete_document(&self, document_id: &str) -> Result<()>;

    async fn documents_for_project(&self, project_id: &str) -> Result<Vec<Document>>;
}
