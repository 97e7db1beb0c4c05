//! Embedded-engine project registry.
//!
//! `delete_project` is the cascade root: foreign keys take documents and
//! vectors down with the project row, and the graph, cache, status, and
//! prefix-matched KV rows are removed in the same write transaction.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use tracing::instrument;
use uuid::Uuid;

use crate::dialect::{Dialect, parse_rfc3339};
use crate::errors::{Result, StorageError, from_sqlx};
use crate::ident::{kv_project_pattern, parse_project_id};
use crate::records::{DocStatus, Document, Project};
use crate::retry::{RetryObserver, RetryPolicy, with_retry};
use crate::sessions::SqliteSessions;
use crate::stores::projects::ProjectStore;

const PROJECT_COLUMNS: &str = "id, name, created_at, updated_at";
const DOCUMENT_COLUMNS: &str =
    "id, project_id, type, status, file_name, content, metadata, created_at, updated_at";

pub struct SqliteProjectStore {
    sessions: Arc<SqliteSessions>,
    retry: RetryPolicy,
    observer: Arc<dyn RetryObserver>,
}

impl SqliteProjectStore {
    pub fn new(
        sessions: Arc<SqliteSessions>,
        retry: RetryPolicy,
        observer: Arc<dyn RetryObserver>,
    ) -> Self {
        Self {
            sessions,
            retry,
            observer,
        }
    }
}

pub(crate) fn project_from_row(row: &SqliteRow) -> Result<Project> {
    let id: String = row.try_get("id").map_err(|e| from_sqlx("project row decode", e))?;
    Ok(Project {
        id: Uuid::parse_str(&id).map_err(|_| StorageError::backend(
            "project row decode",
            format!("stored project id {id:?} is not a UUID"),
        ))?,
        name: row.try_get("name").map_err(|e| from_sqlx("project row decode", e))?,
        created_at: parse_rfc3339(
            &row.try_get::<String, _>("created_at")
                .map_err(|e| from_sqlx("project row decode", e))?,
        ),
        updated_at: parse_rfc3339(
            &row.try_get::<String, _>("updated_at")
                .map_err(|e| from_sqlx("project row decode", e))?,
        ),
    })
}

pub(crate) fn document_from_row(row: &SqliteRow) -> Result<Document> {
    let id: String = row.try_get("id").map_err(|e| from_sqlx("document row decode", e))?;
    let status: String = row
        .try_get("status")
        .map_err(|e| from_sqlx("document row decode", e))?;
    let metadata: Option<String> = row
        .try_get("metadata")
        .map_err(|e| from_sqlx("document row decode", e))?;
    Ok(Document {
        id: Uuid::parse_str(&id).map_err(|_| StorageError::backend(
            "document row decode",
            format!("stored document id {id:?} is not a UUID"),
        ))?,
        project_id: row
            .try_get("project_id")
            .map_err(|e| from_sqlx("document row decode", e))?,
        doc_type: row
            .try_get("type")
            .map_err(|e| from_sqlx("document row decode", e))?,
        status: DocStatus::parse(&status)?,
        file_name: row
            .try_get("file_name")
            .map_err(|e| from_sqlx("document row decode", e))?,
        content: row
            .try_get("content")
            .map_err(|e| from_sqlx("document row decode", e))?,
        metadata: metadata.and_then(|raw| serde_json::from_str(&raw).ok()),
        created_at: parse_rfc3339(
            &row.try_get::<String, _>("created_at")
                .map_err(|e| from_sqlx("document row decode", e))?,
        ),
        updated_at: parse_rfc3339(
            &row.try_get::<String, _>("updated_at")
                .map_err(|e| from_sqlx("document row decode", e))?,
        ),
    })
}

pub(crate) async fn upsert_document_on(
    conn: &mut SqliteConnection,
    document: &Document,
) -> Result<()> {
    let metadata = document
        .metadata
        .as_ref()
        .map(|value| value.to_string());
    sqlx::query(
        r#"
        INSERT INTO documents
            (id, project_id, type, status, file_name, content, metadata, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT (id) DO UPDATE SET
            project_id = excluded.project_id,
            type = excluded.type,
            status = excluded.status,
            file_name = excluded.file_name,
            content = excluded.content,
            metadata = excluded.metadata,
            updated_at = excluded.updated_at"#,
    )
    .bind(document.id.to_string())
    .bind(&document.project_id)
    .bind(&document.doc_type)
    .bind(document.status.as_str())
    .bind(&document.file_name)
    .bind(&document.content)
    .bind(metadata)
    .bind(document.created_at.to_rfc3339())
    .bind(Utc::now().to_rfc3339())
    .execute(conn)
    .await
    .map_err(|e| from_sqlx("projects.upsert_document", e))?;
    Ok(())
}

#[async_trait]
impl ProjectStore for SqliteProjectStore {
    #[instrument(skip(self), err)]
    async fn create_project(&self, name: &str) -> Result<Project> {
        if name.trim().is_empty() {
            return Err(StorageError::invalid_argument("project name must not be empty"));
        }
        let project = Project::new(name);
        with_retry(&self.retry, &*self.observer, "projects.create", || async {
            let mut conn = self.sessions.acquire_write("projects.create").await?;
            sqlx::query(
                "INSERT INTO projects (id, name, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(project.id.to_string())
            .bind(&project.name)
            .bind(project.created_at.to_rfc3339())
            .bind(project.updated_at.to_rfc3339())
            .execute(&mut *conn)
            .await
            .map_err(|e| from_sqlx("projects.create", e))?;
            Ok(project.clone())
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        let project = parse_project_id(project_id)?.to_string();
        with_retry(&self.retry, &*self.observer, "projects.get", || async {
            let mut conn = self.sessions.acquire_read("projects.get").await?;
            sqlx::query(&format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"))
                .bind(&project)
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| from_sqlx("projects.get", e))?
                .map(|row| project_from_row(&row))
                .transpose()
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn list_projects(&self) -> Result<Vec<Project>> {
        with_retry(&self.retry, &*self.observer, "projects.list", || async {
            let mut conn = self.sessions.acquire_read("projects.list").await?;
            let rows = sqlx::query(&format!(
                "SELECT {PROJECT_COLUMNS} FROM projects ORDER BY created_at, id"
            ))
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| from_sqlx("projects.list", e))?;
            rows.iter().map(project_from_row).collect()
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn delete_project(&self, project_id: &str) -> Result<()> {
        let project = parse_project_id(project_id)?.to_string();
        let kv_pattern = kv_project_pattern(&project);
        with_retry(&self.retry, &*self.observer, "projects.delete", || async {
            let mut tx = self.sessions.begin_write("projects.delete").await?;

            let doc_ids: Vec<String> =
                sqlx::query_scalar("SELECT id FROM documents WHERE project_id = ?1")
                    .bind(&project)
                    .fetch_all(&mut *tx)
                    .await
                    .map_err(|e| from_sqlx("projects.delete", e))?;
            for chunk in doc_ids.chunks(500) {
                let in_list = Dialect::Sqlite.placeholders(1, chunk.len());
                let sql = format!("DELETE FROM document_status WHERE doc_id IN ({in_list})");
                let mut query = sqlx::query(&sql);
                for doc_id in chunk {
                    query = query.bind(doc_id);
                }
                query
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| from_sqlx("projects.delete", e))?;
            }

            for sql in [
                "DELETE FROM graph_relations WHERE project_id = ?1",
                "DELETE FROM graph_entities WHERE project_id = ?1",
                "DELETE FROM graph_namespaces WHERE project_id = ?1",
                "DELETE FROM extraction_cache WHERE project_id = ?1",
            ] {
                sqlx::query(sql)
                    .bind(&project)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| from_sqlx("projects.delete", e))?;
            }

            sqlx::query("DELETE FROM kv_store WHERE key LIKE ?1")
                .bind(&kv_pattern)
                .execute(&mut *tx)
                .await
                .map_err(|e| from_sqlx("projects.delete", e))?;

            // FK cascade removes documents and vectors.
            sqlx::query("DELETE FROM projects WHERE id = ?1")
                .bind(&project)
                .execute(&mut *tx)
                .await
                .map_err(|e| from_sqlx("projects.delete", e))?;

            tx.commit()
                .await
                .map_err(|e| from_sqlx("projects.delete", e))
        })
        .await
    }

    #[instrument(skip(self, document), err)]
    async fn upsert_document(&self, document: Document) -> Result<()> {
        let mut document = document;
        document.project_id = parse_project_id(&document.project_id)?.to_string();
        with_retry(&self.retry, &*self.observer, "projects.upsert_document", || async {
            let mut conn = self.sessions.acquire_write("projects.upsert_document").await?;
            upsert_document_on(&mut conn, &document).await
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn get_document(&self, document_id: &str) -> Result<Option<Document>> {
        with_retry(&self.retry, &*self.observer, "projects.get_document", || async {
            let mut conn = self.sessions.acquire_read("projects.get_document").await?;
            sqlx::query(&format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"))
                .bind(document_id)
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| from_sqlx("projects.get_document", e))?
                .map(|row| document_from_row(&row))
                .transpose()
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn delete_document(&self, document_id: &str) -> Result<()> {
        with_retry(&self.retry, &*self.observer, "projects.delete_document", || async {
            let mut tx = self.sessions.begin_write("projects.delete_document").await?;
            sqlx::query("DELETE FROM document_status WHERE doc_id = ?1")
                .bind(document_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| from_sqlx("projects.delete_document", e))?;
            sqlx::query("DELETE FROM documents WHERE id = ?1")
                .bind(document_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| from_sqlx("projects.delete_document", e))?;
            tx.commit()
                .await
                .map_err(|e| from_sqlx("projects.delete_document", e))
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn documents_for_project(&self, project_id: &str) -> Result<Vec<Document>> {
        let project = parse_project_id(project_id)?.to_string();
        with_retry(&self.retry, &*self.observer, "projects.documents", || async {
            let mut conn = self.sessions.acquire_read("projects.documents").await?;
            let rows = sqlx::query(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents
                 WHERE project_id = ?1 ORDER BY created_at, id"
            ))
            .bind(&project)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| from_sqlx("projects.documents", e))?;
            rows.iter().map(document_from_row).collect()
        })
        .await
    }
}
