//! Server-engine project registry.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::types::Json;
use tracing::instrument;
use uuid::Uuid;

use crate::errors::{Result, StorageError, from_sqlx};
use crate::ident::{kv_project_pattern, parse_project_id};
use crate::records::{DocStatus, Document, Project};
use crate::retry::{RetryObserver, RetryPolicy, with_retry};
use crate::sessions::PgSessions;
use crate::stores::projects::ProjectStore;

const PROJECT_COLUMNS: &str = "id, name, created_at, updated_at";
const DOCUMENT_COLUMNS: &str =
    "id, project_id, type, status, file_name, content, metadata, created_at, updated_at";

pub struct PgProjectStore {
    sessions: Arc<PgSessions>,
    retry: RetryPolicy,
    observer: Arc<dyn RetryObserver>,
}

impl PgProjectStore {
    pub fn new(
        sessions: Arc<PgSessions>,
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

fn project_from_row(row: &PgRow) -> Result<Project> {
    Ok(Project {
        id: row.try_get("id").map_err(|e| from_sqlx("project row decode", e))?,
        name: row.try_get("name").map_err(|e| from_sqlx("project row decode", e))?,
        created_at: row
            .try_get::<DateTime<Utc>, _>("created_at")
            .map_err(|e| from_sqlx("project row decode", e))?,
        updated_at: row
            .try_get::<DateTime<Utc>, _>("updated_at")
            .map_err(|e| from_sqlx("project row decode", e))?,
    })
}

fn document_from_row(row: &PgRow) -> Result<Document> {
    let status: String = row
        .try_get("status")
        .map_err(|e| from_sqlx("document row decode", e))?;
    let metadata: Option<Json<serde_json::Value>> = row
        .try_get("metadata")
        .map_err(|e| from_sqlx("document row decode", e))?;
    Ok(Document {
        id: row.try_get("id").map_err(|e| from_sqlx("document row decode", e))?,
        project_id: row
            .try_get::<Uuid, _>("project_id")
            .map_err(|e| from_sqlx("document row decode", e))?
            .to_string(),
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
        metadata: metadata.map(|json| json.0),
        created_at: row
            .try_get::<DateTime<Utc>, _>("created_at")
            .map_err(|e| from_sqlx("document row decode", e))?,
        updated_at: row
            .try_get::<DateTime<Utc>, _>("updated_at")
            .map_err(|e| from_sqlx("document row decode", e))?,
    })
}

async fn upsert_document_on(
    conn: &mut PgConnection,
    project: Uuid,
    document: &Document,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO documents
            (id, project_id, type, status, file_name, content, metadata, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (id) DO UPDATE SET
            project_id = EXCLUDED.project_id,
            type = EXCLUDED.type,
            status = EXCLUDED.status,
            file_name = EXCLUDED.file_name,
            content = EXCLUDED.content,
            metadata = EXCLUDED.metadata,
            updated_at = EXCLUDED.updated_at"#,
    )
    .bind(document.id)
    .bind(project)
    .bind(&document.doc_type)
    .bind(document.status.as_str())
    .bind(&document.file_name)
    .bind(&document.content)
    .bind(document.metadata.clone().map(Json))
    .bind(document.created_at)
    .bind(Utc::now())
    .execute(conn)
    .await
    .map_err(|e| from_sqlx("projects.upsert_document", e))?;
    Ok(())
}

#[async_trait]
impl ProjectStore for PgProjectStore {
    #[instrument(skip(self), err)]
    async fn create_project(&self, name: &str) -> Result<Project> {
        if name.trim().is_empty() {
            return Err(StorageError::invalid_argument("project name must not be empty"));
        }
        let project = Project::new(name);
        with_retry(&self.retry, &*self.observer, "projects.create", || async {
            let mut conn = self.sessions.acquire("projects.create").await?;
            sqlx::query(
                "INSERT INTO projects (id, name, created_at, updated_at) VALUES ($1, $2, $3, $4)",
            )
            .bind(project.id)
            .bind(&project.name)
            .bind(project.created_at)
            .bind(project.updated_at)
            .execute(&mut *conn)
            .await
            .map_err(|e| from_sqlx("projects.create", e))?;
            Ok(project.clone())
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        let project = parse_project_id(project_id)?;
        with_retry(&self.retry, &*self.observer, "projects.get", || async {
            let mut conn = self.sessions.acquire("projects.get").await?;
            sqlx::query(&format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = $1"))
                .bind(project)
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
            let mut conn = self.sessions.acquire("projects.list").await?;
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
        let project = parse_project_id(project_id)?;
        let kv_pattern = kv_project_pattern(&project.to_string());
        with_retry(&self.retry, &*self.observer, "projects.delete", || async {
            let mut tx = self.sessions.begin("projects.delete").await?;

            sqlx::query(
                "DELETE FROM document_status WHERE doc_id IN (
                     SELECT id::text FROM documents WHERE project_id = $1
                 )",
            )
            .bind(project)
            .execute(&mut *tx)
            .await
            .map_err(|e| from_sqlx("projects.delete", e))?;

            for sql in [
                "DELETE FROM graph_relations WHERE project_id = $1",
                "DELETE FROM graph_entities WHERE project_id = $1",
                "DELETE FROM graph_namespaces WHERE project_id = $1",
                "DELETE FROM extraction_cache WHERE project_id = $1",
            ] {
                sqlx::query(sql)
                    .bind(project)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| from_sqlx("projects.delete", e))?;
            }

            sqlx::query("DELETE FROM kv_store WHERE key LIKE $1")
                .bind(&kv_pattern)
                .execute(&mut *tx)
                .await
                .map_err(|e| from_sqlx("projects.delete", e))?;

            // FK cascade removes documents and vectors.
            sqlx::query("DELETE FROM projects WHERE id = $1")
                .bind(project)
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
        let project = parse_project_id(&document.project_id)?;
        with_retry(&self.retry, &*self.observer, "projects.upsert_document", || async {
            let mut conn = self.sessions.acquire("projects.upsert_document").await?;
            upsert_document_on(&mut conn, project, &document).await
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn get_document(&self, document_id: &str) -> Result<Option<Document>> {
        let document = Uuid::parse_str(document_id).map_err(|_| {
            StorageError::InvalidArgument {
                message: format!("document id {document_id:?} is not a valid UUID"),
            }
        })?;
        with_retry(&self.retry, &*self.observer, "projects.get_document", || async {
            let mut conn = self.sessions.acquire("projects.get_document").await?;
            sqlx::query(&format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = $1"))
                .bind(document)
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
        let document = Uuid::parse_str(document_id).map_err(|_| {
            StorageError::InvalidArgument {
                message: format!("document id {document_id:?} is not a valid UUID"),
            }
        })?;
        with_retry(&self.retry, &*self.observer, "projects.delete_document", || async {
            let mut tx = self.sessions.begin("projects.delete_document").await?;
            sqlx::query("DELETE FROM document_status WHERE doc_id = $1")
                .bind(document.to_string())
                .execute(&mut *tx)
                .await
                .map_err(|e| from_sqlx("projects.delete_document", e))?;
            sqlx::query("DELETE FROM documents WHERE id = $1")
                .bind(document)
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
        let project = parse_project_id(project_id)?;
        with_retry(&self.retry, &*self.observer, "projects.documents", || async {
            let mut conn = self.sessions.acquire("projects.documents").await?;
            let rows = sqlx::query(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents
                 WHERE project_id = $1 ORDER BY created_at, id"
            ))
            .bind(project)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| from_sqlx("projects.documents", e))?;
            rows.iter().map(document_from_row).collect()
        })
        .await
    }
}
