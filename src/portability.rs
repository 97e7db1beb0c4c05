//! Project portability: export one project to a standalone embedded
//! database file, and merge such a file back under a new project id.
//!
//! The portable file is an ordinary SQLite database carrying the full
//! schema (freshly migrated) and the rows of exactly one project. Import
//! validates the 16-byte file-format magic before opening, then rewrites
//! every row's project id and remaps document/vector ids that would collide
//! in the target database. The whole import applies inside one write
//! transaction, so a failed import leaves the target untouched.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::SqliteConfig;
use crate::errors::{Result, StorageError, from_sqlx};
use crate::ident::{kv_project_pattern, kv_project_prefix, parse_project_id};
use crate::migrate;
use crate::records::{Entity, Relation};
use crate::sessions::SqliteSessions;
use crate::stores::graph_sqlite::{
    entity_from_row, relation_from_row, upsert_entity_in_tx, upsert_relation_in_tx,
};

/// First 16 bytes of every SQLite database file.
const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// Tables an exported file must carry to be importable.
const REQUIRED_TABLES: [&str; 10] = [
    "schema_version",
    "projects",
    "documents",
    "vectors",
    "graph_namespaces",
    "graph_entities",
    "graph_relations",
    "extraction_cache",
    "kv_store",
    "document_status",
];

/// Row counts copied out by an export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub documents: u64,
    pub vectors: u64,
    pub entities: u64,
    pub relations: u64,
    pub cache_entries: u64,
    pub kv_entries: u64,
    pub statuses: u64,
}

/// Row counts merged in by an import.
pub type ImportSummary = ExportSummary;

/// Export/import over the embedded engine.
#[derive(Debug)]
pub struct PortabilityService {
    sessions: Arc<SqliteSessions>,
}

impl PortabilityService {
    pub fn new(sessions: Arc<SqliteSessions>) -> Self {
        Self { sessions }
    }

    /// Create a standalone database at `path` holding one project's rows.
    ///
    /// Fails with `InvalidArgument` when the project does not exist or the
    /// destination file is already present.
    #[instrument(skip(self, path), err)]
    pub async fn export_project(
        &self,
        project_id: &str,
        path: impl AsRef<Path>,
    ) -> Result<ExportSummary> {
        let project = parse_project_id(project_id)?.to_string();
        let path = path.as_ref();
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(StorageError::invalid_argument(format!(
                "export destination {} already exists",
                path.display()
            )));
        }

        let mut source = self.sessions.acquire_read("portability.export").await?;
        let exists = sqlx::query("SELECT 1 FROM projects WHERE id = ?1")
            .bind(&project)
            .fetch_optional(&mut *source)
            .await
            .map_err(|e| from_sqlx("portability.export", e))?
            .is_some();
        if !exists {
            return Err(StorageError::invalid_argument(format!(
                "project {project} does not exist"
            )));
        }

        // Journal mode DELETE keeps the export a single self-contained file
        // (WAL would leave -wal/-shm sidecars next to it).
        let dest_config = SqliteConfig {
            path: path.to_string_lossy().into_owned(),
            read_pool_size: 1,
            wal_mode: false,
            ..SqliteConfig::default()
        };
        let dest = SqliteSessions::open(&dest_config).await?;
        migrate::migrate_sqlite(dest.write_pool()).await?;

        let summary = copy_project(&mut source, dest.write_pool(), &project).await?;
        dest.close().await;
        info!(
            project = %project,
            path = %path.display(),
            vectors = summary.vectors,
            entities = summary.entities,
            relations = summary.relations,
            "exported project"
        );
        Ok(summary)
    }

    /// Merge an exported file into `new_project_id`, rewriting project ids
    /// and remapping colliding document/vector ids to fresh UUIDs.
    #[instrument(skip(self, path), err)]
    pub async fn import_project(
        &self,
        path: impl AsRef<Path>,
        new_project_id: &str,
    ) -> Result<ImportSummary> {
        let new_project = parse_project_id(new_project_id)?.to_string();
        let path = path.as_ref();

        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(StorageError::invalid_argument(format!(
                "import file {} does not exist",
                path.display()
            )));
        }
        validate_magic(path).await?;

        let options = SqliteConnectOptions::new().filename(path).read_only(true);
        let source = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| from_sqlx("portability.import", e))?;

        let result = self.import_from(&source, &new_project).await;
        source.close().await;
        let summary = result?;
        info!(
            project = %new_project,
            path = %path.display(),
            vectors = summary.vectors,
            entities = summary.entities,
            relations = summary.relations,
            "imported project"
        );
        Ok(summary)
    }

    async fn import_from(&self, source: &SqlitePool, new_project: &str) -> Result<ImportSummary> {
        validate_schema(source).await?;

        let source_project: Option<(String, String)> =
            sqlx::query("SELECT id, name FROM projects LIMIT 1")
                .fetch_optional(source)
                .await
                .map_err(|e| from_sqlx("portability.import", e))?
                .map(|row| -> Result<(String, String)> {
                    Ok((
                        row.try_get("id").map_err(|e| from_sqlx("portability.import", e))?,
                        row.try_get("name").map_err(|e| from_sqlx("portability.import", e))?,
                    ))
                })
                .transpose()?;
        let (old_project, project_name) = source_project.ok_or_else(|| StorageError::FileFormat {
            message: "exported file contains no project row".to_string(),
        })?;

        let mut summary = ImportSummary::default();
        let mut tx = self.sessions.begin_write("portability.import").await?;

        sqlx::query(
            "INSERT INTO projects (id, name, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(new_project)
        .bind(&project_name)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| from_sqlx("portability.import", e))?;

        // Documents first: later tables reference their (possibly remapped) ids.
        let mut doc_map: Vec<(String, String)> = Vec::new();
        let doc_rows = sqlx::query(
            "SELECT id, type, status, file_name, content, metadata, created_at, updated_at
             FROM documents WHERE project_id = ?1",
        )
        .bind(&old_project)
        .fetch_all(source)
        .await
        .map_err(|e| from_sqlx("portability.import", e))?;
        for row in &doc_rows {
            let old_id: String = row.try_get("id").map_err(|e| from_sqlx("portability.import", e))?;
            let taken = sqlx::query("SELECT 1 FROM documents WHERE id = ?1")
                .bind(&old_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| from_sqlx("portability.import", e))?
                .is_some();
            let new_id = if taken {
                Uuid::new_v4().to_string()
            } else {
                old_id.clone()
            };
            sqlx::query(
                "INSERT INTO documents
                     (id, project_id, type, status, file_name, content, metadata,
                      created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )
            .bind(&new_id)
            .bind(new_project)
            .bind(row.try_get::<String, _>("type").map_err(|e| from_sqlx("portability.import", e))?)
            .bind(row.try_get::<String, _>("status").map_err(|e| from_sqlx("portability.import", e))?)
            .bind(row.try_get::<Option<String>, _>("file_name").map_err(|e| from_sqlx("portability.import", e))?)
            .bind(row.try_get::<Option<String>, _>("content").map_err(|e| from_sqlx("portability.import", e))?)
            .bind(row.try_get::<Option<String>, _>("metadata").map_err(|e| from_sqlx("portability.import", e))?)
            .bind(row.try_get::<String, _>("created_at").map_err(|e| from_sqlx("portability.import", e))?)
            .bind(row.try_get::<String, _>("updated_at").map_err(|e| from_sqlx("portability.import", e))?)
            .execute(&mut *tx)
            .await
            .map_err(|e| from_sqlx("portability.import", e))?;
            doc_map.push((old_id, new_id));
            summary.documents += 1;
        }
        let remap_doc = |id: Option<String>| -> Option<String> {
            id.map(|old| {
                doc_map
                    .iter()
                    .find(|(o, _)| *o == old)
                    .map(|(_, n)| n.clone())
                    .unwrap_or(old)
            })
        };

        let vector_rows = sqlx::query(
            "SELECT id, document_id, chunk_index, type, content, embedding, created_at
             FROM vectors WHERE project_id = ?1",
        )
        .bind(&old_project)
        .fetch_all(source)
        .await
        .map_err(|e| from_sqlx("portability.import", e))?;
        for row in &vector_rows {
            let old_id: String = row.try_get("id").map_err(|e| from_sqlx("portability.import", e))?;
            let taken = sqlx::query("SELECT 1 FROM vectors WHERE id = ?1")
                .bind(&old_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| from_sqlx("portability.import", e))?
                .is_some();
            let new_id = if taken {
                Uuid::new_v4().to_string()
            } else {
                old_id
            };
            let document_id = remap_doc(
                row.try_get::<Option<String>, _>("document_id")
                    .map_err(|e| from_sqlx("portability.import", e))?,
            );
            sqlx::query(
                "INSERT INTO vectors
                     (id, project_id, document_id, chunk_index, type, content, embedding,
                      created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .bind(&new_id)
            .bind(new_project)
            .bind(document_id)
            .bind(row.try_get::<Option<i64>, _>("chunk_index").map_err(|e| from_sqlx("portability.import", e))?)
            .bind(row.try_get::<String, _>("type").map_err(|e| from_sqlx("portability.import", e))?)
            .bind(row.try_get::<String, _>("content").map_err(|e| from_sqlx("portability.import", e))?)
            .bind(row.try_get::<Vec<u8>, _>("embedding").map_err(|e| from_sqlx("portability.import", e))?)
            .bind(row.try_get::<String, _>("created_at").map_err(|e| from_sqlx("portability.import", e))?)
            .execute(&mut *tx)
            .await
            .map_err(|e| from_sqlx("portability.import", e))?;
            summary.vectors += 1;
        }

        let has_namespace = sqlx::query("SELECT 1 FROM graph_namespaces WHERE project_id = ?1")
            .bind(&old_project)
            .fetch_optional(source)
            .await
            .map_err(|e| from_sqlx("portability.import", e))?
            .is_some();
        if has_namespace {
            sqlx::query(
                "INSERT INTO graph_namespaces (project_id, created_at) VALUES (?1, ?2)
                 ON CONFLICT (project_id) DO NOTHING",
            )
            .bind(new_project)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| from_sqlx("portability.import", e))?;
        }

        let entity_rows = sqlx::query(
            "SELECT name, type, description, source_chunk_ids, created_at, updated_at
             FROM graph_entities WHERE project_id = ?1",
        )
        .bind(&old_project)
        .fetch_all(source)
        .await
        .map_err(|e| from_sqlx("portability.import", e))?;
        for row in &entity_rows {
            let entity: Entity = entity_from_row(row)?;
            let name = entity.name.clone();
            upsert_entity_in_tx(&mut tx, new_project, &name, &entity).await?;
            summary.entities += 1;
        }

        let relation_rows = sqlx::query(
            "SELECT src, tgt, description, keywords, weight, source_chunk_ids,
                    created_at, updated_at
             FROM graph_relations WHERE project_id = ?1",
        )
        .bind(&old_project)
        .fetch_all(source)
        .await
        .map_err(|e| from_sqlx("portability.import", e))?;
        for row in &relation_rows {
            let relation: Relation = relation_from_row(row)?;
            let (src, tgt) = (relation.src.clone(), relation.tgt.clone());
            upsert_relation_in_tx(&mut tx, new_project, &src, &tgt, &relation).await?;
            summary.relations += 1;
        }

        let cache_rows = sqlx::query(
            "SELECT cache_type, chunk_id, content_hash, result, tokens_used,
                    created_at, updated_at
             FROM extraction_cache WHERE project_id = ?1",
        )
        .bind(&old_project)
        .fetch_all(source)
        .await
        .map_err(|e| from_sqlx("portability.import", e))?;
        for row in &cache_rows {
            sqlx::query(
                "INSERT INTO extraction_cache
                     (id, project_id, cache_type, chunk_id, content_hash, result, tokens_used,
                      created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT (project_id, cache_type, content_hash) DO UPDATE SET
                     result = excluded.result,
                     tokens_used = excluded.tokens_used,
                     chunk_id = excluded.chunk_id,
                     updated_at = excluded.updated_at",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(new_project)
            .bind(row.try_get::<String, _>("cache_type").map_err(|e| from_sqlx("portability.import", e))?)
            .bind(row.try_get::<Option<String>, _>("chunk_id").map_err(|e| from_sqlx("portability.import", e))?)
            .bind(row.try_get::<String, _>("content_hash").map_err(|e| from_sqlx("portability.import", e))?)
            .bind(row.try_get::<String, _>("result").map_err(|e| from_sqlx("portability.import", e))?)
            .bind(row.try_get::<i64, _>("tokens_used").map_err(|e| from_sqlx("portability.import", e))?)
            .bind(row.try_get::<String, _>("created_at").map_err(|e| from_sqlx("portability.import", e))?)
            .bind(row.try_get::<String, _>("updated_at").map_err(|e| from_sqlx("portability.import", e))?)
            .execute(&mut *tx)
            .await
            .map_err(|e| from_sqlx("portability.import", e))?;
            summary.cache_entries += 1;
        }

        let old_prefix = kv_project_prefix(&old_project);
        let new_prefix = kv_project_prefix(new_project);
        let kv_rows = sqlx::query("SELECT key, value, updated_at FROM kv_store WHERE key LIKE ?1")
            .bind(kv_project_pattern(&old_project))
            .fetch_all(source)
            .await
            .map_err(|e| from_sqlx("portability.import", e))?;
        for row in &kv_rows {
            let old_key: String = row.try_get("key").map_err(|e| from_sqlx("portability.import", e))?;
            let new_key = format!("{new_prefix}{}", &old_key[old_prefix.len()..]);
            sqlx::query(
                "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (key) DO UPDATE SET value = excluded.value,
                                                 updated_at = excluded.updated_at",
            )
            .bind(&new_key)
            .bind(row.try_get::<String, _>("value").map_err(|e| from_sqlx("portability.import", e))?)
            .bind(row.try_get::<String, _>("updated_at").map_err(|e| from_sqlx("portability.import", e))?)
            .execute(&mut *tx)
            .await
            .map_err(|e| from_sqlx("portability.import", e))?;
            summary.kv_entries += 1;
        }

        let status_rows = sqlx::query(
            "SELECT s.doc_id, s.file_path, s.processing_status, s.chunk_count, s.entity_count,
                    s.relation_count, s.error_message, s.created_at, s.updated_at
             FROM document_status s
             JOIN documents d ON d.id = s.doc_id
             WHERE d.project_id = ?1",
        )
        .bind(&old_project)
        .fetch_all(source)
        .await
        .map_err(|e| from_sqlx("portability.import", e))?;
        for row in &status_rows {
            let old_doc: String =
                row.try_get("doc_id").map_err(|e| from_sqlx("portability.import", e))?;
            let new_doc = remap_doc(Some(old_doc)).unwrap_or_default();
            sqlx::query(
                "INSERT INTO document_status
                     (doc_id, file_path, processing_status, chunk_count, entity_count,
                      relation_count, error_message, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT (doc_id) DO UPDATE SET
                     file_path = excluded.file_path,
                     processing_status = excluded.processing_status,
                     chunk_count = excluded.chunk_count,
                     entity_count = excluded.entity_count,
                     relation_count = excluded.relation_count,
                     error_message = excluded.error_message,
                     updated_at = excluded.updated_at",
            )
            .bind(&new_doc)
            .bind(row.try_get::<String, _>("file_path").map_err(|e| from_sqlx("portability.import", e))?)
            .bind(row.try_get::<String, _>("processing_status").map_err(|e| from_sqlx("portability.import", e))?)
            .bind(row.try_get::<i64, _>("chunk_count").map_err(|e| from_sqlx("portability.import", e))?)
            .bind(row.try_get::<i64, _>("entity_count").map_err(|e| from_sqlx("portability.import", e))?)
            .bind(row.try_get::<i64, _>("relation_count").map_err(|e| from_sqlx("portability.import", e))?)
            .bind(row.try_get::<Option<String>, _>("error_message").map_err(|e| from_sqlx("portability.import", e))?)
            .bind(row.try_get::<String, _>("created_at").map_err(|e| from_sqlx("portability.import", e))?)
            .bind(row.try_get::<String, _>("updated_at").map_err(|e| from_sqlx("portability.import", e))?)
            .execute(&mut *tx)
            .await
            .map_err(|e| from_sqlx("portability.import", e))?;
            summary.statuses += 1;
        }

        tx.commit()
            .await
            .map_err(|e| from_sqlx("portability.import", e))?;
        Ok(summary)
    }
}

async fn validate_magic(path: &Path) -> Result<()> {
    use tokio::io::AsyncReadExt;

    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| StorageError::FileFormat {
            message: format!("cannot read import file: {e}"),
        })?;
    let mut header = [0u8; 16];
    file.read_exact(&mut header)
        .await
        .map_err(|_| StorageError::FileFormat {
            message: "import file is shorter than the SQLite header".to_string(),
        })?;
    if &header != SQLITE_MAGIC {
        return Err(StorageError::FileFormat {
            message: "import file is missing the SQLite format magic".to_string(),
        });
    }
    Ok(())
}

async fn validate_schema(source: &SqlitePool) -> Result<()> {
    for table in REQUIRED_TABLES {
        let present = sqlx::query(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        )
        .bind(table)
        .fetch_optional(source)
        .await
        .map_err(|e| from_sqlx("portability.import", e))?
        .is_some();
        if !present {
            return Err(StorageError::FileFormat {
                message: format!("import file is missing table {table:?}"),
            });
        }
    }
    Ok(())
}

/// Copy every row of one project from `source` into a freshly migrated
/// destination database.
async fn copy_project(
    source: &mut SqliteConnection,
    dest: &SqlitePool,
    project: &str,
) -> Result<ExportSummary> {
    let mut summary = ExportSummary::default();
    let mut tx = dest.begin().await.map_err(|e| from_sqlx("portability.export", e))?;

    let project_row = sqlx::query(
        "SELECT id, name, created_at, updated_at FROM projects WHERE id = ?1",
    )
    .bind(project)
    .fetch_one(&mut *source)
    .await
    .map_err(|e| from_sqlx("portability.export", e))?;
    sqlx::query("INSERT INTO projects (id, name, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)")
        .bind(project_row.try_get::<String, _>("id").map_err(|e| from_sqlx("portability.export", e))?)
        .bind(project_row.try_get::<String, _>("name").map_err(|e| from_sqlx("portability.export", e))?)
        .bind(project_row.try_get::<String, _>("created_at").map_err(|e| from_sqlx("portability.export", e))?)
        .bind(project_row.try_get::<String, _>("updated_at").map_err(|e| from_sqlx("portability.export", e))?)
        .execute(&mut *tx)
        .await
        .map_err(|e| from_sqlx("portability.export", e))?;

    let doc_rows = sqlx::query(
        "SELECT id, project_id, type, status, file_name, content, metadata, created_at, updated_at
         FROM documents WHERE project_id = ?1",
    )
    .bind(project)
    .fetch_all(&mut *source)
    .await
    .map_err(|e| from_sqlx("portability.export", e))?;
    for row in &doc_rows {
        copy_row(
            &mut tx,
            "INSERT INTO documents
                 (id, project_id, type, status, file_name, content, metadata,
                  created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            row,
            &[
                Col::Text("id"),
                Col::Text("project_id"),
                Col::Text("type"),
                Col::Text("status"),
                Col::OptText("file_name"),
                Col::OptText("content"),
                Col::OptText("metadata"),
                Col::Text("created_at"),
                Col::Text("updated_at"),
            ],
        )
        .await?;
        summary.documents += 1;
    }

    let vector_rows = sqlx::query(
        "SELECT id, project_id, document_id, chunk_index, type, content, embedding, created_at
         FROM vectors WHERE project_id = ?1",
    )
    .bind(project)
    .fetch_all(&mut *source)
    .await
    .map_err(|e| from_sqlx("portability.export", e))?;
    for row in &vector_rows {
        copy_row(
            &mut tx,
            "INSERT INTO vectors
                 (id, project_id, document_id, chunk_index, type, content, embedding, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            row,
            &[
                Col::Text("id"),
                Col::Text("project_id"),
                Col::OptText("document_id"),
                Col::OptInt("chunk_index"),
                Col::Text("type"),
                Col::Text("content"),
                Col::Blob("embedding"),
                Col::Text("created_at"),
            ],
        )
        .await?;
        summary.vectors += 1;
    }

    let namespace_rows = sqlx::query(
        "SELECT project_id, created_at FROM graph_namespaces WHERE project_id = ?1",
    )
    .bind(project)
    .fetch_all(&mut *source)
    .await
    .map_err(|e| from_sqlx("portability.export", e))?;
    for row in &namespace_rows {
        copy_row(
            &mut tx,
            "INSERT INTO graph_namespaces (project_id, created_at) VALUES (?1, ?2)",
            row,
            &[Col::Text("project_id"), Col::Text("created_at")],
        )
        .await?;
    }

    let entity_rows = sqlx::query(
        "SELECT project_id, name, type, description, source_chunk_ids, created_at, updated_at
         FROM graph_entities WHERE project_id = ?1",
    )
    .bind(project)
    .fetch_all(&mut *source)
    .await
    .map_err(|e| from_sqlx("portability.export", e))?;
    for row in &entity_rows {
        copy_row(
            &mut tx,
            "INSERT INTO graph_entities
                 (project_id, name, type, description, source_chunk_ids, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            row,
            &[
                Col::Text("project_id"),
                Col::Text("name"),
                Col::Text("type"),
                Col::Text("description"),
                Col::Text("source_chunk_ids"),
                Col::Text("created_at"),
                Col::Text("updated_at"),
            ],
        )
        .await?;
        summary.entities += 1;
    }

    let relation_rows = sqlx::query(
        "SELECT project_id, src, tgt, description, keywords, weight, source_chunk_ids,
                created_at, updated_at
         FROM graph_relations WHERE project_id = ?1",
    )
    .bind(project)
    .fetch_all(&mut *source)
    .await
    .map_err(|e| from_sqlx("portability.export", e))?;
    for row in &relation_rows {
        copy_row(
            &mut tx,
            "INSERT INTO graph_relations
                 (project_id, src, tgt, description, keywords, weight, source_chunk_ids,
                  created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            row,
            &[
                Col::Text("project_id"),
                Col::Text("src"),
                Col::Text("tgt"),
                Col::Text("description"),
                Col::Text("keywords"),
                Col::Float("weight"),
                Col::Text("source_chunk_ids"),
                Col::Text("created_at"),
                Col::Text("updated_at"),
            ],
        )
        .await?;
        summary.relations += 1;
    }

    let cache_rows = sqlx::query(
        "SELECT id, project_id, cache_type, chunk_id, content_hash, result, tokens_used,
                created_at, updated_at
         FROM extraction_cache WHERE project_id = ?1",
    )
    .bind(project)
    .fetch_all(&mut *source)
    .await
    .map_err(|e| from_sqlx("portability.export", e))?;
    for row in &cache_rows {
        copy_row(
            &mut tx,
            "INSERT INTO extraction_cache
                 (id, project_id, cache_type, chunk_id, content_hash, result, tokens_used,
                  created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            row,
            &[
                Col::Text("id"),
                Col::Text("project_id"),
                Col::Text("cache_type"),
                Col::OptText("chunk_id"),
                Col::Text("content_hash"),
                Col::Text("result"),
                Col::Int("tokens_used"),
                Col::Text("created_at"),
                Col::Text("updated_at"),
            ],
        )
        .await?;
        summary.cache_entries += 1;
    }

    let kv_rows = sqlx::query("SELECT key, value, updated_at FROM kv_store WHERE key LIKE ?1")
        .bind(kv_project_pattern(project))
        .fetch_all(&mut *source)
        .await
        .map_err(|e| from_sqlx("portability.export", e))?;
    for row in &kv_rows {
        copy_row(
            &mut tx,
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)",
            row,
            &[Col::Text("key"), Col::Text("value"), Col::Text("updated_at")],
        )
        .await?;
        summary.kv_entries += 1;
    }

    let status_rows = sqlx::query(
        "SELECT s.doc_id, s.file_path, s.processing_status, s.chunk_count, s.entity_count,
                s.relation_count, s.error_message, s.created_at, s.updated_at
         FROM document_status s
         JOIN documents d ON d.id = s.doc_id
         WHERE d.project_id = ?1",
    )
    .bind(project)
    .fetch_all(&mut *source)
    .await
    .map_err(|e| from_sqlx("portability.export", e))?;
    for row in &status_rows {
        copy_row(
            &mut tx,
            "INSERT INTO document_status
                 (doc_id, file_path, processing_status, chunk_count, entity_count,
                  relation_count, error_message, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            row,
            &[
                Col::Text("doc_id"),
                Col::Text("file_path"),
                Col::Text("processing_status"),
                Col::Int("chunk_count"),
                Col::Int("entity_count"),
                Col::Int("relation_count"),
                Col::OptText("error_message"),
                Col::Text("created_at"),
                Col::Text("updated_at"),
            ],
        )
        .await?;
        summary.statuses += 1;
    }

    tx.commit()
        .await
        .map_err(|e| from_sqlx("portability.export", e))?;
    Ok(summary)
}

/// Column spec for the raw row copies; values are rebound without decoding
/// so payloads (vector blobs in particular) stay bitwise identical.
enum Col {
    Text(&'static str),
    OptText(&'static str),
    Int(&'static str),
    OptInt(&'static str),
    Float(&'static str),
    Blob(&'static str),
}

async fn copy_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    insert_sql: &str,
    row: &SqliteRow,
    columns: &[Col],
) -> Result<()> {
    let mut query = sqlx::query(insert_sql);
    for column in columns {
        query = match column {
            Col::Text(name) => query.bind(
                row.try_get::<String, _>(*name)
                    .map_err(|e| from_sqlx("portability.copy", e))?,
            ),
            Col::OptText(name) => query.bind(
                row.try_get::<Option<String>, _>(*name)
                    .map_err(|e| from_sqlx("portability.copy", e))?,
            ),
            Col::Int(name) => query.bind(
                row.try_get::<i64, _>(*name)
                    .map_err(|e| from_sqlx("portability.copy", e))?,
            ),
            Col::OptInt(name) => query.bind(
                row.try_get::<Option<i64>, _>(*name)
                    .map_err(|e| from_sqlx("portability.copy", e))?,
            ),
            Col::Float(name) => query.bind(
                row.try_get::<f64, _>(*name)
                    .map_err(|e| from_sqlx("portability.copy", e))?,
            ),
            Col::Blob(name) => query.bind(
                row.try_get::<Vec<u8>, _>(*name)
                    .map_err(|e| from_sqlx("portability.copy", e))?,
            ),
        };
    }
    query
        .execute(&mut **tx)
        .await
        .map_err(|e| from_sqlx("portability.copy", e))?;
    Ok(())
}
