//! Versioned, idempotent schema migrations.
//!
//! One monotonic sequence per engine, tracked in
//! `schema_version(version, description, applied_at)`. `migrate_to_latest`
//! reads the current max version and applies only the pending migrations,
//! one transaction per migration, recording each as it commits. Running it
//! again is a no-op.

use chrono::Utc;
use sqlx::postgres::PgPool;
use sqlx::sqlite::SqlitePool;
use tracing::{info, warn};

use crate::dialect::Dialect;
use crate::errors::{Result, StorageError, from_sqlx};

/// One migration step: a strictly-increasing version, a human-readable
/// description, and the DDL statements applied inside its transaction.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub statements: Vec<String>,
}

/// The migration sequence for an engine. The vector dimension feeds the
/// server engine's typed `vector(D)` column.
pub fn migrations(dialect: Dialect, vector_dimension: usize) -> Vec<Migration> {
    match dialect {
        Dialect::Sqlite => sqlite_migrations(),
        Dialect::Postgres => postgres_migrations(vector_dimension),
    }
}

fn validate_sequence(sequence: &[Migration]) -> Result<()> {
    let mut last = 0;
    for migration in sequence {
        if migration.version <= last {
            return Err(StorageError::backend(
                "migrate",
                format!("migration versions must strictly increase at {}", migration.version),
            ));
        }
        if migration.description.trim().is_empty() {
            return Err(StorageError::backend(
                "migrate",
                format!("migration {} is missing a description", migration.version),
            ));
        }
        last = migration.version;
    }
    Ok(())
}

fn sqlite_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "core relational schema",
            statements: vec![
                r#"
                CREATE TABLE IF NOT EXISTS projects (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )"#
                .to_string(),
                r#"
                CREATE TABLE IF NOT EXISTS documents (
                    id TEXT PRIMARY KEY,
                    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    type TEXT NOT NULL,
                    status TEXT NOT NULL,
                    file_name TEXT,
                    content TEXT,
                    metadata TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )"#
                .to_string(),
                "CREATE INDEX IF NOT EXISTS idx_documents_project_id ON documents(project_id)"
                    .to_string(),
                r#"
                CREATE TABLE IF NOT EXISTS vectors (
                    id TEXT PRIMARY KEY,
                    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    document_id TEXT REFERENCES documents(id) ON DELETE CASCADE,
                    chunk_index INTEGER,
                    type TEXT NOT NULL,
                    content TEXT NOT NULL,
                    embedding BLOB NOT NULL,
                    created_at TEXT NOT NULL
                )"#
                .to_string(),
                "CREATE INDEX IF NOT EXISTS idx_vectors_project_id ON vectors(project_id)"
                    .to_string(),
                r#"
                CREATE UNIQUE INDEX IF NOT EXISTS uq_vectors_document_chunk
                    ON vectors(document_id, chunk_index)
                    WHERE document_id IS NOT NULL AND chunk_index IS NOT NULL"#
                    .to_string(),
                r#"
                CREATE TABLE IF NOT EXISTS extraction_cache (
                    id TEXT PRIMARY KEY,
                    project_id TEXT NOT NULL,
                    cache_type TEXT NOT NULL,
                    chunk_id TEXT,
                    content_hash TEXT NOT NULL,
                    result TEXT NOT NULL,
                    tokens_used INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    UNIQUE (project_id, cache_type, content_hash)
                )"#
                .to_string(),
                "CREATE INDEX IF NOT EXISTS idx_extraction_cache_project_id ON extraction_cache(project_id)"
                    .to_string(),
                r#"
                CREATE TABLE IF NOT EXISTS kv_store (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )"#
                .to_string(),
                r#"
                CREATE TABLE IF NOT EXISTS document_status (
                    doc_id TEXT PRIMARY KEY,
                    file_path TEXT NOT NULL,
                    processing_status TEXT NOT NULL,
                    chunk_count INTEGER NOT NULL DEFAULT 0,
                    entity_count INTEGER NOT NULL DEFAULT 0,
                    relation_count INTEGER NOT NULL DEFAULT 0,
                    error_message TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )"#
                .to_string(),
            ],
        },
        Migration {
            version: 2,
            description: "property graph tables",
            statements: vec![
                r#"
                CREATE TABLE IF NOT EXISTS graph_namespaces (
                    project_id TEXT PRIMARY KEY,
                    created_at TEXT NOT NULL
                )"#
                .to_string(),
                r#"
                CREATE TABLE IF NOT EXISTS graph_entities (
                    project_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    type TEXT NOT NULL DEFAULT '',
                    description TEXT NOT NULL DEFAULT '',
                    source_chunk_ids TEXT NOT NULL DEFAULT '[]',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (project_id, name)
                )"#
                .to_string(),
                r#"
                CREATE TABLE IF NOT EXISTS graph_relations (
                    project_id TEXT NOT NULL,
                    src TEXT NOT NULL,
                    tgt TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    keywords TEXT NOT NULL DEFAULT '',
                    weight REAL NOT NULL DEFAULT 0,
                    source_chunk_ids TEXT NOT NULL DEFAULT '[]',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (project_id, src, tgt)
                )"#
                .to_string(),
                "CREATE INDEX IF NOT EXISTS idx_graph_entities_project_id ON graph_entities(project_id)"
                    .to_string(),
                "CREATE INDEX IF NOT EXISTS idx_graph_relations_project_id ON graph_relations(project_id)"
                    .to_string(),
                "CREATE INDEX IF NOT EXISTS idx_graph_relations_src ON graph_relations(project_id, src)"
                    .to_string(),
                "CREATE INDEX IF NOT EXISTS idx_graph_relations_tgt ON graph_relations(project_id, tgt)"
                    .to_string(),
            ],
        },
        Migration {
            version: 3,
            description: "secondary lookup indexes",
            statements: vec![
                "CREATE INDEX IF NOT EXISTS idx_vectors_project_type ON vectors(project_id, type)"
                    .to_string(),
                "CREATE INDEX IF NOT EXISTS idx_vectors_document_id ON vectors(document_id)"
                    .to_string(),
                "CREATE INDEX IF NOT EXISTS idx_extraction_cache_chunk_id ON extraction_cache(project_id, chunk_id)"
                    .to_string(),
                "CREATE INDEX IF NOT EXISTS idx_document_status_processing ON document_status(processing_status)"
                    .to_string(),
            ],
        },
    ]
}

fn postgres_migrations(vector_dimension: usize) -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "core relational schema",
            statements: vec![
                "CREATE EXTENSION IF NOT EXISTS vector".to_string(),
                r#"
                CREATE TABLE IF NOT EXISTS projects (
                    id UUID PRIMARY KEY,
                    name TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL
                )"#
                .to_string(),
                r#"
                CREATE TABLE IF NOT EXISTS documents (
                    id UUID PRIMARY KEY,
                    project_id UUID NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    type TEXT NOT NULL,
                    status TEXT NOT NULL,
                    file_name TEXT,
                    content TEXT,
                    metadata JSONB,
                    created_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL
                )"#
                .to_string(),
                "CREATE INDEX IF NOT EXISTS idx_documents_project_id ON documents(project_id)"
                    .to_string(),
                format!(
                    r#"
                CREATE TABLE IF NOT EXISTS vectors (
                    id TEXT PRIMARY KEY,
                    project_id UUID NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    document_id UUID REFERENCES documents(id) ON DELETE CASCADE,
                    chunk_index BIGINT,
                    type TEXT NOT NULL,
                    content TEXT NOT NULL,
                    embedding vector({vector_dimension}) NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL
                )"#
                ),
                "CREATE INDEX IF NOT EXISTS idx_vectors_project_id ON vectors(project_id)"
                    .to_string(),
                r#"
                CREATE UNIQUE INDEX IF NOT EXISTS uq_vectors_document_chunk
                    ON vectors(document_id, chunk_index)
                    WHERE document_id IS NOT NULL AND chunk_index IS NOT NULL"#
                    .to_string(),
                r#"
                CREATE TABLE IF NOT EXISTS extraction_cache (
                    id UUID PRIMARY KEY,
                    project_id UUID NOT NULL,
                    cache_type TEXT NOT NULL,
                    chunk_id TEXT,
                    content_hash TEXT NOT NULL,
                    result TEXT NOT NULL,
                    tokens_used BIGINT NOT NULL DEFAULT 0,
                    created_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL,
                    UNIQUE (project_id, cache_type, content_hash)
                )"#
                .to_string(),
                "CREATE INDEX IF NOT EXISTS idx_extraction_cache_project_id ON extraction_cache(project_id)"
                    .to_string(),
                r#"
                CREATE TABLE IF NOT EXISTS kv_store (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL
                )"#
                .to_string(),
                r#"
                CREATE TABLE IF NOT EXISTS document_status (
                    doc_id TEXT PRIMARY KEY,
                    file_path TEXT NOT NULL,
                    processing_status TEXT NOT NULL,
                    chunk_count BIGINT NOT NULL DEFAULT 0,
                    entity_count BIGINT NOT NULL DEFAULT 0,
                    relation_count BIGINT NOT NULL DEFAULT 0,
                    error_message TEXT,
                    created_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL
                )"#
                .to_string(),
            ],
        },
        Migration {
            version: 2,
            description: "property graph tables",
            statements: vec![
                r#"
                CREATE TABLE IF NOT EXISTS graph_namespaces (
                    project_id UUID PRIMARY KEY,
                    created_at TIMESTAMPTZ NOT NULL
                )"#
                .to_string(),
                r#"
                CREATE TABLE IF NOT EXISTS graph_entities (
                    project_id UUID NOT NULL,
                    name TEXT NOT NULL,
                    type TEXT NOT NULL DEFAULT '',
                    description TEXT NOT NULL DEFAULT '',
                    source_chunk_ids JSONB NOT NULL DEFAULT '[]'::jsonb,
                    created_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL,
                    PRIMARY KEY (project_id, name)
                )"#
                .to_string(),
                r#"
                CREATE TABLE IF NOT EXISTS graph_relations (
                    project_id UUID NOT NULL,
                    src TEXT NOT NULL,
                    tgt TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    keywords TEXT NOT NULL DEFAULT '',
                    weight DOUBLE PRECISION NOT NULL DEFAULT 0,
                    source_chunk_ids JSONB NOT NULL DEFAULT '[]'::jsonb,
                    created_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL,
                    PRIMARY KEY (project_id, src, tgt)
                )"#
                .to_string(),
                "CREATE INDEX IF NOT EXISTS idx_graph_entities_project_id ON graph_entities(project_id)"
                    .to_string(),
                "CREATE INDEX IF NOT EXISTS idx_graph_relations_project_id ON graph_relations(project_id)"
                    .to_string(),
                "CREATE INDEX IF NOT EXISTS idx_graph_relations_src ON graph_relations(project_id, src)"
                    .to_string(),
                "CREATE INDEX IF NOT EXISTS idx_graph_relations_tgt ON graph_relations(project_id, tgt)"
                    .to_string(),
            ],
        },
        Migration {
            version: 3,
            description: "secondary lookup indexes",
            statements: vec![
                "CREATE INDEX IF NOT EXISTS idx_vectors_project_type ON vectors(project_id, type)"
                    .to_string(),
                "CREATE INDEX IF NOT EXISTS idx_vectors_document_id ON vectors(document_id)"
                    .to_string(),
                "CREATE INDEX IF NOT EXISTS idx_extraction_cache_chunk_id ON extraction_cache(project_id, chunk_id)"
                    .to_string(),
                "CREATE INDEX IF NOT EXISTS idx_document_status_processing ON document_status(processing_status)"
                    .to_string(),
            ],
        },
    ]
}

/// Apply pending migrations on the embedded engine. Returns how many ran.
pub async fn migrate_sqlite(pool: &SqlitePool) -> Result<u32> {
    let sequence = sqlite_migrations();
    validate_sequence(&sequence)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )"#,
    )
    .execute(pool)
    .await
    .map_err(|e| from_sqlx("migrate (bootstrap)", e))?;

    let current: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
        .fetch_one(pool)
        .await
        .map_err(|e| from_sqlx("migrate (version read)", e))?;

    let mut applied = 0;
    for migration in sequence.iter().filter(|m| m.version > current) {
        let mut tx = pool
            .begin()
            .await
            .map_err(|e| from_sqlx("migrate (tx begin)", e))?;
        // Re-check inside the transaction: another connection may have
        // applied this version between the read above and now.
        let already: Option<i64> =
            sqlx::query_scalar("SELECT version FROM schema_version WHERE version = ?1")
                .bind(migration.version)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| from_sqlx("migrate (version recheck)", e))?;
        if already.is_some() {
            continue;
        }
        for statement in &migration.statements {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| from_sqlx("migrate (ddl)", e))?;
        }
        sqlx::query("INSERT INTO schema_version (version, description, applied_at) VALUES (?1, ?2, ?3)")
            .bind(migration.version)
            .bind(migration.description)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| from_sqlx("migrate (record)", e))?;
        tx.commit()
            .await
            .map_err(|e| from_sqlx("migrate (tx commit)", e))?;
        info!(version = migration.version, description = migration.description, "applied migration");
        applied += 1;
    }
    Ok(applied)
}

/// Advisory-lock key serializing concurrent migrators against one database.
const MIGRATION_LOCK_KEY: i64 = 0x7261_6777_6561_7665;

/// Apply pending migrations on the server engine. Returns how many ran.
///
/// Concurrent migrators (several processes starting at once) serialize on a
/// session advisory lock, so only one applies each version.
pub async fn migrate_postgres(pool: &PgPool, vector_dimension: usize) -> Result<u32> {
    let mut lock_conn = pool
        .acquire()
        .await
        .map_err(|e| from_sqlx("migrate (lock acquire)", e))?;
    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(MIGRATION_LOCK_KEY)
        .execute(&mut *lock_conn)
        .await
        .map_err(|e| from_sqlx("migrate (lock)", e))?;

    let result = migrate_postgres_locked(pool, vector_dimension).await;

    let unlock = sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(MIGRATION_LOCK_KEY)
        .execute(&mut *lock_conn)
        .await;
    if let Err(e) = unlock {
        warn!("could not release migration advisory lock: {e}");
    }
    result
}

async fn migrate_postgres_locked(pool: &PgPool, vector_dimension: usize) -> Result<u32> {
    let sequence = postgres_migrations(vector_dimension);
    validate_sequence(&sequence)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version BIGINT PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL
        )"#,
    )
    .execute(pool)
    .await
    .map_err(|e| from_sqlx("migrate (bootstrap)", e))?;

    let current: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
        .fetch_one(pool)
        .await
        .map_err(|e| from_sqlx("migrate (version read)", e))?;

    let mut applied = 0;
    for migration in sequence.iter().filter(|m| m.version > current) {
        let mut tx = pool
            .begin()
            .await
            .map_err(|e| from_sqlx("migrate (tx begin)", e))?;
        for statement in &migration.statements {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| from_sqlx("migrate (ddl)", e))?;
        }
        sqlx::query("INSERT INTO schema_version (version, description, applied_at) VALUES ($1, $2, $3)")
            .bind(migration.version)
            .bind(migration.description)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .map_err(|e| from_sqlx("migrate (record)", e))?;
        tx.commit()
            .await
            .map_err(|e| from_sqlx("migrate (tx commit)", e))?;
        info!(version = migration.version, description = migration.description, "applied migration");
        applied += 1;
    }

    ensure_pg_vector_index(pool).await;
    Ok(applied)
}

/// Best-effort HNSW index for cosine search; needs pgvector >= 0.5, so a
/// failure downgrades to a warning rather than failing startup.
async fn ensure_pg_vector_index(pool: &PgPool) {
    let result = sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_vectors_embedding
            ON vectors USING hnsw (embedding vector_cosine_ops)
            WITH (m = 16, ef_construction = 200)"#,
    )
    .execute(pool)
    .await;
    if let Err(e) = result {
        warn!("could not create HNSW index on vectors.embedding: {e}");
    }
}

/// Highest applied migration version (0 when none).
pub async fn current_version_sqlite(pool: &SqlitePool) -> Result<i64> {
    sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
        .fetch_one(pool)
        .await
        .map_err(|e| from_sqlx("migrate (version read)", e))
}

/// Rows recorded in `schema_version`, ascending.
pub async fn applied_versions_sqlite(pool: &SqlitePool) -> Result<Vec<i64>> {
    sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version")
        .fetch_all(pool)
        .await
        .map_err(|e| from_sqlx("migrate (version read)", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_are_strictly_increasing_with_descriptions() {
        for dialect in [Dialect::Sqlite, Dialect::Postgres] {
            let sequence = migrations(dialect, 384);
            validate_sequence(&sequence).unwrap();
            assert_eq!(sequence.len(), 3);
        }
    }

    #[test]
    fn postgres_vector_column_uses_configured_dimension() {
        let sequence = migrations(Dialect::Postgres, 1536);
        let ddl = sequence[0].statements.join("\n");
        assert!(ddl.contains("vector(1536)"));
    }
}
