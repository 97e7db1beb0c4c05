//! Domain records shared by every backend, plus the pure merge rules the
//! upsert operations rely on.
//!
//! Records carry no backend state; row encoding/decoding is hand-written per
//! table in each backend module. The merge functions here are deliberately
//! pure so the conflict semantics can be tested without a database:
//!
//! - entity upsert merges union source-chunk sets and keep the most recent
//!   non-empty description/type;
//! - relation upsert merges do the same for description/keywords and take the
//!   maximum weight.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{Result, StorageError};
use crate::ident::normalize_name;

/// Tenant boundary. Every other row is owned by exactly one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Coarse processing state of a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocStatus {
    NotProcessed,
    Processing,
    Completed,
    Failed,
}

impl DocStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotProcessed => "NOT_PROCESSED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "NOT_PROCESSED" => Ok(Self::NotProcessed),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(StorageError::invalid_argument(format!(
                "unknown document status {other:?}"
            ))),
        }
    }
}

/// Coarse content unit owned by a project. Deleting a document cascades to
/// its chunk vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub project_id: String,
    pub doc_type: String,
    pub status: DocStatus,
    pub file_name: Option<String>,
    pub content: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(project_id: impl Into<String>, doc_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id: project_id.into(),
            doc_type: doc_type.into(),
            status: DocStatus::NotProcessed,
            file_name: None,
            content: None,
            metadata: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}

/// What a stored vector row represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VectorKind {
    Chunk,
    Entity,
    Relation,
}

impl VectorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chunk => "chunk",
            Self::Entity => "entity",
            Self::Relation => "relation",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "chunk" => Ok(Self::Chunk),
            "entity" => Ok(Self::Entity),
            "relation" => Ok(Self::Relation),
            other => Err(StorageError::invalid_argument(format!(
                "unknown vector kind {other:?}"
            ))),
        }
    }
}

/// One embedding row: a stable id, the vector payload, and its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEntry {
    pub id: String,
    pub project_id: String,
    pub kind: VectorKind,
    pub content: String,
    pub vector: Vec<f32>,
    pub document_id: Option<String>,
    pub chunk_index: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl VectorEntry {
    pub fn new(
        id: impl Into<String>,
        project_id: impl Into<String>,
        kind: VectorKind,
        content: impl Into<String>,
        vector: Vec<f32>,
    ) -> Self {
        Self {
            id: id.into(),
            project_id: project_id.into(),
            kind,
            content: content.into(),
            vector,
            document_id: None,
            chunk_index: None,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_chunk(mut self, document_id: impl Into<String>, chunk_index: i64) -> Self {
        self.document_id = Some(document_id.into());
        self.chunk_index = Some(chunk_index);
        self
    }
}

/// Graph node. Identity within a project is the normalized name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub entity_type: String,
    pub description: String,
    pub source_chunk_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    /// Build an entity; the name is normalized here so callers never have to.
    pub fn new(
        name: impl AsRef<str>,
        entity_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: normalize_name(name.as_ref()),
            entity_type: entity_type.into(),
            description: description.into(),
            source_chunk_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_source_chunks<I, S>(mut self, chunk_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.source_chunk_ids = chunk_ids.into_iter().map(Into::into).collect();
        normalize_chunk_set(&mut self.source_chunk_ids);
        self
    }
}

/// Directed graph edge between two normalized entity names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub src: String,
    pub tgt: String,
    pub description: String,
    pub keywords: String,
    pub weight: f64,
    pub source_chunk_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Relation {
    pub fn new(
        src: impl AsRef<str>,
        tgt: impl AsRef<str>,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            src: normalize_name(src.as_ref()),
            tgt: normalize_name(tgt.as_ref()),
            description: description.into(),
            keywords: String::new(),
            weight: 0.0,
            source_chunk_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_keywords(mut self, keywords: impl Into<String>) -> Self {
        self.keywords = keywords.into();
        self
    }

    #[must_use]
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    #[must_use]
    pub fn with_source_chunks<I, S>(mut self, chunk_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.source_chunk_ids = chunk_ids.into_iter().map(Into::into).collect();
        normalize_chunk_set(&mut self.source_chunk_ids);
        self
    }
}

/// Kind of memoized LLM output held in the extraction cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheType {
    EntityExtraction,
    Gleaning,
    Summarization,
    KeywordExtraction,
}

impl CacheType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EntityExtraction => "ENTITY_EXTRACTION",
            Self::Gleaning => "GLEANING",
            Self::Summarization => "SUMMARIZATION",
            Self::KeywordExtraction => "KEYWORD_EXTRACTION",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "ENTITY_EXTRACTION" => Ok(Self::EntityExtraction),
            "GLEANING" => Ok(Self::Gleaning),
            "SUMMARIZATION" => Ok(Self::Summarization),
            "KEYWORD_EXTRACTION" => Ok(Self::KeywordExtraction),
            other => Err(StorageError::invalid_argument(format!(
                "unknown cache type {other:?}"
            ))),
        }
    }
}

/// Memoized LLM extraction result, keyed by (project, type, content hash).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionCache {
    pub id: Uuid,
    pub project_id: String,
    pub cache_type: CacheType,
    pub chunk_id: Option<String>,
    pub content_hash: String,
    pub result: String,
    pub tokens_used: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fine-grained per-document processing state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(StorageError::invalid_argument(format!(
                "unknown processing status {other:?}"
            ))),
        }
    }
}

/// Per-document processing record.
///
/// The `pending`/`as_processing`/`as_completed`/`as_failed` constructors are
/// pure record transforms; they never touch storage. `PROCESSING` may be
/// re-entered for idempotent restarts; terminal states change only through
/// an explicit new record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentStatus {
    pub doc_id: String,
    pub file_path: String,
    pub processing_status: ProcessingStatus,
    pub chunk_count: i64,
    pub entity_count: i64,
    pub relation_count: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentStatus {
    pub fn pending(doc_id: impl Into<String>, file_path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            doc_id: doc_id.into(),
            file_path: file_path.into(),
            processing_status: ProcessingStatus::Pending,
            chunk_count: 0,
            entity_count: 0,
            relation_count: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn as_processing(mut self) -> Self {
        self.processing_status = ProcessingStatus::Processing;
        self.error_message = None;
        self.updated_at = Utc::now();
        self
    }

    #[must_use]
    pub fn as_completed(mut self, chunks: i64, entities: i64, relations: i64) -> Self {
        self.processing_status = ProcessingStatus::Completed;
        self.chunk_count = chunks;
        self.entity_count = entities;
        self.relation_count = relations;
        self.error_message = None;
        self.updated_at = Utc::now();
        self
    }

    #[must_use]
    pub fn as_failed(mut self, message: impl Into<String>) -> Self {
        self.processing_status = ProcessingStatus::Failed;
        self.error_message = Some(message.into());
        self.updated_at = Utc::now();
        self
    }
}

/// Result of a BFS traversal: entities in discovery order plus the relations
/// connecting them, deduplicated by `(src, tgt)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subgraph {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

/// Per-project graph counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub entity_count: u64,
    pub relation_count: u64,
}

// ---------------------------------------------------------------------------
// Pure merge rules
// ---------------------------------------------------------------------------

/// Sort and deduplicate a chunk-id set in place.
pub fn normalize_chunk_set(ids: &mut Vec<String>) {
    ids.sort();
    ids.dedup();
}

/// Union of two chunk-id sets, sorted.
pub fn merge_chunk_sets(existing: &[String], incoming: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = existing.iter().chain(incoming.iter()).cloned().collect();
    normalize_chunk_set(&mut merged);
    merged
}

/// Merge an incoming entity upsert into the stored row.
///
/// Source-chunk sets union; type and description keep the most recent
/// non-empty value; `created_at` stays with the original row.
pub fn merge_entity(existing: Entity, incoming: Entity) -> Entity {
    let source_chunk_ids =
        merge_chunk_sets(&existing.source_chunk_ids, &incoming.source_chunk_ids);
    Entity {
        name: existing.name,
        entity_type: pick_latest_non_empty(existing.entity_type, incoming.entity_type),
        description: pick_latest_non_empty(existing.description, incoming.description),
        source_chunk_ids,
        created_at: existing.created_at,
        updated_at: Utc::now(),
    }
}

/// Merge an incoming relation upsert into the stored row.
///
/// Chunk sets union, weight merges by max, description/keywords keep the most
/// recent non-empty value.
pub fn merge_relation(existing: Relation, incoming: Relation) -> Relation {
    let source_chunk_ids =
        merge_chunk_sets(&existing.source_chunk_ids, &incoming.source_chunk_ids);
    Relation {
        src: existing.src,
        tgt: existing.tgt,
        description: pick_latest_non_empty(existing.description, incoming.description),
        keywords: pick_latest_non_empty(existing.keywords, incoming.keywords),
        weight: existing.weight.max(incoming.weight),
        source_chunk_ids,
        created_at: existing.created_at,
        updated_at: Utc::now(),
    }
}

fn pick_latest_non_empty(existing: String, incoming: String) -> String {
    if incoming.trim().is_empty() {
        existing
    } else {
        incoming
    }
}

/// Encode a chunk-id set for a TEXT/JSONB column.
pub fn encode_chunk_ids(ids: &[String]) -> String {
    serde_json::to_string(ids).unwrap_or_else(|_| "[]".to_string())
}

/// Decode a chunk-id set from a TEXT/JSONB column; tolerates legacy NULL/empty.
pub fn decode_chunk_ids(raw: &str) -> Vec<String> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    serde_json::from_str(raw).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_merge_unions_chunks_and_keeps_latest_description() {
        let a = Entity::new("Apple", "ORGANIZATION", "Tech company")
            .with_source_chunks(["c1", "c2"]);
        let b = Entity::new("Apple", "", "").with_source_chunks(["c2", "c3"]);
        let merged = merge_entity(a, b);
        assert_eq!(merged.source_chunk_ids, vec!["c1", "c2", "c3"]);
        assert_eq!(merged.entity_type, "ORGANIZATION");
        assert_eq!(merged.description, "Tech company");

        let c = Entity::new("Apple", "FOOD", "Red fruit");
        let merged = merge_entity(merged, c);
        assert_eq!(merged.entity_type, "FOOD");
        assert_eq!(merged.description, "Red fruit");
        assert_eq!(merged.source_chunk_ids, vec!["c1", "c2", "c3"]);
    }

    #[test]
    fn relation_merge_takes_max_weight() {
        let a = Relation::new("alice", "techcorp", "works at").with_weight(0.4);
        let b = Relation::new("alice", "techcorp", "").with_weight(0.9);
        let merged = merge_relation(a, b);
        assert_eq!(merged.weight, 0.9);
        assert_eq!(merged.description, "works at");

        let c = Relation::new("alice", "techcorp", "employed by").with_weight(0.1);
        let merged = merge_relation(merged, c);
        assert_eq!(merged.weight, 0.9);
        assert_eq!(merged.description, "employed by");
    }

    #[test]
    fn chunk_id_codec_round_trips() {
        let ids = vec!["c1".to_string(), "c2".to_string()];
        assert_eq!(decode_chunk_ids(&encode_chunk_ids(&ids)), ids);
        assert!(decode_chunk_ids("").is_empty());
        assert!(decode_chunk_ids("not json").is_empty());
    }

    #[test]
    fn status_factories_are_pure_transitions() {
        let pending = DocumentStatus::pending("doc-1", "/tmp/report.pdf");
        assert_eq!(pending.processing_status, ProcessingStatus::Pending);

        let processing = pending.clone().as_processing();
        assert_eq!(processing.processing_status, ProcessingStatus::Processing);

        // idempotent restart
        let processing = processing.as_processing();
        assert_eq!(processing.processing_status, ProcessingStatus::Processing);

        let done = processing.clone().as_completed(12, 5, 3);
        assert_eq!(done.processing_status, ProcessingStatus::Completed);
        assert_eq!((done.chunk_count, done.entity_count, done.relation_count), (12, 5, 3));

        let failed = processing.as_failed("chunker crashed");
        assert_eq!(failed.processing_status, ProcessingStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("chunker crashed"));
    }

    #[test]
    fn relation_normalizes_endpoints() {
        let r = Relation::new("  Alice ", "TechCorp", "works at");
        assert_eq!(r.src, "alice");
        assert_eq!(r.tgt, "techcorp");
    }
}
