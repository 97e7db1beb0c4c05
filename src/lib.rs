//! # Ragweave: Multi-tenant RAG Storage Engine
//!
//! Ragweave is the storage layer for retrieval-augmented-generation
//! pipelines: one facade over five project-scoped sub-stores — vectors, a
//! labeled property graph, an LLM extraction cache, a generic KV map, and a
//! document-status table — with two interchangeable back ends behind a
//! single contract:
//!
//! - **PostgreSQL** (server class): delegated pooling, native cosine
//!   similarity through the `vector` extension, jsonb-merge upserts.
//! - **SQLite** (embedded): one exclusive writer plus a bounded read pool
//!   under WAL, blob-encoded vectors with a bounded-heap linear scan, and
//!   single-file project export/import.
//!
//! ## Core Concepts
//!
//! - **Project**: the tenant boundary. Every row is owned by exactly one
//!   project; cross-project reads always come back empty.
//! - **Normalized names**: graph entities are addressed by lowercased,
//!   whitespace-collapsed names, so `"Apple"` and `" apple  "` are the same
//!   node within a project and different nodes across projects.
//! - **Merging upserts**: re-upserting an entity or relation unions its
//!   source-chunk set and keeps the most recent non-empty description;
//!   relation weights merge by maximum.
//! - **Bounded retry**: every operation is wrapped in an explicit
//!   [`retry::with_retry`] combinator; a pure classifier decides which
//!   backend failures are transient, and retry attempts surface as
//!   structured [`retry::RetryEvent`]s.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ragweave::records::{Entity, Relation, VectorEntry, VectorKind};
//! use ragweave::stores::VectorFilter;
//! use ragweave::{StorageConfig, StorageFacade};
//!
//! # async fn example() -> ragweave::Result<()> {
//! let facade = StorageFacade::connect(StorageConfig::sqlite("ragweave.db")).await?;
//!
//! let project = facade.projects().create_project("handbook").await?;
//! let pid = project.id.to_string();
//!
//! // Graph side: entities, a relation, traversal.
//! facade.graph().create_project_graph(&pid).await?;
//! facade
//!     .graph()
//!     .upsert_entity(&pid, Entity::new("Alice", "PERSON", "Engineer"))
//!     .await?;
//! facade
//!     .graph()
//!     .upsert_entity(&pid, Entity::new("TechCorp", "ORGANIZATION", ""))
//!     .await?;
//! facade
//!     .graph()
//!     .upsert_relation(&pid, Relation::new("Alice", "TechCorp", "works at"))
//!     .await?;
//! let neighborhood = facade.graph().traverse_bfs(&pid, "alice", 2, 50).await?;
//!
//! // Vector side: upsert and cosine top-k.
//! facade
//!     .vectors()
//!     .upsert(VectorEntry::new(
//!         "chunk-1",
//!         &pid,
//!         VectorKind::Chunk,
//!         "Alice works at TechCorp",
//!         vec![0.0; 384],
//!     ))
//!     .await?;
//! let hits = facade
//!     .vectors()
//!     .query(&[0.0; 384], 10, &VectorFilter::project(&pid))
//!     .await?;
//! # let _ = (neighborhood, hits);
//! facade.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`facade`] - [`StorageFacade`]: configuration in, sub-store handles out
//! - [`stores`] - the sub-store traits and their two engine implementations
//! - [`records`] - domain records and the pure merge rules
//! - [`sessions`] - connection pooling and the embedded single-writer rule
//! - [`migrate`] - versioned idempotent schema migrations
//! - [`retry`] - bounded retry with jitter and structured retry events
//! - [`portability`] - single-file project export/import
//! - [`errors`] - the [`StorageError`] taxonomy and failure classification

pub mod config;
pub mod dialect;
pub mod errors;
pub mod facade;
pub mod ident;
pub mod migrate;
pub mod portability;
pub mod records;
pub mod retry;
pub mod sessions;
pub mod stores;

pub use config::{BackendKind, RetryConfig, SqliteConfig, StorageConfig, VectorConfig};
pub use errors::{FailureClass, Result, StorageError};
pub use facade::StorageFacade;
pub use portability::{ExportSummary, ImportSummary, PortabilityService};
pub use retry::{MemoryRetryObserver, RetryEvent, RetryObserver, RetryPolicy, TracingRetryObserver};
