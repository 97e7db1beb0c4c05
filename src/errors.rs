//! Storage error taxonomy and transient/permanent classification.
//!
//! Every public operation returns [`StorageError`]. Backend (sqlx) failures
//! are mapped at the call site with a short operation context, and the
//! classifier below decides whether the retry layer may try again:
//!
//! - **Transient**: connection-class failures, deadlocks, resource
//!   exhaustion, operator intervention, and lock/busy timeouts.
//! - **Permanent**: constraint violations, syntax/access errors, schema
//!   mismatches, and invalid input. These short-circuit retries.

use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Retry-relevant classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Worth retrying with backoff.
    Transient,
    /// Retrying will not resolve this.
    Permanent,
}

/// Errors raised by the storage engine.
#[derive(Debug, Error, Diagnostic)]
pub enum StorageError {
    /// Malformed input: bad UUIDs, empty entity names, self-loop relations.
    #[error("invalid argument: {message}")]
    #[diagnostic(
        code(ragweave::invalid_argument),
        help("Check identifiers and payloads before calling the store.")
    )]
    InvalidArgument { message: String },

    /// An operation touched a project graph that was never created.
    #[error("graph not initialized for project {project_id}")]
    #[diagnostic(
        code(ragweave::not_initialized),
        help("Call create_project_graph before reading or writing graph data.")
    )]
    NotInitialized { project_id: String },

    /// Unique/foreign-key violation surfaced from the backing engine.
    #[error("constraint violation: {message}")]
    #[diagnostic(code(ragweave::constraint))]
    ConstraintViolation { message: String },

    /// A failure the classifier deems worth retrying.
    #[error("transient backend failure in {operation}: {message}")]
    #[diagnostic(
        code(ragweave::transient),
        help("The operation is retried automatically; persistent occurrences indicate an unhealthy backend.")
    )]
    Transient { operation: String, message: String },

    /// The embedded engine could not hand out a session within the busy timeout.
    #[error("database locked: {operation} waited {waited_ms} ms")]
    #[diagnostic(
        code(ragweave::database_locked),
        help("Another writer is holding the database; raise busy_timeout or reduce write contention.")
    )]
    DatabaseLocked { operation: String, waited_ms: u64 },

    /// Vector length differs from the configured dimension.
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    #[diagnostic(code(ragweave::dimension_mismatch))]
    DimensionMismatch { expected: usize, actual: usize },

    /// Unknown backend name or malformed configuration value. Fatal at startup.
    #[error("invalid configuration: {message}")]
    #[diagnostic(
        code(ragweave::invalid_configuration),
        help("Accepted backends are \"postgresql\" and \"sqlite\" (case-insensitive).")
    )]
    InvalidConfiguration { message: String },

    /// An import file is not a valid exported database.
    #[error("file format error: {message}")]
    #[diagnostic(
        code(ragweave::file_format),
        help("Import expects a standalone SQLite file produced by export_project.")
    )]
    FileFormat { message: String },

    /// Permanent backend error (syntax, access, decode, unexpected shape).
    #[error("backend error in {operation}: {message}")]
    #[diagnostic(code(ragweave::backend))]
    Backend { operation: String, message: String },
}

impl StorageError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn backend(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Short stable label for structured retry events.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::NotInitialized { .. } => "not_initialized",
            Self::ConstraintViolation { .. } => "constraint_violation",
            Self::Transient { .. } => "transient",
            Self::DatabaseLocked { .. } => "database_locked",
            Self::DimensionMismatch { .. } => "dimension_mismatch",
            Self::InvalidConfiguration { .. } => "invalid_configuration",
            Self::FileFormat { .. } => "file_format",
            Self::Backend { .. } => "backend",
        }
    }

    /// Whether the retry layer may try this operation again.
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Transient { .. } | Self::DatabaseLocked { .. } => FailureClass::Transient,
            _ => FailureClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == FailureClass::Transient
    }
}

/// Classify a raw backend error code.
///
/// Codes come in two shapes: SQLite extended result codes (decimal integers,
/// primary code in the low byte) and Postgres SQLSTATEs (five alphanumerics,
/// class in the first two).
pub fn classify_code(code: &str) -> FailureClass {
    if let Ok(n) = code.parse::<u32>() {
        return match n & 0xff {
            // SQLITE_BUSY, SQLITE_LOCKED, SQLITE_IOERR, SQLITE_FULL, SQLITE_PROTOCOL
            5 | 6 | 10 | 13 | 15 => FailureClass::Transient,
            _ => FailureClass::Permanent,
        };
    }
    let class = code.get(..2).unwrap_or("");
    match class {
        // connection exceptions, resource exhaustion, operator intervention
        "08" | "53" | "57" => FailureClass::Transient,
        // serialization failures / deadlocks
        "40" if code == "40001" || code == "40P01" => FailureClass::Transient,
        _ => FailureClass::Permanent,
    }
}

/// True when the code denotes a unique or foreign-key violation.
fn is_constraint_code(code: &str) -> bool {
    if let Ok(n) = code.parse::<u32>() {
        // SQLITE_CONSTRAINT family
        return n & 0xff == 19;
    }
    code.starts_with("23")
}

/// Map a sqlx failure into the taxonomy, attaching the operation name.
pub fn from_sqlx(operation: &str, err: sqlx::Error) -> StorageError {
    match &err {
        sqlx::Error::Database(db) => {
            let message = db.message().to_string();
            match db.code().as_deref() {
                Some(code) if is_constraint_code(code) => {
                    StorageError::ConstraintViolation { message }
                }
                Some(code) if classify_code(code) == FailureClass::Transient => {
                    StorageError::Transient {
                        operation: operation.to_string(),
                        message,
                    }
                }
                _ => StorageError::Backend {
                    operation: operation.to_string(),
                    message,
                },
            }
        }
        sqlx::Error::PoolTimedOut => StorageError::DatabaseLocked {
            operation: operation.to_string(),
            waited_ms: 0,
        },
        sqlx::Error::Io(_) | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
            StorageError::Transient {
                operation: operation.to_string(),
                message: err.to_string(),
            }
        }
        _ => StorageError::Backend {
            operation: operation.to_string(),
            message: err.to_string(),
        },
    }
}

/// Map a pool-acquire failure, preserving the measured wait.
pub fn from_acquire(operation: &str, waited: Duration, err: sqlx::Error) -> StorageError {
    match err {
        sqlx::Error::PoolTimedOut => StorageError::DatabaseLocked {
            operation: operation.to_string(),
            waited_ms: waited.as_millis() as u64,
        },
        other => from_sqlx(operation, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_busy_is_transient() {
        assert_eq!(classify_code("5"), FailureClass::Transient);
        // SQLITE_BUSY_SNAPSHOT = 517
        assert_eq!(classify_code("517"), FailureClass::Transient);
        assert_eq!(classify_code("6"), FailureClass::Transient);
    }

    #[test]
    fn sqlite_constraint_is_permanent() {
        assert_eq!(classify_code("19"), FailureClass::Permanent);
        // SQLITE_CONSTRAINT_UNIQUE = 2067, SQLITE_CONSTRAINT_PRIMARYKEY = 1555
        assert!(is_constraint_code("2067"));
        assert!(is_constraint_code("1555"));
    }

    #[test]
    fn sqlstate_classes() {
        assert_eq!(classify_code("08006"), FailureClass::Transient);
        assert_eq!(classify_code("53300"), FailureClass::Transient);
        assert_eq!(classify_code("57P01"), FailureClass::Transient);
        assert_eq!(classify_code("40001"), FailureClass::Transient);
        assert_eq!(classify_code("40P01"), FailureClass::Transient);
        assert_eq!(classify_code("42601"), FailureClass::Permanent);
        assert!(is_constraint_code("23505"));
        assert_eq!(classify_code("23505"), FailureClass::Permanent);
    }

    #[test]
    fn locked_and_transient_retryable() {
        let locked = StorageError::DatabaseLocked {
            operation: "kv.set".into(),
            waited_ms: 30_000,
        };
        assert!(locked.is_transient());
        assert_eq!(locked.kind_label(), "database_locked");

        let invalid = StorageError::invalid_argument("empty entity name");
        assert_eq!(invalid.class(), FailureClass::Permanent);
    }
}
