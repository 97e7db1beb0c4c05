//! Connection/session layer for the two backing engines.
//!
//! The server engine ([`postgres::PgSessions`]) is a thin wrapper over a
//! delegated connection pool: sessions are stateless and every operation
//! acquires and releases one around a single logical unit of work.
//!
//! The embedded engine ([`sqlite::SqliteSessions`]) enforces the
//! single-writer discipline itself: one exclusive write session behind a
//! bounded wait, a small pool of readers, and WAL so the two coexist.
//! Exceeding the bounded wait surfaces as `DatabaseLocked` with the
//! operation name and the waited duration.
//!
//! Both guarantee release on all exit paths (sessions are RAII pool guards)
//! and that `close()` drains in-flight sessions.

pub mod postgres;
pub mod sqlite;

pub use postgres::PgSessions;
pub use sqlite::SqliteSessions;
