//! The minimum surface on which the two SQL engines differ.
//!
//! Sub-stores build their statements against these primitives so the query
//! text stays in one place per operation: parameter placeholders, IN-list
//! expansion, boolean literals, and the vector payload codec (IEEE-754
//! little-endian blobs for the embedded engine, `[x,y,…]` literals cast to
//! `::vector` for the server engine).

use chrono::{DateTime, Utc};

use crate::errors::{Result, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Positional placeholder for 1-based parameter `n`.
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Self::Sqlite => format!("?{n}"),
            Self::Postgres => format!("${n}"),
        }
    }

    /// Comma-separated placeholders for parameters `start .. start + count`.
    pub fn placeholders(self, start: usize, count: usize) -> String {
        (start..start + count)
            .map(|n| self.placeholder(n))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn bool_literal(self, value: bool) -> &'static str {
        match (self, value) {
            (Self::Sqlite, true) => "1",
            (Self::Sqlite, false) => "0",
            (Self::Postgres, true) => "TRUE",
            (Self::Postgres, false) => "FALSE",
        }
    }
}

/// Encode a vector for the embedded engine: packed little-endian f32.
pub fn encode_vector_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Decode an embedded-engine vector blob.
pub fn decode_vector_blob(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(StorageError::backend(
            "vector decode",
            format!("blob length {} is not a multiple of 4", blob.len()),
        ));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Serialize a vector to the pgvector literal format: `[x1,x2,…]`.
pub fn pgvector_literal(vector: &[f32]) -> String {
    let inner: Vec<String> = vector.iter().map(|f| f.to_string()).collect();
    format!("[{}]", inner.join(","))
}

/// Parse a pgvector value read back as text.
pub fn parse_pgvector_text(raw: &str) -> Result<Vec<f32>> {
    let trimmed = raw.trim().trim_start_matches('[').trim_end_matches(']');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    trimmed
        .split(',')
        .map(|part| {
            part.trim().parse::<f32>().map_err(|e| {
                StorageError::backend("vector decode", format!("bad component {part:?}: {e}"))
            })
        })
        .collect()
}

/// Cosine similarity in `[-1, 1]`; zero-norm operands score 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}

/// Parse an RFC 3339 timestamp stored as TEXT, tolerating drift.
pub fn parse_rfc3339(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_differ_by_engine() {
        assert_eq!(Dialect::Sqlite.placeholder(3), "?3");
        assert_eq!(Dialect::Postgres.placeholder(3), "$3");
        assert_eq!(Dialect::Sqlite.placeholders(2, 3), "?2, ?3, ?4");
        assert_eq!(Dialect::Postgres.placeholders(1, 2), "$1, $2");
    }

    #[test]
    fn blob_codec_round_trips_bitwise() {
        let v = vec![0.25f32, -1.5, 3.625, f32::MIN_POSITIVE];
        let blob = encode_vector_blob(&v);
        assert_eq!(blob.len(), 16);
        assert_eq!(decode_vector_blob(&blob).unwrap(), v);
    }

    #[test]
    fn blob_codec_rejects_torn_payloads() {
        assert!(decode_vector_blob(&[1, 2, 3]).is_err());
    }

    #[test]
    fn pgvector_literal_round_trips() {
        let v = vec![0.1f32, 0.2, 0.3];
        let text = pgvector_literal(&v);
        assert_eq!(parse_pgvector_text(&text).unwrap(), v);
        assert!(parse_pgvector_text("[]").unwrap().is_empty());
    }

    #[test]
    fn cosine_basics() {
        let a = [1.0f32, 0.0];
        let b = [0.0f32, 1.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &a), 0.0);
    }
}
