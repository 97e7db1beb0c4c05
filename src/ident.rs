//! Identifier normalization and validation.
//!
//! Entity and relation endpoints are addressed by *normalized* names:
//! lowercased, with runs of whitespace collapsed to single spaces and outer
//! whitespace trimmed. Normalization is part of the storage contract, so it
//! lives here rather than in any one backend.

use uuid::Uuid;

use crate::errors::{Result, StorageError};

/// Normalize an entity name: trim, collapse whitespace, lowercase.
///
/// `"  Apple  Inc "` and `"apple inc"` address the same graph node.
pub fn normalize_name(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Parse a project id, rejecting anything that is not a UUID.
pub fn parse_project_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| StorageError::InvalidArgument {
        message: format!("project id {raw:?} is not a valid UUID"),
    })
}

/// Key prefix under which a project's KV entries live, by convention.
pub fn kv_project_prefix(project_id: &str) -> String {
    format!("project:{project_id}:")
}

/// SQL LIKE pattern matching every key under a project's prefix.
pub fn kv_project_pattern(project_id: &str) -> String {
    format!("project:{project_id}:%")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_whitespace() {
        assert_eq!(normalize_name("Apple"), "apple");
        assert_eq!(normalize_name("  Apple   Inc  "), "apple inc");
        assert_eq!(normalize_name("\tApple\nInc"), "apple inc");
        assert_eq!(normalize_name(""), "");
        assert_eq!(normalize_name("   "), "");
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_name(" Alan  TURING ");
        assert_eq!(normalize_name(&once), once);
    }

    #[test]
    fn rejects_malformed_project_ids() {
        assert!(parse_project_id("not-a-uuid").is_err());
        assert!(parse_project_id("").is_err());
        let id = Uuid::new_v4();
        assert_eq!(parse_project_id(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn kv_prefix_shape() {
        assert_eq!(kv_project_prefix("p1"), "project:p1:");
        assert_eq!(kv_project_pattern("p1"), "project:p1:%");
    }
}
