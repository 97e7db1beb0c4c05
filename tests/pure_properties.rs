//! Property tests for the pure pieces: name normalization, vector codecs,
//! and chunk-set merges.

use proptest::prelude::*;
use ragweave::dialect::{cosine_similarity, decode_vector_blob, encode_vector_blob};
use ragweave::ident::normalize_name;
use ragweave::records::{Entity, merge_chunk_sets, merge_entity};

proptest! {
    #[test]
    fn normalization_is_idempotent(raw in ".{0,64}") {
        let once = normalize_name(&raw);
        prop_assert_eq!(normalize_name(&once), once);
    }

    #[test]
    fn normalized_names_have_no_outer_or_double_whitespace(raw in ".{0,64}") {
        let name = normalize_name(&raw);
        prop_assert_eq!(name.trim(), name.as_str());
        prop_assert!(!name.contains("  "));
        prop_assert!(!name.contains('\t'));
        prop_assert!(!name.contains('\n'));
    }

    #[test]
    fn blob_codec_round_trips(vector in proptest::collection::vec(-1000.0f32..1000.0, 0..64)) {
        let blob = encode_vector_blob(&vector);
        prop_assert_eq!(blob.len(), vector.len() * 4);
        prop_assert_eq!(decode_vector_blob(&blob).unwrap(), vector);
    }

    #[test]
    fn cosine_similarity_is_bounded(
        a in proptest::collection::vec(-100.0f32..100.0, 8),
        b in proptest::collection::vec(-100.0f32..100.0, 8),
    ) {
        let score = cosine_similarity(&a, &b);
        prop_assert!((-1.0001..=1.0001).contains(&score));
    }

    #[test]
    fn chunk_set_merge_is_a_sorted_union(
        left in proptest::collection::vec("[a-z]{1,6}", 0..12),
        right in proptest::collection::vec("[a-z]{1,6}", 0..12),
    ) {
        let merged = merge_chunk_sets(&left, &right);
        let mut expected: Vec<String> = left.iter().chain(right.iter()).cloned().collect();
        expected.sort();
        expected.dedup();
        prop_assert_eq!(merged.clone(), expected);
        // commutative
        prop_assert_eq!(merge_chunk_sets(&right, &left), merged);
    }

    #[test]
    fn entity_merge_never_loses_chunks(
        first in proptest::collection::vec("[a-z]{1,6}", 0..8),
        second in proptest::collection::vec("[a-z]{1,6}", 0..8),
    ) {
        let a = Entity::new("node", "T", "d").with_source_chunks(first.clone());
        let b = Entity::new("node", "", "").with_source_chunks(second.clone());
        let merged = merge_entity(a, b);
        for chunk in first.iter().chain(second.iter()) {
            prop_assert!(merged.source_chunk_ids.contains(chunk));
        }
    }
}
