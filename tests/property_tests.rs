//! Property-based tests for vectorbridge.
//!
//! These tests verify invariants that should hold for any input:
//! - Cosine stores return unit-length vectors
//! - Search returns at most `top_k` results ordered by relevance
//! - Added records read back unchanged under non-normalizing metrics
//! - Block identifiers depend only on content

#![allow(clippy::unwrap_used)]

use proptest::prelude::*;
use serde_json::json;
use vectorbridge::storage::vector::LocalVectorStore;
use vectorbridge::storage::vector::ipfs::{compute_cid, to_canonical_json};
use vectorbridge::{ChunkId, DistanceMetric, EmbeddingRecord, VectorStore};

/// Vectors with at least one clearly non-zero component.
fn vector(dimension: usize) -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-100.0f32..100.0, dimension)
        .prop_filter("non-zero vector", |v| v.iter().any(|x| x.abs() > 0.01))
}

fn metric() -> impl Strategy<Value = DistanceMetric> {
    prop_oneof![
        Just(DistanceMetric::Cosine),
        Just(DistanceMetric::Euclidean),
        Just(DistanceMetric::Dot),
    ]
}

proptest! {
    #[test]
    fn prop_cosine_store_returns_unit_vectors(v in vector(6)) {
        let stored = tokio_test::block_on(async {
            let store = LocalVectorStore::in_memory(DistanceMetric::Cosine);
            store
                .add_embeddings(vec![EmbeddingRecord::new("x", v)], "c")
                .await
                .unwrap();
            store.get_by_id(&ChunkId::new("x"), "c").await.unwrap().unwrap()
        });
        let norm: f32 = stored.embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        prop_assert!((norm - 1.0).abs() < 1e-3, "norm was {norm}");
    }

    #[test]
    fn prop_search_bounded_and_ordered(
        metric in metric(),
        rows in prop::collection::vec(vector(4), 1..30),
        query in vector(4),
        top_k in 0usize..40,
    ) {
        let count = rows.len();
        let hits = tokio_test::block_on(async {
            let store = LocalVectorStore::in_memory(metric);
            let records = rows
                .into_iter()
                .enumerate()
                .map(|(i, v)| EmbeddingRecord::new(format!("r{i}"), v))
                .collect();
            store.add_embeddings(records, "c").await.unwrap();
            store.search(&query, top_k, "c", None).await.unwrap()
        });

        prop_assert_eq!(hits.len(), top_k.min(count));
        for pair in hits.windows(2) {
            prop_assert!(
                metric.compare(pair[0].score, pair[1].score) != std::cmp::Ordering::Greater,
                "{} ranked before {}", pair[0].score, pair[1].score
            );
        }
    }

    #[test]
    fn prop_add_then_get_roundtrip(
        metric in prop_oneof![Just(DistanceMetric::Euclidean), Just(DistanceMetric::Dot)],
        v in vector(5),
        content in "[a-z ]{0,40}",
        tag in "[a-z]{1,10}",
    ) {
        let record = EmbeddingRecord::new("id", v)
            .with_content(content)
            .with_metadata("tag", tag);
        let expected = record.clone();
        let got = tokio_test::block_on(async {
            let store = LocalVectorStore::in_memory(metric);
            store.add_embeddings(vec![record], "c").await.unwrap();
            store.get_by_id(&ChunkId::new("id"), "c").await.unwrap().unwrap()
        });

        prop_assert_eq!(got.embedding, expected.embedding);
        prop_assert_eq!(got.content, expected.content);
        prop_assert_eq!(got.metadata, expected.metadata);
    }

    #[test]
    fn prop_cid_is_deterministic(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let first = compute_cid(&bytes);
        prop_assert_eq!(&first, &compute_cid(&bytes));
        prop_assert!(first.starts_with("bafk"));
        prop_assert_eq!(first.len(), 4 + 64);
    }

    #[test]
    fn prop_canonical_json_ignores_key_order(a in any::<i64>(), b in "[a-z]{0,12}", c in any::<bool>()) {
        let forward = json!({"alpha": a, "beta": b, "gamma": {"x": c, "y": [a]}});
        let reversed = json!({"gamma": {"y": [a], "x": c}, "beta": b, "alpha": a});
        let left = to_canonical_json(&forward).unwrap();
        let right = to_canonical_json(&reversed).unwrap();
        prop_assert_eq!(compute_cid(&left), compute_cid(&right));
        prop_assert_eq!(left, right);
    }
}
