//! Integration tests for vectorbridge.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::panic,
    clippy::too_many_lines,
    clippy::cast_precision_loss
)]

use std::sync::Arc;
use tempfile::TempDir;
use vectorbridge::storage::vector::{IpfsVectorStore, LocalVectorStore, MemoryRouter};
use vectorbridge::{
    ChunkId, CollectionOptions, DistanceMetric, EmbeddingRecord, Error, MetadataFilter,
    StoreConfig, VectorBridgeConfig, VectorStore, VectorStoreManager,
};

fn in_process_stores() -> Vec<Arc<dyn VectorStore>> {
    vec![
        Arc::new(LocalVectorStore::in_memory(DistanceMetric::Cosine)),
        Arc::new(IpfsVectorStore::local_only(DistanceMetric::Cosine)),
        Arc::new(IpfsVectorStore::new(
            Arc::new(MemoryRouter::new()),
            DistanceMetric::Cosine,
        )),
    ]
}

#[test]
fn test_error_types() {
    let err = Error::InvalidInput("test message".to_string());
    let display = format!("{err}");
    assert!(display.contains("invalid input"));
    assert!(display.contains("test message"));

    let err = Error::PartialFailure {
        operation: "add_embeddings".to_string(),
        failed_ids: vec!["a".to_string(), "b".to_string()],
    };
    let display = format!("{err}");
    assert!(display.contains("2 id(s)"));
    assert!(display.contains("a, b"));

    let err = Error::connection("qdrant", "connection refused");
    assert!(err.is_connection());
    assert!(format!("{err}").contains("qdrant"));
}

#[tokio::test]
async fn test_docs_scenario_on_every_in_process_backend() {
    for store in in_process_stores() {
        let backend = store.backend_name();
        assert!(
            store
                .create_collection("docs", 4, DistanceMetric::Cosine, &CollectionOptions::new())
                .await
                .expect("create")
        );
        store
            .add_embeddings(
                vec![
                    EmbeddingRecord::new("a", vec![1.0, 0.0, 0.0, 0.0]),
                    EmbeddingRecord::new("b", vec![0.0, 1.0, 0.0, 0.0]),
                ],
                "docs",
            )
            .await
            .expect("add");

        let hits = store
            .search(&[1.0, 0.0, 0.0, 0.0], 1, "docs", None)
            .await
            .expect("search");
        assert_eq!(hits.len(), 1, "{backend}");
        assert_eq!(hits[0].chunk_id.as_str(), "a", "{backend}");
        assert!((hits[0].score - 1.0).abs() < 1e-5, "{backend}");

        assert!(store.delete_by_id(&ChunkId::new("a"), "docs").await.expect("delete"));
        let hits = store
            .search(&[1.0, 0.0, 0.0, 0.0], 2, "docs", None)
            .await
            .expect("search");
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["b"], "{backend}");
        assert!(store.get_by_id(&ChunkId::new("a"), "docs").await.expect("get").is_none());
    }
}

#[tokio::test]
async fn test_update_keeps_count_and_replaces_fields() {
    for store in in_process_stores() {
        store
            .add_embeddings(
                vec![
                    EmbeddingRecord::new("a", vec![1.0, 0.0])
                        .with_content("old")
                        .with_metadata("v", 1),
                    EmbeddingRecord::new("b", vec![0.0, 1.0]),
                ],
                "c",
            )
            .await
            .expect("add");

        let replaced = store
            .update_embedding(
                &ChunkId::new("a"),
                EmbeddingRecord::new("a", vec![0.0, 3.0])
                    .with_content("new")
                    .with_metadata("v", 2),
                "c",
            )
            .await
            .expect("update");
        assert!(replaced);

        let got = store
            .get_by_id(&ChunkId::new("a"), "c")
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(got.content.as_deref(), Some("new"));
        assert_eq!(got.metadata["v"], 2);
        assert!((got.embedding[1] - 1.0).abs() < 1e-6);

        let info = store.get_collection_info("c").await.expect("info").expect("exists");
        assert_eq!(info.count, 2);
    }
}

#[tokio::test]
async fn test_dimension_mismatch_is_operation_failure() {
    for store in in_process_stores() {
        store
            .add_embeddings(vec![EmbeddingRecord::new("a", vec![1.0, 0.0])], "c")
            .await
            .expect("add");
        let err = store
            .add_embeddings(vec![EmbeddingRecord::new("b", vec![1.0, 0.0, 0.0])], "c")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OperationFailed { .. }), "{err}");
        assert!(err.to_string().contains("dimension mismatch"));
    }
}

#[tokio::test]
async fn test_ipld_three_record_scenario() {
    let router = Arc::new(MemoryRouter::new());
    let source = IpfsVectorStore::new(router.clone(), DistanceMetric::Cosine);
    let originals = vec![
        EmbeddingRecord::new("one", vec![1.0, 0.0, 0.0]).with_content("first"),
        EmbeddingRecord::new("two", vec![0.0, 1.0, 0.0]).with_content("second"),
        EmbeddingRecord::new("three", vec![0.0, 0.0, 1.0]).with_content("third"),
    ];
    source
        .add_embeddings(originals.clone(), "library")
        .await
        .expect("add");
    let root_cid = source
        .export_to_ipld("library")
        .await
        .expect("export")
        .expect("storage available");

    let fresh = IpfsVectorStore::new(router, DistanceMetric::Cosine);
    assert!(fresh.import_from_ipld(&root_cid, None).await.expect("import"));

    let info = fresh
        .get_collection_info("library")
        .await
        .expect("info")
        .expect("exists");
    assert_eq!(info.count, 3);
    assert_eq!(info.root_cid.as_deref(), Some(root_cid.as_str()));
    for original in &originals {
        let got = fresh
            .get_by_id(&original.chunk_id, "library")
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(got.content, original.content);
    }
}

#[tokio::test]
async fn test_manager_migration_between_persistent_stores() {
    let dir = TempDir::new().expect("tempdir");
    let config = VectorBridgeConfig::new()
        .with_data_dir(dir.path())
        .with_store(
            "local",
            StoreConfig::Local {
                path: Some(dir.path().join("local")),
                metric: DistanceMetric::Euclidean,
            },
        )
        .with_store(
            "archive",
            StoreConfig::Ipfs {
                blocks_dir: Some(dir.path().join("blocks")),
                metric: DistanceMetric::Euclidean,
            },
        );
    let manager = VectorStoreManager::from_config(&config);

    let source = manager.get_store("local").await.expect("store");
    let records: Vec<EmbeddingRecord> = (0..57u16)
        .map(|i| {
            EmbeddingRecord::new(format!("id-{i:02}"), vec![f32::from(i), 0.5, -1.0])
                .with_metadata("bucket", i % 3)
        })
        .collect();
    source
        .batch_add_embeddings(records, 20, "points")
        .await
        .expect("add");

    let report = manager
        .migrate("local", "archive", "points", None, Some(8), true)
        .await
        .expect("migrate");
    assert_eq!(report.migrated, 57);
    assert_eq!(report.batches, 8);
    assert_eq!(report.verified, Some(true));

    let filter = MetadataFilter::new().eq("bucket", 0);
    let results = manager
        .search_all(&[0.0, 0.5, -1.0], &["local", "archive"], 3, "points", Some(&filter))
        .await;
    for hits in results.values() {
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["id-00", "id-03", "id-06"]);
        assert!(hits.windows(2).all(|w| w[0].score <= w[1].score));
    }

    manager.close_all().await;
    let reopened = LocalVectorStore::open(dir.path().join("local"), DistanceMetric::Euclidean)
        .expect("reopen");
    let info = reopened
        .get_collection_info("points")
        .await
        .expect("info")
        .expect("persisted");
    assert_eq!(info.count, 57);
}

#[tokio::test]
async fn test_search_never_exceeds_top_k_and_orders_by_relevance() {
    for store in in_process_stores() {
        let records: Vec<EmbeddingRecord> = (1..=20u8)
            .map(|i| EmbeddingRecord::new(format!("r{i}"), vec![f32::from(i), 20.0 - f32::from(i)]))
            .collect();
        store.add_embeddings(records, "c").await.expect("add");
        for k in [0, 1, 5, 50] {
            let hits = store.search(&[1.0, 1.0], k, "c", None).await.expect("search");
            assert!(hits.len() <= k);
            assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        }
    }
}
