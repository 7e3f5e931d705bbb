//! Cross-backend collection migration.

use crate::models::CollectionOptions;
use crate::observability::record_migrated;
use crate::storage::VectorStore;
use crate::storage::traits::elapsed_ms;
use crate::{Error, Result};
use futures::TryStreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Outcome of one [`VectorBridge::migrate_collection`] run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Source collection.
    pub collection: String,
    /// Target collection.
    pub target_collection: String,
    /// Records accepted by the target.
    pub migrated: usize,
    /// Batches written.
    pub batches: usize,
    /// Source count read before streaming.
    pub source_count: usize,
    /// Target count after streaming, when verified.
    pub target_count: Option<usize>,
    /// `Some(false)` when verification found a count mismatch.
    pub verified: Option<bool>,
    /// Wall-clock duration of the run.
    pub elapsed_ms: u64,
}

/// Streams collections from one store into another.
///
/// # Consistency
///
/// Migration reads the source page by page while it may still be written
/// to. Records present when the export starts are copied at least once;
/// records added, updated or deleted behind the export cursor may or may not
/// be reflected in the target. The result is not a snapshot.
///
/// Batches already accepted by the target are never rolled back, whether
/// the run fails later, is cancelled by the caller's timeout, or fails
/// verification.
pub struct VectorBridge {
    source: Arc<dyn VectorStore>,
    target: Arc<dyn VectorStore>,
    source_name: String,
    target_name: String,
}

impl VectorBridge {
    /// Creates a bridge between two stores.
    ///
    /// The names label logs and metrics.
    #[must_use]
    pub fn new(
        source: Arc<dyn VectorStore>,
        target: Arc<dyn VectorStore>,
        source_name: impl Into<String>,
        target_name: impl Into<String>,
    ) -> Self {
        Self {
            source,
            target,
            source_name: source_name.into(),
            target_name: target_name.into(),
        }
    }

    /// Source store name.
    #[must_use]
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Target store name.
    #[must_use]
    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    /// Copies `name` from the source into `target_name` (default: same name).
    ///
    /// The target collection is created with the source's dimension and
    /// metric if it does not exist. With `verify`, the target count is
    /// compared against the source count read up front; a mismatch is
    /// logged and reported in [`MigrationReport::verified`], not raised.
    ///
    /// # Errors
    ///
    /// `NotFound` if the source collection is absent, `OperationFailed` if
    /// an existing target collection has another dimension or metric, or the
    /// first failing read or write.
    pub async fn migrate_collection(
        &self,
        name: &str,
        target_name: Option<&str>,
        batch_size: usize,
        verify: bool,
    ) -> Result<MigrationReport> {
        let started = Instant::now();
        let target_collection = target_name.unwrap_or(name);

        let info = self
            .source
            .get_collection_info(name)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("collection '{name}' in store '{}'", self.source_name))
            })?;

        self.target
            .create_collection(
                target_collection,
                info.dimension,
                info.metric,
                &CollectionOptions::new().exist_ok(),
            )
            .await?;
        if let Some(existing) = self.target.get_collection_info(target_collection).await? {
            if existing.dimension != info.dimension {
                return Err(Error::OperationFailed {
                    operation: "migrate_collection".to_string(),
                    cause: format!(
                        "target collection '{target_collection}' has dimension {}, source has {}",
                        existing.dimension, info.dimension
                    ),
                });
            }
            if existing.metric != info.metric {
                return Err(Error::OperationFailed {
                    operation: "migrate_collection".to_string(),
                    cause: format!(
                        "target collection '{target_collection}' uses metric {}, source uses {}",
                        existing.metric, info.metric
                    ),
                });
            }
        }

        tracing::info!(
            source = %self.source_name,
            target = %self.target_name,
            collection = %name,
            target_collection = %target_collection,
            count = info.count,
            "Starting migration"
        );

        let mut migrated = 0;
        let mut batches = 0;
        let mut stream = self.source.export_collection(name, batch_size);
        while let Some(batch) = stream.try_next().await? {
            let written = self.target.add_embeddings(batch, target_collection).await?;
            migrated += written.len();
            batches += 1;
            record_migrated(&self.source_name, &self.target_name, written.len());
            tracing::debug!(
                collection = %name,
                batch = batches,
                count = written.len(),
                total = migrated,
                "Migrated batch"
            );
        }

        let mut report = MigrationReport {
            collection: name.to_string(),
            target_collection: target_collection.to_string(),
            migrated,
            batches,
            source_count: info.count,
            target_count: None,
            verified: None,
            elapsed_ms: 0,
        };

        if verify {
            let target_count = self
                .target
                .get_collection_info(target_collection)
                .await?
                .map_or(0, |i| i.count);
            let matches = target_count == info.count;
            if !matches {
                tracing::warn!(
                    collection = %name,
                    source_count = info.count,
                    target_count,
                    "Migration verification found a count mismatch"
                );
            }
            report.target_count = Some(target_count);
            report.verified = Some(matches);
        }

        report.elapsed_ms = elapsed_ms(started);
        tracing::info!(
            collection = %name,
            migrated = report.migrated,
            batches = report.batches,
            elapsed_ms = report.elapsed_ms,
            "Migration finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkId, DistanceMetric, EmbeddingRecord};
    use crate::storage::vector::{IpfsVectorStore, LocalVectorStore};

    fn records(n: u16) -> Vec<EmbeddingRecord> {
        (0..n)
            .map(|i| {
                EmbeddingRecord::new(format!("r{i:03}"), vec![f32::from(i) + 1.0, 1.0])
                    .with_content(format!("record {i}"))
            })
            .collect()
    }

    #[tokio::test]
    async fn test_migrates_every_record_in_batches() {
        let source = Arc::new(LocalVectorStore::in_memory(DistanceMetric::Euclidean));
        let target = Arc::new(IpfsVectorStore::local_only(DistanceMetric::Cosine));
        source.add_embeddings(records(25), "docs").await.expect("add");

        let bridge = VectorBridge::new(source, target.clone(), "local", "ipfs");
        let report = bridge
            .migrate_collection("docs", Some("copy"), 10, true)
            .await
            .expect("migrate");

        assert_eq!(report.migrated, 25);
        assert_eq!(report.batches, 3);
        assert_eq!(report.verified, Some(true));
        let info = target.get_collection_info("copy").await.expect("info").expect("exists");
        assert_eq!(info.metric, DistanceMetric::Euclidean);
        let got = target.get_by_id(&ChunkId::new("r007"), "copy").await.expect("get");
        assert_eq!(got.and_then(|r| r.content).as_deref(), Some("record 7"));
    }

    #[tokio::test]
    async fn test_missing_source_collection() {
        let bridge = VectorBridge::new(
            Arc::new(LocalVectorStore::in_memory(DistanceMetric::Cosine)),
            Arc::new(LocalVectorStore::in_memory(DistanceMetric::Cosine)),
            "a",
            "b",
        );
        assert!(matches!(
            bridge.migrate_collection("nope", None, 10, true).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_verify_mismatch_is_reported_not_raised() {
        let source = Arc::new(LocalVectorStore::in_memory(DistanceMetric::Dot));
        let target = Arc::new(LocalVectorStore::in_memory(DistanceMetric::Dot));
        source.add_embeddings(records(3), "docs").await.expect("add");
        target
            .add_embeddings(vec![EmbeddingRecord::new("extra", vec![0.0, 1.0])], "docs")
            .await
            .expect("add");

        let bridge = VectorBridge::new(source, target, "a", "b");
        let report = bridge.migrate_collection("docs", None, 2, true).await.expect("migrate");
        assert_eq!(report.migrated, 3);
        assert_eq!(report.target_count, Some(4));
        assert_eq!(report.verified, Some(false));
    }

    #[tokio::test]
    async fn test_dimension_conflict_in_target() {
        let source = Arc::new(LocalVectorStore::in_memory(DistanceMetric::Dot));
        let target = Arc::new(LocalVectorStore::in_memory(DistanceMetric::Dot));
        source.add_embeddings(records(1), "docs").await.expect("add");
        target
            .add_embeddings(vec![EmbeddingRecord::new("x", vec![0.0; 3])], "docs")
            .await
            .expect("add");

        let bridge = VectorBridge::new(source, target, "a", "b");
        assert!(matches!(
            bridge.migrate_collection("docs", None, 10, false).await,
            Err(Error::OperationFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_metric_conflict_in_target() {
        let source = Arc::new(LocalVectorStore::in_memory(DistanceMetric::Euclidean));
        let target = Arc::new(LocalVectorStore::in_memory(DistanceMetric::Cosine));
        source.add_embeddings(records(2), "docs").await.expect("add");
        target
            .add_embeddings(vec![EmbeddingRecord::new("x", vec![0.0, 1.0])], "docs")
            .await
            .expect("add");

        let bridge = VectorBridge::new(source, target.clone(), "a", "b");
        let err = bridge.migrate_collection("docs", None, 10, false).await.unwrap_err();
        assert!(matches!(err, Error::OperationFailed { .. }), "{err}");
        assert!(err.to_string().contains("metric"));
        let info = target.get_collection_info("docs").await.expect("info").expect("exists");
        assert_eq!(info.count, 1);
    }
}
