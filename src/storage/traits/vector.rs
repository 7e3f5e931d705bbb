//! Vector store trait.
//!
//! The uniform contract every backend adapter satisfies.
//!
//! # Available Implementations
//!
//! | Backend | Use Case | Configuration |
//! |---------|----------|---------------|
//! | `LocalVectorStore` | In-process append-only index | Default, no external deps |
//! | `QdrantVectorStore` | Client-server vector service | Requires a Qdrant server |
//! | `ElasticsearchVectorStore` | Search cluster with `dense_vector` | Requires Elasticsearch 8.11+ |
//! | `IpfsVectorStore` | Content-addressed blocks + local index | Optional router |
//!
//! # Usage Example
//!
//! ```rust,ignore
//! use vectorbridge::storage::vector::LocalVectorStore;
//! use vectorbridge::{DistanceMetric, EmbeddingRecord, VectorStore};
//!
//! let store = LocalVectorStore::in_memory(DistanceMetric::Cosine);
//! store.add_embeddings(records, "docs").await?;
//!
//! // Scores are compared in the metric's own direction.
//! let hits = store
//!     .similarity_search(&query, 10, "docs", Some(0.75), None)
//!     .await?;
//! ```

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::collections::BTreeSet;
use std::time::Instant;

use crate::Result;
use crate::models::{
    ChunkId, CollectionInfo, CollectionOptions, DistanceMetric, EmbeddingRecord, HealthStatus,
    MetadataFilter, SearchResult,
};

/// One page of records returned by [`VectorStore::list_records`].
#[derive(Debug, Clone, Default)]
pub struct RecordPage {
    /// Records in the backend's stable listing order.
    pub records: Vec<EmbeddingRecord>,
    /// Cursor for the next page; `None` when the listing is exhausted.
    pub next_cursor: Option<String>,
}

/// Trait for vector storage backends.
///
/// All operations are asynchronous and take `&self`; implementations use
/// interior mutability so stores can be shared as `Arc<dyn VectorStore>`.
///
/// # Concurrency
///
/// One logical writer per collection is assumed. Adapters guard their state
/// for memory safety only: interleaved add/delete/update sequences on the
/// same collection need external serialization to be linearizable. Reads
/// may run concurrently and observe slightly stale state.
///
/// # Dimensionality
///
/// A collection's dimension is fixed at creation. Records whose embedding
/// length differs are rejected with [`crate::Error::OperationFailed`].
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short backend identifier used in logs and health reports.
    fn backend_name(&self) -> &'static str;

    /// Creates a collection.
    ///
    /// Returns `Ok(true)` if created, `Ok(false)` if it already existed and
    /// `options.exist_ok` was set.
    ///
    /// # Errors
    ///
    /// `InvalidDimension` if `dimension == 0`, `AlreadyExists` if present.
    async fn create_collection(
        &self,
        name: &str,
        dimension: usize,
        metric: DistanceMetric,
        options: &CollectionOptions,
    ) -> Result<bool>;

    /// Deletes a collection. Deleting an absent collection returns `Ok(true)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the deletion.
    async fn delete_collection(&self, name: &str) -> Result<bool>;

    /// Returns true if the collection exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be queried.
    async fn collection_exists(&self, name: &str) -> Result<bool>;

    /// Adds records and returns their ids in input order.
    ///
    /// Creates the collection from the first record's dimension when absent.
    ///
    /// # Errors
    ///
    /// Returns an error on dimension mismatch or engine rejection.
    async fn add_embeddings(
        &self,
        records: Vec<EmbeddingRecord>,
        collection: &str,
    ) -> Result<Vec<ChunkId>>;

    /// Returns at most `top_k` results ordered by decreasing relevance.
    ///
    /// Filters are applied before the `top_k` cut. A missing collection
    /// yields an empty result.
    ///
    /// # Errors
    ///
    /// Returns an error on query dimension mismatch or engine failure.
    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        collection: &str,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>>;

    /// Fetches a record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be queried.
    async fn get_by_id(&self, id: &ChunkId, collection: &str) -> Result<Option<EmbeddingRecord>>;

    /// Deletes a record. Returns `Ok(true)` if something was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the deletion.
    async fn delete_by_id(&self, id: &ChunkId, collection: &str) -> Result<bool>;

    /// Replaces a record; equivalent to delete-then-add under the same id.
    ///
    /// The record keeps `id` regardless of `record.chunk_id`.
    ///
    /// # Errors
    ///
    /// Returns an error on dimension mismatch or engine rejection.
    async fn update_embedding(
        &self,
        id: &ChunkId,
        record: EmbeddingRecord,
        collection: &str,
    ) -> Result<bool>;

    /// Returns the collection manifest, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be queried.
    async fn get_collection_info(&self, name: &str) -> Result<Option<CollectionInfo>>;

    /// Lists collection names.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be queried.
    async fn list_collections(&self) -> Result<BTreeSet<String>>;

    /// Lists live records continuing from an opaque `cursor`, in a stable order.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be queried.
    async fn list_records(
        &self,
        collection: &str,
        cursor: Option<String>,
        limit: usize,
    ) -> Result<RecordPage>;

    /// Adds records in groups of `batch_size`, accumulating ids in input order.
    ///
    /// # Errors
    ///
    /// Stops at the first failing batch; earlier batches stay written.
    async fn batch_add_embeddings(
        &self,
        records: Vec<EmbeddingRecord>,
        batch_size: usize,
        collection: &str,
    ) -> Result<Vec<ChunkId>> {
        let batch_size = batch_size.max(1);
        let mut ids = Vec::with_capacity(records.len());
        let mut remaining = records.into_iter().peekable();

        while remaining.peek().is_some() {
            let batch: Vec<EmbeddingRecord> = remaining.by_ref().take(batch_size).collect();
            let batch_ids = self.add_embeddings(batch, collection).await?;
            ids.extend(batch_ids);
        }

        Ok(ids)
    }

    /// Searches and keeps only results passing `score_threshold`.
    ///
    /// The comparison direction comes from the collection's metric:
    /// similarities must be at least the threshold, distances at most.
    ///
    /// # Errors
    ///
    /// Returns an error if the search fails.
    async fn similarity_search(
        &self,
        query: &[f32],
        top_k: usize,
        collection: &str,
        score_threshold: Option<f32>,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>> {
        let results = self.search(query, top_k, collection, filter).await?;
        let Some(threshold) = score_threshold else {
            return Ok(results);
        };

        let metric = self
            .get_collection_info(collection)
            .await?
            .map_or_else(DistanceMetric::default, |info| info.metric);

        Ok(results
            .into_iter()
            .filter(|r| metric.passes_threshold(r.score, threshold))
            .collect())
    }

    /// Streams a collection in batches of at most `batch_size` records.
    ///
    /// Pages are read lazily, so memory stays bounded by one batch. Writes
    /// landing behind the cursor while the stream is consumed are not seen.
    fn export_collection<'a>(
        &'a self,
        collection: &'a str,
        batch_size: usize,
    ) -> BoxStream<'a, Result<Vec<EmbeddingRecord>>> {
        let batch_size = batch_size.max(1);
        futures::stream::try_unfold(Some(None), move |state: Option<Option<String>>| async move {
            let Some(cursor) = state else {
                return Ok(None);
            };
            let page = self.list_records(collection, cursor, batch_size).await?;
            if page.records.is_empty() {
                return Ok(None);
            }
            let next = page.next_cursor.map(Some);
            Ok(Some((page.records, next)))
        })
        .boxed()
    }

    /// Checks that the engine answers.
    ///
    /// # Errors
    ///
    /// Implementations report failures inside the status; errors are reserved
    /// for the check itself failing unexpectedly.
    async fn health_check(&self) -> Result<HealthStatus> {
        let started = Instant::now();
        let status = match self.list_collections().await {
            Ok(names) => HealthStatus::healthy(self.backend_name(), Some(names.len())),
            Err(e) => HealthStatus::unhealthy(self.backend_name(), e),
        };
        Ok(status.with_latency_ms(elapsed_ms(started)))
    }

    /// Flushes pending state and releases resources.
    ///
    /// # Errors
    ///
    /// Returns an error if pending state cannot be flushed.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Milliseconds elapsed since `started`, saturating.
#[must_use]
pub fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
