//! In-process vector backend.
//!
//! One append-only [`AnnIndex`] plus an id side-table per collection.
//!
//! # Tombstones
//!
//! The index cannot delete rows. `delete_by_id` removes the id mapping and
//! the record's metadata; the row stays in the index until [`LocalVectorStore::compact`]
//! rebuilds it. Search therefore pulls raw hits in widening windows
//! (`k`, `2k`, `4k`, …) and discards rows that map to no live id, until
//! `top_k` live hits are found or the index is exhausted.
//!
//! # Persistence
//!
//! With a data directory, each collection lives in `<data_dir>/<collection>/`
//! as `index.<ext>` plus `mapping.json`. The two files are written and read
//! together while holding the store's persistence lock; finding only one of
//! them is reported as corruption.

use super::common::{
    implicit_dimension, page_after, prepare_query, prepare_records, rank,
    validate_collection_name, validate_dimension,
};
use crate::models::{
    ChunkId, CollectionInfo, CollectionOptions, DistanceMetric, EmbeddingRecord, HealthStatus,
    Metadata, MetadataFilter, SearchResult,
};
use crate::observability::record_operation;
use crate::storage::ann::{AnnIndex, index_extension, load_index, new_index};
use crate::storage::traits::{RecordPage, VectorStore, elapsed_ms};
use crate::{Error, Result, current_timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};

const BACKEND: &str = "local";

/// Side-table file name.
const MAPPING_FILE: &str = "mapping.json";

/// Live record fields kept beside the index row.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    offset: u64,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    model_name: Option<String>,
}

/// Persisted side-table.
#[derive(Serialize, Deserialize)]
struct Mapping {
    dimension: usize,
    metric: DistanceMetric,
    created_at: u64,
    updated_at: u64,
    records: BTreeMap<ChunkId, StoredRecord>,
}

struct LocalCollection {
    dimension: usize,
    metric: DistanceMetric,
    created_at: u64,
    updated_at: u64,
    index: Box<dyn AnnIndex>,
    /// Live ids, sorted for stable listing.
    records: BTreeMap<ChunkId, StoredRecord>,
    /// Reverse map for resolving raw index hits.
    offsets: HashMap<u64, ChunkId>,
    dirty: bool,
}

impl LocalCollection {
    fn new(dimension: usize, metric: DistanceMetric) -> Result<Self> {
        let now = current_timestamp();
        Ok(Self {
            dimension,
            metric,
            created_at: now,
            updated_at: now,
            index: new_index(dimension, metric)?,
            records: BTreeMap::new(),
            offsets: HashMap::new(),
            dirty: true,
        })
    }

    fn info(&self, name: &str) -> CollectionInfo {
        let mut engine = Metadata::new();
        engine.insert("index_rows".to_string(), self.index.len().into());
        engine.insert("tombstones".to_string(), self.tombstones().into());
        engine.insert("index_kind".to_string(), index_extension().into());
        CollectionInfo {
            name: name.to_string(),
            dimension: self.dimension,
            metric: self.metric,
            count: self.records.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            root_cid: None,
            engine,
        }
    }

    fn tombstones(&self) -> usize {
        self.index.len().saturating_sub(self.records.len())
    }

    fn touch(&mut self) {
        self.updated_at = current_timestamp();
        self.dirty = true;
    }

    /// Appends an already prepared record, replacing any live entry with the same id.
    fn append(&mut self, record: EmbeddingRecord) -> Result<bool> {
        let replaced = self.remove(&record.chunk_id);
        let offset = self.index.add(&record.embedding)?;
        self.offsets.insert(offset, record.chunk_id.clone());
        self.records.insert(
            record.chunk_id,
            StoredRecord {
                offset,
                content: record.content,
                metadata: record.metadata,
                model_name: record.model_name,
            },
        );
        Ok(replaced)
    }

    /// Tombstones a record. Returns true if it was live.
    fn remove(&mut self, id: &ChunkId) -> bool {
        let Some(stored) = self.records.remove(id) else {
            return false;
        };
        self.offsets.remove(&stored.offset);
        true
    }

    fn record(&self, id: &ChunkId) -> Option<EmbeddingRecord> {
        let stored = self.records.get(id)?;
        let embedding = self.index.vector(stored.offset)?;
        Some(EmbeddingRecord {
            chunk_id: id.clone(),
            content: stored.content.clone(),
            embedding,
            metadata: stored.metadata.clone(),
            model_name: stored.model_name.clone(),
        })
    }

    fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>> {
        let total = self.index.len();
        if top_k == 0 || total == 0 || self.records.is_empty() {
            return Ok(Vec::new());
        }

        let mut window = top_k;
        loop {
            let raw = self.index.search(query, window)?;
            let exhausted = raw.len() < window || window >= total;

            let mut hits = Vec::with_capacity(top_k);
            for (offset, score) in raw {
                let Some(id) = self.offsets.get(&offset) else {
                    continue;
                };
                let Some(stored) = self.records.get(id) else {
                    continue;
                };
                if filter.is_some_and(|f| !f.matches(&stored.metadata)) {
                    continue;
                }
                hits.push(SearchResult {
                    chunk_id: id.clone(),
                    content: stored.content.clone(),
                    score,
                    metadata: stored.metadata.clone(),
                });
                if hits.len() == top_k {
                    break;
                }
            }

            if hits.len() >= top_k || exhausted {
                rank(&mut hits, self.metric, top_k);
                return Ok(hits);
            }
            window = window.saturating_mul(2).min(total);
        }
    }

    /// Rebuilds the index from live rows, dropping tombstoned rows.
    fn compact(&mut self) -> Result<usize> {
        let reclaimed = self.tombstones();
        if reclaimed == 0 {
            return Ok(0);
        }

        let mut index = new_index(self.dimension, self.metric)?;
        let mut offsets = HashMap::with_capacity(self.records.len());
        for (id, stored) in &mut self.records {
            let vector = self.index.vector(stored.offset).ok_or_else(|| Error::OperationFailed {
                operation: "compact".to_string(),
                cause: format!("row {} for '{id}' missing from index", stored.offset),
            })?;
            let offset = index.add(&vector)?;
            stored.offset = offset;
            offsets.insert(offset, id.clone());
        }

        self.index = index;
        self.offsets = offsets;
        self.dirty = true;
        Ok(reclaimed)
    }

    fn save(&mut self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).map_err(|e| Error::OperationFailed {
            operation: "create_collection_dir".to_string(),
            cause: format!("{}: {e}", dir.display()),
        })?;

        self.index
            .save(&dir.join(format!("index.{}", self.index.extension())))?;

        let mapping = Mapping {
            dimension: self.dimension,
            metric: self.metric,
            created_at: self.created_at,
            updated_at: self.updated_at,
            records: self.records.clone(),
        };
        let content = serde_json::to_string(&mapping).map_err(|e| Error::OperationFailed {
            operation: "serialize_mapping".to_string(),
            cause: e.to_string(),
        })?;
        fs::write(dir.join(MAPPING_FILE), content).map_err(|e| Error::OperationFailed {
            operation: "write_mapping".to_string(),
            cause: format!("{}: {e}", dir.display()),
        })?;

        self.dirty = false;
        Ok(())
    }

    /// Loads a collection directory. `Ok(None)` if it holds neither artifact.
    fn load(dir: &Path) -> Result<Option<Self>> {
        let index_path = dir.join(format!("index.{}", index_extension()));
        let mapping_path = dir.join(MAPPING_FILE);

        match (index_path.exists(), mapping_path.exists()) {
            (false, false) => return Ok(None),
            (true, true) => {},
            (has_index, _) => {
                let missing = if has_index { MAPPING_FILE } else { "index" };
                return Err(Error::OperationFailed {
                    operation: "load_collection".to_string(),
                    cause: format!("corrupt collection at {}: {missing} is missing", dir.display()),
                });
            },
        }

        let content = fs::read_to_string(&mapping_path).map_err(|e| Error::OperationFailed {
            operation: "read_mapping".to_string(),
            cause: format!("{}: {e}", mapping_path.display()),
        })?;
        let mapping: Mapping = serde_json::from_str(&content).map_err(|e| Error::OperationFailed {
            operation: "parse_mapping".to_string(),
            cause: format!("{}: {e}", mapping_path.display()),
        })?;
        let index = load_index(&index_path, mapping.dimension, mapping.metric)?;

        let mut offsets = HashMap::with_capacity(mapping.records.len());
        for (id, stored) in &mapping.records {
            if stored.offset >= index.len() as u64 {
                return Err(Error::OperationFailed {
                    operation: "load_collection".to_string(),
                    cause: format!(
                        "corrupt collection at {}: '{id}' points past the index end",
                        dir.display()
                    ),
                });
            }
            offsets.insert(stored.offset, id.clone());
        }

        Ok(Some(Self {
            dimension: mapping.dimension,
            metric: mapping.metric,
            created_at: mapping.created_at,
            updated_at: mapping.updated_at,
            index,
            records: mapping.records,
            offsets,
            dirty: false,
        }))
    }
}

/// In-process vector store.
///
/// # Example
///
/// ```rust,ignore
/// let store = LocalVectorStore::open("/var/lib/vectorbridge/local", DistanceMetric::Cosine)?;
/// store.add_embeddings(records, "docs").await?;
/// store.close().await?; // flushes dirty collections
/// ```
pub struct LocalVectorStore {
    data_dir: Option<PathBuf>,
    default_metric: DistanceMetric,
    collections: RwLock<HashMap<String, LocalCollection>>,
    persist_lock: Mutex<()>,
}

impl LocalVectorStore {
    /// Creates a store with no file persistence.
    #[must_use]
    pub fn in_memory(default_metric: DistanceMetric) -> Self {
        Self {
            data_dir: None,
            default_metric,
            collections: RwLock::new(HashMap::new()),
            persist_lock: Mutex::new(()),
        }
    }

    /// Opens a persistent store, loading every collection under `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read or a collection is corrupt.
    pub fn open(data_dir: impl Into<PathBuf>, default_metric: DistanceMetric) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir).map_err(|e| Error::OperationFailed {
            operation: "create_data_dir".to_string(),
            cause: format!("{}: {e}", data_dir.display()),
        })?;

        let collections = Self::load_all(&data_dir)?;
        tracing::info!(
            backend = BACKEND,
            path = %data_dir.display(),
            collections = collections.len(),
            "Opened local vector store"
        );

        Ok(Self {
            data_dir: Some(data_dir),
            default_metric,
            collections: RwLock::new(collections),
            persist_lock: Mutex::new(()),
        })
    }

    fn load_all(data_dir: &Path) -> Result<HashMap<String, LocalCollection>> {
        let entries = fs::read_dir(data_dir).map_err(|e| Error::OperationFailed {
            operation: "read_data_dir".to_string(),
            cause: format!("{}: {e}", data_dir.display()),
        })?;

        let mut collections = HashMap::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            if validate_collection_name(&name).is_err() {
                tracing::warn!(path = %path.display(), "Skipping directory with an invalid collection name");
                continue;
            }
            if let Some(collection) = LocalCollection::load(&path)? {
                collections.insert(name, collection);
            }
        }
        Ok(collections)
    }

    /// Returns the persistence directory, if any.
    #[must_use]
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Writes every dirty collection to disk.
    ///
    /// A no-op for in-memory stores.
    ///
    /// # Errors
    ///
    /// Returns an error if a collection cannot be written.
    pub async fn save(&self) -> Result<()> {
        let Some(dir) = &self.data_dir else {
            return Ok(());
        };
        let _persist = self.persist_lock.lock().await;
        let mut collections = self.collections.write().await;
        Self::save_dirty(dir, &mut collections)
    }

    /// Directory of a collection; the name must be a single plain segment.
    fn collection_dir(data_dir: &Path, name: &str) -> Result<PathBuf> {
        validate_collection_name(name)?;
        Ok(data_dir.join(name))
    }

    fn save_dirty(dir: &Path, collections: &mut HashMap<String, LocalCollection>) -> Result<()> {
        for (name, collection) in collections.iter_mut().filter(|(_, c)| c.dirty) {
            collection.save(&Self::collection_dir(dir, name)?)?;
            tracing::debug!(backend = BACKEND, collection = %name, "Saved collection");
        }
        Ok(())
    }

    /// Re-reads every collection from disk, discarding unsaved changes.
    ///
    /// # Errors
    ///
    /// Returns an error if a collection is corrupt.
    pub async fn load(&self) -> Result<()> {
        let Some(dir) = &self.data_dir else {
            return Ok(());
        };
        let _persist = self.persist_lock.lock().await;
        let loaded = Self::load_all(dir)?;
        *self.collections.write().await = loaded;
        Ok(())
    }

    /// Rebuilds a collection's index without tombstoned rows.
    ///
    /// Returns the number of rows reclaimed. Offsets are reassigned.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection does not exist or the rebuild fails.
    pub async fn compact(&self, collection: &str) -> Result<usize> {
        let mut collections = self.collections.write().await;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| Error::NotFound(format!("collection '{collection}'")))?;
        let reclaimed = coll.compact()?;
        tracing::info!(
            backend = BACKEND,
            collection = %collection,
            reclaimed,
            "Compacted collection"
        );
        Ok(reclaimed)
    }

    /// Number of index rows hidden by deletes or updates.
    pub async fn tombstone_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, LocalCollection::tombstones)
    }

    fn new_collection(
        collections: &mut HashMap<String, LocalCollection>,
        name: &str,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<()> {
        validate_collection_name(name)?;
        collections.insert(name.to_string(), LocalCollection::new(dimension, metric)?);
        tracing::info!(
            backend = BACKEND,
            collection = %name,
            dimension,
            metric = %metric,
            "Created collection"
        );
        Ok(())
    }
}

#[async_trait]
impl VectorStore for LocalVectorStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    async fn create_collection(
        &self,
        name: &str,
        dimension: usize,
        metric: DistanceMetric,
        options: &CollectionOptions,
    ) -> Result<bool> {
        validate_dimension(dimension)?;
        validate_collection_name(name)?;
        let mut collections = self.collections.write().await;
        if collections.contains_key(name) {
            if options.exist_ok {
                return Ok(false);
            }
            return Err(Error::AlreadyExists(name.to_string()));
        }
        Self::new_collection(&mut collections, name, dimension, metric)?;
        Ok(true)
    }

    async fn delete_collection(&self, name: &str) -> Result<bool> {
        validate_collection_name(name)?;
        let _persist = self.persist_lock.lock().await;
        let removed = self.collections.write().await.remove(name).is_some();

        if let Some(dir) = &self.data_dir {
            let path = Self::collection_dir(dir, name)?;
            if path.exists() {
                fs::remove_dir_all(&path).map_err(|e| Error::OperationFailed {
                    operation: "delete_collection".to_string(),
                    cause: format!("{}: {e}", path.display()),
                })?;
            }
        }
        if removed {
            tracing::info!(backend = BACKEND, collection = %name, "Deleted collection");
        }
        Ok(true)
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.collections.read().await.contains_key(name))
    }

    async fn add_embeddings(
        &self,
        mut records: Vec<EmbeddingRecord>,
        collection: &str,
    ) -> Result<Vec<ChunkId>> {
        let started = Instant::now();
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let result: Result<Vec<ChunkId>> = async move {
            let mut collections = self.collections.write().await;
            if !collections.contains_key(collection) {
                let dimension = implicit_dimension(&records, collection)?;
                Self::new_collection(&mut collections, collection, dimension, self.default_metric)?;
            }
            let coll = collections
                .get_mut(collection)
                .ok_or_else(|| Error::NotFound(format!("collection '{collection}'")))?;

            prepare_records(&mut records, collection, coll.dimension, coll.metric)?;

            let mut ids = Vec::with_capacity(records.len());
            for record in records {
                ids.push(record.chunk_id.clone());
                coll.append(record)?;
            }
            coll.touch();
            Ok(ids)
        }
        .await;

        record_operation(BACKEND, "add_embeddings", &result, started);
        if let Ok(ids) = &result {
            tracing::debug!(
                backend = BACKEND,
                collection = %collection,
                count = ids.len(),
                "Added embeddings"
            );
        }
        result
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        collection: &str,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>> {
        let started = Instant::now();
        let collections = self.collections.read().await;
        let Some(coll) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let result = prepare_query(query, collection, coll.dimension, coll.metric)
            .and_then(|q| coll.search(&q, top_k, filter));
        record_operation(BACKEND, "search", &result, started);
        result
    }

    async fn get_by_id(&self, id: &ChunkId, collection: &str) -> Result<Option<EmbeddingRecord>> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .and_then(|c| c.record(id)))
    }

    async fn delete_by_id(&self, id: &ChunkId, collection: &str) -> Result<bool> {
        let mut collections = self.collections.write().await;
        let Some(coll) = collections.get_mut(collection) else {
            return Ok(false);
        };
        let removed = coll.remove(id);
        if removed {
            coll.touch();
        }
        Ok(removed)
    }

    async fn update_embedding(
        &self,
        id: &ChunkId,
        mut record: EmbeddingRecord,
        collection: &str,
    ) -> Result<bool> {
        let mut collections = self.collections.write().await;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| Error::NotFound(format!("collection '{collection}'")))?;

        record.chunk_id = id.clone();
        let mut batch = [record];
        prepare_records(&mut batch, collection, coll.dimension, coll.metric)?;
        let [record] = batch;

        let replaced = coll.append(record)?;
        coll.touch();
        Ok(replaced)
    }

    async fn get_collection_info(&self, name: &str) -> Result<Option<CollectionInfo>> {
        Ok(self.collections.read().await.get(name).map(|c| c.info(name)))
    }

    async fn list_collections(&self) -> Result<BTreeSet<String>> {
        Ok(self.collections.read().await.keys().cloned().collect())
    }

    async fn list_records(
        &self,
        collection: &str,
        cursor: Option<String>,
        limit: usize,
    ) -> Result<RecordPage> {
        let collections = self.collections.read().await;
        let Some(coll) = collections.get(collection) else {
            return Ok(RecordPage::default());
        };

        let (ids, next_cursor) = page_after(coll.records.keys(), cursor.as_deref(), limit);
        let records = ids.into_iter().filter_map(|id| coll.record(id)).collect();
        Ok(RecordPage {
            records,
            next_cursor,
        })
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        let started = Instant::now();
        let collections = self.collections.read().await;
        let status = match &self.data_dir {
            Some(dir) if !dir.is_dir() => HealthStatus::unhealthy(
                BACKEND,
                format!("data directory {} is missing", dir.display()),
            ),
            _ => HealthStatus::healthy(BACKEND, Some(collections.len())),
        };
        Ok(status.with_latency_ms(elapsed_ms(started)))
    }

    async fn close(&self) -> Result<()> {
        self.save().await
    }
}

impl Drop for LocalVectorStore {
    fn drop(&mut self) {
        let Some(dir) = self.data_dir.clone() else {
            return;
        };
        if let Err(e) = Self::save_dirty(&dir, self.collections.get_mut()) {
            tracing::warn!(backend = BACKEND, error = %e, "Failed to save on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::l2_norm;
    use serde_json::json;
    use tempfile::TempDir;

    fn rec(id: &str, v: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord::new(id, v)
    }

    #[tokio::test]
    async fn test_create_collection_rules() {
        let store = LocalVectorStore::in_memory(DistanceMetric::Cosine);
        let opts = CollectionOptions::new();

        assert!(matches!(
            store.create_collection("c", 0, DistanceMetric::Cosine, &opts).await,
            Err(Error::InvalidDimension(0))
        ));
        assert!(store.create_collection("c", 3, DistanceMetric::Cosine, &opts).await.expect("create"));
        assert!(matches!(
            store.create_collection("c", 3, DistanceMetric::Cosine, &opts).await,
            Err(Error::AlreadyExists(_))
        ));
        assert!(
            !store
                .create_collection("c", 3, DistanceMetric::Cosine, &opts.clone().exist_ok())
                .await
                .expect("create")
        );
    }

    #[tokio::test]
    async fn test_add_creates_collection_from_first_record() {
        let store = LocalVectorStore::in_memory(DistanceMetric::Dot);
        let ids = store
            .add_embeddings(vec![rec("a", vec![1.0, 2.0]), rec("b", vec![3.0, 4.0])], "auto")
            .await
            .expect("add failed");
        assert_eq!(ids, vec![ChunkId::new("a"), ChunkId::new("b")]);

        let info = store.get_collection_info("auto").await.expect("info").expect("exists");
        assert_eq!(info.dimension, 2);
        assert_eq!(info.metric, DistanceMetric::Dot);
        assert_eq!(info.count, 2);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_operation_failed() {
        let store = LocalVectorStore::in_memory(DistanceMetric::Dot);
        store.add_embeddings(vec![rec("a", vec![1.0, 2.0])], "c").await.expect("add");
        let err = store
            .add_embeddings(vec![rec("b", vec![1.0, 2.0, 3.0])], "c")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OperationFailed { .. }));

        let err = store.search(&[1.0], 1, "c", None).await.unwrap_err();
        assert!(matches!(err, Error::OperationFailed { .. }));
    }

    #[tokio::test]
    async fn test_cosine_vectors_stored_normalized() {
        let store = LocalVectorStore::in_memory(DistanceMetric::Cosine);
        store.add_embeddings(vec![rec("a", vec![3.0, 4.0])], "c").await.expect("add");
        let got = store.get_by_id(&ChunkId::new("a"), "c").await.expect("get").expect("exists");
        assert!((l2_norm(&got.embedding) - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_search_skips_tombstones() {
        let store = LocalVectorStore::in_memory(DistanceMetric::Euclidean);
        let records = (0..10u8)
            .map(|i| rec(&format!("r{i}"), vec![f32::from(i), 0.0]))
            .collect();
        store.add_embeddings(records, "c").await.expect("add");

        // Remove the three nearest rows; the window must widen past them.
        for id in ["r0", "r1", "r2"] {
            assert!(store.delete_by_id(&ChunkId::new(id), "c").await.expect("delete"));
        }
        assert_eq!(store.tombstone_count("c").await, 3);

        let hits = store.search(&[0.0, 0.0], 2, "c", None).await.expect("search");
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["r3", "r4"]);
        assert!(hits[0].score <= hits[1].score);
    }

    #[tokio::test]
    async fn test_search_filter_applies_before_cut() {
        let store = LocalVectorStore::in_memory(DistanceMetric::Dot);
        store
            .add_embeddings(
                vec![
                    rec("a", vec![1.0, 0.0]).with_metadata("lang", "en"),
                    rec("b", vec![0.9, 0.0]).with_metadata("lang", "de"),
                    rec("c", vec![0.1, 0.0]).with_metadata("lang", "de"),
                ],
                "c",
            )
            .await
            .expect("add");

        let filter = MetadataFilter::new().eq("lang", json!("de"));
        let hits = store.search(&[1.0, 0.0], 2, "c", Some(&filter)).await.expect("search");
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_update_changes_offset_keeps_count() {
        let store = LocalVectorStore::in_memory(DistanceMetric::Dot);
        store.add_embeddings(vec![rec("a", vec![1.0, 0.0])], "c").await.expect("add");

        let replaced = store
            .update_embedding(
                &ChunkId::new("a"),
                rec("ignored", vec![0.0, 1.0]).with_content("new"),
                "c",
            )
            .await
            .expect("update");
        assert!(replaced);

        let got = store.get_by_id(&ChunkId::new("a"), "c").await.expect("get").expect("exists");
        assert_eq!(got.embedding, vec![0.0, 1.0]);
        assert_eq!(got.content.as_deref(), Some("new"));
        assert_eq!(store.get_collection_info("c").await.expect("info").expect("exists").count, 1);
        assert_eq!(store.tombstone_count("c").await, 1);
    }

    #[tokio::test]
    async fn test_compact_reclaims_rows() {
        let store = LocalVectorStore::in_memory(DistanceMetric::Dot);
        store
            .add_embeddings(vec![rec("a", vec![1.0, 0.0]), rec("b", vec![0.0, 1.0])], "c")
            .await
            .expect("add");
        store.delete_by_id(&ChunkId::new("a"), "c").await.expect("delete");

        assert_eq!(store.compact("c").await.expect("compact"), 1);
        assert_eq!(store.tombstone_count("c").await, 0);
        let hits = store.search(&[0.0, 1.0], 5, "c", None).await.expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id.as_str(), "b");
    }

    #[tokio::test]
    async fn test_list_records_pages_in_id_order() {
        let store = LocalVectorStore::in_memory(DistanceMetric::Dot);
        store
            .add_embeddings(
                vec![rec("c", vec![1.0]), rec("a", vec![1.0]), rec("b", vec![1.0])],
                "col",
            )
            .await
            .expect("add");

        let page = store.list_records("col", None, 2).await.expect("list");
        let ids: Vec<&str> = page.records.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let page = store.list_records("col", page.next_cursor, 2).await.expect("list");
        assert_eq!(page.records.len(), 1);
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_persistence_roundtrip() {
        let dir = TempDir::new().expect("tempdir");
        {
            let store = LocalVectorStore::open(dir.path(), DistanceMetric::Dot).expect("open");
            store
                .add_embeddings(
                    vec![rec("a", vec![1.0, 0.0]).with_metadata("k", 1), rec("b", vec![0.0, 1.0])],
                    "c",
                )
                .await
                .expect("add");
            store.delete_by_id(&ChunkId::new("b"), "c").await.expect("delete");
            store.close().await.expect("close");
        }

        let store = LocalVectorStore::open(dir.path(), DistanceMetric::Dot).expect("reopen");
        let got = store.get_by_id(&ChunkId::new("a"), "c").await.expect("get").expect("exists");
        assert_eq!(got.embedding, vec![1.0, 0.0]);
        assert_eq!(got.metadata.get("k"), Some(&json!(1)));
        assert!(store.get_by_id(&ChunkId::new("b"), "c").await.expect("get").is_none());
        assert_eq!(store.tombstone_count("c").await, 1);
    }

    #[tokio::test]
    async fn test_missing_mapping_is_corruption() {
        let dir = TempDir::new().expect("tempdir");
        {
            let store = LocalVectorStore::open(dir.path(), DistanceMetric::Dot).expect("open");
            store.add_embeddings(vec![rec("a", vec![1.0])], "c").await.expect("add");
            store.close().await.expect("close");
        }
        fs::remove_file(dir.path().join("c").join(MAPPING_FILE)).expect("remove");

        let err = LocalVectorStore::open(dir.path(), DistanceMetric::Dot).err().expect("must fail");
        assert!(err.to_string().contains("corrupt collection"));
    }

    #[tokio::test]
    async fn test_collection_names_cannot_escape_data_dir() {
        let root = TempDir::new().expect("tempdir");
        let data = root.path().join("data");
        let victim = root.path().join("victim");
        fs::create_dir_all(&victim).expect("mkdir");
        fs::write(victim.join("keep.txt"), "x").expect("write");

        let store = LocalVectorStore::open(&data, DistanceMetric::Cosine).expect("open");
        for name in ["../victim", "/tmp/elsewhere", "a/b", ""] {
            let err = store
                .create_collection(name, 2, DistanceMetric::Cosine, &CollectionOptions::new())
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "{name}: {err}");
        }

        let err = store.delete_collection("../victim").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        let err = store
            .add_embeddings(vec![rec("a", vec![1.0, 0.0])], "../victim")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        store.close().await.expect("close");
        assert!(victim.join("keep.txt").exists());
        assert!(!root.path().join("victim").join(MAPPING_FILE).exists());
    }

    #[tokio::test]
    async fn test_delete_collection_absent_is_ok() {
        let store = LocalVectorStore::in_memory(DistanceMetric::Dot);
        assert!(store.delete_collection("nope").await.expect("delete"));
        assert!(store.search(&[1.0], 3, "nope", None).await.expect("search").is_empty());
        assert!(store.get_by_id(&ChunkId::new("x"), "nope").await.expect("get").is_none());
    }
}
