//! Content-addressed vector backend.
//!
//! Records are searched through an in-process [`FlatIndex`] per collection
//! and, when the injected [`Router`] offers storage, also written as
//! canonical JSON blocks whose CIDs are tracked beside each record.
//!
//! Without storage the store runs local-only: adds still succeed, and
//! [`IpfsVectorStore::export_to_ipld`] / [`IpfsVectorStore::import_from_ipld`]
//! return `None` / `false` with a warning.
//!
//! Updates and deletes never touch stored blocks. The superseded CIDs are
//! kept per collection and listed by [`IpfsVectorStore::orphaned_cids`].
//!
//! Over a persistent router, [`VectorStore::close`] exports every collection
//! and saves the root CIDs through the router; [`IpfsVectorStore::open`]
//! imports them again.

mod ipld;
mod router;

pub use ipld::{
    MetadataBlock, ROOT_TYPE, ROOT_VERSION, RecordBlock, RootBlock, compute_cid, parse_block,
    to_canonical_json,
};
pub use router::{FsBlockRouter, MemoryRouter, NullRouter, Router};

use super::common::{
    implicit_dimension, page_after, prepare_query, prepare_records, rank, validate_dimension,
};
use crate::models::{
    ChunkId, CollectionInfo, CollectionOptions, DistanceMetric, EmbeddingRecord, Metadata,
    MetadataFilter, SearchResult,
};
use crate::observability::record_operation;
use crate::storage::ann::{AnnIndex, FlatIndex};
use crate::storage::traits::{RecordPage, VectorStore};
use crate::{Error, Result, current_timestamp};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

const BACKEND: &str = "ipfs";

#[derive(Debug, Clone)]
struct IpfsRecord {
    offset: u64,
    content: Option<String>,
    metadata: Metadata,
    model_name: Option<String>,
    stored_at: u64,
    cid: Option<String>,
}

/// A prepared record waiting to be appended.
struct Staged {
    record: EmbeddingRecord,
    stored_at: u64,
    cid: Option<String>,
}

struct IpfsCollection {
    dimension: usize,
    metric: DistanceMetric,
    created_at: u64,
    updated_at: u64,
    index: FlatIndex,
    records: BTreeMap<ChunkId, IpfsRecord>,
    offsets: HashMap<u64, ChunkId>,
    orphans: Vec<String>,
    root_cid: Option<String>,
}

impl IpfsCollection {
    fn new(dimension: usize, metric: DistanceMetric, created_at: u64) -> Self {
        Self {
            dimension,
            metric,
            created_at,
            updated_at: created_at,
            index: FlatIndex::new(dimension, metric),
            records: BTreeMap::new(),
            offsets: HashMap::new(),
            orphans: Vec::new(),
            root_cid: None,
        }
    }

    fn info(&self, name: &str) -> CollectionInfo {
        let mut engine = Metadata::new();
        engine.insert(
            "stored_blocks".to_string(),
            self.records.values().filter(|r| r.cid.is_some()).count().into(),
        );
        engine.insert("orphaned_blocks".to_string(), self.orphans.len().into());
        CollectionInfo {
            name: name.to_string(),
            dimension: self.dimension,
            metric: self.metric,
            count: self.records.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            root_cid: self.root_cid.clone(),
            engine,
        }
    }

    /// Hides a record; its block CID becomes an orphan.
    fn remove(&mut self, id: &ChunkId) -> bool {
        let Some(stored) = self.records.remove(id) else {
            return false;
        };
        self.offsets.remove(&stored.offset);
        self.orphans.extend(stored.cid);
        true
    }

    fn append(&mut self, staged: Staged) -> Result<bool> {
        let Staged {
            record,
            stored_at,
            cid,
        } = staged;
        let replaced = self.remove(&record.chunk_id);
        let offset = self.index.add(&record.embedding)?;
        self.offsets.insert(offset, record.chunk_id.clone());
        self.records.insert(
            record.chunk_id,
            IpfsRecord {
                offset,
                content: record.content,
                metadata: record.metadata,
                model_name: record.model_name,
                stored_at,
                cid,
            },
        );
        self.updated_at = current_timestamp();
        Ok(replaced)
    }

    fn record(&self, id: &ChunkId) -> Option<EmbeddingRecord> {
        let stored = self.records.get(id)?;
        Some(EmbeddingRecord {
            chunk_id: id.clone(),
            content: stored.content.clone(),
            embedding: self.index.vector(stored.offset)?,
            metadata: stored.metadata.clone(),
            model_name: stored.model_name.clone(),
        })
    }

    fn block(&self, id: &ChunkId) -> Option<RecordBlock> {
        let stored = self.records.get(id)?;
        Some(RecordBlock {
            id: id.as_str().to_string(),
            vector: self.index.vector(stored.offset)?,
            text: stored.content.clone(),
            metadata: stored.metadata.clone(),
            stored_at: stored.stored_at,
        })
    }

    fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>> {
        if top_k == 0 || self.records.is_empty() {
            return Ok(Vec::new());
        }
        // The flat index is exact, so one pass over every row suffices.
        let raw = self.index.search(query, self.index.len())?;
        let mut hits: Vec<SearchResult> = raw
            .into_iter()
            .filter_map(|(offset, score)| {
                let id = self.offsets.get(&offset)?;
                let stored = self.records.get(id)?;
                if filter.is_some_and(|f| !f.matches(&stored.metadata)) {
                    return None;
                }
                Some(SearchResult {
                    chunk_id: id.clone(),
                    content: stored.content.clone(),
                    score,
                    metadata: stored.metadata.clone(),
                })
            })
            .take(top_k)
            .collect();
        rank(&mut hits, self.metric, top_k);
        Ok(hits)
    }
}

/// Content-addressed vector store.
///
/// # Example
///
/// ```rust,ignore
/// let router = Arc::new(MemoryRouter::new().with_embedder(Arc::new(HashEmbedder::new(64))));
/// let store = IpfsVectorStore::new(router, DistanceMetric::Cosine);
/// store
///     .add_embeddings(vec![EmbeddingRecord::from_text("a", "hello")], "docs")
///     .await?;
/// let root = store.export_to_ipld("docs").await?;
/// ```
pub struct IpfsVectorStore {
    router: Arc<dyn Router>,
    default_metric: DistanceMetric,
    collections: RwLock<HashMap<String, IpfsCollection>>,
}

impl IpfsVectorStore {
    /// Creates a store over `router`.
    #[must_use]
    pub fn new(router: Arc<dyn Router>, default_metric: DistanceMetric) -> Self {
        Self {
            router,
            default_metric,
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a store over `router` and restores the collections whose
    /// roots the router saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the saved roots cannot be read or a saved
    /// collection cannot be imported.
    pub async fn open(router: Arc<dyn Router>, default_metric: DistanceMetric) -> Result<Self> {
        let store = Self::new(router, default_metric);
        let roots = store.router.load_roots().await?;
        for (name, root_cid) in &roots {
            store.import_from_ipld(root_cid, Some(name)).await?;
        }
        if !roots.is_empty() {
            tracing::info!(
                backend = BACKEND,
                collections = roots.len(),
                "Restored collections from saved roots"
            );
        }
        Ok(store)
    }

    /// Exports every collection and saves the name to root CID map.
    ///
    /// Does nothing unless the router is persistent.
    ///
    /// # Errors
    ///
    /// Returns an error if an export or the save fails.
    pub async fn persist(&self) -> Result<()> {
        if !self.router.is_persistent() {
            return Ok(());
        }
        let names: Vec<String> = self.collections.read().await.keys().cloned().collect();
        let mut roots = BTreeMap::new();
        for name in names {
            match self.export_to_ipld(&name).await {
                Ok(Some(root_cid)) => {
                    roots.insert(name, root_cid);
                },
                Ok(None) | Err(Error::NotFound(_)) => {},
                Err(e) => return Err(e),
            }
        }
        self.router.save_roots(&roots).await?;
        tracing::debug!(backend = BACKEND, collections = roots.len(), "Saved collection roots");
        Ok(())
    }

    /// Creates a local-only store.
    #[must_use]
    pub fn local_only(default_metric: DistanceMetric) -> Self {
        Self::new(Arc::new(NullRouter), default_metric)
    }

    /// The injected router.
    #[must_use]
    pub fn router(&self) -> &Arc<dyn Router> {
        &self.router
    }

    /// Fills in embeddings for text-only records through the router.
    async fn embed_missing(&self, records: &mut [EmbeddingRecord]) -> Result<()> {
        let missing: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.embedding.is_empty())
            .map(|(i, _)| i)
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        if !self.router.is_embeddings_available() {
            return Err(Error::InvalidInput(format!(
                "{} record(s) have no embedding and the router cannot generate them",
                missing.len()
            )));
        }
        let mut texts = Vec::with_capacity(missing.len());
        for &i in &missing {
            let record = &records[i];
            let text = record.content.clone().ok_or_else(|| {
                Error::InvalidInput(format!(
                    "record '{}' has neither an embedding nor content",
                    record.chunk_id
                ))
            })?;
            texts.push(text);
        }

        let vectors = self.router.generate_embeddings(&texts).await?;
        if vectors.len() != missing.len() {
            return Err(Error::OperationFailed {
                operation: "generate_embeddings".to_string(),
                cause: format!("expected {} embeddings, got {}", missing.len(), vectors.len()),
            });
        }
        let model = self.router.embedding_model();
        for (i, vector) in missing.into_iter().zip(vectors) {
            records[i].embedding = vector;
            if records[i].model_name.is_none() {
                records[i].model_name.clone_from(&model);
            }
        }
        Ok(())
    }

    /// Writes a record block when storage is available.
    async fn store_block(&self, block: &RecordBlock) -> Result<Option<String>> {
        if !self.router.is_ipfs_available() {
            return Ok(None);
        }
        let bytes = to_canonical_json(block)?;
        self.router.store_to_ipfs(bytes, true).await.map(Some)
    }

    async fn stage(&self, records: Vec<EmbeddingRecord>) -> Result<Vec<Staged>> {
        let stored_at = current_timestamp();
        let mut staged = Vec::with_capacity(records.len());
        for record in records {
            let block = RecordBlock {
                id: record.chunk_id.as_str().to_string(),
                vector: record.embedding.clone(),
                text: record.content.clone(),
                metadata: record.metadata.clone(),
                stored_at,
            };
            let cid = self.store_block(&block).await?;
            staged.push(Staged {
                record,
                stored_at,
                cid,
            });
        }
        Ok(staged)
    }

    async fn schema(&self, collection: &str) -> Option<(usize, DistanceMetric)> {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| (c.dimension, c.metric))
    }

    /// Exports a collection as a block DAG and returns the root CID.
    ///
    /// Records added while storage was unavailable are written now. The
    /// root CID is also recorded as the collection's `root_cid`.
    ///
    /// Returns `Ok(None)` when the router cannot store blocks.
    ///
    /// # Errors
    ///
    /// `NotFound` if the collection does not exist, or any router failure.
    pub async fn export_to_ipld(&self, collection: &str) -> Result<Option<String>> {
        if !self.router.is_ipfs_available() {
            tracing::warn!(
                backend = BACKEND,
                collection = %collection,
                "Block storage unavailable, skipping export"
            );
            return Ok(None);
        }

        let (pending, mut cids, manifest) = {
            let collections = self.collections.read().await;
            let coll = collections
                .get(collection)
                .ok_or_else(|| Error::NotFound(format!("collection '{collection}'")))?;
            let mut pending = Vec::new();
            let mut cids = BTreeMap::new();
            for (id, stored) in &coll.records {
                match &stored.cid {
                    Some(cid) => {
                        cids.insert(id.clone(), cid.clone());
                    },
                    None => pending.extend(coll.block(id)),
                }
            }
            let manifest = MetadataBlock {
                name: collection.to_string(),
                dimension: coll.dimension,
                metric: coll.metric,
                count: coll.records.len(),
                created_at: coll.created_at,
                updated_at: coll.updated_at,
            };
            (pending, cids, manifest)
        };

        let mut written = Vec::with_capacity(pending.len());
        for block in pending {
            let id = ChunkId::new(block.id.clone());
            if let Some(cid) = self.store_block(&block).await? {
                cids.insert(id.clone(), cid.clone());
                written.push((id, cid));
            }
        }

        let metadata_cid = self
            .router
            .store_to_ipfs(to_canonical_json(&manifest)?, true)
            .await?;
        let root = RootBlock::new(metadata_cid, cids.into_values().collect(), manifest.created_at);
        let root_cid = self
            .router
            .store_to_ipfs(to_canonical_json(&root)?, true)
            .await?;

        let mut collections = self.collections.write().await;
        if let Some(coll) = collections.get_mut(collection) {
            for (id, cid) in written {
                if let Some(stored) = coll.records.get_mut(&id) {
                    stored.cid = Some(cid);
                }
            }
            coll.root_cid = Some(root_cid.clone());
        }
        tracing::info!(
            backend = BACKEND,
            collection = %collection,
            count = root.vectors_cids.len(),
            root_cid = %root_cid,
            "Exported collection"
        );
        Ok(Some(root_cid))
    }

    /// Rebuilds a collection from an exported root.
    ///
    /// The collection takes the name recorded in the metadata block unless
    /// `target` is given. Record ingest times and block CIDs are preserved,
    /// so re-exporting yields the same root.
    ///
    /// Returns `Ok(false)` when the router cannot load blocks.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for malformed blocks, `AlreadyExists` if the target
    /// collection exists, or any router failure.
    pub async fn import_from_ipld(&self, root_cid: &str, target: Option<&str>) -> Result<bool> {
        if !self.router.is_ipfs_available() {
            tracing::warn!(
                backend = BACKEND,
                root_cid = %root_cid,
                "Block storage unavailable, skipping import"
            );
            return Ok(false);
        }

        let root: RootBlock =
            parse_block("root", root_cid, &self.router.load_from_ipfs(root_cid).await?)?;
        root.validate(root_cid)?;
        let manifest: MetadataBlock = parse_block(
            "metadata",
            &root.metadata_cid,
            &self.router.load_from_ipfs(&root.metadata_cid).await?,
        )?;
        validate_dimension(manifest.dimension)?;
        let name = target.unwrap_or(&manifest.name).to_string();

        let mut coll = IpfsCollection::new(manifest.dimension, manifest.metric, manifest.created_at);
        for cid in &root.vectors_cids {
            let block: RecordBlock =
                parse_block("record", cid, &self.router.load_from_ipfs(cid).await?)?;
            let mut batch = [EmbeddingRecord {
                chunk_id: ChunkId::new(block.id),
                content: block.text,
                embedding: block.vector,
                metadata: block.metadata,
                model_name: None,
            }];
            prepare_records(&mut batch, &name, manifest.dimension, manifest.metric)?;
            let [record] = batch;
            coll.append(Staged {
                record,
                stored_at: block.stored_at,
                cid: Some(cid.clone()),
            })?;
        }
        coll.updated_at = manifest.updated_at;
        coll.root_cid = Some(root_cid.to_string());

        let count = coll.records.len();
        {
            let mut collections = self.collections.write().await;
            if collections.contains_key(&name) {
                return Err(Error::AlreadyExists(name));
            }
            collections.insert(name.clone(), coll);
        }
        tracing::info!(
            backend = BACKEND,
            collection = %name,
            count,
            root_cid = %root_cid,
            "Imported collection"
        );
        Ok(true)
    }

    /// CIDs of blocks superseded by updates and deletes.
    pub async fn orphaned_cids(&self, collection: &str) -> Vec<String> {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.orphans.clone())
            .unwrap_or_default()
    }

    /// CID of a live record's block, if one was stored.
    pub async fn record_cid(&self, id: &ChunkId, collection: &str) -> Option<String> {
        self.collections
            .read()
            .await
            .get(collection)?
            .records
            .get(id)?
            .cid
            .clone()
    }
}

#[async_trait]
impl VectorStore for IpfsVectorStore {
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
        let mut collections = self.collections.write().await;
        if collections.contains_key(name) {
            if options.exist_ok {
                return Ok(false);
            }
            return Err(Error::AlreadyExists(name.to_string()));
        }
        collections.insert(
            name.to_string(),
            IpfsCollection::new(dimension, metric, current_timestamp()),
        );
        tracing::info!(backend = BACKEND, collection = %name, dimension, metric = %metric, "Created collection");
        Ok(true)
    }

    async fn delete_collection(&self, name: &str) -> Result<bool> {
        self.collections.write().await.remove(name);
        if self.router.is_persistent() {
            let mut roots = self.router.load_roots().await?;
            if roots.remove(name).is_some() {
                self.router.save_roots(&roots).await?;
            }
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
            self.embed_missing(&mut records).await?;

            let (dimension, metric) = match self.schema(collection).await {
                Some(schema) => schema,
                None => {
                    let dimension = implicit_dimension(&records, collection)?;
                    let options = CollectionOptions::new().exist_ok();
                    self.create_collection(collection, dimension, self.default_metric, &options)
                        .await?;
                    self.schema(collection).await.ok_or_else(|| {
                        Error::NotFound(format!("collection '{collection}'"))
                    })?
                },
            };
            prepare_records(&mut records, collection, dimension, metric)?;

            let ids: Vec<ChunkId> = records.iter().map(|r| r.chunk_id.clone()).collect();
            let staged = self.stage(records).await?;

            let mut collections = self.collections.write().await;
            let coll = collections
                .get_mut(collection)
                .ok_or_else(|| Error::NotFound(format!("collection '{collection}'")))?;
            for item in staged {
                coll.append(item)?;
            }
            Ok(ids)
        }
        .await;

        record_operation(BACKEND, "add_embeddings", &result, started);
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
            coll.updated_at = current_timestamp();
        }
        Ok(removed)
    }

    async fn update_embedding(
        &self,
        id: &ChunkId,
        mut record: EmbeddingRecord,
        collection: &str,
    ) -> Result<bool> {
        let (dimension, metric) = self
            .schema(collection)
            .await
            .ok_or_else(|| Error::NotFound(format!("collection '{collection}'")))?;

        record.chunk_id = id.clone();
        let mut batch = vec![record];
        self.embed_missing(&mut batch).await?;
        prepare_records(&mut batch, collection, dimension, metric)?;
        let staged = self.stage(batch).await?;

        let mut collections = self.collections.write().await;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| Error::NotFound(format!("collection '{collection}'")))?;
        let mut replaced = false;
        for item in staged {
            replaced |= coll.append(item)?;
        }
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
        Ok(RecordPage {
            records: ids.into_iter().filter_map(|id| coll.record(id)).collect(),
            next_cursor,
        })
    }

    async fn close(&self) -> Result<()> {
        self.persist().await
    }
}
