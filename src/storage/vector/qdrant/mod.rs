//! Qdrant vector backend.
//!
//! Chunk ids are mapped to deterministic UUID v5 point ids so the mapping
//! survives restarts without a side-table; the original id travels in the
//! payload next to the content and metadata:
//!
//! ```json
//! {"chunk_id": "doc-1", "content": "...", "model_name": null, "metadata": {...}}
//! ```
//!
//! Metadata filters are pushed into Qdrant as `must` clauses over
//! `metadata.<field>` keys. Qdrant already reports cosine and dot scores as
//! similarities and euclid scores as distances, so scores pass through.

mod client;

pub use client::{
    HttpQdrantClient, QdrantClient, QdrantCollection, QdrantPoint, ScoredPoint, ScrollPage,
    distance_name, parse_distance,
};

use super::common::{
    implicit_dimension, prepare_query, prepare_records, rank, validate_dimension,
};
use crate::models::{
    ChunkId, CollectionInfo, CollectionOptions, DistanceMetric, EmbeddingRecord, FilterCondition,
    HealthStatus, Metadata, MetadataFilter, SearchResult,
};
use crate::observability::record_operation;
use crate::storage::traits::{RecordPage, VectorStore, elapsed_ms};
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use uuid::Uuid;

const BACKEND: &str = "qdrant";

/// Maps a chunk id onto its stable point id.
#[must_use]
pub fn point_id(id: &ChunkId) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, id.as_str().as_bytes()).to_string()
}

/// Translates a metadata filter into a Qdrant filter object.
///
/// Returns `None` for an empty filter.
#[must_use]
pub fn to_qdrant_filter(filter: &MetadataFilter) -> Option<Value> {
    if filter.is_empty() {
        return None;
    }
    let must: Vec<Value> = filter
        .conditions
        .iter()
        .map(|c| {
            let key = format!("metadata.{}", c.field());
            match c {
                FilterCondition::Eq { value, .. } => {
                    json!({"key": key, "match": {"value": value}})
                },
                FilterCondition::In { values, .. } => {
                    json!({"key": key, "match": {"any": values}})
                },
                FilterCondition::Range {
                    gt, gte, lt, lte, ..
                } => {
                    let mut range = Map::new();
                    for (name, bound) in [("gt", gt), ("gte", gte), ("lt", lt), ("lte", lte)] {
                        if let Some(b) = bound {
                            range.insert(name.to_string(), json!(b));
                        }
                    }
                    json!({"key": key, "range": range})
                },
            }
        })
        .collect();
    Some(json!({ "must": must }))
}

fn to_point(record: EmbeddingRecord) -> QdrantPoint {
    let mut payload = Metadata::new();
    payload.insert("chunk_id".to_string(), json!(record.chunk_id.as_str()));
    payload.insert("content".to_string(), json!(record.content));
    payload.insert("model_name".to_string(), json!(record.model_name));
    payload.insert("metadata".to_string(), Value::Object(record.metadata));
    QdrantPoint {
        id: point_id(&record.chunk_id),
        vector: record.embedding,
        payload,
    }
}

struct PayloadFields {
    chunk_id: ChunkId,
    content: Option<String>,
    model_name: Option<String>,
    metadata: Metadata,
}

fn from_payload(point_id: &str, mut payload: Metadata) -> PayloadFields {
    let text = |v: Option<Value>| match v {
        Some(Value::String(s)) => Some(s),
        _ => None,
    };
    PayloadFields {
        chunk_id: text(payload.remove("chunk_id"))
            .map_or_else(|| ChunkId::new(point_id), ChunkId::from),
        content: text(payload.remove("content")),
        model_name: text(payload.remove("model_name")),
        metadata: match payload.remove("metadata") {
            Some(Value::Object(m)) => m,
            _ => Metadata::new(),
        },
    }
}

fn to_record(point: QdrantPoint) -> EmbeddingRecord {
    let fields = from_payload(&point.id, point.payload);
    EmbeddingRecord {
        chunk_id: fields.chunk_id,
        content: fields.content,
        embedding: point.vector,
        metadata: fields.metadata,
        model_name: fields.model_name,
    }
}

/// Vector store over a Qdrant server.
pub struct QdrantVectorStore {
    client: Arc<dyn QdrantClient>,
    default_metric: DistanceMetric,
    /// Cached (dimension, metric) per collection.
    schemas: RwLock<HashMap<String, (usize, DistanceMetric)>>,
}

impl QdrantVectorStore {
    /// Creates a store over any [`QdrantClient`].
    #[must_use]
    pub fn new(client: Arc<dyn QdrantClient>, default_metric: DistanceMetric) -> Self {
        Self {
            client,
            default_metric,
            schemas: RwLock::new(HashMap::new()),
        }
    }

    /// Connects to a Qdrant server over HTTP.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn connect(
        url: &str,
        api_key: Option<secrecy::SecretString>,
        timeout: std::time::Duration,
        default_metric: DistanceMetric,
    ) -> Result<Self> {
        let client = HttpQdrantClient::new(url, api_key, timeout)?;
        Ok(Self::new(Arc::new(client), default_metric))
    }

    async fn schema(&self, collection: &str) -> Result<Option<(usize, DistanceMetric)>> {
        if let Some(schema) = self.schemas.read().await.get(collection) {
            return Ok(Some(*schema));
        }
        let Some(info) = self.client.get_collection(collection).await? else {
            return Ok(None);
        };
        let schema = (info.dimension, info.metric);
        self.schemas
            .write()
            .await
            .insert(collection.to_string(), schema);
        Ok(Some(schema))
    }

    async fn exists_point(&self, collection: &str, id: &str) -> Result<bool> {
        Ok(!self
            .client
            .get_points(collection, &[id.to_string()])
            .await?
            .is_empty())
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
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
        if self.schema(name).await?.is_some() {
            if options.exist_ok {
                return Ok(false);
            }
            return Err(Error::AlreadyExists(name.to_string()));
        }

        self.client
            .create_collection(name, dimension, metric, &options.engine)
            .await?;
        self.schemas
            .write()
            .await
            .insert(name.to_string(), (dimension, metric));
        tracing::info!(
            backend = BACKEND,
            collection = %name,
            dimension,
            metric = %metric,
            "Created collection"
        );
        Ok(true)
    }

    async fn delete_collection(&self, name: &str) -> Result<bool> {
        self.client.delete_collection(name).await?;
        self.schemas.write().await.remove(name);
        Ok(true)
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.schema(name).await?.is_some())
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
            let (dimension, metric) = match self.schema(collection).await? {
                Some(schema) => schema,
                None => {
                    let dimension = implicit_dimension(&records, collection)?;
                    let options = CollectionOptions::new().exist_ok();
                    self.create_collection(collection, dimension, self.default_metric, &options)
                        .await?;
                    (dimension, self.default_metric)
                },
            };
            prepare_records(&mut records, collection, dimension, metric)?;

            let ids: Vec<ChunkId> = records.iter().map(|r| r.chunk_id.clone()).collect();
            let points = records.into_iter().map(to_point).collect();
            self.client.upsert_points(collection, points).await?;
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
        let Some((dimension, metric)) = self.schema(collection).await? else {
            return Ok(Vec::new());
        };
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let result: Result<Vec<SearchResult>> = async {
            let query = prepare_query(query, collection, dimension, metric)?;
            let native_filter = filter.and_then(to_qdrant_filter);
            let hits = self
                .client
                .search_points(collection, &query, top_k, native_filter)
                .await?;

            let mut results: Vec<SearchResult> = hits
                .into_iter()
                .map(|hit| {
                    let fields = from_payload(&hit.id, hit.payload);
                    SearchResult {
                        chunk_id: fields.chunk_id,
                        content: fields.content,
                        score: hit.score,
                        metadata: fields.metadata,
                    }
                })
                .collect();
            rank(&mut results, metric, top_k);
            Ok(results)
        }
        .await;

        record_operation(BACKEND, "search", &result, started);
        result
    }

    async fn get_by_id(&self, id: &ChunkId, collection: &str) -> Result<Option<EmbeddingRecord>> {
        if self.schema(collection).await?.is_none() {
            return Ok(None);
        }
        let points = self.client.get_points(collection, &[point_id(id)]).await?;
        Ok(points.into_iter().next().map(to_record))
    }

    async fn delete_by_id(&self, id: &ChunkId, collection: &str) -> Result<bool> {
        if self.schema(collection).await?.is_none() {
            return Ok(false);
        }
        let pid = point_id(id);
        if !self.exists_point(collection, &pid).await? {
            return Ok(false);
        }
        self.client.delete_points(collection, &[pid]).await?;
        Ok(true)
    }

    async fn update_embedding(
        &self,
        id: &ChunkId,
        mut record: EmbeddingRecord,
        collection: &str,
    ) -> Result<bool> {
        let (dimension, metric) = self
            .schema(collection)
            .await?
            .ok_or_else(|| Error::NotFound(format!("collection '{collection}'")))?;

        record.chunk_id = id.clone();
        let mut batch = [record];
        prepare_records(&mut batch, collection, dimension, metric)?;
        let [record] = batch;

        let existed = self.exists_point(collection, &point_id(id)).await?;
        // Upsert under the same point id replaces payload and vector together.
        self.client
            .upsert_points(collection, vec![to_point(record)])
            .await?;
        Ok(existed)
    }

    async fn get_collection_info(&self, name: &str) -> Result<Option<CollectionInfo>> {
        let Some(info) = self.client.get_collection(name).await? else {
            return Ok(None);
        };
        let mut engine = Metadata::new();
        engine.insert("distance".to_string(), json!(distance_name(info.metric)));
        Ok(Some(CollectionInfo {
            name: name.to_string(),
            dimension: info.dimension,
            metric: info.metric,
            count: info.points_count,
            created_at: 0,
            updated_at: 0,
            root_cid: None,
            engine,
        }))
    }

    async fn list_collections(&self) -> Result<BTreeSet<String>> {
        Ok(self.client.list_collections().await?.into_iter().collect())
    }

    async fn list_records(
        &self,
        collection: &str,
        cursor: Option<String>,
        limit: usize,
    ) -> Result<RecordPage> {
        if self.schema(collection).await?.is_none() {
            return Ok(RecordPage::default());
        }
        let page = self
            .client
            .scroll_points(collection, cursor, limit.max(1))
            .await?;
        Ok(RecordPage {
            records: page.points.into_iter().map(to_record).collect(),
            next_cursor: page.next_offset,
        })
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        let started = Instant::now();
        let status = match self.client.health().await {
            Ok(()) => match self.client.list_collections().await {
                Ok(names) => HealthStatus::healthy(BACKEND, Some(names.len())),
                Err(e) => HealthStatus::unhealthy(BACKEND, e),
            },
            Err(e) => HealthStatus::unhealthy(BACKEND, e),
        };
        Ok(status.with_latency_ms(elapsed_ms(started)))
    }
}
