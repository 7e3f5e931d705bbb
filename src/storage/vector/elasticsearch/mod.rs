//! Elasticsearch vector backend.
//!
//! Each collection is one index named `<prefix><collection>` whose
//! `embedding` field is a `dense_vector` with the collection's similarity.
//! The collection metric and creation time live in the mapping `_meta`, so
//! the schema survives without any side storage.
//!
//! # Score conversion
//!
//! Elasticsearch reports kNN scores as positive numbers where higher is
//! better. They are mapped back onto the canonical convention before leaving
//! the adapter:
//!
//! | Similarity | Native `_score` | Returned |
//! |------------|-----------------|----------|
//! | `cosine` | `(1 + cos) / 2` | `2s - 1` |
//! | `max_inner_product` | `dot + 1` if `dot >= 0`, else `1 / (1 - dot)` | `s - 1` if `s >= 1`, else `1 - 1/s` |
//! | `dot_product` | `(1 + dot) / 2` | `2s - 1` |
//! | `l2_norm` | `1 / (1 + d²)` | `sqrt(1/s - 1)` |
//!
//! New `dot` collections use `max_inner_product`, which accepts vectors of
//! any length. `dot_product` is only read back from existing indices.
//!
//! Index names must be lowercase, so collection names with uppercase letters
//! or characters Elasticsearch forbids in index names are rejected.

mod client;

pub use client::{
    BulkAction, HttpSearchClusterClient, IndexSchema, SearchClusterClient, SearchHit,
    bulk_body, failed_bulk_ids, parse_similarity, similarity_name,
};

use super::common::{
    implicit_dimension, prepare_query, prepare_records, rank, validate_collection_name,
    validate_dimension,
};
use crate::models::{
    ChunkId, CollectionInfo, CollectionOptions, DistanceMetric, EmbeddingRecord, FilterCondition,
    HealthStatus, Metadata, MetadataFilter, SearchResult,
};
use crate::observability::record_operation;
use crate::storage::traits::{RecordPage, VectorStore, elapsed_ms};
use crate::{Error, Result, current_timestamp};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

const BACKEND: &str = "elasticsearch";

/// Upper bound Elasticsearch accepts for `num_candidates`.
const MAX_NUM_CANDIDATES: usize = 10_000;

/// Characters Elasticsearch does not allow in index names.
const FORBIDDEN_INDEX_CHARS: &[char] = &['*', '?', '"', '<', '>', '|', ',', '#', ':', ' '];

/// Maps a native kNN `_score` back to the canonical score for the index
/// `similarity`.
#[must_use]
pub fn from_native_score(similarity: &str, score: f32) -> f32 {
    match similarity {
        "l2_norm" => {
            if score <= 0.0 {
                f32::INFINITY
            } else {
                (1.0 / score - 1.0).max(0.0).sqrt()
            }
        },
        "max_inner_product" => {
            if score >= 1.0 {
                score - 1.0
            } else if score > 0.0 {
                1.0 - 1.0 / score
            } else {
                f32::NEG_INFINITY
            }
        },
        _ => 2.0f32.mul_add(score, -1.0),
    }
}

/// Checks that `name` maps onto a valid index name unchanged.
///
/// # Errors
///
/// Returns `InvalidInput` for names with uppercase letters or characters
/// index names cannot hold.
pub fn validate_index_collection_name(name: &str) -> Result<()> {
    validate_collection_name(name)?;
    if name.chars().any(char::is_uppercase) || name.contains(FORBIDDEN_INDEX_CHARS) {
        return Err(Error::InvalidInput(format!(
            "collection name '{name}' is not a valid lowercase index name"
        )));
    }
    Ok(())
}

/// Translates a metadata filter into a `bool` query over `metadata.*`.
///
/// Returns `None` for an empty filter.
#[must_use]
pub fn to_es_filter(filter: &MetadataFilter) -> Option<Value> {
    if filter.is_empty() {
        return None;
    }
    let clauses: Vec<Value> = filter
        .conditions
        .iter()
        .map(|c| {
            let key = format!("metadata.{}", c.field());
            match c {
                FilterCondition::Eq { value, .. } => json!({"term": {key: value}}),
                FilterCondition::In { values, .. } => json!({"terms": {key: values}}),
                FilterCondition::Range {
                    gt, gte, lt, lte, ..
                } => {
                    let mut bounds = Map::new();
                    for (name, bound) in [("gt", gt), ("gte", gte), ("lt", lt), ("lte", lte)] {
                        if let Some(b) = bound {
                            bounds.insert(name.to_string(), json!(b));
                        }
                    }
                    json!({"range": {key: bounds}})
                },
            }
        })
        .collect();
    Some(json!({"bool": {"filter": clauses}}))
}

fn index_body(dimension: usize, metric: DistanceMetric, options: &CollectionOptions) -> Value {
    let mut body = json!({
        "mappings": {
            "_meta": {"metric": metric.as_str(), "created_at": current_timestamp()},
            "dynamic_templates": [{
                "metadata_strings": {
                    "path_match": "metadata.*",
                    "match_mapping_type": "string",
                    "mapping": {"type": "keyword"},
                },
            }],
            "properties": {
                "chunk_id": {"type": "keyword"},
                "content": {"type": "text"},
                "model_name": {"type": "keyword"},
                "metadata": {"type": "object", "dynamic": true},
                "embedding": {
                    "type": "dense_vector",
                    "dims": dimension,
                    "index": true,
                    "similarity": similarity_name(metric),
                },
            },
        },
    });
    if !options.engine.is_empty() {
        body["settings"] = Value::Object(options.engine.clone());
    }
    body
}

fn to_source(record: EmbeddingRecord) -> Value {
    json!({
        "chunk_id": record.chunk_id.as_str(),
        "content": record.content,
        "model_name": record.model_name,
        "metadata": record.metadata,
        "embedding": record.embedding,
    })
}

fn text(source: &Value, key: &str) -> Option<String> {
    source[key].as_str().map(str::to_string)
}

fn metadata_of(source: &Value) -> Metadata {
    source["metadata"].as_object().cloned().unwrap_or_default()
}

#[allow(clippy::cast_possible_truncation)]
fn to_record(id: &str, source: &Value) -> EmbeddingRecord {
    let embedding = source["embedding"]
        .as_array()
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_f64)
                .map(|v| v as f32)
                .collect()
        })
        .unwrap_or_default();
    EmbeddingRecord {
        chunk_id: ChunkId::new(text(source, "chunk_id").unwrap_or_else(|| id.to_string())),
        content: text(source, "content"),
        embedding,
        metadata: metadata_of(source),
        model_name: text(source, "model_name"),
    }
}

/// Vector store over an Elasticsearch cluster.
pub struct ElasticsearchVectorStore {
    client: Arc<dyn SearchClusterClient>,
    index_prefix: String,
    default_metric: DistanceMetric,
    schemas: RwLock<HashMap<String, IndexSchema>>,
}

impl ElasticsearchVectorStore {
    /// Creates a store over any [`SearchClusterClient`].
    #[must_use]
    pub fn new(
        client: Arc<dyn SearchClusterClient>,
        index_prefix: impl Into<String>,
        default_metric: DistanceMetric,
    ) -> Self {
        Self {
            client,
            index_prefix: index_prefix.into(),
            default_metric,
            schemas: RwLock::new(HashMap::new()),
        }
    }

    /// Connects to a cluster over HTTP.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn connect(
        url: &str,
        index_prefix: impl Into<String>,
        api_key: Option<secrecy::SecretString>,
        timeout: std::time::Duration,
        default_metric: DistanceMetric,
    ) -> Result<Self> {
        let client = HttpSearchClusterClient::new(url, api_key, timeout)?;
        Ok(Self::new(Arc::new(client), index_prefix, default_metric))
    }

    /// Index backing `collection`.
    #[must_use]
    pub fn index_name(&self, collection: &str) -> String {
        format!("{}{collection}", self.index_prefix)
    }

    async fn schema(&self, collection: &str) -> Result<Option<IndexSchema>> {
        if let Some(schema) = self.schemas.read().await.get(collection) {
            return Ok(Some(*schema));
        }
        let Some(mappings) = self.client.get_mappings(&self.index_name(collection)).await? else {
            return Ok(None);
        };
        let schema = IndexSchema::from_mappings(&mappings).ok_or_else(|| {
            Error::operation(
                "get_mappings",
                format!("index for '{collection}' has no dense_vector embedding field"),
            )
        })?;
        self.schemas
            .write()
            .await
            .insert(collection.to_string(), schema);
        Ok(Some(schema))
    }

    async fn write(&self, collection: &str, records: Vec<EmbeddingRecord>) -> Result<()> {
        let actions = records
            .into_iter()
            .map(|r| BulkAction::Index {
                id: r.chunk_id.as_str().to_string(),
                source: to_source(r),
            })
            .collect();
        let failed_ids = self
            .client
            .bulk(&self.index_name(collection), actions)
            .await?;
        if failed_ids.is_empty() {
            Ok(())
        } else {
            tracing::warn!(
                backend = BACKEND,
                collection = %collection,
                failed = failed_ids.len(),
                "Bulk write partially rejected"
            );
            Err(Error::PartialFailure {
                operation: "add_embeddings".to_string(),
                failed_ids,
            })
        }
    }
}

#[async_trait]
impl VectorStore for ElasticsearchVectorStore {
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
        validate_index_collection_name(name)?;
        if self.schema(name).await?.is_some() {
            if options.exist_ok {
                return Ok(false);
            }
            return Err(Error::AlreadyExists(name.to_string()));
        }

        let index = self.index_name(name);
        let body = index_body(dimension, metric, options);
        self.client.create_index(&index, &body).await?;
        tracing::info!(
            backend = BACKEND,
            collection = %name,
            index = %index,
            dimension,
            metric = %metric,
            "Created index"
        );
        Ok(true)
    }

    async fn delete_collection(&self, name: &str) -> Result<bool> {
        validate_index_collection_name(name)?;
        self.client.delete_index(&self.index_name(name)).await?;
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
            validate_index_collection_name(collection)?;
            let schema = match self.schema(collection).await? {
                Some(schema) => schema,
                None => {
                    let dimension = implicit_dimension(&records, collection)?;
                    let options = CollectionOptions::new().exist_ok();
                    self.create_collection(collection, dimension, self.default_metric, &options)
                        .await?;
                    self.schema(collection).await?.ok_or_else(|| {
                        Error::operation("add_embeddings", format!("index for '{collection}' vanished"))
                    })?
                },
            };
            prepare_records(&mut records, collection, schema.dimension, schema.metric)?;

            let ids: Vec<ChunkId> = records.iter().map(|r| r.chunk_id.clone()).collect();
            self.write(collection, records).await?;
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
        let Some(schema) = self.schema(collection).await? else {
            return Ok(Vec::new());
        };
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let result: Result<Vec<SearchResult>> = async {
            let query = prepare_query(query, collection, schema.dimension, schema.metric)?;
            let k = top_k.min(MAX_NUM_CANDIDATES);
            let mut knn = json!({
                "field": "embedding",
                "query_vector": query,
                "k": k,
                "num_candidates": k.saturating_mul(10).clamp(100, MAX_NUM_CANDIDATES).max(k),
            });
            if let Some(native) = filter.and_then(to_es_filter) {
                knn["filter"] = native;
            }
            let body = json!({
                "knn": knn,
                "size": k,
                "_source": {"excludes": ["embedding"]},
            });

            let hits = self
                .client
                .search(&self.index_name(collection), &body)
                .await?;
            let mut results: Vec<SearchResult> = hits
                .into_iter()
                .map(|hit| SearchResult {
                    chunk_id: ChunkId::new(
                        text(&hit.source, "chunk_id").unwrap_or_else(|| hit.id.clone()),
                    ),
                    content: text(&hit.source, "content"),
                    score: from_native_score(schema.similarity, hit.score.unwrap_or(0.0)),
                    metadata: metadata_of(&hit.source),
                })
                .collect();
            rank(&mut results, schema.metric, top_k);
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
        let source = self
            .client
            .get_document(&self.index_name(collection), id.as_str())
            .await?;
        Ok(source.map(|s| to_record(id.as_str(), &s)))
    }

    async fn delete_by_id(&self, id: &ChunkId, collection: &str) -> Result<bool> {
        if self.schema(collection).await?.is_none() {
            return Ok(false);
        }
        self.client
            .delete_document(&self.index_name(collection), id.as_str())
            .await
    }

    async fn update_embedding(
        &self,
        id: &ChunkId,
        mut record: EmbeddingRecord,
        collection: &str,
    ) -> Result<bool> {
        let schema = self
            .schema(collection)
            .await?
            .ok_or_else(|| Error::NotFound(format!("collection '{collection}'")))?;

        record.chunk_id = id.clone();
        let mut batch = vec![record];
        prepare_records(&mut batch, collection, schema.dimension, schema.metric)?;

        let existed = self
            .client
            .get_document(&self.index_name(collection), id.as_str())
            .await?
            .is_some();
        self.write(collection, batch).await?;
        Ok(existed)
    }

    async fn get_collection_info(&self, name: &str) -> Result<Option<CollectionInfo>> {
        let Some(schema) = self.schema(name).await? else {
            return Ok(None);
        };
        let index = self.index_name(name);
        let count = self.client.count(&index).await?;

        let mut engine = Metadata::new();
        engine.insert("index".to_string(), json!(index));
        engine.insert("similarity".to_string(), json!(schema.similarity));
        Ok(Some(CollectionInfo {
            name: name.to_string(),
            dimension: schema.dimension,
            metric: schema.metric,
            count,
            created_at: schema.created_at,
            updated_at: schema.created_at,
            root_cid: None,
            engine,
        }))
    }

    async fn list_collections(&self) -> Result<BTreeSet<String>> {
        let indices = self.client.list_indices(&self.index_prefix).await?;
        Ok(indices
            .into_iter()
            .filter_map(|i| i.strip_prefix(&self.index_prefix).map(str::to_string))
            .collect())
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
        let limit = limit.max(1);
        let mut body = json!({
            "size": limit + 1,
            "query": {"match_all": {}},
            "sort": [{"chunk_id": "asc"}],
        });
        if let Some(after) = cursor {
            body["search_after"] = json!([after]);
        }

        let mut hits = self
            .client
            .search(&self.index_name(collection), &body)
            .await?;
        let has_more = hits.len() > limit;
        hits.truncate(limit);

        let records: Vec<EmbeddingRecord> =
            hits.iter().map(|h| to_record(&h.id, &h.source)).collect();
        let next_cursor = if has_more {
            records.last().map(|r| r.chunk_id.as_str().to_string())
        } else {
            None
        };
        Ok(RecordPage {
            records,
            next_cursor,
        })
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        let started = Instant::now();
        let status = match self.client.ping().await {
            Ok(()) => match self.list_collections().await {
                Ok(names) => HealthStatus::healthy(BACKEND, Some(names.len())),
                Err(e) => HealthStatus::unhealthy(BACKEND, e),
            },
            Err(e) => HealthStatus::unhealthy(BACKEND, e),
        };
        Ok(status.with_latency_ms(elapsed_ms(started)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use test_case::test_case;

    struct FakeIndex {
        mappings: Value,
        docs: BTreeMap<String, Value>,
    }

    /// In-memory stand-in for a cluster. Documents whose metadata carries
    /// `"reject": true` fail in bulk writes.
    #[derive(Default)]
    struct FakeCluster {
        indices: Mutex<BTreeMap<String, FakeIndex>>,
        last_search: Mutex<Option<Value>>,
    }

    fn clause_matches(clause: &Value, source: &Value) -> bool {
        let field_value = |key: &str| {
            let field = key.trim_start_matches("metadata.");
            source["metadata"][field].clone()
        };
        if let Some((key, v)) = clause["term"].as_object().and_then(|o| o.iter().next()) {
            return &field_value(key) == v;
        }
        if let Some((key, vs)) = clause["terms"].as_object().and_then(|o| o.iter().next()) {
            return vs.as_array().is_some_and(|a| a.contains(&field_value(key)));
        }
        if let Some((key, b)) = clause["range"].as_object().and_then(|o| o.iter().next()) {
            let x = field_value(key).as_f64().unwrap_or(f64::NAN);
            return b["gte"].as_f64().is_none_or(|v| x >= v)
                && b["lte"].as_f64().is_none_or(|v| x <= v)
                && b["gt"].as_f64().is_none_or(|v| x > v)
                && b["lt"].as_f64().is_none_or(|v| x < v);
        }
        true
    }

    fn native_score(similarity: &str, stored: &[f32], query: &[f32]) -> f32 {
        let dot = crate::models::dot(stored, query);
        match similarity {
            "l2_norm" => {
                let d = crate::models::l2_distance(stored, query);
                1.0 / d.mul_add(d, 1.0)
            },
            "max_inner_product" if dot < 0.0 => 1.0 / (1.0 - dot),
            "max_inner_product" => dot + 1.0,
            _ => (1.0 + dot) / 2.0,
        }
    }

    #[async_trait]
    impl SearchClusterClient for FakeCluster {
        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        async fn list_indices(&self, prefix: &str) -> Result<Vec<String>> {
            Ok(self
                .indices
                .lock()
                .unwrap()
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect())
        }

        async fn get_mappings(&self, index: &str) -> Result<Option<Value>> {
            Ok(self.indices.lock().unwrap().get(index).map(|i| i.mappings.clone()))
        }

        async fn create_index(&self, index: &str, body: &Value) -> Result<()> {
            self.indices.lock().unwrap().insert(
                index.to_string(),
                FakeIndex {
                    mappings: body["mappings"].clone(),
                    docs: BTreeMap::new(),
                },
            );
            Ok(())
        }

        async fn delete_index(&self, index: &str) -> Result<()> {
            self.indices.lock().unwrap().remove(index);
            Ok(())
        }

        async fn bulk(&self, index: &str, actions: Vec<BulkAction>) -> Result<Vec<String>> {
            let mut indices = self.indices.lock().unwrap();
            let idx = indices.get_mut(index).expect("index exists");
            let mut failed = Vec::new();
            for action in actions {
                match action {
                    BulkAction::Index { id, source } => {
                        if source["metadata"]["reject"] == json!(true) {
                            failed.push(id);
                        } else {
                            idx.docs.insert(id, source);
                        }
                    },
                }
            }
            Ok(failed)
        }

        async fn get_document(&self, index: &str, id: &str) -> Result<Option<Value>> {
            Ok(self
                .indices
                .lock()
                .unwrap()
                .get(index)
                .and_then(|i| i.docs.get(id).cloned()))
        }

        async fn delete_document(&self, index: &str, id: &str) -> Result<bool> {
            Ok(self
                .indices
                .lock()
                .unwrap()
                .get_mut(index)
                .is_some_and(|i| i.docs.remove(id).is_some()))
        }

        async fn count(&self, index: &str) -> Result<usize> {
            Ok(self.indices.lock().unwrap().get(index).map_or(0, |i| i.docs.len()))
        }

        async fn search(&self, index: &str, body: &Value) -> Result<Vec<SearchHit>> {
            *self.last_search.lock().unwrap() = Some(body.clone());
            let indices = self.indices.lock().unwrap();
            let Some(idx) = indices.get(index) else {
                return Ok(Vec::new());
            };
            let schema = IndexSchema::from_mappings(&idx.mappings).expect("schema");

            if let Some(knn) = body.get("knn") {
                let query: Vec<f32> = serde_json::from_value(knn["query_vector"].clone()).expect("vector");
                let clauses = knn["filter"]["bool"]["filter"].as_array().cloned().unwrap_or_default();
                let mut hits: Vec<SearchHit> = idx
                    .docs
                    .iter()
                    .filter(|(_, s)| clauses.iter().all(|c| clause_matches(c, s)))
                    .map(|(id, s)| {
                        let stored: Vec<f32> = serde_json::from_value(s["embedding"].clone()).expect("vector");
                        SearchHit {
                            id: id.clone(),
                            score: Some(native_score(schema.similarity, &stored, &query)),
                            source: s.clone(),
                            sort: None,
                        }
                    })
                    .collect();
                hits.sort_by(|a, b| b.score.partial_cmp(&a.score).expect("finite"));
                hits.truncate(usize::try_from(knn["k"].as_u64().expect("k")).expect("k"));
                return Ok(hits);
            }

            let after = body["search_after"][0].as_str().map(str::to_string);
            let size = usize::try_from(body["size"].as_u64().expect("size")).expect("size");
            Ok(idx
                .docs
                .iter()
                .filter(|(id, _)| after.as_ref().is_none_or(|a| *id > a))
                .take(size)
                .map(|(id, s)| SearchHit {
                    id: id.clone(),
                    score: None,
                    source: s.clone(),
                    sort: Some(json!([id])),
                })
                .collect())
        }
    }

    fn store(metric: DistanceMetric) -> ElasticsearchVectorStore {
        store_with_cluster(metric).0
    }

    fn store_with_cluster(metric: DistanceMetric) -> (ElasticsearchVectorStore, Arc<FakeCluster>) {
        let cluster = Arc::new(FakeCluster::default());
        let store = ElasticsearchVectorStore::new(cluster.clone(), "vb_", metric);
        (store, cluster)
    }

    #[test_case("cosine", 1.0, 1.0)]
    #[test_case("cosine", 0.5, 0.0)]
    #[test_case("dot_product", 0.75, 0.5)]
    #[test_case("max_inner_product", 7.0, 6.0)]
    #[test_case("max_inner_product", 1.0, 0.0)]
    #[test_case("max_inner_product", 0.25, -3.0)]
    #[test_case("l2_norm", 1.0, 0.0)]
    #[test_case("l2_norm", 0.2, 2.0)]
    fn test_native_score_conversion(similarity: &str, native: f32, expected: f32) {
        assert!((from_native_score(similarity, native) - expected).abs() < 1e-5);
    }

    #[test_case("docs")]
    #[test_case("my-docs_v2")]
    #[test_case("notes.2024")]
    fn test_index_collection_name_accepted(name: &str) {
        assert!(validate_index_collection_name(name).is_ok());
    }

    #[test_case("Docs"; "uppercase")]
    #[test_case("a b"; "space")]
    #[test_case("a*"; "wildcard")]
    #[test_case("a#b"; "hash")]
    #[test_case("a/b"; "slash")]
    #[test_case(".."; "parent")]
    fn test_index_collection_name_rejected(name: &str) {
        assert!(matches!(
            validate_index_collection_name(name),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_filter_translation() {
        let filter = MetadataFilter::new().eq("lang", "en").range("year", None, Some(2000.0));
        let value = to_es_filter(&filter).expect("non-empty");
        let clauses = value["bool"]["filter"].as_array().expect("array");
        assert_eq!(clauses[0], json!({"term": {"metadata.lang": "en"}}));
        assert_eq!(clauses[1], json!({"range": {"metadata.year": {"lte": 2000.0}}}));
    }

    #[test]
    fn test_index_body_mapping() {
        let body = index_body(4, DistanceMetric::Euclidean, &CollectionOptions::new());
        let field = &body["mappings"]["properties"]["embedding"];
        assert_eq!(field["dims"], 4);
        assert_eq!(field["similarity"], "l2_norm");
        assert_eq!(body["mappings"]["_meta"]["metric"], "euclidean");
        assert!(body.get("settings").is_none());
    }

    #[test]
    fn test_metadata_strings_map_to_keyword() {
        let body = index_body(2, DistanceMetric::Cosine, &CollectionOptions::new());
        let template = &body["mappings"]["dynamic_templates"][0]["metadata_strings"];
        assert_eq!(template["path_match"], "metadata.*");
        assert_eq!(template["match_mapping_type"], "string");
        assert_eq!(template["mapping"]["type"], "keyword");

        let filter = MetadataFilter::new().eq("author", "Alice Smith");
        let value = to_es_filter(&filter).expect("non-empty");
        assert_eq!(
            value["bool"]["filter"][0],
            json!({"term": {"metadata.author": "Alice Smith"}})
        );
    }

    #[test]
    fn test_dot_index_uses_max_inner_product() {
        let body = index_body(3, DistanceMetric::Dot, &CollectionOptions::new());
        assert_eq!(
            body["mappings"]["properties"]["embedding"]["similarity"],
            "max_inner_product"
        );
    }

    #[tokio::test]
    async fn test_search_returns_canonical_scores() {
        let store = store(DistanceMetric::Cosine);
        store
            .add_embeddings(
                vec![
                    EmbeddingRecord::new("x", vec![1.0, 0.0]),
                    EmbeddingRecord::new("y", vec![0.0, 1.0]),
                ],
                "docs",
            )
            .await
            .expect("add");
        assert!(store.list_collections().await.expect("list").contains("docs"));

        let hits = store.search(&[1.0, 0.0], 2, "docs", None).await.expect("search");
        assert_eq!(hits[0].chunk_id.as_str(), "x");
        assert!((hits[0].score - 1.0).abs() < 1e-5);
        assert!(hits[1].score.abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_euclidean_distances_roundtrip() {
        let store = store(DistanceMetric::Euclidean);
        store
            .add_embeddings(
                vec![
                    EmbeddingRecord::new("near", vec![1.0, 0.0]),
                    EmbeddingRecord::new("far", vec![3.0, 0.0]),
                ],
                "c",
            )
            .await
            .expect("add");
        let hits = store.search(&[0.0, 0.0], 2, "c", None).await.expect("search");
        assert_eq!(hits[0].chunk_id.as_str(), "near");
        assert!((hits[0].score - 1.0).abs() < 1e-4);
        assert!((hits[1].score - 3.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_bulk_rejection_is_partial_failure() {
        let store = store(DistanceMetric::Dot);
        let err = store
            .add_embeddings(
                vec![
                    EmbeddingRecord::new("good", vec![1.0]),
                    EmbeddingRecord::new("bad", vec![1.0]).with_metadata("reject", true),
                ],
                "c",
            )
            .await
            .unwrap_err();
        match err {
            Error::PartialFailure { failed_ids, .. } => assert_eq!(failed_ids, vec!["bad"]),
            other => panic!("unexpected error: {other}"),
        }
        assert!(store.get_by_id(&ChunkId::new("good"), "c").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn test_filter_update_delete_and_paging() {
        let store = store(DistanceMetric::Dot);
        let records = (0..5u8)
            .map(|i| {
                EmbeddingRecord::new(format!("r{i}"), vec![f32::from(i) / 10.0])
                    .with_metadata("even", i % 2 == 0)
            })
            .collect();
        store.add_embeddings(records, "c").await.expect("add");

        let filter = MetadataFilter::new().eq("even", false);
        let hits = store.search(&[1.0], 5, "c", Some(&filter)).await.expect("search");
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["r3", "r1"]);

        assert!(
            store
                .update_embedding(&ChunkId::new("r0"), EmbeddingRecord::new("", vec![0.9]), "c")
                .await
                .expect("update")
        );
        let info = store.get_collection_info("c").await.expect("info").expect("exists");
        assert_eq!(info.count, 5);
        assert_eq!(info.dimension, 1);

        assert!(store.delete_by_id(&ChunkId::new("r4"), "c").await.expect("delete"));
        let first = store.list_records("c", None, 3).await.expect("page");
        assert_eq!(first.records.len(), 3);
        let second = store
            .list_records("c", first.next_cursor, 3)
            .await
            .expect("page");
        assert_eq!(second.records.len(), 1);
        assert!(second.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_create_existing_collection() {
        let store = store(DistanceMetric::Cosine);
        let opts = CollectionOptions::new();
        assert!(store.create_collection("c", 2, DistanceMetric::Cosine, &opts).await.expect("create"));
        assert!(matches!(
            store.create_collection("c", 2, DistanceMetric::Cosine, &opts).await,
            Err(Error::AlreadyExists(_))
        ));
        assert!(
            !store
                .create_collection("c", 2, DistanceMetric::Cosine, &opts.clone().exist_ok())
                .await
                .expect("exist ok")
        );
        assert!(store.search(&[1.0, 0.0], 3, "missing", None).await.expect("search").is_empty());
    }

    #[tokio::test]
    async fn test_uppercase_collection_rejected_without_touching_cluster() {
        let (store, cluster) = store_with_cluster(DistanceMetric::Cosine);
        let opts = CollectionOptions::new();
        assert!(matches!(
            store.create_collection("Docs", 2, DistanceMetric::Cosine, &opts).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            store
                .add_embeddings(vec![EmbeddingRecord::new("a", vec![1.0, 0.0])], "Docs")
                .await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(store.delete_collection("Docs").await, Err(Error::InvalidInput(_))));
        assert!(cluster.indices.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dot_scores_for_unnormalized_vectors() {
        let store = store(DistanceMetric::Dot);
        store
            .add_embeddings(
                vec![
                    EmbeddingRecord::new("big", vec![3.0, 0.0]),
                    EmbeddingRecord::new("opposite", vec![-2.0, 0.0]),
                ],
                "c",
            )
            .await
            .expect("add");
        let info = store.get_collection_info("c").await.expect("info").expect("exists");
        assert_eq!(info.engine["similarity"], "max_inner_product");

        let hits = store.search(&[2.0, 0.0], 2, "c", None).await.expect("search");
        assert_eq!(hits[0].chunk_id.as_str(), "big");
        assert!((hits[0].score - 6.0).abs() < 1e-4);
        assert!((hits[1].score + 4.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_large_top_k_stays_within_candidate_cap() {
        let (store, cluster) = store_with_cluster(DistanceMetric::Cosine);
        store
            .add_embeddings(vec![EmbeddingRecord::new("a", vec![1.0, 0.0])], "c")
            .await
            .expect("add");

        let hits = store.search(&[1.0, 0.0], 20_000, "c", None).await.expect("search");
        assert_eq!(hits.len(), 1);
        let body = cluster.last_search.lock().unwrap().clone().expect("search sent");
        assert_eq!(body["knn"]["num_candidates"], 10_000);
        assert_eq!(body["knn"]["k"], 10_000);
        assert_eq!(body["size"], 10_000);

        store.search(&[1.0, 0.0], 3, "c", None).await.expect("search");
        let body = cluster.last_search.lock().unwrap().clone().expect("search sent");
        assert_eq!(body["knn"]["num_candidates"], 100);
        assert_eq!(body["knn"]["k"], 3);
    }
}
