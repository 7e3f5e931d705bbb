//! Elasticsearch REST wire client.

use crate::models::DistanceMetric;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;

const BACKEND: &str = "elasticsearch";

/// `dense_vector` similarity names.
#[must_use]
pub const fn similarity_name(metric: DistanceMetric) -> &'static str {
    match metric {
        DistanceMetric::Cosine => "cosine",
        DistanceMetric::Euclidean => "l2_norm",
        DistanceMetric::Dot => "max_inner_product",
    }
}

/// Parses a `dense_vector` similarity name.
///
/// `dot_product` is accepted for indices created outside this crate.
#[must_use]
pub fn parse_similarity(name: &str) -> Option<DistanceMetric> {
    canonical_similarity(name).map(|(_, metric)| metric)
}

fn canonical_similarity(name: &str) -> Option<(&'static str, DistanceMetric)> {
    match name {
        "cosine" => Some(("cosine", DistanceMetric::Cosine)),
        "l2_norm" => Some(("l2_norm", DistanceMetric::Euclidean)),
        "dot_product" => Some(("dot_product", DistanceMetric::Dot)),
        "max_inner_product" => Some(("max_inner_product", DistanceMetric::Dot)),
        _ => None,
    }
}

/// Collection schema recovered from an index mapping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexSchema {
    /// `dims` of the embedding field.
    pub dimension: usize,
    /// Metric stored in `_meta`, falling back to the field similarity.
    pub metric: DistanceMetric,
    /// Similarity the engine scores with; decides the score conversion.
    pub similarity: &'static str,
    /// Creation time stored in `_meta`.
    pub created_at: u64,
}

impl IndexSchema {
    /// Reads the schema out of a `mappings` object.
    #[must_use]
    pub fn from_mappings(mappings: &Value) -> Option<Self> {
        let field = &mappings["properties"]["embedding"];
        let dimension = usize::try_from(field["dims"].as_u64()?).ok()?;
        let meta = &mappings["_meta"];
        let native = field["similarity"].as_str().and_then(canonical_similarity);
        let metric = meta["metric"]
            .as_str()
            .and_then(DistanceMetric::parse)
            .or_else(|| native.map(|(_, metric)| metric))?;
        Some(Self {
            dimension,
            metric,
            similarity: native.map_or_else(|| similarity_name(metric), |(name, _)| name),
            created_at: meta["created_at"].as_u64().unwrap_or(0),
        })
    }
}

/// One `_bulk` line pair.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkAction {
    /// Index (create or replace) a document.
    Index {
        /// Document id.
        id: String,
        /// Document body.
        source: Value,
    },
}

/// One hit of a `_search` response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchHit {
    /// Document id.
    #[serde(rename = "_id")]
    pub id: String,
    /// Native relevance score (`null` for sorted listings).
    #[serde(rename = "_score", default)]
    pub score: Option<f32>,
    /// Document body.
    #[serde(rename = "_source", default)]
    pub source: Value,
    /// Sort values, present when the request sorted.
    #[serde(default)]
    pub sort: Option<Value>,
}

/// Minimal Elasticsearch surface used by the adapter.
#[async_trait]
pub trait SearchClusterClient: Send + Sync {
    /// Checks that the cluster answers.
    async fn ping(&self) -> Result<()>;

    /// Lists index names starting with `prefix`.
    async fn list_indices(&self, prefix: &str) -> Result<Vec<String>>;

    /// Returns the `mappings` object of an index, or `None` if absent.
    async fn get_mappings(&self, index: &str) -> Result<Option<Value>>;

    /// Creates an index from a full creation body.
    async fn create_index(&self, index: &str, body: &Value) -> Result<()>;

    /// Deletes an index; absent indices are not an error.
    async fn delete_index(&self, index: &str) -> Result<()>;

    /// Runs a `_bulk` request and returns the ids of rejected items.
    async fn bulk(&self, index: &str, actions: Vec<BulkAction>) -> Result<Vec<String>>;

    /// Fetches a document source.
    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Value>>;

    /// Deletes a document. Returns true if it existed.
    async fn delete_document(&self, index: &str, id: &str) -> Result<bool>;

    /// Counts documents.
    async fn count(&self, index: &str) -> Result<usize>;

    /// Runs a `_search` request body and returns the hits.
    async fn search(&self, index: &str, body: &Value) -> Result<Vec<SearchHit>>;
}

/// reqwest-based [`SearchClusterClient`].
pub struct HttpSearchClusterClient {
    client: Client,
    base_url: Url,
    api_key: Option<SecretString>,
}

impl HttpSearchClusterClient {
    /// Creates a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `base_url` is not an http(s) URL, or an
    /// error if the HTTP client cannot be built.
    pub fn new(
        base_url: impl AsRef<str>,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self> {
        let raw = base_url.as_ref();
        let base_url = Url::parse(raw)
            .ok()
            .filter(|u| !u.cannot_be_a_base())
            .ok_or_else(|| Error::InvalidInput(format!("invalid elasticsearch url: '{raw}'")))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::connection(BACKEND, e))?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    /// Appends `segments` to the base URL, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                Error::InvalidInput(format!("invalid elasticsearch url: '{}'", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<reqwest::RequestBuilder> {
        let builder = self.client.request(method, self.url(segments)?);
        Ok(match &self.api_key {
            Some(key) => builder.header("Authorization", format!("ApiKey {}", key.expose_secret())),
            None => builder,
        })
    }

    /// Sends a request; `Ok(None)` on 404.
    async fn send<T: DeserializeOwned>(
        &self,
        operation: &str,
        builder: reqwest::RequestBuilder,
    ) -> Result<Option<T>> {
        let response = builder
            .send()
            .await
            .map_err(|e| Error::connection(BACKEND, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::OperationFailed {
                operation: operation.to_string(),
                cause: format!("elasticsearch returned {status}: {body}"),
            });
        }

        response
            .json()
            .await
            .map(Some)
            .map_err(|e| Error::OperationFailed {
                operation: operation.to_string(),
                cause: format!("invalid elasticsearch response: {e}"),
            })
    }
}

/// Serializes bulk actions into the newline-delimited `_bulk` body.
#[must_use]
pub fn bulk_body(index: &str, actions: &[BulkAction]) -> String {
    let mut body = String::new();
    for action in actions {
        match action {
            BulkAction::Index { id, source } => {
                body.push_str(&json!({"index": {"_index": index, "_id": id}}).to_string());
                body.push('\n');
                body.push_str(&source.to_string());
            },
        }
        body.push('\n');
    }
    body
}

/// Ids of the items a `_bulk` response reports as failed.
#[must_use]
pub fn failed_bulk_ids(response: &Value) -> Vec<String> {
    if !response["errors"].as_bool().unwrap_or(false) {
        return Vec::new();
    }
    response["items"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_object()?.values().next())
                .filter(|result| !result["error"].is_null())
                .filter_map(|result| result["_id"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl SearchClusterClient for HttpSearchClusterClient {
    async fn ping(&self) -> Result<()> {
        let _: Value = self
            .send("ping", self.request(Method::GET, &[])?)
            .await?
            .ok_or_else(|| Error::operation("ping", "cluster root returned 404"))?;
        Ok(())
    }

    async fn list_indices(&self, prefix: &str) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct CatIndex {
            index: String,
        }

        let listed: Option<Vec<CatIndex>> = self
            .send(
                "list_indices",
                self.request(Method::GET, &["_cat", "indices", &format!("{prefix}*")])?
                    .query(&[("format", "json")]),
            )
            .await?;
        Ok(listed
            .unwrap_or_default()
            .into_iter()
            .map(|i| i.index)
            .collect())
    }

    async fn get_mappings(&self, index: &str) -> Result<Option<Value>> {
        let raw: Option<Value> = self
            .send(
                "get_mappings",
                self.request(Method::GET, &[index, "_mapping"])?,
            )
            .await?;
        Ok(raw.map(|v| v[index]["mappings"].clone()))
    }

    async fn create_index(&self, index: &str, body: &Value) -> Result<()> {
        let _: Value = self
            .send(
                "create_index",
                self.request(Method::PUT, &[index])?.json(body),
            )
            .await?
            .ok_or_else(|| Error::operation("create_index", format!("index '{index}'")))?;
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        let _: Option<Value> = self
            .send(
                "delete_index",
                self.request(Method::DELETE, &[index])?,
            )
            .await?;
        Ok(())
    }

    async fn bulk(&self, index: &str, actions: Vec<BulkAction>) -> Result<Vec<String>> {
        let response: Value = self
            .send(
                "bulk",
                self.request(Method::POST, &["_bulk"])?
                    .query(&[("refresh", "true")])
                    .header("Content-Type", "application/x-ndjson")
                    .body(bulk_body(index, &actions)),
            )
            .await?
            .ok_or_else(|| Error::operation("bulk", format!("index '{index}'")))?;
        Ok(failed_bulk_ids(&response))
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Value>> {
        let raw: Option<Value> = self
            .send(
                "get_document",
                self.request(Method::GET, &[index, "_doc", id])?,
            )
            .await?;
        Ok(raw
            .filter(|v| v["found"].as_bool().unwrap_or(false))
            .map(|v| v["_source"].clone()))
    }

    async fn delete_document(&self, index: &str, id: &str) -> Result<bool> {
        let raw: Option<Value> = self
            .send(
                "delete_document",
                self.request(Method::DELETE, &[index, "_doc", id])?
                    .query(&[("refresh", "true")]),
            )
            .await?;
        Ok(raw.is_some_and(|v| v["result"] == "deleted"))
    }

    async fn count(&self, index: &str) -> Result<usize> {
        let raw: Option<Value> = self
            .send("count", self.request(Method::GET, &[index, "_count"])?)
            .await?;
        Ok(raw
            .and_then(|v| v["count"].as_u64())
            .and_then(|c| usize::try_from(c).ok())
            .unwrap_or(0))
    }

    async fn search(&self, index: &str, body: &Value) -> Result<Vec<SearchHit>> {
        #[derive(Deserialize)]
        struct Response {
            hits: Hits,
        }
        #[derive(Deserialize)]
        struct Hits {
            hits: Vec<SearchHit>,
        }

        let response: Option<Response> = self
            .send(
                "search",
                self.request(Method::POST, &[index, "_search"])?.json(body),
            )
            .await?;
        Ok(response.map(|r| r.hits.hits).unwrap_or_default())
    }
}
