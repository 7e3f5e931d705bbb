//! Qdrant REST wire client.

use crate::models::{DistanceMetric, Metadata};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;

const BACKEND: &str = "qdrant";

/// Qdrant distance names.
#[must_use]
pub const fn distance_name(metric: DistanceMetric) -> &'static str {
    match metric {
        DistanceMetric::Cosine => "Cosine",
        DistanceMetric::Euclidean => "Euclid",
        DistanceMetric::Dot => "Dot",
    }
}

/// Parses a Qdrant distance name.
#[must_use]
pub fn parse_distance(name: &str) -> Option<DistanceMetric> {
    match name {
        "Cosine" => Some(DistanceMetric::Cosine),
        "Euclid" => Some(DistanceMetric::Euclidean),
        "Dot" => Some(DistanceMetric::Dot),
        _ => None,
    }
}

/// Collection description returned by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct QdrantCollection {
    /// Vector size.
    pub dimension: usize,
    /// Distance function.
    pub metric: DistanceMetric,
    /// Number of stored points.
    pub points_count: usize,
}

/// A stored point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QdrantPoint {
    /// Point id (UUID string).
    pub id: String,
    /// Vector.
    #[serde(default)]
    pub vector: Vec<f32>,
    /// Payload.
    #[serde(default)]
    pub payload: Metadata,
}

/// A search hit.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScoredPoint {
    /// Point id.
    pub id: String,
    /// Score as returned by the server.
    pub score: f32,
    /// Payload.
    #[serde(default)]
    pub payload: Metadata,
}

/// One page of a scroll.
#[derive(Debug, Clone, Default)]
pub struct ScrollPage {
    /// Points in id order.
    pub points: Vec<QdrantPoint>,
    /// Offset for the next page.
    pub next_offset: Option<String>,
}

/// Operations the adapter needs from a Qdrant server.
#[async_trait]
pub trait QdrantClient: Send + Sync {
    /// Lists collection names.
    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Describes a collection; `None` when absent.
    async fn get_collection(&self, name: &str) -> Result<Option<QdrantCollection>>;

    /// Creates a collection.
    async fn create_collection(
        &self,
        name: &str,
        dimension: usize,
        metric: DistanceMetric,
        params: &Metadata,
    ) -> Result<()>;

    /// Deletes a collection.
    async fn delete_collection(&self, name: &str) -> Result<()>;

    /// Inserts or replaces points.
    async fn upsert_points(&self, name: &str, points: Vec<QdrantPoint>) -> Result<()>;

    /// Nearest-neighbor search with an optional Qdrant filter object.
    async fn search_points(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<Value>,
    ) -> Result<Vec<ScoredPoint>>;

    /// Retrieves points by id, with vectors.
    async fn get_points(&self, name: &str, ids: &[String]) -> Result<Vec<QdrantPoint>>;

    /// Deletes points by id.
    async fn delete_points(&self, name: &str, ids: &[String]) -> Result<()>;

    /// Pages through points in id order starting at `offset` (inclusive).
    async fn scroll_points(
        &self,
        name: &str,
        offset: Option<String>,
        limit: usize,
    ) -> Result<ScrollPage>;

    /// Pings the server.
    async fn health(&self) -> Result<()>;
}

/// reqwest-based [`QdrantClient`].
pub struct HttpQdrantClient {
    client: Client,
    base_url: Url,
    api_key: Option<SecretString>,
}

#[derive(Deserialize)]
struct Envelope<T> {
    result: T,
}

impl HttpQdrantClient {
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
            .ok_or_else(|| Error::InvalidInput(format!("invalid qdrant url: '{raw}'")))?;
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
            .map_err(|()| Error::InvalidInput(format!("invalid qdrant url: '{}'", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<reqwest::RequestBuilder> {
        let builder = self.client.request(method, self.url(segments)?);
        Ok(match &self.api_key {
            Some(key) => builder.header("api-key", key.expose_secret()),
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
                cause: format!("qdrant returned {status}: {body}"),
            });
        }

        let envelope: Envelope<T> = response.json().await.map_err(|e| Error::OperationFailed {
            operation: operation.to_string(),
            cause: format!("invalid qdrant response: {e}"),
        })?;
        Ok(Some(envelope.result))
    }

    async fn send_required<T: DeserializeOwned>(
        &self,
        operation: &str,
        builder: reqwest::RequestBuilder,
    ) -> Result<T> {
        self.send(operation, builder)
            .await?
            .ok_or_else(|| Error::NotFound(format!("qdrant resource for {operation}")))
    }
}

#[async_trait]
impl QdrantClient for HttpQdrantClient {
    async fn list_collections(&self) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct Listed {
            collections: Vec<Named>,
        }
        #[derive(Deserialize)]
        struct Named {
            name: String,
        }

        let listed: Listed = self
            .send_required("list_collections", self.request(Method::GET, &["collections"])?)
            .await?;
        Ok(listed.collections.into_iter().map(|c| c.name).collect())
    }

    async fn get_collection(&self, name: &str) -> Result<Option<QdrantCollection>> {
        let raw: Option<Value> = self
            .send(
                "get_collection",
                self.request(Method::GET, &["collections", name])?,
            )
            .await?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        let vectors = &raw["config"]["params"]["vectors"];
        let dimension = vectors["size"].as_u64().unwrap_or(0);
        let metric = vectors["distance"]
            .as_str()
            .and_then(parse_distance)
            .ok_or_else(|| Error::OperationFailed {
                operation: "get_collection".to_string(),
                cause: format!("collection '{name}' uses an unsupported vector config"),
            })?;

        Ok(Some(QdrantCollection {
            dimension: usize::try_from(dimension).unwrap_or(0),
            metric,
            points_count: raw["points_count"]
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(0),
        }))
    }

    async fn create_collection(
        &self,
        name: &str,
        dimension: usize,
        metric: DistanceMetric,
        params: &Metadata,
    ) -> Result<()> {
        let mut body = json!({
            "vectors": {"size": dimension, "distance": distance_name(metric)},
        });
        if let Some(obj) = body.as_object_mut() {
            for (k, v) in params {
                obj.insert(k.clone(), v.clone());
            }
        }
        let _: bool = self
            .send_required(
                "create_collection",
                self.request(Method::PUT, &["collections", name])?
                    .json(&body),
            )
            .await?;
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let _: Option<bool> = self
            .send(
                "delete_collection",
                self.request(Method::DELETE, &["collections", name])?,
            )
            .await?;
        Ok(())
    }

    async fn upsert_points(&self, name: &str, points: Vec<QdrantPoint>) -> Result<()> {
        let _: Value = self
            .send_required(
                "upsert_points",
                self.request(Method::PUT, &["collections", name, "points"])?
                    .query(&[("wait", "true")])
                    .json(&json!({ "points": points })),
            )
            .await?;
        Ok(())
    }

    async fn search_points(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<Value>,
    ) -> Result<Vec<ScoredPoint>> {
        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });
        if let (Some(filter), Some(obj)) = (filter, body.as_object_mut()) {
            obj.insert("filter".to_string(), filter);
        }
        let hits: Option<Vec<ScoredPoint>> = self
            .send(
                "search_points",
                self.request(Method::POST, &["collections", name, "points", "search"])?
                    .json(&body),
            )
            .await?;
        Ok(hits.unwrap_or_default())
    }

    async fn get_points(&self, name: &str, ids: &[String]) -> Result<Vec<QdrantPoint>> {
        let points: Option<Vec<QdrantPoint>> = self
            .send(
                "get_points",
                self.request(Method::POST, &["collections", name, "points"])?
                    .json(&json!({ "ids": ids, "with_payload": true, "with_vector": true })),
            )
            .await?;
        Ok(points.unwrap_or_default())
    }

    async fn delete_points(&self, name: &str, ids: &[String]) -> Result<()> {
        let _: Option<Value> = self
            .send(
                "delete_points",
                self.request(Method::POST, &["collections", name, "points", "delete"])?
                    .query(&[("wait", "true")])
                    .json(&json!({ "points": ids })),
            )
            .await?;
        Ok(())
    }

    async fn scroll_points(
        &self,
        name: &str,
        offset: Option<String>,
        limit: usize,
    ) -> Result<ScrollPage> {
        #[derive(Deserialize)]
        struct Scrolled {
            points: Vec<QdrantPoint>,
            next_page_offset: Option<Value>,
        }

        let mut body = json!({ "limit": limit, "with_payload": true, "with_vector": true });
        if let (Some(offset), Some(obj)) = (offset, body.as_object_mut()) {
            obj.insert("offset".to_string(), Value::String(offset));
        }
        let scrolled: Option<Scrolled> = self
            .send(
                "scroll_points",
                self.request(Method::POST, &["collections", name, "points", "scroll"])?
                    .json(&body),
            )
            .await?;

        Ok(scrolled.map_or_else(ScrollPage::default, |s| ScrollPage {
            points: s.points,
            next_offset: s.next_page_offset.and_then(|v| match v {
                Value::String(s) => Some(s),
                Value::Null => None,
                other => Some(other.to_string()),
            }),
        }))
    }

    async fn health(&self) -> Result<()> {
        let response = self
            .request(Method::GET, &["healthz"])?
            .send()
            .await
            .map_err(|e| Error::connection(BACKEND, e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::OperationFailed {
                operation: "health".to_string(),
                cause: format!("qdrant returned {}", response.status()),
            })
        }
    }
}
