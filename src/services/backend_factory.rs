//! Backend factory for store initialization.
//!
//! This module centralizes adapter construction so the manager never names
//! a concrete backend type.
//!
//! # Architecture
//!
//! ```text
//! BackendFactory::create(&StoreConfig)
//!   ├── Local         → LocalVectorStore (in-memory or persistent)
//!   ├── Qdrant        → QdrantVectorStore over HttpQdrantClient
//!   ├── Elasticsearch → ElasticsearchVectorStore over HttpSearchClusterClient
//!   └── Ipfs          → IpfsVectorStore over FsBlockRouter (saved roots restored)
//!                       or MemoryRouter
//! ```

use crate::Result;
use crate::config::StoreConfig;
use crate::storage::VectorStore;
use crate::storage::vector::{
    ElasticsearchVectorStore, FsBlockRouter, IpfsVectorStore, LocalVectorStore, MemoryRouter,
    QdrantVectorStore, Router,
};
use std::sync::Arc;
use std::time::Duration;

/// Factory for creating vector stores from configuration.
///
/// # Example
///
/// ```rust,ignore
/// use vectorbridge::{BackendFactory, StoreConfig};
///
/// let store = BackendFactory::create(&StoreConfig::local()).await?;
/// assert_eq!(store.backend_name(), "local");
/// ```
pub struct BackendFactory;

impl BackendFactory {
    /// Creates the adapter described by `config`.
    ///
    /// Remote adapters are created without contacting the engine; the first
    /// operation surfaces connection problems.
    ///
    /// # Errors
    ///
    /// Returns an error if a local directory cannot be opened or loaded, or
    /// an HTTP client cannot be built.
    pub async fn create(config: &StoreConfig) -> Result<Arc<dyn VectorStore>> {
        let store: Arc<dyn VectorStore> = match config {
            StoreConfig::Local { path, metric } => match path {
                Some(path) => Arc::new(LocalVectorStore::open(path, *metric)?),
                None => Arc::new(LocalVectorStore::in_memory(*metric)),
            },
            StoreConfig::Qdrant {
                url,
                api_key,
                timeout_ms,
                metric,
            } => Arc::new(QdrantVectorStore::connect(
                url,
                api_key.clone(),
                Duration::from_millis(*timeout_ms),
                *metric,
            )?),
            StoreConfig::Elasticsearch {
                url,
                index_prefix,
                api_key,
                timeout_ms,
                metric,
            } => Arc::new(ElasticsearchVectorStore::connect(
                url,
                index_prefix.clone(),
                api_key.clone(),
                Duration::from_millis(*timeout_ms),
                *metric,
            )?),
            StoreConfig::Ipfs { blocks_dir, metric } => {
                let router: Arc<dyn Router> = match blocks_dir {
                    Some(dir) => Arc::new(FsBlockRouter::open(dir)?),
                    None => Arc::new(MemoryRouter::new()),
                };
                Arc::new(IpfsVectorStore::open(router, *metric).await?)
            },
        };

        tracing::debug!(
            kind = %config.kind(),
            backend = store.backend_name(),
            "Created vector store"
        );
        Ok(store)
    }
}
