//! Named store registry.

use super::backend_factory::BackendFactory;
use super::bridge::{MigrationReport, VectorBridge};
use crate::config::{DEFAULT_BATCH_SIZE, StoreConfig, VectorBridgeConfig};
use crate::models::{HealthStatus, MetadataFilter, SearchResult};
use crate::storage::VectorStore;
use crate::{Error, Result};
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

struct StoreEntry {
    /// `None` for stores registered as ready instances.
    config: Option<StoreConfig>,
    store: Option<Arc<dyn VectorStore>>,
}

/// Registry of named stores with lazy construction.
///
/// Adapters are built on first use and memoized. Re-registering a name
/// drops the cached adapter and every bridge that uses it; otherwise config
/// changes do not reach an adapter that was already built.
///
/// # Example
///
/// ```rust,ignore
/// let manager = VectorStoreManager::from_config(&VectorBridgeConfig::load_default());
/// let report = manager.migrate("local", "qdrant", "docs", None, None, true).await?;
/// let replicas = manager.sync_collections("docs", "local", &["qdrant", "es"]).await;
/// ```
pub struct VectorStoreManager {
    stores: RwLock<BTreeMap<String, StoreEntry>>,
    bridges: RwLock<HashMap<(String, String), Arc<VectorBridge>>>,
    default_batch_size: usize,
}

impl Default for VectorStoreManager {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorStoreManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stores: RwLock::new(BTreeMap::new()),
            bridges: RwLock::new(HashMap::new()),
            default_batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Creates a manager with every store declared in `config` registered.
    #[must_use]
    pub fn from_config(config: &VectorBridgeConfig) -> Self {
        let stores = config
            .stores
            .iter()
            .map(|(name, store)| {
                (
                    name.clone(),
                    StoreEntry {
                        config: Some(store.clone()),
                        store: None,
                    },
                )
            })
            .collect();
        Self {
            stores: RwLock::new(stores),
            bridges: RwLock::new(HashMap::new()),
            default_batch_size: config.default_batch_size.max(1),
        }
    }

    /// Sets the batch size used when `migrate` is not given one.
    #[must_use]
    pub fn with_default_batch_size(mut self, batch_size: usize) -> Self {
        self.default_batch_size = batch_size.max(1);
        self
    }

    /// Registers (or replaces) a store configuration.
    pub async fn register_store(&self, name: impl Into<String>, config: StoreConfig) {
        self.insert(
            name.into(),
            StoreEntry {
                config: Some(config),
                store: None,
            },
        )
        .await;
    }

    /// Registers an already built store under `name`.
    pub async fn register_instance(&self, name: impl Into<String>, store: Arc<dyn VectorStore>) {
        self.insert(
            name.into(),
            StoreEntry {
                config: None,
                store: Some(store),
            },
        )
        .await;
    }

    async fn insert(&self, name: String, entry: StoreEntry) {
        self.bridges
            .write()
            .await
            .retain(|(src, dst), _| src != &name && dst != &name);
        let kind = entry.config.as_ref().map(|c| c.kind().as_str());
        tracing::debug!(store = %name, kind = ?kind, "Registered store");
        self.stores.write().await.insert(name, entry);
    }

    /// Returns the adapter for `name`, building it on first use.
    ///
    /// # Errors
    ///
    /// `NotFound` if no store is registered under `name`, or the
    /// construction error of the adapter.
    pub async fn get_store(&self, name: &str) -> Result<Arc<dyn VectorStore>> {
        if let Some(store) = self
            .stores
            .read()
            .await
            .get(name)
            .and_then(|e| e.store.clone())
        {
            return Ok(store);
        }

        let mut stores = self.stores.write().await;
        let entry = stores
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("store '{name}'")))?;
        if let Some(store) = &entry.store {
            return Ok(Arc::clone(store));
        }
        let config = entry
            .config
            .as_ref()
            .ok_or_else(|| Error::NotFound(format!("store '{name}'")))?;
        let store = BackendFactory::create(config).await?;
        entry.store = Some(Arc::clone(&store));
        tracing::info!(store = %name, backend = store.backend_name(), "Initialized store");
        Ok(store)
    }

    /// Returns the bridge from `source` to `target`, cached per pair.
    ///
    /// # Errors
    ///
    /// Returns an error if either store cannot be obtained.
    pub async fn get_bridge(&self, source: &str, target: &str) -> Result<Arc<VectorBridge>> {
        let key = (source.to_string(), target.to_string());
        if let Some(bridge) = self.bridges.read().await.get(&key) {
            return Ok(Arc::clone(bridge));
        }

        let bridge = Arc::new(VectorBridge::new(
            self.get_store(source).await?,
            self.get_store(target).await?,
            source,
            target,
        ));
        Ok(Arc::clone(
            self.bridges.write().await.entry(key).or_insert(bridge),
        ))
    }

    /// Migrates `collection` from `source` to `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if a store is unknown or the migration fails.
    pub async fn migrate(
        &self,
        source: &str,
        target: &str,
        collection: &str,
        target_name: Option<&str>,
        batch_size: Option<usize>,
        verify: bool,
    ) -> Result<MigrationReport> {
        let bridge = self.get_bridge(source, target).await?;
        bridge
            .migrate_collection(
                collection,
                target_name,
                batch_size.unwrap_or(self.default_batch_size),
                verify,
            )
            .await
    }

    /// Runs the same search on several stores concurrently.
    ///
    /// A store that is unknown or fails contributes an empty list; the
    /// failure is logged.
    pub async fn search_all(
        &self,
        query: &[f32],
        stores: &[&str],
        top_k: usize,
        collection: &str,
        filter: Option<&MetadataFilter>,
    ) -> BTreeMap<String, Vec<SearchResult>> {
        let searches = stores.iter().map(|&name| async move {
            let result = match self.get_store(name).await {
                Ok(store) => store.search(query, top_k, collection, filter).await,
                Err(e) => Err(e),
            };
            let hits = result.unwrap_or_else(|e| {
                tracing::warn!(store = %name, collection = %collection, error = %e, "Search failed");
                Vec::new()
            });
            (name.to_string(), hits)
        });
        join_all(searches).await.into_iter().collect()
    }

    /// Checks one store.
    ///
    /// Construction and engine failures are reported as an unhealthy status.
    ///
    /// # Errors
    ///
    /// `NotFound` if no store is registered under `name`.
    pub async fn health_check(&self, name: &str) -> Result<HealthStatus> {
        let kind = {
            let stores = self.stores.read().await;
            let entry = stores
                .get(name)
                .ok_or_else(|| Error::NotFound(format!("store '{name}'")))?;
            entry
                .config
                .as_ref()
                .map_or(name.to_string(), |c| c.kind().to_string())
        };
        let store = match self.get_store(name).await {
            Ok(store) => store,
            Err(e) => return Ok(HealthStatus::unhealthy(kind, e)),
        };
        Ok(store
            .health_check()
            .await
            .unwrap_or_else(|e| HealthStatus::unhealthy(store.backend_name(), e)))
    }

    /// Checks every registered store; never fails.
    pub async fn get_all_health(&self) -> BTreeMap<String, HealthStatus> {
        let names = self.list_stores().await;
        let checks = names.into_iter().map(|name| async move {
            let status = self
                .health_check(&name)
                .await
                .unwrap_or_else(|e| HealthStatus::unhealthy(name.clone(), e));
            (name, status)
        });
        join_all(checks).await.into_iter().collect()
    }

    /// Copies `collection` from `primary` into each replica.
    ///
    /// Returns the migrated count per replica, or `-1` for a replica whose
    /// migration failed. Replicas are processed one after another and a
    /// failure never stops the others.
    pub async fn sync_collections(
        &self,
        collection: &str,
        primary: &str,
        replicas: &[&str],
    ) -> BTreeMap<String, i64> {
        let mut results = BTreeMap::new();
        for &replica in replicas {
            let count = match self
                .migrate(primary, replica, collection, None, None, true)
                .await
            {
                Ok(report) => i64::try_from(report.migrated).unwrap_or(i64::MAX),
                Err(e) => {
                    tracing::warn!(
                        collection = %collection,
                        primary = %primary,
                        replica = %replica,
                        error = %e,
                        "Replica sync failed"
                    );
                    -1
                },
            };
            results.insert(replica.to_string(), count);
        }
        results
    }

    /// Registered store names, sorted.
    pub async fn list_stores(&self) -> Vec<String> {
        self.stores.read().await.keys().cloned().collect()
    }

    /// Closes every built adapter and forgets it.
    ///
    /// Close failures are logged; configured stores are rebuilt on next use.
    pub async fn close_all(&self) {
        self.bridges.write().await.clear();
        let built: Vec<(String, Arc<dyn VectorStore>)> = {
            let mut stores = self.stores.write().await;
            stores
                .iter_mut()
                .filter(|(_, entry)| entry.config.is_some())
                .filter_map(|(name, entry)| entry.store.take().map(|s| (name.clone(), s)))
                .collect()
        };
        for (name, store) in built {
            if let Err(e) = store.close().await {
                tracing::warn!(store = %name, error = %e, "Failed to close store");
            }
        }
        let instances: Vec<(String, Arc<dyn VectorStore>)> = self
            .stores
            .read()
            .await
            .iter()
            .filter_map(|(name, entry)| entry.store.clone().map(|s| (name.clone(), s)))
            .collect();
        for (name, store) in instances {
            if let Err(e) = store.close().await {
                tracing::warn!(store = %name, error = %e, "Failed to close store");
            }
        }
    }
}
