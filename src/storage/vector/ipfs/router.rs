//! Embedding and block-storage routers.
//!
//! A router bundles the two optional capabilities of the content-addressed
//! backend: generating embeddings for text-only records and storing blocks.
//! Callers check `is_embeddings_available` / `is_ipfs_available` before
//! every call.
//!
//! Persistent routers also keep a small name to root CID map so a store can
//! find its collections again after a restart.

use super::ipld::compute_cid;
use crate::embedding::Embedder;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Capability provider for [`super::IpfsVectorStore`].
#[async_trait]
pub trait Router: Send + Sync {
    /// True if [`Router::generate_embeddings`] can be called.
    fn is_embeddings_available(&self) -> bool;

    /// True if blocks can be stored and loaded.
    fn is_ipfs_available(&self) -> bool;

    /// Embeds each text, in order.
    async fn generate_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Model name recorded on generated records.
    fn embedding_model(&self) -> Option<String> {
        None
    }

    /// Stores a block and returns its CID.
    async fn store_to_ipfs(&self, bytes: Vec<u8>, pin: bool) -> Result<String>;

    /// Loads a block by CID.
    async fn load_from_ipfs(&self, cid: &str) -> Result<Vec<u8>>;

    /// True if blocks and saved roots outlive the process.
    fn is_persistent(&self) -> bool {
        false
    }

    /// Replaces the saved collection name to root CID map.
    async fn save_roots(&self, _roots: &BTreeMap<String, String>) -> Result<()> {
        Ok(())
    }

    /// Loads the map written by [`Router::save_roots`]. Empty if none was saved.
    async fn load_roots(&self) -> Result<BTreeMap<String, String>> {
        Ok(BTreeMap::new())
    }
}

/// File beside the blocks holding the saved roots.
const ROOTS_FILE: &str = "roots.json";

fn unavailable(operation: &str, capability: &str) -> Error {
    Error::OperationFailed {
        operation: operation.to_string(),
        cause: format!("router has no {capability} capability"),
    }
}

fn embed_with(embedder: &dyn Embedder, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    embedder.embed_batch(&refs)
}

/// Router with no capabilities; the store runs local-only.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRouter;

#[async_trait]
impl Router for NullRouter {
    fn is_embeddings_available(&self) -> bool {
        false
    }

    fn is_ipfs_available(&self) -> bool {
        false
    }

    async fn generate_embeddings(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(unavailable("generate_embeddings", "embedding"))
    }

    async fn store_to_ipfs(&self, _bytes: Vec<u8>, _pin: bool) -> Result<String> {
        Err(unavailable("store_to_ipfs", "storage"))
    }

    async fn load_from_ipfs(&self, _cid: &str) -> Result<Vec<u8>> {
        Err(unavailable("load_from_ipfs", "storage"))
    }
}

/// In-process block map with an optional embedder.
#[derive(Default)]
pub struct MemoryRouter {
    blocks: RwLock<HashMap<String, Vec<u8>>>,
    pinned: RwLock<HashSet<String>>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl MemoryRouter {
    /// Creates an empty router without embeddings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables embedding generation through `embedder`.
    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Number of stored blocks.
    pub async fn block_count(&self) -> usize {
        self.blocks.read().await.len()
    }

    /// True if `cid` was stored with `pin` set.
    pub async fn is_pinned(&self, cid: &str) -> bool {
        self.pinned.read().await.contains(cid)
    }
}

#[async_trait]
impl Router for MemoryRouter {
    fn is_embeddings_available(&self) -> bool {
        self.embedder.is_some()
    }

    fn is_ipfs_available(&self) -> bool {
        true
    }

    async fn generate_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let embedder = self
            .embedder
            .as_deref()
            .ok_or_else(|| unavailable("generate_embeddings", "embedding"))?;
        embed_with(embedder, texts)
    }

    fn embedding_model(&self) -> Option<String> {
        self.embedder.as_ref().map(|e| e.model_name().to_string())
    }

    async fn store_to_ipfs(&self, bytes: Vec<u8>, pin: bool) -> Result<String> {
        let cid = compute_cid(&bytes);
        if pin {
            self.pinned.write().await.insert(cid.clone());
        }
        self.blocks.write().await.insert(cid.clone(), bytes);
        Ok(cid)
    }

    async fn load_from_ipfs(&self, cid: &str) -> Result<Vec<u8>> {
        self.blocks
            .read()
            .await
            .get(cid)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("block {cid}")))
    }
}

/// Blocks stored as files named by CID under one directory.
///
/// Blocks are never garbage-collected, so every block is effectively pinned.
/// Saved roots live in `roots.json` in the same directory.
pub struct FsBlockRouter {
    dir: PathBuf,
    embedder: Option<Arc<dyn Embedder>>,
}

impl FsBlockRouter {
    /// Opens (creating if needed) a block directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| Error::OperationFailed {
            operation: "create_blocks_dir".to_string(),
            cause: format!("{}: {e}", dir.display()),
        })?;
        Ok(Self {
            dir,
            embedder: None,
        })
    }

    /// Enables embedding generation through `embedder`.
    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Block directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn block_path(&self, cid: &str) -> Result<PathBuf> {
        if cid.is_empty() || !cid.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidInput(format!("malformed cid '{cid}'")));
        }
        Ok(self.dir.join(cid))
    }
}

fn io_failure(operation: &str, path: &Path, e: &std::io::Error) -> Error {
    Error::OperationFailed {
        operation: operation.to_string(),
        cause: format!("{}: {e}", path.display()),
    }
}

#[async_trait]
impl Router for FsBlockRouter {
    fn is_embeddings_available(&self) -> bool {
        self.embedder.is_some()
    }

    fn is_ipfs_available(&self) -> bool {
        true
    }

    async fn generate_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let embedder = self
            .embedder
            .as_deref()
            .ok_or_else(|| unavailable("generate_embeddings", "embedding"))?;
        embed_with(embedder, texts)
    }

    fn embedding_model(&self) -> Option<String> {
        self.embedder.as_ref().map(|e| e.model_name().to_string())
    }

    async fn store_to_ipfs(&self, bytes: Vec<u8>, _pin: bool) -> Result<String> {
        let cid = compute_cid(&bytes);
        let path = self.block_path(&cid)?;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tokio::fs::write(&path, &bytes)
                .await
                .map_err(|e| Error::OperationFailed {
                    operation: "store_block".to_string(),
                    cause: format!("{}: {e}", path.display()),
                })?;
        }
        Ok(cid)
    }

    async fn load_from_ipfs(&self, cid: &str) -> Result<Vec<u8>> {
        let path = self.block_path(cid)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("block {cid}")))
            },
            Err(e) => Err(io_failure("load_block", &path, &e)),
        }
    }

    fn is_persistent(&self) -> bool {
        true
    }

    async fn save_roots(&self, roots: &BTreeMap<String, String>) -> Result<()> {
        let path = self.dir.join(ROOTS_FILE);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(roots)
            .map_err(|e| Error::operation("save_roots", e))?;
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| io_failure("save_roots", &tmp, &e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_failure("save_roots", &path, &e))
    }

    async fn load_roots(&self) -> Result<BTreeMap<String, String>> {
        let path = self.dir.join(ROOTS_FILE);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(io_failure("load_roots", &path, &e)),
        };
        serde_json::from_slice(&bytes).map_err(|e| Error::OperationFailed {
            operation: "load_roots".to_string(),
            cause: format!("{}: {e}", path.display()),
        })
    }
}
