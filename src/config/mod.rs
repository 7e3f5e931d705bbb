//! Configuration management.
//!
//! Stores are declared as `[stores.<name>]` tables in a TOML file:
//!
//! ```toml
//! data_dir = "/var/lib/vectorbridge"
//! default_batch_size = 100
//!
//! [logging]
//! format = "json"
//! level = "info"
//!
//! [stores.local]
//! type = "local"
//! metric = "cosine"
//!
//! [stores.qdrant]
//! type = "qdrant"
//! url = "http://localhost:6333"
//! api_key = "${QDRANT_API_KEY}"
//! ```

use crate::models::DistanceMetric;
use crate::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default migration/export batch size.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default HTTP timeout for remote engines.
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Default Elasticsearch index prefix.
pub const DEFAULT_INDEX_PREFIX: &str = "vb_";

/// Main configuration for vectorbridge.
#[derive(Debug, Clone)]
pub struct VectorBridgeConfig {
    /// Root directory for local persistence.
    pub data_dir: PathBuf,
    /// Batch size used by migrations when callers do not pass one.
    pub default_batch_size: usize,
    /// Declared stores by name.
    pub stores: BTreeMap<String, StoreConfig>,
    /// Logging and metrics settings.
    pub observability: ObservabilitySettings,
}

/// Closed set of engine kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    /// In-process append-only index.
    Local,
    /// Qdrant REST service.
    Qdrant,
    /// Elasticsearch/OpenSearch cluster.
    Elasticsearch,
    /// Content-addressed block store with a local index.
    Ipfs,
}

impl StoreKind {
    /// Returns the kind name used in config files.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Qdrant => "qdrant",
            Self::Elasticsearch => "elasticsearch",
            Self::Ipfs => "ipfs",
        }
    }
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime configuration of one store.
#[derive(Debug, Clone)]
pub enum StoreConfig {
    /// In-process index adapter.
    Local {
        /// Persistence directory; in-memory when `None`.
        path: Option<PathBuf>,
        /// Metric for implicitly created collections.
        metric: DistanceMetric,
    },
    /// Qdrant adapter.
    Qdrant {
        /// Base URL, e.g. `http://localhost:6333`.
        url: String,
        /// Optional API key sent as `api-key`.
        api_key: Option<SecretString>,
        /// Request timeout in milliseconds.
        timeout_ms: u64,
        /// Metric for implicitly created collections.
        metric: DistanceMetric,
    },
    /// Elasticsearch adapter.
    Elasticsearch {
        /// Base URL, e.g. `http://localhost:9200`.
        url: String,
        /// Prefix prepended to every index name.
        index_prefix: String,
        /// Optional API key sent as `Authorization: ApiKey`.
        api_key: Option<SecretString>,
        /// Request timeout in milliseconds.
        timeout_ms: u64,
        /// Metric for implicitly created collections.
        metric: DistanceMetric,
    },
    /// Content-addressed adapter.
    Ipfs {
        /// Directory holding blocks; an in-memory router when `None`.
        blocks_dir: Option<PathBuf>,
        /// Metric for implicitly created collections.
        metric: DistanceMetric,
    },
}

impl StoreConfig {
    /// In-memory local store with the default metric.
    #[must_use]
    pub fn local() -> Self {
        Self::Local {
            path: None,
            metric: DistanceMetric::default(),
        }
    }

    /// Content-addressed store backed by an in-memory router.
    #[must_use]
    pub fn ipfs_in_memory() -> Self {
        Self::Ipfs {
            blocks_dir: None,
            metric: DistanceMetric::default(),
        }
    }

    /// Returns the engine kind.
    #[must_use]
    pub const fn kind(&self) -> StoreKind {
        match self {
            Self::Local { .. } => StoreKind::Local,
            Self::Qdrant { .. } => StoreKind::Qdrant,
            Self::Elasticsearch { .. } => StoreKind::Elasticsearch,
            Self::Ipfs { .. } => StoreKind::Ipfs,
        }
    }

    /// Returns the metric for implicitly created collections.
    #[must_use]
    pub const fn metric(&self) -> DistanceMetric {
        match self {
            Self::Local { metric, .. }
            | Self::Qdrant { metric, .. }
            | Self::Elasticsearch { metric, .. }
            | Self::Ipfs { metric, .. } => *metric,
        }
    }

    /// Converts a config file entry, resolving `${VAR}` references.
    ///
    /// Relative local paths are resolved against `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the metric name is unknown.
    pub fn from_config_file(file: ConfigFileStore, data_dir: &Path) -> Result<Self> {
        let metric = |name: Option<String>| -> Result<DistanceMetric> {
            name.map_or(Ok(DistanceMetric::default()), |m| {
                DistanceMetric::parse(&m)
                    .ok_or_else(|| Error::InvalidInput(format!("unknown metric: {m}")))
            })
        };
        let resolve = |p: String| {
            let path = PathBuf::from(expand_env_vars(&p));
            if path.is_absolute() {
                path
            } else {
                data_dir.join(path)
            }
        };
        let secret = |k: Option<String>| {
            k.map(|v| expand_env_vars(&v))
                .filter(|v| !v.is_empty())
                .map(SecretString::from)
        };

        Ok(match file {
            ConfigFileStore::Local { path, metric: m } => Self::Local {
                path: path.map(resolve),
                metric: metric(m)?,
            },
            ConfigFileStore::Qdrant {
                url,
                api_key,
                timeout_ms,
                metric: m,
            } => Self::Qdrant {
                url: expand_env_vars(&url),
                api_key: secret(api_key),
                timeout_ms: timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
                metric: metric(m)?,
            },
            ConfigFileStore::Elasticsearch {
                url,
                index_prefix,
                api_key,
                timeout_ms,
                metric: m,
            } => Self::Elasticsearch {
                url: expand_env_vars(&url),
                index_prefix: index_prefix.unwrap_or_else(|| DEFAULT_INDEX_PREFIX.to_string()),
                api_key: secret(api_key),
                timeout_ms: timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
                metric: metric(m)?,
            },
            ConfigFileStore::Ipfs {
                blocks_dir,
                metric: m,
            } => Self::Ipfs {
                blocks_dir: blocks_dir.map(resolve),
                metric: metric(m)?,
            },
        })
    }
}

/// Logging and metrics settings from the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObservabilitySettings {
    /// Logging section.
    pub logging: Option<LoggingSettings>,
    /// Metrics section.
    pub metrics: Option<MetricsSettings>,
}

/// `[logging]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingSettings {
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// Filter directive, e.g. `info` or `vectorbridge=debug`.
    pub level: Option<String>,
    /// Optional log file path.
    pub file: Option<PathBuf>,
}

/// `[metrics]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsSettings {
    /// Install the Prometheus recorder.
    pub enabled: Option<bool>,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Data directory.
    pub data_dir: Option<String>,
    /// Default batch size.
    pub default_batch_size: Option<usize>,
    /// Logging section.
    pub logging: Option<LoggingSettings>,
    /// Metrics section.
    pub metrics: Option<MetricsSettings>,
    /// Store tables.
    #[serde(default)]
    pub stores: BTreeMap<String, ConfigFileStore>,
}

/// One `[stores.<name>]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConfigFileStore {
    /// `type = "local"`.
    Local {
        /// Persistence directory.
        path: Option<String>,
        /// Metric name.
        metric: Option<String>,
    },
    /// `type = "qdrant"`.
    Qdrant {
        /// Base URL.
        url: String,
        /// API key, may reference `${VAR}`.
        api_key: Option<String>,
        /// Request timeout.
        timeout_ms: Option<u64>,
        /// Metric name.
        metric: Option<String>,
    },
    /// `type = "elasticsearch"`.
    Elasticsearch {
        /// Base URL.
        url: String,
        /// Index name prefix.
        index_prefix: Option<String>,
        /// API key, may reference `${VAR}`.
        api_key: Option<String>,
        /// Request timeout.
        timeout_ms: Option<u64>,
        /// Metric name.
        metric: Option<String>,
    },
    /// `type = "ipfs"`.
    Ipfs {
        /// Block directory.
        blocks_dir: Option<String>,
        /// Metric name.
        metric: Option<String>,
    },
}

impl Default for VectorBridgeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            default_batch_size: DEFAULT_BATCH_SIZE,
            stores: BTreeMap::new(),
            observability: ObservabilitySettings::default(),
        }
    }
}

impl VectorBridgeConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML or a store entry is invalid.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;
        Self::from_config_file(file)
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        Self::from_toml(&contents)
    }

    /// Loads configuration from the default location.
    ///
    /// Reads `<config_dir>/vectorbridge/config.toml`; returns defaults when
    /// the file is missing or invalid.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(path) = default_config_path() else {
            return Self::default().with_env_overrides();
        };
        if path.exists() {
            match Self::load_from_file(&path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring invalid config file");
                },
            }
        }
        Self::default().with_env_overrides()
    }

    fn from_config_file(file: ConfigFile) -> Result<Self> {
        let mut config = Self::default();

        if let Some(data_dir) = file.data_dir {
            config.data_dir = PathBuf::from(expand_env_vars(&data_dir));
        }
        config = config.with_env_overrides();

        if let Some(batch) = file.default_batch_size {
            if batch == 0 {
                return Err(Error::InvalidInput(
                    "default_batch_size must be greater than zero".to_string(),
                ));
            }
            config.default_batch_size = batch;
        }
        config.observability = ObservabilitySettings {
            logging: file.logging,
            metrics: file.metrics,
        };
        for (name, store) in file.stores {
            let store = StoreConfig::from_config_file(store, &config.data_dir)?;
            config.stores.insert(name, store);
        }

        Ok(config)
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var("VECTORBRIDGE_DATA_DIR") {
            if !dir.is_empty() {
                self.data_dir = PathBuf::from(dir);
            }
        }
        self
    }

    /// Sets the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    /// Declares a store.
    #[must_use]
    pub fn with_store(mut self, name: impl Into<String>, store: StoreConfig) -> Self {
        self.stores.insert(name.into(), store);
        self
    }
}

/// Returns `<config_dir>/vectorbridge/config.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| {
        dirs.config_dir()
            .join("vectorbridge")
            .join("config.toml")
    })
}

fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".vectorbridge"),
        |dirs| dirs.data_local_dir().join("vectorbridge"),
    )
}

/// Replaces `${VAR}` references with environment values.
///
/// Unset variables expand to an empty string; an unterminated `${` is kept verbatim.
#[must_use]
pub fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        out.push_str(&std::env::var(&after[..end]).unwrap_or_default());
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    const SAMPLE: &str = r#"
data_dir = "/srv/vb"
default_batch_size = 50

[logging]
format = "json"
level = "debug"

[stores.local]
type = "local"
path = "local"
metric = "euclidean"

[stores.qdrant]
type = "qdrant"
url = "http://localhost:6333"
api_key = "secret"

[stores.es]
type = "elasticsearch"
url = "http://localhost:9200"

[stores.ipfs]
type = "ipfs"
"#;

    #[test]
    fn test_parse_sample() {
        let config = VectorBridgeConfig::from_toml(SAMPLE).expect("parse failed");
        assert_eq!(config.default_batch_size, 50);
        assert_eq!(config.stores.len(), 4);

        match &config.stores["local"] {
            StoreConfig::Local { path, metric } => {
                assert!(path.as_ref().is_some_and(|p| p.ends_with("local")));
                assert_eq!(*metric, DistanceMetric::Euclidean);
            },
            other => panic!("unexpected store: {other:?}"),
        }
        match &config.stores["qdrant"] {
            StoreConfig::Qdrant {
                api_key, timeout_ms, ..
            } => {
                assert_eq!(*timeout_ms, DEFAULT_TIMEOUT_MS);
                assert_eq!(api_key.as_ref().map(|k| k.expose_secret()), Some("secret"));
            },
            other => panic!("unexpected store: {other:?}"),
        }
        match &config.stores["es"] {
            StoreConfig::Elasticsearch { index_prefix, .. } => {
                assert_eq!(index_prefix, DEFAULT_INDEX_PREFIX);
            },
            other => panic!("unexpected store: {other:?}"),
        }
        assert_eq!(config.stores["ipfs"].kind(), StoreKind::Ipfs);
        assert_eq!(
            config
                .observability
                .logging
                .as_ref()
                .and_then(|l| l.format.as_deref()),
            Some("json")
        );
    }

    #[test]
    fn test_unknown_store_type_is_rejected() {
        let toml = "[stores.x]\ntype = \"pinecone\"\n";
        assert!(VectorBridgeConfig::from_toml(toml).is_err());
    }

    #[test]
    fn test_unknown_metric_is_rejected() {
        let toml = "[stores.x]\ntype = \"local\"\nmetric = \"hamming\"\n";
        assert!(matches!(
            VectorBridgeConfig::from_toml(toml),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        assert!(VectorBridgeConfig::from_toml("default_batch_size = 0").is_err());
    }

    #[test]
    fn test_expand_env_vars() {
        assert_eq!(expand_env_vars("plain"), "plain");
        assert_eq!(expand_env_vars("${VB_TEST_SURELY_UNSET_VAR}x"), "x");
        assert_eq!(expand_env_vars("a${unterminated"), "a${unterminated");
    }

    #[test]
    fn test_store_kind_names() {
        assert_eq!(StoreConfig::local().kind().as_str(), "local");
        assert_eq!(StoreConfig::ipfs_in_memory().kind().to_string(), "ipfs");
    }
}
