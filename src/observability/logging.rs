//! Structured logging configuration.

use crate::config::LoggingSettings;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Default filter directive when neither settings nor env specify one.
const DEFAULT_LEVEL: &str = "info";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses a format name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Resolved logging configuration.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Event filter.
    pub filter: EnvFilter,
    /// Optional log file; stderr when absent.
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Builds logging configuration from environment variables only.
    #[must_use]
    pub fn from_env(verbose: bool) -> Self {
        Self::from_settings(None, verbose)
    }

    /// Builds logging configuration from config settings with env overrides.
    ///
    /// Precedence for the filter: `RUST_LOG`, then `VECTORBRIDGE_LOG_LEVEL`,
    /// then the settings, then `debug` when `verbose`, then `info`.
    #[must_use]
    pub fn from_settings(settings: Option<&LoggingSettings>, verbose: bool) -> Self {
        let format = std::env::var("VECTORBRIDGE_LOG_FORMAT")
            .ok()
            .and_then(|v| LogFormat::parse(&v))
            .or_else(|| {
                settings
                    .and_then(|s| s.format.as_deref())
                    .and_then(LogFormat::parse)
            })
            .unwrap_or_default();

        let level = std::env::var("VECTORBRIDGE_LOG_LEVEL")
            .ok()
            .or_else(|| settings.and_then(|s| s.level.clone()))
            .unwrap_or_else(|| {
                if verbose {
                    "debug".to_string()
                } else {
                    DEFAULT_LEVEL.to_string()
                }
            });

        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&level))
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL));

        Self {
            format,
            filter,
            file: settings.and_then(|s| s.file.clone()),
        }
    }
}
