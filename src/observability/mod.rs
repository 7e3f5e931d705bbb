//! Observability and telemetry.

mod logging;
mod metrics;

pub use logging::{LogFormat, LoggingConfig};
pub use metrics::{
    MetricsConfig, OPERATION_DURATION_MS, OPERATIONS_TOTAL, RECORDS_MIGRATED_TOTAL,
    install_prometheus, record_migrated, record_operation,
};

use crate::config::ObservabilitySettings;
use crate::{Error, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Full observability configuration.
#[derive(Debug)]
pub struct ObservabilityConfig {
    /// Logging configuration.
    pub logging: LoggingConfig,
    /// Metrics configuration.
    pub metrics: MetricsConfig,
}

impl ObservabilityConfig {
    /// Builds configuration from config settings with env overrides.
    #[must_use]
    pub fn from_settings(settings: Option<&ObservabilitySettings>, verbose: bool) -> Self {
        Self {
            logging: LoggingConfig::from_settings(
                settings.and_then(|s| s.logging.as_ref()),
                verbose,
            ),
            metrics: MetricsConfig::from_settings(settings.and_then(|s| s.metrics.as_ref())),
        }
    }
}

/// Handle for observability runtime components.
pub struct ObservabilityHandle {
    metrics: Option<PrometheusHandle>,
}

impl ObservabilityHandle {
    /// Renders the Prometheus exposition text, if metrics are enabled.
    #[must_use]
    pub fn render_metrics(&self) -> Option<String> {
        self.metrics.as_ref().map(PrometheusHandle::render)
    }
}

static OBSERVABILITY_INIT: OnceLock<()> = OnceLock::new();

/// Installs the global tracing subscriber and, if enabled, the metrics recorder.
///
/// Events go to the configured log file, or stderr when none is set.
///
/// # Errors
///
/// Returns an error if called twice, the log file cannot be opened, or a
/// global subscriber or recorder is already installed.
pub fn init(config: ObservabilityConfig) -> Result<ObservabilityHandle> {
    if OBSERVABILITY_INIT.get().is_some() {
        return Err(Error::operation(
            "observability_init",
            "observability already initialized",
        ));
    }

    let metrics = install_prometheus(config.metrics)?;

    let LoggingConfig {
        format,
        filter,
        file,
    } = config.logging;
    let ansi = file.is_none();
    let writer = match &file {
        Some(path) => BoxMakeWriter::new(open_log_file(path)?),
        None => BoxMakeWriter::new(io::stderr),
    };

    let installed = match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_current_span(true)
                    .with_target(true),
            )
            .with(filter)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(writer)
                    .with_ansi(ansi)
                    .with_target(true),
            )
            .with(filter)
            .try_init(),
    };
    installed.map_err(|e| Error::operation("observability_init", e))?;

    OBSERVABILITY_INIT
        .set(())
        .map_err(|()| Error::operation("observability_init", "already marked initialized"))?;

    tracing::debug!(
        format = ?format,
        file = ?file,
        metrics = metrics.is_some(),
        "Observability initialized"
    );
    Ok(ObservabilityHandle { metrics })
}

/// Opens `path` for appending, creating parent directories.
fn open_log_file(path: &Path) -> Result<Mutex<std::fs::File>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::operation("create_log_dir", format!("{}: {e}", parent.display())))?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(Mutex::new)
        .map_err(|e| Error::operation("open_log_file", format!("{}: {e}", path.display())))
}
