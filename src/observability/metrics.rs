//! Prometheus metrics.
//!
//! Adapters and the bridge emit through the `metrics` facade; nothing is
//! recorded until [`install_prometheus`] installs a recorder.

use crate::config::MetricsSettings;
use crate::storage::traits::elapsed_ms;
use crate::{Error, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Counter of adapter operations, labelled by backend, operation and status.
pub const OPERATIONS_TOTAL: &str = "vector_store_operations_total";

/// Histogram of adapter operation latency in milliseconds.
pub const OPERATION_DURATION_MS: &str = "vector_store_operation_duration_ms";

/// Counter of records written by bridge migrations.
pub const RECORDS_MIGRATED_TOTAL: &str = "bridge_records_migrated_total";

/// Metrics configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsConfig {
    /// Whether a recorder is installed.
    pub enabled: bool,
}

impl MetricsConfig {
    /// Builds metrics configuration from config settings with env overrides.
    #[must_use]
    pub fn from_settings(settings: Option<&MetricsSettings>) -> Self {
        let mut enabled = settings.and_then(|s| s.enabled).unwrap_or(false);
        if let Some(flag) = parse_bool_env("VECTORBRIDGE_METRICS_ENABLED") {
            enabled = flag;
        }
        Self { enabled }
    }
}

/// Installs the Prometheus recorder.
///
/// Returns a handle whose `render()` produces the exposition text.
///
/// # Errors
///
/// Returns an error if a global recorder is already installed.
pub fn install_prometheus(config: MetricsConfig) -> Result<Option<PrometheusHandle>> {
    if !config.enabled {
        return Ok(None);
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::OperationFailed {
            operation: "metrics_recorder_install".to_string(),
            cause: e.to_string(),
        })?;

    Ok(Some(handle))
}

/// Records one adapter operation outcome and its latency.
pub fn record_operation<T>(
    backend: &'static str,
    operation: &'static str,
    result: &Result<T>,
    started: Instant,
) {
    let status = if result.is_ok() { "success" } else { "error" };
    metrics::counter!(
        OPERATIONS_TOTAL,
        "backend" => backend,
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    #[allow(clippy::cast_precision_loss)]
    metrics::histogram!(
        OPERATION_DURATION_MS,
        "backend" => backend,
        "operation" => operation
    )
    .record(elapsed_ms(started) as f64);
}

/// Records records written by one migration batch.
pub fn record_migrated(source: &str, target: &str, count: usize) {
    metrics::counter!(
        RECORDS_MIGRATED_TOTAL,
        "source" => source.to_string(),
        "target" => target.to_string()
    )
    .increment(count as u64);
}

fn parse_bool_env(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .and_then(|v| match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}
