//! Prometheus metrics for bundle synchronization.
//!
//! Metrics are recorded through the `metrics` facade everywhere; only the
//! central binary installs a Prometheus recorder. Without a recorder every
//! call is a no-op, so the agent and tests pay nothing.
//!
//! # Example
//!
//! ```rust,no_run
//! use hubsync_core::telemetry::metrics::{init_metrics, MetricsConfig, MetricsRegistry};
//!
//! init_metrics(&MetricsConfig::default(), "hubsync-central").expect("metrics");
//! let text = MetricsRegistry::global().render();
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use crate::bundle::BundleKey;

/// Global metrics registry.
static METRICS_REGISTRY: OnceLock<MetricsRegistry> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Histogram buckets for publish durations (in seconds)
    #[serde(default = "default_duration_buckets")]
    pub duration_buckets: Vec<f64>,

    /// Global labels to add to all metrics
    #[serde(default)]
    pub global_labels: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            duration_buckets: default_duration_buckets(),
            global_labels: HashMap::new(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_duration_buckets() -> Vec<f64> {
    vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
}

/// Central metrics registry.
pub struct MetricsRegistry {
    prometheus_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("prometheus_handle", &self.prometheus_handle.is_some())
            .finish()
    }
}

impl MetricsRegistry {
    /// Get the global metrics registry.
    ///
    /// Before [`init_metrics`] ran this is an empty registry that renders nothing.
    pub fn global() -> &'static MetricsRegistry {
        METRICS_REGISTRY.get_or_init(|| MetricsRegistry {
            prometheus_handle: None,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.prometheus_handle.is_some()
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.prometheus_handle
            .as_ref()
            .map(|h| h.render())
            .unwrap_or_default()
    }
}

/// Install the Prometheus recorder and publish its handle globally.
///
/// Only the first successful call takes effect; the recorder is process-wide.
pub fn init_metrics(config: &MetricsConfig, service_name: &str) -> anyhow::Result<&'static MetricsRegistry> {
    if !config.enabled {
        return Ok(MetricsRegistry::global());
    }

    let mut builder = PrometheusBuilder::new()
        .add_global_label("service", service_name)
        .set_buckets(&config.duration_buckets)?;
    for (key, value) in &config.global_labels {
        builder = builder.add_global_label(key, value);
    }

    let handle = builder.install_recorder()?;
    register_metric_descriptions();

    if METRICS_REGISTRY
        .set(MetricsRegistry {
            prometheus_handle: Some(handle),
        })
        .is_err()
    {
        tracing::warn!("Metrics registry was read before initialization; /metrics will be empty");
    }

    tracing::info!(service_name = %service_name, "Metrics initialized");
    Ok(MetricsRegistry::global())
}

fn register_metric_descriptions() {
    describe_counter!(
        "hubsync_bundles_emitted_total",
        "Bundle snapshots accepted by a transport"
    );
    describe_counter!(
        "hubsync_publish_failures_total",
        "Bundle publishes that failed after transport retries"
    );
    describe_histogram!(
        "hubsync_publish_duration_seconds",
        "Time spent publishing one bundle snapshot"
    );
    describe_counter!(
        "hubsync_bundles_ingested_total",
        "Bundles received by the conflator, by decision"
    );
    describe_counter!("hubsync_errors_total", "Errors raised, by code");
    describe_gauge!(
        "hubsync_tracked_keys",
        "Number of (leaf hub, category) keys the conflator tracks"
    );
}

/// Synchronization metrics shared by the agent and the central side.
pub struct SyncMetrics;

impl SyncMetrics {
    /// Record a successful publish.
    pub fn record_emitted(key: &BundleKey, transport: &str, duration: Duration) {
        counter!(
            "hubsync_bundles_emitted_total",
            "category" => key.category.as_str(),
            "transport" => transport.to_string(),
        )
        .increment(1);

        histogram!(
            "hubsync_publish_duration_seconds",
            "transport" => transport.to_string(),
        )
        .record(duration.as_secs_f64());
    }

    /// Record a publish that ultimately failed.
    pub fn record_publish_failure(key: &BundleKey, transport: &str) {
        counter!(
            "hubsync_publish_failures_total",
            "category" => key.category.as_str(),
            "transport" => transport.to_string(),
        )
        .increment(1);
    }

    /// Record a conflator decision.
    pub fn record_ingest(key: &BundleKey, decision: &'static str) {
        counter!(
            "hubsync_bundles_ingested_total",
            "category" => key.category.as_str(),
            "decision" => decision,
        )
        .increment(1);
    }

    pub fn set_tracked_keys(count: usize) {
        gauge!("hubsync_tracked_keys").set(count as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::BundleCategory;

    #[test]
    fn test_metrics_config_defaults() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert!(!config.duration_buckets.is_empty());
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let key = BundleKey::new("hub1", BundleCategory::Policies);
        SyncMetrics::record_emitted(&key, "channel", Duration::from_millis(3));
        SyncMetrics::record_publish_failure(&key, "channel");
        SyncMetrics::record_ingest(&key, "applied");
        SyncMetrics::set_tracked_keys(1);
    }

    #[test]
    fn test_registry_without_recorder_renders_nothing() {
        let registry = MetricsRegistry {
            prometheus_handle: None,
        };
        assert!(!registry.is_enabled());
        assert!(registry.render().is_empty());
    }
}
