//! Telemetry: logging and metrics.
//!
//! - **Logging**: structured JSON/pretty/compact output through `tracing`
//! - **Metrics**: Prometheus counters for emitted, ingested and failed bundles
//!
//! # Example
//!
//! ```rust,no_run
//! use hubsync_core::telemetry::{init_logging, LoggingConfig};
//!
//! init_logging(&LoggingConfig::default()).expect("Failed to initialize logging");
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use metrics::{init_metrics, MetricsConfig, MetricsRegistry, SyncMetrics};
