//! Configuration management.
//!
//! Values come from an optional TOML file overlaid with `HUBSYNC__*`
//! environment variables (`HUBSYNC__AGENT__LEAF_HUB_NAME=hub1`,
//! `HUBSYNC__CENTRAL__PORT=9000`). Durations use humantime strings such as
//! `"500ms"` or `"30s"`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::{AgentOptions, EmitPolicy};
use crate::bundle::BundleCategory;
use crate::error::{ErrorCode, Result, SyncError};
use crate::telemetry::{LoggingConfig, MetricsConfig};
use crate::transport::{HttpTransportConfig, RetryPolicy};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "HUBSYNC";

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Leaf agent configuration
    #[serde(default)]
    pub agent: AgentConfig,

    /// Agent-to-central transport configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Central aggregator configuration
    #[serde(default)]
    pub central: CentralConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Name of the leaf hub this agent reports for
    #[serde(default)]
    pub leaf_hub_name: String,

    /// File holding the durable incarnation counter
    #[serde(default = "default_incarnation_file")]
    pub incarnation_file: PathBuf,

    /// Categories to track
    #[serde(default = "default_categories")]
    pub categories: Vec<BundleCategory>,

    /// When emitters fire
    #[serde(default)]
    pub emit: EmitPolicy,

    /// Control-info heartbeat period; unset disables heartbeats
    #[serde(default = "default_heartbeat_interval", with = "humantime_serde")]
    pub heartbeat_interval: Option<Duration>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            leaf_hub_name: String::new(),
            incarnation_file: default_incarnation_file(),
            categories: default_categories(),
            emit: EmitPolicy::default(),
            heartbeat_interval: default_heartbeat_interval(),
        }
    }
}

impl AgentConfig {
    /// Supervisor options for a run with the given incarnation.
    pub fn options(&self, incarnation: u64) -> AgentOptions {
        let options = AgentOptions::new(self.leaf_hub_name.clone(), incarnation)
            .with_categories(self.categories.iter().copied())
            .with_emit_policy(self.emit);
        match self.heartbeat_interval {
            Some(interval) => options.with_heartbeat(interval),
            None => options,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(flatten)]
    pub http: HttpTransportConfig,

    #[serde(default)]
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CentralConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl CentralConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// Default value functions
fn default_incarnation_file() -> PathBuf { PathBuf::from("hubsync-incarnation.json") }
fn default_categories() -> Vec<BundleCategory> { BundleCategory::ALL.to_vec() }
fn default_heartbeat_interval() -> Option<Duration> { Some(Duration::from_secs(60)) }
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }

impl Config {
    /// Load configuration from the environment only.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, overlaid with the environment.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from `path` when given, otherwise from the environment only.
    pub fn load_from(path: Option<&str>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::load(),
        }
    }

    /// Check settings shared by every binary.
    pub fn validate(&self) -> Result<()> {
        reqwest::Url::parse(&self.transport.http.central_url).map_err(|e| {
            SyncError::new(
                ErrorCode::InvalidConfiguration,
                format!("invalid central_url {:?}: {}", self.transport.http.central_url, e),
            )
        })?;

        if self.transport.http.request_timeout.is_zero() {
            return Err(invalid("transport.request_timeout must be greater than zero"));
        }

        if let EmitPolicy::Interval { period } = self.agent.emit {
            if period.is_zero() {
                return Err(invalid("agent.emit.period must be greater than zero"));
            }
        }

        if self.agent.heartbeat_interval.is_some_and(|d| d.is_zero()) {
            return Err(invalid("agent.heartbeat_interval must be greater than zero"));
        }

        self.transport.retry.backoff.validate()?;

        Ok(())
    }

    /// Additionally check settings only the agent needs.
    pub fn validate_agent(&self) -> Result<()> {
        self.validate()?;
        if self.agent.leaf_hub_name.trim().is_empty() {
            return Err(invalid("agent.leaf_hub_name is required"));
        }
        if self.agent.categories.is_empty() {
            return Err(invalid("agent.categories must not be empty"));
        }
        Ok(())
    }
}

fn invalid(message: &'static str) -> SyncError {
    SyncError::new(ErrorCode::InvalidConfiguration, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.central.bind_addr(), "0.0.0.0:8080");
        assert_eq!(config.agent.categories.len(), 4);
    }

    #[test]
    fn test_agent_requires_leaf_hub_name() {
        let config = Config::default();
        let err = config.validate_agent().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidConfiguration);
    }

    #[test]
    fn test_rejects_bad_central_url() {
        let mut config = Config::default();
        config.transport.http.central_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_interval() {
        let mut config = Config::default();
        config.agent.emit = EmitPolicy::Interval {
            period: Duration::ZERO,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_shrinking_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hubsync.toml");
        std::fs::write(
            &path,
            r#"
            [transport.retry.backoff]
            type = "exponential"
            initial_delay = "100ms"
            max_delay = "10s"
            multiplier = -2.0
            "#,
        )
        .unwrap();

        let config = Config::from_file(path.to_str().unwrap()).unwrap();
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidConfiguration);
    }

    #[test]
    fn test_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hubsync.toml");
        std::fs::write(
            &path,
            r#"
            [agent]
            leaf_hub_name = "hub1"
            categories = ["control-info", "policies"]
            heartbeat_interval = "15s"

            [agent.emit]
            mode = "interval"
            period = "2s"

            [transport]
            central_url = "http://central:9000"
            request_timeout = "3s"

            [transport.retry]
            max_attempts = 2

            [central]
            port = 9000
            "#,
        )
        .unwrap();

        let config = Config::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.agent.leaf_hub_name, "hub1");
        assert_eq!(
            config.agent.categories,
            vec![BundleCategory::ControlInfo, BundleCategory::Policies]
        );
        assert_eq!(config.agent.heartbeat_interval, Some(Duration::from_secs(15)));
        assert_eq!(
            config.agent.emit,
            EmitPolicy::Interval {
                period: Duration::from_secs(2)
            }
        );
        assert_eq!(config.transport.http.central_url, "http://central:9000");
        assert_eq!(config.transport.http.request_timeout, Duration::from_secs(3));
        assert_eq!(config.transport.retry.max_attempts, 2);
        assert_eq!(config.central.port, 9000);
        assert!(config.validate_agent().is_ok());
    }

    #[test]
    fn test_agent_options_from_config() {
        let mut config = AgentConfig {
            leaf_hub_name: "hub7".to_string(),
            ..Default::default()
        };
        config.heartbeat_interval = None;
        let options = config.options(4);
        assert_eq!(options.leaf_hub, "hub7");
        assert_eq!(options.incarnation, 4);
        assert!(options.heartbeat_interval.is_none());
    }
}
