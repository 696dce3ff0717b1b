//! HTTP transport to the central aggregator.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};

use super::{Transport, TransportMessage};
use crate::error::{ErrorCode, Result, SyncError};

/// Path of the bundle ingestion endpoint on the central server.
pub const BUNDLES_PATH: &str = "/api/v1/bundles";

/// Configuration for [`HttpTransport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpTransportConfig {
    /// Base URL of the central server
    #[serde(default = "default_central_url")]
    pub central_url: String,

    /// Per-request timeout
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            central_url: default_central_url(),
            request_timeout: default_request_timeout(),
        }
    }
}

fn default_central_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Posts bundle envelopes to `{central_url}/api/v1/bundles`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(config: &HttpTransportConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                SyncError::with_internal(
                    ErrorCode::ConfigurationError,
                    "Failed to create HTTP client",
                    e.to_string(),
                )
                .with_source(e)
            })?;

        Ok(Self {
            client,
            endpoint: format!("{}{}", config.central_url.trim_end_matches('/'), BUNDLES_PATH),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn publish(&self, message: TransportMessage) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(header::CONTENT_TYPE, "application/json")
            .body(message.payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let code = if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            ErrorCode::PublishFailed
        } else {
            ErrorCode::PublishRejected
        };

        Err(SyncError::transport(
            code,
            format!("central responded {} for {}: {}", status, message.key, body),
        )
        .with_context("status", status.as_u16()))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
