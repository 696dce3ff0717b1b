//! HTTP API of the central aggregator.
//!
//! Leaf agents post bundle envelopes to `/api/v1/bundles`; operators query
//! conflation state through the same prefix.
//!
//! - `/health` - liveness with the number of tracked keys
//! - `/metrics` - Prometheus text format
//! - `/api/v1/...` - see [`v1::v1_router`]

mod handlers;
pub mod v1;

pub use handlers::{BundleDetail, IngestResponse};

use axum::{routing::get, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

use crate::conflator::{Conflator, InMemoryStatusStore};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub conflator: Arc<Conflator>,
    pub store: Arc<InMemoryStatusStore>,
}

impl AppState {
    /// State with a fresh in-memory store.
    pub fn in_memory() -> Self {
        let store = Arc::new(InMemoryStatusStore::new());
        Self {
            conflator: Arc::new(Conflator::new(store.clone())),
            store,
        }
    }
}

/// Build the API router.
///
/// # Example
///
/// ```rust,ignore
/// let app = build_router(AppState::in_memory());
/// ```
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::prometheus_metrics))
        .nest(v1::V1_PREFIX, v1::v1_router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new()),
        )
        .with_state(state)
}

/// API response wrapper.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_code: None,
        }
    }

    pub fn from_error(err: &crate::error::SyncError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.user_message().to_string()),
            error_code: Some(err.code().to_string()),
        }
    }
}
