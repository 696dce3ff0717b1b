//! API request handlers with proper error propagation.
//!
//! All handlers return `Result<impl IntoResponse, SyncError>` so that errors
//! are converted to HTTP status codes via the `IntoResponse` implementation
//! on `SyncError`. An undecodable bundle therefore answers `400` and is
//! dropped.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use super::{ApiResponse, AppState};
use crate::bundle::{BundleCategory, BundleKey, BundleVersion, StatusObject};
use crate::conflator::{ConflationState, IngestDecision};
use crate::error::{ErrorCode, SyncError};

// ═══════════════════════════════════════════════════════════════════════════════
// Health Check
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "trackedKeys": state.conflator.tracked_keys(),
    }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Bundle Handlers
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    #[serde(flatten)]
    pub key: BundleKey,
    #[serde(rename = "bundleVersion")]
    pub version: BundleVersion,
    pub decision: IngestDecision,
}

pub async fn ingest_bundle(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, SyncError> {
    let snapshot = state.conflator.decode(&body)?;
    let key = snapshot.key();
    let version = snapshot.version;
    let decision = state.conflator.ingest_snapshot(snapshot).await?;

    Ok(Json(ApiResponse::success(IngestResponse {
        key,
        version,
        decision,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub leaf_hub: Option<String>,
}

pub async fn list_bundles(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let states: Vec<ConflationState> = state
        .conflator
        .states()
        .await
        .into_iter()
        .filter(|s| query.leaf_hub.as_deref().map_or(true, |leaf| s.key.leaf_hub == leaf))
        .collect();

    Json(ApiResponse::success(states))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleDetail {
    pub state: ConflationState,
    /// Content as last applied to the store
    pub objects: Vec<StatusObject>,
}

pub async fn get_bundle(
    State(state): State<AppState>,
    Path((leaf_hub, category)): Path<(String, String)>,
) -> Result<impl IntoResponse, SyncError> {
    let category: BundleCategory = category.parse()?;
    let key = BundleKey::new(leaf_hub, category);

    let conflation = state.conflator.state(&key).await.ok_or_else(|| {
        SyncError::new(ErrorCode::BundleNotFound, format!("No bundle received for {}", key))
    })?;
    let objects = state
        .store
        .get(&key)
        .map(|stored| stored.objects)
        .unwrap_or_default();

    Ok(Json(ApiResponse::success(BundleDetail {
        state: conflation,
        objects,
    })))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Metrics
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn prometheus_metrics() -> impl IntoResponse {
    let registry = crate::telemetry::metrics::MetricsRegistry::global();
    let body = registry.render();

    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
