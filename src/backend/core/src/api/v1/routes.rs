//! V1 API routes.

use axum::{
    routing::get,
    Router,
};

use crate::api::{handlers, AppState};

/// V1 API prefix.
pub const V1_PREFIX: &str = "/api/v1";

/// Build the V1 API router.
///
/// All routes are mounted under `/api/v1/`.
///
/// # Endpoints
///
/// ## Bundles
/// - `POST /api/v1/bundles` - Ingest a bundle envelope
/// - `GET /api/v1/bundles` - List conflation states (optional `?leaf_hub=`)
/// - `GET /api/v1/bundles/:leaf_hub/:category` - State and content of one bundle
pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route(
            "/bundles",
            get(handlers::list_bundles).post(handlers::ingest_bundle),
        )
        .route("/bundles/:leaf_hub/:category", get(handlers::get_bundle))
}
