//! V1 API module for the central aggregator.
//!
//! This module contains the stable V1 endpoints for:
//! - Bundle ingestion from leaf agents
//! - Conflation state queries

pub mod routes;

pub use routes::{v1_router, V1_PREFIX};
