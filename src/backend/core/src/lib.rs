#![allow(clippy::result_large_err)]
//! # hubsync Core
//!
//! Versioned status-bundle synchronization between leaf hubs and a central
//! aggregator.
//!
//! ## Architecture
//!
//! - **Bundle**: full-state snapshot of one category on one leaf hub, stamped
//!   with an `(incarnation, generation)` version
//! - **Agent**: trackers apply watch events to bundles; emitters publish
//!   snapshots through a transport
//! - **Transport**: in-process channel or HTTP, with retry and backoff
//! - **Conflator**: keeps only the newest bundle per (leaf hub, category)
//! - **API**: central HTTP endpoints for ingestion and state queries
//! - **Telemetry**: structured logging and Prometheus metrics

pub mod agent;
pub mod api;
pub mod bundle;
pub mod config;
pub mod conflator;
pub mod error;
pub mod shutdown;
pub mod telemetry;
pub mod transport;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, Result, SyncError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::agent::{
        AgentOptions, AgentSupervisor, EmitPolicy, Emitter, FileIncarnationStore,
        IncarnationStore, LifecycleState, MemoryIncarnationStore, Tracker, WatchEvent,
        WatchEventKind,
    };
    pub use crate::bundle::{
        BundleCategory, BundleKey, BundleSnapshot, BundleVersion, DeletePolicy, ObjectKey,
        StatusBundle, StatusObject,
    };
    pub use crate::conflator::{
        ConflationState, Conflator, InMemoryStatusStore, IngestDecision, StatusStore,
    };
    pub use crate::error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, Result, SyncError};
    pub use crate::transport::{
        BackoffStrategy, ChannelTransport, HttpTransport, RetryPolicy, RetryingTransport,
        Transport, TransportMessage,
    };
}
