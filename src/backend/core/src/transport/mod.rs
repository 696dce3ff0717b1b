//! Bundle transports.
//!
//! A transport moves serialized bundles from a leaf agent to any number of
//! conflators. Delivery is assumed at-least-once and may reorder or duplicate
//! messages; correctness never depends on the transport's ordering because
//! every message carries its `(leaf hub, category, version)` header.
//!
//! - **`channel`**: in-process tokio channel, used for embedding and tests.
//! - **`http`**: posts envelopes to the central server's API.
//! - **`retry`**: decorator that retries retryable failures with backoff.

pub mod channel;
pub mod http;
pub mod retry;

pub use channel::ChannelTransport;
pub use http::{HttpTransport, HttpTransportConfig};
pub use retry::{BackoffStrategy, RetryPolicy, RetryingTransport};

use async_trait::async_trait;

use crate::bundle::{BundleKey, BundleSnapshot, BundleVersion};
use crate::error::Result;

/// A serialized bundle with its comparable header.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportMessage {
    pub key: BundleKey,
    pub version: BundleVersion,
    /// JSON-encoded [`BundleSnapshot`]
    pub payload: Vec<u8>,
}

impl TransportMessage {
    /// Encode a snapshot into a message.
    pub fn from_snapshot(snapshot: &BundleSnapshot) -> Result<Self> {
        Ok(Self {
            key: snapshot.key(),
            version: snapshot.version,
            payload: snapshot.encode()?,
        })
    }
}

/// Sink for outgoing bundles.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Hand a message over for delivery.
    ///
    /// Returning `Ok` means the transport accepted responsibility for the
    /// message, not that any conflator applied it.
    async fn publish(&self, message: TransportMessage) -> Result<()>;

    /// Short name used in logs and metrics labels.
    fn name(&self) -> &'static str;
}
