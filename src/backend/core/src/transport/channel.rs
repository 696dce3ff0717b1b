//! In-process channel transport.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Transport, TransportMessage};
use crate::error::{ErrorCode, Result, SyncError};

/// Transport backed by a bounded tokio mpsc channel.
///
/// `publish` waits for channel capacity, so a slow consumer applies
/// backpressure to the delivery task but never to bundle mutation.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    sender: mpsc::Sender<TransportMessage>,
}

impl ChannelTransport {
    pub fn new(sender: mpsc::Sender<TransportMessage>) -> Self {
        Self { sender }
    }

    /// Create a transport together with the receiving end of its channel.
    pub fn pair(capacity: usize) -> (Self, mpsc::Receiver<TransportMessage>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self::new(sender), receiver)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn publish(&self, message: TransportMessage) -> Result<()> {
        let key = message.key.to_string();
        self.sender.send(message).await.map_err(|_| {
            SyncError::transport(ErrorCode::TransportClosed, "receiver dropped")
                .with_context("bundle", key)
        })
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}
