//! Tracker - applies watch events to a bundle.
//!
//! Each event is applied to the bundle immediately and independently; the
//! tracker neither buffers nor reorders. Per-object causal order is the watch
//! source's responsibility.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::bundle::{BundleCategory, BundleVersion, StatusBundle, StatusObject};
use crate::error::{ErrorCode, Result, SyncError};

/// Kind of change reported by the watch source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchEventKind {
    Add,
    Update,
    Delete,
}

/// A single notification from the watch source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub category: BundleCategory,
    /// Raw object; its identity is extracted per category rules
    pub object: serde_json::Value,
}

impl WatchEvent {
    pub fn new(kind: WatchEventKind, category: BundleCategory, object: serde_json::Value) -> Self {
        Self {
            kind,
            category,
            object,
        }
    }
}

/// Per-kind counters for applied and rejected events.
#[derive(Debug, Default)]
pub struct TrackerStats {
    pub adds: AtomicU64,
    pub updates: AtomicU64,
    pub deletes: AtomicU64,
    pub rejected: AtomicU64,
}

impl TrackerStats {
    pub fn applied(&self) -> u64 {
        self.adds.load(Ordering::Relaxed)
            + self.updates.load(Ordering::Relaxed)
            + self.deletes.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

/// Drives one bundle from watch events.
#[derive(Debug, Clone)]
pub struct Tracker {
    bundle: Arc<StatusBundle>,
    stats: Arc<TrackerStats>,
}

impl Tracker {
    pub fn new(bundle: Arc<StatusBundle>) -> Self {
        Self {
            bundle,
            stats: Arc::new(TrackerStats::default()),
        }
    }

    pub fn bundle(&self) -> &Arc<StatusBundle> {
        &self.bundle
    }

    pub fn stats(&self) -> &TrackerStats {
        &self.stats
    }

    /// Apply one event to the bundle, returning the resulting version.
    pub fn apply(&self, event: &WatchEvent) -> Result<BundleVersion> {
        let result = self.apply_inner(event);
        if result.is_err() {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    fn apply_inner(&self, event: &WatchEvent) -> Result<BundleVersion> {
        let category = self.bundle.category();
        if event.category != category {
            return Err(SyncError::new(
                ErrorCode::CategoryMismatch,
                format!(
                    "event for {} routed to {} tracker",
                    event.category, category
                ),
            ));
        }

        let object = StatusObject::from_payload(category, event.object.clone())?;
        let object_key = object.key.clone();
        let version = match event.kind {
            WatchEventKind::Add => {
                self.stats.adds.fetch_add(1, Ordering::Relaxed);
                self.bundle.update_object(object)
            }
            WatchEventKind::Update => {
                self.stats.updates.fetch_add(1, Ordering::Relaxed);
                self.bundle.update_object(object)
            }
            WatchEventKind::Delete => {
                self.stats.deletes.fetch_add(1, Ordering::Relaxed);
                self.bundle.delete_object(&object_key)
            }
        };

        tracing::trace!(
            leaf_hub = %self.bundle.leaf_hub(),
            category = %category,
            kind = ?event.kind,
            object = %object_key,
            version = %version,
            "Applied watch event"
        );
        Ok(version)
    }

    /// Drain a stream of events until it ends or `cancel` fires.
    ///
    /// Invalid events are logged and skipped.
    pub async fn run<S>(&self, events: S, cancel: CancellationToken)
    where
        S: Stream<Item = WatchEvent> + Send,
    {
        futures::pin_mut!(events);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = events.next() => match next {
                    Some(event) => {
                        if let Err(err) = self.apply(&event) {
                            err.log();
                        }
                    }
                    None => break,
                },
            }
        }

        tracing::debug!(
            leaf_hub = %self.bundle.leaf_hub(),
            category = %self.bundle.category(),
            applied = self.stats.applied(),
            rejected = self.stats.rejected(),
            "Tracker stopped"
        );
    }
}
