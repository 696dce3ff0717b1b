//! Emitter - snapshots a bundle and hands it to the transport.
//!
//! The emitter fires on a fixed interval or after a change notification plus
//! a debounce window. Every firing takes one snapshot, so any number of
//! mutations between two firings leave as a single message.
//!
//! Delivery happens in a spawned task over an encoded copy of the snapshot;
//! the emitter never waits for it. At most one delivery runs at a time:
//! firings while it is running are skipped, and the first firing after it
//! finishes sends whatever is newest by then. A delivery running longer than
//! the stall timeout is aborted and replaced by a newer snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::bundle::{BundleVersion, StatusBundle};
use crate::error::Result;
use crate::telemetry::metrics::SyncMetrics;
use crate::transport::{Transport, TransportMessage};

/// When the emitter fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum EmitPolicy {
    /// Fire every `period`, whether or not anything changed.
    Interval {
        #[serde(with = "humantime_serde")]
        period: Duration,
    },
    /// Fire `debounce` after the first change following the last firing.
    OnChange {
        #[serde(with = "humantime_serde")]
        debounce: Duration,
    },
}

impl Default for EmitPolicy {
    fn default() -> Self {
        Self::OnChange {
            debounce: Duration::from_millis(500),
        }
    }
}

/// Emitter statistics.
#[derive(Debug, Default)]
pub struct EmitterStats {
    /// Snapshots handed to a delivery task
    pub emitted: AtomicU64,
    /// Firings skipped because the version was already delivered or in flight
    pub skipped: AtomicU64,
    pub delivered: AtomicU64,
    pub failed: AtomicU64,
    /// Stalled deliveries aborted in favour of a newer snapshot
    pub superseded: AtomicU64,
}

impl EmitterStats {
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn superseded(&self) -> u64 {
        self.superseded.load(Ordering::Relaxed)
    }
}

/// Default bound after which a running delivery counts as stalled.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(120);

struct InFlight {
    version: BundleVersion,
    started: Instant,
    handle: JoinHandle<()>,
}

/// Periodically publishes snapshots of one bundle.
pub struct Emitter {
    bundle: Arc<StatusBundle>,
    transport: Arc<dyn Transport>,
    policy: EmitPolicy,
    last_delivered: Arc<Mutex<Option<BundleVersion>>>,
    in_flight: Mutex<Option<InFlight>>,
    stall_timeout: Duration,
    stats: Arc<EmitterStats>,
}

impl Emitter {
    pub fn new(bundle: Arc<StatusBundle>, transport: Arc<dyn Transport>, policy: EmitPolicy) -> Self {
        Self {
            bundle,
            transport,
            policy,
            last_delivered: Arc::new(Mutex::new(None)),
            in_flight: Mutex::new(None),
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            stats: Arc::new(EmitterStats::default()),
        }
    }

    /// Abort a running delivery only after it has taken this long.
    ///
    /// Keep it well above the transport's worst case including retries;
    /// anything shorter cuts off deliveries that would have succeeded.
    pub fn with_stall_timeout(mut self, stall_timeout: Duration) -> Self {
        self.stall_timeout = stall_timeout;
        self
    }

    pub fn policy(&self) -> EmitPolicy {
        self.policy
    }

    pub fn stats(&self) -> &EmitterStats {
        &self.stats
    }

    /// Newest version the transport accepted.
    pub fn last_delivered(&self) -> Option<BundleVersion> {
        *self.last_delivered.lock()
    }

    /// Run the emit loop until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            leaf_hub = %self.bundle.leaf_hub(),
            category = %self.bundle.category(),
            transport = self.transport.name(),
            policy = ?self.policy,
            "Emitter started"
        );

        match self.policy {
            EmitPolicy::Interval { period } => {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            self.fire();
                        }
                    }
                }
            }
            EmitPolicy::OnChange { debounce } => {
                // announce the initial state once, even before any change
                self.fire();
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.bundle.changed() => {}
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(debounce) => {
                            self.fire();
                        }
                    }
                }
            }
        }

        if let Some(in_flight) = self.in_flight.lock().take() {
            in_flight.handle.abort();
        }

        tracing::info!(
            leaf_hub = %self.bundle.leaf_hub(),
            category = %self.bundle.category(),
            emitted = self.stats.emitted(),
            delivered = self.stats.delivered(),
            failed = self.stats.failed(),
            "Emitter stopped"
        );
    }

    /// Take a snapshot and start delivering it unless it is already
    /// delivered or another delivery is still running.
    ///
    /// Returns the version handed to the transport, if any. Must be called
    /// from within a tokio runtime.
    pub fn fire(&self) -> Option<BundleVersion> {
        let snapshot = self.bundle.snapshot();
        let version = snapshot.version;

        if self.last_delivered().is_some_and(|delivered| version <= delivered) {
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let mut in_flight = self.in_flight.lock();
        if let Some(current) = in_flight.as_ref() {
            if !current.handle.is_finished() {
                let running = current.started.elapsed();
                if current.version >= version || running < self.stall_timeout {
                    self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                current.handle.abort();
                self.stats.superseded.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    leaf_hub = %snapshot.leaf_hub,
                    category = %snapshot.category,
                    stalled = %current.version,
                    version = %version,
                    running_ms = running.as_millis() as u64,
                    "Aborting stalled delivery"
                );
            }
        }

        let message = match TransportMessage::from_snapshot(&snapshot) {
            Ok(message) => message,
            Err(err) => {
                err.log();
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let transport = Arc::clone(&self.transport);
        let last_delivered = Arc::clone(&self.last_delivered);
        let stats = Arc::clone(&self.stats);
        let handle = tokio::spawn(async move {
            // the outcome is fully recorded in shared state
            let _ = deliver(transport.as_ref(), message, &last_delivered, &stats).await;
        });

        self.stats.emitted.fetch_add(1, Ordering::Relaxed);
        *in_flight = Some(InFlight {
            version,
            started: Instant::now(),
            handle,
        });
        Some(version)
    }

    /// Publish the current snapshot inline and wait for the transport.
    ///
    /// Returns `Ok(None)` when the current version was already delivered.
    pub async fn flush(&self) -> Result<Option<BundleVersion>> {
        let snapshot = self.bundle.snapshot();
        if self
            .last_delivered()
            .is_some_and(|delivered| snapshot.version <= delivered)
        {
            return Ok(None);
        }

        let message = TransportMessage::from_snapshot(&snapshot)?;
        self.stats.emitted.fetch_add(1, Ordering::Relaxed);
        deliver(self.transport.as_ref(), message, &self.last_delivered, &self.stats).await?;
        Ok(Some(snapshot.version))
    }
}

async fn deliver(
    transport: &dyn Transport,
    message: TransportMessage,
    last_delivered: &Mutex<Option<BundleVersion>>,
    stats: &EmitterStats,
) -> Result<()> {
    let key = message.key.clone();
    let version = message.version;
    let started = Instant::now();

    match transport.publish(message).await {
        Ok(()) => {
            {
                let mut last = last_delivered.lock();
                if last.map_or(true, |previous| version > previous) {
                    *last = Some(version);
                }
            }
            stats.delivered.fetch_add(1, Ordering::Relaxed);
            SyncMetrics::record_emitted(&key, transport.name(), started.elapsed());
            tracing::debug!(bundle = %key, version = %version, "Bundle delivered");
            Ok(())
        }
        Err(err) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            SyncMetrics::record_publish_failure(&key, transport.name());
            err.log();
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{BundleCategory, StatusObject};
    use crate::transport::ChannelTransport;
    use serde_json::json;

    fn cluster(name: &str) -> StatusObject {
        StatusObject::from_payload(
            BundleCategory::ManagedClusters,
            json!({"metadata": {"name": name}}),
        )
        .unwrap()
    }

    #[test]
    fn test_policy_config_format() {
        let policy: EmitPolicy =
            serde_json::from_str(r#"{"mode": "interval", "period": "5s"}"#).unwrap();
        assert_eq!(
            policy,
            EmitPolicy::Interval {
                period: Duration::from_secs(5)
            }
        );
    }

    #[tokio::test]
    async fn test_flush_skips_delivered_version() {
        let bundle = Arc::new(StatusBundle::new("hub1", BundleCategory::ManagedClusters, 1));
        let (transport, mut rx) = ChannelTransport::pair(8);
        let emitter = Emitter::new(bundle.clone(), Arc::new(transport), EmitPolicy::default());

        bundle.update_object(cluster("a"));
        assert_eq!(emitter.flush().await.unwrap(), Some(BundleVersion::new(1, 1)));
        assert_eq!(emitter.flush().await.unwrap(), None);
        assert_eq!(rx.recv().await.unwrap().version, BundleVersion::new(1, 1));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fire_delivers_in_background() {
        let bundle = Arc::new(StatusBundle::new("hub1", BundleCategory::ManagedClusters, 1));
        let (transport, mut rx) = ChannelTransport::pair(8);
        let emitter = Emitter::new(bundle.clone(), Arc::new(transport), EmitPolicy::default());

        bundle.update_object(cluster("a"));
        bundle.update_object(cluster("b"));
        assert_eq!(emitter.fire(), Some(BundleVersion::new(1, 2)));

        let message = rx.recv().await.unwrap();
        assert_eq!(message.version, BundleVersion::new(1, 2));
    }
}
