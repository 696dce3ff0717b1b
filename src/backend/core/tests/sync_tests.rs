//! End-to-end synchronization tests: leaf agent to conflator.
//!
//! Tests cover:
//! - Full pipeline over the channel transport
//! - On-change coalescing of bursts
//! - No resend of unchanged versions
//! - Redelivery after a failed publish, inline and from the emit loop
//! - Slow and stalled transports
//! - Leaf hub restarts

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hubsync_core::agent::{
    AgentOptions, AgentSupervisor, EmitPolicy, Emitter, IncarnationStore, LifecycleState,
    MemoryIncarnationStore, WatchEvent, WatchEventKind,
};
use hubsync_core::bundle::{BundleCategory, BundleKey, BundleVersion, StatusBundle, StatusObject};
use hubsync_core::conflator::{Conflator, InMemoryStatusStore, IngestDecision};
use hubsync_core::error::{ErrorCode, Result, SyncError};
use hubsync_core::transport::{ChannelTransport, Transport, TransportMessage};
use parking_lot::Mutex;
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn cluster_event(kind: WatchEventKind, name: &str) -> WatchEvent {
    WatchEvent::new(
        kind,
        BundleCategory::ManagedClusters,
        json!({"metadata": {"name": name}, "status": {"available": true}}),
    )
}

fn cluster(name: &str) -> StatusObject {
    StatusObject::from_payload(
        BundleCategory::ManagedClusters,
        json!({"metadata": {"name": name}}),
    )
    .unwrap()
}

/// Fails the first `failures` publishes, then records every message.
struct FlakyRecorder {
    failures_left: AtomicU32,
    published: Mutex<Vec<BundleVersion>>,
}

impl FlakyRecorder {
    fn new(failures: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            published: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Transport for FlakyRecorder {
    async fn publish(&self, message: TransportMessage) -> Result<()> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
        {
            return Err(SyncError::transport(ErrorCode::PublishRejected, "not now"));
        }
        self.published.lock().push(message.version);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

/// Takes `delay` per publish; the first publish never completes when
/// `hang_first` is set.
struct SlowRecorder {
    delay: Duration,
    hang_first: AtomicBool,
    published: Mutex<Vec<BundleVersion>>,
}

impl SlowRecorder {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            hang_first: AtomicBool::new(false),
            published: Mutex::new(Vec::new()),
        }
    }

    fn hanging_first() -> Self {
        let recorder = Self::new(Duration::ZERO);
        recorder.hang_first.store(true, Ordering::SeqCst);
        recorder
    }
}

#[async_trait]
impl Transport for SlowRecorder {
    async fn publish(&self, message: TransportMessage) -> Result<()> {
        if self.hang_first.swap(false, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(self.delay).await;
        self.published.lock().push(message.version);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "slow"
    }
}

fn interval_emitter(bundle: &Arc<StatusBundle>, transport: Arc<dyn Transport>) -> Emitter {
    Emitter::new(
        Arc::clone(bundle),
        transport,
        EmitPolicy::Interval {
            period: Duration::from_secs(1),
        },
    )
}

fn spawn_run(emitter: &Arc<Emitter>, cancel: &CancellationToken) -> tokio::task::JoinHandle<()> {
    let emitter = Arc::clone(emitter);
    let cancel = cancel.clone();
    tokio::spawn(async move { emitter.run(cancel).await })
}

// ============================================================================
// Full Pipeline
// ============================================================================

#[tokio::test]
async fn test_agent_to_conflator_over_channel() {
    let (transport, rx) = ChannelTransport::pair(64);
    let agent = AgentSupervisor::new(
        AgentOptions::new("hub1", 1).with_emit_policy(EmitPolicy::OnChange {
            debounce: Duration::from_millis(20),
        }),
        Arc::new(transport),
    )
    .unwrap();

    let store = Arc::new(InMemoryStatusStore::new());
    let conflator = Arc::new(Conflator::new(store.clone()));
    let cancel = CancellationToken::new();
    let conflator_task = {
        let conflator = Arc::clone(&conflator);
        let cancel = cancel.clone();
        tokio::spawn(async move { conflator.run(rx, cancel).await })
    };

    assert!(agent.start());
    assert_eq!(agent.state(), LifecycleState::Running);

    let events = futures::stream::iter(vec![
        cluster_event(WatchEventKind::Add, "c1"),
        cluster_event(WatchEventKind::Add, "c2"),
        cluster_event(WatchEventKind::Update, "c1"),
        cluster_event(WatchEventKind::Delete, "c2"),
    ]);
    assert_eq!(agent.consume(events).await, 4);

    let key = BundleKey::new("hub1", BundleCategory::ManagedClusters);
    let expected = BundleVersion::new(1, 4);
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let done = store.get(&key).is_some_and(|b| b.version == expected);
            if done && store.len() == BundleCategory::ALL.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("bundle never reached the conflator");

    let stored = store.get(&key).unwrap();
    assert_eq!(stored.objects.len(), 1);
    assert_eq!(stored.objects[0].key.as_str(), "c1");

    // every category announced its initial state
    assert_eq!(store.len(), BundleCategory::ALL.len());

    agent.shutdown().await;
    assert_eq!(agent.state(), LifecycleState::Stopped);
    cancel.cancel();
    conflator_task.await.unwrap();
}

// ============================================================================
// Emit Cadence
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_on_change_coalesces_bursts() {
    let bundle = Arc::new(StatusBundle::new("hub1", BundleCategory::ManagedClusters, 1));
    let (transport, mut rx) = ChannelTransport::pair(64);
    let emitter = Arc::new(Emitter::new(
        bundle.clone(),
        Arc::new(transport),
        EmitPolicy::OnChange {
            debounce: Duration::from_millis(100),
        },
    ));

    let cancel = CancellationToken::new();
    let task = {
        let emitter = Arc::clone(&emitter);
        let cancel = cancel.clone();
        tokio::spawn(async move { emitter.run(cancel).await })
    };

    // initial announcement
    assert_eq!(rx.recv().await.unwrap().version, BundleVersion::new(1, 0));

    for i in 0..10 {
        bundle.update_object(cluster(&format!("c{}", i)));
    }
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(rx.recv().await.unwrap().version, BundleVersion::new(1, 10));
    assert!(rx.try_recv().is_err());
    assert_eq!(emitter.stats().emitted(), 2);

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_interval_does_not_resend_unchanged_version() {
    let bundle = Arc::new(StatusBundle::new("hub1", BundleCategory::Policies, 1));
    bundle.update_object(
        StatusObject::from_payload(
            BundleCategory::Policies,
            json!({"metadata": {"name": "p1", "namespace": "default"}}),
        )
        .unwrap(),
    );

    let (transport, mut rx) = ChannelTransport::pair(64);
    let emitter = Arc::new(Emitter::new(
        bundle.clone(),
        Arc::new(transport),
        EmitPolicy::Interval {
            period: Duration::from_secs(1),
        },
    ));

    let cancel = CancellationToken::new();
    let task = {
        let emitter = Arc::clone(&emitter);
        let cancel = cancel.clone();
        tokio::spawn(async move { emitter.run(cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(5_500)).await;
    cancel.cancel();
    task.await.unwrap();

    assert_eq!(rx.recv().await.unwrap().version, BundleVersion::new(1, 1));
    assert!(rx.try_recv().is_err());
    assert_eq!(emitter.stats().emitted(), 1);
    assert_eq!(emitter.stats().skipped(), 5);
    assert_eq!(emitter.last_delivered(), Some(BundleVersion::new(1, 1)));
}

#[tokio::test]
async fn test_failed_delivery_is_retried_on_next_flush() {
    let bundle = Arc::new(StatusBundle::new("hub1", BundleCategory::ManagedClusters, 2));
    let transport = Arc::new(FlakyRecorder::new(1));
    let emitter = Emitter::new(bundle.clone(), transport.clone(), EmitPolicy::default());

    bundle.update_object(cluster("c1"));

    let err = emitter.flush().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::PublishRejected);
    assert_eq!(emitter.last_delivered(), None);

    assert_eq!(emitter.flush().await.unwrap(), Some(BundleVersion::new(2, 1)));
    assert_eq!(emitter.flush().await.unwrap(), None);
    assert_eq!(*transport.published.lock(), vec![BundleVersion::new(2, 1)]);
    assert_eq!(emitter.stats().failed(), 1);
    assert_eq!(emitter.stats().delivered(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_delivery_is_retried_on_next_tick() {
    let bundle = Arc::new(StatusBundle::new("hub1", BundleCategory::ManagedClusters, 2));
    bundle.update_object(cluster("c1"));
    let transport = Arc::new(FlakyRecorder::new(1));
    let emitter = Arc::new(interval_emitter(&bundle, transport.clone()));

    let cancel = CancellationToken::new();
    let task = spawn_run(&emitter, &cancel);

    tokio::time::sleep(Duration::from_millis(3_500)).await;
    cancel.cancel();
    task.await.unwrap();

    // first tick fails, second tick re-sends the same version
    assert_eq!(*transport.published.lock(), vec![BundleVersion::new(2, 1)]);
    assert_eq!(emitter.stats().emitted(), 2);
    assert_eq!(emitter.stats().failed(), 1);
    assert_eq!(emitter.stats().delivered(), 1);
    assert_eq!(emitter.last_delivered(), Some(BundleVersion::new(2, 1)));
}

#[tokio::test(start_paused = true)]
async fn test_slow_transport_still_delivers_under_constant_churn() {
    let bundle = Arc::new(StatusBundle::new("hub1", BundleCategory::ManagedClusters, 1));
    let transport = Arc::new(SlowRecorder::new(Duration::from_millis(1_500)));
    let emitter = Arc::new(interval_emitter(&bundle, transport.clone()));

    let cancel = CancellationToken::new();
    let task = spawn_run(&emitter, &cancel);

    // a new version every half period, each publish taking one and a half
    for i in 0..20 {
        bundle.update_object(cluster(&format!("c{}", i)));
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    cancel.cancel();
    task.await.unwrap();

    let published = transport.published.lock().clone();
    assert!(published.len() >= 3, "only {} deliveries", published.len());
    assert!(published.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(emitter.stats().delivered() >= 3);
    assert!(emitter.stats().skipped() > 0);
    assert_eq!(emitter.stats().superseded(), 0);
    assert_eq!(emitter.last_delivered(), published.last().copied());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_delivery_is_superseded() {
    let bundle = Arc::new(StatusBundle::new("hub1", BundleCategory::ManagedClusters, 1));
    let transport = Arc::new(SlowRecorder::hanging_first());
    let emitter = Arc::new(
        interval_emitter(&bundle, transport.clone())
            .with_stall_timeout(Duration::from_millis(2_500)),
    );

    let cancel = CancellationToken::new();
    let task = spawn_run(&emitter, &cancel);

    tokio::time::sleep(Duration::from_millis(500)).await;
    bundle.update_object(cluster("c1"));

    // ticks at 1s and 2s wait on the hung delivery, the 3s tick replaces it
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(emitter.stats().superseded(), 0);

    tokio::time::sleep(Duration::from_millis(4_000)).await;
    cancel.cancel();
    task.await.unwrap();

    assert_eq!(emitter.stats().superseded(), 1);
    assert_eq!(*transport.published.lock(), vec![BundleVersion::new(1, 1)]);
    assert_eq!(emitter.last_delivered(), Some(BundleVersion::new(1, 1)));
}

// ============================================================================
// Restart
// ============================================================================

#[tokio::test]
async fn test_restart_supersedes_previous_incarnation() {
    let incarnations = MemoryIncarnationStore::starting_at(4);
    let (transport, mut rx) = ChannelTransport::pair(16);
    let transport: Arc<dyn Transport> = Arc::new(transport);
    let conflator = Conflator::new(Arc::new(InMemoryStatusStore::new()));

    let first_run = AgentSupervisor::new(
        AgentOptions::new("hub1", incarnations.next_incarnation().await.unwrap())
            .with_categories([BundleCategory::ManagedClusters]),
        Arc::clone(&transport),
    )
    .unwrap();
    for name in ["c1", "c2", "c3"] {
        first_run
            .dispatch(&cluster_event(WatchEventKind::Add, name))
            .unwrap();
    }
    first_run.flush().await.unwrap();
    let before_restart = rx.recv().await.unwrap();
    assert_eq!(before_restart.version, BundleVersion::new(5, 3));
    assert_eq!(
        conflator.ingest(&before_restart).await.unwrap(),
        IngestDecision::Applied
    );
    drop(first_run);

    let second_run = AgentSupervisor::new(
        AgentOptions::new("hub1", incarnations.next_incarnation().await.unwrap())
            .with_categories([BundleCategory::ManagedClusters]),
        Arc::clone(&transport),
    )
    .unwrap();
    second_run.flush().await.unwrap();
    let after_restart = rx.recv().await.unwrap();
    assert_eq!(after_restart.version, BundleVersion::new(6, 0));
    assert_eq!(
        conflator.ingest(&after_restart).await.unwrap(),
        IngestDecision::Applied
    );

    // the old run's message arriving late changes nothing
    assert_eq!(
        conflator.ingest(&before_restart).await.unwrap(),
        IngestDecision::Stale
    );
    let state = conflator
        .state(&BundleKey::new("hub1", BundleCategory::ManagedClusters))
        .await
        .unwrap();
    assert_eq!(state.last_applied, Some(BundleVersion::new(6, 0)));
}
