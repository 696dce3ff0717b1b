//! Leaf agent.
//!
//! - **`incarnation`**: durable counter giving every agent start a fresh incarnation.
//! - **`tracker`**: applies watch events to a bundle.
//! - **`emitter`**: snapshots a bundle and publishes it through a transport.
//!
//! [`AgentSupervisor`] owns one bundle, tracker and emitter per configured
//! category and moves through an explicit [`LifecycleState`]. Starting is
//! idempotent: the first call spawns the workers behind a single init
//! barrier, later calls observe the running agent and do nothing.

pub mod emitter;
pub mod incarnation;
pub mod tracker;

pub use emitter::{EmitPolicy, Emitter, EmitterStats};
pub use incarnation::{FileIncarnationStore, IncarnationStore, MemoryIncarnationStore};
pub use tracker::{Tracker, TrackerStats, WatchEvent, WatchEventKind};

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bundle::{BundleCategory, BundleVersion, StatusBundle, StatusObject};
use crate::error::{ErrorCode, Result, SyncError};
use crate::transport::Transport;

/// Lifecycle of an agent supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    NotStarted,
    Running,
    Stopped,
}

/// Settings for one agent process.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub leaf_hub: String,
    pub incarnation: u64,
    pub categories: Vec<BundleCategory>,
    pub emit_policy: EmitPolicy,
    /// Period of control-info heartbeats; `None` disables them
    pub heartbeat_interval: Option<Duration>,
}

impl AgentOptions {
    pub fn new(leaf_hub: impl Into<String>, incarnation: u64) -> Self {
        Self {
            leaf_hub: leaf_hub.into(),
            incarnation,
            categories: BundleCategory::ALL.to_vec(),
            emit_policy: EmitPolicy::default(),
            heartbeat_interval: None,
        }
    }

    pub fn with_categories(mut self, categories: impl IntoIterator<Item = BundleCategory>) -> Self {
        self.categories = categories.into_iter().collect();
        self
    }

    pub fn with_emit_policy(mut self, policy: EmitPolicy) -> Self {
        self.emit_policy = policy;
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }
}

struct Pipeline {
    tracker: Tracker,
    emitter: Arc<Emitter>,
}

struct Workers {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Owns the bundles of one leaf agent and their workers.
pub struct AgentSupervisor {
    options: AgentOptions,
    pipelines: BTreeMap<BundleCategory, Pipeline>,
    cancel: CancellationToken,
    workers: OnceLock<Workers>,
}

impl AgentSupervisor {
    pub fn new(options: AgentOptions, transport: Arc<dyn Transport>) -> Result<Self> {
        if options.leaf_hub.trim().is_empty() {
            return Err(SyncError::configuration("leaf hub name must not be empty"));
        }
        if options.categories.is_empty() {
            return Err(SyncError::configuration("at least one bundle category is required"));
        }

        let pipelines = options
            .categories
            .iter()
            .map(|&category| {
                let bundle = Arc::new(StatusBundle::new(
                    options.leaf_hub.clone(),
                    category,
                    options.incarnation,
                ));
                let pipeline = Pipeline {
                    tracker: Tracker::new(Arc::clone(&bundle)),
                    emitter: Arc::new(Emitter::new(
                        bundle,
                        Arc::clone(&transport),
                        options.emit_policy,
                    )),
                };
                (category, pipeline)
            })
            .collect();

        Ok(Self {
            options,
            pipelines,
            cancel: CancellationToken::new(),
            workers: OnceLock::new(),
        })
    }

    pub fn leaf_hub(&self) -> &str {
        &self.options.leaf_hub
    }

    pub fn incarnation(&self) -> u64 {
        self.options.incarnation
    }

    pub fn state(&self) -> LifecycleState {
        match (self.workers.get().is_some(), self.cancel.is_cancelled()) {
            (false, _) => LifecycleState::NotStarted,
            (true, false) => LifecycleState::Running,
            (true, true) => LifecycleState::Stopped,
        }
    }

    /// Token cancelled when the agent shuts down.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn bundle(&self, category: BundleCategory) -> Option<&Arc<StatusBundle>> {
        self.pipelines.get(&category).map(|p| p.tracker.bundle())
    }

    pub fn tracker(&self, category: BundleCategory) -> Option<&Tracker> {
        self.pipelines.get(&category).map(|p| &p.tracker)
    }

    pub fn emitter(&self, category: BundleCategory) -> Option<&Arc<Emitter>> {
        self.pipelines.get(&category).map(|p| &p.emitter)
    }

    /// Spawn emitters (and the heartbeat) exactly once.
    ///
    /// Returns `true` if this call started the agent. Must be called from
    /// within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut started_here = false;
        self.workers.get_or_init(|| {
            started_here = true;
            self.spawn_workers()
        });

        if started_here {
            tracing::info!(
                leaf_hub = %self.options.leaf_hub,
                incarnation = self.options.incarnation,
                categories = ?self.options.categories,
                "Agent started"
            );
        }
        started_here
    }

    fn spawn_workers(&self) -> Workers {
        let mut handles = Vec::with_capacity(self.pipelines.len() + 1);

        for pipeline in self.pipelines.values() {
            let emitter = Arc::clone(&pipeline.emitter);
            let cancel = self.cancel.child_token();
            handles.push(tokio::spawn(async move { emitter.run(cancel).await }));
        }

        if let (Some(interval), Some(pipeline)) = (
            self.options.heartbeat_interval,
            self.pipelines.get(&BundleCategory::ControlInfo),
        ) {
            let bundle = Arc::clone(pipeline.tracker.bundle());
            let cancel = self.cancel.child_token();
            handles.push(tokio::spawn(heartbeat(bundle, interval, cancel)));
        }

        Workers {
            handles: Mutex::new(handles),
        }
    }

    /// Route one watch event to the tracker of its category.
    pub fn dispatch(&self, event: &WatchEvent) -> Result<BundleVersion> {
        let pipeline = self.pipelines.get(&event.category).ok_or_else(|| {
            SyncError::new(
                ErrorCode::CategoryMismatch,
                format!("category {} is not tracked by this agent", event.category),
            )
        })?;
        pipeline.tracker.apply(event)
    }

    /// Dispatch every event of a stream until it ends or the agent stops.
    ///
    /// Returns the number of events applied.
    pub async fn consume<S>(&self, events: S) -> u64
    where
        S: Stream<Item = WatchEvent> + Send,
    {
        futures::pin_mut!(events);
        let mut applied = 0;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = events.next() => match next {
                    Some(event) => match self.dispatch(&event) {
                        Ok(_) => applied += 1,
                        Err(err) => err.log(),
                    },
                    None => break,
                },
            }
        }
        applied
    }

    /// Publish every bundle's current snapshot inline.
    ///
    /// Failures are logged; the first one is returned after all bundles were tried.
    pub async fn flush(&self) -> Result<()> {
        let mut first_error = None;
        for pipeline in self.pipelines.values() {
            if let Err(err) = pipeline.emitter.flush().await {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Stop all workers and wait for them to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles = match self.workers.get() {
            Some(workers) => std::mem::take(&mut *workers.handles.lock()),
            None => return,
        };
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                if e.is_panic() {
                    tracing::error!(error = %e, "Agent worker panicked");
                }
            }
        }
        tracing::info!(leaf_hub = %self.options.leaf_hub, "Agent stopped");
    }
}

/// Periodically bump the control-info bundle so the central side sees the
/// leaf hub as alive.
async fn heartbeat(bundle: Arc<StatusBundle>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick completes immediately; the initial version already announces us
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let payload =
                    serde_json::json!({"lastHeartbeat": chrono::Utc::now().to_rfc3339()});
                match StatusObject::from_payload(BundleCategory::ControlInfo, payload) {
                    Ok(object) => {
                        let version = bundle.update_object(object);
                        tracing::trace!(leaf_hub = %bundle.leaf_hub(), version = %version, "Heartbeat");
                    }
                    Err(err) => err.log(),
                }
            }
        }
    }
}
