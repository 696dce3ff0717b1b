//! Conflator - keeps only the newest bundle per (leaf hub, category).
//!
//! Each key moves from unknown to tracking its last applied version. A bundle
//! is applied when its key is unknown or its version is strictly newer;
//! anything older or equal is discarded. Since every bundle is a full
//! snapshot, dropping one never loses information that a newer bundle does
//! not also carry.
//!
//! The check-and-apply for one key runs under that key's async mutex, so two
//! deliveries of the same key can never both pass the version check. Keys
//! never wait on each other.
//!
//! An equal version whose content differs from what was applied means the
//! sender broke the version contract. It is reported as
//! [`IngestDecision::Conflict`] and never applied.

pub mod store;

pub use store::{InMemoryStatusStore, StatusStore, StoredBundle};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::bundle::{BundleKey, BundleSnapshot, BundleVersion, StatusObject};
use crate::error::{ErrorCode, ErrorDetails, Result, SyncError};
use crate::telemetry::metrics::SyncMetrics;
use crate::transport::TransportMessage;

/// Outcome of ingesting one bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestDecision {
    /// Newer than anything seen; written to the store
    Applied,
    /// Same version and content as the last applied bundle
    Duplicate,
    /// Older than the last applied bundle
    Stale,
    /// Same version as the last applied bundle with different content
    Conflict,
}

impl IngestDecision {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Duplicate => "duplicate",
            Self::Stale => "stale",
            Self::Conflict => "conflict",
        }
    }

    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

impl std::fmt::Display for IngestDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflationState {
    #[serde(flatten)]
    pub key: BundleKey,
    /// `None` while the key is still unknown
    pub last_applied: Option<BundleVersion>,
    pub applied: u64,
    pub discarded: u64,
    pub conflicts: u64,
    pub last_applied_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct KeyState {
    last_applied: Option<BundleVersion>,
    digest: Option<String>,
    applied: u64,
    discarded: u64,
    conflicts: u64,
    last_applied_at: Option<DateTime<Utc>>,
}

impl KeyState {
    fn view(&self, key: BundleKey) -> ConflationState {
        ConflationState {
            key,
            last_applied: self.last_applied,
            applied: self.applied,
            discarded: self.discarded,
            conflicts: self.conflicts,
            last_applied_at: self.last_applied_at,
        }
    }
}

/// Reduces a stream of possibly duplicated, reordered bundles to the newest
/// one per key.
pub struct Conflator {
    keys: DashMap<BundleKey, Arc<Mutex<KeyState>>>,
    store: Arc<dyn StatusStore>,
}

impl Conflator {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self {
            keys: DashMap::new(),
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn StatusStore> {
        &self.store
    }

    /// Decode a wire envelope.
    ///
    /// Failures are logged and counted; the message is meant to be dropped.
    pub fn decode(&self, bytes: &[u8]) -> Result<BundleSnapshot> {
        BundleSnapshot::decode(bytes).map_err(|err| {
            tracing::warn!(
                error = %err,
                payload_len = bytes.len(),
                "Dropping undecodable bundle"
            );
            err
        })
    }

    /// Ingest a transport message.
    ///
    /// The message header must agree with the envelope it carries.
    pub async fn ingest(&self, message: &TransportMessage) -> Result<IngestDecision> {
        let snapshot = self.decode(&message.payload)?;
        if snapshot.key() != message.key || snapshot.version != message.version {
            let err = SyncError::decode(format!(
                "header {} {} does not match envelope {} {}",
                message.key,
                message.version,
                snapshot.key(),
                snapshot.version
            ));
            tracing::warn!(error = %err, "Dropping inconsistent bundle");
            return Err(err);
        }
        self.ingest_snapshot(snapshot).await
    }

    /// Ingest an already decoded bundle.
    pub async fn ingest_snapshot(&self, snapshot: BundleSnapshot) -> Result<IngestDecision> {
        let key = snapshot.key();
        let version = snapshot.version;
        let entry = self.entry(&key);
        let mut state = entry.lock().await;

        let decision = match state.last_applied {
            Some(last) if version < last => IngestDecision::Stale,
            Some(last) if version == last => {
                if state.digest.as_deref() == Some(content_digest(&snapshot.objects)?.as_str()) {
                    IngestDecision::Duplicate
                } else {
                    IngestDecision::Conflict
                }
            }
            _ => {
                let digest = content_digest(&snapshot.objects)?;
                self.store
                    .apply(&key, version, &snapshot.objects)
                    .await
                    .map_err(|err| {
                        err.log();
                        err
                    })?;
                state.last_applied = Some(version);
                state.digest = Some(digest);
                state.applied += 1;
                state.last_applied_at = Some(Utc::now());
                IngestDecision::Applied
            }
        };

        match decision {
            IngestDecision::Applied => {
                tracing::debug!(
                    leaf_hub = %key.leaf_hub,
                    category = %key.category,
                    version = %version,
                    "Applied bundle"
                );
            }
            IngestDecision::Duplicate | IngestDecision::Stale => {
                state.discarded += 1;
                tracing::trace!(
                    leaf_hub = %key.leaf_hub,
                    category = %key.category,
                    version = %version,
                    decision = %decision,
                    "Discarded bundle"
                );
            }
            IngestDecision::Conflict => {
                state.conflicts += 1;
                SyncError::new(
                    ErrorCode::VersionConflict,
                    "Bundle content changed without a version change",
                )
                .with_details(
                    ErrorDetails::new()
                        .with_bundle(key.leaf_hub.clone(), key.category)
                        .with_context("version", version.to_string()),
                )
                .log();
            }
        }

        SyncMetrics::record_ingest(&key, decision.as_str());
        Ok(decision)
    }

    /// Current state of one key, if it was ever seen.
    pub async fn state(&self, key: &BundleKey) -> Option<ConflationState> {
        let entry = self.keys.get(key).map(|e| Arc::clone(e.value()))?;
        let state = entry.lock().await;
        Some(state.view(key.clone()))
    }

    /// States of all keys, ordered by key.
    pub async fn states(&self) -> Vec<ConflationState> {
        let mut entries: Vec<_> = self
            .keys
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut states = Vec::with_capacity(entries.len());
        for (key, entry) in entries {
            states.push(entry.lock().await.view(key));
        }
        states
    }

    pub fn tracked_keys(&self) -> usize {
        self.keys.len()
    }

    /// Ingest messages from a channel until it closes or `cancel` fires.
    pub async fn run(&self, mut rx: mpsc::Receiver<TransportMessage>, cancel: CancellationToken) {
        tracing::info!("Conflator started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                message = rx.recv() => match message {
                    Some(message) => {
                        // decode failures are already logged; the message is dropped
                        if let Err(err) = self.ingest(&message).await {
                            if err.code() != ErrorCode::DecodeFailed {
                                err.log();
                            }
                        }
                    }
                    None => break,
                },
            }
        }
        tracing::info!(tracked_keys = self.tracked_keys(), "Conflator stopped");
    }

    fn entry(&self, key: &BundleKey) -> Arc<Mutex<KeyState>> {
        if let Some(existing) = self.keys.get(key) {
            return Arc::clone(existing.value());
        }
        let entry = Arc::clone(self.keys.entry(key.clone()).or_default().value());
        SyncMetrics::set_tracked_keys(self.keys.len());
        entry
    }
}

/// Hex SHA-256 of the canonical JSON of a bundle's objects.
fn content_digest(objects: &[StatusObject]) -> Result<String> {
    let bytes = serde_json::to_vec(objects)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
