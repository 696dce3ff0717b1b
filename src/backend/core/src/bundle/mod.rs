//! Status bundles.
//!
//! A [`StatusBundle`] holds the full current snapshot of one category of
//! objects on one leaf hub, stamped with a [`BundleVersion`]:
//!
//! - **`version`**: the `(incarnation, generation)` ordering stamp.
//! - **`category`**: the closed set of bundle categories with their delete
//!   policies and identity rules.
//!
//! Every mutation and every snapshot runs under one exclusive lock per bundle,
//! so a snapshot's content always matches the version reported with it. No
//! I/O happens while the lock is held; accessors hand out value copies.

pub mod category;
pub mod version;

pub use category::{BundleCategory, BundleKey, DeletePolicy, ObjectKey, StatusObject};
pub use version::BundleVersion;

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::error::Result;

#[derive(Debug)]
struct BundleState {
    version: BundleVersion,
    objects: BTreeMap<ObjectKey, StatusObject>,
}

/// Concurrency-safe container for one (leaf hub, category) bundle.
#[derive(Debug)]
pub struct StatusBundle {
    leaf_hub: String,
    category: BundleCategory,
    state: Mutex<BundleState>,
    changed: Notify,
}

impl StatusBundle {
    /// Create an empty bundle at generation 0 of the given incarnation.
    pub fn new(leaf_hub: impl Into<String>, category: BundleCategory, incarnation: u64) -> Self {
        Self {
            leaf_hub: leaf_hub.into(),
            category,
            state: Mutex::new(BundleState {
                version: BundleVersion::initial(incarnation),
                objects: BTreeMap::new(),
            }),
            changed: Notify::new(),
        }
    }

    pub fn leaf_hub(&self) -> &str {
        &self.leaf_hub
    }

    pub fn category(&self) -> BundleCategory {
        self.category
    }

    pub fn key(&self) -> BundleKey {
        BundleKey::new(self.leaf_hub.clone(), self.category)
    }

    /// Insert or replace an object and advance the generation.
    ///
    /// The generation moves exactly once per call, even when the stored
    /// content ends up identical. Returns the version after the update.
    pub fn update_object(&self, object: StatusObject) -> BundleVersion {
        let version = {
            let mut state = self.state.lock();
            if self.category.retains_objects() {
                state.objects.insert(object.key.clone(), object);
            }
            state.version.increment();
            state.version
        };
        self.changed.notify_one();
        version
    }

    /// Remove an object according to the category's delete policy.
    ///
    /// With [`DeletePolicy::BumpVersion`] the generation advances once per
    /// call, whether or not the key was present. With [`DeletePolicy::NoOp`]
    /// nothing changes. Returns the version after the call.
    pub fn delete_object(&self, key: &ObjectKey) -> BundleVersion {
        match self.category.delete_policy() {
            DeletePolicy::NoOp => self.version(),
            DeletePolicy::BumpVersion => {
                let version = {
                    let mut state = self.state.lock();
                    state.objects.remove(key);
                    state.version.increment();
                    state.version
                };
                self.changed.notify_one();
                version
            }
        }
    }

    /// Current version, as a copy.
    pub fn version(&self) -> BundleVersion {
        self.state.lock().version
    }

    /// Capture version and content together.
    pub fn snapshot(&self) -> BundleSnapshot {
        let state = self.state.lock();
        BundleSnapshot {
            leaf_hub: self.leaf_hub.clone(),
            category: self.category,
            version: state.version,
            objects: state.objects.values().cloned().collect(),
        }
    }

    /// Number of objects currently retained.
    pub fn len(&self) -> usize {
        self.state.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until the bundle changes.
    ///
    /// A change that happened since the last wait completes immediately, so a
    /// single consumer never misses a mutation.
    pub async fn changed(&self) {
        self.changed.notified().await;
    }
}

/// Immutable full-state copy of a bundle; also the wire envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleSnapshot {
    #[serde(rename = "leafHubName")]
    pub leaf_hub: String,
    pub category: BundleCategory,
    #[serde(rename = "bundleVersion")]
    pub version: BundleVersion,
    #[serde(default)]
    pub objects: Vec<StatusObject>,
}

impl BundleSnapshot {
    pub fn key(&self) -> BundleKey {
        BundleKey::new(self.leaf_hub.clone(), self.category)
    }

    /// Serialize into the JSON wire envelope.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a JSON wire envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
