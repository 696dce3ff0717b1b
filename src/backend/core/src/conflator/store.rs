//! Destination of conflated bundles.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::bundle::{BundleKey, BundleVersion, StatusObject};
use crate::error::Result;

/// Downstream store receiving the newest content of each bundle.
///
/// `apply` is an idempotent upsert: applying the same content twice leaves
/// the store as it was after the first call.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn apply(
        &self,
        key: &BundleKey,
        version: BundleVersion,
        objects: &[StatusObject],
    ) -> Result<()>;
}

/// A bundle as last written to a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredBundle {
    #[serde(flatten)]
    pub key: BundleKey,
    #[serde(rename = "bundleVersion")]
    pub version: BundleVersion,
    pub objects: Vec<StatusObject>,
    pub updated_at: DateTime<Utc>,
}

/// Store kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    bundles: DashMap<BundleKey, StoredBundle>,
    writes: AtomicU64,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &BundleKey) -> Option<StoredBundle> {
        self.bundles.get(key).map(|entry| entry.value().clone())
    }

    /// All stored bundles ordered by key.
    pub fn list(&self) -> Vec<StoredBundle> {
        let mut bundles: Vec<_> = self.bundles.iter().map(|e| e.value().clone()).collect();
        bundles.sort_by(|a, b| a.key.cmp(&b.key));
        bundles
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    /// Number of applies that changed the store.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn apply(
        &self,
        key: &BundleKey,
        version: BundleVersion,
        objects: &[StatusObject],
    ) -> Result<()> {
        match self.bundles.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let stored = occupied.get_mut();
                if stored.version == version && stored.objects == objects {
                    return Ok(());
                }
                stored.version = version;
                stored.objects = objects.to_vec();
                stored.updated_at = Utc::now();
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredBundle {
                    key: key.clone(),
                    version,
                    objects: objects.to_vec(),
                    updated_at: Utc::now(),
                });
            }
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::BundleCategory;
    use serde_json::json;

    fn objects(names: &[&str]) -> Vec<StatusObject> {
        names
            .iter()
            .map(|name| {
                StatusObject::from_payload(
                    BundleCategory::ManagedClusters,
                    json!({"metadata": {"name": name}}),
                )
                .unwrap()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let store = InMemoryStatusStore::new();
        let key = BundleKey::new("hub1", BundleCategory::ManagedClusters);
        let content = objects(&["a", "b"]);

        store.apply(&key, BundleVersion::new(1, 2), &content).await.unwrap();
        let first = store.get(&key).unwrap();
        store.apply(&key, BundleVersion::new(1, 2), &content).await.unwrap();

        assert_eq!(store.get(&key).unwrap(), first);
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn test_apply_replaces_content() {
        let store = InMemoryStatusStore::new();
        let key = BundleKey::new("hub1", BundleCategory::ManagedClusters);

        store.apply(&key, BundleVersion::new(1, 1), &objects(&["a"])).await.unwrap();
        store.apply(&key, BundleVersion::new(1, 2), &objects(&["b"])).await.unwrap();

        let stored = store.get(&key).unwrap();
        assert_eq!(stored.version, BundleVersion::new(1, 2));
        assert_eq!(stored.objects, objects(&["b"]));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_list_is_ordered() {
        let store = InMemoryStatusStore::new();
        for leaf in ["hub2", "hub1"] {
            let key = BundleKey::new(leaf, BundleCategory::Policies);
            store.apply(&key, BundleVersion::new(1, 0), &[]).await.unwrap();
        }
        let leaves: Vec<_> = store.list().into_iter().map(|b| b.key.leaf_hub).collect();
        assert_eq!(leaves, vec!["hub1", "hub2"]);
    }
}
