//! Bundle categories and the objects they carry.
//!
//! Categories form a closed set. Each variant decides how an object's identity
//! is extracted from its payload and what a delete means for the bundle.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ErrorCode, Result, SyncError};

/// What a delete does to a bundle of a given category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Remove the object (if present) and advance the generation.
    BumpVersion,
    /// Ignore the delete entirely: content and version stay untouched.
    NoOp,
}

/// The kinds of status a leaf hub reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BundleCategory {
    /// Liveness of the leaf hub itself. Never represents a removable fact, so
    /// deletes are no-ops and no object content is retained.
    ControlInfo,
    /// Clusters managed by the leaf hub.
    ManagedClusters,
    /// Policy compliance status.
    Policies,
    /// Placement decisions computed on the leaf hub.
    PlacementDecisions,
}

impl BundleCategory {
    pub const ALL: [BundleCategory; 4] = [
        Self::ControlInfo,
        Self::ManagedClusters,
        Self::Policies,
        Self::PlacementDecisions,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ControlInfo => "control-info",
            Self::ManagedClusters => "managed-clusters",
            Self::Policies => "policies",
            Self::PlacementDecisions => "placement-decisions",
        }
    }

    pub const fn delete_policy(&self) -> DeletePolicy {
        match self {
            Self::ControlInfo => DeletePolicy::NoOp,
            Self::ManagedClusters | Self::Policies | Self::PlacementDecisions => {
                DeletePolicy::BumpVersion
            }
        }
    }

    /// Whether updates store the object in the bundle content.
    ///
    /// Control info only counts heartbeats; its snapshots carry no objects.
    pub const fn retains_objects(&self) -> bool {
        !matches!(self, Self::ControlInfo)
    }

    /// Whether object identity includes the namespace.
    const fn namespaced(&self) -> bool {
        matches!(self, Self::Policies | Self::PlacementDecisions)
    }

    /// Extract the identity of an object of this category from its payload.
    ///
    /// Cluster-scoped categories are keyed by `metadata.name`, namespaced ones
    /// by `metadata.namespace/metadata.name`. Control info objects all share
    /// the leaf hub's single identity.
    pub fn object_key(&self, payload: &serde_json::Value) -> Result<ObjectKey> {
        if matches!(self, Self::ControlInfo) {
            return Ok(ObjectKey::new(self.as_str()));
        }

        let metadata = payload.get("metadata");
        let field = |name: &str| {
            metadata
                .and_then(|m| m.get(name))
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
        };

        let name = field("name").ok_or_else(|| {
            SyncError::new(ErrorCode::InvalidObject, "object has no metadata.name")
                .with_context("category", self.as_str())
        })?;

        if self.namespaced() {
            let namespace = field("namespace").ok_or_else(|| {
                SyncError::new(ErrorCode::InvalidObject, "object has no metadata.namespace")
                    .with_context("category", self.as_str())
                    .with_context("name", name)
            })?;
            Ok(ObjectKey::new(format!("{}/{}", namespace, name)))
        } else {
            Ok(ObjectKey::new(name))
        }
    }
}

impl fmt::Display for BundleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BundleCategory {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| {
                SyncError::new(ErrorCode::CategoryMismatch, format!("unknown bundle category: {}", s))
            })
    }
}

/// Stable identity of a tracked object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectKey(String);

impl ObjectKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An opaque object tracked inside a bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusObject {
    pub key: ObjectKey,
    pub payload: serde_json::Value,
}

impl StatusObject {
    pub fn new(key: ObjectKey, payload: serde_json::Value) -> Self {
        Self { key, payload }
    }

    /// Build an object, deriving its key from the payload per category rules.
    pub fn from_payload(category: BundleCategory, payload: serde_json::Value) -> Result<Self> {
        let key = category.object_key(&payload)?;
        Ok(Self { key, payload })
    }
}

/// Identifies one bundle stream: a leaf hub and a category.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleKey {
    #[serde(rename = "leafHubName")]
    pub leaf_hub: String,
    pub category: BundleCategory,
}

impl BundleKey {
    pub fn new(leaf_hub: impl Into<String>, category: BundleCategory) -> Self {
        Self {
            leaf_hub: leaf_hub.into(),
            category,
        }
    }
}

impl fmt::Display for BundleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.leaf_hub, self.category)
    }
}
