//! Bundle versions.
//!
//! A [`BundleVersion`] totally orders every state a single leaf agent ever
//! produces. The incarnation identifies one process lifetime, the generation
//! counts content changes inside it. Ordering is lexicographic, so any state
//! from a newer incarnation supersedes every state of an older one regardless
//! of generation.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Order-establishing stamp carried by every bundle.
///
/// Field order matters: the derived `Ord` compares `incarnation` first and
/// `generation` second.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct BundleVersion {
    /// Incremented by exactly one on every agent (re)start
    pub incarnation: u64,
    /// Incremented by exactly one on every content change, reset per incarnation
    pub generation: u64,
}

impl BundleVersion {
    pub const fn new(incarnation: u64, generation: u64) -> Self {
        Self {
            incarnation,
            generation,
        }
    }

    /// The first version of a bundle created in the given incarnation.
    pub const fn initial(incarnation: u64) -> Self {
        Self::new(incarnation, 0)
    }

    /// Compare two versions lexicographically.
    pub fn compare(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }

    /// Returns `true` if `self` strictly supersedes `other`.
    pub fn newer_than(&self, other: &Self) -> bool {
        self > other
    }

    /// Advance the generation by one within the current incarnation.
    ///
    /// # Panics
    ///
    /// Panics if the generation counter overflows.
    pub fn increment(&mut self) {
        self.generation = self
            .generation
            .checked_add(1)
            .unwrap_or_else(|| panic!("generation counter overflow at {}", self));
    }

    /// Move to the next incarnation, resetting the generation.
    ///
    /// # Panics
    ///
    /// Panics if the incarnation counter overflows.
    pub fn new_incarnation(&mut self) {
        self.incarnation = self
            .incarnation
            .checked_add(1)
            .unwrap_or_else(|| panic!("incarnation counter overflow at {}", self));
        self.generation = 0;
    }
}

impl fmt::Display for BundleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.incarnation, self.generation)
    }
}
