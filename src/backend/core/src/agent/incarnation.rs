//! Durable incarnation counter.
//!
//! Every leaf agent start must observe an incarnation exactly one higher than
//! the previous run's, so bundles from a restarted agent supersede anything
//! the previous process emitted even though their generation restarts at 0.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::{ErrorCode, ErrorContext, Result};

/// Source of the incarnation for a starting agent.
#[async_trait]
pub trait IncarnationStore: Send + Sync {
    /// Record a new start and return its incarnation (previous + 1).
    async fn next_incarnation(&self) -> Result<u64>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IncarnationRecord {
    incarnation: u64,
}

/// Incarnation persisted as a small JSON file.
///
/// The new value is written to a sibling temp file, synced to disk and
/// renamed into place so a crash mid-write never loses the previous count.
#[derive(Debug, Clone)]
pub struct FileIncarnationStore {
    path: PathBuf,
}

impl FileIncarnationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<IncarnationRecord> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_error_code(ErrorCode::IncarnationStoreFailed),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(IncarnationRecord::default()),
            Err(e) => Err(e).with_error_code(ErrorCode::IncarnationStoreFailed),
        }
    }

    async fn write(&self, record: &IncarnationRecord) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_error_code(ErrorCode::IncarnationStoreFailed)?;
        }
        let tmp = self.path.with_extension("tmp");
        let bytes = serde_json::to_vec(record)?;
        {
            let mut file = tokio::fs::File::create(&tmp)
                .await
                .with_error_code(ErrorCode::IncarnationStoreFailed)?;
            file.write_all(&bytes)
                .await
                .with_error_code(ErrorCode::IncarnationStoreFailed)?;
            // the rename must never publish a file whose bytes are still in the page cache
            file.sync_all()
                .await
                .with_error_code(ErrorCode::IncarnationStoreFailed)?;
        }
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_error_code(ErrorCode::IncarnationStoreFailed)
    }
}

#[async_trait]
impl IncarnationStore for FileIncarnationStore {
    async fn next_incarnation(&self) -> Result<u64> {
        let previous = self.read().await?;
        let incarnation = previous.incarnation.checked_add(1).ok_or_else(|| {
            crate::error::SyncError::new(
                ErrorCode::IncarnationStoreFailed,
                "incarnation counter exhausted",
            )
        })?;
        self.write(&IncarnationRecord { incarnation }).await?;

        tracing::info!(
            path = %self.path.display(),
            previous = previous.incarnation,
            incarnation,
            "Recorded agent incarnation"
        );
        Ok(incarnation)
    }
}

/// Process-local counter, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryIncarnationStore {
    current: AtomicU64,
}

impl MemoryIncarnationStore {
    /// Start from the given previous incarnation.
    pub fn starting_at(previous: u64) -> Self {
        Self {
            current: AtomicU64::new(previous),
        }
    }
}

#[async_trait]
impl IncarnationStore for MemoryIncarnationStore {
    async fn next_incarnation(&self) -> Result<u64> {
        Ok(self.current.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_store_increments_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("incarnation.json");

        let first = FileIncarnationStore::new(&path);
        assert_eq!(first.next_incarnation().await.unwrap(), 1);

        // a fresh store on the same file models a restarted process
        let second = FileIncarnationStore::new(&path);
        assert_eq!(second.next_incarnation().await.unwrap(), 2);
        assert_eq!(second.next_incarnation().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_file_store_replaces_leftover_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("incarnation.json");
        let tmp = dir.path().join("incarnation.tmp");
        // a crash between create and rename leaves a partial temp file behind
        tokio::fs::write(&path, br#"{"incarnation": 8}"#).await.unwrap();
        tokio::fs::write(&tmp, b"{\"incarn").await.unwrap();

        let store = FileIncarnationStore::new(&path);
        assert_eq!(store.next_incarnation().await.unwrap(), 9);
        assert!(!tmp.exists());

        let record: IncarnationRecord =
            serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        assert_eq!(record.incarnation, 9);
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("incarnation.json");
        tokio::fs::write(&path, b"garbage").await.unwrap();

        let err = FileIncarnationStore::new(&path)
            .next_incarnation()
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::IncarnationStoreFailed);
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryIncarnationStore::starting_at(5);
        assert_eq!(store.next_incarnation().await.unwrap(), 6);
        assert_eq!(store.next_incarnation().await.unwrap(), 7);
    }
}
