//! Snapshot backend over a revisioned file repository
//!
//! The store only needs two primitives from a remote repository: read a file
//! together with its revision, and write a file conditionally on a revision.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::backend::{BackendError, SnapshotBackend, StoredSnapshot};
use crate::content::ContentSnapshot;

/// File content plus the revision required to overwrite it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionedFile {
    pub revision: String,
    pub content: Vec<u8>,
}

#[async_trait]
pub trait RevisionedFiles: Send + Sync {
    async fn read_file(&self, path: &str) -> Result<Option<RevisionedFile>, BackendError>;

    /// Write `content`; `revision` must match the current one (`None` = create)
    async fn write_file(
        &self,
        path: &str,
        content: &[u8],
        revision: Option<&str>,
    ) -> Result<String, BackendError>;
}

pub struct RepoBackend {
    files: Arc<dyn RevisionedFiles>,
    path: String,
}

impl RepoBackend {
    pub fn new(files: Arc<dyn RevisionedFiles>, path: impl Into<String>) -> Self {
        Self {
            files,
            path: path.into(),
        }
    }
}

#[async_trait]
impl SnapshotBackend for RepoBackend {
    fn name(&self) -> &'static str {
        "repo"
    }

    async fn load(&self) -> Result<Option<StoredSnapshot>, BackendError> {
        let Some(file) = self.files.read_file(&self.path).await? else {
            return Ok(None);
        };

        Ok(Some(StoredSnapshot {
            snapshot: serde_json::from_slice(&file.content)?,
            revision: file.revision,
        }))
    }

    async fn save(
        &self,
        snapshot: &ContentSnapshot,
        revision: Option<&str>,
    ) -> Result<String, BackendError> {
        let content = serde_json::to_vec_pretty(snapshot)?;
        self.files.write_file(&self.path, &content, revision).await
    }
}

/// In-process repository
///
/// Backs `--backend memory` and tests. Can be switched offline to simulate an
/// unreachable remote.
#[derive(Default)]
pub struct MemoryRepository {
    files: Mutex<HashMap<String, RevisionedFile>>,
    counter: AtomicU64,
    offline: AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), BackendError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("repository offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RevisionedFiles for MemoryRepository {
    async fn read_file(&self, path: &str) -> Result<Option<RevisionedFile>, BackendError> {
        self.check_online()?;
        Ok(self.files.lock().get(path).cloned())
    }

    async fn write_file(
        &self,
        path: &str,
        content: &[u8],
        revision: Option<&str>,
    ) -> Result<String, BackendError> {
        self.check_online()?;

        let mut files = self.files.lock();
        let current = files.get(path).map(|file| file.revision.as_str());
        if current != revision {
            return Err(BackendError::RevisionConflict(path.to_string()));
        }

        let next = format!("r{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1);
        files.insert(
            path.to_string(),
            RevisionedFile {
                revision: next.clone(),
                content: content.to_vec(),
            },
        );
        Ok(next)
    }
}
