//! Durable backend seam for the content store
//!
//! A backend persists one snapshot document guarded by a revision token. A
//! write carrying a stale token is rejected with
//! [`BackendError::RevisionConflict`] so the store can re-read and retry.

use async_trait::async_trait;
use thiserror::Error;

use crate::content::ContentSnapshot;
use crate::error::ContentError;

#[derive(Debug, Error)]
pub enum BackendError {
    /// The expected revision no longer matches the stored document
    #[error("revision conflict on {0}")]
    RevisionConflict(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt snapshot document: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<BackendError> for ContentError {
    fn from(err: BackendError) -> Self {
        ContentError::StoreUnavailable(err.to_string())
    }
}

/// Snapshot as read from a backend, with the revision needed to overwrite it
#[derive(Debug, Clone)]
pub struct StoredSnapshot {
    pub snapshot: ContentSnapshot,
    pub revision: String,
}

#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Current document, or `None` if nothing was ever written
    async fn load(&self) -> Result<Option<StoredSnapshot>, BackendError>;

    /// Persist `snapshot` if the stored revision still equals `revision`
    ///
    /// `None` means the caller expects no document to exist yet. Returns the
    /// new revision.
    async fn save(
        &self,
        snapshot: &ContentSnapshot,
        revision: Option<&str>,
    ) -> Result<String, BackendError>;
}
