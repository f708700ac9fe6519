//! Local JSON file backend
//!
//! Used in standalone and development setups. The revision token is the
//! SHA-256 of the file bytes, so a concurrent writer sharing the file is
//! detected the same way the remote backend detects one.
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;

use super::backend::{BackendError, SnapshotBackend, StoredSnapshot};
use crate::content::ContentSnapshot;

pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_bytes(&self) -> Result<Option<Vec<u8>>, BackendError> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl SnapshotBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn load(&self) -> Result<Option<StoredSnapshot>, BackendError> {
        let Some(bytes) = self.read_bytes().await? else {
            return Ok(None);
        };

        let snapshot = serde_json::from_slice(&bytes)?;
        Ok(Some(StoredSnapshot {
            snapshot,
            revision: compute_revision(&bytes),
        }))
    }

    async fn save(
        &self,
        snapshot: &ContentSnapshot,
        revision: Option<&str>,
    ) -> Result<String, BackendError> {
        let current = self.read_bytes().await?.map(|bytes| compute_revision(&bytes));
        if current.as_deref() != revision {
            return Err(BackendError::RevisionConflict(
                self.path.display().to_string(),
            ));
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let bytes = serde_json::to_vec_pretty(snapshot)?;

        // Write then rename so readers never observe a half-written document
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, &bytes).await?;
        fs::rename(&tmp_path, &self.path).await?;

        Ok(compute_revision(&bytes))
    }
}

/// Compute SHA-256 hex string
fn compute_revision(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new(dir.path().join("content.json"));
        assert!(backend.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load_returns_same_revision() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new(dir.path().join("nested/content.json"));
        let snapshot = ContentSnapshot::seeded();

        let revision = backend.save(&snapshot, None).await.unwrap();
        let stored = backend.load().await.unwrap().unwrap();

        assert_eq!(stored.revision, revision);
        assert_eq!(stored.snapshot, snapshot);
    }

    #[tokio::test]
    async fn stale_revision_is_rejected() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new(dir.path().join("content.json"));
        let mut snapshot = ContentSnapshot::seeded();

        let first = backend.save(&snapshot, None).await.unwrap();
        snapshot.touch(true);
        backend.save(&snapshot, Some(&first)).await.unwrap();

        snapshot.touch(true);
        let err = backend.save(&snapshot, Some(&first)).await.unwrap_err();
        assert!(matches!(err, BackendError::RevisionConflict(_)));

        let err = backend.save(&snapshot, None).await.unwrap_err();
        assert!(matches!(err, BackendError::RevisionConflict(_)));
    }
}
