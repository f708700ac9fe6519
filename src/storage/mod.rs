//! Versioned content store
//!
//! The store owns the canonical snapshot. Every mutation is a
//! read-modify-write against the backend, guarded by the backend revision so
//! several server instances can share one durable document.

pub mod backend;
pub mod file;
pub mod remote;
pub mod repo;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::content::{ContentSnapshot, Entry, Record, SnapshotPatch};
use crate::error::{ContentError, ContentResult};

pub use backend::{BackendError, SnapshotBackend, StoredSnapshot};
pub use file::FileBackend;
pub use remote::{HttpRepository, RepoConfig};
pub use repo::{MemoryRepository, RepoBackend, RevisionedFile, RevisionedFiles};

pub const DEFAULT_DATA_FILE: &str = ".lexicon/content.json";

/// Backend selection made once at process start
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BackendKind {
    /// Remote repository when configured in the environment, local file otherwise
    Auto,
    File,
    Repo,
    Memory,
}

/// Build the backend for `kind`, probing the environment for `Auto`
pub fn open_backend(kind: BackendKind, data_file: PathBuf) -> Result<Arc<dyn SnapshotBackend>> {
    let backend: Arc<dyn SnapshotBackend> = match kind {
        BackendKind::Auto => match RepoConfig::from_env() {
            Ok(config) => repo_backend(config)?,
            Err(err) => {
                tracing::debug!(reason = %err, "no remote repository configured");
                Arc::new(FileBackend::new(data_file))
            }
        },
        BackendKind::File => Arc::new(FileBackend::new(data_file)),
        BackendKind::Repo => repo_backend(RepoConfig::from_env()?)?,
        BackendKind::Memory => Arc::new(RepoBackend::new(
            Arc::new(MemoryRepository::new()),
            remote::DEFAULT_CONTENT_PATH,
        )),
    };

    tracing::info!(backend = backend.name(), "content backend selected");
    Ok(backend)
}

fn repo_backend(config: RepoConfig) -> Result<Arc<dyn SnapshotBackend>> {
    let path = config.path.clone();
    let files = Arc::new(HttpRepository::new(config)?);
    Ok(Arc::new(RepoBackend::new(files, path)))
}

/// Store tuning
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Attempts at a read-modify-write before a revision conflict is reported
    pub max_write_attempts: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_write_attempts: 5,
        }
    }
}

/// Result of a mutation closure
enum Outcome<R> {
    /// Persist the modified snapshot
    Commit(R),
    /// Leave the stored snapshot untouched
    Skip(R),
}

pub struct ContentStore {
    backend: Arc<dyn SnapshotBackend>,
    config: StoreConfig,
    write_lock: Mutex<()>,
}

impl ContentStore {
    pub fn new(backend: Arc<dyn SnapshotBackend>) -> Self {
        Self::with_config(backend, StoreConfig::default())
    }

    pub fn with_config(backend: Arc<dyn SnapshotBackend>, config: StoreConfig) -> Self {
        Self {
            backend,
            config,
            write_lock: Mutex::new(()),
        }
    }

    /// Store over a fresh in-process repository
    pub fn in_memory() -> Self {
        Self::new(Arc::new(RepoBackend::new(
            Arc::new(MemoryRepository::new()),
            remote::DEFAULT_CONTENT_PATH,
        )))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Current snapshot, seeding version 1 if the backend is empty
    pub async fn load(&self) -> ContentResult<ContentSnapshot> {
        Ok(self.load_or_seed().await?.snapshot)
    }

    async fn load_or_seed(&self) -> ContentResult<StoredSnapshot> {
        for _ in 0..self.config.max_write_attempts {
            if let Some(stored) = self.backend.load().await? {
                return Ok(stored);
            }

            let snapshot = ContentSnapshot::seeded();
            match self.backend.save(&snapshot, None).await {
                Ok(revision) => {
                    tracing::info!(
                        backend = self.backend.name(),
                        words = snapshot.words.len(),
                        characters = snapshot.characters.len(),
                        "seeded initial content"
                    );
                    return Ok(StoredSnapshot { snapshot, revision });
                }
                // Another instance seeded first; read theirs
                Err(BackendError::RevisionConflict(_)) => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Err(ContentError::StoreUnavailable(
            "could not initialize content".into(),
        ))
    }

    /// Read-modify-write with revision-checked persistence
    async fn commit<R, F>(&self, mut apply: F) -> ContentResult<(R, ContentSnapshot)>
    where
        F: FnMut(&mut ContentSnapshot) -> ContentResult<Outcome<R>>,
    {
        let _guard = self.write_lock.lock().await;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let StoredSnapshot {
                mut snapshot,
                revision,
            } = self.load_or_seed().await?;

            let value = match apply(&mut snapshot)? {
                Outcome::Skip(value) => return Ok((value, snapshot)),
                Outcome::Commit(value) => value,
            };

            match self.backend.save(&snapshot, Some(&revision)).await {
                Ok(_) => {
                    tracing::debug!(version = snapshot.version, "snapshot committed");
                    return Ok((value, snapshot));
                }
                Err(BackendError::RevisionConflict(detail))
                    if attempt < self.config.max_write_attempts =>
                {
                    tracing::warn!(attempt, %detail, "revision conflict, re-reading snapshot");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Merge a partial update and persist it
    pub async fn save(
        &self,
        patch: SnapshotPatch,
        bump_version: bool,
    ) -> ContentResult<ContentSnapshot> {
        let (_, snapshot) = self
            .commit(|snapshot| {
                snapshot.apply(patch.clone(), bump_version);
                Ok(Outcome::Commit(()))
            })
            .await?;
        Ok(snapshot)
    }

    /// Replace the entry with a matching id, or append it under a new id
    pub async fn upsert_entry<T: Record>(
        &self,
        entry: Entry<T>,
    ) -> ContentResult<(Entry<T>, ContentSnapshot)> {
        let mut data = entry.data;
        data.normalize();
        data.validate()?;
        let id = entry.id;

        self.commit(|snapshot| {
            let stored = write_entry(snapshot, &id, &data, true)?;
            Ok(Outcome::Commit(stored))
        })
        .await
    }

    /// Replace an existing entry; `NotFound` if the id is absent
    pub async fn update_entry<T: Record>(
        &self,
        id: &str,
        data: T,
    ) -> ContentResult<(Entry<T>, ContentSnapshot)> {
        let mut data = data;
        data.normalize();
        data.validate()?;

        self.commit(|snapshot| {
            let stored = write_entry(snapshot, id, &data, false)?;
            Ok(Outcome::Commit(stored))
        })
        .await
    }

    /// Remove an entry; a missing id is a no-op that keeps the version
    pub async fn delete_entry<T: Record>(&self, id: &str) -> ContentResult<(bool, ContentSnapshot)> {
        self.commit(|snapshot| {
            let entries = T::entries_mut(snapshot);
            let before = entries.len();
            entries.retain(|entry| entry.id != id);

            if entries.len() == before {
                return Ok(Outcome::Skip(false));
            }

            snapshot.touch(true);
            Ok(Outcome::Commit(true))
        })
        .await
    }

    pub async fn list<T: Record>(&self) -> ContentResult<Vec<Entry<T>>> {
        let snapshot = self.load().await?;
        Ok(T::entries(&snapshot).to_vec())
    }

    pub async fn get<T: Record>(&self, id: &str) -> ContentResult<Entry<T>> {
        let snapshot = self.load().await?;
        T::entries(&snapshot)
            .iter()
            .find(|entry| entry.id == id)
            .cloned()
            .ok_or_else(|| ContentError::NotFound(format!("{} entry {id}", T::COLLECTION)))
    }

    /// Case-insensitive substring search; an empty query lists everything
    pub async fn search<T: Record>(&self, query: &str) -> ContentResult<Vec<Entry<T>>> {
        let snapshot = self.load().await?;
        Ok(T::entries(&snapshot)
            .iter()
            .filter(|entry| entry.matches(query))
            .cloned()
            .collect())
    }
}

/// Apply one entry write to the snapshot and bump its version
fn write_entry<T: Record>(
    snapshot: &mut ContentSnapshot,
    id: &str,
    data: &T,
    insert_missing: bool,
) -> ContentResult<Entry<T>> {
    let now = Utc::now();
    let key = data.natural_key();
    let entries = T::entries_mut(snapshot);

    let existing = entries
        .iter()
        .position(|entry| !id.is_empty() && entry.id == id);

    let duplicate = entries.iter().enumerate().any(|(index, entry)| {
        Some(index) != existing && entry.data.natural_key() == key
    });
    if duplicate {
        return Err(ContentError::Conflict(format!(
            "{} entry with the same key already exists",
            T::COLLECTION
        )));
    }

    let stored = match existing {
        Some(index) => {
            let entry = &mut entries[index];
            entry.data = data.clone();
            entry.updated_at = now.max(entry.created_at);
            entry.clone()
        }
        None if insert_missing => {
            let entry = Entry::create(data.clone(), now);
            entries.push(entry.clone());
            entry
        }
        None => {
            return Err(ContentError::NotFound(format!(
                "{} entry {id}",
                T::COLLECTION
            )))
        }
    };

    snapshot.touch(true);
    Ok(stored)
}
