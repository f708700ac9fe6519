//! Dictionary content model: entries, collections and snapshots

pub mod records;
pub mod seed;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ContentError;

pub use records::{Character, Word};

/// The two collections held by a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Words,
    Characters,
}

impl Collection {
    pub const ALL: [Collection; 2] = [Collection::Words, Collection::Characters];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Words => "words",
            Collection::Characters => "characters",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = ContentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "words" => Ok(Collection::Words),
            "characters" => Ok(Collection::Characters),
            other => Err(ContentError::Validation(format!(
                "unknown collection: {other}"
            ))),
        }
    }
}

/// Payload stored in one collection
pub trait Record:
    Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const COLLECTION: Collection;

    /// Trim whitespace and fill defaults before validation
    fn normalize(&mut self);

    fn validate(&self) -> Result<(), ContentError>;

    /// Case-insensitive uniqueness key within the collection
    fn natural_key(&self) -> String;

    /// Fields matched by substring search
    fn search_fields(&self) -> Vec<&str>;

    /// One-line rendering for listings
    fn label(&self) -> String;

    fn entries(snapshot: &ContentSnapshot) -> &[Entry<Self>];

    fn entries_mut(snapshot: &mut ContentSnapshot) -> &mut Vec<Entry<Self>>;
}

/// One stored record with its identity and timestamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry<T> {
    #[serde(default)]
    pub id: String,

    #[serde(flatten)]
    pub data: T,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl<T: Record> Entry<T> {
    /// Unsaved entry; the store assigns the id
    pub fn draft(data: T) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            data,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fresh entry with a generated id
    pub fn create(data: T, now: DateTime<Utc>) -> Self {
        Self {
            id: new_entry_id(),
            data,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn matches(&self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.data
            .search_fields()
            .iter()
            .any(|field| field.to_lowercase().contains(&needle))
    }
}

pub fn new_entry_id() -> String {
    Uuid::new_v4().to_string()
}

/// Full collections plus version and timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentSnapshot {
    #[serde(default)]
    pub words: Vec<Entry<Word>>,

    #[serde(default)]
    pub characters: Vec<Entry<Character>>,

    pub version: u64,

    pub updated_at: DateTime<Utc>,
}

impl ContentSnapshot {
    /// Version 1 holding the bundled initial dataset
    pub fn seeded() -> Self {
        let now = Utc::now();
        Self {
            words: seed::words(now),
            characters: seed::characters(now),
            version: 1,
            updated_at: now,
        }
    }

    /// Stamp `updated_at` and optionally move to the next version
    pub fn touch(&mut self, bump_version: bool) {
        if bump_version {
            self.version += 1;
        }
        self.updated_at = Utc::now().max(self.updated_at);
    }

    pub fn apply(&mut self, patch: SnapshotPatch, bump_version: bool) {
        if let Some(words) = patch.words {
            self.words = words;
        }
        if let Some(characters) = patch.characters {
            self.characters = characters;
        }
        self.touch(bump_version);
    }

    pub fn len(&self, collection: Collection) -> usize {
        match collection {
            Collection::Words => self.words.len(),
            Collection::Characters => self.characters.len(),
        }
    }
}

/// Partial update merged by `ContentStore::save`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<Entry<Word>>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub characters: Option<Vec<Entry<Character>>>,
}
