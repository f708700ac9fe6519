//! Local cache manager
//!
//! Every value is wrapped in a [`CacheEntry`] carrying its write time and the
//! schema version it was written under. Expiry is lazy: reads check the age
//! and drop stale entries on the spot, `cleanup` sweeps the rest.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::storage::{CacheError, CacheStorage};

/// Millisecond wall clock, swappable in tests
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_age: Duration,
    pub max_items: usize,
    pub schema_version: u32,
    /// Fraction of `max_age` after which an entry should be refetched
    pub refresh_ratio: f64,
    /// Namespace for every owned key
    pub prefix: String,
}

pub const SCHEMA_VERSION: u32 = 1;

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(24 * 60 * 60),
            max_items: 1000,
            schema_version: SCHEMA_VERSION,
            refresh_ratio: 0.8,
            prefix: "lexicon_cache:".to_string(),
        }
    }
}

/// Stored wrapper around a cached value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub data: T,
    /// Write time in ms since epoch
    pub timestamp: i64,
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// Just the bookkeeping fields, for sweeps that never decode payloads
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryHeader {
    timestamp: i64,
    schema_version: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: usize,
    pub oldest: Option<i64>,
    pub newest: Option<i64>,
    pub last_cleanup: Option<i64>,
}

pub struct CacheManager {
    storage: Arc<dyn CacheStorage>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
}

impl CacheManager {
    pub fn new(storage: Arc<dyn CacheStorage>, config: CacheConfig) -> Self {
        Self::with_clock(storage, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        storage: Arc<dyn CacheStorage>,
        config: CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.config.prefix, key)
    }

    /// Bookkeeping key, owned but never counted as an entry
    fn meta_key(&self) -> String {
        format!("{}__meta__", self.config.prefix)
    }

    fn is_expired(&self, timestamp: i64) -> bool {
        self.clock.now_ms() - timestamp > self.config.max_age.as_millis() as i64
    }

    /// Store `data` under `key`
    ///
    /// A full storage gets one cleanup pass and one more attempt.
    pub fn set<T: Serialize>(&self, key: &str, data: &T, etag: Option<&str>) -> Result<(), CacheError> {
        let entry = CacheEntry {
            data,
            timestamp: self.clock.now_ms(),
            schema_version: self.config.schema_version,
            etag: etag.map(str::to_string),
        };
        let raw = serde_json::to_string(&entry)?;
        let storage_key = self.storage_key(key);

        match self.storage.set_item(&storage_key, &raw) {
            Err(CacheError::QuotaExceeded { .. }) => {
                let removed = self.cleanup()?;
                tracing::warn!(key, removed, "cache quota exceeded, retrying after cleanup");
                self.storage.set_item(&storage_key, &raw)
            }
            other => other,
        }
    }

    /// Fresh cached value, or `None` after dropping anything unusable
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        Ok(self.entry(key)?.map(|entry| entry.data))
    }

    /// Like [`get`](Self::get) but keeps the write time and etag
    pub fn entry<T: DeserializeOwned>(&self, key: &str) -> Result<Option<CacheEntry<T>>, CacheError> {
        let storage_key = self.storage_key(key);
        let Some(raw) = self.storage.get_item(&storage_key)? else {
            return Ok(None);
        };

        match serde_json::from_str::<CacheEntry<T>>(&raw) {
            Ok(entry)
                if entry.schema_version == self.config.schema_version
                    && !self.is_expired(entry.timestamp) =>
            {
                Ok(Some(entry))
            }
            Ok(_) => {
                tracing::debug!(key, "dropping stale cache entry");
                self.storage.remove_item(&storage_key)?;
                Ok(None)
            }
            Err(err) => {
                tracing::debug!(key, error = %err, "dropping undecodable cache entry");
                self.storage.remove_item(&storage_key)?;
                Ok(None)
            }
        }
    }

    /// Owned entry keys with their parsed headers; `None` means undecodable
    fn scan(&self) -> Result<Vec<(String, Option<EntryHeader>, usize)>, CacheError> {
        let meta_key = self.meta_key();
        let mut found = Vec::new();
        for key in self.storage.keys()? {
            if !key.starts_with(&self.config.prefix) || key == meta_key {
                continue;
            }
            let Some(raw) = self.storage.get_item(&key)? else {
                continue;
            };
            let header = serde_json::from_str::<EntryHeader>(&raw).ok();
            found.push((key, header, raw.len()));
        }
        Ok(found)
    }

    /// Remove every expired, schema-mismatched or undecodable entry
    pub fn cleanup(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for (key, header, _) in self.scan()? {
            let keep = header.is_some_and(|header| {
                header.schema_version == self.config.schema_version
                    && !self.is_expired(header.timestamp)
            });
            if !keep {
                self.storage.remove_item(&key)?;
                removed += 1;
            }
        }

        if let Err(err) = self
            .storage
            .set_item(&self.meta_key(), &self.clock.now_ms().to_string())
        {
            tracing::warn!(error = %err, "could not record cache cleanup time");
        }
        tracing::debug!(removed, "cache cleanup finished");
        Ok(removed)
    }

    /// Evict oldest entries until at most `max_items` remain
    pub fn optimize(&self) -> Result<usize, CacheError> {
        let mut entries = self.scan()?;
        if entries.len() <= self.config.max_items {
            return Ok(0);
        }

        // Undecodable entries sort first and go before any valid one
        entries.sort_by_key(|(_, header, _)| header.as_ref().map(|h| h.timestamp));
        let excess = entries.len() - self.config.max_items;
        for (key, _, _) in entries.iter().take(excess) {
            self.storage.remove_item(key)?;
        }

        tracing::debug!(evicted = excess, "cache optimized");
        Ok(excess)
    }

    /// True when `key` is absent or older than the refresh threshold
    pub fn needs_refresh(&self, key: &str) -> Result<bool, CacheError> {
        let Some(raw) = self.storage.get_item(&self.storage_key(key))? else {
            return Ok(true);
        };
        let Ok(header) = serde_json::from_str::<EntryHeader>(&raw) else {
            return Ok(true);
        };
        if header.schema_version != self.config.schema_version {
            return Ok(true);
        }

        let threshold = self.config.max_age.as_millis() as f64 * self.config.refresh_ratio;
        Ok((self.clock.now_ms() - header.timestamp) as f64 > threshold)
    }

    /// Owned keys without the prefix, bookkeeping excluded
    pub fn keys(&self) -> Result<Vec<String>, CacheError> {
        let meta_key = self.meta_key();
        Ok(self
            .storage
            .keys()?
            .into_iter()
            .filter(|key| *key != meta_key)
            .filter_map(|key| key.strip_prefix(&self.config.prefix).map(str::to_string))
            .collect())
    }

    pub fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.storage.remove_item(&self.storage_key(key))
    }

    /// Remove every owned key, leaving foreign keys alone
    ///
    /// The returned count leaves out the cleanup bookkeeping key.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let meta_key = self.meta_key();
        let mut removed = 0;
        for key in self.storage.keys()? {
            if key.starts_with(&self.config.prefix) {
                self.storage.remove_item(&key)?;
                if key != meta_key {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Raw stored entries keyed without the prefix
    pub fn export(&self) -> Result<BTreeMap<String, serde_json::Value>, CacheError> {
        let mut out = BTreeMap::new();
        for (key, header, _) in self.scan()? {
            if header.is_none() {
                tracing::debug!(key, "skipping undecodable cache entry");
                continue;
            }
            let Some(raw) = self.storage.get_item(&key)? else {
                continue;
            };
            if let Ok(value) = serde_json::from_str(&raw) {
                out.insert(key[self.config.prefix.len()..].to_string(), value);
            }
        }
        Ok(out)
    }

    /// Load entries produced by [`export`](Self::export)
    ///
    /// Entries that are stale under the current config are skipped.
    pub fn import(&self, entries: &BTreeMap<String, serde_json::Value>) -> Result<usize, CacheError> {
        let mut imported = 0;
        for (key, value) in entries {
            let fresh = serde_json::from_value::<EntryHeader>(value.clone()).is_ok_and(|header| {
                header.schema_version == self.config.schema_version
                    && !self.is_expired(header.timestamp)
            });
            if !fresh {
                continue;
            }
            self.storage
                .set_item(&self.storage_key(key), &serde_json::to_string(value)?)?;
            imported += 1;
        }
        Ok(imported)
    }

    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let entries = self.scan()?;
        let timestamps = entries
            .iter()
            .filter_map(|(_, header, _)| header.as_ref().map(|h| h.timestamp));

        Ok(CacheStats {
            entries: entries.len(),
            bytes: entries.iter().map(|(_, _, len)| len).sum(),
            oldest: timestamps.clone().min(),
            newest: timestamps.max(),
            last_cleanup: self.last_cleanup()?,
        })
    }

    pub fn last_cleanup(&self) -> Result<Option<i64>, CacheError> {
        Ok(self
            .storage
            .get_item(&self.meta_key())?
            .and_then(|raw| raw.parse().ok()))
    }
}
