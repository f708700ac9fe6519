//! Typed HTTP client for the content API
//!
//! Reads go through the local cache: a fresh cached copy is returned without
//! a request, and when the server cannot be reached any unexpired copy is
//! served instead. Mutations are never applied locally; a successful one
//! invalidates the cache keys it touched so the next read refetches.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use super::cache::CacheManager;
use super::coordinator::SyncCoordinator;
use super::status::StatusHub;
use crate::content::{Collection, ContentSnapshot, Entry, Record};
use crate::error::{ContentError, ContentResult};
use crate::sync::protocol::{ContentEvent, Deletion, Envelope, Mutation};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Cache key of the full snapshot
pub const SNAPSHOT_KEY: &str = "snapshot";

pub struct ContentClient {
    http: Client,
    base: Url,
    cache: Arc<CacheManager>,
    coordinator: SyncCoordinator,
    /// Highest snapshot version seen from the server
    known_version: AtomicU64,
}

impl ContentClient {
    pub fn new(
        base_url: &str,
        cache: Arc<CacheManager>,
        coordinator: SyncCoordinator,
    ) -> ContentResult<Self> {
        let base = Url::parse(base_url)
            .map_err(|err| ContentError::Validation(format!("invalid server url {base_url}: {err}")))?;
        if base.cannot_be_a_base() {
            return Err(ContentError::Validation(format!(
                "invalid server url {base_url}"
            )));
        }

        // No overall timeout on the client itself: /events streams never end
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("lexicon-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base,
            cache,
            coordinator,
            known_version: AtomicU64::new(0),
        })
    }

    pub fn status(&self) -> &StatusHub {
        self.coordinator.status()
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn known_version(&self) -> u64 {
        self.known_version.load(Ordering::SeqCst)
    }

    /// Record a change notification; true when it is newer than anything seen
    pub fn observe(&self, event: &ContentEvent) -> bool {
        self.observe_version(event.version)
    }

    fn observe_version(&self, version: u64) -> bool {
        self.known_version.fetch_max(version, Ordering::SeqCst) < version
    }

    pub(crate) fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Open the change stream
    pub(crate) fn events_request(&self) -> RequestBuilder {
        self.http
            .get(self.endpoint(&["events"]))
            .header(reqwest::header::ACCEPT, "text/event-stream")
    }

    pub async fn list<T: Record>(&self) -> ContentResult<Vec<Entry<T>>> {
        let collection = T::COLLECTION.as_str();
        self.read_through(collection, self.endpoint(&[collection])).await
    }

    pub async fn get<T: Record>(&self, id: &str) -> ContentResult<Entry<T>> {
        let collection = T::COLLECTION.as_str();
        let key = format!("{collection}/{id}");
        self.read_through(&key, self.endpoint(&[collection, id])).await
    }

    /// Server-side search; offline it filters the cached list instead
    pub async fn search<T: Record>(&self, query: &str) -> ContentResult<Vec<Entry<T>>> {
        let collection = T::COLLECTION.as_str();
        let mut url = self.endpoint(&[collection]);
        url.query_pairs_mut().append_pair("query", query);

        match self.fetch(url).await {
            Err(err) if err.is_retryable() => {
                let cached: Option<Vec<Entry<T>>> = self.cached(collection);
                match cached {
                    Some(entries) => {
                        tracing::warn!(collection, error = %err, "searching cached entries");
                        Ok(entries.into_iter().filter(|e| e.matches(query)).collect())
                    }
                    None => Err(err),
                }
            }
            other => other,
        }
    }

    /// Snapshot from the cache when fresh, otherwise from the server
    pub async fn snapshot(&self) -> ContentResult<ContentSnapshot> {
        if !self.needs_refresh(SNAPSHOT_KEY) {
            if let Some(snapshot) = self.cached::<ContentSnapshot>(SNAPSHOT_KEY) {
                return Ok(snapshot);
            }
        }
        self.refresh().await
    }

    /// Fetch the snapshot and cache it unless a newer one is already cached
    pub async fn refresh(&self) -> ContentResult<ContentSnapshot> {
        let url = self.endpoint(&["snapshot"]);
        let fetched = match self.fetch::<ContentSnapshot>(url).await {
            Ok(snapshot) => snapshot,
            Err(err) if err.is_retryable() => {
                return match self.cached::<ContentSnapshot>(SNAPSHOT_KEY) {
                    Some(snapshot) => {
                        tracing::warn!(error = %err, "serving cached snapshot");
                        Ok(snapshot)
                    }
                    None => Err(err),
                };
            }
            Err(err) => return Err(err),
        };

        Ok(self.store_snapshot(fetched))
    }

    /// Last write wins by version; returns whichever snapshot is kept
    ///
    /// A snapshot older than the highest version already seen is handed
    /// back but never cached. A kept snapshot also rewrites every cached
    /// single-entry key so nothing older outlives it.
    fn store_snapshot(&self, snapshot: ContentSnapshot) -> ContentSnapshot {
        if let Some(cached) = self.cached::<ContentSnapshot>(SNAPSHOT_KEY) {
            if cached.version > snapshot.version {
                tracing::debug!(
                    cached = cached.version,
                    incoming = snapshot.version,
                    "discarding older snapshot"
                );
                return cached;
            }
        }

        let known = self.known_version();
        if snapshot.version < known {
            tracing::debug!(
                known,
                incoming = snapshot.version,
                "not caching snapshot older than a seen change"
            );
            return snapshot;
        }
        self.observe_version(snapshot.version);

        self.remember(SNAPSHOT_KEY, &snapshot);
        self.remember(Collection::Words.as_str(), &snapshot.words);
        self.remember(Collection::Characters.as_str(), &snapshot.characters);

        match self.cache.keys() {
            Ok(keys) => {
                self.reconcile_items(&keys, &snapshot.words);
                self.reconcile_items(&keys, &snapshot.characters);
            }
            Err(err) => tracing::warn!(error = %err, "could not list cached entries"),
        }
        snapshot
    }

    /// Rewrite or drop cached `{collection}/{id}` keys from a kept snapshot
    fn reconcile_items<T: Record>(&self, keys: &[String], entries: &[Entry<T>]) {
        let prefix = format!("{}/", T::COLLECTION);
        for key in keys {
            let Some(id) = key.strip_prefix(&prefix) else {
                continue;
            };
            match entries.iter().find(|entry| entry.id == id) {
                Some(entry) => self.remember(key, entry),
                None => {
                    if let Err(err) = self.cache.remove(key) {
                        tracing::warn!(key = %key, error = %err, "cache invalidation failed");
                    }
                }
            }
        }
    }

    pub async fn create<T: Record>(&self, data: T) -> ContentResult<Mutation<T>> {
        let body = Entry::draft(data);
        let url = self.endpoint(&[T::COLLECTION.as_str()]);

        let mutation: Mutation<T> = self
            .coordinator
            .mutate(
                self.coordinator
                    .with_retry(|| self.send(self.http.post(url.clone()).json(&body))),
            )
            .await?;

        self.observe_version(mutation.version);
        self.invalidate(T::COLLECTION, &mutation.entry.id);
        Ok(mutation)
    }

    pub async fn update<T: Record>(&self, id: &str, data: T) -> ContentResult<Mutation<T>> {
        let mut body = Entry::draft(data);
        body.id = id.to_string();
        let url = self.endpoint(&[T::COLLECTION.as_str(), id]);

        let mutation: Mutation<T> = self
            .coordinator
            .mutate(
                self.coordinator
                    .with_retry(|| self.send(self.http.put(url.clone()).json(&body))),
            )
            .await?;

        self.observe_version(mutation.version);
        self.invalidate(T::COLLECTION, id);
        Ok(mutation)
    }

    pub async fn delete<T: Record>(&self, id: &str) -> ContentResult<Deletion> {
        let url = self.endpoint(&[T::COLLECTION.as_str(), id]);

        let deletion: Deletion = self
            .coordinator
            .mutate(
                self.coordinator
                    .with_retry(|| self.send(self.http.delete(url.clone()))),
            )
            .await?;

        self.observe_version(deletion.version);
        self.invalidate(T::COLLECTION, id);
        Ok(deletion)
    }

    /// Drop every cached entry and reset the sync status
    pub fn clear_cache(&self) -> ContentResult<usize> {
        let removed = self.cache.clear()?;
        self.known_version.store(0, Ordering::SeqCst);
        self.status().reset();
        tracing::info!(removed, "local cache cleared");
        Ok(removed)
    }

    /// Drop cache keys touched by a change to `collection`
    pub fn invalidate(&self, collection: Collection, id: &str) {
        let item = format!("{collection}/{id}");
        for key in [SNAPSHOT_KEY, collection.as_str(), item.as_str()] {
            if let Err(err) = self.cache.remove(key) {
                tracing::warn!(key, error = %err, "cache invalidation failed");
            }
        }
    }

    async fn read_through<V>(&self, key: &str, url: Url) -> ContentResult<V>
    where
        V: Serialize + DeserializeOwned,
    {
        if !self.needs_refresh(key) {
            if let Some(value) = self.cached(key) {
                return Ok(value);
            }
        }

        let seen = self.known_version();
        match self.fetch::<V>(url).await {
            Ok(value) => {
                // A change landed mid-flight; the response may predate it
                if self.known_version() == seen {
                    self.remember(key, &value);
                } else {
                    tracing::debug!(key, "not caching response that raced a change");
                }
                Ok(value)
            }
            Err(err) if err.is_retryable() => match self.cached(key) {
                Some(value) => {
                    tracing::warn!(key, error = %err, "serving cached copy");
                    Ok(value)
                }
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }

    /// Tracked, retried GET
    async fn fetch<V: DeserializeOwned>(&self, url: Url) -> ContentResult<V> {
        self.coordinator
            .request(
                self.coordinator
                    .with_retry(|| self.send(self.http.get(url.clone()))),
            )
            .await
    }

    async fn send<V: DeserializeOwned>(&self, request: RequestBuilder) -> ContentResult<V> {
        let response = request.timeout(REQUEST_TIMEOUT).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        match serde_json::from_slice::<Envelope<V>>(&body) {
            Ok(envelope) if status.is_success() && envelope.success => envelope
                .data
                .ok_or_else(|| ContentError::Validation("response carried no data".into())),
            Ok(envelope) => Err(ContentError::from_status(
                status.as_u16(),
                envelope.error.unwrap_or_else(|| status.to_string()),
            )),
            Err(_) if !status.is_success() => Err(ContentError::from_status(
                status.as_u16(),
                String::from_utf8_lossy(&body).into_owned(),
            )),
            Err(err) => Err(ContentError::Validation(format!("malformed response: {err}"))),
        }
    }

    fn cached<V: DeserializeOwned>(&self, key: &str) -> Option<V> {
        self.cache.get(key).unwrap_or_else(|err| {
            tracing::warn!(key, error = %err, "cache read failed");
            None
        })
    }

    fn needs_refresh(&self, key: &str) -> bool {
        self.cache.needs_refresh(key).unwrap_or(true)
    }

    fn remember<V: Serialize>(&self, key: &str, value: &V) {
        if let Err(err) = self.cache.set(key, value, None) {
            tracing::warn!(key, error = %err, "cache write failed");
        }
    }
}
