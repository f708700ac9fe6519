//! Observable sync status

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::error::ContentError;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_loading: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub pending_changes: usize,

    /// Requests in flight; `is_loading` is true while this is non-zero
    #[serde(skip)]
    active_requests: usize,
}

/// Publishes [`SyncStatus`] changes to any number of subscribers
#[derive(Clone)]
pub struct StatusHub {
    tx: Arc<watch::Sender<SyncStatus>>,
}

impl Default for StatusHub {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusHub {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SyncStatus::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> SyncStatus {
        self.tx.borrow().clone()
    }

    /// Mark a request as started; the guard settles it
    pub fn begin_request(&self) -> RequestGuard {
        self.tx.send_modify(|status| {
            status.active_requests += 1;
            status.is_loading = true;
            status.error = None;
        });
        RequestGuard {
            hub: self.clone(),
            settled: false,
        }
    }

    /// Count a local change as pending until the guard drops
    pub fn begin_mutation(&self) -> PendingGuard {
        self.tx.send_modify(|status| status.pending_changes += 1);
        PendingGuard { hub: self.clone() }
    }

    pub fn dismiss_error(&self) {
        self.tx.send_if_modified(|status| status.error.take().is_some());
    }

    /// Back to the initial status; in-flight requests stay counted
    pub fn reset(&self) {
        self.tx.send_modify(|status| {
            *status = SyncStatus {
                is_loading: status.active_requests > 0,
                active_requests: status.active_requests,
                ..SyncStatus::default()
            };
        });
    }

    fn finish_request(&self, outcome: Option<Result<(), &ContentError>>) {
        self.tx.send_modify(|status| {
            status.active_requests = status.active_requests.saturating_sub(1);
            status.is_loading = status.active_requests > 0;
            match outcome {
                Some(Ok(())) => status.last_sync = Some(Utc::now()),
                Some(Err(err)) if err.is_surfaced() => status.error = Some(err.to_string()),
                _ => {}
            }
        });
    }
}

/// Settles one request; dropping it unsettled only clears the loading flag
pub struct RequestGuard {
    hub: StatusHub,
    settled: bool,
}

impl RequestGuard {
    pub fn succeed(mut self) {
        self.settled = true;
        self.hub.finish_request(Some(Ok(())));
    }

    pub fn fail(mut self, err: &ContentError) {
        self.settled = true;
        self.hub.finish_request(Some(Err(err)));
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        if !self.settled {
            self.hub.finish_request(None);
        }
    }
}

pub struct PendingGuard {
    hub: StatusHub,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.hub
            .tx
            .send_modify(|status| status.pending_changes = status.pending_changes.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlapping_requests_keep_loading_until_the_last_settles() {
        let hub = StatusHub::new();
        let first = hub.begin_request();
        let second = hub.begin_request();

        first.succeed();
        assert!(hub.current().is_loading);
        second.fail(&ContentError::Network("reset".into()));

        let status = hub.current();
        assert!(!status.is_loading);
        assert!(status.last_sync.is_some());
        assert_eq!(status.error.as_deref(), Some("network error: reset"));
    }

    #[test]
    fn stale_cache_is_not_surfaced() {
        let hub = StatusHub::new();
        hub.begin_request()
            .fail(&ContentError::StaleCache("words".into()));
        assert_eq!(hub.current().error, None);
    }

    #[test]
    fn dropped_guard_clears_loading_only() {
        let hub = StatusHub::new();
        drop(hub.begin_request());

        let status = hub.current();
        assert!(!status.is_loading);
        assert_eq!(status.last_sync, None);
    }

    #[tokio::test]
    async fn subscribers_see_pending_changes() {
        let hub = StatusHub::new();
        let mut rx = hub.subscribe();

        let guard = hub.begin_mutation();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().pending_changes, 1);

        drop(guard);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().pending_changes, 0);
    }

    #[test]
    fn reset_clears_everything_but_in_flight_work() {
        let hub = StatusHub::new();
        hub.begin_request()
            .fail(&ContentError::Network("down".into()));
        let in_flight = hub.begin_request();

        hub.reset();
        let status = hub.current();
        assert!(status.is_loading);
        assert_eq!(status.error, None);

        in_flight.succeed();
        assert!(!hub.current().is_loading);
    }
}
