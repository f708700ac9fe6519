//! Sync coordinator: wraps client operations with status tracking and retry

use std::future::Future;

use super::status::StatusHub;
use crate::error::{self, ContentResult, RetryPolicy};

#[derive(Clone, Default)]
pub struct SyncCoordinator {
    status: StatusHub,
    retry: RetryPolicy,
}

impl SyncCoordinator {
    pub fn new(status: StatusHub, retry: RetryPolicy) -> Self {
        Self { status, retry }
    }

    pub fn status(&self) -> &StatusHub {
        &self.status
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run `op` as a tracked request
    ///
    /// Loading is flagged for the duration, a success stamps `last_sync`
    /// and a failure is recorded unless it is a stale cache. The result is
    /// returned unchanged either way.
    pub async fn request<T, Fut>(&self, op: Fut) -> ContentResult<T>
    where
        Fut: Future<Output = ContentResult<T>>,
    {
        let guard = self.status.begin_request();
        let result = op.await;
        match &result {
            Ok(_) => guard.succeed(),
            Err(err) => guard.fail(err),
        }
        result
    }

    /// Like [`request`](Self::request) but counted as a pending change
    pub async fn mutate<T, Fut>(&self, op: Fut) -> ContentResult<T>
    where
        Fut: Future<Output = ContentResult<T>>,
    {
        let _pending = self.status.begin_mutation();
        self.request(op).await
    }

    /// Retry `op` under the coordinator's policy
    pub async fn with_retry<T, F, Fut>(&self, op: F) -> ContentResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ContentResult<T>>,
    {
        error::with_retry(&self.retry, op).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ContentError;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::{sleep, Instant};

    #[tokio::test]
    async fn request_records_success_and_failure() {
        let coordinator = SyncCoordinator::default();

        let value = coordinator.request(async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        let status = coordinator.status().current();
        assert!(!status.is_loading);
        assert!(status.last_sync.is_some());

        let err = coordinator
            .request(async { Err::<(), _>(ContentError::NotFound("w9".into())) })
            .await
            .unwrap_err();
        assert_eq!(err, ContentError::NotFound("w9".into()));
        assert_eq!(
            coordinator.status().current().error.as_deref(),
            Some("not found: w9")
        );

        coordinator.status().dismiss_error();
        assert_eq!(coordinator.status().current().error, None);
    }

    #[tokio::test]
    async fn stale_cache_failures_stay_quiet() {
        let coordinator = SyncCoordinator::default();
        let result = coordinator
            .request(async { Err::<(), _>(ContentError::StaleCache("words".into())) })
            .await;

        assert!(result.is_err());
        assert_eq!(coordinator.status().current().error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_changes_never_go_negative() {
        let coordinator = SyncCoordinator::default();
        let mut rx = coordinator.status().subscribe();
        let observer = tokio::spawn(async move {
            let mut peak = 0;
            while rx.changed().await.is_ok() {
                peak = peak.max(rx.borrow_and_update().pending_changes);
            }
            peak
        });

        let calls = (0..20u64).map(|i| {
            let coordinator = coordinator.clone();
            async move {
                coordinator
                    .mutate(async move {
                        sleep(Duration::from_millis(10 * (i % 4))).await;
                        if i % 3 == 0 {
                            Err(ContentError::Conflict(format!("dup {i}")))
                        } else {
                            Ok(i)
                        }
                    })
                    .await
            }
        });
        let results = join_all(calls).await;

        assert_eq!(results.iter().filter(|r| r.is_err()).count(), 7);
        let status = coordinator.status().current();
        assert_eq!(status.pending_changes, 0);
        assert!(!status.is_loading);

        drop(coordinator);
        let peak = observer.await.unwrap();
        assert!(peak <= 20);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_backs_off_linearly() {
        let coordinator =
            SyncCoordinator::new(StatusHub::new(), RetryPolicy::new(3, Duration::from_millis(100)));
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let result = coordinator
            .with_retry(|| {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ContentError::Network("connection refused".into()))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_are_not_retried() {
        let coordinator = SyncCoordinator::new(
            StatusHub::new(),
            RetryPolicy::new(5, Duration::from_millis(100)),
        );
        let calls = Arc::new(AtomicU32::new(0));

        let err = coordinator
            .with_retry(|| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(ContentError::Conflict("term exists".into()))
                }
            })
            .await
            .unwrap_err();

        assert_eq!(err, ContentError::Conflict("term exists".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
