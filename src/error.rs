//! Content errors, error categories and retry logic
//!
//! Every layer of the sync stack reports failures as [`ContentError`]. The
//! category of an error decides whether the sync coordinator may retry it.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;

/// Result alias used across the crate
pub type ContentResult<T> = Result<T, ContentError>;

/// Error taxonomy shared by the server and the client
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContentError {
    /// Request failed schema validation, never mutates state
    #[error("validation failed: {0}")]
    Validation(String),

    /// Entry (or route) does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Natural key already taken by another entry
    #[error("conflict: {0}")]
    Conflict(String),

    /// Backend read or write failed
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Client transport failure
    #[error("network error: {0}")]
    Network(String),

    /// Cached copy is unusable; resolved internally by refetching
    #[error("stale cache entry: {0}")]
    StaleCache(String),
}

impl ContentError {
    /// HTTP status this error is reported with
    pub fn status_code(&self) -> u16 {
        match self {
            ContentError::Validation(_) => 400,
            ContentError::NotFound(_) => 404,
            ContentError::Conflict(_) => 409,
            ContentError::StoreUnavailable(_) => 503,
            ContentError::Network(_) => 502,
            ContentError::StaleCache(_) => 500,
        }
    }

    /// Rebuild an error from an HTTP status and the server's message
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400 | 422 => ContentError::Validation(message),
            404 => ContentError::NotFound(message),
            409 => ContentError::Conflict(message),
            500..=599 => ContentError::StoreUnavailable(message),
            _ => ContentError::Validation(format!("unexpected status {status}: {message}")),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ContentError::Validation(_) => ErrorCategory::Validation,
            ContentError::NotFound(_) => ErrorCategory::NotFound,
            ContentError::Conflict(_) => ErrorCategory::Conflict,
            ContentError::StoreUnavailable(_) => ErrorCategory::Storage,
            ContentError::Network(_) => ErrorCategory::Network,
            ContentError::StaleCache(_) => ErrorCategory::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Whether the error may be shown to the user
    pub fn is_surfaced(&self) -> bool {
        !matches!(self, ContentError::StaleCache(_))
    }
}

impl From<reqwest::Error> for ContentError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => ContentError::from_status(status.as_u16(), err.to_string()),
            None if err.is_decode() => {
                ContentError::Validation(format!("malformed response: {err}"))
            }
            None => ContentError::Network(err.to_string()),
        }
    }
}

/// Categorized error types for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transport failures (retryable)
    Network,

    /// Backend availability failures (retryable)
    Storage,

    /// Bad input (not retryable)
    Validation,

    /// Missing entry (not retryable)
    NotFound,

    /// Uniqueness violation (not retryable)
    Conflict,

    /// Never leaves the client
    Internal,
}

impl ErrorCategory {
    /// Check if this error category is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Network | ErrorCategory::Storage)
    }
}

/// Retry policy configuration
///
/// Backoff is linear: the wait before attempt `n + 1` is `base_delay * n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Delay unit multiplied by the attempt number
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Create a no-retry policy
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Wait applied after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Execute with retry logic
///
/// Only retryable failures are retried. The last error is returned once the
/// attempts are exhausted.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> ContentResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ContentResult<T>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => {
                if attempt >= policy.max_attempts {
                    tracing::warn!(attempts = attempt, error = %err, "giving up after retries");
                    return Err(err);
                }

                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_error_categorization() {
        assert_eq!(
            ContentError::Network("reset".into()).category(),
            ErrorCategory::Network
        );
        assert_eq!(
            ContentError::StoreUnavailable("down".into()).category(),
            ErrorCategory::Storage
        );
        assert_eq!(
            ContentError::Conflict("dup".into()).category(),
            ErrorCategory::Conflict
        );
    }

    #[test]
    fn test_retryable() {
        assert!(ContentError::Network("x".into()).is_retryable());
        assert!(ContentError::StoreUnavailable("x".into()).is_retryable());
        assert!(!ContentError::Validation("x".into()).is_retryable());
        assert!(!ContentError::NotFound("x".into()).is_retryable());
        assert!(!ContentError::Conflict("x".into()).is_retryable());
    }

    #[test]
    fn test_status_round_trip() {
        for err in [
            ContentError::Validation("a".into()),
            ContentError::NotFound("b".into()),
            ContentError::Conflict("c".into()),
            ContentError::StoreUnavailable("d".into()),
        ] {
            let rebuilt = ContentError::from_status(err.status_code(), "msg");
            assert_eq!(rebuilt.category(), err.category());
        }
    }

    #[test]
    fn test_retry_policy() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));

        let no_retry = RetryPolicy::no_retry();
        assert_eq!(no_retry.max_attempts, 1);
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn validation_failures_are_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(10));

        let result: ContentResult<()> = with_retry(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ContentError::Validation("term is required".into())) }
        })
        .await;

        assert!(matches!(result, Err(ContentError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_return_last_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(10));

        let result: ContentResult<()> = with_retry(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err(ContentError::Network(format!("failure {n}"))) }
        })
        .await;

        assert_eq!(result, Err(ContentError::Network("failure 3".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
