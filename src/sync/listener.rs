//! Client side of `/events`
//!
//! Keeps a live connection to the change stream, refetches the snapshot when
//! a notification is newer than anything seen and forwards those
//! notifications. Stale or duplicate notifications are dropped. The stream
//! is reopened with linear backoff whenever it ends or fails.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::protocol::{ContentEvent, ServerEvent, SseParser};
use crate::client::ContentClient;
use crate::error::{ContentResult, RetryPolicy};

/// Handle to a running listener; dropping it stops the task
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Start listening in the background
///
/// Reconnect delays grow by `policy.base_delay` per consecutive failure and
/// stop growing after `policy.max_attempts`. The task also ends once the
/// returned receiver is dropped.
pub fn spawn_listener(
    client: Arc<ContentClient>,
    policy: RetryPolicy,
) -> (Subscription, mpsc::UnboundedReceiver<ContentEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(run(client, policy, tx));
    (Subscription { handle }, rx)
}

async fn run(
    client: Arc<ContentClient>,
    policy: RetryPolicy,
    tx: mpsc::UnboundedSender<ContentEvent>,
) {
    let mut failures = 0u32;

    loop {
        match listen(&client, &tx, &mut failures).await {
            Ok(()) => tracing::info!("event stream closed"),
            Err(err) => tracing::warn!(error = %err, "event stream failed"),
        }

        if tx.is_closed() {
            return;
        }

        failures = failures.saturating_add(1);
        let delay = policy.delay_for(failures.min(policy.max_attempts));
        tracing::debug!(
            failures,
            delay_ms = delay.as_millis() as u64,
            "reconnecting to event stream"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = tx.closed() => return,
        }
    }
}

async fn listen(
    client: &ContentClient,
    tx: &mpsc::UnboundedSender<ContentEvent>,
    failures: &mut u32,
) -> ContentResult<()> {
    let response = client.events_request().send().await?.error_for_status()?;
    *failures = 0;
    tracing::info!(known_version = client.known_version(), "event stream connected");

    let mut parser = SseParser::new();
    let mut body = response.bytes_stream();

    loop {
        let chunk = tokio::select! {
            chunk = body.next() => chunk,
            _ = tx.closed() => return Ok(()),
        };
        let Some(chunk) = chunk else { break };

        for frame in parser.push(&chunk?) {
            match ServerEvent::from_frame(&frame) {
                // Changes may have been missed while disconnected
                Some(ServerEvent::Ready(ready)) => {
                    if ready.version > client.known_version() {
                        refresh(client).await;
                    }
                }
                Some(ServerEvent::ContentUpdated(event)) => {
                    if !client.observe(&event) {
                        tracing::debug!(version = event.version, "ignoring stale notification");
                        continue;
                    }
                    client.invalidate(event.collection, &event.id);
                    refresh(client).await;
                    if tx.send(event).is_err() {
                        return Ok(());
                    }
                }
                None => tracing::debug!(event = ?frame.event, "ignoring unknown frame"),
            }
        }
    }

    Ok(())
}

async fn refresh(client: &ContentClient) {
    match client.refresh().await {
        Ok(snapshot) => tracing::debug!(version = snapshot.version, "snapshot refreshed"),
        Err(err) => tracing::warn!(error = %err, "snapshot refresh failed"),
    }
}
