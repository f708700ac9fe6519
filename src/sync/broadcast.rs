//! Update broadcaster: fan-out hub for change notifications
//!
//! Each connected client owns one bounded channel. Publishing never fails: a
//! channel that cannot take the event (closed or full) is pruned and the
//! remaining channels still receive it. Nothing is replayed; clients
//! reconcile by refetching after they reconnect.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::protocol::ContentEvent;

/// Identifies one open channel
pub type ChannelId = u64;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Registry>,
}

struct Registry {
    channels: Mutex<HashMap<ChannelId, mpsc::Sender<ContentEvent>>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Per-channel buffer size; a client this far behind is dropped
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Registry {
                channels: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Register an outbound channel for one client
    pub fn open_channel(&self) -> EventChannel {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        self.inner.channels.lock().insert(id, tx);

        tracing::debug!(channel = id, "event channel opened");
        EventChannel {
            id,
            rx,
            broadcaster: self.clone(),
        }
    }

    /// Deregister a channel; returns false if it was already gone
    pub fn close_channel(&self, id: ChannelId) -> bool {
        let removed = self.inner.channels.lock().remove(&id).is_some();
        if removed {
            tracing::debug!(channel = id, "event channel closed");
        }
        removed
    }

    /// Deliver `event` to every open channel; returns how many accepted it
    pub fn publish(&self, event: &ContentEvent) -> usize {
        let mut delivered = 0;
        let mut channels = self.inner.channels.lock();

        channels.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(err) => {
                tracing::warn!(channel = *id, error = %err, "pruning event channel");
                false
            }
        });

        tracing::debug!(
            version = event.version,
            collection = %event.collection,
            delivered,
            "published content event"
        );
        delivered
    }

    pub fn channel_count(&self) -> usize {
        self.inner.channels.lock().len()
    }
}

/// Receiving end of one client's channel
///
/// Dropping it deregisters the channel, so a disconnected client is removed
/// even if no publish ever fails for it.
pub struct EventChannel {
    id: ChannelId,
    rx: mpsc::Receiver<ContentEvent>,
    broadcaster: Broadcaster,
}

impl EventChannel {
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Next event, or `None` once the channel has been closed or pruned
    pub async fn recv(&mut self) -> Option<ContentEvent> {
        self.rx.recv().await
    }
}

impl Stream for EventChannel {
    type Item = ContentEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        self.broadcaster.close_channel(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Collection;
    use crate::sync::protocol::EventAction;

    fn event(version: u64) -> ContentEvent {
        ContentEvent::new(Collection::Words, EventAction::Updated, "w1", version)
    }

    #[tokio::test]
    async fn publish_reaches_every_channel() {
        let hub = Broadcaster::new();
        let mut a = hub.open_channel();
        let mut b = hub.open_channel();

        assert_eq!(hub.publish(&event(2)), 2);
        assert_eq!(a.recv().await, Some(event(2)));
        assert_eq!(b.recv().await, Some(event(2)));
    }

    #[tokio::test]
    async fn dropped_channel_is_deregistered() {
        let hub = Broadcaster::new();
        let a = hub.open_channel();
        let _b = hub.open_channel();
        assert_eq!(hub.channel_count(), 2);

        drop(a);
        assert_eq!(hub.channel_count(), 1);
        assert_eq!(hub.publish(&event(2)), 1);
    }

    #[tokio::test]
    async fn full_channel_is_pruned_and_others_still_receive() {
        let hub = Broadcaster::with_capacity(1);
        let mut slow = hub.open_channel();
        let mut fast = hub.open_channel();

        assert_eq!(hub.publish(&event(2)), 2);
        assert_eq!(fast.recv().await, Some(event(2)));

        // `slow` never drained its buffer
        assert_eq!(hub.publish(&event(3)), 1);
        assert_eq!(fast.recv().await, Some(event(3)));
        assert_eq!(hub.channel_count(), 1);

        // Pruned channel yields what it buffered, then ends
        assert_eq!(slow.recv().await, Some(event(2)));
        assert_eq!(slow.recv().await, None);
    }

    #[test]
    fn publish_without_channels_is_a_noop() {
        let hub = Broadcaster::new();
        assert_eq!(hub.publish(&event(1)), 0);
        assert!(!hub.close_channel(42));
    }
}
