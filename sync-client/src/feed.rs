//! Event feeds connecting the outside world to the session.
//!
//! There are two feeds: the inbound feed carries confirmed events from the
//! server push channel and the upload coordinator, the outbound feed carries
//! pending intents from the UI. A session registers the same sender on both,
//! so every item lands in one ordered queue.

use std::sync::Mutex;
use tokio::sync::mpsc;

use chatsync_types::Event;

/// Which feed an item was published on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Confirmed events from the server.
    Inbound,
    /// Local intents awaiting upload.
    Outbound,
}

/// An event tagged with its feed.
#[derive(Debug, Clone)]
pub struct FeedItem {
    /// Feed the event came from.
    pub origin: Origin,
    /// The event.
    pub event: Event,
}

/// Handle returned by [`EventFeed::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Fan-out of events to registered session queues.
#[derive(Debug)]
pub struct EventFeed {
    origin: Origin,
    inner: Mutex<FeedInner>,
}

#[derive(Debug, Default)]
struct FeedInner {
    next_id: u64,
    subscribers: Vec<(SubscriptionId, mpsc::UnboundedSender<FeedItem>)>,
}

impl EventFeed {
    /// Feed for server-confirmed events.
    pub fn inbound() -> Self {
        Self::new(Origin::Inbound)
    }

    /// Feed for local intents.
    pub fn outbound() -> Self {
        Self::new(Origin::Outbound)
    }

    fn new(origin: Origin) -> Self {
        Self {
            origin,
            inner: Mutex::new(FeedInner::default()),
        }
    }

    /// The feed's origin tag.
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Deliver every future item to `tx`.
    pub fn register(&self, tx: mpsc::UnboundedSender<FeedItem>) -> SubscriptionId {
        let mut inner = self.lock();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.subscribers.push((id, tx));
        id
    }

    /// Stop delivering to a subscriber. Returns whether it was registered.
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        let mut inner = self.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(sub, _)| *sub != id);
        inner.subscribers.len() != before
    }

    /// Publish an event to every subscriber.
    ///
    /// Subscribers whose receiver is gone are dropped. Returns how many
    /// received the item.
    pub fn publish(&self, event: Event) -> usize {
        let item = FeedItem {
            origin: self.origin,
            event,
        };
        let mut inner = self.lock();
        inner
            .subscribers
            .retain(|(_, tx)| tx.send(item.clone()).is_ok());
        let delivered = inner.subscribers.len();
        if delivered == 0 {
            tracing::debug!(origin = ?self.origin, id = %item.event.id, "no subscriber for feed item");
        }
        delivered
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FeedInner> {
        // A panic while holding the lock leaves the list itself intact
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
