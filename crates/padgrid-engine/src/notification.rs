//! Outward event broadcasting to subscribers.
//!
//! Each subscriber gets its own bounded channel. Publishing never blocks
//! dispatch: when a subscriber's queue is full the newest event is dropped
//! for that subscriber (and the drop is logged); closed subscribers are
//! pruned on the next publish.

use std::sync::Arc;

use padgrid_protocol::Event;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tracing::{debug, trace};

/// Default per-subscriber queue depth.
pub const EVENT_QUEUE_DEPTH: usize = 64;

/// Fans engine events out to any number of subscribers.
#[derive(Clone)]
pub struct EventBroadcaster {
    subscribers: Arc<Mutex<Vec<Sender<Event>>>>,
    depth: usize,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(EVENT_QUEUE_DEPTH)
    }
}

impl EventBroadcaster {
    /// A broadcaster whose subscribers each get a queue of `depth` events.
    pub fn new(depth: usize) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            depth,
        }
    }

    /// Register a new subscriber and return its receiving end.
    pub fn subscribe(&self) -> Receiver<Event> {
        let (tx, rx) = mpsc::channel(self.depth);
        self.subscribers.lock().push(tx);
        rx
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Publish an event to every subscriber, non-blocking.
    pub fn publish(&self, event: Event) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                debug!(?dropped, "subscriber queue full, dropping newest event");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("pruning closed subscriber");
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_all_subscribers() {
        let events = EventBroadcaster::new(4);
        let mut a = events.subscribe();
        let mut b = events.subscribe();
        events.publish(Event::PadRelease { note: 81 });
        assert_eq!(a.recv().await, Some(Event::PadRelease { note: 81 }));
        assert_eq!(b.recv().await, Some(Event::PadRelease { note: 81 }));
    }

    #[tokio::test]
    async fn overflow_drops_newest_without_blocking() {
        let events = EventBroadcaster::new(2);
        let mut rx = events.subscribe();
        for note in 0..5 {
            events.publish(Event::PadRelease { note });
        }
        // The first two events fit; later ones were dropped.
        assert_eq!(rx.recv().await, Some(Event::PadRelease { note: 0 }));
        assert_eq!(rx.recv().await, Some(Event::PadRelease { note: 1 }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_subscribers_are_pruned() {
        let events = EventBroadcaster::new(4);
        let rx = events.subscribe();
        drop(rx);
        events.publish(Event::PadRelease { note: 1 });
        assert_eq!(events.subscriber_count(), 0);
    }
}
