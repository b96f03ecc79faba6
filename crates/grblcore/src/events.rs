//! Fan-out of [`Event`]s to subscribers.
//!
//! Grounded on `src/core/event.rs::EventDispatcher` and
//! `gcodekit4-core/src/core/message.rs::MessageDispatcher`: two
//! near-identical `tokio::sync::broadcast` dispatchers; this
//! consolidates the pattern into one, parameterized over the richer
//! [`Event`] union this core needs. `broadcast` already drops the oldest
//! entry for a lagging receiver, which is exactly the "lossy for slow
//! subscribers, never blocks producers" rule in the component design.

use grblcore_types::Event;
use tokio::sync::broadcast;
use tracing::trace;

const DEFAULT_BUFFER_SIZE: usize = 256;

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Receive the next event, skipping over any that were dropped because
    /// this subscriber fell behind. Never errors on lag; only returns
    /// `None` once every sender has gone away.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    trace!(skipped, "event subscriber lagged, skipping dropped events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self { sender }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription { receiver: self.sender.subscribe() }
    }

    /// Publish an event. Never blocks; if there are no subscribers this is
    /// a no-op.
    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        bus.publish(Event::Connected { port: "COM3".into() });
        let event = sub.recv().await.unwrap();
        assert_eq!(event, Event::Connected { port: "COM3".into() });
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(Event::Disconnected);
        assert_eq!(a.recv().await.unwrap(), Event::Disconnected);
        assert_eq!(b.recv().await.unwrap(), Event::Disconnected);
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(Event::Disconnected);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_dropped_events_without_erroring() {
        let bus = EventBus::with_buffer(2);
        let mut sub = bus.subscribe();
        for _ in 0..10 {
            bus.publish(Event::Disconnected);
        }
        // Should not error even though the receiver fell behind; it just
        // resumes from whatever is still in the buffer.
        assert!(sub.recv().await.is_some());
    }
}
