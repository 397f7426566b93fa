//! Broadcast hub for collection events.
//!
//! [`EventHub`] is the [`EventSink`] the server injects into the
//! [`Collector`](crate::ingest::Collector). Each `GET /api/events` client
//! gets its own receiver. A receiver that falls more than `capacity` events
//! behind is disconnected: its stream ends instead of skipping ahead.

use futures_util::stream::{self, Stream};
use jira_harvest_core::events::{CollectionEvent, EventSink};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<CollectionEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CollectionEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Stream of events for one subscriber, ending when it lags or the hub
    /// is dropped.
    pub fn stream(&self) -> impl Stream<Item = CollectionEvent> + Send + 'static {
        stream::unfold(self.subscribe(), |mut rx| async move {
            match rx.recv().await {
                Ok(event) => Some((event, rx)),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "event subscriber lagged, disconnecting");
                    None
                }
                Err(RecvError::Closed) => None,
            }
        })
    }
}

impl EventSink for EventHub {
    fn publish(&self, event: CollectionEvent) {
        // send only fails when nobody is listening
        if self.tx.send(event).is_err() {
            debug!("no event subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use jira_harvest_core::events::EventKind;

    #[tokio::test]
    async fn publish_without_subscribers_is_dropped() {
        let hub = EventHub::new(4);
        hub.publish(CollectionEvent::new(EventKind::CollectionStarted, "tx"));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn subscribers_receive_in_order() {
        let hub = EventHub::new(4);
        let mut events = Box::pin(hub.stream());
        hub.publish(CollectionEvent::new(EventKind::CollectionStarted, "tx"));
        hub.publish(CollectionEvent::new(EventKind::CollectionSuccess, "tx"));

        assert_eq!(events.next().await.unwrap().kind, EventKind::CollectionStarted);
        assert_eq!(events.next().await.unwrap().kind, EventKind::CollectionSuccess);
    }

    #[tokio::test]
    async fn lagging_subscriber_is_disconnected() {
        let hub = EventHub::new(2);
        let mut events = Box::pin(hub.stream());
        for _ in 0..5 {
            hub.publish(CollectionEvent::new(EventKind::CollectionStarted, "tx"));
        }
        assert!(events.next().await.is_none());
    }
}
