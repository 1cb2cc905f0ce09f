//! Post-commit events.
//!
//! Events are published only after a transaction has durably committed. The
//! queue is bounded; a receiver that falls behind sees `RecvError::Lagged`
//! and must recover on its own.

use tessera_core::{ContentHash, DocumentId};
use tokio::sync::broadcast;
use tracing::trace;

/// A local create, update or delete was committed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateEvent {
    pub doc_id: DocumentId,
    pub collection: String,
    pub hash: ContentHash,
    pub height: u64,
    pub is_create: bool,
}

/// A batch of remote blocks was merged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeEvent {
    pub doc_id: DocumentId,
    pub collection: String,
    /// Last block of the batch, the descendant of every other block in it.
    pub hash: ContentHash,
    pub height: u64,
    /// Peer the blocks came from.
    pub origin: Option<String>,
    /// Whether any block in the batch was new.
    pub changed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Update(UpdateEvent),
    Merged(MergeEvent),
}

impl Event {
    pub fn doc_id(&self) -> &DocumentId {
        match self {
            Event::Update(e) => &e.doc_id,
            Event::Merged(e) => &e.doc_id,
        }
    }

    pub fn collection(&self) -> &str {
        match self {
            Event::Update(e) => &e.collection,
            Event::Merged(e) => &e.collection,
        }
    }

    pub fn hash(&self) -> &ContentHash {
        match self {
            Event::Update(e) => &e.hash,
            Event::Merged(e) => &e.hash,
        }
    }
}

/// Bounded fan-out of store events.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        EventBus { sender }
    }

    pub fn publish(&self, event: Event) {
        // no receivers is not an error; the store works without sync
        if self.sender.send(event).is_err() {
            trace!("event dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn update(height: u64) -> Event {
        Event::Update(UpdateEvent {
            doc_id: DocumentId::derive("users", &BTreeMap::new()).unwrap(),
            collection: "users".to_string(),
            hash: ContentHash::digest(&height.to_le_bytes()),
            height,
            is_create: height == 1,
        })
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        bus.publish(update(1));
        let mut late = bus.subscribe();
        assert!(late.try_recv().is_err());
    }

    #[test]
    fn test_lagging_receiver() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for h in 1..=3 {
            bus.publish(update(h));
        }
        assert!(matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Lagged(1))));
        assert_eq!(rx.try_recv().unwrap(), update(2));
    }
}
