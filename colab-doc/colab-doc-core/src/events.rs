use serde::Serialize;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{trace, warn};
use uuid::Uuid;

/// Store-level notifications. `LocalUpdate` carries the encoded changes of a
/// local commit for whatever replicates documents to other peers.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum DocEvent {
    Created { id: Uuid, doc_type: String },
    Imported { id: Uuid },
    Deleted { id: Uuid },
    LocalUpdate { id: Uuid, bytes: Vec<u8> },
}

impl DocEvent {
    pub fn id(&self) -> Uuid {
        match self {
            DocEvent::Created { id, .. }
            | DocEvent::Imported { id }
            | DocEvent::Deleted { id }
            | DocEvent::LocalUpdate { id, .. } => *id,
        }
    }
}

/// Fan-out of [`DocEvent`]s to any number of receivers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DocEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DocEvent> {
        self.tx.subscribe()
    }

    /// Publishing with no receivers is not an error.
    pub fn send(&self, event: DocEvent) {
        if self.tx.send(event).is_err() {
            trace!("no event receivers");
        }
    }
}

/// Everything already queued on `rx`, without waiting. Events lost to a
/// lagging receiver are logged and skipped.
pub fn drain(rx: &mut broadcast::Receiver<DocEvent>) -> Vec<DocEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(missed)) => warn!("missed {} document events", missed),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let id = Uuid::new_v4();
        bus.send(DocEvent::Imported { id });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.id(), id);
        assert!(matches!(event, DocEvent::Imported { .. }));
    }

    #[test]
    fn send_without_subscribers_is_silent() {
        let bus = EventBus::new(16);
        bus.send(DocEvent::Deleted { id: Uuid::new_v4() });
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let id = Uuid::nil();
        let json = serde_json::to_value(DocEvent::Deleted { id }).unwrap();
        assert_eq!(json["type"], "Deleted");
        assert_eq!(json["id"], id.to_string());
    }

    #[test]
    fn drain_collects_queued_events_and_skips_lost_ones() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        assert!(drain(&mut rx).is_empty());

        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            bus.send(DocEvent::Imported { id: *id });
        }
        let seen: Vec<Uuid> = drain(&mut rx).iter().map(DocEvent::id).collect();
        assert_eq!(seen, ids[1..].to_vec());
    }
}
