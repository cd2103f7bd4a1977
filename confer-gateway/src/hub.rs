use dashmap::DashMap;
use std::sync::Arc;
use confer_core::{MemberId, SpaceId};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::events::ClientEvent;

/// Handle for a client connection
pub type ConnectionId = String;

/// Message sender for a client connection
pub type EventSender = mpsc::UnboundedSender<ClientEvent>;

#[derive(Debug, Clone)]
pub struct Subscriber {
    pub connection_id: ConnectionId,
    pub member_id: MemberId,
    pub sender: EventSender,
}

/// In-memory fan-out of space-wide events to joined members
#[derive(Clone, Default)]
pub struct SpaceHub {
    /// Map of space_id -> subscribers
    spaces: Arc<DashMap<SpaceId, Vec<Subscriber>>>,

    /// Map of connection_id -> space_id for cleanup
    connections: Arc<DashMap<ConnectionId, SpaceId>>,
}

impl SpaceHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start delivering space-wide events of `space_id` to a member
    pub fn subscribe(
        &self,
        space_id: SpaceId,
        member_id: MemberId,
        connection_id: ConnectionId,
        sender: EventSender,
    ) {
        self.spaces.entry(space_id.clone()).or_default().push(Subscriber {
            connection_id: connection_id.clone(),
            member_id,
            sender,
        });
        self.connections.insert(connection_id.clone(), space_id.clone());

        info!(
            space_id = %space_id,
            member_id = %member_id,
            connection_id = %connection_id,
            "Member subscribed to space events"
        );
    }

    pub fn unsubscribe(&self, connection_id: &str) {
        let Some((_, space_id)) = self.connections.remove(connection_id) else {
            debug!(connection_id = %connection_id, "Connection had no space subscription");
            return;
        };

        if let Some(mut subscribers) = self.spaces.get_mut(&space_id) {
            subscribers.retain(|sub| sub.connection_id != connection_id);
            if subscribers.is_empty() {
                drop(subscribers);
                self.spaces.remove_if(&space_id, |_, subs| subs.is_empty());
                debug!(space_id = %space_id, "Space has no more subscribers, removed");
            }
        }
        info!(space_id = %space_id, connection_id = %connection_id, "Member unsubscribed from space events");
    }

    /// Send an event to every subscriber of a space except `skip`.
    ///
    /// Returns the number of subscribers reached; dead receivers are dropped.
    pub fn broadcast(&self, space_id: &SpaceId, event: &ClientEvent, skip: Option<&str>) -> usize {
        let mut sent_count = 0;
        let mut failed_connections = Vec::new();

        if let Some(subscribers) = self.spaces.get(space_id) {
            for subscriber in subscribers.iter() {
                if skip == Some(subscriber.connection_id.as_str()) {
                    continue;
                }
                if subscriber.sender.send(event.clone()).is_ok() {
                    sent_count += 1;
                } else {
                    warn!(
                        space_id = %space_id,
                        member_id = %subscriber.member_id,
                        connection_id = %subscriber.connection_id,
                        "Client channel closed, marking for cleanup"
                    );
                    failed_connections.push(subscriber.connection_id.clone());
                }
            }
        }

        for connection_id in failed_connections {
            self.unsubscribe(&connection_id);
        }

        debug!(
            space_id = %space_id,
            sent_count,
            event_type = event.event_type(),
            "Event broadcast complete"
        );
        sent_count
    }

    #[must_use]
    pub fn subscriber_count(&self, space_id: &SpaceId) -> usize {
        self.spaces.get(space_id).map_or(0, |subscribers| subscribers.len())
    }

    #[must_use]
    pub fn space_count(&self) -> usize {
        self.spaces.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn leave(member: u64) -> ClientEvent {
        ClientEvent::MemberLeave {
            member_id: MemberId::new(member),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let hub = SpaceHub::new();
        let space = SpaceId::from("room");
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        hub.subscribe(space.clone(), MemberId::new(0), "c1".to_string(), tx1);
        hub.subscribe(space.clone(), MemberId::new(1), "c2".to_string(), tx2);

        assert_eq!(hub.broadcast(&space, &leave(9), Some("c1")), 1);
        assert_eq!(rx2.recv().await.unwrap().event_type(), "memberLeave");
        assert!(rx1.try_recv().is_err());

        assert_eq!(hub.broadcast(&space, &leave(9), None), 2);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_empty_space() {
        let hub = SpaceHub::new();
        let space = SpaceId::from("room");
        let (tx, _rx) = mpsc::unbounded_channel();
        hub.subscribe(space.clone(), MemberId::new(0), "c1".to_string(), tx);
        assert_eq!(hub.subscriber_count(&space), 1);

        hub.unsubscribe("c1");
        assert_eq!(hub.subscriber_count(&space), 0);
        assert_eq!(hub.space_count(), 0);
    }

    #[tokio::test]
    async fn test_dead_receivers_are_dropped() {
        let hub = SpaceHub::new();
        let space = SpaceId::from("room");
        let (tx, rx) = mpsc::unbounded_channel();
        hub.subscribe(space.clone(), MemberId::new(0), "c1".to_string(), tx);
        drop(rx);

        assert_eq!(hub.broadcast(&space, &leave(1), None), 0);
        assert_eq!(hub.subscriber_count(&space), 0);
    }
}
