//! Per-exam broadcast rooms.
//!
//! A room is a bounded `tokio::sync::broadcast` channel keyed by exam id. Every
//! WebSocket that joined the exam holds one receiver; publishing serializes the
//! event once and hands the frame to all of them.

use dashmap::DashMap;
use log::{debug, error};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::events::ServerEvent;

/// Serialized event frame shared by all receivers of a room
pub type Frame = Arc<str>;

pub struct RoomRegistry {
    rooms: DashMap<String, broadcast::Sender<Frame>>,
    capacity: usize,
}

impl RoomRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Join a room, creating it on first use
    pub fn subscribe(&self, exam_id: &str) -> broadcast::Receiver<Frame> {
        self.rooms
            .entry(exam_id.to_string())
            .or_insert_with(|| {
                debug!("Opening room {}", exam_id);
                broadcast::channel(self.capacity).0
            })
            .subscribe()
    }

    /// Send an event to everyone in the room.
    /// Returns the number of subscribers reached; a room nobody joined is not created.
    pub fn publish(&self, exam_id: &str, event: &ServerEvent) -> usize {
        let frame: Frame = match event.to_frame() {
            Ok(frame) => frame.into(),
            Err(e) => {
                error!("Failed to serialize {} event: {}", event.name(), e);
                return 0;
            }
        };

        match self.rooms.get(exam_id) {
            Some(sender) => sender.send(frame).unwrap_or(0),
            None => 0,
        }
    }

    /// Number of live subscribers in a room
    pub fn subscriber_count(&self, exam_id: &str) -> usize {
        self.rooms
            .get(exam_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Drop the room if its last receiver is gone
    pub fn prune(&self, exam_id: &str) {
        let removed = self
            .rooms
            .remove_if(exam_id, |_, sender| sender.receiver_count() == 0);
        if removed.is_some() {
            debug!("Closed empty room {}", exam_id);
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tab_change(student: &str) -> ServerEvent {
        ServerEvent::TabChange {
            student_id: student.to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_only_own_room() {
        let rooms = RoomRegistry::new(16);
        let mut a1 = rooms.subscribe("exam-a");
        let mut a2 = rooms.subscribe("exam-a");
        let mut b = rooms.subscribe("exam-b");

        assert_eq!(rooms.publish("exam-a", &tab_change("s1")), 2);

        let frame = a1.recv().await.unwrap();
        assert!(frame.contains("tab_change"));
        assert_eq!(a2.recv().await.unwrap(), frame);
        assert!(matches!(
            b.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[test]
    fn test_publish_to_missing_room_does_not_create_it() {
        let rooms = RoomRegistry::new(16);
        assert_eq!(rooms.publish("ghost", &tab_change("s1")), 0);
        assert_eq!(rooms.room_count(), 0);
    }

    #[test]
    fn test_prune_only_empty_rooms() {
        let rooms = RoomRegistry::new(16);
        let rx = rooms.subscribe("exam-a");
        rooms.prune("exam-a");
        assert_eq!(rooms.room_count(), 1);
        assert_eq!(rooms.subscriber_count("exam-a"), 1);

        drop(rx);
        rooms.prune("exam-a");
        assert_eq!(rooms.room_count(), 0);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_ahead() {
        let rooms = RoomRegistry::new(2);
        let mut rx = rooms.subscribe("exam-a");
        for i in 0..5 {
            rooms.publish("exam-a", &tab_change(&format!("s{}", i)));
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        let frame = rx.recv().await.unwrap();
        assert!(frame.contains("s3"));
    }
}
