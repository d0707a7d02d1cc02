use serde_json::Value;

use super::events::Frame;
use crate::constants::bus_events;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomKind {
    User,
    Task,
    List,
    Event,
}

/// A server-side room, scoped by user or entity id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Room {
    pub kind: RoomKind,
    pub id: String,
}

impl Room {
    pub fn new(kind: RoomKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn join_event(&self) -> &'static str {
        match self.kind {
            RoomKind::User => bus_events::JOIN_USER_ROOM,
            RoomKind::Task => bus_events::JOIN_TASK_ROOM,
            RoomKind::List => bus_events::JOIN_LIST_ROOM,
            RoomKind::Event => bus_events::JOIN_EVENT_ROOM,
        }
    }

    pub fn leave_event(&self) -> &'static str {
        match self.kind {
            RoomKind::User => bus_events::LEAVE_USER_ROOM,
            RoomKind::Task => bus_events::LEAVE_TASK_ROOM,
            RoomKind::List => bus_events::LEAVE_LIST_ROOM,
            RoomKind::Event => bus_events::LEAVE_EVENT_ROOM,
        }
    }

    pub fn join_frame(&self) -> Frame {
        Frame::new(self.join_event(), Value::String(self.id.clone()))
    }

    pub fn leave_frame(&self) -> Frame {
        Frame::new(self.leave_event(), Value::String(self.id.clone()))
    }
}

/// Client-tracked room membership, replayed on every (re)connect.
///
/// The user room is not tracked here; it follows the connection identity.
#[derive(Debug, Clone, Default)]
pub struct RoomRegistry {
    rooms: Vec<Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if already joined.
    pub fn insert(&mut self, room: Room) -> bool {
        if self.rooms.contains(&room) {
            return false;
        }
        self.rooms.push(room);
        true
    }

    pub fn remove(&mut self, room: &Room) -> bool {
        let before = self.rooms.len();
        self.rooms.retain(|r| r != room);
        self.rooms.len() != before
    }

    pub fn contains(&self, room: &Room) -> bool {
        self.rooms.contains(room)
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn clear(&mut self) {
        self.rooms.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_dedups_and_keeps_join_order() {
        let mut registry = RoomRegistry::new();
        assert!(registry.insert(Room::new(RoomKind::Task, "t1")));
        assert!(registry.insert(Room::new(RoomKind::List, "l1")));
        assert!(!registry.insert(Room::new(RoomKind::Task, "t1")));
        assert_eq!(registry.len(), 2);

        assert!(registry.remove(&Room::new(RoomKind::Task, "t1")));
        assert!(!registry.remove(&Room::new(RoomKind::Task, "t1")));
        assert_eq!(registry.rooms(), &[Room::new(RoomKind::List, "l1")]);
    }

    #[test]
    fn test_room_frames_use_control_event_names() {
        let room = Room::new(RoomKind::Event, "e9");
        assert_eq!(room.join_frame().event, "join_event_room");
        assert_eq!(room.leave_frame().event, "leave_event_room");
        assert_eq!(room.join_frame().data, Value::String("e9".to_string()));
    }
}
