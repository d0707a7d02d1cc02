use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::bus_events;
use crate::error::{CoreError, Result};
use crate::models::{CalendarEvent, Friendship, NotificationWire, SharedListItem, Task};

/// Server -> client event names handled by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusEventKind {
    TaskUpdated,
    ListItemUpdated,
    EventUpdated,
    Reminder,
    FriendRequest,
    Notification,
}

impl BusEventKind {
    pub const ALL: [BusEventKind; 6] = [
        BusEventKind::TaskUpdated,
        BusEventKind::ListItemUpdated,
        BusEventKind::EventUpdated,
        BusEventKind::Reminder,
        BusEventKind::FriendRequest,
        BusEventKind::Notification,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BusEventKind::TaskUpdated => bus_events::TASK_UPDATED,
            BusEventKind::ListItemUpdated => bus_events::LIST_ITEM_UPDATED,
            BusEventKind::EventUpdated => bus_events::EVENT_UPDATED,
            BusEventKind::Reminder => bus_events::REMINDER,
            BusEventKind::FriendRequest => bus_events::FRIEND_REQUEST,
            BusEventKind::Notification => bus_events::NOTIFICATION,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

/// Body of a `reminder` event. Only `message` is required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderPayload {
    #[serde(default, alias = "_id")]
    pub id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A decoded server -> client event.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    TaskUpdated(Task),
    ListItemUpdated(SharedListItem),
    EventUpdated(CalendarEvent),
    Reminder(ReminderPayload),
    FriendRequest(Friendship),
    Notification(NotificationWire),
}

impl BusEvent {
    pub fn kind(&self) -> BusEventKind {
        match self {
            BusEvent::TaskUpdated(_) => BusEventKind::TaskUpdated,
            BusEvent::ListItemUpdated(_) => BusEventKind::ListItemUpdated,
            BusEvent::EventUpdated(_) => BusEventKind::EventUpdated,
            BusEvent::Reminder(_) => BusEventKind::Reminder,
            BusEvent::FriendRequest(_) => BusEventKind::FriendRequest,
            BusEvent::Notification(_) => BusEventKind::Notification,
        }
    }

    /// Decode a named event. `Ok(None)` for names the core does not handle;
    /// `Err` for a known name whose body does not match its shape.
    pub fn decode(name: &str, data: Value) -> Result<Option<BusEvent>> {
        let Some(kind) = BusEventKind::from_name(name) else {
            return Ok(None);
        };
        let event = match kind {
            BusEventKind::TaskUpdated => BusEvent::TaskUpdated(from_data(name, data)?),
            BusEventKind::ListItemUpdated => BusEvent::ListItemUpdated(from_data(name, data)?),
            BusEventKind::EventUpdated => BusEvent::EventUpdated(from_data(name, data)?),
            BusEventKind::Reminder => BusEvent::Reminder(from_data(name, data)?),
            BusEventKind::FriendRequest => BusEvent::FriendRequest(from_data(name, data)?),
            BusEventKind::Notification => BusEvent::Notification(from_data(name, data)?),
        };
        Ok(Some(event))
    }
}

fn from_data<T: serde::de::DeserializeOwned>(name: &str, data: Value) -> Result<T> {
    serde_json::from_value(data)
        .map_err(|e| CoreError::payload(format!("malformed '{}' event: {}", name, e)))
}

/// One JSON text frame on the bus socket, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_names_round_trip() {
        for kind in BusEventKind::ALL {
            assert_eq!(BusEventKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(BusEventKind::from_name("somethingElse"), None);
    }

    #[test]
    fn test_decode_task_updated() {
        let event = BusEvent::decode(
            "taskUpdated",
            json!({ "id": "t1", "title": "Buy milk", "createdAt": "2026-01-01T00:00:00Z" }),
        )
        .unwrap()
        .unwrap();
        let BusEvent::TaskUpdated(task) = event else {
            panic!("expected task");
        };
        assert_eq!(task.title, "Buy milk");
    }

    #[test]
    fn test_unknown_event_is_ignored_and_malformed_is_error() {
        assert_eq!(BusEvent::decode("typing", json!({})).unwrap(), None);
        let err = BusEvent::decode("reminder", json!({ "title": "no message" })).unwrap_err();
        assert_eq!(err.class(), crate::error::ErrorClass::Payload);
    }

    #[test]
    fn test_reminder_keeps_extra_fields() {
        let event = BusEvent::decode("reminder", json!({ "message": "Standup", "taskId": "t1" }))
            .unwrap()
            .unwrap();
        let BusEvent::Reminder(reminder) = event else {
            panic!("expected reminder");
        };
        assert_eq!(reminder.extra.get("taskId"), Some(&json!("t1")));
    }
}
