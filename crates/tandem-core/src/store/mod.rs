pub mod collab_store;
pub mod collection;
pub mod notifications;

pub use collab_store::{CollaborationStore, FetchTicket, LiveOutcome, RefreshOutcome};
pub use collection::{Collection, CollectionOrder, UpsertOutcome};
pub use notifications::{IngestOutcome, IngestSource, NotificationEngine};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::bus::BusEvent;
use crate::constants::notification_types;
use crate::models::{
    CalendarEvent, Friendship, NotificationWire, SharedList, SharedListItem, Task,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    Friends,
    Tasks,
    Lists,
    Events,
    Notifications,
}

impl CollectionKind {
    pub const ALL: [CollectionKind; 5] = [
        CollectionKind::Friends,
        CollectionKind::Tasks,
        CollectionKind::Lists,
        CollectionKind::Events,
        CollectionKind::Notifications,
    ];
}

/// A single change to the cache coming from the bus or from a local intent.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveUpdate {
    Task(Task),
    TaskRemoved(String),
    List(SharedList),
    ListItem(SharedListItem),
    ListItemRemoved { list_id: String, item_id: String },
    Event(CalendarEvent),
    EventRemoved(String),
    Friendship(Friendship),
    FriendshipRemoved(String),
    Notification(NotificationWire),
}

impl LiveUpdate {
    pub fn collection(&self) -> CollectionKind {
        match self {
            LiveUpdate::Task(_) | LiveUpdate::TaskRemoved(_) => CollectionKind::Tasks,
            LiveUpdate::List(_)
            | LiveUpdate::ListItem(_)
            | LiveUpdate::ListItemRemoved { .. } => CollectionKind::Lists,
            LiveUpdate::Event(_) | LiveUpdate::EventRemoved(_) => CollectionKind::Events,
            LiveUpdate::Friendship(_) | LiveUpdate::FriendshipRemoved(_) => {
                CollectionKind::Friends
            }
            LiveUpdate::Notification(_) => CollectionKind::Notifications,
        }
    }

    /// Translate a bus event into cache updates.
    ///
    /// Reminders become local notifications; an incoming friend request updates
    /// the friendship and also raises a notification.
    pub fn from_bus_event(event: &BusEvent, now: DateTime<Utc>) -> Vec<LiveUpdate> {
        match event {
            BusEvent::TaskUpdated(task) => vec![LiveUpdate::Task(task.clone())],
            BusEvent::ListItemUpdated(item) => vec![LiveUpdate::ListItem(item.clone())],
            BusEvent::EventUpdated(ev) => vec![LiveUpdate::Event(ev.clone())],
            BusEvent::Notification(wire) => vec![LiveUpdate::Notification(wire.clone())],
            BusEvent::Reminder(reminder) => {
                // A reminder id names the reminder, not a server notification
                let wire = NotificationWire {
                    id: None,
                    kind: reminder
                        .kind
                        .clone()
                        .unwrap_or_else(|| notification_types::REMINDER.to_string()),
                    title: reminder
                        .title
                        .clone()
                        .unwrap_or_else(|| "Reminder".to_string()),
                    message: Some(reminder.message.clone()),
                    created_at: Some(reminder.created_at.unwrap_or(now)),
                    read: Some(false),
                    is_read: None,
                    payload: serde_json::Value::Object(reminder.extra.clone()),
                    dedup_key: reminder
                        .id
                        .as_ref()
                        .map(|id| format!("{}|{}", notification_types::REMINDER, id)),
                };
                vec![LiveUpdate::Notification(wire)]
            }
            BusEvent::FriendRequest(friendship) => {
                let mut updates = vec![LiveUpdate::Friendship(friendship.clone())];
                if friendship.is_pending_incoming() {
                    updates.push(LiveUpdate::Notification(NotificationWire {
                        id: None,
                        kind: notification_types::FRIEND_REQUEST.to_string(),
                        title: "New friend request".to_string(),
                        message: Some(format!(
                            "{} sent you a friend request",
                            friendship.display_name()
                        )),
                        created_at: Some(friendship.created_at.unwrap_or(now)),
                        read: Some(false),
                        is_read: None,
                        payload: json!({ "friendshipId": friendship.id }),
                        dedup_key: Some(format!(
                            "{}|{}",
                            notification_types::FRIEND_REQUEST,
                            friendship.id
                        )),
                    }));
                }
                updates
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ReminderPayload;
    use crate::models::{FriendProfile, FriendshipStatus, Notification, NotificationId};
    use chrono::TimeZone;
    use serde_json::Map;

    fn friendship(status: FriendshipStatus) -> Friendship {
        Friendship {
            id: "f1".to_string(),
            friend: FriendProfile {
                id: "u2".to_string(),
                name: Some("Ada".to_string()),
                email: None,
            },
            status,
            created_at: Some(Utc.timestamp_opt(100, 0).unwrap()),
            extra: Map::new(),
        }
    }

    #[test]
    fn test_incoming_friend_request_raises_notification() {
        let event = BusEvent::FriendRequest(friendship(FriendshipStatus::PendingIncoming));
        let updates = LiveUpdate::from_bus_event(&event, Utc::now());
        assert_eq!(updates.len(), 2);
        let LiveUpdate::Notification(wire) = &updates[1] else {
            panic!("expected notification");
        };
        assert_eq!(wire.kind, "friend_request");
        assert!(wire.id.is_none());
        assert_eq!(wire.message.as_deref(), Some("Ada sent you a friend request"));
    }

    #[test]
    fn test_redelivered_friend_request_keeps_one_notification_id() {
        let mut pending = friendship(FriendshipStatus::PendingIncoming);
        pending.created_at = None;
        let event = BusEvent::FriendRequest(pending);

        let ids: Vec<NotificationId> = [Utc.timestamp_opt(10, 0), Utc.timestamp_opt(11, 0)]
            .into_iter()
            .map(|now| {
                let now = now.unwrap();
                let updates = LiveUpdate::from_bus_event(&event, now);
                let LiveUpdate::Notification(wire) = updates[1].clone() else {
                    panic!("expected notification");
                };
                Notification::normalize(wire, now).id
            })
            .collect();
        assert_eq!(ids[0], ids[1]);
        assert!(ids[0].is_local());
    }

    #[test]
    fn test_reminder_id_keys_a_local_notification() {
        let reminder = |now_secs: i64| {
            let event = BusEvent::Reminder(ReminderPayload {
                id: Some("r1".to_string()),
                message: "Standup in 5".to_string(),
                title: None,
                kind: None,
                created_at: None,
                extra: Map::new(),
            });
            let now = Utc.timestamp_opt(now_secs, 0).unwrap();
            let LiveUpdate::Notification(wire) = LiveUpdate::from_bus_event(&event, now).remove(0)
            else {
                panic!("expected notification");
            };
            Notification::normalize(wire, now).id
        };
        let first = reminder(10);
        assert!(first.is_local());
        assert_eq!(first, reminder(20));
    }

    #[test]
    fn test_accepted_friendship_is_only_mirrored() {
        let event = BusEvent::FriendRequest(friendship(FriendshipStatus::Accepted));
        let updates = LiveUpdate::from_bus_event(&event, Utc::now());
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].collection(), CollectionKind::Friends);
    }

    #[test]
    fn test_reminder_becomes_notification() {
        let now = Utc.timestamp_opt(500, 0).unwrap();
        let event = BusEvent::Reminder(ReminderPayload {
            id: None,
            message: "Standup in 5".to_string(),
            title: None,
            kind: None,
            created_at: None,
            extra: Map::new(),
        });
        let updates = LiveUpdate::from_bus_event(&event, now);
        let LiveUpdate::Notification(wire) = &updates[0] else {
            panic!("expected notification");
        };
        assert_eq!(wire.kind, "reminder");
        assert_eq!(wire.created_at, Some(now));
    }
}
