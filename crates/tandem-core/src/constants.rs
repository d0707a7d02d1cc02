//! Application-wide constants
//!
//! Centralized location for magic strings and limits shared by the
//! foreground core and the background notification handler.

/// Maximum number of notifications retained in memory.
pub const NOTIFICATION_CAP: usize = 50;

/// Number of notifications surfaced by the default UI.
pub const NOTIFICATION_SURFACED: usize = 10;

// Reconnect defaults for the event bus
pub const RECONNECT_INITIAL_DELAY_MS: u64 = 500;
pub const RECONNECT_MAX_DELAY_MS: u64 = 30_000;

/// Capacity of the CoreEvent broadcast channel. Slow receivers lag rather than block the store.
pub const CORE_EVENT_CAPACITY: usize = 256;

// Background notification defaults
pub const DEFAULT_NOTIFICATION_TITLE: &str = "Tandem";
pub const DEFAULT_NOTIFICATION_BODY: &str = "You have a new notification";
pub const DEFAULT_NOTIFICATION_TAG: &str = "default";
pub const FALLBACK_ICON: &str = "/icons/icon-192x192.png";
pub const FALLBACK_BADGE: &str = "/icons/badge-72x72.png";
pub const FALLBACK_URL: &str = "/dashboard";

/// Current version of the worker <-> foreground message envelope.
pub const MESSAGE_ENVELOPE_VERSION: u8 = 1;

// REST paths for the push subscription surface
pub mod push_paths {
    pub const VAPID_PUBLIC_KEY: &str = "/push/vapid-public-key";
    pub const SUBSCRIBE: &str = "/push/subscribe";
    pub const UNSUBSCRIBE: &str = "/push/unsubscribe";
    pub const STATUS: &str = "/push/status";
    pub const TEST: &str = "/push/test";
}

// Event-bus channel names
pub mod bus_events {
    /// Inbound
    pub const TASK_UPDATED: &str = "taskUpdated";
    pub const LIST_ITEM_UPDATED: &str = "listItemUpdated";
    pub const EVENT_UPDATED: &str = "eventUpdated";
    pub const REMINDER: &str = "reminder";
    pub const FRIEND_REQUEST: &str = "friendRequest";
    pub const NOTIFICATION: &str = "notification";

    /// Outbound control
    pub const JOIN_USER_ROOM: &str = "join_user_room";
    pub const LEAVE_USER_ROOM: &str = "leave_user_room";
    pub const JOIN_TASK_ROOM: &str = "join_task_room";
    pub const LEAVE_TASK_ROOM: &str = "leave_task_room";
    pub const JOIN_LIST_ROOM: &str = "join_list_room";
    pub const LEAVE_LIST_ROOM: &str = "leave_list_room";
    pub const JOIN_EVENT_ROOM: &str = "join_event_room";
    pub const LEAVE_EVENT_ROOM: &str = "leave_event_room";
}

// Notification type strings as sent by the server
pub mod notification_types {
    pub const FRIEND_REQUEST: &str = "friend_request";
    pub const FRIEND_ACCEPTED: &str = "friend_accepted";
    pub const TASK_REMINDER: &str = "task_reminder";
    pub const TASK_SHARED: &str = "task_shared";
    pub const EVENT_REMINDER: &str = "event_reminder";
    pub const LIST_SHARED: &str = "list_shared";
    pub const REMINDER: &str = "reminder";
}
