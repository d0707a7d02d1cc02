pub mod calendar_event;
pub mod friendship;
pub mod identity;
pub mod notification;
pub mod push;
pub mod shared_list;
pub mod task;

pub use calendar_event::CalendarEvent;
pub use friendship::{FriendProfile, Friendship, FriendshipStatus};
pub use identity::Identity;
pub use notification::{Notification, NotificationId, NotificationWire};
pub use push::{
    PushAction, PushData, PushPayload, PushSubscriptionRecord, ServerPushStatus, SubscriptionKeys,
};
pub use shared_list::{SharedList, SharedListItem};
pub use task::Task;

use chrono::{DateTime, Utc};

/// A cached object addressed by a stable server id.
///
/// Upserts replace the whole object; payloads are never partial.
pub trait Entity: Clone + Send + Sync + 'static {
    fn id(&self) -> &str;

    fn created_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}
