use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Dedup key of a notification.
///
/// Server ids and locally derived ids live in separate variants so a derived
/// id can never be mistaken for (and merged with) a server id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NotificationId {
    Server(String),
    Local(String),
}

impl NotificationId {
    /// Deterministic id for a notification that arrived without one.
    /// Re-deliveries of the same (type, timestamp, message) collapse; anything else stays apart.
    pub fn derive(kind: &str, created_at: DateTime<Utc>, message: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_bytes());
        hasher.update([0u8]);
        hasher.update(created_at.timestamp_millis().to_be_bytes());
        hasher.update([0u8]);
        hasher.update(message.as_bytes());
        let digest = hasher.finalize();
        NotificationId::Local(hex::encode(&digest[..12]))
    }

    /// Local id for a notification synthesized from another entity (a friendship,
    /// a reminder). Every re-delivery of that entity maps to the same id.
    pub fn keyed(key: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"key");
        hasher.update([0u8]);
        hasher.update(key.as_bytes());
        let digest = hasher.finalize();
        NotificationId::Local(hex::encode(&digest[..12]))
    }

    pub fn is_local(&self) -> bool {
        matches!(self, NotificationId::Local(_))
    }

    /// The id to send to the server, if it has one.
    pub fn server_id(&self) -> Option<&str> {
        match self {
            NotificationId::Server(id) => Some(id),
            NotificationId::Local(_) => None,
        }
    }

    /// Parse the display form back into an id (`local:` prefix marks derived ids).
    pub fn parse(value: &str) -> Self {
        match value.strip_prefix("local:") {
            Some(rest) => NotificationId::Local(rest.to_string()),
            None => NotificationId::Server(value.to_string()),
        }
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationId::Server(id) => f.write_str(id),
            NotificationId::Local(id) => write!(f, "local:{}", id),
        }
    }
}

impl Serialize for NotificationId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A notification as delivered by any of the three sources (bulk fetch, live push, local).
///
/// Older payloads use `isRead`, newer ones `read`; both are accepted here and
/// folded into a single flag by [`Notification::normalize`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationWire {
    #[serde(default, alias = "_id")]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read: Option<bool>,
    #[serde(default)]
    pub is_read: Option<bool>,
    #[serde(default)]
    pub payload: Value,
    /// Dedup key for notifications raised locally from another entity.
    /// Only consulted when `id` is absent; never on the wire.
    #[serde(skip)]
    pub dedup_key: Option<String>,
}

/// Canonical in-memory notification. `read` is the only read flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub read: bool,
    pub payload: Value,
}

impl Notification {
    /// Fold a wire notification into canonical form.
    /// `now` stands in for a missing `createdAt`.
    pub fn normalize(wire: NotificationWire, now: DateTime<Utc>) -> Self {
        let created_at = wire.created_at.unwrap_or(now);
        let read = wire.read.unwrap_or(false) || wire.is_read.unwrap_or(false);
        let id = match (wire.id.filter(|id| !id.is_empty()), wire.dedup_key) {
            (Some(id), _) => NotificationId::Server(id),
            (None, Some(key)) => NotificationId::keyed(&key),
            (None, None) => NotificationId::derive(
                &wire.kind,
                created_at,
                wire.message.as_deref().unwrap_or(&wire.title),
            ),
        };

        Self {
            id,
            kind: wire.kind,
            title: wire.title,
            message: wire.message,
            created_at,
            read,
            payload: wire.payload,
        }
    }

    /// A string field from the payload (e.g. `taskId`).
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}
