use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Entity;

/// Friendship state as reported by the server. The client mirrors transitions, never originates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FriendshipStatus {
    PendingIncoming,
    PendingOutgoing,
    Accepted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendProfile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Friendship {
    pub id: String,
    pub friend: FriendProfile,
    pub status: FriendshipStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Friendship {
    pub fn is_pending_incoming(&self) -> bool {
        self.status == FriendshipStatus::PendingIncoming
    }

    /// Label used when synthesizing a notification for an incoming request.
    pub fn display_name(&self) -> &str {
        self.friend
            .name
            .as_deref()
            .or(self.friend.email.as_deref())
            .unwrap_or(&self.friend.id)
    }
}

impl Entity for Friendship {
    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}
