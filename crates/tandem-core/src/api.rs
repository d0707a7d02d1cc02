//! REST collaborator.
//!
//! The CRUD backend is external; the core only needs bulk reads, a handful of
//! intents, and the push subscription surface. Both are traits so the store and
//! the push manager can run against in-memory fakes.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use crate::constants::push_paths;
use crate::error::{CoreError, Result};
use crate::models::{
    CalendarEvent, Friendship, NotificationWire, PushSubscriptionRecord, ServerPushStatus,
    SharedList, Task,
};
use crate::store::CollectionKind;

/// Result of a bulk or per-collection fetch. `None` means "not part of this fetch".
#[derive(Debug, Clone, Default)]
pub struct BulkSnapshot {
    pub friends: Option<Vec<Friendship>>,
    pub tasks: Option<Vec<Task>>,
    pub lists: Option<Vec<SharedList>>,
    pub events: Option<Vec<CalendarEvent>>,
    pub notifications: Option<Vec<NotificationWire>>,
}

#[async_trait]
pub trait CollabApi: Send + Sync {
    async fn fetch_friends(&self) -> Result<Vec<Friendship>>;
    async fn fetch_tasks(&self) -> Result<Vec<Task>>;
    async fn fetch_lists(&self) -> Result<Vec<SharedList>>;
    async fn fetch_events(&self) -> Result<Vec<CalendarEvent>>;
    async fn fetch_notifications(&self) -> Result<Vec<NotificationWire>>;

    async fn mark_notification_read(&self, id: &str) -> Result<()>;
    async fn mark_all_notifications_read(&self) -> Result<()>;

    async fn send_friend_request(&self, email: &str) -> Result<Friendship>;
    /// Accept or decline. Accepting returns the updated friendship.
    async fn respond_friend_request(&self, id: &str, accept: bool) -> Result<Option<Friendship>>;
}

#[async_trait]
pub trait PushApi: Send + Sync {
    async fn vapid_public_key(&self) -> Result<String>;
    async fn subscribe(&self, subscription: &PushSubscriptionRecord) -> Result<()>;
    async fn unsubscribe(&self, endpoint: &str) -> Result<()>;
    async fn status(&self) -> Result<ServerPushStatus>;
    async fn send_test(&self, message: &str) -> Result<()>;
}

/// Fetch the given collections concurrently.
pub async fn fetch_snapshot(api: &dyn CollabApi, kinds: &[CollectionKind]) -> Result<BulkSnapshot> {
    let wants = |kind: CollectionKind| kinds.contains(&kind);

    let (friends, tasks, lists, events, notifications) = futures::try_join!(
        optional(wants(CollectionKind::Friends), api.fetch_friends()),
        optional(wants(CollectionKind::Tasks), api.fetch_tasks()),
        optional(wants(CollectionKind::Lists), api.fetch_lists()),
        optional(wants(CollectionKind::Events), api.fetch_events()),
        optional(wants(CollectionKind::Notifications), api.fetch_notifications()),
    )?;

    Ok(BulkSnapshot {
        friends,
        tasks,
        lists,
        events,
        notifications,
    })
}

async fn optional<T, F>(wanted: bool, fut: F) -> Result<Option<T>>
where
    F: std::future::Future<Output = Result<T>>,
{
    if wanted {
        fut.await.map(Some)
    } else {
        Ok(None)
    }
}

/// Accept either a bare array or an object wrapping it (`{"tasks": [...]}` / `{"data": [...]}`).
fn decode_list<T: DeserializeOwned>(value: Value, key: &str) -> Result<Vec<T>> {
    let list = match value {
        Value::Array(_) => value,
        Value::Object(mut map) => match map.remove(key).or_else(|| map.remove("data")) {
            Some(inner) => inner,
            None => {
                return Err(CoreError::payload(format!(
                    "expected an array under '{}'",
                    key
                )))
            }
        },
        other => {
            return Err(CoreError::payload(format!(
                "expected an array, got {}",
                other
            )))
        }
    };
    Ok(serde_json::from_value(list)?)
}

/// reqwest-backed implementation of both REST surfaces.
///
/// The bearer token is fixed for the lifetime of the client; a host that
/// rotates credentials builds a new runtime.
pub struct HttpApi {
    base_url: String,
    client: reqwest::Client,
    token: Option<String>,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match self.token.as_deref() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn get_list<T: DeserializeOwned>(&self, path: &str, key: &str) -> Result<Vec<T>> {
        debug!(path, "bulk fetch");
        let response = self.send(self.request(reqwest::Method::GET, path)).await?;
        let value: Value = response.json().await?;
        decode_list(value, key)
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<reqwest::Response> {
        self.send(self.request(reqwest::Method::POST, path).json(&body))
            .await
    }
}

#[async_trait]
impl CollabApi for HttpApi {
    async fn fetch_friends(&self) -> Result<Vec<Friendship>> {
        self.get_list("/friends", "friends").await
    }

    async fn fetch_tasks(&self) -> Result<Vec<Task>> {
        self.get_list("/tasks", "tasks").await
    }

    async fn fetch_lists(&self) -> Result<Vec<SharedList>> {
        self.get_list("/lists", "lists").await
    }

    async fn fetch_events(&self) -> Result<Vec<CalendarEvent>> {
        self.get_list("/events", "events").await
    }

    async fn fetch_notifications(&self) -> Result<Vec<NotificationWire>> {
        self.get_list("/notifications", "notifications").await
    }

    async fn mark_notification_read(&self, id: &str) -> Result<()> {
        let path = format!("/notifications/{}/read", id);
        self.send(self.request(reqwest::Method::PUT, &path)).await?;
        Ok(())
    }

    async fn mark_all_notifications_read(&self) -> Result<()> {
        self.send(self.request(reqwest::Method::PUT, "/notifications/read-all"))
            .await?;
        Ok(())
    }

    async fn send_friend_request(&self, email: &str) -> Result<Friendship> {
        let response = self
            .post_json("/friends/request", json!({ "email": email }))
            .await?;
        Ok(response.json().await?)
    }

    async fn respond_friend_request(&self, id: &str, accept: bool) -> Result<Option<Friendship>> {
        let verb = if accept { "accept" } else { "decline" };
        let response = self
            .post_json(&format!("/friends/{}/{}", id, verb), json!({}))
            .await?;
        if !accept {
            return Ok(None);
        }
        Ok(Some(response.json().await?))
    }
}

#[async_trait]
impl PushApi for HttpApi {
    async fn vapid_public_key(&self) -> Result<String> {
        let response = self
            .request(reqwest::Method::GET, push_paths::VAPID_PUBLIC_KEY)
            .send()
            .await?;
        if response.status() == StatusCode::SERVICE_UNAVAILABLE {
            return Err(CoreError::ServerNotConfigured);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::Http { status, body });
        }
        let value: Value = response.json().await?;
        value
            .get("publicKey")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CoreError::payload("missing publicKey"))
    }

    async fn subscribe(&self, subscription: &PushSubscriptionRecord) -> Result<()> {
        self.post_json(push_paths::SUBSCRIBE, json!({ "subscription": subscription }))
            .await?;
        Ok(())
    }

    async fn unsubscribe(&self, endpoint: &str) -> Result<()> {
        self.post_json(push_paths::UNSUBSCRIBE, json!({ "endpoint": endpoint }))
            .await?;
        Ok(())
    }

    async fn status(&self) -> Result<ServerPushStatus> {
        let response = self
            .request(reqwest::Method::GET, push_paths::STATUS)
            .send()
            .await?;
        // Not configured is a distinct, non-error state
        if response.status() == StatusCode::SERVICE_UNAVAILABLE {
            return Ok(ServerPushStatus {
                configured: false,
                ..Default::default()
            });
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::Http { status, body });
        }
        Ok(response.json().await?)
    }

    async fn send_test(&self, message: &str) -> Result<()> {
        self.post_json(push_paths::TEST, json!({ "message": message }))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_list_accepts_bare_and_wrapped_arrays() {
        let bare: Vec<Value> = decode_list(json!([1, 2]), "tasks").unwrap();
        assert_eq!(bare.len(), 2);

        let wrapped: Vec<Value> = decode_list(json!({ "tasks": [1] }), "tasks").unwrap();
        assert_eq!(wrapped.len(), 1);

        let data: Vec<Value> = decode_list(json!({ "data": [1, 2, 3] }), "tasks").unwrap();
        assert_eq!(data.len(), 3);
    }

    #[test]
    fn test_decode_list_rejects_non_arrays() {
        let err = decode_list::<Value>(json!({ "other": [] }), "tasks").unwrap_err();
        assert_eq!(err.class(), crate::error::ErrorClass::Payload);
        assert!(decode_list::<Value>(json!("nope"), "tasks").is_err());
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let api = HttpApi::new("https://api.example.com/", None);
        assert_eq!(api.url("/tasks"), "https://api.example.com/tasks");
    }

    #[test]
    fn test_requests_carry_configured_bearer_token() {
        let api = HttpApi::new("https://api.example.com", Some("secret".to_string()));
        let request = api
            .request(reqwest::Method::GET, "/tasks")
            .build()
            .unwrap();
        assert_eq!(
            request.headers().get(reqwest::header::AUTHORIZATION).unwrap(),
            "Bearer secret"
        );

        let anonymous = HttpApi::new("https://api.example.com", Some(String::new()));
        let request = anonymous
            .request(reqwest::Method::GET, "/tasks")
            .build()
            .unwrap();
        assert!(request.headers().get(reqwest::header::AUTHORIZATION).is_none());
    }
}
