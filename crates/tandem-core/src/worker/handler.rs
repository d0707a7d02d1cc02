use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::message::{MessageEnvelope, WorkerMessage};
use crate::constants::{
    notification_types, DEFAULT_NOTIFICATION_BODY, DEFAULT_NOTIFICATION_TAG,
    DEFAULT_NOTIFICATION_TITLE, FALLBACK_BADGE, FALLBACK_ICON, FALLBACK_URL,
};
use crate::error::Result;
use crate::models::{PushAction, PushData, PushPayload};

/// Fully defaulted options for one system notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayNotification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    /// Notifications sharing a tag replace each other.
    pub tag: String,
    pub require_interaction: bool,
    pub actions: Vec<PushAction>,
    pub data: PushData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl DisplayNotification {
    /// Build display options from a raw push body. Never fails: a body that is
    /// not valid JSON becomes a minimal notification carrying the raw text.
    pub fn from_push(raw: Option<&[u8]>) -> Self {
        let raw = raw.unwrap_or_default();
        if raw.is_empty() {
            return Self::from_payload(PushPayload::default());
        }
        match serde_json::from_slice::<PushPayload>(raw) {
            Ok(payload) => Self::from_payload(payload),
            Err(e) => {
                warn!(error = %e, "push payload is not valid JSON; showing raw text");
                let text = String::from_utf8_lossy(raw).trim().to_string();
                Self::from_payload(PushPayload {
                    body: text,
                    ..Default::default()
                })
            }
        }
    }

    pub fn from_payload(payload: PushPayload) -> Self {
        Self {
            title: non_empty(Some(payload.title))
                .unwrap_or_else(|| DEFAULT_NOTIFICATION_TITLE.to_string()),
            body: non_empty(Some(payload.body))
                .unwrap_or_else(|| DEFAULT_NOTIFICATION_BODY.to_string()),
            icon: non_empty(payload.icon).unwrap_or_else(|| FALLBACK_ICON.to_string()),
            badge: non_empty(payload.badge).unwrap_or_else(|| FALLBACK_BADGE.to_string()),
            tag: non_empty(payload.tag).unwrap_or_else(|| DEFAULT_NOTIFICATION_TAG.to_string()),
            require_interaction: payload.require_interaction.unwrap_or(false),
            actions: payload.actions,
            data: payload.data.unwrap_or_default(),
            image: non_empty(payload.image),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Where a click should take the user. `None` means the click only dismisses.
///
/// Precedence: the action id, then an explicit `url`, then the notification
/// type, then the dashboard.
pub fn resolve_target_url(action: Option<&str>, data: &PushData) -> Option<String> {
    match action.filter(|a| !a.is_empty()) {
        Some("dismiss") => return None,
        Some("view-task") => {
            return Some(match &data.task_id {
                Some(id) => format!("/tasks/{}", id),
                None => "/tasks".to_string(),
            })
        }
        Some("view-event") => return Some("/calendar".to_string()),
        Some("view-friends") | Some("accept-friend") => return Some("/friends".to_string()),
        Some(other) => debug!(action = other, "unmapped notification action"),
        None => {}
    }

    if let Some(url) = data.url.as_deref().filter(|u| !u.is_empty()) {
        return Some(url.to_string());
    }

    let by_type = match data.kind.as_deref() {
        Some(notification_types::FRIEND_REQUEST) | Some(notification_types::FRIEND_ACCEPTED) => {
            Some("/friends".to_string())
        }
        Some(notification_types::TASK_REMINDER) | Some(notification_types::TASK_SHARED) => {
            Some(match &data.task_id {
                Some(id) => format!("/tasks/{}", id),
                None => "/tasks".to_string(),
            })
        }
        Some(notification_types::EVENT_REMINDER) => Some("/calendar".to_string()),
        Some(notification_types::LIST_SHARED) => Some("/lists".to_string()),
        _ => None,
    };
    Some(by_type.unwrap_or_else(|| FALLBACK_URL.to_string()))
}

/// Path component of a URL, so `https://app/tasks?x` and `/tasks` compare equal.
fn path_of(url: &str) -> &str {
    let without_origin = match url.find("://") {
        Some(scheme_end) => {
            let rest = &url[scheme_end + 3..];
            rest.find('/').map(|i| &rest[i..]).unwrap_or("/")
        }
        None => url,
    };
    without_origin
        .split(['?', '#'])
        .next()
        .unwrap_or(without_origin)
}

/// The platform's notification tray.
#[async_trait]
pub trait NotificationSurface: Send + Sync {
    async fn show(&self, notification: &DisplayNotification) -> Result<()>;
    async fn close(&self, tag: &str) -> Result<()>;
}

/// An open page controlled by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientWindow {
    pub id: String,
    pub url: String,
    pub focused: bool,
}

/// The worker's global scope: client windows and lifecycle controls.
#[async_trait]
pub trait WorkerScope: Send + Sync {
    async fn client_windows(&self) -> Result<Vec<ClientWindow>>;
    async fn focus(&self, client_id: &str) -> Result<()>;
    async fn open_window(&self, url: &str) -> Result<Option<ClientWindow>>;
    async fn post_message(&self, client_id: &str, message: Value) -> Result<()>;
    async fn skip_waiting(&self) -> Result<()>;
    async fn claim_clients(&self) -> Result<()>;
}

/// Receives notifications closed without a click. Nothing consumes these yet.
pub trait DismissalSink: Send + Sync {
    fn record(&self, kind: Option<&str>, tag: &str);
}

pub struct LogDismissals;

impl DismissalSink for LogDismissals {
    fn record(&self, kind: Option<&str>, tag: &str) {
        info!(kind = kind.unwrap_or("unknown"), tag, "notification dismissed");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// An open window was focused and told about the click.
    Focused { client_id: String, url: String },
    Opened { url: String },
    /// The click was a dismiss action.
    Dismissed,
}

/// Stateless per invocation; everything it needs arrives with the event.
pub struct BackgroundHandler {
    surface: Arc<dyn NotificationSurface>,
    scope: Arc<dyn WorkerScope>,
    dismissals: Arc<dyn DismissalSink>,
}

impl BackgroundHandler {
    pub fn new(surface: Arc<dyn NotificationSurface>, scope: Arc<dyn WorkerScope>) -> Self {
        Self {
            surface,
            scope,
            dismissals: Arc::new(LogDismissals),
        }
    }

    pub fn with_dismissal_sink(mut self, sink: Arc<dyn DismissalSink>) -> Self {
        self.dismissals = sink;
        self
    }

    pub async fn on_install(&self) -> Result<()> {
        info!("worker installed");
        self.scope.skip_waiting().await
    }

    pub async fn on_activate(&self) -> Result<()> {
        info!("worker activated");
        self.scope.claim_clients().await
    }

    /// Show a notification for an inbound push. Errors are logged, never raised.
    pub async fn handle_push(&self, raw: Option<&[u8]>) -> DisplayNotification {
        let notification = DisplayNotification::from_push(raw);
        if let Err(e) = self.surface.show(&notification).await {
            warn!(error = %e, tag = %notification.tag, "failed to show notification");
        }
        notification
    }

    pub async fn handle_click(
        &self,
        action: Option<&str>,
        notification: &DisplayNotification,
    ) -> ClickOutcome {
        if let Err(e) = self.surface.close(&notification.tag).await {
            warn!(error = %e, "failed to close clicked notification");
        }

        let Some(url) = resolve_target_url(action, &notification.data) else {
            return ClickOutcome::Dismissed;
        };

        let message = MessageEnvelope::new(WorkerMessage::NotificationClick {
            action: action.map(str::to_string),
            data: Some(notification.data.clone()),
            url: Some(url.clone()),
        });

        let windows = match self.scope.client_windows().await {
            Ok(windows) => windows,
            Err(e) => {
                warn!(error = %e, "could not list client windows");
                Vec::new()
            }
        };

        if let Some(window) = pick_window(&windows, &url) {
            match self.scope.focus(&window.id).await {
                Ok(()) => {
                    match message.to_value() {
                        Ok(value) => {
                            if let Err(e) = self.scope.post_message(&window.id, value).await {
                                warn!(error = %e, client = %window.id, "failed to relay click");
                            }
                        }
                        Err(e) => warn!(error = %e, "failed to encode click message"),
                    }
                    return ClickOutcome::Focused {
                        client_id: window.id.clone(),
                        url,
                    };
                }
                Err(e) => warn!(error = %e, client = %window.id, "focus failed; opening a window"),
            }
        }

        if let Err(e) = self.scope.open_window(&url).await {
            warn!(error = %e, %url, "failed to open window");
        }
        ClickOutcome::Opened { url }
    }

    /// Closed without a click: record the type, no network call.
    pub fn handle_close(&self, notification: &DisplayNotification) {
        self.dismissals
            .record(notification.data.kind.as_deref(), &notification.tag);
    }

    /// A message posted to the worker by a page.
    pub async fn handle_message(&self, value: Value) -> Result<()> {
        let envelope = MessageEnvelope::from_value(value)?;
        match envelope.message {
            WorkerMessage::SkipWaiting => self.scope.skip_waiting().await,
            WorkerMessage::NotificationClick { .. } => {
                debug!("ignoring click message addressed to the worker");
                Ok(())
            }
        }
    }
}

/// Prefer a window already showing the target, then the focused one, then any.
fn pick_window<'a>(windows: &'a [ClientWindow], url: &str) -> Option<&'a ClientWindow> {
    let target = path_of(url);
    windows
        .iter()
        .find(|w| path_of(&w.url) == target)
        .or_else(|| windows.iter().find(|w| w.focused))
        .or_else(|| windows.first())
}
