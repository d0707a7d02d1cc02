use serde::Serialize;

use crate::error::{CoreError, ErrorClass};
use crate::models::Identity;
use crate::store::CollectionKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeSeverity {
    Info,
    Warning,
    Error,
}

/// User-visible notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub severity: NoticeSeverity,
    pub class: ErrorClass,
    pub message: String,
    pub dismissible: bool,
    /// Retrying cannot help (e.g. denied permission); the UI should not offer a retry.
    pub persistent: bool,
}

impl Notice {
    pub fn from_error(error: &CoreError) -> Self {
        let class = error.class();
        let persistent = class == ErrorClass::Permission;
        let severity = match class {
            ErrorClass::Transport => NoticeSeverity::Warning,
            _ => NoticeSeverity::Error,
        };
        Self {
            severity,
            class,
            message: error.to_string(),
            dismissible: true,
            persistent,
        }
    }

    pub fn info(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            severity: NoticeSeverity::Info,
            class,
            message: message.into(),
            dismissible: true,
            persistent: false,
        }
    }
}

/// Change notifications emitted by the core for the UI layer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreEvent {
    IdentityChanged { identity: Option<Identity> },
    CollectionChanged { collection: CollectionKind },
    NotificationsChanged { unread: usize },
    Connection { connected: bool },
    Notice(Notice),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_notice_is_persistent() {
        let notice = Notice::from_error(&CoreError::PermissionDenied);
        assert!(notice.persistent);
        assert!(notice.dismissible);
        assert_eq!(notice.severity, NoticeSeverity::Error);
    }

    #[test]
    fn test_transport_notice_is_retryable_warning() {
        let notice = Notice::from_error(&CoreError::transport("offline"));
        assert!(!notice.persistent);
        assert_eq!(notice.severity, NoticeSeverity::Warning);
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(CoreEvent::Connection { connected: true }).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "connection", "connected": true }));
    }
}
