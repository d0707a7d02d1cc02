use std::collections::HashMap;

/// Errors raised by the synchronization core.
///
/// Payloads are plain strings so the error is `Clone`: a collapsed in-flight
/// operation hands the same result to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("Transport error: {message}")]
    Transport { message: String },
    #[error("Server responded {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Push notifications are not supported on this platform")]
    Unsupported,
    #[error("Notification permission was denied")]
    PermissionDenied,
    #[error("Notification permission prompt was dismissed")]
    PermissionDismissed,
    #[error("Push is not configured on the server")]
    ServerNotConfigured,
    #[error("Consistency error: {message}")]
    Consistency { message: String },
    #[error("Malformed payload: {message}")]
    Payload { message: String },
    #[error("Not logged in")]
    NotLoggedIn,
    #[error("Unknown {kind} id: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("Invalid configuration: {message}")]
    Config { message: String },
}

/// Error taxonomy used to decide how a failure is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Bus disconnect or fetch failure; retryable.
    Transport,
    /// Push permission denied; terminal for the session.
    Permission,
    /// Server rejected a state-changing call; local state is rolled back.
    Consistency,
    /// Malformed inbound data; degraded, never dropped.
    Payload,
    /// Programming or configuration error on the caller's side.
    Usage,
}

impl CoreError {
    pub fn transport(message: impl Into<String>) -> Self {
        CoreError::Transport {
            message: message.into(),
        }
    }

    pub fn consistency(message: impl Into<String>) -> Self {
        CoreError::Consistency {
            message: message.into(),
        }
    }

    pub fn payload(message: impl Into<String>) -> Self {
        CoreError::Payload {
            message: message.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            CoreError::Transport { .. } | CoreError::Http { .. } => ErrorClass::Transport,
            CoreError::Unsupported
            | CoreError::PermissionDenied
            | CoreError::PermissionDismissed
            | CoreError::ServerNotConfigured => ErrorClass::Permission,
            CoreError::Consistency { .. } => ErrorClass::Consistency,
            CoreError::Payload { .. } => ErrorClass::Payload,
            CoreError::NotLoggedIn | CoreError::NotFound { .. } | CoreError::Config { .. } => {
                ErrorClass::Usage
            }
        }
    }

    /// Transport and permission errors are always shown to the user.
    pub fn always_visible(&self) -> bool {
        matches!(self.class(), ErrorClass::Transport | ErrorClass::Permission)
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => CoreError::Http {
                status: status.as_u16(),
                body: e.to_string(),
            },
            None => CoreError::transport(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::payload(e.to_string())
    }
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;

/// What the caller should do with a failure after it has been recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Log and self-heal.
    Silent,
    /// Show a visible, dismissible error.
    Visible,
}

/// Tracks consecutive failures per operation.
///
/// Consistency and payload errors stay silent until the corrective action for
/// the same operation fails twice in a row.
#[derive(Debug, Default)]
pub struct FailureTracker {
    consecutive: HashMap<String, u32>,
}

impl FailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&mut self, operation: &str, error: &CoreError) -> Escalation {
        let count = self.consecutive.entry(operation.to_string()).or_insert(0);
        *count += 1;
        if error.always_visible() || *count >= 2 {
            Escalation::Visible
        } else {
            Escalation::Silent
        }
    }

    pub fn record_success(&mut self, operation: &str) {
        self.consecutive.remove(operation);
    }

    pub fn consecutive_failures(&self, operation: &str) -> u32 {
        self.consecutive.get(operation).copied().unwrap_or(0)
    }
}
