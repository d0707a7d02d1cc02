//! Background notification handler.
//!
//! Runs in the worker context with no shared memory with any page. It turns
//! push bodies into system notifications and relays clicks to an open page
//! through a versioned message envelope.

pub mod handler;
pub mod message;

pub use handler::{
    resolve_target_url, BackgroundHandler, ClickOutcome, ClientWindow, DismissalSink,
    DisplayNotification, LogDismissals, NotificationSurface, WorkerScope,
};
pub use message::{MessageEnvelope, WorkerMessage};
