//! Push subscription lifecycle: browser permission, the per-profile
//! subscription object, and the server's copy of it.

pub mod manager;
pub mod platform;

pub use manager::{PushState, PushStatus, PushSubscriptionManager};
pub use platform::{decode_application_server_key, PermissionState, PushPlatform};
