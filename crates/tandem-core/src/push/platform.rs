use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Serialize;

use crate::error::{CoreError, Result};
use crate::models::PushSubscriptionRecord;

/// Notification permission as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    /// Not asked yet.
    Default,
    Granted,
    Denied,
}

/// The browser's push machinery: permission prompt plus the single
/// per-profile subscription object.
#[async_trait]
pub trait PushPlatform: Send + Sync {
    fn is_supported(&self) -> bool;

    fn permission(&self) -> PermissionState;

    /// Shows the prompt when the state is `Default`.
    async fn request_permission(&self) -> Result<PermissionState>;

    async fn current_subscription(&self) -> Result<Option<PushSubscriptionRecord>>;

    /// `application_server_key` is the raw uncompressed P-256 point.
    async fn subscribe(&self, application_server_key: &[u8]) -> Result<PushSubscriptionRecord>;

    /// Returns false if there was nothing to remove.
    async fn unsubscribe(&self) -> Result<bool>;
}

/// Decode a VAPID public key into the byte form the platform expects.
///
/// Accepts URL-safe or standard base64, padded or not. The result must be an
/// uncompressed P-256 point.
pub fn decode_application_server_key(key: &str) -> Result<Vec<u8>> {
    let normalized: String = key
        .trim()
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();

    let bytes = URL_SAFE_NO_PAD
        .decode(normalized.as_bytes())
        .map_err(|e| CoreError::payload(format!("invalid VAPID key encoding: {}", e)))?;

    if bytes.len() != 65 || bytes[0] != 0x04 {
        return Err(CoreError::payload(format!(
            "VAPID key must be a 65-byte uncompressed point, got {} bytes",
            bytes.len()
        )));
    }
    Ok(bytes)
}
