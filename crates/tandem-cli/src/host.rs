//! Terminal stand-ins for the browser capabilities the core expects.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tandem_core::error::{CoreError, Result};
use tandem_core::models::PushSubscriptionRecord;
use tandem_core::push::{PermissionState, PushPlatform};
use tandem_core::worker::{ClientWindow, DisplayNotification, NotificationSurface, WorkerScope};
use tracing::info;

/// A terminal has no push service; only the server side of push is reachable.
pub struct HeadlessPlatform;

#[async_trait]
impl PushPlatform for HeadlessPlatform {
    fn is_supported(&self) -> bool {
        false
    }

    fn permission(&self) -> PermissionState {
        PermissionState::Default
    }

    async fn request_permission(&self) -> Result<PermissionState> {
        Err(CoreError::Unsupported)
    }

    async fn current_subscription(&self) -> Result<Option<PushSubscriptionRecord>> {
        Ok(None)
    }

    async fn subscribe(&self, _application_server_key: &[u8]) -> Result<PushSubscriptionRecord> {
        Err(CoreError::Unsupported)
    }

    async fn unsubscribe(&self) -> Result<bool> {
        Ok(false)
    }
}

/// Prints notifications as JSON lines instead of showing them.
pub struct StdoutSurface;

#[async_trait]
impl NotificationSurface for StdoutSurface {
    async fn show(&self, notification: &DisplayNotification) -> Result<()> {
        println!("{}", serde_json::to_string(notification)?);
        Ok(())
    }

    async fn close(&self, tag: &str) -> Result<()> {
        info!(tag, "notification closed");
        Ok(())
    }
}

/// Client windows that exist only in memory; messages are printed.
#[derive(Default)]
pub struct SimulatedScope {
    windows: Mutex<Vec<ClientWindow>>,
}

impl SimulatedScope {
    pub fn with_window(url: &str) -> Self {
        let scope = Self::default();
        scope.windows.lock().push(ClientWindow {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.to_string(),
            focused: true,
        });
        scope
    }
}

#[async_trait]
impl WorkerScope for SimulatedScope {
    async fn client_windows(&self) -> Result<Vec<ClientWindow>> {
        Ok(self.windows.lock().clone())
    }

    async fn focus(&self, client_id: &str) -> Result<()> {
        let mut windows = self.windows.lock();
        for window in windows.iter_mut() {
            window.focused = window.id == client_id;
        }
        Ok(())
    }

    async fn open_window(&self, url: &str) -> Result<Option<ClientWindow>> {
        let window = ClientWindow {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.to_string(),
            focused: true,
        };
        let mut windows = self.windows.lock();
        for existing in windows.iter_mut() {
            existing.focused = false;
        }
        windows.push(window.clone());
        info!(client = %window.id, url, "window opened");
        Ok(Some(window))
    }

    async fn post_message(&self, client_id: &str, message: Value) -> Result<()> {
        println!(
            "{}",
            serde_json::json!({ "postMessage": { "client": client_id, "message": message } })
        );
        Ok(())
    }

    async fn skip_waiting(&self) -> Result<()> {
        Ok(())
    }

    async fn claim_clients(&self) -> Result<()> {
        Ok(())
    }
}
