use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::platform::{decode_application_server_key, PermissionState, PushPlatform};
use crate::api::PushApi;
use crate::error::{CoreError, Escalation, FailureTracker, Result};
use crate::events::{CoreEvent, Notice};

/// Subscription lifecycle.
///
/// `Unsupported` is terminal. `PermissionDenied` is terminal until the user
/// resets the permission in the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PushState {
    Unsupported,
    NotSubscribed,
    PermissionPending,
    PermissionDenied,
    Subscribed,
    Unsubscribing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushStatus {
    /// Whether this browser holds a subscription right now.
    pub subscribed: bool,
    /// Subscriptions the server holds for this user, across devices.
    pub subscription_count: usize,
    pub server_configured: bool,
}

type SubscribeFuture = Shared<BoxFuture<'static, Result<PushState>>>;

struct Inner {
    platform: Arc<dyn PushPlatform>,
    api: Arc<dyn PushApi>,
    vapid_key: Option<String>,
    events: Option<broadcast::Sender<CoreEvent>>,
    state: Mutex<PushState>,
    in_flight: Mutex<Option<SubscribeFuture>>,
    failures: Mutex<FailureTracker>,
}

/// Keeps the browser's push subscription and the server's record in step.
#[derive(Clone)]
pub struct PushSubscriptionManager {
    inner: Arc<Inner>,
}

impl PushSubscriptionManager {
    /// `vapid_key` overrides the key served by the API when set.
    pub fn new(
        platform: Arc<dyn PushPlatform>,
        api: Arc<dyn PushApi>,
        vapid_key: Option<String>,
        events: Option<broadcast::Sender<CoreEvent>>,
    ) -> Self {
        let initial = if !platform.is_supported() {
            PushState::Unsupported
        } else if platform.permission() == PermissionState::Denied {
            PushState::PermissionDenied
        } else {
            PushState::NotSubscribed
        };
        Self {
            inner: Arc::new(Inner {
                platform,
                api,
                vapid_key: vapid_key.filter(|k| !k.trim().is_empty()),
                events,
                state: Mutex::new(initial),
                in_flight: Mutex::new(None),
                failures: Mutex::new(FailureTracker::new()),
            }),
        }
    }

    /// Last known state. Use [`refresh_state`](Self::refresh_state) to re-read the browser.
    pub fn state(&self) -> PushState {
        *self.inner.state.lock()
    }

    /// Re-derive the state from the browser, unless a subscribe is running.
    pub async fn refresh_state(&self) -> PushState {
        if self.inner.in_flight.lock().is_some() {
            return self.state();
        }
        let state = self.inner.derive_state().await;
        self.inner.set_state(state);
        state
    }

    /// Request permission if needed, create the browser subscription and
    /// register it with the server.
    ///
    /// Concurrent calls share one attempt: a second caller awaits the first
    /// caller's result instead of prompting again.
    pub async fn subscribe(&self) -> Result<PushState> {
        let attempt = {
            let mut slot = self.inner.in_flight.lock();
            match slot.as_ref() {
                Some(existing) => {
                    debug!("joining in-flight push subscribe");
                    existing.clone()
                }
                None => {
                    let inner = self.inner.clone();
                    let attempt = async move {
                        let result = inner.run_subscribe().await;
                        *inner.in_flight.lock() = None;
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = Some(attempt.clone());
                    attempt
                }
            }
        };
        attempt.await
    }

    /// Remove the browser subscription and the server record. Both steps are
    /// always attempted; the resulting state is read back from the browser.
    ///
    /// A subscribe still running is awaited first, so its server record is
    /// removed along with the browser side.
    pub async fn unsubscribe(&self) -> Result<PushState> {
        let inner = &self.inner;
        if !inner.platform.is_supported() {
            inner.set_state(PushState::Unsupported);
            return Err(CoreError::Unsupported);
        }
        let pending = inner.in_flight.lock().clone();
        if let Some(pending) = pending {
            debug!("waiting for in-flight push subscribe before unsubscribing");
            if let Err(e) = pending.await {
                debug!(error = %e, "in-flight subscribe failed; unsubscribing anyway");
            }
        }
        inner.set_state(PushState::Unsubscribing);

        let existing = match inner.platform.current_subscription().await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(error = %e, "could not read browser subscription before unsubscribe");
                None
            }
        };
        let browser = inner.platform.unsubscribe().await;
        let server = match &existing {
            Some(record) => inner.api.unsubscribe(&record.endpoint).await,
            None => Ok(()),
        };

        let state = inner.derive_state().await;
        inner.set_state(state);

        match (browser, server) {
            (Ok(removed), Ok(())) => {
                inner.failures.lock().record_success("unsubscribe");
                info!(removed, "push unsubscribed");
                Ok(state)
            }
            (Err(e), _) | (_, Err(e)) => {
                let err = CoreError::consistency(format!("unsubscribe failed: {}", e));
                inner.report("unsubscribe", &err);
                Err(err)
            }
        }
    }

    /// Browser subscription state plus the server's view.
    /// A server without push configured is reported, not treated as an error.
    pub async fn get_status(&self) -> Result<PushStatus> {
        let state = self.refresh_state().await;
        let server = self.inner.api.status().await?;
        Ok(PushStatus {
            subscribed: state == PushState::Subscribed,
            subscription_count: server.subscription_count,
            server_configured: server.configured,
        })
    }

    /// Ask the server to push a test notification to this user's subscriptions.
    pub async fn send_test(&self, message: &str) -> Result<()> {
        self.inner.api.send_test(message).await
    }
}

impl Inner {
    fn set_state(&self, state: PushState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!(from = ?*current, to = ?state, "push state");
            *current = state;
        }
    }

    /// Browser-derived state. The browser, not the cached flag, is the source of truth.
    async fn derive_state(&self) -> PushState {
        if !self.platform.is_supported() {
            return PushState::Unsupported;
        }
        if self.platform.permission() == PermissionState::Denied {
            return PushState::PermissionDenied;
        }
        match self.platform.current_subscription().await {
            Ok(Some(_)) => PushState::Subscribed,
            Ok(None) => PushState::NotSubscribed,
            Err(e) => {
                warn!(error = %e, "could not read browser subscription");
                PushState::NotSubscribed
            }
        }
    }

    fn report(&self, operation: &str, error: &CoreError) {
        let escalation = self.failures.lock().record_failure(operation, error);
        warn!(operation, error = %error, "push operation failed");
        if escalation == Escalation::Visible {
            if let Some(events) = &self.events {
                let _ = events.send(CoreEvent::Notice(Notice::from_error(error)));
            }
        }
    }

    async fn run_subscribe(&self) -> Result<PushState> {
        match self.try_subscribe().await {
            Ok(state) => {
                self.failures.lock().record_success("subscribe");
                self.set_state(state);
                Ok(state)
            }
            Err(e) => {
                let state = self.derive_state().await;
                self.set_state(state);
                self.report("subscribe", &e);
                Err(e)
            }
        }
    }

    async fn try_subscribe(&self) -> Result<PushState> {
        if !self.platform.is_supported() {
            return Err(CoreError::Unsupported);
        }
        // Re-prompting a denied permission is a platform no-op
        if self.platform.permission() == PermissionState::Denied {
            return Err(CoreError::PermissionDenied);
        }

        // Already subscribed in this browser: make sure the server has it
        if let Some(existing) = self.platform.current_subscription().await? {
            self.api.subscribe(&existing).await?;
            info!(endpoint = %existing.endpoint, "re-registered existing push subscription");
            return Ok(PushState::Subscribed);
        }

        self.set_state(PushState::PermissionPending);
        let permission = match self.platform.permission() {
            PermissionState::Granted => PermissionState::Granted,
            _ => self.platform.request_permission().await?,
        };
        match permission {
            PermissionState::Granted => {}
            PermissionState::Denied => return Err(CoreError::PermissionDenied),
            PermissionState::Default => return Err(CoreError::PermissionDismissed),
        }

        let key = match &self.vapid_key {
            Some(key) => key.clone(),
            None => self.api.vapid_public_key().await?,
        };
        let key = decode_application_server_key(&key)?;
        let record = self.platform.subscribe(&key).await?;

        if let Err(e) = self.api.subscribe(&record).await {
            // No server record means no pushes; drop the browser side too
            if let Err(teardown) = self.platform.unsubscribe().await {
                warn!(error = %teardown, "failed to tear down orphaned browser subscription");
            }
            return Err(CoreError::consistency(format!(
                "server rejected subscription: {}",
                e
            )));
        }

        info!(endpoint = %record.endpoint, "push subscribed");
        Ok(PushState::Subscribed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::models::ServerPushStatus;
    use crate::testing::{FakeApi, FakePushPlatform};

    fn manager(platform: Arc<FakePushPlatform>, api: Arc<FakeApi>) -> PushSubscriptionManager {
        PushSubscriptionManager::new(platform, api, None, None)
    }

    #[tokio::test]
    async fn test_concurrent_subscribe_issues_one_prompt_and_one_post() {
        let platform = Arc::new(FakePushPlatform::new(PermissionState::Default));
        let api = Arc::new(FakeApi::new());
        let gate = platform.hold_prompt();
        let m = manager(platform.clone(), api.clone());

        let (a, b, _) = tokio::join!(m.subscribe(), m.subscribe(), async {
            tokio::task::yield_now().await;
            gate.release();
        });

        assert_eq!(a.unwrap(), PushState::Subscribed);
        assert_eq!(b.unwrap(), PushState::Subscribed);
        assert_eq!(platform.prompt_count(), 1);
        assert_eq!(api.push_subscribe_posts().len(), 1);
        assert_eq!(m.state(), PushState::Subscribed);
    }

    #[tokio::test]
    async fn test_denied_permission_is_terminal_without_reprompt() {
        let platform = Arc::new(FakePushPlatform::new(PermissionState::Default));
        platform.answer_prompt_with(PermissionState::Denied);
        let api = Arc::new(FakeApi::new());
        let m = manager(platform.clone(), api.clone());

        assert_eq!(m.subscribe().await, Err(CoreError::PermissionDenied));
        assert_eq!(m.state(), PushState::PermissionDenied);
        assert_eq!(m.subscribe().await, Err(CoreError::PermissionDenied));
        assert_eq!(platform.prompt_count(), 1);
        assert!(api.push_subscribe_posts().is_empty());
    }

    #[tokio::test]
    async fn test_dismissed_prompt_returns_to_not_subscribed() {
        let platform = Arc::new(FakePushPlatform::new(PermissionState::Default));
        platform.answer_prompt_with(PermissionState::Default);
        let m = manager(platform, Arc::new(FakeApi::new()));

        assert_eq!(m.subscribe().await, Err(CoreError::PermissionDismissed));
        assert_eq!(m.state(), PushState::NotSubscribed);
    }

    #[tokio::test]
    async fn test_rejected_post_tears_down_browser_subscription() {
        let platform = Arc::new(FakePushPlatform::new(PermissionState::Granted));
        let api = Arc::new(FakeApi::new());
        api.fail_push_subscribe(CoreError::Http {
            status: 500,
            body: "db down".to_string(),
        });
        let m = manager(platform.clone(), api);

        let err = m.subscribe().await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Consistency);
        assert!(platform.subscription().is_none());
        assert_eq!(m.state(), PushState::NotSubscribed);
    }

    #[tokio::test]
    async fn test_existing_browser_subscription_is_reposted() {
        let platform = Arc::new(FakePushPlatform::new(PermissionState::Granted));
        platform.set_subscription(Some(FakePushPlatform::record("https://push/existing")));
        let api = Arc::new(FakeApi::new());
        let m = manager(platform.clone(), api.clone());

        assert_eq!(m.subscribe().await.unwrap(), PushState::Subscribed);
        assert_eq!(platform.prompt_count(), 0);
        assert_eq!(api.push_subscribe_posts()[0].endpoint, "https://push/existing");
    }

    #[tokio::test]
    async fn test_unsubscribe_state_follows_browser_when_server_fails() {
        let platform = Arc::new(FakePushPlatform::new(PermissionState::Granted));
        let api = Arc::new(FakeApi::new());
        let m = manager(platform.clone(), api.clone());
        m.subscribe().await.unwrap();

        api.fail_push_unsubscribe(CoreError::transport("offline"));
        assert!(m.unsubscribe().await.is_err());
        // Browser side went away, so the state says so
        assert_eq!(m.state(), PushState::NotSubscribed);

        platform.fail_unsubscribe(true);
        platform.set_subscription(Some(FakePushPlatform::record("https://push/stuck")));
        api.clear_failures();
        assert!(m.unsubscribe().await.is_err());
        assert_eq!(m.state(), PushState::Subscribed);
        assert_eq!(api.push_unsubscribed(), vec!["https://push/stuck".to_string()]);
    }

    #[tokio::test]
    async fn test_unsubscribe_waits_for_running_subscribe() {
        let platform = Arc::new(FakePushPlatform::new(PermissionState::Default));
        let api = Arc::new(FakeApi::new());
        let gate = platform.hold_prompt();
        let m = manager(platform.clone(), api.clone());

        let (subscribed, unsubscribed, _) = tokio::join!(m.subscribe(), m.unsubscribe(), async {
            tokio::task::yield_now().await;
            gate.release();
        });

        assert_eq!(subscribed.unwrap(), PushState::Subscribed);
        assert_eq!(unsubscribed.unwrap(), PushState::NotSubscribed);
        assert!(platform.subscription().is_none());
        assert_eq!(api.push_subscribe_posts().len(), 1);
        assert_eq!(
            api.push_unsubscribed(),
            vec![api.push_subscribe_posts()[0].endpoint.clone()]
        );
        assert_eq!(m.state(), PushState::NotSubscribed);
    }

    #[tokio::test]
    async fn test_status_distinguishes_unconfigured_server() {
        let platform = Arc::new(FakePushPlatform::new(PermissionState::Granted));
        let api = Arc::new(FakeApi::new());
        api.set_push_status(ServerPushStatus {
            configured: false,
            subscribed: false,
            subscription_count: 0,
        });
        let m = manager(platform, api);

        let status = m.get_status().await.unwrap();
        assert!(!status.server_configured);
        assert!(!status.subscribed);
    }

    #[tokio::test]
    async fn test_status_rederives_from_browser() {
        let platform = Arc::new(FakePushPlatform::new(PermissionState::Granted));
        let api = Arc::new(FakeApi::new());
        let m = manager(platform.clone(), api);
        m.subscribe().await.unwrap();

        // Subscription removed behind the manager's back
        platform.set_subscription(None);
        assert!(!m.get_status().await.unwrap().subscribed);
        assert_eq!(m.state(), PushState::NotSubscribed);
    }

    #[tokio::test]
    async fn test_unsupported_platform_rejects_operations() {
        let platform = Arc::new(FakePushPlatform::unsupported());
        let m = manager(platform, Arc::new(FakeApi::new()));
        assert_eq!(m.state(), PushState::Unsupported);
        assert_eq!(m.subscribe().await, Err(CoreError::Unsupported));
        assert_eq!(m.unsubscribe().await, Err(CoreError::Unsupported));
    }
}
