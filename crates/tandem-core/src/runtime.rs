use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::{CollabApi, HttpApi, PushApi};
use crate::bus::{BusConnector, EventBusClient, RoomKind, Subscription, WsConnector};
use crate::config::CoreConfig;
use crate::error::{CoreError, ErrorClass, Result};
use crate::events::{CoreEvent, Notice};
use crate::models::{Identity, NotificationId};
use crate::push::{PushPlatform, PushSubscriptionManager};
use crate::session::{SessionGate, SessionTransition};
use crate::stats::SharedEventStats;
use crate::store::{CollaborationStore, LiveUpdate};
use crate::worker::{MessageEnvelope, WorkerMessage};

/// Foreground wiring: store, bus and session gate, with bus events routed
/// into the store.
///
/// Must be created inside a tokio runtime.
pub struct CoreRuntime {
    config: CoreConfig,
    store: Arc<CollaborationStore>,
    bus: EventBusClient,
    gate: SessionGate,
    stats: SharedEventStats,
    _live: Subscription,
    status_task: JoinHandle<()>,
}

impl CoreRuntime {
    pub fn new(
        config: CoreConfig,
        api: Arc<dyn CollabApi>,
        connector: Arc<dyn BusConnector>,
    ) -> Self {
        let stats = SharedEventStats::new();
        let store = Arc::new(CollaborationStore::from_config(api, &config).with_stats(stats.clone()));
        let bus = EventBusClient::with_stats(connector, config.reconnect.clone(), stats.clone());
        let gate = SessionGate::new(store.clone(), bus.clone());

        let live = bus.on_any({
            let store = store.clone();
            move |delivery| {
                for update in LiveUpdate::from_bus_event(&delivery.event, Utc::now()) {
                    store.apply_live(&delivery.identity, update);
                }
            }
        });

        let status_task = tokio::spawn(forward_connection_status(
            bus.clone(),
            store.event_sender(),
        ));

        Self {
            config,
            store,
            bus,
            gate,
            stats,
            _live: live,
            status_task,
        }
    }

    /// HTTP collaborator and WebSocket bus built from `config`.
    pub fn from_config(config: CoreConfig) -> Result<Self> {
        config.validate()?;
        let api = Arc::new(HttpApi::new(
            config.api_base_url.clone(),
            config.auth_token.clone(),
        ));
        let connector = Arc::new(WsConnector::new(
            config.bus_url.clone(),
            config.auth_token.clone(),
        ));
        Ok(Self::new(config, api, connector))
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<CollaborationStore> {
        &self.store
    }

    pub fn bus(&self) -> &EventBusClient {
        &self.bus
    }

    pub fn session(&self) -> &SessionGate {
        &self.gate
    }

    pub fn stats(&self) -> SharedEventStats {
        self.stats.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.store.subscribe()
    }

    pub fn login(&self, identity: Identity) -> SessionTransition {
        self.gate.login(identity)
    }

    pub fn logout(&self) -> SessionTransition {
        self.gate.logout()
    }

    /// Push manager reporting through this runtime's event stream.
    pub fn push_manager(
        &self,
        platform: Arc<dyn PushPlatform>,
        api: Arc<dyn PushApi>,
    ) -> PushSubscriptionManager {
        PushSubscriptionManager::new(
            platform,
            api,
            self.config.vapid_public_key.clone(),
            Some(self.store.event_sender()),
        )
    }

    // ===== Entity rooms =====

    pub fn view_task(&self, id: &str) -> RoomGuard {
        RoomGuard::join(&self.bus, RoomKind::Task, id)
    }

    pub fn view_list(&self, id: &str) -> RoomGuard {
        RoomGuard::join(&self.bus, RoomKind::List, id)
    }

    pub fn view_event(&self, id: &str) -> RoomGuard {
        RoomGuard::join(&self.bus, RoomKind::Event, id)
    }

    /// A message the background worker posted to this page.
    /// Returns the notification marked read, if any.
    pub async fn handle_worker_message(&self, value: Value) -> Result<Option<NotificationId>> {
        let envelope = MessageEnvelope::from_value(value)?;
        match envelope.message {
            WorkerMessage::NotificationClick { data, url, .. } => {
                debug!(url = url.as_deref().unwrap_or(""), "notification click relayed");
                match data {
                    Some(data) => self.store.reconcile_notification_click(&data).await,
                    None => Ok(None),
                }
            }
            WorkerMessage::SkipWaiting => {
                debug!("SKIP_WAITING is addressed to the worker; ignoring");
                Ok(None)
            }
        }
    }

    pub fn shutdown(&self) {
        self.bus.disconnect();
        self.status_task.abort();
    }
}

impl Drop for CoreRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Publishes connection changes; an unexpected loss also raises a transport notice.
async fn forward_connection_status(bus: EventBusClient, events: broadcast::Sender<CoreEvent>) {
    let mut rx = bus.status_receiver();
    let mut was_connected = *rx.borrow_and_update();
    let mut lost = false;
    while rx.changed().await.is_ok() {
        let connected = *rx.borrow_and_update();
        if connected == was_connected {
            continue;
        }
        let _ = events.send(CoreEvent::Connection { connected });
        // A connection that is still wanted was lost, not closed
        if was_connected && !connected && bus.identity().is_some() {
            warn!("event bus connection lost; reconnecting");
            let error = CoreError::transport("connection to the event bus was lost");
            let _ = events.send(CoreEvent::Notice(Notice::from_error(&error)));
            lost = true;
        } else if connected && lost {
            let notice = Notice::info(ErrorClass::Transport, "reconnected to the event bus");
            let _ = events.send(CoreEvent::Notice(notice));
            lost = false;
        } else if !connected {
            lost = false;
        }
        was_connected = connected;
    }
}

/// Membership in an entity room for as long as the guard lives.
#[must_use = "the room is left when the guard is dropped"]
pub struct RoomGuard {
    bus: EventBusClient,
    kind: RoomKind,
    id: String,
}

impl RoomGuard {
    fn join(bus: &EventBusClient, kind: RoomKind, id: &str) -> Self {
        bus.join_room(kind, id);
        Self {
            bus: bus.clone(),
            kind,
            id: id.to_string(),
        }
    }
}

impl Drop for RoomGuard {
    fn drop(&mut self) {
        self.bus.leave_room(self.kind, &self.id);
    }
}
