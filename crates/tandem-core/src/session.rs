//! Session gate.
//!
//! The only code path allowed to switch identity. Each switch tears down the
//! bus connection and its rooms, resets the store atomically, then starts the
//! new identity's fetch and connection.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::bus::EventBusClient;
use crate::error::Result;
use crate::models::Identity;
use crate::store::{CollaborationStore, RefreshOutcome};

/// What an identity change did.
#[derive(Debug)]
pub struct SessionTransition {
    pub previous: Option<Identity>,
    pub current: Option<Identity>,
    pub changed: bool,
    /// The new identity's bulk fetch. `None` when logged out or unchanged.
    pub fetch: Option<JoinHandle<Result<RefreshOutcome>>>,
}

pub struct SessionGate {
    store: Arc<CollaborationStore>,
    bus: EventBusClient,
    // Serializes transitions
    current: Mutex<Option<Identity>>,
}

impl SessionGate {
    pub fn new(store: Arc<CollaborationStore>, bus: EventBusClient) -> Self {
        Self {
            store,
            bus,
            current: Mutex::new(None),
        }
    }

    pub fn identity(&self) -> Option<Identity> {
        self.current.lock().clone()
    }

    /// Apply an authentication change. Re-reporting the current identity is a no-op.
    pub fn on_identity_change(&self, identity: Option<Identity>) -> SessionTransition {
        let mut current = self.current.lock();
        if *current == identity {
            return SessionTransition {
                previous: current.clone(),
                current: identity,
                changed: false,
                fetch: None,
            };
        }

        let previous = std::mem::replace(&mut *current, identity.clone());
        info!(
            from = previous.as_ref().map(Identity::as_str).unwrap_or("<none>"),
            to = identity.as_ref().map(Identity::as_str).unwrap_or("<none>"),
            "identity change"
        );

        self.bus.disconnect();
        self.bus.reset_rooms();
        self.store.reset(identity.clone());

        let fetch = identity.as_ref().map(|id| {
            let store = self.store.clone();
            let fetch = tokio::spawn(async move { store.bulk_fetch().await });
            self.bus.connect(id);
            fetch
        });

        SessionTransition {
            previous,
            current: identity,
            changed: true,
            fetch,
        }
    }

    pub fn login(&self, identity: Identity) -> SessionTransition {
        self.on_identity_change(Some(identity))
    }

    pub fn logout(&self) -> SessionTransition {
        self.on_identity_change(None)
    }
}
