use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::events::{BusEvent, BusEventKind, Frame};
use super::rooms::{Room, RoomKind, RoomRegistry};
use super::transport::{BusConnector, BusLink};
use crate::config::ReconnectPolicy;
use crate::models::Identity;
use crate::stats::SharedEventStats;

/// An event together with the identity whose connection received it.
#[derive(Debug, Clone)]
pub struct BusDelivery {
    pub identity: Identity,
    pub event: BusEvent,
}

type Handler = Arc<dyn Fn(&BusDelivery) + Send + Sync>;

struct Registration {
    id: u64,
    /// `None` receives every event.
    kind: Option<BusEventKind>,
    handler: Handler,
}

#[derive(Default)]
struct Handlers {
    next_id: u64,
    entries: Vec<Registration>,
}

struct Connection {
    identity: Identity,
    epoch: u64,
    /// Present while a link is open.
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct ConnState {
    current: Option<Connection>,
    epoch: u64,
}

struct Inner {
    connector: Arc<dyn BusConnector>,
    policy: ReconnectPolicy,
    handlers: Mutex<Handlers>,
    // Lock order: rooms, then conn
    rooms: Mutex<RoomRegistry>,
    conn: Mutex<ConnState>,
    status: watch::Sender<bool>,
    stats: SharedEventStats,
}

/// Single logical connection to the real-time channel.
///
/// Only the session gate calls [`connect`](Self::connect) and
/// [`disconnect`](Self::disconnect); everything else adds rooms and handlers.
#[derive(Clone)]
pub struct EventBusClient {
    inner: Arc<Inner>,
}

impl EventBusClient {
    pub fn new(connector: Arc<dyn BusConnector>, policy: ReconnectPolicy) -> Self {
        Self::with_stats(connector, policy, SharedEventStats::new())
    }

    pub fn with_stats(
        connector: Arc<dyn BusConnector>,
        policy: ReconnectPolicy,
        stats: SharedEventStats,
    ) -> Self {
        let (status, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                connector,
                policy,
                handlers: Mutex::new(Handlers::default()),
                rooms: Mutex::new(RoomRegistry::new()),
                conn: Mutex::new(ConnState::default()),
                status,
                stats,
            }),
        }
    }

    pub fn stats(&self) -> SharedEventStats {
        self.inner.stats.clone()
    }

    // ===== Connection =====

    /// Start (or keep) a connection for `identity`. Returns immediately; the
    /// user room and every registered room are joined once the link is up.
    pub fn connect(&self, identity: &Identity) {
        {
            let conn = self.inner.conn.lock();
            if let Some(current) = &conn.current {
                if &current.identity == identity {
                    debug!(identity = %identity, "bus already connected");
                    return;
                }
            }
        }
        // A different identity owns the socket
        self.disconnect();

        let mut conn = self.inner.conn.lock();
        conn.epoch += 1;
        let epoch = conn.epoch;
        let task = tokio::spawn(run_connection(
            self.inner.clone(),
            identity.clone(),
            epoch,
        ));
        conn.current = Some(Connection {
            identity: identity.clone(),
            epoch,
            outbound: None,
            task,
        });
        info!(identity = %identity, "bus connecting");
    }

    /// Leave every room and close the socket. Safe to call repeatedly.
    ///
    /// The room registry is kept so a later `connect` rejoins the same rooms.
    pub fn disconnect(&self) {
        let rooms = self.inner.rooms.lock();
        let mut conn = self.inner.conn.lock();
        let Some(connection) = conn.current.take() else {
            return;
        };
        if let Some(outbound) = &connection.outbound {
            for room in rooms.rooms() {
                let _ = outbound.send(room.leave_frame());
            }
            let user_room = Room::new(RoomKind::User, connection.identity.as_str());
            let _ = outbound.send(user_room.leave_frame());
        }
        connection.task.abort();
        self.inner.status.send_replace(false);
        info!(identity = %connection.identity, "bus disconnected");
    }

    /// Forget all tracked rooms. Used on identity change.
    pub fn reset_rooms(&self) {
        let mut rooms = self.inner.rooms.lock();
        let conn = self.inner.conn.lock();
        if let Some(outbound) = conn.current.as_ref().and_then(|c| c.outbound.as_ref()) {
            for room in rooms.rooms() {
                let _ = outbound.send(room.leave_frame());
            }
        }
        rooms.clear();
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.status.borrow()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.inner
            .conn
            .lock()
            .current
            .as_ref()
            .map(|c| c.identity.clone())
    }

    pub fn status_receiver(&self) -> watch::Receiver<bool> {
        self.inner.status.subscribe()
    }

    /// Resolves once a link is up.
    pub async fn wait_connected(&self) {
        let mut rx = self.inner.status.subscribe();
        let _ = rx.wait_for(|connected| *connected).await;
    }

    // ===== Rooms =====

    /// Track a room and join it now if connected, otherwise on the next connect.
    pub fn join_room(&self, kind: RoomKind, id: &str) -> bool {
        let room = Room::new(kind, id);
        let mut rooms = self.inner.rooms.lock();
        if !rooms.insert(room.clone()) {
            return false;
        }
        let conn = self.inner.conn.lock();
        if let Some(outbound) = conn.current.as_ref().and_then(|c| c.outbound.as_ref()) {
            let _ = outbound.send(room.join_frame());
        }
        true
    }

    pub fn leave_room(&self, kind: RoomKind, id: &str) -> bool {
        let room = Room::new(kind, id);
        let mut rooms = self.inner.rooms.lock();
        if !rooms.remove(&room) {
            return false;
        }
        let conn = self.inner.conn.lock();
        if let Some(outbound) = conn.current.as_ref().and_then(|c| c.outbound.as_ref()) {
            let _ = outbound.send(room.leave_frame());
        }
        true
    }

    pub fn rooms(&self) -> Vec<Room> {
        self.inner.rooms.lock().rooms().to_vec()
    }

    // ===== Handlers =====

    /// Register a handler for one event kind.
    pub fn on<F>(&self, kind: BusEventKind, handler: F) -> Subscription
    where
        F: Fn(&BusDelivery) + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(handler))
    }

    /// Register a handler for every event kind.
    pub fn on_any<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&BusDelivery) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    pub fn off(&self, subscription: Subscription) {
        subscription.unsubscribe();
    }

    fn register(&self, kind: Option<BusEventKind>, handler: Handler) -> Subscription {
        let mut handlers = self.inner.handlers.lock();
        handlers.next_id += 1;
        let id = handlers.next_id;
        handlers.entries.push(Registration { id, kind, handler });
        Subscription {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }

    pub fn handler_count(&self) -> usize {
        self.inner.handlers.lock().entries.len()
    }

    /// Deliver an already-decoded event as if it arrived for `identity`.
    pub fn deliver(&self, identity: &Identity, event: BusEvent) {
        self.inner.deliver(BusDelivery {
            identity: identity.clone(),
            event,
        });
    }
}

impl Inner {
    /// Record the open link and replay room joins. False if this connection was superseded.
    fn attach(&self, epoch: u64, identity: &Identity, outbound: mpsc::UnboundedSender<Frame>) -> bool {
        let rooms = self.rooms.lock();
        let mut conn = self.conn.lock();
        let Some(current) = conn.current.as_mut().filter(|c| c.epoch == epoch) else {
            return false;
        };
        let _ = outbound.send(Room::new(RoomKind::User, identity.as_str()).join_frame());
        for room in rooms.rooms() {
            let _ = outbound.send(room.join_frame());
        }
        current.outbound = Some(outbound);
        self.status.send_replace(true);
        info!(identity = %identity, rooms = rooms.len(), "bus connected");
        true
    }

    fn detach(&self, epoch: u64) {
        let mut conn = self.conn.lock();
        if let Some(current) = conn.current.as_mut().filter(|c| c.epoch == epoch) {
            current.outbound = None;
            self.status.send_replace(false);
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.conn
            .lock()
            .current
            .as_ref()
            .is_some_and(|c| c.epoch == epoch)
    }

    fn dispatch(&self, identity: &Identity, frame: Frame) {
        self.stats.record(&frame.event);
        match BusEvent::decode(&frame.event, frame.data) {
            Ok(Some(event)) => self.deliver(BusDelivery {
                identity: identity.clone(),
                event,
            }),
            Ok(None) => debug!(event = %frame.event, "ignoring unhandled bus event"),
            Err(e) => {
                self.stats.record_malformed();
                warn!(event = %frame.event, error = %e, "dropping malformed bus event");
            }
        }
    }

    fn deliver(&self, delivery: BusDelivery) {
        let kind = delivery.event.kind();
        // Call handlers outside the lock so they may (un)register
        let matching: Vec<Handler> = self
            .handlers
            .lock()
            .entries
            .iter()
            .filter(|r| r.kind.map_or(true, |k| k == kind))
            .map(|r| r.handler.clone())
            .collect();
        for handler in matching {
            handler(&delivery);
        }
    }
}

async fn run_connection(inner: Arc<Inner>, identity: Identity, epoch: u64) {
    let mut attempt: u32 = 0;
    loop {
        match inner.connector.open(&identity).await {
            Ok(BusLink {
                outbound,
                mut inbound,
            }) => {
                if !inner.attach(epoch, &identity, outbound) {
                    return;
                }
                attempt = 0;
                while let Some(frame) = inbound.recv().await {
                    inner.dispatch(&identity, frame);
                }
                inner.detach(epoch);
                warn!(identity = %identity, "bus connection lost");
            }
            Err(e) => {
                warn!(identity = %identity, attempt, error = %e, "bus connect failed");
            }
        }

        if !inner.is_current(epoch) {
            return;
        }
        let delay = inner.policy.delay_for_attempt(attempt);
        attempt = attempt.saturating_add(1);
        debug!(delay_ms = delay.as_millis() as u64, "bus reconnecting");
        tokio::time::sleep(delay).await;
    }
}

/// Handle for a registered event handler. Dropping it unregisters the handler.
#[must_use = "dropping a Subscription unregisters its handler"]
pub struct Subscription {
    inner: Weak<Inner>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handlers.lock().entries.retain(|r| r.id != self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
