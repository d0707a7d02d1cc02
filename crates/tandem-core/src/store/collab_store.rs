use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::collection::{Collection, CollectionOrder};
use super::notifications::{IngestSource, NotificationEngine};
use super::{CollectionKind, LiveUpdate};
use crate::api::{fetch_snapshot, BulkSnapshot, CollabApi};
use crate::config::CoreConfig;
use crate::constants::{CORE_EVENT_CAPACITY, NOTIFICATION_CAP, NOTIFICATION_SURFACED};
use crate::error::{CoreError, Escalation, FailureTracker, Result};
use crate::events::{CoreEvent, Notice};
use crate::models::{
    CalendarEvent, Friendship, FriendshipStatus, Identity, Notification, NotificationId,
    NotificationWire, PushData, SharedList, SharedListItem, Task,
};
use crate::stats::SharedEventStats;

/// Proof that a fetch was issued for a given identity generation.
/// Results carrying a stale ticket are discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub identity: Identity,
    pub generation: u64,
    pub kinds: Vec<CollectionKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Applied,
    /// A fetch covering this collection is already running; nothing was issued.
    AlreadyInFlight,
    /// The identity changed while the fetch was running; the result was dropped.
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveOutcome {
    Applied,
    Buffered,
    /// Tagged with an identity that is no longer current.
    Discarded,
}

/// Everything behind the store lock.
struct StoreState {
    identity: Option<Identity>,
    /// Bumped on every reset; tags in-flight fetches.
    generation: u64,
    friends: Collection<Friendship>,
    tasks: Collection<Task>,
    lists: Collection<SharedList>,
    events: Collection<CalendarEvent>,
    notifications: NotificationEngine,
    in_flight: HashMap<CollectionKind, u64>,
    buffered: HashMap<CollectionKind, Vec<LiveUpdate>>,
    failures: FailureTracker,
}

impl StoreState {
    fn new(cap: usize, surfaced: usize) -> Self {
        Self {
            identity: None,
            generation: 0,
            friends: Collection::new(CollectionOrder::Arrival),
            tasks: Collection::new(CollectionOrder::CreatedDesc),
            lists: Collection::new(CollectionOrder::CreatedDesc),
            events: Collection::new(CollectionOrder::CreatedDesc),
            notifications: NotificationEngine::new(cap, surfaced),
            in_flight: HashMap::new(),
            buffered: HashMap::new(),
            failures: FailureTracker::new(),
        }
    }

    fn clear_caches(&mut self) {
        self.generation += 1;
        self.friends.clear();
        self.tasks.clear();
        self.lists.clear();
        self.events.clear();
        self.in_flight.clear();
        self.buffered.clear();
    }

    fn apply(&mut self, update: LiveUpdate) {
        match update {
            LiveUpdate::Task(task) => {
                self.tasks.upsert(task);
            }
            LiveUpdate::TaskRemoved(id) => {
                self.tasks.remove(&id);
            }
            LiveUpdate::List(list) => {
                self.lists.upsert(list);
            }
            LiveUpdate::ListItem(item) => match self.lists.get_mut(&item.list_id) {
                Some(list) => list.upsert_item(item),
                None => {
                    // Reconciled by the next fetch of lists
                    debug!(list_id = %item.list_id, "item for unknown list dropped");
                }
            },
            LiveUpdate::ListItemRemoved { list_id, item_id } => {
                if let Some(list) = self.lists.get_mut(&list_id) {
                    list.remove_item(&item_id);
                }
            }
            LiveUpdate::Event(event) => {
                self.events.upsert(event);
            }
            LiveUpdate::EventRemoved(id) => {
                self.events.remove(&id);
            }
            LiveUpdate::Friendship(friendship) => {
                self.friends.upsert(friendship);
            }
            LiveUpdate::FriendshipRemoved(id) => {
                self.friends.remove(&id);
            }
            LiveUpdate::Notification(wire) => {
                self.notifications
                    .ingest(wire, IngestSource::Live, Utc::now());
            }
        }
    }

    fn apply_snapshot(&mut self, kind: CollectionKind, snapshot: &mut BulkSnapshot) {
        match kind {
            CollectionKind::Friends => {
                if let Some(friends) = snapshot.friends.take() {
                    self.friends.replace_all(friends);
                }
            }
            CollectionKind::Tasks => {
                if let Some(tasks) = snapshot.tasks.take() {
                    self.tasks.replace_all(tasks);
                }
            }
            CollectionKind::Lists => {
                if let Some(lists) = snapshot.lists.take() {
                    self.lists.replace_all(lists);
                }
            }
            CollectionKind::Events => {
                if let Some(events) = snapshot.events.take() {
                    self.events.replace_all(events);
                }
            }
            CollectionKind::Notifications => {
                if let Some(notifications) = snapshot.notifications.take() {
                    self.notifications
                        .replace_server_entries(notifications, Utc::now());
                }
            }
        }
    }

    /// Replay live updates held back while `kind` was being fetched, in arrival order.
    fn replay_buffered(&mut self, kind: CollectionKind) -> usize {
        let pending = self.buffered.remove(&kind).unwrap_or_default();
        let count = pending.len();
        for update in pending {
            self.apply(update);
        }
        count
    }
}

/// In-memory cache of the current identity's collaborative data.
///
/// One instance lives for a whole session-gate lifetime; identity changes go
/// through [`CollaborationStore::reset`] rather than constructing a new store.
pub struct CollaborationStore {
    api: Arc<dyn CollabApi>,
    state: Mutex<StoreState>,
    events: broadcast::Sender<CoreEvent>,
    stats: SharedEventStats,
}

impl CollaborationStore {
    pub fn new(api: Arc<dyn CollabApi>) -> Self {
        Self::with_limits(api, NOTIFICATION_CAP, NOTIFICATION_SURFACED)
    }

    pub fn from_config(api: Arc<dyn CollabApi>, config: &CoreConfig) -> Self {
        Self::with_limits(api, config.notification_cap, config.surfaced_count)
    }

    pub fn with_limits(api: Arc<dyn CollabApi>, cap: usize, surfaced: usize) -> Self {
        let (events, _) = broadcast::channel(CORE_EVENT_CAPACITY);
        Self {
            api,
            state: Mutex::new(StoreState::new(cap, surfaced)),
            events,
            stats: SharedEventStats::new(),
        }
    }

    pub fn with_stats(mut self, stats: SharedEventStats) -> Self {
        self.stats = stats;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }

    /// Sender side of the event channel, for components that report through the store's stream.
    pub fn event_sender(&self) -> broadcast::Sender<CoreEvent> {
        self.events.clone()
    }

    pub fn emit(&self, event: CoreEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn emit_changed(&self, kind: CollectionKind, unread: usize) {
        match kind {
            CollectionKind::Notifications => self.emit(CoreEvent::NotificationsChanged { unread }),
            collection => self.emit(CoreEvent::CollectionChanged { collection }),
        }
    }

    // ===== Identity =====

    pub fn identity(&self) -> Option<Identity> {
        self.state.lock().identity.clone()
    }

    /// Drop every cache, then the notification list, then bind the new identity.
    ///
    /// Runs under one lock acquisition so no reader can observe the previous
    /// identity's data under the new one.
    pub fn reset(&self, identity: Option<Identity>) {
        {
            let mut state = self.state.lock();
            state.clear_caches();
            state.notifications.clear();
            state.identity = identity.clone();
            info!(
                identity = identity.as_ref().map(Identity::as_str).unwrap_or("<none>"),
                generation = state.generation,
                "collaboration store reset"
            );
        }
        self.emit(CoreEvent::IdentityChanged { identity });
        for kind in CollectionKind::ALL {
            self.emit_changed(kind, 0);
        }
    }

    // ===== Fetching =====

    /// Mark `kinds` as in flight for the current identity.
    /// Returns `None` if any of them already has a fetch running.
    pub fn begin_fetch(&self, kinds: &[CollectionKind]) -> Result<Option<FetchTicket>> {
        let mut state = self.state.lock();
        let identity = state.identity.clone().ok_or(CoreError::NotLoggedIn)?;
        if kinds.iter().any(|k| state.in_flight.contains_key(k)) {
            return Ok(None);
        }
        let generation = state.generation;
        for kind in kinds {
            state.in_flight.insert(*kind, generation);
        }
        Ok(Some(FetchTicket {
            identity,
            generation,
            kinds: kinds.to_vec(),
        }))
    }

    /// Land a fetch result: replace each fetched collection, then replay the
    /// live updates buffered for it. Returns false if the ticket is stale.
    pub fn complete_fetch(&self, ticket: &FetchTicket, mut snapshot: BulkSnapshot) -> bool {
        let (applied, unread) = {
            let mut state = self.state.lock();
            if state.generation != ticket.generation
                || state.identity.as_ref() != Some(&ticket.identity)
            {
                drop(state);
                self.stats.record_discarded();
                info!(identity = %ticket.identity, "discarding fetch result for stale identity");
                return false;
            }
            for kind in &ticket.kinds {
                state.apply_snapshot(*kind, &mut snapshot);
                state.in_flight.remove(kind);
                let replayed = state.replay_buffered(*kind);
                if replayed > 0 {
                    debug!(?kind, replayed, "replayed buffered live updates");
                }
            }
            (ticket.kinds.clone(), state.notifications.unread_count())
        };
        for kind in applied {
            self.emit_changed(kind, unread);
        }
        true
    }

    /// A fetch failed: keep the previous cache, but apply whatever arrived live meanwhile.
    pub fn fail_fetch(&self, ticket: &FetchTicket, error: &CoreError) {
        let escalation = {
            let mut state = self.state.lock();
            if state.generation != ticket.generation {
                return;
            }
            for kind in &ticket.kinds {
                state.in_flight.remove(kind);
                state.replay_buffered(*kind);
            }
            state.failures.record_failure("fetch", error)
        };
        warn!(error = %error, kinds = ?ticket.kinds, "fetch failed");
        if escalation == Escalation::Visible {
            self.emit(CoreEvent::Notice(Notice::from_error(error)));
        }
        for kind in &ticket.kinds {
            self.emit(CoreEvent::CollectionChanged { collection: *kind });
        }
    }

    async fn fetch(&self, kinds: &[CollectionKind]) -> Result<RefreshOutcome> {
        let Some(ticket) = self.begin_fetch(kinds)? else {
            debug!(?kinds, "fetch already in flight");
            return Ok(RefreshOutcome::AlreadyInFlight);
        };

        match fetch_snapshot(self.api.as_ref(), &ticket.kinds).await {
            Ok(snapshot) => {
                if self.complete_fetch(&ticket, snapshot) {
                    self.state.lock().failures.record_success("fetch");
                    Ok(RefreshOutcome::Applied)
                } else {
                    Ok(RefreshOutcome::Discarded)
                }
            }
            Err(e) => {
                self.fail_fetch(&ticket, &e);
                Err(e)
            }
        }
    }

    /// Fetch every collection for the current identity.
    pub async fn bulk_fetch(&self) -> Result<RefreshOutcome> {
        self.fetch(&CollectionKind::ALL).await
    }

    /// Re-fetch one collection. A no-op while a fetch covering it is running.
    pub async fn refresh(&self, kind: CollectionKind) -> Result<RefreshOutcome> {
        self.fetch(&[kind]).await
    }

    pub async fn refresh_friends(&self) -> Result<RefreshOutcome> {
        self.refresh(CollectionKind::Friends).await
    }

    pub async fn refresh_tasks(&self) -> Result<RefreshOutcome> {
        self.refresh(CollectionKind::Tasks).await
    }

    pub async fn refresh_lists(&self) -> Result<RefreshOutcome> {
        self.refresh(CollectionKind::Lists).await
    }

    pub async fn refresh_events(&self) -> Result<RefreshOutcome> {
        self.refresh(CollectionKind::Events).await
    }

    pub async fn refresh_notifications(&self) -> Result<RefreshOutcome> {
        self.refresh(CollectionKind::Notifications).await
    }

    pub fn is_fetching(&self, kind: CollectionKind) -> bool {
        self.state.lock().in_flight.contains_key(&kind)
    }

    // ===== Live updates =====

    /// Apply an update that arrived on a connection owned by `tag`.
    ///
    /// Updates for a collection with a fetch in flight are buffered and replayed
    /// after the fetch lands. Notifications show up at once; a copy is held and
    /// re-ingested after the fetched list replaces the server entries.
    pub fn apply_live(&self, tag: &Identity, update: LiveUpdate) -> LiveOutcome {
        let kind = update.collection();
        let (outcome, unread) = {
            let mut state = self.state.lock();
            if state.identity.as_ref() != Some(tag) {
                (LiveOutcome::Discarded, 0)
            } else if kind == CollectionKind::Notifications && state.in_flight.contains_key(&kind) {
                state.buffered.entry(kind).or_default().push(update.clone());
                state.apply(update);
                (LiveOutcome::Applied, state.notifications.unread_count())
            } else if state.in_flight.contains_key(&kind) {
                state.buffered.entry(kind).or_default().push(update);
                (LiveOutcome::Buffered, 0)
            } else {
                state.apply(update);
                (LiveOutcome::Applied, state.notifications.unread_count())
            }
        };

        match outcome {
            LiveOutcome::Discarded => {
                self.stats.record_discarded();
                debug!(identity = %tag, ?kind, "discarding live update for stale identity");
            }
            LiveOutcome::Buffered => self.stats.record_buffered(),
            LiveOutcome::Applied => self.emit_changed(kind, unread),
        }
        outcome
    }

    /// Apply a local update for the current identity.
    fn apply_local(&self, update: LiveUpdate) -> Result<LiveOutcome> {
        let identity = self.identity().ok_or(CoreError::NotLoggedIn)?;
        Ok(self.apply_live(&identity, update))
    }

    pub fn upsert_task(&self, task: Task) -> Result<LiveOutcome> {
        self.apply_local(LiveUpdate::Task(task))
    }

    pub fn remove_task(&self, id: &str) -> Result<LiveOutcome> {
        self.apply_local(LiveUpdate::TaskRemoved(id.to_string()))
    }

    pub fn upsert_list_item(&self, item: SharedListItem) -> Result<LiveOutcome> {
        self.apply_local(LiveUpdate::ListItem(item))
    }

    pub fn remove_list_item(&self, list_id: &str, item_id: &str) -> Result<LiveOutcome> {
        self.apply_local(LiveUpdate::ListItemRemoved {
            list_id: list_id.to_string(),
            item_id: item_id.to_string(),
        })
    }

    pub fn upsert_event(&self, event: CalendarEvent) -> Result<LiveOutcome> {
        self.apply_local(LiveUpdate::Event(event))
    }

    pub fn remove_event(&self, id: &str) -> Result<LiveOutcome> {
        self.apply_local(LiveUpdate::EventRemoved(id.to_string()))
    }

    pub fn upsert_friend(&self, friendship: Friendship) -> Result<LiveOutcome> {
        self.apply_local(LiveUpdate::Friendship(friendship))
    }

    pub fn remove_friend(&self, id: &str) -> Result<LiveOutcome> {
        self.apply_local(LiveUpdate::FriendshipRemoved(id.to_string()))
    }

    /// Lists have no live "list updated" event; they are upserted whole by intents.
    pub fn upsert_list(&self, list: SharedList) -> Result<LiveOutcome> {
        self.apply_local(LiveUpdate::List(list))
    }

    /// Optimistic local notification (e.g. a relayed reminder).
    pub fn insert_local_notification(
        &self,
        wire: NotificationWire,
    ) -> Result<NotificationId> {
        let notification = Notification::normalize(wire, Utc::now());
        let id = notification.id.clone();
        let unread = {
            let mut state = self.state.lock();
            if state.identity.is_none() {
                return Err(CoreError::NotLoggedIn);
            }
            state
                .notifications
                .ingest_normalized(notification, IngestSource::Local);
            state.notifications.unread_count()
        };
        self.emit(CoreEvent::NotificationsChanged { unread });
        Ok(id)
    }

    // ===== Bulk replacement =====
    //
    // Used by fetch completion; exposed for hosts that hydrate from their own transport.

    pub fn replace_all_tasks(&self, tasks: Vec<Task>) {
        self.state.lock().tasks.replace_all(tasks);
        self.emit(CoreEvent::CollectionChanged {
            collection: CollectionKind::Tasks,
        });
    }

    pub fn replace_all_friends(&self, friends: Vec<Friendship>) {
        self.state.lock().friends.replace_all(friends);
        self.emit(CoreEvent::CollectionChanged {
            collection: CollectionKind::Friends,
        });
    }

    pub fn replace_all_lists(&self, lists: Vec<SharedList>) {
        self.state.lock().lists.replace_all(lists);
        self.emit(CoreEvent::CollectionChanged {
            collection: CollectionKind::Lists,
        });
    }

    pub fn replace_all_events(&self, events: Vec<CalendarEvent>) {
        self.state.lock().events.replace_all(events);
        self.emit(CoreEvent::CollectionChanged {
            collection: CollectionKind::Events,
        });
    }

    // ===== Selectors =====

    pub fn tasks(&self) -> Vec<Task> {
        self.state.lock().tasks.items().to_vec()
    }

    pub fn task(&self, id: &str) -> Option<Task> {
        self.state.lock().tasks.get(id).cloned()
    }

    pub fn friends(&self) -> Vec<Friendship> {
        self.state.lock().friends.items().to_vec()
    }

    pub fn friends_with_status(&self, status: FriendshipStatus) -> Vec<Friendship> {
        self.state
            .lock()
            .friends
            .items()
            .iter()
            .filter(|f| f.status == status)
            .cloned()
            .collect()
    }

    pub fn lists(&self) -> Vec<SharedList> {
        self.state.lock().lists.items().to_vec()
    }

    pub fn list(&self, id: &str) -> Option<SharedList> {
        self.state.lock().lists.get(id).cloned()
    }

    pub fn events(&self) -> Vec<CalendarEvent> {
        self.state.lock().events.items().to_vec()
    }

    pub fn event(&self, id: &str) -> Option<CalendarEvent> {
        self.state.lock().events.get(id).cloned()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.state.lock().notifications.items().to_vec()
    }

    pub fn surfaced_notifications(&self) -> Vec<Notification> {
        self.state.lock().notifications.surfaced().to_vec()
    }

    pub fn notification(&self, id: &NotificationId) -> Option<Notification> {
        self.state.lock().notifications.get(id).cloned()
    }

    pub fn unread_count(&self) -> usize {
        self.state.lock().notifications.unread_count()
    }

    // ===== Intents =====

    pub async fn send_friend_request(&self, email: &str) -> Result<Friendship> {
        let generation = self.current_generation()?;
        let friendship = self.api.send_friend_request(email).await?;
        self.upsert_if_current(generation, LiveUpdate::Friendship(friendship.clone()));
        Ok(friendship)
    }

    pub async fn accept_friend_request(&self, id: &str) -> Result<Option<Friendship>> {
        let generation = self.current_generation()?;
        let updated = self.api.respond_friend_request(id, true).await?;
        if let Some(friendship) = &updated {
            self.upsert_if_current(generation, LiveUpdate::Friendship(friendship.clone()));
        }
        Ok(updated)
    }

    pub async fn decline_friend_request(&self, id: &str) -> Result<()> {
        let generation = self.current_generation()?;
        self.api.respond_friend_request(id, false).await?;
        self.upsert_if_current(generation, LiveUpdate::FriendshipRemoved(id.to_string()));
        Ok(())
    }

    fn current_generation(&self) -> Result<u64> {
        let state = self.state.lock();
        state.identity.as_ref().ok_or(CoreError::NotLoggedIn)?;
        Ok(state.generation)
    }

    fn upsert_if_current(&self, generation: u64, update: LiveUpdate) {
        let identity = {
            let state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.identity.clone()
        };
        if let Some(identity) = identity {
            self.apply_live(&identity, update);
        }
    }

    /// Mark read locally, then on the server. A server failure restores the unread flag.
    pub async fn mark_notification_read(&self, id: &NotificationId) -> Result<()> {
        let (previous, generation, unread) = {
            let mut state = self.state.lock();
            let previous = state
                .notifications
                .mark_read(id)
                .ok_or_else(|| CoreError::NotFound {
                    kind: "notification",
                    id: id.to_string(),
                })?;
            (previous, state.generation, state.notifications.unread_count())
        };
        if previous {
            return Ok(());
        }
        self.emit(CoreEvent::NotificationsChanged { unread });

        // Derived ids only exist on this client
        let Some(server_id) = id.server_id() else {
            return Ok(());
        };

        match self.api.mark_notification_read(server_id).await {
            Ok(()) => {
                self.state.lock().failures.record_success("mark_read");
                Ok(())
            }
            Err(e) => {
                self.rollback_reads(generation, std::slice::from_ref(id), "mark_read", &e);
                Err(e)
            }
        }
    }

    pub async fn mark_all_notifications_read(&self) -> Result<()> {
        let (changed, generation) = {
            let mut state = self.state.lock();
            state.identity.as_ref().ok_or(CoreError::NotLoggedIn)?;
            (state.notifications.mark_all_read(), state.generation)
        };
        if changed.is_empty() {
            return Ok(());
        }
        self.emit(CoreEvent::NotificationsChanged { unread: 0 });

        match self.api.mark_all_notifications_read().await {
            Ok(()) => {
                self.state.lock().failures.record_success("mark_all_read");
                Ok(())
            }
            Err(e) => {
                let server_ids: Vec<NotificationId> =
                    changed.into_iter().filter(|id| !id.is_local()).collect();
                self.rollback_reads(generation, &server_ids, "mark_all_read", &e);
                Err(e)
            }
        }
    }

    /// A notification was clicked in the background worker and relayed here.
    /// Marks the matching entry read if this session still holds it.
    ///
    /// Push payloads usually carry no notification id; those are matched to the
    /// newest unread entry of the same type about the same task or event.
    pub async fn reconcile_notification_click(
        &self,
        data: &PushData,
    ) -> Result<Option<NotificationId>> {
        let id = match data.notification_id.as_deref() {
            Some(raw) => {
                let id = NotificationId::parse(raw);
                self.notification(&id).map(|_| id)
            }
            None => self.match_clicked_notification(data),
        };
        let Some(id) = id else {
            debug!(kind = data.kind.as_deref().unwrap_or(""), "clicked notification not in cache");
            return Ok(None);
        };
        self.mark_notification_read(&id).await?;
        Ok(Some(id))
    }

    fn match_clicked_notification(&self, data: &PushData) -> Option<NotificationId> {
        let kind = data.kind.as_deref()?;
        if data.task_id.is_none() && data.event_id.is_none() {
            return None;
        }
        let refers_to = |n: &Notification, key: &str, wanted: &Option<String>| match wanted {
            Some(wanted) => n.payload_str(key) == Some(wanted.as_str()),
            None => true,
        };
        let state = self.state.lock();
        // Newest first
        let matched = state
            .notifications
            .items()
            .iter()
            .find(|n| {
                !n.read
                    && n.kind == kind
                    && refers_to(n, "taskId", &data.task_id)
                    && refers_to(n, "eventId", &data.event_id)
            })
            .map(|n| n.id.clone());
        matched
    }

    fn rollback_reads(
        &self,
        generation: u64,
        ids: &[NotificationId],
        operation: &str,
        error: &CoreError,
    ) {
        let (escalation, unread) = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            for id in ids {
                state.notifications.rollback_read(id);
            }
            let escalation = state.failures.record_failure(operation, error);
            (escalation, state.notifications.unread_count())
        };
        warn!(error = %error, count = ids.len(), operation, "server refused read state; rolled back");
        self.emit(CoreEvent::NotificationsChanged { unread });
        if escalation == Escalation::Visible {
            self.emit(CoreEvent::Notice(Notice::from_error(error)));
        }
    }
}
