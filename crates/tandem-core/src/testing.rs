//! In-memory fakes for every trait seam, shared by the unit tests.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};

use crate::api::{CollabApi, PushApi};
use crate::bus::{BusConnector, BusLink, Frame};
use crate::error::{CoreError, Result};
use crate::models::{
    CalendarEvent, FriendProfile, Friendship, FriendshipStatus, Identity, NotificationWire,
    PushSubscriptionRecord, ServerPushStatus, SharedList, SharedListItem, SubscriptionKeys, Task,
};
use crate::push::{PermissionState, PushPlatform};
use crate::store::CollectionKind;
use crate::worker::{
    ClientWindow, DismissalSink, DisplayNotification, NotificationSurface, WorkerScope,
};

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 2s"
        );
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// One-shot latch. Everything waiting on it proceeds once released.
#[derive(Clone)]
pub struct Gate {
    tx: Arc<watch::Sender<bool>>,
}

impl Gate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn release(&self) {
        self.tx.send_replace(true);
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }
}

pub mod fixtures {
    use super::*;

    pub fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    pub fn task(id: &str, secs: i64) -> Task {
        task_titled(id, secs, id)
    }

    pub fn task_titled(id: &str, secs: i64, title: &str) -> Task {
        Task {
            id: id.to_string(),
            title: title.to_string(),
            description: None,
            completed: false,
            priority: None,
            due_date: None,
            owner_id: None,
            shared_with: Vec::new(),
            created_at: Some(ts(secs)),
            updated_at: None,
            extra: Map::new(),
        }
    }

    pub fn friendship(id: &str, status: FriendshipStatus) -> Friendship {
        Friendship {
            id: id.to_string(),
            friend: FriendProfile {
                id: format!("user-{}", id),
                name: Some(format!("Friend {}", id)),
                email: None,
            },
            status,
            created_at: Some(ts(100)),
            extra: Map::new(),
        }
    }

    pub fn notification(id: &str, secs: i64) -> NotificationWire {
        NotificationWire {
            id: Some(id.to_string()),
            kind: "task_shared".to_string(),
            title: format!("Notification {}", id),
            message: Some(format!("message {}", id)),
            created_at: Some(ts(secs)),
            read: Some(false),
            is_read: None,
            payload: Value::Null,
            dedup_key: None,
        }
    }

    pub fn list(id: &str, secs: i64) -> SharedList {
        SharedList {
            id: id.to_string(),
            name: format!("List {}", id),
            owner_id: None,
            members: Vec::new(),
            items: Vec::new(),
            created_at: Some(ts(secs)),
            extra: Map::new(),
        }
    }

    pub fn list_item(id: &str, list_id: &str, text: &str) -> SharedListItem {
        SharedListItem {
            id: id.to_string(),
            list_id: list_id.to_string(),
            text: text.to_string(),
            checked: false,
            added_by: None,
            created_at: None,
            extra: Map::new(),
        }
    }
}

// ===== REST =====

/// A valid uncompressed P-256 point, URL-safe base64.
pub const TEST_VAPID_KEY: &str =
    "BEl62iUYgUivxIkv69yViEuiBIa-Ib9-SkvMeAtA3LFgDzkrxZJjSgSnfckjBJuBkr3qBUYIHBQFLXYp5Nksh8U";

#[derive(Default)]
struct FakeApiState {
    friends: Vec<Friendship>,
    tasks: Vec<Task>,
    lists: Vec<SharedList>,
    events: Vec<CalendarEvent>,
    notifications: Vec<NotificationWire>,
    fetch_gate: Option<Gate>,
    fetch_failure: Option<CoreError>,
    mark_read_failure: Option<CoreError>,
    fetch_counts: HashMap<CollectionKind, usize>,
    marked_read: Vec<String>,

    push_status: Option<ServerPushStatus>,
    push_subscribe_failure: Option<CoreError>,
    push_unsubscribe_failure: Option<CoreError>,
    push_posts: Vec<PushSubscriptionRecord>,
    push_unsubscribed: Vec<String>,
}

/// Programmable stand-in for both REST surfaces.
pub struct FakeApi {
    state: Mutex<FakeApiState>,
    fetch_started: Notify,
}

impl FakeApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeApiState::default()),
            fetch_started: Notify::new(),
        }
    }

    pub fn set_friends(&self, friends: Vec<Friendship>) {
        self.state.lock().friends = friends;
    }

    pub fn set_tasks(&self, tasks: Vec<Task>) {
        self.state.lock().tasks = tasks;
    }

    pub fn set_lists(&self, lists: Vec<SharedList>) {
        self.state.lock().lists = lists;
    }

    pub fn set_notifications(&self, notifications: Vec<NotificationWire>) {
        self.state.lock().notifications = notifications;
    }

    /// Fetches block until the returned gate is released.
    pub fn hold_fetches(&self) -> Gate {
        let gate = Gate::new();
        self.state.lock().fetch_gate = Some(gate.clone());
        gate
    }

    pub async fn wait_for_fetch_started(&self) {
        self.fetch_started.notified().await;
    }

    pub fn fetch_count(&self, kind: CollectionKind) -> usize {
        self.state.lock().fetch_counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn fail_fetches(&self, error: CoreError) {
        self.state.lock().fetch_failure = Some(error);
    }

    pub fn fail_mark_read(&self, error: CoreError) {
        self.state.lock().mark_read_failure = Some(error);
    }

    pub fn fail_push_subscribe(&self, error: CoreError) {
        self.state.lock().push_subscribe_failure = Some(error);
    }

    pub fn fail_push_unsubscribe(&self, error: CoreError) {
        self.state.lock().push_unsubscribe_failure = Some(error);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.fetch_failure = None;
        state.mark_read_failure = None;
        state.push_subscribe_failure = None;
        state.push_unsubscribe_failure = None;
    }

    pub fn marked_read(&self) -> Vec<String> {
        self.state.lock().marked_read.clone()
    }

    pub fn set_push_status(&self, status: ServerPushStatus) {
        self.state.lock().push_status = Some(status);
    }

    pub fn push_subscribe_posts(&self) -> Vec<PushSubscriptionRecord> {
        self.state.lock().push_posts.clone()
    }

    pub fn push_unsubscribed(&self) -> Vec<String> {
        self.state.lock().push_unsubscribed.clone()
    }

    async fn fetch<T, F>(&self, kind: CollectionKind, read: F) -> Result<Vec<T>>
    where
        F: Fn(&FakeApiState) -> Vec<T>,
    {
        let gate = {
            let mut state = self.state.lock();
            *state.fetch_counts.entry(kind).or_insert(0) += 1;
            state.fetch_gate.clone()
        };
        if let Some(gate) = gate {
            self.fetch_started.notify_one();
            gate.wait().await;
        }
        let state = self.state.lock();
        if let Some(error) = &state.fetch_failure {
            return Err(error.clone());
        }
        Ok(read(&state))
    }
}

#[async_trait]
impl CollabApi for FakeApi {
    async fn fetch_friends(&self) -> Result<Vec<Friendship>> {
        self.fetch(CollectionKind::Friends, |s| s.friends.clone()).await
    }

    async fn fetch_tasks(&self) -> Result<Vec<Task>> {
        self.fetch(CollectionKind::Tasks, |s| s.tasks.clone()).await
    }

    async fn fetch_lists(&self) -> Result<Vec<SharedList>> {
        self.fetch(CollectionKind::Lists, |s| s.lists.clone()).await
    }

    async fn fetch_events(&self) -> Result<Vec<CalendarEvent>> {
        self.fetch(CollectionKind::Events, |s| s.events.clone()).await
    }

    async fn fetch_notifications(&self) -> Result<Vec<NotificationWire>> {
        self.fetch(CollectionKind::Notifications, |s| s.notifications.clone())
            .await
    }

    async fn mark_notification_read(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.marked_read.push(id.to_string());
        match &state.mark_read_failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn mark_all_notifications_read(&self) -> Result<()> {
        match &self.state.lock().mark_read_failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn send_friend_request(&self, email: &str) -> Result<Friendship> {
        let mut friendship =
            fixtures::friendship(&format!("req-{}", email), FriendshipStatus::PendingOutgoing);
        friendship.friend.email = Some(email.to_string());
        self.state.lock().friends.push(friendship.clone());
        Ok(friendship)
    }

    async fn respond_friend_request(&self, id: &str, accept: bool) -> Result<Option<Friendship>> {
        let mut state = self.state.lock();
        let pos = state
            .friends
            .iter()
            .position(|f| f.id == id)
            .ok_or_else(|| CoreError::NotFound {
                kind: "friendship",
                id: id.to_string(),
            })?;
        if !accept {
            state.friends.remove(pos);
            return Ok(None);
        }
        state.friends[pos].status = FriendshipStatus::Accepted;
        Ok(Some(state.friends[pos].clone()))
    }
}

#[async_trait]
impl PushApi for FakeApi {
    async fn vapid_public_key(&self) -> Result<String> {
        Ok(TEST_VAPID_KEY.to_string())
    }

    async fn subscribe(&self, subscription: &PushSubscriptionRecord) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(error) = &state.push_subscribe_failure {
            return Err(error.clone());
        }
        state.push_posts.push(subscription.clone());
        Ok(())
    }

    async fn unsubscribe(&self, endpoint: &str) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(error) = &state.push_unsubscribe_failure {
            return Err(error.clone());
        }
        state.push_unsubscribed.push(endpoint.to_string());
        Ok(())
    }

    async fn status(&self) -> Result<ServerPushStatus> {
        let state = self.state.lock();
        Ok(state.push_status.clone().unwrap_or(ServerPushStatus {
            configured: true,
            subscribed: !state.push_posts.is_empty(),
            subscription_count: state.push_posts.len(),
        }))
    }

    async fn send_test(&self, _message: &str) -> Result<()> {
        Ok(())
    }
}

// ===== Bus =====

/// Server end of one fake bus connection. Dropping it closes the link.
pub struct FakeServer {
    from_client: mpsc::UnboundedReceiver<Frame>,
    to_client: mpsc::UnboundedSender<Frame>,
}

impl FakeServer {
    pub fn send(&self, event: &str, data: Value) {
        let _ = self.to_client.send(Frame::new(event, data));
    }

    pub fn drain_frames(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            frames.push(frame);
        }
        frames
    }

    pub fn drain_events(&mut self) -> Vec<String> {
        self.drain_frames().into_iter().map(|f| f.event).collect()
    }

    /// Drains pending frames and counts the room joins among them.
    pub fn join_count(&mut self) -> usize {
        self.drain_events()
            .iter()
            .filter(|e| e.starts_with("join_"))
            .count()
    }
}

pub struct FakeConnector {
    accepted_tx: mpsc::UnboundedSender<FakeServer>,
    accepted_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<FakeServer>>,
    opens: Mutex<usize>,
}

impl FakeConnector {
    pub fn new() -> Self {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        Self {
            accepted_tx,
            accepted_rx: tokio::sync::Mutex::new(accepted_rx),
            opens: Mutex::new(0),
        }
    }

    pub fn open_count(&self) -> usize {
        *self.opens.lock()
    }

    /// Wait for the client to open a connection and return its server end.
    pub async fn accept(&self) -> FakeServer {
        let next = tokio::time::timeout(Duration::from_secs(2), async {
            self.accepted_rx.lock().await.recv().await
        })
        .await;
        match next {
            Ok(Some(server)) => server,
            _ => panic!("no bus connection was opened"),
        }
    }
}

#[async_trait]
impl BusConnector for FakeConnector {
    async fn open(&self, _identity: &Identity) -> Result<BusLink> {
        *self.opens.lock() += 1;

        let (outbound, from_client) = mpsc::unbounded_channel();
        let (to_client, inbound) = mpsc::unbounded_channel();
        let _ = self.accepted_tx.send(FakeServer {
            from_client,
            to_client,
        });
        Ok(BusLink { outbound, inbound })
    }
}

// ===== Push platform =====

struct PlatformState {
    supported: bool,
    permission: PermissionState,
    prompt_answer: PermissionState,
    prompt_gate: Option<Gate>,
    prompts: usize,
    subscription: Option<PushSubscriptionRecord>,
    created: usize,
    fail_unsubscribe: bool,
}

pub struct FakePushPlatform {
    state: Mutex<PlatformState>,
}

impl FakePushPlatform {
    pub fn new(permission: PermissionState) -> Self {
        Self {
            state: Mutex::new(PlatformState {
                supported: true,
                permission,
                prompt_answer: PermissionState::Granted,
                prompt_gate: None,
                prompts: 0,
                subscription: None,
                created: 0,
                fail_unsubscribe: false,
            }),
        }
    }

    pub fn unsupported() -> Self {
        let platform = Self::new(PermissionState::Default);
        platform.state.lock().supported = false;
        platform
    }

    pub fn record(endpoint: &str) -> PushSubscriptionRecord {
        PushSubscriptionRecord {
            endpoint: endpoint.to_string(),
            expiration_time: None,
            keys: SubscriptionKeys {
                p256dh: "p256dh-key".to_string(),
                auth: "auth-secret".to_string(),
            },
        }
    }

    pub fn hold_prompt(&self) -> Gate {
        let gate = Gate::new();
        self.state.lock().prompt_gate = Some(gate.clone());
        gate
    }

    pub fn answer_prompt_with(&self, answer: PermissionState) {
        self.state.lock().prompt_answer = answer;
    }

    pub fn prompt_count(&self) -> usize {
        self.state.lock().prompts
    }

    pub fn subscription(&self) -> Option<PushSubscriptionRecord> {
        self.state.lock().subscription.clone()
    }

    pub fn set_subscription(&self, subscription: Option<PushSubscriptionRecord>) {
        self.state.lock().subscription = subscription;
    }

    pub fn fail_unsubscribe(&self, fail: bool) {
        self.state.lock().fail_unsubscribe = fail;
    }
}

#[async_trait]
impl PushPlatform for FakePushPlatform {
    fn is_supported(&self) -> bool {
        self.state.lock().supported
    }

    fn permission(&self) -> PermissionState {
        self.state.lock().permission
    }

    async fn request_permission(&self) -> Result<PermissionState> {
        let gate = {
            let mut state = self.state.lock();
            state.prompts += 1;
            state.prompt_gate.clone()
        };
        if let Some(gate) = gate {
            gate.wait().await;
        }
        let mut state = self.state.lock();
        state.permission = state.prompt_answer;
        Ok(state.permission)
    }

    async fn current_subscription(&self) -> Result<Option<PushSubscriptionRecord>> {
        Ok(self.state.lock().subscription.clone())
    }

    async fn subscribe(&self, application_server_key: &[u8]) -> Result<PushSubscriptionRecord> {
        assert_eq!(application_server_key.len(), 65);
        let mut state = self.state.lock();
        state.created += 1;
        let record = Self::record(&format!("https://push.test/sub-{}", state.created));
        state.subscription = Some(record.clone());
        Ok(record)
    }

    async fn unsubscribe(&self) -> Result<bool> {
        let mut state = self.state.lock();
        if state.fail_unsubscribe {
            return Err(CoreError::transport("browser unsubscribe failed"));
        }
        Ok(state.subscription.take().is_some())
    }
}

// ===== Worker =====

#[derive(Default)]
struct SurfaceState {
    visible: Vec<DisplayNotification>,
    fail_show: bool,
}

/// Notification tray that replaces entries sharing a tag.
pub struct FakeSurface {
    state: Mutex<SurfaceState>,
}

impl FakeSurface {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SurfaceState::default()),
        }
    }

    pub fn visible(&self) -> Vec<DisplayNotification> {
        self.state.lock().visible.clone()
    }

    pub fn fail_show(&self, fail: bool) {
        self.state.lock().fail_show = fail;
    }
}

#[async_trait]
impl NotificationSurface for FakeSurface {
    async fn show(&self, notification: &DisplayNotification) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_show {
            return Err(CoreError::transport("surface unavailable"));
        }
        state.visible.retain(|n| n.tag != notification.tag);
        state.visible.push(notification.clone());
        Ok(())
    }

    async fn close(&self, tag: &str) -> Result<()> {
        self.state.lock().visible.retain(|n| n.tag != tag);
        Ok(())
    }
}

#[derive(Default)]
struct ScopeState {
    windows: Vec<ClientWindow>,
    focused: Vec<String>,
    opened: Vec<String>,
    posted: Vec<(String, Value)>,
    skip_waiting: usize,
    claims: usize,
}

pub struct FakeScope {
    state: Mutex<ScopeState>,
}

impl FakeScope {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ScopeState::default()),
        }
    }

    pub fn add_window(&self, id: &str, url: &str, focused: bool) {
        self.state.lock().windows.push(ClientWindow {
            id: id.to_string(),
            url: url.to_string(),
            focused,
        });
    }

    pub fn posted(&self) -> Vec<(String, Value)> {
        self.state.lock().posted.clone()
    }

    pub fn opened(&self) -> Vec<String> {
        self.state.lock().opened.clone()
    }

    pub fn skip_waiting_calls(&self) -> usize {
        self.state.lock().skip_waiting
    }

    pub fn claim_calls(&self) -> usize {
        self.state.lock().claims
    }
}

#[async_trait]
impl WorkerScope for FakeScope {
    async fn client_windows(&self) -> Result<Vec<ClientWindow>> {
        Ok(self.state.lock().windows.clone())
    }

    async fn focus(&self, client_id: &str) -> Result<()> {
        self.state.lock().focused.push(client_id.to_string());
        Ok(())
    }

    async fn open_window(&self, url: &str) -> Result<Option<ClientWindow>> {
        let mut state = self.state.lock();
        state.opened.push(url.to_string());
        Ok(Some(ClientWindow {
            id: format!("opened-{}", state.opened.len()),
            url: url.to_string(),
            focused: true,
        }))
    }

    async fn post_message(&self, client_id: &str, message: Value) -> Result<()> {
        self.state
            .lock()
            .posted
            .push((client_id.to_string(), message));
        Ok(())
    }

    async fn skip_waiting(&self) -> Result<()> {
        self.state.lock().skip_waiting += 1;
        Ok(())
    }

    async fn claim_clients(&self) -> Result<()> {
        self.state.lock().claims += 1;
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingDismissals {
    kinds: Mutex<Vec<Option<String>>>,
}

impl RecordingDismissals {
    pub fn kinds(&self) -> Vec<Option<String>> {
        self.kinds.lock().clone()
    }
}

impl DismissalSink for RecordingDismissals {
    fn record(&self, kind: Option<&str>, _tag: &str) {
        self.kinds.lock().push(kind.map(str::to_string));
    }
}
