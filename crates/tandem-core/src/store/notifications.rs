use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::debug;

use crate::constants::{NOTIFICATION_CAP, NOTIFICATION_SURFACED};
use crate::models::{Notification, NotificationId, NotificationWire};

/// Where a notification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestSource {
    /// Bulk fetch from the REST backend.
    Bulk,
    /// Pushed over the event bus while the page is open.
    Live,
    /// Synthesized locally (optimistic insert, reminder relays).
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Inserted,
    /// Same id already present; content and read flag merged.
    Merged,
    /// Older than every retained entry of a full list.
    Evicted,
}

/// Deduplicated, ordered, capped notification list.
///
/// Invariants after every mutation: sorted by `created_at` descending (ties by
/// id), at most `cap` entries, ids unique.
#[derive(Debug, Clone)]
pub struct NotificationEngine {
    items: Vec<Notification>,
    cap: usize,
    surfaced: usize,
}

impl Default for NotificationEngine {
    fn default() -> Self {
        Self::new(NOTIFICATION_CAP, NOTIFICATION_SURFACED)
    }
}

impl NotificationEngine {
    pub fn new(cap: usize, surfaced: usize) -> Self {
        Self {
            items: Vec::new(),
            cap: cap.max(1),
            surfaced: surfaced.min(cap).max(1),
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    // ===== Getters =====

    pub fn items(&self) -> &[Notification] {
        &self.items
    }

    /// The slice shown by the default UI.
    pub fn surfaced(&self) -> &[Notification] {
        &self.items[..self.items.len().min(self.surfaced)]
    }

    pub fn get(&self, id: &NotificationId) -> Option<&Notification> {
        self.items.iter().find(|n| &n.id == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|n| !n.read).count()
    }

    // ===== Mutations =====

    pub fn ingest(
        &mut self,
        wire: NotificationWire,
        source: IngestSource,
        now: DateTime<Utc>,
    ) -> IngestOutcome {
        self.ingest_normalized(Notification::normalize(wire, now), source)
    }

    pub fn ingest_normalized(
        &mut self,
        notification: Notification,
        source: IngestSource,
    ) -> IngestOutcome {
        if let Some(pos) = self.items.iter().position(|n| n.id == notification.id) {
            let existing = self.items.remove(pos);
            let read = existing.read || notification.read;
            // A local copy never overwrites content that came from the server
            let mut merged = match source {
                IngestSource::Local => existing,
                IngestSource::Bulk | IngestSource::Live => notification,
            };
            merged.read = read;
            debug!(id = %merged.id, ?source, "notification merged");
            self.insert_sorted(merged);
            return IngestOutcome::Merged;
        }

        let id = notification.id.clone();
        self.insert_sorted(notification);
        self.items.truncate(self.cap);

        if self.items.iter().any(|n| n.id == id) {
            debug!(%id, ?source, "notification inserted");
            IngestOutcome::Inserted
        } else {
            debug!(%id, ?source, "notification evicted on arrival");
            IngestOutcome::Evicted
        }
    }

    /// Take a fetched list as the full set of server notifications.
    ///
    /// Server entries missing from `wires` are dropped. Local entries stay, and
    /// an entry already read here stays read.
    pub fn replace_server_entries(&mut self, wires: Vec<NotificationWire>, now: DateTime<Utc>) {
        let read: HashSet<NotificationId> = self
            .items
            .iter()
            .filter(|n| n.read)
            .map(|n| n.id.clone())
            .collect();
        let before = self.items.len();
        self.items.retain(|n| n.id.is_local());
        debug!(
            dropped = before - self.items.len(),
            incoming = wires.len(),
            "replacing server notifications"
        );
        for wire in wires {
            let mut notification = Notification::normalize(wire, now);
            notification.read |= read.contains(&notification.id);
            self.ingest_normalized(notification, IngestSource::Bulk);
        }
    }

    /// Optimistically mark read. Returns the previous flag, or `None` if the id is unknown.
    pub fn mark_read(&mut self, id: &NotificationId) -> Option<bool> {
        let n = self.items.iter_mut().find(|n| &n.id == id)?;
        let previous = n.read;
        n.read = true;
        Some(previous)
    }

    /// Mark every unread entry read, returning the ids that changed.
    pub fn mark_all_read(&mut self) -> Vec<NotificationId> {
        self.items
            .iter_mut()
            .filter(|n| !n.read)
            .map(|n| {
                n.read = true;
                n.id.clone()
            })
            .collect()
    }

    /// Undo an optimistic mark after the server refused it. The only read -> unread path.
    pub fn rollback_read(&mut self, id: &NotificationId) -> bool {
        match self.items.iter_mut().find(|n| &n.id == id) {
            Some(n) => {
                n.read = false;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &NotificationId) -> Option<Notification> {
        let pos = self.items.iter().position(|n| &n.id == id)?;
        Some(self.items.remove(pos))
    }

    fn insert_sorted(&mut self, notification: Notification) {
        let pos = self.items.partition_point(|n| {
            n.created_at > notification.created_at
                || (n.created_at == notification.created_at && n.id < notification.id)
        });
        self.items.insert(pos, notification);
    }
}
