use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Counters for traffic received on the event bus
#[derive(Debug, Default, Clone)]
pub struct EventStats {
    /// Count by event name (including names the core does not understand)
    pub by_event: HashMap<String, u64>,
    /// Total frames received
    pub total: u64,
    /// Frames whose payload failed to decode
    pub malformed: u64,
    /// Live updates held back while a fetch for their collection was in flight
    pub buffered: u64,
    /// Live updates or fetch results dropped because their identity tag was stale
    pub discarded: u64,
}

impl EventStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event_name: &str) {
        self.total += 1;
        *self.by_event.entry(event_name.to_string()).or_insert(0) += 1;
    }

    /// Get list of event names sorted by count (descending)
    pub fn events_by_count(&self) -> Vec<(String, u64)> {
        let mut events: Vec<_> = self
            .by_event
            .iter()
            .map(|(name, &count)| (name.clone(), count))
            .collect();
        events.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        events
    }
}

/// Thread-safe wrapper for event stats
#[derive(Debug, Clone, Default)]
pub struct SharedEventStats {
    inner: Arc<RwLock<EventStats>>,
}

impl SharedEventStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event_name: &str) {
        if let Ok(mut stats) = self.inner.write() {
            stats.record(event_name);
        }
    }

    pub fn record_malformed(&self) {
        if let Ok(mut stats) = self.inner.write() {
            stats.malformed += 1;
        }
    }

    pub fn record_buffered(&self) {
        if let Ok(mut stats) = self.inner.write() {
            stats.buffered += 1;
        }
    }

    pub fn record_discarded(&self) {
        if let Ok(mut stats) = self.inner.write() {
            stats.discarded += 1;
        }
    }

    pub fn snapshot(&self) -> EventStats {
        self.inner
            .read()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }
}
