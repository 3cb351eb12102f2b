use std::collections::{HashMap, VecDeque};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use bulkyard_events::{EventEnvelope, Subscription};

pub const DEFAULT_CAPACITY: usize = 50;

/// One line of the recent-activity list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityEntry {
    pub event_id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub description: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct FeedState {
    entries: VecDeque<ActivityEntry>,
    cursors: HashMap<Uuid, u64>,
}

/// Most recent published events, newest last internally, bounded.
///
/// - Idempotent: an envelope at or below its aggregate's cursor is ignored
/// - Disposable: rebuild by replaying the bus
#[derive(Debug)]
pub struct ActivityFeed {
    capacity: usize,
    state: RwLock<FeedState>,
}

impl Default for ActivityFeed {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl ActivityFeed {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: RwLock::new(FeedState::default()),
        }
    }

    /// Returns whether the envelope was new.
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let seq = envelope.sequence_number();
        let last = state.cursors.get(&envelope.aggregate_id()).copied().unwrap_or(0);
        if seq <= last {
            return false;
        }
        state.cursors.insert(envelope.aggregate_id(), seq);

        state.entries.push_back(ActivityEntry {
            event_id: envelope.event_id(),
            aggregate_type: envelope.aggregate_type().to_string(),
            aggregate_id: envelope.aggregate_id(),
            event_type: envelope.event_type().to_string(),
            description: envelope.summary().to_string(),
            occurred_at: envelope.occurred_at(),
        });
        while state.entries.len() > self.capacity {
            state.entries.pop_front();
        }
        true
    }

    /// Drain whatever is queued on `subscription`; returns how many entries
    /// were added.
    pub fn catch_up(&self, subscription: &Subscription<EventEnvelope<JsonValue>>) -> usize {
        subscription
            .drain()
            .iter()
            .filter(|envelope| self.apply_envelope(envelope))
            .count()
    }

    /// Up to `n` entries, newest first.
    pub fn recent(&self, n: usize) -> Vec<ActivityEntry> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.entries.iter().rev().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulkyard_events::{EventBus, InMemoryEventBus};
    use serde_json::json;

    fn envelope(aggregate_id: Uuid, seq: u64, event_type: &str) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            aggregate_id,
            "release",
            seq,
            event_type,
            format!("{event_type} #{seq}"),
            Utc::now(),
            json!({}),
        )
    }

    #[test]
    fn keeps_the_newest_entries_up_to_capacity() {
        let feed = ActivityFeed::with_capacity(2);
        let id = Uuid::now_v7();
        for seq in 1..=3 {
            assert!(feed.apply_envelope(&envelope(id, seq, "release.withdrawal_recorded")));
        }

        let recent = feed.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].description, "release.withdrawal_recorded #3");
        assert_eq!(recent[1].description, "release.withdrawal_recorded #2");
    }

    #[test]
    fn redelivery_is_ignored() {
        let feed = ActivityFeed::default();
        let id = Uuid::now_v7();
        let first = envelope(id, 1, "release.created");

        assert!(feed.apply_envelope(&first));
        assert!(!feed.apply_envelope(&first));
        assert!(!feed.apply_envelope(&envelope(id, 1, "release.created")));
        assert_eq!(feed.len(), 1);
    }

    #[test]
    fn catch_up_drains_the_subscription() {
        let bus = InMemoryEventBus::new();
        let sub = bus.subscribe();
        let feed = ActivityFeed::default();

        bus.publish(envelope(Uuid::now_v7(), 1, "schedule.created")).unwrap();
        bus.publish(envelope(Uuid::now_v7(), 1, "loading.opened")).unwrap();

        assert_eq!(feed.catch_up(&sub), 2);
        assert_eq!(feed.catch_up(&sub), 0);
        assert_eq!(feed.recent(1)[0].event_type, "loading.opened");
    }
}
