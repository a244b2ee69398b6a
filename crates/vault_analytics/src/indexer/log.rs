//! Append-only event log with key-based deduplication.

use crate::events::{EventKey, IndexedEvent, OrderingKey};
use serde::Serialize;
use std::collections::HashSet;
use std::ops::Deref;
use std::sync::Arc;

/// Counts from one [`EventLog::append_batch`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AppendOutcome {
    pub appended: usize,
    pub duplicates: usize,
    /// Unseen events that arrived behind the tail and were placed by ordering key.
    pub reordered: usize,
}

impl AppendOutcome {
    pub fn merge(&mut self, other: AppendOutcome) {
        self.appended += other.appended;
        self.duplicates += other.duplicates;
        self.reordered += other.reordered;
    }
}

/// Immutable view of a log prefix. Cheap to clone; later appends never show up here.
#[derive(Clone, Debug, Default)]
pub struct LogSnapshot(Arc<Vec<IndexedEvent>>);

impl LogSnapshot {
    pub fn events(&self) -> &[IndexedEvent] {
        &self.0
    }
}

impl Deref for LogSnapshot {
    type Target = [IndexedEvent];

    fn deref(&self) -> &[IndexedEvent] {
        &self.0
    }
}

impl From<Vec<IndexedEvent>> for LogSnapshot {
    /// Sorts by ordering key so any event list can stand in for a log.
    fn from(mut events: Vec<IndexedEvent>) -> Self {
        events.sort_by_key(IndexedEvent::ordering_key);
        Self(Arc::new(events))
    }
}

/// Events in ascending ordering key, each `(transactionHash, logIndex)` at most once.
///
/// Storage is shared with outstanding snapshots and copied on the next write.
#[derive(Clone, Debug, Default)]
pub struct EventLog {
    events: Arc<Vec<IndexedEvent>>,
    seen: HashSet<EventKey>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn contains(&self, key: &EventKey) -> bool {
        self.seen.contains(key)
    }

    pub fn last_key(&self) -> Option<OrderingKey> {
        self.events.last().map(IndexedEvent::ordering_key)
    }

    pub fn snapshot(&self) -> LogSnapshot {
        LogSnapshot(Arc::clone(&self.events))
    }

    /// Append unseen events. Duplicates are dropped; an unseen event older
    /// than the tail is inserted after every event with a key not above its own.
    pub fn append_batch(&mut self, batch: impl IntoIterator<Item = IndexedEvent>) -> AppendOutcome {
        let mut outcome = AppendOutcome::default();
        let mut fresh: Vec<IndexedEvent> = Vec::new();
        for ev in batch {
            if self.seen.insert(ev.key()) {
                fresh.push(ev);
            } else {
                outcome.duplicates += 1;
            }
        }
        if fresh.is_empty() {
            return outcome;
        }
        fresh.sort_by_key(IndexedEvent::ordering_key);

        let events = Arc::make_mut(&mut self.events);
        for ev in fresh {
            let key = ev.ordering_key();
            match events.last() {
                Some(tail) if tail.ordering_key() > key => {
                    let at = events.partition_point(|e| e.ordering_key() <= key);
                    events.insert(at, ev);
                    outcome.reordered += 1;
                }
                _ => events.push(ev),
            }
            outcome.appended += 1;
        }
        outcome
    }
}
