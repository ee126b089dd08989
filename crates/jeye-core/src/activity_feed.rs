//! Bounded newest-first buffer of recent agent events.
//!
//! A convenience view, not an audit log: nothing is persisted.

use chrono::{DateTime, Utc};
use jeye_proto::{AgentEvent, EventKind};
use serde::Serialize;
use std::collections::VecDeque;

/// One row in the feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedEntry {
    pub id: String,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub summary: String,
}

impl From<&AgentEvent> for FeedEntry {
    fn from(event: &AgentEvent) -> Self {
        Self {
            id: event.id.clone(),
            kind: event.kind.clone(),
            timestamp: event.timestamp,
            summary: event.summary(),
        }
    }
}

/// Fixed-capacity feed; the oldest entry is evicted first.
#[derive(Debug, Clone)]
pub struct ActivityFeed {
    entries: VecDeque<FeedEntry>,
    capacity: usize,
    evicted: u64,
}

impl ActivityFeed {
    /// Creates a feed holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            evicted: 0,
        }
    }

    /// Records an event at the front of the feed.
    pub fn record(&mut self, event: &AgentEvent) {
        self.push(FeedEntry::from(event));
    }

    pub fn push(&mut self, entry: FeedEntry) {
        self.entries.push_front(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_back();
            self.evicted += 1;
        }
    }

    /// Entries, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &FeedEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total entries dropped to stay within capacity.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}
