//! Idle object registry

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::RetrievalOrder;

/// Identity and timestamps of a pooled object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Pool-unique, monotonically increasing identity
    pub id: u64,
    pub created_at: Instant,
    pub last_borrowed: Option<Instant>,
    pub last_returned: Option<Instant>,
}

impl ObjectInfo {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            created_at: Instant::now(),
            last_borrowed: None,
            last_returned: None,
        }
    }
}

/// An object sitting in the idle registry
pub(crate) struct IdleEntry<T> {
    pub value: T,
    pub info: ObjectInfo,
    pub idle_since: Instant,
}

impl<T> IdleEntry<T> {
    pub fn new(value: T, info: ObjectInfo) -> Self {
        Self {
            value,
            info,
            idle_since: Instant::now(),
        }
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.idle_since)
    }
}

/// Idle objects ordered by the time they became idle, oldest at the front.
pub(crate) struct IdleRegistry<T> {
    entries: VecDeque<IdleEntry<T>>,
}

impl<T> IdleRegistry<T> {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add a freshly idled object
    pub fn push(&mut self, entry: IdleEntry<T>) {
        debug_assert!(
            self.entries.iter().all(|e| e.info.id != entry.info.id),
            "object {} registered idle twice",
            entry.info.id
        );
        self.entries.push_back(entry);
    }

    pub fn take(&mut self, order: RetrievalOrder) -> Option<IdleEntry<T>> {
        match order {
            RetrievalOrder::Lifo => self.entries.pop_back(),
            RetrievalOrder::Fifo => self.entries.pop_front(),
        }
    }

    /// Remove up to `count` of the longest idle objects, oldest first
    pub fn take_oldest(&mut self, count: usize) -> Vec<IdleEntry<T>> {
        let count = count.min(self.entries.len());
        self.entries.drain(..count).collect()
    }

    /// Put back objects taken with [`take_oldest`](Self::take_oldest),
    /// keeping their original idle timestamps and relative order
    pub fn restore_oldest(&mut self, entries: Vec<IdleEntry<T>>) {
        for entry in entries.into_iter().rev() {
            self.entries.push_front(entry);
        }
    }

    pub fn drain(&mut self) -> Vec<IdleEntry<T>> {
        self.entries.drain(..).collect()
    }
}
