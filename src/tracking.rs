//! Borrowed object tracking and lost object detection
//!
//! Rust has no garbage collector to tell the pool that a borrowed object
//! became unreachable, so reference tracking hands each borrower a [`Lease`]
//! (a liveness token) inside the [`PooledObject`](crate::PooledObject):
//!
//! - dropping the object without returning it drops the lease, which queues
//!   its id as reclaimed;
//! - with a lease timeout configured, a lease whose holder stopped calling
//!   [`PooledObject::touch`](crate::PooledObject::touch) is treated as lost
//!   once the timeout passes, which also catches leaked (`mem::forget`)
//!   objects.
//!
//! Either way the loss is only acted on by the next borrow or return, so
//! detection is best-effort rather than immediate.

use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{PoolError, PoolResult};

/// How the pool keeps track of borrowed objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TrackingPolicy {
    /// Count borrows only. Mismatched returns go unnoticed and lost objects
    /// permanently use up capacity, so this does not combine well with a
    /// bounded pool.
    Null,

    /// Count borrows and trust callers to return them. Returning more than
    /// was borrowed is an [`IllegalState`](crate::PoolError::IllegalState).
    #[default]
    Simple,

    /// Track each borrowed object and detect objects dropped without being
    /// returned
    Reference,

    /// Like `Reference`, and log the borrow site of every lost object
    Debug,
}

impl TrackingPolicy {
    /// Whether borrowed objects carry a lease
    pub fn tracks_references(self) -> bool {
        matches!(self, TrackingPolicy::Reference | TrackingPolicy::Debug)
    }
}

/// Receives the ids of leases dropped by their holder
pub(crate) trait LeaseListener: Send + Sync {
    fn lease_dropped(&self, id: u64);
}

/// State shared between a lease and its tracking record
#[derive(Debug)]
struct LeaseState {
    last_seen: Mutex<Instant>,
    settled: AtomicBool,
}

impl LeaseState {
    fn settle(&self) -> bool {
        !self.settled.swap(true, Ordering::AcqRel)
    }
}

/// Liveness token carried by a borrowed object under reference tracking
pub(crate) struct Lease {
    id: u64,
    state: Arc<LeaseState>,
    listener: Weak<dyn LeaseListener>,
}

impl Lease {
    pub fn touch(&self) {
        *self.state.last_seen.lock() = Instant::now();
    }

    /// Mark the lease as accounted for, so dropping it reports nothing
    pub fn settle(&self) {
        self.state.settle();
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.state.settle()
            && let Some(listener) = self.listener.upgrade()
        {
            listener.lease_dropped(self.id);
        }
    }
}

struct TrackingRecord {
    lease: Arc<LeaseState>,
    borrowed_at: Instant,
    backtrace: Option<Backtrace>,
}

/// Active set bookkeeping for one pool
pub(crate) struct ActiveTracker {
    policy: TrackingPolicy,
    count: usize,
    records: HashMap<u64, TrackingRecord>,
    reclaimed: Vec<u64>,
}

impl ActiveTracker {
    pub fn new(policy: TrackingPolicy) -> Self {
        Self {
            policy,
            count: 0,
            records: HashMap::new(),
            reclaimed: Vec::new(),
        }
    }

    pub fn policy(&self) -> TrackingPolicy {
        self.policy
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Record a borrow. Returns the lease the borrower must carry, if the
    /// policy uses one.
    pub fn register(&mut self, id: u64, listener: Weak<dyn LeaseListener>) -> Option<Lease> {
        self.count += 1;
        match self.policy {
            TrackingPolicy::Null | TrackingPolicy::Simple => None,
            TrackingPolicy::Reference | TrackingPolicy::Debug => {
                let now = Instant::now();
                let state = Arc::new(LeaseState {
                    last_seen: Mutex::new(now),
                    settled: AtomicBool::new(false),
                });
                let backtrace = (self.policy == TrackingPolicy::Debug).then(Backtrace::force_capture);
                self.records.insert(
                    id,
                    TrackingRecord {
                        lease: Arc::clone(&state),
                        borrowed_at: now,
                        backtrace,
                    },
                );
                Some(Lease { id, state, listener })
            }
        }
    }

    /// Record the end of a borrow, by return or invalidation.
    ///
    /// `from_this_pool` is false when the object carries another pool's
    /// identity, which every policy rejects. The tracker is left untouched
    /// on error.
    pub fn release(&mut self, id: u64, from_this_pool: bool) -> PoolResult<()> {
        if !from_this_pool {
            return Err(PoolError::UnknownObject(id));
        }
        match self.policy {
            TrackingPolicy::Null => {
                self.count = self.count.saturating_sub(1);
                Ok(())
            }
            TrackingPolicy::Simple => match self.count.checked_sub(1) {
                Some(count) => {
                    self.count = count;
                    Ok(())
                }
                None => Err(PoolError::IllegalState(format!(
                    "object {id} returned but no objects are borrowed"
                ))),
            },
            TrackingPolicy::Reference | TrackingPolicy::Debug => {
                if self.records.remove(&id).is_none() {
                    return Err(PoolError::UnknownObject(id));
                }
                self.count -= 1;
                Ok(())
            }
        }
    }

    /// Queue the id of a lease whose holder dropped it
    pub fn note_reclaimed(&mut self, id: u64) {
        self.reclaimed.push(id);
    }

    /// Forget borrowed objects that were dropped, or whose lease expired.
    /// Returns how many were lost.
    pub fn collect_lost(&mut self, lease_timeout: Option<Duration>) -> usize {
        if !self.policy.tracks_references() {
            return 0;
        }

        let mut lost = 0;
        for id in std::mem::take(&mut self.reclaimed) {
            if let Some(record) = self.records.remove(&id) {
                self.report_lost(id, &record, "dropped without being returned");
                lost += 1;
            }
        }

        if let Some(timeout) = lease_timeout {
            let now = Instant::now();
            let expired: Vec<u64> = self
                .records
                .iter()
                .filter(|(_, record)| {
                    now.saturating_duration_since(*record.lease.last_seen.lock()) > timeout
                })
                .map(|(&id, _)| id)
                .collect();

            for id in expired {
                if let Some(record) = self.records.remove(&id) {
                    record.lease.settle();
                    self.report_lost(id, &record, "lease expired");
                    lost += 1;
                }
            }
        }

        self.count -= lost;
        lost
    }

    fn report_lost(&self, id: u64, record: &TrackingRecord, reason: &str) {
        let borrowed_for = record.borrowed_at.elapsed();
        match &record.backtrace {
            Some(backtrace) => warn!(
                object_id = id,
                ?borrowed_for,
                "Borrowed object lost ({}); borrowed at:\n{}",
                reason,
                backtrace
            ),
            None => debug!(object_id = id, ?borrowed_for, "Borrowed object lost ({})", reason),
        }
    }
}
