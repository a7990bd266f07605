//! Lifecycle counters for object pools

use std::sync::atomic::{AtomicUsize, Ordering};

/// Snapshot of a pool's counters
///
/// # Examples
///
/// ```
/// use generic_objectpool::{ObjectPool, PoolConfiguration};
///
/// let pool = ObjectPool::from_fn(|| Ok(String::new()), PoolConfiguration::default()).unwrap();
///
/// let obj = pool.borrow().unwrap();
/// let metrics = pool.metrics();
/// assert_eq!(metrics.total_borrowed, 1);
/// assert_eq!(metrics.active_objects, 1);
///
/// pool.return_object(obj).unwrap();
/// assert_eq!(pool.metrics().idle_objects, 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    /// Objects created by the factory
    pub total_created: usize,

    /// Objects handed to the factory for destruction
    pub total_destroyed: usize,

    pub total_borrowed: usize,
    pub total_returned: usize,
    pub total_invalidated: usize,

    /// Borrowed objects detected as lost by reference tracking
    pub total_lost: usize,

    /// Idle objects removed by the evictor
    pub total_evicted: usize,

    /// Objects that failed validation
    pub validation_failures: usize,

    /// Factory hooks that returned an error
    pub factory_failures: usize,

    /// Borrows that found the pool at capacity
    pub exhausted_events: usize,

    /// Borrows that gave up waiting
    pub wait_timeouts: usize,

    pub active_objects: usize,
    pub idle_objects: usize,
    pub waiting_borrowers: usize,
}

/// Internal metrics tracker
#[derive(Default)]
pub(crate) struct MetricsTracker {
    pub total_created: AtomicUsize,
    pub total_destroyed: AtomicUsize,
    pub total_borrowed: AtomicUsize,
    pub total_returned: AtomicUsize,
    pub total_invalidated: AtomicUsize,
    pub total_lost: AtomicUsize,
    pub total_evicted: AtomicUsize,
    pub validation_failures: AtomicUsize,
    pub factory_failures: AtomicUsize,
    pub exhausted_events: AtomicUsize,
    pub wait_timeouts: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_metrics(&self, active: usize, idle: usize, waiting: usize) -> PoolMetrics {
        PoolMetrics {
            total_created: self.total_created.load(Ordering::Relaxed),
            total_destroyed: self.total_destroyed.load(Ordering::Relaxed),
            total_borrowed: self.total_borrowed.load(Ordering::Relaxed),
            total_returned: self.total_returned.load(Ordering::Relaxed),
            total_invalidated: self.total_invalidated.load(Ordering::Relaxed),
            total_lost: self.total_lost.load(Ordering::Relaxed),
            total_evicted: self.total_evicted.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            factory_failures: self.factory_failures.load(Ordering::Relaxed),
            exhausted_events: self.exhausted_events.load(Ordering::Relaxed),
            wait_timeouts: self.wait_timeouts.load(Ordering::Relaxed),
            active_objects: active,
            idle_objects: idle,
            waiting_borrowers: waiting,
        }
    }
}
