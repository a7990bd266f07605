//! Behavior of a borrow that finds the pool at capacity

use std::collections::VecDeque;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// What a borrow does when no idle object is available and the pool holds
/// `max_total` objects
///
/// # Examples
///
/// ```
/// use generic_objectpool::{ExhaustionPolicy, ObjectPool, PoolConfiguration, PoolError};
///
/// let config = PoolConfiguration::new()
///     .with_max_total(1)
///     .with_exhaustion_policy(ExhaustionPolicy::Fail);
/// let pool = ObjectPool::from_fn(|| Ok(0u32), config).unwrap();
///
/// let first = pool.borrow().unwrap();
/// assert!(matches!(pool.borrow(), Err(PoolError::Exhausted)));
/// pool.return_object(first).unwrap();
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ExhaustionPolicy {
    /// Fail immediately with [`PoolError::Exhausted`](crate::PoolError::Exhausted)
    Fail,

    /// Wait for capacity, up to `max_wait`
    #[default]
    Block,

    /// Create a new object anyway; `max_total` is only enforced by eviction
    Grow,
}

/// FIFO queue of blocked borrowers.
///
/// A waiter may only claim capacity while its ticket is at the front, so
/// capacity is granted in the order borrowers started waiting.
#[derive(Debug, Default)]
pub(crate) struct WaitQueue {
    tickets: VecDeque<u64>,
    next_ticket: u64,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.tickets.push_back(ticket);
        ticket
    }

    /// Whether the holder of `ticket` (or a newcomer, for `None`) may claim
    /// capacity now
    pub fn is_turn(&self, ticket: Option<u64>) -> bool {
        match (ticket, self.tickets.front()) {
            (_, None) => true,
            (Some(ticket), Some(&front)) => ticket == front,
            (None, Some(_)) => false,
        }
    }

    pub fn remove(&mut self, ticket: u64) {
        self.tickets.retain(|&t| t != ticket);
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }
}
