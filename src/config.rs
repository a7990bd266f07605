//! Pool configuration options

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::errors::{PoolError, PoolResult};
use crate::exhaustion::ExhaustionPolicy;
use crate::tracking::TrackingPolicy;

/// Order in which idle objects are handed out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RetrievalOrder {
    /// Most recently returned object first
    #[default]
    Lifo,

    /// Longest idle object first
    Fifo,
}

/// Configuration for object pool behavior
///
/// A configuration is never mutated while a pool uses it; pass a complete
/// new value to [`ObjectPool::reconfigure`](crate::ObjectPool::reconfigure)
/// to change settings at runtime.
///
/// # Examples
///
/// ```
/// use generic_objectpool::{ExhaustionPolicy, PoolConfiguration, RetrievalOrder};
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new()
///     .with_max_total(20)
///     .with_max_idle(10)
///     .with_min_idle(2)
///     .with_exhaustion_policy(ExhaustionPolicy::Block)
///     .with_max_wait(Duration::from_millis(250))
///     .with_retrieval_order(RetrievalOrder::Fifo);
///
/// assert_eq!(config.max_total, Some(20));
/// assert_eq!(config.max_idle, Some(10));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfiguration {
    /// Maximum number of objects alive at once (borrowed, idle or in flight).
    /// `None` means unbounded.
    pub max_total: Option<usize>,

    /// Maximum number of idle objects kept in the pool. `None` means unbounded.
    pub max_idle: Option<usize>,

    /// Number of idle objects the evictor tries to maintain
    pub min_idle: usize,

    /// How long a blocking borrow waits. `None` or zero waits indefinitely.
    pub max_wait: Option<Duration>,

    /// Period of the background evictor. `None` or zero disables it.
    pub eviction_interval: Option<Duration>,

    /// Number of idle objects inspected per eviction run
    pub num_tests_per_eviction_run: usize,

    /// Idle time after which an object is always eligible for eviction
    pub min_evictable_idle_time: Option<Duration>,

    /// Idle time after which an object is evicted while more than
    /// `min_idle` objects are idle
    pub soft_min_evictable_idle_time: Option<Duration>,

    pub test_on_borrow: bool,
    pub test_on_return: bool,
    pub test_while_idle: bool,

    pub retrieval_order: RetrievalOrder,

    /// What a borrow does when the pool is at capacity
    pub exhaustion_policy: ExhaustionPolicy,

    /// How borrowed objects are tracked. Fixed for the lifetime of a pool.
    pub tracking_policy: TrackingPolicy,

    /// Under reference tracking, a borrowed object whose holder has not
    /// called [`PooledObject::touch`](crate::PooledObject::touch) within this
    /// period is considered lost.
    pub lease_timeout: Option<Duration>,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            max_total: Some(8),
            max_idle: Some(8),
            min_idle: 0,
            max_wait: None,
            eviction_interval: None,
            num_tests_per_eviction_run: 3,
            min_evictable_idle_time: Some(Duration::from_secs(30 * 60)),
            soft_min_evictable_idle_time: None,
            test_on_borrow: false,
            test_on_return: false,
            test_while_idle: false,
            retrieval_order: RetrievalOrder::Lifo,
            exhaustion_policy: ExhaustionPolicy::Block,
            tracking_policy: TrackingPolicy::Simple,
            lease_timeout: None,
        }
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of objects the pool manages
    pub fn with_max_total(mut self, max: usize) -> Self {
        self.max_total = Some(max);
        self
    }

    /// Remove the limit on the number of objects
    pub fn with_unbounded_total(mut self) -> Self {
        self.max_total = None;
        self
    }

    pub fn with_max_idle(mut self, max: usize) -> Self {
        self.max_idle = Some(max);
        self
    }

    pub fn with_unbounded_idle(mut self) -> Self {
        self.max_idle = None;
        self
    }

    pub fn with_min_idle(mut self, min: usize) -> Self {
        self.min_idle = min;
        self
    }

    /// Set how long a blocking borrow may wait
    pub fn with_max_wait(mut self, wait: Duration) -> Self {
        self.max_wait = Some(wait);
        self
    }

    /// Enable the background evictor
    ///
    /// # Examples
    ///
    /// ```
    /// use generic_objectpool::PoolConfiguration;
    /// use std::time::Duration;
    ///
    /// let config = PoolConfiguration::new()
    ///     .with_eviction(Duration::from_secs(30), 5)
    ///     .with_min_evictable_idle_time(Duration::from_secs(300));
    ///
    /// assert_eq!(config.effective_eviction_interval(), Some(Duration::from_secs(30)));
    /// assert_eq!(config.num_tests_per_eviction_run, 5);
    /// ```
    pub fn with_eviction(mut self, interval: Duration, tests_per_run: usize) -> Self {
        self.eviction_interval = Some(interval);
        self.num_tests_per_eviction_run = tests_per_run;
        self
    }

    pub fn with_min_evictable_idle_time(mut self, idle: Duration) -> Self {
        self.min_evictable_idle_time = Some(idle);
        self
    }

    pub fn with_soft_min_evictable_idle_time(mut self, idle: Duration) -> Self {
        self.soft_min_evictable_idle_time = Some(idle);
        self
    }

    pub fn with_test_on_borrow(mut self, enabled: bool) -> Self {
        self.test_on_borrow = enabled;
        self
    }

    pub fn with_test_on_return(mut self, enabled: bool) -> Self {
        self.test_on_return = enabled;
        self
    }

    pub fn with_test_while_idle(mut self, enabled: bool) -> Self {
        self.test_while_idle = enabled;
        self
    }

    pub fn with_retrieval_order(mut self, order: RetrievalOrder) -> Self {
        self.retrieval_order = order;
        self
    }

    pub fn with_exhaustion_policy(mut self, policy: ExhaustionPolicy) -> Self {
        self.exhaustion_policy = policy;
        self
    }

    pub fn with_tracking_policy(mut self, policy: TrackingPolicy) -> Self {
        self.tracking_policy = policy;
        self
    }

    /// Set the heartbeat grace period for reference tracking
    pub fn with_lease_timeout(mut self, timeout: Duration) -> Self {
        self.lease_timeout = Some(timeout);
        self
    }

    /// Blocking wait limit, with zero folded into "wait forever"
    pub fn effective_max_wait(&self) -> Option<Duration> {
        self.max_wait.filter(|wait| !wait.is_zero())
    }

    /// Evictor period, with zero folded into "disabled"
    pub fn effective_eviction_interval(&self) -> Option<Duration> {
        self.eviction_interval.filter(|interval| !interval.is_zero())
    }

    /// Check the configuration for contradictory settings
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_total == Some(0) {
            return Err(PoolError::InvalidConfiguration(
                "max_total must be greater than 0".to_string(),
            ));
        }
        if let Some(max_idle) = self.max_idle
            && self.min_idle > max_idle
        {
            return Err(PoolError::InvalidConfiguration(format!(
                "min_idle ({}) must not exceed max_idle ({})",
                self.min_idle, max_idle
            )));
        }
        if let Some(max_total) = self.max_total
            && self.min_idle > max_total
        {
            return Err(PoolError::InvalidConfiguration(format!(
                "min_idle ({}) must not exceed max_total ({})",
                self.min_idle, max_total
            )));
        }
        if self.lease_timeout.is_some() && !self.tracking_policy.tracks_references() {
            return Err(PoolError::InvalidConfiguration(
                "lease_timeout requires Reference or Debug tracking".to_string(),
            ));
        }
        Ok(())
    }
}
