//! Core object pool implementation

use crate::cancel::CancelToken;
use crate::config::PoolConfiguration;
use crate::errors::{FactoryError, LifecycleOp, PoolError, PoolResult};
use crate::eviction::{self, Evictor};
use crate::exhaustion::{ExhaustionPolicy, WaitQueue};
use crate::factory::{FnFactory, ObjectFactory};
use crate::idle::{IdleEntry, IdleRegistry, ObjectInfo};
use crate::metrics::{MetricsTracker, PoolMetrics};
use crate::tracking::{ActiveTracker, Lease, LeaseListener, TrackingPolicy};

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// An object borrowed from an [`ObjectPool`].
///
/// Give it back with [`ObjectPool::return_object`] or dispose of it with
/// [`ObjectPool::invalidate`]. Dropping it instead loses the object: under
/// reference tracking the pool notices and frees its slot, otherwise the
/// slot stays taken.
pub struct PooledObject<T> {
    value: T,
    info: ObjectInfo,
    pool_id: u64,
    lease: Option<Lease>,
}

impl<T> PooledObject<T> {
    /// Pool-unique identity of this object
    pub fn id(&self) -> u64 {
        self.info.id
    }

    /// Identity and lifecycle timestamps of this object
    pub fn info(&self) -> &ObjectInfo {
        &self.info
    }

    /// Signal that the object is still in use, renewing its lease when the
    /// pool runs with a lease timeout
    pub fn touch(&self) {
        if let Some(lease) = &self.lease {
            lease.touch();
        }
    }
}

impl<T> Deref for PooledObject<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<T> DerefMut for PooledObject<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for PooledObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledObject")
            .field("value", &self.value)
            .field("info", &self.info)
            .finish()
    }
}

/// A borrowed object that returns itself to the pool when dropped
pub struct PooledGuard<'a, T: Send + 'static> {
    pool: &'a ObjectPool<T>,
    object: Option<PooledObject<T>>,
}

impl<T: Send + 'static> PooledGuard<'_, T> {
    /// Destroy the object instead of returning it
    pub fn invalidate(mut self) -> PoolResult<()> {
        match self.object.take() {
            Some(object) => self.pool.invalidate(object),
            None => Ok(()),
        }
    }

    /// Release the object from the guard without returning it
    pub fn into_inner(mut self) -> PooledObject<T> {
        self.object.take().expect("guard already released")
    }
}

impl<T: Send + 'static> Deref for PooledGuard<'_, T> {
    type Target = PooledObject<T>;

    fn deref(&self) -> &Self::Target {
        self.object.as_ref().expect("guard already released")
    }
}

impl<T: Send + 'static> DerefMut for PooledGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.object.as_mut().expect("guard already released")
    }
}

impl<T: Send + 'static> Drop for PooledGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(object) = self.object.take() {
            let id = object.id();
            if let Err(err) = self.pool.return_object(object) {
                warn!(object_id = id, %err, "Failed to return guarded object");
            }
        }
    }
}

/// Pool-wide state, guarded by a single mutex
struct PoolState<T> {
    config: Arc<PoolConfiguration>,
    idle: IdleRegistry<T>,
    tracker: ActiveTracker,
    waiters: WaitQueue,
    /// Objects owned by a borrow, return or maintenance step running outside
    /// the lock. They count toward `max_total`.
    in_flight: usize,
    closed: bool,
}

impl<T> PoolState<T> {
    fn total(&self) -> usize {
        self.tracker.count() + self.idle.len() + self.in_flight
    }

    fn has_capacity(&self) -> bool {
        self.config.max_total.is_none_or(|max| self.total() < max)
    }

    fn has_idle_room(&self) -> bool {
        self.config.max_idle.is_none_or(|max| self.idle.len() < max)
    }
}

struct PoolInner<T> {
    id: u64,
    factory: Box<dyn ObjectFactory<T>>,
    state: Mutex<PoolState<T>>,
    /// Signalled whenever capacity may have become available
    capacity_changed: Condvar,
    metrics: MetricsTracker,
    evictor: Mutex<Option<Evictor>>,
    next_object_id: AtomicU64,
    this: Weak<PoolInner<T>>,
}

/// Thread-safe pool of factory-made objects
///
/// # Examples
///
/// ```
/// use generic_objectpool::{ObjectPool, PoolConfiguration, RetrievalOrder};
///
/// let config = PoolConfiguration::new()
///     .with_max_total(4)
///     .with_retrieval_order(RetrievalOrder::Lifo);
/// let pool = ObjectPool::from_fn(|| Ok(Vec::<u8>::with_capacity(1024)), config).unwrap();
///
/// let mut buf = pool.borrow().unwrap();
/// buf.extend_from_slice(b"hello");
/// assert_eq!(pool.num_active(), 1);
///
/// pool.return_object(buf).unwrap();
/// assert_eq!(pool.num_active(), 0);
/// assert_eq!(pool.num_idle(), 1);
///
/// pool.close();
/// assert!(pool.borrow().is_err());
/// ```
pub struct ObjectPool<T: Send + 'static> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Send + 'static> Clone for ObjectPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ObjectPool")
            .field("id", &self.inner.id)
            .field("active", &state.tracker.count())
            .field("idle", &state.idle.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl<T: Send + 'static> ObjectPool<T> {
    /// Create a pool around `factory`. Starts the evictor thread when the
    /// configuration enables eviction.
    pub fn new<F>(factory: F, config: PoolConfiguration) -> PoolResult<Self>
    where
        F: ObjectFactory<T> + 'static,
    {
        config.validate()?;
        if config.tracking_policy == TrackingPolicy::Null
            && config.max_total.is_some()
            && config.exhaustion_policy != ExhaustionPolicy::Grow
        {
            warn!("Null tracking on a bounded pool: objects never returned keep their slot forever");
        }

        let interval = config.effective_eviction_interval();
        let tracking = config.tracking_policy;
        let inner = Arc::new_cyclic(|this| PoolInner {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            factory: Box::new(factory),
            state: Mutex::new(PoolState {
                config: Arc::new(config),
                idle: IdleRegistry::new(),
                tracker: ActiveTracker::new(tracking),
                waiters: WaitQueue::new(),
                in_flight: 0,
                closed: false,
            }),
            capacity_changed: Condvar::new(),
            metrics: MetricsTracker::new(),
            evictor: Mutex::new(None),
            next_object_id: AtomicU64::new(1),
            this: this.clone(),
        });

        if let Some(interval) = interval {
            inner.start_evictor(interval)?;
        }
        debug!(pool_id = inner.id, ?tracking, ?interval, "Created object pool");

        Ok(Self { inner })
    }

    /// Create a pool whose objects come from a closure, with no-op
    /// activation, passivation, validation and destruction
    pub fn from_fn<F>(create: F, config: PoolConfiguration) -> PoolResult<Self>
    where
        F: Fn() -> Result<T, FactoryError> + Send + Sync + 'static,
    {
        Self::new(FnFactory::new(create), config)
    }

    /// Borrow an object, waiting for one when the pool is exhausted and
    /// configured to block
    pub fn borrow(&self) -> PoolResult<PooledObject<T>> {
        self.inner.borrow(None)
    }

    /// Like [`borrow`](Self::borrow), but gives up with
    /// [`PoolError::Cancelled`] once `token` is cancelled
    pub fn borrow_with_cancel(&self, token: &CancelToken) -> PoolResult<PooledObject<T>> {
        self.inner.borrow(Some(token))
    }

    /// Borrow from async code without blocking the runtime.
    ///
    /// The wait runs on tokio's blocking thread pool. Dropping the returned
    /// future cancels the wait; an object obtained after that point goes
    /// straight back to the pool.
    pub async fn borrow_async(&self) -> PoolResult<PooledObject<T>> {
        let token = CancelToken::new();
        let _cancel_on_drop = token.drop_guard();
        let pool = self.clone();

        tokio::task::spawn_blocking(move || -> PoolResult<PooledObject<T>> {
            let object = pool.borrow_with_cancel(&token)?;
            if token.is_cancelled() {
                pool.return_object(object)?;
                return Err(PoolError::Cancelled);
            }
            Ok(object)
        })
        .await
        .map_err(|_| PoolError::Cancelled)?
    }

    /// Borrow an object wrapped in a guard that returns it on drop
    ///
    /// # Examples
    ///
    /// ```
    /// use generic_objectpool::{ObjectPool, PoolConfiguration};
    ///
    /// let pool = ObjectPool::from_fn(|| Ok(String::new()), PoolConfiguration::default()).unwrap();
    /// {
    ///     let mut s = pool.borrow_guarded().unwrap();
    ///     s.push_str("scratch");
    /// }
    /// assert_eq!(pool.num_active(), 0);
    /// assert_eq!(pool.num_idle(), 1);
    /// ```
    pub fn borrow_guarded(&self) -> PoolResult<PooledGuard<'_, T>> {
        let object = self.borrow()?;
        Ok(PooledGuard {
            pool: self,
            object: Some(object),
        })
    }

    /// Give a borrowed object back to the pool
    pub fn return_object(&self, object: PooledObject<T>) -> PoolResult<()> {
        self.inner.return_object(object)
    }

    /// Destroy a borrowed object instead of returning it
    pub fn invalidate(&self, object: PooledObject<T>) -> PoolResult<()> {
        self.inner.invalidate(object)
    }

    /// Create an object and add it to the idle set
    pub fn add_object(&self) -> PoolResult<()> {
        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(PoolError::Closed);
            }
            if !state.has_capacity() {
                return Err(PoolError::Exhausted);
            }
            state.in_flight += 1;
        }
        self.inner.create_idle()
    }

    /// Pre-populate the pool with up to `count` idle objects, stopping early
    /// when it is full
    pub fn warmup(&self, count: usize) -> PoolResult<()> {
        for _ in 0..count {
            match self.add_object() {
                Ok(()) => {}
                Err(PoolError::Exhausted) => break,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Run one eviction pass and top the idle set back up to `min_idle`,
    /// as the background evictor would
    pub fn evict(&self) -> PoolResult<()> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }
        self.inner.run_maintenance();
        Ok(())
    }

    /// Destroy every idle object. The pool stays usable.
    pub fn clear(&self) {
        let idle = {
            let mut state = self.inner.state.lock();
            let idle = state.idle.drain();
            state.in_flight += idle.len();
            idle
        };
        self.inner.destroy_batch(idle);
    }

    /// Replace the whole configuration.
    ///
    /// Waiting borrowers re-check capacity against the new limits, idle
    /// objects beyond the new `max_idle` are destroyed oldest first, and the
    /// evictor is restarted if its interval changed. The tracking policy
    /// cannot change on a live pool.
    pub fn reconfigure(&self, config: PoolConfiguration) -> PoolResult<()> {
        config.validate()?;
        let interval = config.effective_eviction_interval();

        let trimmed = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(PoolError::Closed);
            }
            if config.tracking_policy != state.tracker.policy() {
                return Err(PoolError::InvalidConfiguration(format!(
                    "tracking policy is fixed at {:?} for this pool",
                    state.tracker.policy()
                )));
            }
            let excess = config
                .max_idle
                .map_or(0, |max| state.idle.len().saturating_sub(max));
            state.config = Arc::new(config);
            let trimmed = state.idle.take_oldest(excess);
            state.in_flight += trimmed.len();
            self.inner.capacity_changed.notify_all();
            trimmed
        };
        self.inner.destroy_batch(trimmed);

        let current = self.inner.evictor.lock().as_ref().map(Evictor::interval);
        if current != interval {
            match interval {
                Some(interval) => self.inner.start_evictor(interval)?,
                None => self.inner.stop_evictor(),
            }
        }

        info!(pool_id = self.inner.id, "Reconfigured object pool");
        Ok(())
    }

    /// Close the pool: destroy idle objects, stop the evictor and fail all
    /// further borrows. Objects still borrowed are destroyed when returned.
    pub fn close(&self) {
        let idle = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let idle = state.idle.drain();
            state.in_flight += idle.len();
            self.inner.capacity_changed.notify_all();
            idle
        };

        self.inner.stop_evictor();
        let destroyed = idle.len();
        self.inner.destroy_batch(idle);

        info!(
            pool_id = self.inner.id,
            destroyed,
            still_borrowed = self.num_active(),
            "Closed object pool"
        );
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Number of objects currently borrowed
    pub fn num_active(&self) -> usize {
        self.inner.state.lock().tracker.count()
    }

    /// Number of objects currently idle
    pub fn num_idle(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Number of borrowers blocked waiting for capacity
    pub fn num_waiters(&self) -> usize {
        self.inner.state.lock().waiters.len()
    }

    /// The configuration currently in effect
    pub fn config(&self) -> Arc<PoolConfiguration> {
        Arc::clone(&self.inner.state.lock().config)
    }

    /// Snapshot of the lifecycle counters and current sizes
    pub fn metrics(&self) -> PoolMetrics {
        let state = self.inner.state.lock();
        self.inner.metrics.get_metrics(
            state.tracker.count(),
            state.idle.len(),
            state.waiters.len(),
        )
    }
}

impl<T: Send + 'static> PoolInner<T> {
    fn borrow(&self, cancel: Option<&CancelToken>) -> PoolResult<PooledObject<T>> {
        let _registration = cancel.map(|token| token.register(self.cancel_waker()));
        let mut ticket = None;
        let mut wait_started = None;

        loop {
            let mut state = self.state.lock();
            self.collect_lost(&mut state);

            if state.closed {
                self.leave_queue(&mut state, &mut ticket);
                return Err(PoolError::Closed);
            }
            if cancel.is_some_and(CancelToken::is_cancelled) {
                self.leave_queue(&mut state, &mut ticket);
                return Err(PoolError::Cancelled);
            }

            let config = Arc::clone(&state.config);
            if state.waiters.is_turn(ticket) {
                if let Some(entry) = state.idle.take(config.retrieval_order) {
                    state.in_flight += 1;
                    self.leave_queue(&mut state, &mut ticket);
                    drop(state);
                    match self.prepare_idle(entry, &config) {
                        Some(entry) => return self.lend(entry),
                        None => continue,
                    }
                }
                if state.has_capacity() {
                    state.in_flight += 1;
                    self.leave_queue(&mut state, &mut ticket);
                    drop(state);
                    return self.create_for_borrow(&config);
                }
            }

            match config.exhaustion_policy {
                ExhaustionPolicy::Fail => {
                    self.leave_queue(&mut state, &mut ticket);
                    self.metrics.exhausted_events.fetch_add(1, Ordering::Relaxed);
                    return Err(PoolError::Exhausted);
                }
                ExhaustionPolicy::Grow => {
                    state.in_flight += 1;
                    self.leave_queue(&mut state, &mut ticket);
                    drop(state);
                    return self.create_for_borrow(&config);
                }
                ExhaustionPolicy::Block => {
                    if ticket.is_none() {
                        ticket = Some(state.waiters.enqueue());
                        self.metrics.exhausted_events.fetch_add(1, Ordering::Relaxed);
                    }
                    let started = *wait_started.get_or_insert_with(Instant::now);
                    match config.effective_max_wait() {
                        Some(max_wait) => {
                            let deadline = started + max_wait;
                            if Instant::now() >= deadline {
                                self.leave_queue(&mut state, &mut ticket);
                                self.metrics.wait_timeouts.fetch_add(1, Ordering::Relaxed);
                                return Err(PoolError::Timeout(max_wait));
                            }
                            let _ = self.capacity_changed.wait_until(&mut state, deadline);
                        }
                        None => self.capacity_changed.wait(&mut state),
                    }
                }
            }
        }
    }

    /// Drop out of the wait queue, letting the next waiter check for capacity
    fn leave_queue(&self, state: &mut PoolState<T>, ticket: &mut Option<u64>) {
        if let Some(ticket) = ticket.take() {
            state.waiters.remove(ticket);
            if !state.waiters.is_empty() {
                self.capacity_changed.notify_all();
            }
        }
    }

    fn cancel_waker(&self) -> Arc<dyn Fn() + Send + Sync> {
        let pool = self.this.clone();
        Arc::new(move || {
            if let Some(pool) = pool.upgrade() {
                let _state = pool.state.lock();
                pool.capacity_changed.notify_all();
            }
        })
    }

    fn listener(&self) -> Weak<dyn LeaseListener> {
        self.this.clone()
    }

    fn collect_lost(&self, state: &mut PoolState<T>) {
        let lost = state.tracker.collect_lost(state.config.lease_timeout);
        if lost > 0 {
            self.metrics.total_lost.fetch_add(lost, Ordering::Relaxed);
            self.capacity_changed.notify_all();
        }
    }

    /// Activate and optionally validate an object taken from the idle set.
    /// Returns `None` when it had to be destroyed.
    fn prepare_idle(&self, mut entry: IdleEntry<T>, config: &PoolConfiguration) -> Option<IdleEntry<T>> {
        let id = entry.info.id;
        if let Err(err) = self.factory.activate(&mut entry.value) {
            self.metrics.factory_failures.fetch_add(1, Ordering::Relaxed);
            debug!(object_id = id, %err, "Failed to activate idle object, destroying it");
            self.destroy_in_flight(entry.value, id);
            return None;
        }
        if config.test_on_borrow && !self.factory.validate(&entry.value) {
            self.metrics.validation_failures.fetch_add(1, Ordering::Relaxed);
            debug!(object_id = id, "Idle object failed validation, destroying it");
            self.destroy_in_flight(entry.value, id);
            return None;
        }
        Some(entry)
    }

    /// Create, activate and hand out a new object in a slot already reserved
    fn create_for_borrow(&self, config: &PoolConfiguration) -> PoolResult<PooledObject<T>> {
        let mut entry = match self.create_entry() {
            Ok(entry) => entry,
            Err(err) => {
                self.release_in_flight(1);
                return Err(PoolError::factory(LifecycleOp::Create, err));
            }
        };
        let id = entry.info.id;

        if let Err(err) = self.factory.activate(&mut entry.value) {
            self.metrics.factory_failures.fetch_add(1, Ordering::Relaxed);
            self.destroy_in_flight(entry.value, id);
            return Err(PoolError::factory(LifecycleOp::Activate, err));
        }
        if config.test_on_borrow && !self.factory.validate(&entry.value) {
            self.metrics.validation_failures.fetch_add(1, Ordering::Relaxed);
            self.destroy_in_flight(entry.value, id);
            return Err(PoolError::ValidationFailed);
        }
        self.lend(entry)
    }

    /// Register an in-flight object as borrowed and wrap it for the caller
    fn lend(&self, entry: IdleEntry<T>) -> PoolResult<PooledObject<T>> {
        let IdleEntry { value, mut info, .. } = entry;

        let mut state = self.state.lock();
        if state.closed {
            drop(state);
            self.destroy_in_flight(value, info.id);
            return Err(PoolError::Closed);
        }
        state.in_flight -= 1;
        let lease = state.tracker.register(info.id, self.listener());
        drop(state);

        info.last_borrowed = Some(Instant::now());
        self.metrics.total_borrowed.fetch_add(1, Ordering::Relaxed);
        trace!(pool_id = self.id, object_id = info.id, "Borrowed object");

        Ok(PooledObject {
            value,
            info,
            pool_id: self.id,
            lease,
        })
    }

    /// Take a returned or invalidated object off the active set and make it
    /// in-flight. Returns the current configuration and whether the pool is
    /// closed.
    fn check_in(&self, id: u64, pool_id: u64, lease: Option<Lease>) -> PoolResult<(Arc<PoolConfiguration>, bool)> {
        let mut state = self.state.lock();
        self.collect_lost(&mut state);

        if let Err(err) = state.tracker.release(id, pool_id == self.id) {
            drop(state);
            debug!(pool_id = self.id, object_id = id, %err, "Rejected object");
            // An unsettled lease reports the loss to the pool it came from
            drop(lease);
            return Err(err);
        }
        if let Some(lease) = &lease {
            lease.settle();
        }
        state.in_flight += 1;
        let checked_in = (Arc::clone(&state.config), state.closed);
        drop(state);
        drop(lease);
        Ok(checked_in)
    }

    fn return_object(&self, object: PooledObject<T>) -> PoolResult<()> {
        let PooledObject {
            mut value,
            mut info,
            pool_id,
            lease,
        } = object;
        let (config, closed) = self.check_in(info.id, pool_id, lease)?;

        info.last_returned = Some(Instant::now());
        self.metrics.total_returned.fetch_add(1, Ordering::Relaxed);
        trace!(pool_id = self.id, object_id = info.id, "Returned object");

        if closed {
            self.destroy_in_flight(value, info.id);
            return Ok(());
        }
        if config.test_on_return && !self.factory.validate(&value) {
            self.metrics.validation_failures.fetch_add(1, Ordering::Relaxed);
            debug!(object_id = info.id, "Returned object failed validation, destroying it");
            self.destroy_in_flight(value, info.id);
            return Ok(());
        }
        if let Err(err) = self.factory.passivate(&mut value) {
            self.metrics.factory_failures.fetch_add(1, Ordering::Relaxed);
            self.destroy_in_flight(value, info.id);
            return Err(PoolError::factory(LifecycleOp::Passivate, err));
        }

        self.park(IdleEntry::new(value, info));
        Ok(())
    }

    fn invalidate(&self, object: PooledObject<T>) -> PoolResult<()> {
        let PooledObject {
            value,
            info,
            pool_id,
            lease,
        } = object;
        self.check_in(info.id, pool_id, lease)?;

        self.metrics.total_invalidated.fetch_add(1, Ordering::Relaxed);
        debug!(pool_id = self.id, object_id = info.id, "Invalidating object");
        let result = self.destroy(value, info.id);
        self.release_in_flight(1);
        result.map_err(|err| PoolError::factory(LifecycleOp::Destroy, err))
    }

    /// Create and passivate an object into a slot already reserved, then
    /// park it in the idle set
    fn create_idle(&self) -> PoolResult<()> {
        let mut entry = match self.create_entry() {
            Ok(entry) => entry,
            Err(err) => {
                self.release_in_flight(1);
                return Err(PoolError::factory(LifecycleOp::Create, err));
            }
        };
        if let Err(err) = self.factory.passivate(&mut entry.value) {
            self.metrics.factory_failures.fetch_add(1, Ordering::Relaxed);
            self.destroy_in_flight(entry.value, entry.info.id);
            return Err(PoolError::factory(LifecycleOp::Passivate, err));
        }
        self.park(entry);
        Ok(())
    }

    fn create_entry(&self) -> Result<IdleEntry<T>, FactoryError> {
        match self.factory.create() {
            Ok(value) => {
                let id = self.next_object_id.fetch_add(1, Ordering::Relaxed);
                self.metrics.total_created.fetch_add(1, Ordering::Relaxed);
                debug!(pool_id = self.id, object_id = id, "Created object");
                Ok(IdleEntry::new(value, ObjectInfo::new(id)))
            }
            Err(err) => {
                self.metrics.factory_failures.fetch_add(1, Ordering::Relaxed);
                debug!(pool_id = self.id, %err, "Failed to create object");
                Err(err)
            }
        }
    }

    /// Move an in-flight object into the idle set, or destroy it when the
    /// pool is closed or already holds `max_idle` objects
    fn park(&self, entry: IdleEntry<T>) {
        let mut state = self.state.lock();
        if !state.closed && state.has_idle_room() {
            state.in_flight -= 1;
            state.idle.push(entry);
            self.capacity_changed.notify_all();
            return;
        }
        drop(state);
        self.destroy_in_flight(entry.value, entry.info.id);
    }

    fn destroy(&self, value: T, id: u64) -> Result<(), FactoryError> {
        self.metrics.total_destroyed.fetch_add(1, Ordering::Relaxed);
        let result = self.factory.destroy(value);
        match &result {
            Ok(()) => trace!(pool_id = self.id, object_id = id, "Destroyed object"),
            Err(err) => {
                self.metrics.factory_failures.fetch_add(1, Ordering::Relaxed);
                warn!(pool_id = self.id, object_id = id, %err, "Failed to destroy object");
            }
        }
        result
    }

    fn destroy_in_flight(&self, value: T, id: u64) {
        let _ = self.destroy(value, id);
        self.release_in_flight(1);
    }

    fn destroy_batch(&self, entries: Vec<IdleEntry<T>>) {
        if entries.is_empty() {
            return;
        }
        let count = entries.len();
        for entry in entries {
            let _ = self.destroy(entry.value, entry.info.id);
        }
        self.release_in_flight(count);
    }

    fn release_in_flight(&self, count: usize) {
        let mut state = self.state.lock();
        state.in_flight -= count;
        self.capacity_changed.notify_all();
    }

    fn start_evictor(&self, interval: Duration) -> PoolResult<()> {
        let pool = self.this.clone();
        let evictor = Evictor::start(interval, move || match pool.upgrade() {
            Some(pool) => {
                pool.run_maintenance();
                !pool.state.lock().closed
            }
            None => false,
        })
        .map_err(|err| PoolError::IllegalState(format!("failed to start evictor thread: {err}")))?;

        let previous = self.evictor.lock().replace(evictor);
        if let Some(previous) = previous {
            previous.shutdown();
        }
        Ok(())
    }

    fn stop_evictor(&self) {
        let evictor = self.evictor.lock().take();
        if let Some(evictor) = evictor {
            evictor.shutdown();
        }
    }

    fn run_maintenance(&self) {
        self.evict_idle();
        self.ensure_min_idle();
    }

    /// Inspect the oldest idle objects, destroying those idle too long and,
    /// with `test_while_idle`, those failing validation
    fn evict_idle(&self) {
        let (evicted, to_test) = {
            let mut state = self.state.lock();
            if state.closed || state.idle.is_empty() {
                return;
            }
            let config = Arc::clone(&state.config);
            let now = Instant::now();
            let batch = state.idle.take_oldest(config.num_tests_per_eviction_run);
            let mut idle_count = state.idle.len() + batch.len();

            let mut evicted = Vec::new();
            let mut to_test = Vec::new();
            let mut kept = Vec::new();
            for entry in batch {
                if eviction::is_evictable(entry.idle_for(now), idle_count, &config) {
                    idle_count -= 1;
                    evicted.push(entry);
                } else if config.test_while_idle {
                    to_test.push(entry);
                } else {
                    kept.push(entry);
                }
            }
            state.idle.restore_oldest(kept);
            state.in_flight += evicted.len() + to_test.len();
            (evicted, to_test)
        };

        if !evicted.is_empty() {
            self.metrics.total_evicted.fetch_add(evicted.len(), Ordering::Relaxed);
            debug!(pool_id = self.id, count = evicted.len(), "Evicting idle objects");
        }
        self.destroy_batch(evicted);

        let (passed, failed): (Vec<_>, Vec<_>) = to_test
            .into_iter()
            .map(|mut entry| {
                let healthy = self.test_idle(&mut entry);
                (entry, healthy)
            })
            .partition(|(_, healthy)| *healthy);
        self.destroy_batch(failed.into_iter().map(|(entry, _)| entry).collect());

        let mut passed: Vec<_> = passed.into_iter().map(|(entry, _)| entry).collect();
        if passed.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        if state.closed {
            drop(state);
            self.destroy_batch(passed);
            return;
        }
        // Returns may have filled the idle set while these were under test
        let room = state
            .config
            .max_idle
            .map_or(passed.len(), |max| max.saturating_sub(state.idle.len()));
        let surplus = passed.split_off(room.min(passed.len()));
        state.in_flight -= passed.len();
        state.idle.restore_oldest(passed);
        self.capacity_changed.notify_all();
        drop(state);

        if !surplus.is_empty() {
            debug!(pool_id = self.id, count = surplus.len(), "Idle set full, destroying tested objects");
        }
        self.destroy_batch(surplus);
    }

    /// Activate, validate and passivate an idle object
    fn test_idle(&self, entry: &mut IdleEntry<T>) -> bool {
        let id = entry.info.id;
        if let Err(err) = self.factory.activate(&mut entry.value) {
            self.metrics.factory_failures.fetch_add(1, Ordering::Relaxed);
            warn!(pool_id = self.id, object_id = id, %err, "Failed to activate idle object under test");
            return false;
        }
        if !self.factory.validate(&entry.value) {
            self.metrics.validation_failures.fetch_add(1, Ordering::Relaxed);
            debug!(pool_id = self.id, object_id = id, "Idle object failed validation");
            return false;
        }
        if let Err(err) = self.factory.passivate(&mut entry.value) {
            self.metrics.factory_failures.fetch_add(1, Ordering::Relaxed);
            warn!(pool_id = self.id, object_id = id, %err, "Failed to passivate idle object under test");
            return false;
        }
        true
    }

    /// Create idle objects until `min_idle` is reached, within `max_total`
    fn ensure_min_idle(&self) {
        let reserved = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            let wanted = state.config.min_idle.saturating_sub(state.idle.len());
            let mut reserved = 0;
            while reserved < wanted && state.has_capacity() {
                state.in_flight += 1;
                reserved += 1;
            }
            reserved
        };

        for _ in 0..reserved {
            if let Err(err) = self.create_idle() {
                warn!(pool_id = self.id, %err, "Failed to replenish idle objects");
            }
        }
    }
}

impl<T: Send + 'static> LeaseListener for PoolInner<T> {
    fn lease_dropped(&self, id: u64) {
        let mut state = self.state.lock();
        state.tracker.note_reclaimed(id);
        self.capacity_changed.notify_all();
    }
}

impl<T> Drop for PoolInner<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.closed {
            return;
        }
        for entry in state.idle.drain() {
            let _ = self.factory.destroy(entry.value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalOrder;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::thread;

    #[derive(Default)]
    struct Counters {
        created: AtomicUsize,
        destroyed: AtomicUsize,
        activated: AtomicUsize,
        passivated: AtomicUsize,
        invalid: AtomicBool,
        slow_validate: AtomicBool,
        fail_create: AtomicBool,
        fail_passivate: AtomicBool,
    }

    struct TestFactory(Arc<Counters>);

    impl ObjectFactory<usize> for TestFactory {
        fn create(&self) -> Result<usize, FactoryError> {
            if self.0.fail_create.load(Ordering::SeqCst) {
                return Err(FactoryError::new("create refused"));
            }
            Ok(self.0.created.fetch_add(1, Ordering::SeqCst))
        }

        fn destroy(&self, _obj: usize) -> Result<(), FactoryError> {
            self.0.destroyed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn validate(&self, _obj: &usize) -> bool {
            if self.0.slow_validate.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(200));
            }
            !self.0.invalid.load(Ordering::SeqCst)
        }

        fn activate(&self, _obj: &mut usize) -> Result<(), FactoryError> {
            self.0.activated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn passivate(&self, _obj: &mut usize) -> Result<(), FactoryError> {
            if self.0.fail_passivate.load(Ordering::SeqCst) {
                return Err(FactoryError::new("passivate refused"));
            }
            self.0.passivated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn pool_with(config: PoolConfiguration) -> (ObjectPool<usize>, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let pool = ObjectPool::new(TestFactory(Arc::clone(&counters)), config).unwrap();
        (pool, counters)
    }

    fn created(counters: &Counters) -> usize {
        counters.created.load(Ordering::SeqCst)
    }

    fn destroyed(counters: &Counters) -> usize {
        counters.destroyed.load(Ordering::SeqCst)
    }

    #[test]
    fn test_borrow_creates_then_reuses() {
        let (pool, counters) = pool_with(PoolConfiguration::default());

        let obj = pool.borrow().unwrap();
        assert_eq!(*obj, 0);
        assert_eq!(pool.num_active(), 1);
        pool.return_object(obj).unwrap();
        assert_eq!(pool.num_idle(), 1);

        let obj = pool.borrow().unwrap();
        assert_eq!(*obj, 0);
        assert_eq!(created(&counters), 1);
        assert_eq!(counters.activated.load(Ordering::SeqCst), 2);
        assert_eq!(counters.passivated.load(Ordering::SeqCst), 1);
        pool.return_object(obj).unwrap();
    }

    #[test]
    fn test_lifo_order() {
        let (pool, _) = pool_with(PoolConfiguration::new().with_retrieval_order(RetrievalOrder::Lifo));
        let a = pool.borrow().unwrap();
        let b = pool.borrow().unwrap();
        let (id_a, id_b) = (a.id(), b.id());
        pool.return_object(a).unwrap();
        pool.return_object(b).unwrap();

        assert_eq!(pool.borrow().unwrap().id(), id_b);
        assert_eq!(pool.borrow().unwrap().id(), id_a);
    }

    #[test]
    fn test_fifo_order() {
        let (pool, _) = pool_with(PoolConfiguration::new().with_retrieval_order(RetrievalOrder::Fifo));
        let a = pool.borrow().unwrap();
        let b = pool.borrow().unwrap();
        let (id_a, id_b) = (a.id(), b.id());
        pool.return_object(a).unwrap();
        pool.return_object(b).unwrap();

        assert_eq!(pool.borrow().unwrap().id(), id_a);
        assert_eq!(pool.borrow().unwrap().id(), id_b);
    }

    #[test]
    fn test_fail_policy_exhausts_immediately() {
        let (pool, _) = pool_with(
            PoolConfiguration::new()
                .with_max_total(2)
                .with_exhaustion_policy(ExhaustionPolicy::Fail),
        );
        let _a = pool.borrow().unwrap();
        let _b = pool.borrow().unwrap();

        let started = Instant::now();
        assert!(matches!(pool.borrow(), Err(PoolError::Exhausted)));
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(pool.metrics().exhausted_events, 1);
    }

    #[test]
    fn test_block_policy_times_out() {
        let wait = Duration::from_millis(120);
        let (pool, _) = pool_with(PoolConfiguration::new().with_max_total(1).with_max_wait(wait));
        let _held = pool.borrow().unwrap();

        let started = Instant::now();
        assert!(matches!(pool.borrow(), Err(PoolError::Timeout(w)) if w == wait));
        assert!(started.elapsed() >= wait);
        assert_eq!(pool.num_waiters(), 0);
        assert_eq!(pool.metrics().wait_timeouts, 1);
    }

    #[test]
    fn test_blocked_borrow_wakes_on_return() {
        let (pool, _) = pool_with(PoolConfiguration::new().with_max_total(1));
        let held = pool.borrow().unwrap();
        let held_id = held.id();

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.borrow().map(|obj| obj.id()))
        };
        while pool.num_waiters() == 0 {
            thread::sleep(Duration::from_millis(5));
        }

        pool.return_object(held).unwrap();
        assert_eq!(waiter.join().unwrap().unwrap(), held_id);
    }

    #[test]
    fn test_blocked_borrowers_are_served_in_order() {
        let (pool, _) = pool_with(PoolConfiguration::new().with_max_total(1));
        let held = pool.borrow().unwrap();
        let served = Arc::new(Mutex::new(Vec::new()));

        let mut waiters = Vec::new();
        for n in 0..3 {
            let worker = pool.clone();
            let served = Arc::clone(&served);
            waiters.push(thread::spawn(move || {
                let obj = worker.borrow().unwrap();
                served.lock().push(n);
                thread::sleep(Duration::from_millis(10));
                worker.return_object(obj).unwrap();
            }));
            while pool.num_waiters() < n + 1 {
                thread::sleep(Duration::from_millis(5));
            }
        }

        pool.return_object(held).unwrap();
        for waiter in waiters {
            waiter.join().unwrap();
        }
        assert_eq!(*served.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_grow_policy_exceeds_max_total() {
        let (pool, counters) = pool_with(
            PoolConfiguration::new()
                .with_max_total(1)
                .with_exhaustion_policy(ExhaustionPolicy::Grow),
        );
        let objects: Vec<_> = (0..4).map(|_| pool.borrow().unwrap()).collect();
        assert_eq!(pool.num_active(), 4);
        assert_eq!(created(&counters), 4);
        for obj in objects {
            pool.return_object(obj).unwrap();
        }
    }

    #[test]
    fn test_cancelled_borrow_leaves_queue() {
        let (pool, _) = pool_with(PoolConfiguration::new().with_max_total(1));
        let held = pool.borrow().unwrap();
        let token = CancelToken::new();

        let waiter = {
            let pool = pool.clone();
            let token = token.clone();
            thread::spawn(move || pool.borrow_with_cancel(&token).map(|_| ()))
        };
        while pool.num_waiters() == 0 {
            thread::sleep(Duration::from_millis(5));
        }

        token.cancel();
        assert!(matches!(waiter.join().unwrap(), Err(PoolError::Cancelled)));
        assert_eq!(pool.num_waiters(), 0);
        pool.return_object(held).unwrap();
        assert_eq!(pool.num_active(), 0);
    }

    #[test]
    fn test_unknown_object_leaves_counts_unchanged() {
        let config = PoolConfiguration::new().with_tracking_policy(TrackingPolicy::Reference);
        let (pool, counters) = pool_with(config.clone());
        let (other, _) = pool_with(config);

        let mine = pool.borrow().unwrap();
        let foreign = other.borrow().unwrap();
        assert!(matches!(pool.return_object(foreign), Err(PoolError::UnknownObject(_))));
        assert_eq!(pool.num_active(), 1);
        assert_eq!(pool.num_idle(), 0);
        assert_eq!(destroyed(&counters), 0);

        pool.return_object(mine).unwrap();
        assert_eq!(pool.num_active(), 0);
    }

    #[test]
    fn test_simple_tracking_rejects_foreign_object() {
        let (pool, _) = pool_with(PoolConfiguration::default());
        let (other, _) = pool_with(PoolConfiguration::default());

        let foreign = other.borrow().unwrap();
        assert!(matches!(pool.return_object(foreign), Err(PoolError::UnknownObject(_))));
        assert_eq!(pool.num_active(), 0);
        assert_eq!(pool.num_idle(), 0);
    }

    #[test]
    fn test_foreign_object_never_joins_idle_set() {
        let a = ObjectPool::from_fn(|| Ok("a"), PoolConfiguration::default()).unwrap();
        let b = ObjectPool::from_fn(|| Ok("b"), PoolConfiguration::default()).unwrap();

        let mine = a.borrow().unwrap();
        let foreign = b.borrow().unwrap();
        assert!(matches!(a.invalidate(foreign), Err(PoolError::UnknownObject(_))));
        let foreign = b.borrow().unwrap();
        assert!(matches!(a.return_object(foreign), Err(PoolError::UnknownObject(_))));
        assert_eq!(a.num_active(), 1);
        assert_eq!(a.num_idle(), 0);

        a.return_object(mine).unwrap();
        assert_eq!(*a.borrow().unwrap(), "a");
    }

    #[test]
    fn test_reference_tracking_detects_dropped_object() {
        let (pool, counters) = pool_with(
            PoolConfiguration::new()
                .with_max_total(1)
                .with_exhaustion_policy(ExhaustionPolicy::Fail)
                .with_tracking_policy(TrackingPolicy::Reference),
        );
        drop(pool.borrow().unwrap());
        assert_eq!(pool.num_active(), 1);

        // The next borrow notices the loss and gets the freed slot
        let obj = pool.borrow().unwrap();
        assert_eq!(pool.num_active(), 1);
        assert_eq!(pool.metrics().total_lost, 1);
        assert_eq!(destroyed(&counters), 0);
        pool.return_object(obj).unwrap();
    }

    #[test]
    fn test_debug_tracking_unblocks_waiter_on_loss() {
        let (pool, _) = pool_with(
            PoolConfiguration::new()
                .with_max_total(1)
                .with_max_wait(Duration::from_secs(5))
                .with_tracking_policy(TrackingPolicy::Debug),
        );
        let held = pool.borrow().unwrap();

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.borrow().map(|obj| obj.id()))
        };
        while pool.num_waiters() == 0 {
            thread::sleep(Duration::from_millis(5));
        }

        drop(held);
        assert!(waiter.join().unwrap().is_ok());
        assert_eq!(pool.metrics().total_lost, 1);
    }

    #[test]
    fn test_lease_timeout_expires_silent_holder() {
        let (pool, _) = pool_with(
            PoolConfiguration::new()
                .with_tracking_policy(TrackingPolicy::Reference)
                .with_lease_timeout(Duration::from_millis(30)),
        );
        let stale = pool.borrow().unwrap();
        let live = pool.borrow().unwrap();

        thread::sleep(Duration::from_millis(50));
        live.touch();
        let third = pool.borrow().unwrap();

        assert_eq!(pool.num_active(), 2);
        assert!(matches!(pool.return_object(stale), Err(PoolError::UnknownObject(_))));
        pool.return_object(live).unwrap();
        pool.return_object(third).unwrap();
        assert_eq!(pool.metrics().total_lost, 1);
    }

    #[test]
    fn test_invalidate_destroys_object() {
        let (pool, counters) = pool_with(PoolConfiguration::default());
        let obj = pool.borrow().unwrap();
        pool.invalidate(obj).unwrap();

        assert_eq!(destroyed(&counters), 1);
        assert_eq!(pool.num_active(), 0);
        assert_eq!(pool.num_idle(), 0);
        assert_eq!(pool.metrics().total_invalidated, 1);
    }

    #[test]
    fn test_test_on_borrow_replaces_invalid_idle_object() {
        let (pool, counters) = pool_with(PoolConfiguration::new().with_test_on_borrow(true));
        pool.add_object().unwrap();

        counters.invalid.store(true, Ordering::SeqCst);
        // A freshly created object that fails validation is an error
        assert!(matches!(pool.borrow(), Err(PoolError::ValidationFailed)));
        assert_eq!(destroyed(&counters), 2);

        counters.invalid.store(false, Ordering::SeqCst);
        let obj = pool.borrow().unwrap();
        assert_eq!(*obj, 2);
        pool.return_object(obj).unwrap();
    }

    #[test]
    fn test_test_on_return_destroys_invalid_object() {
        let (pool, counters) = pool_with(PoolConfiguration::new().with_test_on_return(true));
        let obj = pool.borrow().unwrap();
        counters.invalid.store(true, Ordering::SeqCst);

        pool.return_object(obj).unwrap();
        assert_eq!(pool.num_idle(), 0);
        assert_eq!(destroyed(&counters), 1);
        assert_eq!(pool.metrics().validation_failures, 1);
    }

    #[test]
    fn test_passivate_failure_destroys_and_reports() {
        let (pool, counters) = pool_with(PoolConfiguration::default());
        let obj = pool.borrow().unwrap();
        counters.fail_passivate.store(true, Ordering::SeqCst);

        let err = pool.return_object(obj).unwrap_err();
        assert!(matches!(
            err,
            PoolError::Factory {
                operation: LifecycleOp::Passivate,
                ..
            }
        ));
        assert_eq!(pool.num_idle(), 0);
        assert_eq!(pool.num_active(), 0);
        assert_eq!(destroyed(&counters), 1);
    }

    #[test]
    fn test_create_failure_releases_capacity() {
        let (pool, counters) = pool_with(
            PoolConfiguration::new()
                .with_max_total(1)
                .with_exhaustion_policy(ExhaustionPolicy::Fail),
        );
        counters.fail_create.store(true, Ordering::SeqCst);
        assert!(matches!(
            pool.borrow(),
            Err(PoolError::Factory {
                operation: LifecycleOp::Create,
                ..
            })
        ));

        counters.fail_create.store(false, Ordering::SeqCst);
        assert!(pool.borrow().is_ok());
    }

    #[test]
    fn test_max_idle_destroys_surplus_returns() {
        let (pool, counters) = pool_with(PoolConfiguration::new().with_max_idle(1));
        let a = pool.borrow().unwrap();
        let b = pool.borrow().unwrap();
        pool.return_object(a).unwrap();
        pool.return_object(b).unwrap();

        assert_eq!(pool.num_idle(), 1);
        assert_eq!(destroyed(&counters), 1);
    }

    #[test]
    fn test_close_destroys_idle_and_rejects_borrow() {
        let (pool, counters) = pool_with(PoolConfiguration::default());
        pool.warmup(3).unwrap();
        let borrowed = pool.borrow().unwrap();

        pool.close();
        assert!(pool.is_closed());
        assert_eq!(pool.num_idle(), 0);
        assert_eq!(destroyed(&counters), 2);
        assert!(matches!(pool.borrow(), Err(PoolError::Closed)));
        assert!(matches!(pool.add_object(), Err(PoolError::Closed)));

        // Still-borrowed objects are destroyed on return
        pool.return_object(borrowed).unwrap();
        assert_eq!(destroyed(&counters), 3);
        assert_eq!(pool.num_idle(), 0);

        pool.close();
        assert_eq!(destroyed(&counters), 3);
    }

    #[test]
    fn test_close_wakes_waiters() {
        let (pool, _) = pool_with(PoolConfiguration::new().with_max_total(1));
        let _held = pool.borrow().unwrap();

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.borrow().map(|_| ()))
        };
        while pool.num_waiters() == 0 {
            thread::sleep(Duration::from_millis(5));
        }

        pool.close();
        assert!(matches!(waiter.join().unwrap(), Err(PoolError::Closed)));
    }

    #[test]
    fn test_warmup_stops_at_capacity() {
        let (pool, counters) = pool_with(PoolConfiguration::new().with_max_total(3));
        pool.warmup(10).unwrap();
        assert_eq!(pool.num_idle(), 3);
        assert_eq!(created(&counters), 3);
        assert_eq!(counters.passivated.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_clear_destroys_idle_only() {
        let (pool, counters) = pool_with(PoolConfiguration::default());
        pool.warmup(2).unwrap();
        let obj = pool.borrow().unwrap();

        pool.clear();
        assert_eq!(pool.num_idle(), 0);
        assert_eq!(destroyed(&counters), 1);
        pool.return_object(obj).unwrap();
        assert_eq!(pool.num_idle(), 1);
    }

    #[test]
    fn test_evict_removes_expired_idle_objects() {
        let (pool, counters) = pool_with(
            PoolConfiguration::new()
                .with_min_evictable_idle_time(Duration::from_millis(20))
                .with_eviction(Duration::ZERO, 10),
        );
        pool.warmup(2).unwrap();

        pool.evict().unwrap();
        assert_eq!(pool.num_idle(), 2);

        thread::sleep(Duration::from_millis(40));
        pool.evict().unwrap();
        assert_eq!(pool.num_idle(), 0);
        assert_eq!(destroyed(&counters), 2);
        assert_eq!(pool.metrics().total_evicted, 2);
    }

    #[test]
    fn test_evict_respects_batch_size() {
        let (pool, _) = pool_with(
            PoolConfiguration::new()
                .with_min_evictable_idle_time(Duration::from_millis(10))
                .with_eviction(Duration::ZERO, 2),
        );
        pool.warmup(5).unwrap();
        thread::sleep(Duration::from_millis(20));

        pool.evict().unwrap();
        assert_eq!(pool.num_idle(), 3);
    }

    #[test]
    fn test_soft_eviction_keeps_min_idle() {
        let mut config = PoolConfiguration::new()
            .with_min_idle(1)
            .with_soft_min_evictable_idle_time(Duration::from_millis(10))
            .with_eviction(Duration::ZERO, 10);
        config.min_evictable_idle_time = None;
        let (pool, counters) = pool_with(config);
        pool.warmup(3).unwrap();
        thread::sleep(Duration::from_millis(20));

        pool.evict().unwrap();
        assert_eq!(pool.num_idle(), 1);
        assert_eq!(destroyed(&counters), 2);
    }

    #[test]
    fn test_idle_test_respects_max_idle_after_concurrent_return() {
        let (pool, counters) = pool_with(
            PoolConfiguration::new()
                .with_max_idle(1)
                .with_test_while_idle(true)
                .with_eviction(Duration::ZERO, 10),
        );
        pool.warmup(1).unwrap();
        counters.slow_validate.store(true, Ordering::SeqCst);

        let sweep = {
            let pool = pool.clone();
            thread::spawn(move || pool.evict())
        };
        while pool.num_idle() > 0 {
            thread::sleep(Duration::from_millis(5));
        }

        // Fills the idle slot while the swept object is out for testing
        let obj = pool.borrow().unwrap();
        pool.return_object(obj).unwrap();
        assert_eq!(pool.num_idle(), 1);

        sweep.join().unwrap().unwrap();
        assert_eq!(pool.num_idle(), 1);
        assert_eq!(destroyed(&counters), 1);
        assert_eq!(pool.num_active(), 0);
    }

    #[test]
    fn test_test_while_idle_destroys_invalid_objects() {
        let (pool, counters) = pool_with(
            PoolConfiguration::new()
                .with_test_while_idle(true)
                .with_eviction(Duration::ZERO, 10),
        );
        pool.warmup(2).unwrap();

        pool.evict().unwrap();
        assert_eq!(pool.num_idle(), 2);

        counters.invalid.store(true, Ordering::SeqCst);
        pool.evict().unwrap();
        assert_eq!(pool.num_idle(), 0);
        assert_eq!(destroyed(&counters), 2);
    }

    #[test]
    fn test_evict_refills_min_idle() {
        let (pool, counters) = pool_with(PoolConfiguration::new().with_max_total(3).with_min_idle(2));
        let _held = pool.borrow().unwrap();
        pool.evict().unwrap();
        assert_eq!(pool.num_idle(), 2);

        // Refill never goes past max_total
        let _a = pool.borrow().unwrap();
        let _b = pool.borrow().unwrap();
        pool.evict().unwrap();
        assert_eq!(pool.num_idle(), 0);
        assert_eq!(created(&counters), 3);
    }

    #[test]
    fn test_refill_failure_is_not_surfaced() {
        let (pool, counters) = pool_with(PoolConfiguration::new().with_min_idle(2));
        counters.fail_create.store(true, Ordering::SeqCst);

        assert!(pool.evict().is_ok());
        assert_eq!(pool.num_idle(), 0);
        assert_eq!(pool.metrics().factory_failures, 2);
    }

    #[test]
    fn test_background_evictor_runs() {
        let (pool, counters) = pool_with(
            PoolConfiguration::new()
                .with_min_evictable_idle_time(Duration::from_millis(10))
                .with_eviction(Duration::from_millis(15), 10),
        );
        pool.warmup(2).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while pool.num_idle() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(pool.num_idle(), 0);
        assert_eq!(destroyed(&counters), 2);
        pool.close();
    }

    #[test]
    fn test_reconfigure_raises_capacity_for_waiter() {
        let (pool, _) = pool_with(PoolConfiguration::new().with_max_total(1));
        let held = pool.borrow().unwrap();

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.borrow().map(|obj| obj.id()))
        };
        while pool.num_waiters() == 0 {
            thread::sleep(Duration::from_millis(5));
        }

        pool.reconfigure(PoolConfiguration::new().with_max_total(2)).unwrap();
        assert!(waiter.join().unwrap().is_ok());
        assert_eq!(pool.config().max_total, Some(2));
        pool.return_object(held).unwrap();
    }

    #[test]
    fn test_reconfigure_trims_idle_and_keeps_tracking() {
        let (pool, counters) = pool_with(PoolConfiguration::default());
        pool.warmup(4).unwrap();

        pool.reconfigure(PoolConfiguration::new().with_max_idle(1)).unwrap();
        assert_eq!(pool.num_idle(), 1);
        assert_eq!(destroyed(&counters), 3);

        let result = pool.reconfigure(PoolConfiguration::new().with_tracking_policy(TrackingPolicy::Debug));
        assert!(matches!(result, Err(PoolError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_guard_returns_on_drop() {
        let (pool, counters) = pool_with(PoolConfiguration::default());
        {
            let guard = pool.borrow_guarded().unwrap();
            assert_eq!(**guard, 0);
            assert_eq!(pool.num_active(), 1);
        }
        assert_eq!(pool.num_active(), 0);
        assert_eq!(pool.num_idle(), 1);

        pool.borrow_guarded().unwrap().invalidate().unwrap();
        assert_eq!(destroyed(&counters), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_async_borrow() {
        let (pool, _) = pool_with(PoolConfiguration::default());
        let obj = pool.borrow_async().await.unwrap();
        assert_eq!(pool.num_active(), 1);
        pool.return_object(obj).unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_async_borrow_cancelled_by_timeout() {
        let (pool, _) = pool_with(PoolConfiguration::new().with_max_total(1));
        let held = pool.borrow().unwrap();

        let result = tokio::time::timeout(Duration::from_millis(50), pool.borrow_async()).await;
        assert!(result.is_err());

        let deadline = Instant::now() + Duration::from_secs(2);
        while pool.num_waiters() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(pool.num_waiters(), 0);

        pool.return_object(held).unwrap();
        assert_eq!(pool.num_idle(), 1);
    }

    #[test]
    fn test_quiescent_accounting() {
        let (pool, _) = pool_with(PoolConfiguration::new().with_max_total(4));
        let a = pool.borrow().unwrap();
        let b = pool.borrow().unwrap();
        let c = pool.borrow().unwrap();
        pool.return_object(a).unwrap();
        pool.invalidate(b).unwrap();

        let metrics = pool.metrics();
        assert_eq!(
            metrics.active_objects + metrics.idle_objects,
            metrics.total_created - metrics.total_destroyed
        );
        pool.return_object(c).unwrap();
    }
}
