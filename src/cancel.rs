//! Cancellation of blocked borrows

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

type Waker = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    next_id: AtomicU64,
    wakers: Mutex<Vec<(u64, Waker)>>,
}

/// Interrupts a borrow waiting on a blocking pool.
///
/// Cancelling wakes every borrow currently waiting with this token; they
/// give up their place in the queue and fail with
/// [`PoolError::Cancelled`](crate::PoolError::Cancelled). A cancelled token
/// stays cancelled.
///
/// # Examples
///
/// ```
/// use generic_objectpool::{CancelToken, ObjectPool, PoolConfiguration, PoolError};
/// use std::thread;
/// use std::time::Duration;
///
/// let pool = ObjectPool::from_fn(|| Ok(1u8), PoolConfiguration::new().with_max_total(1)).unwrap();
/// let held = pool.borrow().unwrap();
///
/// let token = CancelToken::new();
/// let waiter = {
///     let pool = pool.clone();
///     let token = token.clone();
///     thread::spawn(move || pool.borrow_with_cancel(&token).map(|_| ()))
/// };
///
/// thread::sleep(Duration::from_millis(50));
/// token.cancel();
/// assert!(matches!(waiter.join().unwrap(), Err(PoolError::Cancelled)));
/// pool.return_object(held).unwrap();
/// ```
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::AcqRel) {
            self.cancel_registered();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Run `waker` when the token is cancelled, for as long as the returned
    /// registration lives
    pub(crate) fn register(&self, waker: Waker) -> Registration {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.wakers.lock().push((id, waker));
        // Cancelled between the caller's check and the push
        if self.is_cancelled() {
            self.cancel_registered();
        }
        Registration {
            token: self.clone(),
            id,
        }
    }

    fn cancel_registered(&self) {
        // Run wakers without holding our lock; they take the pool lock
        let wakers: Vec<Waker> = self
            .inner
            .wakers
            .lock()
            .drain(..)
            .map(|(_, waker)| waker)
            .collect();
        for waker in wakers {
            waker();
        }
    }

    /// Guard that cancels the token when dropped
    pub(crate) fn drop_guard(&self) -> CancelOnDrop {
        CancelOnDrop(self.clone())
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

pub(crate) struct Registration {
    token: CancelToken,
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.token.inner.wakers.lock().retain(|(id, _)| *id != self.id);
    }
}

pub(crate) struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}
