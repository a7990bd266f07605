//! Idle object eviction

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Sender};
use tracing::debug;

use crate::config::PoolConfiguration;

/// Whether an object idle for `idle_for` should be evicted, given that
/// `idle_count` objects (itself included) are currently idle
pub(crate) fn is_evictable(idle_for: Duration, idle_count: usize, config: &PoolConfiguration) -> bool {
    if let Some(limit) = config.min_evictable_idle_time
        && idle_for >= limit
    {
        return true;
    }
    if let Some(soft_limit) = config.soft_min_evictable_idle_time
        && idle_for >= soft_limit
        && idle_count > config.min_idle
    {
        return true;
    }
    false
}

/// Background thread running a pool's maintenance task on a fixed period.
///
/// The task returns `false` once its pool is gone, which ends the thread.
/// Dropping the evictor also stops it, without waiting for a run in
/// progress.
pub(crate) struct Evictor {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    interval: Duration,
}

impl Evictor {
    pub fn start<F>(interval: Duration, mut task: F) -> std::io::Result<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        let ticker = channel::tick(interval);

        let handle = thread::Builder::new()
            .name("objectpool-evictor".to_string())
            .spawn(move || {
                loop {
                    crossbeam::select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            if !task() {
                                break;
                            }
                        }
                    }
                }
                debug!("Evictor stopped");
            })?;

        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
            interval,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stop the thread and wait for it to finish, unless called from the
    /// evictor thread itself
    pub fn shutdown(mut self) {
        self.stop.take();
        if let Some(handle) = self.handle.take()
            && handle.thread().id() != thread::current().id()
        {
            let _ = handle.join();
        }
    }
}

impl Drop for Evictor {
    fn drop(&mut self) {
        // Disconnecting the channel wakes the thread's select
        self.stop.take();
    }
}
