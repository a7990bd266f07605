//! # generic_objectpool
//!
//! Thread-safe pool of reusable objects, built around a pluggable
//! [`ObjectFactory`] that creates, activates, passivates, validates and
//! destroys them.
//!
//! ## Features
//!
//! - Bounded pools that fail, block or grow when exhausted
//! - LIFO or FIFO reuse of idle objects
//! - Fair, cancellable waiting with optional timeouts
//! - Background eviction of idle objects and `min_idle` replenishment
//! - Active tracking that detects borrowed objects dropped without being
//!   returned, with borrow-site backtraces in debug mode
//! - Async borrowing on tokio
//! - Lifecycle counters
//!
//! ## Quick Start
//!
//! ```rust
//! use generic_objectpool::{ExhaustionPolicy, ObjectPool, PoolConfiguration};
//! use std::time::Duration;
//!
//! let config = PoolConfiguration::new()
//!     .with_max_total(2)
//!     .with_exhaustion_policy(ExhaustionPolicy::Block)
//!     .with_max_wait(Duration::from_millis(100));
//! let pool = ObjectPool::from_fn(|| Ok(String::with_capacity(64)), config).unwrap();
//!
//! let mut obj = pool.borrow().unwrap();
//! obj.push_str("hello");
//! println!("Got: {}", *obj);
//! pool.return_object(obj).unwrap();
//!
//! assert_eq!(pool.metrics().total_created, 1);
//! ```

mod cancel;
mod config;
mod errors;
mod eviction;
mod exhaustion;
mod factory;
mod idle;
mod metrics;
mod pool;
mod tracking;

pub use cancel::CancelToken;
pub use config::{PoolConfiguration, RetrievalOrder};
pub use errors::{FactoryError, LifecycleOp, PoolError, PoolResult};
pub use exhaustion::ExhaustionPolicy;
pub use factory::ObjectFactory;
pub use idle::ObjectInfo;
pub use metrics::PoolMetrics;
pub use pool::{ObjectPool, PooledGuard, PooledObject};
pub use tracking::TrackingPolicy;
