//! Error types for the object pool

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Factory lifecycle operation that produced a [`FactoryError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOp {
    Create,
    Activate,
    Passivate,
    Destroy,
}

impl fmt::Display for LifecycleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleOp::Create => "create",
            LifecycleOp::Activate => "activate",
            LifecycleOp::Passivate => "passivate",
            LifecycleOp::Destroy => "destroy",
        };
        f.write_str(name)
    }
}

/// Failure reported by an [`ObjectFactory`](crate::ObjectFactory) hook.
///
/// # Examples
///
/// ```
/// use generic_objectpool::FactoryError;
///
/// let err = FactoryError::new("connection refused");
/// assert_eq!(err.to_string(), "connection refused");
///
/// let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
/// let err = FactoryError::from_error(io);
/// assert!(std::error::Error::source(&err).is_some());
/// ```
#[derive(Debug, Clone)]
pub struct FactoryError {
    message: String,
    source: Option<Arc<dyn StdError + Send + Sync>>,
}

impl FactoryError {
    /// Create a factory error from a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an underlying error, keeping it as the source
    pub fn from_error<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            message: error.to_string(),
            source: Some(Arc::new(error)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for FactoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for FactoryError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn StdError + 'static))
    }
}

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("Pool is exhausted - no capacity available")]
    Exhausted,

    #[error("Timed out after {0:?} waiting for an object")]
    Timeout(Duration),

    #[error("Factory failed to {operation} object: {source}")]
    Factory {
        operation: LifecycleOp,
        source: FactoryError,
    },

    #[error("Object validation failed")]
    ValidationFailed,

    #[error("Object {0} is not currently borrowed from this pool")]
    UnknownObject(u64),

    #[error("Illegal pool state: {0}")]
    IllegalState(String),

    #[error("Pool is closed")]
    Closed,

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Invalid pool configuration: {0}")]
    InvalidConfiguration(String),
}

impl PoolError {
    pub(crate) fn factory(operation: LifecycleOp, source: FactoryError) -> Self {
        PoolError::Factory { operation, source }
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
