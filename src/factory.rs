//! Lifecycle hooks the pool calls on the objects it manages

use crate::errors::FactoryError;

/// Creates, checks and disposes of pooled objects.
///
/// Every method may be called concurrently from different pool operations;
/// the pool never serializes calls. Only [`create`](ObjectFactory::create) is
/// required, the other hooks default to no-ops.
///
/// # Examples
///
/// ```
/// use generic_objectpool::{FactoryError, ObjectFactory};
///
/// struct Buffers;
///
/// impl ObjectFactory<Vec<u8>> for Buffers {
///     fn create(&self) -> Result<Vec<u8>, FactoryError> {
///         Ok(Vec::with_capacity(4096))
///     }
///
///     fn passivate(&self, buf: &mut Vec<u8>) -> Result<(), FactoryError> {
///         buf.clear();
///         Ok(())
///     }
///
///     fn validate(&self, buf: &Vec<u8>) -> bool {
///         buf.capacity() >= 4096
///     }
/// }
/// ```
pub trait ObjectFactory<T>: Send + Sync {
    /// Build a new object
    fn create(&self) -> Result<T, FactoryError>;

    /// Dispose of an object the pool no longer keeps
    fn destroy(&self, _obj: T) -> Result<(), FactoryError> {
        Ok(())
    }

    /// Check whether an object is still fit for use
    fn validate(&self, _obj: &T) -> bool {
        true
    }

    /// Prepare an object before it is handed to a borrower
    fn activate(&self, _obj: &mut T) -> Result<(), FactoryError> {
        Ok(())
    }

    /// Reset an object before it goes back to the idle set
    fn passivate(&self, _obj: &mut T) -> Result<(), FactoryError> {
        Ok(())
    }
}

/// Factory backed by a creation closure
pub(crate) struct FnFactory<F> {
    create: F,
}

impl<F> FnFactory<F> {
    pub fn new(create: F) -> Self {
        Self { create }
    }
}

impl<T, F> ObjectFactory<T> for FnFactory<F>
where
    F: Fn() -> Result<T, FactoryError> + Send + Sync,
{
    fn create(&self) -> Result<T, FactoryError> {
        (self.create)()
    }
}
