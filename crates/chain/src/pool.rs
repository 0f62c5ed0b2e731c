//! A checkout/checkin object pool shared by concurrent request tasks.
//!
//! Objects are created by a factory when the pool is empty, handed out behind a [`Pooled`] guard and
//! put back when the guard drops. Dropping the guard is the only way to return an object, so it also
//! happens on early error returns and when the owning future is cancelled.
//!
//! Objects live in a box allocated once by the factory, a checkout moves only the pointer.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};

/// Per-use state of a pooled object.
pub trait Recycle {
    /// Called when the object goes back to the pool, drops everything that belongs to the last use.
    fn recycle(&mut self);
}

type Factory<T> = dyn Fn() -> T + Send + Sync;

/// A cheaply cloneable handle to a pool of `T`.
pub struct Pool<T> {
    inner: Arc<PoolInner<T>>,
}

struct PoolInner<T> {
    idle: Mutex<Vec<Box<T>>>,
    factory: Box<Factory<T>>,
    max_idle: usize,
}

impl<T: Recycle> Pool<T> {
    /// Creates a pool keeping at most `max_idle` objects around between uses.
    pub fn new<F>(max_idle: usize, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self { inner: Arc::new(PoolInner { idle: Mutex::new(Vec::new()), factory: Box::new(factory), max_idle }) }
    }

    /// Takes an idle object, or creates one when none is available.
    pub fn checkout(&self) -> Pooled<T> {
        let idle = self.inner.lock_idle().pop();
        let value = idle.unwrap_or_else(|| Box::new((self.inner.factory)()));
        Pooled { value: Some(value), pool: self.clone() }
    }

    /// The number of objects currently waiting in the pool.
    pub fn idle_len(&self) -> usize {
        self.inner.lock_idle().len()
    }

    fn checkin(&self, mut value: Box<T>) {
        value.recycle();
        let mut idle = self.inner.lock_idle();
        if idle.len() < self.inner.max_idle {
            idle.push(value);
        }
    }
}

impl<T> PoolInner<T> {
    // a panic while holding the lock can not leave the vec half-updated, the poison is ignored
    fn lock_idle(&self) -> std::sync::MutexGuard<'_, Vec<Box<T>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool").field("max_idle", &self.inner.max_idle).finish_non_exhaustive()
    }
}

/// An object checked out of a [`Pool`], exclusively owned until dropped.
pub struct Pooled<T: Recycle> {
    value: Option<Box<T>>,
    pool: Pool<T>,
}

impl<T: Recycle> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // only `drop` takes the value out
        self.value.as_deref().unwrap_or_else(|| unreachable!("pooled value is present until drop"))
    }
}

impl<T: Recycle> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_deref_mut().unwrap_or_else(|| unreachable!("pooled value is present until drop"))
    }
}

impl<T: Recycle> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.pool.checkin(value);
        }
    }
}

impl<T: Recycle + fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pooled").field(&self.value).finish()
    }
}
