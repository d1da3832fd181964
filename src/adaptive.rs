//! Live-updatable settings shared between request handlers.
//!
//! Rate rules and pricing are read on every generation request and replaced rarely
//! (an operator raising a limit). Reads go through `ArcSwap` and never block; the
//! `adaptive-rwlock` feature swaps in an `RwLock` backend instead.

use std::sync::Arc;

#[cfg(feature = "adaptive-rwlock")]
use std::sync::RwLock;

#[cfg(not(feature = "adaptive-rwlock"))]
use arc_swap::ArcSwap;

/// Shared handle to a value that can be swapped at runtime.
///
/// Clones observe the same value: updating through one handle is visible to all.
#[derive(Debug)]
pub struct DynamicConfig<T> {
    #[cfg(not(feature = "adaptive-rwlock"))]
    inner: Arc<ArcSwap<T>>,
    #[cfg(feature = "adaptive-rwlock")]
    inner: Arc<RwLock<T>>,
}

impl<T> Clone for DynamicConfig<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: Default> Default for DynamicConfig<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> DynamicConfig<T> {
    pub fn new(value: T) -> Self {
        #[cfg(not(feature = "adaptive-rwlock"))]
        {
            Self { inner: Arc::new(ArcSwap::from_pointee(value)) }
        }
        #[cfg(feature = "adaptive-rwlock")]
        {
            Self { inner: Arc::new(RwLock::new(value)) }
        }
    }

    /// Snapshot of the current value.
    #[cfg(not(feature = "adaptive-rwlock"))]
    pub fn get(&self) -> Arc<T> {
        self.inner.load_full()
    }

    /// Snapshot of the current value.
    #[cfg(feature = "adaptive-rwlock")]
    pub fn get(&self) -> Arc<T>
    where
        T: Clone,
    {
        let guard = self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::new(guard.clone())
    }

    pub fn set(&self, value: T) {
        #[cfg(not(feature = "adaptive-rwlock"))]
        {
            self.inner.store(Arc::new(value));
        }
        #[cfg(feature = "adaptive-rwlock")]
        {
            *self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner) = value;
        }
    }

    /// Derive the next value from the current one.
    pub fn update<F>(&self, f: F)
    where
        F: Fn(&T) -> T,
    {
        #[cfg(not(feature = "adaptive-rwlock"))]
        {
            self.inner.rcu(|cur| f(cur));
        }
        #[cfg(feature = "adaptive-rwlock")]
        {
            let mut guard = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            let next = f(&guard);
            *guard = next;
        }
    }
}
