//! Lock helpers
//!
//! Poisoned locks are recovered with a warning instead of propagating the
//! panic into the render thread.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|e| {
        tracing::warn!("{} mutex poisoned; continuing", what);
        e.into_inner()
    })
}

pub(crate) fn read<'a, T>(lock: &'a RwLock<T>, what: &str) -> RwLockReadGuard<'a, T> {
    lock.read().unwrap_or_else(|e| {
        tracing::warn!("{} lock poisoned; continuing", what);
        e.into_inner()
    })
}

pub(crate) fn write<'a, T>(lock: &'a RwLock<T>, what: &str) -> RwLockWriteGuard<'a, T> {
    lock.write().unwrap_or_else(|e| {
        tracing::warn!("{} lock poisoned; continuing", what);
        e.into_inner()
    })
}
