// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Synchronization primitives.
//!
//! The whole subsystem is protected by one coarse lock, the analogue
//! of raising to the soft network interrupt level. Nothing that may
//! block is ever called while a [`KMutexGuard`] is held.
use core::ops::Deref;
use core::ops::DerefMut;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::PoisonError;

/// A mutual exclusion lock.
///
/// A panic while holding the lock leaves the protected state as it
/// was at the panic; later lockers carry on with that state rather
/// than propagating the poison.
pub struct KMutex<T> {
    inner: Mutex<T>,
}

pub struct KMutexGuard<'a, T: 'a> {
    guard: std::sync::MutexGuard<'a, T>,
}

impl<T> Deref for KMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.deref()
    }
}

impl<T> DerefMut for KMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.deref_mut()
    }
}

impl<T> KMutex<T> {
    pub fn into_inner(self) -> T
    where
        T: Sized,
    {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn new(val: T) -> Self {
        KMutex { inner: Mutex::new(val) }
    }

    pub fn lock(&self) -> KMutexGuard<'_, T> {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        KMutexGuard { guard }
    }
}

impl<T: Default> Default for KMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// A condition variable paired with a [`KMutex`].
pub struct KCondvar {
    cv: Condvar,
}

impl Default for KCondvar {
    fn default() -> Self {
        Self::new()
    }
}

impl KCondvar {
    pub fn new() -> Self {
        Self { cv: Condvar::new() }
    }

    pub fn notify_one(&self) {
        self.cv.notify_one()
    }

    pub fn notify_all(&self) {
        self.cv.notify_all()
    }

    pub fn wait<'a, T: 'a>(
        &self,
        lock: KMutexGuard<'a, T>,
    ) -> KMutexGuard<'a, T> {
        let guard =
            self.cv.wait(lock.guard).unwrap_or_else(PoisonError::into_inner);
        KMutexGuard { guard }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn condvar_handoff() {
        let pair = Arc::new((KMutex::new(false), KCondvar::new()));
        let pair2 = Arc::clone(&pair);

        let h = thread::spawn(move || {
            let (lock, cv) = &*pair2;
            *lock.lock() = true;
            cv.notify_all();
        });

        let (lock, cv) = &*pair;
        let mut ready = lock.lock();
        while !*ready {
            ready = cv.wait(ready);
        }
        drop(ready);
        h.join().unwrap();
    }
}
