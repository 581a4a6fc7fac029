//! Provides the spin-lock implementation.

use core::cell::UnsafeCell;
use core::hint;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};


/// A spin lock object works like the C type, it only provides the lock semantic but
/// does not manage any data.
#[repr(C)]
pub struct SpinLockPure {
    lock: AtomicBool,
}

impl SpinLockPure {
    #[inline]
    pub const fn new() -> Self {
        Self {
            lock: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.lock.load(Ordering::Acquire)
    }

    #[inline]
    pub fn try_lock(&self) -> bool {
        self.lock.compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed).is_ok()
    }

    #[inline]
    pub fn lock(&self) {
        while self.lock.compare_exchange_weak(
            false, true, Ordering::AcqRel, Ordering::Relaxed).is_err() {
            while self.is_locked() {
                hint::spin_loop();
            }
        }
    }

    #[inline]
    pub fn unlock(&self) {
        self.lock.store(false, Ordering::Release);
    }

    #[inline]
    pub fn lock_guard(&self) -> SpinLockPureGuard {
        self.lock();
        SpinLockPureGuard {
            lock: self
        }
    }
}

impl Default for SpinLockPure {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SpinLockPureGuard<'a> {
    lock: &'a SpinLockPure,
}

impl<'a> Drop for SpinLockPureGuard<'a> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}


/// A spin lock that owns the data it protects, which is only reachable through the guard.
pub struct SpinLock<T: ?Sized> {
    lock: SpinLockPure,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is serialized by `lock`.
unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    #[inline]
    pub const fn new(data: T) -> Self {
        Self {
            lock: SpinLockPure::new(),
            data: UnsafeCell::new(data),
        }
    }

    #[inline]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> SpinLock<T> {
    #[inline]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.lock.lock();
        SpinLockGuard { lock: self }
    }

    #[inline]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self.lock.try_lock() {
            Some(SpinLockGuard { lock: self })
        } else {
            None
        }
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

pub struct SpinLockGuard<'a, T: ?Sized> {
    lock: &'a SpinLock<T>,
}

impl<'a, T: ?Sized> Deref for SpinLockGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard holds the lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T: ?Sized> DerefMut for SpinLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard holds the lock.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T: ?Sized> Drop for SpinLockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.lock.unlock();
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;
    use alloc::vec::Vec;

    #[test]
    fn pure_lock_guard_releases() {
        let lock = SpinLockPure::new();
        {
            let _g = lock.lock_guard();
            assert!(lock.is_locked());
            assert!(!lock.try_lock());
        }
        assert!(!lock.is_locked());
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = SpinLock::new(1u32);
        let g = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(g);
        assert_eq!(*lock.try_lock().map(|g| *g).as_ref().unwrap_or(&0), 1);
    }

    #[test]
    fn counts_across_threads() {
        let counter = Arc::new(SpinLock::new(0usize));
        let handles: Vec<_> = (0..4).map(|_| {
            let c = counter.clone();
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    *c.lock() += 1;
                }
            })
        }).collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*counter.lock(), 4000);
    }
}
