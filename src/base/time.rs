//! Jiffies and time conversions.

use core::sync::atomic::{AtomicU64, Ordering};


/// Timer interrupt rate, ticks per second.
pub const HZ: u64 = 100;

pub const MSEC_PER_SEC: u64 = 1000;
pub const USEC_PER_SEC: u64 = 1_000_000;

/// Jiffies start 5 minutes before wrapping, so wrap bugs show up early, like in the kernel.
pub const INITIAL_JIFFIES: u64 = (-300i64 * HZ as i64) as u64;

/// Converts milliseconds to jiffies, rounding up.
#[inline]
pub const fn msecs_to_jiffies(ms: u32) -> u64 {
    (ms as u64 * HZ + MSEC_PER_SEC - 1) / MSEC_PER_SEC
}

/// Converts microseconds to jiffies, rounding up.
#[inline]
pub const fn usecs_to_jiffies(us: u32) -> u64 {
    (us as u64 * HZ + USEC_PER_SEC - 1) / USEC_PER_SEC
}

#[inline]
pub const fn jiffies_to_msecs(j: u64) -> u64 {
    j * (MSEC_PER_SEC / HZ)
}

/// True if `a` is after `b`. Wrap-safe.
#[inline]
pub const fn time_after(a: u64, b: u64) -> bool {
    (b.wrapping_sub(a) as i64) < 0
}

/// True if `a` is after or equal to `b`. Wrap-safe.
#[inline]
pub const fn time_after_eq(a: u64, b: u64) -> bool {
    (a.wrapping_sub(b) as i64) >= 0
}

#[inline]
pub const fn time_before(a: u64, b: u64) -> bool {
    time_after(b, a)
}


/// Monotonic tick counter of the board.
pub struct Clock {
    jiffies: AtomicU64,
}

impl Clock {
    #[inline]
    pub const fn new() -> Self {
        Self {
            jiffies: AtomicU64::new(INITIAL_JIFFIES),
        }
    }

    #[inline]
    pub fn jiffies(&self) -> u64 {
        self.jiffies.load(Ordering::Acquire)
    }

    /// Advance one tick and return the new jiffies value.
    #[inline]
    pub(crate) fn tick(&self) -> u64 {
        self.jiffies.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    /// Time since boot, in milliseconds.
    pub fn uptime_ms(&self) -> u64 {
        jiffies_to_msecs(self.jiffies().wrapping_sub(INITIAL_JIFFIES))
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
