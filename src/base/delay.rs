//! Delay functions for operations like sleeping.
//!
//! Drivers sleep through the [`Delay`] trait. On the board it is implemented by the
//! [`TimerQueue`], so a sleep moves board time forward and lets due timers run meanwhile.

use core::time::Duration;
use crate::base::time;
use crate::base::timer::TimerQueue;


pub trait Delay {
    /// Sleep for at least `ms` milliseconds.
    fn msleep(&self, ms: u32);

    /// Sleep for somewhere between `min` and `max` microseconds.
    fn usleep_range(&self, min: u32, _max: u32) {
        self.msleep((min + 999) / 1000);
    }

    fn mdelay(&self, ms: u32) {
        self.msleep(ms);
    }

    fn udelay(&self, us: u32) {
        self.usleep_range(us, us);
    }

    /// Sleep for `duration`, rounded up to the nearest millisecond.
    fn coarse_sleep(&self, duration: Duration) {
        let ms = duration.as_nanos().div_ceil(1_000_000).min(u32::MAX as u128);
        self.msleep(ms as u32);
    }
}

impl Delay for TimerQueue {
    fn msleep(&self, ms: u32) {
        self.advance(time::msecs_to_jiffies(ms));
    }

    fn usleep_range(&self, min: u32, _max: u32) {
        self.advance(time::usecs_to_jiffies(min));
    }
}
