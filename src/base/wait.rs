//! Wait queues.
//!
//! A waiter sleeps until its condition becomes true or a signal arrives. Wakers bump the wake
//! sequence, and `poll` uses it to notice that something on a queue changed.

use alloc::sync::Arc;
use core::hint;
use core::sync::atomic::{AtomicU64, Ordering};
use crate::base::error::{Error, Result};
use crate::base::task::Task;
use crate::base::time;
use crate::base::timer::TimerQueue;


#[derive(Clone, Default)]
pub struct WaitQueue {
    seq: Arc<AtomicU64>,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current wake sequence.
    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn seq_handle(&self) -> &Arc<AtomicU64> {
        &self.seq
    }

    #[inline]
    pub fn wake_up(&self) {
        self.seq.fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    pub fn wake_up_interruptible(&self) {
        self.wake_up();
    }

    /// Sleep until `cond` is true. Fails with `ERESTARTSYS` if a signal is pending on `task`.
    pub fn wait_event_interruptible<F>(&self, task: &Task, cond: F) -> Result
        where F: Fn() -> bool {
        loop {
            if cond() {
                return Ok(());
            }
            if task.signal_pending() {
                return Err(Error::ERESTARTSYS);
            }
            hint::spin_loop();
        }
    }

    /// Like [`wait_event_interruptible`](Self::wait_event_interruptible), but gives up after
    /// `timeout` jiffies of board time. Returns the jiffies left (at least 1) if the condition
    /// became true, 0 on timeout.
    pub fn wait_event_interruptible_timeout<F>(&self, task: &Task, timers: &TimerQueue,
                                               timeout: u64, cond: F) -> Result<u64>
        where F: Fn() -> bool {
        let deadline = timers.jiffies().wrapping_add(timeout);
        loop {
            let now = timers.jiffies();
            if cond() {
                let left = deadline.wrapping_sub(now);
                return Ok(if time::time_after(deadline, now) { left } else { 1 });
            }
            if time::time_after_eq(now, deadline) {
                return Ok(0);
            }
            if task.signal_pending() {
                return Err(Error::ERESTARTSYS);
            }
            hint::spin_loop();
        }
    }
}
