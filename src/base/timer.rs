//! Kernel timers driven by the board tick.
//!
//! A [`Timer`] is the `struct timer_list` counterpart: a callback plus an expiry in jiffies.
//! [`TimerQueue::advance`] moves the clock and runs every expired timer in expiry order. The
//! callbacks run outside of any queue lock, so a callback may re-arm its own timer (periodic
//! timers) or arm/delete others.

use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::hint;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use crate::base::sync::SpinLock;
use crate::base::time::{self, Clock};


type TimerFn = Box<dyn Fn() + Send + Sync>;

struct TimerState {
    expires: u64,
    pending: bool,
    /// Arming order, keeps timers with the same expiry FIFO.
    seq: u64,
}

struct TimerInner {
    state: SpinLock<TimerState>,
    running: AtomicBool,
    func: TimerFn,
}

/// The timer wheel of the board. Armed timers are tracked by weak reference, so dropping a
/// [`Timer`] is enough to get rid of it.
pub struct TimerQueue {
    clock: Clock,
    armed: SpinLock<Vec<Weak<TimerInner>>>,
    next_seq: AtomicU64,
}

impl TimerQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            clock: Clock::new(),
            armed: SpinLock::new(Vec::new()),
            next_seq: AtomicU64::new(0),
        })
    }

    #[inline]
    pub fn jiffies(&self) -> u64 {
        self.clock.jiffies()
    }

    #[inline]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Number of timers currently armed.
    pub fn armed_count(&self) -> usize {
        self.armed.lock().iter().filter(|w| w.strong_count() > 0).count()
    }

    /// Advance the clock by `ticks` jiffies, one at a time, running expired timers on each tick.
    pub fn advance(&self, ticks: u64) {
        for _ in 0..ticks {
            let now = self.clock.tick();
            self.run_expired(now);
        }
    }

    /// Advance the clock by at least `ms` milliseconds.
    pub fn advance_ms(&self, ms: u32) {
        self.advance(time::msecs_to_jiffies(ms));
    }

    fn run_expired(&self, now: u64) {
        while let Some(timer) = self.take_next_expired(now) {
            (timer.func)();
            timer.running.store(false, Ordering::Release);
        }
    }

    fn take_next_expired(&self, now: u64) -> Option<Arc<TimerInner>> {
        let mut armed = self.armed.lock();
        armed.retain(|w| w.strong_count() > 0);

        let mut next: Option<(usize, u64, u64)> = None;
        for (idx, w) in armed.iter().enumerate() {
            let Some(t) = w.upgrade() else { continue };
            let st = t.state.lock();
            if !st.pending || !time::time_after_eq(now, st.expires) {
                continue;
            }
            let earlier = match next {
                None => true,
                Some((_, exp, seq)) => time::time_before(st.expires, exp)
                    || (st.expires == exp && st.seq < seq),
            };
            if earlier {
                next = Some((idx, st.expires, st.seq));
            }
        }

        let (idx, ..) = next?;
        let timer = armed.swap_remove(idx).upgrade()?;
        timer.state.lock().pending = false;
        timer.running.store(true, Ordering::Release);
        Some(timer)
    }
}


/// A kernel timer. Dropping it deletes it.
pub struct Timer {
    inner: Arc<TimerInner>,
    queue: Arc<TimerQueue>,
}

impl Timer {
    /// `timer_setup()`: binds `func` to a new, inactive timer.
    pub fn new<F>(queue: &Arc<TimerQueue>, func: F) -> Self
        where F: Fn() + Send + Sync + 'static {
        Self {
            inner: Arc::new(TimerInner {
                state: SpinLock::new(TimerState { expires: 0, pending: false, seq: 0 }),
                running: AtomicBool::new(false),
                func: Box::new(func),
            }),
            queue: queue.clone(),
        }
    }

    /// Modify the timer's timeout. Arms the timer if it is inactive.
    ///
    /// Returns true if the timer was pending, that is, an active timer was modified.
    pub fn mod_timer(&self, expires: u64) -> bool {
        let mut armed = self.queue.armed.lock();
        let mut st = self.inner.state.lock();
        let was_pending = st.pending;
        st.expires = expires;
        st.pending = true;
        st.seq = self.queue.next_seq.fetch_add(1, Ordering::Relaxed);
        if !was_pending {
            armed.push(Arc::downgrade(&self.inner));
        }
        was_pending
    }

    /// Arm the timer to fire `ms` milliseconds from now.
    pub fn mod_timer_ms(&self, ms: u32) -> bool {
        self.mod_timer(self.queue.jiffies().wrapping_add(time::msecs_to_jiffies(ms)))
    }

    /// Deactivate the timer. Returns true if it was pending.
    pub fn del_timer(&self) -> bool {
        let mut armed = self.queue.armed.lock();
        let mut st = self.inner.state.lock();
        let was_pending = st.pending;
        if was_pending {
            st.pending = false;
            let me = Arc::as_ptr(&self.inner);
            armed.retain(|w| w.as_ptr() != me);
        }
        was_pending
    }

    /// Deactivate the timer and wait for a running callback to finish.
    ///
    /// Must not be called from the timer's own callback.
    pub fn del_timer_sync(&self) -> bool {
        let was_pending = self.del_timer();
        while self.inner.running.load(Ordering::Acquire) {
            hint::spin_loop();
        }
        was_pending
    }

    #[inline]
    pub fn pending(&self) -> bool {
        self.inner.state.lock().pending
    }

    #[inline]
    pub fn expires(&self) -> u64 {
        self.inner.state.lock().expires
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.del_timer();
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use core::sync::atomic::AtomicUsize;

    #[test]
    fn fires_once_at_expiry() {
        let q = TimerQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let t = Timer::new(&q, move || { h.fetch_add(1, Ordering::SeqCst); });
        assert!(!t.mod_timer_ms(30));
        assert!(t.pending());
        q.advance(2);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        q.advance(1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!t.pending());
        q.advance(10);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rearm_pushes_expiry_out() {
        let q = TimerQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let t = Timer::new(&q, move || { h.fetch_add(1, Ordering::SeqCst); });
        t.mod_timer_ms(10);
        // A bounce re-arms the timer before it expires.
        assert!(t.mod_timer_ms(10));
        q.advance(1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(q.armed_count(), 0);
    }

    #[test]
    fn del_timer_cancels() {
        let q = TimerQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let t = Timer::new(&q, move || { h.fetch_add(1, Ordering::SeqCst); });
        t.mod_timer_ms(20);
        assert!(t.del_timer_sync());
        assert!(!t.del_timer());
        q.advance(5);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dropped_timer_never_fires() {
        let q = TimerQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let t = Timer::new(&q, move || { h.fetch_add(1, Ordering::SeqCst); });
        t.mod_timer_ms(10);
        drop(t);
        q.advance(5);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn runs_in_expiry_order() {
        let q = TimerQueue::new();
        let order = Arc::new(SpinLock::new(Vec::new()));
        let now = q.jiffies();
        let timers: Vec<Timer> = [3u64, 1, 2, 1].iter().enumerate().map(|(i, &ticks)| {
            let o = order.clone();
            let t = Timer::new(&q, move || o.lock().push(i));
            t.mod_timer(now + ticks);
            t
        }).collect();
        q.advance(3);
        assert_eq!(*order.lock(), [1, 3, 2, 0]);
        drop(timers);
    }

    #[test]
    fn periodic_rearm_from_callback() {
        let q = TimerQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let t = Arc::new_cyclic(|me: &Weak<Timer>| {
            let me = me.clone();
            let h = hits.clone();
            Timer::new(&q, move || {
                h.fetch_add(1, Ordering::SeqCst);
                if let Some(t) = me.upgrade() {
                    t.mod_timer_ms(100);
                }
            })
        });
        t.mod_timer_ms(100);
        q.advance_ms(1000);
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }
}
