//! Poll masks and the poll table.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use bitflags::bitflags;
use crate::base::wait::WaitQueue;


bitflags! {
    /// Poll event mask, as returned by a `poll` file operation.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct PollMask: u32 {
        const POLLIN = 0x0001;
        const POLLPRI = 0x0002;
        const POLLOUT = 0x0004;
        const POLLERR = 0x0008;
        const POLLHUP = 0x0010;
        const POLLNVAL = 0x0020;
        const POLLRDNORM = 0x0040;
        const POLLRDBAND = 0x0080;
        const POLLWRNORM = 0x0100;
        const POLLWRBAND = 0x0200;
        const POLLMSG = 0x0400;
    }
}

/// Mask reported by files with no `poll` operation.
pub const DEFAULT_POLLMASK: PollMask = PollMask::POLLIN.union(PollMask::POLLOUT)
    .union(PollMask::POLLRDNORM).union(PollMask::POLLWRNORM);

/// `si_code` values of `SIGIO`/`SIGPOLL`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum PollCode {
    /// Data input available.
    In = 1,
    /// Output buffers available.
    Out = 2,
    /// Input message available.
    Msg = 3,
    /// I/O error.
    Err = 4,
    /// High priority input available.
    Pri = 5,
    /// Device disconnected.
    Hup = 6,
}

impl PollCode {
    /// The `si_band` reported along with the code.
    pub const fn band(self) -> PollMask {
        match self {
            PollCode::In => PollMask::POLLIN.union(PollMask::POLLRDNORM),
            PollCode::Out => PollMask::POLLOUT.union(PollMask::POLLWRNORM)
                .union(PollMask::POLLWRBAND),
            PollCode::Msg => PollMask::POLLIN.union(PollMask::POLLRDNORM)
                .union(PollMask::POLLMSG),
            PollCode::Err => PollMask::POLLERR,
            PollCode::Pri => PollMask::POLLPRI.union(PollMask::POLLRDBAND),
            PollCode::Hup => PollMask::POLLHUP.union(PollMask::POLLERR),
        }
    }

    #[inline]
    pub const fn code(self) -> i32 {
        self as i32
    }
}


/// Records the wait queues a `poll` file operation waits on, together with their wake
/// sequence at the time of the call.
#[derive(Default)]
pub struct PollTable {
    waits: Vec<(Arc<AtomicU64>, u64)>,
}

impl PollTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// `poll_wait()`: add `wq` to the queues this poll sleeps on.
    pub fn poll_wait(&mut self, wq: &WaitQueue) {
        let handle = wq.seq_handle();
        if self.waits.iter().any(|(h, _)| Arc::ptr_eq(h, handle)) {
            return;
        }
        self.waits.push((handle.clone(), wq.seq()));
    }

    /// Number of distinct queues recorded.
    #[inline]
    pub fn len(&self) -> usize {
        self.waits.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.waits.is_empty()
    }

    /// True if any recorded queue was woken since it was recorded.
    pub fn woken(&self) -> bool {
        self.waits.iter().any(|(h, seq)| h.load(Ordering::Acquire) != *seq)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_match_codes() {
        assert_eq!(PollCode::In.band(), PollMask::POLLIN | PollMask::POLLRDNORM);
        assert_eq!(PollCode::Hup.band().bits(), 0x18);
        assert_eq!(PollCode::Pri.code(), 5);
        assert_eq!(DEFAULT_POLLMASK.bits(), 0x145);
    }

    #[test]
    fn table_notices_wakeup() {
        let wq = WaitQueue::new();
        let mut pt = PollTable::new();
        pt.poll_wait(&wq);
        pt.poll_wait(&wq.clone());
        assert_eq!(pt.len(), 1);
        assert!(!pt.woken());
        wq.wake_up_interruptible();
        assert!(pt.woken());
    }
}
