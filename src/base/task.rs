//! Tasks and signal delivery.
//!
//! A [`Task`] stands for a user process calling into a driver: it owns a pid and a queue of
//! pending signals. Drivers use it to abort interruptible waits and `kill_fasync` targets it.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::hint;
use crate::base::poll::PollMask;
use crate::base::sync::SpinLock;


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum Signal {
    SIGINT = 2,
    SIGKILL = 9,
    SIGUSR1 = 10,
    SIGTERM = 15,
    SIGIO = 29,
}

impl Signal {
    /// Alias of `SIGIO`.
    pub const SIGPOLL: Signal = Signal::SIGIO;

    #[inline]
    pub const fn number(self) -> i32 {
        self as i32
    }
}

/// `si_code` of a signal raised by the kernel itself.
pub const SI_KERNEL: i32 = 0x80;

/// The `siginfo_t` subset a driver can fill in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SigInfo {
    pub signo: Signal,
    pub code: i32,
    /// `si_band`, only meaningful for `SIGIO`.
    pub band: PollMask,
    /// `si_fd`, only meaningful for `SIGIO`.
    pub fd: i32,
}

impl SigInfo {
    pub const fn kernel(signo: Signal) -> Self {
        Self {
            signo,
            code: SI_KERNEL,
            band: PollMask::empty(),
            fd: -1,
        }
    }
}

pub struct Task {
    pid: i32,
    pending: SpinLock<VecDeque<SigInfo>>,
}

impl Task {
    pub fn new(pid: i32) -> Arc<Self> {
        Arc::new(Self {
            pid,
            pending: SpinLock::new(VecDeque::new()),
        })
    }

    #[inline]
    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Queue a signal. A standard signal that is already pending is not queued twice.
    /// Returns false if the signal was merged with the pending one.
    pub fn send_signal(&self, info: SigInfo) -> bool {
        let mut pending = self.pending.lock();
        if pending.iter().any(|s| s.signo == info.signo) {
            return false;
        }
        debug!("pid {}: signal {:?} queued", self.pid, info.signo);
        pending.push_back(info);
        true
    }

    #[inline]
    pub fn kill(&self, signo: Signal) -> bool {
        self.send_signal(SigInfo::kernel(signo))
    }

    #[inline]
    pub fn signal_pending(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    pub fn dequeue_signal(&self) -> Option<SigInfo> {
        self.pending.lock().pop_front()
    }

    /// `pause()`: sleep until a signal arrives, then take it.
    pub fn pause(&self) -> SigInfo {
        loop {
            if let Some(info) = self.dequeue_signal() {
                return info;
            }
            hint::spin_loop();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_signals_coalesce() {
        let task = Task::new(7);
        assert!(task.kill(Signal::SIGIO));
        assert!(!task.kill(Signal::SIGIO));
        assert!(task.kill(Signal::SIGUSR1));
        assert_eq!(task.dequeue_signal().map(|s| s.signo), Some(Signal::SIGIO));
        assert_eq!(task.dequeue_signal().map(|s| s.signo), Some(Signal::SIGUSR1));
        assert!(!task.signal_pending());
    }

    #[test]
    fn pause_returns_delivered_signal() {
        let task = Task::new(8);
        let t = task.clone();
        let sender = std::thread::spawn(move || t.kill(Signal::SIGTERM));
        assert_eq!(task.pause().signo, Signal::SIGTERM);
        sender.join().unwrap();
    }
}
