//! The `poll(2)` system call.

use alloc::sync::Arc;
use core::hint;
use crate::base::error::{Error, Result};
use crate::base::poll::{PollMask, PollTable};
use crate::base::task::Task;
use crate::base::time::{self, msecs_to_jiffies};
use crate::base::timer::TimerQueue;
use super::File;


/// One entry of the `fds` array.
#[derive(Debug)]
pub struct PollFd {
    pub file: Arc<File>,
    pub events: PollMask,
    pub revents: PollMask,
}

impl PollFd {
    pub fn new(file: &Arc<File>, events: PollMask) -> Self {
        Self { file: file.clone(), events, revents: PollMask::empty() }
    }
}

/// Poll every fd once, filling `revents`. Returns the number of ready fds.
fn do_pollfd(fds: &mut [PollFd], table: &mut PollTable) -> usize {
    let mut count = 0;
    for pfd in fds.iter_mut() {
        let filter = pfd.events | PollMask::POLLERR | PollMask::POLLHUP;
        pfd.revents = pfd.file.poll(table) & filter;
        if !pfd.revents.is_empty() {
            count += 1;
        }
    }
    count
}

/// `poll()`: wait until one of `fds` is ready, `timeout_ms` passes on the board clock or a
/// signal arrives for `task`. A negative timeout waits forever, 0 does not wait. Returns the
/// number of ready fds, 0 on timeout, and `EINTR` when interrupted.
pub fn poll(fds: &mut [PollFd], timeout_ms: i32, timers: &TimerQueue, task: &Task)
            -> Result<usize> {
    let deadline = (timeout_ms > 0)
        .then(|| timers.jiffies().wrapping_add(msecs_to_jiffies(timeout_ms as u32)));
    loop {
        let mut table = PollTable::new();
        let ready = do_pollfd(fds, &mut table);
        if ready > 0 || timeout_ms == 0 {
            return Ok(ready);
        }
        let seen = timers.jiffies();
        loop {
            if task.signal_pending() {
                return Err(Error::EINTR);
            }
            if let Some(deadline) = deadline {
                if time::time_after_eq(timers.jiffies(), deadline) {
                    return Ok(0);
                }
            }
            // A wake on a polled queue, or the clock moving, means polling again.
            if table.woken() || timers.jiffies() != seen {
                break;
            }
            hint::spin_loop();
        }
    }
}
