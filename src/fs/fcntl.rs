//! `fcntl` flags and signal-driven I/O: the fasync list and `kill_fasync`.

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use crate::base::error::Result;
use crate::base::poll::PollCode;
use crate::base::sync::SpinLock;
use crate::base::task::{SigInfo, Signal};
use super::{File, OpenFlags};


/// Flags `F_SETFL` may change.
pub const SETFL_MASK: OpenFlags = OpenFlags::O_APPEND
    .union(OpenFlags::O_NONBLOCK)
    .union(OpenFlags::O_NDELAY)
    .union(OpenFlags::FASYNC)
    .union(OpenFlags::O_DIRECT)
    .union(OpenFlags::O_NOATIME);

struct FasyncEntry {
    fd: i32,
    file: Weak<File>,
}

/// The files that asked for `SIGIO` on a device.
#[derive(Default)]
pub struct FasyncQueue {
    entries: SpinLock<Vec<FasyncEntry>>,
}

impl FasyncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `file` to (`on`) or remove it from the list, keeping its FASYNC flag in sync.
    /// Returns 1 if the list changed, 0 if it did not.
    pub fn fasync_helper(&self, fd: i32, file: &Arc<File>, on: bool) -> Result<i32> {
        let mut entries = self.entries.lock();
        entries.retain(|e| e.file.strong_count() > 0);
        let pos = entries.iter().position(|e| core::ptr::eq(e.file.as_ptr(), Arc::as_ptr(file)));
        let changed = match (on, pos) {
            (true, Some(i)) => {
                entries[i].fd = fd;
                false
            }
            (true, None) => {
                entries.push(FasyncEntry { fd, file: Arc::downgrade(file) });
                file.update_flags(OpenFlags::FASYNC, OpenFlags::empty());
                true
            }
            (false, Some(i)) => {
                entries.remove(i);
                file.update_flags(OpenFlags::empty(), OpenFlags::FASYNC);
                true
            }
            (false, None) => false,
        };
        Ok(changed as i32)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `kill_fasync()`: send `sig` to the owner of every file on the list. Files without an
    /// owner are skipped.
    pub fn kill_fasync(&self, sig: Signal, band: PollCode) {
        // Collect first: the owners may close their files from a signal handler.
        let targets: Vec<(i32, Arc<File>)> = self.entries.lock()
            .iter()
            .filter_map(|e| e.file.upgrade().map(|f| (e.fd, f)))
            .collect();
        for (fd, file) in targets {
            let Some(owner) = file.owner() else { continue };
            let info = SigInfo {
                signo: sig,
                code: band.code(),
                band: band.band(),
                fd,
            };
            owner.send_signal(info);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::task::Task;
    use crate::fs::FileOperations;

    struct AsyncDev {
        queue: FasyncQueue,
    }

    impl FileOperations for AsyncDev {
        fn fasync(&self, fd: i32, file: &Arc<File>, on: bool) -> Result<i32> {
            self.queue.fasync_helper(fd, file, on)
        }
    }

    #[test]
    fn helper_reports_changes() {
        let task = Task::new(3);
        let dev = Arc::new(AsyncDev { queue: FasyncQueue::new() });
        let file = File::open(dev.clone(), OpenFlags::O_RDONLY, &task).unwrap();
        assert_eq!(dev.queue.fasync_helper(file.fd(), &file, true), Ok(1));
        assert_eq!(dev.queue.fasync_helper(file.fd(), &file, true), Ok(0));
        assert!(file.flags().contains(OpenFlags::FASYNC));
        assert_eq!(dev.queue.fasync_helper(-1, &file, false), Ok(1));
        assert_eq!(dev.queue.fasync_helper(-1, &file, false), Ok(0));
        assert!(dev.queue.is_empty());
    }

    #[test]
    fn sigio_reaches_owner() {
        let task = Task::new(3);
        let dev = Arc::new(AsyncDev { queue: FasyncQueue::new() });
        let file = File::open(dev.clone(), OpenFlags::O_RDONLY, &task).unwrap();
        file.set_flags(OpenFlags::FASYNC).unwrap();
        assert_eq!(dev.queue.len(), 1);

        // No F_SETOWN yet: nobody to signal.
        dev.queue.kill_fasync(Signal::SIGIO, PollCode::In);
        assert!(!task.signal_pending());

        file.set_owner(&task);
        dev.queue.kill_fasync(Signal::SIGIO, PollCode::In);
        let info = task.dequeue_signal().unwrap();
        assert_eq!(info.signo, Signal::SIGIO);
        assert_eq!(info.code, PollCode::In.code());
        assert_eq!(info.band, PollCode::In.band());
        assert_eq!(info.fd, file.fd());

        file.close();
        assert!(dev.queue.is_empty());
    }

    #[test]
    fn dropped_files_leave_the_list() {
        let task = Task::new(3);
        let dev = Arc::new(AsyncDev { queue: FasyncQueue::new() });
        let other = File::open(dev.clone(), OpenFlags::O_RDONLY, &task).unwrap();
        {
            let file = File::open(dev.clone(), OpenFlags::O_RDONLY, &task).unwrap();
            file.set_flags(OpenFlags::FASYNC).unwrap();
        }
        assert_eq!(dev.queue.fasync_helper(other.fd(), &other, true), Ok(1));
        assert_eq!(dev.queue.len(), 1);
    }
}
