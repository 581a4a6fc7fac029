//! Open files and the file operations a character device provides.
//!
//! There is no VFS: a character device is just a [`FileOperations`] object, and opening it
//! with [`File::open`] gives a file the calling [`Task`] reads, writes and polls.

pub mod fcntl;
pub mod ioctl;
pub mod select;
mod user;

pub use user::{UserSliceReader, UserSliceWriter};

use alloc::sync::Arc;
use core::any::Any;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
use bitflags::bitflags;
use crate::base::error::{Error, Result};
use crate::base::poll::{PollMask, PollTable, DEFAULT_POLLMASK};
use crate::base::sync::SpinLock;
use crate::base::task::Task;


bitflags! {
    /// `f_flags` of an open file, with the ARM values.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const O_WRONLY = 0o1;
        const O_RDWR = 0o2;
        const O_ACCMODE = 0o3;
        const O_CREAT = 0o100;
        const O_EXCL = 0o200;
        const O_NOCTTY = 0o400;
        const O_TRUNC = 0o1000;
        const O_APPEND = 0o2000;
        const O_NONBLOCK = 0o4000;
        const O_DSYNC = 0o10000;
        /// Signal-driven I/O, set through `F_SETFL`.
        const FASYNC = 0o20000;
        const O_DIRECTORY = 0o40000;
        const O_NOFOLLOW = 0o100000;
        const O_DIRECT = 0o200000;
        const O_LARGEFILE = 0o400000;
        const O_NOATIME = 0o1000000;
        const O_CLOEXEC = 0o2000000;
    }
}

impl OpenFlags {
    pub const O_RDONLY: OpenFlags = OpenFlags::empty();
    pub const O_NDELAY: OpenFlags = OpenFlags::O_NONBLOCK;

    #[inline]
    pub fn readable(self) -> bool {
        (self & OpenFlags::O_ACCMODE) != OpenFlags::O_WRONLY
    }

    #[inline]
    pub fn writable(self) -> bool {
        !(self & OpenFlags::O_ACCMODE).is_empty()
    }
}

/// Operations of a character device. Everything but `open` and `release` is optional.
pub trait FileOperations: Send + Sync {
    fn open(&self, _file: &File) -> Result {
        Ok(())
    }

    /// The file is closed, or the last reference of it is going away. Runs once per
    /// successful `open`.
    fn release(&self, _file: &File) {}

    fn read(&self, _file: &File, _buf: &mut UserSliceWriter, _offset: u64) -> Result<usize> {
        Err(Error::EINVAL)
    }

    fn write(&self, _file: &File, _buf: &mut UserSliceReader, _offset: u64) -> Result<usize> {
        Err(Error::EINVAL)
    }

    /// `unlocked_ioctl`. A non-negative return is handed back to the caller as is.
    fn ioctl(&self, _file: &File, _cmd: u32, _arg: usize) -> Result<i32> {
        Err(Error::ENOTTY)
    }

    fn poll(&self, _file: &File, _table: &mut PollTable) -> PollMask {
        DEFAULT_POLLMASK
    }

    /// Called when `FASYNC` is toggled, usually a [`FasyncQueue::fasync_helper`] call.
    ///
    /// [`FasyncQueue::fasync_helper`]: fcntl::FasyncQueue::fasync_helper
    fn fasync(&self, _fd: i32, _file: &Arc<File>, _on: bool) -> Result<i32> {
        Ok(0)
    }
}

/// Open fds start after stdin, stdout and stderr.
static NEXT_FD: AtomicI32 = AtomicI32::new(3);

pub struct File {
    ops: Arc<dyn FileOperations>,
    fd: i32,
    flags: AtomicU32,
    pos: AtomicU64,
    task: Arc<Task>,
    owner: SpinLock<Option<Arc<Task>>>,
    private: SpinLock<Option<Arc<dyn Any + Send + Sync>>>,
    released: AtomicBool,
}

impl File {
    /// Open a device for `task`. Fails with whatever the device's `open` returns.
    pub fn open(ops: Arc<dyn FileOperations>, flags: OpenFlags, task: &Arc<Task>)
                -> Result<Arc<File>> {
        let file = Arc::new(File {
            ops,
            fd: NEXT_FD.fetch_add(1, Ordering::Relaxed),
            flags: AtomicU32::new((flags - OpenFlags::FASYNC).bits()),
            pos: AtomicU64::new(0),
            task: task.clone(),
            owner: SpinLock::new(None),
            private: SpinLock::new(None),
            released: AtomicBool::new(false),
        });
        if let Err(e) = file.ops.open(&file) {
            // Never opened, so nothing to release.
            file.released.store(true, Ordering::Release);
            return Err(e);
        }
        debug!("pid {}: opened fd {} flags {:?}", task.pid(), file.fd, flags);
        Ok(file)
    }

    #[inline]
    pub fn fd(&self) -> i32 {
        self.fd
    }

    #[inline]
    pub fn flags(&self) -> OpenFlags {
        OpenFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    /// The file flags, without the `fcntl` checks. Used by the fasync list to track FASYNC.
    pub(crate) fn update_flags(&self, set: OpenFlags, clear: OpenFlags) {
        let _ = self.flags.fetch_update(Ordering::AcqRel, Ordering::Acquire, |f| {
            Some((OpenFlags::from_bits_truncate(f) - clear | set).bits())
        });
    }

    #[inline]
    pub fn pos(&self) -> u64 {
        self.pos.load(Ordering::Acquire)
    }

    /// The task that opened the file. Blocking operations check its signals.
    #[inline]
    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    #[inline]
    pub fn is_nonblocking(&self) -> bool {
        self.flags().contains(OpenFlags::O_NONBLOCK)
    }

    /// The task signalled by `SIGIO`, `F_GETOWN`.
    pub fn owner(&self) -> Option<Arc<Task>> {
        self.owner.lock().clone()
    }

    /// `F_SETOWN`.
    pub fn set_owner(&self, task: &Arc<Task>) {
        *self.owner.lock() = Some(task.clone());
    }

    /// Per-open state of the device, `private_data`.
    pub fn set_private(&self, data: Arc<dyn Any + Send + Sync>) {
        *self.private.lock() = Some(data);
    }

    pub fn private<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.private.lock().clone()?.downcast::<T>().ok()
    }

    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.read_user(&mut UserSliceWriter::new(buf))
    }

    /// `read(2)` into a user slice.
    pub fn read_user(&self, writer: &mut UserSliceWriter) -> Result<usize> {
        if !self.flags().readable() {
            return Err(Error::EBADF);
        }
        let n = self.ops.read(self, writer, self.pos())?;
        self.pos.fetch_add(n as u64, Ordering::AcqRel);
        Ok(n)
    }

    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        self.write_user(&mut UserSliceReader::new(buf))
    }

    pub fn write_user(&self, reader: &mut UserSliceReader) -> Result<usize> {
        if !self.flags().writable() {
            return Err(Error::EBADF);
        }
        let n = self.ops.write(self, reader, self.pos())?;
        self.pos.fetch_add(n as u64, Ordering::AcqRel);
        Ok(n)
    }

    #[inline]
    pub fn ioctl(&self, cmd: u32, arg: usize) -> Result<i32> {
        self.ops.ioctl(self, cmd, arg)
    }

    #[inline]
    pub fn poll(&self, table: &mut PollTable) -> PollMask {
        self.ops.poll(self, table)
    }

    /// `F_SETFL`. Only the bits of [`fcntl::SETFL_MASK`] change. Turning `FASYNC` on or off
    /// goes through the device's `fasync`.
    pub fn set_flags(self: &Arc<Self>, flags: OpenFlags) -> Result {
        let old = self.flags();
        let want_async = flags.contains(OpenFlags::FASYNC);
        if want_async != old.contains(OpenFlags::FASYNC) {
            let ret = self.ops.fasync(self.fd, self, want_async)?;
            if ret < 0 {
                return Err(Error::from_errno(ret));
            }
            // The device may not keep a fasync list at all.
            if want_async {
                self.update_flags(OpenFlags::FASYNC, OpenFlags::empty());
            } else {
                self.update_flags(OpenFlags::empty(), OpenFlags::FASYNC);
            }
        }
        let keep = self.flags() - fcntl::SETFL_MASK;
        let new = (flags & fcntl::SETFL_MASK) - OpenFlags::FASYNC
            | (self.flags() & OpenFlags::FASYNC);
        self.flags.store((keep | new).bits(), Ordering::Release);
        Ok(())
    }

    /// Last `close(2)`: leave the fasync list, then release the device. Closing again does
    /// nothing.
    pub fn close(self: &Arc<Self>) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.flags().contains(OpenFlags::FASYNC) {
            if let Err(e) = self.ops.fasync(-1, self, false) {
                warn!("fd {}: fasync off on close failed: {:?}", self.fd, e);
            }
        }
        self.ops.release(self);
        debug!("pid {}: closed fd {}", self.task.pid(), self.fd);
    }
}

impl Drop for File {
    /// A file dropped without `close`. The fasync list only holds weak references, so the
    /// entry is pruned there on its own.
    fn drop(&mut self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.ops.release(self);
            debug!("pid {}: dropped fd {}", self.task.pid(), self.fd);
        }
    }
}

impl core::fmt::Debug for File {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("File")
            .field("fd", &self.fd)
            .field("flags", &self.flags())
            .field("pos", &self.pos())
            .finish()
    }
}
