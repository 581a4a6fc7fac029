//! Kernel error codes.
//!
//! An [`Error`] carries a negative errno, exactly the value a C driver would return. Every
//! fallible operation in the crate returns [`Result`] and propagates with `?`.

use core::fmt;
use core::num::NonZeroI32;


/// Max errno a kernel error can hold, as in `include/linux/err.h`.
pub const MAX_ERRNO: i32 = 4095;

/// Generic kernel error, holding a negative errno.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Error(NonZeroI32);

macro_rules! declare_err {
    ($($name:ident = $errno:expr, $doc:literal;)+) => {
        impl Error {
            $(
                #[doc = $doc]
                pub const $name: Error = Error::from_const($errno);
            )+
        }

        fn errno_name(errno: i32) -> Option<&'static str> {
            match -errno {
                $( $errno => Some(stringify!($name)), )+
                _ => None,
            }
        }
    };
}

declare_err! {
    EPERM = 1, "Operation not permitted.";
    ENOENT = 2, "No such file or directory.";
    EINTR = 4, "Interrupted system call.";
    EIO = 5, "I/O error.";
    ENXIO = 6, "No such device or address.";
    EBADF = 9, "Bad file number.";
    EAGAIN = 11, "Try again.";
    ENOMEM = 12, "Out of memory.";
    EFAULT = 14, "Bad address.";
    EBUSY = 16, "Device or resource busy.";
    EEXIST = 17, "File exists.";
    ENODEV = 19, "No such device.";
    EINVAL = 22, "Invalid argument.";
    ENOTTY = 25, "Not a typewriter.";
    ENOSPC = 28, "No space left on device.";
    ENODATA = 61, "No data available.";
    EPROTO = 71, "Protocol error.";
    EOVERFLOW = 75, "Value too large for defined data type.";
    EILSEQ = 84, "Illegal byte sequence.";
    ETIMEDOUT = 110, "Connection timed out.";
    EREMOTEIO = 121, "Remote I/O error.";
    ERESTARTSYS = 512, "Restart the system call.";
    EPROBE_DEFER = 517, "Driver requests probe retry.";
}

impl Error {
    const fn from_const(errno: i32) -> Self {
        match NonZeroI32::new(-errno) {
            Some(v) => Error(v),
            None => panic!("errno must not be zero"),
        }
    }

    /// Creates an [`Error`] from a kernel error code (a negative errno).
    ///
    /// Anything outside `[-MAX_ERRNO, -1]` is not a valid error code and is turned into
    /// [`Error::EINVAL`].
    pub fn from_errno(errno: i32) -> Error {
        if errno < -MAX_ERRNO || errno >= 0 {
            warn!("attempted to create an Error from an invalid errno: {}", errno);
            return Error::EINVAL;
        }
        match NonZeroI32::new(errno) {
            Some(v) => Error(v),
            None => Error::EINVAL,
        }
    }

    /// Returns the kernel error code, that is the negative errno.
    #[inline]
    pub const fn to_errno(self) -> i32 {
        self.0.get()
    }

    /// Returns the symbolic name, if the errno is one we know of.
    pub fn name(self) -> Option<&'static str> {
        errno_name(self.to_errno())
    }
}

impl From<Error> for NonZeroI32 {
    fn from(e: Error) -> Self {
        e.0
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}({})", name, self.to_errno()),
            None => write!(f, "Error({})", self.to_errno()),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A [`Result`] with an [`Error`] error type.
pub type Result<T = ()> = core::result::Result<T, Error>;
