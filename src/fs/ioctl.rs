//! ioctl command numbers: `_IO`, `_IOR`, `_IOW` and `_IOWR`.
#![allow(non_snake_case)]

use core::mem::size_of;


const IOC_NRBITS: u32 = 8;
const IOC_TYPEBITS: u32 = 8;
const IOC_SIZEBITS: u32 = 14;

const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = IOC_NRSHIFT + IOC_NRBITS;
const IOC_SIZESHIFT: u32 = IOC_TYPESHIFT + IOC_TYPEBITS;
const IOC_DIRSHIFT: u32 = IOC_SIZESHIFT + IOC_SIZEBITS;

pub const IOC_NONE: u32 = 0;
pub const IOC_WRITE: u32 = 1;
pub const IOC_READ: u32 = 2;

#[inline]
pub const fn _IOC(dir: u32, ty: u8, nr: u8, size: usize) -> u32 {
    (dir << IOC_DIRSHIFT) | ((ty as u32) << IOC_TYPESHIFT) | ((nr as u32) << IOC_NRSHIFT)
        | ((size as u32 & ((1 << IOC_SIZEBITS) - 1)) << IOC_SIZESHIFT)
}

/// A command with no argument.
#[inline]
pub const fn _IO(ty: u8, nr: u8) -> u32 {
    _IOC(IOC_NONE, ty, nr, 0)
}

/// A command the driver answers with a `T`.
#[inline]
pub const fn _IOR<T>(ty: u8, nr: u8) -> u32 {
    _IOC(IOC_READ, ty, nr, size_of::<T>())
}

/// A command carrying a `T` to the driver.
#[inline]
pub const fn _IOW<T>(ty: u8, nr: u8) -> u32 {
    _IOC(IOC_WRITE, ty, nr, size_of::<T>())
}

#[inline]
pub const fn _IOWR<T>(ty: u8, nr: u8) -> u32 {
    _IOC(IOC_READ | IOC_WRITE, ty, nr, size_of::<T>())
}

#[inline]
pub const fn _IOC_DIR(cmd: u32) -> u32 {
    cmd >> IOC_DIRSHIFT
}

#[inline]
pub const fn _IOC_TYPE(cmd: u32) -> u8 {
    (cmd >> IOC_TYPESHIFT) as u8
}

#[inline]
pub const fn _IOC_NR(cmd: u32) -> u8 {
    (cmd >> IOC_NRSHIFT) as u8
}

#[inline]
pub const fn _IOC_SIZE(cmd: u32) -> usize {
    ((cmd >> IOC_SIZESHIFT) & ((1 << IOC_SIZEBITS) - 1)) as usize
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_asm_generic_values() {
        // From a 32-bit ARM build of the asm-generic macros.
        assert_eq!(_IO(b'x', 0), 0x7800);
        assert_eq!(_IOR::<i32>(b'x', 2), 0x8004_7802);
        assert_eq!(_IOW::<i32>(b'x', 3), 0x4004_7803);
        assert_eq!(_IOWR::<u64>(b'E', 0x18), 0xc008_4518);
    }

    #[test]
    fn decode_fields() {
        let cmd = _IOR::<[u8; 6]>(b'l', 9);
        assert_eq!(_IOC_DIR(cmd), IOC_READ);
        assert_eq!(_IOC_TYPE(cmd), b'l');
        assert_eq!(_IOC_NR(cmd), 9);
        assert_eq!(_IOC_SIZE(cmd), 6);
    }
}
