//! The user-copy boundary of file operations.

use alloc::vec::Vec;
use crate::base::error::{Error, Result};


/// Source of a `write()`: the bytes a process passed in.
pub struct UserSliceReader<'a> {
    buf: Option<&'a [u8]>,
    len: usize,
    pos: usize,
}

impl<'a> UserSliceReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf: Some(buf), len: buf.len(), pos: 0 }
    }

    /// A slice of `len` bytes at an address that is not mapped: every copy fails.
    pub fn faulting(len: usize) -> Self {
        Self { buf: None, len, pos: 0 }
    }

    /// Bytes left to read.
    #[inline]
    pub fn len(&self) -> usize {
        self.len - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `copy_from_user()` of exactly `out.len()` bytes.
    pub fn read_slice(&mut self, out: &mut [u8]) -> Result {
        if out.len() > self.len() {
            return Err(Error::EFAULT);
        }
        let buf = self.buf.ok_or(Error::EFAULT)?;
        out.copy_from_slice(&buf[self.pos..self.pos + out.len()]);
        self.pos += out.len();
        Ok(())
    }

    /// Copy everything that is left.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut data = alloc::vec![0u8; self.len()];
        self.read_slice(&mut data)?;
        Ok(data)
    }
}

/// Destination of a `read()`.
pub struct UserSliceWriter<'a> {
    buf: Option<&'a mut [u8]>,
    len: usize,
    pos: usize,
}

impl<'a> UserSliceWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        let len = buf.len();
        Self { buf: Some(buf), len, pos: 0 }
    }

    pub fn faulting(len: usize) -> Self {
        Self { buf: None, len, pos: 0 }
    }

    /// Room left in the destination.
    #[inline]
    pub fn len(&self) -> usize {
        self.len - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes written so far.
    #[inline]
    pub fn written(&self) -> usize {
        self.pos
    }

    /// `copy_to_user()` of all of `data`.
    pub fn write_slice(&mut self, data: &[u8]) -> Result {
        if data.len() > self.len() {
            return Err(Error::EFAULT);
        }
        let pos = self.pos;
        let buf = self.buf.as_deref_mut().ok_or(Error::EFAULT)?;
        buf[pos..pos + data.len()].copy_from_slice(data);
        self.pos += data.len();
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_bounds() {
        let mut r = UserSliceReader::new(b"on\n");
        let mut two = [0u8; 2];
        r.read_slice(&mut two).unwrap();
        assert_eq!(&two, b"on");
        assert_eq!(r.len(), 1);
        assert_eq!(r.read_slice(&mut two), Err(Error::EFAULT));
        assert_eq!(r.read_all().unwrap(), b"\n");

        assert_eq!(UserSliceReader::faulting(4).read_all(), Err(Error::EFAULT));
    }

    #[test]
    fn writer_bounds() {
        let mut out = [0u8; 4];
        let mut w = UserSliceWriter::new(&mut out);
        w.write_slice(b"abc").unwrap();
        assert_eq!(w.written(), 3);
        assert_eq!(w.write_slice(b"de"), Err(Error::EFAULT));
        drop(w);
        assert_eq!(&out[..3], b"abc");

        assert_eq!(UserSliceWriter::faulting(8).write_slice(b"x"), Err(Error::EFAULT));
    }
}
