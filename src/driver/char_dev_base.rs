//! The smallest character device: a fixed string to read, a scratch buffer to write.

use alloc::string::String;
use crate::base::error::Result;
use crate::base::sync::SpinLock;
use crate::fs::{File, FileOperations, UserSliceReader, UserSliceWriter};


const NAME: &str = "char_dev_base";
pub const DATA: &[u8] = b"kernel data - hello\n";
/// Size of the write buffer, one byte is kept for the terminator.
pub const WRITE_BUF_LEN: usize = 100;

pub struct CharDevBase {
    write_buf: SpinLock<[u8; WRITE_BUF_LEN]>,
    write_len: SpinLock<usize>,
}

impl CharDevBase {
    pub const fn new() -> Self {
        Self {
            write_buf: SpinLock::new([0; WRITE_BUF_LEN]),
            write_len: SpinLock::new(0),
        }
    }

    /// What the last write stored.
    pub fn last_write(&self) -> String {
        let len = *self.write_len.lock();
        String::from_utf8_lossy(&self.write_buf.lock()[..len]).into_owned()
    }
}

impl Default for CharDevBase {
    fn default() -> Self {
        Self::new()
    }
}

impl FileOperations for CharDevBase {
    fn open(&self, _file: &File) -> Result {
        info!("{} open", NAME);
        Ok(())
    }

    fn release(&self, _file: &File) {
        info!("{} release", NAME);
    }

    fn read(&self, _file: &File, buf: &mut UserSliceWriter, _offset: u64) -> Result<usize> {
        let len = buf.len().min(DATA.len());
        buf.write_slice(&DATA[..len]).map_err(|e| {
            error!("{} copy_to_user failed", NAME);
            e
        })?;
        info!("{} read {} bytes successfully", NAME, len);
        Ok(len)
    }

    fn write(&self, _file: &File, buf: &mut UserSliceReader, _offset: u64) -> Result<usize> {
        let count = buf.len();
        let len = count.min(WRITE_BUF_LEN - 1);
        info!("{} write {}", NAME, count);
        let mut data = self.write_buf.lock();
        buf.read_slice(&mut data[..len]).map_err(|e| {
            error!("{} copy_from_user failed", NAME);
            e
        })?;
        *self.write_len.lock() = len;
        info!("{} write buf ok, count: {}, string: {}", NAME, count,
              String::from_utf8_lossy(&data[..len]));
        Ok(count)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;
    use alloc::vec;
    use crate::base::error::Error;
    use crate::base::task::Task;
    use crate::fs::OpenFlags;

    fn open() -> (Arc<CharDevBase>, Arc<File>) {
        let dev = Arc::new(CharDevBase::new());
        let file = File::open(dev.clone(), OpenFlags::O_RDWR, &Task::new(1)).unwrap();
        (dev, file)
    }

    #[test]
    fn read_is_truncated_and_repeats() {
        let (_, file) = open();
        let mut small = [0u8; 6];
        assert_eq!(file.read(&mut small), Ok(6));
        assert_eq!(&small, b"kernel");
        // The offset is ignored, every read starts over.
        let mut big = [0u8; 64];
        assert_eq!(file.read(&mut big), Ok(DATA.len()));
        assert_eq!(&big[..DATA.len()], DATA);
    }

    #[test]
    fn long_write_is_capped() {
        let (dev, file) = open();
        assert_eq!(file.write(b"hello kernel"), Ok(12));
        assert_eq!(dev.last_write(), "hello kernel");

        let long = vec![b'a'; 150];
        assert_eq!(file.write(&long), Ok(150));
        assert_eq!(dev.last_write().len(), WRITE_BUF_LEN - 1);
    }

    #[test]
    fn faults_are_reported() {
        let (_, file) = open();
        assert_eq!(file.read_user(&mut UserSliceWriter::faulting(10)), Err(Error::EFAULT));
        assert_eq!(file.write_user(&mut UserSliceReader::faulting(10)), Err(Error::EFAULT));
    }
}
