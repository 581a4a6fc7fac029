//! AP3216C register model.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};
use crate::base::error::Result;
use crate::base::sync::SpinLock;
use crate::driver::ap3216c::{mode, reg};
use super::bus::I2cTarget;


const NREGS: usize = 0x20;

struct Regs {
    regs: [u8; NREGS],
    pointer: u8,
}

pub struct Ap3216cModel {
    regs: SpinLock<Regs>,
    resets: AtomicUsize,
}

impl Ap3216cModel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            regs: SpinLock::new(Regs { regs: [0; NREGS], pointer: 0 }),
            resets: AtomicUsize::new(0),
        })
    }

    /// Load a reading into the data registers. `ir` and `ps` are 10 bits wide.
    pub fn set_data(&self, ir: u16, als: u16, ps: u16, object_near: bool) {
        let near = if object_near { 0x80 } else { 0 };
        self.set_raw([
            (ir & 0x03) as u8,
            (ir >> 2) as u8,
            als as u8,
            (als >> 8) as u8,
            (ps & 0x0f) as u8 | near,
            ((ps >> 4) & 0x3f) as u8 | near,
        ]);
    }

    /// Raw contents of `IR_DATA_LOW..=PS_DATA_HIGH`, overflow flags included.
    pub fn set_raw(&self, raw: [u8; 6]) {
        let start = reg::IR_DATA_LOW as usize;
        self.regs.lock().regs[start..start + 6].copy_from_slice(&raw);
    }

    pub fn config(&self) -> u8 {
        self.regs.lock().regs[reg::SYSTEM_CONFIGURATION as usize]
    }

    /// Number of software resets seen.
    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::Relaxed)
    }
}

impl I2cTarget for Ap3216cModel {
    fn write(&self, data: &[u8]) -> Result {
        let Some((&pointer, values)) = data.split_first() else { return Ok(()) };
        let mut regs = self.regs.lock();
        regs.pointer = pointer;
        for &v in values {
            let r = regs.pointer as usize % NREGS;
            if r == reg::SYSTEM_CONFIGURATION as usize && v & mode::MASK == mode::SW_RESET {
                // The reset bit clears itself along with the configuration.
                regs.regs[r] = mode::POWER_DOWN;
                self.resets.fetch_add(1, Ordering::Relaxed);
            } else if r == reg::INT_CLEAR as usize {
                regs.regs[reg::INT_STATUS as usize] &= !v;
            } else {
                regs.regs[r] = v;
            }
            regs.pointer = regs.pointer.wrapping_add(1);
        }
        Ok(())
    }

    fn read(&self, buf: &mut [u8]) -> Result {
        let mut regs = self.regs.lock();
        for b in buf.iter_mut() {
            *b = regs.regs[regs.pointer as usize % NREGS];
            regs.pointer = regs.pointer.wrapping_add(1);
        }
        Ok(())
    }
}
