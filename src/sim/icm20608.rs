//! ICM-20608 register model on SPI.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use crate::base::sync::SpinLock;
use crate::driver::icm20608::{reg, Icm20608Sample, ICM20608G_ID};
use super::bus::SpiTarget;


const NREGS: usize = 0x80;
/// `PWR_MGMT_1` after reset: asleep.
const PWR_MGMT_1_RESET: u8 = 0x40;
const DEVICE_RESET: u8 = 0x80;

pub struct Icm20608Model {
    regs: SpinLock<[u8; NREGS]>,
    resets: AtomicUsize,
}

impl Icm20608Model {
    pub fn new() -> Arc<Self> {
        let mut regs = [0u8; NREGS];
        regs[reg::PWR_MGMT_1 as usize] = PWR_MGMT_1_RESET;
        regs[reg::WHO_AM_I as usize] = ICM20608G_ID;
        Arc::new(Self {
            regs: SpinLock::new(regs),
            resets: AtomicUsize::new(0),
        })
    }

    pub fn reg(&self, reg: u8) -> u8 {
        self.regs.lock()[reg as usize % NREGS]
    }

    pub fn set_who_am_i(&self, id: u8) {
        self.regs.lock()[reg::WHO_AM_I as usize] = id;
    }

    /// Load the measurement registers, big-endian.
    pub fn set_sample(&self, sample: &Icm20608Sample) {
        let words = sample.accel.iter()
            .chain(core::iter::once(&sample.temp))
            .chain(sample.gyro.iter());
        let mut regs = self.regs.lock();
        let mut r = reg::ACCEL_XOUT_H as usize;
        for w in words {
            regs[r..r + 2].copy_from_slice(&w.to_be_bytes());
            r += 2;
        }
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::Relaxed)
    }
}

impl SpiTarget for Icm20608Model {
    /// First byte is the address, bit 7 set for a read. Both directions auto-increment.
    fn exchange(&self, tx: &[u8]) -> Vec<u8> {
        let mut rx = vec![0u8; tx.len()];
        let Some((&addr, data)) = tx.split_first() else { return rx };
        let start = (addr & 0x7f) as usize;
        let mut regs = self.regs.lock();
        if addr & 0x80 != 0 {
            for (i, b) in rx[1..].iter_mut().enumerate() {
                *b = regs[(start + i) % NREGS];
            }
            return rx;
        }
        for (i, &v) in data.iter().enumerate() {
            let r = (start + i) % NREGS;
            if r == reg::PWR_MGMT_1 as usize && v & DEVICE_RESET != 0 {
                let id = regs[reg::WHO_AM_I as usize];
                *regs = [0; NREGS];
                regs[reg::PWR_MGMT_1 as usize] = PWR_MGMT_1_RESET;
                regs[reg::WHO_AM_I as usize] = id;
                self.resets.fetch_add(1, Ordering::Relaxed);
            } else {
                regs[r] = v;
            }
        }
        rx
    }
}
