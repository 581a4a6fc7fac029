//! GT911 model: the register window from `0x8000`, and the INT line.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};
use crate::base::error::{Error, Result};
use crate::base::sync::SpinLock;
use crate::driver::gt911::{reg, Contact, CONTACT_SIZE};
use super::bus::I2cTarget;
use super::gpio::SimGpioChip;


const WINDOW_BASE: u16 = 0x8000;
const WINDOW_LEN: usize = 0x200;
/// `READ_COOR` bit 7: a frame is ready.
const BUFFER_READY: u8 = 0x80;

struct Regs {
    mem: [u8; WINDOW_LEN],
    pointer: u16,
}

impl Regs {
    fn slot(&mut self, reg: u16) -> Option<&mut u8> {
        reg.checked_sub(WINDOW_BASE).and_then(|off| self.mem.get_mut(off as usize))
    }
}

pub struct Gt911Model {
    regs: SpinLock<Regs>,
    int: Arc<SimGpioChip>,
    int_line: u32,
    sw_resets: AtomicUsize,
    status_clears: AtomicUsize,
}

impl Gt911Model {
    /// A panel of `x_max` by `y_max` with up to `max_contacts` contacts, signalling on
    /// `int_line` of `int`.
    pub fn new(int: &Arc<SimGpioChip>, int_line: u32, x_max: u16, y_max: u16,
               max_contacts: u8, trigger: u8) -> Arc<Self> {
        let mut regs = Regs { mem: [0; WINDOW_LEN], pointer: WINDOW_BASE };
        let at = (reg::VERSION - WINDOW_BASE) as usize;
        regs.mem[at..at + 6].copy_from_slice(&[b'9', b'1', b'1', 0, 0x60, 0x10]);
        let cfg = (reg::CONFIG_DATA - WINDOW_BASE) as usize;
        regs.mem[cfg] = 0x41;
        regs.mem[cfg + 1..cfg + 3].copy_from_slice(&x_max.to_le_bytes());
        regs.mem[cfg + 3..cfg + 5].copy_from_slice(&y_max.to_le_bytes());
        regs.mem[cfg + 5] = max_contacts & 0x0f;
        regs.mem[cfg + 6] = 0x0c | (trigger & 0x03);
        Arc::new(Self {
            regs: SpinLock::new(regs),
            int: int.clone(),
            int_line,
            sw_resets: AtomicUsize::new(0),
            status_clears: AtomicUsize::new(0),
        })
    }

    /// Latch a frame of contacts and signal it. An empty frame reports a release.
    pub fn touch(&self, contacts: &[Contact]) {
        self.load_frame(contacts.len() as u8, contacts);
        self.interrupt();
    }

    /// Latch a frame whose status claims `touch_num` contacts.
    pub fn load_frame(&self, touch_num: u8, contacts: &[Contact]) {
        let mut regs = self.regs.lock();
        let base = (reg::READ_COOR - WINDOW_BASE) as usize;
        regs.mem[base] = BUFFER_READY | (touch_num & 0x0f);
        for (i, c) in contacts.iter().enumerate() {
            let at = base + 1 + i * CONTACT_SIZE;
            let raw = &mut regs.mem[at..at + CONTACT_SIZE];
            raw[0] = c.id;
            raw[1..3].copy_from_slice(&c.x.to_le_bytes());
            raw[3..5].copy_from_slice(&c.y.to_le_bytes());
            raw[5..7].copy_from_slice(&c.w.to_le_bytes());
            raw[7] = 0;
        }
    }

    /// The chip drives INT high when idle and pulses it low for a frame.
    pub fn interrupt(&self) {
        self.int.set_input(self.int_line, true);
        self.int.pulse_low(self.int_line);
    }

    pub fn status(&self) -> u8 {
        let mut regs = self.regs.lock();
        regs.slot(reg::READ_COOR).map_or(0, |v| *v)
    }

    pub fn sw_resets(&self) -> usize {
        self.sw_resets.load(Ordering::Relaxed)
    }

    /// Number of times the host wrote the status register.
    pub fn status_clears(&self) -> usize {
        self.status_clears.load(Ordering::Relaxed)
    }
}

impl I2cTarget for Gt911Model {
    fn write(&self, data: &[u8]) -> Result {
        let [hi, lo, values @ ..] = data else { return Err(Error::EIO) };
        let mut regs = self.regs.lock();
        regs.pointer = u16::from_be_bytes([*hi, *lo]);
        for &v in values {
            let r = regs.pointer;
            if r == reg::COMMAND && v == 0x02 {
                self.sw_resets.fetch_add(1, Ordering::Relaxed);
            }
            if r == reg::READ_COOR {
                self.status_clears.fetch_add(1, Ordering::Relaxed);
            }
            let slot = regs.slot(r).ok_or(Error::EIO)?;
            *slot = v;
            regs.pointer = r.wrapping_add(1);
        }
        Ok(())
    }

    fn read(&self, buf: &mut [u8]) -> Result {
        let mut regs = self.regs.lock();
        for b in buf.iter_mut() {
            let r = regs.pointer;
            *b = regs.slot(r).map_or(0, |v| *v);
            regs.pointer = r.wrapping_add(1);
        }
        Ok(())
    }
}
