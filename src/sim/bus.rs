//! I2C and SPI controller models. Peripherals plug in as targets.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use crate::base::error::{Error, Result};
use crate::base::sync::SpinLock;
use crate::driver::i2c::{I2cAdapter, I2cFunc, I2cMsg};
use crate::driver::spi::{SpiDevice, SpiMaster, SpiTransfer};


/// A device answering on an I2C address.
pub trait I2cTarget: Send + Sync {
    /// A write message: register pointer first, then data.
    fn write(&self, data: &[u8]) -> Result;

    /// A read message, continuing from the last register pointer.
    fn read(&self, buf: &mut [u8]) -> Result;
}

pub struct SimI2cBus {
    name: String,
    targets: SpinLock<Vec<(u16, Arc<dyn I2cTarget>)>>,
    functionality: AtomicU32,
    transfers: AtomicUsize,
}

impl SimI2cBus {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: String::from(name),
            targets: SpinLock::new(Vec::new()),
            functionality: AtomicU32::new((I2cFunc::I2C | I2cFunc::SMBUS_EMUL).bits()),
            transfers: AtomicUsize::new(0),
        })
    }

    pub fn attach(&self, addr: u16, target: Arc<dyn I2cTarget>) {
        self.targets.lock().push((addr, target));
    }

    /// Move a target to another address, as a strap pin at reset would.
    pub fn readdress(&self, from: u16, to: u16) {
        for entry in self.targets.lock().iter_mut().filter(|(a, _)| *a == from) {
            entry.0 = to;
        }
    }

    pub fn set_functionality(&self, func: I2cFunc) {
        self.functionality.store(func.bits(), Ordering::Relaxed);
    }

    /// Number of `master_xfer` calls so far.
    pub fn transfer_count(&self) -> usize {
        self.transfers.load(Ordering::Relaxed)
    }

    fn target(&self, addr: u16) -> Option<Arc<dyn I2cTarget>> {
        self.targets.lock().iter().find(|(a, _)| *a == addr).map(|(_, t)| t.clone())
    }
}

impl I2cAdapter for SimI2cBus {
    fn name(&self) -> &str {
        &self.name
    }

    /// A missing target NAKs its address with `ENXIO`, as `i2c-imx` reports it.
    fn master_xfer(&self, msgs: &mut [I2cMsg]) -> Result<usize> {
        self.transfers.fetch_add(1, Ordering::Relaxed);
        for msg in msgs.iter_mut() {
            let target = self.target(msg.addr).ok_or_else(|| {
                debug!("{}: no ack from {:#04x}", self.name, msg.addr);
                Error::ENXIO
            })?;
            if msg.is_read() {
                target.read(msg.buf)?;
            } else {
                target.write(msg.buf)?;
            }
        }
        Ok(msgs.len())
    }

    fn functionality(&self) -> I2cFunc {
        I2cFunc::from_bits_truncate(self.functionality.load(Ordering::Relaxed))
    }
}


/// A device behind a chip select. It sees a whole message as one full-duplex exchange.
pub trait SpiTarget: Send + Sync {
    /// Clock `tx` out while the chip select is asserted, returning what came back.
    fn exchange(&self, tx: &[u8]) -> Vec<u8>;
}

pub struct SimSpiBus {
    name: String,
    num_cs: u16,
    targets: SpinLock<Vec<(u16, Arc<dyn SpiTarget>)>>,
}

impl SimSpiBus {
    pub fn new(name: &str, num_cs: u16) -> Arc<Self> {
        Arc::new(Self {
            name: String::from(name),
            num_cs,
            targets: SpinLock::new(Vec::new()),
        })
    }

    pub fn attach(&self, cs: u16, target: Arc<dyn SpiTarget>) {
        self.targets.lock().push((cs, target));
    }
}

impl SpiMaster for SimSpiBus {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_chipselect(&self) -> u16 {
        self.num_cs
    }

    /// Nothing on the chip select reads back as all ones, like a floating MISO.
    fn transfer_one_message(&self, dev: &SpiDevice, xfers: &mut [SpiTransfer]) -> Result<usize> {
        let target = self.targets.lock().iter()
            .find(|(cs, _)| *cs == dev.chip_select())
            .map(|(_, t)| t.clone());
        let mut tx = Vec::new();
        for x in xfers.iter() {
            match x.tx_buf {
                Some(buf) => tx.extend_from_slice(buf),
                None => tx.extend(core::iter::repeat(0).take(x.len())),
            }
        }
        let rx = match target {
            Some(t) => t.exchange(&tx),
            None => vec![0xff; tx.len()],
        };
        if rx.len() != tx.len() {
            return Err(Error::EIO);
        }
        let mut pos = 0;
        for x in xfers.iter_mut() {
            let len = x.len();
            if let Some(buf) = x.rx_buf.as_mut() {
                buf.copy_from_slice(&rx[pos..pos + len]);
            }
            pos += len;
        }
        Ok(pos)
    }
}
