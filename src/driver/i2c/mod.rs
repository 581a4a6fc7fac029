//! I2C bus core: messages, adapters and clients.

use alloc::string::String;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU16, Ordering};
use bitflags::bitflags;
use crate::base::error::{Error, Result};
use crate::base::irq::IrqSubsystem;
use crate::driver::of::{self, DeviceNode, DeviceTree};


bitflags! {
    /// Flags of an [`I2cMsg`].
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct I2cMsgFlags: u16 {
        /// Read data, from slave to master.
        const RD = 0x0001;
        /// This is a ten bit chip address.
        const TEN = 0x0010;
        const DMA_SAFE = 0x0200;
        /// Message length will be first received byte.
        const RECV_LEN = 0x0400;
        const NO_RD_ACK = 0x0800;
        const IGNORE_NAK = 0x1000;
        const REV_DIR_ADDR = 0x2000;
        /// Skip repeated start sequence.
        const NOSTART = 0x4000;
        const STOP = 0x8000;
    }
}

bitflags! {
    /// Adapter functionality, `I2C_FUNC_*`.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct I2cFunc: u32 {
        /// Plain i2c-level commands (`master_xfer`).
        const I2C = 0x0000_0001;
        const TEN_BIT_ADDR = 0x0000_0002;
        const PROTOCOL_MANGLING = 0x0000_0004;
        const SMBUS_PEC = 0x0000_0008;
        const NOSTART = 0x0000_0010;
        const SLAVE = 0x0000_0020;
        const SMBUS_QUICK = 0x0001_0000;
        const SMBUS_READ_BYTE = 0x0002_0000;
        const SMBUS_WRITE_BYTE = 0x0004_0000;
        const SMBUS_READ_BYTE_DATA = 0x0008_0000;
        const SMBUS_WRITE_BYTE_DATA = 0x0010_0000;
        const SMBUS_READ_WORD_DATA = 0x0020_0000;
        const SMBUS_WRITE_WORD_DATA = 0x0040_0000;
        const SMBUS_READ_I2C_BLOCK = 0x0400_0000;
        const SMBUS_WRITE_I2C_BLOCK = 0x0800_0000;
        /// What a plain I2C adapter can emulate.
        const SMBUS_EMUL = Self::SMBUS_QUICK.bits() | Self::SMBUS_READ_BYTE.bits()
            | Self::SMBUS_WRITE_BYTE.bits() | Self::SMBUS_READ_BYTE_DATA.bits()
            | Self::SMBUS_WRITE_BYTE_DATA.bits() | Self::SMBUS_READ_WORD_DATA.bits()
            | Self::SMBUS_WRITE_WORD_DATA.bits() | Self::SMBUS_READ_I2C_BLOCK.bits()
            | Self::SMBUS_WRITE_I2C_BLOCK.bits();
    }
}

/// One segment of an I2C transaction.
#[derive(Debug)]
pub struct I2cMsg<'a> {
    pub addr: u16,
    pub flags: I2cMsgFlags,
    pub buf: &'a mut [u8],
}

impl<'a> I2cMsg<'a> {
    #[inline]
    pub fn write(addr: u16, buf: &'a mut [u8]) -> Self {
        Self { addr, flags: I2cMsgFlags::empty(), buf }
    }

    #[inline]
    pub fn read(addr: u16, buf: &'a mut [u8]) -> Self {
        Self { addr, flags: I2cMsgFlags::RD, buf }
    }

    #[inline]
    pub fn is_read(&self) -> bool {
        self.flags.contains(I2cMsgFlags::RD)
    }
}

/// An I2C bus master.
pub trait I2cAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Run `msgs` as one combined transaction. Returns the number of messages transferred.
    fn master_xfer(&self, msgs: &mut [I2cMsg]) -> Result<usize>;

    fn functionality(&self) -> I2cFunc {
        I2cFunc::I2C | I2cFunc::SMBUS_EMUL
    }
}

/// A device on an I2C bus.
pub struct I2cClient {
    name: String,
    addr: AtomicU16,
    adapter: Arc<dyn I2cAdapter>,
    irq: Option<u32>,
    of_node: Option<Arc<DeviceNode>>,
}

impl I2cClient {
    pub fn new(name: &str, addr: u16, adapter: Arc<dyn I2cAdapter>, irq: Option<u32>,
               of_node: Option<Arc<DeviceNode>>) -> Self {
        Self {
            name: String::from(name),
            addr: AtomicU16::new(addr),
            adapter,
            irq,
            of_node,
        }
    }

    /// `of_i2c_register_device()`: a client for the DT child `node` of an adapter. The name is
    /// the first compatible without its vendor prefix.
    pub fn from_of_node(tree: &DeviceTree, irqs: &IrqSubsystem, adapter: Arc<dyn I2cAdapter>,
                        node: &Arc<DeviceNode>) -> Result<Self> {
        let addr = node.property_read_u32("reg").map_err(|e| {
            error!("{}: invalid reg on {}", adapter.name(), node.full_path());
            e
        })?;
        if addr > 0x3ff || (addr > 0x7f && !node.property_read_bool("ten-bit")) {
            error!("{}: invalid addr {:#x} on {}", adapter.name(), addr, node.full_path());
            return Err(Error::EINVAL);
        }
        let compat = node.property_read_string("compatible")?;
        let name = compat.split_once(',').map_or(compat, |(_, n)| n);
        let irq = of::irq::irq_of_parse_and_map(tree, irqs, node, 0).ok();
        Ok(Self::new(name, addr as u16, adapter, irq, Some(node.clone())))
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn addr(&self) -> u16 {
        self.addr.load(Ordering::Acquire)
    }

    /// Drivers probing for alternative addresses move the client.
    #[inline]
    pub fn set_addr(&self, addr: u16) {
        self.addr.store(addr, Ordering::Release);
    }

    #[inline]
    pub fn irq(&self) -> Option<u32> {
        self.irq
    }

    #[inline]
    pub fn of_node(&self) -> Option<&Arc<DeviceNode>> {
        self.of_node.as_ref()
    }

    #[inline]
    pub fn adapter(&self) -> &Arc<dyn I2cAdapter> {
        &self.adapter
    }

    /// `i2c_check_functionality()`.
    #[inline]
    pub fn check_functionality(&self, func: I2cFunc) -> bool {
        self.adapter.functionality().contains(func)
    }

    /// `i2c_transfer()`: the number of messages transferred, which may be short.
    pub fn transfer(&self, msgs: &mut [I2cMsg]) -> Result<usize> {
        self.adapter.master_xfer(msgs)
    }

    /// `i2c_master_send()`.
    pub fn master_send(&self, buf: &[u8]) -> Result<usize> {
        let mut data = buf.to_vec();
        let mut msgs = [I2cMsg::write(self.addr(), &mut data)];
        match self.transfer(&mut msgs)? {
            1 => Ok(buf.len()),
            _ => Err(Error::EIO),
        }
    }

    /// `i2c_master_recv()`.
    pub fn master_recv(&self, buf: &mut [u8]) -> Result<usize> {
        let len = buf.len();
        let mut msgs = [I2cMsg::read(self.addr(), buf)];
        match self.transfer(&mut msgs)? {
            1 => Ok(len),
            _ => Err(Error::EIO),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use crate::base::sync::SpinLock;

    /// Acks only `ack_addr`, a read returns the last byte written, counting up.
    struct EchoAdapter {
        ack_addr: u16,
        log: SpinLock<Vec<(u16, bool, usize)>>,
    }

    impl I2cAdapter for EchoAdapter {
        fn name(&self) -> &str {
            "i2c-echo"
        }

        fn master_xfer(&self, msgs: &mut [I2cMsg]) -> Result<usize> {
            let mut last = 0u8;
            for (i, msg) in msgs.iter_mut().enumerate() {
                if msg.addr != self.ack_addr {
                    return if i == 0 { Err(Error::EREMOTEIO) } else { Ok(i) };
                }
                self.log.lock().push((msg.addr, msg.is_read(), msg.buf.len()));
                if msg.is_read() {
                    for (k, b) in msg.buf.iter_mut().enumerate() {
                        *b = last.wrapping_add(k as u8);
                    }
                } else if let Some(b) = msg.buf.last() {
                    last = *b;
                }
            }
            Ok(msgs.len())
        }

        fn functionality(&self) -> I2cFunc {
            I2cFunc::I2C
        }
    }

    fn client(addr: u16) -> (Arc<EchoAdapter>, I2cClient) {
        let adapter = Arc::new(EchoAdapter { ack_addr: 0x1e, log: SpinLock::new(Vec::new()) });
        let c = I2cClient::new("ap3216c", addr, adapter.clone(), None, None);
        (adapter, c)
    }

    #[test]
    fn combined_write_read() {
        let (adapter, c) = client(0x1e);
        let mut reg = [0x0a];
        let mut val = [0u8; 2];
        let mut msgs = [I2cMsg::write(c.addr(), &mut reg), I2cMsg::read(c.addr(), &mut val)];
        assert_eq!(c.transfer(&mut msgs), Ok(2));
        assert_eq!(val, [0x0a, 0x0b]);
        assert_eq!(adapter.log.lock().as_slice(), &[(0x1e, false, 1), (0x1e, true, 2)]);
    }

    #[test]
    fn send_recv_and_nak() {
        let (_, c) = client(0x1e);
        assert_eq!(c.master_send(&[0x00, 0x03]), Ok(2));
        let mut buf = [0u8; 3];
        assert_eq!(c.master_recv(&mut buf), Ok(3));

        c.set_addr(0x5d);
        assert_eq!(c.master_send(&[0x00]), Err(Error::EREMOTEIO));
    }

    #[test]
    fn functionality_check() {
        let (_, c) = client(0x1e);
        assert!(c.check_functionality(I2cFunc::I2C));
        assert!(!c.check_functionality(I2cFunc::I2C | I2cFunc::SMBUS_QUICK));
    }
}
