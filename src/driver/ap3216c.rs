//! AP3216C ambient light / proximity / IR sensor on I2C.

use alloc::sync::Arc;
use crate::base::delay::Delay;
use crate::base::error::{Error, Result};
use crate::base::sync::SpinLock;
use crate::dev::Device;
use crate::driver::i2c::{I2cClient, I2cMsg};
use crate::driver::of::DeviceId;
use crate::fs::{File, FileOperations, UserSliceWriter};
use crate::init::Kernel;
use super::{Driver, Metadata};


const NAME: &str = "ap3216c";

pub mod reg {
    pub const SYSTEM_CONFIGURATION: u8 = 0x00;
    pub const INT_STATUS: u8 = 0x01;
    pub const INT_CLEAR: u8 = 0x02;
    pub const IR_DATA_LOW: u8 = 0x0a;
    pub const IR_DATA_HIGH: u8 = 0x0b;
    pub const ALS_DATA_LOW: u8 = 0x0c;
    pub const ALS_DATA_HIGH: u8 = 0x0d;
    pub const PS_DATA_LOW: u8 = 0x0e;
    pub const PS_DATA_HIGH: u8 = 0x0f;
}

/// `SYSTEM_CONFIGURATION` modes.
pub mod mode {
    pub const POWER_DOWN: u8 = 0x00;
    pub const ALS: u8 = 0x01;
    pub const PS: u8 = 0x02;
    pub const ALS_PS: u8 = 0x03;
    pub const SW_RESET: u8 = 0x04;
    pub const ALS_ONCE: u8 = 0x05;
    pub const PS_ONCE: u8 = 0x06;
    pub const ALS_PS_ONCE: u8 = 0x07;
    pub const MASK: u8 = 0x07;
}

/// Settle time after a mode change.
const MODE_SETTLE_MS: u32 = 50;

pub fn mode_name(config: u8) -> &'static str {
    match config & mode::MASK {
        mode::POWER_DOWN => "Power Down",
        mode::ALS => "ALS Only",
        mode::PS => "PS+IR Only",
        mode::ALS_PS => "ALS+PS+IR",
        mode::SW_RESET => "SW Reset",
        mode::ALS_ONCE => "ALS Once",
        mode::PS_ONCE => "PS+IR Once",
        _ => "ALS+PS+IR Once",
    }
}

/// One decoded reading of the six data registers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ap3216cSample {
    /// 10 bits, 0 when the IR channel overflowed.
    pub ir: u16,
    pub als: u16,
    /// 10 bits, 0 when the IR interference flag is set.
    pub ps: u16,
    pub object_near: bool,
}

impl Ap3216cSample {
    /// Decode the raw bytes of `IR_DATA_LOW..=PS_DATA_HIGH`.
    pub fn parse(raw: &[u8; 6]) -> Self {
        let ir = if raw[0] & 0x80 != 0 {
            0
        } else {
            (raw[1] as u16) << 2 | (raw[0] & 0x03) as u16
        };
        let als = (raw[3] as u16) << 8 | raw[2] as u16;
        let ps = if (raw[4] | raw[5]) & 0x40 != 0 {
            0
        } else {
            ((raw[5] & 0x3f) as u16) << 4 | (raw[4] & 0x0f) as u16
        };
        Self { ir, als, ps, object_near: (raw[4] | raw[5]) & 0x80 != 0 }
    }
}

/// The sensor's character device.
pub struct Ap3216c {
    kernel: Arc<Kernel>,
    client: SpinLock<Option<Arc<I2cClient>>>,
}

impl Ap3216c {
    fn client(&self) -> Result<Arc<I2cClient>> {
        self.client.lock().clone().ok_or(Error::ENODEV)
    }

    /// One message: `[reg, value]`.
    pub fn write_reg(&self, reg: u8, value: u8) -> Result {
        let client = self.client()?;
        let mut buf = [reg, value];
        let mut msgs = [I2cMsg::write(client.addr(), &mut buf)];
        match client.transfer(&mut msgs) {
            Ok(1) => Ok(()),
            _ => Err(Error::EIO),
        }
    }

    /// The register pointer write, then a one byte read.
    pub fn read_reg(&self, reg: u8) -> Result<u8> {
        let client = self.client()?;
        let mut reg = [reg];
        let mut value = [0u8];
        let mut msgs = [I2cMsg::write(client.addr(), &mut reg),
                        I2cMsg::read(client.addr(), &mut value)];
        match client.transfer(&mut msgs) {
            Ok(2) => Ok(value[0]),
            _ => Err(Error::EIO),
        }
    }

    /// The six data registers, one at a time. Burst reads are unreliable on this part.
    pub fn read_data(&self) -> Result<[u8; 6]> {
        let mut data = [0u8; 6];
        for (i, b) in data.iter_mut().enumerate() {
            *b = self.read_reg(reg::IR_DATA_LOW + i as u8)?;
        }
        Ok(data)
    }

    pub fn sample(&self) -> Result<Ap3216cSample> {
        self.read_data().map(|raw| Ap3216cSample::parse(&raw))
    }

    /// Soft reset, then continuous ALS+PS+IR. Returns the configuration read back.
    pub fn init_sensor(&self) -> Result<u8> {
        self.write_reg(reg::SYSTEM_CONFIGURATION, mode::SW_RESET).map_err(|e| {
            error!("{} write reset failed", NAME);
            e
        })?;
        self.kernel.timers.mdelay(MODE_SETTLE_MS);
        self.write_reg(reg::SYSTEM_CONFIGURATION, mode::ALS_PS).map_err(|e| {
            error!("{} write config failed", NAME);
            e
        })?;
        self.kernel.timers.mdelay(MODE_SETTLE_MS);
        let config = self.read_reg(reg::SYSTEM_CONFIGURATION).map_err(|e| {
            error!("{} read config failed", NAME);
            e
        })?;
        info!("{} open: initialized, config={:#04x} ({})", NAME, config, mode_name(config));
        Ok(config)
    }
}

impl FileOperations for Ap3216c {
    fn open(&self, _file: &File) -> Result {
        self.init_sensor().map(|_| ())
    }

    fn read(&self, _file: &File, buf: &mut UserSliceWriter, _offset: u64) -> Result<usize> {
        let data = self.read_data()?;
        let len = buf.len().min(data.len());
        buf.write_slice(&data[..len])?;
        Ok(len)
    }
}


pub struct Ap3216cDriver {
    metadata: Metadata,
    match_table: [DeviceId; 1],
    kernel: Arc<Kernel>,
}

impl Ap3216cDriver {
    pub fn new(kernel: &Arc<Kernel>) -> Self {
        Self {
            metadata: Metadata::with_name(NAME),
            match_table: [DeviceId::with_compat("alpha,ap3216c")],
            kernel: kernel.clone(),
        }
    }
}

impl Driver for Ap3216cDriver {
    fn get_metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn get_match_table(&self) -> Option<&[DeviceId]> {
        Some(&self.match_table)
    }

    fn get_id_table(&self) -> &[&'static str] {
        &[NAME]
    }

    fn probe(&self, dev: &mut Device) -> Result {
        let client = dev.i2c_client()?.clone();
        info!("{} i2c probe, addr {:#04x} on {}", NAME, client.addr(), client.adapter().name());
        dev.set_drvdata(Arc::new(Ap3216c {
            kernel: self.kernel.clone(),
            client: SpinLock::new(Some(client)),
        }));
        Ok(())
    }

    /// Open files keep the state alive, their reads fail once the client is gone.
    fn remove(&self, dev: &mut Device) -> Result {
        info!("{} i2c remove", NAME);
        if let Some(state) = dev.drvdata::<Ap3216c>() {
            state.client.lock().take();
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::task::Task;
    use crate::fs::OpenFlags;
    use crate::sim::{find_device, Board};

    #[test]
    fn decodes_samples() {
        let s = Ap3216cSample::parse(&[0x02, 0x40, 0x34, 0x12, 0x05, 0x83]);
        assert_eq!(s, Ap3216cSample { ir: 0x102, als: 0x1234, ps: 0x35, object_near: true });
        // IR overflow and PS interference zero their channels.
        let s = Ap3216cSample::parse(&[0x83, 0xff, 0, 0, 0x4f, 0x3f]);
        assert_eq!((s.ir, s.ps, s.object_near), (0, 0, false));
        assert_eq!(mode_name(0x03), "ALS+PS+IR");
        assert_eq!(mode_name(0xff), "ALS+PS+IR Once");
    }

    #[test]
    fn open_initializes_and_read_returns_raw() {
        let board = Board::alpha().unwrap();
        let mut devices = board.populate();
        let dev = find_device(&mut devices, "ap3216c").unwrap();
        assert_eq!(dev.driver_name(), Some(NAME));
        board.ap3216c.set_data(300, 1000, 12, false);

        let state = dev.drvdata::<Ap3216c>().unwrap();
        let t0 = board.kernel.timers.jiffies();
        let file = File::open(state.clone(), OpenFlags::O_RDONLY, &Task::new(1)).unwrap();
        assert_eq!(board.kernel.timers.jiffies() - t0, 10);
        assert_eq!(board.ap3216c.config(), mode::ALS_PS);
        assert_eq!(board.ap3216c.resets(), 1);

        let mut raw = [0u8; 6];
        assert_eq!(file.read(&mut raw), Ok(6));
        let s = Ap3216cSample::parse(&raw);
        assert_eq!((s.ir, s.als, s.ps), (300, 1000, 12));
        let mut short = [0u8; 2];
        assert_eq!(file.read(&mut short), Ok(2));

        dev.unbind().unwrap();
        assert_eq!(file.read(&mut raw), Err(Error::ENODEV));
    }
}
