//! ICM-20608 6-axis IMU on SPI.

use alloc::sync::Arc;
use crate::base::delay::Delay;
use crate::base::error::{Error, Result};
use crate::base::sync::SpinLock;
use crate::dev::Device;
use crate::driver::of::DeviceId;
use crate::driver::spi::SpiDevice;
use crate::fs::{File, FileOperations, UserSliceWriter};
use crate::init::Kernel;
use super::{Driver, Metadata};


const NAME: &str = "icm20608";

pub mod reg {
    pub const SMPLRT_DIV: u8 = 0x19;
    pub const CONFIG: u8 = 0x1a;
    pub const GYRO_CONFIG: u8 = 0x1b;
    pub const ACCEL_CONFIG: u8 = 0x1c;
    pub const ACCEL_CONFIG2: u8 = 0x1d;
    pub const LP_MODE_CFG: u8 = 0x1e;
    pub const FIFO_EN: u8 = 0x23;
    pub const ACCEL_XOUT_H: u8 = 0x3b;
    pub const PWR_MGMT_1: u8 = 0x6b;
    pub const PWR_MGMT_2: u8 = 0x6c;
    pub const WHO_AM_I: u8 = 0x75;
}

pub const ICM20608G_ID: u8 = 0xaf;
pub const ICM20608D_ID: u8 = 0xae;
/// Bit 7 of the address byte selects a read.
const READ: u8 = 0x80;
/// `ACCEL_XOUT_H..=GYRO_ZOUT_L`
pub const SAMPLE_LEN: usize = 14;

/// Register writes done at open, after the reset.
const INIT_SEQUENCE: [(u8, u8); 9] = [
    (reg::PWR_MGMT_1, 0x01),    // auto select the clock
    (reg::SMPLRT_DIV, 0x00),    // output rate = internal sample rate
    (reg::GYRO_CONFIG, 0x18),   // ±2000 dps
    (reg::ACCEL_CONFIG, 0x18),  // ±16 g
    (reg::CONFIG, 0x04),        // gyro LPF 20 Hz
    (reg::ACCEL_CONFIG2, 0x04), // accel LPF 21.2 Hz
    (reg::PWR_MGMT_2, 0x00),    // all axes on
    (reg::LP_MODE_CFG, 0x00),
    (reg::FIFO_EN, 0x00),
];

/// A burst of the measurement registers, in the scales set up at open.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Icm20608Sample {
    pub accel: [i16; 3],
    pub temp: i16,
    pub gyro: [i16; 3],
}

impl Icm20608Sample {
    pub const ACCEL_LSB_PER_G: f32 = 2048.0;
    pub const TEMP_LSB_PER_DEGC: f32 = 326.8;
    pub const TEMP_OFFSET_DEGC: f32 = 25.0;
    pub const GYRO_LSB_PER_DPS: f32 = 16.4;

    /// Big-endian words, in register order.
    pub fn parse(raw: &[u8; SAMPLE_LEN]) -> Self {
        let word = |i: usize| i16::from_be_bytes([raw[2 * i], raw[2 * i + 1]]);
        Self {
            accel: [word(0), word(1), word(2)],
            temp: word(3),
            gyro: [word(4), word(5), word(6)],
        }
    }

    pub fn accel_g(&self) -> [f32; 3] {
        self.accel.map(|v| v as f32 / Self::ACCEL_LSB_PER_G)
    }

    pub fn temp_degc(&self) -> f32 {
        self.temp as f32 / Self::TEMP_LSB_PER_DEGC + Self::TEMP_OFFSET_DEGC
    }

    pub fn gyro_dps(&self) -> [f32; 3] {
        self.gyro.map(|v| v as f32 / Self::GYRO_LSB_PER_DPS)
    }
}

pub struct Icm20608 {
    kernel: Arc<Kernel>,
    spi: SpinLock<Option<Arc<SpiDevice>>>,
}

impl Icm20608 {
    fn spi(&self) -> Result<Arc<SpiDevice>> {
        self.spi.lock().clone().ok_or(Error::ENODEV)
    }

    pub fn write_reg(&self, reg: u8, value: u8) -> Result {
        self.spi()?.write(&[reg & !READ, value])
    }

    pub fn read_reg(&self, reg: u8) -> Result<u8> {
        let mut value = [0u8];
        self.spi()?.write_then_read(&[reg | READ], &mut value)?;
        Ok(value[0])
    }

    /// Consecutive registers from `reg` on, in one message.
    pub fn read_regs(&self, reg: u8, buf: &mut [u8]) -> Result {
        self.spi()?.write_then_read(&[reg | READ], buf)
    }

    pub fn read_sample(&self) -> Result<[u8; SAMPLE_LEN]> {
        let mut data = [0u8; SAMPLE_LEN];
        self.read_regs(reg::ACCEL_XOUT_H, &mut data)?;
        Ok(data)
    }

    /// Check the id, reset and configure. A wrong id is only reported.
    pub fn init_sensor(&self) -> Result {
        let id = self.read_reg(reg::WHO_AM_I)?;
        info!("{} WHO_AM_I: {:#04x} (expected: {:#04x})", NAME, id, ICM20608G_ID);
        if id != ICM20608G_ID && id != ICM20608D_ID {
            warn!("{} WHO_AM_I mismatch, SPI communication may have issues", NAME);
        }
        self.write_reg(reg::PWR_MGMT_1, 0x80)?;
        self.kernel.timers.mdelay(50);
        for (reg, value) in INIT_SEQUENCE {
            self.write_reg(reg, value)?;
        }
        info!("{} initialized with full configuration", NAME);
        Ok(())
    }
}

impl FileOperations for Icm20608 {
    fn open(&self, _file: &File) -> Result {
        self.init_sensor()
    }

    fn read(&self, _file: &File, buf: &mut UserSliceWriter, _offset: u64) -> Result<usize> {
        let data = self.read_sample()?;
        let len = buf.len().min(SAMPLE_LEN);
        buf.write_slice(&data[..len])?;
        Ok(len)
    }
}


pub struct Icm20608Driver {
    metadata: Metadata,
    match_table: [DeviceId; 1],
    kernel: Arc<Kernel>,
}

impl Icm20608Driver {
    pub fn new(kernel: &Arc<Kernel>) -> Self {
        Self {
            metadata: Metadata::with_name(NAME),
            match_table: [DeviceId::with_compat("alpha,icm20608")],
            kernel: kernel.clone(),
        }
    }
}

impl Driver for Icm20608Driver {
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
        let spi = dev.spi_device()?.clone();
        info!("{} SPI config: max_speed={}, mode={:#x}, bits_per_word={}", NAME,
              spi.max_speed_hz(), spi.mode().bits(), spi.bits_per_word());
        dev.set_drvdata(Arc::new(Icm20608 {
            kernel: self.kernel.clone(),
            spi: SpinLock::new(Some(spi)),
        }));
        Ok(())
    }

    fn remove(&self, dev: &mut Device) -> Result {
        info!("{} spi remove", NAME);
        if let Some(state) = dev.drvdata::<Icm20608>() {
            state.spi.lock().take();
        }
        Ok(())
    }
}
