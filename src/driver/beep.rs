//! Buzzer on a GPIO, as a misc character device.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};
use crate::base::error::Result;
use crate::dev::Device;
use crate::driver::of::gpio::GpioFlags;
use crate::driver::of::{self, DeviceId};
use crate::fs::{File, FileOperations, UserSliceReader, UserSliceWriter};
use crate::init::Kernel;
use super::{Driver, Metadata};


const NAME: &str = "imx6ull-beep";
/// `write_buf[8]`, one byte for the terminator.
pub const WRITE_MAX: usize = 7;

pub struct Beep {
    kernel: Arc<Kernel>,
    gpio: u32,
    active_low: bool,
    on: AtomicBool,
}

impl Beep {
    #[inline]
    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::Acquire)
    }

    #[inline]
    pub fn gpio(&self) -> u32 {
        self.gpio
    }

    pub fn set(&self, on: bool) {
        match self.kernel.gpio.set_value(self.gpio, on != self.active_low) {
            Ok(()) => self.on.store(on, Ordering::Release),
            Err(e) => error!("{} gpio {} set failed: {:?}", NAME, self.gpio, e),
        }
    }

    pub fn toggle(&self) {
        self.set(!self.is_on());
    }
}

impl FileOperations for Beep {
    fn read(&self, _file: &File, buf: &mut UserSliceWriter, _offset: u64) -> Result<usize> {
        let msg: &[u8] = if self.is_on() { b"BEEP is ON\n" } else { b"BEEP is OFF\n" };
        let len = buf.len().min(msg.len());
        buf.write_slice(&msg[..len])?;
        Ok(len)
    }

    fn write(&self, _file: &File, buf: &mut UserSliceReader, _offset: u64) -> Result<usize> {
        let count = buf.len();
        let mut data = [0u8; WRITE_MAX];
        let len = count.min(WRITE_MAX);
        buf.read_slice(&mut data[..len])?;
        if data[..len].starts_with(b"on") {
            self.set(true);
        } else if data[..len].starts_with(b"off") {
            self.set(false);
        }
        Ok(count)
    }
}


pub struct BeepDriver {
    metadata: Metadata,
    match_table: [DeviceId; 1],
    kernel: Arc<Kernel>,
}

impl BeepDriver {
    pub fn new(kernel: &Arc<Kernel>) -> Self {
        Self {
            metadata: Metadata::with_name(NAME),
            match_table: [DeviceId::with_compat("alpha-beep")],
            kernel: kernel.clone(),
        }
    }
}

impl Driver for BeepDriver {
    fn get_metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn get_match_table(&self) -> Option<&[DeviceId]> {
        Some(&self.match_table)
    }

    fn probe(&self, dev: &mut Device) -> Result {
        info!("{} probe", NAME);
        let node = dev.require_of_node()?;
        let (gpio, flags) = of::gpio::get_named_gpio_flags(&self.kernel.tree, &self.kernel.gpio,
                                                           node, "beep-gpios", 0)
            .map_err(|e| {
                error!("beep gpio not found");
                e
            })?;
        info!("beep gpio: {}", gpio);
        self.kernel.gpio.request(gpio, "beep").map_err(|e| {
            error!("gpio request failed");
            e
        })?;
        let active_low = flags.contains(GpioFlags::ACTIVE_LOW);
        if let Err(e) = self.kernel.gpio.direction_output(gpio, active_low) {
            error!("gpio direction output failed");
            self.kernel.gpio.free(gpio);
            return Err(e);
        }
        dev.set_drvdata(Arc::new(Beep {
            kernel: self.kernel.clone(),
            gpio,
            active_low,
            on: AtomicBool::new(false),
        }));
        Ok(())
    }

    fn remove(&self, dev: &mut Device) -> Result {
        info!("{} remove", NAME);
        if let Some(beep) = dev.drvdata::<Beep>() {
            beep.set(false);
            self.kernel.gpio.free(beep.gpio);
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::task::Task;
    use crate::fs::OpenFlags;
    use crate::sim::{find_device, Board, BEEP_LINE};

    #[test]
    fn starts_silent_and_switches() {
        let board = Board::alpha().unwrap();
        let mut devices = board.populate();
        let dev = find_device(&mut devices, "beep").unwrap();
        let beep = dev.drvdata::<Beep>().unwrap();
        assert!(!beep.is_on());
        assert!(board.gpio5.level(BEEP_LINE));

        let file = File::open(beep.clone(), OpenFlags::O_RDWR, &Task::new(1)).unwrap();
        assert_eq!(file.write(b"on"), Ok(2));
        assert!(!board.gpio5.level(BEEP_LINE));
        let mut buf = [0u8; 16];
        let n = file.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"BEEP is ON\n");

        // Only the first 7 bytes are looked at.
        assert_eq!(file.write(b"       off"), Ok(10));
        assert!(beep.is_on());
        beep.toggle();
        assert!(!beep.is_on());
        beep.toggle();

        dev.unbind().unwrap();
        assert!(board.gpio5.level(BEEP_LINE));
        assert!(!board.kernel.gpio.is_requested(beep.gpio()));
    }
}
