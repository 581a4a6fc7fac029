//! Legacy integer-number GPIO interface.
//!
//! GPIO controllers register a [`GpioChip`] covering `[base, base + ngpio)` of the global
//! number space. Drivers request a line by number, then drive or sample it. The values here are
//! raw line levels, polarity is up to the caller (see [`GpioFlags`]).
//!
//! [`GpioFlags`]: crate::driver::of::gpio::GpioFlags

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use crate::base::error::{Error, Result};
use crate::base::sync::SpinLock;


/// Size of the global GPIO number space.
pub const ARCH_NR_GPIOS: u32 = 512;

#[inline]
pub const fn gpio_is_valid(gpio: i64) -> bool {
    gpio >= 0 && gpio < ARCH_NR_GPIOS as i64
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GpioDirection {
    In,
    Out,
}

/// GPIO controller operations, `offset` is relative to the chip.
pub trait GpioChip: Send + Sync {
    fn label(&self) -> &str;

    fn ngpio(&self) -> u32;

    fn direction_input(&self, offset: u32) -> Result;

    fn direction_output(&self, offset: u32, value: bool) -> Result;

    fn get_direction(&self, offset: u32) -> GpioDirection;

    fn get_value(&self, offset: u32) -> Result<bool>;

    fn set_value(&self, offset: u32, value: bool);

    /// Virq of a line, if the chip is also an interrupt controller.
    fn to_irq(&self, _offset: u32) -> Result<u32> {
        Err(Error::ENXIO)
    }
}

struct ChipEntry {
    chip: Arc<dyn GpioChip>,
    base: u32,
    phandle: Option<u32>,
    /// Label of the owner of each requested line.
    requested: Vec<Option<String>>,
}

impl ChipEntry {
    #[inline]
    fn contains(&self, gpio: u32) -> bool {
        gpio >= self.base && gpio < self.base + self.chip.ngpio()
    }
}

pub struct GpioSubsystem {
    chips: SpinLock<Vec<ChipEntry>>,
}

impl GpioSubsystem {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            chips: SpinLock::new(Vec::new()),
        })
    }

    /// `gpiochip_add_data()`. Fails with `EBUSY` if the range overlaps another chip.
    pub fn add_chip(&self, chip: Arc<dyn GpioChip>, base: u32, phandle: Option<u32>) -> Result {
        let ngpio = chip.ngpio();
        if base + ngpio > ARCH_NR_GPIOS {
            return Err(Error::EINVAL);
        }
        let mut chips = self.chips.lock();
        if chips.iter().any(|c| base < c.base + c.chip.ngpio() && c.base < base + ngpio) {
            error!("gpiochip {}: range {}..{} overlaps", chip.label(), base, base + ngpio);
            return Err(Error::EBUSY);
        }
        info!("gpiochip {}: registered GPIOs {} to {}", chip.label(), base, base + ngpio - 1);
        chips.push(ChipEntry {
            chip,
            base,
            phandle,
            requested: (0..ngpio).map(|_| None).collect(),
        });
        Ok(())
    }

    fn with_line<R>(&self, gpio: u32, f: impl FnOnce(&mut ChipEntry, u32) -> R) -> Result<R> {
        if !gpio_is_valid(gpio as i64) {
            return Err(Error::EINVAL);
        }
        let mut chips = self.chips.lock();
        let entry = chips.iter_mut().find(|c| c.contains(gpio)).ok_or(Error::EPROBE_DEFER)?;
        let offset = gpio - entry.base;
        Ok(f(entry, offset))
    }

    fn chip_of(&self, gpio: u32) -> Result<(Arc<dyn GpioChip>, u32)> {
        self.with_line(gpio, |entry, offset| (entry.chip.clone(), offset))
    }

    /// Global number of pin `offset` of the chip with DT `phandle`.
    pub fn gpio_by_phandle(&self, phandle: u32, offset: u32) -> Result<u32> {
        let chips = self.chips.lock();
        let entry = chips.iter()
            .find(|c| c.phandle == Some(phandle))
            .ok_or(Error::EPROBE_DEFER)?;
        if offset >= entry.chip.ngpio() {
            return Err(Error::EINVAL);
        }
        Ok(entry.base + offset)
    }

    /// `gpio_request()`.
    pub fn request(&self, gpio: u32, label: &str) -> Result {
        self.with_line(gpio, |entry, offset| {
            let slot = &mut entry.requested[offset as usize];
            if let Some(owner) = slot {
                error!("gpio {} is already requested by {}", gpio, owner);
                return Err(Error::EBUSY);
            }
            *slot = Some(String::from(label));
            Ok(())
        })?
    }

    /// `gpio_free()`.
    pub fn free(&self, gpio: u32) {
        let freed = self.with_line(gpio, |entry, offset| {
            entry.requested[offset as usize].take().is_some()
        });
        if freed != Ok(true) {
            warn!("gpio {}: freeing a line that was not requested", gpio);
        }
    }

    pub fn is_requested(&self, gpio: u32) -> bool {
        self.label(gpio).is_some()
    }

    /// Owner label of a requested line.
    pub fn label(&self, gpio: u32) -> Option<String> {
        self.with_line(gpio, |entry, offset| entry.requested[offset as usize].clone())
            .ok()
            .flatten()
    }

    pub fn direction_input(&self, gpio: u32) -> Result {
        let (chip, offset) = self.chip_of(gpio)?;
        chip.direction_input(offset)
    }

    pub fn direction_output(&self, gpio: u32, value: bool) -> Result {
        let (chip, offset) = self.chip_of(gpio)?;
        chip.direction_output(offset, value)
    }

    pub fn get_direction(&self, gpio: u32) -> Result<GpioDirection> {
        let (chip, offset) = self.chip_of(gpio)?;
        Ok(chip.get_direction(offset))
    }

    /// `gpio_get_value()`: the raw line level.
    pub fn get_value(&self, gpio: u32) -> Result<bool> {
        let (chip, offset) = self.chip_of(gpio)?;
        chip.get_value(offset)
    }

    /// `gpio_set_value()`: the raw line level.
    pub fn set_value(&self, gpio: u32, value: bool) -> Result {
        let (chip, offset) = self.chip_of(gpio)?;
        chip.set_value(offset, value);
        Ok(())
    }

    /// `gpio_to_irq()`.
    pub fn to_irq(&self, gpio: u32) -> Result<u32> {
        let (chip, offset) = self.chip_of(gpio)?;
        chip.to_irq(offset)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    /// 32 lines, levels and directions kept in bitmasks.
    #[derive(Default)]
    struct TestChip {
        level: AtomicU32,
        output: AtomicU32,
    }

    impl GpioChip for TestChip {
        fn label(&self) -> &str {
            "test-gpio"
        }

        fn ngpio(&self) -> u32 {
            32
        }

        fn direction_input(&self, offset: u32) -> Result {
            self.output.fetch_and(!(1 << offset), Ordering::SeqCst);
            Ok(())
        }

        fn direction_output(&self, offset: u32, value: bool) -> Result {
            self.output.fetch_or(1 << offset, Ordering::SeqCst);
            self.set_value(offset, value);
            Ok(())
        }

        fn get_direction(&self, offset: u32) -> GpioDirection {
            if self.output.load(Ordering::SeqCst) & (1 << offset) != 0 {
                GpioDirection::Out
            } else {
                GpioDirection::In
            }
        }

        fn get_value(&self, offset: u32) -> Result<bool> {
            Ok(self.level.load(Ordering::SeqCst) & (1 << offset) != 0)
        }

        fn set_value(&self, offset: u32, value: bool) {
            if value {
                self.level.fetch_or(1 << offset, Ordering::SeqCst);
            } else {
                self.level.fetch_and(!(1 << offset), Ordering::SeqCst);
            }
        }
    }

    fn setup() -> Arc<GpioSubsystem> {
        let gpio = GpioSubsystem::new();
        gpio.add_chip(Arc::new(TestChip::default()), 0, Some(10)).unwrap();
        gpio.add_chip(Arc::new(TestChip::default()), 128, Some(14)).unwrap();
        gpio
    }

    #[test]
    fn validity_range() {
        assert!(gpio_is_valid(0));
        assert!(gpio_is_valid(511));
        assert!(!gpio_is_valid(512));
        assert!(!gpio_is_valid(-2));
    }

    #[test]
    fn request_is_exclusive() {
        let gpio = setup();
        gpio.request(3, "led").unwrap();
        assert_eq!(gpio.request(3, "beep"), Err(Error::EBUSY));
        assert_eq!(gpio.label(3).as_deref(), Some("led"));
        gpio.free(3);
        assert!(!gpio.is_requested(3));
        gpio.request(3, "beep").unwrap();
    }

    #[test]
    fn unknown_lines() {
        let gpio = setup();
        assert_eq!(gpio.request(64, "x"), Err(Error::EPROBE_DEFER));
        assert_eq!(gpio.request(600, "x"), Err(Error::EINVAL));
        assert_eq!(gpio.to_irq(1), Err(Error::ENXIO));
    }

    #[test]
    fn overlapping_chip_rejected() {
        let gpio = setup();
        assert_eq!(gpio.add_chip(Arc::new(TestChip::default()), 16, None), Err(Error::EBUSY));
    }

    #[test]
    fn drive_and_sample() {
        let gpio = setup();
        let num = gpio.gpio_by_phandle(14, 1).unwrap();
        assert_eq!(num, 129);
        gpio.direction_output(num, true).unwrap();
        assert_eq!(gpio.get_direction(num), Ok(GpioDirection::Out));
        assert_eq!(gpio.get_value(num), Ok(true));
        gpio.set_value(num, false).unwrap();
        assert_eq!(gpio.get_value(num), Ok(false));
        assert_eq!(gpio.gpio_by_phandle(14, 32), Err(Error::EINVAL));
    }
}
