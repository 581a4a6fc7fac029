//! GPIO LED character device, with exclusive open and a blink timer driven by ioctl.

use alloc::sync::{Arc, Weak};
use core::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use crate::base::error::{Error, Result};
use crate::base::timer::Timer;
use crate::dev::{Device, pm::PmMessage};
use crate::driver::of::gpio::GpioFlags;
use crate::driver::of::{self, DeviceId};
use crate::fs::ioctl::{_IO, _IOR, _IOW};
use crate::fs::{File, FileOperations, UserSliceReader, UserSliceWriter};
use crate::init::Kernel;
use super::{Driver, Metadata};


const NAME: &str = "imx6ull-led";
const LABEL: &str = "led";
/// Bytes of a write looked at, the rest is discarded.
pub const WRITE_MAX: usize = 99;

pub const LED_IOC_MAGIC: u8 = b'x';
pub const LED_ON: u32 = _IO(LED_IOC_MAGIC, 0);
pub const LED_OFF: u32 = _IO(LED_IOC_MAGIC, 1);
pub const LED_GET_STATE: u32 = _IOR::<i32>(LED_IOC_MAGIC, 2);
pub const LED_SET_PERIOD: u32 = _IOW::<i32>(LED_IOC_MAGIC, 3);
pub const LED_GET_PERIOD: u32 = _IOR::<i32>(LED_IOC_MAGIC, 4);

pub struct GpioLed {
    kernel: Arc<Kernel>,
    gpio: u32,
    active_low: bool,
    on: AtomicBool,
    /// Held by the one open file.
    busy: AtomicBool,
    /// Blink half-period in ms, 0 when not blinking.
    period_ms: AtomicI32,
    /// Reported by `LED_GET_PERIOD` while not blinking.
    default_period_ms: i32,
    saved_on: AtomicBool,
    blink: Timer,
}

impl GpioLed {
    fn new(kernel: &Arc<Kernel>, gpio: u32, active_low: bool) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<GpioLed>| {
            let me = me.clone();
            GpioLed {
                kernel: kernel.clone(),
                gpio,
                active_low,
                on: AtomicBool::new(false),
                busy: AtomicBool::new(false),
                period_ms: AtomicI32::new(0),
                default_period_ms: i32::try_from(kernel.config.led_blink_ms).unwrap_or(i32::MAX),
                saved_on: AtomicBool::new(false),
                blink: Timer::new(&kernel.timers, move || {
                    if let Some(led) = me.upgrade() {
                        led.blink_tick();
                    }
                }),
            }
        })
    }

    #[inline]
    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::Acquire)
    }

    #[inline]
    pub fn gpio(&self) -> u32 {
        self.gpio
    }

    pub fn is_blinking(&self) -> bool {
        self.blink.pending()
    }

    /// Drive the line to the active level for on.
    pub fn set(&self, on: bool) {
        if let Err(e) = self.kernel.gpio.set_value(self.gpio, on != self.active_low) {
            error!("{} gpio {} set failed: {:?}", NAME, self.gpio, e);
            return;
        }
        self.on.store(on, Ordering::Release);
    }

    fn blink_tick(&self) {
        let period = self.period_ms.load(Ordering::Acquire);
        if period <= 0 {
            return;
        }
        self.set(!self.is_on());
        self.blink.mod_timer_ms(period as u32);
    }

    fn start_blink(&self, period: i32) {
        self.period_ms.store(period, Ordering::Release);
        self.blink.mod_timer_ms(period as u32);
        info!("{} blinking every {} ms", NAME, period);
    }

    fn stop_blink(&self) {
        self.period_ms.store(0, Ordering::Release);
        self.blink.del_timer_sync();
    }

    fn period(&self) -> i32 {
        match self.period_ms.load(Ordering::Acquire) {
            0 => self.default_period_ms,
            p => p,
        }
    }
}

impl FileOperations for GpioLed {
    fn open(&self, _file: &File) -> Result {
        if self.busy.swap(true, Ordering::AcqRel) {
            warn!("{} is busy", NAME);
            return Err(Error::EBUSY);
        }
        info!("{} open", NAME);
        Ok(())
    }

    fn release(&self, _file: &File) {
        self.busy.store(false, Ordering::Release);
        info!("{} release", NAME);
    }

    fn read(&self, _file: &File, buf: &mut UserSliceWriter, _offset: u64) -> Result<usize> {
        let msg: &[u8] = if self.is_on() { b"LED is ON\n" } else { b"LED is OFF\n" };
        let len = buf.len().min(msg.len());
        buf.write_slice(&msg[..len])?;
        Ok(len)
    }

    fn write(&self, _file: &File, buf: &mut UserSliceReader, _offset: u64) -> Result<usize> {
        let count = buf.len();
        let mut data = [0u8; WRITE_MAX];
        let len = count.min(WRITE_MAX);
        buf.read_slice(&mut data[..len])?;
        let cmd = &data[..len];
        if cmd.starts_with(b"on") {
            self.set(true);
            info!("{} led on", NAME);
        } else if cmd.starts_with(b"off") {
            self.set(false);
            info!("{} led off", NAME);
        } else {
            info!("{} invalid command", NAME);
        }
        Ok(count)
    }

    /// The argument of `LED_SET_PERIOD` is the period itself, states and periods are
    /// returned as the ioctl value.
    fn ioctl(&self, _file: &File, cmd: u32, arg: usize) -> Result<i32> {
        match cmd {
            LED_ON => {
                self.stop_blink();
                self.set(true);
                Ok(0)
            }
            LED_OFF => {
                self.stop_blink();
                self.set(false);
                Ok(0)
            }
            LED_GET_STATE => Ok(self.is_on() as i32),
            LED_SET_PERIOD => {
                let period = arg as i32;
                if period < 0 {
                    return Err(Error::EINVAL);
                }
                self.stop_blink();
                if period > 0 {
                    self.start_blink(period);
                }
                Ok(0)
            }
            LED_GET_PERIOD => Ok(self.period()),
            _ => {
                debug!("{} unknown ioctl {:#x}", NAME, cmd);
                Err(Error::ENOTTY)
            }
        }
    }
}


pub struct GpioLedDriver {
    metadata: Metadata,
    match_table: [DeviceId; 1],
    kernel: Arc<Kernel>,
}

impl GpioLedDriver {
    pub fn new(kernel: &Arc<Kernel>) -> Self {
        Self {
            metadata: Metadata::with_name(NAME),
            match_table: [DeviceId::with_compat("alpha-gpio_led")],
            kernel: kernel.clone(),
        }
    }
}

impl Driver for GpioLedDriver {
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
                                                           node, "led-gpios", 0)
            .map_err(|e| {
                error!("{} led gpio not found, error: {:?}", NAME, e);
                e
            })?;
        info!("{} led gpio: {}", NAME, gpio);
        self.kernel.gpio.request(gpio, LABEL)?;

        let active_low = flags.contains(GpioFlags::ACTIVE_LOW);
        if let Err(e) = self.kernel.gpio.direction_output(gpio, active_low) {
            error!("{} gpio direction output failed", NAME);
            self.kernel.gpio.free(gpio);
            return Err(e);
        }
        let led = GpioLed::new(&self.kernel, gpio, active_low);
        led.set(true);
        dev.set_drvdata(led);
        Ok(())
    }

    fn remove(&self, dev: &mut Device) -> Result {
        info!("{} remove", NAME);
        if let Some(led) = dev.drvdata::<GpioLed>() {
            led.stop_blink();
            led.set(false);
            self.kernel.gpio.free(led.gpio);
        }
        Ok(())
    }

    fn suspend(&self, dev: &mut Device, _state: PmMessage) -> Result {
        if let Some(led) = dev.drvdata::<GpioLed>() {
            led.saved_on.store(led.is_on(), Ordering::Release);
            led.blink.del_timer_sync();
            led.set(false);
        }
        Ok(())
    }

    fn resume(&self, dev: &mut Device) -> Result {
        if let Some(led) = dev.drvdata::<GpioLed>() {
            led.set(led.saved_on.load(Ordering::Acquire));
            let period = led.period_ms.load(Ordering::Acquire);
            if period > 0 {
                led.blink.mod_timer_ms(period as u32);
            }
        }
        Ok(())
    }
}
