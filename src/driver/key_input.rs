//! The `/key` keys as an input device: each key reports `KEY_ENTER`, with autorepeat.

use alloc::format;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use crate::base::error::{Error, Result};
use crate::base::irq::{IrqFlags, IrqHandler, IrqReturn};
use crate::base::time;
use crate::base::timer::Timer;
use crate::dev::Device;
use crate::driver::input::{InputDev, InputDevBuilder, InputId, BUS_HOST, EV_KEY, EV_REP,
                           KEY_ENTER};
use crate::driver::of::{self, DeviceId};
use crate::init::Kernel;
use super::{Driver, Metadata};


const NAME: &str = "imx6ull-key";
pub const INPUT_NAME: &str = "IMX6ULL Key";

struct InputKey {
    gpio: u32,
    irq: u32,
    keycode: u16,
    name: String,
    timer: Timer,
}

pub struct KeyInput {
    kernel: Arc<Kernel>,
    input: Arc<InputDev>,
    keys: Vec<InputKey>,
    handlers: Vec<Arc<dyn IrqHandler>>,
}

impl KeyInput {
    #[inline]
    pub fn input_dev(&self) -> &Arc<InputDev> {
        &self.input
    }

    pub fn key_gpios(&self) -> impl Iterator<Item = u32> + '_ {
        self.keys.iter().map(|k| k.gpio)
    }

    /// The debounced level: a low line is a pressed key.
    fn report(&self, index: usize) {
        let key = &self.keys[index];
        let Ok(level) = self.kernel.gpio.get_value(key.gpio) else { return };
        self.input.report_key(key.keycode, !level as i32);
        self.input.sync();
    }

    fn teardown(&self) {
        for (key, handler) in self.keys.iter().zip(self.handlers.iter()) {
            self.kernel.irq.free_irq(key.irq, handler);
        }
        for key in self.keys.iter() {
            key.timer.del_timer_sync();
            self.kernel.gpio.free(key.gpio);
        }
    }
}

struct KeyInputIrq {
    keys: Weak<KeyInput>,
    index: usize,
    debounce: u64,
}

impl IrqHandler for KeyInputIrq {
    fn handle_irq(&self, _irq: u32) -> IrqReturn {
        let Some(dev) = self.keys.upgrade() else { return IrqReturn::None };
        if let Some(key) = dev.keys.get(self.index) {
            key.timer.mod_timer(dev.kernel.timers.jiffies() + self.debounce);
        }
        IrqReturn::Handled
    }
}


pub struct KeyInputDriver {
    metadata: Metadata,
    match_table: [DeviceId; 1],
    kernel: Arc<Kernel>,
}

impl KeyInputDriver {
    pub fn new(kernel: &Arc<Kernel>) -> Self {
        Self {
            metadata: Metadata::with_name(NAME),
            match_table: [DeviceId::with_compat("alpha-key")],
            kernel: kernel.clone(),
        }
    }

    /// Request the lines and look up their interrupts. Everything taken so far is given back
    /// on failure.
    fn request_keys(&self, dev: &Device) -> Result<Vec<(u32, u32, String)>> {
        let kernel = &self.kernel;
        let node = dev.require_of_node()?;
        let count = of::gpio::gpio_named_count(&kernel.tree, node, "key-gpios")?;
        let mut keys: Vec<(u32, u32, String)> = Vec::with_capacity(count);
        let release = |keys: &[(u32, u32, String)]| {
            for (gpio, _, _) in keys {
                kernel.gpio.free(*gpio);
            }
        };
        for i in 0..count {
            let gpio = match of::gpio::get_named_gpio(&kernel.tree, &kernel.gpio, node,
                                                      "key-gpios", i) {
                Ok(gpio) => gpio,
                Err(e) => {
                    error!("{}: failed to get GPIO {}", dev.name(), i);
                    release(&keys);
                    return Err(e);
                }
            };
            let name = format!("key{}", i);
            if let Err(e) = kernel.gpio.request(gpio, &name) {
                error!("{}: failed to request GPIO {}", dev.name(), gpio);
                release(&keys);
                return Err(e);
            }
            let irq = kernel.gpio.direction_input(gpio).and_then(|_| kernel.gpio.to_irq(gpio));
            match irq {
                Ok(irq) => keys.push((gpio, irq, name)),
                Err(e) => {
                    kernel.gpio.free(gpio);
                    release(&keys);
                    return Err(e);
                }
            }
        }
        if keys.is_empty() {
            return Err(Error::ENODEV);
        }
        Ok(keys)
    }
}

impl Driver for KeyInputDriver {
    fn get_metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn get_match_table(&self) -> Option<&[DeviceId]> {
        Some(&self.match_table)
    }

    fn probe(&self, dev: &mut Device) -> Result {
        let kernel = &self.kernel;
        let lines = self.request_keys(dev)?;

        let mut builder = InputDevBuilder::new(INPUT_NAME);
        builder.id(InputId { bustype: BUS_HOST, ..InputId::default() })
            .set_evbit(EV_KEY)
            .set_evbit(EV_REP)
            .set_keybit(KEY_ENTER);
        let input = match kernel.input.register(builder) {
            Ok(input) => input,
            Err(e) => {
                error!("{}: failed to register input device", dev.name());
                for (gpio, _, _) in lines.iter() {
                    kernel.gpio.free(*gpio);
                }
                return Err(e);
            }
        };

        let debounce = time::msecs_to_jiffies(kernel.config.key_debounce_ms);
        let keydev = Arc::new_cyclic(|me: &Weak<KeyInput>| {
            let handlers = (0..lines.len()).map(|index| {
                Arc::new(KeyInputIrq { keys: me.clone(), index, debounce }) as Arc<dyn IrqHandler>
            }).collect();
            let keys = lines.into_iter().enumerate().map(|(index, (gpio, irq, name))| {
                let me = me.clone();
                InputKey {
                    gpio,
                    irq,
                    keycode: KEY_ENTER,
                    name,
                    timer: Timer::new(&kernel.timers, move || {
                        if let Some(keydev) = me.upgrade() {
                            keydev.report(index);
                        }
                    }),
                }
            }).collect();
            KeyInput {
                kernel: kernel.clone(),
                input,
                keys,
                handlers,
            }
        });

        for (i, (key, handler)) in keydev.keys.iter().zip(keydev.handlers.iter()).enumerate() {
            let flags = IrqFlags::TRIGGER_FALLING | IrqFlags::TRIGGER_RISING;
            if let Err(e) = kernel.irq.request_irq(key.irq, handler.clone(), flags, &key.name) {
                error!("{}: failed to request IRQ {}", dev.name(), key.irq);
                for (k, h) in keydev.keys[..i].iter().zip(keydev.handlers.iter()) {
                    kernel.irq.free_irq(k.irq, h);
                }
                for k in keydev.keys.iter() {
                    kernel.gpio.free(k.gpio);
                }
                kernel.input.unregister(&keydev.input);
                return Err(e);
            }
        }

        dev.set_drvdata(keydev);
        info!("{}: key input driver probed successfully", dev.name());
        Ok(())
    }

    fn remove(&self, dev: &mut Device) -> Result {
        if let Some(keydev) = dev.drvdata::<KeyInput>() {
            keydev.teardown();
            self.kernel.input.unregister(&keydev.input);
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::task::Task;
    use crate::driver::input::tests::Recorder;
    use crate::driver::input::{InputEvent, EV_SYN, SYN_REPORT};
    use crate::fs::{File, OpenFlags};
    use crate::sim::{find_device, Board, KEY_LINE};

    #[test]
    fn press_and_release_report_enter() {
        let board = Board::alpha().unwrap();
        let mut devices = board.populate();
        let dev = find_device(&mut devices, "key").unwrap();
        let keydev = dev.drvdata::<KeyInput>().unwrap();
        let input = keydev.input_dev().clone();
        assert_eq!(input.name(), INPUT_NAME);
        assert_eq!(input.id().bustype, BUS_HOST);
        assert!(input.has_key(KEY_ENTER));
        let rec = Arc::new(Recorder::default());
        input.connect(rec.clone());

        board.press_key();
        assert!(input.key_pressed(KEY_ENTER));
        board.release_key();
        assert!(!input.key_pressed(KEY_ENTER));
        let frames = rec.frames.lock();
        assert_eq!(frames[0], [(EV_KEY, KEY_ENTER, 1), (EV_SYN, SYN_REPORT, 0)]);
        assert_eq!(frames[1], [(EV_KEY, KEY_ENTER, 0), (EV_SYN, SYN_REPORT, 0)]);
    }

    #[test]
    fn evdev_reads_events() {
        let board = Board::alpha().unwrap();
        let _devices = board.populate();
        let input = board.kernel.input.find_by_name(INPUT_NAME).unwrap();
        let evdev = board.kernel.input.evdev(&input);
        let file = File::open(evdev, OpenFlags::O_RDONLY | OpenFlags::O_NONBLOCK,
                              &Task::new(1)).unwrap();
        let mut raw = [0u8; InputEvent::SIZE * 2];
        assert_eq!(file.read(&mut raw), Err(Error::EAGAIN));
        board.press_key();
        assert_eq!(file.read(&mut raw), Ok(InputEvent::SIZE * 2));
        let first = InputEvent::from_bytes(raw[..InputEvent::SIZE].try_into().unwrap());
        assert_eq!((first.type_, first.code, first.value), (EV_KEY, KEY_ENTER, 1));
    }

    #[test]
    fn held_key_repeats_until_released() {
        let board = Board::alpha().unwrap();
        let _devices = board.populate();
        let input = board.kernel.input.find_by_name(INPUT_NAME).unwrap();
        let rec = Arc::new(Recorder::default());
        input.connect(rec.clone());
        board.press_key();
        board.kernel.timers.advance_ms(board.kernel.config.rep_delay_ms
                                       + 2 * board.kernel.config.rep_period_ms);
        board.release_key();
        let frames = rec.frames.lock();
        assert!(frames.iter().any(|f| f[0] == (EV_KEY, KEY_ENTER, 2)));
        assert_eq!(frames.last().unwrap()[0], (EV_KEY, KEY_ENTER, 0));
    }

    #[test]
    fn remove_releases_lines() {
        let board = Board::alpha().unwrap();
        let mut devices = board.populate();
        let dev = find_device(&mut devices, "key").unwrap();
        let keydev = dev.drvdata::<KeyInput>().unwrap();
        let gpios: Vec<u32> = keydev.key_gpios().collect();
        dev.unbind().unwrap();
        assert!(gpios.iter().all(|g| !board.kernel.gpio.is_requested(*g)));
        assert!(board.kernel.input.find_by_name(INPUT_NAME).is_none());
        assert!(!keydev.input_dev().is_registered());
    }
}
