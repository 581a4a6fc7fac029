//! Interrupt-driven keys on `/key`, read as a character device with blocking read, poll and
//! `SIGIO`, plus the polled variant with no interrupt at all.
//!
//! Each edge re-arms a short debounce timer. Only when the line has been quiet that long does
//! the timer sample it, flag the key as updated and notify readers.

use alloc::format;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::hint;
use core::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use crate::base::error::{Error, Result};
use crate::base::irq::{IrqFlags, IrqHandler, IrqReturn};
use crate::base::poll::{PollCode, PollMask, PollTable};
use crate::base::sync::SpinLock;
use crate::base::task::Signal;
use crate::base::time;
use crate::base::timer::Timer;
use crate::base::wait::WaitQueue;
use crate::driver::of::{self, DeviceNode};
use crate::fs::fcntl::FasyncQueue;
use crate::fs::{File, FileOperations, UserSliceWriter};
use crate::init::Kernel;


const NAME: &str = "key_signal";
pub const KEY_NODE_PATH: &str = "/key";

pub const KEY_PRESSED: i32 = 0;
pub const KEY_RELEASED: i32 = 1;

/// Check the node the key samples look up by path.
fn find_key_node(kernel: &Kernel) -> Result<Arc<DeviceNode>> {
    let np = kernel.tree.find_node_by_path(KEY_NODE_PATH).ok_or_else(|| {
        error!("{} node not found", NAME);
        Error::ENODEV
    })?;
    for prop in ["compatible", "status"] {
        let value = np.property_read_string(prop).map_err(|_| {
            error!("{} {} property read failed", NAME, prop);
            Error::ENODEV
        })?;
        info!("{} {}: {}", NAME, prop, value);
    }
    for child in np.children() {
        info!("{} child node: {}", NAME, child.name());
    }
    Ok(np)
}

/// Level to key state: the keys pull the line low while pressed. A line that cannot be read
/// counts as released.
fn sample(kernel: &Kernel, gpio: u32) -> i32 {
    match kernel.gpio.get_value(gpio) {
        Ok(false) => KEY_PRESSED,
        Ok(true) => KEY_RELEASED,
        Err(e) => {
            error!("{}: failed to read gpio {}: {:?}", NAME, gpio, e);
            KEY_RELEASED
        }
    }
}

pub struct KeyDesc {
    gpio: u32,
    irq: u32,
    name: String,
    state: AtomicI32,
    read_flag: AtomicBool,
    timer: Timer,
}

impl KeyDesc {
    #[inline]
    pub fn gpio(&self) -> u32 {
        self.gpio
    }

    #[inline]
    pub fn irq(&self) -> u32 {
        self.irq
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn state(&self) -> i32 {
        self.state.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_flagged(&self) -> bool {
        self.read_flag.load(Ordering::Acquire)
    }
}

/// The primary handler of one key: restart its debounce window.
struct KeyIrq {
    dev: Weak<KeyDevice>,
    index: usize,
}

impl IrqHandler for KeyIrq {
    fn handle_irq(&self, _irq: u32) -> IrqReturn {
        let Some(dev) = self.dev.upgrade() else { return IrqReturn::None };
        let Some(key) = dev.keys.get(self.index) else { return IrqReturn::None };
        key.timer.mod_timer(dev.kernel.timers.jiffies() + dev.debounce);
        IrqReturn::Handled
    }
}

pub struct KeyDevice {
    kernel: Arc<Kernel>,
    keys: Vec<KeyDesc>,
    /// Debounce window in jiffies.
    debounce: u64,
    wait: WaitQueue,
    fasync: FasyncQueue,
    handlers: SpinLock<Vec<Arc<dyn IrqHandler>>>,
}

impl KeyDevice {
    /// Request every key of `key-gpios` as an input and hook its interrupt with the trigger
    /// the DT gives it.
    pub fn from_tree(kernel: &Arc<Kernel>) -> Result<Arc<Self>> {
        info!("{} initializing", NAME);
        let np = find_key_node(kernel)?;
        let count = of::gpio::gpio_named_count(&kernel.tree, &np, "key-gpios")?;
        if count == 0 {
            return Err(Error::ENODEV);
        }

        let mut lines: Vec<(u32, String)> = Vec::with_capacity(count);
        for i in 0..count {
            let gpio = match of::gpio::get_named_gpio(&kernel.tree, &kernel.gpio, &np,
                                                      "key-gpios", i) {
                Ok(gpio) => gpio,
                Err(e) => {
                    error!("{} key gpio not found, error: {:?}", NAME, e);
                    release_gpios(kernel, &lines);
                    return Err(e);
                }
            };
            let name = format!("key{}", i);
            if let Err(e) = kernel.gpio.request(gpio, &name)
                .and_then(|_| kernel.gpio.direction_input(gpio).map_err(|e| {
                    kernel.gpio.free(gpio);
                    e
                })) {
                error!("{} gpio {} request failed: {:?}", NAME, gpio, e);
                release_gpios(kernel, &lines);
                return Err(e);
            }
            info!("{} key gpio: {}", NAME, gpio);
            lines.push((gpio, name));
        }

        let mut irqs = Vec::with_capacity(count);
        for i in 0..count {
            match of::irq::irq_of_parse_and_map(&kernel.tree, &kernel.irq, &np, i) {
                Ok(irq) => irqs.push(irq),
                Err(e) => {
                    error!("{} irq_of_parse_and_map failed for key {}", NAME, i);
                    release_gpios(kernel, &lines);
                    return Err(e);
                }
            }
        }

        let debounce = time::msecs_to_jiffies(kernel.config.key_debounce_ms);
        let dev = Arc::new_cyclic(|me: &Weak<KeyDevice>| {
            let keys = lines.into_iter().zip(irqs).enumerate().map(|(i, ((gpio, name), irq))| {
                let me = me.clone();
                KeyDesc {
                    gpio,
                    irq,
                    name,
                    state: AtomicI32::new(KEY_RELEASED),
                    read_flag: AtomicBool::new(false),
                    timer: Timer::new(&kernel.timers, move || {
                        if let Some(dev) = me.upgrade() {
                            dev.debounced(i);
                        }
                    }),
                }
            }).collect();
            KeyDevice {
                kernel: kernel.clone(),
                keys,
                debounce,
                wait: WaitQueue::new(),
                fasync: FasyncQueue::new(),
                handlers: SpinLock::new(Vec::new()),
            }
        });

        for (i, key) in dev.keys.iter().enumerate() {
            let handler: Arc<dyn IrqHandler> = Arc::new(KeyIrq { dev: Arc::downgrade(&dev), index: i });
            let flags = IrqFlags::from_bits_truncate(kernel.irq.irq_get_trigger_type(key.irq).bits());
            if let Err(e) = kernel.irq.request_irq(key.irq, handler.clone(), flags, &key.name) {
                error!("{} irq request failed, error: {:?}", NAME, e);
                dev.remove();
                return Err(e);
            }
            dev.handlers.lock().push(handler);
        }
        Ok(dev)
    }

    #[inline]
    pub fn keys(&self) -> &[KeyDesc] {
        &self.keys
    }

    #[inline]
    pub fn fasync_count(&self) -> usize {
        self.fasync.len()
    }

    /// The line has been stable for the debounce window.
    fn debounced(&self, index: usize) {
        let key = &self.keys[index];
        key.state.store(sample(&self.kernel, key.gpio), Ordering::Release);
        key.read_flag.store(true, Ordering::Release);
        self.wait.wake_up_interruptible();
        self.fasync.kill_fasync(Signal::SIGIO, PollCode::In);
        info!("{} timer handler, {} state: {}", NAME, key.name, key.state());
    }

    fn any_key_flagged(&self) -> bool {
        self.keys.iter().any(KeyDesc::is_flagged)
    }

    /// Free the interrupts, stop the timers and give the lines back.
    pub fn remove(&self) {
        let handlers = core::mem::take(&mut *self.handlers.lock());
        for (key, handler) in self.keys.iter().zip(handlers.iter()) {
            self.kernel.irq.free_irq(key.irq, handler);
        }
        for key in self.keys.iter() {
            key.timer.del_timer_sync();
            self.kernel.gpio.free(key.gpio);
        }
        info!("{} removed", NAME);
    }
}

fn release_gpios(kernel: &Kernel, lines: &[(u32, String)]) {
    for (gpio, _) in lines {
        kernel.gpio.free(*gpio);
    }
}

impl FileOperations for KeyDevice {
    fn open(&self, _file: &File) -> Result {
        info!("{} open", NAME);
        Ok(())
    }

    // `File::close` has already taken the file off the fasync list.
    fn release(&self, _file: &File) {
        info!("{} release", NAME);
    }

    /// `[key index, state]` as two little-endian ints, for the first updated key.
    fn read(&self, file: &File, buf: &mut UserSliceWriter, _offset: u64) -> Result<usize> {
        if file.is_nonblocking() {
            if !self.any_key_flagged() {
                return Err(Error::EAGAIN);
            }
        } else {
            self.wait.wait_event_interruptible(file.task(), || self.any_key_flagged())?;
        }

        let Some((i, key)) = self.keys.iter().enumerate()
            .find(|(_, k)| k.read_flag.swap(false, Ordering::AcqRel)) else { return Ok(0) };
        let mut data = [0u8; 8];
        data[..4].copy_from_slice(&(i as i32).to_le_bytes());
        data[4..].copy_from_slice(&key.state().to_le_bytes());
        let len = buf.len().min(data.len());
        buf.write_slice(&data[..len]).map_err(|e| {
            error!("{} copy_to_user failed", NAME);
            e
        })?;
        Ok(len)
    }

    fn poll(&self, _file: &File, table: &mut PollTable) -> PollMask {
        table.poll_wait(&self.wait);
        if self.any_key_flagged() {
            PollMask::POLLIN | PollMask::POLLPRI
        } else {
            PollMask::empty()
        }
    }

    fn fasync(&self, fd: i32, file: &Arc<File>, on: bool) -> Result<i32> {
        self.fasync.fasync_helper(fd, file, on)
    }
}


/// The first key sample: a read samples the line itself, holding on while the key is down.
pub struct PolledKey {
    kernel: Arc<Kernel>,
    gpio: u32,
}

impl PolledKey {
    pub fn from_tree(kernel: &Arc<Kernel>) -> Result<Arc<Self>> {
        let np = find_key_node(kernel)?;
        let gpio = of::gpio::get_named_gpio(&kernel.tree, &kernel.gpio, &np, "key-gpios", 0)
            .map_err(|e| {
                error!("key gpio not found, error: {:?}", e);
                e
            })?;
        kernel.gpio.request(gpio, "key0")?;
        if let Err(e) = kernel.gpio.direction_input(gpio) {
            kernel.gpio.free(gpio);
            return Err(e);
        }
        Ok(Arc::new(Self { kernel: kernel.clone(), gpio }))
    }

    pub fn remove(&self) {
        self.kernel.gpio.free(self.gpio);
    }
}

impl FileOperations for PolledKey {
    /// A pressed key is only reported once it is let go. A signal aborts the wait.
    fn read(&self, file: &File, buf: &mut UserSliceWriter, _offset: u64) -> Result<usize> {
        let state = if sample(&self.kernel, self.gpio) == KEY_PRESSED {
            while sample(&self.kernel, self.gpio) == KEY_PRESSED {
                if file.task().signal_pending() {
                    return Err(Error::ERESTARTSYS);
                }
                hint::spin_loop();
            }
            KEY_PRESSED
        } else {
            KEY_RELEASED
        };
        let data = state.to_le_bytes();
        let len = buf.len().min(data.len());
        buf.write_slice(&data[..len])?;
        Ok(len)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::task::Task;
    use crate::fs::OpenFlags;
    use crate::sim::{Board, KEY_LINE};

    fn read_event(file: &File) -> Result<(i32, i32)> {
        let mut buf = [0u8; 8];
        assert_eq!(file.read(&mut buf)?, 8);
        Ok((i32::from_le_bytes(buf[..4].try_into().unwrap()),
            i32::from_le_bytes(buf[4..].try_into().unwrap())))
    }

    #[test]
    fn unreadable_line_is_released_and_logged() {
        let board = Board::alpha().unwrap();
        // Past the last registered chip.
        assert_eq!(sample(&board.kernel, 500), KEY_RELEASED);
        assert!(crate::logk::dmesg_contains("failed to read gpio 500"));
        let gpio = board.kernel.gpio.gpio_by_phandle(crate::sim::GPIO1_PHANDLE, KEY_LINE).unwrap();
        board.press_key();
        assert_eq!(sample(&board.kernel, gpio), KEY_PRESSED);
    }

    #[test]
    fn bounces_restart_the_debounce_window() {
        let board = Board::alpha_with_bootargs("key.debounce_ms=50").unwrap();
        let keys = KeyDevice::from_tree(&board.kernel).unwrap();
        assert_eq!(keys.keys().len(), 1);
        assert_eq!(keys.keys()[0].name(), "key0");
        assert_eq!(board.kernel.gpio.label(keys.keys()[0].gpio()).as_deref(), Some("key0"));
        let file = File::open(keys.clone(), OpenFlags::O_RDONLY | OpenFlags::O_NONBLOCK,
                              &Task::new(1)).unwrap();
        assert_eq!(read_event(&file), Err(Error::EAGAIN));

        for level in [false, true, false] {
            board.gpio1.set_input(KEY_LINE, level);
        }
        board.kernel.timers.advance(3);
        board.gpio1.set_input(KEY_LINE, true);
        board.gpio1.set_input(KEY_LINE, false);
        board.kernel.timers.advance(3);
        assert!(!keys.keys()[0].is_flagged());
        board.kernel.timers.advance(2);
        assert!(keys.keys()[0].is_flagged());
        assert_eq!(read_event(&file), Ok((0, KEY_PRESSED)));
        assert_eq!(read_event(&file), Err(Error::EAGAIN));

        board.release_key();
        assert_eq!(read_event(&file), Ok((0, KEY_RELEASED)));
    }

    #[test]
    fn short_buffer_and_poll() {
        let board = Board::alpha().unwrap();
        let keys = KeyDevice::from_tree(&board.kernel).unwrap();
        let file = File::open(keys.clone(), OpenFlags::O_RDONLY, &Task::new(1)).unwrap();
        let mut table = PollTable::new();
        assert!(file.poll(&mut table).is_empty());
        board.press_key();
        assert!(table.woken());
        assert_eq!(file.poll(&mut PollTable::new()), PollMask::POLLIN | PollMask::POLLPRI);
        let mut half = [0u8; 4];
        assert_eq!(file.read(&mut half), Ok(4));
        assert_eq!(i32::from_le_bytes(half), 0);
        assert!(file.poll(&mut PollTable::new()).is_empty());
    }

    #[test]
    fn blocking_read_waits_or_gets_interrupted() {
        let board = Board::alpha().unwrap();
        let keys = KeyDevice::from_tree(&board.kernel).unwrap();
        let task = Task::new(7);
        let file = File::open(keys.clone(), OpenFlags::O_RDONLY, &task).unwrap();
        task.kill(Signal::SIGINT);
        assert_eq!(read_event(&file), Err(Error::ERESTARTSYS));
        assert!(task.dequeue_signal().is_some());

        let reader = {
            let file = file.clone();
            std::thread::spawn(move || read_event(&file))
        };
        board.press_key();
        assert_eq!(reader.join().unwrap(), Ok((0, KEY_PRESSED)));
    }

    #[test]
    fn sigio_reaches_the_owner() {
        let board = Board::alpha().unwrap();
        let keys = KeyDevice::from_tree(&board.kernel).unwrap();
        let task = Task::new(9);
        let file = File::open(keys.clone(), OpenFlags::O_RDONLY, &task).unwrap();
        file.set_owner(&task);
        file.set_flags(OpenFlags::FASYNC).unwrap();
        assert_eq!(keys.fasync_count(), 1);

        board.press_key();
        let info = task.dequeue_signal().unwrap();
        assert_eq!(info.signo, Signal::SIGIO);
        assert_eq!(info.code, PollCode::In.code());
        assert_eq!(info.fd, file.fd());

        file.close();
        assert_eq!(keys.fasync_count(), 0);
        board.release_key();
        assert!(!task.signal_pending());
    }

    #[test]
    fn remove_frees_everything() {
        let board = Board::alpha().unwrap();
        let keys = KeyDevice::from_tree(&board.kernel).unwrap();
        let (gpio, irq) = (keys.keys()[0].gpio(), keys.keys()[0].irq());
        assert!(board.kernel.irq.has_action(irq));
        board.gpio1.set_input(KEY_LINE, false);
        keys.remove();
        assert!(!board.kernel.irq.has_action(irq));
        assert!(!board.kernel.gpio.is_requested(gpio));
        assert_eq!(board.kernel.timers.armed_count(), 0);
    }

    #[test]
    fn polled_key_reports_after_release() {
        let board = Board::alpha().unwrap();
        let key = PolledKey::from_tree(&board.kernel).unwrap();
        let task = Task::new(3);
        let file = File::open(key.clone(), OpenFlags::O_RDONLY, &task).unwrap();
        let mut state = [0u8; 4];
        assert_eq!(file.read(&mut state), Ok(4));
        assert_eq!(i32::from_le_bytes(state), KEY_RELEASED);

        board.gpio1.set_input(KEY_LINE, false);
        let gpio1 = board.gpio1.clone();
        let releaser = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            gpio1.set_input(KEY_LINE, true);
        });
        assert_eq!(file.read(&mut state), Ok(4));
        assert_eq!(i32::from_le_bytes(state), KEY_PRESSED);
        releaser.join().unwrap();

        board.gpio1.set_input(KEY_LINE, false);
        task.kill(Signal::SIGTERM);
        assert_eq!(file.read(&mut state), Err(Error::ERESTARTSYS));
        key.remove();
    }
}
