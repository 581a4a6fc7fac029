//! Event char devices: each open file is a client with its own event buffer.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};
use crate::base::error::{Error, Result};
use crate::base::poll::{PollCode, PollMask, PollTable};
use crate::base::sync::SpinLock;
use crate::base::task::Signal;
use crate::base::wait::WaitQueue;
use crate::fs::fcntl::FasyncQueue;
use crate::fs::ioctl::_IOR;
use crate::fs::{File, FileOperations, UserSliceReader, UserSliceWriter};
use super::{InputDev, InputEvent, InputHandle, EV_SYN, SYN_DROPPED};


pub const EV_VERSION: i32 = 0x010001;
pub const EVIOCGVERSION: u32 = _IOR::<i32>(b'E', 0x01);

struct ClientBuffer {
    queue: VecDeque<InputEvent>,
    /// Events at the front of the queue that belong to complete frames.
    packet: usize,
}

pub struct EvdevClient {
    bufsize: usize,
    buffer: SpinLock<ClientBuffer>,
    wait: WaitQueue,
    fasync: FasyncQueue,
    exist: AtomicBool,
}

impl EvdevClient {
    fn new(bufsize: usize) -> Self {
        Self {
            bufsize,
            buffer: SpinLock::new(ClientBuffer {
                queue: VecDeque::with_capacity(bufsize),
                packet: 0,
            }),
            wait: WaitQueue::new(),
            fasync: FasyncQueue::new(),
            exist: AtomicBool::new(true),
        }
    }

    /// Queue one event. When the buffer runs full, everything unread is dropped and replaced
    /// by `SYN_DROPPED` plus the newest event. Returns true at the end of a frame.
    fn pass_event(&self, ev: &InputEvent) -> bool {
        let mut buf = self.buffer.lock();
        buf.queue.push_back(*ev);
        if buf.queue.len() >= self.bufsize {
            buf.queue.clear();
            buf.queue.push_back(InputEvent { code: SYN_DROPPED, type_: EV_SYN, value: 0, ..*ev });
            buf.queue.push_back(*ev);
            buf.packet = 0;
        }
        if ev.is_syn_report() {
            buf.packet = buf.queue.len();
            return true;
        }
        false
    }

    fn fetch_next(&self) -> Option<InputEvent> {
        let mut buf = self.buffer.lock();
        if buf.packet == 0 {
            return None;
        }
        buf.packet -= 1;
        buf.queue.pop_front()
    }

    #[inline]
    fn has_packet(&self) -> bool {
        self.buffer.lock().packet > 0
    }

    #[inline]
    fn exist(&self) -> bool {
        self.exist.load(Ordering::Acquire)
    }
}

impl InputHandle for EvdevClient {
    fn events(&self, events: &[InputEvent]) {
        let mut wakeup = false;
        for ev in events {
            wakeup |= self.pass_event(ev);
        }
        if wakeup {
            self.fasync.kill_fasync(Signal::SIGIO, PollCode::In);
            self.wait.wake_up_interruptible();
        }
    }

    fn disconnect(&self) {
        self.exist.store(false, Ordering::Release);
        self.fasync.kill_fasync(Signal::SIGIO, PollCode::Hup);
        self.wait.wake_up_interruptible();
    }
}


/// The evdev node of one input device.
pub struct Evdev {
    dev: Arc<InputDev>,
    bufsize: usize,
}

impl Evdev {
    pub fn new(dev: &Arc<InputDev>, buffer_events: usize) -> Self {
        Self {
            dev: dev.clone(),
            bufsize: buffer_events.max(2).next_power_of_two(),
        }
    }

    #[inline]
    pub fn input_dev(&self) -> &Arc<InputDev> {
        &self.dev
    }

    fn client(file: &File) -> Result<Arc<EvdevClient>> {
        file.private::<EvdevClient>().ok_or(Error::ENODEV)
    }
}

impl FileOperations for Evdev {
    fn open(&self, file: &File) -> Result {
        if !self.dev.is_registered() {
            return Err(Error::ENODEV);
        }
        let client = Arc::new(EvdevClient::new(self.bufsize));
        self.dev.connect(client.clone());
        file.set_private(client);
        Ok(())
    }

    fn release(&self, file: &File) {
        if let Ok(client) = Self::client(file) {
            let handle: Arc<dyn InputHandle> = client;
            self.dev.disconnect(&handle);
        }
    }

    fn read(&self, file: &File, buf: &mut UserSliceWriter, _offset: u64) -> Result<usize> {
        let client = Self::client(file)?;
        let count = buf.len();
        if count != 0 && count < InputEvent::SIZE {
            return Err(Error::EINVAL);
        }
        loop {
            if !client.exist() {
                return Err(Error::ENODEV);
            }
            if !client.has_packet() && file.is_nonblocking() {
                return Err(Error::EAGAIN);
            }
            if count == 0 {
                return Ok(0);
            }
            let mut read = 0;
            while read + InputEvent::SIZE <= count {
                let Some(ev) = client.fetch_next() else { break };
                buf.write_slice(&ev.to_bytes())?;
                read += InputEvent::SIZE;
            }
            if read > 0 {
                return Ok(read);
            }
            if !file.is_nonblocking() {
                client.wait.wait_event_interruptible(file.task(), || {
                    client.has_packet() || !client.exist()
                })?;
            }
        }
    }

    /// Inject events into the device, as if it had reported them.
    fn write(&self, file: &File, buf: &mut UserSliceReader, _offset: u64) -> Result<usize> {
        let client = Self::client(file)?;
        if buf.len() < InputEvent::SIZE {
            return Err(Error::EINVAL);
        }
        if !client.exist() {
            return Err(Error::ENODEV);
        }
        let mut written = 0;
        while buf.len() >= InputEvent::SIZE {
            let mut raw = [0u8; InputEvent::SIZE];
            buf.read_slice(&mut raw)?;
            let ev = InputEvent::from_bytes(&raw);
            self.dev.event(ev.type_, ev.code, ev.value);
            written += InputEvent::SIZE;
        }
        Ok(written)
    }

    fn ioctl(&self, _file: &File, cmd: u32, _arg: usize) -> Result<i32> {
        match cmd {
            EVIOCGVERSION => Ok(EV_VERSION),
            _ => Err(Error::ENOTTY),
        }
    }

    fn poll(&self, file: &File, table: &mut PollTable) -> PollMask {
        let Ok(client) = Self::client(file) else { return PollMask::POLLERR };
        table.poll_wait(&client.wait);
        let mut mask = if client.exist() {
            PollMask::POLLOUT | PollMask::POLLWRNORM
        } else {
            PollMask::POLLHUP | PollMask::POLLERR
        };
        if client.has_packet() {
            mask |= PollMask::POLLIN | PollMask::POLLRDNORM;
        }
        mask
    }

    fn fasync(&self, fd: i32, file: &Arc<File>, on: bool) -> Result<i32> {
        Self::client(file)?.fasync.fasync_helper(fd, file, on)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use std::thread;
    use std::time::Duration;
    use crate::base::task::Task;
    use crate::base::timer::TimerQueue;
    use crate::driver::input::*;
    use crate::fs::OpenFlags;

    fn keyboard(buffer: usize) -> (Arc<InputSubsystem>, Arc<InputDev>) {
        let timers = TimerQueue::new();
        let input = InputSubsystem::new(&timers, 250, 33, buffer);
        let mut b = InputDevBuilder::new("kbd");
        b.set_evbit(EV_KEY);
        for code in KEY_1..=KEY_0 {
            b.set_keybit(code);
        }
        let dev = input.register(b).unwrap();
        (input, dev)
    }

    fn decode(raw: &[u8]) -> Vec<(u16, u16, i32)> {
        raw.chunks_exact(InputEvent::SIZE)
            .map(|c| {
                let ev = InputEvent::from_bytes(c.try_into().unwrap());
                (ev.type_, ev.code, ev.value)
            })
            .collect()
    }

    #[test]
    fn nonblocking_read() {
        let (input, dev) = keyboard(64);
        let task = Task::new(1);
        let file = File::open(input.evdev(&dev), OpenFlags::O_RDONLY | OpenFlags::O_NONBLOCK,
                              &task).unwrap();
        let mut buf = [0u8; 64];
        assert_eq!(file.read(&mut buf), Err(Error::EAGAIN));
        assert_eq!(file.read(&mut buf[..8]), Err(Error::EINVAL));

        // A frame in progress is not readable yet.
        dev.report_key(KEY_1, 1);
        assert_eq!(file.read(&mut buf), Err(Error::EAGAIN));
        dev.sync();
        assert_eq!(file.read(&mut buf[..16]), Ok(16));
        assert_eq!(file.read(&mut buf), Ok(16));
        assert_eq!(decode(&buf[..16]), [(EV_SYN, SYN_REPORT, 0)]);
    }

    #[test]
    fn overflow_drops_and_marks() {
        let (input, dev) = keyboard(4);
        let task = Task::new(1);
        let file = File::open(input.evdev(&dev), OpenFlags::O_RDONLY | OpenFlags::O_NONBLOCK,
                              &task).unwrap();
        for code in [KEY_1, KEY_1 + 1, KEY_1 + 2] {
            dev.report_key(code, 1);
            dev.sync();
        }
        let mut buf = [0u8; 128];
        let n = file.read(&mut buf).unwrap();
        assert_eq!(decode(&buf[..n]), [(EV_SYN, SYN_DROPPED, 0), (EV_SYN, SYN_REPORT, 0)]);
    }

    #[test]
    fn blocking_read_and_poll() {
        let (input, dev) = keyboard(64);
        let task = Task::new(1);
        let file = File::open(input.evdev(&dev), OpenFlags::O_RDONLY, &task).unwrap();
        let mut pt = PollTable::new();
        assert_eq!(file.poll(&mut pt), PollMask::POLLOUT | PollMask::POLLWRNORM);

        let d = dev.clone();
        let reporter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            d.report_key(KEY_0, 1);
            d.sync();
        });
        let mut buf = [0u8; 64];
        let n = file.read(&mut buf).unwrap();
        reporter.join().unwrap();
        assert_eq!(decode(&buf[..n]), [(EV_KEY, KEY_0, 1), (EV_SYN, SYN_REPORT, 0)]);
        assert!(pt.woken());
    }

    #[test]
    fn disconnect_hangs_up() {
        let (input, dev) = keyboard(64);
        let task = Task::new(1);
        let file = File::open(input.evdev(&dev), OpenFlags::O_RDWR, &task).unwrap();
        assert_eq!(dev.users(), 1);
        assert_eq!(file.ioctl(EVIOCGVERSION, 0), Ok(EV_VERSION));

        // Injected events go through the device filter.
        let mut raw = Vec::new();
        raw.extend_from_slice(&InputEvent::new(EV_KEY, KEY_1, 1).to_bytes());
        raw.extend_from_slice(&InputEvent::new(EV_SYN, SYN_REPORT, 0).to_bytes());
        assert_eq!(file.write(&raw), Ok(32));
        assert!(dev.key_pressed(KEY_1));

        input.unregister(&dev);
        let mask = file.poll(&mut PollTable::new());
        assert!(mask.contains(PollMask::POLLHUP | PollMask::POLLERR | PollMask::POLLIN));
        let mut buf = [0u8; 64];
        assert_eq!(file.read(&mut buf), Err(Error::ENODEV));
        file.close();
        assert!(File::open(input.evdev(&dev), OpenFlags::O_RDONLY, &task).is_err());
    }
}
