//! The sample user programs, run against the board.

use alpha_drv::base::error::Error;
use alpha_drv::base::poll::{PollMask, PollTable};
use alpha_drv::base::task::{Signal, Task};
use alpha_drv::driver::key::{KeyDevice, KEY_PRESSED, KEY_RELEASED};
use alpha_drv::driver::led::{GpioLed, LED_GET_PERIOD, LED_GET_STATE, LED_OFF, LED_ON,
                             LED_SET_PERIOD};
use alpha_drv::driver::key_input::KeyInputDriver;
use alpha_drv::fs::select::{self, PollFd};
use alpha_drv::fs::{File, OpenFlags};
use alpha_drv::sim::{find_device, Board, LED_LINE};

fn key_event(file: &File) -> Result<(i32, i32), Error> {
    let mut buf = [0u8; 8];
    let n = file.read(&mut buf)?;
    assert_eq!(n, 8);
    Ok((i32::from_le_bytes(buf[..4].try_into().unwrap()),
        i32::from_le_bytes(buf[4..].try_into().unwrap())))
}

#[test]
fn key_signal_app() {
    let board = Board::alpha().unwrap();
    let keys = KeyDevice::from_tree(&board.kernel).unwrap();
    let app = Task::new(100);
    let file = File::open(keys.clone(), OpenFlags::O_RDWR, &app).unwrap();
    file.set_owner(&app);
    file.set_flags(file.flags() | OpenFlags::FASYNC).unwrap();

    for expected in [KEY_PRESSED, KEY_RELEASED] {
        if expected == KEY_PRESSED { board.press_key() } else { board.release_key() }
        let info = app.pause();
        assert_eq!(info.signo, Signal::SIGIO);
        assert_eq!(key_event(&file), Ok((0, expected)));
    }
    file.close();
    keys.remove();
}

#[test]
fn key_poll_app() {
    let board = Board::alpha().unwrap();
    let keys = KeyDevice::from_tree(&board.kernel).unwrap();
    let file = File::open(keys.clone(), OpenFlags::O_RDWR | OpenFlags::O_NONBLOCK,
                          &Task::new(101)).unwrap();
    let mut table = PollTable::new();
    assert_eq!(file.poll(&mut table), PollMask::empty());
    assert_eq!(table.len(), 1);
    assert_eq!(key_event(&file), Err(Error::EAGAIN));

    let task = file.task().clone();
    let mut fds = [PollFd::new(&file, PollMask::POLLIN)];
    assert_eq!(select::poll(&mut fds, 0, &board.kernel.timers, &task), Ok(0));

    board.press_key();
    assert!(table.woken());
    assert_eq!(select::poll(&mut fds, 500, &board.kernel.timers, &task), Ok(1));
    assert!(fds[0].revents.contains(PollMask::POLLIN));
    assert_eq!(key_event(&file), Ok((0, KEY_PRESSED)));
    keys.remove();
}

#[test]
fn key_lines_are_exclusive() {
    let board = Board::alpha().unwrap();
    let _devices = board.populate_with(&[std::sync::Arc::new(KeyInputDriver::new(&board.kernel))]);
    assert_eq!(KeyDevice::from_tree(&board.kernel).err(), Some(Error::EBUSY));
}

#[test]
fn led_ioctl_app() {
    let board = Board::alpha().unwrap();
    let mut devices = board.populate();
    let led = find_device(&mut devices, "gpio_led").unwrap().drvdata::<GpioLed>().unwrap();
    let file = File::open(led.clone(), OpenFlags::O_RDWR, &Task::new(102)).unwrap();

    assert_eq!(file.ioctl(LED_OFF, 0), Ok(0));
    assert_eq!(file.ioctl(LED_GET_STATE, 0), Ok(0));
    assert!(board.gpio1.level(LED_LINE));
    assert_eq!(file.ioctl(LED_ON, 0), Ok(0));
    assert_eq!(file.ioctl(LED_GET_STATE, 0), Ok(1));
    assert!(!board.gpio1.level(LED_LINE));

    assert_eq!(file.ioctl(LED_SET_PERIOD, 200), Ok(0));
    assert_eq!(file.ioctl(LED_GET_PERIOD, 0), Ok(200));
    let before = led.is_on();
    board.kernel.timers.advance_ms(200);
    assert_ne!(led.is_on(), before);
    board.kernel.timers.advance_ms(200);
    assert_eq!(led.is_on(), before);

    assert_eq!(file.ioctl(LED_SET_PERIOD, -1i32 as usize), Err(Error::EINVAL));
    assert_eq!(file.ioctl(LED_SET_PERIOD, 0), Ok(0));
    assert!(!led.is_blinking());
    assert_eq!(file.ioctl(0xdead, 0), Err(Error::ENOTTY));
    file.close();
}
