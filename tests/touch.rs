use std::sync::{Arc, Mutex};

use alpha_drv::base::error::Error;
use alpha_drv::driver::gt911::{Contact, Gt911, ADDR_INT_LOW};
use alpha_drv::driver::i2c::I2cFunc;
use alpha_drv::driver::input::{InputEvent, InputHandle, ABS_MT_POSITION_X, ABS_MT_POSITION_Y,
                               EV_ABS};
use alpha_drv::logk;
use alpha_drv::sim::{find_device, Board, GPIO1_BASE, GPIO5_BASE, GT911_INT_LINE,
                     GT911_RESET_LINE, PANEL_CONTACTS, PANEL_X_MAX, PANEL_Y_MAX};

#[derive(Default)]
struct Frames(Mutex<Vec<Vec<(u16, u16, i32)>>>);

impl InputHandle for Frames {
    fn events(&self, events: &[InputEvent]) {
        self.0.lock().unwrap().push(events.iter().map(|e| (e.type_, e.code, e.value)).collect());
    }
}

impl Frames {
    fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    fn last_has(&self, ev: (u16, u16, i32)) -> bool {
        self.0.lock().unwrap().last().map_or(false, |f| f.contains(&ev))
    }
}

fn touchscreen(board: &Board) -> (Vec<alpha_drv::dev::Device>, Arc<Gt911>, Arc<Frames>) {
    let mut devices = board.populate();
    let ts = find_device(&mut devices, "gt911").unwrap().drvdata::<Gt911>().unwrap();
    let frames = Arc::new(Frames::default());
    ts.input_dev().connect(frames.clone());
    (devices, ts, frames)
}

#[test]
fn probe_reads_chip_and_config() {
    let board = Board::alpha().unwrap();
    let (_devices, ts, _) = touchscreen(&board);
    assert_eq!(ts.version(), 0x1060);
    assert_eq!(ts.addr(), 0x14);
    let config = ts.config();
    assert_eq!(config.abs_x_max, PANEL_X_MAX as i32);
    assert_eq!(config.abs_y_max, PANEL_Y_MAX as i32);
    assert_eq!(config.max_touch_num, PANEL_CONTACTS as usize);
    assert_eq!(board.gt911.sw_resets(), 1);
    let abs = ts.input_dev().abs_info(ABS_MT_POSITION_X).unwrap();
    assert_eq!(abs.maximum, PANEL_X_MAX as i32);
}

#[test]
fn touches_become_mt_frames() {
    let board = Board::alpha().unwrap();
    let (_devices, ts, frames) = touchscreen(&board);

    board.gt911.touch(&[Contact { id: 0, x: 100, y: 200, w: 8 },
                        Contact { id: 1, x: 700, y: 50, w: 6 }]);
    assert_eq!(frames.count(), 1);
    assert!(frames.last_has((EV_ABS, ABS_MT_POSITION_X, 100)));
    assert!(frames.last_has((EV_ABS, ABS_MT_POSITION_Y, 50)));
    assert_eq!(ts.input_dev().mt_active_count(), 2);
    assert_eq!(board.gt911.status(), 0);
    assert_eq!(board.gt911.status_clears(), 1);

    board.gt911.touch(&[Contact { id: 1, x: 710, y: 55, w: 6 }]);
    assert_eq!(ts.input_dev().mt_active_count(), 1);
    board.gt911.touch(&[]);
    assert_eq!(ts.input_dev().mt_active_count(), 0);
    assert_eq!(board.gt911.status_clears(), 3);
}

#[test]
fn oversized_report_is_dropped() {
    let board = Board::alpha().unwrap();
    let (_devices, _ts, frames) = touchscreen(&board);
    board.gt911.load_frame(PANEL_CONTACTS + 2, &[Contact { id: 0, x: 1, y: 1, w: 1 }]);
    board.gt911.interrupt();
    assert_eq!(frames.count(), 0);
    assert_eq!(board.gt911.status_clears(), 0);
}

#[test]
fn falls_back_to_second_address() {
    let board = Board::alpha().unwrap();
    board.i2c2.readdress(0x14, ADDR_INT_LOW);
    let (_devices, ts, frames) = touchscreen(&board);
    assert_eq!(ts.addr(), ADDR_INT_LOW);
    assert!(logk::dmesg_contains("i2c test failed"));
    board.gt911.touch(&[Contact { id: 2, x: 3, y: 4, w: 5 }]);
    assert_eq!(frames.count(), 1);
}

#[test]
fn plain_i2c_is_required() {
    let board = Board::alpha().unwrap();
    board.i2c2.set_functionality(I2cFunc::SMBUS_EMUL);
    let mut devices = board.populate();
    let dev = find_device(&mut devices, "gt911").unwrap();
    assert!(dev.driver_name().is_none());
    assert!(dev.drvdata::<Gt911>().is_none());
    // Rejected before any pin was taken.
    assert_eq!(board.kernel.gpio.request(GPIO1_BASE + GT911_INT_LINE, "check"), Ok(()));
    assert_eq!(board.kernel.gpio.request(GPIO5_BASE + GT911_RESET_LINE, "check"), Ok(()));
    assert_eq!(board.kernel.gpio.request(GPIO5_BASE + GT911_RESET_LINE, "check"),
               Err(Error::EBUSY));
}

#[test]
fn unbind_releases_the_panel() {
    let board = Board::alpha().unwrap();
    let (mut devices, ts, frames) = touchscreen(&board);
    let irq = ts.irq();
    find_device(&mut devices, "gt911").unwrap().unbind().unwrap();
    assert!(!board.kernel.irq.has_action(irq));
    assert!(!ts.input_dev().is_registered());
    board.gt911.touch(&[Contact { id: 0, x: 1, y: 2, w: 3 }]);
    assert_eq!(frames.count(), 0);
}
