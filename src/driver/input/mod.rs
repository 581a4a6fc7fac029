//! Input core: event devices, event filtering and autorepeat.
//!
//! A driver builds an [`InputDevBuilder`], states which events it can produce and registers
//! it. Reported events are filtered the way the kernel input core does it, collected into a
//! frame and handed to every connected [`InputHandle`] at `SYN_REPORT`.

pub mod evdev;
pub mod mt;

use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use crate::base::error::{Error, Result};
use crate::base::sync::SpinLock;
use crate::base::time::msecs_to_jiffies;
use crate::base::timer::{Timer, TimerQueue};
use crate::util::bit::{self, bits_to_bytes};
use mt::InputMt;


// Event types.
pub const EV_SYN: u16 = 0x00;
pub const EV_KEY: u16 = 0x01;
pub const EV_REL: u16 = 0x02;
pub const EV_ABS: u16 = 0x03;
pub const EV_MSC: u16 = 0x04;
pub const EV_REP: u16 = 0x14;
pub const EV_MAX: u16 = 0x1f;
pub const EV_CNT: usize = EV_MAX as usize + 1;

// Synchronization events.
pub const SYN_REPORT: u16 = 0;
pub const SYN_CONFIG: u16 = 1;
pub const SYN_MT_REPORT: u16 = 2;
pub const SYN_DROPPED: u16 = 3;

// Keys and buttons.
pub const KEY_RESERVED: u16 = 0;
pub const KEY_ESC: u16 = 1;
pub const KEY_1: u16 = 2;
pub const KEY_0: u16 = 11;
pub const KEY_ENTER: u16 = 28;
pub const KEY_POWER: u16 = 116;
pub const BTN_TOOL_FINGER: u16 = 0x145;
pub const BTN_TOUCH: u16 = 0x14a;
pub const BTN_TOOL_DOUBLETAP: u16 = 0x14d;
pub const BTN_TOOL_TRIPLETAP: u16 = 0x14e;
pub const BTN_TOOL_QUADTAP: u16 = 0x14f;
pub const BTN_TOOL_QUINTTAP: u16 = 0x148;
pub const KEY_MAX: u16 = 0x2ff;
pub const KEY_CNT: usize = KEY_MAX as usize + 1;

// Absolute axes.
pub const ABS_X: u16 = 0x00;
pub const ABS_Y: u16 = 0x01;
pub const ABS_PRESSURE: u16 = 0x18;
pub const ABS_MT_SLOT: u16 = 0x2f;
pub const ABS_MT_TOUCH_MAJOR: u16 = 0x30;
pub const ABS_MT_TOUCH_MINOR: u16 = 0x31;
pub const ABS_MT_WIDTH_MAJOR: u16 = 0x32;
pub const ABS_MT_WIDTH_MINOR: u16 = 0x33;
pub const ABS_MT_ORIENTATION: u16 = 0x34;
pub const ABS_MT_POSITION_X: u16 = 0x35;
pub const ABS_MT_POSITION_Y: u16 = 0x36;
pub const ABS_MT_TOOL_TYPE: u16 = 0x37;
pub const ABS_MT_BLOB_ID: u16 = 0x38;
pub const ABS_MT_TRACKING_ID: u16 = 0x39;
pub const ABS_MT_PRESSURE: u16 = 0x3a;
pub const ABS_MT_DISTANCE: u16 = 0x3b;
pub const ABS_MAX: u16 = 0x3f;
pub const ABS_CNT: usize = ABS_MAX as usize + 1;
pub const ABS_MT_FIRST: u16 = ABS_MT_TOUCH_MAJOR;
pub const ABS_MT_LAST: u16 = ABS_MT_DISTANCE;

// Autorepeat values.
pub const REP_DELAY: u16 = 0x00;
pub const REP_PERIOD: u16 = 0x01;
pub const REP_MAX: u16 = 0x01;

// Device properties.
pub const INPUT_PROP_POINTER: u16 = 0x00;
pub const INPUT_PROP_DIRECT: u16 = 0x01;
pub const INPUT_PROP_MAX: u16 = 0x1f;
pub const INPUT_PROP_CNT: usize = INPUT_PROP_MAX as usize + 1;

// Bus types.
pub const BUS_HOST: u16 = 0x19;
pub const BUS_I2C: u16 = 0x18;
pub const BUS_SPI: u16 = 0x1c;

pub const MT_TOOL_FINGER: i32 = 0x00;
pub const MT_TOOL_PEN: i32 = 0x01;


/// `struct input_event` as a 32-bit ARM userspace reads it from an evdev node.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InputEvent {
    pub sec: u32,
    pub usec: u32,
    pub type_: u16,
    pub code: u16,
    pub value: i32,
}

sa::assert_eq_size!(InputEvent, [u8; 16]);

impl InputEvent {
    pub const SIZE: usize = core::mem::size_of::<InputEvent>();

    pub const fn new(type_: u16, code: u16, value: i32) -> Self {
        Self { sec: 0, usec: 0, type_, code, value }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.sec.to_le_bytes());
        out[4..8].copy_from_slice(&self.usec.to_le_bytes());
        out[8..10].copy_from_slice(&self.type_.to_le_bytes());
        out[10..12].copy_from_slice(&self.code.to_le_bytes());
        out[12..16].copy_from_slice(&self.value.to_le_bytes());
        out
    }

    pub fn from_bytes(b: &[u8; Self::SIZE]) -> Self {
        Self {
            sec: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            usec: u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
            type_: u16::from_le_bytes([b[8], b[9]]),
            code: u16::from_le_bytes([b[10], b[11]]),
            value: i32::from_le_bytes([b[12], b[13], b[14], b[15]]),
        }
    }

    #[inline]
    pub fn is_syn_report(&self) -> bool {
        self.type_ == EV_SYN && self.code == SYN_REPORT
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InputId {
    pub bustype: u16,
    pub vendor: u16,
    pub product: u16,
    pub version: u16,
}

/// `struct input_absinfo`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AbsInfo {
    pub value: i32,
    pub minimum: i32,
    pub maximum: i32,
    pub fuzz: i32,
    pub flat: i32,
    pub resolution: i32,
}

/// Consumer of the events of a device, `struct input_handle`.
pub trait InputHandle: Send + Sync {
    /// A complete frame, ending with `SYN_REPORT`.
    fn events(&self, events: &[InputEvent]);

    /// The device went away.
    fn disconnect(&self) {}
}


/// Capabilities whose bits must be known before registration.
struct Caps {
    evbit: Vec<u8>,
    keybit: Vec<u8>,
    absbit: Vec<u8>,
    propbit: Vec<u8>,
}

impl Caps {
    fn new() -> Self {
        Self {
            evbit: vec![0; bits_to_bytes(EV_CNT)],
            keybit: vec![0; bits_to_bytes(KEY_CNT)],
            absbit: vec![0; bits_to_bytes(ABS_CNT)],
            propbit: vec![0; bits_to_bytes(INPUT_PROP_CNT)],
        }
    }
}

/// `input_allocate_device()` and the setup done before `input_register_device()`.
pub struct InputDevBuilder {
    name: String,
    phys: String,
    id: InputId,
    caps: Caps,
    absinfo: Vec<AbsInfo>,
    rep: [i32; 2],
    mt: Option<InputMt>,
}

impl InputDevBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: String::from(name),
            phys: String::new(),
            id: InputId::default(),
            caps: Caps::new(),
            absinfo: vec![AbsInfo::default(); ABS_CNT],
            rep: [0; 2],
            mt: None,
        }
    }

    pub fn phys(&mut self, phys: &str) -> &mut Self {
        self.phys = String::from(phys);
        self
    }

    pub fn id(&mut self, id: InputId) -> &mut Self {
        self.id = id;
        self
    }

    pub fn set_evbit(&mut self, ev: u16) -> &mut Self {
        bit::set_bit(&mut self.caps.evbit, ev as usize);
        self
    }

    pub fn set_keybit(&mut self, code: u16) -> &mut Self {
        bit::set_bit(&mut self.caps.keybit, code as usize);
        self
    }

    pub fn set_propbit(&mut self, prop: u16) -> &mut Self {
        bit::set_bit(&mut self.caps.propbit, prop as usize);
        self
    }

    /// `input_set_capability()`.
    pub fn set_capability(&mut self, ty: u16, code: u16) -> &mut Self {
        match ty {
            EV_KEY => bit::set_bit(&mut self.caps.keybit, code as usize),
            EV_ABS => bit::set_bit(&mut self.caps.absbit, code as usize),
            _ => {}
        }
        self.set_evbit(ty)
    }

    /// `input_set_abs_params()`: also sets `EV_ABS` and the axis bit.
    pub fn set_abs_params(&mut self, axis: u16, min: i32, max: i32, fuzz: i32, flat: i32)
                          -> &mut Self {
        if let Some(info) = self.absinfo.get_mut(axis as usize) {
            *info = AbsInfo { value: info.value, minimum: min, maximum: max, fuzz, flat,
                              resolution: info.resolution };
        }
        bit::set_bit(&mut self.caps.absbit, axis as usize);
        self.set_evbit(EV_ABS)
    }

    /// Explicit autorepeat timing, instead of the defaults applied at registration.
    pub fn set_rep(&mut self, delay_ms: i32, period_ms: i32) -> &mut Self {
        self.rep = [delay_ms, period_ms];
        self
    }

    #[inline]
    pub(crate) fn absinfo(&self, axis: u16) -> AbsInfo {
        self.absinfo.get(axis as usize).copied().unwrap_or_default()
    }

    #[inline]
    pub(crate) fn has_abs(&self, axis: u16) -> bool {
        bit::test_bit(&self.caps.absbit, axis as usize)
    }

    #[inline]
    pub(crate) fn set_mt(&mut self, mt: InputMt) {
        self.mt = Some(mt);
    }
}


/// Where an event goes after the filter.
#[derive(PartialEq, Eq)]
enum Disposition {
    Ignore,
    /// Pass, emitting `ABS_MT_SLOT` first.
    PassSlot,
    Pass,
    /// Pass and end the frame.
    Flush,
}

pub(crate) struct InputState {
    key: Vec<u8>,
    pub(crate) absinfo: Vec<AbsInfo>,
    rep: [i32; 2],
    repeat_key: Option<u16>,
    pub(crate) mt: Option<InputMt>,
    frame: Vec<InputEvent>,
}

/// A registered input device.
pub struct InputDev {
    name: String,
    phys: String,
    id: InputId,
    caps: Caps,
    pub(crate) state: SpinLock<InputState>,
    handles: SpinLock<Vec<Arc<dyn InputHandle>>>,
    timers: Arc<TimerQueue>,
    repeat: Timer,
    registered: AtomicBool,
}

#[inline]
fn defuzz(value: i32, old: i32, fuzz: i32) -> i32 {
    if fuzz != 0 {
        if value > old - fuzz / 2 && value < old + fuzz / 2 {
            return old;
        }
        if value > old - fuzz && value < old + fuzz {
            return (old * 3 + value) / 4;
        }
        if value > old - fuzz * 2 && value < old + fuzz * 2 {
            return (old + value) / 2;
        }
    }
    value
}

impl InputDev {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn phys(&self) -> &str {
        &self.phys
    }

    #[inline]
    pub fn id(&self) -> InputId {
        self.id
    }

    #[inline]
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    #[inline]
    pub fn has_event(&self, ty: u16) -> bool {
        bit::test_bit(&self.caps.evbit, ty as usize)
    }

    #[inline]
    pub fn has_key(&self, code: u16) -> bool {
        bit::test_bit(&self.caps.keybit, code as usize)
    }

    #[inline]
    pub fn has_abs(&self, axis: u16) -> bool {
        bit::test_bit(&self.caps.absbit, axis as usize)
    }

    #[inline]
    pub fn has_prop(&self, prop: u16) -> bool {
        bit::test_bit(&self.caps.propbit, prop as usize)
    }

    /// Current state of a key, pressed or not.
    pub fn key_pressed(&self, code: u16) -> bool {
        bit::test_bit(&self.state.lock().key, code as usize)
    }

    pub fn abs_info(&self, axis: u16) -> Option<AbsInfo> {
        self.has_abs(axis).then(|| self.state.lock().absinfo[axis as usize])
    }

    /// `[delay, period]` of autorepeat, in milliseconds.
    pub fn rep(&self) -> [i32; 2] {
        self.state.lock().rep
    }

    /// `input_open_device()`: connect a consumer.
    pub fn connect(&self, handle: Arc<dyn InputHandle>) {
        self.handles.lock().push(handle);
    }

    /// `input_close_device()`.
    pub fn disconnect(&self, handle: &Arc<dyn InputHandle>) {
        self.handles.lock().retain(|h| !Arc::ptr_eq(h, handle));
    }

    /// Number of connected consumers.
    pub fn users(&self) -> usize {
        self.handles.lock().len()
    }

    fn timestamp(&self) -> (u32, u32) {
        let ms = self.timers.clock().uptime_ms();
        ((ms / 1000) as u32, ((ms % 1000) * 1000) as u32)
    }

    fn get_disposition(&self, st: &mut InputState, ty: u16, code: u16, value: &mut i32)
                       -> Disposition {
        match ty {
            EV_SYN => match code {
                SYN_REPORT => Disposition::Flush,
                SYN_MT_REPORT => Disposition::Pass,
                _ => Disposition::Ignore,
            },
            EV_KEY => {
                if !self.has_key(code) {
                    return Disposition::Ignore;
                }
                // Autorepeat events are only passed while the key is down.
                if *value == 2 {
                    return if bit::test_bit(&st.key, code as usize) {
                        Disposition::Pass
                    } else {
                        Disposition::Ignore
                    };
                }
                let down = *value != 0;
                if bit::test_bit(&st.key, code as usize) == down {
                    return Disposition::Ignore;
                }
                if down {
                    bit::set_bit(&mut st.key, code as usize);
                } else {
                    bit::clear_bit(&mut st.key, code as usize);
                }
                Disposition::Pass
            }
            EV_ABS => {
                if !self.has_abs(code) {
                    return Disposition::Ignore;
                }
                self.abs_disposition(st, code, value)
            }
            EV_MSC => Disposition::Pass,
            EV_REP => {
                if code <= REP_MAX && *value >= 0 && st.rep[code as usize] != *value {
                    st.rep[code as usize] = *value;
                    Disposition::Pass
                } else {
                    Disposition::Ignore
                }
            }
            _ => Disposition::Ignore,
        }
    }

    fn abs_disposition(&self, st: &mut InputState, code: u16, value: &mut i32) -> Disposition {
        let is_mt = (ABS_MT_FIRST..=ABS_MT_LAST).contains(&code);
        if code == ABS_MT_SLOT {
            // Slot changes are emitted lazily, before the next MT event.
            if let Some(mt) = st.mt.as_mut() {
                if *value >= 0 && (*value as usize) < mt.num_slots() {
                    mt.set_current(*value as usize);
                }
                return Disposition::Ignore;
            }
        }
        let fuzz = st.absinfo[code as usize].fuzz;
        let old = match (is_mt, st.mt.as_mut()) {
            (true, Some(mt)) => mt.current_mut().abs_mut(code),
            _ => &mut st.absinfo[code as usize].value,
        };
        let new = defuzz(*value, *old, fuzz);
        if new == *old {
            return Disposition::Ignore;
        }
        *old = new;
        *value = new;

        if is_mt {
            if let Some(mt) = st.mt.as_ref() {
                let slot = mt.current() as i32;
                if st.absinfo[ABS_MT_SLOT as usize].value != slot {
                    st.absinfo[ABS_MT_SLOT as usize].value = slot;
                    return Disposition::PassSlot;
                }
            }
        }
        Disposition::Pass
    }

    /// `input_event()`: report one event. Nothing is delivered until the frame ends with
    /// `SYN_REPORT`.
    pub fn event(&self, ty: u16, code: u16, value: i32) {
        if !self.has_event(ty) {
            return;
        }
        let mut value = value;
        let (sec, usec) = self.timestamp();
        let stamp = |type_, code, value| InputEvent { sec, usec, type_, code, value };

        let frame = {
            let mut st = self.state.lock();
            let disposition = self.get_disposition(&mut st, ty, code, &mut value);
            match disposition {
                Disposition::Ignore => None,
                Disposition::Flush => {
                    let mut frame = core::mem::take(&mut st.frame);
                    if frame.is_empty() {
                        // Nothing since the last SYN_REPORT.
                        None
                    } else {
                        frame.push(stamp(ty, code, value));
                        Some(frame)
                    }
                }
                Disposition::PassSlot | Disposition::Pass => {
                    if disposition == Disposition::PassSlot {
                        let slot = st.absinfo[ABS_MT_SLOT as usize].value;
                        st.frame.push(stamp(EV_ABS, ABS_MT_SLOT, slot));
                    }
                    st.frame.push(stamp(ty, code, value));
                    None
                }
            }
        };
        if let Some(frame) = frame {
            self.pass_values(&frame);
        }
    }

    fn pass_values(&self, frame: &[InputEvent]) {
        let handles: Vec<Arc<dyn InputHandle>> = self.handles.lock().clone();
        for h in handles.iter() {
            h.events(frame);
        }
        if !self.has_event(EV_REP) {
            return;
        }
        for ev in frame.iter().filter(|e| e.type_ == EV_KEY && e.value != 2) {
            if ev.value != 0 {
                self.start_autorepeat(ev.code);
            } else {
                self.stop_autorepeat();
            }
        }
    }

    fn start_autorepeat(&self, code: u16) {
        let delay = {
            let mut st = self.state.lock();
            if st.rep[0] <= 0 || st.rep[1] <= 0 {
                return;
            }
            st.repeat_key = Some(code);
            st.rep[0]
        };
        self.repeat.mod_timer(self.timers.jiffies().wrapping_add(msecs_to_jiffies(delay as u32)));
    }

    fn stop_autorepeat(&self) {
        self.repeat.del_timer();
    }

    /// Timer callback: repeat the held key, value 2, in a frame of its own.
    fn repeat_key(&self) {
        let (key, period) = {
            let st = self.state.lock();
            match st.repeat_key {
                Some(k) if bit::test_bit(&st.key, k as usize) => (k, st.rep[1]),
                _ => return,
            }
        };
        self.event(EV_KEY, key, 2);
        self.event(EV_SYN, SYN_REPORT, 0);
        if period > 0 {
            self.repeat.mod_timer(self.timers.jiffies()
                .wrapping_add(msecs_to_jiffies(period as u32)));
        }
    }

    #[inline]
    pub fn report_key(&self, code: u16, value: i32) {
        self.event(EV_KEY, code, (value != 0) as i32);
    }

    #[inline]
    pub fn report_abs(&self, code: u16, value: i32) {
        self.event(EV_ABS, code, value);
    }

    /// `input_sync()`.
    #[inline]
    pub fn sync(&self) {
        self.event(EV_SYN, SYN_REPORT, 0);
    }
}


/// The input devices of the board.
pub struct InputSubsystem {
    timers: Arc<TimerQueue>,
    rep_default: [i32; 2],
    evdev_buffer: usize,
    devices: SpinLock<Vec<Arc<InputDev>>>,
}

impl InputSubsystem {
    /// `rep_delay_ms`/`rep_period_ms` are applied to devices with `EV_REP` that do not set
    /// their own. `evdev_buffer` is the size of each evdev client buffer, in events.
    pub fn new(timers: &Arc<TimerQueue>, rep_delay_ms: u32, rep_period_ms: u32,
               evdev_buffer: usize) -> Arc<Self> {
        Arc::new(Self {
            timers: timers.clone(),
            rep_default: [rep_delay_ms as i32, rep_period_ms as i32],
            evdev_buffer,
            devices: SpinLock::new(Vec::new()),
        })
    }

    /// `input_register_device()`.
    pub fn register(&self, builder: InputDevBuilder) -> Result<Arc<InputDev>> {
        let InputDevBuilder { name, phys, id, mut caps, absinfo, mut rep, mt } = builder;
        if name.is_empty() {
            return Err(Error::EINVAL);
        }
        // Every input device generates EV_SYN.
        bit::set_bit(&mut caps.evbit, EV_SYN as usize);
        // KEY_RESERVED is never reported.
        bit::clear_bit(&mut caps.keybit, KEY_RESERVED as usize);
        if bit::test_bit(&caps.evbit, EV_REP as usize) && rep == [0, 0] {
            rep = self.rep_default;
        }

        let timers = self.timers.clone();
        let dev = Arc::new_cyclic(|me: &Weak<InputDev>| {
            let me = me.clone();
            InputDev {
                name,
                phys,
                id,
                caps,
                state: SpinLock::new(InputState {
                    key: vec![0; bits_to_bytes(KEY_CNT)],
                    absinfo,
                    rep,
                    repeat_key: None,
                    mt,
                    frame: Vec::new(),
                }),
                handles: SpinLock::new(Vec::new()),
                repeat: Timer::new(&timers, move || {
                    if let Some(dev) = me.upgrade() {
                        dev.repeat_key();
                    }
                }),
                timers: timers.clone(),
                registered: AtomicBool::new(true),
            }
        });
        info!("input: {} as {}", dev.name, if dev.phys.is_empty() { "?" } else { &dev.phys });
        self.devices.lock().push(dev.clone());
        Ok(dev)
    }

    /// `input_unregister_device()`: release held keys, stop autorepeat and disconnect every
    /// consumer.
    pub fn unregister(&self, dev: &Arc<InputDev>) {
        self.devices.lock().retain(|d| !Arc::ptr_eq(d, dev));
        dev.repeat.del_timer_sync();
        let held: Vec<usize> = bit::for_each_set_bit(&dev.state.lock().key).collect();
        if !held.is_empty() {
            for code in held {
                dev.event(EV_KEY, code as u16, 0);
            }
            dev.sync();
        }
        dev.registered.store(false, Ordering::Release);
        let handles = core::mem::take(&mut *dev.handles.lock());
        for h in handles {
            h.disconnect();
        }
        info!("input: {} unregistered", dev.name);
    }

    pub fn devices(&self) -> Vec<Arc<InputDev>> {
        self.devices.lock().clone()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Arc<InputDev>> {
        self.devices.lock().iter().find(|d| d.name() == name).cloned()
    }

    /// The evdev node of `dev`, to be opened with [`File::open`](crate::fs::File::open).
    pub fn evdev(&self, dev: &Arc<InputDev>) -> Arc<evdev::Evdev> {
        Arc::new(evdev::Evdev::new(dev, self.evdev_buffer))
    }
}
