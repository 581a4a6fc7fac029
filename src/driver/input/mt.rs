//! Multi-touch slots (protocol B).

use alloc::vec;
use alloc::vec::Vec;
use bitflags::bitflags;
use crate::base::error::{Error, Result};
use super::*;


bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct MtFlags: u32 {
        /// Emulate a touchpad pointer, with finger count tools.
        const POINTER = 0x0001;
        /// Emulate a touchscreen.
        const DIRECT = 0x0002;
        /// Release slots that were not reported in a frame.
        const DROP_UNUSED = 0x0004;
        const TRACK = 0x0008;
        const SEMI_MT = 0x0010;
    }
}

pub const TRKID_MAX: i32 = 0xffff;
const TRKID_SGN: i32 = (TRKID_MAX + 1) >> 1;
const ABS_MT_CNT: usize = (ABS_MT_LAST - ABS_MT_FIRST + 1) as usize;

#[derive(Clone)]
pub(crate) struct InputMtSlot {
    abs: [i32; ABS_MT_CNT],
    /// Frame in which the slot was last reported.
    frame: u32,
}

impl InputMtSlot {
    #[inline]
    fn abs(&self, code: u16) -> i32 {
        self.abs[(code - ABS_MT_FIRST) as usize]
    }

    #[inline]
    pub(crate) fn abs_mut(&mut self, code: u16) -> &mut i32 {
        &mut self.abs[(code - ABS_MT_FIRST) as usize]
    }

    #[inline]
    fn tracking_id(&self) -> i32 {
        self.abs(ABS_MT_TRACKING_ID)
    }
}

pub(crate) struct InputMt {
    slots: Vec<InputMtSlot>,
    current: usize,
    flags: MtFlags,
    trkid: i32,
    frame: u32,
}

impl InputMt {
    #[inline]
    pub(crate) fn num_slots(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub(crate) fn current(&self) -> usize {
        self.current
    }

    #[inline]
    pub(crate) fn set_current(&mut self, slot: usize) {
        self.current = slot;
    }

    #[inline]
    pub(crate) fn current_mut(&mut self) -> &mut InputMtSlot {
        &mut self.slots[self.current]
    }

    fn new_trkid(&mut self) -> i32 {
        let id = self.trkid & TRKID_MAX;
        self.trkid = self.trkid.wrapping_add(1);
        id
    }
}

impl InputDevBuilder {
    fn copy_abs(&mut self, dst: u16, src: u16) {
        if self.has_abs(src) {
            let info = self.absinfo(src);
            self.set_abs_params(dst, info.minimum, info.maximum, info.fuzz, info.flat);
            self.absinfo[dst as usize].resolution = info.resolution;
        }
    }

    /// `input_mt_init_slots()`. Set up the MT axes before calling this, the pointer axes are
    /// copied from them.
    pub fn mt_init_slots(&mut self, num_slots: usize, flags: MtFlags) -> Result {
        if num_slots == 0 {
            return Ok(());
        }
        if let Some(mt) = self.mt.as_ref() {
            return if mt.num_slots() == num_slots { Ok(()) } else { Err(Error::EINVAL) };
        }
        self.set_abs_params(ABS_MT_SLOT, 0, num_slots as i32 - 1, 0, 0);
        self.set_abs_params(ABS_MT_TRACKING_ID, 0, TRKID_MAX, 0, 0);

        if flags.intersects(MtFlags::POINTER | MtFlags::DIRECT) {
            self.set_capability(EV_KEY, BTN_TOUCH);
            self.copy_abs(ABS_X, ABS_MT_POSITION_X);
            self.copy_abs(ABS_Y, ABS_MT_POSITION_Y);
            self.copy_abs(ABS_PRESSURE, ABS_MT_PRESSURE);
        }
        if flags.contains(MtFlags::POINTER) {
            for key in [BTN_TOOL_FINGER, BTN_TOOL_DOUBLETAP, BTN_TOOL_TRIPLETAP,
                        BTN_TOOL_QUADTAP, BTN_TOOL_QUINTTAP] {
                self.set_keybit(key);
            }
            self.set_propbit(INPUT_PROP_POINTER);
        }
        if flags.contains(MtFlags::DIRECT) {
            self.set_propbit(INPUT_PROP_DIRECT);
        }

        let mut slot = InputMtSlot { abs: [0; ABS_MT_CNT], frame: 0 };
        *slot.abs_mut(ABS_MT_TRACKING_ID) = -1;
        self.set_mt(InputMt {
            slots: vec![slot; num_slots],
            current: 0,
            flags,
            trkid: 0,
            frame: 0,
        });
        Ok(())
    }
}

impl InputDev {
    /// `input_mt_slot()`: select the slot the following MT events go to.
    #[inline]
    pub fn mt_slot(&self, slot: usize) {
        self.event(EV_ABS, ABS_MT_SLOT, slot as i32);
    }

    /// `input_mt_report_slot_state()`: mark the current slot in use or released. An active
    /// slot keeps its tracking id, a new contact gets a fresh one. Returns `active`.
    pub fn mt_report_slot_state(&self, tool_type: i32, active: bool) -> bool {
        let id = {
            let mut st = self.state.lock();
            let Some(mt) = st.mt.as_mut() else { return false };
            let frame = mt.frame;
            let slot = mt.current_mut();
            slot.frame = frame;
            let id = slot.tracking_id();
            match active {
                false => None,
                true if id >= 0 => Some(id),
                true => Some(mt.new_trkid()),
            }
        };
        match id {
            None => {
                self.event(EV_ABS, ABS_MT_TRACKING_ID, -1);
                false
            }
            Some(id) => {
                self.event(EV_ABS, ABS_MT_TRACKING_ID, id);
                self.event(EV_ABS, ABS_MT_TOOL_TYPE, tool_type);
                true
            }
        }
    }

    /// `input_mt_sync_frame()`: end an MT frame. Releases unreported slots when the device
    /// asked for it, then reports the emulated pointer.
    pub fn mt_sync_frame(&self) {
        let (flags, unused, current) = {
            let st = self.state.lock();
            let Some(mt) = st.mt.as_ref() else { return };
            let unused: Vec<usize> = if mt.flags.contains(MtFlags::DROP_UNUSED) {
                mt.slots.iter().enumerate()
                    .filter(|(_, s)| s.frame != mt.frame && s.tracking_id() >= 0)
                    .map(|(i, _)| i)
                    .collect()
            } else {
                Vec::new()
            };
            (mt.flags, unused, mt.current)
        };
        if !unused.is_empty() {
            for &i in unused.iter() {
                self.mt_slot(i);
                self.event(EV_ABS, ABS_MT_TRACKING_ID, -1);
            }
            self.mt_slot(current);
        }
        let use_count = flags.contains(MtFlags::POINTER) && !flags.contains(MtFlags::SEMI_MT);
        self.mt_report_pointer_emulation(use_count);

        if let Some(mt) = self.state.lock().mt.as_mut() {
            mt.frame = mt.frame.wrapping_add(1);
        }
    }

    /// Number of contacts in use.
    pub fn mt_active_count(&self) -> usize {
        self.state.lock().mt.as_ref()
            .map_or(0, |mt| mt.slots.iter().filter(|s| s.tracking_id() >= 0).count())
    }

    fn mt_report_finger_count(&self, count: usize) {
        self.event(EV_KEY, BTN_TOOL_FINGER, (count == 1) as i32);
        self.event(EV_KEY, BTN_TOOL_DOUBLETAP, (count == 2) as i32);
        self.event(EV_KEY, BTN_TOOL_TRIPLETAP, (count == 3) as i32);
        self.event(EV_KEY, BTN_TOOL_QUADTAP, (count == 4) as i32);
        self.event(EV_KEY, BTN_TOOL_QUINTTAP, (count == 5) as i32);
    }

    /// `input_mt_report_pointer_emulation()`: `BTN_TOUCH` plus the position of the oldest
    /// contact.
    fn mt_report_pointer_emulation(&self, use_count: bool) {
        let (count, oldest) = {
            let st = self.state.lock();
            let Some(mt) = st.mt.as_ref() else { return };
            let mut oldid = mt.trkid;
            let mut oldest = None;
            let mut count = 0;
            for s in mt.slots.iter() {
                let id = s.tracking_id();
                if id < 0 {
                    continue;
                }
                if id.wrapping_sub(oldid) & TRKID_SGN != 0 {
                    oldest = Some((s.abs(ABS_MT_POSITION_X), s.abs(ABS_MT_POSITION_Y),
                                   s.abs(ABS_MT_PRESSURE)));
                    oldid = id;
                }
                count += 1;
            }
            (count, oldest)
        };
        self.event(EV_KEY, BTN_TOUCH, (count > 0) as i32);
        if use_count {
            self.mt_report_finger_count(count);
        }
        match oldest {
            Some((x, y, p)) => {
                self.event(EV_ABS, ABS_X, x);
                self.event(EV_ABS, ABS_Y, y);
                if self.has_abs(ABS_MT_PRESSURE) {
                    self.event(EV_ABS, ABS_PRESSURE, p);
                }
            }
            None => {
                if self.has_abs(ABS_PRESSURE) {
                    self.event(EV_ABS, ABS_PRESSURE, 0);
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;
    use crate::base::timer::TimerQueue;
    use crate::driver::input::tests::Recorder;

    fn touchscreen() -> (Arc<InputDev>, Arc<Recorder>) {
        let timers = TimerQueue::new();
        let input = InputSubsystem::new(&timers, 250, 33, 64);
        let mut b = InputDevBuilder::new("ts");
        b.set_abs_params(ABS_MT_POSITION_X, 0, 800, 0, 0)
            .set_abs_params(ABS_MT_POSITION_Y, 0, 480, 0, 0);
        b.mt_init_slots(2, MtFlags::DIRECT | MtFlags::DROP_UNUSED).unwrap();
        assert_eq!(b.mt_init_slots(3, MtFlags::DIRECT), Err(Error::EINVAL));
        let dev = input.register(b).unwrap();
        let rec = Arc::new(Recorder::default());
        dev.connect(rec.clone());
        (dev, rec)
    }

    #[test]
    fn init_sets_up_pointer_axes() {
        let (dev, _) = touchscreen();
        assert!(dev.has_key(BTN_TOUCH));
        assert!(dev.has_prop(INPUT_PROP_DIRECT));
        assert_eq!(dev.abs_info(ABS_X).map(|a| a.maximum), Some(800));
        assert_eq!(dev.abs_info(ABS_MT_SLOT).map(|a| a.maximum), Some(1));
    }

    #[test]
    fn contact_lifecycle() {
        let (dev, rec) = touchscreen();

        dev.mt_slot(0);
        assert!(dev.mt_report_slot_state(MT_TOOL_FINGER, true));
        dev.report_abs(ABS_MT_POSITION_X, 10);
        dev.report_abs(ABS_MT_POSITION_Y, 20);
        dev.mt_sync_frame();
        dev.sync();

        assert_eq!(rec.frames.lock()[0], [
            (EV_ABS, ABS_MT_TRACKING_ID, 0),
            (EV_ABS, ABS_MT_POSITION_X, 10),
            (EV_ABS, ABS_MT_POSITION_Y, 20),
            (EV_KEY, BTN_TOUCH, 1),
            (EV_ABS, ABS_X, 10),
            (EV_ABS, ABS_Y, 20),
            (EV_SYN, SYN_REPORT, 0),
        ]);

        // Second finger in slot 1, the first one stays.
        dev.mt_slot(0);
        dev.mt_report_slot_state(MT_TOOL_FINGER, true);
        dev.mt_slot(1);
        dev.mt_report_slot_state(MT_TOOL_FINGER, true);
        dev.report_abs(ABS_MT_POSITION_X, 300);
        dev.mt_sync_frame();
        dev.sync();
        assert_eq!(rec.frames.lock()[1], [
            (EV_ABS, ABS_MT_SLOT, 1),
            (EV_ABS, ABS_MT_TRACKING_ID, 1),
            (EV_ABS, ABS_MT_POSITION_X, 300),
            (EV_SYN, SYN_REPORT, 0),
        ]);
        assert_eq!(dev.mt_active_count(), 2);

        // Nothing reported: both contacts are dropped.
        dev.mt_sync_frame();
        dev.sync();
        assert_eq!(rec.frames.lock()[2], [
            (EV_ABS, ABS_MT_SLOT, 0),
            (EV_ABS, ABS_MT_TRACKING_ID, -1),
            (EV_ABS, ABS_MT_SLOT, 1),
            (EV_ABS, ABS_MT_TRACKING_ID, -1),
            (EV_KEY, BTN_TOUCH, 0),
            (EV_SYN, SYN_REPORT, 0),
        ]);
        assert_eq!(dev.mt_active_count(), 0);
    }
}
