//! Power management.

/// Power-management message.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PmMessage {
    pub event: i32,
}

impl PmMessage {
    pub const EVENT_ON: i32 = 0x0000;
    pub const EVENT_FREEZE: i32 = 0x0001;
    pub const EVENT_SUSPEND: i32 = 0x0002;
    pub const EVENT_RESUME: i32 = 0x0010;

    pub const ON: PmMessage = PmMessage::new(Self::EVENT_ON);
    pub const FREEZE: PmMessage = PmMessage::new(Self::EVENT_FREEZE);
    pub const SUSPEND: PmMessage = PmMessage::new(Self::EVENT_SUSPEND);
    pub const RESUME: PmMessage = PmMessage::new(Self::EVENT_RESUME);

    pub const fn new(event: i32) -> Self {
        Self {
            event
        }
    }

    /// Whether the device is going to sleep.
    #[inline]
    pub const fn is_sleep(self) -> bool {
        self.event & (Self::EVENT_FREEZE | Self::EVENT_SUSPEND) != 0
    }
}
