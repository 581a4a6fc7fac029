//! Goodix GT911 capacitive touchscreen on I2C.
//!
//! The controller raises its INT line when a frame of contacts is ready. The threaded handler
//! reads the coordinates, reports them as MT type B slots and clears the status so the chip
//! can latch the next frame.

use alloc::sync::{Arc, Weak};
use alloc::vec;
use alloc::vec::Vec;
use crate::base::delay::Delay;
use crate::base::error::{Error, Result};
use crate::base::irq::{IrqFlags, IrqHandler, IrqReturn};
use crate::base::sync::SpinLock;
use crate::dev::Device;
use crate::driver::gpio::gpio_is_valid;
use crate::driver::i2c::{I2cClient, I2cFunc, I2cMsg};
use crate::driver::input::mt::MtFlags;
use crate::driver::input::{self, InputDev, InputDevBuilder, InputId};
use crate::driver::of::{self, DeviceId};
use crate::init::Kernel;
use super::{Driver, Metadata};


const NAME: &str = "Goodix-TS";

pub const MAX_HEIGHT: i32 = 4096;
pub const MAX_WIDTH: i32 = 4096;
pub const INT_TRIGGER: u8 = 1;
pub const CONTACT_SIZE: usize = 8;
pub const MAX_CONTACTS: usize = 10;
pub const CONFIG_MAX_LENGTH: usize = 240;

pub mod reg {
    pub const COMMAND: u16 = 0x8040;
    pub const CONFIG_DATA: u16 = 0x8047;
    pub const VERSION: u16 = 0x8140;
    pub const READ_COOR: u16 = 0x814e;
}

const RESOLUTION_LOC: usize = 1;
const MAX_CONTACTS_LOC: usize = 5;
const TRIGGER_LOC: usize = 6;

/// Addresses selected by the INT level at the end of reset.
pub const ADDR_INT_HIGH: u16 = 0x14;
pub const ADDR_INT_LOW: u16 = 0x5d;

/// Interrupt trigger per config `TRIGGER_LOC` value.
const IRQ_FLAGS: [IrqFlags; 4] = [
    IrqFlags::TRIGGER_RISING,
    IrqFlags::TRIGGER_FALLING,
    IrqFlags::TRIGGER_LOW,
    IrqFlags::TRIGGER_HIGH,
];

#[inline]
fn le16(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

/// Panel parameters from the embedded config.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PanelConfig {
    pub abs_x_max: i32,
    pub abs_y_max: i32,
    pub int_trigger_type: u8,
    pub max_touch_num: usize,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            abs_x_max: MAX_WIDTH,
            abs_y_max: MAX_HEIGHT,
            int_trigger_type: INT_TRIGGER,
            max_touch_num: MAX_CONTACTS,
        }
    }
}

impl PanelConfig {
    /// Decode the config block. A zero resolution or contact count falls back to the
    /// defaults, the trigger is kept.
    pub fn parse(config: &[u8]) -> Self {
        let parsed = Self {
            abs_x_max: le16(config, RESOLUTION_LOC) as i32,
            abs_y_max: le16(config, RESOLUTION_LOC + 2) as i32,
            int_trigger_type: config[TRIGGER_LOC] & 0x03,
            max_touch_num: (config[MAX_CONTACTS_LOC] & 0x0f) as usize,
        };
        if parsed.abs_x_max == 0 || parsed.abs_y_max == 0 || parsed.max_touch_num == 0 {
            error!("{}: invalid config, using defaults", NAME);
            return Self { int_trigger_type: parsed.int_trigger_type, ..Self::default() };
        }
        parsed
    }

    #[inline]
    pub fn irq_flags(&self) -> IrqFlags {
        IRQ_FLAGS[self.int_trigger_type as usize & 0x03] | IrqFlags::ONESHOT
    }
}

/// One contact of a coordinate report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Contact {
    pub id: u8,
    pub x: u16,
    pub y: u16,
    pub w: u16,
}

impl Contact {
    pub fn parse(raw: &[u8]) -> Self {
        Self {
            id: raw[0] & 0x0f,
            x: le16(raw, 1),
            y: le16(raw, 3),
            w: le16(raw, 5),
        }
    }
}


/// Register access with 16-bit big-endian addresses.
struct Regs<'a>(&'a I2cClient);

impl Regs<'_> {
    fn read(&self, reg: u16, buf: &mut [u8]) -> Result {
        let addr = self.0.addr();
        let mut wbuf = reg.to_be_bytes();
        let mut msgs = [I2cMsg::write(addr, &mut wbuf), I2cMsg::read(addr, buf)];
        match self.0.transfer(&mut msgs)? {
            2 => Ok(()),
            _ => Err(Error::EIO),
        }
    }

    fn write(&self, reg: u16, data: &[u8]) -> Result {
        let mut wbuf = Vec::with_capacity(data.len() + 2);
        wbuf.extend_from_slice(&reg.to_be_bytes());
        wbuf.extend_from_slice(data);
        let mut msgs = [I2cMsg::write(self.0.addr(), &mut wbuf)];
        match self.0.transfer(&mut msgs)? {
            1 => Ok(()),
            _ => Err(Error::EIO),
        }
    }
}


pub struct Gt911 {
    client: Arc<I2cClient>,
    input: Arc<InputDev>,
    config: PanelConfig,
    version: u16,
    irq: u32,
    handler: SpinLock<Option<Arc<dyn IrqHandler>>>,
    reset_gpio: Option<u32>,
    irq_gpio: Option<u32>,
}

impl Gt911 {
    #[inline]
    pub fn input_dev(&self) -> &Arc<InputDev> {
        &self.input
    }

    #[inline]
    pub fn config(&self) -> PanelConfig {
        self.config
    }

    #[inline]
    pub fn version(&self) -> u16 {
        self.version
    }

    #[inline]
    pub fn addr(&self) -> u16 {
        self.client.addr()
    }

    #[inline]
    pub fn irq(&self) -> u32 {
        self.irq
    }

    /// Status byte, then the first contact. Further contacts come in a second burst.
    fn read_input_report(&self, data: &mut [u8]) -> Result<usize> {
        let regs = Regs(&self.client);
        regs.read(reg::READ_COOR, &mut data[..1 + CONTACT_SIZE]).map_err(|e| {
            error!("{}: I2C transfer error: {:?}", NAME, e);
            e
        })?;
        let touch_num = (data[0] & 0x0f) as usize;
        if touch_num > self.config.max_touch_num {
            return Err(Error::EPROTO);
        }
        if touch_num > 1 {
            let rest = &mut data[1 + CONTACT_SIZE..1 + CONTACT_SIZE * touch_num];
            regs.read(reg::READ_COOR + 1 + CONTACT_SIZE as u16, rest)?;
        }
        Ok(touch_num)
    }

    fn report_touch(&self, contact: Contact) {
        self.input.mt_slot(contact.id as usize);
        self.input.mt_report_slot_state(input::MT_TOOL_FINGER, true);
        self.input.report_abs(input::ABS_MT_POSITION_X, contact.x as i32);
        self.input.report_abs(input::ABS_MT_POSITION_Y, contact.y as i32);
        self.input.report_abs(input::ABS_MT_TOUCH_MAJOR, contact.w as i32);
        self.input.report_abs(input::ABS_MT_WIDTH_MAJOR, contact.w as i32);
    }

    fn process_events(&self) {
        let mut data = vec![0u8; 1 + CONTACT_SIZE * self.config.max_touch_num.max(1)];
        let touch_num = match self.read_input_report(&mut data) {
            Ok(n) => n,
            Err(e) => {
                debug!("{}: report dropped: {:?}", NAME, e);
                return;
            }
        };
        for raw in data[1..].chunks_exact(CONTACT_SIZE).take(touch_num) {
            self.report_touch(Contact::parse(raw));
        }
        self.input.mt_sync_frame();
        self.input.sync();
        if let Err(e) = Regs(&self.client).write(reg::READ_COOR, &[0]) {
            warn!("{}: clearing status failed: {:?}", NAME, e);
        }
    }
}

/// The irq action. It only holds the device weakly, the irq subsystem owns the action.
struct Gt911Irq(Weak<Gt911>);

impl IrqHandler for Gt911Irq {
    fn thread_fn(&self, _irq: u32) -> IrqReturn {
        match self.0.upgrade() {
            Some(ts) => {
                ts.process_events();
                IrqReturn::Handled
            }
            None => IrqReturn::None,
        }
    }
}


pub struct Gt911Driver {
    metadata: Metadata,
    match_table: [DeviceId; 7],
    kernel: Arc<Kernel>,
}

impl Gt911Driver {
    pub fn new(kernel: &Arc<Kernel>) -> Self {
        Self {
            metadata: Metadata::with_name(NAME),
            match_table: [
                DeviceId::with_compat("goodix,gt911"),
                DeviceId::with_compat("goodix,gt9110"),
                DeviceId::with_compat("goodix,gt912"),
                DeviceId::with_compat("goodix,gt927"),
                DeviceId::with_compat("goodix,gt9271"),
                DeviceId::with_compat("goodix,gt928"),
                DeviceId::with_compat("goodix,gt967"),
            ],
            kernel: kernel.clone(),
        }
    }

    /// Optional pin: a missing property is not an error, a busy line is.
    fn request_gpio(&self, client: &I2cClient, prop: &str, label: &str) -> Result<Option<u32>> {
        let Some(node) = client.of_node() else { return Ok(None) };
        let gpio = match of::gpio::get_named_gpio(&self.kernel.tree, &self.kernel.gpio, node,
                                                  prop, 0) {
            Ok(gpio) if gpio_is_valid(gpio as i64) => gpio,
            Ok(_) => return Ok(None),
            Err(e) if e == Error::EPROBE_DEFER => return Err(e),
            Err(_) => return Ok(None),
        };
        self.kernel.gpio.request(gpio, label)?;
        Ok(Some(gpio))
    }

    /// The INT level when reset is released selects the address. Without both pins this is
    /// a no-op.
    fn hw_reset(&self, reset: Option<u32>, int: Option<u32>, target_addr: u16) -> Result {
        let (Some(reset), Some(int)) = (reset, int) else { return Ok(()) };
        let timers = &self.kernel.timers;
        let gpio = &self.kernel.gpio;
        gpio.direction_output(int, target_addr == ADDR_INT_HIGH)?;
        gpio.direction_output(reset, false)?;
        timers.msleep(1);
        gpio.set_value(reset, true)?;
        timers.msleep(10);
        gpio.direction_input(int)?;
        timers.msleep(100);
        info!("{}: HW reset for addr {:#04x}", NAME, target_addr);
        Ok(())
    }

    fn i2c_test(&self, client: &I2cClient) -> Result {
        let attempts = self.kernel.config.gt911_i2c_attempts;
        let mut test = [0u8];
        let mut error = Error::EIO;
        for attempt in 1..=attempts {
            match Regs(client).read(reg::CONFIG_DATA, &mut test) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    error!("{}: i2c test failed attempt {}: {:?}", NAME, attempt, e);
                    error = e;
                }
            }
            self.kernel.timers.msleep(self.kernel.config.gt911_i2c_retry_ms);
        }
        Err(error)
    }

    fn probe_address(&self, client: &I2cClient, reset: Option<u32>, int: Option<u32>)
                     -> Result {
        self.hw_reset(reset, int, ADDR_INT_HIGH)?;
        client.set_addr(ADDR_INT_HIGH);
        if self.i2c_test(client).is_ok() {
            return Ok(());
        }
        self.hw_reset(reset, int, ADDR_INT_LOW)?;
        client.set_addr(ADDR_INT_LOW);
        self.i2c_test(client).map_err(|e| {
            error!("{}: I2C communication failure: {:?}", NAME, e);
            e
        })
    }

    fn read_version(client: &I2cClient) -> Result<u16> {
        let mut buf = [0u8; 6];
        Regs(client).read(reg::VERSION, &mut buf).map_err(|e| {
            error!("{}: read version failed: {:?}", NAME, e);
            e
        })?;
        info!("{}: IC VERSION: {:02x?}", NAME, buf);
        Ok(le16(&buf, 4))
    }

    fn sw_reset(&self, client: &I2cClient) -> Result {
        let regs = Regs(client);
        regs.write(reg::COMMAND, &[0x02])?;
        self.kernel.timers.msleep(10);
        regs.write(reg::COMMAND, &[0x00])?;
        info!("{}: software reset completed", NAME);
        Ok(())
    }

    fn read_config(client: &I2cClient) -> PanelConfig {
        let mut config = [0u8; CONFIG_MAX_LENGTH];
        match Regs(client).read(reg::CONFIG_DATA, &mut config) {
            Ok(()) => PanelConfig::parse(&config),
            Err(e) => {
                warn!("{}: error reading config ({:?}), using defaults", NAME, e);
                PanelConfig::default()
            }
        }
    }

    fn register_input(&self, config: &PanelConfig) -> Result<Arc<InputDev>> {
        let mut b = InputDevBuilder::new("Goodix Capacitive TouchScreen");
        b.phys("input/ts")
            .id(InputId { bustype: input::BUS_I2C, vendor: 0x0416, product: 0x1001, version: 10427 })
            .set_evbit(input::EV_KEY)
            .set_evbit(input::EV_ABS)
            .set_abs_params(input::ABS_MT_POSITION_X, 0, config.abs_x_max, 0, 0)
            .set_abs_params(input::ABS_MT_POSITION_Y, 0, config.abs_y_max, 0, 0)
            .set_abs_params(input::ABS_MT_WIDTH_MAJOR, 0, 255, 0, 0)
            .set_abs_params(input::ABS_MT_TOUCH_MAJOR, 0, 255, 0, 0);
        b.mt_init_slots(config.max_touch_num, MtFlags::DIRECT | MtFlags::DROP_UNUSED)?;
        self.kernel.input.register(b).map_err(|e| {
            error!("{}: failed to register input device: {:?}", NAME, e);
            e
        })
    }

    fn free_gpios(&self, gpios: &[Option<u32>]) {
        for gpio in gpios.iter().flatten() {
            self.kernel.gpio.free(*gpio);
        }
    }

    fn setup(&self, client: &Arc<I2cClient>, reset: Option<u32>, int: Option<u32>)
             -> Result<Arc<Gt911>> {
        self.probe_address(client, reset, int)?;
        let version = Self::read_version(client)?;
        if let Err(e) = self.sw_reset(client) {
            warn!("{}: software reset failed ({:?}), continuing anyway", NAME, e);
        }
        let config = Self::read_config(client);
        let irq = match (client.irq(), int) {
            (Some(irq), _) => irq,
            (None, Some(int)) => self.kernel.gpio.to_irq(int)?,
            (None, None) => {
                error!("{}: no interrupt", NAME);
                return Err(Error::EINVAL);
            }
        };

        let input = self.register_input(&config)?;
        let ts = Arc::new(Gt911 {
            client: client.clone(),
            input,
            config,
            version,
            irq,
            handler: SpinLock::new(None),
            reset_gpio: reset,
            irq_gpio: int,
        });
        let handler: Arc<dyn IrqHandler> = Arc::new(Gt911Irq(Arc::downgrade(&ts)));
        if let Err(e) = self.kernel.irq.request_threaded_irq(irq, handler.clone(),
                                                            config.irq_flags(), client.name()) {
            error!("{}: request IRQ failed: {:?}", NAME, e);
            self.kernel.input.unregister(&ts.input);
            return Err(e);
        }
        *ts.handler.lock() = Some(handler);
        Ok(ts)
    }
}

impl Driver for Gt911Driver {
    fn get_metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn get_match_table(&self) -> Option<&[DeviceId]> {
        Some(&self.match_table)
    }

    fn get_id_table(&self) -> &[&'static str] {
        &["GDIX1001:00"]
    }

    fn probe(&self, dev: &mut Device) -> Result {
        let client = dev.i2c_client()?.clone();
        debug!("{}: I2C Address: {:#04x}", NAME, client.addr());
        if !client.check_functionality(I2cFunc::I2C) {
            error!("{}: I2C check functionality failed", NAME);
            return Err(Error::ENXIO);
        }

        let reset = self.request_gpio(&client, "reset-gpios", "gt911-reset")?;
        let int = match self.request_gpio(&client, "irq-gpios", "gt911-irq") {
            Ok(int) => int,
            Err(e) => {
                self.free_gpios(&[reset]);
                return Err(e);
            }
        };
        match self.setup(&client, reset, int) {
            Ok(ts) => {
                info!("{}: {}x{}, {} contacts, version {}", NAME, ts.config.abs_x_max,
                      ts.config.abs_y_max, ts.config.max_touch_num, ts.version);
                dev.set_drvdata(ts);
                Ok(())
            }
            Err(e) => {
                self.free_gpios(&[reset, int]);
                Err(e)
            }
        }
    }

    fn remove(&self, dev: &mut Device) -> Result {
        let Some(ts) = dev.drvdata::<Gt911>() else { return Ok(()) };
        if let Some(handler) = ts.handler.lock().take() {
            self.kernel.irq.free_irq(ts.irq, &handler);
        }
        self.kernel.input.unregister(&ts.input);
        self.free_gpios(&[ts.reset_gpio, ts.irq_gpio]);
        Ok(())
    }
}
