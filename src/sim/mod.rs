//! A simulated "alpha" board: the i.MX6ULL controllers the samples use, the peripherals on
//! them, and the DeviceTree that describes it all.
//!
//! | what      | where                         |
//! |-----------|-------------------------------|
//! | LED       | GPIO1_IO03, active low        |
//! | beeper    | GPIO5_IO01, active low        |
//! | KEY0      | GPIO1_IO18, low when pressed  |
//! | AP3216C   | I2C1 at 0x1e                  |
//! | GT911     | I2C2 at 0x14, INT GPIO1_IO09, RST GPIO5_IO09 |
//! | ICM-20608 | ECSPI3 chip select 0          |

pub mod gpio;
pub mod bus;
pub mod ap3216c;
pub mod icm20608;
pub mod gt911;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use crate::base::error::Result;
use crate::base::irq::IrqType;
use crate::dev::Device;
use crate::driver::of::builder::NodeBuilder;
use crate::driver::of::gpio::GpioFlags;
use crate::driver::{self, Driver};
use crate::init::Kernel;
use self::ap3216c::Ap3216cModel;
use self::bus::{SimI2cBus, SimSpiBus};
use self::gpio::{SimGpioChip, NGPIO};
use self::gt911::Gt911Model;
use self::icm20608::Icm20608Model;


pub const GPIO1_PHANDLE: u32 = 1;
pub const GPIO5_PHANDLE: u32 = 5;
pub const GPIO1_BASE: u32 = 0;
pub const GPIO5_BASE: u32 = 4 * NGPIO;

pub const LED_LINE: u32 = 3;
pub const BEEP_LINE: u32 = 1;
pub const KEY_LINE: u32 = 18;
pub const GT911_INT_LINE: u32 = 9;
pub const GT911_RESET_LINE: u32 = 9;

pub const AP3216C_ADDR: u16 = 0x1e;
pub const GT911_ADDR: u16 = 0x14;
pub const ICM20608_CS: u16 = 0;

pub const I2C1_PATH: &str = "/soc/i2c@21a0000";
pub const I2C2_PATH: &str = "/soc/i2c@21a4000";
pub const ECSPI3_PATH: &str = "/soc/spi@2010000";

/// Panel geometry the GT911 model is created with.
pub const PANEL_X_MAX: u16 = 1024;
pub const PANEL_Y_MAX: u16 = 600;
pub const PANEL_CONTACTS: u8 = 5;

/// Time a key has to rest before the driver samples it, plus a margin.
const KEY_SETTLE_MS: u32 = 20;

fn gpio_controller(name: &str, phandle: u32) -> NodeBuilder {
    NodeBuilder::new(name)
        .prop_str("compatible", "fsl,imx6ul-gpio")
        .prop_u32("phandle", phandle)
        .prop_empty("gpio-controller")
        .prop_u32("#gpio-cells", 2)
        .prop_empty("interrupt-controller")
        .prop_u32("#interrupt-cells", 2)
}

fn bus_controller(name: &str, compatible: &str) -> NodeBuilder {
    NodeBuilder::new(name)
        .prop_str("compatible", compatible)
        .prop_u32("#address-cells", 1)
        .prop_u32("#size-cells", 0)
        .prop_str("status", "okay")
}

/// The board's DeviceTree blob, with `bootargs` in `/chosen`.
pub fn dtb(bootargs: &str) -> Vec<u8> {
    let active_low = GpioFlags::ACTIVE_LOW.bits();
    NodeBuilder::root()
        .prop_str("model", "i.MX6 ULL alpha board")
        .prop_str("compatible", "fsl,imx6ull-alientek-emmc")
        .prop_u32("#address-cells", 1)
        .prop_u32("#size-cells", 1)
        .child(NodeBuilder::new("chosen").prop_str("bootargs", bootargs))
        .child(NodeBuilder::new("soc")
            .prop_str("compatible", "simple-bus")
            .prop_u32("#address-cells", 1)
            .prop_u32("#size-cells", 1)
            .prop_empty("ranges")
            .child(gpio_controller("gpio@209c000", GPIO1_PHANDLE)
                .prop_cells("reg", &[0x0209_c000, 0x4000]))
            .child(gpio_controller("gpio@20ac000", GPIO5_PHANDLE)
                .prop_cells("reg", &[0x020a_c000, 0x4000]))
            .child(bus_controller("i2c@21a0000", "fsl,imx21-i2c")
                .child(NodeBuilder::new("ap3216c@1e")
                    .prop_str("compatible", "alpha,ap3216c")
                    .prop_u32("reg", AP3216C_ADDR as u32)))
            .child(bus_controller("i2c@21a4000", "fsl,imx21-i2c")
                .child(NodeBuilder::new("gt911@14")
                    .prop_str("compatible", "goodix,gt911")
                    .prop_u32("reg", GT911_ADDR as u32)
                    .prop_u32("interrupt-parent", GPIO1_PHANDLE)
                    .prop_cells("interrupts", &[GT911_INT_LINE, IrqType::EDGE_FALLING.bits()])
                    .prop_cells("reset-gpios", &[GPIO5_PHANDLE, GT911_RESET_LINE, active_low])
                    .prop_cells("irq-gpios", &[GPIO1_PHANDLE, GT911_INT_LINE, 0])
                    .prop_str("status", "okay")))
            .child(bus_controller("spi@2010000", "fsl,imx6ul-ecspi")
                .child(NodeBuilder::new("icm20608@0")
                    .prop_str("compatible", "alpha,icm20608")
                    .prop_u32("reg", ICM20608_CS as u32)
                    .prop_u32("spi-max-frequency", 8_000_000))))
        .child(NodeBuilder::new("backlight")
            .prop_str("compatible", "pwm-backlight")
            .prop_cells("brightness-levels", &[0, 4, 8, 16, 32, 64, 128, 255])
            .prop_u32("default-brightness-level", 6)
            .prop_str("status", "okay"))
        .child(NodeBuilder::new("dts_led")
            .prop_str("compatible", "alpha-dts_led")
            .prop_str("status", "okay")
            .prop_u32("#address-cells", 1)
            .prop_u32("#size-cells", 1)
            .prop_empty("ranges")
            .child(NodeBuilder::new("led@0")
                .prop_str("compatible", "dts_led,led")
                .prop_cells("reg", &[
                    0x020c_406c, 0x04, // CCM_CCGR1
                    0x020e_0068, 0x04, // SW_MUX_GPIO1_IO03
                    0x020e_02f4, 0x04, // SW_PAD_GPIO1_IO03
                    0x0209_c000, 0x04, // GPIO1_DR
                    0x0209_c004, 0x04, // GPIO1_GDIR
                ])))
        .child(NodeBuilder::new("gpio_led")
            .prop_str("compatible", "alpha-gpio_led")
            .prop_cells("led-gpios", &[GPIO1_PHANDLE, LED_LINE, active_low])
            .prop_str("status", "okay"))
        .child(NodeBuilder::new("beep")
            .prop_str("compatible", "alpha-beep")
            .prop_cells("beep-gpios", &[GPIO5_PHANDLE, BEEP_LINE, active_low])
            .prop_str("status", "okay"))
        .child(NodeBuilder::new("key")
            .prop_str("compatible", "alpha-key")
            .prop_cells("key-gpios", &[GPIO1_PHANDLE, KEY_LINE, active_low])
            .prop_u32("interrupt-parent", GPIO1_PHANDLE)
            .prop_cells("interrupts", &[KEY_LINE, IrqType::EDGE_BOTH.bits()])
            .prop_str("status", "okay"))
        .build()
}

pub struct Board {
    pub kernel: Arc<Kernel>,
    pub gpio1: Arc<SimGpioChip>,
    pub gpio5: Arc<SimGpioChip>,
    pub i2c1: Arc<SimI2cBus>,
    pub i2c2: Arc<SimI2cBus>,
    pub ecspi3: Arc<SimSpiBus>,
    pub ap3216c: Arc<Ap3216cModel>,
    pub gt911: Arc<Gt911Model>,
    pub icm20608: Arc<Icm20608Model>,
}

impl Board {
    pub fn alpha() -> Result<Self> {
        Self::alpha_with_bootargs("console=ttymxc0,115200")
    }

    /// Boot the kernel on the board and register its controllers. Nothing is probed yet.
    pub fn alpha_with_bootargs(bootargs: &str) -> Result<Self> {
        let kernel = Kernel::new(&dtb(bootargs))?;

        let gpio1 = SimGpioChip::new("209c000.gpio");
        gpio1.attach(&kernel.gpio, &kernel.irq, GPIO1_BASE, GPIO1_PHANDLE)?;
        let gpio5 = SimGpioChip::new("20ac000.gpio");
        gpio5.attach(&kernel.gpio, &kernel.irq, GPIO5_BASE, GPIO5_PHANDLE)?;

        let ap3216c = Ap3216cModel::new();
        let i2c1 = SimI2cBus::new("21a0000.i2c");
        i2c1.attach(AP3216C_ADDR, ap3216c.clone());
        kernel.add_i2c_adapter(I2C1_PATH, i2c1.clone());

        let gt911 = Gt911Model::new(&gpio1, GT911_INT_LINE, PANEL_X_MAX, PANEL_Y_MAX,
                                    PANEL_CONTACTS, 1);
        let i2c2 = SimI2cBus::new("21a4000.i2c");
        i2c2.attach(GT911_ADDR, gt911.clone());
        kernel.add_i2c_adapter(I2C2_PATH, i2c2.clone());

        let icm20608 = Icm20608Model::new();
        let ecspi3 = SimSpiBus::new("2010000.ecspi", 1);
        ecspi3.attach(ICM20608_CS, icm20608.clone());
        kernel.add_spi_master(ECSPI3_PATH, ecspi3.clone());

        Ok(Self { kernel, gpio1, gpio5, i2c1, i2c2, ecspi3, ap3216c, gt911, icm20608 })
    }

    /// Every platform, I2C and SPI driver of the board.
    pub fn drivers(&self) -> Vec<Arc<dyn Driver>> {
        let k = &self.kernel;
        vec![
            Arc::new(driver::dts_of::BacklightDriver::new(k)),
            Arc::new(driver::dts_of::DtsLedDriver::new(k)),
            Arc::new(driver::led::GpioLedDriver::new(k)),
            Arc::new(driver::beep::BeepDriver::new(k)),
            Arc::new(driver::key_input::KeyInputDriver::new(k)),
            Arc::new(driver::ap3216c::Ap3216cDriver::new(k)),
            Arc::new(driver::icm20608::Icm20608Driver::new(k)),
            Arc::new(driver::gt911::Gt911Driver::new(k)),
        ]
    }

    pub fn populate(&self) -> Vec<Device> {
        self.populate_with(&self.drivers())
    }

    pub fn populate_with(&self, drivers: &[Arc<dyn Driver>]) -> Vec<Device> {
        self.kernel.populate(drivers)
    }

    /// Push KEY0 down and hold it past the debounce window.
    pub fn press_key(&self) {
        self.gpio1.set_input(KEY_LINE, false);
        self.kernel.timers.advance_ms(self.kernel.config.key_debounce_ms + KEY_SETTLE_MS);
    }

    pub fn release_key(&self) {
        self.gpio1.set_input(KEY_LINE, true);
        self.kernel.timers.advance_ms(self.kernel.config.key_debounce_ms + KEY_SETTLE_MS);
    }

    /// Names of the devices in `devices` that ended up bound.
    pub fn bound_names(devices: &[Device]) -> Vec<String> {
        devices.iter()
            .filter(|d| d.driver_name().is_some())
            .map(|d| String::from(d.name()))
            .collect()
    }
}

pub fn find_device<'d>(devices: &'d mut [Device], name: &str) -> Option<&'d mut Device> {
    devices.iter_mut().find(|d| d.name() == name)
}
