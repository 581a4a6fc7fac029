//! Kernel initialization and the subsystem bundle every driver is created with.

mod early_init;
pub mod params;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use crate::base::error::Result;
use crate::base::irq::IrqSubsystem;
use crate::base::sync::SpinLock;
use crate::base::timer::TimerQueue;
use crate::dev::{BusDevice, Device};
use crate::driver::{self, Driver};
use crate::driver::gpio::GpioSubsystem;
use crate::driver::i2c::{I2cAdapter, I2cClient};
use crate::driver::input::InputSubsystem;
use crate::driver::of::{fdt, DeviceNode, DeviceTree};
use crate::driver::spi::{SpiDevice, SpiMaster};
pub use params::{DriverConfig, ModuleParams};


pub const COMMAND_LINE_SIZE: usize = 256;

/// The kernel services of one board. Controllers register into it, drivers are created with
/// it and keep a reference to it.
pub struct Kernel {
    pub cmdline: String,
    pub params: ModuleParams,
    pub config: DriverConfig,
    pub timers: Arc<TimerQueue>,
    pub gpio: Arc<GpioSubsystem>,
    pub irq: Arc<IrqSubsystem>,
    pub input: Arc<InputSubsystem>,
    pub tree: DeviceTree,
    /// I2C adapters and SPI masters, by the DT path of their controller node.
    i2c_adapters: SpinLock<Vec<(String, Arc<dyn I2cAdapter>)>>,
    spi_masters: SpinLock<Vec<(String, Arc<dyn SpiMaster>)>>,
}

impl Kernel {
    /// Bring up the kernel core on the DeviceTree blob `dtb`: install the logger, read the
    /// command line, un-flatten the tree and create the subsystems.
    pub fn new(dtb: &[u8]) -> Result<Arc<Self>> {
        crate::logk::init();
        let fdt = fdt::parse(dtb)?;
        let cmdline = early_init::dt_scan_chosen(&fdt);
        info!("Kernel command line: {}", cmdline);
        let params = ModuleParams::parse(&cmdline);
        let config = DriverConfig::from_params(&params);
        debug!("driver config: {:?}", config);

        let tree = fdt::unflatten(dtb)?;
        if params.get_bool("of", "dump") == Some(true) {
            fdt::dump_tree(&tree);
        }
        let timers = TimerQueue::new();
        let input = InputSubsystem::new(&timers, config.rep_delay_ms, config.rep_period_ms,
                                        config.evdev_buffer);
        Ok(Arc::new(Self {
            cmdline,
            params,
            config,
            timers,
            gpio: GpioSubsystem::new(),
            irq: IrqSubsystem::new(),
            input,
            tree,
            i2c_adapters: SpinLock::new(Vec::new()),
            spi_masters: SpinLock::new(Vec::new()),
        }))
    }

    /// Register the adapter driving the I2C controller node at `path`.
    pub fn add_i2c_adapter(&self, path: &str, adapter: Arc<dyn I2cAdapter>) {
        info!("i2c adapter {} for {}", adapter.name(), path);
        self.i2c_adapters.lock().push((String::from(path), adapter));
    }

    pub fn i2c_adapter(&self, path: &str) -> Option<Arc<dyn I2cAdapter>> {
        self.i2c_adapters.lock().iter().find(|(p, _)| p == path).map(|(_, a)| a.clone())
    }

    /// Register the master driving the SPI controller node at `path`.
    pub fn add_spi_master(&self, path: &str, master: Arc<dyn SpiMaster>) {
        info!("spi master {} for {}", master.name(), path);
        self.spi_masters.lock().push((String::from(path), master));
    }

    pub fn spi_master(&self, path: &str) -> Option<Arc<dyn SpiMaster>> {
        self.spi_masters.lock().iter().find(|(p, _)| p == path).map(|(_, m)| m.clone())
    }

    fn is_bus_controller(&self, path: &str) -> bool {
        self.i2c_adapters.lock().iter().any(|(p, _)| p == path)
            || self.spi_masters.lock().iter().any(|(p, _)| p == path)
    }

    /// `of_platform_populate()`: a platform device for every child of the root with a
    /// `compatible`, descending into `simple-bus` nodes. Bus controllers are left to their
    /// adapters.
    pub fn platform_devices(&self) -> Vec<Device> {
        fn walk(kernel: &Kernel, bus: &Arc<DeviceNode>, out: &mut Vec<Device>) {
            for node in bus.children() {
                if node.find_property("compatible").is_none()
                    || kernel.is_bus_controller(node.full_path()) {
                    continue;
                }
                if node.is_compatible("simple-bus") {
                    walk(kernel, node, out);
                } else {
                    out.push(Device::platform(node));
                }
            }
        }
        let mut devices = Vec::new();
        walk(self, self.tree.root(), &mut devices);
        devices
    }

    /// `of_i2c_register_devices()` for every registered adapter. A child that cannot be
    /// described as a client is skipped.
    pub fn i2c_devices(&self) -> Vec<Device> {
        let adapters = self.i2c_adapters.lock().clone();
        let mut devices = Vec::new();
        for (path, adapter) in adapters {
            let Some(bus) = self.tree.find_node_by_path(&path) else {
                warn!("i2c adapter {}: no node at {}", adapter.name(), path);
                continue;
            };
            for node in bus.children().iter().filter(|n| n.is_available()) {
                match I2cClient::from_of_node(&self.tree, &self.irq, adapter.clone(), node) {
                    Ok(client) => {
                        let name = String::from(client.name());
                        devices.push(Device::new(&name, Some(node.clone()),
                                                 BusDevice::I2c(Arc::new(client))));
                    }
                    Err(e) => warn!("{}: failed to create i2c client: {:?}", node.full_path(), e),
                }
            }
        }
        devices
    }

    /// `of_register_spi_devices()` for every registered master.
    pub fn spi_devices(&self) -> Vec<Device> {
        let masters = self.spi_masters.lock().clone();
        let mut devices = Vec::new();
        for (path, master) in masters {
            let Some(bus) = self.tree.find_node_by_path(&path) else {
                warn!("spi master {}: no node at {}", master.name(), path);
                continue;
            };
            for node in bus.children().iter().filter(|n| n.is_available()) {
                match SpiDevice::from_of_node(&self.tree, &self.irq, master.clone(), node) {
                    Ok(spi) => {
                        let name = String::from(spi.modalias());
                        devices.push(Device::new(&name, Some(node.clone()),
                                                 BusDevice::Spi(Arc::new(spi))));
                    }
                    Err(e) => warn!("{}: failed to create spi device: {:?}", node.full_path(), e),
                }
            }
        }
        devices
    }

    /// Create every platform, I2C and SPI device the tree describes and bind each one to
    /// `drivers`. A failing probe is logged and leaves its device unbound.
    pub fn populate(&self, drivers: &[Arc<dyn Driver>]) -> Vec<Device> {
        let mut devices = self.platform_devices();
        devices.extend(self.i2c_devices());
        devices.extend(self.spi_devices());
        for dev in devices.iter_mut() {
            if let Err(e) = driver::bind(drivers, dev) {
                warn!("{}: left unbound: {:?}", dev.name(), e);
            }
        }
        devices
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::of::builder::NodeBuilder;

    #[test]
    fn reads_command_line() {
        let dtb = NodeBuilder::root()
            .child(NodeBuilder::new("chosen")
                .prop_str("bootargs", "console=ttymxc0 key.debounce_ms=40 evdev.buffer=16"))
            .build();
        let kernel = Kernel::new(&dtb).unwrap();
        assert_eq!(kernel.cmdline, "console=ttymxc0 key.debounce_ms=40 evdev.buffer=16");
        assert_eq!(kernel.config.key_debounce_ms, 40);
        assert_eq!(kernel.config.evdev_buffer, 16);
        assert_eq!(kernel.params.get_str("", "console"), Some("ttymxc0"));
    }

    #[test]
    fn dumps_the_tree_on_request() {
        let dtb = NodeBuilder::root()
            .child(NodeBuilder::new("chosen").prop_str("bootargs", "of.dump"))
            .child(NodeBuilder::new("dump_probe_node"))
            .build();
        Kernel::new(&dtb).unwrap();
        assert!(crate::logk::dmesg_contains("dump device tree"));
        assert!(crate::logk::dmesg_contains("  dump_probe_node/"));
    }

    #[test]
    fn platform_devices_skip_buses() {
        let dtb = NodeBuilder::root()
            .child(NodeBuilder::new("chosen"))
            .child(NodeBuilder::new("soc")
                .prop_str("compatible", "simple-bus")
                .child(NodeBuilder::new("i2c@21a0000").prop_str("compatible", "fsl,imx21-i2c"))
                .child(NodeBuilder::new("gpio@209c000").prop_str("compatible", "fsl,imx35-gpio")))
            .child(NodeBuilder::new("beep").prop_str("compatible", "alpha-beep"))
            .build();
        let kernel = Kernel::new(&dtb).unwrap();
        assert!(kernel.cmdline.is_empty());
        assert_eq!(kernel.config, DriverConfig::DEFAULT);

        let names: Vec<String> = kernel.platform_devices().iter()
            .map(|d| String::from(d.name())).collect();
        assert_eq!(names, ["i2c", "gpio", "beep"]);
        assert!(kernel.i2c_devices().is_empty());
    }
}
