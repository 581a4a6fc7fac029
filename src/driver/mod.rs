//! Driver model: the [`Driver`] trait, device matching and the sample drivers.

pub mod of;
pub mod gpio;
pub mod i2c;
pub mod spi;
pub mod input;

pub mod char_dev_base;
pub mod dts_of;
pub mod led;
pub mod beep;
pub mod key;
pub mod key_input;
pub mod ap3216c;
pub mod icm20608;
pub mod gt911;

use alloc::sync::Arc;
use alloc::vec::Vec;
use crate::base::error::{Error, Result};
use crate::dev::{Device, pm::PmMessage};


pub struct Metadata {
    pub name: &'static str,
    pub mod_name: &'static str,
    // bus type: core::cell::Cell<>
    // dev_pm_ops
}

impl Metadata {
    #[inline]
    pub const fn new(name: &'static str, mod_name: &'static str) -> Self {
        Self {
            name,
            mod_name,
        }
    }

    #[inline]
    pub const fn with_name(name: &'static str) -> Self {
        Self::new(name, "")
    }
}

pub trait Driver: Send + Sync {
    fn get_metadata(&self) -> &Metadata;

    fn get_match_table(&self) -> Option<&[of::DeviceId]>;
    // fn get_acpi_match_table(&self)

    /// Bus device ids (`i2c_device_id`, `spi_device_id`), matched against the device name.
    fn get_id_table(&self) -> &[&'static str] {
        &[]
    }

    fn probe(&self, dev: &mut Device) -> Result;

    fn remove(&self, dev: &mut Device) -> Result;

    fn shutdown(&self, _dev: &mut Device) {}

    fn suspend(&self, _dev: &mut Device, _state: PmMessage) -> Result {
        Ok(())
    }

    fn resume(&self, _dev: &mut Device) -> Result {
        Ok(())
    }
}

/// `of_match_device()`: the entry of `table` the device's node matches best.
pub fn of_match_device<'t>(table: &'t [of::DeviceId], dev: &Device) -> Option<&'t of::DeviceId> {
    of::match_node(table, dev.of_node()?)
}

/// How well `driver` matches `dev`: OF match score first, then the id table, then the name.
fn match_rank(driver: &dyn Driver, dev: &Device) -> Option<(u8, u32)> {
    if let (Some(table), Some(node)) = (driver.get_match_table(), dev.of_node()) {
        let score = table.iter().map(|id| node.match_score(id)).max().unwrap_or(0);
        if score > 0 {
            return Some((2, score));
        }
    }
    if driver.get_id_table().iter().any(|id| *id == dev.name()) {
        return Some((1, 0));
    }
    (driver.get_metadata().name == dev.name()).then_some((0, 0))
}

/// Bind `dev` to the best matching driver of `drivers` and probe it. A probe failing with
/// `ENODEV` or `ENXIO` passes the device on to the next candidate, any other error is
/// returned. Returns whether a driver is bound.
pub fn bind(drivers: &[Arc<dyn Driver>], dev: &mut Device) -> Result<bool> {
    if dev.is_bound() {
        return Ok(true);
    }
    if let Some(node) = dev.of_node() {
        if !node.is_available() {
            debug!("{}: {} is disabled", dev.name(), node.full_path());
            return Ok(false);
        }
    }

    let mut candidates: Vec<((u8, u32), &Arc<dyn Driver>)> = drivers.iter()
        .filter_map(|d| match_rank(d.as_ref(), dev).map(|rank| (rank, d)))
        .collect();
    // Stable, so drivers of the same rank keep their order.
    candidates.sort_by(|a, b| b.0.cmp(&a.0));

    for (_, driver) in candidates {
        let name = driver.get_metadata().name;
        dev.driver = Some(driver.clone());
        match driver.probe(dev) {
            Ok(()) => {
                info!("{}: bound to driver {}", dev.name(), name);
                return Ok(true);
            }
            Err(e) if e == Error::ENODEV || e == Error::ENXIO => {
                debug!("{}: driver {} rejects the device: {:?}", dev.name(), name, e);
                dev.driver = None;
                dev.clear_drvdata();
            }
            Err(e) => {
                error!("{}: probe of {} failed: {:?}", dev.name(), name, e);
                dev.driver = None;
                dev.clear_drvdata();
                return Err(e);
            }
        }
    }
    Ok(false)
}


#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use crate::dev::BusDevice;
    use crate::driver::of::builder::NodeBuilder;
    use crate::driver::of::fdt::unflatten;
    use crate::driver::of::{DeviceId, DeviceTree};

    struct Probe {
        metadata: Metadata,
        table: [DeviceId; 2],
        result: Result,
        probed: AtomicUsize,
    }

    impl Probe {
        fn new(name: &'static str, compat: &'static str, result: Result) -> Arc<Self> {
            Arc::new(Self {
                metadata: Metadata::with_name(name),
                table: [DeviceId::with_compat(compat), DeviceId::with_compat("none,none")],
                result,
                probed: AtomicUsize::new(0),
            })
        }
    }

    impl Driver for Probe {
        fn get_metadata(&self) -> &Metadata {
            &self.metadata
        }

        fn get_match_table(&self) -> Option<&[DeviceId]> {
            Some(&self.table)
        }

        fn probe(&self, dev: &mut Device) -> Result {
            self.probed.fetch_add(1, Ordering::SeqCst);
            if self.result.is_ok() {
                dev.set_drvdata(Arc::new(self.metadata.name));
            }
            self.result
        }

        fn remove(&self, _dev: &mut Device) -> Result {
            Ok(())
        }
    }

    fn tree() -> DeviceTree {
        unflatten(&NodeBuilder::root()
            .child(NodeBuilder::new("led").prop_strs("compatible", &["alpha,led", "gpio-leds"]))
            .child(NodeBuilder::new("off").prop_str("compatible", "alpha,led")
                .prop_str("status", "disabled"))
            .build()).unwrap()
    }

    #[test]
    fn best_of_match_wins() {
        let tree = tree();
        let generic = Probe::new("generic", "gpio-leds", Ok(()));
        let alpha = Probe::new("alpha", "alpha,led", Ok(()));
        let drivers: [Arc<dyn Driver>; 2] = [generic.clone(), alpha.clone()];

        let mut dev = Device::platform(&tree.find_node_by_path("/led").unwrap());
        assert_eq!(bind(&drivers, &mut dev), Ok(true));
        assert_eq!(dev.driver_name(), Some("alpha"));
        assert_eq!(dev.drvdata::<&'static str>().as_deref(), Some(&"alpha"));
        assert_eq!(generic.probed.load(Ordering::SeqCst), 0);

        dev.unbind().unwrap();
        assert!(!dev.is_bound());
        assert!(dev.drvdata::<&'static str>().is_none());
    }

    #[test]
    fn enodev_falls_through() {
        let tree = tree();
        let picky = Probe::new("picky", "alpha,led", Err(Error::ENODEV));
        let generic = Probe::new("generic", "gpio-leds", Ok(()));
        let drivers: [Arc<dyn Driver>; 2] = [picky.clone(), generic];
        let mut dev = Device::platform(&tree.find_node_by_path("/led").unwrap());
        assert_eq!(bind(&drivers, &mut dev), Ok(true));
        assert_eq!(dev.driver_name(), Some("generic"));
        assert_eq!(picky.probed.load(Ordering::SeqCst), 1);

        let broken: [Arc<dyn Driver>; 1] = [Probe::new("broken", "alpha,led", Err(Error::EIO))];
        let mut dev = Device::platform(&tree.find_node_by_path("/led").unwrap());
        assert_eq!(bind(&broken, &mut dev), Err(Error::EIO));
        assert!(!dev.is_bound());
    }

    #[test]
    fn disabled_and_name_match() {
        let tree = tree();
        let alpha: Arc<dyn Driver> = Probe::new("alpha", "alpha,led", Ok(()));
        let mut off = Device::platform(&tree.find_node_by_path("/off").unwrap());
        assert_eq!(bind(core::slice::from_ref(&alpha), &mut off), Ok(false));

        let by_name: Arc<dyn Driver> = Probe::new("imx6ull-led", "x,y", Ok(()));
        let mut dev = Device::new("imx6ull-led", None, BusDevice::Platform);
        assert_eq!(bind(core::slice::from_ref(&by_name), &mut dev), Ok(true));
        assert!(dev.i2c_client().is_err());
    }
}
