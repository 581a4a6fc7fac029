//! Device definitions.

pub mod pm;

use alloc::string::String;
use alloc::sync::Arc;
use core::any::Any;
use crate::base::error::{Error, Result};
use crate::driver::Driver;
use crate::driver::i2c::I2cClient;
use crate::driver::of::DeviceNode;
use crate::driver::spi::SpiDevice;
use pm::PmMessage;


/// The bus a device sits on, with the bus-specific handle.
#[derive(Clone)]
pub enum BusDevice {
    Platform,
    I2c(Arc<I2cClient>),
    Spi(Arc<SpiDevice>),
}

pub struct Device {
    pub(crate) init_name: String,
    pub(crate) of_node: Option<Arc<DeviceNode>>,
    pub(crate) bus: BusDevice,
    pub(crate) driver: Option<Arc<dyn Driver>>,
    driver_data: Option<Arc<dyn Any + Send + Sync>>,
}

impl Device {
    pub fn new(name: &str, of_node: Option<Arc<DeviceNode>>, bus: BusDevice) -> Self {
        Self {
            init_name: String::from(name),
            of_node,
            bus,
            driver: None,
            driver_data: None,
        }
    }

    /// A platform device for a DT node, named after the node.
    pub fn platform(node: &Arc<DeviceNode>) -> Self {
        Self::new(node.base_name(), Some(node.clone()), BusDevice::Platform)
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.init_name
    }

    #[inline]
    pub fn of_node(&self) -> Option<&Arc<DeviceNode>> {
        self.of_node.as_ref()
    }

    /// The node, for drivers that cannot work without one.
    pub fn require_of_node(&self) -> Result<&Arc<DeviceNode>> {
        self.of_node.as_ref().ok_or_else(|| {
            error!("{}: no device tree node", self.init_name);
            Error::ENODEV
        })
    }

    #[inline]
    pub fn bus(&self) -> &BusDevice {
        &self.bus
    }

    pub fn i2c_client(&self) -> Result<&Arc<I2cClient>> {
        match &self.bus {
            BusDevice::I2c(client) => Ok(client),
            _ => Err(Error::ENODEV),
        }
    }

    pub fn spi_device(&self) -> Result<&Arc<SpiDevice>> {
        match &self.bus {
            BusDevice::Spi(spi) => Ok(spi),
            _ => Err(Error::ENODEV),
        }
    }

    /// Name of the bound driver.
    pub fn driver_name(&self) -> Option<&'static str> {
        self.driver.as_ref().map(|d| d.get_metadata().name)
    }

    #[inline]
    pub fn is_bound(&self) -> bool {
        self.driver.is_some()
    }

    /// `dev_set_drvdata()`.
    pub fn set_drvdata<T: Any + Send + Sync>(&mut self, data: Arc<T>) {
        self.driver_data = Some(data);
    }

    /// `dev_get_drvdata()`. `None` if nothing of type `T` is set.
    pub fn drvdata<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.driver_data.clone()?.downcast::<T>().ok()
    }

    pub fn clear_drvdata(&mut self) {
        self.driver_data = None;
    }

    /// Detach the bound driver, calling its `remove`.
    pub fn unbind(&mut self) -> Result {
        let Some(driver) = self.driver.take() else { return Ok(()) };
        let ret = driver.remove(self);
        self.driver_data = None;
        info!("{}: unbound from {}", self.init_name, driver.get_metadata().name);
        ret
    }

    pub fn shutdown(&mut self) {
        if let Some(driver) = self.driver.clone() {
            driver.shutdown(self);
        }
    }

    pub fn suspend(&mut self) -> Result {
        match self.driver.clone() {
            Some(driver) => driver.suspend(self, PmMessage::SUSPEND),
            None => Ok(()),
        }
    }

    pub fn resume(&mut self) -> Result {
        match self.driver.clone() {
            Some(driver) => driver.resume(self),
            None => Ok(()),
        }
    }
}

impl core::fmt::Debug for Device {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let bus = match self.bus {
            BusDevice::Platform => "platform",
            BusDevice::I2c(_) => "i2c",
            BusDevice::Spi(_) => "spi",
        };
        f.debug_struct("Device")
            .field("name", &self.init_name)
            .field("bus", &bus)
            .field("of_node", &self.of_node.as_ref().map(|n| n.full_path()))
            .field("driver", &self.driver_name())
            .finish()
    }
}
