//! DeviceTree parsing samples: the `/backlight` properties and the `reg` regions of
//! `/dts_led`.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use crate::base::error::{Error, Result};
use crate::dev::Device;
use crate::driver::of::address::Resource;
use crate::driver::of::{DeviceId, DeviceNode, DeviceTree};
use crate::init::Kernel;
use super::{Driver, Metadata};


const NAME: &str = "dts_of";
pub const BACKLIGHT_PATH: &str = "/backlight";

/// What the sample reads out of the backlight node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BacklightInfo {
    pub compatible: String,
    pub status: String,
    pub default_brightness_level: u32,
    pub brightness_levels: Vec<u32>,
}

impl BacklightInfo {
    /// Every property is required, a missing or empty one gives `ENODEV`.
    pub fn from_node(node: &DeviceNode) -> Result<Self> {
        let compatible = node.property_read_string("compatible").map_err(|_| {
            error!("{} compatible property read failed", NAME);
            Error::ENODEV
        })?;
        info!("{} compatible: {}", NAME, compatible);
        let status = node.property_read_string("status").map_err(|_| {
            error!("{} status property read failed", NAME);
            Error::ENODEV
        })?;
        info!("{} status: {}", NAME, status);
        let default_brightness_level = node.property_read_u32("default-brightness-level")
            .map_err(|_| {
                error!("{} default-brightness-level read failed", NAME);
                Error::ENODEV
            })?;
        info!("{} default-brightness-level: {}", NAME, default_brightness_level);

        let count = match node.property_count_elems_of_size("brightness-levels", 4) {
            Ok(n) if n > 0 => n,
            _ => {
                error!("{} brightness-levels count failed", NAME);
                return Err(Error::ENODEV);
            }
        };
        info!("{} brightness-levels count: {}", NAME, count);
        let mut brightness_levels = vec![0u32; count];
        node.property_read_u32_array("brightness-levels", &mut brightness_levels).map_err(|_| {
            error!("{} brightness-levels read failed", NAME);
            Error::ENODEV
        })?;
        for (i, level) in brightness_levels.iter().enumerate() {
            info!("{} brightness-levels[{}]: {}", NAME, i, level);
        }

        Ok(Self {
            compatible: String::from(compatible),
            status: String::from(status),
            default_brightness_level,
            brightness_levels,
        })
    }

    pub fn from_tree(tree: &DeviceTree) -> Result<Self> {
        let node = tree.find_node_by_path(BACKLIGHT_PATH).ok_or_else(|| {
            error!("{} backlight node not found", NAME);
            Error::ENODEV
        })?;
        Self::from_node(&node)
    }
}

/// The register regions listed by the `led` child of a node, translated to CPU addresses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegionInfo {
    pub led_node: String,
    pub regions: Vec<Resource>,
}

impl RegionInfo {
    /// Looks up `led@0` after `parent`, then plain `led`, like `of_find_node_by_name` does.
    pub fn from_node(tree: &DeviceTree, parent: &Arc<DeviceNode>) -> Result<Self> {
        for child in parent.children() {
            info!("dts_led child node: {}", child.name());
        }
        let led = tree.find_node_by_name(Some(parent), "led@0")
            .or_else(|| tree.find_node_by_name(Some(parent), "led"))
            .ok_or_else(|| {
                error!("dts_led led node not found");
                Error::ENODEV
            })?;
        let reg = led.find_property("reg").ok_or_else(|| {
            error!("dts_led reg property not found");
            Error::ENODEV
        })?;
        info!("dts_led reg property found, length: {}", reg.value.len());

        let regions = (0..led.reg_count())
            .map(|i| led.address(i))
            .collect::<Result<Vec<_>>>()?;
        for (i, r) in regions.iter().enumerate() {
            info!("dts_led region {}: {:#010x} size {:#x}", i, r.start, r.size);
        }
        Ok(Self { led_node: String::from(led.full_path()), regions })
    }
}


/// Binds to the backlight node and keeps its [`BacklightInfo`] as driver data.
pub struct BacklightDriver {
    metadata: Metadata,
    match_table: [DeviceId; 1],
}

impl BacklightDriver {
    pub fn new(_kernel: &Arc<Kernel>) -> Self {
        Self {
            metadata: Metadata::with_name(NAME),
            match_table: [DeviceId::with_compat("pwm-backlight")],
        }
    }
}

impl Driver for BacklightDriver {
    fn get_metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn get_match_table(&self) -> Option<&[DeviceId]> {
        Some(&self.match_table)
    }

    fn probe(&self, dev: &mut Device) -> Result {
        let info = BacklightInfo::from_node(dev.require_of_node()?)?;
        dev.set_drvdata(Arc::new(info));
        Ok(())
    }

    fn remove(&self, _dev: &mut Device) -> Result {
        info!("{} exit", NAME);
        Ok(())
    }
}

/// Binds to `/dts_led` and decodes the regions of its `led` child.
pub struct DtsLedDriver {
    metadata: Metadata,
    match_table: [DeviceId; 1],
    kernel: Arc<Kernel>,
}

impl DtsLedDriver {
    pub fn new(kernel: &Arc<Kernel>) -> Self {
        Self {
            metadata: Metadata::with_name("dts_led"),
            match_table: [DeviceId::with_compat("alpha-dts_led")],
            kernel: kernel.clone(),
        }
    }
}

impl Driver for DtsLedDriver {
    fn get_metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn get_match_table(&self) -> Option<&[DeviceId]> {
        Some(&self.match_table)
    }

    fn probe(&self, dev: &mut Device) -> Result {
        let node = dev.require_of_node()?.clone();
        info!("dts_led compatible: {}", node.property_read_string("compatible")?);
        let info = RegionInfo::from_node(&self.kernel.tree, &node)?;
        dev.set_drvdata(Arc::new(info));
        Ok(())
    }

    fn remove(&self, _dev: &mut Device) -> Result {
        Ok(())
    }
}
