//! DeviceTree GPIO bindings: `<&controller pin flags>` lists.

use bitflags::bitflags;
use crate::base::error::{Error, Result};
use crate::driver::gpio::GpioSubsystem;
use super::{DeviceNode, DeviceTree};


bitflags! {
    /// Flags cell of a GPIO specifier.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct GpioFlags: u32 {
        const ACTIVE_LOW = 0x1;
        const SINGLE_ENDED = 0x2;
        const OPEN_DRAIN = 0x4;
        const TRANSITORY = 0x8;
        const PULL_UP = 0x10;
        const PULL_DOWN = 0x20;
    }
}

/// `of_gpio_named_count()`.
pub fn gpio_named_count(tree: &DeviceTree, node: &DeviceNode, propname: &str) -> Result<usize> {
    tree.count_phandle_with_args(node, propname, "#gpio-cells")
}

/// `of_get_named_gpio_flags()`: resolve entry `index` of `propname` to a global GPIO number and
/// its flags. Fails with `EPROBE_DEFER` when the controller is not registered yet.
pub fn get_named_gpio_flags(tree: &DeviceTree, gpio: &GpioSubsystem, node: &DeviceNode,
                            propname: &str, index: usize) -> Result<(u32, GpioFlags)> {
    let spec = tree.parse_phandle_with_args(node, propname, "#gpio-cells", index)
        .map_err(|e| {
            debug!("can't parse '{}' property of node '{}[{}]'", propname, node.full_path(),
                   index);
            e
        })?;
    let phandle = spec.np.phandle().ok_or(Error::EINVAL)?;
    let pin = *spec.args.first().ok_or(Error::EINVAL)?;
    let flags = spec.args.get(1).map_or(GpioFlags::empty(), |&f| GpioFlags::from_bits_truncate(f));
    let num = gpio.gpio_by_phandle(phandle, pin)?;
    debug!("{}: {}[{}] = gpio {} flags {:?}", node.full_path(), propname, index, num, flags);
    Ok((num, flags))
}

#[inline]
pub fn get_named_gpio(tree: &DeviceTree, gpio: &GpioSubsystem, node: &DeviceNode,
                      propname: &str, index: usize) -> Result<u32> {
    get_named_gpio_flags(tree, gpio, node, propname, index).map(|(num, _)| num)
}
