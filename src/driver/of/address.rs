//! `reg` decoding and bus address translation.

use alloc::sync::Arc;
use crate::base::error::{Error, Result};
use super::{read_number, DeviceNode};


/// A decoded `reg` entry, translated to the root (CPU) address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resource {
    pub start: u64,
    pub size: u64,
}

impl Resource {
    #[inline]
    pub const fn end(&self) -> u64 {
        self.start + self.size - 1
    }
}

/// Translate `addr` from the child address space of `bus` to the address space of its parent
/// through `bus`'s `ranges`. An empty `ranges` is a 1:1 mapping, no `ranges` means the bus
/// cannot be translated.
fn translate_one(bus: &DeviceNode, addr: u64) -> Result<u64> {
    let ranges = bus.find_property("ranges").ok_or_else(|| {
        debug!("{}: no ranges, address not translatable", bus.full_path());
        Error::EINVAL
    })?;
    if ranges.value.is_empty() {
        return Ok(addr);
    }

    let child_na = bus.bus_addr_cells() as usize;
    let child_ns = bus.bus_size_cells() as usize;
    let parent_na = bus.n_addr_cells() as usize;
    let cells = bus.property_read_u32_vec("ranges")?;
    let stride = child_na + parent_na + child_ns;
    if stride == 0 || cells.len() % stride != 0 {
        return Err(Error::EINVAL);
    }
    for entry in cells.chunks_exact(stride) {
        let child = read_number(&entry[..child_na]);
        let parent = read_number(&entry[child_na..child_na + parent_na]);
        let size = read_number(&entry[child_na + parent_na..]);
        if addr >= child && addr - child < size {
            return Ok(addr - child + parent);
        }
    }
    debug!("{}: address {:#x} not in any range", bus.full_path(), addr);
    Err(Error::EINVAL)
}

impl DeviceNode {
    /// Number of entries in `reg`.
    pub fn reg_count(&self) -> usize {
        let stride = (self.n_addr_cells() + self.n_size_cells()) as usize * 4;
        match self.find_property("reg") {
            Some(p) if stride > 0 => p.value.len() / stride,
            _ => 0,
        }
    }

    /// Raw entry `index` of `reg`, in the parent bus address space.
    pub fn reg_raw(&self, index: usize) -> Result<(u64, u64)> {
        let na = self.n_addr_cells() as usize;
        let ns = self.n_size_cells() as usize;
        let reg = self.property_read_u32_vec("reg")?;
        let stride = na + ns;
        if stride == 0 || reg.len() < (index + 1) * stride {
            return Err(Error::EINVAL);
        }
        let entry = &reg[index * stride..(index + 1) * stride];
        Ok((read_number(&entry[..na]), read_number(&entry[na..])))
    }

    /// `of_address_to_resource()`: entry `index` of `reg`, translated up to the root.
    pub fn address(&self, index: usize) -> Result<Resource> {
        let (mut addr, size) = self.reg_raw(index)?;
        let mut bus: Option<Arc<DeviceNode>> = self.parent();
        while let Some(b) = bus {
            let up = b.parent();
            if up.is_none() {
                break;
            }
            addr = translate_one(&b, addr)?;
            bus = up;
        }
        Ok(Resource { start: addr, size })
    }
}
