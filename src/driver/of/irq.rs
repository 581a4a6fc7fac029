//! DeviceTree interrupt bindings.

use alloc::sync::Arc;
use crate::base::error::{Error, Result};
use crate::base::irq::{IrqSubsystem, IrqType};
use super::{DeviceNode, DeviceTree};


/// `of_irq_find_parent()`: follow `interrupt-parent`, or the tree parent, up to the first node
/// that is an interrupt controller.
pub fn find_parent(tree: &DeviceTree, node: &DeviceNode) -> Option<Arc<DeviceNode>> {
    let mut next = match node.property_read_u32("interrupt-parent") {
        Ok(ph) => tree.find_node_by_phandle(ph),
        Err(_) => node.parent(),
    };
    while let Some(p) = next {
        if p.find_property("#interrupt-cells").is_some() {
            return Some(p);
        }
        next = match p.property_read_u32("interrupt-parent") {
            Ok(ph) => tree.find_node_by_phandle(ph),
            Err(_) => p.parent(),
        };
    }
    None
}

/// Decode an interrupt specifier into (hwirq, trigger). Handles the one-cell and two-cell
/// (`<hwirq type>`) forms, and the three-cell GIC form (`<SPI/PPI number type>`).
fn xlate(spec: &[u32]) -> Result<(u32, IrqType)> {
    match *spec {
        [hwirq] => Ok((hwirq, IrqType::NONE)),
        [hwirq, ty] => Ok((hwirq, IrqType::from_bits_truncate(ty) & IrqType::SENSE_MASK)),
        [kind, num, ty] => {
            let hwirq = match kind {
                0 => num + 32,
                1 => num + 16,
                _ => return Err(Error::EINVAL),
            };
            Ok((hwirq, IrqType::from_bits_truncate(ty) & IrqType::SENSE_MASK))
        }
        _ => Err(Error::EINVAL),
    }
}

/// Number of interrupts described by a node.
pub fn irq_count(tree: &DeviceTree, node: &DeviceNode) -> usize {
    let Some(parent) = find_parent(tree, node) else { return 0 };
    let Ok(intsize) = parent.property_read_u32("#interrupt-cells") else { return 0 };
    match node.property_count_u32_elems("interrupts") {
        Ok(n) if intsize > 0 => n / intsize as usize,
        _ => 0,
    }
}

/// `irq_of_parse_and_map()`: map interrupt `index` of `node` to a virq and set up its trigger
/// type from the specifier.
pub fn irq_of_parse_and_map(tree: &DeviceTree, irqs: &IrqSubsystem, node: &DeviceNode,
                            index: usize) -> Result<u32> {
    let parent = find_parent(tree, node).ok_or_else(|| {
        debug!("{}: no interrupt parent", node.full_path());
        Error::EINVAL
    })?;
    let intsize = parent.property_read_u32("#interrupt-cells")? as usize;
    let cells = node.property_read_u32_vec("interrupts")?;
    let spec = cells.get(index * intsize..(index + 1) * intsize).ok_or(Error::EINVAL)?;
    let (hwirq, ty) = xlate(spec)?;

    let phandle = parent.phandle().ok_or(Error::EINVAL)?;
    let virq = irqs.find_mapping(phandle, hwirq)?;
    if !ty.is_empty() && irqs.irq_get_trigger_type(virq) != ty {
        irqs.set_trigger_type(virq, ty)?;
    }
    debug!("{}: interrupt {} -> hwirq {} on {}, virq {}", node.full_path(), index, hwirq,
           parent.full_path(), virq);
    Ok(virq)
}
