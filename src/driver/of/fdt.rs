//! Support to parsing Flatten Device Tree blob.

use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use fdt::{Fdt, node::FdtNode};
use crate::base::error::{Error, Result};
use super::{DeviceNode, DeviceTree, Property};


/// Create a `Fdt` object from the dtb blob.
#[inline]
pub fn parse(dtb: &[u8]) -> Result<Fdt<'_>> {
    Fdt::new(dtb).map_err(|e| {
        error!("invalid device tree blob: {:?}", e);
        Error::EINVAL
    })
}

fn unflatten_node(node: FdtNode<'_, '_>, full_path: String, parent: Weak<DeviceNode>)
                  -> Arc<DeviceNode> {
    let name = match full_path.rsplit_once('/') {
        Some((_, name)) => String::from(name),
        None => String::new(),
    };
    let properties: Vec<Property> = node.properties()
        .map(|p| Property { name: String::from(p.name), value: p.value.to_vec() })
        .collect();

    Arc::new_cyclic(|me: &Weak<DeviceNode>| {
        let children = node.children().map(|child| {
            let mut path = full_path.clone();
            if !path.ends_with('/') {
                path.push('/');
            }
            path.push_str(child.name);
            unflatten_node(child, path, me.clone())
        }).collect();
        DeviceNode::new(name, full_path.clone(), properties, parent, children)
    })
}

/// Un-flatten the DeviceTree to the runtime object.
pub fn unflatten(dtb: &[u8]) -> Result<DeviceTree> {
    let fdt = parse(dtb)?;
    let root = fdt.find_node("/").ok_or_else(|| {
        error!("device tree has no root node");
        Error::EINVAL
    })?;
    let root = unflatten_node(root, String::from("/"), Weak::new());
    debug!("device tree un-flattened, {} bytes", fdt.total_size());
    Ok(DeviceTree::from_root(root))
}

pub(crate) fn print_node(node: &DeviceNode, n_spaces: usize) {
    println_k!("{:indent$}{}/", "", node.name(), indent = n_spaces);

    for child in node.children() {
        print_node(child, n_spaces + 2);
    }
}

/// Dump the node names of the tree to the kernel log. Debug use only.
pub fn dump_tree(tree: &DeviceTree) {
    println_k!();
    println_k!("////////// dump device tree (name) ////////////");
    print_node(tree.root(), 0);
    println_k!();
}
