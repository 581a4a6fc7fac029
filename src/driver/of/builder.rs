//! Builds Flattened Device Tree blobs (version 17).
//!
//! The board description and the tests describe their DeviceTree with [`NodeBuilder`] instead
//! of shipping compiled `.dtb` files.

use alloc::string::String;
use alloc::vec::Vec;
use crate::util::align::align_cell;


pub const FDT_MAGIC: u32 = 0xd00d_feed;
pub const FDT_VERSION: u32 = 17;
pub const FDT_LAST_COMP_VERSION: u32 = 16;

const FDT_BEGIN_NODE: u32 = 0x1;
const FDT_END_NODE: u32 = 0x2;
const FDT_PROP: u32 = 0x3;
const FDT_END: u32 = 0x9;

const HEADER_SIZE: usize = 40;
/// One terminating (address, size) entry.
const RSVMAP_SIZE: usize = 16;

/// A node of the tree being described.
#[derive(Clone, Debug, Default)]
pub struct NodeBuilder {
    name: String,
    props: Vec<(String, Vec<u8>)>,
    children: Vec<NodeBuilder>,
}

impl NodeBuilder {
    /// A node named `name` (with the unit address, if any). The root's name is empty.
    pub fn new(name: &str) -> Self {
        Self {
            name: String::from(name),
            ..Default::default()
        }
    }

    pub fn root() -> Self {
        Self::new("")
    }

    pub fn prop_bytes(mut self, name: &str, value: &[u8]) -> Self {
        self.props.push((String::from(name), value.to_vec()));
        self
    }

    /// A property with no value, such as `gpio-controller`.
    pub fn prop_empty(self, name: &str) -> Self {
        self.prop_bytes(name, &[])
    }

    pub fn prop_u32(self, name: &str, value: u32) -> Self {
        self.prop_cells(name, &[value])
    }

    pub fn prop_cells(self, name: &str, cells: &[u32]) -> Self {
        let value: Vec<u8> = cells.iter().flat_map(|c| c.to_be_bytes()).collect();
        self.prop_bytes(name, &value)
    }

    pub fn prop_str(self, name: &str, value: &str) -> Self {
        self.prop_strs(name, &[value])
    }

    pub fn prop_strs(self, name: &str, values: &[&str]) -> Self {
        let mut value = Vec::new();
        for s in values {
            value.extend_from_slice(s.as_bytes());
            value.push(0);
        }
        self.prop_bytes(name, &value)
    }

    pub fn child(mut self, child: NodeBuilder) -> Self {
        self.children.push(child);
        self
    }

    /// Serialize this node as the root of a blob.
    pub fn build(&self) -> Vec<u8> {
        let mut strings = StringTable::default();
        let mut dt_struct = Vec::new();
        self.emit(&mut dt_struct, &mut strings);
        push_u32(&mut dt_struct, FDT_END);

        let off_dt_struct = HEADER_SIZE + RSVMAP_SIZE;
        let off_dt_strings = off_dt_struct + dt_struct.len();
        let total_size = off_dt_strings + strings.data.len();

        let mut blob = Vec::with_capacity(total_size);
        for field in [
            FDT_MAGIC,
            total_size as u32,
            off_dt_struct as u32,
            off_dt_strings as u32,
            HEADER_SIZE as u32,
            FDT_VERSION,
            FDT_LAST_COMP_VERSION,
            0, // boot_cpuid_phys
            strings.data.len() as u32,
            dt_struct.len() as u32,
        ] {
            push_u32(&mut blob, field);
        }
        blob.resize(off_dt_struct, 0);
        blob.extend_from_slice(&dt_struct);
        blob.extend_from_slice(&strings.data);
        blob
    }

    fn emit(&self, out: &mut Vec<u8>, strings: &mut StringTable) {
        push_u32(out, FDT_BEGIN_NODE);
        out.extend_from_slice(self.name.as_bytes());
        out.push(0);
        pad(out);
        for (name, value) in &self.props {
            push_u32(out, FDT_PROP);
            push_u32(out, value.len() as u32);
            push_u32(out, strings.offset_of(name));
            out.extend_from_slice(value);
            pad(out);
        }
        for child in &self.children {
            child.emit(out, strings);
        }
        push_u32(out, FDT_END_NODE);
    }
}

#[derive(Default)]
struct StringTable {
    data: Vec<u8>,
    names: Vec<(String, u32)>,
}

impl StringTable {
    fn offset_of(&mut self, name: &str) -> u32 {
        if let Some((_, off)) = self.names.iter().find(|(n, _)| n == name) {
            return *off;
        }
        let off = self.data.len() as u32;
        self.data.extend_from_slice(name.as_bytes());
        self.data.push(0);
        self.names.push((String::from(name), off));
        off
    }
}

#[inline]
fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

#[inline]
fn pad(out: &mut Vec<u8>) {
    out.resize(align_cell(out.len()), 0);
}
