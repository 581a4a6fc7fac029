//! Runtime DeviceTree: nodes, properties and match tables.
//!
//! The flattened blob is un-flattened once into an owned tree (see [`fdt`]); drivers then query
//! it the way `of_*` helpers do in the kernel, including the errno each helper returns.

pub mod address;
pub mod builder;
pub mod fdt;
pub mod gpio;
pub mod irq;

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use crate::base::error::{Error, Result};


/// Struct used for matching a device.
/// An **empty string** of `name`, `ty`, and `compatible` represents an any match.
pub struct DeviceId {
    pub name: &'static str,
    // type
    pub ty: &'static str,
    pub compatible: &'static str,
}

impl DeviceId {
    /// Helper method to construct a `DeviceId` object with empty `name` and `ty` and the
    /// specific `compatible`.
    pub const fn with_compat(compatible: &'static str) -> Self {
        Self {
            name: "",
            ty: "",
            compatible
        }
    }
}

/// A property of a node. `value` is raw, big-endian cells or NUL-terminated strings.
#[derive(Clone, Debug)]
pub struct Property {
    pub name: String,
    pub value: Vec<u8>,
}

/// Device node definition of the DeviceTree.
pub struct DeviceNode {
    /// Node name with the unit address, `led@0`.
    name: String,
    full_path: String,
    properties: Vec<Property>,
    phandle: Option<u32>,
    parent: Weak<DeviceNode>,
    children: Vec<Arc<DeviceNode>>,
}

/// Root defaults of `#address-cells` and `#size-cells`.
pub const ROOT_NODE_ADDR_CELLS_DEFAULT: u32 = 1;
pub const ROOT_NODE_SIZE_CELLS_DEFAULT: u32 = 1;

/// Splits a string-list property value into its strings. Fails with `EILSEQ` if the last one is
/// not NUL-terminated.
fn split_strings(value: &[u8]) -> Result<Vec<&str>> {
    if value.last() != Some(&0) {
        return Err(Error::EILSEQ);
    }
    value[..value.len() - 1]
        .split(|&b| b == 0)
        .map(|s| core::str::from_utf8(s).map_err(|_| Error::EILSEQ))
        .collect()
}

/// Base name of a node name, that is without the unit address.
#[inline]
pub fn node_base_name(name: &str) -> &str {
    name.split('@').next().unwrap_or(name)
}

/// Assemble a number from big-endian cells, keeping the last two.
pub fn read_number(cells: &[u32]) -> u64 {
    cells.iter().fold(0u64, |acc, &c| (acc << 32) | c as u64)
}

impl DeviceNode {
    pub(crate) fn new(name: String, full_path: String, properties: Vec<Property>,
                      parent: Weak<DeviceNode>, children: Vec<Arc<DeviceNode>>) -> Self {
        let phandle = properties.iter()
            .find(|p| p.name == "phandle" || p.name == "linux,phandle")
            .and_then(|p| p.value.get(..4))
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]));
        Self { name, full_path, properties, phandle, parent, children }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The node name up to the `@`.
    #[inline]
    pub fn base_name(&self) -> &str {
        node_base_name(&self.name)
    }

    #[inline]
    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    pub fn unit_address(&self) -> Option<&str> {
        self.name.split_once('@').map(|(_, unit)| unit)
    }

    #[inline]
    pub fn phandle(&self) -> Option<u32> {
        self.phandle
    }

    #[inline]
    pub fn parent(&self) -> Option<Arc<DeviceNode>> {
        self.parent.upgrade()
    }

    #[inline]
    pub fn children(&self) -> &[Arc<DeviceNode>] {
        &self.children
    }

    /// `of_get_child_by_name()`: compares the base name.
    pub fn get_child_by_name(&self, name: &str) -> Option<Arc<DeviceNode>> {
        self.children.iter().find(|c| c.base_name() == name).cloned()
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn find_property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    #[inline]
    pub fn property_read_bool(&self, name: &str) -> bool {
        self.find_property(name).is_some()
    }

    fn property_value(&self, name: &str) -> Result<&[u8]> {
        self.find_property(name).map(|p| p.value.as_slice()).ok_or(Error::EINVAL)
    }

    /// Reads the first string of a property.
    pub fn property_read_string(&self, name: &str) -> Result<&str> {
        self.property_read_string_index(name, 0)
    }

    pub fn property_read_string_index(&self, name: &str, index: usize) -> Result<&str> {
        let value = self.property_value(name)?;
        if value.is_empty() {
            return Err(Error::ENODATA);
        }
        split_strings(value)?.get(index).copied().ok_or(Error::ENODATA)
    }

    pub fn property_count_strings(&self, name: &str) -> Result<usize> {
        let value = self.property_value(name)?;
        if value.is_empty() {
            return Err(Error::ENODATA);
        }
        Ok(split_strings(value)?.len())
    }

    /// Index of `string` in a string-list property.
    pub fn property_match_string(&self, name: &str, string: &str) -> Result<usize> {
        let value = self.property_value(name)?;
        if value.is_empty() {
            return Err(Error::ENODATA);
        }
        split_strings(value)?.iter().position(|s| *s == string).ok_or(Error::ENODATA)
    }

    /// Number of elements of `elem_size` bytes in a property.
    pub fn property_count_elems_of_size(&self, name: &str, elem_size: usize) -> Result<usize> {
        let value = self.property_value(name)?;
        if elem_size == 0 || value.len() % elem_size != 0 {
            error!("size of {} in node {} is not a multiple of {}", name, self.full_path,
                   elem_size);
            return Err(Error::EINVAL);
        }
        Ok(value.len() / elem_size)
    }

    #[inline]
    pub fn property_count_u32_elems(&self, name: &str) -> Result<usize> {
        self.property_count_elems_of_size(name, 4)
    }

    pub fn property_read_u32_index(&self, name: &str, index: usize) -> Result<u32> {
        let value = self.property_value(name)?;
        if value.is_empty() {
            return Err(Error::ENODATA);
        }
        let cell = value.get(index * 4..index * 4 + 4).ok_or(Error::EOVERFLOW)?;
        Ok(u32::from_be_bytes([cell[0], cell[1], cell[2], cell[3]]))
    }

    #[inline]
    pub fn property_read_u32(&self, name: &str) -> Result<u32> {
        self.property_read_u32_index(name, 0)
    }

    /// Fills all of `out`. Fails with `EOVERFLOW` if the property holds fewer cells.
    pub fn property_read_u32_array(&self, name: &str, out: &mut [u32]) -> Result {
        let value = self.property_value(name)?;
        if value.is_empty() {
            return Err(Error::ENODATA);
        }
        if value.len() < out.len() * 4 {
            return Err(Error::EOVERFLOW);
        }
        for (o, c) in out.iter_mut().zip(value.chunks_exact(4)) {
            *o = u32::from_be_bytes([c[0], c[1], c[2], c[3]]);
        }
        Ok(())
    }

    /// All the cells of a property.
    pub fn property_read_u32_vec(&self, name: &str) -> Result<Vec<u32>> {
        let mut cells = alloc::vec![0u32; self.property_count_u32_elems(name)?];
        self.property_read_u32_array(name, &mut cells)?;
        Ok(cells)
    }

    /// `of_device_is_available()`: no `status`, or `status` is `okay`/`ok`.
    pub fn is_available(&self) -> bool {
        match self.property_read_string("status") {
            Ok(status) => status == "okay" || status == "ok",
            Err(Error::EINVAL) => true,
            Err(_) => false,
        }
    }

    pub fn is_compatible(&self, compat: &str) -> bool {
        self.compatible_score(compat) > 0
    }

    /// An earlier entry in `compatible` gives a higher score, 0 means not compatible.
    fn compatible_score(&self, compat: &str) -> u32 {
        let Ok(value) = self.property_value("compatible") else { return 0 };
        let Ok(list) = split_strings(value) else { return 0 };
        list.iter()
            .position(|c| c.eq_ignore_ascii_case(compat))
            .map_or(0, |i| (i32::MAX as u32 / 2).saturating_sub((i as u32) << 2))
    }

    /// `__of_device_is_compatible()`: compatible beats type, type beats name.
    pub fn match_score(&self, id: &DeviceId) -> u32 {
        let mut score = 0u32;
        if !id.compatible.is_empty() {
            score = self.compatible_score(id.compatible);
            if score == 0 {
                return 0;
            }
        }
        if !id.ty.is_empty() {
            if self.property_read_string("device_type").ok() != Some(id.ty) {
                return 0;
            }
            score += 2;
        }
        if !id.name.is_empty() {
            if self.base_name() != id.name {
                return 0;
            }
            score += 1;
        }
        score
    }

    /// `#address-cells` in effect on this node's own bus (for its children), inherited.
    pub fn bus_addr_cells(&self) -> u32 {
        if let Ok(v) = self.property_read_u32("#address-cells") {
            return v;
        }
        self.parent().map_or(ROOT_NODE_ADDR_CELLS_DEFAULT, |p| p.bus_addr_cells())
    }

    pub fn bus_size_cells(&self) -> u32 {
        if let Ok(v) = self.property_read_u32("#size-cells") {
            return v;
        }
        self.parent().map_or(ROOT_NODE_SIZE_CELLS_DEFAULT, |p| p.bus_size_cells())
    }

    /// `of_n_addr_cells()`: number of cells of this node's `reg` addresses.
    pub fn n_addr_cells(&self) -> u32 {
        self.parent().map_or(ROOT_NODE_ADDR_CELLS_DEFAULT, |p| p.bus_addr_cells())
    }

    pub fn n_size_cells(&self) -> u32 {
        self.parent().map_or(ROOT_NODE_SIZE_CELLS_DEFAULT, |p| p.bus_size_cells())
    }
}

impl core::fmt::Debug for DeviceNode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceNode")
            .field("path", &self.full_path)
            .field("phandle", &self.phandle)
            .finish()
    }
}

/// `of_match_node()`: the best matching entry of `table`.
pub fn match_node<'t>(table: &'t [DeviceId], node: &DeviceNode) -> Option<&'t DeviceId> {
    let mut best: Option<(&DeviceId, u32)> = None;
    for id in table {
        let score = node.match_score(id);
        if score > best.map_or(0, |(_, s)| s) {
            best = Some((id, score));
        }
    }
    best.map(|(id, _)| id)
}


/// Result of `of_parse_phandle_with_args()`.
#[derive(Clone, Debug)]
pub struct PhandleArgs {
    pub np: Arc<DeviceNode>,
    pub args: Vec<u32>,
}

/// The un-flattened DeviceTree.
pub struct DeviceTree {
    root: Arc<DeviceNode>,
    phandles: BTreeMap<u32, Arc<DeviceNode>>,
}

impl DeviceTree {
    pub(crate) fn from_root(root: Arc<DeviceNode>) -> Self {
        let mut phandles = BTreeMap::new();
        let mut stack = alloc::vec![root.clone()];
        while let Some(node) = stack.pop() {
            if let Some(ph) = node.phandle {
                phandles.insert(ph, node.clone());
            }
            stack.extend(node.children.iter().cloned());
        }
        Self { root, phandles }
    }

    #[inline]
    pub fn root(&self) -> &Arc<DeviceNode> {
        &self.root
    }

    /// Every node in depth-first order, the root first.
    pub fn all_nodes(&self) -> Vec<Arc<DeviceNode>> {
        fn walk(node: &Arc<DeviceNode>, out: &mut Vec<Arc<DeviceNode>>) {
            out.push(node.clone());
            for c in &node.children {
                walk(c, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.root, &mut out);
        out
    }

    /// `of_find_node_by_path()`. A path not starting with `/` starts with an alias name.
    pub fn find_node_by_path(&self, path: &str) -> Option<Arc<DeviceNode>> {
        if !path.starts_with('/') {
            let (alias, rest) = path.split_once('/').unwrap_or((path, ""));
            let aliases = self.find_node_by_path("/aliases")?;
            let mut target = String::from(aliases.property_read_string(alias).ok()?);
            if !target.starts_with('/') {
                return None;
            }
            if !rest.is_empty() {
                target.push('/');
                target.push_str(rest);
            }
            return self.find_node_by_path(&target);
        }
        let mut node = self.root.clone();
        for part in path.split('/').filter(|s| !s.is_empty()) {
            let next = node.children.iter().find(|c| c.name == part)?.clone();
            node = next;
        }
        Some(node)
    }

    pub fn find_node_by_phandle(&self, phandle: u32) -> Option<Arc<DeviceNode>> {
        self.phandles.get(&phandle).cloned()
    }

    fn nodes_after(&self, from: Option<&Arc<DeviceNode>>) -> Vec<Arc<DeviceNode>> {
        let nodes = self.all_nodes();
        match from {
            None => nodes,
            Some(from) => nodes.into_iter()
                .skip_while(|n| !Arc::ptr_eq(n, from))
                .skip(1)
                .collect(),
        }
    }

    /// `of_find_node_by_name()`: the next node after `from` whose base name is `name`.
    pub fn find_node_by_name(&self, from: Option<&Arc<DeviceNode>>, name: &str)
                             -> Option<Arc<DeviceNode>> {
        self.nodes_after(from).into_iter().find(|n| n.base_name() == name)
    }

    /// `of_find_compatible_node()`.
    pub fn find_compatible_node(&self, from: Option<&Arc<DeviceNode>>, ty: Option<&str>,
                                compat: &str) -> Option<Arc<DeviceNode>> {
        self.nodes_after(from).into_iter().find(|n| {
            n.compatible_score(compat) > 0
                && ty.map_or(true, |t| n.property_read_string("device_type") == Ok(t))
        })
    }

    /// `of_find_matching_node()`.
    pub fn find_matching_node(&self, from: Option<&Arc<DeviceNode>>, table: &[DeviceId])
                              -> Option<Arc<DeviceNode>> {
        self.nodes_after(from).into_iter().find(|n| match_node(table, n).is_some())
    }

    /// `/chosen/bootargs`.
    pub fn bootargs(&self) -> Option<&str> {
        let chosen = self.root.children.iter().find(|c| c.name == "chosen")?;
        let args = chosen.find_property("bootargs")?;
        let end = args.value.iter().position(|&b| b == 0).unwrap_or(args.value.len());
        core::str::from_utf8(&args.value[..end]).ok()
    }

    /// `of_parse_phandle_with_args()`: entry `index` of a `<&phandle args...>` list, where the
    /// number of args is read from `cells_name` of the target node.
    pub fn parse_phandle_with_args(&self, node: &DeviceNode, list_name: &str, cells_name: &str,
                                   index: usize) -> Result<PhandleArgs> {
        let cells = node.property_read_u32_vec(list_name).map_err(|_| Error::ENOENT)?;
        let mut pos = 0;
        let mut cur = 0;
        while pos < cells.len() {
            let phandle = cells[pos];
            pos += 1;
            let (np, count) = if phandle == 0 {
                (None, 0)
            } else {
                let np = self.find_node_by_phandle(phandle).ok_or_else(|| {
                    error!("{}: could not find phandle {}", node.full_path(), phandle);
                    Error::EINVAL
                })?;
                let count = np.property_read_u32(cells_name).map_err(|_| {
                    error!("{}: could not get {} for {}", node.full_path(), cells_name,
                           np.full_path());
                    Error::EINVAL
                })? as usize;
                (Some(np), count)
            };
            if pos + count > cells.len() {
                error!("{}: {} list is too short", node.full_path(), list_name);
                return Err(Error::EINVAL);
            }
            if cur == index {
                let np = np.ok_or(Error::ENOENT)?;
                return Ok(PhandleArgs { np, args: cells[pos..pos + count].to_vec() });
            }
            pos += count;
            cur += 1;
        }
        Err(Error::ENOENT)
    }

    /// Number of entries in a `<&phandle args...>` list.
    pub fn count_phandle_with_args(&self, node: &DeviceNode, list_name: &str, cells_name: &str)
                                   -> Result<usize> {
        let mut count = 0;
        loop {
            match self.parse_phandle_with_args(node, list_name, cells_name, count) {
                Ok(_) => count += 1,
                Err(Error::ENOENT) if count > 0 => return Ok(count),
                Err(e) => return Err(e),
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use super::builder::NodeBuilder;

    fn tree() -> DeviceTree {
        let blob = NodeBuilder::root()
            .child(NodeBuilder::new("aliases").prop_str("leds", "/a/led@0"))
            .child(NodeBuilder::new("a")
                .prop_u32("#address-cells", 2)
                .prop_u32("phandle", 7)
                .child(NodeBuilder::new("led@0")
                    .prop_strs("compatible", &["alpha,led", "gpio-leds"])
                    .prop_str("status", "disabled")))
            .child(NodeBuilder::new("b")
                .child(NodeBuilder::new("led@1")
                    .prop_str("device_type", "led")
                    .prop_strs("compatible", &["gpio-leds"])))
            .child(NodeBuilder::new("props")
                .prop_empty("flag")
                .prop_u32("one", 42)
                .prop_cells("three", &[1, 2, 3])
                .prop_bytes("odd", &[0, 0, 1])
                .prop_bytes("unterminated", b"abc")
                .prop_strs("names", &["rx", "tx"])
                .prop_str("status", "okay"))
            .build();
        fdt::unflatten(&blob).unwrap()
    }

    #[test]
    fn property_errnos() {
        let tree = tree();
        let np = tree.find_node_by_path("/props").unwrap();

        assert_eq!(np.property_read_u32("missing"), Err(Error::EINVAL));
        assert_eq!(np.property_read_string("missing"), Err(Error::EINVAL));
        assert_eq!(np.property_read_u32_array("missing", &mut [0; 1]), Err(Error::EINVAL));

        assert_eq!(np.property_read_u32("flag"), Err(Error::ENODATA));
        assert_eq!(np.property_read_u32_array("flag", &mut [0; 1]), Err(Error::ENODATA));
        assert_eq!(np.property_read_string("flag"), Err(Error::ENODATA));
        assert_eq!(np.property_count_strings("flag"), Err(Error::ENODATA));
        assert!(np.property_read_bool("flag"));
        assert!(!np.property_read_bool("missing"));

        assert_eq!(np.property_read_u32("one"), Ok(42));
        assert_eq!(np.property_read_u32_index("one", 1), Err(Error::EOVERFLOW));
        assert_eq!(np.property_read_u32_array("one", &mut [0; 2]), Err(Error::EOVERFLOW));
        let mut cells = [0u32; 2];
        assert_eq!(np.property_read_u32_array("three", &mut cells), Ok(()));
        assert_eq!(cells, [1, 2]);
        assert_eq!(np.property_count_u32_elems("three"), Ok(3));
        assert_eq!(np.property_count_elems_of_size("odd", 4), Err(Error::EINVAL));

        assert_eq!(np.property_read_string("unterminated"), Err(Error::EILSEQ));
        assert_eq!(np.property_count_strings("names"), Ok(2));
        assert_eq!(np.property_read_string_index("names", 1), Ok("tx"));
        assert_eq!(np.property_read_string_index("names", 2), Err(Error::ENODATA));
        assert_eq!(np.property_match_string("names", "tx"), Ok(1));
    }

    #[test]
    fn status_and_cells() {
        let tree = tree();
        assert!(tree.find_node_by_path("/props").unwrap().is_available());
        assert!(tree.find_node_by_path("/b/led@1").unwrap().is_available());
        let led0 = tree.find_node_by_path("/a/led@0").unwrap();
        assert!(!led0.is_available());
        assert_eq!(led0.n_addr_cells(), 2);
        assert_eq!(led0.n_size_cells(), ROOT_NODE_SIZE_CELLS_DEFAULT);
        assert_eq!(led0.unit_address(), Some("0"));
        assert_eq!(led0.parent().unwrap().full_path(), "/a");
    }

    #[test]
    fn lookups() {
        let tree = tree();
        let led0 = tree.find_node_by_path("/a/led@0").unwrap();
        assert!(Arc::ptr_eq(&tree.find_node_by_path("leds").unwrap(), &led0));
        assert!(tree.find_node_by_path("nosuch").is_none());
        assert_eq!(tree.find_node_by_phandle(7).unwrap().full_path(), "/a");

        // By base name, in tree order, resuming after `from`.
        let first = tree.find_node_by_name(None, "led").unwrap();
        assert!(Arc::ptr_eq(&first, &led0));
        let second = tree.find_node_by_name(Some(&first), "led").unwrap();
        assert_eq!(second.full_path(), "/b/led@1");
        assert!(tree.find_node_by_name(Some(&second), "led").is_none());

        let np = tree.find_compatible_node(None, Some("led"), "gpio-leds").unwrap();
        assert_eq!(np.full_path(), "/b/led@1");
        assert_eq!(tree.find_node_by_path("/b").unwrap().get_child_by_name("led")
                       .map(|n| String::from(n.full_path())), Some(String::from("/b/led@1")));
    }

    #[test]
    fn match_scoring() {
        let tree = tree();
        let led0 = tree.find_node_by_path("/a/led@0").unwrap();

        // The earlier `compatible` entry of the node wins over table order.
        let table = [DeviceId::with_compat("gpio-leds"), DeviceId::with_compat("alpha,led")];
        assert_eq!(match_node(&table, &led0).map(|id| id.compatible), Some("alpha,led"));

        // A tie goes to the first table entry, a matching name adds to the score.
        let table = [
            DeviceId { name: "", ty: "", compatible: "alpha,led" },
            DeviceId { name: "x", ty: "", compatible: "alpha,led" },
            DeviceId { name: "", ty: "", compatible: "alpha,led" },
            DeviceId { name: "led", ty: "", compatible: "alpha,led" },
        ];
        let best = match_node(&table, &led0).unwrap();
        assert!(core::ptr::eq(best, &table[3]));
        assert!(core::ptr::eq(match_node(&table[..3], &led0).unwrap(), &table[0]));

        // A type mismatch rules an entry out.
        let typed = [DeviceId { name: "", ty: "led", compatible: "alpha,led" }];
        assert!(match_node(&typed, &led0).is_none());
        let led1 = tree.find_node_by_path("/b/led@1").unwrap();
        let typed = [DeviceId { name: "", ty: "led", compatible: "gpio-leds" }];
        assert!(match_node(&typed, &led1).is_some());
        assert!(match_node(&[DeviceId::with_compat("other")], &led1).is_none());
    }
}
