//! Flattened device tree codec and mutable tree
//!
//! [`FlatDeviceTree`] unflattens a DTB (version 16 or 17) into a
//! [`DeviceTree`] of owned nodes and flattens it back as version 17. The
//! memory reservation map and boot CPU id are carried through untouched; the
//! strings block is rebuilt in first-use order, so flattening the same tree
//! twice yields identical bytes.

use std::collections::HashMap;
use std::mem::size_of;
use std::str;

use crate::error::FdtError;

/// Big-endian magic at offset zero of every blob.
pub const FDT_MAGIC: u32 = 0xD00D_FEED;
/// Version written by [`FlatDeviceTree::flatten`].
pub const FDT_VERSION: u32 = 17;
/// Oldest version a version 17 blob is compatible with.
pub const FDT_LAST_COMP_VERSION: u32 = 16;

const FDT_HEADER_LEN: usize = 10 * size_of::<u32>();
const FDT_V16_HEADER_LEN: usize = 9 * size_of::<u32>();
const FDT_RSV_ENTRY_LEN: usize = 2 * size_of::<u64>();

const FDT_BEGIN_NODE: u32 = 0x0000_0001;
const FDT_END_NODE: u32 = 0x0000_0002;
const FDT_PROP: u32 = 0x0000_0003;
const FDT_NOP: u32 = 0x0000_0004;
const FDT_END: u32 = 0x0000_0009;

/// Deepest node nesting accepted when unflattening.
pub const FDT_MAX_DEPTH: usize = 64;

/// Named property with a raw value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    name: String,
    value: Vec<u8>,
}

impl Property {
    /// Create a property.
    pub fn new(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Property name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw value.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Value length in bytes.
    pub fn len(&self) -> usize {
        self.value.len()
    }

    /// Whether the property carries no value, as boolean flags do.
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Value as a NUL-terminated string.
    pub fn as_str(&self) -> Option<&str> {
        let bytes = self.value.strip_suffix(&[0])?;
        str::from_utf8(bytes).ok()
    }

    /// Value as a single big-endian cell.
    pub fn as_u32(&self) -> Option<u32> {
        let cell: [u8; 4] = self.value.as_slice().try_into().ok()?;
        Some(u32::from_be_bytes(cell))
    }
}

/// Tree node
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Node {
    name: String,
    properties: Vec<Property>,
    children: Vec<Node>,
}

impl Node {
    /// Create an empty node.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Node name including any unit address.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Properties in blob order.
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// Child nodes in blob order.
    pub fn children(&self) -> &[Node] {
        &self.children
    }

    /// Look up a property.
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Whether the node carries `name`.
    pub fn has_property(&self, name: &str) -> bool {
        self.property(name).is_some()
    }

    /// Replace the value of `name`, appending the property if absent.
    pub fn set_property(&mut self, name: &str, value: impl Into<Vec<u8>>) {
        let value = value.into();
        match self.properties.iter_mut().find(|p| p.name == name) {
            Some(prop) => prop.value = value,
            None => self.properties.push(Property::new(name, value)),
        }
    }

    /// Remove `name`, returning it if it was present.
    pub fn remove_property(&mut self, name: &str) -> Option<Property> {
        let index = self.properties.iter().position(|p| p.name == name)?;
        Some(self.properties.remove(index))
    }

    /// Append a child node.
    pub fn add_child(&mut self, child: Node) {
        self.children.push(child);
    }

    /// Builder form of [`Node::set_property`].
    pub fn with_property(mut self, name: &str, value: impl Into<Vec<u8>>) -> Self {
        self.set_property(name, value);
        self
    }

    /// Builder form of [`Node::add_child`].
    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    /// Look up a direct child by name.
    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    /// A node without `status`, or with `okay`/`ok`, is available.
    pub fn is_available(&self) -> bool {
        match self.property("status").and_then(Property::as_str) {
            None => true,
            Some(status) => status == "okay" || status == "ok",
        }
    }
}

/// Index path from the root to a node
pub type NodePath = Vec<usize>;

/// Memory reservation entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    /// Start address
    pub address: u64,
    /// Length in bytes
    pub size: u64,
}

/// Unflattened device tree
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceTree {
    /// Root node
    pub root: Node,
    /// Memory reservation map
    pub reservations: Vec<Reservation>,
    /// Physical id of the boot CPU
    pub boot_cpuid_phys: u32,
}

impl DeviceTree {
    /// Tree with an empty root node.
    pub fn new() -> Self {
        Self::default()
    }

    /// Node at `path`.
    pub fn node(&self, path: &[usize]) -> Option<&Node> {
        path.iter()
            .try_fold(&self.root, |node, &index| node.children.get(index))
    }

    /// Mutable node at `path`.
    pub fn node_mut(&mut self, path: &[usize]) -> Option<&mut Node> {
        path.iter()
            .try_fold(&mut self.root, |node, &index| node.children.get_mut(index))
    }

    /// Path of the node at a slash-separated name path such as `/soc/ldb`.
    pub fn find_path(&self, path: &str) -> Option<NodePath> {
        let mut node = &self.root;
        let mut indices = Vec::new();
        for name in path.split('/').filter(|s| !s.is_empty()) {
            let index = node.children.iter().position(|c| c.name == name)?;
            node = node.children.get(index)?;
            indices.push(index);
        }
        Some(indices)
    }

    /// First node in preorder carrying `property`, optionally skipping
    /// disabled nodes.
    pub fn find_with_property(&self, property: &str, only_available: bool) -> Option<NodePath> {
        self.find_in_subtree(&[], property, only_available)
    }

    /// Like [`DeviceTree::find_with_property`], limited to the subtree at
    /// `base` (inclusive).
    pub fn find_in_subtree(
        &self,
        base: &[usize],
        property: &str,
        only_available: bool,
    ) -> Option<NodePath> {
        let start = self.node(base)?;
        let mut path = base.to_vec();
        find_preorder(start, &mut path, &|node: &Node| {
            node.has_property(property) && (!only_available || node.is_available())
        })
    }

    /// Number of nodes in the tree.
    pub fn node_count(&self) -> usize {
        fn count(node: &Node) -> usize {
            1 + node.children.iter().map(count).sum::<usize>()
        }
        count(&self.root)
    }
}

fn find_preorder(
    node: &Node,
    path: &mut NodePath,
    matches: &dyn Fn(&Node) -> bool,
) -> Option<NodePath> {
    if matches(node) {
        return Some(path.clone());
    }
    for (index, child) in node.children.iter().enumerate() {
        path.push(index);
        if let Some(found) = find_preorder(child, path, matches) {
            return Some(found);
        }
        path.pop();
    }
    None
}

/// Conversion between a serialized blob and a mutable tree
pub trait FdtCodec {
    /// Parse a blob.
    fn unflatten(&self, blob: &[u8]) -> Result<DeviceTree, FdtError>;

    /// Serialize a tree.
    fn flatten(&self, tree: &DeviceTree) -> Result<Vec<u8>, FdtError>;
}

/// Standard FDT blob format
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatDeviceTree;

impl FdtCodec for FlatDeviceTree {
    fn unflatten(&self, blob: &[u8]) -> Result<DeviceTree, FdtError> {
        let magic = read_be_u32(blob, 0).ok_or(FdtError::Truncated("header"))?;
        if magic != FDT_MAGIC {
            return Err(FdtError::BadMagic(magic));
        }
        let header = Header::parse(blob)?;
        let total = to_usize(header.totalsize)?;
        let blob = blob.get(..total).ok_or(FdtError::Truncated("blob"))?;

        let structure = section(
            blob,
            header.off_dt_struct,
            header.size_dt_struct,
            "structure block",
        )?;
        let strings = section(
            blob,
            header.off_dt_strings,
            header.size_dt_strings,
            "strings block",
        )?;
        let reservations = read_reservations(blob, to_usize(header.off_mem_rsvmap)?)?;
        let root = StructureReader::new(structure, strings).read_tree()?;

        Ok(DeviceTree {
            root,
            reservations,
            boot_cpuid_phys: header.boot_cpuid_phys,
        })
    }

    fn flatten(&self, tree: &DeviceTree) -> Result<Vec<u8>, FdtError> {
        let mut writer = StructureWriter::default();
        writer.node(&tree.root);
        push_be32(&mut writer.structure, FDT_END);

        let mut rsvmap = Vec::with_capacity((tree.reservations.len() + 1) * FDT_RSV_ENTRY_LEN);
        for rsv in &tree.reservations {
            rsvmap.extend_from_slice(&rsv.address.to_be_bytes());
            rsvmap.extend_from_slice(&rsv.size.to_be_bytes());
        }
        rsvmap.extend_from_slice(&[0u8; FDT_RSV_ENTRY_LEN]);

        let off_mem_rsvmap = FDT_HEADER_LEN;
        let off_dt_struct = off_mem_rsvmap + rsvmap.len();
        let off_dt_strings = off_dt_struct + writer.structure.len();
        let totalsize = off_dt_strings + writer.strings.len();

        let mut blob = Vec::with_capacity(totalsize);
        for value in [
            FDT_MAGIC,
            to_u32(totalsize)?,
            to_u32(off_dt_struct)?,
            to_u32(off_dt_strings)?,
            to_u32(off_mem_rsvmap)?,
            FDT_VERSION,
            FDT_LAST_COMP_VERSION,
            tree.boot_cpuid_phys,
            to_u32(writer.strings.len())?,
            to_u32(writer.structure.len())?,
        ] {
            push_be32(&mut blob, value);
        }
        blob.extend_from_slice(&rsvmap);
        blob.extend_from_slice(&writer.structure);
        blob.extend_from_slice(&writer.strings);
        Ok(blob)
    }
}

struct Header {
    totalsize: u32,
    off_dt_struct: u32,
    off_dt_strings: u32,
    off_mem_rsvmap: u32,
    boot_cpuid_phys: u32,
    size_dt_strings: u32,
    size_dt_struct: u32,
}

impl Header {
    fn parse(blob: &[u8]) -> Result<Self, FdtError> {
        let field = |index: usize| {
            read_be_u32(blob, index * size_of::<u32>()).ok_or(FdtError::Truncated("header"))
        };

        let version = field(5)?;
        let last_comp_version = field(6)?;
        if version < FDT_LAST_COMP_VERSION || last_comp_version > FDT_VERSION {
            return Err(FdtError::UnsupportedVersion(version));
        }
        if blob.len() < FDT_V16_HEADER_LEN {
            return Err(FdtError::Truncated("header"));
        }

        let totalsize = field(1)?;
        let off_dt_struct = field(2)?;
        // Version 16 headers have no structure size; the block runs to the
        // strings block or the end of the blob.
        let size_dt_struct = if version >= FDT_VERSION {
            field(9)?
        } else {
            let off_dt_strings = field(3)?;
            let end = if off_dt_strings > off_dt_struct { off_dt_strings } else { totalsize };
            end.saturating_sub(off_dt_struct)
        };

        Ok(Self {
            totalsize,
            off_dt_struct,
            off_dt_strings: field(3)?,
            off_mem_rsvmap: field(4)?,
            boot_cpuid_phys: field(7)?,
            size_dt_strings: field(8)?,
            size_dt_struct,
        })
    }
}

fn read_be_u32(data: &[u8], offset: usize) -> Option<u32> {
    let end = offset.checked_add(size_of::<u32>())?;
    let bytes: [u8; 4] = data.get(offset..end)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

fn read_be_u64(data: &[u8], offset: usize) -> Option<u64> {
    let end = offset.checked_add(size_of::<u64>())?;
    let bytes: [u8; 8] = data.get(offset..end)?.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

fn push_be32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

fn to_usize(value: u32) -> Result<usize, FdtError> {
    usize::try_from(value).map_err(|_| FdtError::TooLarge)
}

fn to_u32(value: usize) -> Result<u32, FdtError> {
    u32::try_from(value).map_err(|_| FdtError::TooLarge)
}

fn align4(value: usize) -> Option<usize> {
    value.checked_add(3).map(|v| v & !3)
}

fn section<'a>(
    blob: &'a [u8],
    offset: u32,
    size: u32,
    what: &'static str,
) -> Result<&'a [u8], FdtError> {
    let start = to_usize(offset)?;
    let end = start.checked_add(to_usize(size)?).ok_or(FdtError::Truncated(what))?;
    blob.get(start..end).ok_or(FdtError::Truncated(what))
}

fn read_reservations(blob: &[u8], mut offset: usize) -> Result<Vec<Reservation>, FdtError> {
    let mut reservations = Vec::new();
    loop {
        let address =
            read_be_u64(blob, offset).ok_or(FdtError::Truncated("memory reservation map"))?;
        let size = read_be_u64(blob, offset + size_of::<u64>())
            .ok_or(FdtError::Truncated("memory reservation map"))?;
        if address == 0 && size == 0 {
            return Ok(reservations);
        }
        reservations.push(Reservation { address, size });
        offset += FDT_RSV_ENTRY_LEN;
    }
}

fn read_cstr(data: &[u8], offset: usize) -> Option<(&str, usize)> {
    let tail = data.get(offset..)?;
    let len = tail.iter().position(|&b| b == 0)?;
    let name = str::from_utf8(tail.get(..len)?).ok()?;
    Some((name, len))
}

struct StructureReader<'a> {
    structure: &'a [u8],
    strings: &'a [u8],
    offset: usize,
}

impl<'a> StructureReader<'a> {
    fn new(structure: &'a [u8], strings: &'a [u8]) -> Self {
        Self {
            structure,
            strings,
            offset: 0,
        }
    }

    fn token(&mut self) -> Result<(u32, usize), FdtError> {
        let at = self.offset;
        let token = read_be_u32(self.structure, at).ok_or(FdtError::Truncated("structure block"))?;
        self.offset = at + size_of::<u32>();
        Ok((token, at))
    }

    fn skip_to(&mut self, end: usize) -> Result<(), FdtError> {
        let aligned = align4(end).ok_or(FdtError::Truncated("structure block"))?;
        if aligned > self.structure.len() {
            return Err(FdtError::Truncated("structure block"));
        }
        self.offset = aligned;
        Ok(())
    }

    fn read_tree(mut self) -> Result<Node, FdtError> {
        let root = loop {
            match self.token()? {
                (FDT_NOP, _) => continue,
                (FDT_BEGIN_NODE, _) => break self.read_node(1)?,
                (token, offset) => return Err(FdtError::BadToken { token, offset }),
            }
        };
        loop {
            match self.token()? {
                (FDT_NOP, _) => continue,
                (FDT_END, _) => return Ok(root),
                (token, offset) => return Err(FdtError::BadToken { token, offset }),
            }
        }
    }

    /// Reads a node whose BEGIN_NODE token was just consumed.
    fn read_node(&mut self, depth: usize) -> Result<Node, FdtError> {
        let start = self.offset;
        if depth > FDT_MAX_DEPTH {
            return Err(FdtError::TooDeep(start));
        }
        let (name, len) = read_cstr(self.structure, start).ok_or(FdtError::BadName(start))?;
        let mut node = Node::new(name);
        self.skip_to(start + len + 1)?;

        loop {
            match self.token()? {
                (FDT_PROP, _) => {
                    let prop = self.read_property()?;
                    node.properties.push(prop);
                }
                (FDT_BEGIN_NODE, _) => {
                    let child = self.read_node(depth + 1)?;
                    node.children.push(child);
                }
                (FDT_NOP, _) => {}
                (FDT_END_NODE, _) => return Ok(node),
                (token, offset) => return Err(FdtError::BadToken { token, offset }),
            }
        }
    }

    fn read_property(&mut self) -> Result<Property, FdtError> {
        let (len, _) = self.token()?;
        let (nameoff, _) = self.token()?;
        let len = to_usize(len)?;
        let nameoff = to_usize(nameoff)?;

        let start = self.offset;
        let end = start.checked_add(len).ok_or(FdtError::Truncated("property"))?;
        let value = self
            .structure
            .get(start..end)
            .ok_or(FdtError::Truncated("property"))?;
        let (name, _) = read_cstr(self.strings, nameoff).ok_or(FdtError::BadName(nameoff))?;
        let prop = Property::new(name, value);
        self.skip_to(end)?;
        Ok(prop)
    }
}

#[derive(Default)]
struct StructureWriter {
    structure: Vec<u8>,
    strings: Vec<u8>,
    offsets: HashMap<String, u32>,
}

impl StructureWriter {
    fn pad(&mut self) {
        while self.structure.len() % 4 != 0 {
            self.structure.push(0);
        }
    }

    fn string_offset(&mut self, name: &str) -> u32 {
        if let Some(&offset) = self.offsets.get(name) {
            return offset;
        }
        let offset = u32::try_from(self.strings.len()).unwrap_or(u32::MAX);
        self.strings.extend_from_slice(name.as_bytes());
        self.strings.push(0);
        self.offsets.insert(name.to_string(), offset);
        offset
    }

    fn node(&mut self, node: &Node) {
        push_be32(&mut self.structure, FDT_BEGIN_NODE);
        self.structure.extend_from_slice(node.name.as_bytes());
        self.structure.push(0);
        self.pad();

        for prop in &node.properties {
            let nameoff = self.string_offset(&prop.name);
            push_be32(&mut self.structure, FDT_PROP);
            push_be32(
                &mut self.structure,
                u32::try_from(prop.value.len()).unwrap_or(u32::MAX),
            );
            push_be32(&mut self.structure, nameoff);
            self.structure.extend_from_slice(&prop.value);
            self.pad();
        }

        for child in &node.children {
            self.node(child);
        }
        push_be32(&mut self.structure, FDT_END_NODE);
    }
}
