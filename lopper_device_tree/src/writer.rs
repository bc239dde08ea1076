// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use indexmap::IndexMap;
use twox_hash::xxhash64;
use zerocopy::IntoBytes;

use crate::fdt::{FDT_BEGIN_NODE, FDT_END, FDT_END_NODE, FDT_MAGIC, FDT_PROP, Fdt, FdtHeader};
use crate::memreserve::MemoryReservation;
use crate::model::{DeviceTree, NodeId};

// https://devicetree-specification.readthedocs.io/en/latest/chapter5-flattened-format.html#header
const LAST_VERSION: u32 = 17;
const LAST_COMP_VERSION: u32 = 16;

fn to_u32(len: usize, what: &str) -> u32 {
    u32::try_from(len).unwrap_or_else(|_| panic!("{what} exceeds u32"))
}

pub(crate) fn to_bytes(tree: &DeviceTree) -> Vec<u8> {
    let memory_reservations = write_memory_reservations(&tree.memory_reservations);
    let mut blocks = Blocks::default();
    blocks.write_node(tree, tree.root());
    blocks.structure.extend_from_slice(&FDT_END.to_be_bytes());

    let off_mem_rsvmap = size_of::<FdtHeader>();
    let off_dt_struct = off_mem_rsvmap + memory_reservations.len();
    let off_dt_strings = off_dt_struct + blocks.structure.len();
    let totalsize = off_dt_strings + blocks.strings.len();

    let header = FdtHeader {
        magic: FDT_MAGIC.into(),
        totalsize: to_u32(totalsize, "totalsize").into(),
        off_dt_struct: to_u32(off_dt_struct, "off_dt_struct").into(),
        off_dt_strings: to_u32(off_dt_strings, "off_dt_strings").into(),
        off_mem_rsvmap: to_u32(off_mem_rsvmap, "off_mem_rsvmap").into(),
        version: LAST_VERSION.into(),
        last_comp_version: LAST_COMP_VERSION.into(),
        boot_cpuid_phys: 0u32.into(),
        size_dt_strings: to_u32(blocks.strings.len(), "size_dt_strings").into(),
        size_dt_struct: to_u32(blocks.structure.len(), "size_dt_struct").into(),
    };

    let mut dtb = Vec::with_capacity(totalsize);
    dtb.extend_from_slice(header.as_bytes());
    dtb.extend_from_slice(&memory_reservations);
    dtb.extend_from_slice(&blocks.structure);
    dtb.extend_from_slice(&blocks.strings);
    dtb
}

fn write_memory_reservations(reservations: &[MemoryReservation]) -> Vec<u8> {
    let mut block = Vec::new();
    for reservation in reservations
        .iter()
        .copied()
        .chain([MemoryReservation::new(0, 0)])
    {
        block.extend_from_slice(&reservation.address().to_be_bytes());
        block.extend_from_slice(&reservation.size().to_be_bytes());
    }
    block
}

/// The structure block and the de-duplicated strings block being written.
struct Blocks {
    structure: Vec<u8>,
    strings: Vec<u8>,
    string_offsets: IndexMap<String, u32, xxhash64::State>,
}

impl Default for Blocks {
    fn default() -> Self {
        Self {
            structure: Vec::new(),
            strings: Vec::new(),
            string_offsets: IndexMap::with_hasher(xxhash64::State::with_seed(0xdead_cafe)),
        }
    }
}

impl Blocks {
    fn write_node(&mut self, tree: &DeviceTree, id: NodeId) {
        let node = tree.node(id);
        self.structure
            .extend_from_slice(&FDT_BEGIN_NODE.to_be_bytes());
        self.structure.extend_from_slice(node.name().as_bytes());
        self.structure.push(0);
        self.align();

        for prop in node.properties() {
            self.write_prop(prop.name(), &prop.value().to_bytes());
        }
        if let Some(phandle) = node.phandle() {
            self.write_prop("phandle", &phandle.to_be_bytes());
        }

        for &child in node.children() {
            if tree.contains(child) {
                self.write_node(tree, child);
            }
        }

        self.structure.extend_from_slice(&FDT_END_NODE.to_be_bytes());
    }

    fn write_prop(&mut self, name: &str, value: &[u8]) {
        let name_offset = self.string_offset(name);
        self.structure.extend_from_slice(&FDT_PROP.to_be_bytes());
        self.structure
            .extend_from_slice(&to_u32(value.len(), "property value length").to_be_bytes());
        self.structure.extend_from_slice(&name_offset.to_be_bytes());
        self.structure.extend_from_slice(value);
        self.align();
    }

    fn string_offset(&mut self, name: &str) -> u32 {
        if let Some(&offset) = self.string_offsets.get(name) {
            return offset;
        }
        let offset = to_u32(self.strings.len(), "strings block");
        self.strings.extend_from_slice(name.as_bytes());
        self.strings.push(0);
        self.string_offsets.insert(name.to_owned(), offset);
        offset
    }

    fn align(&mut self) {
        let new_len = Fdt::align_tag_offset(self.structure.len());
        self.structure.resize(new_len, 0);
    }
}
