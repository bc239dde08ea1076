// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Descriptions of which property cells hold phandles.
//!
//! Device tree properties such as `clocks` or `interrupt-map` interleave
//! phandles with plain cells. The [`PhandleDescriptors`] table records the
//! record layout of each such property so that references can be followed
//! without a schema.

use indexmap::IndexMap;
use twox_hash::xxhash64;

use super::{DeviceTree, DeviceTreeNode, DeviceTreeProperty, NodeId};

pub(crate) const DEFAULT_DESCRIPTORS: &[(&str, &str)] = &[
    (
        "address-map",
        "#ranges-address-cells phandle #ranges-address-cells #ranges-size-cells",
    ),
    ("interrupt-parent", "phandle"),
    ("iommus", "phandle field"),
    ("interrupt-map", "#interrupt-cells phandle #interrupt-cells"),
    ("access", "phandle flags"),
    ("cpus", "phandle mask mode"),
    ("clocks", "phandle:#clock-cells"),
];

const LOP_COMPATIBLE: &str = "system-device-tree-v1,lop";

/// One field of a phandle record layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhandleField {
    /// A single cell holding a phandle.
    Phandle,
    /// A phandle cell followed by as many cells as the *target* node's
    /// named `#…-cells` property says.
    PhandleWithTargetCells(String),
    /// As many cells as the node's own named `#…-cells` property says
    /// (one if absent).
    Cells(String),
    /// One cell that is not interpreted.
    Opaque,
}

impl PhandleField {
    fn parse(field: &str) -> Self {
        if field == "phandle" {
            PhandleField::Phandle
        } else if let Some(cells) = field.strip_prefix("phandle:") {
            PhandleField::PhandleWithTargetCells(cells.to_owned())
        } else if field.starts_with('#') {
            PhandleField::Cells(field.to_owned())
        } else {
            PhandleField::Opaque
        }
    }
}

/// A table mapping property names to their phandle record layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhandleDescriptors {
    table: IndexMap<String, Vec<PhandleField>, xxhash64::State>,
}

impl Default for PhandleDescriptors {
    fn default() -> Self {
        let mut descriptors = Self::empty();
        for (name, format) in DEFAULT_DESCRIPTORS {
            descriptors.insert(*name, format);
        }
        descriptors
    }
}

impl PhandleDescriptors {
    /// Creates a table that knows about no property.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            table: IndexMap::with_hasher(xxhash64::State::with_seed(0xdead_cafe)),
        }
    }

    /// Adds or replaces the record layout of a property.
    ///
    /// `format` is a whitespace separated list of fields: `phandle`,
    /// `phandle:#x-cells`, `#x-cells`, or any other word for a plain cell.
    pub fn insert(&mut self, name: impl Into<String>, format: &str) {
        let fields = format.split_whitespace().map(PhandleField::parse).collect();
        self.table.insert(name.into(), fields);
    }

    /// Removes a property from the table.
    pub fn remove(&mut self, name: &str) -> bool {
        self.table.shift_remove(name).is_some()
    }

    /// Returns whether the property may hold phandles.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    /// Returns the record layout of a property.
    #[must_use]
    pub fn fields(&self, name: &str) -> Option<&[PhandleField]> {
        self.table.get(name).map(Vec::as_slice)
    }

    /// Returns the names of all described properties.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }

    /// Returns the `(cell index, phandle)` pairs of `prop`, a property of
    /// `node`.
    ///
    /// Records are repeated until the value is exhausted. Properties of rule
    /// nodes never yield phandles.
    #[must_use]
    pub fn phandles(
        &self,
        tree: &DeviceTree,
        node: NodeId,
        prop: &DeviceTreeProperty,
    ) -> Vec<(usize, u32)> {
        let Some(fields) = self.fields(prop.name()) else {
            return Vec::new();
        };
        let Some(owner) = tree.get(node) else {
            return Vec::new();
        };
        if is_rule(&owner.compatible()) {
            return Vec::new();
        }
        walk(
            fields,
            &prop.value().cells(),
            |name| owner.property(name).and_then(DeviceTreeProperty::as_u32),
            |phandle, name| {
                tree.pnode(phandle)
                    .and_then(|target| tree.node(target).property(name))
                    .and_then(DeviceTreeProperty::as_u32)
            },
        )
    }

    /// Like [`phandles`](Self::phandles), for a property of a node that is
    /// not part of a tree. `target_cells` reads a `#…-cells` property of the
    /// node a phandle refers to.
    #[must_use]
    pub fn detached_phandles<F>(
        &self,
        node: &DeviceTreeNode,
        prop: &DeviceTreeProperty,
        target_cells: F,
    ) -> Vec<(usize, u32)>
    where
        F: Fn(u32, &str) -> Option<u32>,
    {
        let Some(fields) = self.fields(prop.name()) else {
            return Vec::new();
        };
        let compatible = node
            .property("compatible")
            .map(|p| p.value().strings())
            .unwrap_or_default();
        if is_rule(&compatible) {
            return Vec::new();
        }
        walk(
            fields,
            &prop.value().cells(),
            |name| node.property(name).and_then(DeviceTreeProperty::as_u32),
            target_cells,
        )
    }
}

fn is_rule(compatible: &[&str]) -> bool {
    compatible.iter().any(|c| c.starts_with(LOP_COMPATIBLE))
}

fn walk<O, T>(fields: &[PhandleField], cells: &[u32], owner_cells: O, target_cells: T) -> Vec<(usize, u32)>
where
    O: Fn(&str) -> Option<u32>,
    T: Fn(u32, &str) -> Option<u32>,
{
    let mut found = Vec::new();
    let mut index = 0;
    while index < cells.len() {
        let record_start = index;
        for field in fields {
            match field {
                PhandleField::Phandle => {
                    if let Some(&phandle) = cells.get(index) {
                        found.push((index, phandle));
                    }
                    index += 1;
                }
                PhandleField::PhandleWithTargetCells(count_name) => {
                    let extra = cells.get(index).map_or(0, |&phandle| {
                        found.push((index, phandle));
                        target_cells(phandle, count_name.as_str()).unwrap_or(0)
                    });
                    index += 1 + extra as usize;
                }
                PhandleField::Cells(count_name) => {
                    index += owner_cells(count_name.as_str()).unwrap_or(1) as usize;
                }
                PhandleField::Opaque => index += 1,
            }
        }
        if index == record_start {
            break;
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> DeviceTree {
        let mut tree = DeviceTree::from_root(
            DeviceTreeNode::builder("")
                .child(
                    DeviceTreeNode::builder("clk")
                        .phandle(7)
                        .property(DeviceTreeProperty::new("#clock-cells", 1))
                        .build(),
                )
                .child(
                    DeviceTreeNode::builder("dev")
                        .property(DeviceTreeProperty::new("clocks", vec![7, 3, 7, 4]))
                        .property(DeviceTreeProperty::new("access", vec![7, 0, 9, 1]))
                        .build(),
                )
                .build(),
        );
        tree.sync();
        tree
    }

    #[test]
    fn target_cells_are_skipped() {
        let tree = tree();
        let dev = tree.nodes("/dev").unwrap()[0];
        let prop = tree.node(dev).property("clocks").unwrap();
        let phandles = PhandleDescriptors::default().phandles(&tree, dev, prop);
        assert_eq!(phandles, vec![(0, 7), (2, 7)]);
    }

    #[test]
    fn records_repeat() {
        let tree = tree();
        let dev = tree.nodes("/dev").unwrap()[0];
        let prop = tree.node(dev).property("access").unwrap();
        let phandles = PhandleDescriptors::default().phandles(&tree, dev, prop);
        assert_eq!(phandles, vec![(0, 7), (2, 9)]);
    }

    #[test]
    fn unknown_properties_have_no_phandles() {
        let tree = tree();
        let dev = tree.nodes("/dev").unwrap()[0];
        let mut descriptors = PhandleDescriptors::default();
        assert!(descriptors.remove("access"));
        let prop = tree.node(dev).property("access").unwrap();
        assert!(descriptors.phandles(&tree, dev, prop).is_empty());
    }

    #[test]
    fn detached_nodes() {
        let node = DeviceTreeNode::builder("dev")
            .property(DeviceTreeProperty::new("clocks", vec![7, 3, 8]))
            .property(DeviceTreeProperty::new("access", vec![5, 1]))
            .build();
        let descriptors = PhandleDescriptors::default();
        let clock_cells = |phandle: u32, name: &str| (phandle == 7 && name == "#clock-cells").then_some(1);

        let clocks = node.property("clocks").unwrap();
        assert_eq!(descriptors.detached_phandles(&node, clocks, clock_cells), vec![(0, 7), (2, 8)]);
        let access = node.property("access").unwrap();
        assert_eq!(descriptors.detached_phandles(&node, access, clock_cells), vec![(0, 5)]);
    }
}
