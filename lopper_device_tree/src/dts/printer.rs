// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::fmt::{self, Write};

use crate::model::{DeviceTree, NodeId, PropertyValue};

const INDENT: &str = "    ";

pub(crate) fn write_tree<W: Write>(out: &mut W, tree: &DeviceTree) -> fmt::Result {
    writeln!(out, "/dts-v1/;")?;
    writeln!(out)?;
    for reservation in &tree.memory_reservations {
        writeln!(out, "{reservation}")?;
    }
    if !tree.memory_reservations.is_empty() {
        writeln!(out)?;
    }
    write_node(out, tree, tree.root(), 0)
}

/// Renders one node and its subtree as DTS text, starting at column 0.
///
/// Returns an empty string if the node is not part of the tree.
#[must_use]
pub fn node_to_dts(tree: &DeviceTree, id: NodeId) -> String {
    let mut out = String::new();
    if tree.contains(id) {
        // Writing into a `String` cannot fail.
        let _ = write_node(&mut out, tree, id, 0);
    }
    out
}

fn write_node<W: Write>(out: &mut W, tree: &DeviceTree, id: NodeId, depth: usize) -> fmt::Result {
    let node = tree.node(id);
    let indent = INDENT.repeat(depth);

    write!(out, "{indent}")?;
    for label in node.labels() {
        write!(out, "{label}: ")?;
    }
    let name = if node.parent().is_none() { "/" } else { node.name() };
    writeln!(out, "{name} {{")?;

    for prop in node.properties() {
        if *prop.value() == PropertyValue::Empty {
            writeln!(out, "{indent}{INDENT}{};", prop.name())?;
        } else {
            writeln!(out, "{indent}{INDENT}{} = {};", prop.name(), prop.value())?;
        }
    }
    if let Some(phandle) = node.phandle() {
        writeln!(out, "{indent}{INDENT}phandle = <{phandle:#x}>;")?;
    }

    for &child in node.children() {
        if tree.contains(child) {
            writeln!(out)?;
            write_node(out, tree, child, depth + 1)?;
        }
    }
    writeln!(out, "{indent}}};")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryReservation;
    use crate::model::{DeviceTreeNode, DeviceTreeProperty};

    #[test]
    fn layout() {
        let mut tree = DeviceTree::from_root(
            DeviceTreeNode::builder("")
                .property(DeviceTreeProperty::new("model", "board"))
                .child(
                    DeviceTreeNode::builder("uart@1000")
                        .label("uart0")
                        .phandle(3)
                        .property(DeviceTreeProperty::new("reg", vec![0x1000, 0x100]))
                        .property(DeviceTreeProperty::empty("dma-coherent"))
                        .build(),
                )
                .build(),
        );
        tree.memory_reservations.push(MemoryReservation::new(0x8000_0000, 0x1000));

        assert_eq!(
            tree.to_string(),
            "/dts-v1/;\n\n/memreserve/ 0x80000000 0x1000;\n\n/ {\n    model = \"board\";\n\n    \
             uart0: uart@1000 {\n        reg = <0x1000 0x100>;\n        dma-coherent;\n        \
             phandle = <0x3>;\n    };\n};\n"
        );

        let uart = tree.find_node("/uart@1000").unwrap();
        assert!(node_to_dts(&tree, uart).starts_with("uart0: uart@1000 {\n    reg"));
    }
}
