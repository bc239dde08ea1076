// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Builds a [`DeviceTree`] from a parsed DTS file.

use log::{debug, warn};

use super::ast::{Cell, Dts, Node, NodeItem, Property, Reference, TopItem, Value};
use crate::MemoryReservation;
use crate::error::DtsError;
use crate::model::{
    DeviceTree, DeviceTreeNode, NodeId, PhandleDescriptors, PropertyValue, RefKind, UnresolvedRef,
};

/// Stored in cells whose reference has no target yet.
pub(crate) const PLACEHOLDER_PHANDLE: u32 = 0xffff_ffff;

pub(crate) fn lower(dts: Dts<'_>) -> Result<DeviceTree, DtsError> {
    let mut tree = DeviceTree::new();
    for item in dts.items {
        match item {
            TopItem::Root(node) => {
                let root = tree.root();
                apply_node(&mut tree, root, node)?;
            }
            TopItem::Override(target, node) => {
                let id = lookup(&mut tree, target)?;
                apply_node(&mut tree, id, node)?;
            }
            TopItem::DeleteNode(target) => {
                let id = lookup(&mut tree, target)?;
                tree.delete(id)?;
            }
            TopItem::Include(path) => return Err(DtsError::Include(path.to_owned())),
        }
    }

    tree.memory_reservations = dts
        .memreserves
        .into_iter()
        .map(|(address, size)| MemoryReservation::new(address, size))
        .collect();

    let resolution = tree.resolve(&PhandleDescriptors::default());
    for (path, reference) in &resolution.unresolved {
        warn!(
            "{path}: `{}` references unknown node `{}`",
            reference.property, reference.target
        );
    }
    Ok(tree)
}

fn lookup(tree: &mut DeviceTree, target: Reference<'_>) -> Result<NodeId, DtsError> {
    tree.sync();
    tree.deref(target.target())
        .ok_or_else(|| DtsError::UnknownReference(target.target().to_owned()))
}

fn apply_node(tree: &mut DeviceTree, id: NodeId, node: Node<'_>) -> Result<(), DtsError> {
    if !node.labels.is_empty() {
        let live = tree.node_mut(id);
        for label in node.labels {
            live.add_label(label);
        }
        tree.mark_dirty();
    }

    for item in node.items {
        match item {
            NodeItem::Property(property) => apply_property(tree, id, property)?,
            NodeItem::Child(child) => {
                let child_id = match tree.child_by_name(id, child.name) {
                    Some(existing) => existing,
                    None => tree.add_child(id, DeviceTreeNode::new(child.name))?,
                };
                apply_node(tree, child_id, child)?;
            }
            NodeItem::DeleteProperty(name) => {
                if tree.delete_property(id, name).is_none() {
                    debug!("{}: no property {name} to delete", tree.path_of(id));
                }
            }
            NodeItem::DeleteNode(name) => match tree.child_by_name(id, name) {
                Some(child) => tree.delete(child)?,
                None => debug!("{}: no child {name} to delete", tree.path_of(id)),
            },
            NodeItem::Include(path) => return Err(DtsError::Include(path.to_owned())),
        }
    }
    Ok(())
}

fn apply_property(tree: &mut DeviceTree, id: NodeId, property: Property<'_>) -> Result<(), DtsError> {
    let name = property.name;
    let (value, references) = match property.values {
        None => (PropertyValue::Empty, Vec::new()),
        Some(values) => lower_values(tree, name, values)?,
    };

    if matches!(name, "phandle" | "linux,phandle") {
        if let PropertyValue::U32(phandle) = value {
            tree.node_mut(id).phandle = Some(phandle);
            tree.mark_dirty();
            return Ok(());
        }
        warn!("{}: ignoring malformed {name}", tree.path_of(id));
    }

    tree.set_property(id, name, value)?;
    let node = tree.node_mut(id);
    for (kind, target) in references {
        node.unresolved.push(UnresolvedRef {
            property: name.to_owned(),
            target,
            kind,
        });
    }
    Ok(())
}

type Lowered = (PropertyValue, Vec<(RefKind, String)>);

fn lower_values(tree: &mut DeviceTree, name: &str, values: Vec<Value<'_>>) -> Result<Lowered, DtsError> {
    if values.iter().all(|v| matches!(v, Value::Str(_))) {
        let mut strings: Vec<String> = values
            .iter()
            .filter_map(|v| match v {
                Value::Str(s) => Some(unescape(s)),
                _ => None,
            })
            .collect();
        let value = if strings.len() == 1 {
            PropertyValue::Str(strings.remove(0))
        } else {
            PropertyValue::StrList(strings)
        };
        return Ok((value, Vec::new()));
    }

    if let [single] = values.as_slice() {
        match single {
            Value::Cells(32, cells) => return lower_cells(name, cells),
            Value::Cells(64, cells) => {
                let mut words = Vec::with_capacity(cells.len() * 2);
                for cell in cells {
                    let v = eval_cell(name, cell)?;
                    words.push(high_word(v));
                    words.push(low_word(v));
                }
                return Ok((cells_value(words), Vec::new()));
            }
            Value::PathRef(target) => {
                return Ok((
                    PropertyValue::Str(target.target().to_owned()),
                    vec![(RefKind::Path, target.target().to_owned())],
                ));
            }
            _ => {}
        }
    }

    let mut bytes = Vec::new();
    let mut references = Vec::new();
    for value in values {
        match value {
            Value::Str(s) => {
                bytes.extend_from_slice(unescape(s).as_bytes());
                bytes.push(0);
            }
            Value::Bytes(b) => bytes.extend_from_slice(&b),
            Value::PathRef(target) => {
                tree.sync();
                let path = match tree.deref(target.target()) {
                    Some(node) => tree.path_of(node),
                    None => {
                        warn!("`{name}`: unknown path reference `{}`", target.target());
                        target.target().to_owned()
                    }
                };
                bytes.extend_from_slice(path.as_bytes());
                bytes.push(0);
            }
            Value::Cells(bits, cells) => {
                let width = cell_width(name, bits)?;
                for cell in &cells {
                    if let Cell::Ref(target) = cell {
                        if width != 4 || bytes.len() % 4 != 0 {
                            return Err(DtsError::Expression(format!(
                                "`{name}`: reference to `{}` is not 32-bit aligned",
                                target.target()
                            )));
                        }
                        references.push((RefKind::Cell(bytes.len() / 4), target.target().to_owned()));
                        bytes.extend_from_slice(&PLACEHOLDER_PHANDLE.to_be_bytes());
                    } else {
                        let v = eval_cell(name, cell)?;
                        bytes.extend_from_slice(&v.to_be_bytes()[8 - width..]);
                    }
                }
            }
        }
    }
    Ok((PropertyValue::Bytes(bytes), references))
}

fn lower_cells(name: &str, cells: &[Cell<'_>]) -> Result<Lowered, DtsError> {
    let mut words = Vec::with_capacity(cells.len());
    let mut references = Vec::new();
    for (index, cell) in cells.iter().enumerate() {
        match cell {
            Cell::Ref(target) => {
                references.push((RefKind::Cell(index), target.target().to_owned()));
                words.push(PLACEHOLDER_PHANDLE);
            }
            Cell::Expr(_) => words.push(low_word(eval_cell(name, cell)?)),
        }
    }
    Ok((cells_value(words), references))
}

fn cells_value(mut words: Vec<u32>) -> PropertyValue {
    match words.len() {
        0 => PropertyValue::Empty,
        1 => PropertyValue::U32(words.remove(0)),
        _ => PropertyValue::U32List(words),
    }
}

fn cell_width(name: &str, bits: u32) -> Result<usize, DtsError> {
    match bits {
        8 => Ok(1),
        16 => Ok(2),
        32 => Ok(4),
        64 => Ok(8),
        _ => Err(DtsError::Expression(format!("`{name}`: unsupported /bits/ {bits}"))),
    }
}

fn eval_cell(name: &str, cell: &Cell<'_>) -> Result<u64, DtsError> {
    match cell {
        Cell::Expr(expr) => expr
            .eval()
            .map_err(|e| DtsError::Expression(format!("`{name}`: {e}"))),
        Cell::Ref(target) => Err(DtsError::Expression(format!(
            "`{name}`: reference to `{}` needs 32-bit cells",
            target.target()
        ))),
    }
}

fn high_word(v: u64) -> u32 {
    let b = v.to_be_bytes();
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

fn low_word(v: u64) -> u32 {
    let b = v.to_be_bytes();
    u32::from_be_bytes([b[4], b[5], b[6], b[7]])
}

/// Processes C-style escapes in a string literal.
fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('a') => out.push('\x07'),
            Some('b') => out.push('\x08'),
            Some('f') => out.push('\x0c'),
            Some('v') => out.push('\x0b'),
            Some('x') => {
                let mut digits = String::new();
                while digits.len() < 2 && chars.peek().is_some_and(char::is_ascii_hexdigit) {
                    digits.extend(chars.next());
                }
                push_code(&mut out, &digits, 16);
            }
            Some(d @ '0'..='7') => {
                let mut digits = String::from(d);
                while digits.len() < 3 && chars.peek().is_some_and(|c| ('0'..='7').contains(c)) {
                    digits.extend(chars.next());
                }
                push_code(&mut out, &digits, 8);
            }
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn push_code(out: &mut String, digits: &str, radix: u32) {
    if let Some(c) = u8::from_str_radix(digits, radix).ok().map(char::from) {
        out.push(c);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dts::parser::parse;

    fn build(source: &str) -> DeviceTree {
        lower(parse(source).unwrap()).unwrap()
    }

    #[test]
    fn escapes() {
        assert_eq!(unescape(r#"a\"b\\c\n\x41\101"#), "a\"b\\c\nAA");
    }

    #[test]
    fn forward_references_resolve() {
        let tree = build(
            "/dts-v1/;\n/ {\n    dev { interrupt-parent = <&gic>; ref = &gic; };\n    gic: intc { };\n};",
        );
        let gic = tree.find_node("/intc").unwrap();
        let phandle = tree.node(gic).phandle().unwrap();
        let dev = tree.node(tree.find_node("/dev").unwrap());
        assert_eq!(dev.property("interrupt-parent").unwrap().as_u32(), Some(phandle));
        assert_eq!(dev.property("ref").unwrap().as_str(), Some("/intc"));
        assert!(dev.unresolved().is_empty());
    }

    #[test]
    fn overrides_and_deletes() {
        let tree = build(
            "/ { uart: serial@10 { status = \"okay\"; }; gone: gone {}; };\n\
             &uart { status = \"disabled\"; /delete-property/ missing; };\n\
             &{/serial@10} { extra; };\n\
             /delete-node/ &gone;",
        );
        let uart = tree.node(tree.find_node("/serial@10").unwrap());
        assert_eq!(uart.property("status").unwrap().as_str(), Some("disabled"));
        assert_eq!(uart.property("extra").unwrap().value(), &PropertyValue::Empty);
        assert!(tree.find_node("/gone").is_none());
    }

    #[test]
    fn explicit_phandles_are_lifted() {
        let tree = build("/ { a { phandle = <0x7>; }; b { p = <&{/a} 1>; }; };");
        let a = tree.node(tree.find_node("/a").unwrap());
        assert_eq!(a.phandle(), Some(7));
        assert!(a.property("phandle").is_none());
        let b = tree.node(tree.find_node("/b").unwrap());
        assert_eq!(b.property("p").unwrap().value(), &PropertyValue::U32List(vec![7, 1]));
    }

    #[test]
    fn value_shapes() {
        let tree = build(
            "/ { n { s = \"a\", \"b\"; w = /bits/ 64 <0x100000002>; by = /bits/ 8 <1 2>; \
             mix = \"x\", <1>; e = <>; }; };",
        );
        let n = tree.node(tree.find_node("/n").unwrap());
        assert_eq!(
            n.property("s").unwrap().value(),
            &PropertyValue::StrList(vec!["a".into(), "b".into()])
        );
        assert_eq!(n.property("w").unwrap().value(), &PropertyValue::U32List(vec![1, 2]));
        assert_eq!(n.property("by").unwrap().value(), &PropertyValue::Bytes(vec![1, 2]));
        assert_eq!(
            n.property("mix").unwrap().value(),
            &PropertyValue::Bytes(vec![b'x', 0, 0, 0, 0, 1])
        );
        assert_eq!(n.property("e").unwrap().value(), &PropertyValue::Empty);
    }

    #[test]
    fn unknown_references_keep_placeholder() {
        let tree = build("/ { a { p = <&nowhere>; }; };");
        let a = tree.node(tree.find_node("/a").unwrap());
        assert_eq!(a.property("p").unwrap().as_u32(), Some(PLACEHOLDER_PHANDLE));
        assert_eq!(a.unresolved().len(), 1);
    }

    #[test]
    fn override_of_unknown_label_fails() {
        let err = lower(parse("/ { };\n&missing { };").unwrap()).unwrap_err();
        assert!(matches!(err, DtsError::UnknownReference(label) if label == "missing"));
    }

    #[test]
    fn includes_are_rejected() {
        let err = lower(parse("#include \"board.dtsi\"\n/ { };").unwrap()).unwrap_err();
        assert!(matches!(err, DtsError::Include(path) if path == "board.dtsi"));
    }
}
