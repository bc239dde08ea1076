// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use lopper_device_tree::dts;
use lopper_device_tree::error::TreeError;
use lopper_device_tree::model::{
    DeviceTree, DeviceTreeNode, DeviceTreeProperty, PhandleDescriptors, PropertyValue,
};
use regex::Regex;

fn soc() -> DeviceTree {
    dts::parse(
        r#"/dts-v1/;
/ {
    cpus {
        cpu0: cpu@0 { compatible = "arm,cortex-a72"; };
        cpu1: cpu@1 { compatible = "arm,cortex-a72"; };
    };
    amba {
        gic: interrupt-controller { interrupt-controller; };
        serial@0 { interrupt-parent = <&gic>; };
        serial@1 { interrupt-parent = <&gic>; };
    };
};"#,
    )
    .unwrap()
}

#[test]
fn sync_is_idempotent() {
    let mut tree = soc();
    let before: Vec<String> = tree.indexed_paths().map(str::to_owned).collect();
    tree.sync();
    tree.sync();
    let after: Vec<String> = tree.indexed_paths().map(str::to_owned).collect();
    assert_eq!(before, after);
    assert_eq!(after[0], "/");
    assert_eq!(after.len(), tree.len());
}

#[test]
fn indices_follow_sync() {
    let mut tree = soc();
    let serial = tree.find_node("/amba/serial@1").unwrap();
    tree.rename(serial, "uart@1").unwrap();
    assert!(tree.is_dirty());

    // The live graph sees the rename right away, the index does not.
    assert_eq!(tree.find_node("/amba/uart@1"), Some(serial));
    assert!(tree.nodes("/amba/uart@1").unwrap().is_empty());

    tree.sync();
    assert_eq!(tree.nodes("/amba/uart@1").unwrap(), vec![serial]);
    assert_eq!(tree.node(serial).abs_path(), "/amba/uart@1");

    let cpus = tree.nodes("cpu@").unwrap();
    assert_eq!(cpus.len(), 2);
    assert_eq!(tree.lnodes("cpu[01]").unwrap(), cpus);
    assert!(matches!(tree.nodes("("), Err(TreeError::Regex(_))));
}

#[test]
fn deleted_nodes_disappear_from_lookups() {
    let mut tree = soc();
    let amba = tree.find_node("/amba").unwrap();
    let gic = tree.node_by_label("gic").unwrap();
    let phandle = tree.node(gic).phandle().unwrap();

    tree.delete(amba).unwrap();
    assert!(!tree.contains(gic));
    assert_eq!(tree.node_by_label("gic"), None);
    assert_eq!(tree.pnode(phandle), None);
    assert!(tree.nodes("/amba").unwrap().is_empty());
    assert!(matches!(
        tree.delete(tree.root()),
        Err(TreeError::RootImmutable(_))
    ));
}

#[test]
fn references_stay_consistent() {
    let mut tree = soc();
    let resolution = tree.resolve(&PhandleDescriptors::default());
    assert!(resolution.stale.is_empty());
    assert!(resolution.unresolved.is_empty());

    for id in tree.iter() {
        let node = tree.node(id);
        if let Some(phandle) = node.phandle() {
            assert_eq!(tree.pnode(phandle), Some(id));
        }
        for label in node.labels() {
            assert_eq!(tree.node_by_label(label), Some(id));
        }
    }

    let gic = tree.node_by_label("gic").unwrap();
    let phandle = tree.node(gic).phandle().unwrap();
    tree.delete(gic).unwrap();
    let resolution = tree.resolve(&PhandleDescriptors::default());
    let stale: Vec<_> = resolution.stale.iter().map(|s| s.path.as_str()).collect();
    assert_eq!(stale, ["/amba/serial@0", "/amba/serial@1"]);
    assert!(resolution.stale.iter().all(|s| s.phandle == phandle));

    // Stale values are reported, never rewritten.
    let serial = tree.find_node("/amba/serial@0").unwrap();
    assert_eq!(
        tree.node(serial).property("interrupt-parent").unwrap().as_u32(),
        Some(phandle)
    );
}

#[test]
fn add_creates_merges_and_conflicts() {
    let mut tree = soc();
    let node = DeviceTreeNode::builder("ignored")
        .property(DeviceTreeProperty::new("reg", vec![0x1000, 0x10]))
        .build();
    let added = tree.add(node, "/amba/new/timer@1000", false).unwrap();
    assert_eq!(tree.path_of(added), "/amba/new/timer@1000");

    let again = DeviceTreeNode::new("timer@1000");
    assert!(matches!(
        tree.add(again.clone(), "/amba/new/timer@1000", false),
        Err(TreeError::StructuralConflict(_))
    ));

    let update = DeviceTreeNode::builder("timer@1000")
        .label("timer")
        .property(DeviceTreeProperty::new("status", "okay"))
        .build();
    assert_eq!(tree.add(update, "/amba/new/timer@1000", true).unwrap(), added);
    let timer = tree.node(added);
    assert_eq!(timer.property("status").unwrap().as_str(), Some("okay"));
    assert_eq!(
        timer.property("reg").unwrap().value(),
        &PropertyValue::U32List(vec![0x1000, 0x10])
    );
    tree.sync();
    assert_eq!(tree.node_by_label("timer"), Some(added));

    assert!(matches!(
        tree.add(again, "amba", false),
        Err(TreeError::InvalidPath(_))
    ));
}

#[test]
fn clones_get_a_new_identity() {
    let mut tree = soc();
    let gic = tree.node_by_label("gic").unwrap();
    let copy = tree.clone_node(gic);
    assert_eq!(copy.phandle(), None);
    assert_eq!(copy.labels(), ["gic"]);

    let exported = tree.export(gic);
    assert_eq!(exported.phandle(), tree.node(gic).phandle());

    let mut copy = copy;
    copy.set_name("interrupt-controller@2");
    let added = tree.add_child(tree.find_node("/amba").unwrap(), copy).unwrap();
    assert_ne!(added, gic);
}

#[test]
fn move_and_reorder() {
    let mut tree = soc();
    let cpus = tree.find_node("/cpus").unwrap();
    let serial = tree.find_node("/amba/serial@0").unwrap();
    tree.move_node(serial, cpus).unwrap();
    assert_eq!(tree.path_of(serial), "/cpus/serial@0");

    tree.reorder_child("/cpus/serial@0", "/cpus/cpu@0", false).unwrap();
    let order: Vec<&str> = tree
        .node(cpus)
        .children()
        .iter()
        .map(|&c| tree.node(c).name())
        .collect();
    assert_eq!(order, ["serial@0", "cpu@0", "cpu@1"]);

    assert!(matches!(
        tree.reorder_child("/cpus/cpu@0", "/amba/serial@1", true),
        Err(TreeError::NotSiblings(..))
    ));
}

#[test]
fn queries() {
    let tree = soc();
    let a72 = Regex::new("cortex-a72").unwrap();
    assert_eq!(tree.find_compatible(&a72).len(), 2);

    let amba = tree.find_node("/amba").unwrap();
    let serials = tree.subnodes(amba, Some(&Regex::new("serial").unwrap()));
    assert_eq!(serials.len(), 2);
    assert_eq!(tree.subnodes(amba, None)[0], amba);

    let serial = serials[0];
    assert_eq!(tree.ancestors(serial), [amba, tree.root()]);
    assert!(tree.is_ancestor_or_self(amba, serial));
    assert!(!tree.is_ancestor_or_self(serial, amba));
}
