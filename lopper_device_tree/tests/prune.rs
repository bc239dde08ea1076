// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use lopper_device_tree::dts;
use lopper_device_tree::model::{DeviceTree, PhandleDescriptors, prune};

fn domain() -> DeviceTree {
    dts::parse(
        r#"/ {
    cpus {
        cpu@0 { };
        cpu@1 { };
        cpu@2 { };
    };
    clk: clock { #clock-cells = <1>; };
    amba {
        gic: intc { };
        uart@0 { clocks = <&clk 3>; interrupt-parent = <&gic>; };
        uart@1 { };
        spi@0 { };
    };
};"#,
    )
    .unwrap()
}

#[test]
fn unmarked_nodes_are_pruned_and_marked_ancestors_kept() {
    let mut tree = domain();
    let cpus = tree.find_node("/cpus").unwrap();
    let cpu1 = tree.find_node("/cpus/cpu@1").unwrap();

    let deleted = prune::prune(&mut tree, cpus, &[cpu1], |_, _| true);
    assert_eq!(deleted, ["/cpus/cpu@0", "/cpus/cpu@2"]);
    assert!(tree.contains(cpus));
    assert!(tree.contains(cpu1));
    assert!(tree.find_node("/amba/uart@1").is_some());
}

#[test]
fn referenced_nodes_survive() {
    let mut tree = domain();
    let root = tree.root();
    let uart = tree.find_node("/amba/uart@0").unwrap();
    let descriptors = PhandleDescriptors::default();

    prune::reset(&mut tree, root);
    let marked = tree.ref_all(uart, true, &descriptors);
    assert!(marked.contains(&tree.node_by_label("clk").unwrap()));
    assert!(marked.contains(&tree.node_by_label("gic").unwrap()));
    assert!(marked.contains(&tree.find_node("/amba").unwrap()));

    let amba = tree.find_node("/amba").unwrap();
    let deleted = prune::filter_unreferenced(&mut tree, amba, |_, _| true);
    assert_eq!(deleted, ["/amba/uart@1", "/amba/spi@0"]);

    for id in tree.iter() {
        for ancestor in tree.ancestors(id) {
            assert!(tree.contains(ancestor));
        }
    }
}

#[test]
fn marking_through_a_property() {
    let mut tree = domain();
    let root = tree.root();
    let uart = tree.find_node("/amba/uart@0").unwrap();
    prune::reset(&mut tree, root);
    let marked = prune::mark_references(
        &mut tree,
        root,
        uart,
        "clocks",
        &PhandleDescriptors::default(),
        true,
    )
    .unwrap();
    assert_eq!(marked, [tree.node_by_label("clk").unwrap()]);
    assert_eq!(tree.node(marked[0]).ref_count(), 1);
}
