// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use lopper_device_tree::dts;
use lopper_device_tree::error::DtsError;
use lopper_device_tree::fdt::Fdt;
use lopper_device_tree::model::{DeviceTree, PropertyValue};

const SYSTEM: &str = r#"
/dts-v1/;

/memreserve/ 0x80000000 0x10000;

/ {
    #address-cells = <2>;
    #size-cells = <2>;
    model = "Test \"board\"";

    cpus_a53: cpus-cluster@0 {
        #address-cells = <1>;
        #size-cells = <0>;

        cpu@0 {
            compatible = "arm,cortex-a53";
            reg = <0x0>;
        };

        cpu@1 {
            compatible = "arm,cortex-a53";
            reg = <(0x0 + 1)>;
        };
    };

    amba: bus@f1000000 {
        compatible = "simple-bus";
        ranges;

        gic: interrupt-controller@f9000000 {
            interrupt-controller;
            #interrupt-cells = <3>;
        };

        uart0: serial@ff000000 {
            compatible = "arm,pl011", "arm,primecell";
            reg = <0x0 0xff000000 0x0 0x1000>;
            interrupt-parent = <&gic>;
            interrupts = <0 21 4>;
            status = "okay";
            local-mac-address = [00 0a 35 00 22 01];
        };
    };

    chosen {
        stdout-path = &uart0;
    };
};

&uart0 {
    status = "disabled";
};
"#;

fn parse() -> DeviceTree {
    dts::parse(SYSTEM).unwrap()
}

#[test]
fn parsed_tree_is_indexed_and_resolved() {
    let tree = parse();
    assert!(!tree.is_dirty());

    let uart = tree.node_by_label("uart0").unwrap();
    assert_eq!(tree.node(uart).abs_path(), "/bus@f1000000/serial@ff000000");
    assert_eq!(
        tree.node(uart).property("status").unwrap().as_str(),
        Some("disabled")
    );

    let gic = tree.node_by_label("gic").unwrap();
    let phandle = tree.node(gic).phandle().unwrap();
    assert_eq!(tree.pnode(phandle), Some(gic));
    assert_eq!(
        tree.node(uart).property("interrupt-parent").unwrap().as_u32(),
        Some(phandle)
    );

    let chosen = tree.find_node("/chosen").unwrap();
    assert_eq!(
        tree.node(chosen).property("stdout-path").unwrap().as_str(),
        Some("/bus@f1000000/serial@ff000000")
    );
    assert_eq!(
        tree.node(tree.find_node("/cpus-cluster@0/cpu@1").unwrap())
            .property("reg")
            .unwrap()
            .as_u32(),
        Some(1)
    );
    assert_eq!(
        tree.node(tree.root()).property("model").unwrap().as_str(),
        Some("Test \"board\"")
    );
    assert_eq!(tree.memory_reservations.len(), 1);
}

#[test]
fn printed_text_parses_back_to_the_same_tree() {
    let tree = parse();
    let text = tree.to_string();
    let reparsed = dts::parse(&text).unwrap();
    assert_eq!(reparsed, tree);
    assert_eq!(reparsed.to_string(), text);
}

#[test]
fn text_and_blob_agree() {
    let tree = parse();
    let from_blob = DeviceTree::from_fdt(&Fdt::new(&tree.to_dtb()).unwrap()).unwrap();

    // Labels only exist in source form.
    let uart = from_blob.find_node("/bus@f1000000/serial@ff000000").unwrap();
    assert!(from_blob.node(uart).labels().is_empty());
    assert_eq!(
        from_blob.node(uart).property("local-mac-address").unwrap().value(),
        &PropertyValue::Bytes(vec![0x00, 0x0a, 0x35, 0x00, 0x22, 0x01])
    );
    assert_eq!(
        from_blob.node(uart).property("compatible").unwrap().value(),
        tree.node(tree.node_by_label("uart0").unwrap())
            .property("compatible")
            .unwrap()
            .value()
    );
}

#[test]
fn node_snippets() {
    let tree = parse();
    let gic = tree.node_by_label("gic").unwrap();
    let text = dts::node_to_dts(&tree, gic);
    assert!(text.starts_with("gic: interrupt-controller@f9000000 {\n"));
    assert!(text.contains("    interrupt-controller;\n"));
    assert!(text.ends_with("};\n"));
}

#[test]
fn errors() {
    assert!(matches!(
        dts::parse("/ { a = <1> };"),
        Err(DtsError::Syntax { line: 1, .. })
    ));
    assert!(matches!(
        dts::parse("/ { };\n/delete-node/ &nope;"),
        Err(DtsError::UnknownReference(_))
    ));
    assert!(matches!(
        dts::parse("/ { a = <(1 / 0)>; };"),
        Err(DtsError::Expression(_))
    ));
}
