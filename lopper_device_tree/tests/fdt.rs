// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use lopper_device_tree::MemoryReservation;
use lopper_device_tree::error::FdtErrorKind;
use lopper_device_tree::fdt::Fdt;
use lopper_device_tree::model::{DeviceTree, DeviceTreeNode, DeviceTreeProperty, PropertyValue};

fn board() -> DeviceTree {
    let mut tree = DeviceTree::from_root(
        DeviceTreeNode::builder("")
            .property(DeviceTreeProperty::new("#address-cells", 2u32))
            .property(DeviceTreeProperty::new("#size-cells", 2u32))
            .property(DeviceTreeProperty::new(
                "compatible",
                &["vendor,board", "vendor,soc"][..],
            ))
            .child(
                DeviceTreeNode::builder("intc@f9000000")
                    .phandle(1)
                    .property(DeviceTreeProperty::empty("interrupt-controller"))
                    .property(DeviceTreeProperty::new("#interrupt-cells", 3u32))
                    .build(),
            )
            .child(
                DeviceTreeNode::builder("serial@ff000000")
                    .property(DeviceTreeProperty::new("reg", vec![0, 0xff00_0000, 0, 0x1000]))
                    .property(DeviceTreeProperty::new("interrupt-parent", 1u32))
                    .property(DeviceTreeProperty::new("status", "okay"))
                    .property(DeviceTreeProperty::new(
                        "mac",
                        PropertyValue::Bytes(vec![0x00, 0x0a, 0x35, 0x01, 0x02]),
                    ))
                    .build(),
            )
            .build(),
    );
    tree.memory_reservations
        .push(MemoryReservation::new(0x1000_0000, 0x2000));
    tree
}

#[test]
fn read_written_blob() {
    let dtb = board().to_dtb();
    let fdt = Fdt::new(&dtb).unwrap();

    let root = fdt.root().unwrap();
    assert_eq!(root.name().unwrap(), "");
    let names: Vec<_> = root.children().map(|c| c.unwrap().name().unwrap()).collect();
    assert_eq!(names, ["intc@f9000000", "serial@ff000000"]);

    let serial = fdt.find_node("/serial@ff000000").unwrap().unwrap();
    assert_eq!(
        serial.property("status").unwrap().unwrap().as_str().unwrap(),
        "okay"
    );
    assert_eq!(
        serial.property("interrupt-parent").unwrap().unwrap().as_u32().unwrap(),
        1
    );
    assert!(serial.property("missing").unwrap().is_none());

    let intc = fdt.find_node("/intc@f9000000").unwrap().unwrap();
    assert_eq!(intc.property("phandle").unwrap().unwrap().as_u32().unwrap(), 1);

    assert_eq!(
        fdt.memory_reservations().collect::<Vec<_>>(),
        [MemoryReservation::new(0x1000_0000, 0x2000)]
    );
}

#[test]
fn model_survives_blob_round_trip() {
    let tree = board();
    let dtb = tree.to_dtb();
    let reparsed = DeviceTree::from_fdt(&Fdt::new(&dtb).unwrap()).unwrap();
    assert_eq!(reparsed, tree);
    assert_eq!(reparsed.to_dtb(), dtb);

    let intc = reparsed.find_node("/intc@f9000000").unwrap();
    assert_eq!(reparsed.pnode(1), Some(intc));
}

#[test]
fn rejects_garbage() {
    let mut dtb = board().to_dtb();
    dtb[0] = 0;
    assert_eq!(Fdt::new(&dtb).unwrap_err().kind, FdtErrorKind::InvalidMagic);

    let dtb = board().to_dtb();
    assert!(Fdt::new(&dtb[..dtb.len() - 8]).is_err());
    assert!(Fdt::new(&[0xd0, 0x0d]).is_err());
}
