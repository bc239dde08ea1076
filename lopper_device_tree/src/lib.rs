// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A mutable, referenceable device tree model with codecs for flattened
//! device tree blobs (DTB) and device tree source (DTS).
//!
//! - [`fdt`] is a read-only, zero-copy view of a DTB.
//! - [`model`] holds the [`DeviceTree`](model::DeviceTree) arena: nodes
//!   addressed by [`NodeId`](model::NodeId), path, label and phandle
//!   indices, structural edits, phandle resolution and reference-counted
//!   pruning.
//! - [`dts`] parses DTS text into a tree and prints one back.
//!
//! # Examples
//!
//! ```
//! use lopper_device_tree::fdt::Fdt;
//! use lopper_device_tree::model::{DeviceTree, DeviceTreeNode, DeviceTreeProperty};
//!
//! let mut tree = DeviceTree::new();
//! let child = DeviceTreeNode::builder("child")
//!     .property(DeviceTreeProperty::new("my-property", "hello"))
//!     .build();
//! tree.add(child, "/child", false).unwrap();
//!
//! let dtb = tree.to_dtb();
//! let fdt = Fdt::new(&dtb).unwrap();
//! let node = fdt.find_node("/child").unwrap().unwrap();
//! let prop = node.property("my-property").unwrap().unwrap();
//! assert_eq!(prop.as_str().unwrap(), "hello");
//!
//! let reparsed = DeviceTree::from_fdt(&fdt).unwrap();
//! assert_eq!(reparsed, tree);
//! println!("{reparsed}");
//! ```

#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod dts;
pub mod error;
pub mod fdt;
pub mod memreserve;
pub mod model;
mod writer;

pub use memreserve::MemoryReservation;
