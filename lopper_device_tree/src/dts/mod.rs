// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Device tree source (DTS) text: parsing into a [`DeviceTree`] and printing
//! one back.
//!
//! The parser understands the dtc source syntax without a C preprocessor:
//! labels, `&label` and `&{/path}` references (in cells or as whole path
//! values), node overrides, `/delete-node/` and `/delete-property/`,
//! `/memreserve/`, `/bits/`, byte strings and parenthesized integer
//! expressions. `#include` and `/include/` are rejected with
//! [`DtsError::Include`].
//!
//! Printing goes through [`DeviceTree`]'s `Display` implementation.
//!
//! # Examples
//!
//! ```
//! let tree = lopper_device_tree::dts::parse(
//!     "/dts-v1/;\n/ { gic: intc { }; dev { interrupt-parent = <&gic>; }; };",
//! )
//! .unwrap();
//! let dev = tree.node(tree.find_node("/dev").unwrap());
//! let gic = tree.node(tree.find_node("/intc").unwrap());
//! assert_eq!(dev.property("interrupt-parent").unwrap().as_u32(), gic.phandle());
//! assert!(tree.to_string().contains("gic: intc {"));
//! ```

mod ast;
mod lower;
mod parser;
mod printer;

pub use printer::node_to_dts;
pub(crate) use printer::write_tree;

use crate::error::DtsError;
use crate::model::DeviceTree;

/// Parses DTS source text into a synced, resolved [`DeviceTree`].
///
/// Cell references whose target does not exist are logged and keep the
/// placeholder `0xffffffff`; they stay listed in
/// [`Node::unresolved`](crate::model::Node::unresolved).
///
/// # Errors
///
/// Returns [`DtsError::Syntax`] for malformed text, [`DtsError::Include`]
/// for include directives, [`DtsError::UnknownReference`] for overrides or
/// deletions of unknown nodes, and [`DtsError::Expression`] for integer
/// expressions that cannot be evaluated.
pub fn parse(source: &str) -> Result<DeviceTree, DtsError> {
    lower::lower(parser::parse(source)?)
}
