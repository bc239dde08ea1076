// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use log::warn;
use lopper_device_tree::dts::node_to_dts;
use lopper_device_tree::model::{DeviceTree, DeviceTreeProperty, PropertyValue};

use super::Invocation;
use crate::context::PipelineContext;
use crate::error::Result;
use crate::rule::Rule;

/// `print`: writes every `print*` property to stdout. Strings are printed as
/// they are, except `&label` or `&/path` which print that node; cells are
/// phandles of nodes to print.
pub(super) fn run(ctx: &mut PipelineContext, rule: &Rule<'_>, _: &Invocation) -> Result<bool> {
    ctx.sync();
    for prop in rule
        .node()
        .properties()
        .filter(|p| p.name().starts_with("print"))
    {
        for line in render(&ctx.tree, prop) {
            println!("{line}");
        }
    }
    Ok(true)
}

fn render(tree: &DeviceTree, prop: &DeviceTreeProperty) -> Vec<String> {
    let node = |found: Option<_>, what: &dyn std::fmt::Display| match found {
        Some(id) => Some(node_to_dts(tree, id)),
        None => {
            warn!("{}: no node for {what}", prop.name());
            None
        }
    };
    match prop.value() {
        PropertyValue::Str(_) | PropertyValue::StrList(_) => prop
            .value()
            .strings()
            .into_iter()
            .filter_map(|line| match line.strip_prefix('&') {
                Some(target) => node(tree.deref(target), &line),
                None => Some(line.to_owned()),
            })
            .collect(),
        PropertyValue::U32(_) | PropertyValue::U32List(_) => prop
            .value()
            .cells()
            .into_iter()
            .filter_map(|phandle| node(tree.pnode(phandle), &format!("phandle {phandle:#x}")))
            .collect(),
        PropertyValue::Empty | PropertyValue::Bytes(_) => Vec::new(),
    }
}
