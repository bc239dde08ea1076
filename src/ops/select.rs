// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `select`: narrows or widens the current selection.
//!
//! Each `select*` property holds one or more `regex:prop:val` terms. A term
//! with a node regex adds the nodes it matches (an OR with earlier terms);
//! a term without one filters what is already selected (an AND).

use log::debug;
use lopper_device_tree::model::{DeviceTree, DeviceTreeProperty, NodeId};

use super::{Invocation, value};
use crate::context::PipelineContext;
use crate::error::{LopperError, Result};
use crate::rule::Rule;

/// One parsed selection term.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Term<'a> {
    node_regex: &'a str,
    prop: &'a str,
    val: &'a str,
}

impl<'a> Term<'a> {
    fn parse(text: &'a str) -> Self {
        let parts: Vec<&str> = text.split(':').collect();
        match parts.as_slice() {
            [node_regex, prop, val] => Self {
                node_regex,
                prop,
                val,
            },
            _ => Self {
                node_regex: text,
                prop: "",
                val: "",
            },
        }
    }
}

pub(super) fn run(ctx: &mut PipelineContext, rule: &Rule<'_>, _: &Invocation) -> Result<bool> {
    ctx.sync();
    let names: Vec<&str> = rule
        .node()
        .properties()
        .map(DeviceTreeProperty::name)
        .filter(|name| name.starts_with("select"))
        .collect();

    let mut selected: Vec<NodeId> = Vec::new();
    let mut possible: Vec<NodeId> = Vec::new();
    for name in names {
        let terms = rule.strings(name);
        if terms.iter().all(String::is_empty) {
            debug!("{}: clearing the selection", rule.path());
            ctx.set_selection(Vec::new());
            continue;
        }
        for text in &terms {
            let term = Term::parse(text);
            debug!("{}: selecting {text}", rule.path());
            apply(ctx, rule, &term, &mut selected, &mut possible)?;
        }
        possible.clone_from(&selected);
    }

    debug!("{}: {} nodes selected", rule.path(), selected.len());
    let found = !selected.is_empty();
    ctx.set_selection(selected);
    Ok(found)
}

fn apply(
    ctx: &PipelineContext,
    rule: &Rule<'_>,
    term: &Term<'_>,
    selected: &mut Vec<NodeId>,
    possible: &mut Vec<NodeId>,
) -> Result<()> {
    let tree = &ctx.tree;
    let and = term.node_regex.is_empty();
    if and {
        *possible = if selected.is_empty() {
            ctx.selection()
        } else {
            selected.clone()
        };
    } else {
        let found = if term.node_regex.starts_with('/') {
            tree.nodes(term.node_regex)?
        } else {
            tree.lnodes(term.node_regex)?
        };
        possible.extend(found);
    }

    if term.prop.is_empty() {
        if term.val.is_empty() {
            selected.clone_from(possible);
        }
        return Ok(());
    }

    if term.val.is_empty() {
        let (prop, wanted) = match term.prop.strip_prefix('!') {
            Some(prop) => (prop, false),
            None => (term.prop, true),
        };
        for &id in possible.iter() {
            keep(selected, id, has(tree, id, prop) == wanted);
        }
        return Ok(());
    }

    let (val, invert) = match term.val.strip_prefix('!') {
        Some(val) => (val, true),
        None => (term.val, false),
    };
    let pattern = DeviceTreeProperty::new(
        term.prop,
        value::convert(val, value::numeric_name(term.prop, &ctx.descriptors))
            .map_err(|reason| LopperError::malformed(rule.path(), reason))?,
    );
    for &id in possible.iter() {
        match tree.node(id).property(term.prop) {
            Some(candidate) if pattern.compare(candidate, invert) => keep(selected, id, true),
            // Only filtering terms drop nodes.
            _ if and => keep(selected, id, false),
            _ => {}
        }
    }
    Ok(())
}

fn has(tree: &DeviceTree, id: NodeId, prop: &str) -> bool {
    tree.node(id).property(prop).is_some()
}

fn keep(selected: &mut Vec<NodeId>, id: NodeId, wanted: bool) {
    if wanted {
        if !selected.contains(&id) {
            selected.push(id);
        }
    } else {
        selected.retain(|&s| s != id);
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;

    #[test]
    fn terms() {
        assert_eq!(
            Term::parse("/cpus.*:status:okay"),
            Term {
                node_regex: "/cpus.*",
                prop: "status",
                val: "okay"
            }
        );
        assert_eq!(Term::parse("/soc").node_regex, "/soc");
        assert_eq!(Term::parse(":compatible:").prop, "compatible");
    }

    #[test]
    fn chained_selects_narrow() {
        let mut ctx = context();
        let file = rules(
            r#"
            lop_0 {
                compatible = "system-device-tree-v1,lop,select-v1";
                select_1;
                select_2 = "/cpus.*:status:okay";
                select_3 = ":compatible:arm,cortex-a53";
            };
            "#,
        );
        assert_eq!(run_all(&mut ctx, &file), [true]);
        assert_eq!(
            paths(&ctx, &ctx.selection()),
            ["/cpus/cpu@0", "/cpus/cpu@1"]
        );
    }

    #[test]
    fn later_rules_filter_the_selection() {
        let mut ctx = context();
        let file = rules(
            r#"
            lop_0 {
                compatible = "system-device-tree-v1,lop,select-v1";
                select_1 = "/cpus/cpu@.*:status:okay";
            };
            lop_1 {
                compatible = "system-device-tree-v1,lop,select-v1";
                select_1 = ":compatible:!arm,cortex-a53";
            };
            lop_2 {
                compatible = "system-device-tree-v1,lop,select-v1";
                select_1 = ":compatible:nothing-like-this";
            };
            "#,
        );
        assert_eq!(run_all(&mut ctx, &file), [true, true, false]);
        assert!(ctx.selection().is_empty());
    }

    #[test]
    fn or_by_path_and_label() {
        let mut ctx = context();
        let file = rules(
            r#"
            lop_0 {
                compatible = "system-device-tree-v1,lop,select-v1";
                select_1 = "/cpus/cpu@2";
                select_2 = "uart1";
            };
            "#,
        );
        assert_eq!(run_all(&mut ctx, &file), [true]);
        assert_eq!(
            paths(&ctx, &ctx.selection()),
            ["/cpus/cpu@2", "/soc/serial@2000"]
        );
    }

    #[test]
    fn property_existence() {
        let mut ctx = context();
        let file = rules(
            r#"
            lop_0 {
                compatible = "system-device-tree-v1,lop,select-v1";
                select_1 = "/soc/.*::";
                select_2 = ":reg:";
            };
            lop_1 {
                compatible = "system-device-tree-v1,lop,select-v1";
                select_1 = "/.*::";
                select_2 = ":!compatible:";
            };
            "#,
        );
        let rules: Vec<_> = file.rules().collect();
        assert!(super::super::execute(&mut ctx, &rules[0], &Invocation::default()).unwrap());
        assert_eq!(
            paths(&ctx, &ctx.selection()),
            ["/soc/serial@1000", "/soc/serial@2000"]
        );

        ctx.set_selection(Vec::new());
        assert!(super::super::execute(&mut ctx, &rules[1], &Invocation::default()).unwrap());
        assert_eq!(paths(&ctx, &ctx.selection()), ["/", "/cpus"]);
    }

    #[test]
    fn numeric_looking_strings_and_cells() {
        let mut ctx = context();
        let uart1 = ctx.tree.find_node("/soc/serial@2000").unwrap();
        ctx.tree.set_property(uart1, "port", "10").unwrap();
        let file = rules(
            r#"
            lop_0 {
                compatible = "system-device-tree-v1,lop,select-v1";
                select_1 = "/soc/.*:port:10";
            };
            lop_1 {
                compatible = "system-device-tree-v1,lop,select-v1";
                select_1;
                select_2 = "/cpus/.*:reg:<1>";
            };
            "#,
        );
        let rules: Vec<_> = file.rules().collect();
        assert!(super::super::execute(&mut ctx, &rules[0], &Invocation::default()).unwrap());
        assert_eq!(paths(&ctx, &ctx.selection()), ["/soc/serial@2000"]);
        assert!(super::super::execute(&mut ctx, &rules[1], &Invocation::default()).unwrap());
        assert_eq!(paths(&ctx, &ctx.selection()), ["/cpus/cpu@1"]);
    }
}
