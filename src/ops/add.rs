// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use log::info;
use lopper_device_tree::error::TreeError;

use super::Invocation;
use crate::context::PipelineContext;
use crate::error::{LopperError, Result};
use crate::rule::Rule;

/// `add`: copies the template node `node_src` (a child of the rule) into the
/// tree at `node_dest`, `/<node_src>` by default.
pub(super) fn run(ctx: &mut PipelineContext, rule: &Rule<'_>, _: &Invocation) -> Result<bool> {
    let src = rule.require("node_src")?;
    let dest = rule.string("node_dest").unwrap_or_else(|| format!("/{src}"));
    let merge = match rule.value("merge") {
        None => false,
        Some(value) => value.as_u32().is_none_or(|v| v != 0),
    };

    let rules = rule.file().tree();
    let template = rules
        .find_node(&format!("{}/{src}", rule.path()))
        .ok_or_else(|| TreeError::NodeNotFound(format!("{}/{src}", rule.path())))?;
    let node = rules.clone_node(template);
    info!("{}: adding {src} at {dest}", rule.path());

    let descriptors = ctx.descriptors.clone();
    let tree = ctx.tree_mut(rule.string("tree").as_deref(), rule.path())?;
    tree.add_with(node, &dest, merge, &descriptors)
        .map_err(LopperError::from_tree)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use lopper_device_tree::model::DeviceTree;

    use super::super::testing::*;
    use super::*;

    #[test]
    fn template_lands_at_destination() {
        let mut ctx = context();
        let file = rules(
            r#"
            lop_0 {
                compatible = "system-device-tree-v1,lop,add";
                node_src = "foo";
                node_dest = "/new/foo";
                foo {
                    bar = <1>;
                    inner { status = "okay"; };
                };
            };
            lop_1 {
                compatible = "system-device-tree-v1,lop,add";
                node_src = "amba";
                amba { compatible = "simple-bus"; };
            };
            "#,
        );
        assert_eq!(run_all(&mut ctx, &file), [true, true]);

        let tree = &ctx.tree;
        assert!(tree.find_node("/new").is_some());
        let foo = tree.find_node("/new/foo").unwrap();
        assert_eq!(tree.node(foo).get("bar").unwrap().as_u32(), Some(1));
        assert!(tree.find_node("/new/foo/inner").is_some());
        assert!(tree.find_node("/amba").is_some());
        // The rule file keeps its template.
        assert!(file.tree().find_node("/lops/lop_0/foo").is_some());
    }

    #[test]
    fn merge_or_conflict() {
        let mut ctx = context();
        let file = rules(
            r#"
            lop_0 {
                compatible = "system-device-tree-v1,lop,add";
                node_src = "cpu@0";
                node_dest = "/cpus/cpu@0";
                cpu@0 { status = "disabled"; };
            };
            lop_1 {
                compatible = "system-device-tree-v1,lop,add";
                node_src = "cpu@0";
                node_dest = "/cpus/cpu@0";
                merge;
                cpu@0 { status = "disabled"; };
            };
            "#,
        );
        let rules: Vec<_> = file.rules().collect();
        let err = super::super::execute(&mut ctx, &rules[0], &Invocation::default()).unwrap_err();
        assert!(matches!(err, LopperError::StructuralConflict(_)));

        assert!(super::super::execute(&mut ctx, &rules[1], &Invocation::default()).unwrap());
        ctx.sync();
        let cpu = ctx.tree.find_node("/cpus/cpu@0").unwrap();
        assert_eq!(ctx.tree.node(cpu).get("status").unwrap().as_str(), Some("disabled"));
        assert_eq!(
            ctx.tree.node(cpu).get("compatible").unwrap().as_str(),
            Some("arm,cortex-a53")
        );
    }

    #[test]
    fn into_a_named_tree() {
        let mut ctx = context();
        ctx.insert_subtree("extra", DeviceTree::new());
        let file = rules(
            r#"
            lop_0 {
                compatible = "system-device-tree-v1,lop,add";
                node_src = "foo";
                tree = "extra";
                foo { bar = <2>; };
            };
            lop_1 {
                compatible = "system-device-tree-v1,lop,add";
                node_src = "missing";
            };
            "#,
        );
        let rules: Vec<_> = file.rules().collect();
        assert!(super::super::execute(&mut ctx, &rules[0], &Invocation::default()).unwrap());
        ctx.sync();
        assert!(ctx.subtree("extra").unwrap().find_node("/foo").is_some());
        assert!(ctx.tree.find_node("/foo").is_none());

        let err = super::super::execute(&mut ctx, &rules[1], &Invocation::default()).unwrap_err();
        assert!(matches!(err, LopperError::NotFound(e) if e.is_not_found()));
    }
}
