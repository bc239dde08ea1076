// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `output` and `tree`: copy a selection of nodes into a new tree, and write
//! it to a file or keep it under a name.

use log::{debug, info, warn};
use lopper_device_tree::error::TreeError;
use lopper_device_tree::model::{DeviceTree, DeviceTreeNode, DeviceTreeProperty, NodeId};

use super::Invocation;
use crate::context::PipelineContext;
use crate::error::{LopperError, Result};
use crate::io;
use crate::rule::Rule;

/// What a `nodes` list picked.
#[derive(Debug)]
enum Picked {
    Everything,
    Nodes(Vec<NodeId>),
}

pub(super) fn output(ctx: &mut PipelineContext, rule: &Rule<'_>, _: &Invocation) -> Result<bool> {
    let outfile = rule.require("outfile")?;
    let Some(mut tree) = extract(ctx, rule, rule.string("tree").as_deref())? else {
        warn!("{}: nothing to write to {outfile}", rule.path());
        return Ok(false);
    };

    if ctx.options.dryrun {
        info!("dryrun, not writing {outfile}");
        return Ok(true);
    }
    let path = io::output_path(&ctx.options.outdir, &outfile);
    ctx.write_tree(&path, Some(&mut tree))
}

pub(super) fn tree(ctx: &mut PipelineContext, rule: &Rule<'_>, _: &Invocation) -> Result<bool> {
    let name = rule.require("tree")?;
    let Some(tree) = extract(ctx, rule, None)? else {
        warn!("{}: no nodes for tree {name}", rule.path());
        return Ok(false);
    };
    ctx.insert_subtree(name, tree);
    Ok(true)
}

/// Copies the nodes picked by the rule out of the system tree or a named
/// subtree. Returns `None` if the rule picks nothing.
fn extract(
    ctx: &mut PipelineContext,
    rule: &Rule<'_>,
    tree_name: Option<&str>,
) -> Result<Option<DeviceTree>> {
    ctx.sync();
    let patterns = rule.strings("nodes");
    let selection = match tree_name {
        None => ctx.selection(),
        Some(_) => Vec::new(),
    };
    let source: &DeviceTree = ctx.tree_mut(tree_name, rule.path())?;

    let picked = if patterns.is_empty() {
        Picked::Nodes(selection)
    } else if patterns.iter().any(|p| p == "*") {
        Picked::Everything
    } else {
        let mut found = Vec::new();
        for pattern in &patterns {
            for id in pick(source, pattern) {
                if !found.contains(&id) {
                    found.push(id);
                }
            }
        }
        Picked::Nodes(found)
    };

    Ok(match picked {
        Picked::Everything => {
            let mut copy = DeviceTree::from_root(source.export(source.root()));
            copy.memory_reservations.clone_from(&source.memory_reservations);
            Some(copy)
        }
        Picked::Nodes(nodes) if nodes.is_empty() => None,
        Picked::Nodes(nodes) => Some(copy_nodes(source, &nodes).map_err(LopperError::from_tree)?),
    })
}

/// Resolves one `regex[:prop[:val]]` entry of a `nodes` list. A pattern
/// without any `/` is a node name and may appear anywhere in the tree; a
/// pattern that matches no path is tried as a label.
fn pick(tree: &DeviceTree, entry: &str) -> Vec<NodeId> {
    let mut parts = entry.splitn(3, ':');
    let regex = parts.next().unwrap_or_default();
    let prop = parts.next().unwrap_or_default();
    let val = parts.next().unwrap_or_default();

    let regex = if regex.contains('/') {
        regex.to_owned()
    } else {
        format!(".*{regex}")
    };
    let mut nodes = tree.nodes(&regex).unwrap_or_else(|e| {
        warn!("{entry}: {e}");
        Vec::new()
    });
    if nodes.is_empty() {
        nodes = tree.lnodes(&regex).unwrap_or_default();
    }

    if prop.is_empty() {
        return nodes;
    }
    let pattern = DeviceTreeProperty::new(prop, val);
    nodes.retain(|&id| {
        tree.node(id)
            .property(prop)
            .is_some_and(|p| val.is_empty() || pattern.compare(p, false))
    });
    nodes
}

/// Builds a tree holding deep copies of `nodes`. Their ancestors come along
/// with their properties but without their other children.
fn copy_nodes(source: &DeviceTree, nodes: &[NodeId]) -> std::result::Result<DeviceTree, TreeError> {
    let mut out = DeviceTree::new();
    out.memory_reservations.clone_from(&source.memory_reservations);
    out.add(shell(source, source.root()), "/", true)?;

    for &id in nodes {
        if source
            .ancestors(id)
            .iter()
            .any(|ancestor| nodes.contains(ancestor))
        {
            continue;
        }
        let mut ancestors = source.ancestors(id);
        ancestors.reverse();
        for &ancestor in ancestors.iter().skip(1) {
            let path = source.path_of(ancestor);
            if out.find_node(&path).is_none() {
                out.add(shell(source, ancestor), &path, false)?;
            }
        }
        let path = source.path_of(id);
        debug!("output: copying {path}");
        if id == source.root() {
            out.add(source.export(id), "/", true)?;
        } else {
            out.add(source.export(id), &path, true)?;
        }
    }
    out.sync();
    Ok(out)
}

/// A copy of a node without its children.
fn shell(source: &DeviceTree, id: NodeId) -> DeviceTreeNode {
    let mut node = source.export(id);
    let children: Vec<String> = node.children().map(|c| c.name().to_owned()).collect();
    for child in children {
        node.remove_child(&child);
    }
    node
}
