// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `modify = "path:prop:val"`: property and node edits.

use log::{debug, info, warn};
use lopper_device_tree::error::TreeError;
use lopper_device_tree::model::{DeviceTree, DeviceTreeNode, NodeId, PropertyValue};
use regex::Regex;

use super::{Invocation, value};
use crate::context::PipelineContext;
use crate::error::{LopperError, Result};
use crate::rule::Rule;

/// An empty path targets the invocation's start node when another rule
/// runs this one, and the current selection otherwise.
pub(super) fn run(
    ctx: &mut PipelineContext,
    rule: &Rule<'_>,
    invocation: &Invocation,
) -> Result<bool> {
    let expr = rule.require("modify")?;
    let mut parts = expr.splitn(3, ':');
    let (Some(path), Some(prop), Some(val)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(LopperError::malformed(
            rule.path(),
            format!("`{expr}` is not of the form path:prop:val"),
        ));
    };
    let only = rule
        .string("nodes")
        .map(|re| Regex::new(&re))
        .transpose()
        .map_err(|e| LopperError::malformed(rule.path(), e.to_string()))?;
    info!("{}: modify `{path}` `{prop}` `{val}`", rule.path());

    ctx.sync();
    let tree_name = rule.string("tree");
    let selection = match (&tree_name, &invocation.start_node) {
        (None, Some(start)) => super::find(ctx, start).into_iter().collect(),
        (None, None) => ctx.selection(),
        (Some(_), _) => Vec::new(),
    };
    let numeric = value::numeric_name(prop, &ctx.descriptors);
    let tree = ctx.tree_mut(tree_name.as_deref(), rule.path())?;

    if path.is_empty() && selection.is_empty() {
        warn!("{}: no nodes given and no nodes are selected", rule.path());
        return Ok(false);
    }

    if prop.is_empty() {
        let target = if path.is_empty() {
            selection.first().copied()
        } else {
            tree.find_node(path)
        };
        let target = target.ok_or_else(|| TreeError::NodeNotFound(path.to_owned()))?;
        return node_operation(tree, target, val).map(|()| true);
    }

    let mut targets = if val.is_empty() {
        // Deletions apply to the whole subtree below an explicit path.
        if path.is_empty() {
            selection
        } else {
            tree.find_node(path)
                .map(|id| tree.subnodes(id, None))
                .unwrap_or_default()
        }
    } else if path.is_empty() {
        selection
    } else {
        tree.nodes(path)?
    };
    if let Some(only) = &only {
        targets.retain(|&id| only.is_match(&tree.path_of(id)));
    }

    if val.is_empty() {
        for id in targets {
            if tree.delete_property(id, prop).is_none() {
                debug!("{}: no `{prop}` to delete", tree.path_of(id));
            }
        }
        return Ok(true);
    }

    if targets.is_empty() {
        warn!("{}: `{path}` not found, `{prop}` not modified", rule.path());
    }
    let replacement = if val.contains('&') {
        reference_value(tree, rule, val)
    } else {
        value::convert(val, numeric)
            .map_err(|reason| LopperError::malformed(rule.path(), reason))?
    };
    for id in targets {
        tree.set_property(id, prop, replacement.clone())?;
    }
    Ok(true)
}

/// Resolves `&node` to the node's phandle, allocating one if needed, and
/// `&node#prop` to the value of `prop` on that node. The node is looked up
/// in the tree being modified, then in the rule file.
fn reference_value(tree: &mut DeviceTree, rule: &Rule<'_>, val: &str) -> PropertyValue {
    let (target, prop) = match val.split_once('#') {
        Some((target, prop)) => (target, Some(prop)),
        None => (val, None),
    };
    let target = target.replace('&', "");

    if let Some(id) = lookup(tree, &target) {
        let found = prop
            .and_then(|p| tree.node(id).property(p))
            .map(|p| p.value().clone());
        return match (found, prop) {
            (Some(found), _) => found,
            (None, Some(_)) => tree.node(id).phandle().unwrap_or_default().into(),
            (None, None) => tree.phandle_or_create(id).into(),
        };
    }

    let rules = rule.file().tree();
    if let Some(id) = lookup(rules, &target) {
        let node = rules.node(id);
        return match prop.and_then(|p| node.property(p)) {
            Some(found) => found.value().clone(),
            None => node.phandle().unwrap_or_default().into(),
        };
    }

    warn!("{}: reference `{val}` not found", rule.path());
    PropertyValue::U32(0)
}

fn lookup(tree: &DeviceTree, target: &str) -> Option<NodeId> {
    let by_path = tree.nodes(target).unwrap_or_default();
    by_path
        .first()
        .copied()
        .or_else(|| tree.lnodes(target).ok()?.first().copied())
}

/// Deletes a node (empty `val`), or renames and moves it so that it ends up
/// at the path `val`.
fn node_operation(tree: &mut DeviceTree, id: NodeId, val: &str) -> Result<()> {
    if val.is_empty() {
        debug!("deleting {}", tree.path_of(id));
        return tree.delete(id).map_err(LopperError::from_tree);
    }

    let source = tree.path_of(id);
    let dest = if val.starts_with('/') {
        val.to_owned()
    } else {
        format!("/{val}")
    };
    let (dest_parent, dest_name) = match dest.rsplit_once('/') {
        Some(("", name)) => ("/", name),
        Some((parent, name)) => (parent, name),
        None => ("/", dest.as_str()),
    };
    if dest_name.is_empty() {
        return Err(TreeError::InvalidPath(dest.clone()).into());
    }

    if let Some(existing) = tree.find_node(&dest).filter(|&existing| existing != id) {
        debug!("deleting {dest} to make room for {source}");
        tree.delete(existing).map_err(LopperError::from_tree)?;
    }

    let current_parent = tree.node(id).parent();
    let parent = match tree.find_node(dest_parent) {
        Some(parent) => parent,
        None => tree
            .add(DeviceTreeNode::new(""), dest_parent, true)
            .map_err(LopperError::from_tree)?,
    };
    if Some(parent) != current_parent {
        debug!("moving {source} below {dest_parent}");
        tree.move_node(id, parent).map_err(LopperError::from_tree)?;
    }
    if tree.node(id).name() != dest_name {
        debug!("renaming {source} to {dest_name}");
        tree.rename(id, dest_name).map_err(LopperError::from_tree)?;
    }
    Ok(())
}
