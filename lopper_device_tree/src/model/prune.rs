// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Reference-counted pruning.
//!
//! A prune pass runs in three steps over the subtree rooted at a *scope*
//! node:
//!
//! 1. [`reset`] sets the reference count of every node in scope to zero.
//! 2. [`mark`] (or [`mark_references`]) increments the count of each wanted
//!    node and of every ancestor up to, but not including, the scope node.
//! 3. [`filter_unreferenced`] deletes the nodes with a count of zero or less
//!    that a guard selects. Several filter passes with different guards may
//!    share one marking.
//!
//! [`prune`] composes the three.

use log::{debug, warn};

use super::{DeviceTree, NodeId, PhandleDescriptors};
use crate::error::TreeError;

/// Sets the reference count of every node in the subtree at `scope` to zero.
pub fn reset(tree: &mut DeviceTree, scope: NodeId) {
    for id in tree.subnodes(scope, None) {
        tree.node_mut(id).reset_ref();
    }
}

/// Marks each target and its ancestors below `scope`.
///
/// Targets outside of `scope` are marked themselves, together with all of
/// their ancestors except the root.
pub fn mark(tree: &mut DeviceTree, scope: NodeId, targets: &[NodeId]) {
    for &target in targets {
        if !tree.contains(target) {
            continue;
        }
        tree.node_mut(target).inc_ref();
        for ancestor in tree.ancestors(target) {
            if ancestor == scope || ancestor == tree.root() {
                break;
            }
            tree.node_mut(ancestor).inc_ref();
        }
    }
}

/// Marks every node referenced by phandle from property `property` of
/// `node`, as laid out by the descriptor table.
///
/// Returns the marked targets. A phandle that names no node is logged and
/// skipped, or fails the call when `strict` is set.
///
/// # Errors
///
/// Returns [`TreeError::PhandleNotFound`] for a dangling phandle when
/// `strict` is set, and [`TreeError::PropertyNotFound`] if `node` has no
/// such property.
pub fn mark_references(
    tree: &mut DeviceTree,
    scope: NodeId,
    node: NodeId,
    property: &str,
    descriptors: &PhandleDescriptors,
    strict: bool,
) -> Result<Vec<NodeId>, TreeError> {
    let owner = tree
        .get(node)
        .ok_or_else(|| TreeError::NodeNotFound(format!("{node:?}")))?;
    let prop = owner.get(property)?;

    let mut targets = Vec::new();
    for (_, phandle) in descriptors.phandles(tree, node, prop) {
        match tree.pnode(phandle) {
            Some(target) => targets.push(target),
            None if strict => return Err(TreeError::PhandleNotFound(phandle)),
            None => warn!(
                "{}: `{property}` references missing phandle {phandle:#x}",
                owner.abs_path()
            ),
        }
    }
    mark(tree, scope, &targets);
    Ok(targets)
}

/// Deletes every node below `scope` whose reference count is zero or less
/// and for which `guard` holds. Returns the deleted paths.
///
/// Nodes are judged on the counts as they are before any deletion.
pub fn filter_unreferenced<G>(tree: &mut DeviceTree, scope: NodeId, mut guard: G) -> Vec<String>
where
    G: FnMut(&DeviceTree, NodeId) -> bool,
{
    let deleted = tree.filter(scope, |tree, id| {
        id != scope && tree.node(id).ref_count() <= 0 && guard(tree, id)
    });
    debug!("pruned {} nodes", deleted.len());
    deleted
}

/// Runs a whole prune pass: reset the scope, mark `marks` and their
/// ancestors, then delete unreferenced nodes selected by `guard`.
///
/// After the pass a node in scope survives iff it was marked, is an
/// ancestor of a survivor, or is rejected by the guard.
pub fn prune<G>(tree: &mut DeviceTree, scope: NodeId, marks: &[NodeId], guard: G) -> Vec<String>
where
    G: FnMut(&DeviceTree, NodeId) -> bool,
{
    reset(tree, scope);
    mark(tree, scope, marks);
    filter_unreferenced(tree, scope, guard)
}

#[cfg(test)]
mod tests {
    use regex::Regex;

    use super::*;
    use crate::model::{DeviceTreeNode, DeviceTreeProperty};

    fn bus(name: &str) -> DeviceTreeNode {
        DeviceTreeNode::builder(name)
            .property(DeviceTreeProperty::new("compatible", "simple-bus"))
            .child(DeviceTreeNode::new("a"))
            .child(
                DeviceTreeNode::builder("b")
                    .child(DeviceTreeNode::new("leaf"))
                    .build(),
            )
            .build()
    }

    #[test]
    fn marked_leaf_keeps_ancestors() {
        let mut tree = DeviceTree::from_root(DeviceTreeNode::builder("").child(bus("bus")).build());
        let scope = tree.root();
        let leaf = tree.find_node("/bus/b/leaf").unwrap();
        let deleted = prune(&mut tree, scope, &[leaf], |_, _| true);
        assert_eq!(deleted, ["/bus/a"]);
        assert!(tree.find_node("/bus/b/leaf").is_some());
    }

    #[test]
    fn guard_limits_deletion() {
        let mut tree = DeviceTree::from_root(DeviceTreeNode::builder("").child(bus("bus")).build());
        let scope = tree.root();
        let simple_bus = Regex::new("simple-bus").unwrap();
        let deleted = prune(&mut tree, scope, &[], |tree, id| {
            tree.node(id).is_compatible(&simple_bus)
        });
        assert_eq!(deleted, ["/bus"]);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn strict_marking_fails_on_dangling_phandle() {
        let mut tree = DeviceTree::from_root(
            DeviceTreeNode::builder("")
                .child(
                    DeviceTreeNode::builder("domain")
                        .property(DeviceTreeProperty::new("access", vec![0x42, 0]))
                        .build(),
                )
                .build(),
        );
        let root = tree.root();
        let domain = tree.find_node("/domain").unwrap();
        let descriptors = PhandleDescriptors::default();
        let relaxed = mark_references(&mut tree, root, domain, "access", &descriptors, false);
        assert!(relaxed.unwrap().is_empty());
        let strict = mark_references(&mut tree, root, domain, "access", &descriptors, true);
        assert!(matches!(strict, Err(TreeError::PhandleNotFound(0x42))));
    }
}
