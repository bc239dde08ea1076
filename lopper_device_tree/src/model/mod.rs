// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A mutable, referenceable, in-memory representation of a device tree.
//!
//! This module provides the [`DeviceTree`] arena together with its live
//! [`Node`]s, the detached [`DeviceTreeNode`] used for templates and clones,
//! and typed [`DeviceTreeProperty`] values.
//!
//! # Index discipline
//!
//! Structural mutations (add, delete, rename, move, reorder) take effect in
//! the parent/child graph immediately, and [`DeviceTree::find_node`] and
//! [`DeviceTree::subnodes`] always see them. Lookups through the path,
//! label and phandle indices ([`DeviceTree::nodes`], [`DeviceTree::lnodes`],
//! [`DeviceTree::pnode`]) reflect the tree as of the last
//! [`DeviceTree::sync`] or [`DeviceTree::resolve`]; deleted nodes are never
//! returned. [`DeviceTree::is_dirty`] tells whether a sync is due.

use std::collections::HashSet;
use std::fmt;

use indexmap::IndexMap;
use log::{debug, trace, warn};
use regex::Regex;
use twox_hash::xxhash64;

use crate::error::{FdtError, TreeError};
use crate::fdt::Fdt;
use crate::{MemoryReservation, writer};

mod mutate;
mod node;
pub mod phandle;
pub mod prune;
mod property;

pub use node::{DeviceTreeNode, DeviceTreeNodeBuilder, Node, NodeId, RefKind, UnresolvedRef};
pub use phandle::PhandleDescriptors;
pub use property::{DeviceTreeProperty, PropertyValue, TypeHint, parse_u32};

type Index<K> = IndexMap<K, NodeId, xxhash64::State>;

fn index<K>() -> Index<K> {
    IndexMap::with_hasher(xxhash64::State::with_seed(0xdead_cafe))
}

/// A phandle-valued property whose phandle does not name any node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleReference {
    /// Path of the node holding the property.
    pub path: String,
    /// Name of the property.
    pub property: String,
    /// The phandle that points nowhere.
    pub phandle: u32,
}

/// The outcome of a [`DeviceTree::resolve`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Phandle-valued properties whose targets are gone. They are left
    /// unchanged.
    pub stale: Vec<StaleReference>,
    /// Label or path references that still name no node, with the path of
    /// the node holding them.
    pub unresolved: Vec<(String, UnresolvedRef)>,
}

/// A mutable, in-memory device tree.
///
/// Nodes are kept in an arena and addressed by [`NodeId`]. See the module
/// documentation for when the lookup indices are current.
///
/// # Examples
///
/// ```
/// # use lopper_device_tree::model::{DeviceTree, DeviceTreeNode};
/// let mut tree = DeviceTree::new();
/// tree.add(DeviceTreeNode::new("child"), "/a/child", false).unwrap();
/// assert!(tree.find_node("/a/child").is_some());
/// assert!(tree.nodes("/a/child").unwrap().is_empty());
/// tree.sync();
/// assert_eq!(tree.nodes("/a/child").unwrap().len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct DeviceTree {
    nodes: Vec<Option<Node>>,
    root: NodeId,
    path_index: Index<String>,
    label_index: Index<String>,
    phandle_index: Index<u32>,
    dirty: bool,
    /// The memory reservations for this device tree.
    pub memory_reservations: Vec<MemoryReservation>,
}

impl Default for DeviceTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceTree {
    /// Creates a tree holding only an empty root node.
    #[must_use]
    pub fn new() -> Self {
        Self::from_root(DeviceTreeNode::new(""))
    }

    /// Creates a tree from a detached root node and syncs it.
    ///
    /// References recorded on the nodes stay pending until
    /// [`resolve`](Self::resolve) runs.
    #[must_use]
    pub fn from_root(root: DeviceTreeNode) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            root: NodeId(0),
            path_index: index(),
            label_index: index(),
            phandle_index: index(),
            dirty: true,
            memory_reservations: Vec::new(),
        };
        let (mut root_node, children) = root.into_parts();
        root_node.name = String::new();
        tree.root = tree.alloc(root_node);
        for child in children {
            tree.insert_subtree(tree.root, child);
        }
        tree.sync();
        tree
    }

    /// Creates a new `DeviceTree` from a `Fdt`.
    ///
    /// # Errors
    ///
    /// Returns an error if the root node of the `Fdt` cannot be parsed.
    pub fn from_fdt(fdt: &Fdt<'_>) -> Result<Self, FdtError> {
        let root = DeviceTreeNode::try_from(fdt.root()?)?;
        let mut tree = Self::from_root(root);
        tree.memory_reservations = fdt.memory_reservations().collect();
        Ok(tree)
    }

    /// Serializes the `DeviceTree` to a flattened device tree blob.
    ///
    /// # Panics
    ///
    /// This may panic if any of the lengths written to the DTB (block sizes,
    /// property value length, etc.) exceed [`u32::MAX`].
    #[must_use]
    pub fn to_dtb(&self) -> Vec<u8> {
        writer::to_bytes(self)
    }

    pub(crate) fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(node));
        self.dirty = true;
        id
    }

    /// Returns the id of the root node.
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Returns whether the node is still part of the tree.
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Returns a live node, or `None` if it was deleted.
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    /// Returns a live node mutably, or `None` if it was deleted.
    #[must_use]
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Returns a live node.
    ///
    /// # Panics
    ///
    /// Panics if the node was deleted. Use [`get`](Self::get) when that is
    /// possible.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        self.get(id)
            .unwrap_or_else(|| panic!("node {id:?} is not part of the tree"))
    }

    /// Returns a live node mutably.
    ///
    /// # Panics
    ///
    /// Panics if the node was deleted.
    #[must_use]
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.get_mut(id)
            .unwrap_or_else(|| panic!("node {id:?} is not part of the tree"))
    }

    /// Returns whether the indices may be stale.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Returns the number of live nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// A tree always has a root, so it is never empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns every live node in depth-first pre-order, starting with the
    /// root.
    #[must_use]
    pub fn iter(&self) -> Vec<NodeId> {
        self.subnodes(self.root, None)
    }

    /// Computes the path of a node from the live graph.
    #[must_use]
    pub fn path_of(&self, id: NodeId) -> String {
        let mut components = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current.and_then(|id| self.get(id)) {
            if node.parent.is_some() {
                components.push(node.name.as_str());
            }
            current = node.parent;
        }
        components.reverse();
        format!("/{}", components.join("/"))
    }

    /// Finds a direct child by name.
    #[must_use]
    pub fn child_by_name(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.get(parent)?
            .children
            .iter()
            .copied()
            .find(|&c| self.get(c).is_some_and(|c| c.name == name))
    }

    /// Finds a node by its exact path, walking the live graph.
    ///
    /// # Performance
    ///
    /// This is linear in the number of children along the path, and it
    /// does not depend on the indices being current.
    #[must_use]
    pub fn find_node(&self, path: &str) -> Option<NodeId> {
        if !path.starts_with('/') {
            return None;
        }
        path.split('/')
            .filter(|s| !s.is_empty())
            .try_fold(self.root, |node, component| {
                self.child_by_name(node, component)
            })
    }

    /// Looks up nodes by path.
    ///
    /// An exact path match wins; otherwise `pattern` is a regular expression
    /// searched in every indexed path. May return 0, 1 or many nodes, in
    /// tree order.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::Regex`] if `pattern` is not a valid regex.
    pub fn nodes(&self, pattern: &str) -> Result<Vec<NodeId>, TreeError> {
        if let Some(&id) = self.path_index.get(pattern) {
            if self.contains(id) {
                return Ok(vec![id]);
            }
        }
        let re = Regex::new(pattern)?;
        Ok(self
            .path_index
            .iter()
            .filter(|&(path, &id)| self.contains(id) && re.is_match(path))
            .map(|(_, &id)| id)
            .collect())
    }

    /// Looks up nodes by label. An exact label wins; otherwise `pattern` is
    /// a regular expression searched in every label.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::Regex`] if `pattern` is not a valid regex.
    pub fn lnodes(&self, pattern: &str) -> Result<Vec<NodeId>, TreeError> {
        if let Some(id) = self.node_by_label(pattern) {
            return Ok(vec![id]);
        }
        let re = Regex::new(pattern)?;
        let mut found: Vec<NodeId> = Vec::new();
        for (label, &id) in &self.label_index {
            if self.contains(id) && re.is_match(label) && !found.contains(&id) {
                found.push(id);
            }
        }
        Ok(found)
    }

    /// Finds the node carrying exactly this label.
    #[must_use]
    pub fn node_by_label(&self, label: &str) -> Option<NodeId> {
        self.label_index
            .get(label)
            .copied()
            .filter(|&id| self.contains(id))
    }

    /// Finds the node carrying a phandle. Returns 0 or 1 node.
    #[must_use]
    pub fn pnode(&self, phandle: u32) -> Option<NodeId> {
        self.phandle_index
            .get(&phandle)
            .copied()
            .filter(|&id| self.get(id).is_some_and(|n| n.phandle == Some(phandle)))
    }

    /// Resolves a reference target: a label first, then an absolute path.
    #[must_use]
    pub fn deref(&self, target: &str) -> Option<NodeId> {
        let target = target.trim_start_matches('&');
        self.node_by_label(target).or_else(|| {
            if target.starts_with('/') {
                self.find_node(target)
            } else {
                None
            }
        })
    }

    /// Returns `start` and all of its descendants in depth-first pre-order,
    /// optionally keeping only those whose live path matches `pattern`.
    ///
    /// The list is fully materialized.
    #[must_use]
    pub fn subnodes(&self, start: NodeId, pattern: Option<&Regex>) -> Vec<NodeId> {
        let mut found = Vec::new();
        if !self.contains(start) {
            return found;
        }
        let mut stack = vec![(start, self.path_of(start))];
        while let Some((id, path)) = stack.pop() {
            let node = self.node(id);
            for &child in node.children.iter().rev() {
                if let Some(c) = self.get(child) {
                    let child_path = if path == "/" {
                        format!("/{}", c.name)
                    } else {
                        format!("{path}/{}", c.name)
                    };
                    stack.push((child, child_path));
                }
            }
            if pattern.is_none_or(|re| re.is_match(&path)) {
                found.push(id);
            }
        }
        found
    }

    /// Returns every node whose `compatible` matches the regex.
    #[must_use]
    pub fn find_compatible(&self, pattern: &Regex) -> Vec<NodeId> {
        self.iter()
            .into_iter()
            .filter(|&id| self.node(id).is_compatible(pattern))
            .collect()
    }

    /// Returns the ancestors of a node, nearest first, excluding the node.
    #[must_use]
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut current = self.get(id).and_then(|n| n.parent);
        while let Some(parent) = current {
            found.push(parent);
            current = self.get(parent).and_then(|n| n.parent);
        }
        found
    }

    /// Returns whether `ancestor` is `id` or one of its ancestors.
    #[must_use]
    pub fn is_ancestor_or_self(&self, ancestor: NodeId, id: NodeId) -> bool {
        id == ancestor || self.ancestors(id).contains(&ancestor)
    }

    /// Recomputes every path from the live graph and rebuilds the path,
    /// label and phandle indices.
    ///
    /// Calling `sync` twice without an intervening mutation yields identical
    /// indices.
    pub fn sync(&mut self) {
        let order = self.subnodes(self.root, None);
        let mut path_index = index();
        let mut label_index = index();
        let mut phandle_index = index();

        for id in order {
            let (path, depth) = match self.get(id).and_then(|n| n.parent) {
                Some(parent) => {
                    let parent = self.node(parent);
                    let path = if parent.parent.is_none() {
                        format!("/{}", self.node(id).name)
                    } else {
                        format!("{}/{}", parent.abs_path, self.node(id).name)
                    };
                    (path, parent.depth + 1)
                }
                None => ("/".to_owned(), 0),
            };

            let node = self.node_mut(id);
            node.abs_path.clone_from(&path);
            node.depth = depth;
            for label in &node.labels {
                if label_index.insert(label.clone(), id).is_some() {
                    warn!("label `{label}` is used more than once, {path} wins");
                }
            }
            if let Some(phandle) = node.phandle {
                if phandle_index.contains_key(&phandle) {
                    warn!("{path}: duplicate phandle {phandle:#x} ignored");
                } else {
                    phandle_index.insert(phandle, id);
                }
            }
            path_index.insert(path, id);
        }

        self.path_index = path_index;
        self.label_index = label_index;
        self.phandle_index = phandle_index;
        self.dirty = false;
        trace!("synced {} nodes", self.path_index.len());
    }

    /// Returns the paths in the index, in tree order.
    pub fn indexed_paths(&self) -> impl Iterator<Item = &str> {
        self.path_index.keys().map(String::as_str)
    }

    /// Syncs the tree, turns pending label and path references into phandles
    /// (assigning new phandles to targets that lack one), then checks every
    /// phandle-valued property against the phandle index.
    ///
    /// Properties pointing at missing nodes are reported and left unchanged.
    pub fn resolve(&mut self, descriptors: &PhandleDescriptors) -> Resolution {
        self.sync();
        let mut resolution = Resolution::default();

        let pending: Vec<NodeId> = self
            .iter()
            .into_iter()
            .filter(|&id| !self.node(id).unresolved.is_empty())
            .collect();
        for id in pending {
            let references = std::mem::take(&mut self.node_mut(id).unresolved);
            for reference in references {
                let Some(target) = self.deref(&reference.target) else {
                    debug!(
                        "{}: `{}` references unknown node `{}`",
                        self.node(id).abs_path,
                        reference.property,
                        reference.target
                    );
                    resolution
                        .unresolved
                        .push((self.node(id).abs_path.clone(), reference.clone()));
                    self.node_mut(id).unresolved.push(reference);
                    continue;
                };
                match reference.kind {
                    RefKind::Cell(cell) => {
                        let phandle = self.phandle_or_create(target);
                        if let Some(prop) = self.node_mut(id).property_mut(&reference.property) {
                            set_cell(prop, cell, phandle);
                        }
                    }
                    RefKind::Path => {
                        let path = self.node(target).abs_path.clone();
                        self.node_mut(id).set(&reference.property, path);
                    }
                }
            }
        }

        for id in self.iter() {
            let node = self.node(id);
            for prop in node.properties() {
                for (_, phandle) in descriptors.phandles(self, id, prop) {
                    if phandle == 0 || phandle == u32::MAX || self.pnode(phandle).is_some() {
                        continue;
                    }
                    trace!("{}: `{}` points at missing phandle {phandle:#x}", node.abs_path, prop.name());
                    resolution.stale.push(StaleReference {
                        path: node.abs_path.clone(),
                        property: prop.name().to_owned(),
                        phandle,
                    });
                }
            }
        }
        resolution
    }

    /// Returns a phandle that no live node uses: one more than the largest,
    /// or the lowest unused one once that would reach `u32::MAX`, which is
    /// not a valid phandle. Returns 0 if every phandle is taken.
    #[must_use]
    pub fn phandle_gen(&self) -> u32 {
        let phandles = || self.nodes.iter().flatten().filter_map(|n| n.phandle);
        let next = phandles()
            .filter(|&p| p != u32::MAX)
            .max()
            .unwrap_or(0)
            .saturating_add(1);
        if next != u32::MAX {
            return next;
        }
        let used: HashSet<u32> = phandles().collect();
        (1..u32::MAX).find(|p| !used.contains(p)).unwrap_or(0)
    }

    /// Returns the phandle of a node, assigning a fresh one if it has none.
    /// The phandle index is updated immediately.
    pub fn phandle_or_create(&mut self, id: NodeId) -> u32 {
        if let Some(phandle) = self.node(id).phandle {
            return phandle;
        }
        let phandle = self.phandle_gen();
        self.node_mut(id).phandle = Some(phandle);
        self.phandle_index.insert(phandle, id);
        debug!("{}: assigned phandle {phandle:#x}", self.node(id).abs_path);
        phandle
    }

    /// Exports a node and its subtree as a detached node, keeping phandles.
    #[must_use]
    pub fn export(&self, id: NodeId) -> DeviceTreeNode {
        let node = self.node(id);
        let children = node
            .children
            .iter()
            .filter(|&&c| self.contains(c))
            .map(|&c| self.export(c))
            .collect();
        DeviceTreeNode::from_parts(node, children)
    }

    /// Deep-copies a node and its subtree into a detached node with a new
    /// identity: phandles and reference counts are not carried over.
    #[must_use]
    pub fn clone_node(&self, id: NodeId) -> DeviceTreeNode {
        let mut copy = self.export(id);
        copy.clear_phandles();
        copy
    }
}

fn set_cell(prop: &mut DeviceTreeProperty, cell: usize, phandle: u32) {
    match prop.value().clone() {
        PropertyValue::U32(_) if cell == 0 => prop.set(phandle),
        PropertyValue::U32List(mut cells) if cell < cells.len() => {
            cells[cell] = phandle;
            prop.set(cells);
        }
        PropertyValue::Bytes(mut bytes) if (cell + 1) * 4 <= bytes.len() => {
            bytes[cell * 4..(cell + 1) * 4].copy_from_slice(&phandle.to_be_bytes());
            prop.set(PropertyValue::Bytes(bytes));
        }
        other => warn!(
            "`{}`: cannot store phandle in cell {cell} of {other:?}",
            prop.name()
        ),
    }
}

impl PartialEq for DeviceTree {
    fn eq(&self, other: &Self) -> bool {
        self.memory_reservations == other.memory_reservations
            && self.export(self.root) == other.export(other.root)
    }
}

impl Eq for DeviceTree {}

impl fmt::Display for DeviceTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::dts::write_tree(f, self)
    }
}
