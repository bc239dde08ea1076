// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Structural mutation of a [`DeviceTree`] and the tree-wide reference count
//! helpers.

use std::collections::HashSet;

use log::{debug, info, warn};

use super::{
    DeviceTree, DeviceTreeNode, DeviceTreeProperty, Node, NodeId, PhandleDescriptors,
    PropertyValue, set_cell,
};
use crate::error::TreeError;

impl DeviceTree {
    /// Adds a detached node (and its subtree) at `path`, which names the
    /// node itself. The node takes the last path component as its name.
    ///
    /// Missing intermediate nodes are created. If a node already exists at
    /// `path`, `merge` decides: the incoming properties overwrite the
    /// existing ones and children are merged recursively, or the add fails.
    /// Incoming phandles that are already used in the tree are renumbered,
    /// and the cells referring to them inside the incoming subtree follow.
    /// Phandle cells are found through the default descriptor table; see
    /// [`add_with`](Self::add_with).
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::InvalidPath`] for a malformed path and
    /// [`TreeError::StructuralConflict`] if the destination exists and
    /// `merge` is false.
    pub fn add(&mut self, node: DeviceTreeNode, path: &str, merge: bool) -> Result<NodeId, TreeError> {
        self.add_with(node, path, merge, &PhandleDescriptors::default())
    }

    /// [`add`](Self::add), with the phandle cells of the incoming subtree
    /// laid out by `descriptors`.
    ///
    /// # Errors
    ///
    /// As for [`add`](Self::add).
    pub fn add_with(
        &mut self,
        mut node: DeviceTreeNode,
        path: &str,
        merge: bool,
        descriptors: &PhandleDescriptors,
    ) -> Result<NodeId, TreeError> {
        let components = split_path(path)?;
        PhandleMap::new(self, &node, descriptors).fixup_node(&mut node);

        let Some((name, parents)) = components.split_last() else {
            if !merge {
                return Err(TreeError::StructuralConflict("/".to_owned()));
            }
            let root = self.root;
            self.merge_into(root, node);
            return Ok(root);
        };

        let mut parent = self.root;
        for component in parents {
            parent = match self.child_by_name(parent, component) {
                Some(child) => child,
                None => {
                    debug!("add: creating intermediate node {component}");
                    self.insert_subtree(parent, DeviceTreeNode::new(*component))
                }
            };
        }

        node.set_name(*name);
        if let Some(existing) = self.child_by_name(parent, name) {
            if !merge {
                return Err(TreeError::StructuralConflict(self.path_of(existing)));
            }
            self.merge_into(existing, node);
            return Ok(existing);
        }
        Ok(self.insert_subtree(parent, node))
    }

    /// Appends a detached node as the last child of `parent`.
    ///
    /// Paths and indices are not updated until the next
    /// [`sync`](Self::sync).
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::NodeNotFound`] if `parent` was deleted and
    /// [`TreeError::StructuralConflict`] if it already has a child of the
    /// same name.
    pub fn add_child(&mut self, parent: NodeId, node: DeviceTreeNode) -> Result<NodeId, TreeError> {
        if !self.contains(parent) {
            return Err(TreeError::NodeNotFound(format!("{parent:?}")));
        }
        if let Some(existing) = self.child_by_name(parent, node.name()) {
            return Err(TreeError::StructuralConflict(self.path_of(existing)));
        }
        let mut node = node;
        PhandleMap::new(self, &node, &PhandleDescriptors::default()).fixup_node(&mut node);
        Ok(self.insert_subtree(parent, node))
    }

    pub(crate) fn insert_subtree(&mut self, parent: NodeId, node: DeviceTreeNode) -> NodeId {
        let (mut live, children) = node.into_parts();
        live.parent = Some(parent);
        let id = self.alloc(live);
        self.node_mut(parent).children.push(id);
        for child in children {
            self.insert_subtree(id, child);
        }
        id
    }

    fn merge_into(&mut self, existing: NodeId, incoming: DeviceTreeNode) {
        let (live, children) = incoming.into_parts();
        let Node {
            labels,
            phandle,
            properties,
            unresolved,
            ..
        } = live;

        let target = self.node_mut(existing);
        for label in labels {
            target.add_label(label);
        }
        if target.phandle.is_none() {
            target.phandle = phandle;
        }
        for property in properties.into_values() {
            target
                .unresolved
                .retain(|r| r.property != property.name());
            target.add_property(property);
        }
        target.unresolved.extend(unresolved);

        for child in children {
            match self.child_by_name(existing, child.name()) {
                Some(id) => self.merge_into(id, child),
                None => {
                    self.insert_subtree(existing, child);
                }
            }
        }
        self.mark_dirty();
    }

    /// Deletes a node and all of its descendants.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::RootImmutable`] for the root node and
    /// [`TreeError::NodeNotFound`] if the node is already gone.
    pub fn delete(&mut self, id: NodeId) -> Result<(), TreeError> {
        if id == self.root {
            return Err(TreeError::RootImmutable("deleted"));
        }
        let Some(parent) = self.get(id).map(|n| n.parent) else {
            return Err(TreeError::NodeNotFound(format!("{id:?}")));
        };
        debug!("deleting {}", self.path_of(id));
        let doomed = self.subnodes(id, None);
        if let Some(parent) = parent.and_then(|p| self.get_mut(p)) {
            parent.children.retain(|&c| c != id);
        }
        for id in doomed {
            self.nodes[id.0] = None;
        }
        self.mark_dirty();
        Ok(())
    }

    /// Renames a node, keeping its position among its siblings.
    ///
    /// # Errors
    ///
    /// Fails for the root, for a deleted node, and when a sibling already
    /// carries `name`.
    pub fn rename(&mut self, id: NodeId, name: &str) -> Result<(), TreeError> {
        if id == self.root {
            return Err(TreeError::RootImmutable("renamed"));
        }
        if name.is_empty() || name.contains('/') {
            return Err(TreeError::InvalidPath(name.to_owned()));
        }
        let parent = self
            .get(id)
            .and_then(|n| n.parent)
            .ok_or_else(|| TreeError::NodeNotFound(format!("{id:?}")))?;
        if let Some(sibling) = self.child_by_name(parent, name) {
            if sibling != id {
                return Err(TreeError::StructuralConflict(self.path_of(sibling)));
            }
        }
        debug!("renaming {} to {name}", self.path_of(id));
        self.node_mut(id).name = name.to_owned();
        self.mark_dirty();
        Ok(())
    }

    /// Moves a node (with its subtree) to the end of `new_parent`'s
    /// children.
    ///
    /// # Errors
    ///
    /// Fails for the root, for deleted nodes, when `new_parent` lies in the
    /// moved subtree, and when `new_parent` already has a child of that name.
    pub fn move_node(&mut self, id: NodeId, new_parent: NodeId) -> Result<(), TreeError> {
        if id == self.root {
            return Err(TreeError::RootImmutable("moved"));
        }
        if !self.contains(new_parent) {
            return Err(TreeError::NodeNotFound(format!("{new_parent:?}")));
        }
        let old_parent = self
            .get(id)
            .and_then(|n| n.parent)
            .ok_or_else(|| TreeError::NodeNotFound(format!("{id:?}")))?;
        if self.is_ancestor_or_self(id, new_parent) {
            return Err(TreeError::CyclicMove(self.path_of(id)));
        }
        if old_parent == new_parent {
            return Ok(());
        }
        let name = self.node(id).name.clone();
        if let Some(existing) = self.child_by_name(new_parent, &name) {
            return Err(TreeError::StructuralConflict(self.path_of(existing)));
        }

        debug!(
            "moving {} under {}",
            self.path_of(id),
            self.path_of(new_parent)
        );
        self.node_mut(old_parent).children.retain(|&c| c != id);
        self.node_mut(new_parent).children.push(id);
        self.node_mut(id).parent = Some(new_parent);
        self.mark_dirty();
        Ok(())
    }

    /// Moves the child at `path_a` right after (or before) its sibling at
    /// `path_b` in their parent's child list.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::NodeNotFound`] if either path does not exist and
    /// [`TreeError::NotSiblings`] if they have different parents.
    pub fn reorder_child(&mut self, path_a: &str, path_b: &str, after: bool) -> Result<(), TreeError> {
        let a = self
            .find_node(path_a)
            .ok_or_else(|| TreeError::NodeNotFound(path_a.to_owned()))?;
        let b = self
            .find_node(path_b)
            .ok_or_else(|| TreeError::NodeNotFound(path_b.to_owned()))?;
        let parent = self.node(a).parent;
        if parent.is_none() || parent != self.node(b).parent {
            return Err(TreeError::NotSiblings(path_a.to_owned(), path_b.to_owned()));
        }
        if a == b {
            return Ok(());
        }
        let Some(parent) = parent else {
            return Ok(());
        };

        let children = &mut self.node_mut(parent).children;
        children.retain(|&c| c != a);
        let Some(anchor) = children.iter().position(|&c| c == b) else {
            return Err(TreeError::NotSiblings(path_a.to_owned(), path_b.to_owned()));
        };
        children.insert(if after { anchor + 1 } else { anchor }, a);
        self.mark_dirty();
        Ok(())
    }

    /// Creates or overwrites a property on a node.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::NodeNotFound`] if the node was deleted.
    pub fn set_property(
        &mut self,
        id: NodeId,
        name: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<(), TreeError> {
        let node = self
            .get_mut(id)
            .ok_or_else(|| TreeError::NodeNotFound(format!("{id:?}")))?;
        let value = value.into();
        debug!("{}: {name} = {value}", node.abs_path);
        node.unresolved.retain(|r| r.property != name);
        node.set(name, value);
        Ok(())
    }

    /// Removes a property from a node. A missing property is logged, not an
    /// error.
    pub fn delete_property(&mut self, id: NodeId, name: &str) -> Option<DeviceTreeProperty> {
        let node = self.get_mut(id)?;
        node.unresolved.retain(|r| r.property != name);
        let removed = node.delete(name);
        if removed.is_some() {
            debug!("{}: deleted property {name}", node.abs_path);
        }
        removed
    }

    /// Applies [`Node::set_ref`] with `value` to every node matching
    /// `pattern` (see [`nodes`](Self::nodes)); 0 resets them.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::Regex`] if `pattern` is not a valid regex.
    pub fn ref_nodes(&mut self, value: i32, pattern: &str) -> Result<Vec<NodeId>, TreeError> {
        let found = self.nodes(pattern)?;
        for &id in &found {
            self.node_mut(id).set_ref(value);
        }
        Ok(found)
    }

    /// Returns the nodes matching `pattern` with a positive reference count.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::Regex`] if `pattern` is not a valid regex.
    pub fn refd(&self, pattern: &str) -> Result<Vec<NodeId>, TreeError> {
        Ok(self
            .nodes(pattern)?
            .into_iter()
            .filter(|&id| self.node(id).ref_count > 0)
            .collect())
    }

    /// References a node, all of its subnodes, every node they point at
    /// through phandle-valued properties and, if `parents` is set, the
    /// ancestors of all of those.
    ///
    /// Every node is counted once. Returns the referenced nodes.
    pub fn ref_all(
        &mut self,
        id: NodeId,
        parents: bool,
        descriptors: &PhandleDescriptors,
    ) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        let mut marked = Vec::new();
        let subtree = self.subnodes(id, None);

        let mut targets = Vec::new();
        for &node in &subtree {
            for prop in self.node(node).properties() {
                for (_, phandle) in descriptors.phandles(self, node, prop) {
                    match self.pnode(phandle) {
                        Some(target) => targets.push(target),
                        None if phandle != 0 && phandle != u32::MAX => debug!(
                            "{}: `{}` phandle {phandle:#x} not found",
                            self.node(node).abs_path,
                            prop.name()
                        ),
                        None => {}
                    }
                }
            }
        }

        let mut wanted: Vec<NodeId> = subtree.into_iter().chain(targets).collect();
        if parents {
            let ancestors: Vec<NodeId> = wanted
                .iter()
                .flat_map(|&n| self.ancestors(n))
                .collect();
            wanted.extend(ancestors);
        }
        for node in wanted {
            if seen.insert(node) {
                self.node_mut(node).inc_ref();
                marked.push(node);
            }
        }
        marked
    }

    /// Deletes every node of the subtree at `scope` (including `scope`
    /// itself unless it is the root) for which `predicate` holds, and
    /// returns the deleted paths.
    ///
    /// The predicate sees the tree as it was before any deletion.
    pub fn filter<F>(&mut self, scope: NodeId, mut predicate: F) -> Vec<String>
    where
        F: FnMut(&DeviceTree, NodeId) -> bool,
    {
        let doomed: Vec<NodeId> = self
            .subnodes(scope, None)
            .into_iter()
            .filter(|&id| id != self.root && predicate(self, id))
            .collect();

        let mut deleted = Vec::new();
        for id in doomed {
            if !self.contains(id) {
                continue;
            }
            let path = self.path_of(id);
            if self.delete(id).is_ok() {
                info!("filtered {path}");
                deleted.push(path);
            }
        }
        deleted
    }
}

fn split_path(path: &str) -> Result<Vec<&str>, TreeError> {
    let Some(relative) = path.strip_prefix('/') else {
        return Err(TreeError::InvalidPath(path.to_owned()));
    };
    let relative = relative.strip_suffix('/').unwrap_or(relative);
    if relative.is_empty() {
        return Ok(Vec::new());
    }
    let components: Vec<&str> = relative.split('/').collect();
    if components.iter().any(|c| c.is_empty()) {
        return Err(TreeError::InvalidPath(path.to_owned()));
    }
    Ok(components)
}

/// Renumbers phandles of an incoming subtree that collide with phandles of
/// the tree it is added to.
struct PhandleMap {
    used: HashSet<u32>,
    taken: HashSet<u32>,
    next_phandle: u32,
    map: Vec<(u32, u32)>,
    /// Phandle cell positions of each incoming node, in preorder.
    references: Vec<Vec<(String, Vec<usize>)>>,
}

impl PhandleMap {
    fn new(base: &DeviceTree, incoming: &DeviceTreeNode, descriptors: &PhandleDescriptors) -> Self {
        let nodes = incoming.preorder();
        let used: HashSet<u32> = base.nodes.iter().flatten().filter_map(|n| n.phandle).collect();
        let mut taken = used.clone();
        taken.extend(nodes.iter().filter_map(|n| n.phandle()));
        let max_phandle = taken.iter().copied().filter(|&p| p != u32::MAX).max().unwrap_or(0);

        let references: Vec<Vec<(String, Vec<usize>)>> = if used.is_empty() {
            Vec::new()
        } else {
            let target_cells = |phandle: u32, name: &str| {
                nodes
                    .iter()
                    .find(|n| n.phandle() == Some(phandle))
                    .map(|n| n.property(name))
                    .unwrap_or_else(|| {
                        base.pnode(phandle)
                            .and_then(|target| base.node(target).property(name))
                    })
                    .and_then(DeviceTreeProperty::as_u32)
            };
            nodes
                .iter()
                .map(|node| {
                    node.properties()
                        .filter_map(|prop| {
                            let cells: Vec<usize> = descriptors
                                .detached_phandles(node, prop, &target_cells)
                                .into_iter()
                                .map(|(cell, _)| cell)
                                .collect();
                            (!cells.is_empty()).then(|| (prop.name().to_owned(), cells))
                        })
                        .collect()
                })
                .collect()
        };

        Self {
            used,
            taken,
            next_phandle: max_phandle.saturating_add(1),
            map: Vec::new(),
            references,
        }
    }

    fn fixup_node(&mut self, node: &mut DeviceTreeNode) {
        if self.used.is_empty() {
            return;
        }
        self.renumber(node);
        if self.map.is_empty() {
            return;
        }
        self.fixup_references(node, &mut 0);
    }

    fn renumber(&mut self, node: &mut DeviceTreeNode) {
        if let Some(phandle) = node.phandle() {
            if self.used.contains(&phandle) {
                match self.allocate() {
                    Some(new_phandle) => {
                        debug!("{}: phandle {phandle:#x} renumbered to {new_phandle:#x}", node.name());
                        self.map.push((phandle, new_phandle));
                        node.set_phandle(Some(new_phandle));
                    }
                    None => warn!("{}: no free phandle for {phandle:#x}", node.name()),
                }
            }
        }
        for child in node.children_mut() {
            self.renumber(child);
        }
    }

    /// The lowest free phandle above every phandle in use, wrapping around
    /// to fill gaps. Neither 0 nor `u32::MAX` is handed out.
    fn allocate(&mut self) -> Option<u32> {
        let start = self.next_phandle.max(1);
        let phandle = (start..u32::MAX)
            .chain(1..start)
            .find(|p| !self.taken.contains(p))?;
        self.taken.insert(phandle);
        self.next_phandle = phandle.saturating_add(1);
        Some(phandle)
    }

    fn renumbered(&self, old: u32) -> Option<u32> {
        self.map.iter().find(|&&(from, _)| from == old).map(|&(_, to)| to)
    }

    fn fixup_references(&self, node: &mut DeviceTreeNode, next: &mut usize) {
        let index = *next;
        *next += 1;
        for (name, cells) in self.references.get(index).into_iter().flatten() {
            let Some(prop) = node.property_mut(name) else {
                continue;
            };
            for &cell in cells {
                let current = prop.value().cells().get(cell).copied();
                if let Some(new) = current.and_then(|old| self.renumbered(old)) {
                    set_cell(prop, cell, new);
                }
            }
        }
        for child in node.children_mut() {
            self.fixup_references(child, next);
        }
    }
}

impl DeviceTreeNode {
    fn preorder(&self) -> Vec<&DeviceTreeNode> {
        let mut nodes = vec![self];
        for child in self.children() {
            nodes.extend(child.preorder());
        }
        nodes
    }
}
