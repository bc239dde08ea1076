// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use indexmap::IndexMap;
use log::debug;
use regex::Regex;
use twox_hash::xxhash64;

use super::property::{DeviceTreeProperty, PropertyValue};
use crate::error::{FdtError, TreeError};
use crate::fdt::FdtNode;

pub(crate) type PropertyMap = IndexMap<String, DeviceTreeProperty, xxhash64::State>;

pub(crate) fn property_map() -> PropertyMap {
    IndexMap::with_hasher(xxhash64::State::with_seed(0xdead_cafe))
}

/// The index of a node in the arena of a [`DeviceTree`](super::DeviceTree).
///
/// Ids are never reused within one tree, so an id of a deleted node simply
/// stops resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

/// A reference from a property cell (or a whole property) to another node
/// that has not been turned into a phandle yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedRef {
    /// The property holding the reference.
    pub property: String,
    /// A label, or an absolute path, naming the target.
    pub target: String,
    /// Where in the property the reference goes.
    pub kind: RefKind,
}

/// Where an [`UnresolvedRef`] is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    /// The cell at the given index receives the target's phandle.
    Cell(usize),
    /// The whole property becomes the target's path string.
    Path,
}

/// A node that lives in a [`DeviceTree`](super::DeviceTree).
///
/// Structure (parent and children) is owned by the tree, so structural
/// operations are methods of the tree taking a [`NodeId`]. Properties and
/// the reference count can be changed through a `&mut Node`.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) name: String,
    pub(crate) abs_path: String,
    pub(crate) labels: Vec<String>,
    pub(crate) phandle: Option<u32>,
    pub(crate) ref_count: i32,
    pub(crate) depth: usize,
    pub(crate) properties: PropertyMap,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) unresolved: Vec<UnresolvedRef>,
}

impl Node {
    pub(crate) fn detached(name: String) -> Self {
        Self {
            name,
            abs_path: String::new(),
            labels: Vec::new(),
            phandle: None,
            ref_count: 0,
            depth: 0,
            properties: property_map(),
            parent: None,
            children: Vec::new(),
            unresolved: Vec::new(),
        }
    }

    /// Returns the name of this node, including its unit address.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the absolute path of this node as of the last sync.
    #[must_use]
    pub fn abs_path(&self) -> &str {
        &self.abs_path
    }

    /// Returns the depth of this node as of the last sync; the root is 0.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Returns the labels of this node.
    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Returns the first label of this node.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.labels.first().map(String::as_str)
    }

    /// Adds a label, unless the node already carries it.
    pub fn add_label(&mut self, label: impl Into<String>) {
        let label = label.into();
        if !self.labels.contains(&label) {
            self.labels.push(label);
        }
    }

    /// Returns the phandle of this node.
    #[must_use]
    pub fn phandle(&self) -> Option<u32> {
        self.phandle
    }

    /// Returns the parent of this node. The root has none.
    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Returns the children of this node in serialization order.
    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Returns an iterator over the properties of this node, in order.
    pub fn properties(&self) -> impl Iterator<Item = &DeviceTreeProperty> {
        self.properties.values()
    }

    /// Finds a property by its name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&DeviceTreeProperty> {
        self.properties.get(name)
    }

    /// Finds a property by its name and returns a mutable reference to it.
    #[must_use]
    pub fn property_mut(&mut self, name: &str) -> Option<&mut DeviceTreeProperty> {
        self.properties.get_mut(name)
    }

    /// Returns a property or fails with a not-found error.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::PropertyNotFound`] if the node has no such
    /// property.
    pub fn get(&self, name: &str) -> Result<&DeviceTreeProperty, TreeError> {
        self.properties
            .get(name)
            .ok_or_else(|| TreeError::PropertyNotFound {
                node: self.abs_path.clone(),
                property: name.to_owned(),
            })
    }

    /// Creates or overwrites a property. Insertion order is kept on
    /// overwrite.
    pub fn set(&mut self, name: &str, value: impl Into<PropertyValue>) {
        if let Some(prop) = self.properties.get_mut(name) {
            prop.set(value);
        } else {
            self.properties
                .insert(name.to_owned(), DeviceTreeProperty::new(name, value));
        }
    }

    /// Adds a property, replacing any property with the same name in place.
    pub fn add_property(&mut self, property: DeviceTreeProperty) {
        self.properties.insert(property.name().to_owned(), property);
    }

    /// Removes a property. Removing a missing property is not an error.
    pub fn delete(&mut self, name: &str) -> Option<DeviceTreeProperty> {
        let removed = self.properties.shift_remove(name);
        if removed.is_none() {
            debug!("{}: no property `{name}` to delete", self.abs_path);
        }
        removed
    }

    /// Returns the strings of the `compatible` property.
    #[must_use]
    pub fn compatible(&self) -> Vec<&str> {
        self.property("compatible")
            .map(|p| p.value().strings())
            .unwrap_or_default()
    }

    /// Returns whether any `compatible` string matches the regex.
    #[must_use]
    pub fn is_compatible(&self, pattern: &Regex) -> bool {
        self.compatible().iter().any(|c| pattern.is_match(c))
    }

    /// Returns the current reference count.
    #[must_use]
    pub fn ref_count(&self) -> i32 {
        self.ref_count
    }

    /// Increments the reference count.
    pub fn inc_ref(&mut self) {
        self.ref_count += 1;
    }

    /// Decrements the reference count.
    pub fn dec_ref(&mut self) {
        self.ref_count -= 1;
    }

    /// Sets the reference count to zero.
    pub fn reset_ref(&mut self) {
        self.ref_count = 0;
    }

    /// Increments the reference count for a positive `value`, resets it
    /// otherwise.
    pub fn set_ref(&mut self, value: i32) {
        if value > 0 {
            self.ref_count += value;
        } else {
            self.ref_count = 0;
        }
    }

    /// Returns references that still wait for a [`resolve`](super::DeviceTree::resolve).
    #[must_use]
    pub fn unresolved(&self) -> &[UnresolvedRef] {
        &self.unresolved
    }
}

/// A detached, owned device tree node with its whole subtree.
///
/// Detached nodes are what templates, clones and codecs produce; they enter
/// a [`DeviceTree`](super::DeviceTree) through
/// [`DeviceTree::add`](super::DeviceTree::add) or
/// [`DeviceTree::from_root`](super::DeviceTree::from_root). Children and
/// properties are stored in [`IndexMap`]s, which provide O(1) lookups by
/// name while preserving insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTreeNode {
    name: String,
    labels: Vec<String>,
    phandle: Option<u32>,
    properties: PropertyMap,
    children: IndexMap<String, DeviceTreeNode, xxhash64::State>,
    references: Vec<UnresolvedRef>,
}

impl Default for DeviceTreeNode {
    fn default() -> Self {
        Self {
            name: String::new(),
            labels: Vec::new(),
            phandle: None,
            properties: property_map(),
            children: IndexMap::with_hasher(xxhash64::State::with_seed(0xdead_cafe)),
            references: Vec::new(),
        }
    }
}

impl DeviceTreeNode {
    /// Creates a new [`DeviceTreeNode`] with the given name.
    ///
    /// # Examples
    ///
    /// ```
    /// # use lopper_device_tree::model::DeviceTreeNode;
    /// let node = DeviceTreeNode::new("my-node");
    /// assert_eq!(node.name(), "my-node");
    /// ```
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Creates a new [`DeviceTreeNodeBuilder`] with the given name.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> DeviceTreeNodeBuilder {
        DeviceTreeNodeBuilder::new(name)
    }

    /// Returns the name of this node.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renames this node.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Returns the labels of this node.
    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Adds a label to this node.
    pub fn add_label(&mut self, label: impl Into<String>) {
        let label = label.into();
        if !self.labels.contains(&label) {
            self.labels.push(label);
        }
    }

    /// Returns the phandle of this node.
    #[must_use]
    pub fn phandle(&self) -> Option<u32> {
        self.phandle
    }

    /// Sets or clears the phandle of this node.
    pub fn set_phandle(&mut self, phandle: Option<u32>) {
        self.phandle = phandle;
    }

    /// Returns an iterator over the properties of this node.
    pub fn properties(&self) -> impl Iterator<Item = &DeviceTreeProperty> {
        self.properties.values()
    }

    /// Finds a property by its name.
    ///
    /// # Performance
    ///
    /// This is a constant-time operation.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&DeviceTreeProperty> {
        self.properties.get(name)
    }

    /// Finds a property by its name and returns a mutable reference to it.
    #[must_use]
    pub fn property_mut(&mut self, name: &str) -> Option<&mut DeviceTreeProperty> {
        self.properties.get_mut(name)
    }

    /// Adds a property to this node, replacing one with the same name.
    ///
    /// # Examples
    ///
    /// ```
    /// # use lopper_device_tree::model::{DeviceTreeNode, DeviceTreeProperty};
    /// let mut node = DeviceTreeNode::new("my-node");
    /// node.add_property(DeviceTreeProperty::new("my-prop", 1));
    /// assert_eq!(node.property("my-prop").unwrap().as_u32(), Some(1));
    /// ```
    pub fn add_property(&mut self, property: DeviceTreeProperty) {
        self.properties.insert(property.name().to_owned(), property);
    }

    /// Removes a property from this node by its name.
    pub fn remove_property(&mut self, name: &str) -> Option<DeviceTreeProperty> {
        self.references.retain(|r| r.property != name);
        self.properties.shift_remove(name)
    }

    /// Returns an iterator over the children of this node.
    pub fn children(&self) -> impl Iterator<Item = &DeviceTreeNode> {
        self.children.values()
    }

    /// Returns a mutable iterator over the children of this node.
    pub fn children_mut(&mut self) -> impl Iterator<Item = &mut DeviceTreeNode> {
        self.children.values_mut()
    }

    /// Finds a child by its name.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&DeviceTreeNode> {
        self.children.get(name)
    }

    /// Finds a child by its name and returns a mutable reference to it.
    #[must_use]
    pub fn child_mut(&mut self, name: &str) -> Option<&mut DeviceTreeNode> {
        self.children.get_mut(name)
    }

    /// Adds a child to this node, replacing one with the same name.
    pub fn add_child(&mut self, child: DeviceTreeNode) {
        self.children.insert(child.name().to_owned(), child);
    }

    /// Removes a child from this node by its name.
    pub fn remove_child(&mut self, name: &str) -> Option<DeviceTreeNode> {
        self.children.shift_remove(name)
    }

    /// Records a reference that is turned into a phandle (or path) once the
    /// node is part of a tree and the tree is resolved.
    pub fn add_reference(&mut self, reference: UnresolvedRef) {
        self.references.push(reference);
    }

    /// Returns the references recorded on this node.
    #[must_use]
    pub fn references(&self) -> &[UnresolvedRef] {
        &self.references
    }

    /// Finds a descendant by a path relative to this node.
    #[must_use]
    pub fn find(&self, relative_path: &str) -> Option<&DeviceTreeNode> {
        relative_path
            .split('/')
            .filter(|s| !s.is_empty())
            .try_fold(self, |node, component| node.child(component))
    }

    /// Finds a descendant by a path relative to this node and returns a
    /// mutable reference to it.
    #[must_use]
    pub fn find_mut(&mut self, relative_path: &str) -> Option<&mut DeviceTreeNode> {
        let mut current = self;
        for component in relative_path.split('/').filter(|s| !s.is_empty()) {
            current = current.child_mut(component)?;
        }
        Some(current)
    }

    pub(crate) fn into_parts(self) -> (Node, Vec<DeviceTreeNode>) {
        let mut node = Node::detached(self.name);
        node.labels = self.labels;
        node.phandle = self.phandle;
        node.properties = self.properties;
        node.unresolved = self.references;
        (node, self.children.into_values().collect())
    }

    pub(crate) fn from_parts(node: &Node, children: Vec<DeviceTreeNode>) -> Self {
        let mut detached = DeviceTreeNode::new(node.name.clone());
        detached.labels.clone_from(&node.labels);
        detached.phandle = node.phandle;
        detached.properties.clone_from(&node.properties);
        detached.references.clone_from(&node.unresolved);
        for child in children {
            detached.add_child(child);
        }
        detached
    }

    pub(crate) fn clear_phandles(&mut self) {
        self.phandle = None;
        for child in self.children.values_mut() {
            child.clear_phandles();
        }
    }
}

impl<'a> TryFrom<FdtNode<'a>> for DeviceTreeNode {
    type Error = FdtError;

    fn try_from(node: FdtNode<'a>) -> Result<Self, Self::Error> {
        let mut detached = DeviceTreeNode::new(node.name()?);
        for property in node.properties() {
            let property = DeviceTreeProperty::from(property?);
            match property.name() {
                "phandle" | "linux,phandle" => detached.phandle = property.as_u32(),
                _ => detached.add_property(property),
            }
        }
        for child in node.children() {
            detached.add_child(child?.try_into()?);
        }
        Ok(detached)
    }
}

/// A builder for creating [`DeviceTreeNode`]s.
#[derive(Debug, Default)]
pub struct DeviceTreeNodeBuilder {
    node: DeviceTreeNode,
}

impl DeviceTreeNodeBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            node: DeviceTreeNode::new(name),
        }
    }

    /// Adds a property to the node.
    #[must_use]
    pub fn property(mut self, property: DeviceTreeProperty) -> Self {
        self.node.add_property(property);
        self
    }

    /// Adds a label to the node.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.node.add_label(label);
        self
    }

    /// Gives the node a phandle.
    #[must_use]
    pub fn phandle(mut self, phandle: u32) -> Self {
        self.node.phandle = Some(phandle);
        self
    }

    /// Adds a reference from a property cell to the node labelled `target`.
    #[must_use]
    pub fn reference(mut self, property: &str, cell: usize, target: &str) -> Self {
        self.node.add_reference(UnresolvedRef {
            property: property.to_owned(),
            target: target.to_owned(),
            kind: RefKind::Cell(cell),
        });
        self
    }

    /// Adds a child to the node.
    #[must_use]
    pub fn child(mut self, child: DeviceTreeNode) -> Self {
        self.node.add_child(child);
        self
    }

    /// Builds the `DeviceTreeNode`.
    #[must_use]
    pub fn build(self) -> DeviceTreeNode {
        self.node
    }
}
