// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A read-only API for inspecting a device tree node.

use super::property::FdtProperty;
use super::{FDT_TAGSIZE, Fdt, FdtToken};
use crate::error::FdtResult;

/// A node in a flattened device tree.
#[derive(Debug, Clone, Copy)]
pub struct FdtNode<'a> {
    pub(crate) fdt: Fdt<'a>,
    pub(crate) offset: usize,
}

impl<'a> FdtNode<'a> {
    /// Returns the name of this node, including its unit address. The root
    /// node's name is empty.
    ///
    /// # Errors
    ///
    /// Fails if the name is not a NUL-terminated UTF-8 string.
    pub fn name(&self) -> FdtResult<&'a str> {
        self.fdt
            .string_at_offset(self.offset + FDT_TAGSIZE, self.fdt.data.len())
    }

    /// Returns a property by its name.
    ///
    /// # Performance
    ///
    /// This iterates through all properties of the node. Convert to a
    /// [`DeviceTreeNode`](crate::model::DeviceTreeNode) for repeated
    /// lookups.
    ///
    /// # Errors
    ///
    /// Fails if the node cannot be parsed.
    pub fn property(&self, name: &str) -> FdtResult<Option<FdtProperty<'a>>> {
        for property in self.properties() {
            let property = property?;
            if property.name() == name {
                return Ok(Some(property));
            }
        }
        Ok(None)
    }

    /// Returns an iterator over the properties of this node, in blob order.
    ///
    /// # Examples
    ///
    /// ```
    /// # use lopper_device_tree::fdt::Fdt;
    /// # use lopper_device_tree::model::{DeviceTree, DeviceTreeNode, DeviceTreeProperty};
    /// let tree = DeviceTree::from_root(
    ///     DeviceTreeNode::builder("")
    ///         .property(DeviceTreeProperty::new("model", "board"))
    ///         .property(DeviceTreeProperty::new("#address-cells", 2))
    ///         .build(),
    /// );
    /// let dtb = tree.to_dtb();
    /// let fdt = Fdt::new(&dtb).unwrap();
    /// let names: Vec<_> = fdt
    ///     .root()
    ///     .unwrap()
    ///     .properties()
    ///     .map(|p| p.unwrap().name())
    ///     .collect();
    /// assert_eq!(names, ["model", "#address-cells"]);
    /// ```
    pub fn properties(&self) -> impl Iterator<Item = FdtResult<FdtProperty<'a>>> + use<'a> {
        Items::new(self.fdt, self.offset).filter_map(|item| match item {
            Ok(Entry::Property(property)) => Some(Ok(property)),
            Ok(Entry::Node(_)) => None,
            Err(e) => Some(Err(e)),
        })
    }

    /// Returns a child node by its name.
    ///
    /// # Errors
    ///
    /// Fails if the node cannot be parsed.
    pub fn child(&self, name: &str) -> FdtResult<Option<FdtNode<'a>>> {
        for child in self.children() {
            let child = child?;
            if child.name()? == name {
                return Ok(Some(child));
            }
        }
        Ok(None)
    }

    /// Returns an iterator over the children of this node, in blob order.
    pub fn children(&self) -> impl Iterator<Item = FdtResult<FdtNode<'a>>> + use<'a> {
        Items::new(self.fdt, self.offset).filter_map(|item| match item {
            Ok(Entry::Node(node)) => Some(Ok(node)),
            Ok(Entry::Property(_)) => None,
            Err(e) => Some(Err(e)),
        })
    }
}

enum Entry<'a> {
    Property(FdtProperty<'a>),
    Node(FdtNode<'a>),
}

/// Walks the properties and children of one node. Stops for good after the
/// first error.
struct Items<'a> {
    fdt: Fdt<'a>,
    /// Offset of the node; the walk starts lazily.
    start: Option<usize>,
    offset: usize,
    done: bool,
}

impl<'a> Items<'a> {
    fn new(fdt: Fdt<'a>, node_offset: usize) -> Self {
        Self {
            fdt,
            start: Some(node_offset),
            offset: 0,
            done: false,
        }
    }

    fn step(&mut self) -> FdtResult<Option<Entry<'a>>> {
        if let Some(start) = self.start.take() {
            self.offset = self.fdt.first_item_offset(start)?;
        }
        loop {
            match self.fdt.read_token(self.offset)? {
                FdtToken::Prop => {
                    let value_offset = self.offset + FDT_TAGSIZE;
                    let property = FdtProperty::read(&self.fdt, value_offset)?;
                    self.offset = self.fdt.next_property_offset(value_offset)?;
                    return Ok(Some(Entry::Property(property)));
                }
                FdtToken::BeginNode => {
                    let node = FdtNode {
                        fdt: self.fdt,
                        offset: self.offset,
                    };
                    self.offset = self.fdt.next_sibling_offset(self.offset)?;
                    return Ok(Some(Entry::Node(node)));
                }
                FdtToken::Nop => self.offset += FDT_TAGSIZE,
                FdtToken::EndNode | FdtToken::End => return Ok(None),
            }
        }
    }
}

impl<'a> Iterator for Items<'a> {
    type Item = FdtResult<Entry<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.step().transpose();
        if !matches!(item, Some(Ok(_))) {
            self.done = true;
        }
        item
    }
}
