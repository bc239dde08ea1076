// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Error types for the `lopper_device_tree` crate.

use std::fmt;

use thiserror::Error;

/// An error that can occur when parsing a flattened device tree blob.
#[derive(Debug)]
#[non_exhaustive]
pub struct FdtError {
    offset: usize,
    /// What went wrong.
    pub kind: FdtErrorKind,
}

impl FdtError {
    pub(crate) fn new(kind: FdtErrorKind, offset: usize) -> Self {
        Self { offset, kind }
    }

    /// Returns the byte offset in the blob at which the error was detected.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// The kind of an error that can occur when parsing a flattened device tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum FdtErrorKind {
    /// The magic number of the device tree is invalid.
    InvalidMagic,
    /// The Device Tree version is not supported by this library.
    UnsupportedVersion(u32),
    /// The length of the device tree is invalid.
    InvalidLength,
    /// An invalid token was encountered.
    BadToken(u32),
    /// An invalid string was encountered.
    InvalidString,
}

impl fmt::Display for FdtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.kind, self.offset)
    }
}

impl fmt::Display for FdtErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FdtErrorKind::InvalidMagic => write!(f, "invalid FDT magic number"),
            FdtErrorKind::UnsupportedVersion(version) => {
                write!(f, "the FDT version {version} is not supported")
            }
            FdtErrorKind::InvalidLength => write!(f, "invalid FDT length"),
            FdtErrorKind::BadToken(token) => write!(f, "bad FDT token: 0x{token:x}"),
            FdtErrorKind::InvalidString => write!(f, "invalid string in FDT"),
        }
    }
}

impl std::error::Error for FdtError {}

/// Shorthand for results of the read-only FDT API.
pub type FdtResult<T> = Result<T, FdtError>;

/// An error raised by a lookup or structural mutation of a
/// [`DeviceTree`](crate::model::DeviceTree).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TreeError {
    /// No node exists at the given path, label or regex.
    #[error("node not found: {0}")]
    NodeNotFound(String),
    /// The node exists but does not carry the property.
    #[error("property `{property}` not found on {node}")]
    PropertyNotFound {
        /// Path of the node that was searched.
        node: String,
        /// Name of the missing property.
        property: String,
    },
    /// No node carries the phandle.
    #[error("no node with phandle {0:#x}")]
    PhandleNotFound(u32),
    /// A node already exists at the destination and merging was not requested.
    #[error("a node already exists at {0} and merge was not requested")]
    StructuralConflict(String),
    /// Two nodes that were expected to be siblings are not.
    #[error("{0} and {1} are not children of the same parent")]
    NotSiblings(String, String),
    /// A path was not absolute or had an empty component.
    #[error("invalid node path `{0}`")]
    InvalidPath(String),
    /// The root node cannot be deleted, renamed or moved.
    #[error("the root node cannot be {0}")]
    RootImmutable(&'static str),
    /// A node cannot be moved underneath itself.
    #[error("cannot move {0} underneath its own subtree")]
    CyclicMove(String),
    /// A lookup pattern was not a valid regular expression.
    #[error("invalid regular expression: {0}")]
    Regex(#[from] regex::Error),
}

impl TreeError {
    /// Returns `true` for every flavour of "lookup found nothing".
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            TreeError::NodeNotFound(_)
                | TreeError::PropertyNotFound { .. }
                | TreeError::PhandleNotFound(_)
        )
    }
}

/// An error raised while parsing or lowering DTS source text.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DtsError {
    /// The source text is not valid DTS.
    #[error("syntax error at line {line}, column {column}: `{snippet}`")]
    Syntax {
        /// 1-based line of the failure.
        line: usize,
        /// 1-based column of the failure.
        column: usize,
        /// The beginning of the unparsed input.
        snippet: String,
    },
    /// Include directives need a preprocessor, which is not provided.
    #[error("include directives are not supported: {0}")]
    Include(String),
    /// A `&label` or `&{/path}` node override targets nothing.
    #[error("reference to unknown node `{0}`")]
    UnknownReference(String),
    /// An integer expression could not be evaluated.
    #[error("invalid integer expression: {0}")]
    Expression(String),
    /// Building the tree failed.
    #[error(transparent)]
    Tree(#[from] TreeError),
}
