// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::io;
use std::path::PathBuf;

use lopper_device_tree::error::{DtsError, FdtError, TreeError};
use thiserror::Error;

/// An error raised while loading rules or running the pipeline.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LopperError {
    /// A node, property or phandle lookup failed.
    #[error(transparent)]
    NotFound(#[from] TreeError),
    /// A rule lacks a field its kind requires, or a field is unusable.
    #[error("rule {rule}: {reason}")]
    MalformedRule {
        /// Path of the rule node.
        rule: String,
        /// What is wrong with it.
        reason: String,
    },
    /// An assist failed or reported failure.
    #[error("assist {assist} failed: {reason}")]
    AssistFailure {
        /// Name or id of the assist.
        assist: String,
        /// What went wrong.
        reason: String,
    },
    /// A node was added on top of an existing one without `merge`.
    #[error("a node already exists at {0}")]
    StructuralConflict(String),
    /// A tree file could not be decoded.
    #[error("{}: {source}", path.display())]
    Codec {
        /// The file being read.
        path: PathBuf,
        /// The decoder error.
        source: CodecError,
    },
    /// A file could not be read or written.
    #[error("{}: {source}", path.display())]
    Io {
        /// The file being accessed.
        path: PathBuf,
        /// The underlying error.
        source: io::Error,
    },
}

impl LopperError {
    pub(crate) fn malformed(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        LopperError::MalformedRule {
            rule: rule.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn assist(assist: impl Into<String>, reason: impl Into<String>) -> Self {
        LopperError::AssistFailure {
            assist: assist.into(),
            reason: reason.into(),
        }
    }

    /// Lifts a tree error, keeping structural conflicts apart from lookups.
    pub(crate) fn from_tree(err: TreeError) -> Self {
        match err {
            TreeError::StructuralConflict(path) => LopperError::StructuralConflict(path),
            other => LopperError::NotFound(other),
        }
    }
}

/// A decoding failure of one of the tree formats.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Invalid flattened device tree blob.
    #[error(transparent)]
    Fdt(#[from] FdtError),
    /// Invalid DTS source.
    #[error(transparent)]
    Dts(#[from] DtsError),
}

/// Result type used throughout the pipeline.
pub type Result<T> = std::result::Result<T, LopperError>;
