// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Assists: named tree processors that rules dispatch to by id or by
//! output file extension.
//!
//! Every assist is built in. A `load` rule makes one of them part of the
//! *loaded* set and may attach an extra id and file extension to it;
//! `assist-v1` and `output` rules look assists up in that set first.

use std::fmt;
use std::path::{Path, PathBuf};

use log::debug;
use lopper_device_tree::model::{DeviceTree, NodeId, PhandleDescriptors};

use crate::error::{LopperError, Result};

mod domain_access;
mod grep;

pub use domain_access::DomainAccess;
pub use grep::Grep;

/// What an assist gets to work with.
#[derive(Debug)]
pub struct AssistContext<'a> {
    /// The tree being processed.
    pub tree: &'a mut DeviceTree,
    /// Layout of phandle-valued properties.
    pub descriptors: &'a PhandleDescriptors,
    /// Whether warnings are fatal.
    pub werror: bool,
}

/// Invocation options of an assist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssistOptions {
    /// Number of `-v` flags.
    pub verbose: u8,
    /// Free-form arguments.
    pub args: Vec<String>,
    /// Where output files go.
    pub outdir: PathBuf,
}

/// A tree processor.
pub trait Assist: fmt::Debug {
    /// The module name `load` rules refer to.
    fn name(&self) -> &str;

    /// Returns whether the assist handles `id`.
    fn is_compatible(&self, id: &str) -> bool;

    /// The output file extension the assist writes, if any.
    fn file_ext(&self) -> Option<&str> {
        None
    }

    /// Processes the tree starting at `target`. `Ok(false)` reports a
    /// failure that the caller may tolerate.
    ///
    /// # Errors
    ///
    /// Any error aborts the assist.
    fn run(
        &self,
        ctx: &mut AssistContext<'_>,
        target: NodeId,
        options: &AssistOptions,
    ) -> Result<bool>;
}

#[derive(Debug)]
struct Loaded {
    assist: usize,
    id: Option<String>,
    file_ext: Option<String>,
}

/// The available assists and the loaded subset.
#[derive(Debug)]
pub struct AssistRegistry {
    builtins: Vec<Box<dyn Assist>>,
    loaded: Vec<Loaded>,
}

impl Default for AssistRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl AssistRegistry {
    /// Creates a registry without any assist.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            builtins: Vec::new(),
            loaded: Vec::new(),
        }
    }

    /// Creates a registry holding the built-in assists, none of them
    /// loaded.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(DomainAccess));
        registry.register(Box::new(Grep));
        registry
    }

    /// Makes an assist available for loading.
    pub fn register(&mut self, assist: Box<dyn Assist>) {
        self.builtins.push(assist);
    }

    /// Loads the assist named by `module`, which may be a file name or
    /// path; the directory and extension are ignored. A declared `id` and
    /// `file_ext` are recorded with it. Loading an assist twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`LopperError::AssistFailure`] if no assist has that name.
    pub fn load(
        &mut self,
        module: &str,
        id: Option<String>,
        file_ext: Option<String>,
    ) -> Result<&dyn Assist> {
        let name = module_name(module);
        let index = self
            .builtins
            .iter()
            .position(|a| a.name() == name)
            .ok_or_else(|| LopperError::assist(module, "no assist with this name"))?;

        if self.loaded.iter().any(|l| l.assist == index) {
            debug!("assist {name} is already loaded");
        } else {
            debug!("loaded assist {name}");
            self.loaded.push(Loaded {
                assist: index,
                id,
                file_ext,
            });
        }
        Ok(self.builtins[index].as_ref())
    }

    /// Returns whether an assist of that name is loaded.
    #[must_use]
    pub fn is_loaded(&self, module: &str) -> bool {
        let name = module_name(module);
        self.loaded_assists()
            .any(|(assist, _)| assist.name() == name)
    }

    fn loaded_assists(&self) -> impl Iterator<Item = (&dyn Assist, &Loaded)> {
        self.loaded
            .iter()
            .map(|l| (self.builtins[l.assist].as_ref(), l))
    }

    /// Finds the first assist compatible with `id`: loaded assists in load
    /// order, then the remaining built-ins.
    #[must_use]
    pub fn find_compatible(&self, id: &str) -> Option<&dyn Assist> {
        if let Some((assist, _)) = self
            .loaded_assists()
            .find(|(a, l)| a.is_compatible(id) || l.id.as_deref() == Some(id))
        {
            return Some(assist);
        }
        let found = self.builtins.iter().find(|a| a.is_compatible(id))?;
        debug!("{id}: using assist {} which was not loaded", found.name());
        Some(found.as_ref())
    }

    /// Finds the loaded assist that writes files with extension `ext`.
    #[must_use]
    pub fn find_by_ext(&self, ext: &str) -> Option<&dyn Assist> {
        self.loaded_assists()
            .find(|(a, l)| l.file_ext.as_deref().or(a.file_ext()) == Some(ext))
            .map(|(a, _)| a)
    }
}

/// Strips directories and the extension from a module reference.
fn module_name(module: &str) -> &str {
    let path = Path::new(module);
    path.file_stem().and_then(|s| s.to_str()).unwrap_or(module)
}
