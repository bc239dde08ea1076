// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use log::{debug, trace, warn};
use lopper_device_tree::model::{DeviceTree, NodeId, PhandleDescriptors};

use crate::assists::{AssistContext, AssistOptions, AssistRegistry};
use crate::error::{LopperError, Result};
use crate::io::{self, Format};

/// Run configuration, normally lowered from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Turn warnings and rule failures into a pipeline error.
    pub werror: bool,
    /// Do not write any output file.
    pub dryrun: bool,
    /// Number of `-v` flags.
    pub verbose: u8,
    /// Directory for relative output files.
    pub outdir: PathBuf,
    /// Overwrite existing output files.
    pub force: bool,
    /// Extra directories searched by `load` rules.
    pub load_paths: Vec<PathBuf>,
    /// Node an autorun assist processes.
    pub target: Option<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            werror: false,
            dryrun: false,
            verbose: 0,
            outdir: PathBuf::from("."),
            force: false,
            load_paths: Vec::new(),
            target: None,
        }
    }
}

/// Everything rules operate on: the system tree, the current selection,
/// named subtrees, the phandle descriptor table, the assists and the
/// results of the rules run so far.
#[derive(Debug)]
pub struct PipelineContext {
    /// The system device tree.
    pub tree: DeviceTree,
    /// Run configuration.
    pub options: Options,
    /// Layout of phandle-valued properties.
    pub descriptors: PhandleDescriptors,
    /// Available and loaded assists.
    pub assists: AssistRegistry,
    selection: Vec<NodeId>,
    subtrees: BTreeMap<String, DeviceTree>,
    results: HashMap<String, bool>,
}

impl PipelineContext {
    /// Creates a context around a system tree, with the default descriptor
    /// table and the built-in assists.
    #[must_use]
    pub fn new(tree: DeviceTree, options: Options) -> Self {
        Self {
            tree,
            options,
            descriptors: PhandleDescriptors::default(),
            assists: AssistRegistry::with_builtins(),
            selection: Vec::new(),
            subtrees: BTreeMap::new(),
            results: HashMap::new(),
        }
    }

    /// Returns the selected nodes that still exist.
    #[must_use]
    pub fn selection(&self) -> Vec<NodeId> {
        self.selection
            .iter()
            .copied()
            .filter(|&id| self.tree.contains(id))
            .collect()
    }

    /// Replaces the current selection.
    pub fn set_selection(&mut self, selection: Vec<NodeId>) {
        debug!("selection is now {} nodes", selection.len());
        self.selection = selection;
    }

    /// Returns a named subtree.
    #[must_use]
    pub fn subtree(&self, name: &str) -> Option<&DeviceTree> {
        self.subtrees.get(name)
    }

    /// Stores a named subtree, replacing any previous one of that name.
    pub fn insert_subtree(&mut self, name: impl Into<String>, tree: DeviceTree) {
        let name = name.into();
        debug!("stored subtree {name} ({} nodes)", tree.len());
        self.subtrees.insert(name, tree);
    }

    /// Returns the names of the stored subtrees.
    pub fn subtree_names(&self) -> impl Iterator<Item = &str> {
        self.subtrees.keys().map(String::as_str)
    }

    /// Returns the system tree, or the named subtree if `name` is given.
    ///
    /// # Errors
    ///
    /// Fails if there is no subtree of that name.
    pub fn tree_mut(&mut self, name: Option<&str>, rule: &str) -> Result<&mut DeviceTree> {
        match name {
            None => Ok(&mut self.tree),
            Some(name) => self
                .subtrees
                .get_mut(name)
                .ok_or_else(|| LopperError::malformed(rule, format!("unknown tree `{name}`"))),
        }
    }

    /// Records the result of a rule.
    pub fn record_result(&mut self, rule: impl Into<String>, result: bool) {
        let rule = rule.into();
        trace!("{rule} returned {result}");
        self.results.insert(rule, result);
    }

    /// Returns the recorded result of a rule.
    #[must_use]
    pub fn result(&self, rule: &str) -> Option<bool> {
        self.results.get(rule).copied()
    }

    /// Brings the indices of the system tree and of all subtrees up to
    /// date, resolving pending references.
    pub fn sync(&mut self) {
        for tree in std::iter::once(&mut self.tree).chain(self.subtrees.values_mut()) {
            if !tree.is_dirty() {
                continue;
            }
            let resolution = tree.resolve(&self.descriptors);
            for (path, reference) in resolution.unresolved {
                debug!(
                    "{path}: `{}` still references unknown `{}`",
                    reference.property, reference.target
                );
            }
        }
    }

    /// Builds the assist options for this run.
    #[must_use]
    pub fn assist_options(&self, args: Vec<String>) -> AssistOptions {
        AssistOptions {
            verbose: self.options.verbose,
            args,
            outdir: self.options.outdir.clone(),
        }
    }

    /// Runs the assist compatible with `id` against `target` in the system
    /// tree. Returns `None` if no assist is compatible.
    ///
    /// # Errors
    ///
    /// Propagates the assist's error.
    pub fn run_assist(
        &mut self,
        id: &str,
        target: NodeId,
        options: &AssistOptions,
    ) -> Option<Result<bool>> {
        let assist = self.assists.find_compatible(id)?;
        debug!("running assist {} for {id}", assist.name());
        let mut ctx = AssistContext {
            tree: &mut self.tree,
            descriptors: &self.descriptors,
            werror: self.options.werror,
        };
        Some(assist.run(&mut ctx, target, options))
    }

    /// Writes `tree`, or the system tree, to `path`. Native formats are
    /// written directly; any other extension goes to the loaded assist that
    /// declared it, which gets the path as its only argument.
    ///
    /// # Errors
    ///
    /// Returns [`LopperError::Io`] if the file cannot be written, and
    /// [`LopperError::AssistFailure`] under werror when no assist handles the
    /// extension.
    pub fn write_tree(&mut self, path: &Path, tree: Option<&mut DeviceTree>) -> Result<bool> {
        let tree = match tree {
            Some(tree) => tree,
            None => &mut self.tree,
        };
        let Format::Other(ext) = Format::of(path) else {
            return io::write_tree(path, tree);
        };
        let Some(assist) = self.assists.find_by_ext(&ext) else {
            warn!("no assist writes `.{ext}` files, {} not written", path.display());
            if self.options.werror {
                return Err(LopperError::assist(ext, "no assist handles the extension"));
            }
            return Ok(false);
        };
        debug!("{} writes {}", assist.name(), path.display());
        let options = AssistOptions {
            verbose: self.options.verbose,
            args: vec![path.display().to_string()],
            outdir: self.options.outdir.clone(),
        };
        let target = tree.root();
        let mut ctx = AssistContext {
            tree,
            descriptors: &self.descriptors,
            werror: self.options.werror,
        };
        assist.run(&mut ctx, target, &options)
    }
}
