// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Runs rule files against a [`PipelineContext`].

use std::path::Path;

use log::{debug, error, info, warn};
use lopper_device_tree::model::PropertyValue;

use crate::context::PipelineContext;
use crate::error::Result;
use crate::ops::{self, Invocation};
use crate::rule::{RuleFile, RuleKind, rule_node};

/// Assist id run against `--target` when no assist is named.
pub const DEFAULT_TARGET_ASSIST: &str = "openamp,domain-v1";

/// Priority of the generated rules that load directly-named assists.
const LOAD_PRIORITY: u8 = 1;

/// Priority of the generated rules that run assists against `--target`.
const TARGET_PRIORITY: u8 = 3;

/// The loaded rule files and the context they run in.
#[derive(Debug)]
pub struct Pipeline {
    ctx: PipelineContext,
    files: Vec<RuleFile>,
}

impl Pipeline {
    /// Creates a pipeline without rules.
    #[must_use]
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            ctx,
            files: Vec::new(),
        }
    }

    /// Adds a rule file. Files of equal priority run in the order added.
    pub fn add_rules(&mut self, file: RuleFile) {
        debug!("{}: {} rules at priority {}", file.name(), file.rules().count(), file.priority());
        self.files.push(file);
    }

    /// Adds the rules implied by directly-named assists: a `load` rule per
    /// assist, and an `assist-v1` rule per assist against the target node
    /// if [`Options::target`](crate::context::Options::target) is set.
    /// Without assists, the target is processed by the
    /// [`DEFAULT_TARGET_ASSIST`]. `args` become the assists' options.
    pub fn add_assists(&mut self, assists: &[String], args: &[String]) {
        let options = args.join(" ");
        let option_props = || {
            (!options.is_empty()).then(|| ("options", PropertyValue::from(options.as_str())))
        };

        if !assists.is_empty() {
            let loads = assists
                .iter()
                .enumerate()
                .map(|(i, assist)| {
                    rule_node(
                        &format!("load_{i}"),
                        RuleKind::Load,
                        [
                            ("load", PropertyValue::from(assist.as_str())),
                            ("id", PropertyValue::from(module_id(assist))),
                        ],
                    )
                })
                .collect();
            self.add_rules(RuleFile::generated("command line assists", LOAD_PRIORITY, loads));
        }

        let Some(target) = self.ctx.options.target.clone() else {
            return;
        };
        let ids: Vec<String> = if assists.is_empty() {
            vec![DEFAULT_TARGET_ASSIST.to_owned()]
        } else {
            assists.iter().map(|a| module_id(a)).collect()
        };
        let runs = ids
            .into_iter()
            .enumerate()
            .map(|(i, id)| {
                let props = [
                    ("node", PropertyValue::from(target.as_str())),
                    ("id", PropertyValue::from(id)),
                ];
                rule_node(
                    &format!("assist_{i}"),
                    RuleKind::Assist,
                    props.into_iter().chain(option_props()),
                )
            })
            .collect();
        self.add_rules(RuleFile::generated("command line target", TARGET_PRIORITY, runs));
    }

    /// The context the rules run in.
    #[must_use]
    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// The context the rules run in.
    pub fn context_mut(&mut self) -> &mut PipelineContext {
        &mut self.ctx
    }

    /// Consumes the pipeline, returning its context.
    #[must_use]
    pub fn into_context(self) -> PipelineContext {
        self.ctx
    }

    /// Runs every rule file, lowest priority first. Rules marked `noexec`
    /// are skipped, as are rules whose `cond` rule did not succeed. A
    /// failing rule is logged and the run goes on.
    ///
    /// # Errors
    ///
    /// Returns the first rule error if warnings are errors.
    pub fn run(&mut self) -> Result<()> {
        let mut order: Vec<usize> = (0..self.files.len()).collect();
        order.sort_by_key(|&i| self.files[i].priority());

        for i in order {
            let file = &self.files[i];
            info!("running {} (priority {})", file.name(), file.priority());
            for rule in file.rules() {
                if rule.is_noexec() {
                    debug!("{rule}: noexec, skipped");
                    continue;
                }
                if rule.value("cond").is_some() {
                    match rule.linked_rule("cond") {
                        Some(gate) if self.ctx.result(&gate.key()) == Some(true) => {}
                        Some(gate) => {
                            info!("{rule}: skipped, {} did not succeed", gate.path());
                            continue;
                        }
                        None => {
                            warn!("{rule}: `cond` does not name a rule, skipped");
                            continue;
                        }
                    }
                }

                match ops::execute(&mut self.ctx, &rule, &Invocation::default()) {
                    Ok(true) => {}
                    Ok(false) => info!("{rule}: returned false"),
                    Err(e) if self.ctx.options.werror => return Err(e),
                    Err(e) => error!("{rule}: {e}"),
                }
                self.ctx.sync();
            }
        }
        Ok(())
    }
}

/// `module,<name>` for an assist module reference.
fn module_id(module: &str) -> String {
    let path = Path::new(module);
    let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or(module);
    format!("module,{name}")
}
