// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `code` and `xlate`: run an inline program, see [`crate::expr`].

use log::{debug, info};
use lopper_device_tree::model::NodeId;

use super::{Invocation, start_node};
use crate::context::PipelineContext;
use crate::error::{LopperError, Result};
use crate::expr::{Interpreter, Program, Value};
use crate::rule::Rule;

/// Runs the program once at the start node.
pub(super) fn code(
    ctx: &mut PipelineContext,
    rule: &Rule<'_>,
    invocation: &Invocation,
) -> Result<bool> {
    let program = program(rule)?;
    let start = start_node(ctx, rule, invocation)?;
    run(ctx, rule, &program, &[start])
}

/// Runs the program once per selected node. An explicit start node, or no
/// selection, runs it over the start node and all of its descendants.
pub(super) fn xlate(
    ctx: &mut PipelineContext,
    rule: &Rule<'_>,
    invocation: &Invocation,
) -> Result<bool> {
    let program = program(rule)?;
    ctx.sync();
    let explicit = invocation.start_node.is_some() || rule.value("start_node").is_some();
    let selection = ctx.selection();
    let targets = if explicit || selection.is_empty() {
        let start = start_node(ctx, rule, invocation)?;
        ctx.tree.subnodes(start, None)
    } else {
        selection
    };
    run(ctx, rule, &program, &targets)
}

fn program(rule: &Rule<'_>) -> Result<Program> {
    let source = rule.require("code")?;
    Program::parse(&source).map_err(|e| LopperError::malformed(rule.path(), e.to_string()))
}

/// `options = "k:v ..."` entries, readable in the program as `$k`. A bare
/// `k` is `true`.
fn variables(rule: &Rule<'_>) -> Vec<(String, Value)> {
    rule.strings("options")
        .iter()
        .flat_map(|o| o.split_whitespace())
        .map(|entry| match entry.split_once(':') {
            Some((name, value)) => (name.to_owned(), Value::Str(value.to_owned())),
            None => (entry.to_owned(), Value::Bool(true)),
        })
        .collect()
}

/// Runs `program` at each target still in the tree. The result is `true`
/// if every run returned a true value.
fn run(
    ctx: &mut PipelineContext,
    rule: &Rule<'_>,
    program: &Program,
    targets: &[NodeId],
) -> Result<bool> {
    let mut interpreter = Interpreter::new(&mut ctx.tree);
    for (name, value) in variables(rule) {
        interpreter.set_var(name, value);
    }

    let mut all = true;
    let mut outcome = Ok(());
    for &target in targets {
        if !interpreter.tree().contains(target) {
            continue;
        }
        debug!("{}: running at {}", rule.path(), interpreter.tree().path_of(target));
        match interpreter.run(program, target) {
            Ok(value) => all &= value.truthy(),
            Err(e) => {
                outcome = Err(LopperError::malformed(
                    rule.path(),
                    format!("at {}: {e}", interpreter.tree().path_of(target)),
                ));
                break;
            }
        }
    }
    for line in interpreter.printed() {
        println!("{line}");
    }

    ctx.sync();
    outcome?;
    if !all {
        info!("{}: program returned false", rule.path());
    }
    Ok(all)
}
