// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Rule handlers, one per [`RuleKind`].

use log::{debug, warn};
use lopper_device_tree::error::TreeError;
use lopper_device_tree::model::NodeId;

use crate::context::PipelineContext;
use crate::error::{LopperError, Result};
use crate::rule::{Rule, RuleKind};

mod add;
mod assist;
mod code;
mod conditional;
mod meta;
mod modify;
mod output;
mod print;
mod select;
mod value;

/// Per-invocation options of a rule, set when a rule runs another one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    /// Path of the node the rule should start from.
    pub start_node: Option<String>,
}

impl Invocation {
    /// An invocation starting at `path`.
    #[must_use]
    pub fn at(path: impl Into<String>) -> Self {
        Self {
            start_node: Some(path.into()),
        }
    }
}

type Handler = fn(&mut PipelineContext, &Rule<'_>, &Invocation) -> Result<bool>;

impl RuleKind {
    fn handler(self) -> Handler {
        match self {
            RuleKind::Select => select::run,
            RuleKind::Modify => modify::run,
            RuleKind::Add => add::run,
            RuleKind::Conditional => conditional::run,
            RuleKind::Output => output::output,
            RuleKind::Tree => output::tree,
            RuleKind::Assist => assist::assist,
            RuleKind::Load => assist::load,
            RuleKind::Code => code::code,
            RuleKind::Xlate => code::xlate,
            RuleKind::Print => print::run,
            RuleKind::Exec => exec,
            RuleKind::Meta => meta::run,
        }
    }
}

/// Runs one rule and records its result under [`Rule::key`]. A failing
/// rule is recorded as `false`.
///
/// # Errors
///
/// Propagates the handler's error.
pub fn execute(ctx: &mut PipelineContext, rule: &Rule<'_>, invocation: &Invocation) -> Result<bool> {
    debug!("running {rule}");
    let result = (rule.kind().handler())(ctx, rule, invocation);
    ctx.record_result(rule.key(), matches!(result, Ok(true)));
    result
}

/// Runs a rule on behalf of another one. Errors are downgraded to a
/// warning and a `false` result unless warnings are errors.
pub(crate) fn execute_nested(
    ctx: &mut PipelineContext,
    rule: &Rule<'_>,
    invocation: &Invocation,
) -> Result<bool> {
    match execute(ctx, rule, invocation) {
        Err(e) if !ctx.options.werror => {
            warn!("{rule}: {e}");
            Ok(false)
        }
        other => other,
    }
}

/// The node a rule starts from: the invocation's start node, then the
/// first selected node, then the root.
pub(crate) fn start_node(
    ctx: &mut PipelineContext,
    rule: &Rule<'_>,
    invocation: &Invocation,
) -> Result<NodeId> {
    let explicit = invocation.start_node.clone().or_else(|| rule.string("start_node"));
    if let Some(path) = explicit {
        return find(ctx, &path).ok_or(LopperError::NotFound(TreeError::NodeNotFound(path)));
    }
    Ok(ctx.selection().first().copied().unwrap_or(ctx.tree.root()))
}

/// Finds a node of the system tree by path, then by label.
pub(crate) fn find(ctx: &mut PipelineContext, target: &str) -> Option<NodeId> {
    if ctx.tree.is_dirty() {
        ctx.sync();
    }
    ctx.tree
        .find_node(target)
        .or_else(|| ctx.tree.deref(target))
        .or_else(|| ctx.tree.node_by_label(target))
}

/// `exec = <&rule>`: runs another rule of the same file.
fn exec(ctx: &mut PipelineContext, rule: &Rule<'_>, invocation: &Invocation) -> Result<bool> {
    let target = rule
        .linked_rule("exec")
        .ok_or_else(|| LopperError::malformed(rule.path(), "`exec` does not name a rule"))?;

    let invocation = match invocation.start_node.clone().or_else(|| rule.string("node")) {
        Some(path) => Invocation::at(path),
        None => match ctx.selection().first() {
            Some(&id) => Invocation::at(ctx.tree.path_of(id)),
            None => Invocation::default(),
        },
    };
    execute_nested(ctx, &target, &invocation)
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn exec_runs_the_linked_rule_from_the_selection() {
        let mut ctx = context();
        let file = rules(
            r#"
            target: lop_0 {
                compatible = "system-device-tree-v1,lop,modify";
                modify = ":status:disabled";
                noexec;
            };
            lop_1 {
                compatible = "system-device-tree-v1,lop,select-v1";
                select_1 = "/soc/serial@1000";
            };
            lop_2 {
                compatible = "system-device-tree-v1,lop,exec";
                exec = <&target>;
            };
            "#,
        );
        let rules: Vec<_> = file.rules().collect();
        assert!(execute(&mut ctx, &rules[1], &Invocation::default()).unwrap());
        assert!(execute(&mut ctx, &rules[2], &Invocation::default()).unwrap());

        let uart = ctx.tree.find_node("/soc/serial@1000").unwrap();
        assert_eq!(ctx.tree.node(uart).get("status").unwrap().as_str(), Some("disabled"));
        assert_eq!(ctx.result("test.lop:/lops/lop_0"), Some(true));
        assert_eq!(ctx.result("test.lop:/lops/lop_2"), Some(true));
    }

    #[test]
    fn start_node_order() {
        let mut ctx = context();
        let file = rules(
            r#"
            lop_0 { compatible = "system-device-tree-v1,lop,code-v1"; code = "return true;"; };
            "#,
        );
        let rule = file.rules().next().unwrap();

        let root = ctx.tree.root();
        assert_eq!(start_node(&mut ctx, &rule, &Invocation::default()).unwrap(), root);

        let cpus = ctx.tree.find_node("/cpus").unwrap();
        ctx.set_selection(vec![cpus]);
        assert_eq!(start_node(&mut ctx, &rule, &Invocation::default()).unwrap(), cpus);

        let uart = start_node(&mut ctx, &rule, &Invocation::at("uart0")).unwrap();
        assert_eq!(ctx.tree.path_of(uart), "/soc/serial@1000");
        assert!(start_node(&mut ctx, &rule, &Invocation::at("/nowhere")).is_err());
    }
}
