// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `conditional`: runs the rule's `true*` children against every node that
//! matches a set of property conditions, and its `false*` children against
//! the others.
//!
//! The conditions live in a chain of nodes below the rule: the path of the
//! deepest one, relative to the rule, is the path of the target nodes, and
//! its properties are compared against theirs.
//!
//! ```text
//! lop_0 {
//!     compatible = "system-device-tree-v1,lop,conditional-v1";
//!     cond_root = "cpus";
//!     cpus {
//!         cpu { compatible = "arm,cortex-a53"; status__not__ = "disabled"; };
//!     };
//!     true { compatible = "system-device-tree-v1,lop,code-v1"; code = "..."; };
//! };
//! ```

use log::debug;
use lopper_device_tree::model::{DeviceTreeProperty, NodeId};

use super::{Invocation, execute_nested};
use crate::context::PipelineContext;
use crate::error::Result;
use crate::rule::Rule;

const INVERT_SUFFIX: &str = "__not__";

pub(super) fn run(ctx: &mut PipelineContext, rule: &Rule<'_>, _: &Invocation) -> Result<bool> {
    let rules = rule.file().tree();
    let start = match rule.string("cond_root") {
        Some(root) if root != "/" => match rule.child(&root) {
            Some(start) => start,
            None => {
                debug!("{}: no conditional chain at {root}", rule.path());
                return Ok(false);
            }
        },
        _ => rule.id(),
    };
    let Some(&last) = rules.subnodes(start, None).last() else {
        return Ok(false);
    };
    let last = rules.node(last);
    let target_path = rule.string("cond_select").unwrap_or_else(|| {
        last.abs_path()
            .strip_prefix(rule.path())
            .unwrap_or(last.abs_path())
            .to_owned()
    });

    ctx.sync();
    let tree = ctx.tree_mut(rule.string("tree").as_deref(), rule.path())?;
    let targets = tree.nodes(&target_path)?;
    if targets.is_empty() {
        debug!("{}: no nodes at {target_path}", rule.path());
        return Ok(false);
    }

    let conditions: Vec<&DeviceTreeProperty> = last.properties().collect();
    let mut matches: Vec<NodeId> = Vec::new();
    let mut misses: Vec<NodeId> = Vec::new();
    for &target in &targets {
        let node = tree.node(target);
        let passed = conditions.iter().all(|condition| {
            let name = condition.name().trim_end_matches(INVERT_SUFFIX);
            let passed = holds(condition, node.property(name));
            debug!("{}: {name} is {passed}", node.abs_path());
            passed
        });
        if passed {
            matches.push(target);
        } else {
            misses.push(target);
        }
    }

    let matched: Vec<String> = matches.iter().map(|&id| tree.path_of(id)).collect();
    let missed: Vec<String> = misses.iter().map(|&id| tree.path_of(id)).collect();
    let mut result = None;
    for (paths, prefix) in [(&matched, "true"), (&missed, "false")] {
        let blocks = rule.child_rules(prefix);
        for path in paths {
            for block in &blocks {
                let ret = execute_nested(ctx, block, &Invocation::at(path.as_str()))?;
                result = Some(ret);
                if !ret {
                    debug!("{block} returned false, stopping");
                    break;
                }
            }
        }
    }
    Ok(result.unwrap_or(!matched.is_empty()))
}

/// Returns whether a condition holds for a target property. A missing
/// property never satisfies a condition, inverted or not.
fn holds(condition: &DeviceTreeProperty, candidate: Option<&DeviceTreeProperty>) -> bool {
    let invert = condition.name().ends_with(INVERT_SUFFIX);
    candidate.is_some_and(|c| condition.compare(c, invert))
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;

    #[test]
    fn inversion_and_missing_properties() {
        let pattern = DeviceTreeProperty::new("status__not__", "disabled");
        assert!(holds(&pattern, Some(&DeviceTreeProperty::new("status", "okay"))));
        assert!(!holds(&pattern, Some(&DeviceTreeProperty::new("status", "disabled"))));
        assert!(!holds(&pattern, None));
    }

    #[test]
    fn true_and_false_blocks() {
        let mut ctx = context();
        let file = rules(
            r#"
            lop_0 {
                compatible = "system-device-tree-v1,lop,conditional-v1";
                cond_root = "cpus";
                cpus {
                    cpu {
                        compatible = "arm,cortex-a53";
                        status__not__ = "disabled";
                    };
                };
                true {
                    compatible = "system-device-tree-v1,lop,modify";
                    modify = ":role:apu";
                };
                false_1 {
                    compatible = "system-device-tree-v1,lop,code-v1";
                    code = "set role = 'rpu';";
                };
            };
            "#,
        );
        assert_eq!(run_all(&mut ctx, &file), [true]);

        let role = |path: &str| {
            let id = ctx.tree.find_node(path).unwrap();
            ctx.tree.node(id).property("role").and_then(|p| p.as_str()).map(str::to_owned)
        };
        assert_eq!(role("/cpus/cpu@0").as_deref(), Some("apu"));
        assert_eq!(role("/cpus/cpu@1").as_deref(), Some("apu"));
        assert_eq!(role("/cpus/cpu@2").as_deref(), Some("rpu"));
        assert_eq!(ctx.result("test.lop:/lops/lop_0/false_1"), Some(true));
        assert_eq!(ctx.result("test.lop:/lops/lop_0"), Some(true));
    }

    #[test]
    fn nothing_to_match() {
        let mut ctx = context();
        let file = rules(
            r#"
            lop_0 {
                compatible = "system-device-tree-v1,lop,conditional-v1";
                cond_root = "gpu";
                gpu { compatible = "vendor,gpu"; };
            };
            lop_1 {
                compatible = "system-device-tree-v1,lop,conditional-v1";
                cond_root = "absent";
            };
            "#,
        );
        assert_eq!(run_all(&mut ctx, &file), [false, false]);
    }

    #[test]
    fn every_condition_must_hold() {
        let mut ctx = context();
        let file = rules(
            r#"
            lop_0 {
                compatible = "system-device-tree-v1,lop,conditional-v1";
                cond_root = "cpus";
                cpus {
                    cpu {
                        status = "disabled";
                        compatible = "arm,cortex-a53";
                    };
                };
                true {
                    compatible = "system-device-tree-v1,lop,code-v1";
                    code = "set hit-true = true;";
                };
                false_1 {
                    compatible = "system-device-tree-v1,lop,code-v1";
                    code = "set hit-false = true; return false;";
                };
                false_2 {
                    compatible = "system-device-tree-v1,lop,code-v1";
                    code = "set after-false = true;";
                };
            };
            lop_1 {
                compatible = "system-device-tree-v1,lop,conditional-v1";
                cond_root = "cpus";
                cpus {
                    cpu {
                        status__not__ = "disabled";
                        compatible = "arm,cortex-r5";
                    };
                };
                true {
                    compatible = "system-device-tree-v1,lop,code-v1";
                    code = "set rpu = true;";
                };
            };
            "#,
        );
        assert_eq!(run_all(&mut ctx, &file), [false, true]);

        let has = |path: &str, name: &str| {
            let id = ctx.tree.find_node(path).unwrap();
            ctx.tree.node(id).property(name).is_some()
        };
        for cpu in ["/cpus/cpu@0", "/cpus/cpu@1", "/cpus/cpu@2"] {
            assert!(!has(cpu, "hit-true"), "{cpu}");
            assert!(has(cpu, "hit-false"), "{cpu}");
            assert!(!has(cpu, "after-false"), "{cpu}");
        }
        assert_eq!(ctx.result("test.lop:/lops/lop_0/false_2"), None);

        assert!(!has("/cpus/cpu@0", "rpu"));
        assert!(!has("/cpus/cpu@1", "rpu"));
        assert!(has("/cpus/cpu@2", "rpu"));
    }
}
