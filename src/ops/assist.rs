// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use lopper_device_tree::error::TreeError;

use super::{Invocation, find};
use crate::context::PipelineContext;
use crate::error::{LopperError, Result};
use crate::rule::Rule;

/// `assist-v1`: runs the assist compatible with `id` against the node named
/// by `node`.
pub(super) fn assist(
    ctx: &mut PipelineContext,
    rule: &Rule<'_>,
    invocation: &Invocation,
) -> Result<bool> {
    let target_name = match &invocation.start_node {
        Some(start) => start.clone(),
        None => rule.require("node")?,
    };
    let id = rule.string("id").unwrap_or_default();
    let args: Vec<String> = rule
        .strings("options")
        .iter()
        .flat_map(|o| o.split_whitespace())
        .map(str::to_owned)
        .collect();

    let Some(target) = find(ctx, &target_name) else {
        if ctx.options.werror {
            return Err(TreeError::NodeNotFound(target_name).into());
        }
        warn!("{}: assist target {target_name} not found", rule.path());
        return Ok(false);
    };
    info!("{}: assist `{id}` on {target_name} with {args:?}", rule.path());

    let mut options = ctx.assist_options(args);
    if let Some(outdir) = rule.string("outdir").filter(|o| !o.is_empty()) {
        options.outdir = PathBuf::from(outdir);
    }

    match ctx.run_assist(&id, target, &options) {
        None => {
            info!("{}: no assist is compatible with `{id}`", rule.path());
            Ok(false)
        }
        Some(Ok(true)) => Ok(true),
        Some(Ok(false)) => {
            warn!("{}: assist for `{id}` returned false", rule.path());
            if ctx.options.werror {
                return Err(LopperError::assist(id, "returned false"));
            }
            Ok(false)
        }
        Some(Err(e)) => {
            error!("{}: assist for `{id}` failed: {e}", rule.path());
            if ctx.options.werror {
                return Err(e);
            }
            Ok(false)
        }
    }
}

/// `load`: loads an assist module, with an optional `id` and `file_ext`.
pub(super) fn load(ctx: &mut PipelineContext, rule: &Rule<'_>, _: &Invocation) -> Result<bool> {
    let module = rule.require("load")?;
    info!("loading assist {module}");
    for dir in search_dirs(ctx) {
        let candidate = dir.join(&module);
        if candidate.exists() {
            debug!("{module} found at {}", candidate.display());
        }
    }

    let id = rule.string("id").filter(|s| !s.is_empty());
    let file_ext = rule
        .string("file_ext")
        .map(|e| e.trim_start_matches('.').to_owned())
        .filter(|s| !s.is_empty());
    ctx.assists.load(&module, id, file_ext)?;
    Ok(true)
}

fn search_dirs(ctx: &PipelineContext) -> Vec<PathBuf> {
    let mut dirs = vec![ctx.options.outdir.clone()];
    dirs.extend(ctx.options.load_paths.iter().cloned());
    dirs.push(Path::new(".").join("assists"));
    dirs
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;

    #[test]
    fn assist_runs_against_its_node() {
        let mut ctx = context();
        let file = rules(
            r#"
            lop_0 {
                compatible = "system-device-tree-v1,lop,load";
                load = "assists/grep.py";
                id = "module,grep";
            };
            lop_1 {
                compatible = "system-device-tree-v1,lop,assist-v1";
                node = "/";
                id = "module,grep";
                options = "status serial";
            };
            lop_2 {
                compatible = "system-device-tree-v1,lop,assist-v1";
                node = "/";
                id = "vendor,unknown";
            };
            lop_3 {
                compatible = "system-device-tree-v1,lop,assist-v1";
                node = "/nowhere";
                id = "module,grep";
            };
            "#,
        );
        assert_eq!(run_all(&mut ctx, &file), [true, true, false, false]);
        assert!(ctx.assists.is_loaded("grep"));
    }

    #[test]
    fn failures_under_werror() {
        let mut ctx = context();
        ctx.options.werror = true;
        let file = rules(
            r#"
            lop_0 {
                compatible = "system-device-tree-v1,lop,assist-v1";
                node = "/nowhere";
                id = "module,grep";
            };
            lop_1 {
                compatible = "system-device-tree-v1,lop,assist-v1";
                node = "uart0";
                id = "module,grep";
            };
            lop_2 {
                compatible = "system-device-tree-v1,lop,load";
                load = "no_such_assist";
            };
            "#,
        );
        let rules: Vec<_> = file.rules().collect();
        let run = |ctx: &mut PipelineContext, i: usize| {
            super::super::execute(ctx, &rules[i], &Invocation::default())
        };
        assert!(matches!(run(&mut ctx, 0), Err(LopperError::NotFound(_))));
        // grep without a pattern fails.
        assert!(matches!(run(&mut ctx, 1), Err(LopperError::AssistFailure { .. })));
        assert!(matches!(run(&mut ctx, 2), Err(LopperError::AssistFailure { .. })));
    }
}
