// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `meta`: rule-provided metadata. The only kind understood is
//! `phandle-desc`, which rebuilds the phandle descriptor table:
//!
//! ```text
//! lop_0 {
//!     compatible = "system-device-tree-v1,lop,meta-v1", "phandle-desc-v1";
//!     reset;
//!     access = "phandle flags";
//!     -clocks;
//! };
//! ```
//!
//! The table starts from the defaults. `reset` empties it, `-name` removes
//! an entry and any other property adds or replaces one.

use log::debug;
use lopper_device_tree::model::PhandleDescriptors;

use super::Invocation;
use crate::context::PipelineContext;
use crate::error::{LopperError, Result};
use crate::rule::Rule;

const SKIPPED: [&str; 3] = ["compatible", "phandle", "noexec"];

pub(super) fn run(ctx: &mut PipelineContext, rule: &Rule<'_>, _: &Invocation) -> Result<bool> {
    if !rule
        .node()
        .compatible()
        .iter()
        .any(|c| c.contains("phandle-desc"))
    {
        debug!("{}: no metadata kind this engine understands", rule.path());
        return Ok(false);
    }

    let mut descriptors = PhandleDescriptors::default();
    for prop in rule.node().properties() {
        let name = prop.name();
        if SKIPPED.contains(&name) || name.starts_with("lopper-comment") {
            continue;
        }
        if name == "reset" {
            debug!("clearing the phandle descriptor table");
            descriptors = PhandleDescriptors::empty();
        } else if let Some(removed) = name.strip_prefix('-') {
            descriptors.remove(removed);
        } else {
            let format = rule.string(name).ok_or_else(|| {
                LopperError::malformed(rule.path(), format!("`{name}` needs a field list"))
            })?;
            debug!("phandle descriptor {name} = {format}");
            descriptors.insert(name, &format);
        }
    }
    ctx.descriptors = descriptors;
    Ok(true)
}
