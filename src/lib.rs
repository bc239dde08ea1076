// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A rule-driven device tree transformation pipeline.
//!
//! A system device tree is loaded into a [`PipelineContext`], and rule
//! files ("lops", see [`rule`]) are run against it by a [`Pipeline`] in
//! priority order. Rules select nodes, edit properties, add, move and
//! delete nodes, write subsets of the tree to files, run inline programs
//! ([`expr`]) and hand the tree to [`assists`].
//!
//! # Examples
//!
//! ```
//! use lopper::context::{Options, PipelineContext};
//! use lopper::pipeline::Pipeline;
//! use lopper::rule::RuleFile;
//! use lopper_device_tree::dts;
//!
//! let tree = dts::parse(r#"/dts-v1/; / { cpus { cpu@0 { status = "okay"; }; }; };"#).unwrap();
//! let rules = RuleFile::parse(
//!     "rules.lop",
//!     r#"/dts-v1/;
//!     / {
//!         lops {
//!             lop_0 {
//!                 compatible = "system-device-tree-v1,lop,modify";
//!                 modify = "/cpus/cpu@0:status:disabled";
//!             };
//!         };
//!     };"#,
//! )
//! .unwrap();
//!
//! let mut pipeline = Pipeline::new(PipelineContext::new(tree, Options::default()));
//! pipeline.add_rules(rules);
//! pipeline.run().unwrap();
//!
//! let ctx = pipeline.into_context();
//! let cpu = ctx.tree.find_node("/cpus/cpu@0").unwrap();
//! assert_eq!(ctx.tree.node(cpu).get("status").unwrap().as_str(), Some("disabled"));
//! ```

#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod assists;
pub mod context;
pub mod error;
pub mod expr;
pub mod io;
pub mod logger;
pub mod ops;
pub mod pipeline;
pub mod rule;

pub use context::{Options, PipelineContext};
pub use error::{LopperError, Result};
pub use pipeline::Pipeline;
