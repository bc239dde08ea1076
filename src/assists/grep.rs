// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use log::info;
use lopper_device_tree::model::{DeviceTree, NodeId, PropertyValue};
use regex::Regex;

use super::{Assist, AssistContext, AssistOptions};
use crate::error::{LopperError, Result};

/// Prints the properties whose name matches `args[0]`, on the nodes whose
/// path or label matches `args[1]` (every node if absent).
#[derive(Debug, Clone, Copy, Default)]
pub struct Grep;

impl Assist for Grep {
    fn name(&self) -> &str {
        "grep"
    }

    fn is_compatible(&self, id: &str) -> bool {
        id.contains("module,grep")
    }

    fn run(
        &self,
        ctx: &mut AssistContext<'_>,
        _target: NodeId,
        options: &AssistOptions,
    ) -> Result<bool> {
        let Some(property) = options.args.first() else {
            return Err(LopperError::assist("grep", "missing property pattern"));
        };
        let node_pattern = options.args.get(1).map_or("", String::as_str);

        let found = grep(ctx.tree, property, node_pattern)?;
        if found.is_empty() {
            println!("{property}: not found");
        }
        for (path, line) in &found {
            println!("{path}: {line}");
        }
        info!("grep: {} matches for {property}", found.len());
        Ok(true)
    }
}

/// Returns `(path, "name = value;")` for every match, in tree order.
pub(super) fn grep(
    tree: &mut DeviceTree,
    property: &str,
    node_pattern: &str,
) -> Result<Vec<(String, String)>> {
    if tree.is_dirty() {
        tree.sync();
    }
    let property = Regex::new(&format!("^(?:{property})$"))
        .map_err(|e| LopperError::assist("grep", e.to_string()))?;

    let mut nodes = tree.nodes(node_pattern)?;
    for id in tree.lnodes(node_pattern)? {
        if !nodes.contains(&id) {
            nodes.push(id);
        }
    }

    let mut found = Vec::new();
    for id in nodes {
        let node = tree.node(id);
        for prop in node.properties().filter(|p| property.is_match(p.name())) {
            let line = if *prop.value() == PropertyValue::Empty {
                format!("{};", prop.name())
            } else {
                format!("{} = {};", prop.name(), prop.value())
            };
            found.push((node.abs_path().to_owned(), line));
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use lopper_device_tree::dts;

    use super::*;

    const SOURCE: &str = r#"
        /dts-v1/;
        / {
            cpus {
                cpu@0 { compatible = "arm,cortex-a53"; status = "okay"; };
                cpu@1 { compatible = "arm,cortex-a53"; status = "disabled"; };
            };
            uart: serial@1000 { status = "okay"; dma-coherent; };
        };
    "#;

    #[test]
    fn by_property_and_node() {
        let mut tree = dts::parse(SOURCE).unwrap();

        let all = grep(&mut tree, "status", "").unwrap();
        assert_eq!(
            all,
            vec![
                ("/cpus/cpu@0".to_owned(), "status = \"okay\";".to_owned()),
                ("/cpus/cpu@1".to_owned(), "status = \"disabled\";".to_owned()),
                ("/serial@1000".to_owned(), "status = \"okay\";".to_owned()),
            ]
        );

        let by_label = grep(&mut tree, "dma-.*", "uart").unwrap();
        assert_eq!(
            by_label,
            vec![("/serial@1000".to_owned(), "dma-coherent;".to_owned())]
        );

        assert!(grep(&mut tree, "reg", "/cpus").unwrap().is_empty());
    }

    #[test]
    fn needs_a_pattern() {
        let mut tree = dts::parse(SOURCE).unwrap();
        let descriptors = Default::default();
        let root = tree.root();
        let mut ctx = AssistContext {
            tree: &mut tree,
            descriptors: &descriptors,
            werror: false,
        };
        assert!(matches!(
            Grep.run(&mut ctx, root, &AssistOptions::default()),
            Err(LopperError::AssistFailure { .. })
        ));
    }
}
