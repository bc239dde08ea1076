// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Rule files and the rules they carry.
//!
//! A rule file is a device tree with a `/lops` node. Every child of `/lops`
//! whose `compatible` reads `<vendor>,lop,<kind>[-vN]` is a rule:
//!
//! ```dts
//! /dts-v1/;
//! / {
//!     priority = <3>;
//!     lops {
//!         lop_0 {
//!             compatible = "system-device-tree-v1,lop,modify";
//!             modify = "/cpus:status:disabled";
//!         };
//!     };
//! };
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use log::{debug, warn};
use lopper_device_tree::dts;
use lopper_device_tree::model::{
    DeviceTree, DeviceTreeNode, DeviceTreeProperty, Node, NodeId, PhandleDescriptors,
    PropertyValue,
};

use crate::error::{CodecError, LopperError, Result};

/// The compatible prefix of generated rules.
pub const LOP_COMPATIBLE: &str = "system-device-tree-v1,lop";

/// Priority of a rule file without a `priority` property.
pub const DEFAULT_PRIORITY: u8 = 5;

/// What a rule does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    /// Narrow or extend the current selection.
    Select,
    /// Change properties or move, rename and delete nodes.
    Modify,
    /// Add a template node to the tree.
    Add,
    /// Run child rules depending on property checks.
    Conditional,
    /// Write selected nodes to a file.
    Output,
    /// Store selected nodes as a named subtree.
    Tree,
    /// Run an assist against a node.
    Assist,
    /// Load an assist.
    Load,
    /// Run an inline program once.
    Code,
    /// Run an inline program once per selected node.
    Xlate,
    /// Print text or nodes.
    Print,
    /// Run another rule.
    Exec,
    /// Change pipeline metadata such as the phandle descriptor table.
    Meta,
}

impl RuleKind {
    /// Extracts the kind from a rule's `compatible` string.
    ///
    /// Returns `None` if the string does not describe a rule at all, and
    /// `Some(Err(word))` for a rule of unknown kind.
    #[must_use]
    pub fn from_compatible(compatible: &str) -> Option<std::result::Result<Self, String>> {
        let (_, rest) = compatible.split_once(",lop,")?;
        let word = rest.split(',').next().unwrap_or_default();
        let word = match word.rsplit_once("-v") {
            Some((kind, version)) if version.chars().all(|c| c.is_ascii_digit()) => kind,
            _ => word,
        };
        Some(word.parse().map_err(|()| word.to_owned()))
    }

    /// The compatible string of a generated rule of this kind.
    #[must_use]
    pub fn compatible(self) -> String {
        format!("{LOP_COMPATIBLE},{self}")
    }
}

impl FromStr for RuleKind {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        Ok(match s {
            "select" => RuleKind::Select,
            "modify" => RuleKind::Modify,
            "add" => RuleKind::Add,
            "conditional" => RuleKind::Conditional,
            "output" => RuleKind::Output,
            "tree" => RuleKind::Tree,
            "assist" => RuleKind::Assist,
            "load" => RuleKind::Load,
            "code" => RuleKind::Code,
            "xlate" => RuleKind::Xlate,
            "print" => RuleKind::Print,
            "exec" => RuleKind::Exec,
            "meta" => RuleKind::Meta,
            _ => return Err(()),
        })
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RuleKind::Select => "select-v1",
            RuleKind::Modify => "modify",
            RuleKind::Add => "add",
            RuleKind::Conditional => "conditional-v1",
            RuleKind::Output => "output",
            RuleKind::Tree => "tree",
            RuleKind::Assist => "assist-v1",
            RuleKind::Load => "load",
            RuleKind::Code => "code-v1",
            RuleKind::Xlate => "xlate-v1",
            RuleKind::Print => "print-v1",
            RuleKind::Exec => "exec",
            RuleKind::Meta => "meta-v1",
        })
    }
}

/// A parsed rule file.
#[derive(Debug, Clone)]
pub struct RuleFile {
    name: String,
    tree: DeviceTree,
    priority: u8,
    rules: Vec<NodeId>,
}

impl RuleFile {
    /// Reads a rule file in any tree format.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or decoded, or if its priority is
    /// out of range.
    pub fn read(path: &Path) -> Result<Self> {
        let tree = crate::io::read_tree(path)?;
        Self::from_tree(path.display().to_string(), tree)
    }

    /// Parses DTS rule source.
    ///
    /// # Errors
    ///
    /// Fails if the source does not parse or its priority is out of range.
    pub fn parse(name: impl Into<String>, source: &str) -> Result<Self> {
        let name = name.into();
        let tree = dts::parse(source).map_err(|e| LopperError::Codec {
            path: name.clone().into(),
            source: CodecError::from(e),
        })?;
        Self::from_tree(name, tree)
    }

    /// Collects the rules of a rule tree.
    ///
    /// # Errors
    ///
    /// Returns [`LopperError::MalformedRule`] if `priority` is not in 1..=9.
    pub fn from_tree(name: impl Into<String>, mut tree: DeviceTree) -> Result<Self> {
        let name = name.into();
        tree.resolve(&PhandleDescriptors::empty());

        let lops = tree.find_node("/lops");
        let priority = [Some(tree.root()), lops]
            .into_iter()
            .flatten()
            .find_map(|id| tree.node(id).property("priority"))
            .map(|p| {
                p.as_u32()
                    .and_then(|v| u8::try_from(v).ok())
                    .filter(|v| (1..=9).contains(v))
                    .ok_or_else(|| {
                        LopperError::malformed(&name, format!("priority {} is not in 1..=9", p.value()))
                    })
            })
            .transpose()?
            .unwrap_or(DEFAULT_PRIORITY);

        let mut rules = Vec::new();
        match lops {
            None => warn!("{name}: no /lops node, nothing to run"),
            Some(lops) => {
                for &id in tree.node(lops).children() {
                    match lop_kind(tree.node(id)) {
                        Some(Ok(_)) => rules.push(id),
                        Some(Err(kind)) => {
                            warn!("{name}: {}: unknown rule kind `{kind}`, skipped", tree.path_of(id));
                        }
                        None => debug!("{name}: {} is not a rule", tree.path_of(id)),
                    }
                }
            }
        }
        debug!("{name}: {} rules at priority {priority}", rules.len());

        Ok(Self {
            name,
            tree,
            priority,
            rules,
        })
    }

    /// Builds a rule file from generated rule nodes.
    #[must_use]
    pub fn generated(name: impl Into<String>, priority: u8, rules: Vec<DeviceTreeNode>) -> Self {
        let mut lops = DeviceTreeNode::new("lops");
        for rule in rules {
            lops.add_child(rule);
        }
        let root = DeviceTreeNode::builder("")
            .property(DeviceTreeProperty::new("priority", u32::from(priority)))
            .child(lops)
            .build();
        let name = name.into();
        match Self::from_tree(name.clone(), DeviceTree::from_root(root)) {
            Ok(file) => file,
            Err(e) => {
                warn!("{name}: {e}");
                Self {
                    name,
                    tree: DeviceTree::new(),
                    priority: DEFAULT_PRIORITY,
                    rules: Vec::new(),
                }
            }
        }
    }

    /// Where the rules came from.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The priority bucket, 1 (first) to 9 (last).
    #[must_use]
    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// The rule tree.
    #[must_use]
    pub fn tree(&self) -> &DeviceTree {
        &self.tree
    }

    /// The top-level rules in file order.
    pub fn rules(&self) -> impl Iterator<Item = Rule<'_>> {
        self.rules.iter().filter_map(|&id| self.rule(id))
    }

    /// Returns the rule at `id`, if that node is a rule of a known kind.
    #[must_use]
    pub fn rule(&self, id: NodeId) -> Option<Rule<'_>> {
        let kind = lop_kind(self.tree.get(id)?)?.ok()?;
        Some(Rule {
            file: self,
            id,
            kind,
        })
    }
}

fn lop_kind(node: &Node) -> Option<std::result::Result<RuleKind, String>> {
    node.compatible()
        .into_iter()
        .find_map(RuleKind::from_compatible)
}

/// One rule node of a [`RuleFile`].
#[derive(Debug, Clone, Copy)]
pub struct Rule<'a> {
    file: &'a RuleFile,
    id: NodeId,
    kind: RuleKind,
}

impl<'a> Rule<'a> {
    /// The rule's kind.
    #[must_use]
    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    /// The file holding the rule.
    #[must_use]
    pub fn file(&self) -> &'a RuleFile {
        self.file
    }

    /// The rule's node id in the rule tree.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The rule node.
    #[must_use]
    pub fn node(&self) -> &'a Node {
        self.file.tree.node(self.id)
    }

    /// Path of the rule node in the rule tree.
    #[must_use]
    pub fn path(&self) -> &'a str {
        self.node().abs_path()
    }

    /// Identifies the rule across all loaded files.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}:{}", self.file.name, self.path())
    }

    /// Returns a property value of the rule node.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&'a PropertyValue> {
        self.node().property(name).map(DeviceTreeProperty::value)
    }

    /// Returns the first string of a property, or the property rendered as
    /// text if it holds cells.
    #[must_use]
    pub fn string(&self, name: &str) -> Option<String> {
        self.strings(name).into_iter().next()
    }

    /// Returns the strings of a property, one per list element.
    #[must_use]
    pub fn strings(&self, name: &str) -> Vec<String> {
        match self.value(name) {
            None | Some(PropertyValue::Empty) => Vec::new(),
            Some(PropertyValue::Str(s)) => vec![s.clone()],
            Some(PropertyValue::StrList(v)) => v.clone(),
            Some(other) => other.cells().iter().map(u32::to_string).collect(),
        }
    }

    /// Returns the first string of a required property.
    ///
    /// # Errors
    ///
    /// Returns [`LopperError::MalformedRule`] if the property is missing.
    pub fn require(&self, name: &str) -> Result<String> {
        self.string(name).ok_or_else(|| {
            LopperError::malformed(self.path(), format!("{} rule needs `{name}`", self.kind))
        })
    }

    /// Returns a single-cell property.
    #[must_use]
    pub fn u32(&self, name: &str) -> Option<u32> {
        self.value(name).and_then(PropertyValue::as_u32)
    }

    /// Returns whether the rule only runs when another rule invokes it.
    #[must_use]
    pub fn is_noexec(&self) -> bool {
        self.node().property("noexec").is_some()
    }

    /// Returns the rule that the phandle in property `name` points at.
    #[must_use]
    pub fn linked_rule(&self, name: &str) -> Option<Rule<'a>> {
        let phandle = self.u32(name)?;
        self.file.rule(self.file.tree.pnode(phandle)?)
    }

    /// Returns the child node of the rule called `name`.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<NodeId> {
        self.file.tree.child_by_name(self.id, name)
    }

    /// Returns the child rules whose name starts with `prefix`, in order.
    #[must_use]
    pub fn child_rules(&self, prefix: &str) -> Vec<Rule<'a>> {
        self.node()
            .children()
            .iter()
            .filter(|&&c| {
                self.file
                    .tree
                    .get(c)
                    .is_some_and(|n| n.name().starts_with(prefix))
            })
            .filter_map(|&c| self.file.rule(c))
            .collect()
    }
}

impl fmt::Display for Rule<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.path(), self.kind)
    }
}

/// Builds a generated rule node.
#[must_use]
pub fn rule_node(
    name: &str,
    kind: RuleKind,
    properties: impl IntoIterator<Item = (&'static str, PropertyValue)>,
) -> DeviceTreeNode {
    let mut builder = DeviceTreeNode::builder(name)
        .property(DeviceTreeProperty::new("compatible", kind.compatible()));
    for (name, value) in properties {
        builder = builder.property(DeviceTreeProperty::new(name, value));
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_from_compatible() {
        let kind = |c| RuleKind::from_compatible(c);
        assert_eq!(kind("system-device-tree-v1,lop,select-v1"), Some(Ok(RuleKind::Select)));
        assert_eq!(kind("system-device-tree-v1,lop,modify"), Some(Ok(RuleKind::Modify)));
        assert_eq!(kind("system-device-tree-v1,lop,assist-v1"), Some(Ok(RuleKind::Assist)));
        assert_eq!(
            kind("system-device-tree-v1,lop,meta-v1,phandle-desc-v1"),
            Some(Ok(RuleKind::Meta))
        );
        assert_eq!(kind("vendor,lop,xlate-v2"), Some(Ok(RuleKind::Xlate)));
        assert_eq!(kind("system-device-tree-v1,lop,frobnicate"), Some(Err("frobnicate".into())));
        assert_eq!(kind("arm,cortex-a53"), None);

        for k in [RuleKind::Select, RuleKind::Code, RuleKind::Load, RuleKind::Meta] {
            assert_eq!(RuleKind::from_compatible(&k.compatible()), Some(Ok(k)));
        }
    }

    #[test]
    fn rules_and_priority() {
        let file = RuleFile::parse(
            "rules.dts",
            r#"
            /dts-v1/;
            / {
                priority = <2>;
                lops {
                    a: lop_0 {
                        compatible = "system-device-tree-v1,lop,select-v1";
                        select_1 = "/cpus";
                    };
                    lop_1 {
                        compatible = "system-device-tree-v1,lop,unknown";
                    };
                    lop_2 {
                        compatible = "system-device-tree-v1,lop,exec";
                        exec = <&a>;
                        noexec;
                    };
                    not-a-rule { };
                };
            };
            "#,
        )
        .unwrap();

        assert_eq!(file.priority(), 2);
        let rules: Vec<Rule<'_>> = file.rules().collect();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].kind(), RuleKind::Select);
        assert_eq!(rules[0].string("select_1").as_deref(), Some("/cpus"));
        assert_eq!(rules[0].key(), "rules.dts:/lops/lop_0");
        assert!(!rules[0].is_noexec());

        assert!(rules[1].is_noexec());
        assert_eq!(rules[1].linked_rule("exec").unwrap().id(), rules[0].id());
        assert!(matches!(
            rules[1].require("missing"),
            Err(LopperError::MalformedRule { .. })
        ));
    }

    #[test]
    fn priority_bounds() {
        let source = |p: u32| {
            format!("/dts-v1/;\n/ {{ lops {{ priority = <{p}>; }}; }};")
        };
        assert_eq!(RuleFile::parse("a", &source(9)).unwrap().priority(), 9);
        assert!(matches!(
            RuleFile::parse("a", &source(0)),
            Err(LopperError::MalformedRule { .. })
        ));
        assert_eq!(
            RuleFile::parse("a", "/dts-v1/;\n/ { lops { }; };").unwrap().priority(),
            DEFAULT_PRIORITY
        );
    }

    #[test]
    fn generated_rules() {
        let file = RuleFile::generated(
            "<assists>",
            1,
            vec![rule_node(
                "load_0",
                RuleKind::Load,
                [("load", PropertyValue::from("grep"))],
            )],
        );
        assert_eq!(file.priority(), 1);
        let rule = file.rules().next().unwrap();
        assert_eq!(rule.kind(), RuleKind::Load);
        assert_eq!(rule.path(), "/lops/load_0");
    }
}
