// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Reduces a system device tree to what one domain may access.
//!
//! The target is a domain node carrying
//!
//! - `cpus = <&cluster mask mode ...>`: the CPUs of each cluster whose bit is
//!   set in `mask` are kept, the others and all unreferenced clusters go;
//! - `access = <&device flags ...>`: the devices the domain may use;
//! - optionally `include = <&group ...>`: resource groups whose own `access`
//!   lists are added;
//! - optionally `memory = <start size ...>`: the memory the domain gets, laid
//!   out with the `#address-cells`/`#size-cells` of the memory nodes.
//!
//! Accessed devices are marked with their subnodes, ancestors and the nodes
//! they point at, then unreferenced `simple-bus` nodes, children of
//! `simple-bus` nodes and `reserved-memory` regions are deleted.

use log::{debug, info, warn};
use lopper_device_tree::model::{DeviceTree, NodeId, PhandleDescriptors, prune};
use regex::Regex;

use super::{Assist, AssistContext, AssistOptions};
use crate::error::{LopperError, Result};

/// The `domain_access` assist.
#[derive(Debug, Clone, Copy, Default)]
pub struct DomainAccess;

impl Assist for DomainAccess {
    fn name(&self) -> &str {
        "domain_access"
    }

    fn is_compatible(&self, id: &str) -> bool {
        ["openamp,domain-v1", "access-domain", "module,domain_access"]
            .iter()
            .any(|known| id.contains(known))
    }

    fn run(
        &self,
        ctx: &mut AssistContext<'_>,
        target: NodeId,
        _options: &AssistOptions,
    ) -> Result<bool> {
        let tree = &mut *ctx.tree;
        if tree.is_dirty() {
            tree.sync();
        }
        if !tree.contains(target) {
            return Err(LopperError::assist("domain_access", "target node was deleted"));
        }
        info!("domain_access: processing {}", tree.path_of(target));

        let root = tree.root();
        prune::reset(tree, root);
        prune::mark(tree, root, &[target]);

        let cpus_deleted = reference_cpus(tree, target, ctx.descriptors);
        let accessed = reference_accesses(tree, target, ctx.descriptors, ctx.werror)?;
        debug!("domain_access: {} directly accessed nodes", accessed.len());

        let mut deleted = cpus_deleted;
        let simple_bus = compatible("simple-bus")?;
        deleted.extend(prune::filter_unreferenced(tree, root, |tree, id| {
            tree.node(id).is_compatible(&simple_bus)
                || tree
                    .node(id)
                    .parent()
                    .is_some_and(|p| tree.node(p).is_compatible(&simple_bus))
        }));

        let reserved: Vec<NodeId> = tree
            .subnodes(root, None)
            .into_iter()
            .filter(|&id| tree.node(id).name() == "reserved-memory")
            .collect();
        for region in reserved {
            if tree.contains(region) {
                deleted.extend(prune::filter_unreferenced(tree, region, |_, _| true));
            }
        }
        info!("domain_access: deleted {} nodes", deleted.len());

        let memory = tree
            .node(target)
            .property("memory")
            .map(|p| p.value().cells());
        if let Some(memory) = memory {
            update_memory(tree, &memory);
        }
        Ok(true)
    }
}

fn compatible(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| LopperError::assist("domain_access", e.to_string()))
}

/// References the CPUs enabled by the domain's `cpus` masks and deletes
/// the masked-out CPUs and every cluster the domain does not use. Returns
/// the deleted paths.
fn reference_cpus(
    tree: &mut DeviceTree,
    domain: NodeId,
    descriptors: &PhandleDescriptors,
) -> Vec<String> {
    let Some(cpus) = tree.node(domain).property("cpus") else {
        warn!("domain_access: {} has no cpus", tree.path_of(domain));
        return Vec::new();
    };
    let cells = cpus.value().cells();

    let mut masked_out = Vec::new();
    for record in cells.chunks(3) {
        let [phandle, mask, ..] = *record else {
            warn!("domain_access: truncated cpus record {record:?}");
            continue;
        };
        let Some(cluster) = tree.pnode(phandle) else {
            warn!("domain_access: cpus references missing phandle {phandle:#x}");
            continue;
        };
        let root = tree.root();
        prune::mark(tree, root, &[cluster]);

        let cores: Vec<NodeId> = tree
            .node(cluster)
            .children()
            .iter()
            .copied()
            .filter(|&c| tree.get(c).is_some_and(|n| n.name().starts_with("cpu@")))
            .collect();
        for (index, core) in cores.into_iter().enumerate() {
            if index < 32 && mask & (1 << index) != 0 {
                tree.ref_all(core, true, descriptors);
            } else {
                masked_out.push(core);
            }
        }
    }

    let mut deleted = Vec::new();
    for core in masked_out {
        if tree.node(core).ref_count() <= 0 {
            let path = tree.path_of(core);
            if tree.delete(core).is_ok() {
                deleted.push(path);
            }
        }
    }

    let cluster = Regex::new("cpus,cluster").ok();
    let root = tree.root();
    deleted.extend(tree.filter(root, |tree, id| {
        let node = tree.node(id);
        node.ref_count() <= 0 && cluster.as_ref().is_some_and(|re| node.is_compatible(re))
    }));
    deleted
}

/// Marks the nodes listed in `access` of the domain and of its included
/// resource groups.
fn reference_accesses(
    tree: &mut DeviceTree,
    domain: NodeId,
    descriptors: &PhandleDescriptors,
    strict: bool,
) -> Result<Vec<NodeId>> {
    let mut holders = vec![domain];
    if let Some(include) = tree.node(domain).property("include") {
        for phandle in include.value().cells() {
            match tree.pnode(phandle) {
                Some(group) => holders.push(group),
                None => warn!("domain_access: include references missing phandle {phandle:#x}"),
            }
        }
    }

    let root = tree.root();
    let mut accessed = Vec::new();
    for holder in holders {
        if tree.node(holder).property("access").is_none() {
            debug!("domain_access: {} has no access list", tree.path_of(holder));
            continue;
        }
        let targets =
            prune::mark_references(tree, root, holder, "access", descriptors, strict)?;
        for target in targets {
            tree.ref_all(target, true, descriptors);
            accessed.push(target);
        }
    }
    Ok(accessed)
}

fn cells_value(cells: &[u32]) -> u64 {
    cells
        .iter()
        .fold(0, |acc, &c| (acc << 32) | u64::from(c))
}

fn split_value(value: u64, count: usize) -> Vec<u32> {
    (0..count)
        .rev()
        .map(|i| match i {
            0 | 1 => u32::try_from((value >> (32 * i)) & 0xffff_ffff).unwrap_or_default(),
            _ => 0,
        })
        .collect()
}

fn size_cells(tree: &DeviceTree, id: NodeId, name: &str, default: u32) -> usize {
    let cells = tree
        .node(id)
        .parent()
        .and_then(|p| tree.node(p).property(name))
        .and_then(|p| p.as_u32())
        .unwrap_or(default);
    usize::try_from(cells).unwrap_or(1)
}

/// Rewrites the `reg` of the memory nodes that contain one of the domain's
/// `(start, size)` ranges so that they describe exactly those ranges.
fn update_memory(tree: &mut DeviceTree, domain_memory: &[u32]) {
    let memory_nodes: Vec<NodeId> = tree
        .subnodes(tree.root(), None)
        .into_iter()
        .filter(|&id| {
            let node = tree.node(id);
            node.depth() == 1 && (node.name() == "memory" || node.name().starts_with("memory@"))
        })
        .collect();

    for id in memory_nodes {
        let ac = size_cells(tree, id, "#address-cells", 2);
        let sc = size_cells(tree, id, "#size-cells", 1);
        let Some(reg) = tree.node(id).property("reg").map(|r| r.value().cells()) else {
            continue;
        };
        if ac + sc == 0 {
            continue;
        }

        let mut updated = Vec::new();
        for wanted in domain_memory.chunks(ac + sc) {
            if wanted.len() < ac + sc {
                break;
            }
            let start = cells_value(&wanted[..ac]);
            let size = cells_value(&wanted[ac..]);
            for entry in reg.chunks(ac + sc).filter(|e| e.len() == ac + sc) {
                let base = cells_value(&entry[..ac]);
                let length = cells_value(&entry[ac..]);
                if start >= base && start.saturating_add(size) <= base.saturating_add(length) {
                    updated.extend(split_value(start, ac));
                    updated.extend(split_value(size, sc));
                }
            }
        }

        if !updated.is_empty() && updated != reg {
            info!(
                "domain_access: {} reg updated to {updated:x?}",
                tree.path_of(id)
            );
            tree.node_mut(id).set("reg", updated);
        }
    }
}

#[cfg(test)]
mod tests {
    use lopper_device_tree::dts;
    use lopper_device_tree::model::PropertyValue;

    use super::*;

    const SYSTEM: &str = r#"
        /dts-v1/;
        / {
            #address-cells = <2>;
            #size-cells = <2>;

            cpus_a53: cpus-cluster@0 {
                compatible = "cpus,cluster";
                cpu@0 { reg = <0>; };
                cpu@1 { reg = <1>; };
            };
            cpus_r5: cpus-cluster@1 {
                compatible = "cpus,cluster";
                cpu@0 { reg = <0>; };
            };

            memory@0 {
                device_type = "memory";
                reg = <0x0 0x0 0x0 0x80000000>;
            };

            reserved-memory {
                rproc: buffer@3ed00000 { reg = <0x0 0x3ed00000 0x0 0x40000>; };
                spare@3ef00000 { reg = <0x0 0x3ef00000 0x0 0x40000>; };
            };

            clk: clock-controller { #clock-cells = <1>; };

            bus {
                compatible = "simple-bus";
                uart0: serial@1000 {
                    status = "okay";
                    clocks = <&clk 3>;
                };
                uart1: serial@2000 {
                    status = "disabled";
                };
            };

            other-bus {
                compatible = "simple-bus";
                gpio@3000 { };
            };

            domains {
                domain: domain@0 {
                    cpus = <&cpus_a53 0x2 0x0>;
                    access = <&uart0 0x0 &rproc 0x0>;
                    memory = <0x0 0x10000000 0x0 0x20000000>;
                };
            };
        };
    "#;

    fn run(tree: &mut DeviceTree, werror: bool) -> Result<bool> {
        tree.sync();
        let domain = tree.node_by_label("domain").unwrap();
        let descriptors = PhandleDescriptors::default();
        let mut ctx = AssistContext {
            tree,
            descriptors: &descriptors,
            werror,
        };
        DomainAccess.run(&mut ctx, domain, &AssistOptions::default())
    }

    #[test]
    fn ids() {
        assert!(DomainAccess.is_compatible("openamp,domain-v1"));
        assert!(DomainAccess.is_compatible("xlnx,access-domain"));
        assert!(!DomainAccess.is_compatible("module,grep"));
    }

    #[test]
    fn unaccessed_devices_are_removed() {
        let mut tree = dts::parse(SYSTEM).unwrap();
        assert!(run(&mut tree, false).unwrap());

        for kept in [
            "/bus",
            "/bus/serial@1000",
            "/clock-controller",
            "/cpus-cluster@0",
            "/cpus-cluster@0/cpu@1",
            "/reserved-memory/buffer@3ed00000",
            "/domains/domain@0",
        ] {
            assert!(tree.find_node(kept).is_some(), "{kept} was deleted");
        }
        for gone in [
            "/bus/serial@2000",
            "/other-bus",
            "/cpus-cluster@1",
            "/cpus-cluster@0/cpu@0",
            "/reserved-memory/spare@3ef00000",
        ] {
            assert!(tree.find_node(gone).is_none(), "{gone} survived");
        }
    }

    #[test]
    fn memory_is_narrowed() {
        let mut tree = dts::parse(SYSTEM).unwrap();
        run(&mut tree, false).unwrap();
        let memory = tree.find_node("/memory@0").unwrap();
        assert_eq!(
            tree.node(memory).property("reg").unwrap().value(),
            &PropertyValue::U32List(vec![0, 0x1000_0000, 0, 0x2000_0000])
        );
    }

    #[test]
    fn dangling_access_is_fatal_only_with_werror() {
        let source = SYSTEM.replace("access = <&uart0 0x0 &rproc 0x0>;", "access = <0x99 0x0>;");
        let mut tree = dts::parse(&source).unwrap();
        assert!(run(&mut tree, false).unwrap());
        assert!(tree.find_node("/bus").is_none());

        let mut tree = dts::parse(&source).unwrap();
        assert!(matches!(run(&mut tree, true), Err(LopperError::NotFound(_))));
    }

    #[test]
    fn cell_helpers() {
        assert_eq!(cells_value(&[0x1, 0x2]), 0x1_0000_0002);
        assert_eq!(split_value(0x1_0000_0002, 2), vec![1, 2]);
        assert_eq!(split_value(0x10, 1), vec![0x10]);
        assert_eq!(split_value(0x10, 3), vec![0, 0, 0x10]);
    }
}
