// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::cmp::Ordering;
use std::collections::HashMap;

use log::{debug, trace};
use lopper_device_tree::model::{DeviceTree, NodeId, PropertyValue};
use regex::Regex;

use super::ast::{Accessor, BinaryOp, Expr, Func, RefOp, SetValue, Stmt};
use super::{ExprError, Program, Value};

enum Flow {
    Next,
    Return(Value),
}

/// Runs programs against a tree.
#[derive(Debug)]
pub struct Interpreter<'t> {
    tree: &'t mut DeviceTree,
    vars: HashMap<String, Value>,
    printed: Vec<String>,
}

impl<'t> Interpreter<'t> {
    /// Creates an interpreter without variables.
    pub fn new(tree: &'t mut DeviceTree) -> Self {
        Self {
            tree,
            vars: HashMap::new(),
            printed: Vec::new(),
        }
    }

    /// Defines `$name` for the programs run afterwards.
    pub fn set_var(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    /// The tree programs run against.
    #[must_use]
    pub fn tree(&self) -> &DeviceTree {
        self.tree
    }

    /// Lines written by `print` statements so far.
    #[must_use]
    pub fn printed(&self) -> &[String] {
        &self.printed
    }

    /// Runs `program` with `start` as the current node. Returns the value of
    /// the first `return` reached, or `true` if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if a statement cannot be evaluated. Changes made
    /// before the error are kept.
    pub fn run(&mut self, program: &Program, start: NodeId) -> Result<Value, ExprError> {
        match self.block(&program.statements, start)? {
            Flow::Return(value) => Ok(value),
            Flow::Next => Ok(Value::Bool(true)),
        }
    }

    fn block(&mut self, statements: &[Stmt], node: NodeId) -> Result<Flow, ExprError> {
        for statement in statements {
            if let Flow::Return(value) = self.statement(statement, node)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Next)
    }

    fn statement(&mut self, statement: &Stmt, node: NodeId) -> Result<Flow, ExprError> {
        match statement {
            Stmt::If(condition, then, otherwise) => {
                let branch = if self.eval(condition, node)?.truthy() {
                    then
                } else {
                    otherwise
                };
                return self.block(branch, node);
            }
            Stmt::Foreach(pattern, body) => {
                if self.tree.is_dirty() {
                    self.tree.sync();
                }
                for id in self.tree.nodes(pattern)? {
                    // An earlier iteration may have deleted it.
                    if !self.tree.contains(id) {
                        continue;
                    }
                    if let Flow::Return(value) = self.block(body, id)? {
                        return Ok(Flow::Return(value));
                    }
                }
            }
            Stmt::Set(name, value) => {
                let value = self.property_value(value, node)?;
                let node = self.live(node)?;
                trace!("{}: {name} = {value}", self.tree.path_of(node));
                self.tree.set_property(node, name, value)?;
            }
            Stmt::Unset(name) => {
                let node = self.live(node)?;
                self.tree.delete_property(node, name);
            }
            Stmt::Delete => {
                let node = self.live(node)?;
                debug!("deleting {}", self.tree.path_of(node));
                self.tree.delete(node)?;
            }
            Stmt::Ref(op) => {
                let id = self.live(node)?;
                let node = self.tree.node_mut(id);
                match *op {
                    RefOp::Set(count) => {
                        node.reset_ref();
                        node.set_ref(count);
                    }
                    RefOp::Add(count) if count >= 0 => node.set_ref(count),
                    RefOp::Add(count) => {
                        for _ in count..0 {
                            node.dec_ref();
                        }
                    }
                }
            }
            Stmt::Print(parts) => {
                let mut line = String::new();
                for part in parts {
                    line.push_str(&self.eval(part, node)?.to_string());
                }
                self.printed.push(line);
            }
            Stmt::Return(expr) => return Ok(Flow::Return(self.eval(expr, node)?)),
        }
        Ok(Flow::Next)
    }

    fn live(&self, node: NodeId) -> Result<NodeId, ExprError> {
        if self.tree.contains(node) {
            Ok(node)
        } else {
            Err(ExprError::Eval("the current node was deleted".into()))
        }
    }

    fn property_value(&mut self, value: &SetValue, node: NodeId) -> Result<PropertyValue, ExprError> {
        let values = match value {
            SetValue::Cells(cells) => {
                return Ok(match cells.as_slice() {
                    [] => PropertyValue::Empty,
                    [cell] => PropertyValue::U32(*cell),
                    _ => PropertyValue::U32List(cells.clone()),
                });
            }
            SetValue::Exprs(exprs) => exprs
                .iter()
                .map(|e| self.eval(e, node))
                .collect::<Result<Vec<_>, _>>()?,
        };
        let values = match <[Value; 1]>::try_from(values) {
            Ok([Value::Bool(true)]) => return Ok(PropertyValue::Empty),
            Ok([single]) => vec![single],
            Err(values) => values,
        };
        let values: Vec<Value> = values
            .into_iter()
            .flat_map(|v| match v {
                Value::List(items) => items,
                other => vec![other],
            })
            .collect();

        match values.as_slice() {
            [] => return Ok(PropertyValue::Empty),
            [Value::Str(s)] => return Ok(PropertyValue::Str(s.clone())),
            _ => {}
        }
        if values.iter().all(|v| matches!(v, Value::Str(_))) {
            return Ok(PropertyValue::StrList(
                values.iter().map(ToString::to_string).collect(),
            ));
        }
        let cells = values
            .iter()
            .map(|v| match v {
                Value::Int(i) => u32::try_from(*i)
                    .map_err(|_| ExprError::Eval(format!("{i} does not fit in a cell"))),
                Value::Bool(b) => Ok(u32::from(*b)),
                other => Err(ExprError::Eval(format!(
                    "cannot store a {} in a property",
                    other.type_name()
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(match cells.as_slice() {
            [cell] => PropertyValue::U32(*cell),
            _ => PropertyValue::U32List(cells),
        })
    }

    fn eval(&mut self, expr: &Expr, node: NodeId) -> Result<Value, ExprError> {
        Ok(match expr {
            Expr::Lit(value) => value.clone(),
            Expr::Var(name) => self.vars.get(name).cloned().unwrap_or_default(),
            Expr::Node(accessor) => {
                let n = self.tree.node(self.live(node)?);
                match accessor {
                    Accessor::Name => Value::Str(n.name().to_owned()),
                    Accessor::Path => Value::Str(self.tree.path_of(node)),
                    Accessor::Ref => Value::Int(i64::from(n.ref_count())),
                    Accessor::Phandle => n.phandle().map_or(Value::Nil, |p| Value::Int(i64::from(p))),
                    Accessor::Depth => Value::Int(i64::try_from(n.depth()).unwrap_or(i64::MAX)),
                }
            }
            Expr::Call(func, argument) => {
                let argument = self.eval(argument, node)?;
                self.call(*func, argument, node)?
            }
            Expr::Not(inner) => Value::Bool(!self.eval(inner, node)?.truthy()),
            Expr::Neg(inner) => match self.eval(inner, node)? {
                Value::Int(i) => Value::Int(-i),
                other => {
                    return Err(ExprError::Eval(format!("cannot negate a {}", other.type_name())));
                }
            },
            Expr::Binary(left, BinaryOp::And, right) => {
                Value::Bool(self.eval(left, node)?.truthy() && self.eval(right, node)?.truthy())
            }
            Expr::Binary(left, BinaryOp::Or, right) => {
                Value::Bool(self.eval(left, node)?.truthy() || self.eval(right, node)?.truthy())
            }
            Expr::Binary(left, op, right) => {
                let left = self.eval(left, node)?;
                let right = self.eval(right, node)?;
                Value::Bool(compare(&left, *op, &right)?)
            }
        })
    }

    fn call(&mut self, func: Func, argument: Value, node: NodeId) -> Result<Value, ExprError> {
        let n = self.tree.node(self.live(node)?);
        Ok(match (func, argument) {
            (Func::Prop, Value::Str(name)) => {
                n.property(&name).map_or(Value::Nil, |p| Value::from(p.value()))
            }
            (Func::Has, Value::Str(name)) => Value::Bool(n.property(&name).is_some()),
            (Func::Compatible, Value::Str(pattern)) => {
                Value::Bool(n.is_compatible(&Regex::new(&pattern)?))
            }
            (Func::Len, Value::Str(s)) => Value::Int(i64::try_from(s.len()).unwrap_or(i64::MAX)),
            (Func::Len, Value::List(items)) => {
                Value::Int(i64::try_from(items.len()).unwrap_or(i64::MAX))
            }
            (Func::Len, Value::Nil) => Value::Int(0),
            (Func::Len, _) => Value::Int(1),
            (func, other) => {
                return Err(ExprError::Eval(format!(
                    "{func:?} takes a string, not a {}",
                    other.type_name()
                )));
            }
        })
    }
}

/// Applies a comparison. A list on the left matches if any of its elements
/// does, so `prop("compatible") == "ns16550a"` works on string lists.
fn compare(left: &Value, op: BinaryOp, right: &Value) -> Result<bool, ExprError> {
    if let (Value::List(items), Value::Str(_) | Value::Int(_)) = (left, right) {
        for item in items {
            if compare(item, op, right)? {
                return Ok(true);
            }
        }
        return Ok(false);
    }
    Ok(match op {
        BinaryOp::Eq => left == right,
        BinaryOp::Ne => left != right,
        BinaryOp::Match => match (left, right) {
            (Value::Nil, _) => false,
            (_, Value::Str(pattern)) => Regex::new(pattern)?.is_match(&left.to_string()),
            (_, other) => {
                return Err(ExprError::Eval(format!(
                    "=~ needs a string pattern, not a {}",
                    other.type_name()
                )));
            }
        },
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (left, right) {
                (Value::Int(a), Value::Int(b)) => a.cmp(b),
                (Value::Str(a), Value::Str(b)) => a.cmp(b),
                _ => {
                    return Err(ExprError::Eval(format!(
                        "cannot order a {} and a {}",
                        left.type_name(),
                        right.type_name()
                    )));
                }
            };
            match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }
        }
        BinaryOp::And | BinaryOp::Or => left.truthy() && right.truthy(),
    })
}

#[cfg(test)]
mod tests {
    use lopper_device_tree::dts;

    use super::*;

    const TREE: &str = r#"
        /dts-v1/;
        / {
            cpus {
                cpu@0 { compatible = "arm,cortex-a53"; reg = <0>; };
                cpu@1 { compatible = "arm,cortex-a53"; reg = <1>; };
                cpu@2 { compatible = "arm,cortex-r5", "arm,armv7r"; reg = <2>; };
            };
            uart: serial@1000 { compatible = "ns16550a"; reg = <0x1000 0x100>; };
        };
    "#;

    fn run(tree: &mut DeviceTree, source: &str, start: &str) -> Result<Value, ExprError> {
        let program = Program::parse(source)?;
        let start = tree.find_node(start).unwrap();
        Interpreter::new(tree).run(&program, start)
    }

    #[test]
    fn reads_the_current_node() {
        let mut tree = dts::parse(TREE).unwrap();
        let value = |tree: &mut DeviceTree, source: &str| run(tree, source, "/cpus/cpu@2").unwrap();

        assert_eq!(value(&mut tree, "return name;"), Value::Str("cpu@2".into()));
        assert_eq!(value(&mut tree, "return depth;"), Value::Int(2));
        assert_eq!(value(&mut tree, "return prop(\"reg\") == 2;"), Value::Bool(true));
        assert_eq!(value(&mut tree, "return prop(\"compatible\") == \"arm,armv7r\";"), Value::Bool(true));
        assert_eq!(value(&mut tree, "return compatible(\"r5$\") && !has(\"status\");"), Value::Bool(true));
        assert_eq!(value(&mut tree, "return prop(\"status\");"), Value::Nil);
        assert_eq!(value(&mut tree, "return len(prop(\"compatible\"));"), Value::Int(2));
        assert_eq!(value(&mut tree, "if path =~ \"^/cpus\" { return 1; } return 2;"), Value::Int(1));
        assert_eq!(value(&mut tree, "print \"no return\";"), Value::Bool(true));
    }

    #[test]
    fn edits_nodes() {
        let mut tree = dts::parse(TREE).unwrap();
        run(
            &mut tree,
            r#"
            foreach "/cpus/cpu@.*" {
                if compatible("cortex-a53") { set role = "apu"; ref +2; } else { set role = 'rpu', 'lockstep'; }
                set id = prop("reg"), 0x10;
                unset reg;
            }
            "#,
            "/",
        )
        .unwrap();

        let cpu0 = tree.find_node("/cpus/cpu@0").unwrap();
        assert_eq!(tree.node(cpu0).get("role").unwrap().as_str(), Some("apu"));
        assert_eq!(tree.node(cpu0).ref_count(), 2);
        assert_eq!(tree.node(cpu0).get("id").unwrap().value().cells(), [0, 0x10]);
        assert!(tree.node(cpu0).property("reg").is_none());
        let cpu2 = tree.find_node("/cpus/cpu@2").unwrap();
        assert_eq!(tree.node(cpu2).get("role").unwrap().value().strings(), ["rpu", "lockstep"]);
    }

    #[test]
    fn variables_and_printing() {
        let mut tree = dts::parse(TREE).unwrap();
        let program = Program::parse("print \"mode=\", $mode, \" \", name; return $missing;").unwrap();
        let uart = tree.find_node("/serial@1000").unwrap();
        let mut interpreter = Interpreter::new(&mut tree);
        interpreter.set_var("mode", Value::Str("fast".into()));
        assert_eq!(interpreter.run(&program, uart).unwrap(), Value::Nil);
        assert_eq!(interpreter.printed(), ["mode=fast serial@1000"]);
    }

    #[test]
    fn deleting_and_errors() {
        let mut tree = dts::parse(TREE).unwrap();
        run(&mut tree, "foreach \"/cpus/cpu@[01]\" { delete; }", "/").unwrap();
        tree.sync();
        assert_eq!(tree.nodes("/cpus/cpu@.*").unwrap().len(), 1);

        assert!(matches!(
            run(&mut tree, "delete; set a = 1;", "/cpus/cpu@2"),
            Err(ExprError::Eval(_))
        ));
        assert!(matches!(run(&mut tree, "set a = -1;", "/cpus"), Err(ExprError::Eval(_))));
        assert!(matches!(run(&mut tree, "return name < 1;", "/cpus"), Err(ExprError::Eval(_))));
        assert!(matches!(run(&mut tree, "return name =~ \"(\";", "/cpus"), Err(ExprError::Regex(_))));
    }
}
