// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Syntax tree of a program.

use super::Value;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Stmt {
    /// `if cond { ... } else { ... }`
    If(Expr, Vec<Stmt>, Vec<Stmt>),
    /// `foreach "regex" { ... }`
    Foreach(String, Vec<Stmt>),
    /// `set name = value;`
    Set(String, SetValue),
    /// `unset name;`
    Unset(String),
    /// `delete;`
    Delete,
    /// `ref +n;`, `ref -n;` or `ref = n;`
    Ref(RefOp),
    /// `print a, b;`
    Print(Vec<Expr>),
    /// `return e;`
    Return(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SetValue {
    /// `<1 0x2>`
    Cells(Vec<u32>),
    /// One or more comma separated expressions.
    Exprs(Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefOp {
    Add(i32),
    Set(i32),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Lit(Value),
    /// `$name`
    Var(String),
    Node(Accessor),
    Call(Func, Box<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(Box<Expr>, BinaryOp, Box<Expr>),
}

/// A property of the current node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Accessor {
    Name,
    Path,
    Ref,
    Phandle,
    Depth,
}

impl Accessor {
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "name" => Accessor::Name,
            "path" => Accessor::Path,
            "ref" => Accessor::Ref,
            "phandle" => Accessor::Phandle,
            "depth" => Accessor::Depth,
            _ => return None,
        })
    }
}

/// A built-in function. Every function takes one argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Func {
    /// `prop("name")`: the value of a property, nil if absent.
    Prop,
    /// `has("name")`
    Has,
    /// `compatible("regex")`
    Compatible,
    /// `len(e)`
    Len,
}

impl Func {
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "prop" => Func::Prop,
            "has" => Func::Has,
            "compatible" => Func::Compatible,
            "len" => Func::Len,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Match,
    And,
    Or,
}
