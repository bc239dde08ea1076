// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Syntax tree of a DTS source file, borrowing from the source text.

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Dts<'s> {
    pub(crate) memreserves: Vec<(u64, u64)>,
    pub(crate) items: Vec<TopItem<'s>>,
}

/// A top-level statement, kept in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TopItem<'s> {
    /// `/ { ... };`
    Root(Node<'s>),
    /// `&label { ... };` or `&{/path} { ... };`
    Override(Reference<'s>, Node<'s>),
    /// `/delete-node/ &label;`
    DeleteNode(Reference<'s>),
    /// `#include "file"` or `/include/ "file"`
    Include(&'s str),
}

/// A `&label` or `&{/path}` reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reference<'s> {
    Label(&'s str),
    Path(&'s str),
}

impl Reference<'_> {
    pub(crate) fn target(&self) -> &str {
        match self {
            Reference::Label(s) | Reference::Path(s) => s,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Node<'s> {
    pub(crate) name: &'s str,
    pub(crate) labels: Vec<&'s str>,
    pub(crate) items: Vec<NodeItem<'s>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NodeItem<'s> {
    Property(Property<'s>),
    Child(Node<'s>),
    DeleteProperty(&'s str),
    DeleteNode(&'s str),
    Include(&'s str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Property<'s> {
    pub(crate) name: &'s str,
    /// `None` for a property without a value, such as `ranges;`.
    pub(crate) values: Option<Vec<Value<'s>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Value<'s> {
    /// A string literal with its escapes still in place.
    Str(&'s str),
    /// A cell array with its element width in bits.
    Cells(u32, Vec<Cell<'s>>),
    Bytes(Vec<u8>),
    /// A reference that expands to the target's path.
    PathRef(Reference<'s>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Cell<'s> {
    Expr(Expr),
    Ref(Reference<'s>),
}

/// An integer expression, evaluated when the tree is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Expr {
    Lit(u64),
    Unary(UnaryOp, Box<Expr>),
    Binary(Box<Expr>, BinaryOp, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Neg,
    BitNot,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Mul,
    Div,
    Mod,
    Add,
    Sub,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    And,
    Or,
}

impl Expr {
    /// Evaluates the expression with wrapping 64-bit arithmetic.
    pub(crate) fn eval(&self) -> Result<u64, String> {
        Ok(match self {
            Expr::Lit(v) => *v,
            Expr::Unary(op, e) => {
                let v = e.eval()?;
                match op {
                    UnaryOp::Neg => v.wrapping_neg(),
                    UnaryOp::BitNot => !v,
                    UnaryOp::Not => u64::from(v == 0),
                }
            }
            Expr::Ternary(cond, then, otherwise) => {
                if cond.eval()? != 0 {
                    then.eval()?
                } else {
                    otherwise.eval()?
                }
            }
            Expr::Binary(l, op, r) => {
                let (l, r) = (l.eval()?, r.eval()?);
                match op {
                    BinaryOp::Mul => l.wrapping_mul(r),
                    BinaryOp::Div => l.checked_div(r).ok_or("division by zero")?,
                    BinaryOp::Mod => l.checked_rem(r).ok_or("division by zero")?,
                    BinaryOp::Add => l.wrapping_add(r),
                    BinaryOp::Sub => l.wrapping_sub(r),
                    BinaryOp::Shl => l.checked_shl(u32::try_from(r).unwrap_or(u32::MAX)).unwrap_or(0),
                    BinaryOp::Shr => l.checked_shr(u32::try_from(r).unwrap_or(u32::MAX)).unwrap_or(0),
                    BinaryOp::Lt => u64::from(l < r),
                    BinaryOp::Le => u64::from(l <= r),
                    BinaryOp::Gt => u64::from(l > r),
                    BinaryOp::Ge => u64::from(l >= r),
                    BinaryOp::Eq => u64::from(l == r),
                    BinaryOp::Ne => u64::from(l != r),
                    BinaryOp::BitAnd => l & r,
                    BinaryOp::BitXor => l ^ r,
                    BinaryOp::BitOr => l | r,
                    BinaryOp::And => u64::from(l != 0 && r != 0),
                    BinaryOp::Or => u64::from(l != 0 || r != 0),
                }
            }
        })
    }
}
