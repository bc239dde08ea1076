// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A small language for `code` and `xlate` rules.
//!
//! A program is a list of statements run against a current node of a
//! [`DeviceTree`](lopper_device_tree::model::DeviceTree):
//!
//! ```text
//! if compatible("cortex-r5") && prop("status") == "okay" {
//!     set role = "rpu";
//!     print "found ", path;
//! } else {
//!     unset role;
//! }
//! foreach "/soc/serial@.*" {
//!     ref +1;
//! }
//! return has("role");
//! ```
//!
//! Statements are `if`/`else`, `foreach "regex" { ... }` (which makes each
//! matching node current in turn), `set name = <cells>;` or
//! `set name = expr, ...;`, `unset name;`, `delete;`, `ref +n;`, `ref -n;`,
//! `ref = n;`, `print expr, ...;` and `return expr;`.
//!
//! Expressions have integers, quoted strings, `true`, `false`, `$var`
//! variables, the node accessors `name`, `path`, `ref`, `phandle` and
//! `depth`, the functions `prop`, `has`, `compatible` and `len`, the
//! comparisons `==`, `!=`, `<`, `<=`, `>`, `>=` and `=~` (regex search), and
//! `!`, `-`, `&&` and `||`.

use std::fmt;
use std::str::FromStr;

use lopper_device_tree::error::TreeError;
use lopper_device_tree::model::PropertyValue;
use thiserror::Error;

mod ast;
mod eval;
mod parser;

pub use eval::Interpreter;

/// A value of the language.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Value {
    /// What a missing property reads as.
    #[default]
    Nil,
    /// `true` or `false`; also what an empty property reads as.
    Bool(bool),
    /// An integer; cells read as integers.
    Int(i64),
    /// A string.
    Str(String),
    /// The elements of a list property.
    List(Vec<Value>),
}

impl Value {
    /// `nil`, `false`, `0`, `""` and `[]` are false, everything else is true.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::List(_) => "list",
        }
    }
}

impl From<&PropertyValue> for Value {
    fn from(value: &PropertyValue) -> Self {
        match value {
            PropertyValue::Empty => Value::Bool(true),
            PropertyValue::U32(v) => Value::Int(i64::from(*v)),
            PropertyValue::Str(s) => Value::Str(s.clone()),
            PropertyValue::U32List(cells) => {
                Value::List(cells.iter().map(|&c| Value::Int(i64::from(c))).collect())
            }
            PropertyValue::StrList(strings) => {
                Value::List(strings.iter().cloned().map(Value::Str).collect())
            }
            PropertyValue::Bytes(bytes) => {
                Value::List(bytes.iter().map(|&b| Value::Int(i64::from(b))).collect())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// An error raised while parsing or running a program.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExprError {
    /// The program text is not valid.
    #[error("syntax error at line {line}, column {column}: `{snippet}`")]
    Syntax {
        /// 1-based line of the failure.
        line: usize,
        /// 1-based column of the failure.
        column: usize,
        /// The beginning of the unparsed input.
        snippet: String,
    },
    /// A statement or expression could not be evaluated.
    #[error("{0}")]
    Eval(String),
    /// A tree lookup or mutation failed.
    #[error(transparent)]
    Tree(#[from] TreeError),
    /// A pattern was not a valid regular expression.
    #[error("invalid regular expression: {0}")]
    Regex(#[from] regex::Error),
}

/// A parsed program.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    statements: Vec<ast::Stmt>,
}

impl Program {
    /// Parses program text.
    ///
    /// # Errors
    ///
    /// Returns [`ExprError::Syntax`] pointing at the first invalid token.
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        Ok(Self {
            statements: parser::parse(source)?,
        })
    }

    /// Returns `true` for a program without statements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

impl FromStr for Program {
    type Err = ExprError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
