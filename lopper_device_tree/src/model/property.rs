// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::fmt;

use log::trace;
use regex::Regex;

use super::phandle::DEFAULT_DESCRIPTORS;
use crate::fdt::FdtProperty;

/// A typed property value.
///
/// The variants mirror what device tree source can express directly: a
/// boolean marker, integers and strings, either single or as lists. Values
/// that fit none of them (for example a byte string, or a mix of strings and
/// cells) are kept as raw [`PropertyValue::Bytes`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PropertyValue {
    /// A property without a value, used as a boolean marker.
    #[default]
    Empty,
    /// A single 32-bit cell.
    U32(u32),
    /// A single string.
    Str(String),
    /// An ordered list of 32-bit cells.
    U32List(Vec<u32>),
    /// An ordered list of strings.
    StrList(Vec<String>),
    /// Opaque bytes.
    Bytes(Vec<u8>),
}

/// How [`PropertyValue::classify`] should treat textual input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeHint {
    /// Integers are only recognised for properties known to hold cells.
    #[default]
    Auto,
    /// Every element must parse as an integer.
    U32,
    /// Every element is kept as a string.
    String,
}

impl PropertyValue {
    /// Returns the value as a single cell, if it is one.
    #[must_use]
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            PropertyValue::U32(v) => Some(*v),
            PropertyValue::U32List(v) if v.len() == 1 => Some(v[0]),
            _ => None,
        }
    }

    /// Returns the value as a string, if it is a single string or a
    /// one-element string list.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s),
            PropertyValue::StrList(v) if v.len() == 1 => Some(&v[0]),
            _ => None,
        }
    }

    /// Returns every cell of the value. Strings yield an empty list.
    #[must_use]
    pub fn cells(&self) -> Vec<u32> {
        match self {
            PropertyValue::U32(v) => vec![*v],
            PropertyValue::U32List(v) => v.clone(),
            PropertyValue::Bytes(b) if b.len().is_multiple_of(4) => b
                .chunks_exact(4)
                .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Returns every string of the value. Cells yield an empty list.
    #[must_use]
    pub fn strings(&self) -> Vec<&str> {
        match self {
            PropertyValue::Str(s) => vec![s.as_str()],
            PropertyValue::StrList(v) => v.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Returns `true` for the single-element variants.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        matches!(self, PropertyValue::U32(_) | PropertyValue::Str(_))
    }

    /// Number of elements: one for scalars, the length for lists and zero
    /// for an empty marker.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            PropertyValue::Empty => 0,
            PropertyValue::U32(_) | PropertyValue::Str(_) => 1,
            PropertyValue::U32List(v) => v.len(),
            PropertyValue::StrList(v) => v.len(),
            PropertyValue::Bytes(b) => b.len(),
        }
    }

    /// Returns `true` for [`PropertyValue::Empty`] and empty lists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encodes the value the way it is stored in a flattened device tree.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            PropertyValue::Empty => Vec::new(),
            PropertyValue::U32(v) => v.to_be_bytes().to_vec(),
            PropertyValue::U32List(v) => v.iter().flat_map(|c| c.to_be_bytes()).collect(),
            PropertyValue::Str(s) => {
                let mut bytes = s.as_bytes().to_vec();
                bytes.push(0);
                bytes
            }
            PropertyValue::StrList(v) => {
                let mut bytes = Vec::new();
                for s in v {
                    bytes.extend_from_slice(s.as_bytes());
                    bytes.push(0);
                }
                bytes
            }
            PropertyValue::Bytes(b) => b.clone(),
        }
    }

    /// Decodes a raw FDT value, guessing its type.
    ///
    /// Property names that are known to hold cells skip the string guess, so
    /// that e.g. a `reg` of `0x61626300` is not mistaken for `"abc"`.
    #[must_use]
    pub fn from_bytes(name: &str, value: &[u8]) -> Self {
        if value.is_empty() {
            return PropertyValue::Empty;
        }
        if !holds_cells(name) {
            if let Some(strings) = printable_strings(value) {
                return if strings.len() == 1 {
                    PropertyValue::Str(strings.into_iter().next().unwrap_or_default())
                } else {
                    PropertyValue::StrList(strings)
                };
            }
        }
        if value.len().is_multiple_of(4) {
            let cells: Vec<u32> = value
                .chunks_exact(4)
                .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            return if cells.len() == 1 {
                PropertyValue::U32(cells[0])
            } else {
                PropertyValue::U32List(cells)
            };
        }
        PropertyValue::Bytes(value.to_vec())
    }

    /// Classifies textual input into a typed value.
    ///
    /// Integers (decimal or `0x` hex) are stored as cells only when `numeric`
    /// is set or the hint demands it; several strings become a string list.
    /// Nothing else is coerced.
    ///
    /// # Examples
    ///
    /// ```
    /// # use lopper_device_tree::model::{PropertyValue, TypeHint};
    /// let v = PropertyValue::classify(&["0x10".into()], TypeHint::Auto, true);
    /// assert_eq!(v, PropertyValue::U32(0x10));
    /// let v = PropertyValue::classify(&["0x10".into()], TypeHint::Auto, false);
    /// assert_eq!(v, PropertyValue::Str("0x10".into()));
    /// ```
    #[must_use]
    pub fn classify(raw: &[String], hint: TypeHint, numeric: bool) -> Self {
        match raw {
            [] => return PropertyValue::Empty,
            [single] if single.is_empty() => return PropertyValue::Empty,
            _ => {}
        }
        let want_numbers = match hint {
            TypeHint::U32 => true,
            TypeHint::String => false,
            TypeHint::Auto => numeric,
        };
        if want_numbers {
            let parsed: Option<Vec<u32>> = raw.iter().map(|s| parse_u32(s)).collect();
            if let Some(cells) = parsed {
                return if cells.len() == 1 {
                    PropertyValue::U32(cells[0])
                } else {
                    PropertyValue::U32List(cells)
                };
            }
            trace!("{raw:?} does not parse as cells, keeping strings");
        }
        if raw.len() == 1 {
            PropertyValue::Str(raw[0].clone())
        } else {
            PropertyValue::StrList(raw.to_vec())
        }
    }
}

impl From<u32> for PropertyValue {
    fn from(value: u32) -> Self {
        PropertyValue::U32(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Str(value.to_owned())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Str(value)
    }
}

impl From<Vec<u32>> for PropertyValue {
    fn from(value: Vec<u32>) -> Self {
        PropertyValue::U32List(value)
    }
}

impl From<&[u32]> for PropertyValue {
    fn from(value: &[u32]) -> Self {
        PropertyValue::U32List(value.to_vec())
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(value: Vec<String>) -> Self {
        PropertyValue::StrList(value)
    }
}

impl From<&[&str]> for PropertyValue {
    fn from(value: &[&str]) -> Self {
        PropertyValue::StrList(value.iter().map(|s| (*s).to_owned()).collect())
    }
}

/// Parses a decimal or `0x`-prefixed hexadecimal cell.
#[must_use]
pub fn parse_u32(s: &str) -> Option<u32> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

fn holds_cells(name: &str) -> bool {
    name.starts_with('#')
        || matches!(
            name,
            "reg" | "ranges" | "dma-ranges" | "interrupts" | "phandle" | "linux,phandle"
        )
        || DEFAULT_DESCRIPTORS.iter().any(|(n, _)| *n == name)
}

fn printable_strings(value: &[u8]) -> Option<Vec<String>> {
    if !value.ends_with(&[0]) || value.windows(2).any(|w| w == [0, 0]) || value[0] == 0 {
        return None;
    }
    if !value
        .iter()
        .all(|&ch| ch.is_ascii_graphic() || ch == b' ' || ch == 0)
    {
        return None;
    }
    Some(
        value[..value.len() - 1]
            .split(|&b| b == 0)
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect(),
    )
}

/// A named, typed property of a device tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTreeProperty {
    name: String,
    value: PropertyValue,
}

impl DeviceTreeProperty {
    /// Creates a new `DeviceTreeProperty` with the given name and value.
    ///
    /// # Examples
    ///
    /// ```
    /// # use lopper_device_tree::model::{DeviceTreeProperty, PropertyValue};
    /// let prop = DeviceTreeProperty::new("status", "okay");
    /// assert_eq!(prop.name(), "status");
    /// assert_eq!(prop.value(), &PropertyValue::Str("okay".into()));
    /// ```
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Creates a property without a value.
    #[must_use]
    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, PropertyValue::Empty)
    }

    /// Returns the name of this property.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the value of this property.
    #[must_use]
    pub fn value(&self) -> &PropertyValue {
        &self.value
    }

    /// Replaces the value of this property.
    pub fn set(&mut self, value: impl Into<PropertyValue>) {
        self.value = value.into();
    }

    /// Returns the value as a single cell.
    #[must_use]
    pub fn as_u32(&self) -> Option<u32> {
        self.value.as_u32()
    }

    /// Returns the value as a single string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }

    /// Compares this property, used as a pattern, with `candidate`.
    ///
    /// Strings in the pattern are regular expressions searched in the
    /// candidate's strings; integers must be equal. A scalar matches a list
    /// if it matches any element, and two lists must be equal element-wise.
    /// `invert` negates the result.
    ///
    /// # Examples
    ///
    /// ```
    /// # use lopper_device_tree::model::DeviceTreeProperty;
    /// let pattern = DeviceTreeProperty::new("compatible", "cortex-a5.*");
    /// let candidate = DeviceTreeProperty::new(
    ///     "compatible",
    ///     ["arm,cortex-a53", "arm,armv8"].as_slice(),
    /// );
    /// assert!(pattern.compare(&candidate, false));
    /// assert!(!pattern.compare(&candidate, true));
    /// ```
    #[must_use]
    pub fn compare(&self, candidate: &DeviceTreeProperty, invert: bool) -> bool {
        compare_values(&self.value, &candidate.value) != invert
    }
}

fn compare_values(pattern: &PropertyValue, candidate: &PropertyValue) -> bool {
    use PropertyValue as V;

    match (pattern, candidate) {
        (V::Empty, V::Empty) => true,
        (V::Empty, _) | (_, V::Empty) => false,
        (V::Str(p), V::Str(c)) => string_matches(p, c),
        (V::Str(p), V::StrList(c)) => c.iter().any(|c| string_matches(p, c)),
        (V::StrList(p), V::Str(c)) => p.iter().any(|p| string_matches(p, c)),
        (V::StrList(p), V::StrList(c)) => p == c,
        (V::U32(p), V::U32(c)) => p == c,
        (V::U32(p), V::U32List(c)) => c.contains(p),
        (V::U32List(p), V::U32(c)) => p.contains(c),
        (V::U32List(p), V::U32List(c)) => p == c,
        (V::Bytes(p), V::Bytes(c)) => p == c,
        _ => false,
    }
}

fn string_matches(pattern: &str, candidate: &str) -> bool {
    match Regex::new(pattern) {
        Ok(re) => re.is_match(candidate),
        Err(_) => pattern == candidate,
    }
}

impl<'a> From<FdtProperty<'a>> for DeviceTreeProperty {
    fn from(prop: FdtProperty<'a>) -> Self {
        DeviceTreeProperty {
            name: prop.name().to_owned(),
            value: PropertyValue::from_bytes(prop.name(), prop.value()),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Empty => Ok(()),
            PropertyValue::U32(v) => write!(f, "<0x{v:x}>"),
            PropertyValue::U32List(v) => {
                write!(f, "<")?;
                for (i, cell) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "0x{cell:x}")?;
                }
                write!(f, ">")
            }
            PropertyValue::Str(s) => write!(f, "\"{}\"", escape(s)),
            PropertyValue::StrList(v) => {
                for (i, s) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "\"{}\"", escape(s))?;
                }
                Ok(())
            }
            PropertyValue::Bytes(b) => {
                write!(f, "[")?;
                for (i, byte) in b.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{byte:02x}")?;
                }
                write!(f, "]")
            }
        }
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_guess() {
        assert_eq!(
            PropertyValue::from_bytes("status", b"okay\0"),
            PropertyValue::Str("okay".into())
        );
        assert_eq!(
            PropertyValue::from_bytes("compatible", b"a\0b\0"),
            PropertyValue::StrList(vec!["a".into(), "b".into()])
        );
        assert_eq!(
            PropertyValue::from_bytes("reg", &[0x61, 0x62, 0x63, 0x00]),
            PropertyValue::U32(0x6162_6300)
        );
        assert_eq!(
            PropertyValue::from_bytes("foo", &[1, 2, 3]),
            PropertyValue::Bytes(vec![1, 2, 3])
        );
        assert_eq!(PropertyValue::from_bytes("foo", &[]), PropertyValue::Empty);
    }

    #[test]
    fn classify_respects_hint() {
        let raw = vec!["1".to_owned(), "0x2".to_owned()];
        assert_eq!(
            PropertyValue::classify(&raw, TypeHint::Auto, false),
            PropertyValue::StrList(raw.clone())
        );
        assert_eq!(
            PropertyValue::classify(&raw, TypeHint::U32, false),
            PropertyValue::U32List(vec![1, 2])
        );
        assert_eq!(
            PropertyValue::classify(&raw, TypeHint::String, true),
            PropertyValue::StrList(raw)
        );
    }

    #[test]
    fn compare_lists_and_scalars() {
        let list = DeviceTreeProperty::new("x", vec![1, 2, 3]);
        assert!(DeviceTreeProperty::new("x", 2).compare(&list, false));
        assert!(!DeviceTreeProperty::new("x", 4).compare(&list, false));
        assert!(DeviceTreeProperty::new("x", vec![1, 2, 3]).compare(&list, false));
        assert!(!DeviceTreeProperty::new("x", vec![1, 2]).compare(&list, false));
        assert!(!DeviceTreeProperty::new("x", "okay").compare(&list, false));
        assert!(
            DeviceTreeProperty::empty("x").compare(&DeviceTreeProperty::empty("x"), false)
        );
    }

    #[test]
    fn display() {
        assert_eq!(PropertyValue::U32List(vec![1, 0x20]).to_string(), "<0x1 0x20>");
        assert_eq!(
            PropertyValue::StrList(vec!["a".into(), "b".into()]).to_string(),
            "\"a\", \"b\""
        );
        assert_eq!(PropertyValue::Bytes(vec![0xab, 1]).to_string(), "[ab 01]");
    }
}
