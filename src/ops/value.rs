// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::sync::LazyLock;

use lopper_device_tree::model::{PhandleDescriptors, PropertyValue, TypeHint, parse_u32};
use regex::Regex;

static QUOTED: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r#"'([^']*)'|"([^"]*)""#).unwrap()
});

/// Converts a value written in device tree notation inside a rule:
///
/// - `<0x1 2>` is a cell list (one cell becomes a single cell);
/// - `'a','b'` or `"a","b"` is a string list;
/// - anything else is classified as a single string, which stays a string
///   unless `numeric` is set (see [`numeric_name`]).
pub(crate) fn convert(text: &str, numeric: bool) -> Result<PropertyValue, String> {
    let text = text.trim();
    if let Some(inner) = text.strip_prefix('<') {
        let inner = inner.strip_suffix('>').unwrap_or(inner);
        let cells = inner
            .split_whitespace()
            .map(|n| parse_u32(n).ok_or_else(|| format!("cannot convert `{n}` to a cell")))
            .collect::<Result<Vec<u32>, String>>()?;
        return Ok(match cells.as_slice() {
            [] => PropertyValue::Empty,
            [single] => PropertyValue::U32(*single),
            _ => PropertyValue::U32List(cells),
        });
    }

    let quoted: Vec<String> = QUOTED
        .captures_iter(text)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().to_owned())
        .collect();
    match quoted.as_slice() {
        [_, _, ..] => return Ok(PropertyValue::StrList(quoted)),
        [single] if QUOTED.find(text).is_some_and(|m| m.len() == text.len()) => {
            return Ok(PropertyValue::Str(single.clone()));
        }
        _ => {}
    }
    Ok(PropertyValue::classify(&[text.to_owned()], TypeHint::Auto, numeric))
}

/// Bare integers are cells only for `#...-cells` and phandle-valued names.
pub(crate) fn numeric_name(name: &str, descriptors: &PhandleDescriptors) -> bool {
    name.starts_with('#') || descriptors.contains(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notations() {
        assert_eq!(convert("<0x1 2>", false), Ok(PropertyValue::U32List(vec![1, 2])));
        assert_eq!(convert("<0x10>", false), Ok(PropertyValue::U32(0x10)));
        assert!(convert("<0x1 nope>", false).is_err());
        assert_eq!(
            convert("'a','b'", false),
            Ok(PropertyValue::StrList(vec!["a".into(), "b".into()]))
        );
        assert_eq!(
            convert(r#""x", "y""#, false),
            Ok(PropertyValue::StrList(vec!["x".into(), "y".into()]))
        );
        assert_eq!(convert("'quoted'", false), Ok(PropertyValue::Str("quoted".into())));
        assert_eq!(convert("disabled", true), Ok(PropertyValue::Str("disabled".into())));
        assert_eq!(
            convert("arm,cortex-a53", false),
            Ok(PropertyValue::Str("arm,cortex-a53".into()))
        );
    }

    #[test]
    fn bare_integers_follow_the_property_name() {
        let descriptors = PhandleDescriptors::default();
        assert!(!numeric_name("model", &descriptors));
        assert!(numeric_name("interrupt-parent", &descriptors));
        assert!(numeric_name("#address-cells", &descriptors));

        assert_eq!(convert("10", false), Ok(PropertyValue::Str("10".into())));
        assert_eq!(convert("0x20", true), Ok(PropertyValue::U32(0x20)));
        assert_eq!(convert("'10'", true), Ok(PropertyValue::Str("10".into())));
    }
}
