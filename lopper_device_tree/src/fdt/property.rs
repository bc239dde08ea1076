// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A read-only API for inspecting a device tree property.

use std::ffi::CStr;

use zerocopy::{FromBytes, big_endian};

use super::{FDT_TAGSIZE, Fdt};
use crate::error::{FdtError, FdtErrorKind, FdtResult};

/// A property of a device tree node, borrowed from the blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdtProperty<'a> {
    name: &'a str,
    value: &'a [u8],
    value_offset: usize,
}

impl<'a> FdtProperty<'a> {
    /// Reads the property whose length field is at `offset`.
    pub(crate) fn read(fdt: &Fdt<'a>, offset: usize) -> FdtResult<Self> {
        let (len, name_offset) = fdt.read_property_header(offset)?;
        let value_offset = offset + 2 * FDT_TAGSIZE;
        let value = fdt
            .data
            .get(value_offset..value_offset + len)
            .ok_or_else(|| FdtError::new(FdtErrorKind::InvalidLength, offset))?;
        Ok(Self {
            name: fdt.string(name_offset)?,
            value,
            value_offset,
        })
    }

    /// Returns the name of this property.
    #[must_use]
    pub fn name(&self) -> &'a str {
        self.name
    }

    /// Returns the raw value of this property.
    #[must_use]
    pub fn value(&self) -> &'a [u8] {
        self.value
    }

    /// Returns the value of this property as a `u32`.
    ///
    /// # Errors
    ///
    /// Returns an [`FdtErrorKind::InvalidLength`] if the value is not 4 bytes
    /// long.
    pub fn as_u32(&self) -> FdtResult<u32> {
        big_endian::U32::ref_from_bytes(self.value)
            .map(|val| val.get())
            .map_err(|_e| FdtError::new(FdtErrorKind::InvalidLength, self.value_offset))
    }

    /// Returns the value of this property as a `u64`.
    ///
    /// # Errors
    ///
    /// Returns an [`FdtErrorKind::InvalidLength`] if the value is not 8 bytes
    /// long.
    pub fn as_u64(&self) -> FdtResult<u64> {
        big_endian::U64::ref_from_bytes(self.value)
            .map(|val| val.get())
            .map_err(|_e| FdtError::new(FdtErrorKind::InvalidLength, self.value_offset))
    }

    /// Returns the value of this property as a single string.
    ///
    /// # Errors
    ///
    /// Returns an [`FdtErrorKind::InvalidString`] if the value is not a
    /// NUL-terminated UTF-8 string.
    pub fn as_str(&self) -> FdtResult<&'a str> {
        CStr::from_bytes_with_nul(self.value)
            .ok()
            .and_then(|cstr| cstr.to_str().ok())
            .ok_or_else(|| FdtError::new(FdtErrorKind::InvalidString, self.value_offset))
    }

    /// Returns an iterator over the NUL-separated strings of this property.
    /// Iteration stops at the first invalid string.
    pub fn as_str_list(&self) -> impl Iterator<Item = &'a str> + use<'a> {
        let mut rest = self.value;
        std::iter::from_fn(move || {
            if rest.is_empty() {
                return None;
            }
            let s = CStr::from_bytes_until_nul(rest).ok()?.to_str().ok()?;
            rest = &rest[s.len() + 1..];
            Some(s)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn property(value: &'static [u8]) -> FdtProperty<'static> {
        FdtProperty {
            name: "test",
            value,
            value_offset: 0,
        }
    }

    #[test]
    fn integers() {
        assert_eq!(property(&[0x12, 0x34, 0x56, 0x78]).as_u32().unwrap(), 0x1234_5678);
        assert_eq!(
            property(&[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]).as_u64().unwrap(),
            0x1122_3344_5566_7788
        );
        assert!(property(&[1, 2, 3]).as_u32().is_err());
    }

    #[test]
    fn strings() {
        let prop = property(b"first\0second\0");
        assert!(prop.as_str().is_err());
        assert_eq!(prop.as_str_list().collect::<Vec<_>>(), ["first", "second"]);
        assert_eq!(property(b"okay\0").as_str().unwrap(), "okay");
    }
}
