// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A read-only, zero-copy view of a [Flattened Device Tree (FDT)] blob.
//!
//! [`Fdt`] validates the header and lets callers walk nodes and properties
//! without allocating. Most users lift it into a
//! [`DeviceTree`](crate::model::DeviceTree) with
//! [`DeviceTree::from_fdt`](crate::model::DeviceTree::from_fdt) right away.
//!
//! [Flattened Device Tree (FDT)]: https://devicetree-specification.readthedocs.io/en/latest/chapter5-flattened-format.html

mod node;
mod property;

use std::ffi::CStr;

use zerocopy::byteorder::big_endian;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub use node::FdtNode;
pub use property::FdtProperty;

use crate::error::{FdtError, FdtErrorKind, FdtResult};
use crate::memreserve::MemoryReservation;

/// Version of the FDT specification supported by this library.
const FDT_VERSION: u32 = 17;
pub(crate) const FDT_TAGSIZE: usize = size_of::<u32>();
pub(crate) const FDT_MAGIC: u32 = 0xd00d_feed;
pub(crate) const FDT_BEGIN_NODE: u32 = 0x1;
pub(crate) const FDT_END_NODE: u32 = 0x2;
pub(crate) const FDT_PROP: u32 = 0x3;
pub(crate) const FDT_NOP: u32 = 0x4;
pub(crate) const FDT_END: u32 = 0x9;

#[repr(C, packed)]
#[derive(Debug, Copy, Clone, FromBytes, IntoBytes, Unaligned, Immutable, KnownLayout)]
pub(crate) struct FdtHeader {
    pub(crate) magic: big_endian::U32,
    pub(crate) totalsize: big_endian::U32,
    pub(crate) off_dt_struct: big_endian::U32,
    pub(crate) off_dt_strings: big_endian::U32,
    pub(crate) off_mem_rsvmap: big_endian::U32,
    pub(crate) version: big_endian::U32,
    pub(crate) last_comp_version: big_endian::U32,
    pub(crate) boot_cpuid_phys: big_endian::U32,
    pub(crate) size_dt_strings: big_endian::U32,
    pub(crate) size_dt_struct: big_endian::U32,
}

/// A memory reservation entry as laid out in the blob.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, FromBytes, Unaligned, Immutable, KnownLayout)]
struct FdtReserveEntry {
    address: big_endian::U64,
    size: big_endian::U64,
}

/// A flattened device tree.
#[derive(Debug, Clone, Copy)]
pub struct Fdt<'a> {
    pub(crate) data: &'a [u8],
    header: &'a FdtHeader,
}

/// A token in the structure block.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FdtToken {
    BeginNode,
    EndNode,
    Prop,
    Nop,
    End,
}

impl TryFrom<u32> for FdtToken {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            FDT_BEGIN_NODE => Ok(FdtToken::BeginNode),
            FDT_END_NODE => Ok(FdtToken::EndNode),
            FDT_PROP => Ok(FdtToken::Prop),
            FDT_NOP => Ok(FdtToken::Nop),
            FDT_END => Ok(FdtToken::End),
            _ => Err(value),
        }
    }
}

impl<'a> Fdt<'a> {
    /// Validates the header of a blob and wraps it.
    ///
    /// # Errors
    ///
    /// Fails if the blob is shorter than its header or than its declared
    /// total size, has a bad magic number, or has an incompatible version.
    ///
    /// # Examples
    ///
    /// ```
    /// # use lopper_device_tree::fdt::Fdt;
    /// # use lopper_device_tree::model::DeviceTree;
    /// let dtb = DeviceTree::new().to_dtb();
    /// let fdt = Fdt::new(&dtb).unwrap();
    /// assert_eq!(fdt.root().unwrap().name().unwrap(), "");
    /// ```
    pub fn new(data: &'a [u8]) -> FdtResult<Self> {
        let Ok((header, _)) = FdtHeader::ref_from_prefix(data) else {
            return Err(FdtError::new(FdtErrorKind::InvalidLength, 0));
        };
        if header.magic.get() != FDT_MAGIC {
            return Err(FdtError::new(FdtErrorKind::InvalidMagic, 0));
        }
        let version = header.version.get();
        if !(header.last_comp_version.get()..=version).contains(&FDT_VERSION) {
            return Err(FdtError::new(FdtErrorKind::UnsupportedVersion(version), 20));
        }
        if header.totalsize.get() as usize != data.len() {
            return Err(FdtError::new(FdtErrorKind::InvalidLength, 4));
        }
        let strings_end =
            header.off_dt_strings.get() as usize + header.size_dt_strings.get() as usize;
        if strings_end > data.len() || header.off_dt_struct.get() as usize >= data.len() {
            return Err(FdtError::new(FdtErrorKind::InvalidLength, 8));
        }
        Ok(Self { data, header })
    }

    /// Returns the root node.
    ///
    /// # Errors
    ///
    /// Fails if the structure block does not start with a node.
    pub fn root(&self) -> FdtResult<FdtNode<'a>> {
        let offset = self.header.off_dt_struct.get() as usize;
        if self.read_token(offset)? != FdtToken::BeginNode {
            return Err(FdtError::new(FdtErrorKind::BadToken(FDT_BEGIN_NODE), offset));
        }
        Ok(FdtNode { fdt: *self, offset })
    }

    /// Finds a node by its absolute path.
    ///
    /// # Performance
    ///
    /// This walks the blob and is linear in the size of the nodes along the
    /// path.
    #[must_use]
    pub fn find_node(&self, path: &str) -> Option<FdtResult<FdtNode<'a>>> {
        if !path.starts_with('/') {
            return None;
        }
        let mut current = match self.root() {
            Ok(node) => node,
            Err(e) => return Some(Err(e)),
        };
        for component in path.split('/').filter(|s| !s.is_empty()) {
            match current.child(component) {
                Ok(Some(node)) => current = node,
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
        Some(Ok(current))
    }

    /// Returns the entries of the memory reservation block, up to the
    /// terminating empty entry.
    pub fn memory_reservations(&self) -> impl Iterator<Item = MemoryReservation> + use<'a> {
        let start = self.header.off_mem_rsvmap.get() as usize;
        let block = self.data.get(start..).unwrap_or_default();
        let entries = <[FdtReserveEntry]>::ref_from_prefix_with_elems(
            block,
            block.len() / size_of::<FdtReserveEntry>(),
        )
        .map(|(entries, _)| entries)
        .unwrap_or_default();
        entries
            .iter()
            .map(|e| MemoryReservation::new(e.address.get(), e.size.get()))
            .take_while(|r| r.address() != 0 || r.size() != 0)
    }

    fn read_u32(&self, offset: usize) -> FdtResult<u32> {
        self.data
            .get(offset..)
            .and_then(|rest| big_endian::U32::ref_from_prefix(rest).ok())
            .map(|(val, _)| val.get())
            .ok_or_else(|| FdtError::new(FdtErrorKind::InvalidLength, offset))
    }

    pub(crate) fn read_token(&self, offset: usize) -> FdtResult<FdtToken> {
        let val = self.read_u32(offset)?;
        FdtToken::try_from(val).map_err(|t| FdtError::new(FdtErrorKind::BadToken(t), offset))
    }

    /// Returns the string at `string_block_offset` in the strings block.
    pub(crate) fn string(&self, string_block_offset: usize) -> FdtResult<&'a str> {
        let start = self.header.off_dt_strings.get() as usize;
        let end = start + self.header.size_dt_strings.get() as usize;
        let offset = start + string_block_offset;
        if offset >= end {
            return Err(FdtError::new(FdtErrorKind::InvalidLength, offset));
        }
        self.string_at_offset(offset, end)
    }

    /// Returns the NUL-terminated string starting at `offset`.
    pub(crate) fn string_at_offset(&self, offset: usize, end: usize) -> FdtResult<&'a str> {
        self.data
            .get(offset..end)
            .and_then(|slice| CStr::from_bytes_until_nul(slice).ok())
            .and_then(|cstr| cstr.to_str().ok())
            .ok_or_else(|| FdtError::new(FdtErrorKind::InvalidString, offset))
    }

    pub(crate) fn find_string_end(&self, start: usize) -> FdtResult<usize> {
        self.data
            .get(start..)
            .and_then(|rest| rest.iter().position(|&b| b == 0))
            .map(|nul| start + nul + 1)
            .ok_or_else(|| FdtError::new(FdtErrorKind::InvalidString, start))
    }

    /// Returns the offset right after the node starting at `offset`.
    pub(crate) fn next_sibling_offset(&self, offset: usize) -> FdtResult<usize> {
        let mut offset = self.first_item_offset(offset)?;
        loop {
            match self.read_token(offset)? {
                FdtToken::Prop => offset = self.next_property_offset(offset + FDT_TAGSIZE)?,
                FdtToken::Nop => offset += FDT_TAGSIZE,
                FdtToken::BeginNode => offset = self.next_sibling_offset(offset)?,
                FdtToken::EndNode => return Ok(offset + FDT_TAGSIZE),
                FdtToken::End => {
                    return Err(FdtError::new(FdtErrorKind::BadToken(FDT_END), offset));
                }
            }
        }
    }

    /// Returns the offset of the first property or child of the node
    /// starting at `offset`.
    pub(crate) fn first_item_offset(&self, offset: usize) -> FdtResult<usize> {
        let name_end = self.find_string_end(offset + FDT_TAGSIZE)?;
        Ok(Self::align_tag_offset(name_end))
    }

    /// Skips a property whose length field is at `offset`.
    pub(crate) fn next_property_offset(&self, offset: usize) -> FdtResult<usize> {
        let len = self.read_u32(offset)? as usize;
        Ok(Self::align_tag_offset(offset + 2 * FDT_TAGSIZE + len))
    }

    pub(crate) fn read_property_header(&self, offset: usize) -> FdtResult<(usize, usize)> {
        Ok((
            self.read_u32(offset)? as usize,
            self.read_u32(offset + FDT_TAGSIZE)? as usize,
        ))
    }

    pub(crate) fn align_tag_offset(offset: usize) -> usize {
        offset.next_multiple_of(FDT_TAGSIZE)
    }
}
