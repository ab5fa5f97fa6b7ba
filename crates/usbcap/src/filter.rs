//! Capture filter records.
//!
//! A [`Filter`] is handed to the kernel monitor as an opaque C blob; the
//! monitor owns the matching semantics. The layout is a fixed field table
//! (one tagged slot per matchable property) followed by an inline string
//! table holding the string-valued properties.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::num::NonZeroU64;

/// First bytes of every filter blob, checked by the monitor.
pub const FILTER_MAGIC: u32 = u32::from_le_bytes(*b"UFLT");

/// Size of the inline string table.
pub const STRING_TABLE_LEN: usize = 256;

/// How a filter field participates in matching.
#[repr(u16)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive)]
pub enum MatchMode {
    /// Field does not participate
    Ignore = 0,
    /// Device must report the property, any value
    Present = 1,
    /// Device must not report the property
    Absent = 2,
    /// Value must match exactly
    Exact = 3,
    /// Value must match a wildcard expression held in the string table
    Expression = 4,
    /// Numeric value must fall inside an inclusive range
    NumRange = 5,
}

/// Matchable device properties, in wire order.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FilterField {
    VendorId = 0,
    ProductId = 1,
    DeviceRev = 2,
    DeviceClass = 3,
    DeviceSubClass = 4,
    DeviceProtocol = 5,
    Bus = 6,
    Port = 7,
    Manufacturer = 8,
    Product = 9,
    SerialNumber = 10,
}

impl FilterField {
    const COUNT: usize = 11;

    fn is_string(self) -> bool {
        matches!(self, Self::Manufacturer | Self::Product | Self::SerialNumber)
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
struct FieldSlot {
    matching: u16,
    /// Numeric value, or string-table offset for string fields (0 = unset)
    value: u16,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("filter string table full")]
pub struct StringTableFull;

/// An installable capture filter. C-ABI stable; passed to the monitor as-is.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct Filter {
    magic: u32,
    fields: [FieldSlot; FilterField::COUNT],
    /// First free byte of the string table; offset 0 is reserved as "unset"
    str_end: u32,
    strtab: [u8; STRING_TABLE_LEN],
}

impl Filter {
    pub fn new() -> Self {
        Self {
            magic: FILTER_MAGIC,
            fields: [FieldSlot { matching: MatchMode::Ignore as u16, value: 0 }; FilterField::COUNT],
            str_end: 1,
            strtab: [0; STRING_TABLE_LEN],
        }
    }

    /// Tag a numeric field.
    pub fn set_numeric(&mut self, field: FilterField, mode: MatchMode, value: u16) -> &mut Self {
        debug_assert!(!field.is_string());
        self.fields[field as usize] = FieldSlot { matching: mode as u16, value };
        self
    }

    /// Tag a string field, interning the value into the string table.
    pub fn set_string(
        &mut self,
        field: FilterField,
        mode: MatchMode,
        value: &str,
    ) -> Result<&mut Self, StringTableFull> {
        debug_assert!(field.is_string());
        let bytes = value.as_bytes();
        let off = self.str_end as usize;
        if off + bytes.len() + 1 > STRING_TABLE_LEN {
            return Err(StringTableFull);
        }
        self.strtab[off..off + bytes.len()].copy_from_slice(bytes);
        self.strtab[off + bytes.len()] = 0;
        self.str_end = (off + bytes.len() + 1) as u32;
        self.fields[field as usize] = FieldSlot { matching: mode as u16, value: off as u16 };
        Ok(self)
    }

    pub fn mode(&self, field: FilterField) -> MatchMode {
        MatchMode::from_u16(self.fields[field as usize].matching).unwrap_or(MatchMode::Ignore)
    }

    pub fn numeric(&self, field: FilterField) -> u16 {
        self.fields[field as usize].value
    }

    /// The interned string of a string field, `None` when unset.
    pub fn string(&self, field: FilterField) -> Option<&str> {
        if !field.is_string() {
            return None;
        }
        match self.fields[field as usize].value as usize {
            0 => None,
            off => {
                let tail = &self.strtab[off..];
                let end = tail.iter().position(|byte| *byte == 0).unwrap_or(tail.len());
                std::str::from_utf8(&tail[..end]).ok()
            }
        }
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self::new()
    }
}

/// Opaque id of a filter installed in the monitor; returned by add, consumed
/// by remove. The library stores nothing beyond the value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FilterHandle(NonZeroU64);

impl FilterHandle {
    pub(crate) fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    pub(crate) fn get(self) -> u64 {
        self.0.get()
    }
}
