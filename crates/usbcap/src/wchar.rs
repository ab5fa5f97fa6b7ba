//! wchar
//!
//! Helpers for the UTF-16 payloads the Win32 surface speaks.

use std::ffi::OsString;

/// Encode a string as a NUL-terminated wide string.
pub(crate) fn to_wide<O>(s: O) -> Vec<u16>
where
    O: Into<OsString>,
{
    use std::os::windows::prelude::*;
    s.into().encode_wide().chain(Some(0)).collect()
}

/// Decode a counted UTF-16LE byte payload (as the usb name ioctls return),
/// stopping at the first NUL.
pub(crate) fn from_wide_bytes(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let end = units.iter().position(|unit| *unit == 0).unwrap_or(units.len());
    String::from_utf16_lossy(&units[..end])
}
