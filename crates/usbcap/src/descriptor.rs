//! Standard USB descriptor records and configuration-blob walking.
//!
//! Descriptors arrive as raw little-endian bytes from the hub ioctls; they
//! are parsed here with explicit offsets rather than pointer casts so the
//! bounds checks are visible.

use tracing::warn;

pub(crate) const DESC_TYPE_CONFIGURATION: u8 = 2;
pub(crate) const DESC_TYPE_STRING: u8 = 3;
pub(crate) const DESC_TYPE_INTERFACE: u8 = 4;

pub(crate) const DEVICE_DESC_LEN: usize = 18;
pub(crate) const CONFIG_DESC_LEN: usize = 9;
const COMMON_DESC_LEN: usize = 2;
const INTERFACE_DESC_LEN: usize = 9;
/// Extended interface descriptor with a trailing wNumClasses
const INTERFACE_DESC2_LEN: usize = 11;

/// The standard 18-byte device descriptor.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub usb_version: u16,
    pub device_class: u8,
    pub device_sub_class: u8,
    pub device_protocol: u8,
    pub max_packet_size0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_rev: u16,
    pub i_manufacturer: u8,
    pub i_product: u8,
    pub i_serial: u8,
    pub num_configurations: u8,
}

impl DeviceDescriptor {
    /// Parse the 18-byte wire form. Returns `None` when the slice is short.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        if raw.len() < DEVICE_DESC_LEN {
            return None;
        }
        let word = |at: usize| u16::from_le_bytes([raw[at], raw[at + 1]]);
        Some(Self {
            usb_version: word(2),
            device_class: raw[4],
            device_sub_class: raw[5],
            device_protocol: raw[6],
            max_packet_size0: raw[7],
            vendor_id: word(8),
            product_id: word(10),
            device_rev: word(12),
            i_manufacturer: raw[14],
            i_product: raw[15],
            i_serial: raw[16],
            num_configurations: raw[17],
        })
    }
}

/// A complete configuration descriptor chain.
///
/// Owns the whole ioctl allocation (request header included) and exposes the
/// descriptor bytes as a view, so release is a plain drop instead of the
/// reverse-the-pointer-offset dance the wire format invites.
#[derive(Debug, Clone)]
pub struct ConfigBlob {
    buf: Vec<u8>,
    off: usize,
}

impl ConfigBlob {
    /// Wrap a bare descriptor chain (no request header in front).
    pub fn from_descriptor_bytes(bytes: Vec<u8>) -> Self {
        Self { buf: bytes, off: 0 }
    }

    /// Wrap an ioctl request allocation whose descriptor payload starts at
    /// `off`.
    pub(crate) fn from_request(buf: Vec<u8>, off: usize) -> Self {
        debug_assert!(off <= buf.len());
        Self { buf, off }
    }

    /// The configuration descriptor chain, starting at bLength of the
    /// configuration descriptor itself.
    pub fn descriptor_bytes(&self) -> &[u8] {
        &self.buf[self.off..]
    }

    /// wTotalLength as reported by the configuration header, 0 when short.
    pub fn total_length(&self) -> u16 {
        match self.descriptor_bytes() {
            raw if raw.len() >= 4 => u16::from_le_bytes([raw[2], raw[3]]),
            _ => 0,
        }
    }
}

/// Collect every string-descriptor index referenced by a configuration
/// chain (`iConfiguration` and `iInterface` fields).
///
/// The walk is a TLV cursor over (bLength, bDescriptorType) headers;
/// descriptors that would overrun the chain terminate the walk, unknown
/// descriptor types are skipped by their declared length.
pub(crate) fn string_indexes(cfg: &[u8]) -> Vec<u8> {
    let mut found = Vec::new();
    let mut cur = 0usize;
    while cur + COMMON_DESC_LEN <= cfg.len() {
        let length = cfg[cur] as usize;
        let kind = cfg[cur + 1];
        if length < COMMON_DESC_LEN || cur + length > cfg.len() {
            warn!(at = cur, length, "descriptor overruns configuration chain");
            break;
        }
        match kind {
            DESC_TYPE_CONFIGURATION => match length {
                CONFIG_DESC_LEN => match cfg[cur + 6] {
                    0 => {}
                    index => found.push(index),
                },
                _ => warn!(at = cur, length, "odd configuration descriptor length"),
            },
            DESC_TYPE_INTERFACE => match length {
                INTERFACE_DESC_LEN | INTERFACE_DESC2_LEN => match cfg[cur + 8] {
                    0 => {}
                    index => found.push(index),
                },
                _ => warn!(at = cur, length, "odd interface descriptor length"),
            },
            _ => {}
        }
        cur += length;
    }
    found
}

/// A fetched string descriptor: the payload is raw UTF-16LE.
///
/// Index 0 carries the supported language ids instead of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringEntry {
    pub index: u8,
    pub lang: u16,
    pub data: Vec<u8>,
}

impl StringEntry {
    /// Decode the payload as text, up to the first NUL if any.
    pub fn text(&self) -> String {
        let units: Vec<u16> = self
            .data
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let end = units.iter().position(|unit| *unit == 0).unwrap_or(units.len());
        String::from_utf16_lossy(&units[..end])
    }

    /// Interpret the payload as the language-id array of string index 0.
    pub fn lang_ids(&self) -> Vec<u16> {
        self.data
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }
}
