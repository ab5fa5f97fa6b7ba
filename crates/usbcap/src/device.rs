//! Host USB device records returned by the enumeration.

use num_derive::FromPrimitive;
use std::fmt::{self, Formatter};

/// Capture-mediation state of a device, as tracked by the kernel monitor.
///
/// The discriminants are the monitor's wire values.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum DeviceState {
    /// In use by the host and not capturable (primary input, etc)
    UsedByHost = 1,
    /// In use by the host but the monitor may capture it
    UsedByHostCapturable = 2,
    /// Not claimed by any host driver
    Unused = 3,
    /// Captured and parked on the proxy driver, not yet attached to a guest
    HeldByProxy = 4,
    /// Attached to a running guest
    UsedByGuest = 5,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum DeviceSpeed {
    Unknown,
    Low,
    Full,
    High,
}

/// One record per physical USB device found on the host.
///
/// `driver_key` is the stable identifier joining the hub topology view with
/// the captured-device view. `address` starts out equal to the driver key;
/// after reconciliation against the monitor it holds the capture device path
/// and the previous value moves to `alt_address`.
#[derive(Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct HostDevice {
    pub vendor_id: u16,
    pub product_id: u16,
    /// bcdDevice
    pub device_rev: u16,
    /// bcdUSB
    pub usb_version: u16,
    pub device_class: u8,
    pub device_sub_class: u8,
    pub device_protocol: u8,
    /// Bus numbers are not observable through the hub ioctl surface
    pub bus: u8,
    /// Port index within the immediate parent hub (1-based)
    pub port: u32,
    pub hub_name: String,
    pub driver_key: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial: Option<String>,
    /// [`serial_hash`] of `serial`, 0 when the device reports no serial
    pub serial_hash: u64,
    pub state: DeviceState,
    pub speed: DeviceSpeed,
    pub address: String,
    pub alt_address: Option<String>,
}

impl fmt::Debug for HostDevice {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostDevice")
            .field("vid", &format_args!("{:0>4X}", self.vendor_id))
            .field("pid", &format_args!("{:0>4X}", self.product_id))
            .field("port", &self.port)
            .field("hub", &self.hub_name)
            .field("product", &self.product)
            .field("serial", &self.serial)
            .field("state", &self.state)
            .field("speed", &self.speed)
            .field("address", &self.address)
            .finish()
    }
}

/// Hash a serial string into the 64-bit value callers match filters against.
pub fn serial_hash(serial: &str) -> u64 {
    serial
        .bytes()
        .fold(8191u64, |hash, byte| hash.wrapping_mul(33).wrapping_add(u64::from(byte)))
}
