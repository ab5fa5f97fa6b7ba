//! Recursive descent over the host USB topology.
//!
//! The walk runs controllers → root hubs → hubs → ports and aggregates leaf
//! devices into [`HostDevice`] records. Access to the hub ioctl surface goes
//! through the [`Bus`]/[`Hub`] traits so the walk can be exercised against a
//! synthetic tree.

use crate::descriptor::{ConfigBlob, DeviceDescriptor, StringEntry};
use crate::device::{self, DeviceSpeed, DeviceState, HostDevice};
use crate::error::FetchError;
use crate::strings;
use tracing::{debug, trace, warn};

/// Host controllers are probed by index; `\\.\HCD0` through `\\.\HCD9`.
pub const MAX_CONTROLLERS: u32 = 10;

/// What a hub reports about one of its ports.
#[derive(Debug, Clone, Default)]
pub struct PortConnection {
    pub connected: bool,
    pub is_hub: bool,
    pub device: DeviceDescriptor,
}

/// Per-port queries against an open hub.
///
/// String descriptor index 0 must be fetched (language ids) before any
/// non-zero index is requested; [`strings::collect`] honors that order.
#[cfg_attr(test, mockall::automock)]
pub trait Hub {
    fn port_count(&self) -> Result<u8, FetchError>;
    fn connection(&self, port: u32) -> Result<PortConnection, FetchError>;
    fn connection_name(&self, port: u32) -> Result<String, FetchError>;
    fn driver_key(&self, port: u32) -> Result<String, FetchError>;
    fn config_descriptor(&self, port: u32, index: u8) -> Result<ConfigBlob, FetchError>;
    fn string_descriptor(&self, port: u32, index: u8, lang: u16) -> Result<StringEntry, FetchError>;
}

/// Entry points into the topology: controllers and named hubs.
pub trait Bus {
    type Hub: Hub;

    /// Root hub name of the indexed controller, `Ok(None)` when the
    /// controller does not exist.
    fn root_hub_name(&self, controller: u32) -> Result<Option<String>, FetchError>;
    fn open_hub(&self, name: &str) -> Result<Self::Hub, FetchError>;
}

/// Enumerate every device below every controller.
///
/// Failures never propagate upward: a broken port, hub, or controller is
/// logged and the walk continues with its siblings.
pub fn walk<B: Bus>(bus: &B) -> Vec<HostDevice> {
    let mut devices = Vec::new();
    for controller in 0..MAX_CONTROLLERS {
        match bus.root_hub_name(controller) {
            Ok(Some(root)) => {
                trace!(controller, root, "walking controller");
                walk_hub(bus, &root, &mut devices);
            }
            Ok(None) => {}
            Err(error) => debug!(controller, %error, "controller skipped"),
        }
    }
    devices
}

fn walk_hub<B: Bus>(bus: &B, name: &str, devices: &mut Vec<HostDevice>) {
    let hub = match bus.open_hub(name) {
        Ok(hub) => hub,
        Err(error) => {
            warn!(name, %error, "hub open failed");
            return;
        }
    };
    let ports = match hub.port_count() {
        Ok(ports) => ports,
        Err(error) => {
            warn!(name, %error, "hub port count failed");
            return;
        }
    };
    for port in 1..=u32::from(ports) {
        if let Err(error) = walk_port(bus, &hub, name, port, devices) {
            debug!(name, port, %error, "port skipped");
        }
    }
}

fn walk_port<B: Bus>(
    bus: &B,
    hub: &B::Hub,
    hub_name: &str,
    port: u32,
    devices: &mut Vec<HostDevice>,
) -> Result<(), FetchError> {
    let conn = hub.connection(port)?;
    if !conn.connected {
        return Ok(());
    }
    if conn.is_hub {
        let child = hub.connection_name(port)?;
        walk_hub(bus, &child, devices);
        return Ok(());
    }
    let driver_key = hub.driver_key(port)?;
    let collected = match hub.config_descriptor(port, 0) {
        Ok(cfg) => strings::collect(hub, port, &conn.device, &cfg),
        Err(error) => {
            // a device with an unreadable configuration still gets listed,
            // just without its strings
            debug!(hub_name, port, %error, "configuration descriptor unavailable");
            Vec::new()
        }
    };
    devices.push(populate(&conn.device, port, &driver_key, hub_name, &collected));
    Ok(())
}

/// Build a [`HostDevice`] out of everything learned about a leaf port.
pub(crate) fn populate(
    desc: &DeviceDescriptor,
    port: u32,
    driver_key: &str,
    hub_name: &str,
    strings: &[StringEntry],
) -> HostDevice {
    // first matching entry wins, so the first language reported by the
    // device takes precedence
    let lookup = |index: u8| {
        strings
            .iter()
            .find(|entry| index != 0 && entry.index == index)
            .map(StringEntry::text)
    };
    let serial = lookup(desc.i_serial);
    let serial_hash = serial.as_deref().map_or(0, device::serial_hash);
    let state = match driver_key.is_empty() {
        true => DeviceState::Unused,
        false => DeviceState::UsedByHostCapturable,
    };
    HostDevice {
        vendor_id: desc.vendor_id,
        product_id: desc.product_id,
        device_rev: desc.device_rev,
        usb_version: desc.usb_version,
        device_class: desc.device_class,
        device_sub_class: desc.device_sub_class,
        device_protocol: desc.device_protocol,
        bus: 0,
        port,
        hub_name: hub_name.to_owned(),
        driver_key: driver_key.to_owned(),
        manufacturer: lookup(desc.i_manufacturer),
        product: lookup(desc.i_product),
        serial,
        serial_hash,
        state,
        speed: DeviceSpeed::Unknown,
        address: driver_key.to_owned(),
        alt_address: None,
    }
}
