use crate::descriptor::{ConfigBlob, DeviceDescriptor, StringEntry};
use crate::device::DeviceState;
use crate::error::FetchError;
use crate::topology::{walk, Bus, Hub, PortConnection};
use std::collections::HashMap;
use std::io;

#[derive(Clone)]
enum FakePort {
    Hub(String),
    Device { desc: DeviceDescriptor, driver_key: String },
    /// Connected leaf whose driver key cannot be read
    Broken,
}

#[derive(Clone, Default)]
struct FakeHub {
    ports: Vec<Option<FakePort>>,
}

impl FakeHub {
    fn port(&self, port: u32) -> Option<&FakePort> {
        self.ports.get(port as usize - 1).and_then(|slot| slot.as_ref())
    }
}

fn not_found() -> FetchError {
    FetchError::Io(io::Error::from(io::ErrorKind::NotFound))
}

impl Hub for FakeHub {
    fn port_count(&self) -> Result<u8, FetchError> {
        Ok(self.ports.len() as u8)
    }

    fn connection(&self, port: u32) -> Result<PortConnection, FetchError> {
        Ok(match self.port(port) {
            None => PortConnection::default(),
            Some(FakePort::Hub(_)) => PortConnection {
                connected: true,
                is_hub: true,
                device: DeviceDescriptor::default(),
            },
            Some(FakePort::Device { desc, .. }) => {
                PortConnection { connected: true, is_hub: false, device: *desc }
            }
            Some(FakePort::Broken) => PortConnection {
                connected: true,
                is_hub: false,
                device: DeviceDescriptor::default(),
            },
        })
    }

    fn connection_name(&self, port: u32) -> Result<String, FetchError> {
        match self.port(port) {
            Some(FakePort::Hub(name)) => Ok(name.clone()),
            _ => Err(not_found()),
        }
    }

    fn driver_key(&self, port: u32) -> Result<String, FetchError> {
        match self.port(port) {
            Some(FakePort::Device { driver_key, .. }) => Ok(driver_key.clone()),
            _ => Err(not_found()),
        }
    }

    fn config_descriptor(&self, _port: u32, _index: u8) -> Result<ConfigBlob, FetchError> {
        Ok(ConfigBlob::from_descriptor_bytes(vec![9, 2, 9, 0, 1, 1, 0, 0x80, 50]))
    }

    fn string_descriptor(&self, _port: u32, _index: u8, _lang: u16) -> Result<StringEntry, FetchError> {
        Err(not_found())
    }
}

#[derive(Default)]
struct FakeBus {
    roots: Vec<String>,
    hubs: HashMap<String, FakeHub>,
}

impl Bus for FakeBus {
    type Hub = FakeHub;

    fn root_hub_name(&self, controller: u32) -> Result<Option<String>, FetchError> {
        Ok(self.roots.get(controller as usize).cloned())
    }

    fn open_hub(&self, name: &str) -> Result<FakeHub, FetchError> {
        self.hubs.get(name).cloned().ok_or_else(not_found)
    }
}

fn gamepad(driver_key: &str) -> FakePort {
    FakePort::Device {
        desc: DeviceDescriptor { vendor_id: 0x045e, product_id: 0x028e, ..Default::default() },
        driver_key: driver_key.into(),
    }
}

#[test]
fn walk_finds_devices_behind_nested_hubs() {
    let mut hubs = HashMap::new();
    hubs.insert(
        "RootHub0".to_string(),
        FakeHub {
            ports: vec![
                Some(FakePort::Hub("HubA".into())),
                Some(FakePort::Hub("HubB".into())),
            ],
        },
    );
    hubs.insert(
        "HubA".to_string(),
        FakeHub { ports: vec![Some(gamepad("KEY-A1")), None, Some(gamepad("KEY-A3")), None] },
    );
    hubs.insert(
        "HubB".to_string(),
        FakeHub { ports: vec![Some(gamepad("KEY-B1")), None, Some(gamepad("KEY-B3")), None] },
    );
    let bus = FakeBus { roots: vec!["RootHub0".into()], hubs };

    let devices = walk(&bus);
    assert_eq!(devices.len(), 4);
    for dev in &devices {
        assert!(!dev.driver_key.is_empty());
        assert_eq!(dev.state, DeviceState::UsedByHostCapturable);
        assert_eq!(dev.address, dev.driver_key);
        assert_eq!(dev.alt_address, None);
        assert_eq!(dev.bus, 0);
        assert_eq!(dev.vendor_id, 0x045e);
    }
    let mut seen: Vec<(&str, u32)> =
        devices.iter().map(|dev| (dev.hub_name.as_str(), dev.port)).collect();
    seen.sort();
    assert_eq!(seen, vec![("HubA", 1), ("HubA", 3), ("HubB", 1), ("HubB", 3)]);
}

#[test]
fn broken_port_does_not_hide_its_siblings() {
    let mut hubs = HashMap::new();
    hubs.insert(
        "RootHub0".to_string(),
        FakeHub { ports: vec![Some(FakePort::Broken), Some(gamepad("KEY-2"))] },
    );
    let bus = FakeBus { roots: vec!["RootHub0".into()], hubs };

    let devices = walk(&bus);
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].port, 2);
    assert_eq!(devices[0].driver_key, "KEY-2");
}

#[test]
fn missing_child_hub_aborts_only_its_subtree() {
    let mut hubs = HashMap::new();
    hubs.insert(
        "RootHub0".to_string(),
        FakeHub {
            ports: vec![Some(FakePort::Hub("Gone".into())), Some(gamepad("KEY-2"))],
        },
    );
    let bus = FakeBus { roots: vec!["RootHub0".into()], hubs };

    let devices = walk(&bus);
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].driver_key, "KEY-2");
}

#[test]
fn absent_controllers_yield_an_empty_list() {
    let bus = FakeBus::default();
    assert!(walk(&bus).is_empty());
}
