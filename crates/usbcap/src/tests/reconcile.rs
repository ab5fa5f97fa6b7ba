use crate::device::{DeviceSpeed, DeviceState, HostDevice};
use crate::error::UsbError;
use crate::reconcile::{reconcile, CapturedDevice, DeviceQuery};

fn host_device(driver_key: &str) -> HostDevice {
    HostDevice {
        vendor_id: 0x045e,
        product_id: 0x028e,
        device_rev: 0x0114,
        usb_version: 0x0200,
        device_class: 0,
        device_sub_class: 0,
        device_protocol: 0,
        bus: 0,
        port: 1,
        hub_name: "RootHub0".into(),
        driver_key: driver_key.into(),
        manufacturer: None,
        product: None,
        serial: None,
        serial_hash: 0,
        state: DeviceState::UsedByHostCapturable,
        speed: DeviceSpeed::Unknown,
        address: driver_key.into(),
        alt_address: None,
    }
}

fn captured(driver_key: &str) -> CapturedDevice {
    CapturedDevice { path: r"\\?\usbcap#vid_045e&pid_028e#1".into(), driver_key: driver_key.into() }
}

struct StaticQuery(DeviceState, DeviceSpeed);

impl DeviceQuery for StaticQuery {
    fn query(&self, _path: &str) -> Result<(DeviceState, DeviceSpeed), UsbError> {
        Ok((self.0, self.1))
    }
}

struct FailingQuery;

impl DeviceQuery for FailingQuery {
    fn query(&self, _path: &str) -> Result<(DeviceState, DeviceSpeed), UsbError> {
        Err(UsbError::Rejected(9))
    }
}

#[test]
fn matched_record_takes_state_speed_and_capture_address() {
    let mut devices = vec![host_device("KEY-1")];
    let caps = vec![captured("KEY-1")];
    reconcile(&mut devices, &caps, &StaticQuery(DeviceState::HeldByProxy, DeviceSpeed::High));

    assert_eq!(devices[0].state, DeviceState::HeldByProxy);
    assert_eq!(devices[0].speed, DeviceSpeed::High);
    assert_eq!(devices[0].address, caps[0].path);
    assert_eq!(devices[0].alt_address.as_deref(), Some("KEY-1"));
}

#[test]
fn host_owned_devices_keep_their_address() {
    let mut devices = vec![host_device("KEY-1")];
    let caps = vec![captured("KEY-1")];
    reconcile(&mut devices, &caps, &StaticQuery(DeviceState::UsedByHost, DeviceSpeed::Full));

    assert_eq!(devices[0].state, DeviceState::UsedByHost);
    assert_eq!(devices[0].speed, DeviceSpeed::Full);
    assert_eq!(devices[0].address, "KEY-1");
    assert_eq!(devices[0].alt_address, None);
}

#[test]
fn unrelated_records_are_untouched() {
    let mut devices = vec![host_device("KEY-1"), host_device("KEY-2")];
    let caps = vec![captured("KEY-2")];
    reconcile(&mut devices, &caps, &StaticQuery(DeviceState::UsedByGuest, DeviceSpeed::High));

    assert_eq!(devices[0].state, DeviceState::UsedByHostCapturable);
    assert_eq!(devices[0].speed, DeviceSpeed::Unknown);
    assert_eq!(devices[1].state, DeviceState::UsedByGuest);
}

#[test]
fn query_failure_leaves_the_record_as_enumerated() {
    let mut devices = vec![host_device("KEY-1")];
    let caps = vec![captured("KEY-1")];
    reconcile(&mut devices, &caps, &FailingQuery);

    assert_eq!(devices[0].state, DeviceState::UsedByHostCapturable);
    assert_eq!(devices[0].speed, DeviceSpeed::Unknown);
    assert_eq!(devices[0].address, "KEY-1");
    assert_eq!(devices[0].alt_address, None);
}

#[test]
fn captured_records_without_driver_keys_are_skipped() {
    let mut devices = vec![host_device("KEY-1")];
    let caps = vec![CapturedDevice { path: "dead".into(), driver_key: String::new() }];
    reconcile(&mut devices, &caps, &StaticQuery(DeviceState::UsedByGuest, DeviceSpeed::High));

    assert_eq!(devices[0].state, DeviceState::UsedByHostCapturable);
}
