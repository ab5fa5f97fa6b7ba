//! Enumeration of the devices bound to the capture driver.
//!
//! The capture driver publishes a device interface per captured device; this
//! module lists those interfaces, validates each instance against the
//! driver's control contract, and answers the reconciler's per-device state
//! queries.

use crate::device::{DeviceSpeed, DeviceState};
use crate::error::UsbError;
use crate::guid;
use crate::ioctl::{self, ctl_code, FILE_DEVICE_UNKNOWN, FILE_WRITE_ACCESS, METHOD_BUFFERED};
use crate::monitor::{Monitor, ProtocolVersion};
use crate::reconcile::{CapturedDevice, DeviceQuery};
use crate::wchar::from_wide_bytes;
use std::io;
use std::mem::{offset_of, size_of};
use std::os::windows::io::OwnedHandle;
use tracing::{debug, trace, warn};
use windows_sys::core::GUID;
use windows_sys::Win32::Devices::DeviceAndDriverInstallation::{
    SetupDiDestroyDeviceInfoList, SetupDiEnumDeviceInterfaces, SetupDiGetClassDevsW,
    SetupDiGetDeviceInterfaceDetailW, SetupDiGetDeviceRegistryPropertyW, DIGCF_DEVICEINTERFACE,
    DIGCF_PRESENT, HDEVINFO, SPDRP_DRIVER, SP_DEVICE_INTERFACE_DATA,
    SP_DEVICE_INTERFACE_DETAIL_DATA_W, SP_DEVINFO_DATA,
};
use windows_sys::Win32::Foundation::{
    ERROR_INSUFFICIENT_BUFFER, ERROR_NO_MORE_ITEMS, GENERIC_READ, GENERIC_WRITE,
    INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::Storage::FileSystem::{
    FILE_ATTRIBUTE_SYSTEM, FILE_SHARE_READ, FILE_SHARE_WRITE,
};

/// Device interface class published by the capture driver
pub(crate) const CAPTURE_CLASS: GUID =
    guid!(0x2f5f0bd2, 0x8f63, 0x4f1f, 0x9e, 0x4b, 0x7d, 0x3c, 0x51, 0x20, 0xaa, 0x31);

pub(crate) const CAPTURE_MAJOR: u32 = 4;
pub(crate) const CAPTURE_MINOR: u32 = 0;

const IOCTL_CAP_GET_VERSION: u32 =
    ctl_code(FILE_DEVICE_UNKNOWN, 0x601, METHOD_BUFFERED, FILE_WRITE_ACCESS);
const IOCTL_CAP_IS_OPERATIONAL: u32 =
    ctl_code(FILE_DEVICE_UNKNOWN, 0x602, METHOD_BUFFERED, FILE_WRITE_ACCESS);
const IOCTL_CAP_GET_DEVICE: u32 =
    ctl_code(FILE_DEVICE_UNKNOWN, 0x603, METHOD_BUFFERED, FILE_WRITE_ACCESS);

#[repr(C)]
#[derive(Copy, Clone, Default)]
struct CaptureDeviceReply {
    /// Opaque per-device id, meaningful to the monitor only while the
    /// capture handle that produced it stays open
    device: u64,
    hi_speed: u32,
}

struct DevInfoList(HDEVINFO);

impl Drop for DevInfoList {
    fn drop(&mut self) {
        let _ = unsafe { SetupDiDestroyDeviceInfoList(self.0) };
    }
}

/// List every present device interface of the capture class.
///
/// A record is only accepted after the capture driver behind it passes the
/// version handshake and liveness check; rejected candidates are logged and
/// enumeration resumes.
pub(crate) fn captured_devices() -> io::Result<Vec<CapturedDevice>> {
    let list = match unsafe {
        SetupDiGetClassDevsW(
            &CAPTURE_CLASS,
            std::ptr::null(),
            0,
            DIGCF_PRESENT | DIGCF_DEVICEINTERFACE,
        )
    } {
        INVALID_HANDLE_VALUE => return Err(io::Error::last_os_error()),
        handle => DevInfoList(handle),
    };

    let mut found = Vec::new();
    for index in 0.. {
        let mut ifdata: SP_DEVICE_INTERFACE_DATA = unsafe { std::mem::zeroed() };
        ifdata.cbSize = size_of::<SP_DEVICE_INTERFACE_DATA>() as u32;
        if unsafe {
            SetupDiEnumDeviceInterfaces(list.0, std::ptr::null(), &CAPTURE_CLASS, index, &mut ifdata)
        } == 0
        {
            let error = io::Error::last_os_error();
            if error.raw_os_error() == Some(ERROR_NO_MORE_ITEMS as i32) {
                break;
            }
            warn!(index, %error, "device interface enumeration failed, resuming");
            continue;
        }
        match capture_record(&list, &ifdata) {
            Ok(record) => {
                trace!(path = %record.path, driver_key = %record.driver_key, "captured device");
                found.push(record);
            }
            Err(error) => debug!(index, %error, "capture candidate dropped"),
        }
    }
    Ok(found)
}

fn capture_record(
    list: &DevInfoList,
    ifdata: &SP_DEVICE_INTERFACE_DATA,
) -> Result<CapturedDevice, UsbError> {
    // size probe for the interface detail
    let mut required = 0u32;
    unsafe {
        SetupDiGetDeviceInterfaceDetailW(
            list.0,
            ifdata,
            std::ptr::null_mut(),
            0,
            &mut required,
            std::ptr::null_mut(),
        )
    };
    let probe = io::Error::last_os_error();
    if probe.raw_os_error() != Some(ERROR_INSUFFICIENT_BUFFER as i32) {
        return Err(UsbError::Io(probe));
    }

    let mut buf = vec![0u8; required as usize];
    let detail = buf.as_mut_ptr() as *mut SP_DEVICE_INTERFACE_DETAIL_DATA_W;
    // cbSize is the fixed part only, never the full allocation
    unsafe { (*detail).cbSize = size_of::<SP_DEVICE_INTERFACE_DETAIL_DATA_W>() as u32 };
    let mut devinfo: SP_DEVINFO_DATA = unsafe { std::mem::zeroed() };
    devinfo.cbSize = size_of::<SP_DEVINFO_DATA>() as u32;
    if unsafe {
        SetupDiGetDeviceInterfaceDetailW(
            list.0,
            ifdata,
            detail,
            required,
            std::ptr::null_mut(),
            &mut devinfo,
        )
    } == 0
    {
        return Err(UsbError::Io(io::Error::last_os_error()));
    }
    let path_at = offset_of!(SP_DEVICE_INTERFACE_DETAIL_DATA_W, DevicePath);
    let path = from_wide_bytes(&buf[path_at..]);

    let driver_key = driver_registry_key(list, &devinfo)?;
    validate(&path)?;
    Ok(CapturedDevice { path, driver_key })
}

/// SPDRP_DRIVER of the device instance, via the usual size probe.
fn driver_registry_key(list: &DevInfoList, devinfo: &SP_DEVINFO_DATA) -> Result<String, UsbError> {
    let mut required = 0u32;
    unsafe {
        SetupDiGetDeviceRegistryPropertyW(
            list.0,
            devinfo,
            SPDRP_DRIVER,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            0,
            &mut required,
        )
    };
    let probe = io::Error::last_os_error();
    if probe.raw_os_error() != Some(ERROR_INSUFFICIENT_BUFFER as i32) {
        return Err(UsbError::Io(probe));
    }
    let mut buf = vec![0u8; required as usize];
    if unsafe {
        SetupDiGetDeviceRegistryPropertyW(
            list.0,
            devinfo,
            SPDRP_DRIVER,
            std::ptr::null_mut(),
            buf.as_mut_ptr(),
            required,
            std::ptr::null_mut(),
        )
    } == 0
    {
        return Err(UsbError::Io(io::Error::last_os_error()));
    }
    Ok(from_wide_bytes(&buf))
}

/// Version and liveness handshake against a freshly opened capture device.
fn validate(path: &str) -> Result<(), UsbError> {
    let handle = open_capture(path)?;
    let mut version = ProtocolVersion::default();
    ioctl::ioctl_out(&handle, IOCTL_CAP_GET_VERSION, &mut version)?;
    if version.major != CAPTURE_MAJOR || version.minor < CAPTURE_MINOR {
        return Err(UsbError::VersionMismatch {
            found_major: version.major,
            found_minor: version.minor,
            require_major: CAPTURE_MAJOR,
            require_minor: CAPTURE_MINOR,
        });
    }
    ioctl::ioctl_none(&handle, IOCTL_CAP_IS_OPERATIONAL)?;
    Ok(())
}

fn open_capture(path: &str) -> io::Result<OwnedHandle> {
    ioctl::open_device(
        path,
        GENERIC_READ | GENERIC_WRITE,
        FILE_SHARE_READ | FILE_SHARE_WRITE,
        FILE_ATTRIBUTE_SYSTEM,
    )
}

/// The reconciler's query seam, backed by the capture driver and the
/// monitor.
pub(crate) struct MonitorQuery<'mon> {
    pub(crate) monitor: &'mon Monitor,
}

impl DeviceQuery for MonitorQuery<'_> {
    fn query(&self, path: &str) -> Result<(DeviceState, DeviceSpeed), UsbError> {
        let handle = open_capture(path)?;
        let mut reply = CaptureDeviceReply::default();
        ioctl::ioctl_out(&handle, IOCTL_CAP_GET_DEVICE, &mut reply)?;
        // ask the monitor while the capture handle is still open; the opaque
        // device id goes stale the moment the handle closes
        let state = self.monitor.device_state(reply.device)?;
        drop(handle);
        let speed = match reply.hi_speed {
            0 => DeviceSpeed::Full,
            _ => DeviceSpeed::High,
        };
        Ok((state, speed))
    }
}
