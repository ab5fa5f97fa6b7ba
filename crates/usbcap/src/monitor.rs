//! Client for the kernel monitor control device.
//!
//! The monitor tracks USB device arrivals, matches them against installed
//! filters, and mediates capture. Everything here is a thin ioctl wrapper
//! around its fixed control contract.

use crate::device::DeviceState;
use crate::error::UsbError;
use crate::event::OwnedEventHandle;
use crate::filter::{Filter, FilterField, FilterHandle};
use crate::ioctl::{self, ctl_code, FILE_DEVICE_UNKNOWN, FILE_WRITE_ACCESS, METHOD_BUFFERED};
use crate::wchar::to_wide;
use num_traits::FromPrimitive;
use std::io;
use std::os::windows::io::{AsRawHandle, OwnedHandle};
use std::time::Duration;
use tracing::{debug, error, trace, warn};
use windows_sys::Win32::Foundation::{ERROR_SERVICE_ALREADY_RUNNING, GENERIC_READ, GENERIC_WRITE};
use windows_sys::Win32::Storage::FileSystem::{
    FILE_ATTRIBUTE_SYSTEM, FILE_SHARE_READ, FILE_SHARE_WRITE,
};
use windows_sys::Win32::System::Services::{
    CloseServiceHandle, OpenSCManagerW, OpenServiceW, QueryServiceStatus, StartServiceW,
    SC_MANAGER_CONNECT, SERVICE_QUERY_STATUS, SERVICE_RUNNING, SERVICE_START, SERVICE_STATUS,
};

pub(crate) const MONITOR_DEVICE: &str = r"\\.\UsbCapMon";
pub(crate) const MONITOR_SERVICE: &str = "usbcapmon";
pub(crate) const MONITOR_MAJOR: u32 = 5;
pub(crate) const MONITOR_MINOR: u32 = 0;

const IOCTL_MON_GET_VERSION: u32 =
    ctl_code(FILE_DEVICE_UNKNOWN, 0x610, METHOD_BUFFERED, FILE_WRITE_ACCESS);
const IOCTL_MON_ADD_FILTER: u32 =
    ctl_code(FILE_DEVICE_UNKNOWN, 0x611, METHOD_BUFFERED, FILE_WRITE_ACCESS);
const IOCTL_MON_REMOVE_FILTER: u32 =
    ctl_code(FILE_DEVICE_UNKNOWN, 0x612, METHOD_BUFFERED, FILE_WRITE_ACCESS);
const IOCTL_MON_RUN_FILTERS: u32 =
    ctl_code(FILE_DEVICE_UNKNOWN, 0x613, METHOD_BUFFERED, FILE_WRITE_ACCESS);
const IOCTL_MON_GET_DEVICE: u32 =
    ctl_code(FILE_DEVICE_UNKNOWN, 0x614, METHOD_BUFFERED, FILE_WRITE_ACCESS);
const IOCTL_MON_SET_NOTIFY_EVENT: u32 =
    ctl_code(FILE_DEVICE_UNKNOWN, 0x615, METHOD_BUFFERED, FILE_WRITE_ACCESS);

/// Version reply shared by the monitor and capture control interfaces.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default)]
pub(crate) struct ProtocolVersion {
    pub(crate) major: u32,
    pub(crate) minor: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Default)]
struct AddFilterReply {
    status: i32,
    _reserved: u32,
    id: u64,
}

#[repr(C)]
#[derive(Copy, Clone, Default)]
struct DeviceStateReply {
    state: u32,
}

#[repr(C)]
#[derive(Copy, Clone)]
struct SetNotifyEventRequest {
    event: u64,
}

#[repr(C)]
#[derive(Copy, Clone, Default)]
struct SetNotifyEventReply {
    status: i32,
}

/// An open monitor control device.
///
/// The handle is established by init and read-only afterwards; every method
/// is a single ioctl.
pub(crate) struct Monitor {
    handle: OwnedHandle,
}

impl Monitor {
    /// Open the control device, starting the monitor service and retrying
    /// once when it is absent.
    pub(crate) fn open() -> Result<Self, UsbError> {
        let attempt = || {
            ioctl::open_device(
                MONITOR_DEVICE,
                GENERIC_READ | GENERIC_WRITE,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                FILE_ATTRIBUTE_SYSTEM,
            )
        };
        let handle = match attempt() {
            Ok(handle) => handle,
            Err(error) => {
                debug!(%error, "monitor control device absent, starting service");
                if let Err(error) = start_service(MONITOR_SERVICE) {
                    warn!(%error, "monitor service start failed");
                    return Err(UsbError::NotFound);
                }
                attempt().map_err(|error| {
                    error!(%error, "monitor control device absent after service start");
                    UsbError::NotFound
                })?
            }
        };
        Ok(Self { handle })
    }

    /// Protocol handshake; major must match and minor must be recent enough.
    pub(crate) fn handshake(&self) -> Result<(), UsbError> {
        let mut version = ProtocolVersion::default();
        ioctl::ioctl_out(&self.handle, IOCTL_MON_GET_VERSION, &mut version)?;
        if version.major != MONITOR_MAJOR || version.minor < MONITOR_MINOR {
            return Err(UsbError::VersionMismatch {
                found_major: version.major,
                found_minor: version.minor,
                require_major: MONITOR_MAJOR,
                require_minor: MONITOR_MINOR,
            });
        }
        trace!(major = version.major, minor = version.minor, "monitor handshake ok");
        Ok(())
    }

    pub(crate) fn add_filter(&self, filter: &Filter) -> Result<FilterHandle, UsbError> {
        trace!(
            manufacturer = ?filter.string(FilterField::Manufacturer),
            product = ?filter.string(FilterField::Product),
            serial = ?filter.string(FilterField::SerialNumber),
            "adding filter"
        );
        let mut reply = AddFilterReply::default();
        ioctl::ioctl_inout(&self.handle, IOCTL_MON_ADD_FILTER, filter, &mut reply)?;
        if reply.status != 0 {
            return Err(UsbError::Rejected(reply.status));
        }
        FilterHandle::new(reply.id)
            .ok_or_else(|| UsbError::Io(io::Error::from(io::ErrorKind::InvalidData)))
    }

    /// Fire and forget; a failed remove is logged, not surfaced.
    pub(crate) fn remove_filter(&self, handle: FilterHandle) {
        let id = handle.get();
        trace!(id, "removing filter");
        if let Err(error) = ioctl::ioctl_in(&self.handle, IOCTL_MON_REMOVE_FILTER, &id) {
            warn!(id, %error, "remove filter failed");
        }
    }

    /// Apply every installed filter to the currently connected devices.
    pub(crate) fn run_filters(&self) -> Result<(), UsbError> {
        ioctl::ioctl_none(&self.handle, IOCTL_MON_RUN_FILTERS)?;
        Ok(())
    }

    /// State of a captured device, addressed by the opaque id the capture
    /// driver reported for it.
    pub(crate) fn device_state(&self, device: u64) -> Result<DeviceState, UsbError> {
        let mut reply = DeviceStateReply::default();
        ioctl::ioctl_inout(&self.handle, IOCTL_MON_GET_DEVICE, &device, &mut reply)?;
        DeviceState::from_u32(reply.state).ok_or_else(|| {
            error!(state = reply.state, "monitor reported an unknown device state");
            UsbError::Rejected(reply.state as i32)
        })
    }

    /// Hand the monitor an event to signal on every topology change it sees.
    pub(crate) fn set_notify_event(&self, event: &OwnedEventHandle) -> Result<(), UsbError> {
        let request = SetNotifyEventRequest { event: event.as_raw_handle() as u64 };
        let mut reply = SetNotifyEventReply::default();
        ioctl::ioctl_inout(&self.handle, IOCTL_MON_SET_NOTIFY_EVENT, &request, &mut reply)?;
        match reply.status {
            0 => Ok(()),
            status => Err(UsbError::Rejected(status)),
        }
    }
}

/// Start a service by name and wait for it to reach the running state.
fn start_service(name: &str) -> io::Result<()> {
    struct ScHandle(isize);
    impl Drop for ScHandle {
        fn drop(&mut self) {
            let _ = unsafe { CloseServiceHandle(self.0) };
        }
    }

    let scm = match unsafe { OpenSCManagerW(std::ptr::null(), std::ptr::null(), SC_MANAGER_CONNECT) }
    {
        0 => return Err(io::Error::last_os_error()),
        handle => ScHandle(handle),
    };
    let wide = to_wide(name);
    let service = match unsafe {
        OpenServiceW(scm.0, wide.as_ptr(), SERVICE_START | SERVICE_QUERY_STATUS)
    } {
        0 => return Err(io::Error::last_os_error()),
        handle => ScHandle(handle),
    };
    if unsafe { StartServiceW(service.0, 0, std::ptr::null()) } == 0 {
        let error = io::Error::last_os_error();
        if error.raw_os_error() != Some(ERROR_SERVICE_ALREADY_RUNNING as i32) {
            return Err(error);
        }
    }
    for _ in 0..50 {
        let mut status: SERVICE_STATUS = unsafe { std::mem::zeroed() };
        if unsafe { QueryServiceStatus(service.0, &mut status) } == 0 {
            return Err(io::Error::last_os_error());
        }
        if status.dwCurrentState == SERVICE_RUNNING {
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    Err(io::Error::new(io::ErrorKind::TimedOut, "service did not reach running state"))
}
