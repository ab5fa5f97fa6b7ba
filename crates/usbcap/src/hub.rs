//! Host controller and hub access over the USB hub ioctl surface.

use crate::descriptor::{
    ConfigBlob, DeviceDescriptor, StringEntry, CONFIG_DESC_LEN, DESC_TYPE_CONFIGURATION,
    DESC_TYPE_STRING, DEVICE_DESC_LEN,
};
use crate::error::FetchError;
use crate::ioctl::{self, NameRequest};
use crate::topology::{Bus, Hub, PortConnection};
use std::io;
use std::mem::{offset_of, size_of};
use std::os::windows::io::OwnedHandle;
use tracing::trace;
use windows_sys::Win32::Devices::Usb::{
    DeviceConnected, IOCTL_USB_GET_DESCRIPTOR_FROM_NODE_CONNECTION,
    IOCTL_USB_GET_NODE_CONNECTION_DRIVERKEY_NAME, IOCTL_USB_GET_NODE_CONNECTION_INFORMATION_EX,
    IOCTL_USB_GET_NODE_CONNECTION_NAME, IOCTL_USB_GET_NODE_INFORMATION, IOCTL_USB_GET_ROOT_HUB_NAME,
    MAXIMUM_USB_STRING_LENGTH, USB_DESCRIPTOR_REQUEST, USB_NODE_CONNECTION_DRIVERKEY_NAME,
    USB_NODE_CONNECTION_INFORMATION_EX, USB_NODE_CONNECTION_NAME, USB_NODE_INFORMATION,
    USB_PIPE_INFO, USB_ROOT_HUB_NAME,
};
use windows_sys::Win32::Foundation::GENERIC_WRITE;
use windows_sys::Win32::Storage::FileSystem::FILE_SHARE_WRITE;

/// Connection-info requests reserve room for this many pipe trailers.
const PIPE_TRAILERS: usize = 20;

/// Offset of the descriptor payload inside a [`USB_DESCRIPTOR_REQUEST`].
const REQUEST_HEADER: usize = offset_of!(USB_DESCRIPTOR_REQUEST, Data);

impl NameRequest for USB_NODE_CONNECTION_DRIVERKEY_NAME {
    const IOCTL: u32 = IOCTL_USB_GET_NODE_CONNECTION_DRIVERKEY_NAME;
    const PAYLOAD: usize = offset_of!(USB_NODE_CONNECTION_DRIVERKEY_NAME, DriverKeyName);
    const HAS_INPUT: bool = true;

    fn probe(port: u32) -> Self {
        let mut me: Self = unsafe { std::mem::zeroed() };
        me.ConnectionIndex = port;
        me
    }

    fn actual_length(&self) -> u32 {
        self.ActualLength
    }
}

impl NameRequest for USB_NODE_CONNECTION_NAME {
    const IOCTL: u32 = IOCTL_USB_GET_NODE_CONNECTION_NAME;
    const PAYLOAD: usize = offset_of!(USB_NODE_CONNECTION_NAME, NodeName);
    const HAS_INPUT: bool = true;

    fn probe(port: u32) -> Self {
        let mut me: Self = unsafe { std::mem::zeroed() };
        me.ConnectionIndex = port;
        me
    }

    fn actual_length(&self) -> u32 {
        self.ActualLength
    }
}

impl NameRequest for USB_ROOT_HUB_NAME {
    const IOCTL: u32 = IOCTL_USB_GET_ROOT_HUB_NAME;
    const PAYLOAD: usize = offset_of!(USB_ROOT_HUB_NAME, RootHubName);
    const HAS_INPUT: bool = false;

    fn probe(_port: u32) -> Self {
        unsafe { std::mem::zeroed() }
    }

    fn actual_length(&self) -> u32 {
        self.ActualLength
    }
}

/// An open host-controller control device (`\\.\HCD<n>`).
pub(crate) struct ControllerHandle(OwnedHandle);

impl ControllerHandle {
    pub(crate) fn open(index: u32) -> io::Result<Self> {
        ioctl::open_device(&format!(r"\\.\HCD{index}"), GENERIC_WRITE, FILE_SHARE_WRITE, 0).map(Self)
    }

    pub(crate) fn root_hub_name(&self) -> Result<String, FetchError> {
        ioctl::query_name::<USB_ROOT_HUB_NAME>(&self.0, 0)
    }
}

/// An open hub device, addressed per port through [`Hub`].
pub(crate) struct HubHandle {
    handle: OwnedHandle,
}

impl HubHandle {
    pub(crate) fn open(name: &str) -> io::Result<Self> {
        ioctl::open_device(&format!(r"\\.\{name}"), GENERIC_WRITE, FILE_SHARE_WRITE, 0)
            .map(|handle| Self { handle })
    }

    /// Issue a descriptor request whose buffer doubles as input and output.
    fn descriptor_request(&self, buf: &mut [u8]) -> Result<usize, FetchError> {
        let ptr = buf.as_mut_ptr();
        let returned = ioctl::ioctl(
            &self.handle,
            IOCTL_USB_GET_DESCRIPTOR_FROM_NODE_CONNECTION,
            ptr as _,
            buf.len() as u32,
            ptr as _,
            buf.len() as u32,
        )?;
        Ok(returned as usize)
    }
}

/// Prepare the request header for a descriptor fetch. `wValue` carries the
/// descriptor type in its high byte and the index in its low byte.
fn write_descriptor_request(buf: &mut [u8], port: u32, kind: u8, index: u8, lang: u16) {
    debug_assert!(buf.len() >= REQUEST_HEADER);
    let request = buf.as_mut_ptr() as *mut USB_DESCRIPTOR_REQUEST;
    unsafe {
        (*request).ConnectionIndex = port;
        (*request).SetupPacket.wValue = (u16::from(kind) << 8) | u16::from(index);
        (*request).SetupPacket.wIndex = lang;
        (*request).SetupPacket.wLength = (buf.len() - REQUEST_HEADER) as u16;
    }
}

impl Hub for HubHandle {
    fn port_count(&self) -> Result<u8, FetchError> {
        let mut info: USB_NODE_INFORMATION = unsafe { std::mem::zeroed() };
        let ptr = &mut info as *mut USB_NODE_INFORMATION;
        ioctl::ioctl(
            &self.handle,
            IOCTL_USB_GET_NODE_INFORMATION,
            ptr as _,
            size_of::<USB_NODE_INFORMATION>() as u32,
            ptr as _,
            size_of::<USB_NODE_INFORMATION>() as u32,
        )?;
        Ok(unsafe { info.u.HubInformation.HubDescriptor.bNumberOfPorts })
    }

    fn connection(&self, port: u32) -> Result<PortConnection, FetchError> {
        let len = size_of::<USB_NODE_CONNECTION_INFORMATION_EX>()
            + PIPE_TRAILERS * size_of::<USB_PIPE_INFO>();
        let mut buf = vec![0u8; len];
        let info = buf.as_mut_ptr() as *mut USB_NODE_CONNECTION_INFORMATION_EX;
        unsafe { (*info).ConnectionIndex = port };
        ioctl::ioctl(
            &self.handle,
            IOCTL_USB_GET_NODE_CONNECTION_INFORMATION_EX,
            info as _,
            len as u32,
            info as _,
            len as u32,
        )?;
        let connected = unsafe { (*info).ConnectionStatus } == DeviceConnected;
        let is_hub = unsafe { (*info).DeviceIsHub } != 0;
        let desc_at = offset_of!(USB_NODE_CONNECTION_INFORMATION_EX, DeviceDescriptor);
        let device = DeviceDescriptor::parse(&buf[desc_at..desc_at + DEVICE_DESC_LEN])
            .ok_or(FetchError::Malformed("device descriptor"))?;
        Ok(PortConnection { connected, is_hub, device })
    }

    fn connection_name(&self, port: u32) -> Result<String, FetchError> {
        ioctl::query_name::<USB_NODE_CONNECTION_NAME>(&self.handle, port)
    }

    fn driver_key(&self, port: u32) -> Result<String, FetchError> {
        ioctl::query_name::<USB_NODE_CONNECTION_DRIVERKEY_NAME>(&self.handle, port)
    }

    fn config_descriptor(&self, port: u32, index: u8) -> Result<ConfigBlob, FetchError> {
        // first fetch just the configuration header to learn wTotalLength
        let mut probe = vec![0u8; REQUEST_HEADER + CONFIG_DESC_LEN];
        write_descriptor_request(&mut probe, port, DESC_TYPE_CONFIGURATION, index, 0);
        if self.descriptor_request(&mut probe)? != probe.len() {
            return Err(FetchError::Malformed("configuration header short"));
        }
        let total = u16::from_le_bytes([probe[REQUEST_HEADER + 2], probe[REQUEST_HEADER + 3]]) as usize;
        if total < CONFIG_DESC_LEN {
            return Err(FetchError::Malformed("wTotalLength below configuration header"));
        }

        let mut buf = vec![0u8; REQUEST_HEADER + total];
        write_descriptor_request(&mut buf, port, DESC_TYPE_CONFIGURATION, index, 0);
        if self.descriptor_request(&mut buf)? != buf.len() {
            return Err(FetchError::Malformed("configuration chain short"));
        }
        let blob = ConfigBlob::from_request(buf, REQUEST_HEADER);
        if usize::from(blob.total_length()) != total {
            return Err(FetchError::Malformed("wTotalLength changed between fetches"));
        }
        trace!(port, total_length = blob.total_length(), "configuration descriptor");
        Ok(blob)
    }

    fn string_descriptor(&self, port: u32, index: u8, lang: u16) -> Result<StringEntry, FetchError> {
        let mut buf = vec![0u8; REQUEST_HEADER + MAXIMUM_USB_STRING_LENGTH as usize];
        write_descriptor_request(&mut buf, port, DESC_TYPE_STRING, index, lang);
        let returned = self.descriptor_request(&mut buf)?;
        if returned < REQUEST_HEADER + 4 {
            return Err(FetchError::Malformed("string descriptor short"));
        }
        let length = buf[REQUEST_HEADER] as usize;
        if length % 2 != 0 {
            return Err(FetchError::Malformed("odd string descriptor length"));
        }
        if length != returned - REQUEST_HEADER {
            return Err(FetchError::Malformed("string descriptor length mismatch"));
        }
        if buf[REQUEST_HEADER + 1] != DESC_TYPE_STRING {
            return Err(FetchError::Malformed("not a string descriptor"));
        }
        Ok(StringEntry {
            index,
            lang,
            data: buf[REQUEST_HEADER + 2..REQUEST_HEADER + length].to_vec(),
        })
    }
}

/// The live Windows topology.
pub(crate) struct WindowsBus;

impl Bus for WindowsBus {
    type Hub = HubHandle;

    fn root_hub_name(&self, controller: u32) -> Result<Option<String>, FetchError> {
        // absent controller indexes are expected, not an error
        let ctl = match ControllerHandle::open(controller) {
            Ok(ctl) => ctl,
            Err(_) => return Ok(None),
        };
        ctl.root_hub_name().map(Some)
    }

    fn open_hub(&self, name: &str) -> Result<Self::Hub, FetchError> {
        HubHandle::open(name).map_err(FetchError::Io)
    }
}
