//! DeviceIoControl plumbing shared by the hub, capture, and monitor clients.

use crate::error::FetchError;
use crate::wchar::{from_wide_bytes, to_wide};
use std::ffi::c_void;
use std::io;
use std::mem::size_of;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle};
use windows_sys::Win32::{
    Foundation::INVALID_HANDLE_VALUE,
    Storage::FileSystem::{CreateFileW, OPEN_EXISTING},
    System::IO::DeviceIoControl,
};

// CTL_CODE constituents for the vendor control interfaces
pub(crate) const FILE_DEVICE_UNKNOWN: u32 = 0x0000_0022;
pub(crate) const METHOD_BUFFERED: u32 = 0;
pub(crate) const FILE_WRITE_ACCESS: u32 = 0x0002;

pub(crate) const fn ctl_code(device_type: u32, function: u32, method: u32, access: u32) -> u32 {
    (device_type << 16) | (access << 14) | (function << 2) | method
}

/// Open a device path for ioctl access
pub(crate) fn open_device(
    path: &str,
    access: u32,
    share: u32,
    attributes: u32,
) -> io::Result<OwnedHandle> {
    let wide = to_wide(path);
    match unsafe {
        CreateFileW(
            wide.as_ptr(),
            access,
            share,
            std::ptr::null(), // default security attributes
            OPEN_EXISTING,    // devices must already exist
            attributes,
            0, // no template
        )
    } {
        INVALID_HANDLE_VALUE => Err(io::Error::last_os_error()),
        handle => Ok(unsafe { OwnedHandle::from_raw_handle(handle as _) }),
    }
}

/// Raw [`DeviceIoControl`] wrapper; returns the transferred byte count
pub(crate) fn ioctl(
    handle: &impl AsRawHandle,
    code: u32,
    input: *const c_void,
    input_len: u32,
    output: *mut c_void,
    output_len: u32,
) -> io::Result<u32> {
    let mut returned = 0u32;
    match unsafe {
        DeviceIoControl(
            handle.as_raw_handle() as _,
            code,
            input,
            input_len,
            output,
            output_len,
            &mut returned,
            std::ptr::null_mut(),
        )
    } {
        0 => Err(io::Error::last_os_error()),
        _ => Ok(returned),
    }
}

pub(crate) fn ioctl_none(handle: &impl AsRawHandle, code: u32) -> io::Result<u32> {
    ioctl(handle, code, std::ptr::null(), 0, std::ptr::null_mut(), 0)
}

pub(crate) fn ioctl_in<I: Copy>(handle: &impl AsRawHandle, code: u32, input: &I) -> io::Result<u32> {
    ioctl(
        handle,
        code,
        input as *const I as _,
        size_of::<I>() as u32,
        std::ptr::null_mut(),
        0,
    )
}

pub(crate) fn ioctl_out<O: Copy>(
    handle: &impl AsRawHandle,
    code: u32,
    output: &mut O,
) -> io::Result<u32> {
    ioctl(
        handle,
        code,
        std::ptr::null(),
        0,
        output as *mut O as _,
        size_of::<O>() as u32,
    )
}

pub(crate) fn ioctl_inout<I: Copy, O: Copy>(
    handle: &impl AsRawHandle,
    code: u32,
    input: &I,
    output: &mut O,
) -> io::Result<u32> {
    ioctl(
        handle,
        code,
        input as *const I as _,
        size_of::<I>() as u32,
        output as *mut O as _,
        size_of::<O>() as u32,
    )
}

/// Header of a variable-length name ioctl.
///
/// These requests share one shape: a fixed header whose `ActualLength` field
/// reports the full size on a first probe call, followed by a UTF-16
/// payload retrieved by a second call with a buffer of that size.
pub(crate) trait NameRequest: Copy {
    const IOCTL: u32;
    /// Byte offset of the UTF-16 payload within the request
    const PAYLOAD: usize;
    /// Whether the request doubles as the ioctl input buffer
    const HAS_INPUT: bool;

    /// A zeroed header addressing the given port (ignored by requests that
    /// carry no connection index)
    fn probe(port: u32) -> Self;
    fn actual_length(&self) -> u32;
}

/// Run the two-call size-probe idiom for a name request and decode the
/// payload.
pub(crate) fn query_name<R: NameRequest>(
    handle: &impl AsRawHandle,
    port: u32,
) -> Result<String, FetchError> {
    let mut probe = R::probe(port);
    let header = size_of::<R>();
    let (input, input_len) = match R::HAS_INPUT {
        true => (&probe as *const R as *const c_void, header as u32),
        false => (std::ptr::null(), 0),
    };
    ioctl(handle, R::IOCTL, input, input_len, &mut probe as *mut R as _, header as u32)?;

    let actual = probe.actual_length() as usize;
    if actual < header {
        return Err(FetchError::Malformed("name request shorter than its header"));
    }

    let mut buf = vec![0u8; actual];
    let ptr = buf.as_mut_ptr();
    unsafe { std::ptr::copy_nonoverlapping(&probe as *const R as *const u8, ptr, header) };
    let (input, input_len) = match R::HAS_INPUT {
        true => (ptr as *const c_void, actual as u32),
        false => (std::ptr::null(), 0),
    };
    ioctl(handle, R::IOCTL, input, input_len, ptr as _, actual as u32)?;
    Ok(from_wide_bytes(&buf[R::PAYLOAD..]))
}
