//! event.rs

use std::{
    io,
    os::windows::io::{AsRawHandle, FromRawHandle, HandleOrNull, OwnedHandle, RawHandle},
};
use windows_sys::Win32::{
    Foundation::{FALSE, TRUE},
    System::Threading::{CreateEventW, SetEvent},
};

/// Windows CreateEvent creation argument
///
/// Automatic events return to the nonsignaled state after releasing a single
/// waiting thread; manual events stay signaled until reset.
#[repr(i32)]
#[derive(PartialEq)]
pub(crate) enum EventReset {
    #[allow(dead_code)]
    Manual = TRUE,
    Automatic = FALSE,
}

/// Windows CreateEvent creation argument
#[repr(i32)]
pub(crate) enum EventInitialState {
    Set = TRUE,
    Unset = FALSE,
}

/// Like [`OwnedHandle`] except extended with the Event api
pub(crate) struct OwnedEventHandle(OwnedHandle);

impl OwnedEventHandle {
    /// Create an unnamed system event
    ///
    /// [CreateEventW](https://learn.microsoft.com/en-us/windows/win32/api/synchapi/nf-synchapi-createeventa)
    pub(crate) fn anonymous(reset: EventReset, state: EventInitialState) -> io::Result<Self> {
        unsafe {
            let raw = CreateEventW(std::ptr::null(), reset as _, state as _, std::ptr::null());
            let handle = HandleOrNull::from_raw_handle(raw as _);
            OwnedHandle::try_from(handle).map_err(|_| io::Error::last_os_error())
        }
        .map(Self)
    }

    /// Set the event to the signaled state
    pub(crate) fn set(&self) -> io::Result<()> {
        match unsafe { SetEvent(self.as_raw_handle() as _) } {
            FALSE => Err(io::Error::last_os_error()),
            _ => Ok(()),
        }
    }
}

impl AsRawHandle for OwnedEventHandle {
    fn as_raw_handle(&self) -> RawHandle {
        self.0.as_raw_handle()
    }
}
