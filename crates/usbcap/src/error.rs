//! error

use std::io;

/// Failure fetching a descriptor, name, or connection record from a hub port.
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("io error => {0}")]
    Io(#[from] io::Error),
    #[error("malformed descriptor => {0}")]
    Malformed(&'static str),
}

/// How a blocked [`crate::wait_change`] resolved without seeing a change.
#[derive(thiserror::Error, Debug)]
pub enum WaitError {
    #[error("wait timeout")]
    Timeout,
    #[error("wait interrupted")]
    Interrupted,
    #[error("wait failed => {0}")]
    Io(#[from] io::Error),
}

/// Errors surfaced by the public api
#[derive(thiserror::Error, Debug)]
pub enum UsbError {
    /// A public call was made before [`crate::init`] (or after [`crate::term`])
    #[error("library not initialized")]
    Uninitialized,
    /// [`crate::init`] on an initialized library, or [`crate::term`] on an
    /// uninitialized one
    #[error("library already in the requested state")]
    AlreadyInitialized,
    /// The monitor (or capture) driver speaks an incompatible protocol
    #[error("driver version mismatch, found {found_major}.{found_minor} require {require_major}.{require_minor}")]
    VersionMismatch {
        found_major: u32,
        found_minor: u32,
        require_major: u32,
        require_minor: u32,
    },
    /// The monitor control device is absent even after starting its service
    #[error("monitor control device not found")]
    NotFound,
    /// The monitor completed the ioctl but reported a failure status
    #[error("monitor rejected request, status {0}")]
    Rejected(i32),
    #[error("io error => {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Wait(#[from] WaitError),
}
