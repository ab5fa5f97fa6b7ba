//! unit tests

mod descriptor;
mod device;
mod reconcile;
mod strings;
mod topology;

#[cfg(windows)]
mod notify;
