//! Host-side USB enumeration and capture mediation for Windows.
//!
//! The library walks the host USB topology through the hub ioctl surface,
//! lists the devices already bound to the capture driver, reconciles the two
//! views against the kernel monitor, and manages the monitor's capture
//! filters. A debounced [`wait_change`] unblocks callers whenever the
//! device topology may have changed.
//!
//! The public surface comes in two shapes: a [`UsbLib`] context owning all
//! handles (teardown on drop), and a parameterless process-wide API
//! ([`init`] / [`term`] / [`get_devices`] / ...) for callers that keep no
//! state of their own.

#[cfg(test)]
mod tests;

pub mod descriptor;
pub mod device;
pub mod error;
pub mod filter;
pub mod reconcile;
pub mod topology;

mod strings;

#[cfg(windows)]
mod capture;
#[cfg(windows)]
mod event;
#[cfg(windows)]
mod hub;
#[cfg(windows)]
mod ioctl;
#[cfg(windows)]
mod monitor;
#[cfg(windows)]
pub mod notify;
#[cfg(windows)]
mod wchar;

pub use device::{DeviceSpeed, DeviceState, HostDevice};
pub use error::{FetchError, UsbError, WaitError};
pub use filter::{Filter, FilterField, FilterHandle, MatchMode, StringTableFull};
pub use reconcile::CapturedDevice;

/// Initializes a `GUID` from literal values.
#[macro_export]
macro_rules! guid {
    (
        $a:expr,
        $b:expr,
        $c:expr,
        $d0:expr,
        $d1:expr,
        $d2:expr,
        $d3:expr,
        $d4:expr,
        $d5:expr,
        $d6:expr,
        $d7:expr
    ) => {
        ::windows_sys::core::GUID {
            data1: $a,
            data2: $b,
            data3: $c,
            data4: [$d0, $d1, $d2, $d3, $d4, $d5, $d6, $d7],
        }
    };
}

#[cfg(windows)]
pub use facade::{
    add_filter, get_devices, init, interrupt_wait, remove_filter, run_filters, term, wait_change,
    NotifyMode, UsbLib,
};

#[cfg(windows)]
mod facade {
    use crate::capture::{self, MonitorQuery};
    use crate::device::HostDevice;
    use crate::error::{UsbError, WaitError};
    use crate::event::EventInitialState;
    use crate::filter::{Filter, FilterHandle};
    use crate::hub::WindowsBus;
    use crate::monitor::Monitor;
    use crate::notify::{BroadcastNotifier, ChangeEvents, MonitorNotifier, Notifier};
    use crate::{reconcile, topology};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;
    use tracing::{debug, warn};

    /// Which engine drives the notify event.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub enum NotifyMode {
        /// Listen for OS device-change broadcasts, debounced
        #[default]
        Broadcast,
        /// Let the monitor signal the event directly
        MonitorEvent,
    }

    /// An initialized library context.
    ///
    /// Construction performs the whole init sequence; a failed step unwinds
    /// the acquisitions made before it. Drop reverses init: the notifier
    /// stops first, then the monitor handle closes, then the events.
    ///
    /// Safety: DO NOT CHANGE FIELD ORDER IN STRUCT (RFC 1857)
    pub struct UsbLib {
        _notifier: Box<dyn Notifier>,
        monitor: Arc<Monitor>,
        events: Arc<ChangeEvents>,
    }

    impl UsbLib {
        pub fn init(mode: NotifyMode) -> Result<Self, UsbError> {
            let initial = match mode {
                // the monitor signals level changes, so the first wait must
                // see the initial state as "changed"
                NotifyMode::MonitorEvent => EventInitialState::Set,
                // the broadcast engine signals once after startup instead
                NotifyMode::Broadcast => EventInitialState::Unset,
            };
            let events = Arc::new(ChangeEvents::new(initial)?);
            let monitor = Arc::new(Monitor::open()?);
            monitor.handshake()?;
            let notifier: Box<dyn Notifier> = match mode {
                NotifyMode::MonitorEvent => Box::new(MonitorNotifier::start(&monitor, &events)?),
                NotifyMode::Broadcast => Box::new(BroadcastNotifier::start(Arc::clone(&events))?),
            };
            debug!(?mode, "usb library initialized");
            Ok(Self { _notifier: notifier, monitor, events })
        }

        /// Enumerate the host topology and annotate it with capture state.
        pub fn devices(&self) -> Result<Vec<HostDevice>, UsbError> {
            devices_with(&self.monitor)
        }

        pub fn add_filter(&self, filter: &Filter) -> Result<FilterHandle, UsbError> {
            self.monitor.add_filter(filter)
        }

        pub fn remove_filter(&self, handle: FilterHandle) {
            self.monitor.remove_filter(handle)
        }

        pub fn run_filters(&self) -> Result<(), UsbError> {
            self.monitor.run_filters()
        }

        /// Block until a topology change, an interrupt, or the timeout.
        /// `None` waits indefinitely.
        pub fn wait_change(&self, timeout: Option<Duration>) -> Result<(), WaitError> {
            self.events.wait(timeout)
        }

        /// Unblock one waiter currently parked in [`Self::wait_change`].
        pub fn interrupt_wait(&self) -> Result<(), UsbError> {
            self.events.interrupt().map_err(UsbError::Io)
        }
    }

    fn devices_with(monitor: &Monitor) -> Result<Vec<HostDevice>, UsbError> {
        let mut devices = topology::walk(&WindowsBus);
        match capture::captured_devices() {
            Ok(captured) => {
                reconcile::reconcile(&mut devices, &captured, &MonitorQuery { monitor })
            }
            // a broken captured-device listing must not hide the topology
            Err(error) => warn!(%error, "captured device listing failed"),
        }
        Ok(devices)
    }

    /// Process-wide context for the parameterless API.
    static GLOBAL: Mutex<Option<UsbLib>> = Mutex::new(None);

    /// Initialize the process-wide library context.
    pub fn init() -> Result<(), UsbError> {
        let mut state = GLOBAL.lock();
        if state.is_some() {
            return Err(UsbError::AlreadyInitialized);
        }
        *state = Some(UsbLib::init(NotifyMode::default())?);
        Ok(())
    }

    /// Tear down the process-wide context. Safe to call when uninitialized.
    pub fn term() -> Result<(), UsbError> {
        match GLOBAL.lock().take() {
            Some(lib) => {
                drop(lib);
                Ok(())
            }
            None => Err(UsbError::AlreadyInitialized),
        }
    }

    /// See [`UsbLib::devices`].
    pub fn get_devices() -> Result<Vec<HostDevice>, UsbError> {
        // clone the monitor handle out so the (slow) enumeration never
        // blocks the holder
        let monitor = GLOBAL
            .lock()
            .as_ref()
            .map(|lib| Arc::clone(&lib.monitor))
            .ok_or(UsbError::Uninitialized)?;
        devices_with(&monitor)
    }

    /// See [`UsbLib::add_filter`].
    pub fn add_filter(filter: &Filter) -> Result<FilterHandle, UsbError> {
        let monitor = GLOBAL
            .lock()
            .as_ref()
            .map(|lib| Arc::clone(&lib.monitor))
            .ok_or(UsbError::Uninitialized)?;
        monitor.add_filter(filter)
    }

    /// See [`UsbLib::remove_filter`].
    pub fn remove_filter(handle: FilterHandle) -> Result<(), UsbError> {
        let monitor = GLOBAL
            .lock()
            .as_ref()
            .map(|lib| Arc::clone(&lib.monitor))
            .ok_or(UsbError::Uninitialized)?;
        monitor.remove_filter(handle);
        Ok(())
    }

    /// See [`UsbLib::run_filters`].
    pub fn run_filters() -> Result<(), UsbError> {
        let monitor = GLOBAL
            .lock()
            .as_ref()
            .map(|lib| Arc::clone(&lib.monitor))
            .ok_or(UsbError::Uninitialized)?;
        monitor.run_filters()
    }

    /// See [`UsbLib::wait_change`]. The wait happens outside the holder
    /// lock, so [`interrupt_wait`] and [`term`] stay callable while a
    /// waiter blocks.
    pub fn wait_change(timeout: Option<Duration>) -> Result<(), UsbError> {
        let events = GLOBAL
            .lock()
            .as_ref()
            .map(|lib| Arc::clone(&lib.events))
            .ok_or(UsbError::Uninitialized)?;
        events.wait(timeout).map_err(UsbError::from)
    }

    /// See [`UsbLib::interrupt_wait`].
    pub fn interrupt_wait() -> Result<(), UsbError> {
        let events = GLOBAL
            .lock()
            .as_ref()
            .map(|lib| Arc::clone(&lib.events))
            .ok_or(UsbError::Uninitialized)?;
        events.interrupt().map_err(UsbError::Io)
    }
}
