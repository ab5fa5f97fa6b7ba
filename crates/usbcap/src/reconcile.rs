//! Join the enumerated topology against the captured-device view.

use crate::device::{DeviceSpeed, DeviceState, HostDevice};
use crate::error::UsbError;
use tracing::{debug, trace, warn};

/// A device instance bound to the capture driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedDevice {
    /// Device interface path (`\\?\usb#...`), openable for ioctl access
    pub path: String,
    /// Driver registry key; the join key against the topology view
    pub driver_key: String,
}

/// Resolves the live (state, speed) of a captured device by path.
pub(crate) trait DeviceQuery {
    fn query(&self, path: &str) -> Result<(DeviceState, DeviceSpeed), UsbError>;
}

/// Rewrite topology records that match a captured device.
///
/// Nested join on the driver registry key; both lists are small. A matched
/// record takes the monitor-reported state and the capture driver's speed,
/// and — unless the host still owns the device — its `address` is swapped to
/// the capture device path with the original preserved in `alt_address`.
/// Query failures (device unplugged mid-join, unknown state value) leave the
/// record as the walker produced it.
pub(crate) fn reconcile<Q: DeviceQuery>(
    devices: &mut [HostDevice],
    captured: &[CapturedDevice],
    query: &Q,
) {
    for cap in captured {
        if cap.driver_key.is_empty() {
            warn!(path = %cap.path, "captured device without a driver key");
            continue;
        }
        for dev in devices.iter_mut() {
            if dev.driver_key != cap.driver_key {
                continue;
            }
            match query.query(&cap.path) {
                Ok((state, speed)) => {
                    trace!(path = %cap.path, ?state, ?speed, "captured device reconciled");
                    dev.state = state;
                    dev.speed = speed;
                    if state != DeviceState::UsedByHost {
                        dev.alt_address = Some(std::mem::replace(&mut dev.address, cap.path.clone()));
                    }
                }
                Err(error) => debug!(path = %cap.path, %error, "captured device query failed"),
            }
            break;
        }
    }
}
