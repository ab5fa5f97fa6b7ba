//! lsusb
//!
//! Enumerate the host USB topology, print the annotated device list, then
//! re-list on every coalesced topology change for a little while.

#[cfg(windows)]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use std::time::Duration;
    use tracing::info;
    use tracing_subscriber::{filter::LevelFilter, fmt, layer::SubscriberExt, prelude::*};

    // Setup logging
    let stdout = fmt::layer()
        .compact()
        .with_ansi(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false)
        .with_target(true);
    tracing_subscriber::registry()
        .with(stdout)
        .with(LevelFilter::DEBUG)
        .init();

    usbcap::init()?;

    let mut rounds = 3;
    loop {
        match usbcap::wait_change(Some(Duration::from_secs(30))) {
            Ok(()) => {
                let devices = usbcap::get_devices()?;
                info!(count = devices.len(), "topology changed");
                for dev in &devices {
                    info!(?dev, "device");
                }
                rounds -= 1;
                if rounds == 0 {
                    break;
                }
            }
            Err(usbcap::UsbError::Wait(usbcap::WaitError::Timeout)) => {
                info!("no topology change within 30s, giving up");
                break;
            }
            Err(error) => return Err(error.into()),
        }
    }

    usbcap::term()?;
    Ok(())
}

#[cfg(not(windows))]
fn main() {
    eprintln!("usbcap drives the Windows usb hub ioctl surface; nothing to do here");
}
