use crate::error::{UsbError, WaitError};
use crate::event::EventInitialState;
use crate::notify::{BroadcastNotifier, ChangeEvents};
use std::sync::Arc;
use std::time::Duration;
use windows_sys::Win32::UI::WindowsAndMessaging::{
    PostMessageW, DBT_DEVNODES_CHANGED, WM_DEVICECHANGE,
};

#[test]
fn broadcast_bursts_collapse_into_one_signal() {
    let events = Arc::new(ChangeEvents::new(EventInitialState::Unset).unwrap());
    let notifier = BroadcastNotifier::start(Arc::clone(&events)).unwrap();
    // consume the startup signal
    events.wait(Some(Duration::from_millis(500))).unwrap();

    for _ in 0..10 {
        let posted = unsafe {
            PostMessageW(notifier.window(), WM_DEVICECHANGE, DBT_DEVNODES_CHANGED as usize, 0)
        };
        assert_ne!(posted, 0);
        std::thread::sleep(Duration::from_millis(10));
    }

    // the burst coalesces into exactly one signal after the quiet period
    assert!(events.wait(Some(Duration::from_secs(2))).is_ok());
    assert!(matches!(
        events.wait(Some(Duration::from_millis(700))),
        Err(WaitError::Timeout)
    ));
}

#[test]
fn interrupt_unblocks_an_indefinite_waiter() {
    let events = Arc::new(ChangeEvents::new(EventInitialState::Unset).unwrap());
    let theirs = Arc::clone(&events);
    let waiter = std::thread::spawn(move || theirs.wait(None));
    std::thread::sleep(Duration::from_millis(50));

    events.interrupt().unwrap();
    assert!(matches!(waiter.join().unwrap(), Err(WaitError::Interrupted)));
}

#[test]
fn zero_timeout_polls_the_event_state() {
    let events = ChangeEvents::new(EventInitialState::Set).unwrap();
    events.wait(Some(Duration::ZERO)).unwrap();
    // auto-reset: the signal is consumed
    assert!(matches!(events.wait(Some(Duration::ZERO)), Err(WaitError::Timeout)));
}

#[test]
fn uninitialized_process_api_reports_state_errors() {
    assert!(matches!(crate::term(), Err(UsbError::AlreadyInitialized)));
    assert!(matches!(crate::get_devices(), Err(UsbError::Uninitialized)));
    assert!(matches!(crate::run_filters(), Err(UsbError::Uninitialized)));
    assert!(matches!(
        crate::wait_change(Some(Duration::ZERO)),
        Err(UsbError::Uninitialized)
    ));
    assert!(matches!(crate::interrupt_wait(), Err(UsbError::Uninitialized)));
}
