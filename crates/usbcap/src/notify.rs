//! Change notification.
//!
//! Callers block in [`ChangeEvents::wait`] until the notify event signals a
//! topology change (or the interrupt event unblocks them). Two engines can
//! drive the notify event:
//!
//! * [`MonitorNotifier`] registers the event with the kernel monitor, which
//!   signals it on every change it observes.
//! * [`BroadcastNotifier`] runs a message-pump thread with a hidden window
//!   receiving `WM_DEVICECHANGE` broadcasts. Re-attach generates bursts of
//!   broadcasts that say nothing about what changed, so each burst re-arms a
//!   500 ms one-shot timer and the event fires once after the bus quiets
//!   down.

use crate::error::{UsbError, WaitError};
use crate::event::{EventInitialState, EventReset, OwnedEventHandle};
use crate::monitor::Monitor;
use parking_lot::Mutex;
use std::ffi::c_void;
use std::io;
use std::os::windows::io::AsRawHandle;
use std::sync::{mpsc, Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, trace, warn};
use windows_sys::Win32::Foundation::{
    GetLastError, SetLastError, BOOLEAN, ERROR_IO_PENDING, HANDLE, HWND, INVALID_HANDLE_VALUE,
    LPARAM, LRESULT, WAIT_OBJECT_0, WAIT_TIMEOUT, WPARAM,
};
use windows_sys::Win32::System::LibraryLoader::GetModuleHandleW;
use windows_sys::Win32::System::Threading::{
    CreateTimerQueue, CreateTimerQueueTimer, DeleteTimerQueueEx, DeleteTimerQueueTimer, SetEvent,
    WaitForMultipleObjects, INFINITE, WT_EXECUTEONLYONCE,
};
use windows_sys::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DispatchMessageW, GetMessageW, GetWindowLongPtrW,
    PostMessageW, PostQuitMessage, RegisterClassExW, SetWindowLongPtrW, TranslateMessage,
    CW_USEDEFAULT, DBT_DEVNODES_CHANGED, GWLP_USERDATA, MSG, WM_CLOSE, WM_DESTROY,
    WM_DEVICECHANGE, WNDCLASSEXW, WS_EX_APPWINDOW, WS_MINIMIZE,
};

/// Broadcast bursts are coalesced into one signal after this much quiet.
pub const DEBOUNCE_MS: u32 = 500;

/// The notify/interrupt event pair behind `wait_change`.
pub(crate) struct ChangeEvents {
    pub(crate) notify: OwnedEventHandle,
    interrupt: OwnedEventHandle,
}

impl ChangeEvents {
    pub(crate) fn new(initial: EventInitialState) -> io::Result<Self> {
        Ok(Self {
            notify: OwnedEventHandle::anonymous(EventReset::Automatic, initial)?,
            interrupt: OwnedEventHandle::anonymous(EventReset::Automatic, EventInitialState::Unset)?,
        })
    }

    /// Block until the notify event signals, the interrupt event unblocks
    /// us, or the timeout elapses. `None` waits indefinitely.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> Result<(), WaitError> {
        let handles: [HANDLE; 2] = [
            self.notify.as_raw_handle() as _,
            self.interrupt.as_raw_handle() as _,
        ];
        let millis = timeout.map(|dur| dur.as_millis() as u32).unwrap_or(INFINITE);
        match unsafe { WaitForMultipleObjects(2, handles.as_ptr(), 0, millis) } {
            WAIT_OBJECT_0 => Ok(()),
            result if result == WAIT_OBJECT_0 + 1 => Err(WaitError::Interrupted),
            WAIT_TIMEOUT => Err(WaitError::Timeout),
            _ => Err(WaitError::Io(io::Error::last_os_error())),
        }
    }

    /// Unblock one waiter; the sole cancellation primitive.
    pub(crate) fn interrupt(&self) -> io::Result<()> {
        self.interrupt.set()
    }
}

/// A running strategy that signals the notify event on topology changes.
/// Construction starts it, drop stops it.
pub(crate) trait Notifier: Send {}

/// The monitor signals the notify event directly.
pub(crate) struct MonitorNotifier;

impl MonitorNotifier {
    pub(crate) fn start(monitor: &Monitor, events: &ChangeEvents) -> Result<Self, UsbError> {
        monitor.set_notify_event(&events.notify)?;
        Ok(Self)
    }
}

impl Notifier for MonitorNotifier {}

/// State shared between the pump thread, the window procedure, and the
/// debounce timer callbacks.
struct PumpShared {
    /// Raw handle of the notify event; the owning [`ChangeEvents`] outlives
    /// the pump through the arc held by [`BroadcastNotifier`]
    notify: HANDLE,
    timer_queue: HANDLE,
    /// The pending one-shot, armed and deleted only on the pump thread; the
    /// timer callback never touches it
    timer: Mutex<HANDLE>,
}

impl PumpShared {
    /// Collapse a burst of broadcasts: drop any pending one-shot and arm a
    /// fresh one.
    fn on_device_change(&self) {
        let mut timer = self.timer.lock();
        if *timer != 0 {
            if unsafe { DeleteTimerQueueTimer(self.timer_queue, *timer, 0) } == 0 {
                let error = io::Error::last_os_error();
                // an asynchronously pending delete is fine, the callback
                // only sets a level-signaled event
                if error.raw_os_error() != Some(ERROR_IO_PENDING as i32) {
                    warn!(%error, "debounce timer delete failed");
                }
            }
            *timer = 0;
        }
        let mut fresh: HANDLE = 0;
        let created = unsafe {
            CreateTimerQueueTimer(
                &mut fresh,
                self.timer_queue,
                Some(debounce_callback),
                self.notify as *const c_void,
                DEBOUNCE_MS,
                0,
                WT_EXECUTEONLYONCE,
            )
        };
        match created {
            0 => {
                let error = io::Error::last_os_error();
                warn!(%error, "debounce timer create failed, signalling undebounced");
                unsafe { debounce_callback(self.notify as *mut c_void, 0) };
            }
            _ => *timer = fresh,
        }
    }
}

unsafe extern "system" fn debounce_callback(parameter: *mut c_void, _fired: BOOLEAN) {
    SetEvent(parameter as HANDLE);
}

const WINDOW_CLASS_NAME: *const u16 = windows_sys::w!("UsbCapNotify");
const WINDOW_NAME: *const u16 = windows_sys::w!("usbcap device change listener");

/// We register our window class only once per process
static WINDOW_CLASS_ATOM: OnceLock<u16> = OnceLock::new();

fn window_class() -> u16 {
    *WINDOW_CLASS_ATOM.get_or_init(|| {
        let class = WNDCLASSEXW {
            style: 0,
            hIcon: 0,
            cbSize: std::mem::size_of::<WNDCLASSEXW>() as _,
            hIconSm: 0,
            hCursor: 0,
            cbClsExtra: 0,
            cbWndExtra: 0,
            hInstance: hinstance(),
            lpszMenuName: std::ptr::null(),
            lpszClassName: WINDOW_CLASS_NAME,
            lpfnWndProc: Some(pump_window_proc),
            hbrBackground: 0,
        };
        match unsafe { RegisterClassExW(&class) } {
            0 => panic!("{:?}", io::Error::last_os_error()),
            atom => atom,
        }
    })
}

fn hinstance() -> isize {
    // Safety: a NULL module name yields the handle of the calling process
    unsafe { GetModuleHandleW(std::ptr::null()) }
}

/// Window procedure of the hidden listener window.
///
/// `DBT_DEVNODES_CHANGED` reports any device arrival or removal on the
/// system without saying which; the caller re-enumerates and decides whether
/// a USB change actually happened.
unsafe extern "system" fn pump_window_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    let ptr = GetWindowLongPtrW(hwnd, GWLP_USERDATA) as *const PumpShared;
    if ptr.is_null() {
        return DefWindowProcW(hwnd, msg, wparam, lparam);
    }
    match msg {
        WM_DEVICECHANGE => {
            if wparam as u32 == DBT_DEVNODES_CHANGED {
                (*ptr).on_device_change();
            }
            0
        }
        WM_DESTROY => {
            // reconstruct the arc handed over at window creation
            drop(Arc::from_raw(ptr));
            PostQuitMessage(0);
            0
        }
        _ => DefWindowProcW(hwnd, msg, wparam, lparam),
    }
}

/// Create the hidden listener window.
///
/// Safety: `user_data` must be an `Arc<PumpShared>` raw pointer; the window
/// procedure reconstructs it on `WM_DESTROY`.
unsafe fn create_pump_window(user_data: isize) -> io::Result<HWND> {
    let hwnd = CreateWindowExW(
        WS_EX_APPWINDOW,   // styleEx
        WINDOW_CLASS_NAME, // class name
        WINDOW_NAME,       // window name
        WS_MINIMIZE,       // style
        0,                 // x
        0,                 // y
        CW_USEDEFAULT,     // width
        CW_USEDEFAULT,     // height
        0,                 // parent
        0,                 // menu
        hinstance(),       // instance
        std::ptr::null(),  // data
    );
    match hwnd {
        0 => Err(io::Error::last_os_error()),
        hwnd => {
            // NOTE a 0 is returned on failure or when the previous pointer
            // was NULL; only last_os_error distinguishes the two
            let prev = {
                SetLastError(0);
                SetWindowLongPtrW(hwnd, GWLP_USERDATA, user_data)
            };
            match prev {
                0 => match GetLastError() {
                    0 => Ok(hwnd),
                    raw => Err(io::Error::from_raw_os_error(raw as i32)),
                },
                _ => Ok(hwnd),
            }
        }
    }
}

/// Body of the message-pump thread. Reports window creation through
/// `startup`, then dispatches messages until `WM_CLOSE` tears the window
/// down.
fn run_pump(shared: Arc<PumpShared>, startup: mpsc::Sender<io::Result<HWND>>) {
    let _atom = window_class();
    let user_data = Arc::into_raw(shared) as isize;
    let hwnd = match unsafe { create_pump_window(user_data) } {
        Ok(hwnd) => hwnd,
        Err(error) => {
            // reclaim the arc the window never took ownership of
            drop(unsafe { Arc::from_raw(user_data as *const PumpShared) });
            let _ = startup.send(Err(error));
            return;
        }
    };
    trace!("device change listener running");
    let _ = startup.send(Ok(hwnd));

    let mut msg: MSG = unsafe { std::mem::zeroed() };
    loop {
        match unsafe { GetMessageW(&mut msg, 0, 0, 0) } {
            0 => break,
            -1 => {
                error!(error = ?io::Error::last_os_error(), "message pump failed");
                break;
            }
            _ => unsafe {
                TranslateMessage(&msg);
                DispatchMessageW(&msg);
            },
        }
    }
    trace!("device change listener finished");
}

/// OS-broadcast engine: pump thread + hidden window + debounce timer.
pub(crate) struct BroadcastNotifier {
    // keeps the notify handle inside PumpShared valid independent of who
    // else holds the events
    _events: Arc<ChangeEvents>,
    shared: Arc<PumpShared>,
    hwnd: HWND,
    join: Option<JoinHandle<()>>,
}

impl BroadcastNotifier {
    pub(crate) fn start(events: Arc<ChangeEvents>) -> Result<Self, UsbError> {
        let timer_queue = match unsafe { CreateTimerQueue() } {
            0 => return Err(UsbError::Io(io::Error::last_os_error())),
            handle => handle,
        };
        let shared = Arc::new(PumpShared {
            notify: events.notify.as_raw_handle() as HANDLE,
            timer_queue,
            timer: Mutex::new(0),
        });
        let (sender, receiver) = mpsc::channel();
        let theirs = Arc::clone(&shared);
        let join = match std::thread::Builder::new()
            .name("usbcap-notify".into())
            .spawn(move || run_pump(theirs, sender))
        {
            Ok(join) => join,
            Err(error) => {
                let _ = unsafe { DeleteTimerQueueEx(timer_queue, INVALID_HANDLE_VALUE) };
                return Err(UsbError::Io(error));
            }
        };
        let startup = match receiver.recv() {
            Ok(startup) => startup,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::Other,
                "device change listener exited during startup",
            )),
        };
        match startup {
            Ok(hwnd) => {
                // signal once so the first wait observes the initial state
                if let Err(error) = events.notify.set() {
                    warn!(%error, "initial notify signal failed");
                }
                Ok(Self { _events: events, shared, hwnd, join: Some(join) })
            }
            Err(error) => {
                let _ = join.join();
                let _ = unsafe { DeleteTimerQueueEx(timer_queue, INVALID_HANDLE_VALUE) };
                Err(UsbError::Io(error))
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn window(&self) -> HWND {
        self.hwnd
    }
}

impl Notifier for BroadcastNotifier {}

impl Drop for BroadcastNotifier {
    fn drop(&mut self) {
        if unsafe { PostMessageW(self.hwnd, WM_CLOSE, 0, 0) } == 0 {
            warn!(error = ?io::Error::last_os_error(), "failed to close listener window");
        }
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!("device change listener panicked");
            }
        }
        // the pump is gone; flush the timers, blocking until any queued
        // callback has completed
        let timer = *self.shared.timer.lock();
        if timer != 0 {
            if unsafe { DeleteTimerQueueTimer(self.shared.timer_queue, timer, INVALID_HANDLE_VALUE) }
                == 0
            {
                warn!(error = ?io::Error::last_os_error(), "pending debounce timer delete failed");
            }
        }
        if unsafe { DeleteTimerQueueEx(self.shared.timer_queue, INVALID_HANDLE_VALUE) } == 0 {
            warn!(error = ?io::Error::last_os_error(), "timer queue delete failed");
        }
    }
}
