//! Operating system probes for the vigil tracker.
//!
//! Everything the tracking loop needs from the OS sits behind two
//! small traits, so the loop itself can run against scripted fakes in
//! tests and an inert implementation on platforms without a supported
//! display server:
//!
//! - [`SystemProbe`] answers the per-tick questions: what window is in
//!   the foreground, how long since the last input, is audio playing.
//! - [`FocusEvents`] is a blocking stream of focus-change hints for
//!   the event-driven path; a wakeup means "worth polling now", not an
//!   observation in itself.
//!
//! Probe failures are ordinary and expected (display server restarts,
//! windows vanishing mid-query); callers treat an error as "no
//! observation this tick" and keep going.

use std::time::Duration;

use thiserror::Error;
use vigil_core::{ProcessId, WindowHandle};

mod desktop;
mod fake;
mod null;
#[cfg(target_os = "linux")]
mod x11;

pub use desktop::DesktopEntrySource;
pub use fake::FakeProbe;
pub use null::NullProbe;
#[cfg(target_os = "linux")]
pub use x11::{X11Events, X11Probe};

/// Probe errors.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Could not reach the display server at all.
    #[error("display server connection failed: {0}")]
    Connect(String),
    /// A query to the display server failed mid-flight.
    #[error("display server query failed: {0}")]
    Query(String),
    /// The event stream ended and will produce no further wakeups.
    #[error("focus event stream disconnected")]
    Disconnected,
}

/// A snapshot of the foreground window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundInfo {
    /// Raw process name as the OS reports it.
    pub process_name: String,
    /// Window title, possibly empty.
    pub window_title: String,
    /// Owning process id, when the OS exposes one.
    pub pid: Option<ProcessId>,
    /// Native window handle, when the OS exposes one.
    pub handle: Option<WindowHandle>,
}

/// Read-side OS queries the tracking loop polls every tick.
pub trait SystemProbe: Send {
    /// The currently focused window, or `None` when nothing meaningful
    /// holds focus (empty desktop, lock screen, a window that vanished
    /// mid-query).
    fn foreground(&mut self) -> Result<Option<ForegroundInfo>, ProbeError>;

    /// Time since the last user input.
    fn idle_time(&mut self) -> Result<Duration, ProbeError>;

    /// Whether any audio playback stream is currently running.
    fn media_playing(&mut self) -> Result<bool, ProbeError>;
}

/// Blocking stream of focus-change notifications.
///
/// Implementations block in [`next_change`](Self::next_change) until
/// the foreground window may have changed. Consumers run this on a
/// dedicated thread and poll the [`SystemProbe`] after each wakeup.
pub trait FocusEvents: Send {
    fn next_change(&mut self) -> Result<(), ProbeError>;
}

/// Returns the probe for this platform.
///
/// A display server that cannot be reached degrades to the inert
/// probe, so callers always get something that answers.
pub fn platform_probe() -> Box<dyn SystemProbe> {
    #[cfg(target_os = "linux")]
    {
        match x11::X11Probe::connect() {
            Ok(probe) => return Box::new(probe),
            Err(error) => {
                tracing::warn!(
                    %error,
                    "display server unavailable, tracking without foreground data"
                );
            }
        }
    }
    Box::new(null::NullProbe)
}

/// Returns the focus event stream for this platform, if one exists.
///
/// `None` means the tracking loop runs on its poll interval alone.
pub fn platform_events() -> Option<Box<dyn FocusEvents>> {
    #[cfg(target_os = "linux")]
    {
        match x11::X11Events::connect() {
            Ok(events) => return Some(Box::new(events)),
            Err(error) => {
                tracing::debug!(%error, "focus event stream unavailable, polling only");
            }
        }
    }
    None
}
