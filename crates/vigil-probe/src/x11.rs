//! X11 probe built on `x11rb`.
//!
//! The foreground window comes from the EWMH `_NET_ACTIVE_WINDOW` root
//! property, its title from `_NET_WM_NAME` (UTF-8) with a `WM_NAME`
//! fallback, and its process name from `/proc/<pid>/comm` via
//! `_NET_WM_PID`, falling back to the `WM_CLASS` class when the
//! process is already gone. Idle time comes from the MIT-SCREEN-SAVER
//! extension; media playback from the ALSA PCM state files under
//! `/proc/asound`.
//!
//! Windows vanish between queries all the time. Property reads on a
//! window that no longer exists report `Ok(None)` rather than an
//! error; only connection-level failures surface as [`ProbeError`].

use std::fs;
use std::path::Path;
use std::time::Duration;

use x11rb::connection::Connection;
use x11rb::errors::{ConnectError, ConnectionError, ReplyError};
use x11rb::protocol::Event;
use x11rb::protocol::screensaver;
use x11rb::protocol::xproto::{
    Atom, AtomEnum, ChangeWindowAttributesAux, ConnectionExt, EventMask, Window,
};
use x11rb::rust_connection::RustConnection;

use vigil_core::{ProcessId, WindowHandle};

use crate::{FocusEvents, ForegroundInfo, ProbeError, SystemProbe};

const ALSA_ROOT: &str = "/proc/asound";

impl From<ConnectError> for ProbeError {
    fn from(error: ConnectError) -> Self {
        Self::Connect(error.to_string())
    }
}

impl From<ConnectionError> for ProbeError {
    fn from(error: ConnectionError) -> Self {
        Self::Query(error.to_string())
    }
}

impl From<ReplyError> for ProbeError {
    fn from(error: ReplyError) -> Self {
        Self::Query(error.to_string())
    }
}

struct Atoms {
    net_active_window: Atom,
    net_wm_name: Atom,
    net_wm_pid: Atom,
    utf8_string: Atom,
}

impl Atoms {
    fn intern(conn: &RustConnection) -> Result<Self, ProbeError> {
        Ok(Self {
            net_active_window: intern(conn, b"_NET_ACTIVE_WINDOW")?,
            net_wm_name: intern(conn, b"_NET_WM_NAME")?,
            net_wm_pid: intern(conn, b"_NET_WM_PID")?,
            utf8_string: intern(conn, b"UTF8_STRING")?,
        })
    }
}

fn intern(conn: &RustConnection, name: &[u8]) -> Result<Atom, ProbeError> {
    Ok(conn.intern_atom(false, name)?.reply()?.atom)
}

/// Poll-side probe over one X11 connection.
pub struct X11Probe {
    conn: RustConnection,
    root: Window,
    atoms: Atoms,
}

impl X11Probe {
    /// Connects to the display server named by `$DISPLAY`.
    pub fn connect() -> Result<Self, ProbeError> {
        let (conn, screen_num) = x11rb::connect(None)?;
        let root = conn.setup().roots[screen_num].root;
        let atoms = Atoms::intern(&conn)?;
        Ok(Self { conn, root, atoms })
    }

    fn active_window(&self) -> Result<Option<Window>, ProbeError> {
        let reply = self
            .conn
            .get_property(
                false,
                self.root,
                self.atoms.net_active_window,
                AtomEnum::WINDOW,
                0,
                1,
            )?
            .reply()?;
        Ok(reply
            .value32()
            .and_then(|mut values| values.next())
            .filter(|window| *window != 0))
    }

    fn window_title(&self, window: Window) -> Result<Option<String>, ProbeError> {
        if let Some(title) =
            self.string_property(window, self.atoms.net_wm_name, self.atoms.utf8_string)?
        {
            return Ok(Some(title));
        }
        self.string_property(window, AtomEnum::WM_NAME.into(), AtomEnum::ANY.into())
    }

    fn string_property(
        &self,
        window: Window,
        property: Atom,
        kind: Atom,
    ) -> Result<Option<String>, ProbeError> {
        let cookie = self.conn.get_property(false, window, property, kind, 0, 1024)?;
        // The window can vanish between the active-window read and this
        // query; that is a miss, not an error.
        let Ok(reply) = cookie.reply() else {
            return Ok(None);
        };
        if reply.value.is_empty() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&reply.value).into_owned()))
    }

    fn window_pid(&self, window: Window) -> Result<Option<u32>, ProbeError> {
        let cookie = self.conn.get_property(
            false,
            window,
            self.atoms.net_wm_pid,
            AtomEnum::CARDINAL,
            0,
            1,
        )?;
        let Ok(reply) = cookie.reply() else {
            return Ok(None);
        };
        Ok(reply.value32().and_then(|mut values| values.next()))
    }

    /// The `WM_CLASS` class (second of the two null-terminated
    /// strings), which names the application rather than the instance.
    fn window_class(&self, window: Window) -> Result<Option<String>, ProbeError> {
        let raw = self.string_property(window, AtomEnum::WM_CLASS.into(), AtomEnum::STRING.into())?;
        Ok(raw.and_then(|value| {
            value
                .split('\0')
                .filter(|part| !part.is_empty())
                .last()
                .map(str::to_string)
        }))
    }
}

impl SystemProbe for X11Probe {
    fn foreground(&mut self) -> Result<Option<ForegroundInfo>, ProbeError> {
        let Some(window) = self.active_window()? else {
            return Ok(None);
        };
        let window_title = self.window_title(window)?.unwrap_or_default();
        let pid = self.window_pid(window)?;
        // comm is capped at 15 bytes by the kernel; rules match on
        // prefixes so the truncation is tolerable.
        let process_name = match pid.and_then(process_comm) {
            Some(name) => name,
            None => match self.window_class(window)? {
                Some(class) => class,
                // Stale window with no identity left to attribute.
                None => return Ok(None),
            },
        };

        Ok(Some(ForegroundInfo {
            process_name,
            window_title,
            pid: pid.map(ProcessId),
            handle: Some(WindowHandle(u64::from(window))),
        }))
    }

    fn idle_time(&mut self) -> Result<Duration, ProbeError> {
        let info = screensaver::query_info(&self.conn, self.root)?.reply()?;
        Ok(Duration::from_millis(u64::from(info.ms_since_user_input)))
    }

    fn media_playing(&mut self) -> Result<bool, ProbeError> {
        Ok(alsa_stream_running(Path::new(ALSA_ROOT)))
    }
}

/// Focus-change hints from a second connection subscribed to
/// `PropertyNotify` on the root window.
pub struct X11Events {
    conn: RustConnection,
    net_active_window: Atom,
}

impl X11Events {
    pub fn connect() -> Result<Self, ProbeError> {
        let (conn, screen_num) = x11rb::connect(None)?;
        let root = conn.setup().roots[screen_num].root;
        let net_active_window = intern(&conn, b"_NET_ACTIVE_WINDOW")?;
        let attributes = ChangeWindowAttributesAux::new().event_mask(EventMask::PROPERTY_CHANGE);
        conn.change_window_attributes(root, &attributes)?.check()?;
        Ok(Self {
            conn,
            net_active_window,
        })
    }
}

impl FocusEvents for X11Events {
    fn next_change(&mut self) -> Result<(), ProbeError> {
        loop {
            let event = self.conn.wait_for_event()?;
            if let Event::PropertyNotify(notify) = event {
                if notify.atom == self.net_active_window {
                    return Ok(());
                }
            }
        }
    }
}

fn process_comm(pid: u32) -> Option<String> {
    let comm = fs::read_to_string(format!("/proc/{pid}/comm")).ok()?;
    let comm = comm.trim();
    if comm.is_empty() {
        None
    } else {
        Some(comm.to_string())
    }
}

/// True when any ALSA playback substream reports `RUNNING`.
///
/// Capture streams (`pcm*c`) are skipped; a live microphone is not
/// media playback.
fn alsa_stream_running(root: &Path) -> bool {
    let Ok(cards) = fs::read_dir(root) else {
        return false;
    };
    for card in cards.filter_map(Result::ok) {
        if !card.file_name().to_string_lossy().starts_with("card") {
            continue;
        }
        let Ok(pcms) = fs::read_dir(card.path()) else {
            continue;
        };
        for pcm in pcms.filter_map(Result::ok) {
            let pcm_name = pcm.file_name();
            let pcm_name = pcm_name.to_string_lossy();
            if !pcm_name.starts_with("pcm") || !pcm_name.ends_with('p') {
                continue;
            }
            let Ok(subs) = fs::read_dir(pcm.path()) else {
                continue;
            };
            for sub in subs.filter_map(Result::ok) {
                let Ok(contents) = fs::read_to_string(sub.path().join("status")) else {
                    continue;
                };
                if contents
                    .lines()
                    .any(|line| line.trim() == "state: RUNNING")
                {
                    return true;
                }
            }
        }
    }
    false
}
