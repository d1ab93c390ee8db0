//! Inert probe for platforms without a supported display server.

use std::time::Duration;

use crate::{FocusEvents, ForegroundInfo, ProbeError, SystemProbe};

/// Probe that observes nothing: no foreground window, no idle time,
/// no media. Tracking stays alive but records no sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProbe;

impl SystemProbe for NullProbe {
    fn foreground(&mut self) -> Result<Option<ForegroundInfo>, ProbeError> {
        Ok(None)
    }

    fn idle_time(&mut self) -> Result<Duration, ProbeError> {
        Ok(Duration::ZERO)
    }

    fn media_playing(&mut self) -> Result<bool, ProbeError> {
        Ok(false)
    }
}

impl FocusEvents for NullProbe {
    /// There is nothing to wait on; reports the stream as closed so
    /// the consumer thread exits instead of spinning.
    fn next_change(&mut self) -> Result<(), ProbeError> {
        Err(ProbeError::Disconnected)
    }
}
