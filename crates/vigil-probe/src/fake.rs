//! Scripted probe for exercising the tracking loop without an OS.

use std::collections::VecDeque;
use std::time::Duration;

use crate::{ForegroundInfo, ProbeError, SystemProbe};

/// Probe that replays scripted answers in order, then repeats the last
/// successful one once its queue runs dry.
#[derive(Debug, Default)]
pub struct FakeProbe {
    foreground: VecDeque<Result<Option<ForegroundInfo>, ProbeError>>,
    last_foreground: Option<ForegroundInfo>,
    idle: VecDeque<Duration>,
    last_idle: Duration,
    media: VecDeque<bool>,
    last_media: bool,
}

impl FakeProbe {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a foreground answer for the next `foreground()` call.
    pub fn queue_foreground(&mut self, info: Option<ForegroundInfo>) {
        self.foreground.push_back(Ok(info));
    }

    /// Queues a failing foreground query.
    pub fn queue_foreground_error(&mut self) {
        self.foreground
            .push_back(Err(ProbeError::Query("scripted failure".to_string())));
    }

    /// Queues an idle-time answer.
    pub fn queue_idle(&mut self, idle: Duration) {
        self.idle.push_back(idle);
    }

    /// Queues a media-playback answer.
    pub fn queue_media(&mut self, playing: bool) {
        self.media.push_back(playing);
    }
}

impl SystemProbe for FakeProbe {
    fn foreground(&mut self) -> Result<Option<ForegroundInfo>, ProbeError> {
        match self.foreground.pop_front() {
            Some(Ok(info)) => {
                self.last_foreground.clone_from(&info);
                Ok(info)
            }
            Some(Err(error)) => Err(error),
            None => Ok(self.last_foreground.clone()),
        }
    }

    fn idle_time(&mut self) -> Result<Duration, ProbeError> {
        if let Some(idle) = self.idle.pop_front() {
            self.last_idle = idle;
        }
        Ok(self.last_idle)
    }

    fn media_playing(&mut self) -> Result<bool, ProbeError> {
        if let Some(playing) = self.media.pop_front() {
            self.last_media = playing;
        }
        Ok(self.last_media)
    }
}
