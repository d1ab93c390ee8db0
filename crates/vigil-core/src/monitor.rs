//! Foreground focus monitoring state machine.
//!
//! [`Monitor`] owns the live usage records exclusively and is driven by
//! explicit inputs: window observations, timer ticks, and stop. All OS
//! interaction stays with the caller, which makes every transition
//! testable with plain clock arithmetic. Callers receive state changes
//! as [`MonitorEvent`] values; `Updated` events are snapshot clones, so
//! consumers never share mutable state with the monitor.
//!
//! A failed OS observation is simply not delivered: skipping both
//! `observe` and the idle reading for a tick leaves the machine in a
//! consistent state.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::debug;

use crate::record::{UsageRecord, local_date_of, local_day_end, local_day_start};
use crate::resolver::{NoProductNames, ProductNameSource, Resolver};
use crate::types::{ProcessId, WindowHandle};

/// Monitor tuning, supplied by configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Input inactivity span after which the user counts as idle.
    pub idle_threshold: Duration,
    /// Ceiling on any single session's accumulated duration.
    pub max_session: Duration,
    /// Expected spacing between ticks.
    pub tick_interval: Duration,
}

impl MonitorConfig {
    /// Gap beyond which a silent stretch is treated as a suspend rather
    /// than scheduling jitter.
    #[must_use]
    pub fn suspend_gap(&self) -> Duration {
        std::cmp::max(self.tick_interval * 3, Duration::seconds(90))
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            idle_threshold: Duration::seconds(300),
            max_session: Duration::hours(6),
            tick_interval: Duration::seconds(15),
        }
    }
}

/// A foreground-window reading delivered by a probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusSample {
    pub process_name: String,
    pub window_title: String,
    pub pid: Option<ProcessId>,
    pub handle: Option<WindowHandle>,
}

/// State change notifications emitted by the monitor.
///
/// The monitor may emit more than one `Updated` for a record within a
/// tick when a structural change happens (a rollover split, say);
/// consumers that want per-tick coalescing keep only the latest
/// snapshot.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// A live record changed; carries a snapshot clone.
    Updated(UsageRecord),
    /// A record was closed and should be persisted.
    Finalized(UsageRecord),
}

/// The foreground tracking state machine.
pub struct Monitor<S = NoProductNames> {
    config: MonitorConfig,
    resolver: Resolver<S>,
    active: Option<UsageRecord>,
    idle: Option<UsageRecord>,
    last_tick: Option<DateTime<Utc>>,
}

impl Monitor<NoProductNames> {
    #[must_use]
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_resolver(config, Resolver::new())
    }
}

impl<S: ProductNameSource> Monitor<S> {
    pub fn with_resolver(config: MonitorConfig, resolver: Resolver<S>) -> Self {
        Self {
            config,
            resolver,
            active: None,
            idle: None,
            last_tick: None,
        }
    }

    /// The live foreground session, if any.
    pub fn active(&self) -> Option<&UsageRecord> {
        self.active.as_ref()
    }

    /// Whether the user currently counts as idle.
    pub fn is_user_idle(&self) -> bool {
        self.idle.is_some()
    }

    /// Snapshot clones of every live record (idle slot included).
    pub fn live_records(&self) -> Vec<UsageRecord> {
        self.active.iter().chain(self.idle.iter()).cloned().collect()
    }

    /// Feeds a foreground-window observation.
    ///
    /// An observation matching the active session's (pid, handle, title)
    /// triple changes nothing; anything else finalizes the active
    /// session and opens a new one. While the user is idle the new
    /// session opens unfocused; focus returns when idle ends.
    ///
    /// The suspend-gap guard applies here as on ticks: a sample arriving
    /// long after the last tick closes the live records at their last
    /// accounted instant first, so the sleep span is never billed to the
    /// interrupted session.
    pub fn observe(&mut self, sample: &FocusSample, now: DateTime<Utc>) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        if let Some(last) = self.last_tick {
            if now - last > self.config.suspend_gap() {
                self.handle_suspend_gap(now, &mut events);
                self.last_tick = Some(now);
            }
        }
        self.rollover(now, &mut events);

        if let Some(active) = self.active.as_ref() {
            if active.matches_window(sample.pid, sample.handle, &sample.window_title) {
                return events;
            }
        }

        if let Some(mut previous) = self.active.take() {
            if self.idle.is_none() {
                previous.accrue(now, self.config.max_session);
            }
            previous.finalize(now);
            events.push(MonitorEvent::Finalized(previous));
        }

        let name = self
            .resolver
            .resolve(&sample.process_name, &sample.window_title, sample.pid);
        debug!(name = %name, process = %sample.process_name, "focus changed");
        let record = UsageRecord::open(
            name,
            sample.process_name.clone(),
            sample.window_title.clone(),
            sample.pid,
            sample.handle,
            now,
        );
        self.active = Some(record);
        if self.idle.is_none() {
            self.transfer_focus(true);
        }
        if let Some(active) = self.active.as_ref() {
            events.push(MonitorEvent::Updated(active.clone()));
        }
        events
    }

    /// Advances the clock: accrues durations, runs idle detection, day
    /// rollover, and the suspend-gap guard. `input_idle` is how long
    /// user input has been quiet; `media_playing` vetoes idle.
    pub fn tick(
        &mut self,
        now: DateTime<Utc>,
        input_idle: Duration,
        media_playing: bool,
    ) -> Vec<MonitorEvent> {
        let mut events = Vec::new();

        if let Some(last) = self.last_tick {
            if now - last > self.config.suspend_gap() {
                self.handle_suspend_gap(now, &mut events);
                self.last_tick = Some(now);
                return events;
            }
        }
        self.last_tick = Some(now);

        self.rollover(now, &mut events);

        let user_idle = input_idle >= self.config.idle_threshold && !media_playing;
        match (self.idle.is_some(), user_idle) {
            (false, true) => self.enter_idle(now, input_idle, &mut events),
            (true, false) => self.leave_idle(now, input_idle, &mut events),
            (true, true) => {
                if let Some(idle) = self.idle.as_mut() {
                    idle.accrue(now, self.config.max_session);
                    events.push(MonitorEvent::Updated(idle.clone()));
                }
            }
            (false, false) => {}
        }

        if self.idle.is_none() {
            if let Some(active) = self.active.as_mut() {
                active.accrue(now, self.config.max_session);
                events.push(MonitorEvent::Updated(active.clone()));
            }
        }

        events
    }

    /// Finalizes every live record. Idempotent; a stopped monitor can be
    /// driven again and starts from a clean slate.
    pub fn stop(&mut self, now: DateTime<Utc>) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        let was_idle = self.idle.is_some();

        if let Some(mut idle) = self.idle.take() {
            idle.accrue(now, self.config.max_session);
            idle.finalize(now);
            events.push(MonitorEvent::Finalized(idle));
        }
        if let Some(mut active) = self.active.take() {
            if !was_idle {
                active.accrue(now, self.config.max_session);
            }
            active.finalize(now);
            events.push(MonitorEvent::Finalized(active));
        }
        self.last_tick = None;
        events
    }

    /// The only path that toggles the focus flag. It clears the flag on
    /// every live record, then grants it to the active session when
    /// requested, so at most one record ever holds it.
    fn transfer_focus(&mut self, to_active: bool) {
        if let Some(rec) = self.active.as_mut() {
            rec.set_focus(false);
        }
        if let Some(rec) = self.idle.as_mut() {
            rec.set_focus(false);
        }
        if to_active {
            if let Some(rec) = self.active.as_mut() {
                rec.set_focus(true);
            }
        }
    }

    fn enter_idle(&mut self, now: DateTime<Utc>, input_idle: Duration, events: &mut Vec<MonitorEvent>) {
        let idle_since = now - input_idle;
        if let Some(active) = self.active.as_mut() {
            // Give back the time that accrued after input stopped, then
            // pin the anchor so nothing accrues while idle.
            let leaked = (active.updated_at - idle_since).num_milliseconds();
            active.rewind(leaked);
            active.anchor(now);
            events.push(MonitorEvent::Updated(active.clone()));
        }
        self.transfer_focus(false);

        let mut idle = UsageRecord::open_idle(idle_since);
        idle.accrue(now, self.config.max_session);
        debug!(since = %idle_since, "entering idle");
        events.push(MonitorEvent::Updated(idle.clone()));
        self.idle = Some(idle);
    }

    fn leave_idle(&mut self, now: DateTime<Utc>, input_idle: Duration, events: &mut Vec<MonitorEvent>) {
        if let Some(mut idle) = self.idle.take() {
            // Input resumed `input_idle` ago and everything before that
            // belongs to the idle span. When a media veto ends idleness
            // instead, input may still be quiet; the idle record then
            // closes at its last accounted instant.
            let resumed_at = (now - input_idle).max(idle.updated_at).min(now);
            idle.accrue(resumed_at, self.config.max_session);
            idle.finalize(resumed_at);
            debug!(total_ms = idle.duration_ms, "leaving idle");
            events.push(MonitorEvent::Finalized(idle));

            if let Some(active) = self.active.as_mut() {
                active.anchor(resumed_at);
            }
        }
        self.transfer_focus(true);
    }

    /// Splits any live record dated before today at local midnight:
    /// the old part is finalized at 23:59:59 of its date and a fresh
    /// continuation opens at 00:00:00 today, so the two durations sum to
    /// the original within clock tolerance.
    fn rollover(&mut self, now: DateTime<Utc>, events: &mut Vec<MonitorEvent>) {
        let today = local_date_of(now);
        let cap = self.config.max_session;
        let idle_present = self.idle.is_some();

        let mut refocus_active = false;
        if let Some(active) = self.active.take() {
            if active.date < today {
                refocus_active = active.is_focused();
                let cont = Self::split_at_midnight(active, today, !idle_present, cap, events);
                self.active = Some(cont);
            } else {
                self.active = Some(active);
            }
        }
        if let Some(idle) = self.idle.take() {
            if idle.date < today {
                let cont = Self::split_at_midnight(idle, today, true, cap, events);
                self.idle = Some(cont);
            } else {
                self.idle = Some(idle);
            }
        }
        if refocus_active {
            self.transfer_focus(true);
        }
    }

    fn split_at_midnight(
        mut record: UsageRecord,
        today: NaiveDate,
        accruing: bool,
        cap: Duration,
        events: &mut Vec<MonitorEvent>,
    ) -> UsageRecord {
        let end = local_day_end(record.date);
        if accruing {
            record.accrue(end, cap);
        }
        let is_idle = record.is_idle;
        let name = record.name.clone();
        let process = record.process_name.clone();
        let title = record.window_title.clone();
        let pid = record.pid;
        let handle = record.handle;

        record.finalize(end);
        debug!(name = %record.name, date = %record.date, "splitting session at midnight");
        events.push(MonitorEvent::Finalized(record));

        let mut cont = UsageRecord::open(name, process, title, pid, handle, local_day_start(today));
        cont.is_idle = is_idle;
        events.push(MonitorEvent::Updated(cont.clone()));
        cont
    }

    /// A tick or observation arriving long after the previous tick means
    /// the machine was asleep. The live records are closed at their last
    /// accounted instant and the foreground session reopens fresh at
    /// `now`, so none of the sleep span is attributed to anything. Waking
    /// also ends any idle period, so the continuation resumes focused
    /// even when the session had lost focus to idle.
    fn handle_suspend_gap(&mut self, now: DateTime<Utc>, events: &mut Vec<MonitorEvent>) {
        debug!(resumed_at = %now, "tick gap exceeded suspend threshold");

        let was_idle = self.idle.is_some();
        if let Some(mut idle) = self.idle.take() {
            let last = idle.updated_at;
            idle.finalize(last);
            events.push(MonitorEvent::Finalized(idle));
        }
        if let Some(mut active) = self.active.take() {
            let refocus = active.is_focused() || was_idle;
            let name = active.name.clone();
            let process = active.process_name.clone();
            let title = active.window_title.clone();
            let pid = active.pid;
            let handle = active.handle;

            let last = active.updated_at;
            active.finalize(last);
            events.push(MonitorEvent::Finalized(active));

            let cont = UsageRecord::open(name, process, title, pid, handle, now);
            self.active = Some(cont);
            if refocus {
                self.transfer_focus(true);
            }
            if let Some(active) = self.active.as_ref() {
                events.push(MonitorEvent::Updated(active.clone()));
            }
        }
    }
}
