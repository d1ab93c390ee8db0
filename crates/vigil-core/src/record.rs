//! Usage session records and their temporal bookkeeping.
//!
//! A [`UsageRecord`] accumulates duration explicitly instead of deriving
//! it from `ended_at - started_at`, so idle rewinds, clock anomalies, and
//! caps cannot inflate totals. Day attribution uses the local calendar;
//! timestamps themselves are UTC.

use chrono::{DateTime, Duration, Local, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{CanonicalName, ProcessId, WindowHandle};

// ========== Local-day helpers ==========

/// The local calendar date an instant is attributed to.
#[must_use]
pub fn local_date_of(at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(&Local).date_naive()
}

/// Converts a local date at midnight to UTC.
/// Handles DST ambiguity by picking the earlier time.
#[must_use]
pub fn local_day_start(date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::from_hms_opt(0, 0, 0).unwrap());
    match Local.from_local_datetime(&midnight) {
        // Single or ambiguous (DST fall-back): use the earlier time
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
        LocalResult::None => {
            // DST spring-forward gap at midnight is rare but possible
            // Use 1am local which is guaranteed to exist
            let one_am = date.and_time(NaiveTime::from_hms_opt(1, 0, 0).unwrap());
            Local
                .from_local_datetime(&one_am)
                .unwrap()
                .with_timezone(&Utc)
        }
    }
}

/// The last representable instant of a local date (23:59:59), in UTC.
#[must_use]
pub fn local_day_end(date: NaiveDate) -> DateTime<Utc> {
    let last = date.and_time(NaiveTime::from_hms_opt(23, 59, 59).unwrap());
    match Local.from_local_datetime(&last) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
        // 23:59:59 falling into a DST gap does not happen with real
        // transition rules; next midnight is a safe stand-in.
        LocalResult::None => local_day_start(date + Duration::days(1)),
    }
}

/// Clamps a candidate attribution date so it never lies in the future.
#[must_use]
pub fn clamp_date_to_today(candidate: NaiveDate, today: NaiveDate) -> NaiveDate {
    candidate.min(today)
}

// ========== UsageRecord ==========

/// A single timed span of foreground use for one application window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Unique record identifier.
    pub id: Uuid,
    /// Resolved application identity records merge under.
    pub name: CanonicalName,
    /// Raw process name as observed.
    pub process_name: String,
    /// Window title at last observation (presentation hint).
    pub window_title: String,
    /// OS process id at last observation.
    pub pid: Option<ProcessId>,
    /// OS window handle at last observation.
    pub handle: Option<WindowHandle>,
    /// Local calendar date the span is attributed to.
    pub date: NaiveDate,
    /// When the span began.
    pub started_at: DateTime<Utc>,
    /// When the span ended; `None` while live.
    pub ended_at: Option<DateTime<Utc>>,
    /// Accumulated foreground time in milliseconds.
    pub duration_ms: i64,
    /// Accrual anchor: time up to this instant has been accounted for.
    pub updated_at: DateTime<Utc>,
    /// Whether this is the synthetic idle span.
    pub is_idle: bool,
    /// Whether this record currently holds foreground focus. Toggled
    /// only through the monitor's focus transition.
    focused: bool,
    /// Whether this record held focus at any point. Never cleared;
    /// this is what persists as focus history.
    held_focus: bool,
}

impl UsageRecord {
    /// Opens a new live record at `now`, attributed to the local date of
    /// `now` (clamped so a skewed clock cannot attribute it to the
    /// future).
    #[must_use]
    pub fn open(
        name: CanonicalName,
        process_name: impl Into<String>,
        window_title: impl Into<String>,
        pid: Option<ProcessId>,
        handle: Option<WindowHandle>,
        now: DateTime<Utc>,
    ) -> Self {
        let today = local_date_of(Utc::now());
        let date = clamp_date_to_today(local_date_of(now), today);
        Self {
            id: Uuid::new_v4(),
            name,
            process_name: process_name.into(),
            window_title: window_title.into(),
            pid,
            handle,
            date,
            started_at: now,
            ended_at: None,
            duration_ms: 0,
            updated_at: now,
            is_idle: false,
            focused: false,
            held_focus: false,
        }
    }

    /// Opens the synthetic idle record, backdated to when input stopped.
    #[must_use]
    pub fn open_idle(idle_since: DateTime<Utc>) -> Self {
        let mut record = Self::open(CanonicalName::idle(), "", "", None, None, idle_since);
        record.is_idle = true;
        record
    }

    /// Rehydrates a record from stored fields.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn from_stored(
        id: Uuid,
        name: CanonicalName,
        process_name: String,
        window_title: String,
        pid: Option<ProcessId>,
        date: NaiveDate,
        started_at: DateTime<Utc>,
        ended_at: Option<DateTime<Utc>>,
        duration_ms: i64,
        updated_at: DateTime<Utc>,
        was_focused: bool,
    ) -> Self {
        let is_idle = name == CanonicalName::idle();
        // Focus is a property of live records; a stored flag on a closed
        // row is history, not state.
        let focused = was_focused && ended_at.is_none();
        Self {
            id,
            name,
            process_name,
            window_title,
            pid,
            handle: None,
            date,
            started_at,
            ended_at,
            duration_ms,
            updated_at,
            is_idle,
            focused,
            held_focus: was_focused,
        }
    }

    /// True while the record has no end timestamp.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Whether this record holds foreground focus.
    #[must_use]
    pub const fn is_focused(&self) -> bool {
        self.focused
    }

    /// Whether this record held foreground focus at any point.
    #[must_use]
    pub const fn held_focus(&self) -> bool {
        self.held_focus
    }

    pub(crate) fn set_focus(&mut self, focused: bool) {
        if focused {
            self.held_focus = true;
        }
        self.focused = focused;
    }

    pub(crate) fn absorb_focus_history(&mut self, other: &Self) {
        self.held_focus = self.held_focus || other.held_focus;
    }

    /// Whether an observation matches this record's identity triple
    /// exactly.
    #[must_use]
    pub fn matches_window(
        &self,
        pid: Option<ProcessId>,
        handle: Option<WindowHandle>,
        title: &str,
    ) -> bool {
        self.pid == pid && self.handle == handle && self.window_title == title
    }

    /// Advances the accumulator by the time elapsed since the anchor.
    ///
    /// The step never goes negative (a clock moving backward adds
    /// nothing) and the total never exceeds `cap`. The anchor only moves
    /// forward. Returns the milliseconds actually added.
    pub fn accrue(&mut self, now: DateTime<Utc>, cap: Duration) -> i64 {
        if !self.is_live() {
            return 0;
        }
        let step = (now - self.updated_at).num_milliseconds().max(0);
        let total = (self.duration_ms + step).min(cap.num_milliseconds());
        let added = (total - self.duration_ms).max(0);
        self.duration_ms += added;
        if now > self.updated_at {
            self.updated_at = now;
        }
        added
    }

    /// Moves the accrual anchor forward without adding time. Used to
    /// pause accrual across an idle span.
    pub fn anchor(&mut self, now: DateTime<Utc>) {
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    /// Subtracts already-accrued time, flooring at zero. Used when an
    /// idle span is detected retroactively.
    pub fn rewind(&mut self, ms: i64) {
        self.duration_ms = (self.duration_ms - ms.max(0)).max(0);
    }

    /// Closes the record. The end never precedes the start, focus is
    /// released (the history bit stays), and a second call has no
    /// effect.
    pub fn finalize(&mut self, now: DateTime<Utc>) {
        if self.ended_at.is_none() {
            let end = now.max(self.started_at);
            self.ended_at = Some(end);
            if end > self.updated_at {
                self.updated_at = end;
            }
        }
        self.focused = false;
    }
}
