//! Usage aggregation for date-range reports.
//!
//! Folds persisted per-day rollups together with live monitor snapshots
//! into one deduplicated entry per application, using the same merge
//! rules as everywhere else: disk and live spans are disjoint and sum,
//! duplicate views of one live session dedup by id. Callers only pass
//! live records when the range covers today; a past-only query never
//! consults the monitor.

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::merge::RecordIndex;
use crate::record::{UsageRecord, local_day_end, local_day_start};
use crate::types::CanonicalName;

/// An inclusive local-date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    /// A range covering exactly one day.
    #[must_use]
    pub const fn single(date: NaiveDate) -> Self {
        Self {
            from: date,
            to: date,
        }
    }

    /// Number of days covered, inclusive.
    #[must_use]
    pub fn days(&self) -> i64 {
        (self.to - self.from).num_days() + 1
    }

    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }

    #[must_use]
    pub fn is_reversed(&self) -> bool {
        self.from > self.to
    }
}

/// One per-day-per-application rollup row from the store.
#[derive(Debug, Clone)]
pub struct DailyTotal {
    pub date: NaiveDate,
    pub name: CanonicalName,
    pub label: Option<String>,
    pub total_ms: i64,
}

/// A deduplicated per-application usage total.
#[derive(Debug, Clone, Serialize)]
pub struct AppUsage {
    pub name: CanonicalName,
    /// Last-seen window title, as a presentation hint.
    pub label: Option<String>,
    pub total_ms: i64,
    /// Whether a still-open live session contributed.
    pub live: bool,
}

/// Options governing aggregation.
#[derive(Debug, Clone)]
pub struct AggregateOptions {
    /// Per-entry ceiling, scaled by the number of days in the range.
    pub max_daily: Duration,
    /// Entries to surface when filtering removed everything.
    pub fallback_top: usize,
    /// Hard cap on returned entries.
    pub limit: Option<usize>,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            max_daily: Duration::hours(24),
            fallback_top: 5,
            limit: None,
        }
    }
}

/// Canonical keys hidden from reports: the synthetic idle bucket, the
/// tracker itself, and shell or desktop surfaces that hold focus without
/// meaning the user "used" them.
const SYSTEM_KEYS: &[&str] = &[
    "idle",
    "vigil",
    "gnome-shell",
    "plasmashell",
    "xdg-desktop-portal",
    "explorer",
    "searchhost",
    "lockapp",
    "dwm",
];

fn is_system(name: &CanonicalName) -> bool {
    SYSTEM_KEYS.iter().any(|key| *key == name.key())
}

/// Produces the deduplicated, sorted usage entries for a date range.
///
/// Rollup rows and live records outside the range are ignored; live idle
/// records never contribute. Entries are sorted by duration descending
/// (canonical key as tiebreaker). When filtering empties a non-empty
/// input, the top few unfiltered entries are returned instead so the
/// report is never silently blank.
#[must_use]
pub fn aggregate(
    rollups: Vec<DailyTotal>,
    live: &[UsageRecord],
    range: DateRange,
    options: &AggregateOptions,
) -> Vec<AppUsage> {
    if range.is_reversed() {
        warn!(from = %range.from, to = %range.to, "reversed date range yields an empty report");
        return Vec::new();
    }

    let mut index = RecordIndex::new();
    for row in rollups {
        if !range.contains(row.date) {
            continue;
        }
        index.upsert(synthesize(row));
    }
    for record in live {
        if record.is_idle || !range.contains(record.date) {
            continue;
        }
        index.upsert(record.clone());
    }

    let cap_ms = options
        .max_daily
        .num_milliseconds()
        .saturating_mul(range.days());

    let mut entries = Vec::new();
    let mut hidden = Vec::new();
    for record in index.into_records() {
        let is_idle = record.is_idle;
        let usage = AppUsage {
            live: record.is_live(),
            total_ms: record.duration_ms.min(cap_ms),
            label: if record.window_title.is_empty() {
                None
            } else {
                Some(record.window_title.clone())
            },
            name: record.name,
        };
        if is_idle || is_system(&usage.name) {
            hidden.push(usage);
        } else {
            entries.push(usage);
        }
    }

    let fell_back = entries.is_empty() && !hidden.is_empty();
    let mut result = if fell_back { hidden } else { entries };
    result.sort_by(|a, b| {
        b.total_ms
            .cmp(&a.total_ms)
            .then_with(|| a.name.key().cmp(b.name.key()))
    });
    if fell_back {
        result.truncate(options.fallback_top);
    }
    if let Some(limit) = options.limit {
        result.truncate(limit);
    }
    result
}

/// Lifts a rollup row into record form so folding reuses the merge
/// rules. The synthetic record is anchored at the start of its day,
/// which keeps its update time before any same-day live snapshot's, so
/// live hints win the last-writer rule.
fn synthesize(row: DailyTotal) -> UsageRecord {
    let start = local_day_start(row.date);
    let end = local_day_end(row.date);
    UsageRecord::from_stored(
        Uuid::new_v4(),
        row.name,
        String::new(),
        row.label.unwrap_or_default(),
        None,
        row.date,
        start,
        Some(end),
        row.total_ms,
        start,
        false,
    )
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::types::{ProcessId, WindowHandle};

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    fn row(day: u32, name: &str, minutes: i64) -> DailyTotal {
        DailyTotal {
            date: date(day),
            name: CanonicalName::new(name).unwrap(),
            label: None,
            total_ms: minutes * 60 * 1000,
        }
    }

    fn live_record(day: u32, name: &str, minutes: i64) -> UsageRecord {
        let start: DateTime<Utc> = Utc.with_ymd_and_hms(2026, 3, day, 10, 0, 0).unwrap();
        let mut rec = UsageRecord::from_stored(
            Uuid::new_v4(),
            CanonicalName::new(name).unwrap(),
            name.to_lowercase(),
            format!("{name} window"),
            Some(ProcessId(5)),
            date(day),
            start,
            None,
            minutes * 60 * 1000,
            start + Duration::minutes(minutes),
            true,
        );
        rec.handle = Some(WindowHandle(9));
        rec
    }

    const MINUTE_MS: i64 = 60 * 1000;

    #[test]
    fn case_variants_collapse_to_one_entry() {
        let rollups = vec![row(10, "Chrome", 6), row(10, "CHROME", 4)];
        let result = aggregate(
            rollups,
            &[],
            DateRange::single(date(10)),
            &AggregateOptions::default(),
        );
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].name.key(), "chrome");
        assert_eq!(result[0].total_ms, 10 * MINUTE_MS);
        assert!(!result[0].live);
    }

    #[test]
    fn live_record_adds_to_disk_totals() {
        let rollups = vec![row(10, "Chrome", 6)];
        let live = [live_record(10, "Chrome", 4)];
        let result = aggregate(
            rollups,
            &live,
            DateRange::single(date(10)),
            &AggregateOptions::default(),
        );
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].total_ms, 10 * MINUTE_MS);
        assert!(result[0].live);
        // live hints win over rollup labels
        assert_eq!(result[0].label.as_deref(), Some("Chrome window"));
    }

    #[test]
    fn idle_rows_and_live_idle_are_excluded() {
        let rollups = vec![row(10, "Chrome", 6), row(10, "Idle", 45)];
        let mut idle_live = live_record(10, "Idle", 12);
        idle_live.is_idle = true;
        let result = aggregate(
            rollups,
            &[idle_live],
            DateRange::single(date(10)),
            &AggregateOptions::default(),
        );
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].name.as_str(), "Chrome");
    }

    #[test]
    fn system_surfaces_are_filtered() {
        let rollups = vec![row(10, "Chrome", 6), row(10, "gnome-shell", 90)];
        let result = aggregate(
            rollups,
            &[],
            DateRange::single(date(10)),
            &AggregateOptions::default(),
        );
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].name.as_str(), "Chrome");
    }

    #[test]
    fn all_filtered_falls_back_to_top_entries() {
        let rollups = vec![row(10, "Idle", 45), row(10, "gnome-shell", 90)];
        let result = aggregate(
            rollups,
            &[],
            DateRange::single(date(10)),
            &AggregateOptions::default(),
        );
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].name.as_str(), "gnome-shell");
        assert_eq!(result[1].name.as_str(), "Idle");
    }

    #[test]
    fn empty_input_yields_empty_report() {
        let result = aggregate(
            Vec::new(),
            &[],
            DateRange::single(date(10)),
            &AggregateOptions::default(),
        );
        assert!(result.is_empty());
    }

    #[test]
    fn reversed_range_yields_empty_report() {
        let rollups = vec![row(10, "Chrome", 6)];
        let range = DateRange {
            from: date(12),
            to: date(10),
        };
        assert!(aggregate(rollups, &[], range, &AggregateOptions::default()).is_empty());
    }

    #[test]
    fn rows_outside_range_are_ignored() {
        let rollups = vec![row(9, "Chrome", 6), row(10, "Slack", 3)];
        let result = aggregate(
            rollups,
            &[],
            DateRange::single(date(10)),
            &AggregateOptions::default(),
        );
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].name.as_str(), "Slack");
    }

    #[test]
    fn past_only_range_ignores_live_records() {
        let rollups = vec![row(9, "Chrome", 6)];
        let live = [live_record(10, "Chrome", 4)];
        let result = aggregate(
            rollups,
            &live,
            DateRange::single(date(9)),
            &AggregateOptions::default(),
        );
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].total_ms, 6 * MINUTE_MS);
        assert!(!result[0].live);
    }

    #[test]
    fn sorted_by_duration_then_key() {
        let rollups = vec![
            row(10, "Slack", 3),
            row(10, "Chrome", 6),
            row(10, "Alacritty", 3),
        ];
        let result = aggregate(
            rollups,
            &[],
            DateRange::single(date(10)),
            &AggregateOptions::default(),
        );
        let names: Vec<_> = result.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, ["Chrome", "Alacritty", "Slack"]);
    }

    #[test]
    fn totals_clamp_to_daily_ceiling() {
        let rollups = vec![row(10, "Chrome", 30 * 60)];
        let options = AggregateOptions::default();
        let result = aggregate(
            rollups,
            &[],
            DateRange::single(date(10)),
            &options,
        );
        assert_eq!(result[0].total_ms, Duration::hours(24).num_milliseconds());

        // a two-day range doubles the ceiling
        let rollups = vec![row(10, "Chrome", 30 * 60), row(11, "Chrome", 30 * 60)];
        let range = DateRange {
            from: date(10),
            to: date(11),
        };
        let result = aggregate(rollups, &[], range, &options);
        assert_eq!(result[0].total_ms, Duration::hours(48).num_milliseconds());
    }

    #[test]
    fn limit_truncates_entries() {
        let rollups = vec![
            row(10, "Chrome", 6),
            row(10, "Slack", 5),
            row(10, "Code", 4),
        ];
        let options = AggregateOptions {
            limit: Some(2),
            ..AggregateOptions::default()
        };
        let result = aggregate(rollups, &[], DateRange::single(date(10)), &options);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].name.as_str(), "Chrome");
    }
}
