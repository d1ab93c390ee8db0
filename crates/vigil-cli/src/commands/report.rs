//! Report command: per-application usage for a date or range.
//!
//! Reads the rollup view of the store and aggregates it into one entry
//! per application. Past-only queries never consult a live monitor; the
//! tracking service flushes finalized sessions on every focus change,
//! so the store is the single source for this command.

use std::io::Write;

use anyhow::{Result, bail};
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Serialize;
use vigil_core::{AggregateOptions, AppUsage, DateRange, aggregate};
use vigil_db::Store;

use super::util::{format_duration, progress_bar};
use crate::Config;

/// Turns the report flags into an inclusive date range.
pub fn resolve_range(
    date: Option<NaiveDate>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<DateRange> {
    match (date, from, to) {
        (Some(day), None, None) => Ok(DateRange::single(day)),
        (None, Some(from), Some(to)) => {
            if from > to {
                bail!("--from must not be after --to");
            }
            Ok(DateRange { from, to })
        }
        (None, None, None) => Ok(DateRange::single(Local::now().date_naive())),
        // clap enforces the flag combinations; anything else is a bug
        // in the dispatch.
        _ => bail!("pass either --date or both --from and --to"),
    }
}

/// Runs the report command.
pub fn run<W: Write>(
    writer: &mut W,
    config: &Config,
    range: DateRange,
    json: bool,
    limit: Option<usize>,
) -> Result<()> {
    let store = Store::open_or_fallback(&config.database_path)?;
    let rollups = store.daily_totals(range.from, range.to)?;
    let options = AggregateOptions {
        max_daily: config.max_daily(),
        limit,
        ..AggregateOptions::default()
    };
    let entries = aggregate(rollups, &[], range, &options);

    if json {
        let timezone = iana_time_zone::get_timezone().unwrap_or_else(|_| "UTC".to_string());
        let output = format_report_json(&entries, range, Utc::now(), &timezone)?;
        writeln!(writer, "{output}")?;
    } else {
        write!(writer, "{}", format_report(&entries, range))?;
    }
    Ok(())
}

/// Formats the period description for the report header.
fn format_range_description(range: DateRange) -> String {
    if range.from == range.to {
        // "Tuesday, Mar 10, 2026"
        format!("{}", range.from.format("%A, %b %-d, %Y"))
    } else {
        format!(
            "{} to {}",
            range.from.format("%b %-d, %Y"),
            range.to.format("%b %-d, %Y")
        )
    }
}

/// Formats the human-readable report output.
#[must_use]
pub fn format_report(entries: &[AppUsage], range: DateRange) -> String {
    use std::fmt::Write as _;

    let mut output = String::new();
    writeln!(output, "USAGE REPORT: {}", format_range_description(range)).unwrap();
    writeln!(output).unwrap();

    if entries.is_empty() {
        writeln!(output, "No usage recorded for this period.").unwrap();
        writeln!(output).unwrap();
        writeln!(output, "Hint: run 'vigil track' to start recording.").unwrap();
        return output;
    }

    let width = entries
        .iter()
        .map(|entry| entry.name.as_str().chars().count())
        .max()
        .unwrap_or(0)
        .max(12);
    let max_ms = entries.iter().map(|entry| entry.total_ms).max().unwrap_or(0);

    let mut any_live = false;
    for entry in entries {
        let name = entry.name.as_str();
        let duration = format_duration(entry.total_ms);
        let bar = progress_bar(entry.total_ms, max_ms);
        let marker = if entry.live {
            any_live = true;
            " *"
        } else {
            ""
        };
        writeln!(output, "{name:<width$}  {duration:>7}  {bar}{marker}").unwrap();
    }

    let total_ms: i64 = entries.iter().map(|entry| entry.total_ms).sum();
    writeln!(output).unwrap();
    writeln!(
        output,
        "Total tracked: {} across {} application{}",
        format_duration(total_ms),
        entries.len(),
        if entries.len() == 1 { "" } else { "s" }
    )
    .unwrap();
    if any_live {
        writeln!(output, "* includes a live session").unwrap();
    }

    output
}

// ========== JSON Output ==========

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    generated_at: String,
    timezone: String,
    range: JsonRange,
    apps: &'a [AppUsage],
    total_ms: i64,
}

#[derive(Debug, Serialize)]
struct JsonRange {
    from: String,
    to: String,
    days: i64,
}

/// Formats report entries as JSON.
pub fn format_report_json(
    entries: &[AppUsage],
    range: DateRange,
    generated_at: DateTime<Utc>,
    timezone: &str,
) -> Result<String> {
    let report = JsonReport {
        generated_at: generated_at.to_rfc3339(),
        timezone: timezone.to_string(),
        range: JsonRange {
            from: range.from.to_string(),
            to: range.to.to_string(),
            days: range.days(),
        },
        apps: entries,
        total_ms: entries.iter().map(|entry| entry.total_ms).sum(),
    };
    Ok(serde_json::to_string_pretty(&report)?)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use insta::assert_snapshot;
    use vigil_core::CanonicalName;

    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    fn entry(name: &str, label: Option<&str>, total_ms: i64, live: bool) -> AppUsage {
        AppUsage {
            name: CanonicalName::new(name).unwrap(),
            label: label.map(str::to_string),
            total_ms,
            live,
        }
    }

    // ========== Range Resolution Tests ==========

    #[test]
    fn resolve_range_single_date() {
        let range = resolve_range(Some(date(10)), None, None).unwrap();
        assert_eq!(range, DateRange::single(date(10)));
    }

    #[test]
    fn resolve_range_from_to() {
        let range = resolve_range(None, Some(date(1)), Some(date(7))).unwrap();
        assert_eq!(range.from, date(1));
        assert_eq!(range.to, date(7));
        assert_eq!(range.days(), 7);
    }

    #[test]
    fn resolve_range_defaults_to_today() {
        let range = resolve_range(None, None, None).unwrap();
        let today = Local::now().date_naive();
        assert_eq!(range, DateRange::single(today));
    }

    #[test]
    fn resolve_range_rejects_reversed() {
        assert!(resolve_range(None, Some(date(7)), Some(date(1))).is_err());
    }

    // ========== Rendering Tests ==========

    #[test]
    fn report_empty_period() {
        let output = format_report(&[], DateRange::single(date(10)));
        assert_snapshot!(output, @r"
        USAGE REPORT: Tuesday, Mar 10, 2026

        No usage recorded for this period.

        Hint: run 'vigil track' to start recording.
        ");
    }

    #[test]
    fn report_table_aligns_and_sorts_as_given() {
        let entries = vec![
            entry("Chrome", Some("New Tab"), 9_000_000, false),
            entry("Visual Studio Code", None, 4_200_000, false),
            entry("Slack", None, 600_000, false),
        ];
        let output = format_report(&entries, DateRange::single(date(10)));
        assert_snapshot!(output, @r"
        USAGE REPORT: Tuesday, Mar 10, 2026

        Chrome               2h 30m  ██████████
        Visual Studio Code   1h 10m  █████░░░░░
        Slack                   10m  █░░░░░░░░░

        Total tracked: 3h 50m across 3 applications
        ");
    }

    #[test]
    fn report_marks_live_entries() {
        let entries = vec![entry("Chrome", None, 3_600_000, true)];
        let output = format_report(&entries, DateRange::single(date(10)));
        assert!(output.contains("Chrome          1h 0m  ██████████ *"));
        assert!(output.contains("* includes a live session"));
        assert!(output.contains("across 1 application\n"));
    }

    #[test]
    fn report_range_header_names_both_ends() {
        let range = DateRange {
            from: date(1),
            to: date(7),
        };
        let output = format_report(&[], range);
        assert!(output.starts_with("USAGE REPORT: Mar 1, 2026 to Mar 7, 2026\n"));
    }

    #[test]
    fn report_json_output() {
        let entries = vec![entry("Chrome", Some("New Tab"), 9_000_000, false)];
        let generated_at = Utc.with_ymd_and_hms(2026, 3, 10, 16, 0, 0).unwrap();
        let output =
            format_report_json(&entries, DateRange::single(date(10)), generated_at, "UTC").unwrap();
        assert_snapshot!(output, @r#"
        {
          "generated_at": "2026-03-10T16:00:00+00:00",
          "timezone": "UTC",
          "range": {
            "from": "2026-03-10",
            "to": "2026-03-10",
            "days": 1
          },
          "apps": [
            {
              "name": "Chrome",
              "label": "New Tab",
              "total_ms": 9000000,
              "live": false
            }
          ],
          "total_ms": 9000000
        }
        "#);
    }
}
