//! Core domain logic for the vigil usage tracker.
//!
//! This crate contains the fundamental types and logic for:
//! - Resolution: collapsing raw process and window names to canonical
//!   application identities
//! - Monitoring: the foreground focus state machine with idle, rollover,
//!   and suspend handling
//! - Merging: the deduplication rules shared by live state and reports
//! - Aggregation: per-application usage totals over date ranges

pub mod merge;
pub mod monitor;
pub mod record;
pub mod report;
pub mod resolver;
pub mod types;

pub use merge::{MergeStrategy, RecordIndex, merge_into};
pub use monitor::{FocusSample, Monitor, MonitorConfig, MonitorEvent};
pub use record::{UsageRecord, local_date_of, local_day_end, local_day_start};
pub use report::{AggregateOptions, AppUsage, DailyTotal, DateRange, aggregate};
pub use resolver::{MatchField, NameRule, ProductNameSource, Resolver};
pub use types::{CanonicalName, ProcessId, ValidationError, WindowHandle};
