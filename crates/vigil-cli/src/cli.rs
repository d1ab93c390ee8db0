//! Command-line argument definitions.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

/// Foreground application usage tracker.
///
/// Watches which window holds OS focus, folds the observations into
/// timed usage sessions, and reports per-application totals.
#[derive(Debug, Parser)]
#[command(name = "vigil", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the tracking service until interrupted.
    Track,

    /// Show per-application usage for a date or range.
    Report {
        /// Single day to report, `YYYY-MM-DD` (defaults to today).
        #[arg(long, conflicts_with_all = ["from", "to"])]
        date: Option<NaiveDate>,

        /// First day of the range, inclusive.
        #[arg(long, requires = "to")]
        from: Option<NaiveDate>,

        /// Last day of the range, inclusive.
        #[arg(long, requires = "from")]
        to: Option<NaiveDate>,

        /// Emit JSON instead of the table.
        #[arg(long)]
        json: bool,

        /// Show at most this many applications.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show store health and most recent activity.
    Status,

    /// Delete stored sessions older than the retention horizon.
    Prune {
        /// Override the configured horizon, in days.
        #[arg(long)]
        older_than: Option<u32>,
    },

    /// Print the canonical name an observation resolves to.
    Resolve {
        /// Raw process name (e.g. `chrome.exe`).
        process: String,

        /// Window title, if any.
        title: Option<String>,
    },
}
