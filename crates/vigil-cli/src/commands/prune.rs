//! Prune command: manual retention sweep.

use std::io::Write;

use anyhow::Result;
use vigil_db::Store;

use crate::Config;

pub fn run<W: Write>(writer: &mut W, config: &Config, older_than: Option<u32>) -> Result<()> {
    let horizon = older_than.unwrap_or(config.retention_days);
    let store = Store::open_or_fallback(&config.database_path)?;
    let deleted = store.prune(horizon)?;
    writeln!(
        writer,
        "Deleted {deleted} session{} older than {horizon} days.",
        if deleted == 1 { "" } else { "s" }
    )?;
    Ok(())
}
