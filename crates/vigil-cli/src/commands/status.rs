//! Status command: store health and most recent activity.

use std::io::Write;

use anyhow::Result;
use chrono::Local;
use vigil_db::Store;

use crate::Config;

pub fn run<W: Write>(writer: &mut W, config: &Config) -> Result<()> {
    let store = Store::open_or_fallback(&config.database_path)?;

    writeln!(writer, "vigil status")?;
    writeln!(writer, "Database: {}", config.database_path.display())?;
    let backend = if store.is_fallback() {
        "in-memory (fallback)"
    } else {
        "file"
    };
    writeln!(writer, "Backend: {backend}")?;
    writeln!(writer, "Schema version: {}", store.schema_version())?;
    writeln!(writer, "Stored sessions: {}", store.session_count()?)?;
    match store.last_updated()? {
        Some(at) => writeln!(
            writer,
            "Last activity: {}",
            at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        )?,
        None => writeln!(writer, "Last activity: never")?,
    }

    Ok(())
}
