//! Resolve command: debug view of canonical-name resolution.

use std::io::Write;

use anyhow::Result;
use vigil_core::Resolver;
use vigil_probe::DesktopEntrySource;

pub fn run<W: Write>(writer: &mut W, process: &str, title: Option<&str>) -> Result<()> {
    let resolver = Resolver::with_source(DesktopEntrySource::new());
    let name = resolver.resolve(process, title.unwrap_or(""), None);
    writeln!(writer, "{name}")?;
    Ok(())
}
