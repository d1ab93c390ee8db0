//! CLI command implementations.

pub mod prune;
pub mod report;
pub mod resolve;
pub mod status;
pub mod util;
