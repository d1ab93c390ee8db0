//! Command-line interface for the vigil usage tracker.
//!
//! This crate wires the domain crates together: clap argument parsing,
//! figment configuration, the tokio tracking service, and the report
//! commands.

mod cli;
pub mod commands;
mod config;
pub mod service;

pub use cli::{Cli, Commands};
pub use config::Config;
