//! Building blocks of the `sctid` binary.
//!
//! - [`config`] - CLI arguments and their conversion into library
//!   configuration.
//! - [`commands`] - One function per subcommand.
//! - [`telemetry`] - Log output and optional OpenTelemetry export.

pub mod commands;
pub mod config;
pub mod telemetry;
