// src/cli.rs

//! CLI argument parsing using `clap`.
//!
//! NOTE: this expects `clap` to be built with the `derive` feature, e.g.:
//! `clap = { version = "4.5.53", features = ["derive"] }` in `Cargo.toml`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `taskmill`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "taskmill",
    version,
    about = "Cron-driven job scheduler with per-queue priority dispatch and task chains.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Taskmill.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Taskmill.toml")]
    pub config: String,

    /// Load + validate the config, print the load report, then exit.
    ///
    /// Exit status is non-zero when validation fails.
    #[arg(long)]
    pub check: bool,

    /// Parse + validate, print the resolved catalog, but don't start
    /// queues or execute anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Seconds between polls of the config file for changes.
    #[arg(long, value_name = "SECS", default_value_t = 10)]
    pub poll_interval: u64,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TASKMILL_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
