// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::config::DEFAULT_WORKFLOW_FILE;
use crate::types::BackendKind;

/// Command-line arguments for `jobdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "jobdag",
    version,
    about = "Run a workflow of batch jobs in dependency order.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the workflow file (TOML).
    ///
    /// Default: `Jobdag.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = DEFAULT_WORKFLOW_FILE)]
    pub workflow: String,

    /// Override `[config].max_concurrency`.
    #[arg(long, value_name = "N")]
    pub max_concurrency: Option<usize>,

    /// Override `[config].backend`.
    #[arg(long, value_enum, value_name = "BACKEND")]
    pub backend: Option<BackendKind>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `JOBDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Validate the workflow and print the execution plan without running
    /// anything.
    #[arg(long)]
    pub dry_run: bool,
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
