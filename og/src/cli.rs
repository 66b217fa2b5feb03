//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// opgate - serialized, rate-limited operation runner
#[derive(Parser)]
#[command(
    name = "og",
    about = "Run operations one at a time against a rate-limited remote service",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a simulated workload through the scheduler
    Demo {
        /// Number of operations to submit
        #[arg(short, long, default_value = "4")]
        operations: usize,

        /// Number of distinct groups the operations are spread over
        #[arg(short, long, default_value = "2")]
        groups: usize,

        /// Keys fetched by each operation
        #[arg(short, long, default_value = "3")]
        keys: usize,

        /// Make every Nth operation fail (0 = never)
        #[arg(long, default_value = "0")]
        fail_every: usize,

        /// Override the pause between requests, in milliseconds
        #[arg(long)]
        request_delay_ms: Option<u64>,
    },

    /// Print the effective configuration as YAML
    Config,

    /// Print a JSONL event log
    Events {
        /// Path to the event log
        path: PathBuf,

        /// Only show the last N events
        #[arg(short = 'n', long)]
        tail: Option<usize>,
    },
}
