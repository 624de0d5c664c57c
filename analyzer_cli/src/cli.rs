//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(
    name = "analyzer",
    version,
    about = "Multi-channel battery analyzer control"
)]
pub struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE", default_value = "etc/analyzer.toml")]
    pub config: PathBuf,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Regulate the configured channels until interrupted
    Run {
        /// Stop after this many seconds (runs until ctrl-c when absent)
        #[arg(long, value_name = "SECS")]
        duration_s: Option<u64>,

        /// Drive the simulated rig instead of real hardware
        #[arg(long, action = ArgAction::SetTrue)]
        simulate: bool,

        /// Only start these channel ids (all configured channels when absent)
        #[arg(long = "channel", value_name = "ID")]
        channels: Vec<u8>,

        /// Seconds between periodic status reports
        #[arg(long, value_name = "SECS", default_value_t = 5)]
        status_every_s: u64,
    },
    /// Validate the config file and exit
    Check,
    /// List built-in battery profiles
    Profiles,
}
