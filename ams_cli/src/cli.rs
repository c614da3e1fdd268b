//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "ams", version, about = "Filament supply monitoring engine CLI")]
pub struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE", default_value = "etc/ams.toml")]
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

/// Scripted sensor timeline for `run`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum Scenario {
    /// Healthy print: pressure holds the band, nothing fires.
    Clean,
    /// Pressure collapses mid-print until the stuck-spool dwell latches.
    Stuck,
    /// Active spool runs out; the tail is drained and a group peer
    /// takes over.
    Runout,
    /// Every load attempt stalls the encoder until retries exhaust.
    Retry,
}

impl Scenario {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Stuck => "stuck",
            Self::Runout => "runout",
            Self::Retry => "retry",
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the configuration and print a summary
    Check,
    /// Drive the engine against simulated hubs through a scripted
    /// scenario (virtual time; finishes immediately)
    Run {
        /// Sensor timeline to script
        #[arg(long, value_enum, default_value = "clean")]
        scenario: Scenario,
        /// Number of one-second ticks to simulate
        #[arg(long, default_value_t = 120)]
        ticks: u64,
    },
}
