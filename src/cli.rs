//! Command-line interface for signcast
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Sign-gesture recognition agents behind a supervised worker pool
#[derive(Parser, Debug)]
#[command(
    name = "signcast",
    version,
    about = "Sign-gesture recognition agents behind a supervised worker pool"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Signaling server address (host:port)
    #[arg(long, global = true, value_name = "ADDR")]
    pub endpoint: Option<String>,
}

/// Parse a duration string.
///
/// Supports any duration format accepted by `humantime` (`500ms`, `5s`,
/// `1m30s`); a bare number is read as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Keep a pool of agent processes alive (foreground process for systemd)
    Pool {
        /// Number of worker slots
        #[arg(long, short = 'w', value_name = "N")]
        workers: Option<usize>,

        /// Delay before a dead worker is respawned (e.g. 5s, 500ms)
        #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
        restart_delay: Option<Duration>,
    },

    /// Run one agent in the foreground (spawned by the pool)
    Agent {
        /// Template classifier JSON
        #[arg(long, value_name = "PATH")]
        model: Option<PathBuf>,

        /// Pause between session attempts (e.g. 0, 250ms)
        #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
        restart_delay: Option<Duration>,
    },

    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
    /// Write a configuration file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
