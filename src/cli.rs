//! Command-line interface for commentcast
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Live English race commentary re-voiced in Telugu
#[derive(Parser, Debug)]
#[command(
    name = "commentcast",
    version,
    about = "Live English race commentary re-voiced in Telugu"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to Unix socket (default: $XDG_RUNTIME_DIR/commentcast.sock)
    #[arg(long, global = true, value_name = "PATH")]
    pub socket: Option<PathBuf>,
}

/// Parse a duration string.
///
/// Supports any duration format accepted by `humantime`: bare numbers (seconds),
/// single-unit (`30s`, `5m`, `2h`), and compound (`1h30m`, `2m30s`).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    // Bare number → seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the daemon (foreground process for systemd)
    Daemon {
        /// Use scripted engines instead of the remote services
        #[arg(long)]
        mock: bool,
    },

    /// Start a session on the daemon
    Start {
        /// Stream URL, media file or WAV path (default: pipeline.source)
        source: Option<String>,

        /// Race label used for dataset files (default: the source)
        #[arg(long, short = 'l', value_name = "LABEL")]
        label: Option<String>,
    },

    /// Stop the running session and drain in-flight commentary
    Stop,

    /// Show session state and pipeline counters
    Health {
        /// Print the raw JSON report
        #[arg(long)]
        json: bool,
    },

    /// Show the latest race context
    Context {
        /// Print the raw JSON snapshot
        #[arg(long)]
        json: bool,
    },

    /// Rewrite and synthesize one English line (nothing is broadcast)
    TestRewrite {
        /// English commentary line
        english: String,
    },

    /// Like test-rewrite, then broadcast the result to every listener
    TestBroadcast {
        /// English commentary line
        english: String,
    },

    /// Listen to the daemon's ordered commentary
    Follow {
        /// Write each audio artifact to this directory
        #[arg(long, value_name = "DIR")]
        save_audio: Option<PathBuf>,

        /// Exit when the session stops or fails
        #[arg(long)]
        until_stopped: bool,
    },

    /// Run one session in the foreground without a daemon
    Run {
        /// Stream URL, media file or WAV path
        source: String,

        /// Race label used for dataset files (default: the source)
        #[arg(long, short = 'l', value_name = "LABEL")]
        label: Option<String>,

        /// Use scripted engines instead of the remote services
        #[arg(long)]
        mock: bool,

        /// Write each audio artifact to this directory
        #[arg(long, value_name = "DIR")]
        save_audio: Option<PathBuf>,

        /// Stop after this long. Examples: 90s, 10m, 1h30m
        #[arg(long = "for", value_name = "DURATION", value_parser = parse_duration)]
        duration: Option<Duration>,
    },

    /// View configuration
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

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration (API keys masked)
    Show,
    /// Print the configuration file path
    Path,
    /// Print a configuration template with the built-in defaults
    Dump,
}
