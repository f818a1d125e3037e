//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// extrpc command-line interface.
#[derive(Debug, Parser)]
#[command(name = "extrpc")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(long, short, env = "EXTRPC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short = 'v')]
    pub debug: bool,

    /// Log output format (overrides the config file)
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Wire background, relay and web page in-process and perform one call
    Simulate {
        /// Browser engine to simulate (overrides the config file)
        #[arg(long, env = "EXTRPC_ENGINE")]
        engine: Option<String>,

        /// Procedure to call
        #[arg(long)]
        procedure: String,

        /// Procedure arguments as JSON
        #[arg(long)]
        args: Option<String>,

        /// Context the call is made from
        #[arg(long, value_enum, default_value_t = Caller::WebPage)]
        from: Caller,

        /// Call timeout in seconds (overrides the config file)
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Context making the simulated call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Caller {
    /// The web page calls the background
    WebPage,
    /// The background calls the web page
    Background,
}

/// Log output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Single-line output
    Compact,
    /// Multi-line output
    Pretty,
    /// One JSON object per event
    Json,
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Validate configuration
    Validate,

    /// Show configuration file path
    Path,
}
