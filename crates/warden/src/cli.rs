//! Command-line argument parsing.
//!
//! Flags override the matching settings of the configuration file.

use clap::Parser;
use std::path::PathBuf;

/// Game server launcher and console supervisor
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    ///
    /// If the file doesn't exist, a default configuration is written there.
    #[arg(short, long, default_value = "warden.toml")]
    pub config: PathBuf,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Output launcher logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Start the server right after launch
    #[arg(short, long)]
    pub autostart: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            config: PathBuf::from("warden.toml"),
            log_level: None,
            json_logs: false,
            autostart: false,
        }
    }
}
