//! Command line interface for the daemon.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "feedbackd", about = "Haptic/audio/LED feedback daemon", version)]
pub struct Cli {
    /// Increase log verbosity (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Theme file to load instead of resolving the default theme.
    /// The FEEDBACK_THEME environment variable takes precedence.
    #[arg(long)]
    pub theme_file: Option<PathBuf>,

    /// Device compatible used to pick device-specific theme overlays.
    /// May be given multiple times; defaults to the device tree.
    #[arg(long = "compatible")]
    pub compatibles: Vec<String>,
}
