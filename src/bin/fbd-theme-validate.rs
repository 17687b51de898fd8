//! Validator for feedback theme files: expands the parent chain and
//! reports the first problem found.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use feedbackd::theme::expander::ThemeExpander;

#[derive(Parser, Debug)]
#[command(name = "fbd-theme-validate", about = "A validator for feedback themes", version)]
struct Cli {
    /// The device compatible used for device-specific overlays
    #[arg(long)]
    compatible: Option<String>,

    /// Theme file to validate
    theme_file: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let compatibles = cli.compatible.into_iter().collect();
    let expander = ThemeExpander::new(compatibles, Some(cli.theme_file.clone()));

    match expander.load_theme() {
        Ok(_) => {
            println!("Validation successful.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Validation of '{}' failed\n", cli.theme_file.display());
            eprintln!("error: {e}\n");
            ExitCode::FAILURE
        }
    }
}
