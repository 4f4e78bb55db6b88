#![forbid(unsafe_code)]

mod app;
mod config;
mod constants;
mod effects;
mod identity;
mod logging;
mod payload;
mod pipeline;
mod transport;
mod tray;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

/// Shows SMS relayed from a phone over MQTT as desktop notifications and
/// copies verification codes to the clipboard
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Config file (default: config.yaml next to the executable)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log file (default: app.log next to the executable)
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let options = app::Options {
        config_path: cli.config,
        log_path: cli.log_file,
    };

    match app::run(options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format!("{err:#}"), "Fatal startup error");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
