//! photosort command-line interface.
//!
//! Two entry points: `organize` runs the engine over a source directory,
//! `database` manages the subject roster interactively.
//!
//! Exit codes: 0 success, 1 user error, 2 fatal vision backend error,
//! 3 run completed with partial failures.

use clap::{Parser, Subcommand};
use photosort_core::CoreError;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod database_cmd;
mod organize_cmd;

pub(crate) const EXIT_OK: u8 = 0;
pub(crate) const EXIT_USER_ERROR: u8 = 1;
pub(crate) const EXIT_VISION_ERROR: u8 = 2;
pub(crate) const EXIT_PARTIAL: u8 = 3;

#[derive(Parser)]
#[command(name = "photosort")]
#[command(about = "Organize photo directories into per-subject folders via a vision backend")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Organize a directory of photos.
    Organize(organize_cmd::OrganizeArgs),
    /// Manage the subject roster interactively.
    Database,
}

/// Maps an engine error to its exit code.
pub(crate) fn exit_code_for(err: &CoreError) -> u8 {
    match err {
        CoreError::Vision(_) => EXIT_VISION_ERROR,
        _ => EXIT_USER_ERROR,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("photosort=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Organize(args) => organize_cmd::run(args).await,
        Commands::Database => database_cmd::run().await,
    };
    ExitCode::from(code)
}
