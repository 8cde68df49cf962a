//! The `organize` subcommand.

use crate::{exit_code_for, EXIT_OK, EXIT_PARTIAL, EXIT_USER_ERROR, EXIT_VISION_ERROR};
use clap::{Parser, ValueEnum};
use photosort_core::{
    config, engine, AnalysisCache, AnthropicBackend, Config, ExecutionMode, OrganizeOptions,
    Roster, RunMode, DEFAULT_CACHE_FILE, DEFAULT_ROSTER_FILE,
};
use std::path::PathBuf;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Database,
    AutoCluster,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransferArg {
    Copy,
    Move,
}

#[derive(Debug, Parser)]
pub struct OrganizeArgs {
    /// Directory of photos to organize. Ignored with --undo.
    #[arg(value_name = "SOURCE_DIR", required_unless_present = "undo")]
    pub source: Option<PathBuf>,

    /// Destination root for the organized tree.
    #[arg(short, long, default_value = "./organized_photos")]
    pub output: PathBuf,

    /// Classification engine.
    #[arg(long, value_enum, default_value_t = ModeArg::Database)]
    pub mode: ModeArg,

    /// Whether files are copied or moved into place.
    #[arg(long = "copy-or-move", value_enum, default_value_t = TransferArg::Copy)]
    pub transfer: TransferArg,

    /// Plan only; no files are touched.
    #[arg(long)]
    pub dry_run: bool,

    /// Recurse into subdirectories (default).
    #[arg(short, long, default_value_t = true)]
    pub recursive: bool,

    /// Disable recursion.
    #[arg(long, conflicts_with = "recursive")]
    pub no_recursive: bool,

    /// Similarity acceptance threshold in [0, 1]. Defaults to 0.7 in
    /// database mode and 0.5 in auto-cluster mode.
    #[arg(long, value_name = "FLOAT")]
    pub confidence: Option<f64>,

    /// Restore the previous run recorded in the output's manifest.
    #[arg(long)]
    pub undo: bool,
}

pub async fn run(args: OrganizeArgs) -> u8 {
    if args.undo {
        return run_undo(&args.output);
    }

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(%e, "configuration error");
            eprintln!("error: {e}");
            return EXIT_USER_ERROR;
        }
    };
    if args.confidence.is_some() {
        config.confidence_threshold = args.confidence;
        if let Err(e) = config.validate() {
            eprintln!("error: {e}");
            return EXIT_USER_ERROR;
        }
    }

    let Some(api_key) = config.api_key.clone() else {
        eprintln!(
            "error: no vision backend credentials; set {}",
            config::ENV_API_KEY
        );
        return EXIT_USER_ERROR;
    };
    let backend = match AnthropicBackend::new(
        api_key,
        &config.model,
        config.request_timeout(),
        config.retry,
    ) {
        Ok(backend) => backend,
        Err(e) => {
            eprintln!("error: {e}");
            return EXIT_VISION_ERROR;
        }
    };

    let mut cache = match AnalysisCache::load(DEFAULT_CACHE_FILE) {
        Ok(cache) => cache,
        Err(e) => {
            eprintln!("error: {e}");
            return EXIT_USER_ERROR;
        }
    };
    let roster = match Roster::load(DEFAULT_ROSTER_FILE) {
        Ok(roster) => roster,
        Err(e) => {
            eprintln!("error: {e}");
            return EXIT_USER_ERROR;
        }
    };

    let options = OrganizeOptions {
        // Safe: clap requires SOURCE_DIR unless --undo.
        source: args.source.clone().unwrap_or_default(),
        output: args.output.clone(),
        mode: match args.mode {
            ModeArg::Database => RunMode::Database,
            ModeArg::AutoCluster => RunMode::AutoCluster,
        },
        execution: match args.transfer {
            TransferArg::Copy => ExecutionMode::Copy,
            TransferArg::Move => ExecutionMode::Move,
        },
        dry_run: args.dry_run,
        recursive: args.recursive && !args.no_recursive,
    };

    let summary = match engine::organize(&options, &config, &backend, &mut cache, &roster).await {
        Ok(summary) => summary,
        Err(e) => {
            error!(%e, "run failed");
            eprintln!("error: {e}");
            return exit_code_for(&e);
        }
    };

    if options.dry_run {
        println!("dry run: {} placements planned", summary.placements.len());
        for placement in &summary.placements {
            println!(
                "  {} -> {}",
                placement.source.display(),
                placement.directory.display()
            );
        }
    } else {
        let counts = &summary.report.counts;
        println!(
            "organized {} photos: {} single-subject, {} multiple, {} unknown, {} no-faces",
            summary.report.images.len(),
            counts.single_subject,
            counts.multiple_subjects,
            counts.unknown_subjects,
            counts.no_faces
        );
        for cluster in &summary.report.clusters {
            println!("  {} ({} photos)", cluster.name, cluster.members);
        }
        let cache_stats = &summary.report.cache;
        println!(
            "vision calls saved by cache: {} (misses: {})",
            cache_stats.hits, cache_stats.misses
        );
        if summary.report.execution.failed > 0 {
            eprintln!(
                "{} placements failed; see {}",
                summary.report.execution.failed,
                args.output.join(photosort_core::report::REPORT_FILE).display()
            );
        }
        for (path, err) in &summary.report.vision_errors {
            eprintln!("analysis failed for {}: {err}", path.display());
        }
    }

    if summary.partial_failure {
        EXIT_PARTIAL
    } else {
        EXIT_OK
    }
}

fn run_undo(output: &std::path::Path) -> u8 {
    match engine::undo(output) {
        Ok(stats) => {
            println!(
                "restored {} files ({} failed)",
                stats.succeeded, stats.failed
            );
            if stats.failed > 0 {
                EXIT_PARTIAL
            } else {
                EXIT_OK
            }
        }
        Err(e) => {
            eprintln!("error: {e}");
            exit_code_for(&e)
        }
    }
}
