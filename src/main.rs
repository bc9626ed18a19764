//! CLI entry point for the harvester tool.

use std::io::{self, IsTerminal};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use harvester_core::{
    EventLog, HarvestConfig, PipelineContext, ProgressBoard, ResumeStateStore, RunSummary,
    pipeline,
};
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(args.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let loaded = HarvestConfig::load_or_default(&args.config)
        .with_context(|| format!("cannot load config {}", args.config.display()))?;
    if !loaded.from_file {
        match loaded.config.save(&args.config) {
            Ok(()) => info!(path = %args.config.display(), "wrote default config"),
            Err(e) => warn!(error = %e, "could not write default config"),
        }
    }
    let mut config = loaded.config;
    args.apply_overrides(&mut config);
    config.validate().context("invalid configuration")?;

    if args.reset {
        ResumeStateStore::new(config.state_file.clone()).reset();
    }

    std::fs::create_dir_all(&config.directory).with_context(|| {
        format!("cannot create output directory {}", config.directory.display())
    })?;

    let events = EventLog::new(config.failure_log_path(), config.unknown_alternate_log_path());
    let ctx = Arc::new(PipelineContext::new(events));
    spawn_interrupt_handler(Arc::clone(&ctx));

    let show_progress = !args.no_progress && !args.quiet && io::stderr().is_terminal();
    let progress = ProgressBoard::new(show_progress);

    info!(
        directory = %config.directory.display(),
        workers = config.download_workers,
        datasets = ?config.datasets,
        "harvester starting"
    );
    let summary = pipeline::run(Arc::new(config), ctx, &progress)
        .await
        .context("pipeline failed to start")?;
    progress.clear();

    print_summary(&summary);
    Ok(())
}

/// First Ctrl-C requests a graceful stop; a second one exits immediately.
fn spawn_interrupt_handler(ctx: Arc<PipelineContext>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("interrupt received, stopping after in-flight work (Ctrl-C again to abort)");
        ctx.request_stop();
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}

fn print_summary(summary: &RunSummary) {
    let counters = summary.counters;
    println!(
        "Files downloaded: {} | Forbiddens: {} | Errors: {} | Alternates: {} | Unknown alternates: {}",
        counters.downloads,
        counters.forbidden,
        counters.errors,
        counters.alternates_found,
        counters.alternates_exhausted,
    );

    for (dataset, error) in &summary.dataset_errors {
        println!("Dataset {dataset} stopped early: {error}");
    }

    if summary.failures.is_empty() {
        println!("No failed downloads.");
    } else {
        println!("Failed downloads:");
        for (dataset, files) in &summary.failures {
            println!("  Dataset {dataset} ({} files):", files.len());
            for file in files {
                println!("    {file}");
            }
        }
    }

    if summary.interrupted {
        match summary.rewound_to {
            Some(position) => println!(
                "Interrupted: {} queued files discarded, will resume at {position}.",
                summary.discarded
            ),
            None => println!("Interrupted: will resume from the last completed page."),
        }
    }
}
