//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use harvester_core::{DEFAULT_CONFIG_FILE, DatasetId, HarvestConfig};

/// Crawl paginated document listings and download every linked file.
///
/// Progress is checkpointed after each listing page, so an interrupted run
/// picks up where it stopped. Files already on disk are skipped.
#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(author, version, about)]
pub struct Args {
    /// Config file (created with defaults if missing)
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Clear the saved crawl position before starting
    #[arg(long)]
    pub reset: bool,

    /// Output directory (overrides `directory`)
    #[arg(short = 'd', long, value_name = "DIR")]
    pub directory: Option<PathBuf>,

    /// Number of download workers, 1-100 (overrides `downloadWorkers`)
    #[arg(short = 'w', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub workers: Option<u8>,

    /// Comma-separated datasets to crawl, in order (overrides `datasets`)
    #[arg(long, value_delimiter = ',', value_name = "IDS")]
    pub datasets: Option<Vec<DatasetId>>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Disable the live progress display
    #[arg(long)]
    pub no_progress: bool,
}

impl Args {
    /// Applies command-line overrides on top of the file configuration.
    pub fn apply_overrides(&self, config: &mut HarvestConfig) {
        if let Some(directory) = &self.directory {
            config.directory.clone_from(directory);
        }
        if let Some(workers) = self.workers {
            config.download_workers = usize::from(workers);
        }
        if let Some(datasets) = &self.datasets {
            config.datasets.clone_from(datasets);
        }
    }

    /// Default tracing filter when `RUST_LOG` is unset.
    #[must_use]
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else {
            match self.verbose {
                0 => "info",
                1 => "debug",
                _ => "trace",
            }
        }
    }
}
