//! One complete crawl → queue → fetch run.
//!
//! [`run`] wires the crawler, the queue, and the worker pool together:
//! datasets are crawled one after another while the pool downloads in the
//! background, then the queue is drained and the pool shut down with one
//! end-of-stream marker per worker. A stop request (Ctrl-C) switches to the
//! forced-drain path: queued work is discarded and the checkpoint is
//! rewound so the next run rediscovers it, along with any file whose
//! alternate probe the stop cut short.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use tracing::{error, info, instrument, warn};

use crate::config::HarvestConfig;
use crate::context::{Counters, PipelineContext};
use crate::crawler::{CrawlError, CrawlSummary, PageCrawler};
use crate::download::{DownloadError, EngineError, FetchWorker, HttpClient, WorkerPool};
use crate::progress::ProgressBoard;
use crate::queue::{DatasetId, Position, WorkQueue};
use crate::resume::{self, ResumeStateStore};

/// Errors that prevent a run from starting.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The worker pool could not be created.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The HTTP client could not be built from the configuration.
    #[error("cannot build HTTP client: {0}")]
    Client(#[from] DownloadError),
}

/// Outcome of one run.
#[derive(Debug)]
pub struct RunSummary {
    /// Final counter values.
    pub counters: Counters,
    /// Failed basenames grouped by dataset.
    pub failures: BTreeMap<DatasetId, Vec<String>>,
    /// Datasets crawled to completion (or interruption).
    pub crawls: Vec<(DatasetId, CrawlSummary)>,
    /// Datasets abandoned because a listing page failed.
    pub dataset_errors: Vec<(DatasetId, CrawlError)>,
    /// Whether the run ended through a stop request.
    pub interrupted: bool,
    /// Queued items dropped by the forced drain.
    pub discarded: usize,
    /// Checkpoint written after discarding or cutting short work, if any.
    pub rewound_to: Option<Position>,
}

/// Runs the whole pipeline once.
///
/// # Errors
///
/// Returns [`PipelineError`] if the HTTP client or the worker pool cannot
/// be created. Failures after startup are recorded in the summary.
#[instrument(skip_all, fields(datasets = ?config.datasets, workers = config.download_workers))]
pub async fn run(
    config: Arc<HarvestConfig>,
    ctx: Arc<PipelineContext>,
    progress: &ProgressBoard,
) -> Result<RunSummary, PipelineError> {
    let client = HttpClient::from_config(&config)?;
    let queue = Arc::new(WorkQueue::new());
    let store = ResumeStateStore::new(config.state_file.clone());

    let state = store.load();
    let plan = resume::plan(&config.datasets, &state);
    info!(?state, ?plan, "starting run");

    let worker = Arc::new(FetchWorker::new(
        Arc::clone(&config),
        Arc::clone(&queue),
        Arc::clone(&ctx),
        client.clone(),
    ));
    let pool = WorkerPool::spawn(config.download_workers, worker, progress)?;
    let (header, header_stop) = progress.spawn_header(Arc::clone(&ctx), Arc::clone(&queue));

    let crawler = PageCrawler::new(
        Arc::clone(&config),
        client,
        Arc::clone(&queue),
        Arc::clone(&ctx),
        store.clone(),
    );
    let mut crawls = Vec::new();
    let mut dataset_errors = Vec::new();
    for (dataset, start) in plan {
        if ctx.is_stopping() {
            break;
        }
        match crawler.crawl(dataset, start).await {
            Ok(summary) => crawls.push((dataset, summary)),
            Err(e) => {
                error!(dataset, error = %e, "dataset abandoned");
                dataset_errors.push((dataset, e));
            }
        }
    }

    // Small datasets may never reach the warm-up threshold.
    queue.open_gate();

    if !ctx.is_stopping() {
        info!(size = queue.size(), "crawl finished, draining queue");
        tokio::select! {
            () = queue.wait_until_drained() => {}
            () = ctx.stop().wait() => {}
        }
    }

    let mut discarded = Vec::new();
    if ctx.is_stopping() {
        discarded = queue.drain_pending();
    }
    queue.close(pool.size());
    pool.join().await;
    if ctx.is_stopping() {
        discarded.extend(queue.drain_pending());
    }

    let unsettled = ctx.unsettled();
    let held_back = discarded
        .iter()
        .map(|item| item.reference().position())
        .chain(unsettled.iter().copied());
    let rewound_to = earliest_position(held_back, &config.datasets);
    if let Some(position) = rewound_to {
        warn!(
            discarded = discarded.len(),
            unsettled = unsettled.len(),
            %position,
            "work left unfinished, checkpoint rewound"
        );
        store.save(position.dataset, position.page);
    }

    header_stop.store(true, Ordering::SeqCst);
    if let Err(e) = header.await {
        warn!(error = %e, "status header task ended abnormally");
    }

    let summary = RunSummary {
        counters: ctx.counters().snapshot(),
        failures: ctx.failures(),
        crawls,
        dataset_errors,
        interrupted: ctx.is_stopping(),
        discarded: discarded.len(),
        rewound_to,
    };
    info!(
        downloads = summary.counters.downloads,
        errors = summary.counters.errors,
        interrupted = summary.interrupted,
        "run finished"
    );
    Ok(summary)
}

/// Earliest of `positions`, in configured dataset order.
fn earliest_position(
    positions: impl IntoIterator<Item = Position>,
    dataset_order: &[DatasetId],
) -> Option<Position> {
    positions
        .into_iter()
        .min_by(|a, b| a.cmp_in(b, dataset_order))
}
