//! Fixed-size pool of fetch workers draining the [`WorkQueue`].
//!
//! The pool spawns exactly `downloadWorkers` tokio tasks. Each task waits
//! for the queue's start gate, then pops items until it receives an
//! [`QueueMessage::EndOfStream`] or a stop is requested. Per-item work
//! lives in [`FetchWorker::process_item`]; a failing item never ends a task.
//!
//! [`QueueMessage::EndOfStream`]: crate::queue::QueueMessage::EndOfStream

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::MAX_WORKERS;
use crate::progress::ProgressBoard;

mod task;

pub use task::{DownloadOutcome, FetchWorker};

/// Minimum allowed worker count.
const MIN_WORKERS: usize = 1;

/// Error type for worker pool operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid worker count provided.
    #[error("invalid worker count {value}: must be between {MIN_WORKERS} and {MAX_WORKERS}")]
    InvalidWorkerCount {
        /// The invalid value that was provided.
        value: usize,
    },
}

/// Running pool of fetch worker tasks.
#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    live: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Spawns `workers` tasks sharing `worker`, each with its own progress bar.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidWorkerCount`] if `workers` is outside
    /// `1..=100`.
    pub fn spawn(
        workers: usize,
        worker: Arc<FetchWorker>,
        board: &ProgressBoard,
    ) -> Result<Self, EngineError> {
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&workers) {
            return Err(EngineError::InvalidWorkerCount { value: workers });
        }

        let live = Arc::new(AtomicUsize::new(0));
        let handles = (0..workers)
            .map(|id| {
                let worker = Arc::clone(&worker);
                let live = Arc::clone(&live);
                let progress = board.worker_bar(id);
                live.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    task::run_worker(id, &worker, &progress).await;
                    progress.finish();
                    live.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect::<Vec<_>>();

        info!(workers, "worker pool started");
        Ok(Self { handles, live })
    }

    /// Number of tasks spawned.
    #[must_use]
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Number of tasks that have not exited yet.
    #[must_use]
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Waits for every task to exit.
    ///
    /// Tasks exit after consuming an end-of-stream marker or on stop, so
    /// callers close the queue (or request a stop) first.
    pub async fn join(self) {
        for (id, handle) in self.handles.into_iter().enumerate() {
            if let Err(e) = handle.await {
                warn!(worker = id, error = %e, "worker task ended abnormally");
            }
        }
        debug!("worker pool joined");
    }
}
