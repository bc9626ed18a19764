//! Terminal status display: a header line plus one byte bar per worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::context::{Counters, PipelineContext};
use crate::queue::{Position, WorkQueue};

const HEADER_REFRESH: Duration = Duration::from_millis(200);

/// Owner of every progress bar for one run.
#[derive(Debug, Clone)]
pub struct ProgressBoard {
    multi: MultiProgress,
    header: ProgressBar,
}

impl ProgressBoard {
    /// Creates a board drawing to stderr, or a hidden one when `enabled` is false.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        let target = if enabled {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        let multi = MultiProgress::with_draw_target(target);
        let header = multi.add(ProgressBar::new_spinner());
        header.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        Self { multi, header }
    }

    /// A board that never draws.
    #[must_use]
    pub fn hidden() -> Self {
        Self::new(false)
    }

    /// Adds the byte bar for worker `id`.
    #[must_use]
    pub fn worker_bar(&self, id: usize) -> WorkerProgress {
        let bar = self.multi.add(ProgressBar::new(0));
        bar.set_style(
            ProgressStyle::with_template(
                "{msg:40!} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} {eta}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
        );
        bar.set_message(format!("W{id}: idle"));
        WorkerProgress { bar, id }
    }

    /// Spawns the header refresh task.
    ///
    /// Returns (handle, stop) so the caller can signal stop and await the handle.
    pub fn spawn_header(
        &self,
        ctx: Arc<PipelineContext>,
        queue: Arc<WorkQueue>,
    ) -> (tokio::task::JoinHandle<()>, Arc<AtomicBool>) {
        let stop = Arc::new(AtomicBool::new(false));
        let header = self.header.clone();
        let flag = Arc::clone(&stop);
        let handle = tokio::spawn(async move {
            header.enable_steady_tick(Duration::from_millis(100));
            while !flag.load(Ordering::SeqCst) {
                header.set_message(header_text(
                    ctx.counters().snapshot(),
                    ctx.location(),
                    queue.size(),
                ));
                tokio::time::sleep(HEADER_REFRESH).await;
            }
            header.finish_with_message(header_text(
                ctx.counters().snapshot(),
                ctx.location(),
                queue.size(),
            ));
        });
        (handle, stop)
    }

    /// Clears all bars from the terminal.
    pub fn clear(&self) {
        let _ = self.multi.clear();
    }
}

/// Renders the status header line.
#[must_use]
pub fn header_text(counters: Counters, location: Option<Position>, pool_size: usize) -> String {
    let (dataset, page) = location.map_or_else(
        || ("-".to_string(), "-".to_string()),
        |p| (p.dataset.to_string(), p.page.to_string()),
    );
    format!(
        "Dataset {dataset} | Page {page} | Files Downloaded: {} | Pool Size: {pool_size} | \
         Forbiddens: {} | Errors: {} | Alternates: {} | Unknown Alternates: {}",
        counters.downloads,
        counters.forbidden,
        counters.errors,
        counters.alternates_found,
        counters.alternates_exhausted,
    )
}

/// One worker's byte bar.
#[derive(Debug, Clone)]
pub struct WorkerProgress {
    bar: ProgressBar,
    id: usize,
}

impl WorkerProgress {
    /// A bar that never draws, for tests and headless runs.
    #[must_use]
    pub fn hidden(id: usize) -> Self {
        Self {
            bar: ProgressBar::hidden(),
            id,
        }
    }

    /// Resets the bar for a new file.
    pub fn start(&self, filename: &str) {
        self.bar.reset();
        self.bar.set_length(0);
        self.bar.set_message(format!("W{}: {filename}", self.id));
    }

    /// Updates bytes written and the advertised total.
    pub fn update(&self, written: u64, total: Option<u64>) {
        if let Some(total) = total {
            self.bar.set_length(total);
        }
        self.bar.set_position(written);
    }

    /// Marks the current file complete (or skipped) at `bytes`.
    pub fn complete(&self, filename: &str, bytes: u64) {
        self.bar.set_length(bytes);
        self.bar.set_position(bytes);
        self.bar.set_message(format!("W{}: {filename} done", self.id));
    }

    /// Marks the current file failed.
    pub fn failed(&self, filename: &str) {
        self.bar.set_message(format!("W{}: {filename} failed", self.id));
    }

    /// Removes the bar once the worker exits.
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}
