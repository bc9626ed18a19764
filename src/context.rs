//! Per-run shared state: counters, stop signal, crawl location, failure
//! summary, and positions held back from the checkpoint.
//!
//! One [`PipelineContext`] is created per run and shared by the crawler,
//! the workers, and the progress display. Nothing here is global, so tests
//! get a fresh context each.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::info;

use crate::events::EventLog;
use crate::queue::{DatasetId, FileReference, Position};

/// Point-in-time copy of the run counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Files downloaded or skipped as already complete.
    pub downloads: u64,
    /// Rate-limit / forbidden responses seen.
    pub forbidden: u64,
    /// Terminal failures (items and listing pages).
    pub errors: u64,
    /// Placeholders for which an alternate was found.
    pub alternates_found: u64,
    /// Placeholders for which every alternate missed.
    pub alternates_exhausted: u64,
}

/// Monotonic counters behind one lock.
#[derive(Debug, Default)]
pub struct CounterSet {
    inner: Mutex<Counters>,
}

impl CounterSet {
    fn update(&self, f: impl FnOnce(&mut Counters)) {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
    }

    /// Current values.
    #[must_use]
    pub fn snapshot(&self) -> Counters {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Counts a downloaded or already-complete file.
    pub fn add_download(&self) {
        self.update(|c| c.downloads += 1);
    }

    /// Counts a rate-limit or forbidden response.
    pub fn add_forbidden(&self) {
        self.update(|c| c.forbidden += 1);
    }

    /// Counts a terminal failure.
    pub fn add_error(&self) {
        self.update(|c| c.errors += 1);
    }

    /// Counts a placeholder whose alternate was queued.
    pub fn add_alternate_found(&self) {
        self.update(|c| c.alternates_found += 1);
    }

    /// Counts a placeholder with no working alternate.
    pub fn add_alternate_exhausted(&self) {
        self.update(|c| c.alternates_exhausted += 1);
    }
}

/// Cooperative stop request shared by every task.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    /// Requests a stop. Wakes every waiter exactly once.
    pub fn request(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// Whether a stop has been requested.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Waits until a stop is requested. Returns immediately if already set.
    pub async fn wait(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // register before checking so a concurrent request is not missed
        notified.as_mut().enable();
        if self.is_requested() {
            return;
        }
        notified.await;
    }
}

/// Shared state for one pipeline run.
#[derive(Debug)]
pub struct PipelineContext {
    counters: CounterSet,
    stop: StopSignal,
    location: Mutex<Option<Position>>,
    failures: Mutex<BTreeMap<DatasetId, Vec<String>>>,
    unsettled: Mutex<Vec<Position>>,
    events: EventLog,
}

impl PipelineContext {
    /// Creates a fresh context writing events to `events`.
    #[must_use]
    pub fn new(events: EventLog) -> Self {
        Self {
            counters: CounterSet::default(),
            stop: StopSignal::default(),
            location: Mutex::new(None),
            failures: Mutex::new(BTreeMap::new()),
            unsettled: Mutex::new(Vec::new()),
            events,
        }
    }

    /// Run counters.
    #[must_use]
    pub fn counters(&self) -> &CounterSet {
        &self.counters
    }

    /// Stop signal.
    #[must_use]
    pub fn stop(&self) -> &StopSignal {
        &self.stop
    }

    /// Event log.
    #[must_use]
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Asks every task to wind down at its next checkpoint.
    pub fn request_stop(&self) {
        if !self.stop.is_requested() {
            info!("stop requested, finishing in-flight work");
        }
        self.stop.request();
    }

    /// Whether a stop has been requested.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.stop.is_requested()
    }

    /// Records the page the crawler is currently on.
    pub fn set_location(&self, position: Position) {
        *lock(&self.location) = Some(position);
    }

    /// The page the crawler last started, if any.
    #[must_use]
    pub fn location(&self) -> Option<Position> {
        *lock(&self.location)
    }

    /// Adds a failed file's basename to its dataset's summary.
    pub fn record_failed(&self, reference: &FileReference) {
        lock(&self.failures)
            .entry(reference.dataset())
            .or_default()
            .push(reference.basename());
    }

    /// Failed basenames grouped by dataset.
    #[must_use]
    pub fn failures(&self) -> BTreeMap<DatasetId, Vec<String>> {
        lock(&self.failures).clone()
    }

    /// Marks `position` as holding a file whose handling a stop cut short.
    ///
    /// The run rewinds its checkpoint to the earliest such position so the
    /// page is crawled again.
    pub fn record_unsettled(&self, position: Position) {
        lock(&self.unsettled).push(position);
    }

    /// Positions recorded with [`Self::record_unsettled`].
    #[must_use]
    pub fn unsettled(&self) -> Vec<Position> {
        lock(&self.unsettled).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use tempfile::TempDir;

    fn context(temp: &TempDir) -> PipelineContext {
        PipelineContext::new(EventLog::in_directory(temp.path()))
    }

    #[test]
    fn test_counters_increment_independently() {
        let counters = CounterSet::default();
        counters.add_download();
        counters.add_download();
        counters.add_forbidden();
        counters.add_alternate_found();
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.downloads, 2);
        assert_eq!(snapshot.forbidden, 1);
        assert_eq!(snapshot.errors, 0);
        assert_eq!(snapshot.alternates_found, 1);
        assert_eq!(snapshot.alternates_exhausted, 0);
    }

    #[tokio::test]
    async fn test_stop_signal_wakes_waiter() {
        let signal = Arc::new(StopSignal::default());
        let waiter = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        signal.request();
        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_stop_signal_wait_returns_when_already_set() {
        let signal = StopSignal::default();
        signal.request();
        tokio::time::timeout(Duration::from_millis(100), signal.wait())
            .await
            .unwrap();
    }

    #[test]
    fn test_failures_grouped_by_dataset() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp);
        ctx.record_failed(&FileReference::new("https://x.test/a/EFTA1.pdf", 0, 2));
        ctx.record_failed(&FileReference::new("https://x.test/a/EFTA2.pdf", 1, 2));
        ctx.record_failed(&FileReference::new("https://x.test/b/EFTA3.pdf", 0, 1));

        let failures = ctx.failures();
        assert_eq!(failures[&1], vec!["EFTA3.pdf"]);
        assert_eq!(failures[&2], vec!["EFTA1.pdf", "EFTA2.pdf"]);
    }

    #[test]
    fn test_unsettled_positions_are_kept_in_order() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp);
        assert!(ctx.unsettled().is_empty());
        ctx.record_unsettled(Position::new(2, 8));
        ctx.record_unsettled(Position::new(2, 3));
        assert_eq!(
            ctx.unsettled(),
            vec![Position::new(2, 8), Position::new(2, 3)]
        );
    }

    #[test]
    fn test_location_tracks_latest_page() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp);
        assert_eq!(ctx.location(), None);
        ctx.set_location(Position::new(3, 4));
        ctx.set_location(Position::new(3, 5));
        assert_eq!(ctx.location(), Some(Position::new(3, 5)));
    }
}
