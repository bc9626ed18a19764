//! In-memory work queue between the listing crawler and the fetch workers.
//!
//! The queue is a soft-capped FIFO: nothing stops a push, but the crawler
//! consults [`WorkQueue::size`] and [`WorkQueue::wait_below`] to apply
//! backpressure. Workers block in [`WorkQueue::pop`] and receive one
//! [`QueueMessage::EndOfStream`] each at shutdown.
//!
//! # Overview
//!
//! - [`WorkQueue`] - the shared FIFO with start gate and completion tracking
//! - [`WorkItem`] / [`FileReference`] - what flows through it
//! - [`QueueMessage`] - a work item or the end-of-stream marker
//!
//! # Example
//!
//! ```
//! use harvester_core::queue::{FileReference, QueueMessage, WorkItem, WorkQueue};
//!
//! # async fn example() {
//! let queue = WorkQueue::new();
//! queue.push([WorkItem::discovered(FileReference::new("https://x.test/a.pdf", 0, 1))]);
//! queue.open_gate();
//!
//! if let QueueMessage::Work(item) = queue.pop().await {
//!     // ... fetch item.reference() ...
//!     queue.task_done();
//! }
//! queue.wait_until_drained().await;
//! # }
//! ```

mod item;

pub use item::{DatasetId, FileReference, PageNumber, Position, QueueMessage, WorkItem};

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{Notify, watch};
use tracing::{debug, instrument};

/// Shared FIFO of [`QueueMessage`]s.
///
/// Two counts are tracked separately: `size` is the number of work items
/// waiting to be popped, `unfinished` is the number pushed but not yet
/// acknowledged with [`task_done`](Self::task_done). The queue is drained
/// when `unfinished` reaches zero.
#[derive(Debug)]
pub struct WorkQueue {
    items: Mutex<VecDeque<QueueMessage>>,
    available: Notify,
    queued: watch::Sender<usize>,
    unfinished: watch::Sender<usize>,
    gate: watch::Sender<bool>,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    /// Creates an empty queue with a closed start gate.
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Notify::new(),
            queued: watch::Sender::new(0),
            unfinished: watch::Sender::new(0),
            gate: watch::Sender::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<QueueMessage>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends work items in order and returns how many were pushed.
    pub fn push<I>(&self, items: I) -> usize
    where
        I: IntoIterator<Item = WorkItem>,
    {
        let batch: Vec<QueueMessage> = items.into_iter().map(QueueMessage::Work).collect();
        let count = batch.len();
        if count == 0 {
            return 0;
        }

        // Count before publishing so a fast worker can never acknowledge
        // an item that is not yet counted.
        self.unfinished.send_modify(|n| *n += count);
        self.queued.send_modify(|n| *n += count);
        self.lock().extend(batch);

        for _ in 0..count {
            self.available.notify_one();
        }
        debug!(count, size = self.size(), "pushed work items");
        count
    }

    /// Pushes a single alternate candidate found by a worker.
    pub fn push_alternate(&self, item: WorkItem) {
        self.push([item]);
    }

    /// Number of work items waiting to be popped.
    #[must_use]
    pub fn size(&self) -> usize {
        *self.queued.borrow()
    }

    /// Number of work items pushed but not yet acknowledged.
    #[must_use]
    pub fn unfinished(&self) -> usize {
        *self.unfinished.borrow()
    }

    /// Removes the oldest message, waiting until one is available.
    pub async fn pop(&self) -> QueueMessage {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.take_front() {
                return message;
            }
            notified.await;
        }
    }

    fn take_front(&self) -> Option<QueueMessage> {
        let message = self.lock().pop_front()?;
        if matches!(message, QueueMessage::Work(_)) {
            self.queued.send_modify(|n| *n = n.saturating_sub(1));
        }
        Some(message)
    }

    /// Acknowledges that one popped work item has been fully handled.
    ///
    /// Anything the handler pushed (an alternate candidate) must be pushed
    /// before this call so the queue cannot appear drained in between.
    pub fn task_done(&self) {
        self.unfinished.send_modify(|n| *n = n.saturating_sub(1));
    }

    /// Opens the start gate. Idempotent.
    pub fn open_gate(&self) {
        if !self.gate.send_replace(true) {
            debug!(size = self.size(), "start gate opened");
        }
    }

    /// Whether workers may start pulling.
    #[must_use]
    pub fn is_gate_open(&self) -> bool {
        *self.gate.borrow()
    }

    /// Waits until [`open_gate`](Self::open_gate) has been called.
    pub async fn wait_for_gate(&self) {
        let mut rx = self.gate.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|open| *open).await;
    }

    /// Waits until fewer than `limit` work items are waiting.
    pub async fn wait_below(&self, limit: usize) {
        let mut rx = self.queued.subscribe();
        let _ = rx.wait_for(|size| *size < limit).await;
    }

    /// Waits until every pushed work item has been acknowledged.
    pub async fn wait_until_drained(&self) {
        let mut rx = self.unfinished.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Removes every waiting message without processing it.
    ///
    /// Returns the discarded work items in FIFO order; queued end-of-stream
    /// markers are dropped as well.
    #[instrument(skip(self))]
    pub fn drain_pending(&self) -> Vec<WorkItem> {
        let drained: Vec<WorkItem> = self
            .lock()
            .drain(..)
            .filter_map(|message| match message {
                QueueMessage::Work(item) => Some(item),
                QueueMessage::EndOfStream => None,
            })
            .collect();

        let count = drained.len();
        if count > 0 {
            self.queued.send_modify(|n| *n = n.saturating_sub(count));
            self.unfinished.send_modify(|n| *n = n.saturating_sub(count));
            debug!(count, "discarded pending work items");
        }
        drained
    }

    /// Pushes one end-of-stream marker per worker.
    pub fn close(&self, workers: usize) {
        self.lock()
            .extend(std::iter::repeat_n(QueueMessage::EndOfStream, workers));
        for _ in 0..workers {
            self.available.notify_one();
        }
        debug!(workers, "end-of-stream markers pushed");
    }
}
