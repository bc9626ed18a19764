//! Listing crawler: the producer side of the pipeline.
//!
//! [`PageCrawler::crawl`] walks one dataset's listing page by page, pushes
//! every discovered file onto the [`WorkQueue`], and checkpoints the next
//! page after each one. The listing has no authoritative last page, so the
//! crawl ends on an empty page or on two consecutive repeats of the same
//! file set.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::config::HarvestConfig;
use crate::context::PipelineContext;
use crate::download::{HttpClient, RetryPolicy, jittered};
use crate::queue::{DatasetId, FileReference, PageNumber, Position, WorkItem, WorkQueue};
use crate::resume::ResumeStateStore;

pub mod listing;

pub use listing::{ListingPage, parse_listing};

/// Random factor floor for the pause between listing pages.
const PAGE_JITTER_FLOOR: f64 = 0.5;

/// Why a dataset crawl stopped early.
#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    /// Every attempt to fetch a listing page failed.
    #[error("dataset {dataset}: listing page {page} failed after all retries")]
    ListingExhausted {
        /// Dataset being crawled.
        dataset: DatasetId,
        /// Page that could not be fetched.
        page: PageNumber,
    },

    /// A listing page answered with a non-retryable, non-success status.
    #[error("dataset {dataset}: listing page {page} returned HTTP {status}")]
    UnexpectedStatus {
        /// Dataset being crawled.
        dataset: DatasetId,
        /// Page that was requested.
        page: PageNumber,
        /// Status received.
        status: u16,
    },
}

/// How a crawl that did not fail came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlEnd {
    /// A page listed no files.
    EmptyPage,
    /// A repeated page was confirmed by a forward probe.
    DuplicateConfirmed,
    /// A stop was requested.
    Interrupted,
}

/// Totals for one dataset crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlSummary {
    /// Pages consumed, fallback pages included.
    pub pages: u32,
    /// Work items pushed.
    pub enqueued: usize,
    /// Why the crawl ended.
    pub end: CrawlEnd,
}

/// Producer that paginates listings into the work queue.
#[derive(Debug)]
pub struct PageCrawler {
    config: Arc<HarvestConfig>,
    client: HttpClient,
    queue: Arc<WorkQueue>,
    ctx: Arc<PipelineContext>,
    store: ResumeStateStore,
    policy: RetryPolicy,
}

impl PageCrawler {
    /// Creates a crawler using the listing retry policy derived from `config`.
    #[must_use]
    pub fn new(
        config: Arc<HarvestConfig>,
        client: HttpClient,
        queue: Arc<WorkQueue>,
        ctx: Arc<PipelineContext>,
        store: ResumeStateStore,
    ) -> Self {
        let policy = RetryPolicy::for_pages(&config);
        Self {
            config,
            client,
            queue,
            ctx,
            store,
            policy,
        }
    }

    /// Crawls `dataset` from `start` until the listing ends or a stop is requested.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError`] when a listing page cannot be fetched; the
    /// checkpoint then still names the failed page.
    #[instrument(skip(self))]
    pub async fn crawl(
        &self,
        dataset: DatasetId,
        start: PageNumber,
    ) -> Result<CrawlSummary, CrawlError> {
        let mut page = start;
        let mut pages = 0;
        let mut enqueued = 0;
        let mut previous: Option<BTreeSet<String>> = None;
        let mut prefetched: Option<ListingPage> = None;

        let end = loop {
            if self.ctx.is_stopping() || !self.wait_for_room().await {
                break CrawlEnd::Interrupted;
            }

            self.ctx.set_location(Position::new(dataset, page));
            let listing = match prefetched.take() {
                Some(listing) => listing,
                None => self.fetch_listing(dataset, page).await?,
            };

            if listing.is_fallback(page) {
                warn!(
                    dataset,
                    page,
                    canonical = ?listing.canonical_page,
                    "fallback listing page, skipping"
                );
                page += 1;
                pages += 1;
                self.store.save(dataset, page);
                self.pause().await;
                continue;
            }

            if listing.files.is_empty() {
                info!(dataset, page, "empty listing page, dataset complete");
                break CrawlEnd::EmptyPage;
            }

            if previous.as_ref() == Some(&listing.files) {
                match self.fetch_listing(dataset, page + 1).await {
                    Ok(next) if next.files == listing.files => {
                        info!(dataset, page, "listing repeats, dataset complete");
                        break CrawlEnd::DuplicateConfirmed;
                    }
                    Ok(next) => {
                        debug!(dataset, page, "repeated page followed by new files");
                        prefetched = Some(next);
                    }
                    Err(e) => debug!(dataset, page, error = %e, "forward probe failed"),
                }
            }

            let pushed = self.queue.push(listing.files.iter().map(|name| {
                WorkItem::discovered(FileReference::new(
                    self.config.file_url(dataset, name),
                    page,
                    dataset,
                ))
            }));
            enqueued += pushed;
            debug!(dataset, page, pushed, size = self.queue.size(), "page enqueued");

            if self.queue.size() >= self.config.warmup() {
                self.queue.open_gate();
            }

            previous = Some(listing.files);
            page += 1;
            pages += 1;
            self.store.save(dataset, page);
            self.pause().await;
        };

        info!(dataset, pages, enqueued, ?end, "dataset crawl finished");
        Ok(CrawlSummary {
            pages,
            enqueued,
            end,
        })
    }

    async fn fetch_listing(
        &self,
        dataset: DatasetId,
        page: PageNumber,
    ) -> Result<ListingPage, CrawlError> {
        let url = self.config.listing_url(dataset, page);
        let Some(response) = self
            .policy
            .fetch(&self.client, &url, self.ctx.counters())
            .await
        else {
            self.ctx.counters().add_error();
            return Err(CrawlError::ListingExhausted { dataset, page });
        };
        if response.status != 200 {
            self.ctx.counters().add_error();
            return Err(CrawlError::UnexpectedStatus {
                dataset,
                page,
                status: response.status,
            });
        }
        Ok(parse_listing(
            &response.text(),
            &self.config.link_path_token,
            &self.config.file_marker,
        ))
    }

    /// Blocks while the queue is above its soft capacity.
    ///
    /// Returns false if a stop was requested while waiting.
    async fn wait_for_room(&self) -> bool {
        let capacity = self.config.soft_capacity();
        if self.queue.size() < capacity {
            return true;
        }
        // A full queue is warm whatever the configured threshold.
        self.queue.open_gate();
        debug!(size = self.queue.size(), capacity, "queue full, waiting");
        tokio::select! {
            () = self.queue.wait_below(capacity) => true,
            () = self.ctx.stop().wait() => false,
        }
    }

    async fn pause(&self) {
        tokio::select! {
            () = tokio::time::sleep(jittered(self.config.page_delay(), PAGE_JITTER_FLOOR)) => {}
            () = self.ctx.stop().wait() => {}
        }
    }
}
