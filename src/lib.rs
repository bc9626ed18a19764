//! Harvester Core Library
//!
//! Crawls paginated document listings and downloads every linked file,
//! resuming from a per-page checkpoint after interruption.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`crawler`] - Listing pagination, parsing, and end-of-listing detection
//! - [`queue`] - Work queue with start gate and end-of-stream markers
//! - [`download`] - HTTP client, retry policy, placeholder recovery, worker pool
//! - [`resume`] - Crawl checkpoint persistence
//! - [`pipeline`] - One complete run wiring the pieces together
//! - [`config`] - TOML configuration
//! - [`context`] - Per-run counters and stop signal
//! - [`events`] - Append-only failure logs
//! - [`progress`] - Terminal status display

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod context;
pub mod crawler;
pub mod download;
pub mod events;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod resume;
pub mod user_agent;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use config::{ConfigError, DEFAULT_CONFIG_FILE, HarvestConfig, LoadedConfig};
pub use context::{Counters, PipelineContext, StopSignal};
pub use crawler::{CrawlEnd, CrawlError, CrawlSummary, PageCrawler};
pub use download::{
    AlternateProbe, DownloadError, DownloadOutcome, EngineError, FetchWorker, HttpClient,
    PlaceholderDetector, RetryPolicy, WorkerPool,
};
pub use events::EventLog;
pub use pipeline::{PipelineError, RunSummary};
pub use progress::ProgressBoard;
pub use queue::{DatasetId, FileReference, PageNumber, Position, QueueMessage, WorkItem, WorkQueue};
pub use resume::{ResumeState, ResumeStateStore};
