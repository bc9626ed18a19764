//! Fetching: the shared HTTP client, retry policy, placeholder detection,
//! alternate-extension probing, and the worker pool.
//!
//! # Example
//!
//! ```no_run
//! use harvester_core::HarvestConfig;
//! use harvester_core::download::{HttpClient, RetryPolicy};
//! use harvester_core::context::CounterSet;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HarvestConfig::default();
//! let client = HttpClient::from_config(&config)?;
//! let counters = CounterSet::default();
//! let listing = RetryPolicy::for_pages(&config)
//!     .fetch(&client, &config.listing_url(1, 0), &counters)
//!     .await;
//! println!("fetched: {}", listing.is_some());
//! # Ok(())
//! # }
//! ```

mod alternate;
mod client;
pub mod constants;
mod engine;
mod error;
pub mod filename;
mod placeholder;
mod retry;

pub use alternate::AlternateProbe;
pub use client::{
    ClientTimeouts, DownloadedFile, FetchedResponse, HeadResponse, HttpClient, PART_SUFFIX,
    part_path,
};
pub use engine::{DownloadOutcome, EngineError, FetchWorker, WorkerPool};
pub use error::DownloadError;
pub use placeholder::{ContentCheck, PlaceholderDetector};
pub use retry::{
    Attempted, DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error,
    jittered,
};
