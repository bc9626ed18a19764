//! Retrying request primitive shared by listing fetches, HEAD probes and
//! file downloads.
//!
//! # Overview
//!
//! Each attempt's outcome is classified into a [`FailureType`] or accepted:
//! - a response with a status in the rate-limit set (`403 429 500 502 503`)
//!   is [`FailureType::RateLimited`]: wait the rate-limit delay, bump the
//!   forbidden counter, try again
//! - no response (network error, timeout), or a `200` whose body is a
//!   stub (too small and carrying no marker token), is
//!   [`FailureType::Transient`]: wait the base delay, try again
//! - any other response is returned to the caller as-is, including
//!   terminal statuses like `404`
//!
//! Exhausting the attempt budget yields `None`. Streamed downloads go
//! through [`RetryPolicy::download`], which classifies the transfer error
//! with [`classify_error`] instead and returns the last error on give-up.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use harvester_core::download::{FailureType, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(20));
//!
//! match policy.should_retry(FailureType::RateLimited, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {}", reason);
//!     }
//! }
//! ```

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::DownloadError;
use super::client::{DownloadedFile, FetchedResponse, HeadResponse, HttpClient};
use super::constants::RATE_LIMIT_STATUSES;
use crate::config::HarvestConfig;
use crate::context::CounterSet;

/// Default maximum attempts.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default cap on a single backoff delay.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Lower bound of the random factor applied to retry delays.
const RETRY_JITTER_FLOOR: f64 = 0.5;

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// No usable response; may succeed on retry.
    Transient,

    /// The server is throttling or refusing us; retry after the rate-limit delay.
    RateLimited,

    /// Retrying cannot help (malformed URL, local misconfiguration).
    Permanent,
}

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// A response the attempt loop knows how to classify.
pub trait Attempted {
    /// HTTP status code.
    fn status(&self) -> u16;

    /// Whether a `200` response carries real content.
    fn has_content(&self, _policy: &RetryPolicy) -> bool {
        true
    }
}

impl Attempted for FetchedResponse {
    fn status(&self) -> u16 {
        self.status
    }

    fn has_content(&self, policy: &RetryPolicy) -> bool {
        self.body.len() > policy.min_body_bytes
            || policy
                .markers
                .iter()
                .any(|marker| contains_bytes(&self.body, marker.as_bytes()))
    }
}

impl Attempted for HeadResponse {
    fn status(&self) -> u16 {
        self.status
    }
}

/// Retry budget and delays.
///
/// # Delay Calculation
///
/// ```text
/// transient    = min(base_delay * multiplier^(attempt-1), max_delay) * (0.5 + rand)
/// rate-limited = rate_limit_delay * (0.5 + rand)
/// ```
///
/// The multiplier defaults to 1.0, so transient delays stay flat unless
/// configured otherwise.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Delay after a transient failure.
    base_delay: Duration,

    /// Delay after a rate-limit status.
    rate_limit_delay: Duration,

    /// Maximum delay cap.
    max_delay: Duration,

    /// Multiplier applied each attempt.
    backoff_multiplier: f64,

    /// A `200` body at or below this size needs a marker to count.
    min_body_bytes: usize,

    /// Tokens that make a small `200` body acceptable.
    markers: Vec<String>,
}

impl RetryPolicy {
    /// Creates a policy with flat delays and no body check.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, rate_limit_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            rate_limit_delay,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: 1.0,
            min_body_bytes: 0,
            markers: Vec::new(),
        }
    }

    /// Policy for listing pages: base delay is `timeBetweenPages`, small
    /// bodies must carry the file marker or placeholder signature.
    #[must_use]
    pub fn for_pages(config: &HarvestConfig) -> Self {
        Self::new(config.fetch_retries, config.page_delay(), config.rate_limit_delay())
            .with_body_check(
                config.min_listing_bytes,
                [config.file_marker.clone(), config.placeholder_signature.clone()],
            )
    }

    /// Policy for per-file HEAD checks and downloads: base delay is `timeBetweenFiles`.
    #[must_use]
    pub fn for_files(config: &HarvestConfig) -> Self {
        Self::new(config.fetch_retries, config.file_delay(), config.rate_limit_delay())
    }

    /// Grows transient delays by `multiplier` per attempt, capped at `max_delay`.
    #[must_use]
    pub fn with_backoff(mut self, multiplier: f64, max_delay: Duration) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self.max_delay = max_delay;
        self
    }

    /// Treats a `200` body of at most `min_bytes` without any of `markers` as a stub.
    #[must_use]
    pub fn with_body_check<I, S>(mut self, min_bytes: usize, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.min_body_bytes = min_bytes;
        self.markers = markers
            .into_iter()
            .map(Into::into)
            .filter(|m: &String| !m.is_empty())
            .collect();
        self
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Determines whether to retry after attempt number `attempt` failed.
    #[instrument(level = "trace", skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = match failure_type {
            FailureType::RateLimited => jittered(self.rate_limit_delay, RETRY_JITTER_FLOOR),
            _ => jittered(self.calculate_delay(attempt), RETRY_JITTER_FLOOR),
        };

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Un-jittered transient delay before attempt `attempt + 1`.
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }

    /// Classifies a received response; `None` means hand it to the caller.
    pub fn classify<R: Attempted>(&self, response: &R) -> Option<FailureType> {
        let status = response.status();
        if RATE_LIMIT_STATUSES.contains(&status) {
            return Some(FailureType::RateLimited);
        }
        if status == 200 && !response.has_content(self) {
            return Some(FailureType::Transient);
        }
        None
    }

    /// GETs `url` under this policy.
    ///
    /// Returns `None` once the attempt budget is exhausted.
    #[instrument(skip(self, client, counters))]
    pub async fn fetch(
        &self,
        client: &HttpClient,
        url: &str,
        counters: &CounterSet,
    ) -> Option<FetchedResponse> {
        self.execute(url, counters, || client.get_page(url)).await
    }

    /// HEADs `url` under this policy.
    ///
    /// Returns `None` once the attempt budget is exhausted.
    #[instrument(skip(self, client, counters))]
    pub async fn head(
        &self,
        client: &HttpClient,
        url: &str,
        counters: &CounterSet,
    ) -> Option<HeadResponse> {
        self.execute(url, counters, || client.head(url)).await
    }

    /// Streams `url` into `dest` under this policy.
    ///
    /// Rate-limit statuses bump the forbidden counter and wait the rate-limit
    /// delay; network errors and timeouts wait the base delay. Other statuses
    /// (`404`) and local IO errors are not retried.
    ///
    /// # Errors
    ///
    /// Returns the last attempt's error once the budget is exhausted or the
    /// failure is permanent.
    #[instrument(skip(self, client, counters, on_progress), fields(dest = %dest.display()))]
    pub async fn download<F>(
        &self,
        client: &HttpClient,
        url: &str,
        dest: &Path,
        counters: &CounterSet,
        mut on_progress: F,
    ) -> Result<DownloadedFile, DownloadError>
    where
        F: FnMut(u64, Option<u64>),
    {
        let mut attempt = 1;
        loop {
            let error = match client.download_to_path(url, dest, &mut on_progress).await {
                Ok(downloaded) => return Ok(downloaded),
                Err(e) => e,
            };
            let failure = classify_error(&error);
            debug!(url, attempt, error = %error, ?failure, "download attempt failed");
            if failure == FailureType::RateLimited {
                counters.add_forbidden();
            }

            match self.should_retry(failure, attempt) {
                RetryDecision::Retry { delay, attempt: next } => {
                    tokio::time::sleep(delay).await;
                    attempt = next;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(url, %reason, "giving up");
                    return Err(error);
                }
            }
        }
    }

    async fn execute<R, F, Fut>(&self, url: &str, counters: &CounterSet, mut send: F) -> Option<R>
    where
        R: Attempted,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, DownloadError>>,
    {
        for attempt in 1..=self.max_attempts {
            let failure = match send().await {
                Ok(response) => match self.classify(&response) {
                    None => return Some(response),
                    Some(failure) => {
                        debug!(url, attempt, status = response.status(), ?failure, "attempt rejected");
                        failure
                    }
                },
                Err(e) => {
                    debug!(url, attempt, error = %e, "attempt failed");
                    classify_error(&e)
                }
            };

            if failure == FailureType::RateLimited {
                counters.add_forbidden();
            }

            match self.should_retry(failure, attempt) {
                RetryDecision::Retry { delay, .. } => tokio::time::sleep(delay).await,
                RetryDecision::DoNotRetry { reason } => {
                    debug!(url, %reason, "giving up");
                    break;
                }
            }
        }
        None
    }
}

/// Classifies a request error for retry decisions.
#[must_use]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::Network { .. } | DownloadError::Timeout { .. } => FailureType::Transient,
        DownloadError::HttpStatus { status, .. } if RATE_LIMIT_STATUSES.contains(status) => {
            FailureType::RateLimited
        }
        DownloadError::HttpStatus { .. }
        | DownloadError::Io { .. }
        | DownloadError::InvalidUrl { .. }
        | DownloadError::Build { .. }
        | DownloadError::InvalidHeader { .. } => FailureType::Permanent,
    }
}

/// Scales `base` by a random factor in `[floor, floor + 1)`.
///
/// Used for every inter-request pause so request timing is not regular.
#[must_use]
pub fn jittered(base: Duration, floor: f64) -> Duration {
    let factor = floor + rand::thread_rng().gen_range(0.0..1.0);
    base.mul_f64(factor.max(0.0))
}

fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle)
}
