//! Run configuration loaded from a TOML file.
//!
//! Every key is optional; missing keys take the defaults below. A missing
//! file is not an error: defaults are used and written back so users can
//! discover every option. A present but malformed file is a hard error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::download::constants::{
    CONNECT_TIMEOUT_SECS, HEAD_TIMEOUT_SECS, NOT_FOUND_MARKER, PLACEHOLDER_SIGNATURE,
    PLACEHOLDER_SIZE, READ_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS,
};
use crate::queue::{DatasetId, PageNumber};
use crate::user_agent::default_browser_headers;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Upper bound on the worker pool size.
pub const MAX_WORKERS: usize = 100;

const DATASET_PLACEHOLDER: &str = "{dataset}";
const PAGE_PLACEHOLDER: &str = "{page}";
const FILENAME_PLACEHOLDER: &str = "{filename}";

/// Alternate extensions in probe order.
const DEFAULT_ALTERNATE_EXTENSIONS: &[&str] = &[
    ".avi", ".mp4", ".mov", ".m4a", ".m4v", ".opus", ".wav", ".docx", ".vob", ".wmv", ".mp3",
    ".amr", ".doc", ".3gp", ".ts", ".xls", ".db", ".pluginpayloadattachment", ".txt", ".csv",
    ".json", ".xml", ".log", ".sql", ".bak", ".zip", ".rar", ".7z", ".tar", ".gz", ".exe",
    ".dll", ".bin", ".iso", ".html", ".htm", ".jpg", ".jpeg", ".png", ".eml", ".cfg", ".xlsx",
    ".pptx",
];

/// Errors raised while reading, validating, or writing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`HarvestConfig`].
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range or inconsistent.
    #[error("invalid config value for {key}: {reason}")]
    Invalid {
        /// Offending key (camelCase, as written in the file).
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The config could not be written back.
    #[error("failed to write config {path}: {reason}")]
    Write {
        /// Config file path.
        path: PathBuf,
        /// Serialization or IO error text.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// A cookie pre-seeded into the session's cookie jar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieSpec {
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: String,
    /// Host the cookie is sent to.
    pub domain: String,
}

impl CookieSpec {
    /// Origin URL the cookie is registered against.
    #[must_use]
    pub fn origin(&self) -> String {
        format!("https://{}/", self.domain)
    }

    /// `Set-Cookie` style string for the cookie jar, host-only on [`origin`](Self::origin).
    #[must_use]
    pub fn header_value(&self) -> String {
        format!("{}={}; Path=/", self.name, self.value)
    }
}

/// Full run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HarvestConfig {
    /// Output root; files land in `{directory}/Dataset {id}/`.
    pub directory: PathBuf,
    /// Attempts per request before giving up.
    pub fetch_retries: u32,
    /// Base inter-page delay in milliseconds.
    pub time_between_pages: u64,
    /// Base inter-file delay in milliseconds.
    pub time_between_files: u64,
    /// Delay after a rate-limit status, in milliseconds.
    #[serde(rename = "timeBetween403")]
    pub time_between_403: u64,
    /// Number of fetch workers.
    pub download_workers: usize,
    /// Queue soft capacity.
    pub pool_size: usize,
    /// Datasets to crawl, in order.
    pub datasets: Vec<DatasetId>,
    /// Listing URL with `{dataset}` and `{page}` placeholders.
    pub listing_url_template: String,
    /// File URL with `{dataset}` and `{filename}` placeholders.
    pub file_url_template: String,
    /// Path fragment an anchor's href must contain to count as a file link.
    pub link_path_token: String,
    /// Token a file link must contain; also accepted as a listing body marker.
    pub file_marker: String,
    /// A listing body at or below this size is treated as a stub and retried.
    pub min_listing_bytes: usize,
    /// Extra slack above `poolSize` before the crawler blocks.
    pub backpressure_headroom: usize,
    /// Queue size that opens the start gate. Defaults to `poolSize`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warmup_threshold: Option<usize>,
    /// Resume checkpoint path.
    pub state_file: PathBuf,
    /// Directory for the plain-text event logs.
    pub log_directory: PathBuf,
    /// Listing fetch timeout in seconds.
    pub request_timeout_secs: u64,
    /// HEAD probe timeout in seconds.
    pub head_timeout_secs: u64,
    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Read timeout for file downloads in seconds.
    pub read_timeout_secs: u64,
    /// Pause before retrying a rate-limited alternate candidate, in milliseconds.
    pub alternate_cooldown: u64,
    /// Alternate extensions in probe order, each with a leading dot.
    pub alternate_extensions: Vec<String>,
    /// Generator string identifying stand-in PDFs.
    pub placeholder_signature: String,
    /// Typical stand-in PDF size in bytes.
    pub placeholder_size: u64,
    /// Text that marks a downloaded body as the site's not-found page.
    pub not_found_marker: String,
    /// Static headers sent with every request.
    pub headers: BTreeMap<String, String>,
    /// Cookies pre-seeded into the session.
    pub cookies: Vec<CookieSpec>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            fetch_retries: 5,
            time_between_pages: 100,
            time_between_files: 100,
            time_between_403: 20,
            download_workers: 10,
            pool_size: 450,
            datasets: vec![1, 2, 3, 4],
            listing_url_template:
                "https://www.justice.gov/epstein/doj-disclosures/data-set-{dataset}-files?page={page}"
                    .to_string(),
            file_url_template: "https://www.justice.gov/epstein/files/DataSet%20{dataset}/{filename}"
                .to_string(),
            link_path_token: "/epstein/files/".to_string(),
            file_marker: "EFTA".to_string(),
            min_listing_bytes: 200,
            backpressure_headroom: 20,
            warmup_threshold: None,
            state_file: PathBuf::from("scraper_state.json"),
            log_directory: PathBuf::from("logs"),
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
            head_timeout_secs: HEAD_TIMEOUT_SECS,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
            alternate_cooldown: 500,
            alternate_extensions: DEFAULT_ALTERNATE_EXTENSIONS
                .iter()
                .map(|ext| (*ext).to_string())
                .collect(),
            placeholder_signature: PLACEHOLDER_SIGNATURE.to_string(),
            placeholder_size: PLACEHOLDER_SIZE,
            not_found_marker: NOT_FOUND_MARKER.to_string(),
            headers: default_browser_headers(),
            cookies: vec![CookieSpec {
                name: "justiceGovAgeVerified".to_string(),
                value: "true".to_string(),
                domain: "www.justice.gov".to_string(),
            }],
        }
    }
}

/// A config plus where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The parsed (or default) configuration.
    pub config: HarvestConfig,
    /// Whether the file existed.
    pub from_file: bool,
}

impl HarvestConfig {
    /// Loads `path`, or returns defaults if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file exists but cannot be read,
    /// and [`ConfigError::Parse`] if it is not valid TOML.
    pub fn load_or_default(path: &Path) -> Result<LoadedConfig, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                return Ok(LoadedConfig {
                    config: Self::default(),
                    from_file: false,
                });
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let config = Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "loaded config");
        Ok(LoadedConfig {
            config,
            from_file: true,
        })
    }

    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns the TOML deserialization error on malformed input.
    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Writes this config to `path` as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Write`] on serialization or IO failure.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |reason: String| ConfigError::Write {
            path: path.to_path_buf(),
            reason,
        };
        let rendered = toml::to_string_pretty(self).map_err(|e| write_err(e.to_string()))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
        }
        std::fs::write(path, rendered).map_err(|e| write_err(e.to_string()))
    }

    /// Checks ranges and template placeholders.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.download_workers == 0 || self.download_workers > MAX_WORKERS {
            return Err(ConfigError::invalid(
                "downloadWorkers",
                format!("must be between 1 and {MAX_WORKERS}, got {}", self.download_workers),
            ));
        }
        if self.fetch_retries == 0 {
            return Err(ConfigError::invalid("fetchRetries", "must be at least 1"));
        }
        if self.pool_size == 0 {
            return Err(ConfigError::invalid("poolSize", "must be at least 1"));
        }
        if self.datasets.is_empty() {
            return Err(ConfigError::invalid("datasets", "must list at least one dataset"));
        }
        for placeholder in [DATASET_PLACEHOLDER, PAGE_PLACEHOLDER] {
            if !self.listing_url_template.contains(placeholder) {
                return Err(ConfigError::invalid(
                    "listingUrlTemplate",
                    format!("missing {placeholder} placeholder"),
                ));
            }
        }
        for placeholder in [DATASET_PLACEHOLDER, FILENAME_PLACEHOLDER] {
            if !self.file_url_template.contains(placeholder) {
                return Err(ConfigError::invalid(
                    "fileUrlTemplate",
                    format!("missing {placeholder} placeholder"),
                ));
            }
        }
        if let Some(ext) = self
            .alternate_extensions
            .iter()
            .find(|ext| !ext.starts_with('.') || ext.len() < 2)
        {
            return Err(ConfigError::invalid(
                "alternateExtensions",
                format!("{ext:?} must start with a dot"),
            ));
        }
        Ok(())
    }

    /// Listing URL for `page` of `dataset`.
    #[must_use]
    pub fn listing_url(&self, dataset: DatasetId, page: PageNumber) -> String {
        self.listing_url_template
            .replace(DATASET_PLACEHOLDER, &dataset.to_string())
            .replace(PAGE_PLACEHOLDER, &page.to_string())
    }

    /// File URL for `filename` in `dataset`.
    #[must_use]
    pub fn file_url(&self, dataset: DatasetId, filename: &str) -> String {
        self.file_url_template
            .replace(DATASET_PLACEHOLDER, &dataset.to_string())
            .replace(FILENAME_PLACEHOLDER, filename)
    }

    /// Output directory for one dataset.
    #[must_use]
    pub fn dataset_dir(&self, dataset: DatasetId) -> PathBuf {
        self.directory.join(format!("Dataset {dataset}"))
    }

    /// Queue size that opens the start gate.
    #[must_use]
    pub fn warmup(&self) -> usize {
        self.warmup_threshold.unwrap_or(self.pool_size)
    }

    /// Queue size at which the crawler stops and waits.
    #[must_use]
    pub fn soft_capacity(&self) -> usize {
        self.pool_size.saturating_add(self.backpressure_headroom)
    }

    /// Base inter-page delay.
    #[must_use]
    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.time_between_pages)
    }

    /// Base inter-file delay.
    #[must_use]
    pub fn file_delay(&self) -> Duration {
        Duration::from_millis(self.time_between_files)
    }

    /// Delay after a rate-limit status.
    #[must_use]
    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.time_between_403)
    }

    /// Pause before retrying a rate-limited alternate candidate.
    #[must_use]
    pub fn alternate_cooldown(&self) -> Duration {
        Duration::from_millis(self.alternate_cooldown)
    }

    /// Path of the failure event log.
    #[must_use]
    pub fn failure_log_path(&self) -> PathBuf {
        self.log_directory.join("failed_downloads.log")
    }

    /// Path of the unknown-alternate event log.
    #[must_use]
    pub fn unknown_alternate_log_path(&self) -> PathBuf {
        self.log_directory.join("unknown_alternates.log")
    }
}
