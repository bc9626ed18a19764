//! Crawl checkpoint persistence.
//!
//! The checkpoint is the `(dataset, page)` the crawler should fetch next,
//! stored as `{"last_dataset": int|null, "last_page": int|null}`. Reads
//! never fail and writes are best effort: losing one checkpoint only costs
//! re-crawling one page, and workers skip files that are already complete.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::queue::{DatasetId, PageNumber};

/// Persisted crawl position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeState {
    /// Dataset being crawled when the checkpoint was taken.
    #[serde(default)]
    pub last_dataset: Option<DatasetId>,
    /// Next page to crawl in `last_dataset`.
    #[serde(default)]
    pub last_page: Option<PageNumber>,
}

/// Reads and writes [`ResumeState`] at one path.
#[derive(Debug, Clone)]
pub struct ResumeStateStore {
    path: PathBuf,
}

impl ResumeStateStore {
    /// Creates a store backed by `path`; nothing is read until [`load`](Self::load).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the checkpoint.
    ///
    /// A missing, unreadable, or malformed file yields the empty state.
    #[must_use]
    pub fn load(&self) -> ResumeState {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "cannot read resume state");
                }
                return ResumeState::default();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(state) => {
                debug!(path = %self.path.display(), ?state, "resume state loaded");
                state
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring malformed resume state");
                ResumeState::default()
            }
        }
    }

    /// Records `(dataset, page)` as the next page to crawl.
    ///
    /// The file is replaced atomically. Failures are logged, never returned.
    pub fn save(&self, dataset: DatasetId, page: PageNumber) {
        let state = ResumeState {
            last_dataset: Some(dataset),
            last_page: Some(page),
        };
        match self.write(&state) {
            Ok(()) => debug!(dataset, page, "resume state saved"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "cannot save resume state"),
        }
    }

    fn write(&self, state: &ResumeState) -> std::io::Result<()> {
        let json = serde_json::to_string(state)?;
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)?;

        let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
        temp_file.write_all(json.as_bytes())?;
        temp_file.flush()?;
        temp_file.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Deletes the checkpoint. Returns whether a file was removed.
    ///
    /// A failure to delete is logged and otherwise ignored.
    pub fn reset(&self) -> bool {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "resume state cleared");
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cannot clear resume state");
                false
            }
        }
    }
}

/// Datasets to crawl, in configuration order, each with its start page.
///
/// Datasets before `state.last_dataset` are skipped; that dataset resumes at
/// `state.last_page`; the rest start at page 0. A checkpoint naming a
/// dataset that is no longer configured is ignored.
#[must_use]
pub fn plan(datasets: &[DatasetId], state: &ResumeState) -> Vec<(DatasetId, PageNumber)> {
    let resume_at = state
        .last_dataset
        .and_then(|last| datasets.iter().position(|d| *d == last));

    let Some(index) = resume_at else {
        return datasets.iter().map(|d| (*d, 0)).collect();
    };
    datasets[index..]
        .iter()
        .enumerate()
        .map(|(offset, d)| {
            let page = if offset == 0 {
                state.last_page.unwrap_or(0)
            } else {
                0
            };
            (*d, page)
        })
        .collect()
}
