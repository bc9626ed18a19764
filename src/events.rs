//! Append-only plain-text event logs.
//!
//! Two streams are kept: per-item download failures, and placeholder
//! downloads for which no alternate extension was found. Lines are written
//! under one lock so concurrent workers never interleave partial lines.
//! A failed append is reported through `tracing` and otherwise ignored.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::Local;
use tracing::warn;

use crate::queue::FileReference;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Writer for the failure and unknown-alternate logs.
#[derive(Debug)]
pub struct EventLog {
    failures: PathBuf,
    unknown_alternates: PathBuf,
    lock: Mutex<()>,
}

impl EventLog {
    /// Creates a log writing to the two given files. Parent directories are
    /// created lazily on first write.
    pub fn new(failures: impl Into<PathBuf>, unknown_alternates: impl Into<PathBuf>) -> Self {
        Self {
            failures: failures.into(),
            unknown_alternates: unknown_alternates.into(),
            lock: Mutex::new(()),
        }
    }

    /// Creates a log with the standard file names inside `dir`.
    pub fn in_directory(dir: &Path) -> Self {
        Self::new(
            dir.join("failed_downloads.log"),
            dir.join("unknown_alternates.log"),
        )
    }

    /// Path of the failure log.
    #[must_use]
    pub fn failures_path(&self) -> &Path {
        &self.failures
    }

    /// Path of the unknown-alternate log.
    #[must_use]
    pub fn unknown_alternates_path(&self) -> &Path {
        &self.unknown_alternates
    }

    /// Records a failed download.
    pub fn record_failure(&self, reference: &FileReference, kind: &str, detail: &str) {
        let line = failure_line(&timestamp(), reference, kind, detail);
        warn!(
            dataset = reference.dataset(),
            page = reference.page(),
            url = reference.url(),
            kind,
            detail,
            "download failed"
        );
        self.append(&self.failures, &line);
    }

    /// Records a placeholder download with no working alternate.
    pub fn record_unknown_alternate(&self, reference: &FileReference) {
        let line = unknown_alternate_line(&timestamp(), reference);
        warn!(
            dataset = reference.dataset(),
            page = reference.page(),
            url = reference.url(),
            "no alternate found for placeholder download"
        );
        self.append(&self.unknown_alternates, &line);
    }

    fn append(&self, path: &Path, line: &str) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = append_line(path, line) {
            warn!(path = %path.display(), error = %e, "failed to append event log line");
        }
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}

fn timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Formats one failure log line.
#[must_use]
pub fn failure_line(timestamp: &str, reference: &FileReference, kind: &str, detail: &str) -> String {
    // keep each event on one line
    let detail = detail.replace(['\n', '\r'], " ");
    format!(
        "{timestamp} | Dataset {} | Page {} | {} | {kind} | {detail}",
        reference.dataset(),
        reference.page(),
        reference.url()
    )
}

/// Formats one unknown-alternate log line.
#[must_use]
pub fn unknown_alternate_line(timestamp: &str, reference: &FileReference) -> String {
    format!(
        "{timestamp} | Dataset {} | Page {} | {}",
        reference.dataset(),
        reference.page(),
        reference.url()
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn reference() -> FileReference {
        FileReference::new("https://x.test/DataSet%203/EFTA42.pdf", 7, 3)
    }

    #[test]
    fn test_failure_line_format() {
        let line = failure_line("2026-01-02 03:04:05", &reference(), "Timeout", "timed out");
        assert_eq!(
            line,
            "2026-01-02 03:04:05 | Dataset 3 | Page 7 | https://x.test/DataSet%203/EFTA42.pdf | Timeout | timed out"
        );
    }

    #[test]
    fn test_failure_line_flattens_multiline_detail() {
        let line = failure_line("t", &reference(), "IoError", "first\nsecond");
        assert!(line.ends_with("| IoError | first second"));
    }

    #[test]
    fn test_unknown_alternate_line_format() {
        assert_eq!(
            unknown_alternate_line("t", &reference()),
            "t | Dataset 3 | Page 7 | https://x.test/DataSet%203/EFTA42.pdf"
        );
    }

    #[test]
    fn test_records_append_to_separate_files() {
        let temp = TempDir::new().unwrap();
        let log = EventLog::in_directory(&temp.path().join("logs"));

        log.record_failure(&reference(), "HttpStatusError", "HTTP 404");
        log.record_failure(&reference(), "Timeout", "slow");
        log.record_unknown_alternate(&reference());

        let failures = std::fs::read_to_string(log.failures_path()).unwrap();
        assert_eq!(failures.lines().count(), 2);
        assert!(failures.contains("| HttpStatusError | HTTP 404"));

        let unknown = std::fs::read_to_string(log.unknown_alternates_path()).unwrap();
        assert_eq!(unknown.lines().count(), 1);
        assert!(unknown.trim_end().ends_with("| Page 7 | https://x.test/DataSet%203/EFTA42.pdf"));
    }
}
