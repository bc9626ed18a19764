//! Detection of stand-in content served in place of the real file.
//!
//! The host renders "no images produced" stubs as small valid PDFs whose
//! header carries a fixed generator string, and answers some missing files
//! with its HTML not-found page under a `200`. Both downloads succeed at the
//! transport level but are not the wanted content.

use std::path::Path;

use tokio::io::AsyncReadExt;

use super::constants::{
    NOT_FOUND_MARKER, NOT_FOUND_PROBE_BYTES, PDF_MAGIC, PLACEHOLDER_PROBE_BYTES,
    PLACEHOLDER_SIGNATURE, PLACEHOLDER_SIZE, PLACEHOLDER_SIZE_TOLERANCE,
};
use crate::config::HarvestConfig;

/// What a downloaded file turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCheck {
    /// Nothing suspicious; keep it.
    Genuine,
    /// A stand-in PDF; worth probing other extensions.
    Placeholder,
    /// The site's not-found page; the file does not exist under this URL.
    NotFound,
}

/// Recognizes placeholder documents by content and by size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderDetector {
    signature: Vec<u8>,
    typical_size: u64,
    not_found_marker: Vec<u8>,
}

impl Default for PlaceholderDetector {
    fn default() -> Self {
        Self::new(PLACEHOLDER_SIGNATURE, PLACEHOLDER_SIZE).with_not_found_marker(NOT_FOUND_MARKER)
    }
}

impl PlaceholderDetector {
    /// Creates a detector for `signature` and a typical stub size in bytes.
    pub fn new(signature: impl Into<String>, typical_size: u64) -> Self {
        Self {
            signature: signature.into().into_bytes(),
            typical_size,
            not_found_marker: Vec::new(),
        }
    }

    /// Also flags bodies containing `marker` as not-found pages.
    #[must_use]
    pub fn with_not_found_marker(mut self, marker: impl Into<String>) -> Self {
        self.not_found_marker = marker.into().into_bytes();
        self
    }

    /// Detector configured from `placeholderSignature`, `placeholderSize`
    /// and `notFoundMarker`.
    #[must_use]
    pub fn from_config(config: &HarvestConfig) -> Self {
        Self::new(config.placeholder_signature.clone(), config.placeholder_size)
            .with_not_found_marker(config.not_found_marker.clone())
    }

    /// Whether `head` (the first bytes of a file) is a placeholder.
    #[must_use]
    pub fn matches(&self, head: &[u8]) -> bool {
        let head = &head[..head.len().min(PLACEHOLDER_PROBE_BYTES)];
        head.starts_with(PDF_MAGIC) && contains(head, &self.signature)
    }

    /// Whether `head` carries the not-found marker.
    #[must_use]
    pub fn is_not_found(&self, head: &[u8]) -> bool {
        contains(&head[..head.len().min(NOT_FOUND_PROBE_BYTES)], &self.not_found_marker)
    }

    /// Classifies the first bytes of a download. A not-found page wins over
    /// a placeholder match.
    #[must_use]
    pub fn check(&self, head: &[u8]) -> ContentCheck {
        if self.is_not_found(head) {
            ContentCheck::NotFound
        } else if self.matches(head) {
            ContentCheck::Placeholder
        } else {
            ContentCheck::Genuine
        }
    }

    /// Whether `size` is strictly inside the band around the typical stub size.
    ///
    /// A local file in this band is never trusted as complete.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn in_size_band(&self, size: u64) -> bool {
        if self.typical_size == 0 {
            return false;
        }
        let ratio = size as f64 / self.typical_size as f64;
        (ratio - 1.0).abs() < PLACEHOLDER_SIZE_TOLERANCE
    }

    /// Reads the start of the file at `path` and checks it.
    ///
    /// # Errors
    ///
    /// Returns the IO error if the file cannot be opened or read.
    pub async fn inspect(&self, path: &Path) -> std::io::Result<ContentCheck> {
        let window = PLACEHOLDER_PROBE_BYTES.max(NOT_FOUND_PROBE_BYTES);
        let file = tokio::fs::File::open(path).await?;
        let mut head = Vec::with_capacity(window);
        file.take(window as u64).read_to_end(&mut head).await?;
        Ok(self.check(&head))
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle)
}
