//! Work item types carried by the [`WorkQueue`](super::WorkQueue).

use std::cmp::Ordering;
use std::fmt;

use crate::download::filename::{basename_from_url, replace_extension};

/// Identifies one independently paginated listing collection.
pub type DatasetId = u32;

/// Zero-based cursor into a dataset's listing.
pub type PageNumber = u32;

/// A `(dataset, page)` coordinate in the crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    /// Dataset being crawled.
    pub dataset: DatasetId,
    /// Page within the dataset.
    pub page: PageNumber,
}

impl Position {
    /// Creates a new position.
    #[must_use]
    pub fn new(dataset: DatasetId, page: PageNumber) -> Self {
        Self { dataset, page }
    }

    /// Orders two positions by the dataset's index in `dataset_order`, then by page.
    ///
    /// Datasets missing from `dataset_order` sort after all known ones.
    #[must_use]
    pub fn cmp_in(&self, other: &Self, dataset_order: &[DatasetId]) -> Ordering {
        let rank = |dataset: DatasetId| {
            dataset_order
                .iter()
                .position(|d| *d == dataset)
                .unwrap_or(usize::MAX)
        };
        rank(self.dataset)
            .cmp(&rank(other.dataset))
            .then(self.page.cmp(&other.page))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dataset {} page {}", self.dataset, self.page)
    }
}

/// A discovered downloadable file.
///
/// Immutable once created. The basename of `url` is the identity used for
/// dedup, logging, and the on-disk filename.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileReference {
    url: String,
    page: PageNumber,
    dataset: DatasetId,
}

impl FileReference {
    /// Creates a reference to `url` discovered on `page` of `dataset`.
    pub fn new(url: impl Into<String>, page: PageNumber, dataset: DatasetId) -> Self {
        Self {
            url: url.into(),
            page,
            dataset,
        }
    }

    /// The absolute file URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The listing page this reference was found on.
    #[must_use]
    pub fn page(&self) -> PageNumber {
        self.page
    }

    /// The dataset this reference belongs to.
    #[must_use]
    pub fn dataset(&self) -> DatasetId {
        self.dataset
    }

    /// Where this reference was discovered.
    #[must_use]
    pub fn position(&self) -> Position {
        Position::new(self.dataset, self.page)
    }

    /// Decoded, filesystem-safe basename of the URL.
    #[must_use]
    pub fn basename(&self) -> String {
        basename_from_url(&self.url)
    }

    /// A new reference to the same file under a different extension.
    ///
    /// `extension` includes its leading dot (`.mp4`).
    #[must_use]
    pub fn with_extension(&self, extension: &str) -> Self {
        Self {
            url: replace_extension(&self.url, extension),
            page: self.page,
            dataset: self.dataset,
        }
    }
}

impl fmt::Display for FileReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// A unit of work for the fetch workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    reference: FileReference,
    /// URL of the placeholder download this item replaces, if any.
    alternate_of: Option<String>,
}

impl WorkItem {
    /// A reference discovered directly on a listing page.
    #[must_use]
    pub fn discovered(reference: FileReference) -> Self {
        Self {
            reference,
            alternate_of: None,
        }
    }

    /// An alternate candidate found for a placeholder download of `original_url`.
    pub fn alternate(reference: FileReference, original_url: impl Into<String>) -> Self {
        Self {
            reference,
            alternate_of: Some(original_url.into()),
        }
    }

    /// The file this item fetches.
    #[must_use]
    pub fn reference(&self) -> &FileReference {
        &self.reference
    }

    /// Whether this item was produced by an alternate probe.
    #[must_use]
    pub fn is_alternate(&self) -> bool {
        self.alternate_of.is_some()
    }

    /// URL of the placeholder this item replaces.
    #[must_use]
    pub fn alternate_of(&self) -> Option<&str> {
        self.alternate_of.as_deref()
    }
}

/// What a worker receives from the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueMessage {
    /// A file to fetch.
    Work(WorkItem),
    /// No more work will arrive for this worker; exit the pop loop.
    EndOfStream,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_basename_decodes_percent_escapes() {
        let reference = FileReference::new(
            "https://files.example.com/DataSet%205/EFTA%20001.pdf",
            0,
            5,
        );
        assert_eq!(reference.basename(), "EFTA 001.pdf");
    }

    #[test]
    fn test_with_extension_keeps_page_and_dataset() {
        let reference = FileReference::new("https://files.example.com/DataSet%205/EFTA001.pdf", 3, 5);
        let alternate = reference.with_extension(".mp4");
        assert_eq!(
            alternate.url(),
            "https://files.example.com/DataSet%205/EFTA001.mp4"
        );
        assert_eq!(alternate.page(), 3);
        assert_eq!(alternate.dataset(), 5);
        assert_ne!(alternate, reference);
    }

    #[test]
    fn test_work_item_alternate_tagging() {
        let reference = FileReference::new("https://x.test/a/EFTA1.pdf", 1, 2);
        let original = WorkItem::discovered(reference.clone());
        assert!(!original.is_alternate());

        let alternate = WorkItem::alternate(reference.with_extension(".mov"), reference.url());
        assert!(alternate.is_alternate());
        assert_eq!(alternate.alternate_of(), Some("https://x.test/a/EFTA1.pdf"));
    }

    #[test]
    fn test_position_ordering_follows_dataset_order() {
        let order = [4, 1, 3];
        let a = Position::new(1, 9);
        let b = Position::new(3, 0);
        let c = Position::new(4, 100);
        assert_eq!(a.cmp_in(&b, &order), Ordering::Less);
        assert_eq!(c.cmp_in(&a, &order), Ordering::Less);
        assert_eq!(
            Position::new(1, 2).cmp_in(&Position::new(1, 7), &order),
            Ordering::Less
        );
        assert_eq!(Position::new(99, 0).cmp_in(&b, &order), Ordering::Greater);
    }
}
