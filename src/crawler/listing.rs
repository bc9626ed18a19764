//! Listing page parsing.
//!
//! Extracts file basenames from anchors and the two signals the crawler
//! uses to recognise a fallback page: whether pagination controls exist
//! and which page the canonical link claims to be.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};

use crate::queue::PageNumber;

/// Containers that only appear on a real, paginated listing.
const PAGINATION_SELECTORS: &[&str] = &[".pager", ".pagination", ".usa-pagination", ".js-pager__items"];

static PAGE_PARAM: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[?&]page=(\d+)").ok());

/// What one listing page contained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPage {
    /// Basenames of linked files, deduplicated and sorted.
    pub files: BTreeSet<String>,
    /// Whether any pagination control was present.
    pub has_pagination: bool,
    /// Page number in the canonical link: `Some(0)` when the link has no
    /// `page` parameter, `None` when there is no canonical link.
    pub canonical_page: Option<PageNumber>,
}

impl ListingPage {
    /// A page without pagination controls whose canonical URL points
    /// elsewhere: the site served a generic fallback instead of `requested`.
    #[must_use]
    pub fn is_fallback(&self, requested: PageNumber) -> bool {
        !self.has_pagination && self.canonical_page.is_some_and(|page| page != requested)
    }
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

/// Parses a listing page.
///
/// An anchor counts as a file link when its `href` contains both
/// `link_token` and `marker`. The basename is the last path segment with
/// any query or fragment removed, kept as written in the page.
#[must_use]
pub fn parse_listing(html: &str, link_token: &str, marker: &str) -> ListingPage {
    let document = Html::parse_document(html);

    let files = selector("a[href]")
        .map(|anchors| {
            document
                .select(&anchors)
                .filter_map(|a| a.value().attr("href"))
                .filter(|href| href.contains(link_token) && href.contains(marker))
                .filter_map(href_basename)
                .collect()
        })
        .unwrap_or_default();

    let has_pagination = PAGINATION_SELECTORS
        .iter()
        .filter_map(|css| selector(css))
        .any(|s| document.select(&s).next().is_some());

    let canonical_page = selector(r#"link[rel="canonical"]"#)
        .and_then(|s| document.select(&s).next())
        .and_then(|link| link.value().attr("href"))
        .map(page_param);

    ListingPage {
        files,
        has_pagination,
        canonical_page,
    }
}

fn href_basename(href: &str) -> Option<String> {
    let path = href.split(['?', '#']).next().unwrap_or(href);
    path.rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

fn page_param(href: &str) -> PageNumber {
    PAGE_PARAM
        .as_ref()
        .and_then(|re| re.captures(href))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}
