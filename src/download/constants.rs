//! Constants for the download module (timeouts, placeholder detection).

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Per-request timeout for listing page fetches.
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Per-request timeout for HEAD probes.
pub const HEAD_TIMEOUT_SECS: u64 = 5;

/// Bytes read from the start of a file for placeholder detection.
pub const PLACEHOLDER_PROBE_BYTES: usize = 4096;

/// Magic prefix of a PDF file.
pub const PDF_MAGIC: &[u8] = b"%PDF";

/// Generator string embedded in "no images produced" stand-in PDFs.
pub const PLACEHOLDER_SIGNATURE: &str = "ReportLab PDF Library";

/// Typical size in bytes of a stand-in PDF.
pub const PLACEHOLDER_SIZE: u64 = 2433;

/// Relative tolerance around [`PLACEHOLDER_SIZE`]; sizes strictly inside
/// the band never count as a completed download.
pub const PLACEHOLDER_SIZE_TOLERANCE: f64 = 0.1;

/// Text found in the body of the site's not-found page.
pub const NOT_FOUND_MARKER: &str = "https://www.justice.gov/doj/page-not-found";

/// Bytes read from the start of a download when looking for [`NOT_FOUND_MARKER`].
pub const NOT_FOUND_PROBE_BYTES: usize = 64 * 1024;

/// HTTP statuses that mean "slow down and try again".
pub const RATE_LIMIT_STATUSES: &[u16] = &[403, 429, 500, 502, 503];

/// HTTP statuses that make the alternate probe pause and retry a candidate.
pub const PROBE_BACKOFF_STATUSES: &[u16] = &[403, 429, 503];
