//! Browser-like request identity shared by listing and file traffic.
//!
//! The file host rejects obvious tool traffic, so every request carries the
//! same header set a desktop browser would send. These are the defaults
//! written into a fresh config file; users can edit them there.

use std::collections::BTreeMap;

/// Desktop Chrome User-Agent sent on every request.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/121.0.6167.85 Safari/537.36";

/// Default static header set.
///
/// `Accept-Encoding` and `Connection` are left to the HTTP client, which
/// negotiates gzip and keeps connections pooled on its own.
#[must_use]
pub fn default_browser_headers() -> BTreeMap<String, String> {
    [
        ("User-Agent", BROWSER_USER_AGENT),
        (
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
        ("Accept-Language", "en-US,en;q=0.9"),
        ("Referer", "https://www.justice.gov/"),
        ("Upgrade-Insecure-Requests", "1"),
        ("Sec-Fetch-Site", "same-origin"),
        ("Sec-Fetch-Mode", "navigate"),
        ("Sec-Fetch-User", "?1"),
        ("Sec-Fetch-Dest", "document"),
        ("Sec-CH-UA", "\"Chromium\";v=\"121\", \"Not A(Brand\";v=\"99\""),
        ("Sec-CH-UA-Mobile", "?0"),
        ("Sec-CH-UA-Platform", "\"Linux\""),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value.to_string()))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_headers_carry_browser_user_agent() {
        let headers = default_browser_headers();
        assert_eq!(
            headers.get("User-Agent").map(String::as_str),
            Some(BROWSER_USER_AGENT)
        );
        assert!(headers.contains_key("Referer"));
    }

    #[test]
    fn test_default_headers_leave_encoding_to_client() {
        let headers = default_browser_headers();
        assert!(!headers.contains_key("Accept-Encoding"));
        assert!(!headers.contains_key("Connection"));
    }
}
