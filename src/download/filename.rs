//! Filename extraction and extension rewriting for file URLs.

use std::path::{Component, Path};

use url::Url;

/// Last path segment of `url`, percent-decoded and made filesystem-safe.
///
/// Query strings and fragments are ignored. Falls back to `download.bin`
/// when the URL has no usable final segment.
#[must_use]
pub fn basename_from_url(url: &str) -> String {
    let raw = last_segment(url).unwrap_or_default();
    let decoded = urlencoding::decode(&raw).map_or_else(|_| raw.clone(), |d| d.into_owned());
    let sanitized = sanitize_filename(&decoded);
    if sanitized.trim_matches('_').is_empty() {
        "download.bin".to_string()
    } else {
        sanitized
    }
}

/// Replaces (or appends) the extension of the final path segment of `url`.
///
/// `extension` includes its leading dot. Query strings and fragments are
/// dropped from the result.
#[must_use]
pub fn replace_extension(url: &str, extension: &str) -> String {
    let base = strip_query(url);
    let (head, segment) = match base.rfind('/') {
        Some(slash) => base.split_at(slash + 1),
        None => ("", base),
    };
    let stem = match segment.rfind('.') {
        Some(dot) if dot > 0 => &segment[..dot],
        _ => segment,
    };
    format!("{head}{stem}{extension}")
}

/// Extension of the final path segment, lowercased, including the dot.
pub(crate) fn extension_from_url(url: &str) -> Option<String> {
    let segment = last_segment(url)?;
    let dot_index = segment.rfind('.')?;
    let ext = &segment[dot_index..];
    if ext.len() <= 1 || ext.len() > 32 {
        return None;
    }
    Some(ext.to_lowercase())
}

fn last_segment(url: &str) -> Option<String> {
    if let Ok(parsed) = Url::parse(url) {
        return parsed
            .path_segments()?
            .next_back()
            .filter(|s| !s.is_empty())
            .map(str::to_string);
    }
    strip_query(url)
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn strip_query(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

/// Sanitizes filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== Basename Tests ====================

    #[test]
    fn test_basename_from_url_plain() {
        assert_eq!(
            basename_from_url("https://www.justice.gov/epstein/files/DataSet%201/EFTA00000001.pdf"),
            "EFTA00000001.pdf"
        );
    }

    #[test]
    fn test_basename_from_url_decodes_and_ignores_query() {
        assert_eq!(
            basename_from_url("https://x.test/files/EFTA%20002.pdf?download=1#top"),
            "EFTA 002.pdf"
        );
    }

    #[test]
    fn test_basename_from_url_encoded_separator_is_sanitized() {
        assert_eq!(basename_from_url("https://x.test/a%2Fb.pdf"), "a_b.pdf");
        assert_eq!(basename_from_url("https://x.test/a%3Ab.pdf"), "a_b.pdf");
    }

    #[test]
    fn test_basename_from_url_trailing_slash_falls_back() {
        assert_eq!(basename_from_url("https://x.test/files/"), "download.bin");
    }

    #[test]
    fn test_basename_from_relative_path() {
        assert_eq!(basename_from_url("/epstein/files/DataSet%202/EFTA9.pdf"), "EFTA9.pdf");
    }

    // ==================== Extension Tests ====================

    #[test]
    fn test_replace_extension_swaps_last_extension() {
        assert_eq!(
            replace_extension("https://x.test/DataSet%201/EFTA001.pdf", ".mp4"),
            "https://x.test/DataSet%201/EFTA001.mp4"
        );
    }

    #[test]
    fn test_replace_extension_appends_when_missing() {
        assert_eq!(
            replace_extension("https://x.test/files/EFTA001", ".wav"),
            "https://x.test/files/EFTA001.wav"
        );
    }

    #[test]
    fn test_replace_extension_only_touches_final_segment() {
        assert_eq!(
            replace_extension("https://x.test/v1.2/EFTA001.pdf?x=1", ".docx"),
            "https://x.test/v1.2/EFTA001.docx"
        );
    }

    #[test]
    fn test_extension_from_url() {
        assert_eq!(
            extension_from_url("https://x.test/a/EFTA1.PDF"),
            Some(".pdf".to_string())
        );
        assert_eq!(extension_from_url("https://x.test/a/EFTA1"), None);
    }

    // ==================== Sanitize Tests ====================

    #[test]
    fn test_sanitize_filename_removes_invalid_chars() {
        assert_eq!(sanitize_filename("file:name.pdf"), "file_name.pdf");
        assert_eq!(sanitize_filename("file<name>.pdf"), "file_name_.pdf");
        assert_eq!(sanitize_filename("file|name.pdf"), "file_name.pdf");
    }

    #[test]
    fn test_sanitize_filename_rewrites_dot_segments() {
        assert_eq!(sanitize_filename("."), "_");
        assert_eq!(sanitize_filename(".."), "__");
    }
}
