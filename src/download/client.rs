//! HTTP session shared by the crawler and the fetch workers.
//!
//! One [`HttpClient`] is built per run from configuration: a pooled
//! `reqwest` client with a cookie jar pre-seeded from the configured
//! cookies and a static browser-like header set. Status codes are not
//! interpreted here (except by [`HttpClient::download_to_path`]); callers
//! go through [`RetryPolicy`](super::RetryPolicy) to classify them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::cookie::Jar;
use reqwest::header::{CONTENT_LENGTH, HeaderMap, HeaderName, HeaderValue};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};

use super::constants::{CONNECT_TIMEOUT_SECS, HEAD_TIMEOUT_SECS, READ_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS};
use super::error::DownloadError;
use crate::config::{CookieSpec, HarvestConfig};

/// Suffix of in-progress download files.
pub const PART_SUFFIX: &str = ".part";

/// A fully buffered GET response.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
    /// Final URL after redirects.
    pub url: String,
}

impl FetchedResponse {
    /// Body decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Status and advertised size from a HEAD request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadResponse {
    /// HTTP status code.
    pub status: u16,
    /// `Content-Length`, when present and numeric.
    pub content_length: Option<u64>,
}

/// A file streamed to disk.
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    /// Final output path.
    pub path: PathBuf,
    /// Bytes written.
    pub bytes: u64,
    /// Size the server advertised, if any.
    pub content_length: Option<u64>,
}

/// Timeouts applied by [`HttpClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientTimeouts {
    /// TCP connect timeout.
    pub connect: Duration,
    /// Idle read timeout while streaming downloads.
    pub read: Duration,
    /// Whole-request timeout for listing fetches.
    pub request: Duration,
    /// Whole-request timeout for HEAD probes.
    pub head: Duration,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read: Duration::from_secs(READ_TIMEOUT_SECS),
            request: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            head: Duration::from_secs(HEAD_TIMEOUT_SECS),
        }
    }
}

impl ClientTimeouts {
    /// Timeouts taken from configuration.
    #[must_use]
    pub fn from_config(config: &HarvestConfig) -> Self {
        Self {
            connect: Duration::from_secs(config.connect_timeout_secs),
            read: Duration::from_secs(config.read_timeout_secs),
            request: Duration::from_secs(config.request_timeout_secs),
            head: Duration::from_secs(config.head_timeout_secs),
        }
    }
}

/// Persistent HTTP session with static cookies and headers.
///
/// Cheap to clone; clones share the connection pool and cookie jar.
///
/// # Example
///
/// ```no_run
/// use harvester_core::config::HarvestConfig;
/// use harvester_core::download::HttpClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::from_config(&HarvestConfig::default())?;
/// let page = client.get_page("https://www.justice.gov/").await?;
/// println!("HTTP {} ({} bytes)", page.status, page.body.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    timeouts: ClientTimeouts,
}

impl HttpClient {
    /// Builds a session from the configured headers, cookies, and timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidHeader`] for an unusable header or
    /// cookie domain, and [`DownloadError::Build`] if `reqwest` rejects the
    /// client configuration.
    pub fn from_config(config: &HarvestConfig) -> Result<Self, DownloadError> {
        Self::build(
            &config.headers,
            &config.cookies,
            ClientTimeouts::from_config(config),
        )
    }

    /// Builds a session from explicit parts.
    ///
    /// # Errors
    ///
    /// Same as [`from_config`](Self::from_config).
    pub fn build<'a, H>(
        headers: H,
        cookies: &[CookieSpec],
        timeouts: ClientTimeouts,
    ) -> Result<Self, DownloadError>
    where
        H: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let jar = Arc::new(Jar::default());
        for cookie in cookies {
            let origin = reqwest::Url::parse(&cookie.origin())
                .map_err(|e| DownloadError::invalid_header(format!("cookie {}", cookie.name), e))?;
            jar.add_cookie_str(&cookie.header_value(), &origin);
        }

        let client = Client::builder()
            .connect_timeout(timeouts.connect)
            .read_timeout(timeouts.read)
            .gzip(true)
            .cookie_provider(jar)
            .default_headers(header_map(headers)?)
            .build()
            .map_err(|source| DownloadError::Build { source })?;

        Ok(Self { client, timeouts })
    }

    /// Timeouts this client applies.
    #[must_use]
    pub fn timeouts(&self) -> ClientTimeouts {
        self.timeouts
    }

    /// GETs `url` and buffers the whole body.
    ///
    /// Any status is returned as-is.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Network`] or [`DownloadError::Timeout`] when
    /// no complete response was received.
    #[instrument(level = "debug", skip(self))]
    pub async fn get_page(&self, url: &str) -> Result<FetchedResponse, DownloadError> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeouts.request)
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response
            .bytes()
            .await
            .map_err(|e| DownloadError::network(url, e))?
            .to_vec();
        debug!(status, bytes = body.len(), "page fetched");
        Ok(FetchedResponse {
            status,
            body,
            url: final_url,
        })
    }

    /// Issues a HEAD request, following redirects.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Network`] or [`DownloadError::Timeout`] when
    /// no response was received.
    #[instrument(level = "debug", skip(self))]
    pub async fn head(&self, url: &str) -> Result<HeadResponse, DownloadError> {
        let response = self
            .client
            .head(url)
            .timeout(self.timeouts.head)
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))?;
        Ok(HeadResponse {
            status: response.status().as_u16(),
            content_length: header_content_length(response.headers()),
        })
    }

    /// Streams `url` into `dest`, calling `on_progress(written, total)` per chunk.
    ///
    /// The body is written to `dest` + [`PART_SUFFIX`] and renamed into place
    /// once complete; the partial file is removed on any failure, so `dest`
    /// only ever holds a complete download (or whatever was there before).
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::HttpStatus`] for a non-success status,
    /// network errors while streaming, and [`DownloadError::Io`] for
    /// filesystem failures.
    #[instrument(skip(self, on_progress), fields(dest = %dest.display()))]
    pub async fn download_to_path<F>(
        &self,
        url: &str,
        dest: &Path,
        mut on_progress: F,
    ) -> Result<DownloadedFile, DownloadError>
    where
        F: FnMut(u64, Option<u64>),
    {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(url, status.as_u16()));
        }
        let content_length = header_content_length(response.headers());

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::io(parent, e))?;
        }

        let part = part_path(dest);
        let file = File::create(&part)
            .await
            .map_err(|e| DownloadError::io(&part, e))?;

        let streamed = stream_to_file(file, response, url, &part, content_length, &mut on_progress).await;
        let bytes = match streamed {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(path = %part.display(), "cleaning up partial file after error");
                let _ = tokio::fs::remove_file(&part).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&part, dest).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(DownloadError::io(dest, e));
        }

        debug!(bytes, "download complete");
        Ok(DownloadedFile {
            path: dest.to_path_buf(),
            bytes,
            content_length,
        })
    }
}

/// Path of the in-progress file for `dest`.
#[must_use]
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(std::ffi::OsStr::to_os_string).unwrap_or_default();
    name.push(PART_SUFFIX);
    dest.with_file_name(name)
}

/// Streams response body to file, returning bytes written.
async fn stream_to_file<F>(
    file: File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
    content_length: Option<u64>,
    on_progress: &mut F,
) -> Result<u64, DownloadError>
where
    F: FnMut(u64, Option<u64>),
{
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;
    on_progress(0, content_length);

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| DownloadError::network(url, e))?;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(file_path, e))?;

        bytes_written += chunk.len() as u64;
        on_progress(bytes_written, content_length);
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(file_path, e))?;

    Ok(bytes_written)
}

fn header_content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn header_map<'a, H>(headers: H) -> Result<HeaderMap, DownloadError>
where
    H: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| DownloadError::invalid_header(name.clone(), e))?;
        let header_value =
            HeaderValue::from_str(value).map_err(|e| DownloadError::invalid_header(name.clone(), e))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, ResponseTemplate};

    fn test_client(headers: &BTreeMap<String, String>, cookies: &[CookieSpec]) -> HttpClient {
        HttpClient::build(headers, cookies, ClientTimeouts::default()).unwrap()
    }

    fn plain_client() -> HttpClient {
        test_client(&BTreeMap::new(), &[])
    }

    // ==================== Construction Tests ====================

    #[test]
    fn test_invalid_header_name_is_rejected() {
        let headers = BTreeMap::from([("Bad Header".to_string(), "x".to_string())]);
        let err = HttpClient::build(&headers, &[], ClientTimeouts::default()).unwrap_err();
        assert!(matches!(err, DownloadError::InvalidHeader { .. }), "got {err:?}");
    }

    #[test]
    fn test_part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("/out/Dataset 1/EFTA1.pdf")),
            PathBuf::from("/out/Dataset 1/EFTA1.pdf.part")
        );
    }

    #[test]
    fn test_from_config_defaults_build() {
        assert!(HttpClient::from_config(&HarvestConfig::default()).is_ok());
    }

    // ==================== Request Tests ====================

    #[tokio::test]
    async fn test_get_page_sends_static_headers_and_returns_any_status() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/list"))
            .and(header("x-probe", "yes"))
            .respond_with(ResponseTemplate::new(404).set_body_string("missing"))
            .mount(&mock_server)
            .await;

        let headers = BTreeMap::from([("X-Probe".to_string(), "yes".to_string())]);
        let client = test_client(&headers, &[]);
        let page = client
            .get_page(&format!("{}/list", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(page.status, 404);
        assert_eq!(page.text(), "missing");
    }

    #[tokio::test]
    async fn test_head_reports_content_length() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("HEAD"))
            .and(path("/f.pdf"))
            .respond_with(ResponseTemplate::new(200).insert_header("Content-Length", "1234"))
            .mount(&mock_server)
            .await;

        let head = plain_client()
            .head(&format!("{}/f.pdf", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(head.status, 200);
        assert_eq!(head.content_length, Some(1234));
    }

    // ==================== Download Tests ====================

    #[tokio::test]
    async fn test_download_to_path_writes_file_and_reports_progress() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        let temp = TempDir::new().unwrap();
        let body = vec![7u8; 10_000];
        Mock::given(method("GET"))
            .and(path("/big.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&mock_server)
            .await;

        let dest = temp.path().join("Dataset 1").join("big.bin");
        let mut last = (0, None);
        let result = plain_client()
            .download_to_path(&format!("{}/big.bin", mock_server.uri()), &dest, |done, total| {
                last = (done, total);
            })
            .await
            .unwrap();

        assert_eq!(result.bytes, 10_000);
        assert_eq!(result.content_length, Some(10_000));
        assert_eq!(last, (10_000, Some(10_000)));
        assert_eq!(std::fs::read(&dest).unwrap(), body);
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_download_to_path_http_error_leaves_nothing_behind() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        let temp = TempDir::new().unwrap();
        Mock::given(method("GET"))
            .and(path("/gone.pdf"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let dest = temp.path().join("gone.pdf");
        let err = plain_client()
            .download_to_path(&format!("{}/gone.pdf", mock_server.uri()), &dest, |_, _| {})
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(404));
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_configured_cookie_is_sent_to_matching_domain() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/gated"))
            .and(header("cookie", "ageVerified=true"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&mock_server)
            .await;

        let cookie = CookieSpec {
            name: "ageVerified".to_string(),
            value: "true".to_string(),
            domain: "127.0.0.1".to_string(),
        };
        // the jar keys cookies by host, the mock server listens on 127.0.0.1
        let client = test_client(&BTreeMap::new(), std::slice::from_ref(&cookie));
        let page = client
            .get_page(&format!("{}/gated", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(page.status, 200);
    }
}
