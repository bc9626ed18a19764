//! Search for the real file behind a placeholder download.
//!
//! When a `.pdf` turns out to be a stand-in, the real document is usually
//! published under the same name with another extension. The probe swaps
//! the extension for each configured candidate, in order, and HEADs it.

use std::time::Duration;

use tracing::{debug, instrument};

use super::client::HttpClient;
use super::constants::PROBE_BACKOFF_STATUSES;
use super::filename::extension_from_url;
use super::retry::jittered;
use crate::config::HarvestConfig;
use crate::context::StopSignal;
use crate::queue::{FileReference, WorkItem};

/// Random factor floor for the pause between candidates.
const CANDIDATE_JITTER_FLOOR: f64 = 0.1;

/// Priority-ordered alternate extension probe.
#[derive(Debug, Clone)]
pub struct AlternateProbe {
    client: HttpClient,
    extensions: Vec<String>,
    cooldown: Duration,
    between_candidates: Duration,
}

/// Result of checking one candidate.
enum CandidateCheck {
    Found,
    Backoff,
    Miss,
    Unreachable,
}

impl AlternateProbe {
    /// Creates a probe over `extensions` (each with a leading dot).
    pub fn new(
        client: HttpClient,
        extensions: Vec<String>,
        cooldown: Duration,
        between_candidates: Duration,
    ) -> Self {
        Self {
            client,
            extensions,
            cooldown,
            between_candidates,
        }
    }

    /// Probe configured from `alternateExtensions`, `alternateCooldown`, and
    /// `timeBetweenFiles`.
    #[must_use]
    pub fn from_config(client: HttpClient, config: &HarvestConfig) -> Self {
        Self::new(
            client,
            config.alternate_extensions.clone(),
            config.alternate_cooldown(),
            config.file_delay(),
        )
    }

    /// Candidate extensions in probe order.
    #[must_use]
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Returns the first candidate that answers `200`, tagged as an alternate
    /// of `reference`.
    ///
    /// A candidate answering with a rate-limit status is retried once after
    /// the cooldown. Network errors move straight to the next candidate.
    /// Returns `None` when every candidate missed or a stop was requested.
    #[instrument(skip(self, reference, stop), fields(url = reference.url()))]
    pub async fn probe(&self, reference: &FileReference, stop: &StopSignal) -> Option<WorkItem> {
        let own_extension = extension_from_url(reference.url());

        for extension in &self.extensions {
            if stop.is_requested() {
                debug!("probe interrupted");
                return None;
            }
            if own_extension.as_deref() == Some(extension.to_lowercase().as_str()) {
                continue;
            }

            let candidate = reference.with_extension(extension);
            let mut check = self.check(&candidate).await;
            if matches!(check, CandidateCheck::Backoff) {
                tokio::time::sleep(jittered(self.cooldown, CANDIDATE_JITTER_FLOOR)).await;
                check = self.check(&candidate).await;
            }

            match check {
                CandidateCheck::Found => {
                    debug!(alternate = candidate.url(), "alternate found");
                    return Some(WorkItem::alternate(candidate, reference.url()));
                }
                CandidateCheck::Unreachable => {}
                CandidateCheck::Backoff | CandidateCheck::Miss => {
                    tokio::time::sleep(jittered(self.between_candidates, CANDIDATE_JITTER_FLOOR))
                        .await;
                }
            }
        }

        debug!(candidates = self.extensions.len(), "no alternate answered");
        None
    }

    async fn check(&self, candidate: &FileReference) -> CandidateCheck {
        match self.client.head(candidate.url()).await {
            Ok(head) if head.status == 200 => CandidateCheck::Found,
            Ok(head) if PROBE_BACKOFF_STATUSES.contains(&head.status) => CandidateCheck::Backoff,
            Ok(_) => CandidateCheck::Miss,
            Err(e) => {
                debug!(url = candidate.url(), error = %e, "candidate unreachable");
                CandidateCheck::Unreachable
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::download::client::ClientTimeouts;
    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, Request, Respond, ResponseTemplate};

    fn probe(extensions: &[&str]) -> AlternateProbe {
        let client = HttpClient::build(&BTreeMap::new(), &[], ClientTimeouts::default()).unwrap();
        AlternateProbe::new(
            client,
            extensions.iter().map(|e| (*e).to_string()).collect(),
            Duration::from_millis(1),
            Duration::from_millis(1),
        )
    }

    struct Sequence {
        calls: Arc<AtomicUsize>,
        statuses: Vec<u16>,
    }

    impl Respond for Sequence {
        fn respond(&self, _request: &Request) -> ResponseTemplate {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            ResponseTemplate::new(self.statuses[n.min(self.statuses.len() - 1)])
        }
    }

    #[tokio::test]
    async fn test_probe_stops_at_first_success_in_order() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("HEAD"))
            .and(path("/files/EFTA1.avi"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/files/EFTA1.mp4"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/files/EFTA1.mov"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let reference = FileReference::new(format!("{}/files/EFTA1.pdf", mock_server.uri()), 4, 2);
        let found = probe(&[".avi", ".mp4", ".mov"])
            .probe(&reference, &StopSignal::default())
            .await
            .unwrap();

        assert_eq!(found.reference().url(), format!("{}/files/EFTA1.mp4", mock_server.uri()));
        assert_eq!(found.reference().page(), 4);
        assert_eq!(found.reference().dataset(), 2);
        assert_eq!(found.alternate_of(), Some(reference.url()));
    }

    #[tokio::test]
    async fn test_probe_retries_rate_limited_candidate_once() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        let calls = Arc::new(AtomicUsize::new(0));
        Mock::given(method("HEAD"))
            .and(path("/files/EFTA2.wav"))
            .respond_with(Sequence {
                calls: Arc::clone(&calls),
                statuses: vec![429, 200],
            })
            .mount(&mock_server)
            .await;

        let reference = FileReference::new(format!("{}/files/EFTA2.pdf", mock_server.uri()), 0, 1);
        let found = probe(&[".wav"])
            .probe(&reference, &StopSignal::default())
            .await;
        assert!(found.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_probe_exhausts_candidates() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(404))
            .expect(3)
            .mount(&mock_server)
            .await;

        let reference = FileReference::new(format!("{}/files/EFTA3.pdf", mock_server.uri()), 0, 1);
        let found = probe(&[".avi", ".mp4", ".mov"])
            .probe(&reference, &StopSignal::default())
            .await;
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_probe_skips_own_extension() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("HEAD"))
            .and(path("/files/EFTA4.pdf"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let reference = FileReference::new(format!("{}/files/EFTA4.pdf", mock_server.uri()), 0, 1);
        assert!(
            probe(&[".pdf"])
                .probe(&reference, &StopSignal::default())
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_probe_returns_none_when_stopped() {
        let stop = StopSignal::default();
        stop.request();
        let reference = FileReference::new("http://127.0.0.1:9/files/EFTA5.pdf", 0, 1);
        assert!(probe(&[".mp4"]).probe(&reference, &stop).await.is_none());
    }
}
