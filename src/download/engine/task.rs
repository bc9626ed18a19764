//! Per-item processing and the worker pop loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::config::HarvestConfig;
use crate::context::PipelineContext;
use crate::download::alternate::AlternateProbe;
use crate::download::client::HttpClient;
use crate::download::placeholder::{ContentCheck, PlaceholderDetector};
use crate::download::retry::{RetryPolicy, jittered};
use crate::progress::WorkerProgress;
use crate::queue::{FileReference, QueueMessage, WorkItem, WorkQueue};

/// Random factor floor for the pause between files.
const FILE_JITTER_FLOOR: f64 = 0.1;

/// Failure log kind for a body that turned out to be the not-found page.
const NOT_FOUND_KIND: &str = "NotFound";

/// What happened to one work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Downloaded and kept.
    Success {
        /// Final path on disk.
        path: PathBuf,
        /// Bytes written.
        bytes: u64,
    },
    /// A complete copy was already on disk.
    Skipped {
        /// Existing path.
        path: PathBuf,
    },
    /// The transfer failed; the item is logged and dropped.
    Failed {
        /// Human-readable failure detail.
        reason: String,
    },
    /// The download was a placeholder and an alternate was queued.
    AlternateFound {
        /// URL of the queued alternate.
        url: String,
    },
    /// The download was a placeholder and no alternate answered.
    AlternateExhausted,
}

/// Everything a worker needs to process items, shared by all pool tasks.
#[derive(Debug)]
pub struct FetchWorker {
    config: Arc<HarvestConfig>,
    queue: Arc<WorkQueue>,
    ctx: Arc<PipelineContext>,
    client: HttpClient,
    file_policy: RetryPolicy,
    detector: PlaceholderDetector,
    probe: AlternateProbe,
}

impl FetchWorker {
    /// Builds a worker whose retry budget, probe list, and placeholder
    /// fingerprint come from `config`.
    #[must_use]
    pub fn new(
        config: Arc<HarvestConfig>,
        queue: Arc<WorkQueue>,
        ctx: Arc<PipelineContext>,
        client: HttpClient,
    ) -> Self {
        let file_policy = RetryPolicy::for_files(&config);
        let detector = PlaceholderDetector::from_config(&config);
        let probe = AlternateProbe::from_config(client.clone(), &config);
        Self {
            config,
            queue,
            ctx,
            client,
            file_policy,
            detector,
            probe,
        }
    }

    /// Where `reference` lands on disk.
    #[must_use]
    pub fn destination(&self, reference: &FileReference) -> PathBuf {
        self.config
            .dataset_dir(reference.dataset())
            .join(reference.basename())
    }

    /// Downloads one item and handles placeholder recovery.
    ///
    /// Never fails: transfer errors (after the retry budget) and not-found
    /// pages are counted, logged to the event log, and returned as
    /// [`DownloadOutcome::Failed`].
    #[instrument(skip(self, item, progress), fields(url = item.reference().url()))]
    pub async fn process_item(&self, item: &WorkItem, progress: &WorkerProgress) -> DownloadOutcome {
        let reference = item.reference();
        let filename = reference.basename();
        let dest = self.destination(reference);
        progress.start(&filename);

        if let Some(size) = self.already_complete(reference, &dest).await {
            self.ctx.counters().add_download();
            progress.complete(&filename, size);
            debug!(path = %dest.display(), size, "already on disk");
            return DownloadOutcome::Skipped { path: dest };
        }

        let downloaded = match self
            .file_policy
            .download(
                &self.client,
                reference.url(),
                &dest,
                self.ctx.counters(),
                |written, total| progress.update(written, total),
            )
            .await
        {
            Ok(downloaded) => downloaded,
            Err(e) => {
                progress.failed(&filename);
                return self.fail(reference, e.kind(), e.to_string());
            }
        };

        let check = match self.detector.inspect(&downloaded.path).await {
            Ok(check) => check,
            Err(e) => {
                warn!(path = %downloaded.path.display(), error = %e, "could not inspect download");
                ContentCheck::Genuine
            }
        };
        if check == ContentCheck::NotFound {
            if let Err(e) = tokio::fs::remove_file(&downloaded.path).await {
                warn!(path = %downloaded.path.display(), error = %e, "could not remove not-found page");
            }
            progress.failed(&filename);
            let reason = "server answered with its not-found page".to_string();
            return self.fail(reference, NOT_FOUND_KIND, reason);
        }

        self.ctx.counters().add_download();
        progress.complete(&filename, downloaded.bytes);
        if item.is_alternate() || check == ContentCheck::Genuine {
            return success(downloaded.path, downloaded.bytes);
        }

        info!(file = %filename, "placeholder downloaded, probing alternates");
        match self.probe.probe(reference, self.ctx.stop()).await {
            Some(alternate) => {
                let url = alternate.reference().url().to_string();
                self.queue.push_alternate(alternate);
                self.ctx.counters().add_alternate_found();
                info!(original = reference.url(), alternate = %url, "alternate queued");
                DownloadOutcome::AlternateFound { url }
            }
            // Interrupted probes are neither found nor exhausted. The page is
            // held back from the checkpoint so the next run fetches and
            // probes this file again.
            None if self.ctx.is_stopping() => {
                self.ctx.record_unsettled(reference.position());
                success(downloaded.path, downloaded.bytes)
            }
            None => {
                self.ctx.counters().add_alternate_exhausted();
                self.ctx.events().record_unknown_alternate(reference);
                DownloadOutcome::AlternateExhausted
            }
        }
    }

    /// Counts, logs and records a failed item.
    fn fail(&self, reference: &FileReference, kind: &str, reason: String) -> DownloadOutcome {
        self.ctx.counters().add_error();
        self.ctx.events().record_failure(reference, kind, &reason);
        self.ctx.record_failed(reference);
        DownloadOutcome::Failed { reason }
    }

    /// Local size of `dest` when the remote copy matches it and it is not
    /// placeholder-sized.
    async fn already_complete(&self, reference: &FileReference, dest: &Path) -> Option<u64> {
        let local = tokio::fs::metadata(dest).await.ok()?.len();
        let head = self
            .file_policy
            .head(&self.client, reference.url(), self.ctx.counters())
            .await?;
        let complete = head.status == 200
            && head.content_length == Some(local)
            && !self.detector.in_size_band(local);
        if !complete {
            debug!(
                local,
                remote = ?head.content_length,
                status = head.status,
                "local copy not trusted"
            );
        }
        complete.then_some(local)
    }

    fn file_delay(&self) -> Duration {
        jittered(self.config.file_delay(), FILE_JITTER_FLOOR)
    }
}

fn success(path: PathBuf, bytes: u64) -> DownloadOutcome {
    DownloadOutcome::Success { path, bytes }
}

/// Pop loop for one pool task.
///
/// Waits for the start gate (or a stop), then processes items until an
/// end-of-stream marker arrives or a stop is requested between items.
pub(super) async fn run_worker(id: usize, worker: &FetchWorker, progress: &WorkerProgress) {
    let queue = &worker.queue;
    let stop = worker.ctx.stop();

    tokio::select! {
        () = queue.wait_for_gate() => {}
        () = stop.wait() => {}
    }

    let mut processed = 0_u64;
    loop {
        if stop.is_requested() {
            break;
        }
        let item = tokio::select! {
            message = queue.pop() => match message {
                QueueMessage::Work(item) => item,
                QueueMessage::EndOfStream => break,
            },
            () = stop.wait() => break,
        };

        let outcome = worker.process_item(&item, progress).await;
        queue.task_done();
        processed += 1;

        if !matches!(outcome, DownloadOutcome::Skipped { .. }) {
            tokio::select! {
                () = tokio::time::sleep(worker.file_delay()) => {}
                () = stop.wait() => {}
            }
        }
    }
    debug!(worker = id, processed, "worker exiting");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    use super::*;
    use crate::events::EventLog;
    use crate::test_support::socket_guard::start_mock_server_or_skip;

    struct Fixture {
        _temp: TempDir,
        root: PathBuf,
        queue: Arc<WorkQueue>,
        ctx: Arc<PipelineContext>,
        worker: FetchWorker,
    }

    fn fixture(extensions: &[&str]) -> Fixture {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        let config = Arc::new(HarvestConfig {
            directory: root.join("out"),
            fetch_retries: 2,
            time_between_files: 1,
            time_between_403: 1,
            alternate_cooldown: 1,
            alternate_extensions: extensions.iter().map(|e| (*e).to_string()).collect(),
            ..HarvestConfig::default()
        });
        let queue = Arc::new(WorkQueue::new());
        let ctx = Arc::new(PipelineContext::new(EventLog::in_directory(&root.join("logs"))));
        let client = HttpClient::from_config(&config).unwrap();
        let worker = FetchWorker::new(config, Arc::clone(&queue), Arc::clone(&ctx), client);
        Fixture {
            _temp: temp,
            root,
            queue,
            ctx,
            worker,
        }
    }

    fn placeholder_body() -> Vec<u8> {
        let mut body = b"%PDF-1.4\n<< /Producer (ReportLab PDF Library) >>\n".to_vec();
        body.resize(2433, b' ');
        body
    }

    fn item(server_uri: &str, name: &str) -> WorkItem {
        WorkItem::discovered(FileReference::new(format!("{server_uri}/files/{name}"), 3, 2))
    }

    // ==================== Download Tests ====================

    #[tokio::test]
    async fn test_process_item_downloads_into_dataset_dir() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/files/EFTA1.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.7 real".to_vec()))
            .mount(&mock_server)
            .await;

        let fx = fixture(&[".mp4"]);
        let outcome = fx
            .worker
            .process_item(&item(&mock_server.uri(), "EFTA1.pdf"), &WorkerProgress::hidden(0))
            .await;

        let expected = fx.root.join("out").join("Dataset 2").join("EFTA1.pdf");
        assert_eq!(
            outcome,
            DownloadOutcome::Success {
                path: expected.clone(),
                bytes: 13
            }
        );
        assert_eq!(std::fs::read(expected).unwrap(), b"%PDF-1.7 real");
        assert_eq!(fx.ctx.counters().snapshot().downloads, 1);
    }

    #[tokio::test]
    async fn test_process_item_skips_complete_local_copy() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("HEAD"))
            .and(path("/files/EFTA2.pdf"))
            .respond_with(ResponseTemplate::new(200).insert_header("Content-Length", "5000"))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let fx = fixture(&[]);
        let work = item(&mock_server.uri(), "EFTA2.pdf");
        let dest = fx.worker.destination(work.reference());
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        std::fs::write(&dest, vec![b'x'; 5000]).unwrap();

        let outcome = fx.worker.process_item(&work, &WorkerProgress::hidden(0)).await;
        assert_eq!(outcome, DownloadOutcome::Skipped { path: dest });
        assert_eq!(fx.ctx.counters().snapshot().downloads, 1);
    }

    #[tokio::test]
    async fn test_process_item_refetches_placeholder_sized_local_copy() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("HEAD"))
            .and(path("/files/EFTA3.pdf"))
            .respond_with(ResponseTemplate::new(200).insert_header("Content-Length", "2433"))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/EFTA3.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'y'; 2433]))
            .expect(1)
            .mount(&mock_server)
            .await;

        let fx = fixture(&[]);
        let work = item(&mock_server.uri(), "EFTA3.pdf");
        let dest = fx.worker.destination(work.reference());
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        std::fs::write(&dest, vec![b'x'; 2433]).unwrap();

        let outcome = fx.worker.process_item(&work, &WorkerProgress::hidden(0)).await;
        assert!(matches!(outcome, DownloadOutcome::Success { bytes: 2433, .. }));
    }

    #[tokio::test]
    async fn test_process_item_failure_is_logged_and_counted() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let fx = fixture(&[]);
        let outcome = fx
            .worker
            .process_item(&item(&mock_server.uri(), "EFTA4.pdf"), &WorkerProgress::hidden(0))
            .await;

        assert!(matches!(outcome, DownloadOutcome::Failed { .. }));
        let counters = fx.ctx.counters().snapshot();
        assert_eq!(counters.errors, 1);
        assert_eq!(counters.downloads, 0);

        let log = std::fs::read_to_string(fx.ctx.events().failures_path()).unwrap();
        assert!(log.contains("| Dataset 2 | Page 3 |"));
        assert!(log.contains("EFTA4.pdf | HttpStatusError |"));
        assert_eq!(
            fx.ctx.failures().get(&2).cloned().unwrap(),
            vec!["EFTA4.pdf".to_string()]
        );
    }

    #[tokio::test]
    async fn test_process_item_retries_rate_limited_download() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/files/EFTA8.pdf"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/EFTA8.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.7 late".to_vec()))
            .mount(&mock_server)
            .await;

        let fx = fixture(&[]);
        let outcome = fx
            .worker
            .process_item(&item(&mock_server.uri(), "EFTA8.pdf"), &WorkerProgress::hidden(0))
            .await;

        assert!(matches!(outcome, DownloadOutcome::Success { bytes: 13, .. }));
        let counters = fx.ctx.counters().snapshot();
        assert_eq!(counters.forbidden, 1);
        assert_eq!(counters.errors, 0);
        assert_eq!(counters.downloads, 1);
    }

    #[tokio::test]
    async fn test_process_item_rejects_not_found_page() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/files/EFTA9.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html><link rel="canonical" href="https://www.justice.gov/doj/page-not-found"></html>"#,
            ))
            .expect(1)
            .mount(&mock_server)
            .await;

        let fx = fixture(&[".mp4"]);
        let work = item(&mock_server.uri(), "EFTA9.pdf");
        let outcome = fx.worker.process_item(&work, &WorkerProgress::hidden(0)).await;

        assert!(matches!(outcome, DownloadOutcome::Failed { .. }));
        assert!(!fx.worker.destination(work.reference()).exists());
        let counters = fx.ctx.counters().snapshot();
        assert_eq!(counters.downloads, 0);
        assert_eq!(counters.errors, 1);

        let log = std::fs::read_to_string(fx.ctx.events().failures_path()).unwrap();
        assert!(log.contains("EFTA9.pdf | NotFound |"));
        assert_eq!(
            fx.ctx.failures().get(&2).cloned().unwrap(),
            vec!["EFTA9.pdf".to_string()]
        );
    }

    // ==================== Placeholder Tests ====================

    #[tokio::test]
    async fn test_placeholder_queues_alternate() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/files/EFTA5.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(placeholder_body()))
            .mount(&mock_server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/files/EFTA5.avi"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/files/EFTA5.mp4"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let fx = fixture(&[".avi", ".mp4"]);
        let outcome = fx
            .worker
            .process_item(&item(&mock_server.uri(), "EFTA5.pdf"), &WorkerProgress::hidden(0))
            .await;

        let alternate_url = format!("{}/files/EFTA5.mp4", mock_server.uri());
        assert_eq!(
            outcome,
            DownloadOutcome::AlternateFound {
                url: alternate_url.clone()
            }
        );
        assert_eq!(fx.queue.size(), 1);
        assert_eq!(fx.ctx.counters().snapshot().alternates_found, 1);

        let QueueMessage::Work(queued) = fx.queue.pop().await else {
            panic!("expected work item");
        };
        assert_eq!(queued.reference().url(), alternate_url);
        assert_eq!(queued.reference().page(), 3);
        assert_eq!(queued.reference().dataset(), 2);
        assert!(queued.is_alternate());
    }

    #[tokio::test]
    async fn test_placeholder_without_alternate_is_recorded() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/files/EFTA6.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(placeholder_body()))
            .mount(&mock_server)
            .await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let fx = fixture(&[".avi", ".mp4"]);
        let outcome = fx
            .worker
            .process_item(&item(&mock_server.uri(), "EFTA6.pdf"), &WorkerProgress::hidden(0))
            .await;

        assert_eq!(outcome, DownloadOutcome::AlternateExhausted);
        assert_eq!(fx.ctx.counters().snapshot().alternates_exhausted, 1);
        assert_eq!(fx.queue.size(), 0);
        let log = std::fs::read_to_string(fx.ctx.events().unknown_alternates_path()).unwrap();
        assert!(log.contains("EFTA6.pdf"));
    }

    #[tokio::test]
    async fn test_placeholder_probe_cut_short_by_stop_is_held_back() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/files/EFTA13.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(placeholder_body()))
            .mount(&mock_server)
            .await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let fx = fixture(&[".avi", ".mp4"]);
        fx.ctx.request_stop();
        let outcome = fx
            .worker
            .process_item(&item(&mock_server.uri(), "EFTA13.pdf"), &WorkerProgress::hidden(0))
            .await;

        assert!(matches!(outcome, DownloadOutcome::Success { .. }));
        let counters = fx.ctx.counters().snapshot();
        assert_eq!(counters.alternates_found, 0);
        assert_eq!(counters.alternates_exhausted, 0);
        assert_eq!(fx.ctx.unsettled(), vec![crate::queue::Position::new(2, 3)]);
    }

    #[tokio::test]
    async fn test_alternate_placeholder_is_not_probed_again() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/files/EFTA7.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(placeholder_body()))
            .mount(&mock_server)
            .await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let fx = fixture(&[".avi"]);
        let reference = FileReference::new(format!("{}/files/EFTA7.mp4", mock_server.uri()), 3, 2);
        let work = WorkItem::alternate(reference, format!("{}/files/EFTA7.pdf", mock_server.uri()));
        let outcome = fx.worker.process_item(&work, &WorkerProgress::hidden(0)).await;
        assert!(matches!(outcome, DownloadOutcome::Success { .. }));
    }

    // ==================== Worker Loop Tests ====================

    #[tokio::test]
    async fn test_worker_drains_queue_then_exits_on_end_of_stream() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.7 ok".to_vec()))
            .expect(3)
            .mount(&mock_server)
            .await;

        let fx = fixture(&[]);
        fx.queue.push(["EFTA10.pdf", "EFTA11.pdf", "EFTA12.pdf"].map(|n| item(&mock_server.uri(), n)));
        fx.queue.open_gate();
        fx.queue.close(1);

        tokio::time::timeout(
            Duration::from_secs(10),
            run_worker(0, &fx.worker, &WorkerProgress::hidden(0)),
        )
        .await
        .unwrap();

        assert_eq!(fx.queue.unfinished(), 0);
        assert_eq!(fx.ctx.counters().snapshot().downloads, 3);
    }

    #[tokio::test]
    async fn test_worker_stops_without_taking_more_items() {
        let fx = fixture(&[]);
        fx.queue.push([item("http://127.0.0.1:9", "EFTA20.pdf")]);
        fx.queue.open_gate();
        fx.ctx.request_stop();

        run_worker(0, &fx.worker, &WorkerProgress::hidden(0)).await;
        assert_eq!(fx.queue.size(), 1);
    }
}
