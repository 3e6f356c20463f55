use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::DownloadError;
use crate::feed::Episode;
use crate::http::{ByteStream, HttpClient};
use crate::progress::{ProgressEvent, SharedProgressReporter};

const PARTIAL_SUFFIX: &str = ".partial";

/// Context for tracking a download among concurrent transfers
#[derive(Debug, Clone, Copy)]
pub struct DownloadContext {
    /// Identifies this transfer in progress events
    pub download_id: usize,
}

/// Outcome of a finished download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    pub path: PathBuf,
    pub bytes_downloaded: u64,
    /// SHA-256 of the written content, formatted as `sha256:<hex>`
    pub content_hash: String,
}

/// Requests cancellation of one transfer
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

/// Observed by a transfer to learn it has been cancelled
#[derive(Debug, Clone)]
pub struct CancelSignal {
    receiver: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once cancellation is requested. Dropping every handle
    /// detaches the transfer instead of cancelling it.
    async fn cancelled(&mut self) {
        if self.receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Create a connected cancel handle and signal
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (sender, receiver) = watch::channel(false);
    let sender = Arc::new(sender);
    (CancelHandle { sender }, CancelSignal { receiver })
}

/// Download an episode's enclosure to the specified output path
///
/// Streams the response body into `<output_path>.partial`, reporting a
/// non-decreasing percentage per received chunk, and renames it into place
/// once complete. On any failure or cancellation the partial file is removed.
pub async fn download_episode<C: HttpClient>(
    client: &C,
    episode: &Episode,
    output_path: &Path,
    context: &DownloadContext,
    reporter: &SharedProgressReporter,
    cancel: &mut CancelSignal,
) -> Result<DownloadResult, DownloadError> {
    let url = episode.audio_url.as_str();

    if cancel.is_cancelled() {
        return Err(DownloadError::Cancelled {
            url: url.to_string(),
        });
    }

    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return Err(DownloadError::Cancelled { url: url.to_string() });
        }
        response = client.get_stream(url) => {
            response.map_err(|e| DownloadError::from_transport(url, e))?
        }
    };

    // Check for HTTP errors
    if response.status >= 400 {
        return Err(DownloadError::HttpStatus {
            url: url.to_string(),
            status: response.status,
        });
    }

    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DownloadError::FileCreateFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
    }

    let partial_path = partial_path_for(output_path);

    reporter.report(ProgressEvent::DownloadStarting {
        download_id: context.download_id,
        episode_title: episode.title.clone(),
        destination: output_path.to_path_buf(),
        content_length: response.content_length,
    });

    let transfer = Transfer {
        url,
        episode_title: &episode.title,
        partial_path: &partial_path,
        content_length: response.content_length,
        context,
        reporter,
    };

    let (bytes_downloaded, content_hash) = match transfer.run(response.body, cancel).await {
        Ok(done) => done,
        Err(e) => {
            let _ = tokio::fs::remove_file(&partial_path).await;
            return Err(e);
        }
    };

    if let Err(e) = tokio::fs::rename(&partial_path, output_path).await {
        let _ = tokio::fs::remove_file(&partial_path).await;
        return Err(DownloadError::FileWriteFailed {
            path: output_path.to_path_buf(),
            source: e,
        });
    }

    reporter.report(ProgressEvent::DownloadAudioCompleted {
        download_id: context.download_id,
        episode_title: episode.title.clone(),
        path: output_path.to_path_buf(),
        bytes_downloaded,
    });

    Ok(DownloadResult {
        path: output_path.to_path_buf(),
        bytes_downloaded,
        content_hash,
    })
}

struct Transfer<'a> {
    url: &'a str,
    episode_title: &'a str,
    partial_path: &'a Path,
    content_length: Option<u64>,
    context: &'a DownloadContext,
    reporter: &'a SharedProgressReporter,
}

impl Transfer<'_> {
    async fn run(
        &self,
        mut stream: ByteStream,
        cancel: &mut CancelSignal,
    ) -> Result<(u64, String), DownloadError> {
        let mut file =
            File::create(self.partial_path)
                .await
                .map_err(|e| DownloadError::FileCreateFailed {
                    path: self.partial_path.to_path_buf(),
                    source: e,
                })?;

        let mut hasher = Sha256::new();
        let mut bytes_downloaded: u64 = 0;
        let mut last_percent: u8 = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(DownloadError::Cancelled { url: self.url.to_string() });
                }
                next = stream.next() => next,
            };

            let Some(chunk_result) = next else { break };
            let chunk = chunk_result.map_err(|e| DownloadError::from_transport(self.url, e))?;

            file.write_all(&chunk)
                .await
                .map_err(|e| self.write_failed(e))?;

            hasher.update(&chunk);
            bytes_downloaded += chunk.len() as u64;

            last_percent = percent_of(bytes_downloaded, self.content_length).max(last_percent);
            self.report_percent(last_percent);
        }

        // Ensure all data is flushed to disk
        file.flush().await.map_err(|e| self.write_failed(e))?;

        if last_percent < 100 {
            self.report_percent(100);
        }

        Ok((bytes_downloaded, format!("sha256:{:x}", hasher.finalize())))
    }

    fn report_percent(&self, percent: u8) {
        self.reporter.report(ProgressEvent::DownloadProgressChanged {
            download_id: self.context.download_id,
            episode_title: self.episode_title.to_string(),
            percent,
        });
    }

    fn write_failed(&self, source: std::io::Error) -> DownloadError {
        DownloadError::FileWriteFailed {
            path: self.partial_path.to_path_buf(),
            source,
        }
    }
}

fn partial_path_for(output_path: &Path) -> PathBuf {
    let mut name = OsString::from(output_path.as_os_str());
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Percentage of `total` received so far; 0 while the total is unknown
fn percent_of(bytes_downloaded: u64, total: Option<u64>) -> u8 {
    match total {
        Some(total) if total > 0 => (bytes_downloaded.saturating_mul(100) / total).min(100) as u8,
        _ => 0,
    }
}

/// A download running on its own task
pub struct DownloadHandle {
    download_id: usize,
    cancel: CancelHandle,
    task: JoinHandle<Result<DownloadResult, DownloadError>>,
}

impl DownloadHandle {
    pub fn download_id(&self) -> usize {
        self.download_id
    }

    /// Request cancellation. A transfer that already finished is unaffected.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the transfer to end
    pub async fn wait(self) -> Result<DownloadResult, DownloadError> {
        self.task
            .await
            .unwrap_or_else(|e| Err(DownloadError::Interrupted(e.to_string())))
    }

    /// Wait for the transfer, cancelling it if `signal` resolves first
    pub async fn cancel_on<F: Future>(
        self,
        signal: F,
    ) -> Result<DownloadResult, DownloadError> {
        let cancel = self.cancel.clone();
        let wait = self.wait();
        tokio::pin!(wait);

        tokio::select! {
            result = &mut wait => result,
            _ = signal => {
                cancel.cancel();
                wait.await
            }
        }
    }
}

/// Run [`download_episode`] on a new task and report its terminal event.
///
/// Each transfer ends with exactly one of `DownloadAudioCompleted`,
/// `DownloadFailed` or `DownloadCancelled`.
pub fn spawn_download<C: HttpClient + Clone + 'static>(
    client: C,
    episode: Episode,
    output_path: PathBuf,
    context: DownloadContext,
    reporter: SharedProgressReporter,
) -> DownloadHandle {
    let (cancel, mut signal) = cancel_pair();

    let task = tokio::spawn(async move {
        tracing::info!(episode = %episode.title, path = %output_path.display(), "Download started");

        let result =
            download_episode(&client, &episode, &output_path, &context, &reporter, &mut signal)
                .await;

        match &result {
            Ok(done) => {
                tracing::info!(
                    episode = %episode.title,
                    bytes = done.bytes_downloaded,
                    "Download finished"
                );
            }
            Err(e) if e.is_cancelled() => {
                tracing::info!(episode = %episode.title, "Download cancelled");
                reporter.report(ProgressEvent::DownloadCancelled {
                    download_id: context.download_id,
                    episode_title: episode.title.clone(),
                });
            }
            Err(e) => {
                tracing::warn!(episode = %episode.title, error = %e, "Download failed");
                reporter.report(ProgressEvent::DownloadFailed {
                    download_id: context.download_id,
                    episode_title: episode.title.clone(),
                    error: e.to_string(),
                });
            }
        }

        result
    });

    DownloadHandle {
        download_id: context.download_id,
        cancel,
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{ChannelReporter, NoopReporter};
    use crate::test_support::{MockHttpClient, MockRoute};

    use tempfile::tempdir;
    use url::Url;

    const AUDIO_URL: &str = "http://e.test/ep1.mp3";

    fn make_episode() -> Episode {
        Episode {
            title: "Test Episode".to_string(),
            link: "http://e.test/ep1".to_string(),
            published_date: String::new(),
            audio_url: Url::parse(AUDIO_URL).unwrap(),
        }
    }

    fn context() -> DownloadContext {
        DownloadContext { download_id: 7 }
    }

    fn progress_values(events: &[ProgressEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::DownloadProgressChanged { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect()
    }

    fn drain(receiver: &mut tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn download_writes_file() {
        let dir = tempdir().unwrap();
        let output_path = dir.path().join("episode.mp3");
        let client = MockHttpClient::new().with_body(AUDIO_URL, "test audio content");
        let (_cancel, mut signal) = cancel_pair();

        let result = download_episode(
            &client,
            &make_episode(),
            &output_path,
            &context(),
            &NoopReporter::shared(),
            &mut signal,
        )
        .await
        .unwrap();

        assert_eq!(result.bytes_downloaded, 18); // "test audio content".len()
        assert!(result.content_hash.starts_with("sha256:"));
        assert_eq!(result.content_hash.len(), "sha256:".len() + 64);
        assert_eq!(std::fs::read(&output_path).unwrap(), b"test audio content");
        assert!(!partial_path_for(&output_path).exists());
    }

    #[tokio::test]
    async fn download_reports_non_decreasing_progress_and_one_completion() {
        let dir = tempdir().unwrap();
        let output_path = dir.path().join("episode.mp3");
        let client = MockHttpClient::new().with_chunks(
            AUDIO_URL,
            vec![vec![1; 10], vec![2; 30], vec![3; 20], vec![4; 40]],
        );
        let (reporter, mut receiver) = ChannelReporter::channel();
        let (_cancel, mut signal) = cancel_pair();

        download_episode(
            &client,
            &make_episode(),
            &output_path,
            &context(),
            &reporter,
            &mut signal,
        )
        .await
        .unwrap();

        let events = drain(&mut receiver);
        assert_eq!(progress_values(&events), [10, 40, 60, 100]);
        assert_eq!(events.iter().filter(|e| e.is_download_terminal()).count(), 1);
        assert!(matches!(
            events.last(),
            Some(ProgressEvent::DownloadAudioCompleted {
                download_id: 7,
                bytes_downloaded: 100,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn download_finishes_at_100_when_length_unknown() {
        let dir = tempdir().unwrap();
        let output_path = dir.path().join("episode.mp3");
        let client = MockHttpClient::new().with_route(
            AUDIO_URL,
            MockRoute::Body {
                chunks: vec![vec![0; 5], vec![0; 5]],
                content_length: None,
                stall: false,
            },
        );
        let (reporter, mut receiver) = ChannelReporter::channel();
        let (_cancel, mut signal) = cancel_pair();

        download_episode(
            &client,
            &make_episode(),
            &output_path,
            &context(),
            &reporter,
            &mut signal,
        )
        .await
        .unwrap();

        assert_eq!(progress_values(&drain(&mut receiver)), [0, 0, 100]);
    }

    #[tokio::test]
    async fn download_fails_on_http_error() {
        let dir = tempdir().unwrap();
        let output_path = dir.path().join("episode.mp3");
        let client = MockHttpClient::new().with_route(AUDIO_URL, MockRoute::Status(404));
        let (_cancel, mut signal) = cancel_pair();

        let result = download_episode(
            &client,
            &make_episode(),
            &output_path,
            &context(),
            &NoopReporter::shared(),
            &mut signal,
        )
        .await;

        match result.unwrap_err() {
            DownloadError::HttpStatus { status, .. } => assert_eq!(status, 404),
            other => panic!("Expected HttpStatus error, got {other:?}"),
        }
        assert!(!output_path.exists());
    }

    #[tokio::test]
    async fn download_maps_timeout() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient::new().with_route(AUDIO_URL, MockRoute::Timeout);
        let (_cancel, mut signal) = cancel_pair();

        let result = download_episode(
            &client,
            &make_episode(),
            &dir.path().join("episode.mp3"),
            &context(),
            &NoopReporter::shared(),
            &mut signal,
        )
        .await;

        assert!(matches!(result, Err(DownloadError::Timeout { .. })));
    }

    #[tokio::test]
    async fn download_fails_when_destination_is_unwritable() {
        let dir = tempdir().unwrap();
        // A regular file where the parent directory should be
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let client = MockHttpClient::new().with_body(AUDIO_URL, "audio");
        let (_cancel, mut signal) = cancel_pair();

        let result = download_episode(
            &client,
            &make_episode(),
            &blocker.join("episode.mp3"),
            &context(),
            &NoopReporter::shared(),
            &mut signal,
        )
        .await;

        assert!(matches!(
            result,
            Err(DownloadError::FileCreateFailed { .. })
        ));
    }

    #[tokio::test]
    async fn cancelled_before_start_makes_no_request() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient::new().with_body(AUDIO_URL, "audio");
        let (cancel, mut signal) = cancel_pair();
        cancel.cancel();

        let result = download_episode(
            &client,
            &make_episode(),
            &dir.path().join("episode.mp3"),
            &context(),
            &NoopReporter::shared(),
            &mut signal,
        )
        .await;

        assert!(matches!(result, Err(DownloadError::Cancelled { .. })));
        assert_eq!(client.total_requests(), 0);
    }

    #[tokio::test]
    async fn spawned_download_can_be_cancelled_mid_transfer() {
        let dir = tempdir().unwrap();
        let output_path = dir.path().join("episode.mp3");
        let client = MockHttpClient::new().with_route(
            AUDIO_URL,
            MockRoute::Body {
                chunks: vec![vec![0; 25]],
                content_length: Some(100),
                stall: true,
            },
        );
        let (reporter, mut receiver) = ChannelReporter::channel();

        let handle = spawn_download(
            client,
            make_episode(),
            output_path.clone(),
            context(),
            reporter,
        );

        // Wait until the first chunk has been written
        loop {
            match receiver.recv().await.unwrap() {
                ProgressEvent::DownloadProgressChanged { percent, .. } => {
                    assert_eq!(percent, 25);
                    break;
                }
                _ => continue,
            }
        }

        handle.cancel();
        let result = handle.wait().await;

        assert!(matches!(result, Err(DownloadError::Cancelled { .. })));
        assert!(!output_path.exists());
        assert!(!partial_path_for(&output_path).exists());

        let events = drain(&mut receiver);
        assert_eq!(
            events,
            [ProgressEvent::DownloadCancelled {
                download_id: 7,
                episode_title: "Test Episode".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn interrupt_signal_cancels_and_removes_partial_file() {
        let dir = tempdir().unwrap();
        let output_path = dir.path().join("episode.mp3");
        let client = MockHttpClient::new().with_route(
            AUDIO_URL,
            MockRoute::Body {
                chunks: vec![vec![0; 25]],
                content_length: Some(100),
                stall: true,
            },
        );
        let (reporter, mut receiver) = ChannelReporter::channel();
        let (interrupt_tx, interrupt_rx) = tokio::sync::oneshot::channel::<()>();

        let handle = spawn_download(
            client,
            make_episode(),
            output_path.clone(),
            context(),
            reporter,
        );
        let waiting = tokio::spawn(handle.cancel_on(async move {
            let _ = interrupt_rx.await;
        }));

        while !matches!(
            receiver.recv().await.unwrap(),
            ProgressEvent::DownloadProgressChanged { .. }
        ) {}
        assert!(partial_path_for(&output_path).exists());

        interrupt_tx.send(()).unwrap();
        let result = waiting.await.unwrap();

        assert!(matches!(result, Err(DownloadError::Cancelled { .. })));
        assert!(!output_path.exists());
        assert!(!partial_path_for(&output_path).exists());
        assert_eq!(
            drain(&mut receiver),
            [ProgressEvent::DownloadCancelled {
                download_id: 7,
                episode_title: "Test Episode".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn finished_download_ignores_pending_signal() {
        let dir = tempdir().unwrap();
        let output_path = dir.path().join("episode.mp3");
        let client = MockHttpClient::new().with_body(AUDIO_URL, "audio");

        let handle = spawn_download(
            client,
            make_episode(),
            output_path.clone(),
            context(),
            NoopReporter::shared(),
        );
        let result = handle.cancel_on(std::future::pending::<()>()).await.unwrap();

        assert_eq!(result.path, output_path);
        assert_eq!(std::fs::read(&output_path).unwrap(), b"audio");
    }

    #[tokio::test]
    async fn spawned_download_reports_failure_once() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient::new().with_route(AUDIO_URL, MockRoute::Status(500));
        let (reporter, mut receiver) = ChannelReporter::channel();

        let handle = spawn_download(
            client,
            make_episode(),
            dir.path().join("episode.mp3"),
            context(),
            reporter,
        );
        assert!(handle.wait().await.is_err());

        let events = drain(&mut receiver);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ProgressEvent::DownloadFailed { download_id: 7, .. }));
    }

    #[test]
    fn percent_is_clamped_and_zero_without_total() {
        assert_eq!(percent_of(50, Some(200)), 25);
        assert_eq!(percent_of(300, Some(200)), 100);
        assert_eq!(percent_of(50, None), 0);
        assert_eq!(percent_of(50, Some(0)), 0);
    }

    #[test]
    fn partial_path_appends_suffix() {
        assert_eq!(
            partial_path_for(Path::new("/tmp/My Ep.mp3")),
            PathBuf::from("/tmp/My Ep.mp3.partial")
        );
    }
}
