use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

/// Events emitted by the engine while syncing feeds and downloading episodes
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// The engine entered (`true`) or left (`false`) the syncing state
    StateChanged { syncing: bool },

    /// A source is about to be loaded
    LoadingSource {
        title: String,
        url: String,
        from_cache: bool,
    },

    /// A source's episodes have been populated
    SourceLoaded {
        title: String,
        episode_count: usize,
        from_cache: bool,
    },

    /// A source failed to load; the pass continues with the next one
    SourceFailed { title: String, error: String },

    /// A sync pass finished
    SyncCompleted {
        source_count: usize,
        from_cache: usize,
        fetched: usize,
        failed: usize,
    },

    /// A sync pass could not start, e.g. because the store is corrupt
    SyncFailed { error: String },

    /// A download is starting
    DownloadStarting {
        /// Identifies the transfer among concurrent downloads
        download_id: usize,
        episode_title: String,
        destination: PathBuf,
        /// Expected content length in bytes, if known
        content_length: Option<u64>,
    },

    /// Download progress update, percent in 0..=100 and never decreasing
    DownloadProgressChanged {
        download_id: usize,
        episode_title: String,
        percent: u8,
    },

    /// A download completed successfully
    DownloadAudioCompleted {
        download_id: usize,
        episode_title: String,
        path: PathBuf,
        bytes_downloaded: u64,
    },

    /// A download failed
    DownloadFailed {
        download_id: usize,
        episode_title: String,
        error: String,
    },

    /// A download was cancelled before completion
    DownloadCancelled {
        download_id: usize,
        episode_title: String,
    },
}

impl ProgressEvent {
    /// Whether this event ends a download (exactly one per transfer)
    pub fn is_download_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::DownloadAudioCompleted { .. }
                | ProgressEvent::DownloadFailed { .. }
                | ProgressEvent::DownloadCancelled { .. }
        )
    }
}

/// Trait for reporting engine events.
///
/// Implementations can use this to drive a user interface, log messages,
/// or collect statistics. Events for one sync pass arrive in state machine
/// order; events from concurrent downloads may interleave.
pub trait ProgressReporter: Send + Sync {
    /// Report a progress event
    fn report(&self, event: ProgressEvent);
}

/// A shared reference to a progress reporter
pub type SharedProgressReporter = Arc<dyn ProgressReporter>;

/// A no-op progress reporter that silently ignores all events.
/// Useful for tests or quiet mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: ProgressEvent) {}
}

impl NoopReporter {
    /// Create a new NoopReporter wrapped in an Arc
    pub fn shared() -> SharedProgressReporter {
        Arc::new(Self)
    }
}

/// Forwards events into an unbounded channel for consumers that poll or block
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelReporter {
    /// Create a reporter together with the receiving end of its channel
    pub fn channel() -> (SharedProgressReporter, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Arc::new(Self { sender }), receiver)
    }
}

impl ProgressReporter for ChannelReporter {
    fn report(&self, event: ProgressEvent) {
        // A dropped receiver just means nobody is listening anymore
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_reporter_handles_all_events() {
        let reporter = NoopReporter;

        reporter.report(ProgressEvent::StateChanged { syncing: true });
        reporter.report(ProgressEvent::SourceFailed {
            title: "Example".to_string(),
            error: "Connection timeout".to_string(),
        });
        reporter.report(ProgressEvent::DownloadProgressChanged {
            download_id: 0,
            episode_title: "Episode 1".to_string(),
            percent: 50,
        });
        reporter.report(ProgressEvent::StateChanged { syncing: false });
    }

    #[test]
    fn channel_reporter_preserves_order() {
        let (reporter, mut receiver) = ChannelReporter::channel();

        reporter.report(ProgressEvent::StateChanged { syncing: true });
        reporter.report(ProgressEvent::SyncCompleted {
            source_count: 1,
            from_cache: 1,
            fetched: 0,
            failed: 0,
        });
        reporter.report(ProgressEvent::StateChanged { syncing: false });

        assert_eq!(
            receiver.try_recv().unwrap(),
            ProgressEvent::StateChanged { syncing: true }
        );
        assert!(matches!(
            receiver.try_recv().unwrap(),
            ProgressEvent::SyncCompleted { source_count: 1, .. }
        ));
        assert_eq!(
            receiver.try_recv().unwrap(),
            ProgressEvent::StateChanged { syncing: false }
        );
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn channel_reporter_ignores_dropped_receiver() {
        let (reporter, receiver) = ChannelReporter::channel();
        drop(receiver);

        reporter.report(ProgressEvent::StateChanged { syncing: true });
    }

    #[test]
    fn terminal_download_events_are_recognised() {
        let completed = ProgressEvent::DownloadAudioCompleted {
            download_id: 0,
            episode_title: "Ep".to_string(),
            path: PathBuf::from("Ep.mp3"),
            bytes_downloaded: 10,
        };
        let progress = ProgressEvent::DownloadProgressChanged {
            download_id: 0,
            episode_title: "Ep".to_string(),
            percent: 10,
        };

        assert!(completed.is_download_terminal());
        assert!(!progress.is_download_terminal());
    }
}
