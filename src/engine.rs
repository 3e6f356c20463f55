// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use url::Url;

use crate::config::EngineConfig;
use crate::episode::{
    DownloadContext, DownloadHandle, audio_file_name, sanitize_file_name, spawn_download,
};
use crate::error::EngineError;
use crate::feed::{Episode, fetch_document, parse_feed};
use crate::http::HttpClient;
use crate::progress::{ProgressEvent, SharedProgressReporter};
use crate::store::{CacheStore, FeedSource, SourceStore};
use crate::sync::{SyncReport, sync_sources};

/// Immutable view of the subscribed sources and their episodes
pub type SourcesSnapshot = Arc<[FeedSource]>;

type SyncReply = oneshot::Sender<Result<SyncReport, EngineError>>;

/// Work queued for the engine's worker
enum Command {
    Sync {
        reply: Option<SyncReply>,
    },
    AddSource {
        title: String,
        url: String,
        /// Feed document already fetched by the caller, cached on success
        document: Option<Bytes>,
        reply: oneshot::Sender<Result<(), EngineError>>,
        /// Receives the report of the sync that follows a successful add
        synced: SyncReply,
    },
    Refresh {
        reply: Option<SyncReply>,
    },
}

/// Worker owning the subscription list and the feed cache.
///
/// Commands are handled one at a time, so a sync requested while another is
/// running waits its turn, and adding a source is followed by its sync before
/// anything else runs.
pub struct SyncEngine<C> {
    client: C,
    store: SourceStore,
    cache: CacheStore,
    reporter: SharedProgressReporter,
    snapshot: watch::Sender<SourcesSnapshot>,
    receiver: mpsc::Receiver<Command>,
}

impl<C: HttpClient + Clone + 'static> SyncEngine<C> {
    /// Start the worker on the current tokio runtime and return its handle
    pub fn spawn(
        client: C,
        config: EngineConfig,
        reporter: SharedProgressReporter,
    ) -> EngineHandle<C> {
        let (sender, receiver) = mpsc::channel(config.command_buffer.max(1));
        let (snapshot, snapshot_rx) = watch::channel(SourcesSnapshot::from(Vec::new()));

        let engine = SyncEngine {
            client: client.clone(),
            store: SourceStore::new(config.sources_path),
            cache: CacheStore::new(config.cache_dir),
            reporter: reporter.clone(),
            snapshot,
            receiver,
        };
        tokio::spawn(engine.run());

        EngineHandle {
            sender,
            snapshot: snapshot_rx,
            client,
            download_dir: config.download_dir,
            reporter,
            next_download_id: Arc::new(AtomicUsize::new(0)),
        }
    }

    async fn run(mut self) {
        tracing::info!(store = %self.store.path().display(), "Sync engine started");

        while let Some(command) = self.receiver.recv().await {
            self.handle_command(command).await;
        }

        tracing::info!("Sync engine stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Sync { reply } => {
                let result = self.run_sync().await;
                respond(reply, result);
            }

            Command::AddSource {
                title,
                url,
                document,
                reply,
                synced,
            } => {
                let result = self.add_source(&title, &url, document.as_deref());
                let added = result.is_ok();
                let _ = reply.send(result);

                if added {
                    let result = self.run_sync().await;
                    respond(Some(synced), result);
                }
            }

            Command::Refresh { reply } => {
                tracing::info!(cache = %self.cache.root().display(), "Invalidating feed cache");
                let result = match self.cache.invalidate() {
                    Ok(()) => self.run_sync().await,
                    Err(e) => Err(e.into()),
                };
                respond(reply, result);
            }
        }
    }

    async fn run_sync(&mut self) -> Result<SyncReport, EngineError> {
        self.reporter
            .report(ProgressEvent::StateChanged { syncing: true });

        let result = match sync_sources(&self.client, &self.store, &self.cache, &self.reporter)
            .await
        {
            Ok(report) => {
                self.snapshot
                    .send_replace(SourcesSnapshot::from(report.sources.clone()));
                Ok(report)
            }
            Err(e) => {
                tracing::error!(error = %e, "Sync failed");
                self.reporter.report(ProgressEvent::SyncFailed {
                    error: e.to_string(),
                });
                Err(e.into())
            }
        };

        self.reporter
            .report(ProgressEvent::StateChanged { syncing: false });
        result
    }

    fn add_source(
        &self,
        title: &str,
        url: &str,
        document: Option<&[u8]>,
    ) -> Result<(), EngineError> {
        Url::parse(url).map_err(|e| EngineError::InvalidUrl {
            url: url.to_string(),
            source: e,
        })?;

        let mut sources = self.store.load_or_default()?;

        if sources.iter().any(|s| s.url == url) {
            return Err(EngineError::DuplicateSource {
                url: url.to_string(),
            });
        }

        let cache_name = sanitize_file_name(title);
        if let Some(existing) = sources
            .iter()
            .find(|s| sanitize_file_name(&s.title) == cache_name)
        {
            return Err(EngineError::TitleCollision {
                title: title.to_string(),
                existing: existing.title.clone(),
            });
        }

        sources.push(FeedSource::new(title, url));
        self.store.save(&sources)?;

        if let Some(document) = document {
            // The next sync fetches the feed again if this fails
            if let Err(e) = self.cache.write(title, document) {
                tracing::warn!(source = %title, error = %e, "Failed to cache added feed");
            }
        }

        tracing::info!(source = %title, url = %url, "Source added");
        Ok(())
    }
}

fn respond(reply: Option<SyncReply>, result: Result<SyncReport, EngineError>) {
    if let Some(reply) = reply {
        let _ = reply.send(result);
    }
}

/// A source persisted by [`EngineHandle::add_source`] or
/// [`EngineHandle::add_feed`], whose follow-up sync may still be running
#[derive(Debug)]
pub struct AddedSource {
    pub title: String,
    synced: oneshot::Receiver<Result<SyncReport, EngineError>>,
}

impl AddedSource {
    /// Wait for the sync that runs right after the add
    pub async fn synced(self) -> Result<SyncReport, EngineError> {
        self.synced.await.map_err(|_| EngineError::Stopped)?
    }
}

/// Cloneable front door to a running [`SyncEngine`]
#[derive(Clone)]
pub struct EngineHandle<C> {
    sender: mpsc::Sender<Command>,
    snapshot: watch::Receiver<SourcesSnapshot>,
    client: C,
    download_dir: PathBuf,
    reporter: SharedProgressReporter,
    next_download_id: Arc<AtomicUsize>,
}

impl<C: HttpClient + Clone + 'static> EngineHandle<C> {
    /// Queue a sync pass; completion is observed through `StateChanged`
    pub async fn start_process(&self) -> Result<(), EngineError> {
        self.send(Command::Sync { reply: None }).await
    }

    /// Queue a sync pass and wait for its report
    pub async fn sync(&self) -> Result<SyncReport, EngineError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Sync { reply: Some(reply) }).await?;
        response.await.map_err(|_| EngineError::Stopped)?
    }

    /// Drop every cached feed document, then sync
    pub async fn refresh(&self) -> Result<SyncReport, EngineError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Refresh { reply: Some(reply) }).await?;
        response.await.map_err(|_| EngineError::Stopped)?
    }

    /// Subscribe to `url` under `title`.
    ///
    /// Returns once the source is persisted; the sync that populates its
    /// episodes runs next on the worker and can be awaited through
    /// [`AddedSource::synced`].
    pub async fn add_source(
        &self,
        title: &str,
        url: &str,
    ) -> Result<AddedSource, EngineError> {
        self.request_add(title, url, None).await
    }

    /// Fetch `url`, subscribe to it under its own channel title and cache
    /// the fetched document.
    pub async fn add_feed(&self, url: &str) -> Result<AddedSource, EngineError> {
        Url::parse(url).map_err(|e| EngineError::InvalidUrl {
            url: url.to_string(),
            source: e,
        })?;

        let document = fetch_document(&self.client, url).await?;
        let feed = parse_feed(&document)?;

        self.request_add(&feed.title, url, Some(document)).await
    }

    /// Current sources and episodes as of the last completed sync
    pub fn sources(&self) -> SourcesSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified whenever a sync publishes a new snapshot
    pub fn watch_sources(&self) -> watch::Receiver<SourcesSnapshot> {
        self.snapshot.clone()
    }

    /// Episodes of a source whose title contains `query`, ignoring case.
    /// An empty query matches every episode.
    pub fn find_episodes(
        &self,
        source_index: usize,
        query: &str,
    ) -> Result<Vec<Episode>, EngineError> {
        let sources = self.sources();
        let source = sources
            .get(source_index)
            .ok_or(EngineError::UnknownSource { source_index })?;

        let query = query.to_lowercase();
        Ok(source
            .episodes
            .iter()
            .filter(|e| e.title.to_lowercase().contains(&query))
            .cloned()
            .collect())
    }

    /// Download the first episode of a source whose title contains `query`
    pub fn download_matching(
        &self,
        source_index: usize,
        query: &str,
    ) -> Result<DownloadHandle, EngineError> {
        let episode = self
            .find_episodes(source_index, query)?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::NoMatchingEpisode {
                source_index,
                query: query.to_string(),
            })?;

        Ok(self.download_episode(&episode))
    }

    /// Download an episode by its position in the current snapshot
    pub fn download(
        &self,
        source_index: usize,
        episode_index: usize,
    ) -> Result<DownloadHandle, EngineError> {
        let sources = self.sources();
        let episode = sources
            .get(source_index)
            .and_then(|s| s.episodes.get(episode_index))
            .ok_or(EngineError::IndexOutOfRange {
                source_index,
                episode_index,
            })?;

        Ok(self.download_episode(episode))
    }

    /// Download `episode` into the download directory on its own task.
    ///
    /// Concurrent downloads are not serialized; their events carry distinct
    /// download ids.
    pub fn download_episode(&self, episode: &Episode) -> DownloadHandle {
        let output_path = self.download_dir.join(audio_file_name(episode));
        let context = DownloadContext {
            download_id: self.next_download_id.fetch_add(1, Ordering::SeqCst),
        };

        spawn_download(
            self.client.clone(),
            episode.clone(),
            output_path,
            context,
            self.reporter.clone(),
        )
    }

    async fn request_add(
        &self,
        title: &str,
        url: &str,
        document: Option<Bytes>,
    ) -> Result<AddedSource, EngineError> {
        let (reply, response) = oneshot::channel();
        let (synced, synced_rx) = oneshot::channel();
        self.send(Command::AddSource {
            title: title.to_string(),
            url: url.to_string(),
            document,
            reply,
            synced,
        })
        .await?;
        response.await.map_err(|_| EngineError::Stopped)??;

        Ok(AddedSource {
            title: title.to_string(),
            synced: synced_rx,
        })
    }

    async fn send(&self, command: Command) -> Result<(), EngineError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| EngineError::Stopped)
    }
}
