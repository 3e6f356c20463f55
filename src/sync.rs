// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::{SourceSyncError, StoreError};
use crate::feed::{fetch_document, parse_feed};
use crate::http::HttpClient;
use crate::progress::{ProgressEvent, SharedProgressReporter};
use crate::store::{CacheStore, FeedSource, SourceStore};

/// Result of a sync pass
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Every subscribed source, in store order, with freshly parsed episodes
    pub sources: Vec<FeedSource>,
    /// Number of sources served from the cache
    pub from_cache: usize,
    /// Number of sources fetched from the network
    pub fetched: usize,
    /// Details of failed sources (title, error message)
    pub failed_sources: Vec<(String, String)>,
}

/// Load the subscription list and populate every source's episodes.
///
/// Sources are processed one at a time in store order. A cached document is
/// parsed without touching the network; otherwise the feed is fetched,
/// parsed, and then cached. A failing source is reported and skipped. Only a
/// store that cannot be read fails the whole pass; a missing store counts as
/// an empty one.
pub async fn sync_sources<C: HttpClient>(
    client: &C,
    store: &SourceStore,
    cache: &CacheStore,
    reporter: &SharedProgressReporter,
) -> Result<SyncReport, StoreError> {
    let mut sources = store.load_or_default()?;
    let mut report = SyncReport::default();

    for source in &mut sources {
        let from_cache = cache.exists(&source.title);

        reporter.report(ProgressEvent::LoadingSource {
            title: source.title.clone(),
            url: source.url.clone(),
            from_cache,
        });

        match sync_source(client, cache, source, from_cache).await {
            Ok(()) => {
                if from_cache {
                    report.from_cache += 1;
                } else {
                    report.fetched += 1;
                }

                tracing::info!(
                    source = %source.title,
                    episodes = source.episodes.len(),
                    from_cache,
                    "Source loaded"
                );

                reporter.report(ProgressEvent::SourceLoaded {
                    title: source.title.clone(),
                    episode_count: source.episodes.len(),
                    from_cache,
                });
            }
            Err(e) => {
                tracing::warn!(source = %source.title, error = %e, "Source failed to load");

                reporter.report(ProgressEvent::SourceFailed {
                    title: source.title.clone(),
                    error: e.to_string(),
                });
                report
                    .failed_sources
                    .push((source.title.clone(), e.to_string()));
            }
        }
    }

    reporter.report(ProgressEvent::SyncCompleted {
        source_count: sources.len(),
        from_cache: report.from_cache,
        fetched: report.fetched,
        failed: report.failed_sources.len(),
    });

    report.sources = sources;
    Ok(report)
}

async fn sync_source<C: HttpClient>(
    client: &C,
    cache: &CacheStore,
    source: &mut FeedSource,
    from_cache: bool,
) -> Result<(), SourceSyncError> {
    if from_cache {
        tracing::debug!(source = %source.title, "Using cached feed");
        let raw = cache.read(&source.title)?;
        source.episodes = parse_feed(&raw)?.episodes;
        return Ok(());
    }

    tracing::debug!(source = %source.title, url = %source.url, "Fetching feed");
    let raw = fetch_document(client, &source.url).await?;
    let episodes = parse_feed(&raw)?.episodes;

    // Only documents that parsed are worth trusting later
    cache.write(&source.title, &raw)?;
    source.episodes = episodes;
    Ok(())
}
