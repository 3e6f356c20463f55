// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;
use thiserror::Error;

/// Failures raised by an [`HttpClient`](crate::http::HttpClient) implementation
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("HTTP status {0}")]
    Status(u16),

    #[error(transparent)]
    Request(#[from] reqwest::Error),
}

/// Errors that can occur when parsing RSS feeds
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Malformed feed: {0}")]
    Malformed(#[from] rss::Error),

    #[error("Malformed feed: missing rss/channel/title")]
    MissingTitle,
}

/// Errors that can occur when retrieving a feed document
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Failed to fetch feed from {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("Timed out fetching feed from {url}")]
    Timeout { url: String },
}

impl FetchError {
    pub(crate) fn from_transport(url: &str, error: TransportError) -> Self {
        match error {
            TransportError::Timeout => FetchError::Timeout {
                url: url.to_string(),
            },
            source => FetchError::Network {
                url: url.to_string(),
                source,
            },
        }
    }
}

/// Errors that can occur during episode downloads
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("HTTP request failed for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("Timed out downloading {url}")]
    Timeout { url: String },

    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Failed to create file {path}: {source}")]
    FileCreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write to file {path}: {source}")]
    FileWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Download of {url} was cancelled")]
    Cancelled { url: String },

    #[error("Download task stopped unexpectedly: {0}")]
    Interrupted(String),
}

impl DownloadError {
    pub(crate) fn from_transport(url: &str, error: TransportError) -> Self {
        match error {
            TransportError::Timeout => DownloadError::Timeout {
                url: url.to_string(),
            },
            TransportError::Status(status) => DownloadError::HttpStatus {
                url: url.to_string(),
                status,
            },
            source => DownloadError::Network {
                url: url.to_string(),
                source,
            },
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DownloadError::Cancelled { .. })
    }
}

/// Errors that can occur in the raw feed cache
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("No cached feed for '{title}' at {path}")]
    Miss { title: String, path: PathBuf },

    #[error("Failed to create cache directory {path}: {source}")]
    CreateDirectoryFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read cache file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write cache file {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove cache directory {path}: {source}")]
    RemoveFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur when loading or saving the subscription store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Subscription store not found: {0}")]
    Missing(PathBuf),

    #[error("Failed to read subscription store {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Subscription store {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write subscription store {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize subscription store: {0}")]
    SerializeFailed(#[from] serde_json::Error),
}

/// Failure of a single source during a sync pass. Never aborts the pass.
#[derive(Error, Debug)]
pub enum SourceSyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Top-level errors for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Source with URL {url} is already subscribed")]
    DuplicateSource { url: String },

    #[error("Title '{title}' collides with subscribed source '{existing}'")]
    TitleCollision { title: String, existing: String },

    #[error("Invalid feed URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("No episode at source {source_index}, episode {episode_index}")]
    IndexOutOfRange {
        source_index: usize,
        episode_index: usize,
    },

    #[error("No source at index {source_index}")]
    UnknownSource { source_index: usize },

    #[error("No episode of source {source_index} matches '{query}'")]
    NoMatchingEpisode { source_index: usize, query: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Sync engine has stopped")]
    Stopped,
}
