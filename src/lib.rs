pub mod config;
pub mod engine;
pub mod episode;
pub mod error;
pub mod feed;
pub mod http;
pub mod progress;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export main types for convenience
pub use config::EngineConfig;
pub use engine::{AddedSource, EngineHandle, SourcesSnapshot, SyncEngine};
pub use episode::{
    AUDIO_EXTENSION, DownloadHandle, DownloadResult, audio_file_name, sanitize_file_name,
};
pub use error::{
    CacheError, DownloadError, EngineError, FeedError, FetchError, SourceSyncError, StoreError,
    TransportError,
};
pub use feed::{Episode, ParsedFeed, fetch_document, parse_feed};
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use progress::{
    ChannelReporter, NoopReporter, ProgressEvent, ProgressReporter, SharedProgressReporter,
};
pub use store::{CacheStore, FeedSource, SourceStore};
pub use sync::{SyncReport, sync_sources};
