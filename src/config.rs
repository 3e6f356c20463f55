use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where the engine keeps its files and how it talks to the network
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Subscription file
    pub sources_path: PathBuf,
    /// Directory holding one raw document per subscribed feed
    pub cache_dir: PathBuf,
    /// Directory downloaded episodes are written to
    pub download_dir: PathBuf,
    /// Per-request timeout for feed and enclosure requests
    pub request_timeout: Duration,
    /// Commands that may wait for the worker before senders block
    pub command_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::in_dir(".")
    }
}

impl EngineConfig {
    /// Default layout rooted at `root`
    pub fn in_dir(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            sources_path: root.join("sources.json"),
            cache_dir: root.join("Cache"),
            download_dir: root.join("Podcasts"),
            request_timeout: Duration::from_secs(30),
            command_buffer: 32,
        }
    }
}
