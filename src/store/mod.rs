mod cache;
mod sources;

pub use cache::CacheStore;
pub use sources::{FeedSource, SourceStore};
