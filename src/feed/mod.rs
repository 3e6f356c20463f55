mod fetch;
mod parse;

pub use fetch::fetch_document;
pub use parse::{Episode, ParsedFeed, parse_feed};
