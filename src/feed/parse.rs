// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use url::Url;

use crate::error::FeedError;

/// A parsed feed: channel title plus its downloadable episodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFeed {
    pub title: String,
    pub episodes: Vec<Episode>,
}

/// Represents a single podcast episode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Episode {
    pub title: String,
    pub link: String,
    /// Publication date exactly as the feed wrote it
    pub published_date: String,
    pub audio_url: Url,
}

/// Parse RSS feed XML bytes into a title and its episodes.
///
/// Items without a title or without a usable enclosure are left out; they
/// are not errors. Document order is preserved.
pub fn parse_feed(xml_bytes: &[u8]) -> Result<ParsedFeed, FeedError> {
    let channel = rss::Channel::read_from(xml_bytes)?;

    let title = channel.title().trim();
    if title.is_empty() {
        return Err(FeedError::MissingTitle);
    }

    let episodes = channel.items().iter().filter_map(parse_episode).collect();

    Ok(ParsedFeed {
        title: title.to_string(),
        episodes,
    })
}

fn parse_episode(item: &rss::Item) -> Option<Episode> {
    let enclosure = item.enclosure()?;
    let audio_url = Url::parse(enclosure.url().trim()).ok()?;

    let title = item.title().map(str::trim).filter(|t| !t.is_empty())?;

    let link = item
        .link()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .unwrap_or_else(|| audio_url.to_string());

    Some(Episode {
        title: title.to_string(),
        link,
        published_date: item.pub_date().unwrap_or_default().to_string(),
        audio_url,
    })
}
