// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::feed::Episode;

/// A subscribed feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSource {
    pub title: String,
    pub url: String,
    /// Empty until the source has been synced
    pub episodes: Vec<Episode>,
}

impl FeedSource {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            episodes: Vec::new(),
        }
    }
}

/// Serializable entry of the subscription file
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SourceRecord {
    title: String,
    url: String,
}

/// On-disk layout of the subscription file
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<String>,
    sources: Vec<SourceRecord>,
}

/// The subscription list, persisted as a JSON document
#[derive(Debug, Clone)]
pub struct SourceStore {
    path: PathBuf,
}

impl SourceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all sources in stored order, with empty episode lists
    pub fn load(&self) -> Result<Vec<FeedSource>, StoreError> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StoreError::Missing(self.path.clone()),
            _ => StoreError::ReadFailed {
                path: self.path.clone(),
                source: e,
            },
        })?;

        let document: StoreDocument =
            serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
                path: self.path.clone(),
                source: e,
            })?;

        Ok(document
            .sources
            .into_iter()
            .map(|record| FeedSource::new(record.title, record.url))
            .collect())
    }

    /// Like [`load`](Self::load), but a store that does not exist yet is empty
    pub fn load_or_default(&self) -> Result<Vec<FeedSource>, StoreError> {
        match self.load() {
            Err(StoreError::Missing(_)) => Ok(Vec::new()),
            other => other,
        }
    }

    /// Rewrite the whole store with `sources`, keeping their order
    pub fn save(&self, sources: &[FeedSource]) -> Result<(), StoreError> {
        let document = StoreDocument {
            updated_at: Some(Utc::now().to_rfc3339()),
            sources: sources
                .iter()
                .map(|s| SourceRecord {
                    title: s.title.clone(),
                    url: s.url.clone(),
                })
                .collect(),
        };
        let json = serde_json::to_string_pretty(&document)?;

        let write_failed = |source| StoreError::WriteFailed {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_failed)?;
        }

        // Replace atomically so a failed write never leaves half a store behind
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json).map_err(write_failed)?;
        std::fs::rename(&tmp_path, &self.path).map_err(write_failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    #[test]
    fn save_and_load_preserve_order() {
        let dir = tempdir().unwrap();
        let store = SourceStore::new(dir.path().join("sources.json"));
        let sources = vec![
            FeedSource::new("Second", "http://e.test/2.xml"),
            FeedSource::new("First", "http://e.test/1.xml"),
        ];

        store.save(&sources).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(loaded, sources);
    }

    #[test]
    fn load_drops_nothing_but_episodes() {
        let dir = tempdir().unwrap();
        let store = SourceStore::new(dir.path().join("sources.json"));
        let mut source = FeedSource::new("Example", "http://e.test/feed.xml");
        source.episodes.push(Episode {
            title: "Ep".to_string(),
            link: "http://e.test/ep".to_string(),
            published_date: String::new(),
            audio_url: url::Url::parse("http://e.test/ep.mp3").unwrap(),
        });

        store.save(&[source]).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(loaded, [FeedSource::new("Example", "http://e.test/feed.xml")]);
    }

    #[test]
    fn load_missing_store_fails() {
        let dir = tempdir().unwrap();
        let store = SourceStore::new(dir.path().join("sources.json"));

        assert!(matches!(store.load(), Err(StoreError::Missing(_))));
        assert!(store.load_or_default().unwrap().is_empty());
    }

    #[test]
    fn load_corrupt_store_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sources.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = SourceStore::new(&path);

        assert!(matches!(store.load(), Err(StoreError::Corrupt { .. })));
        assert!(matches!(
            store.load_or_default(),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn load_accepts_hand_written_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sources.json");
        std::fs::write(
            &path,
            r#"{"sources": [{"title": "Example", "url": "http://e.test/feed.xml"}]}"#,
        )
        .unwrap();

        let loaded = SourceStore::new(&path).load().unwrap();
        assert_eq!(loaded, [FeedSource::new("Example", "http://e.test/feed.xml")]);
    }

    #[test]
    fn save_creates_parent_directory() {
        let dir = tempdir().unwrap();
        let store = SourceStore::new(dir.path().join("nested").join("sources.json"));

        store.save(&[]).unwrap();

        assert!(store.path().exists());
        assert!(store.load().unwrap().is_empty());
        assert!(!dir.path().join("nested").join("sources.json.tmp").exists());
    }
}
