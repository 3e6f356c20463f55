use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::episode::sanitize_file_name;
use crate::error::CacheError;

const CACHE_EXTENSION: &str = "xml";

/// Raw feed documents, one file per source title.
///
/// A cached document is trusted until [`invalidate`](Self::invalidate)
/// removes the whole cache; writes never replace an existing entry.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cache file for a source title
    pub fn path_for(&self, title: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}", sanitize_file_name(title), CACHE_EXTENSION))
    }

    pub fn exists(&self, title: &str) -> bool {
        self.path_for(title).is_file()
    }

    pub fn read(&self, title: &str) -> Result<Vec<u8>, CacheError> {
        let path = self.path_for(title);
        std::fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => CacheError::Miss {
                title: title.to_string(),
                path,
            },
            _ => CacheError::ReadFailed { path, source: e },
        })
    }

    /// Store `raw` for `title` unless something is already cached.
    ///
    /// Returns `false` when an existing entry was kept.
    pub fn write(&self, title: &str, raw: &[u8]) -> Result<bool, CacheError> {
        self.ensure_root()?;
        let path = self.path_for(title);

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(CacheError::WriteFailed { path, source: e }),
        };

        if let Err(e) = file.write_all(raw).and_then(|_| file.flush()) {
            drop(file);
            let _ = std::fs::remove_file(&path);
            return Err(CacheError::WriteFailed { path, source: e });
        }

        Ok(true)
    }

    /// Delete every cached document
    pub fn invalidate(&self) -> Result<(), CacheError> {
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::RemoveFailed {
                path: self.root.clone(),
                source: e,
            }),
        }
    }

    fn ensure_root(&self) -> Result<(), CacheError> {
        std::fs::create_dir_all(&self.root).map_err(|e| CacheError::CreateDirectoryFailed {
            path: self.root.clone(),
            source: e,
        })
    }
}
