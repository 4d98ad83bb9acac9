//! File, cache-entry and in-memory sources.

use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::error::SourceError;

use super::{CacheInvalidator, DataSource, SourceKind, SourceProvider, SourceStream};

/// URI scheme for entries in the configured disk cache directory.
pub const CACHE_SCHEME: &str = "cache://";

/// URI scheme for plain files. Bare paths are treated the same way.
pub const FILE_SCHEME: &str = "file://";

// =============================================================================
// FileSource
// =============================================================================

/// A plain image file on disk.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    identity: String,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let identity = path.display().to_string();
        Self { path, identity }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DataSource for FileSource {
    fn open_stream(&self) -> Result<Box<dyn SourceStream>, SourceError> {
        let file = open_file(&self.path)?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn identity(&self) -> &str {
        &self.identity
    }

    fn kind(&self) -> SourceKind {
        SourceKind::PlainFile {
            path: self.path.clone(),
        }
    }
}

// =============================================================================
// CacheEntrySource
// =============================================================================

/// A file owned by a disk cache, identified by its cache key.
#[derive(Debug, Clone)]
pub struct CacheEntrySource {
    key: String,
    path: PathBuf,
}

impl CacheEntrySource {
    pub fn new(key: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            key: key.into(),
            path: path.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl DataSource for CacheEntrySource {
    fn open_stream(&self) -> Result<Box<dyn SourceStream>, SourceError> {
        let file = open_file(&self.path)?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn identity(&self) -> &str {
        &self.key
    }

    fn kind(&self) -> SourceKind {
        SourceKind::CacheBacked {
            key: self.key.clone(),
            path: self.path.clone(),
        }
    }
}

// =============================================================================
// MemorySource
// =============================================================================

/// Encoded image bytes held in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
    identity: String,
}

impl MemorySource {
    pub fn new(identity: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            identity: identity.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl DataSource for MemorySource {
    fn open_stream(&self) -> Result<Box<dyn SourceStream>, SourceError> {
        // Bytes clones are refcount bumps
        Ok(Box::new(Cursor::new(self.data.clone())))
    }

    fn identity(&self) -> &str {
        &self.identity
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Other
    }
}

fn open_file(path: &Path) -> Result<File, SourceError> {
    File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => SourceError::NotFound(path.display().to_string()),
        _ => SourceError::Io(format!("{}: {}", path.display(), e)),
    })
}

// =============================================================================
// DefaultSourceProvider
// =============================================================================

/// Resolves `cache://`, `file://` and bare-path URIs.
///
/// `cache://<key>` is looked up in the cache directory, when one is set.
#[derive(Debug, Clone, Default)]
pub struct DefaultSourceProvider {
    cache_dir: Option<PathBuf>,
}

impl DefaultSourceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: Some(cache_dir.into()),
        }
    }
}

impl SourceProvider for DefaultSourceProvider {
    fn open(&self, uri: &str) -> Result<Arc<dyn DataSource>, SourceError> {
        if let Some(key) = uri.strip_prefix(CACHE_SCHEME) {
            let dir = self
                .cache_dir
                .as_ref()
                .ok_or_else(|| SourceError::Unsupported(uri.to_string()))?;
            if !is_valid_cache_key(key) {
                return Err(SourceError::Unsupported(uri.to_string()));
            }
            let path = dir.join(key);
            if !path.is_file() {
                return Err(SourceError::NotFound(uri.to_string()));
            }
            return Ok(Arc::new(CacheEntrySource::new(key, path)));
        }

        let path = uri.strip_prefix(FILE_SCHEME).unwrap_or(uri);
        if path.contains("://") {
            return Err(SourceError::Unsupported(uri.to_string()));
        }
        let path = PathBuf::from(path);
        if !path.is_file() {
            return Err(SourceError::NotFound(uri.to_string()));
        }
        Ok(Arc::new(FileSource::new(path)))
    }
}

/// Cache keys are single path components.
fn is_valid_cache_key(key: &str) -> bool {
    !key.is_empty() && key != "." && key != ".." && !key.contains(['/', '\\'])
}

// =============================================================================
// FileCacheInvalidator
// =============================================================================

/// Deletes corrupt entries from a directory-backed disk cache.
#[derive(Debug, Clone)]
pub struct FileCacheInvalidator {
    dir: PathBuf,
}

impl FileCacheInvalidator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl CacheInvalidator for FileCacheInvalidator {
    fn invalidate(&self, identity: &str) -> bool {
        if !is_valid_cache_key(identity) {
            return false;
        }
        let path = self.dir.join(identity);
        match std::fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Cache entry could not be deleted");
                false
            }
        }
    }
}
