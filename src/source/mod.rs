//! Image sources.
//!
//! A [`DataSource`] exposes the encoded bytes of one image as a seekable
//! stream plus an identity string used for logging and cache correlation.
//! The [`SourceKind`] tag tells the error classifier what kind of backing
//! store sits behind the stream, so a corrupt cache entry can be invalidated
//! while a plain file is only reported.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │             Decode Worker               │
//! └────────────────────┬────────────────────┘
//!                      │ open(uri)
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │         SourceProvider Trait            │
//! │   (resolves a URI to a DataSource)      │
//! └────────────────────┬────────────────────┘
//!                      │
//!          ┌───────────┼───────────────┐
//!          ▼           ▼               ▼
//!    FileSource  CacheEntrySource  MemorySource
//! ```

mod file;

pub use file::{
    CacheEntrySource, DefaultSourceProvider, FileCacheInvalidator, FileSource, MemorySource,
    CACHE_SCHEME, FILE_SCHEME,
};

use std::io::{Read, Seek};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::SourceError;

// =============================================================================
// Source Stream
// =============================================================================

/// A readable, seekable byte stream over encoded image data.
pub trait SourceStream: Read + Seek + Send {}

impl<T: Read + Seek + Send> SourceStream for T {}

// =============================================================================
// Source Kind
// =============================================================================

/// What backs a data source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    /// A file owned by a disk cache; may be deleted if found corrupt
    CacheBacked { key: String, path: PathBuf },

    /// A plain file on disk
    PlainFile { path: PathBuf },

    /// Anything else (memory, content streams)
    Other,
}

// =============================================================================
// DataSource Trait
// =============================================================================

/// Encoded bytes of a single image.
///
/// Implementations must be thread-safe: sources are resolved on the decode
/// thread and their identity is read on the owner thread.
pub trait DataSource: Send + Sync {
    /// Open a fresh stream positioned at the start of the data.
    fn open_stream(&self) -> Result<Box<dyn SourceStream>, SourceError>;

    /// Identifier for logging and cache correlation.
    fn identity(&self) -> &str;

    /// Backing store of this source.
    fn kind(&self) -> SourceKind;
}

// =============================================================================
// SourceProvider Trait
// =============================================================================

/// Resolves image URIs to data sources.
///
/// This abstraction lets the viewer accept a plain URI string while tests and
/// hosts decide where the bytes actually come from.
pub trait SourceProvider: Send + Sync {
    fn open(&self, uri: &str) -> Result<Arc<dyn DataSource>, SourceError>;
}

// =============================================================================
// Cache Invalidation
// =============================================================================

/// Deletes corrupt entries from an external disk cache.
pub trait CacheInvalidator: Send + Sync {
    /// Drop the cached entry for `identity`. Returns true if something was removed.
    fn invalidate(&self, identity: &str) -> bool;
}

/// Invalidator for hosts without a disk cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInvalidator;

impl CacheInvalidator for NoopInvalidator {
    fn invalidate(&self, _identity: &str) -> bool {
        false
    }
}
