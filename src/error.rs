use thiserror::Error;

use crate::geom::{Rect, Size};

/// Errors raised while resolving or reading an image source
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// No source exists for the requested URI
    #[error("Source not found: {0}")]
    NotFound(String),

    /// Reading the underlying bytes failed
    #[error("I/O error: {0}")]
    Io(String),

    /// The URI scheme is not handled by this provider
    #[error("Unsupported source URI: {0}")]
    Unsupported(String),
}

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        SourceError::Io(err.to_string())
    }
}

/// Raw failures reported by a region decode primitive.
///
/// These are unclassified; see [`crate::decode::classify`] for how the
/// worker turns them into a [`TileFailure`].
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// The supplied reuse block does not fit the decode output
    #[error("Problem decoding into existing bitmap: block is {actual}, output needs {expected}")]
    ReuseMismatch { expected: String, actual: String },

    /// The requested sub-rectangle is outside the source bounds
    #[error("Rectangle {rect:?} is outside the image bounds {width}x{height}")]
    RegionOutOfBounds { rect: Rect, width: u32, height: u32 },

    /// The encoded data could not be decoded
    #[error("Corrupt image data: {0}")]
    Corrupt(String),

    /// Reading the source failed
    #[error("I/O error: {0}")]
    Io(String),

    /// The output buffer could not be allocated
    #[error("Out of memory allocating {bytes} bytes")]
    OutOfMemory { bytes: usize },

    /// The handle was used after it was closed
    #[error("Region decoder handle is closed")]
    Closed,
}

impl From<SourceError> for DecodeError {
    fn from(err: SourceError) -> Self {
        DecodeError::Io(err.to_string())
    }
}

/// Failure to open a region decoder for a new image
#[derive(Debug, Clone, Error)]
pub enum InitError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Decoder error: {0}")]
    Decode(#[from] DecodeError),

    /// The source opened but reports zero width or height
    #[error("Image has empty dimensions {0}")]
    EmptyImage(Size),
}

/// Classified outcome of a failed tile decode.
///
/// Reuse-block failures never appear here: they are retried once with fresh
/// memory and the retry's own failure is what gets classified.
#[derive(Debug, Clone, Error)]
pub enum TileFailure {
    /// The tile's rectangle no longer fits the source
    #[error("Stale region {rect:?} for image {width}x{height}")]
    StaleRegion { rect: Rect, width: u32, height: u32 },

    /// I/O failure, corrupt data or allocation failure
    #[error("Source {identity} failed to decode: {cause}")]
    SourceCorrupt { identity: String, cause: DecodeError },
}

/// Viewport parameters that cannot produce a tile set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DegenerateInput {
    #[error("Visible rect {0:?} is empty")]
    EmptyVisibleRect(Rect),

    #[error("Content size {0} has a zero dimension")]
    EmptyContentSize(Size),

    #[error("Viewport size {0} has a zero dimension")]
    EmptyViewportSize(Size),
}

/// Failure to construct a viewer
#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The decode thread could not be started
    #[error("Failed to start decode worker: {0}")]
    Spawn(#[from] std::io::Error),
}
