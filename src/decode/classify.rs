//! Decode failure classification.
//!
//! A raw [`DecodeError`] from a region handle falls into one of three classes,
//! each with its own recovery policy:
//!
//! | Class            | Cause                                   | Policy                              |
//! |------------------|-----------------------------------------|-------------------------------------|
//! | `ReusableMemory` | reuse block rejected by the decoder     | drop block, retry once fresh        |
//! | `StaleRegion`    | rect outside the current source bounds  | fail tile, never retry              |
//! | `Fatal`          | I/O, corrupt data, allocation failure   | log, invalidate cache entry, fail   |

use std::sync::Arc;

use tracing::error;

use crate::diag::{Diagnostic, DiagnosticSink};
use crate::error::{DecodeError, TileFailure};
use crate::geom::{Rect, Size};
use crate::source::{CacheInvalidator, DataSource, SourceKind};

/// Recovery class of a failed decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    ReusableMemory,
    StaleRegion,
    Fatal,
}

/// Classify a decode failure.
///
/// # Arguments
///
/// * `error` - Raw failure from the region handle
/// * `used_reuse_block` - Whether the failed attempt was given a reuse block
/// * `rect` - Requested region in source coordinates
/// * `image` - Source dimensions as cached at init time
pub fn classify(error: &DecodeError, used_reuse_block: bool, rect: &Rect, image: Size) -> FailureClass {
    // A reuse complaint only counts when a block was actually supplied
    if used_reuse_block && matches!(error, DecodeError::ReuseMismatch { .. }) {
        return FailureClass::ReusableMemory;
    }

    if matches!(error, DecodeError::RegionOutOfBounds { .. })
        || !Rect::from_size(image).contains(rect)
    {
        return FailureClass::StaleRegion;
    }

    FailureClass::Fatal
}

/// Build the stale-region failure, preferring the bounds the decoder reported.
pub fn stale_region(error: &DecodeError, rect: Rect, image: Size) -> TileFailure {
    match error {
        DecodeError::RegionOutOfBounds { width, height, .. } => TileFailure::StaleRegion {
            rect,
            width: *width,
            height: *height,
        },
        _ => TileFailure::StaleRegion {
            rect,
            width: image.width,
            height: image.height,
        },
    }
}

/// Handle a fatal decode failure.
///
/// Logs the failure with the source identity. A cache-backed source is handed
/// to the invalidator so a corrupt entry is deleted before the next load;
/// plain files only get their path and length logged.
pub fn handle_fatal(
    source: &dyn DataSource,
    error: DecodeError,
    invalidator: &Arc<dyn CacheInvalidator>,
    sink: &Arc<dyn DiagnosticSink>,
) -> TileFailure {
    let identity = source.identity().to_string();

    match source.kind() {
        SourceKind::CacheBacked { path, .. } => {
            let length = file_length(&path);
            let deleted = invalidator.invalidate(&identity);
            error!(
                %identity,
                %error,
                file_length = length,
                deleted,
                "Decode failed, cache entry invalidated"
            );
            sink.record(&Diagnostic::CacheInvalidated {
                identity: identity.clone(),
                deleted,
            });
        }
        SourceKind::PlainFile { path } => {
            error!(
                %identity,
                %error,
                file_path = %path.display(),
                file_length = file_length(&path),
                "Decode failed"
            );
        }
        SourceKind::Other => {
            error!(%identity, %error, "Decode failed");
        }
    }

    TileFailure::SourceCorrupt {
        identity,
        cause: error,
    }
}

/// File length for diagnostics, -1 if the file is gone.
fn file_length(path: &std::path::Path) -> i64 {
    std::fs::metadata(path)
        .map(|m| m.len() as i64)
        .unwrap_or(-1)
}
