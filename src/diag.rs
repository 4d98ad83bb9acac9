//! Diagnostic sink.
//!
//! Every state transition of the viewer, tile manager and decode worker is
//! reported through one [`DiagnosticSink`]. Components hold an
//! `Arc<dyn DiagnosticSink>` and call [`DiagnosticSink::record`] at well-defined
//! points instead of scattering debug-mode logging through control flow.
//!
//! - [`TracingSink`]: production sink, emits structured `tracing` events
//! - [`NoopSink`]: discards everything

use crate::error::{DegenerateInput, InitError, TileFailure};
use crate::geom::{Rect, Size};

// =============================================================================
// Diagnostic Events
// =============================================================================

/// A state transition worth reporting.
#[derive(Debug, Clone)]
pub enum Diagnostic {
    /// `update` was called before the decoder was ready
    NotReady { uri: Option<String> },

    /// `update` received unusable viewport parameters
    DegenerateInput { cause: DegenerateInput },

    /// `update` received the same visible rect as last time
    ViewportUnchanged { visible: Rect },

    /// The whole content is visible; tiling is pointless
    FullDisplay { uri: Option<String> },

    /// A region decoder was requested for a new image
    InitStarted { uri: String },

    InitCompleted { uri: String, dimensions: Size },

    InitFailed { uri: String, error: InitError },

    /// A tile diff was applied
    TilesUpdated {
        sample: u32,
        added: usize,
        kept: usize,
        evicted: usize,
    },

    /// A decode into a reused block failed and is retried with fresh memory
    DecodeRetried { rect: Rect, sample: u32 },

    /// A tile decode failed after classification
    DecodeFailed { rect: Rect, failure: TileFailure },

    /// A cache-backed source was found corrupt
    CacheInvalidated { identity: String, deleted: bool },

    /// A result arrived for a tile, image or viewer that is no longer current
    ResultDiscarded { reason: &'static str },

    /// All tiles were dropped
    Cleaned { reason: String },

    /// The viewer was stopped permanently
    Recycled { reason: String },
}

// =============================================================================
// Sink Trait
// =============================================================================

/// Receiver for [`Diagnostic`] events.
///
/// # Thread Safety
///
/// Sinks are shared between the owner and decode threads.
pub trait DiagnosticSink: Send + Sync {
    fn record(&self, event: &Diagnostic);
}

/// Sink that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl DiagnosticSink for NoopSink {
    #[inline]
    fn record(&self, _event: &Diagnostic) {}
}

/// Sink that forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TracingSink {
    pub fn new() -> Self {
        Self
    }
}

impl DiagnosticSink for TracingSink {
    fn record(&self, event: &Diagnostic) {
        match event {
            Diagnostic::NotReady { uri } => {
                tracing::warn!(uri = uri.as_deref().unwrap_or(""), "Viewer not ready, update ignored")
            }
            Diagnostic::DegenerateInput { cause } => {
                tracing::warn!(%cause, "Update params are empty, update ignored")
            }
            Diagnostic::ViewportUnchanged { visible } => {
                tracing::trace!(visible = %visible.to_short_string(), "Visible rect unchanged")
            }
            Diagnostic::FullDisplay { uri } => {
                tracing::debug!(uri = uri.as_deref().unwrap_or(""), "Full display, tiles cleared")
            }
            Diagnostic::InitStarted { uri } => tracing::debug!(%uri, "Opening region decoder"),
            Diagnostic::InitCompleted { uri, dimensions } => {
                tracing::info!(%uri, %dimensions, "Region decoder ready")
            }
            Diagnostic::InitFailed { uri, error } => {
                tracing::error!(%uri, %error, "Region decoder failed to open")
            }
            Diagnostic::TilesUpdated {
                sample,
                added,
                kept,
                evicted,
            } => tracing::debug!(sample, added, kept, evicted, "Tile set updated"),
            Diagnostic::DecodeRetried { rect, sample } => tracing::warn!(
                rect = %rect.to_short_string(),
                sample,
                "Decode into reused bitmap failed, retrying with fresh memory"
            ),
            Diagnostic::DecodeFailed { rect, failure } => match failure {
                TileFailure::StaleRegion { width, height, .. } => tracing::warn!(
                    rect = %rect.to_short_string(),
                    image_width = width,
                    image_height = height,
                    "Tile region outside image bounds, dropped"
                ),
                _ => tracing::error!(rect = %rect.to_short_string(), %failure, "Tile decode failed"),
            },
            Diagnostic::CacheInvalidated { identity, deleted } => {
                tracing::error!(%identity, deleted, "Corrupt cache entry invalidated")
            }
            Diagnostic::ResultDiscarded { reason } => {
                tracing::debug!(reason, "Decode result discarded")
            }
            Diagnostic::Cleaned { reason } => tracing::debug!(%reason, "Tiles cleaned"),
            Diagnostic::Recycled { reason } => tracing::debug!(%reason, "Viewer recycled"),
        }
    }
}
