//! # Large Image Viewer
//!
//! Viewport-driven tiled decoding for images too large to decode at once.
//!
//! Only the visible rectangle is decoded, at a downsample factor matched to
//! the current zoom, one tile at a time on a dedicated decode thread. Decoded
//! pixel buffers are recycled through a bounded pool so heavy panning and
//! zooming does not turn into a stream of large allocations.
//!
//! ## Features
//!
//! - **Tile diffing**: a viewport change only decodes tiles that were not
//!   already on screen at the same downsample factor
//! - **Serialized decoding**: every region decoder call runs on one thread, in
//!   submission order, with epoch-based cancellation
//! - **Memory reuse**: decode output goes into pooled bitmaps keyed by shape
//! - **Failure classification**: reuse mismatches are retried once, stale
//!   regions are dropped, corrupt cache entries are invalidated
//!
//! ## Architecture
//!
//! - [`viewer`] - Owner-thread viewer, host callbacks and draw surfaces
//! - [`tile`] - Sampling policy, tile grid and the tile set manager
//! - [`decode`] - Region decoder seam, `image` backend, classification, worker
//! - [`bitmap`] - Bitmaps and the bitmap pool
//! - [`source`] - Data sources, URI resolution and cache invalidation
//! - [`diag`] - Diagnostic sink
//! - [`config`] - Viewer configuration and CLI types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use large_image_viewer::{
//!     DefaultSourceProvider, ImageRegionDecoder, ImageSurface, LargeImageViewer, Matrix, Rect,
//!     Size, ViewerCollaborators, ViewerConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let collaborators = ViewerCollaborators::new(
//!         Arc::new(DefaultSourceProvider::new()),
//!         Arc::new(ImageRegionDecoder::new()),
//!     );
//!     let mut viewer = LargeImageViewer::new(ViewerConfig::default(), collaborators).unwrap();
//!
//!     viewer.set_image("/data/panorama.jpg");
//!     viewer.settle().await;
//!
//!     let content = viewer.dimensions().unwrap_or_default();
//!     viewer.update(
//!         &Matrix::scale_translate(0.5, 0.0, 0.0),
//!         Rect::new(0, 0, 2000, 2000),
//!         content,
//!         Size::new(1000, 1000),
//!     );
//!     viewer.settle().await;
//!
//!     let mut surface = ImageSurface::new(1000, 1000);
//!     viewer.draw(&mut surface);
//! }
//! ```

pub mod bitmap;
pub mod config;
pub mod decode;
pub mod diag;
pub mod error;
pub mod geom;
pub mod source;
pub mod tile;
pub mod viewer;

// Re-export commonly used types
pub use bitmap::{Bitmap, BitmapPool, PixelFormat, PoolStats};
pub use config::{Cli, Command, ViewerConfig};
pub use decode::{DecodeWorker, ImageRegionDecoder, RegionDecoder, RegionHandle};
pub use diag::{Diagnostic, DiagnosticSink, NoopSink, TracingSink};
pub use error::{DecodeError, DegenerateInput, InitError, SourceError, TileFailure, ViewerError};
pub use geom::{Matrix, Rect, Size};
pub use source::{
    CacheInvalidator, DataSource, DefaultSourceProvider, FileCacheInvalidator, MemorySource,
    SourceKind, SourceProvider,
};
pub use tile::{plan_tiles, Tile, TileDiff, TileId, TileKey, TileManager, TilePlan, TileState};
pub use viewer::{
    Color, DrawSurface, ImageSurface, LargeImageViewer, UpdateOutcome, ViewerCallback,
    ViewerCollaborators, ViewerState,
};
