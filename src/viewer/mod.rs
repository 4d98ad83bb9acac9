//! Large-image viewer.
//!
//! [`LargeImageViewer`] is the owner-thread root of the pipeline. It holds the
//! transform, viewport dedupe state and lifecycle, forwards accepted viewport
//! updates to the [`TileManager`], and applies decode results delivered by the
//! [`DecodeWorker`].
//!
//! # Lifecycle
//!
//! ```text
//!                set_image(uri)          init ok
//! Uninitialized ───────────────▶ Initializing ─────────▶ Ready ⇄ update()
//!       │                             │ init failed
//!       │ set_image("")               ▼
//!       └───────────────────────▶ Stopped / Failed
//!
//!                 recycle() from any state ──▶ Recycled (terminal)
//! ```
//!
//! # Result Delivery
//!
//! Results never mutate viewer state from the decode thread. They queue on a
//! channel and are applied on the owner thread by [`LargeImageViewer::pump`]
//! (non-blocking), [`LargeImageViewer::next_message`] or
//! [`LargeImageViewer::settle`] (async).

mod surface;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::warn;

use crate::bitmap::BitmapPool;
use crate::config::ViewerConfig;
use crate::decode::{DecodeMessage, DecodeWorker, RegionDecoder, WorkerContext};
use crate::diag::{Diagnostic, DiagnosticSink, TracingSink};
use crate::error::{DegenerateInput, ViewerError};
use crate::geom::{round2, Matrix, Rect, Size};
use crate::source::{CacheInvalidator, NoopInvalidator, SourceProvider};
use crate::tile::{TileDiff, TileManager, TileState, ViewportParams};

pub use surface::{Color, DrawSurface, ImageSurface};

// =============================================================================
// Host Callbacks
// =============================================================================

/// Notifications sent to the host view.
pub trait ViewerCallback: Send + Sync {
    /// Request a redraw.
    fn invalidate(&self);

    /// The decoder is ready; the host should push its transform via `update`.
    fn update_matrix(&self);
}

/// Callback that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCallback;

impl ViewerCallback for NoopCallback {
    fn invalidate(&self) {}

    fn update_matrix(&self) {}
}

/// Everything a viewer talks to besides the host's draw surface.
#[derive(Clone)]
pub struct ViewerCollaborators {
    pub provider: Arc<dyn SourceProvider>,
    pub decoder: Arc<dyn RegionDecoder>,
    pub invalidator: Arc<dyn CacheInvalidator>,
    pub callback: Arc<dyn ViewerCallback>,
    pub sink: Arc<dyn DiagnosticSink>,
}

impl ViewerCollaborators {
    /// Collaborators with no cache invalidation, no host callback and
    /// tracing diagnostics.
    pub fn new(provider: Arc<dyn SourceProvider>, decoder: Arc<dyn RegionDecoder>) -> Self {
        Self {
            provider,
            decoder,
            invalidator: Arc::new(NoopInvalidator),
            callback: Arc::new(NoopCallback),
            sink: Arc::new(TracingSink::new()),
        }
    }

    pub fn with_invalidator(mut self, invalidator: Arc<dyn CacheInvalidator>) -> Self {
        self.invalidator = invalidator;
        self
    }

    pub fn with_callback(mut self, callback: Arc<dyn ViewerCallback>) -> Self {
        self.callback = callback;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }
}

// =============================================================================
// State
// =============================================================================

/// Lifecycle state of a viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewerState {
    /// No image was ever set
    Uninitialized,

    /// Waiting for the region decoder to open
    Initializing,

    Ready,

    /// The region decoder failed to open; updates are ignored
    Failed,

    /// `set_image("")` was called
    Stopped,

    /// Terminal
    Recycled,
}

/// What an [`LargeImageViewer::update`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The viewer is not ready
    NotReady,

    /// The viewport parameters were unusable
    Rejected(DegenerateInput),

    /// The visible rect matches the last accepted update
    Unchanged,

    /// The whole content is visible, every tile was dropped
    FullDisplay,

    Updated(TileDiff),
}

// =============================================================================
// LargeImageViewer
// =============================================================================

/// Viewport-driven tiled viewer over one large image at a time.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use large_image_viewer::config::ViewerConfig;
/// use large_image_viewer::decode::ImageRegionDecoder;
/// use large_image_viewer::geom::{Matrix, Rect, Size};
/// use large_image_viewer::source::DefaultSourceProvider;
/// use large_image_viewer::viewer::{LargeImageViewer, ViewerCollaborators};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let collaborators = ViewerCollaborators::new(
///     Arc::new(DefaultSourceProvider::new()),
///     Arc::new(ImageRegionDecoder::new()),
/// );
/// let mut viewer = LargeImageViewer::new(ViewerConfig::default(), collaborators)?;
///
/// viewer.set_image("/data/scan.png");
/// viewer.settle().await;
///
/// let size = viewer.dimensions().unwrap_or_default();
/// viewer.update(
///     &Matrix::identity(),
///     Rect::new(0, 0, 1000, 1000),
///     size,
///     Size::new(1000, 1000),
/// );
/// viewer.settle().await;
/// # Ok(())
/// # }
/// ```
pub struct LargeImageViewer {
    callback: Arc<dyn ViewerCallback>,
    sink: Arc<dyn DiagnosticSink>,
    pool: Arc<BitmapPool>,
    worker: DecodeWorker,
    results: UnboundedReceiver<DecodeMessage>,
    tiles: TileManager,

    state: ViewerState,
    image_uri: Option<String>,
    dimensions: Option<Size>,
    pending_init: Option<u64>,

    matrix: Matrix,
    zoom_scale: f32,
    last_zoom_scale: f32,
    last_visible: Option<Rect>,
    show_tile_rect: bool,
}

impl LargeImageViewer {
    /// Create a viewer and start its decode thread.
    pub fn new(config: ViewerConfig, collaborators: ViewerCollaborators) -> Result<Self, ViewerError> {
        config.validate().map_err(ViewerError::InvalidConfig)?;

        let pool = Arc::new(BitmapPool::with_capacity(config.pool_capacity));
        let (worker, results) = DecodeWorker::spawn(WorkerContext {
            decoder: collaborators.decoder,
            provider: collaborators.provider,
            pool: pool.clone(),
            invalidator: collaborators.invalidator,
            sink: collaborators.sink.clone(),
            format: config.pixel_format,
        })?;
        let show_tile_rect = config.show_tile_rect;
        let tiles = TileManager::new(config, pool.clone(), collaborators.sink.clone());

        Ok(Self {
            callback: collaborators.callback,
            sink: collaborators.sink,
            pool,
            worker,
            results,
            tiles,
            state: ViewerState::Uninitialized,
            image_uri: None,
            dimensions: None,
            pending_init: None,
            matrix: Matrix::IDENTITY,
            zoom_scale: 1.0,
            last_zoom_scale: 1.0,
            last_visible: None,
            show_tile_rect,
        })
    }

    /// Switch to a new image.
    ///
    /// Cancels outstanding work, drops every tile and resets the transform.
    /// A non-empty `uri` starts opening a region decoder; an empty one stops
    /// the viewer and releases the current decoder.
    pub fn set_image(&mut self, uri: &str) {
        if self.state == ViewerState::Recycled {
            warn!(uri, "set_image on a recycled viewer ignored");
            return;
        }

        self.clean("set image");
        self.dimensions = None;

        if uri.is_empty() {
            self.worker.init(None);
            self.image_uri = None;
            self.pending_init = None;
            self.state = ViewerState::Stopped;
            return;
        }

        let epoch = self.worker.init(Some(uri));
        self.image_uri = Some(uri.to_string());
        self.pending_init = Some(epoch);
        self.state = ViewerState::Initializing;
        self.sink.record(&Diagnostic::InitStarted {
            uri: uri.to_string(),
        });
    }

    /// Apply a viewport change from the host.
    ///
    /// # Arguments
    ///
    /// * `matrix` - Content-to-view transform
    /// * `visible` - Visible rect in content coordinates
    /// * `content` - Size of the content `visible` is expressed in
    /// * `viewport` - Size of the view
    pub fn update(&mut self, matrix: &Matrix, visible: Rect, content: Size, viewport: Size) -> UpdateOutcome {
        let source = match (self.state, self.dimensions) {
            (ViewerState::Ready, Some(dimensions)) => dimensions,
            _ => {
                self.sink.record(&Diagnostic::NotReady {
                    uri: self.image_uri.clone(),
                });
                return UpdateOutcome::NotReady;
            }
        };

        let params = ViewportParams {
            visible,
            content,
            viewport,
            source,
            zoom: round2(matrix.scale()),
        };
        if let Err(cause) = params.check() {
            self.sink.record(&Diagnostic::DegenerateInput { cause });
            return UpdateOutcome::Rejected(cause);
        }

        if self.last_visible == Some(visible) {
            self.sink.record(&Diagnostic::ViewportUnchanged { visible });
            return UpdateOutcome::Unchanged;
        }

        if visible == Rect::from_size(content) {
            self.clean("full display");
            self.last_visible = Some(visible);
            self.sink.record(&Diagnostic::FullDisplay {
                uri: self.image_uri.clone(),
            });
            return UpdateOutcome::FullDisplay;
        }
        self.last_visible = Some(visible);

        self.matrix = *matrix;
        self.last_zoom_scale = self.zoom_scale;
        self.zoom_scale = params.zoom;
        self.callback.invalidate();

        UpdateOutcome::Updated(self.tiles.update(&params, &self.worker))
    }

    /// Paint every decoded tile, plus tile outlines when enabled.
    pub fn draw(&self, surface: &mut dyn DrawSurface) {
        surface.set_transform(&self.matrix);

        for tile in self.tiles.tiles() {
            if let (TileState::Decoded, Some(bitmap)) = (tile.state(), tile.bitmap()) {
                surface.draw_bitmap(bitmap, bitmap.bounds(), tile.draw_rect());
            }

            if self.show_tile_rect {
                match tile.state() {
                    TileState::Decoded => {
                        surface.draw_rect_outline(tile.draw_rect(), Color::DECODED_OUTLINE)
                    }
                    TileState::DecodeRequested => {
                        surface.draw_rect_outline(tile.draw_rect(), Color::LOADING_OUTLINE)
                    }
                    TileState::Empty | TileState::Failed => {}
                }
            }
        }
    }

    /// Drop every tile, cancel queued decodes, reset the transform and
    /// request a redraw.
    ///
    /// The next update is applied even if its visible rect matches the last one.
    pub fn clean(&mut self, reason: &str) {
        self.worker.clean_decode(reason);
        self.tiles.clean(reason);
        self.matrix.reset();
        self.zoom_scale = 1.0;
        self.last_zoom_scale = 1.0;
        self.last_visible = None;
        self.callback.invalidate();
    }

    /// Stop the viewer permanently.
    ///
    /// Tiles and any results already delivered are returned to the pool before
    /// this returns. The decode thread closes its handle once a running decode,
    /// if any, completes.
    pub fn recycle(&mut self, reason: &str) {
        if self.state == ViewerState::Recycled {
            return;
        }
        self.state = ViewerState::Recycled;
        self.pending_init = None;
        self.last_visible = None;

        self.worker.recycle(reason);
        self.tiles.recycle(reason);

        self.results.close();
        while let Ok(message) = self.results.try_recv() {
            if let Some(bitmap) = message.into_bitmap() {
                self.pool.release(bitmap);
            }
        }

        self.callback.invalidate();
        self.sink.record(&Diagnostic::Recycled {
            reason: reason.to_string(),
        });
    }

    // =========================================================================
    // Result Delivery
    // =========================================================================

    /// Apply every result already queued. Never blocks.
    ///
    /// Returns the number of messages processed.
    pub fn pump(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(message) = self.results.try_recv() {
            self.handle_message(message);
            processed += 1;
        }
        processed
    }

    /// Wait for the next result and apply it.
    ///
    /// Returns false once the decode thread is gone.
    pub async fn next_message(&mut self) -> bool {
        match self.results.recv().await {
            Some(message) => {
                self.handle_message(message);
                true
            }
            None => false,
        }
    }

    /// Apply results until no init or tile decode is outstanding.
    pub async fn settle(&mut self) {
        while self.is_busy() {
            if !self.next_message().await {
                break;
            }
        }
    }

    /// True while an init or a tile decode is outstanding.
    pub fn is_busy(&self) -> bool {
        self.state != ViewerState::Recycled
            && (self.pending_init.is_some() || self.tiles.in_flight() > 0)
    }

    fn handle_message(&mut self, message: DecodeMessage) {
        match message {
            DecodeMessage::InitCompleted {
                epoch,
                uri,
                dimensions,
            } => {
                if !self.accepts_init(epoch) {
                    self.discard("stale init");
                    return;
                }
                self.pending_init = None;
                self.dimensions = Some(dimensions);
                self.state = ViewerState::Ready;
                self.sink.record(&Diagnostic::InitCompleted { uri, dimensions });
                self.callback.update_matrix();
            }
            DecodeMessage::InitFailed { epoch, uri, error } => {
                if !self.accepts_init(epoch) {
                    self.discard("stale init");
                    return;
                }
                self.pending_init = None;
                self.state = ViewerState::Failed;
                self.sink.record(&Diagnostic::InitFailed { uri, error });
            }
            DecodeMessage::DecodeCompleted {
                epochs,
                tile,
                bitmap,
            } => {
                if !self.is_running() {
                    self.pool.release(bitmap);
                    self.discard("viewer not running");
                } else if !self.worker.is_current(epochs) {
                    self.pool.release(bitmap);
                    self.discard("stale decode");
                } else if self.tiles.decode_completed(tile, bitmap) {
                    self.callback.invalidate();
                }
            }
            DecodeMessage::DecodeFailed {
                epochs,
                tile,
                failure,
                ..
            } => {
                if !self.is_running() {
                    self.discard("viewer not running");
                } else if !self.worker.is_current(epochs) {
                    self.discard("stale decode");
                } else {
                    self.tiles.decode_failed(tile, failure);
                }
            }
        }
    }

    fn accepts_init(&self, epoch: u64) -> bool {
        self.pending_init == Some(epoch) && self.worker.is_current_image(epoch)
    }

    fn discard(&self, reason: &'static str) {
        self.sink.record(&Diagnostic::ResultDiscarded { reason });
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn state(&self) -> ViewerState {
        self.state
    }

    /// Running and the region decoder is open.
    pub fn is_ready(&self) -> bool {
        self.state == ViewerState::Ready
    }

    /// Running but the region decoder is not open yet.
    pub fn is_initializing(&self) -> bool {
        self.state == ViewerState::Initializing
    }

    /// True between `set_image(uri)` and `set_image("")` or `recycle`.
    pub fn is_running(&self) -> bool {
        matches!(
            self.state,
            ViewerState::Initializing | ViewerState::Ready | ViewerState::Failed
        )
    }

    /// Zoom scale of the last accepted update, rounded to two decimals.
    pub fn zoom_scale(&self) -> f32 {
        self.zoom_scale
    }

    /// Zoom scale before the last accepted update.
    pub fn last_zoom_scale(&self) -> f32 {
        self.last_zoom_scale
    }

    pub fn matrix(&self) -> &Matrix {
        &self.matrix
    }

    /// Source pixel dimensions, once the decoder is ready.
    pub fn dimensions(&self) -> Option<Size> {
        self.dimensions
    }

    pub fn image_uri(&self) -> Option<&str> {
        self.image_uri.as_deref()
    }

    pub fn tiles(&self) -> &TileManager {
        &self.tiles
    }

    pub fn pool(&self) -> &Arc<BitmapPool> {
        &self.pool
    }

    pub fn show_tile_rect(&self) -> bool {
        self.show_tile_rect
    }

    /// Toggle the tile outline overlay, requesting a redraw on change.
    pub fn set_show_tile_rect(&mut self, show: bool) {
        if self.show_tile_rect != show {
            self.show_tile_rect = show;
            self.callback.invalidate();
        }
    }
}
