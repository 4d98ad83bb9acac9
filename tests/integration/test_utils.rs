//! Test utilities for integration tests.
//!
//! This module provides a scripted region decoder, an in-memory source
//! provider and recording implementations of every viewer collaborator.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use large_image_viewer::bitmap::{Bitmap, PixelFormat};
use large_image_viewer::decode::{decoded_size, RegionDecoder, RegionHandle};
use large_image_viewer::diag::{Diagnostic, DiagnosticSink};
use large_image_viewer::error::{DecodeError, SourceError};
use large_image_viewer::geom::{Matrix, Rect, Size};
use large_image_viewer::source::{CacheInvalidator, DataSource, MemorySource, SourceProvider};
use large_image_viewer::viewer::{
    Color, DrawSurface, LargeImageViewer, ViewerCallback, ViewerCollaborators,
};
use large_image_viewer::ViewerConfig;

// =============================================================================
// Gate
// =============================================================================

/// A latch decodes wait on while closed.
///
/// Used to hold a decode "in progress" while the test changes viewer state.
pub struct Gate {
    open: Mutex<bool>,
    changed: Condvar,
}

impl Gate {
    pub fn new() -> Self {
        Self {
            open: Mutex::new(true),
            changed: Condvar::new(),
        }
    }

    pub fn close(&self) {
        *self.open.lock().unwrap() = false;
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.changed.notify_all();
    }

    fn wait(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.changed.wait(open).unwrap();
        }
    }
}

// =============================================================================
// Scripted Region Decoder
// =============================================================================

/// One recorded `decode_region` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeCall {
    pub rect: Rect,
    pub sample: u32,
    pub with_reuse: bool,
}

struct MockState {
    default_dimensions: Size,
    dimensions: Mutex<HashMap<String, Size>>,
    failures: Mutex<VecDeque<DecodeError>>,
    fail_open: Mutex<Option<DecodeError>>,
    calls: Mutex<Vec<DecodeCall>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    started: AtomicUsize,
    gate: Gate,
}

/// Region decoder whose outcomes are scripted by the test.
///
/// Decodes succeed unless a failure is queued with [`fail_next`]. Every call
/// is recorded, as are handle opens and closes.
///
/// [`fail_next`]: MockRegionDecoder::fail_next
#[derive(Clone)]
pub struct MockRegionDecoder {
    state: Arc<MockState>,
}

impl MockRegionDecoder {
    pub fn new(dimensions: Size) -> Self {
        Self {
            state: Arc::new(MockState {
                default_dimensions: dimensions,
                dimensions: Mutex::new(HashMap::new()),
                failures: Mutex::new(VecDeque::new()),
                fail_open: Mutex::new(None),
                calls: Mutex::new(Vec::new()),
                opens: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                started: AtomicUsize::new(0),
                gate: Gate::new(),
            }),
        }
    }

    /// Report `dimensions` for sources with this identity.
    pub fn with_dimensions(self, identity: &str, dimensions: Size) -> Self {
        self.state
            .dimensions
            .lock()
            .unwrap()
            .insert(identity.to_string(), dimensions);
        self
    }

    /// Queue a failure for the next decode call.
    pub fn fail_next(&self, error: DecodeError) {
        self.state.failures.lock().unwrap().push_back(error);
    }

    pub fn fail_open(&self, error: DecodeError) {
        *self.state.fail_open.lock().unwrap() = Some(error);
    }

    pub fn calls(&self) -> Vec<DecodeCall> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Decode calls that have started, including ones blocked on the gate.
    pub fn started(&self) -> usize {
        self.state.started.load(Ordering::SeqCst)
    }

    pub fn gate(&self) -> &Gate {
        &self.state.gate
    }
}

impl RegionDecoder for MockRegionDecoder {
    fn open(
        &self,
        source: &dyn DataSource,
        format: PixelFormat,
    ) -> Result<Box<dyn RegionHandle>, DecodeError> {
        if let Some(error) = self.state.fail_open.lock().unwrap().clone() {
            return Err(error);
        }
        self.state.opens.fetch_add(1, Ordering::SeqCst);

        let dimensions = self
            .state
            .dimensions
            .lock()
            .unwrap()
            .get(source.identity())
            .copied()
            .unwrap_or(self.state.default_dimensions);

        Ok(Box::new(MockHandle {
            state: self.state.clone(),
            dimensions,
            format,
        }))
    }
}

struct MockHandle {
    state: Arc<MockState>,
    dimensions: Size,
    format: PixelFormat,
}

impl RegionHandle for MockHandle {
    fn dimensions(&self) -> Size {
        self.dimensions
    }

    fn format(&self) -> PixelFormat {
        self.format
    }

    fn decode_region(
        &mut self,
        rect: Rect,
        sample: u32,
        reuse: Option<Bitmap>,
    ) -> Result<Bitmap, DecodeError> {
        self.state.started.fetch_add(1, Ordering::SeqCst);
        self.state.gate.wait();
        self.state.calls.lock().unwrap().push(DecodeCall {
            rect,
            sample,
            with_reuse: reuse.is_some(),
        });

        if let Some(error) = self.state.failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        if !Rect::from_size(self.dimensions).contains(&rect) {
            return Err(DecodeError::RegionOutOfBounds {
                rect,
                width: self.dimensions.width,
                height: self.dimensions.height,
            });
        }

        let out = decoded_size(&rect, sample);
        match reuse {
            Some(block) if block.size() == out && block.format() == self.format => Ok(block),
            Some(block) => Err(DecodeError::ReuseMismatch {
                expected: out.to_string(),
                actual: block.size().to_string(),
            }),
            None => Ok(Bitmap::new(out.width, out.height, self.format)),
        }
    }

    fn close(self: Box<Self>) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Source Provider
// =============================================================================

/// Provider serving registered sources by URI.
#[derive(Default)]
pub struct MockProvider {
    sources: HashMap<String, Arc<dyn DataSource>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an in-memory source under `uri` (identity = uri).
    pub fn with_memory(mut self, uri: &str) -> Self {
        self.sources.insert(
            uri.to_string(),
            Arc::new(MemorySource::new(uri, vec![0u8; 16])),
        );
        self
    }

    pub fn with_source(mut self, uri: &str, source: Arc<dyn DataSource>) -> Self {
        self.sources.insert(uri.to_string(), source);
        self
    }
}

impl SourceProvider for MockProvider {
    fn open(&self, uri: &str) -> Result<Arc<dyn DataSource>, SourceError> {
        self.sources
            .get(uri)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(uri.to_string()))
    }
}

// =============================================================================
// Recording Collaborators
// =============================================================================

/// Host callback counting notifications.
#[derive(Default)]
pub struct RecordingCallback {
    invalidations: AtomicUsize,
    matrix_updates: AtomicUsize,
}

impl RecordingCallback {
    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }

    pub fn matrix_updates(&self) -> usize {
        self.matrix_updates.load(Ordering::SeqCst)
    }
}

impl ViewerCallback for RecordingCallback {
    fn invalidate(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }

    fn update_matrix(&self) {
        self.matrix_updates.fetch_add(1, Ordering::SeqCst);
    }
}

/// Diagnostic sink keeping every event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Diagnostic>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<Diagnostic> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Diagnostic) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| predicate(e)).count()
    }
}

impl DiagnosticSink for RecordingSink {
    fn record(&self, event: &Diagnostic) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Cache invalidator remembering which identities it was asked to drop.
#[derive(Default)]
pub struct RecordingInvalidator {
    invalidated: Mutex<Vec<String>>,
}

impl RecordingInvalidator {
    pub fn invalidated(&self) -> Vec<String> {
        self.invalidated.lock().unwrap().clone()
    }
}

impl CacheInvalidator for RecordingInvalidator {
    fn invalidate(&self, identity: &str) -> bool {
        self.invalidated.lock().unwrap().push(identity.to_string());
        true
    }
}

/// Draw surface recording every call.
#[derive(Default)]
pub struct RecordingSurface {
    pub transforms: Vec<Matrix>,
    pub bitmaps: Vec<(Rect, Rect)>,
    pub outlines: Vec<(Rect, Color)>,
}

impl DrawSurface for RecordingSurface {
    fn set_transform(&mut self, matrix: &Matrix) {
        self.transforms.push(*matrix);
    }

    fn draw_bitmap(&mut self, _bitmap: &Bitmap, src: Rect, dst: Rect) {
        self.bitmaps.push((src, dst));
    }

    fn draw_rect_outline(&mut self, rect: Rect, color: Color) {
        self.outlines.push((rect, color));
    }
}

// =============================================================================
// Viewer Harness
// =============================================================================

/// A viewer wired to recording collaborators.
pub struct Harness {
    pub viewer: LargeImageViewer,
    pub decoder: MockRegionDecoder,
    pub callback: Arc<RecordingCallback>,
    pub sink: Arc<RecordingSink>,
    pub invalidator: Arc<RecordingInvalidator>,
}

impl Harness {
    pub fn new(decoder: MockRegionDecoder, provider: MockProvider, config: ViewerConfig) -> Self {
        let callback = Arc::new(RecordingCallback::default());
        let sink = Arc::new(RecordingSink::default());
        let invalidator = Arc::new(RecordingInvalidator::default());

        let collaborators =
            ViewerCollaborators::new(Arc::new(provider), Arc::new(decoder.clone()))
                .with_callback(callback.clone())
                .with_sink(sink.clone())
                .with_invalidator(invalidator.clone());
        let viewer = LargeImageViewer::new(config, collaborators).unwrap();

        Self {
            viewer,
            decoder,
            callback,
            sink,
            invalidator,
        }
    }

    /// Viewer over an 8000x6000 source registered as `mem://large`.
    pub fn large() -> Self {
        Self::new(
            MockRegionDecoder::new(Size::new(8000, 6000)),
            MockProvider::new().with_memory("mem://large"),
            ViewerConfig::default(),
        )
    }

    /// Set the image and wait for the decoder to open.
    pub async fn open(&mut self, uri: &str) {
        self.viewer.set_image(uri);
        settle(&mut self.viewer).await;
    }
}

/// `settle` bounded by a timeout so a hung worker fails the test.
pub async fn settle(viewer: &mut LargeImageViewer) {
    tokio::time::timeout(Duration::from_secs(10), viewer.settle())
        .await
        .expect("viewer did not settle");
}

/// Poll `condition` until it holds or a timeout expires.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
