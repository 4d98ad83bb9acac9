//! Decode worker.
//!
//! A single dedicated thread executes every region decoder operation in
//! submission order. Region handles are not safe for concurrent use, so the
//! worker owns the one live handle and no other thread ever touches it.
//!
//! # Architecture
//!
//! ```text
//!  owner thread                          tile-decoder thread
//! ┌──────────────┐   Job (FIFO)        ┌─────────────────────────────┐
//! │ DecodeWorker │ ──────────────────▶ │ Init: open handle           │
//! │  init()      │                     │ Decode: pool.acquire ─┐     │
//! │  submit()    │                     │   decode_region ◀─────┘     │
//! │  clean()     │ ◀────────────────── │   classify / retry once     │
//! └──────────────┘   DecodeMessage     └─────────────────────────────┘
//! ```
//!
//! # Cancellation
//!
//! Decode primitives cannot be interrupted mid-call, so cancellation is done
//! with two epoch counters instead of flags on individual jobs:
//!
//! - the image epoch, bumped by every `init` (a new image replaces the handle)
//! - the decode epoch, bumped by every `init`, `clean_decode` and `recycle`
//!
//! Every job is stamped with both epochs at submission. The worker skips a
//! queued job whose stamp is stale. A job that was already running finishes,
//! and the owner discards its result when the stamp no longer matches.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace, warn};

use crate::bitmap::{Bitmap, BitmapPool, PixelFormat};
use crate::diag::{Diagnostic, DiagnosticSink};
use crate::error::{InitError, TileFailure};
use crate::geom::{Rect, Size};
use crate::source::{CacheInvalidator, DataSource, SourceProvider};
use crate::tile::TileId;

use super::classify::{classify, handle_fatal, stale_region, FailureClass};
use super::region::{decoded_size, RegionDecoder, RegionHandle};

/// Name of the decode thread.
pub const DECODE_THREAD_NAME: &str = "tile-decoder";

// =============================================================================
// Requests and Messages
// =============================================================================

/// A request to decode one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeRequest {
    /// Identity of the tile the result belongs to
    pub tile: TileId,

    /// Region in source pixel coordinates
    pub rect: Rect,

    /// Downsample factor
    pub sample: u32,
}

/// Epoch stamp carried by jobs and their results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Epochs {
    pub image: u64,
    pub decode: u64,
}

/// Results delivered from the decode thread to the owner.
#[derive(Debug)]
pub enum DecodeMessage {
    InitCompleted {
        epoch: u64,
        uri: String,
        dimensions: Size,
    },
    InitFailed {
        epoch: u64,
        uri: String,
        error: InitError,
    },
    DecodeCompleted {
        epochs: Epochs,
        tile: TileId,
        bitmap: Bitmap,
    },
    DecodeFailed {
        epochs: Epochs,
        tile: TileId,
        rect: Rect,
        failure: TileFailure,
    },
}

impl DecodeMessage {
    /// Take the bitmap out of a completed decode, if any.
    pub fn into_bitmap(self) -> Option<Bitmap> {
        match self {
            DecodeMessage::DecodeCompleted { bitmap, .. } => Some(bitmap),
            _ => None,
        }
    }
}

/// Anything tile decode requests can be submitted to.
///
/// Implemented by [`DecodeWorker`]; the tile manager only needs this seam.
pub trait DecodeScheduler {
    /// Queue a decode. Returns false if the request was not accepted.
    fn submit(&self, request: DecodeRequest) -> bool;
}

enum Job {
    Init { epoch: u64, uri: Option<String> },
    Decode { epochs: Epochs, request: DecodeRequest },
    Shutdown,
}

// =============================================================================
// Worker Context
// =============================================================================

/// Collaborators the decode thread works with.
#[derive(Clone)]
pub struct WorkerContext {
    pub decoder: Arc<dyn RegionDecoder>,
    pub provider: Arc<dyn SourceProvider>,
    pub pool: Arc<BitmapPool>,
    pub invalidator: Arc<dyn CacheInvalidator>,
    pub sink: Arc<dyn DiagnosticSink>,
    pub format: PixelFormat,
}

// =============================================================================
// DecodeWorker
// =============================================================================

/// Owner-side handle of the decode thread.
pub struct DecodeWorker {
    jobs: UnboundedSender<Job>,
    image_epoch: Arc<AtomicU64>,
    decode_epoch: Arc<AtomicU64>,
    recycled: bool,
    thread: Option<JoinHandle<()>>,
}

impl DecodeWorker {
    /// Start the decode thread.
    ///
    /// Returns the worker and the receiving end of its result channel. The
    /// receiver must be drained on the owner thread.
    pub fn spawn(
        context: WorkerContext,
    ) -> std::io::Result<(Self, UnboundedReceiver<DecodeMessage>)> {
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        let image_epoch = Arc::new(AtomicU64::new(0));
        let decode_epoch = Arc::new(AtomicU64::new(0));

        let mut thread_state = DecodeThread {
            context,
            jobs: job_rx,
            results: result_tx,
            image_epoch: image_epoch.clone(),
            decode_epoch: decode_epoch.clone(),
            current: None,
        };
        let thread = std::thread::Builder::new()
            .name(DECODE_THREAD_NAME.to_string())
            .spawn(move || thread_state.run())?;

        Ok((
            Self {
                jobs: job_tx,
                image_epoch,
                decode_epoch,
                recycled: false,
                thread: Some(thread),
            },
            result_rx,
        ))
    }

    /// Ask the worker to open a handle for `uri`, replacing any current one.
    ///
    /// `None` just closes the current handle. Returns the new image epoch.
    pub fn init(&self, uri: Option<&str>) -> u64 {
        let epoch = self.image_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.decode_epoch.fetch_add(1, Ordering::SeqCst);

        if self.recycled {
            warn!("Decode worker recycled, init ignored");
            return epoch;
        }

        let _ = self.jobs.send(Job::Init {
            epoch,
            uri: uri.map(str::to_string),
        });
        epoch
    }

    /// Cancel every queued tile decode.
    ///
    /// A decode already running completes; its result will carry a stale
    /// epoch and be discarded by the owner.
    pub fn clean_decode(&self, reason: &str) {
        let epoch = self.decode_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(reason, epoch, "Queued decodes cancelled");
    }

    /// Stop the worker permanently.
    ///
    /// Queued jobs are skipped, the handle is closed on the decode thread once
    /// any running decode returns, and later submissions are rejected.
    pub fn recycle(&mut self, reason: &str) {
        if self.recycled {
            return;
        }
        self.recycled = true;
        self.image_epoch.fetch_add(1, Ordering::SeqCst);
        self.decode_epoch.fetch_add(1, Ordering::SeqCst);
        let _ = self.jobs.send(Job::Shutdown);
        debug!(reason, "Decode worker recycled");
    }

    pub fn is_recycled(&self) -> bool {
        self.recycled
    }

    /// Current epoch stamp.
    pub fn epochs(&self) -> Epochs {
        Epochs {
            image: self.image_epoch.load(Ordering::SeqCst),
            decode: self.decode_epoch.load(Ordering::SeqCst),
        }
    }

    /// True if a result stamped with `epochs` is still wanted.
    pub fn is_current(&self, epochs: Epochs) -> bool {
        !self.recycled && epochs == self.epochs()
    }

    /// True if an init result stamped with `epoch` is still wanted.
    pub fn is_current_image(&self, epoch: u64) -> bool {
        !self.recycled && epoch == self.image_epoch.load(Ordering::SeqCst)
    }

    /// Block until the decode thread has exited. Only valid after `recycle`.
    pub fn join(&mut self) {
        if !self.recycled {
            return;
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl DecodeScheduler for DecodeWorker {
    fn submit(&self, request: DecodeRequest) -> bool {
        if self.recycled {
            return false;
        }
        self.jobs
            .send(Job::Decode {
                epochs: self.epochs(),
                request,
            })
            .is_ok()
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) {
        if !self.recycled {
            self.recycle("dropped");
        }
    }
}

// =============================================================================
// Decode Thread
// =============================================================================

struct OpenHandle {
    handle: Box<dyn RegionHandle>,
    source: Arc<dyn DataSource>,
    dimensions: Size,
    epoch: u64,
}

struct DecodeThread {
    context: WorkerContext,
    jobs: UnboundedReceiver<Job>,
    results: UnboundedSender<DecodeMessage>,
    image_epoch: Arc<AtomicU64>,
    decode_epoch: Arc<AtomicU64>,
    current: Option<OpenHandle>,
}

impl DecodeThread {
    fn run(&mut self) {
        while let Some(job) = self.jobs.blocking_recv() {
            match job {
                Job::Init { epoch, uri } => self.init(epoch, uri),
                Job::Decode { epochs, request } => self.decode(epochs, request),
                Job::Shutdown => break,
            }
        }
        self.close_current();
        trace!("Decode thread exiting");
    }

    fn init(&mut self, epoch: u64, uri: Option<String>) {
        if epoch != self.image_epoch.load(Ordering::SeqCst) {
            // A newer init is queued behind this one
            return;
        }

        self.close_current();

        let Some(uri) = uri else {
            return;
        };

        match self.open(&uri) {
            Ok((handle, source)) => {
                let dimensions = handle.dimensions();
                if dimensions.is_empty() {
                    handle.close();
                    self.send(DecodeMessage::InitFailed {
                        epoch,
                        uri,
                        error: InitError::EmptyImage(dimensions),
                    });
                    return;
                }
                self.current = Some(OpenHandle {
                    handle,
                    source,
                    dimensions,
                    epoch,
                });
                self.send(DecodeMessage::InitCompleted {
                    epoch,
                    uri,
                    dimensions,
                });
            }
            Err(error) => self.send(DecodeMessage::InitFailed { epoch, uri, error }),
        }
    }

    fn open(
        &self,
        uri: &str,
    ) -> Result<(Box<dyn RegionHandle>, Arc<dyn DataSource>), InitError> {
        let source = self.context.provider.open(uri)?;
        let handle = self
            .context
            .decoder
            .open(source.as_ref(), self.context.format)?;
        Ok((handle, source))
    }

    fn decode(&mut self, epochs: Epochs, request: DecodeRequest) {
        if epochs.image != self.image_epoch.load(Ordering::SeqCst)
            || epochs.decode != self.decode_epoch.load(Ordering::SeqCst)
        {
            trace!(tile = ?request.tile, "Skipping cancelled decode");
            return;
        }

        let Some(open) = self.current.as_mut() else {
            warn!(tile = ?request.tile, "Decode requested with no open handle");
            return;
        };
        if open.epoch != epochs.image {
            return;
        }

        let message = match decode_tile(open, &request, &self.context) {
            Ok(bitmap) => DecodeMessage::DecodeCompleted {
                epochs,
                tile: request.tile,
                bitmap,
            },
            Err(failure) => DecodeMessage::DecodeFailed {
                epochs,
                tile: request.tile,
                rect: request.rect,
                failure,
            },
        };
        self.send(message);
    }

    fn send(&self, message: DecodeMessage) {
        if let Err(mpsc::error::SendError(message)) = self.results.send(message) {
            // Owner is gone; keep the memory reusable anyway
            if let Some(bitmap) = message.into_bitmap() {
                self.context.pool.release(bitmap);
            }
        }
    }

    fn close_current(&mut self) {
        if let Some(open) = self.current.take() {
            trace!(identity = open.source.identity(), "Closing region decoder");
            open.handle.close();
        }
    }
}

/// Decode one tile, retrying once without a reuse block if the block was rejected.
fn decode_tile(
    open: &mut OpenHandle,
    request: &DecodeRequest,
    context: &WorkerContext,
) -> Result<Bitmap, TileFailure> {
    let out = decoded_size(&request.rect, request.sample);
    let mut reuse = context
        .pool
        .acquire(out.width, out.height, open.handle.format());
    let mut retried = false;

    loop {
        let used_reuse_block = reuse.is_some();
        let error = match open
            .handle
            .decode_region(request.rect, request.sample, reuse.take())
        {
            Ok(bitmap) => return Ok(bitmap),
            Err(error) => error,
        };

        match classify(&error, used_reuse_block, &request.rect, open.dimensions) {
            FailureClass::ReusableMemory if !retried => {
                retried = true;
                context.sink.record(&Diagnostic::DecodeRetried {
                    rect: request.rect,
                    sample: request.sample,
                });
            }
            FailureClass::StaleRegion => {
                return Err(stale_region(&error, request.rect, open.dimensions));
            }
            FailureClass::ReusableMemory | FailureClass::Fatal => {
                return Err(handle_fatal(
                    open.source.as_ref(),
                    error,
                    &context.invalidator,
                    &context.sink,
                ));
            }
        }
    }
}
