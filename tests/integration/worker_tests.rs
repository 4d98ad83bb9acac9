//! Decode worker integration tests.
//!
//! Tests verify:
//! - Init opens a handle and closes the previous one exactly once
//! - Reuse-block failures are retried once with fresh memory
//! - Stale regions and fatal failures are classified without retry
//! - Fatal failures on cache-backed sources reach the invalidator
//! - Cancelled jobs are skipped and late results carry stale epochs

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use large_image_viewer::bitmap::{Bitmap, BitmapPool, PixelFormat};
use large_image_viewer::decode::{
    DecodeMessage, DecodeRequest, DecodeScheduler, DecodeWorker, WorkerContext,
};
use large_image_viewer::diag::Diagnostic;
use large_image_viewer::error::{DecodeError, TileFailure};
use large_image_viewer::geom::{Rect, Size};
use large_image_viewer::source::CacheEntrySource;
use large_image_viewer::tile::TileId;

use super::test_utils::{
    wait_until, MockProvider, MockRegionDecoder, RecordingInvalidator, RecordingSink,
};

struct WorkerHarness {
    worker: DecodeWorker,
    results: UnboundedReceiver<DecodeMessage>,
    decoder: MockRegionDecoder,
    pool: Arc<BitmapPool>,
    sink: Arc<RecordingSink>,
    invalidator: Arc<RecordingInvalidator>,
}

fn spawn(decoder: MockRegionDecoder, provider: MockProvider) -> WorkerHarness {
    let pool = Arc::new(BitmapPool::new());
    let sink = Arc::new(RecordingSink::default());
    let invalidator = Arc::new(RecordingInvalidator::default());
    let (worker, results) = DecodeWorker::spawn(WorkerContext {
        decoder: Arc::new(decoder.clone()),
        provider: Arc::new(provider),
        pool: pool.clone(),
        invalidator: invalidator.clone(),
        sink: sink.clone(),
        format: PixelFormat::Rgba8,
    })
    .unwrap();

    WorkerHarness {
        worker,
        results,
        decoder,
        pool,
        sink,
        invalidator,
    }
}

fn spawn_default() -> WorkerHarness {
    spawn(
        MockRegionDecoder::new(Size::new(8000, 6000)),
        MockProvider::new().with_memory("mem://a").with_memory("mem://b"),
    )
}

async fn next(results: &mut UnboundedReceiver<DecodeMessage>) -> DecodeMessage {
    tokio::time::timeout(Duration::from_secs(10), results.recv())
        .await
        .expect("no message from worker")
        .expect("worker channel closed")
}

async fn open(h: &mut WorkerHarness, uri: &str) {
    h.worker.init(Some(uri));
    match next(&mut h.results).await {
        DecodeMessage::InitCompleted { .. } => {}
        other => panic!("unexpected message: {:?}", other),
    }
}

fn request(id: u64, rect: Rect, sample: u32) -> DecodeRequest {
    DecodeRequest {
        tile: TileId::new(id),
        rect,
        sample,
    }
}

// =============================================================================
// Init
// =============================================================================

#[tokio::test]
async fn test_init_reports_dimensions() {
    let mut h = spawn(
        MockRegionDecoder::new(Size::new(10, 10)).with_dimensions("mem://a", Size::new(8000, 6000)),
        MockProvider::new().with_memory("mem://a"),
    );

    let epoch = h.worker.init(Some("mem://a"));
    match next(&mut h.results).await {
        DecodeMessage::InitCompleted {
            epoch: got,
            uri,
            dimensions,
        } => {
            assert_eq!(got, epoch);
            assert_eq!(uri, "mem://a");
            assert_eq!(dimensions, Size::new(8000, 6000));
        }
        other => panic!("unexpected message: {:?}", other),
    }
    assert!(h.worker.is_current_image(epoch));
}

#[tokio::test]
async fn test_init_missing_source_fails() {
    let mut h = spawn_default();

    h.worker.init(Some("mem://missing"));
    match next(&mut h.results).await {
        DecodeMessage::InitFailed { uri, .. } => assert_eq!(uri, "mem://missing"),
        other => panic!("unexpected message: {:?}", other),
    }
    assert_eq!(h.decoder.opens(), 0);
}

#[tokio::test]
async fn test_reinit_closes_previous_handle_once() {
    let mut h = spawn_default();

    open(&mut h, "mem://a").await;
    open(&mut h, "mem://b").await;
    assert_eq!(h.decoder.opens(), 2);
    assert_eq!(h.decoder.closes(), 1);

    h.worker.recycle("test");
    h.worker.join();
    assert_eq!(h.decoder.closes(), 2);
}

#[tokio::test]
async fn test_superseded_init_is_not_reported_current() {
    let mut h = spawn_default();

    let first = h.worker.init(Some("mem://a"));
    let second = h.worker.init(Some("mem://b"));
    assert!(!h.worker.is_current_image(first));

    // The first init may or may not have run; the last message is for the second
    let mut last = None;
    while let DecodeMessage::InitCompleted { epoch, uri, .. } = next(&mut h.results).await {
        last = Some((epoch, uri));
        if epoch == second {
            break;
        }
    }
    assert_eq!(last, Some((second, "mem://b".to_string())));

    h.worker.recycle("test");
    h.worker.join();
    assert_eq!(h.decoder.opens(), h.decoder.closes());
}

#[tokio::test]
async fn test_init_none_releases_handle() {
    let mut h = spawn_default();
    open(&mut h, "mem://a").await;

    h.worker.init(None);
    let decoder = h.decoder.clone();
    wait_until(|| decoder.closes() == 1).await;
    assert_eq!(h.decoder.opens(), 1);
}

// =============================================================================
// Tile Decodes
// =============================================================================

#[tokio::test]
async fn test_decode_uses_pooled_block() {
    let mut h = spawn_default();
    open(&mut h, "mem://a").await;
    h.pool.release(Bitmap::new(128, 128, PixelFormat::Rgba8));

    assert!(h.worker.submit(request(1, Rect::new(0, 0, 256, 256), 2)));
    match next(&mut h.results).await {
        DecodeMessage::DecodeCompleted { tile, bitmap, epochs } => {
            assert_eq!(tile, TileId::new(1));
            assert_eq!(bitmap.size(), Size::new(128, 128));
            assert!(h.worker.is_current(epochs));
        }
        other => panic!("unexpected message: {:?}", other),
    }
    assert!(h.decoder.calls()[0].with_reuse);
    assert_eq!(h.pool.stats().hits, 1);
}

#[tokio::test]
async fn test_reuse_mismatch_retries_once_with_fresh_memory() {
    let mut h = spawn_default();
    open(&mut h, "mem://a").await;

    let rect = Rect::new(100, 100, 200, 200);
    h.pool.release(Bitmap::new(100, 100, PixelFormat::Rgba8));
    h.decoder.fail_next(DecodeError::ReuseMismatch {
        expected: "100x100".to_string(),
        actual: "100x100 premultiplied".to_string(),
    });

    assert!(h.worker.submit(request(7, rect, 1)));
    match next(&mut h.results).await {
        DecodeMessage::DecodeCompleted { tile, bitmap, .. } => {
            assert_eq!(tile, TileId::new(7));
            assert_eq!(bitmap.size(), Size::new(100, 100));
        }
        other => panic!("unexpected message: {:?}", other),
    }

    let calls = h.decoder.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].with_reuse);
    assert!(!calls[1].with_reuse);
    assert_eq!(
        h.sink.count(|e| matches!(e, Diagnostic::DecodeRetried { .. })),
        1
    );

    // Completion is reported exactly once
    h.worker.recycle("test");
    h.worker.join();
    assert!(h.results.try_recv().is_err());
}

#[tokio::test]
async fn test_failed_retry_is_reported_as_corrupt() {
    let mut h = spawn_default();
    open(&mut h, "mem://a").await;

    h.pool.release(Bitmap::new(100, 100, PixelFormat::Rgba8));
    h.decoder.fail_next(DecodeError::ReuseMismatch {
        expected: "a".to_string(),
        actual: "b".to_string(),
    });
    h.decoder.fail_next(DecodeError::Io("short read".to_string()));

    h.worker.submit(request(1, Rect::new(100, 100, 200, 200), 1));
    match next(&mut h.results).await {
        DecodeMessage::DecodeFailed { failure, .. } => {
            assert!(matches!(
                failure,
                TileFailure::SourceCorrupt {
                    cause: DecodeError::Io(_),
                    ..
                }
            ));
        }
        other => panic!("unexpected message: {:?}", other),
    }
    assert_eq!(h.decoder.calls().len(), 2);
}

#[tokio::test]
async fn test_reuse_complaint_without_block_is_not_retried() {
    let mut h = spawn_default();
    open(&mut h, "mem://a").await;

    h.decoder.fail_next(DecodeError::ReuseMismatch {
        expected: "a".to_string(),
        actual: "b".to_string(),
    });
    h.worker.submit(request(1, Rect::new(0, 0, 256, 256), 1));
    match next(&mut h.results).await {
        DecodeMessage::DecodeFailed { failure, .. } => {
            assert!(matches!(failure, TileFailure::SourceCorrupt { .. }));
        }
        other => panic!("unexpected message: {:?}", other),
    }
    assert_eq!(h.decoder.calls().len(), 1);
}

#[tokio::test]
async fn test_out_of_bounds_is_stale_region() {
    let mut h = spawn_default();
    open(&mut h, "mem://a").await;

    let rect = Rect::new(7936, 5888, 8192, 6144);
    h.worker.submit(request(3, rect, 1));
    match next(&mut h.results).await {
        DecodeMessage::DecodeFailed {
            tile,
            rect: got,
            failure,
            ..
        } => {
            assert_eq!(tile, TileId::new(3));
            assert_eq!(got, rect);
            match failure {
                TileFailure::StaleRegion { width, height, .. } => {
                    assert_eq!((width, height), (8000, 6000));
                }
                other => panic!("unexpected failure: {:?}", other),
            }
        }
        other => panic!("unexpected message: {:?}", other),
    }
    assert_eq!(h.decoder.calls().len(), 1);
    assert!(h.invalidator.invalidated().is_empty());
}

#[tokio::test]
async fn test_fatal_on_cache_entry_invalidates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("entry-1");
    std::fs::write(&path, b"not an image").unwrap();

    let mut h = spawn(
        MockRegionDecoder::new(Size::new(1000, 1000)),
        MockProvider::new().with_source(
            "cache://entry-1",
            Arc::new(CacheEntrySource::new("entry-1", &path)),
        ),
    );
    open(&mut h, "cache://entry-1").await;

    h.decoder.fail_next(DecodeError::Corrupt("bad huffman table".to_string()));
    h.worker.submit(request(1, Rect::new(0, 0, 256, 256), 1));
    match next(&mut h.results).await {
        DecodeMessage::DecodeFailed { failure, .. } => match failure {
            TileFailure::SourceCorrupt { identity, .. } => assert_eq!(identity, "entry-1"),
            other => panic!("unexpected failure: {:?}", other),
        },
        other => panic!("unexpected message: {:?}", other),
    }

    assert_eq!(h.invalidator.invalidated(), vec!["entry-1".to_string()]);
    assert_eq!(
        h.sink.count(|e| matches!(e, Diagnostic::CacheInvalidated { .. })),
        1
    );
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_clean_decode_skips_queued_jobs() {
    let mut h = spawn_default();
    open(&mut h, "mem://a").await;

    h.decoder.gate().close();
    for id in 1..=3 {
        h.worker
            .submit(request(id, Rect::new(0, 0, 256, 256), 1));
    }
    let decoder = h.decoder.clone();
    wait_until(|| decoder.started() == 1).await;

    h.worker.clean_decode("test");
    h.decoder.gate().open();

    // The running decode finishes with the old stamp
    match next(&mut h.results).await {
        DecodeMessage::DecodeCompleted { tile, epochs, .. } => {
            assert_eq!(tile, TileId::new(1));
            assert!(!h.worker.is_current(epochs));
        }
        other => panic!("unexpected message: {:?}", other),
    }

    h.worker.recycle("test");
    h.worker.join();
    assert_eq!(h.decoder.started(), 1);
    assert!(h.results.try_recv().is_err());
}

#[tokio::test]
async fn test_recycle_rejects_submissions() {
    let mut h = spawn_default();
    open(&mut h, "mem://a").await;

    h.worker.recycle("test");
    assert!(h.worker.is_recycled());
    assert!(!h.worker.submit(request(1, Rect::new(0, 0, 256, 256), 1)));

    h.worker.join();
    assert_eq!(h.decoder.closes(), 1);
    assert!(h.decoder.calls().is_empty());
}
