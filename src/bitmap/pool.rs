//! Reuse pool for decoded bitmaps.
//!
//! Bitmaps are grouped by shape (width, height, pixel format). A decode asks
//! for a block of the exact shape it is about to produce; evicted tiles hand
//! their blocks back. The pool tracks the total size of idle blocks and evicts
//! least-recently-used shape groups when the capacity is exceeded.
//!
//! # Thread Safety
//!
//! Eviction happens on the owner thread while the decode thread acquires, so
//! all state sits behind a single mutex. Lock hold times are a map lookup and
//! a `Vec` push/pop.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use lru::LruCache;

use super::{Bitmap, PixelFormat};

/// Default pool capacity: 32MB of idle pixel memory
pub const DEFAULT_POOL_CAPACITY: usize = 32 * 1024 * 1024;

/// Upper bound on distinct shapes tracked at once
const DEFAULT_MAX_SHAPES: usize = 256;

// =============================================================================
// Pool Key
// =============================================================================

/// Shape of a pooled bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitmapKey {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl BitmapKey {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    /// Bytes a bitmap of this shape occupies.
    pub fn byte_count(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// `acquire` calls satisfied from the pool
    pub hits: u64,
    /// `acquire` calls that found nothing
    pub misses: u64,
    /// Bitmaps handed back via `release`
    pub releases: u64,
    /// Bitmaps dropped to stay within capacity
    pub evictions: u64,
    /// Idle bitmaps currently held
    pub pooled: usize,
    /// Idle bytes currently held
    pub bytes: usize,
}

// =============================================================================
// Bitmap Pool
// =============================================================================

struct PoolInner {
    groups: LruCache<BitmapKey, Vec<Bitmap>>,
    current_size: usize,
    pooled: usize,
}

/// Size-bounded reuse pool keyed by bitmap shape.
///
/// # Example
///
/// ```
/// use large_image_viewer::bitmap::{Bitmap, BitmapPool, PixelFormat};
///
/// let pool = BitmapPool::with_capacity(1024 * 1024);
/// pool.release(Bitmap::new(64, 64, PixelFormat::Rgba8));
///
/// let reused = pool.acquire(64, 64, PixelFormat::Rgba8);
/// assert!(reused.is_some());
/// assert!(pool.acquire(64, 64, PixelFormat::Rgba8).is_none());
/// ```
pub struct BitmapPool {
    inner: Mutex<PoolInner>,
    max_size: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    releases: AtomicU64,
    evictions: AtomicU64,
}

impl BitmapPool {
    /// Create a pool with the default capacity (32MB).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_POOL_CAPACITY)
    }

    /// Create a pool holding at most `max_size` bytes of idle bitmaps.
    pub fn with_capacity(max_size: usize) -> Self {
        Self::with_capacity_and_shapes(max_size, DEFAULT_MAX_SHAPES)
    }

    /// Create a pool with a byte capacity and a bound on distinct shapes.
    ///
    /// A `max_shapes` of zero is treated as one.
    pub fn with_capacity_and_shapes(max_size: usize, max_shapes: usize) -> Self {
        let shapes = NonZeroUsize::new(max_shapes).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(PoolInner {
                groups: LruCache::new(shapes),
                current_size: 0,
                pooled: 0,
            }),
            max_size,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Take an idle bitmap of exactly this shape, if one is pooled.
    ///
    /// The returned bitmap still holds the pixels of its previous owner.
    pub fn acquire(&self, width: u32, height: u32, format: PixelFormat) -> Option<Bitmap> {
        let key = BitmapKey::new(width, height, format);
        let mut inner = self.lock();

        let bitmap = inner.groups.get_mut(&key).and_then(|group| group.pop());
        match bitmap {
            Some(bitmap) => {
                inner.current_size = inner.current_size.saturating_sub(bitmap.byte_count());
                inner.pooled -= 1;
                if inner.groups.peek(&key).is_some_and(|g| g.is_empty()) {
                    inner.groups.pop(&key);
                }
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(bitmap)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Return a bitmap to the pool.
    ///
    /// Bitmaps larger than the whole capacity are dropped immediately.
    /// Otherwise least-recently-used shape groups are evicted until the pool
    /// is back within capacity.
    pub fn release(&self, bitmap: Bitmap) {
        self.releases.fetch_add(1, Ordering::Relaxed);

        let size = bitmap.byte_count();
        if size == 0 || size > self.max_size {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let key = bitmap.key();
        let mut inner = self.lock();

        if let Some(group) = inner.groups.get_mut(&key) {
            group.push(bitmap);
        } else if let Some((_, dropped)) = inner.groups.push(key, vec![bitmap]) {
            // Shape bound reached: the LRU group was displaced
            let dropped_bytes: usize = dropped.iter().map(Bitmap::byte_count).sum();
            inner.current_size = inner.current_size.saturating_sub(dropped_bytes);
            inner.pooled -= dropped.len();
            self.evictions
                .fetch_add(dropped.len() as u64, Ordering::Relaxed);
        }
        inner.current_size += size;
        inner.pooled += 1;

        while inner.current_size > self.max_size {
            let Some((lru_key, mut group)) = inner.groups.pop_lru() else {
                break;
            };
            // Trim one bitmap at a time so a hot shape keeps what still fits
            if let Some(evicted) = group.pop() {
                inner.current_size = inner.current_size.saturating_sub(evicted.byte_count());
                inner.pooled -= 1;
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
            if !group.is_empty() {
                inner.groups.push(lru_key, group);
                inner.groups.demote(&lru_key);
            }
        }
    }

    /// Drop every idle bitmap.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.groups.clear();
        inner.current_size = 0;
        inner.pooled = 0;
    }

    /// Idle bytes currently held.
    pub fn size(&self) -> usize {
        self.lock().current_size
    }

    /// Maximum idle bytes.
    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// Number of idle bitmaps currently held.
    pub fn len(&self) -> usize {
        self.lock().pooled
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.lock();
        PoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            pooled: inner.pooled,
            bytes: inner.current_size,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        // A panic while holding the lock leaves only counters behind; keep going
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for BitmapPool {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
