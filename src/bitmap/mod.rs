//! Decoded pixel memory.
//!
//! A [`Bitmap`] is the owned output of a region decode. Tiles hold exactly one
//! bitmap while decoded; when a tile is evicted its bitmap moves back into the
//! [`BitmapPool`] so the next decode of the same shape can reuse the memory
//! instead of allocating again.
//!
//! ```text
//!   BitmapPool ──acquire──▶ Decode Worker ──decoded──▶ Tile
//!       ▲                                               │
//!       └──────────────────release (evict/discard)──────┘
//! ```

mod pool;

pub use pool::{BitmapKey, BitmapPool, PoolStats, DEFAULT_POOL_CAPACITY};

use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::geom::{Rect, Size};

// =============================================================================
// Pixel Format
// =============================================================================

/// Memory layout of decoded pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 8-bit RGBA, 4 bytes per pixel
    #[default]
    Rgba8,
    /// 8-bit RGB, 3 bytes per pixel
    Rgb8,
    /// 8-bit luminance, 1 byte per pixel
    Luma8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Luma8 => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PixelFormat::Rgba8 => "rgba8",
            PixelFormat::Rgb8 => "rgb8",
            PixelFormat::Luma8 => "luma8",
        }
    }
}

impl std::str::FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rgba8" | "rgba" => Ok(PixelFormat::Rgba8),
            "rgb8" | "rgb" => Ok(PixelFormat::Rgb8),
            "luma8" | "gray" | "luma" => Ok(PixelFormat::Luma8),
            other => Err(format!("unknown pixel format: {}", other)),
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Bitmap
// =============================================================================

/// An owned block of decoded pixels.
#[derive(Debug)]
pub struct Bitmap {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl Bitmap {
    /// Allocate a zeroed bitmap.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let len = width as usize * height as usize * format.bytes_per_pixel();
        Self {
            width,
            height,
            format,
            data: vec![0; len],
        }
    }

    /// Allocate a zeroed bitmap, reporting failure instead of aborting.
    pub fn try_new(width: u32, height: u32, format: PixelFormat) -> Result<Self, DecodeError> {
        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(format.bytes_per_pixel()))
            .ok_or(DecodeError::OutOfMemory { bytes: usize::MAX })?;

        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| DecodeError::OutOfMemory { bytes: len })?;
        data.resize(len, 0);

        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Pool key describing this bitmap's shape.
    pub fn key(&self) -> BitmapKey {
        BitmapKey::new(self.width, self.height, self.format)
    }

    /// Size of the pixel buffer in bytes.
    pub fn byte_count(&self) -> usize {
        self.data.len()
    }

    /// Full-bitmap rectangle, used as the paint source rect.
    pub fn bounds(&self) -> Rect {
        Rect::from_size(self.size())
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Convert to an RGBA image for compositing.
    pub fn to_rgba_image(&self) -> Option<RgbaImage> {
        let raw = self.data.clone();
        match self.format {
            PixelFormat::Rgba8 => RgbaImage::from_raw(self.width, self.height, raw),
            PixelFormat::Rgb8 => RgbImage::from_raw(self.width, self.height, raw)
                .map(|img| DynamicImage::ImageRgb8(img).to_rgba8()),
            PixelFormat::Luma8 => GrayImage::from_raw(self.width, self.height, raw)
                .map(|img| DynamicImage::ImageLuma8(img).to_rgba8()),
        }
    }
}
