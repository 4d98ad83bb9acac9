//! Region decoder traits.
//!
//! A [`RegionDecoder`] opens a [`DataSource`] once and hands back a
//! [`RegionHandle`] that can decode arbitrary sub-rectangles at a downsample
//! factor. Handles are stateful and not safe for concurrent use; the decode
//! worker owns exactly one at a time and closes it exactly once.

use crate::bitmap::{Bitmap, PixelFormat};
use crate::error::DecodeError;
use crate::geom::{Rect, Size};
use crate::source::DataSource;

/// Opens region decoder handles over data sources.
pub trait RegionDecoder: Send + Sync {
    /// Open a handle over `source`.
    ///
    /// The handle decodes into bitmaps of `format`.
    fn open(
        &self,
        source: &dyn DataSource,
        format: PixelFormat,
    ) -> Result<Box<dyn RegionHandle>, DecodeError>;
}

/// An open region decoder bound to one source.
pub trait RegionHandle: Send {
    /// Full pixel dimensions of the source image.
    fn dimensions(&self) -> Size;

    /// Pixel format decoded bitmaps are produced in.
    fn format(&self) -> PixelFormat;

    /// Decode `rect` (source coordinates) downsampled by `sample`.
    ///
    /// When `reuse` is given the decoder must write into it, and fail with
    /// [`DecodeError::ReuseMismatch`] if the block does not fit the output.
    /// A consumed reuse block is dropped on failure.
    fn decode_region(
        &mut self,
        rect: Rect,
        sample: u32,
        reuse: Option<Bitmap>,
    ) -> Result<Bitmap, DecodeError>;

    /// Release decoder resources. Called exactly once by the owner.
    fn close(self: Box<Self>) {}
}

/// Pixel size of `rect` decoded at `sample`, rounding partial pixels up.
pub fn decoded_size(rect: &Rect, sample: u32) -> Size {
    let sample = sample.max(1);
    let w = rect.width().max(0) as u32;
    let h = rect.height().max(0) as u32;
    Size::new(w.div_ceil(sample), h.div_ceil(sample))
}
