//! Region decoder backed by the `image` crate.
//!
//! This is a reference backend for images that fit in memory. The `image`
//! codecs cannot decode a sub-rectangle directly, so the handle decodes the
//! whole source once when opened and serves every region from that buffer:
//! crop, then downsample. Peak memory is the full decoded image, so truly
//! huge sources need a `RegionDecoder` backed by a codec with native region
//! decoding. Dimensions are read from the header first so an unreadable or
//! empty source fails before any pixels are materialized.
//!
//! # Design Decisions
//!
//! - **Decode once per handle**: the buffer lives exactly as long as the
//!   handle, and is released by `close`.
//! - **Reuse is strict**: a supplied reuse block must match the output shape
//!   and format exactly, otherwise the decode fails with `ReuseMismatch`.
//! - **Nearest by default**: `with_filter` trades decode time for smoother
//!   downsampled tiles.

use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};

use crate::bitmap::{Bitmap, PixelFormat};
use crate::error::DecodeError;
use crate::geom::{Rect, Size};
use crate::source::DataSource;

use super::region::{decoded_size, RegionDecoder, RegionHandle};

// =============================================================================
// ImageRegionDecoder
// =============================================================================

/// Region decoder for formats supported by the `image` crate (JPEG, PNG).
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageRegionDecoder {
    filter: Option<FilterType>,
}

impl ImageRegionDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a resampling filter instead of nearest-neighbour when downsampling.
    pub fn with_filter(filter: FilterType) -> Self {
        Self {
            filter: Some(filter),
        }
    }

    /// Read only the image header and return its dimensions.
    pub fn probe(source: &dyn DataSource) -> Result<Size, DecodeError> {
        let stream = source.open_stream()?;
        let reader = ImageReader::new(std::io::BufReader::new(stream))
            .with_guessed_format()
            .map_err(|e| DecodeError::Io(e.to_string()))?;
        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| DecodeError::Corrupt(e.to_string()))?;
        Ok(Size::new(width, height))
    }
}

impl RegionDecoder for ImageRegionDecoder {
    fn open(
        &self,
        source: &dyn DataSource,
        format: PixelFormat,
    ) -> Result<Box<dyn RegionHandle>, DecodeError> {
        let dimensions = Self::probe(source)?;
        if dimensions.is_empty() {
            return Err(DecodeError::Corrupt(format!(
                "{} has empty dimensions {}",
                source.identity(),
                dimensions
            )));
        }

        let stream = source.open_stream()?;
        let image = ImageReader::new(std::io::BufReader::new(stream))
            .with_guessed_format()
            .map_err(|e| DecodeError::Io(e.to_string()))?
            .decode()
            .map_err(|e| map_image_error(e, dimensions))?;

        Ok(Box::new(ImageRegionHandle {
            image: Some(image),
            dimensions,
            format,
            filter: self.filter,
        }))
    }
}

fn map_image_error(err: image::ImageError, dimensions: Size) -> DecodeError {
    match err {
        image::ImageError::IoError(e) => DecodeError::Io(e.to_string()),
        image::ImageError::Limits(_) => DecodeError::OutOfMemory {
            bytes: dimensions.width as usize * dimensions.height as usize * 4,
        },
        other => DecodeError::Corrupt(other.to_string()),
    }
}

// =============================================================================
// ImageRegionHandle
// =============================================================================

struct ImageRegionHandle {
    image: Option<DynamicImage>,
    dimensions: Size,
    format: PixelFormat,
    filter: Option<FilterType>,
}

impl RegionHandle for ImageRegionHandle {
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
        let image = self.image.as_ref().ok_or(DecodeError::Closed)?;

        let bounds = Rect::from_size(self.dimensions);
        if !bounds.contains(&rect) {
            return Err(DecodeError::RegionOutOfBounds {
                rect,
                width: self.dimensions.width,
                height: self.dimensions.height,
            });
        }

        let out = decoded_size(&rect, sample);
        let mut bitmap = match reuse {
            Some(block) => {
                if block.size() != out || block.format() != self.format {
                    return Err(DecodeError::ReuseMismatch {
                        expected: format!("{} {}", out, self.format),
                        actual: format!("{} {}", block.size(), block.format()),
                    });
                }
                block
            }
            None => Bitmap::try_new(out.width, out.height, self.format)?,
        };

        let region = image.crop_imm(
            rect.left as u32,
            rect.top as u32,
            rect.width() as u32,
            rect.height() as u32,
        );
        let region = if out.width == region.width() && out.height == region.height() {
            region
        } else {
            let filter = self.filter.unwrap_or(FilterType::Nearest);
            region.resize_exact(out.width, out.height, filter)
        };

        write_pixels(&region, self.format, &mut bitmap);
        Ok(bitmap)
    }

    fn close(mut self: Box<Self>) {
        self.image = None;
    }
}

/// Copy `region` into `bitmap`, converting to the bitmap's pixel format.
fn write_pixels(region: &DynamicImage, format: PixelFormat, bitmap: &mut Bitmap) {
    match format {
        PixelFormat::Rgba8 => bitmap
            .pixels_mut()
            .copy_from_slice(region.to_rgba8().as_raw()),
        PixelFormat::Rgb8 => bitmap
            .pixels_mut()
            .copy_from_slice(region.to_rgb8().as_raw()),
        PixelFormat::Luma8 => bitmap
            .pixels_mut()
            .copy_from_slice(region.to_luma8().as_raw()),
    }
}
