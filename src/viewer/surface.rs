//! Rendering surface seam and an image-backed implementation.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::{Pixel, Rgba, RgbaImage};

use crate::bitmap::Bitmap;
use crate::geom::{Matrix, Rect};

/// 32-bit ARGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color(pub u32);

impl Color {
    /// Outline of a decoded tile.
    pub const DECODED_OUTLINE: Color = Color(0x88FF_0000);

    /// Outline of a tile still waiting for its decode.
    pub const LOADING_OUTLINE: Color = Color(0x8800_00FF);

    pub fn alpha(self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub fn red(self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub fn green(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn blue(self) -> u8 {
        self.0 as u8
    }

    pub fn to_rgba(self) -> Rgba<u8> {
        Rgba([self.red(), self.green(), self.blue(), self.alpha()])
    }
}

/// Where the viewer paints tiles.
///
/// Rectangles passed to `draw_bitmap` and `draw_rect_outline` are in content
/// coordinates; the surface maps them through the last transform it was given.
pub trait DrawSurface {
    fn set_transform(&mut self, matrix: &Matrix);

    /// Paint the `src` part of `bitmap` into `dst`.
    fn draw_bitmap(&mut self, bitmap: &Bitmap, src: Rect, dst: Rect);

    fn draw_rect_outline(&mut self, rect: Rect, color: Color);
}

// =============================================================================
// ImageSurface
// =============================================================================

/// Draw surface compositing into an in-memory RGBA canvas.
pub struct ImageSurface {
    canvas: RgbaImage,
    matrix: Matrix,
}

impl ImageSurface {
    /// Create a transparent canvas of the given view size.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            canvas: RgbaImage::new(width, height),
            matrix: Matrix::IDENTITY,
        }
    }

    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }

    pub fn into_image(self) -> RgbaImage {
        self.canvas
    }

    /// Write the canvas to disk; the format follows the file extension.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), image::ImageError> {
        self.canvas.save(path)
    }

    fn canvas_bounds(&self) -> Rect {
        Rect::new(0, 0, self.canvas.width() as i32, self.canvas.height() as i32)
    }

    fn blend_pixel(&mut self, x: i32, y: i32, color: Rgba<u8>) {
        if x < 0 || y < 0 {
            return;
        }
        if let Some(pixel) = self.canvas.get_pixel_mut_checked(x as u32, y as u32) {
            pixel.blend(&color);
        }
    }
}

impl DrawSurface for ImageSurface {
    fn set_transform(&mut self, matrix: &Matrix) {
        self.matrix = *matrix;
    }

    fn draw_bitmap(&mut self, bitmap: &Bitmap, src: Rect, dst: Rect) {
        let Some(src) = src.intersect(&bitmap.bounds()) else {
            return;
        };
        let dst = self.matrix.map_rect(&dst);
        if dst.is_empty() || dst.intersect(&self.canvas_bounds()).is_none() {
            return;
        }
        let Some(rgba) = bitmap.to_rgba_image() else {
            return;
        };

        let region = imageops::crop_imm(
            &rgba,
            src.left as u32,
            src.top as u32,
            src.width() as u32,
            src.height() as u32,
        )
        .to_image();
        let scaled = imageops::resize(
            &region,
            dst.width() as u32,
            dst.height() as u32,
            FilterType::Triangle,
        );
        imageops::overlay(&mut self.canvas, &scaled, dst.left as i64, dst.top as i64);
    }

    fn draw_rect_outline(&mut self, rect: Rect, color: Color) {
        let r = self.matrix.map_rect(&rect);
        if r.is_empty() {
            return;
        }
        let color = color.to_rgba();
        let bounds = self.canvas_bounds();
        let Some(visible) = r.intersect(&bounds) else {
            return;
        };

        for x in visible.left..visible.right {
            self.blend_pixel(x, r.top, color);
            if r.bottom - 1 != r.top {
                self.blend_pixel(x, r.bottom - 1, color);
            }
        }
        for y in (r.top + 1).max(visible.top)..(r.bottom - 1).min(visible.bottom) {
            self.blend_pixel(r.left, y, color);
            if r.right - 1 != r.left {
                self.blend_pixel(r.right - 1, y, color);
            }
        }
    }
}
