//! Geometry primitives shared by the tiling pipeline.
//!
//! All rectangles are integer, half-open (`left..right`, `top..bottom`), the
//! same convention region decoders use for source pixel coordinates.

use serde::{Deserialize, Serialize};

// =============================================================================
// Rect
// =============================================================================

/// Integer rectangle stored as left/top/right/bottom edges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Rectangle anchored at the origin with the given size.
    pub fn from_size(size: Size) -> Self {
        Self::new(0, 0, size.width as i32, size.height as i32)
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// True if the rectangle covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.left >= self.right || self.top >= self.bottom
    }

    /// True if `other` lies entirely inside this rectangle.
    pub fn contains(&self, other: &Rect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.left <= other.left
            && self.top <= other.top
            && self.right >= other.right
            && self.bottom >= other.bottom
    }

    /// Overlapping area of two rectangles, if any.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let r = Rect::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        );
        (!r.is_empty()).then_some(r)
    }

    /// Grow every edge outwards by the given amounts.
    pub fn outset(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(
            self.left - dx,
            self.top - dy,
            self.right + dx,
            self.bottom + dy,
        )
    }

    /// Multiply every edge by independent x/y factors, rounding outwards.
    pub fn scale_out(&self, sx: f64, sy: f64) -> Rect {
        Rect::new(
            (self.left as f64 * sx).floor() as i32,
            (self.top as f64 * sy).floor() as i32,
            (self.right as f64 * sx).ceil() as i32,
            (self.bottom as f64 * sy).ceil() as i32,
        )
    }

    /// Multiply every edge by independent x/y factors, rounding to nearest.
    pub fn scale_round(&self, sx: f64, sy: f64) -> Rect {
        Rect::new(
            (self.left as f64 * sx).round() as i32,
            (self.top as f64 * sy).round() as i32,
            (self.right as f64 * sx).round() as i32,
            (self.bottom as f64 * sy).round() as i32,
        )
    }

    /// Compact `[l,t][r,b]` form used in log lines.
    pub fn to_short_string(&self) -> String {
        format!(
            "[{},{}][{},{}]",
            self.left, self.top, self.right, self.bottom
        )
    }
}

// =============================================================================
// Size
// =============================================================================

/// Width/height pair in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True if either dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// =============================================================================
// Matrix
// =============================================================================

/// 2D affine transform mapping content coordinates to view coordinates.
///
/// Layout follows the usual `[sx kx tx; ky sy ty; 0 0 1]` form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub scale_x: f32,
    pub skew_x: f32,
    pub trans_x: f32,
    pub skew_y: f32,
    pub scale_y: f32,
    pub trans_y: f32,
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix {
        scale_x: 1.0,
        skew_x: 0.0,
        trans_x: 0.0,
        skew_y: 0.0,
        scale_y: 1.0,
        trans_y: 0.0,
    };

    pub fn identity() -> Self {
        Self::IDENTITY
    }

    /// Uniform scale followed by a translation.
    pub fn scale_translate(scale: f32, tx: f32, ty: f32) -> Self {
        Self {
            scale_x: scale,
            scale_y: scale,
            trans_x: tx,
            trans_y: ty,
            ..Self::IDENTITY
        }
    }

    pub fn reset(&mut self) {
        *self = Self::IDENTITY;
    }

    /// Effective zoom factor of the transform.
    ///
    /// Derived from the x basis vector so rotation does not shrink it.
    pub fn scale(&self) -> f32 {
        (self.scale_x * self.scale_x + self.skew_y * self.skew_y).sqrt()
    }

    pub fn map_point(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.scale_x * x + self.skew_x * y + self.trans_x,
            self.skew_y * x + self.scale_y * y + self.trans_y,
        )
    }

    /// Bounding box of a transformed rectangle.
    pub fn map_rect(&self, rect: &Rect) -> Rect {
        let corners = [
            self.map_point(rect.left as f32, rect.top as f32),
            self.map_point(rect.right as f32, rect.top as f32),
            self.map_point(rect.left as f32, rect.bottom as f32),
            self.map_point(rect.right as f32, rect.bottom as f32),
        ];
        let (mut min_x, mut min_y) = (f32::MAX, f32::MAX);
        let (mut max_x, mut max_y) = (f32::MIN, f32::MIN);
        for (x, y) in corners {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        Rect::new(
            min_x.round() as i32,
            min_y.round() as i32,
            max_x.round() as i32,
            max_y.round() as i32,
        )
    }
}

impl Default for Matrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Round to two decimal places, the precision zoom scales are compared at.
pub fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}
