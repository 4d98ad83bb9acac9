//! Downsample policy and tile grid planning.
//!
//! # Downsample Factor
//!
//! The factor is chosen so the decoded pixels of the visible rect roughly
//! match the pixels actually displayed:
//!
//! ```text
//! displayed = min(visible extent × zoom, viewport extent)     per axis
//! ideal     = source pixels of visible extent / displayed      per axis
//! sample    = largest power of two <= min(ideal_x, ideal_y)
//! ```
//!
//! clamped to `[1, max_sample]`. Taking the smaller axis errs on the side of
//! detail, so decoded resolution never drops below the displayed resolution
//! and stays under twice of it.
//!
//! # Grid
//!
//! Each tile spans `tile_size * sample` source pixels and the grid is aligned
//! to multiples of that span from the image origin, so panning by less than a
//! tile produces the same keys and only the edges change. The visible rect is
//! grown by `preload_margin` tiles on each side and clipped to the image.

use serde::Serialize;

use crate::config::ViewerConfig;
use crate::error::DegenerateInput;
use crate::geom::{Rect, Size};

use super::model::TileKey;
use crate::decode::decoded_size;

/// Viewport inputs to one tile set computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportParams {
    /// Visible rect in content coordinates
    pub visible: Rect,

    /// Size of the content the visible rect is expressed in
    pub content: Size,

    /// Size of the view in view pixels
    pub viewport: Size,

    /// Full pixel dimensions of the source image
    pub source: Size,

    /// View pixels per content pixel
    pub zoom: f32,
}

impl ViewportParams {
    /// Reject parameters that cannot produce a tile set.
    pub fn check(&self) -> Result<(), DegenerateInput> {
        if self.visible.is_empty() {
            return Err(DegenerateInput::EmptyVisibleRect(self.visible));
        }
        if self.content.is_empty() {
            return Err(DegenerateInput::EmptyContentSize(self.content));
        }
        if self.viewport.is_empty() {
            return Err(DegenerateInput::EmptyViewportSize(self.viewport));
        }
        Ok(())
    }

    /// Source pixels per content pixel along each axis.
    pub fn source_scale(&self) -> (f64, f64) {
        (
            self.source.width as f64 / self.content.width.max(1) as f64,
            self.source.height as f64 / self.content.height.max(1) as f64,
        )
    }

    /// The visible rect mapped into source pixel coordinates.
    pub fn visible_source_rect(&self) -> Rect {
        let (sx, sy) = self.source_scale();
        self.visible.scale_out(sx, sy)
    }
}

/// Pick the downsample factor for a viewport.
pub fn compute_sample(params: &ViewportParams, max_sample: u32) -> u32 {
    let (sx, sy) = params.source_scale();
    let zoom = if params.zoom.is_finite() && params.zoom > 0.0 {
        params.zoom as f64
    } else {
        1.0
    };

    let visible_w = params.visible.width().max(0) as f64;
    let visible_h = params.visible.height().max(0) as f64;

    let shown_w = (visible_w * zoom).min(params.viewport.width as f64);
    let shown_h = (visible_h * zoom).min(params.viewport.height as f64);
    if shown_w <= 0.0 || shown_h <= 0.0 {
        return 1;
    }

    let ideal = (visible_w * sx / shown_w).min(visible_h * sy / shown_h);
    if !ideal.is_finite() {
        return 1;
    }

    let max_sample = max_sample.max(1);
    let mut sample = 1u32;
    while sample * 2 <= max_sample && (sample * 2) as f64 <= ideal {
        sample *= 2;
    }
    sample
}

// =============================================================================
// Tile Plan
// =============================================================================

/// One candidate tile of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlannedTile {
    pub key: TileKey,

    /// Where the tile is painted, in content coordinates
    pub draw_rect: Rect,

    /// Pixel size of the decoded bitmap
    pub decoded: Size,
}

/// Candidate tile grid for one viewport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TilePlan {
    pub sample: u32,

    /// Source pixels spanned by one full tile
    pub tile_span: u32,

    /// Visible source rect grown by the preload margin and clipped to the
    /// image; `None` if nothing of the image is visible
    pub area: Option<Rect>,

    pub tiles: Vec<PlannedTile>,
}

impl TilePlan {
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Bounding box of every planned tile in source coordinates.
    pub fn coverage(&self) -> Option<Rect> {
        self.tiles.iter().map(|t| t.key.src_rect).reduce(|a, b| {
            Rect::new(
                a.left.min(b.left),
                a.top.min(b.top),
                a.right.max(b.right),
                a.bottom.max(b.bottom),
            )
        })
    }
}

/// Partition a viewport into candidate tiles.
///
/// Tiles are produced row-major from the top-left so decodes near the origin
/// of the visible area are queued first.
///
/// # Example
///
/// ```
/// use large_image_viewer::config::ViewerConfig;
/// use large_image_viewer::geom::{Rect, Size};
/// use large_image_viewer::tile::{plan_tiles, ViewportParams};
///
/// let params = ViewportParams {
///     visible: Rect::new(0, 0, 2000, 2000),
///     content: Size::new(8000, 6000),
///     viewport: Size::new(1000, 1000),
///     source: Size::new(8000, 6000),
///     zoom: 1.0,
/// };
/// let plan = plan_tiles(&params, &ViewerConfig::default());
/// assert_eq!(plan.sample, 2);
/// assert_eq!(plan.tile_span, 512);
/// ```
pub fn plan_tiles(params: &ViewportParams, config: &ViewerConfig) -> TilePlan {
    let sample = compute_sample(params, config.max_sample);
    let tile_span = config.tile_size.max(1).saturating_mul(sample);
    let mut plan = TilePlan {
        sample,
        tile_span,
        area: None,
        tiles: Vec::new(),
    };

    let span = tile_span.min(i32::MAX as u32) as i32;
    let margin = span.saturating_mul(config.preload_margin as i32);
    let bounds = Rect::from_size(params.source);

    let Some(area) = params
        .visible_source_rect()
        .outset(margin, margin)
        .intersect(&bounds)
    else {
        return plan;
    };
    plan.area = Some(area);

    let (sx, sy) = params.source_scale();
    let first_x = area.left.div_euclid(span) * span;
    let first_y = area.top.div_euclid(span) * span;

    let mut y = first_y;
    while y < area.bottom {
        let mut x = first_x;
        while x < area.right {
            let src_rect = Rect::new(
                x,
                y,
                x.saturating_add(span).min(bounds.right),
                y.saturating_add(span).min(bounds.bottom),
            );
            plan.tiles.push(PlannedTile {
                key: TileKey::new(src_rect, sample),
                draw_rect: src_rect.scale_round(1.0 / sx, 1.0 / sy),
                decoded: decoded_size(&src_rect, sample),
            });
            x = x.saturating_add(span);
        }
        y = y.saturating_add(span);
    }

    plan
}
