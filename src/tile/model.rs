//! Tile data model.

use std::fmt;

use serde::Serialize;

use crate::bitmap::Bitmap;
use crate::error::TileFailure;
use crate::geom::Rect;

/// Identity of one tile instance.
///
/// Ids are never reused, so a result addressed to an evicted tile can never be
/// applied to a newer tile covering the same region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId(u64);

impl TileId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Region identity used when diffing tile sets.
///
/// Two tiles are the same tile if and only if they cover the same source
/// rectangle at the same downsample factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TileKey {
    /// Region in source pixel coordinates
    pub src_rect: Rect,

    /// Downsample factor, at least 1
    pub sample: u32,
}

impl TileKey {
    pub fn new(src_rect: Rect, sample: u32) -> Self {
        Self {
            src_rect,
            sample: sample.max(1),
        }
    }
}

/// Decode state of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TileState {
    Empty,
    DecodeRequested,
    Decoded,
    Failed,
}

/// A source sub-rectangle decoded at one downsample factor.
#[derive(Debug)]
pub struct Tile {
    id: TileId,
    key: TileKey,
    draw_rect: Rect,
    state: TileState,
    bitmap: Option<Bitmap>,
    failure: Option<TileFailure>,
}

impl Tile {
    pub(crate) fn new(id: TileId, key: TileKey, draw_rect: Rect) -> Self {
        Self {
            id,
            key,
            draw_rect,
            state: TileState::Empty,
            bitmap: None,
            failure: None,
        }
    }

    pub fn id(&self) -> TileId {
        self.id
    }

    pub fn key(&self) -> TileKey {
        self.key
    }

    pub fn src_rect(&self) -> Rect {
        self.key.src_rect
    }

    pub fn sample(&self) -> u32 {
        self.key.sample
    }

    /// Where the tile is painted, in content coordinates.
    pub fn draw_rect(&self) -> Rect {
        self.draw_rect
    }

    pub fn state(&self) -> TileState {
        self.state
    }

    /// Decoded pixels, present only while the tile is `Decoded`.
    pub fn bitmap(&self) -> Option<&Bitmap> {
        self.bitmap.as_ref()
    }

    /// Portion of the bitmap holding this tile's pixels.
    pub fn bitmap_src_rect(&self) -> Option<Rect> {
        self.bitmap.as_ref().map(Bitmap::bounds)
    }

    pub fn failure(&self) -> Option<&TileFailure> {
        self.failure.as_ref()
    }

    pub fn is_decoded(&self) -> bool {
        self.state == TileState::Decoded
    }

    pub(crate) fn set_draw_rect(&mut self, draw_rect: Rect) {
        self.draw_rect = draw_rect;
    }

    pub(crate) fn mark_requested(&mut self) {
        self.state = TileState::DecodeRequested;
    }

    pub(crate) fn complete(&mut self, bitmap: Bitmap) {
        self.state = TileState::Decoded;
        self.failure = None;
        self.bitmap = Some(bitmap);
    }

    pub(crate) fn fail(&mut self, failure: TileFailure) {
        self.state = TileState::Failed;
        self.failure = Some(failure);
    }

    /// Detach the pixels, leaving the tile without a bitmap.
    pub(crate) fn take_bitmap(&mut self) -> Option<Bitmap> {
        self.bitmap.take()
    }
}
