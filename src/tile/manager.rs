//! Tile set manager.
//!
//! Owns the current tile set on the owner thread. Each update plans a
//! candidate grid, diffs it against the current set by [`TileKey`], evicts
//! tiles that are no longer wanted and submits decodes for new ones. Decode
//! results are applied by tile identity, so a result for a tile evicted while
//! its decode was running is dropped and its bitmap goes back to the pool.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;

use crate::bitmap::{Bitmap, BitmapPool};
use crate::config::ViewerConfig;
use crate::decode::{DecodeRequest, DecodeScheduler};
use crate::diag::{Diagnostic, DiagnosticSink};
use crate::error::TileFailure;

use super::model::{Tile, TileId, TileKey, TileState};
use super::sampling::{plan_tiles, ViewportParams};

/// Summary of one tile set update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TileDiff {
    /// Downsample factor of the new set
    pub sample: u32,

    /// Tiles created by this update
    pub added: usize,

    /// Tiles carried over unchanged
    pub kept: usize,

    /// Tiles removed, their memory returned to the pool
    pub evicted: usize,

    /// Decode requests accepted by the scheduler
    pub submitted: usize,
}

/// Owner-thread collection of the tiles covering the current viewport.
pub struct TileManager {
    config: ViewerConfig,
    pool: Arc<BitmapPool>,
    sink: Arc<dyn DiagnosticSink>,
    tiles: BTreeMap<TileKey, Tile>,
    index: HashMap<TileId, TileKey>,
    next_id: u64,
    sample: Option<u32>,
    recycled: bool,
}

impl TileManager {
    pub fn new(config: ViewerConfig, pool: Arc<BitmapPool>, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            config,
            pool,
            sink,
            tiles: BTreeMap::new(),
            index: HashMap::new(),
            next_id: 1,
            sample: None,
            recycled: false,
        }
    }

    /// Recompute the tile set for a viewport.
    ///
    /// # Arguments
    ///
    /// * `params` - Visible rect, content/viewport/source sizes and zoom
    /// * `scheduler` - Receives a decode request for every tile that needs one
    pub fn update(&mut self, params: &ViewportParams, scheduler: &dyn DecodeScheduler) -> TileDiff {
        if self.recycled {
            return TileDiff::default();
        }

        let plan = plan_tiles(params, &self.config);
        let mut diff = TileDiff {
            sample: plan.sample,
            ..Default::default()
        };

        let wanted: BTreeMap<TileKey, _> = plan.tiles.iter().map(|t| (t.key, t)).collect();
        let stale: Vec<TileKey> = self
            .tiles
            .keys()
            .filter(|key| !wanted.contains_key(key))
            .copied()
            .collect();
        for key in stale {
            self.evict(&key);
            diff.evicted += 1;
        }

        for planned in &plan.tiles {
            if self.tiles.contains_key(&planned.key) {
                diff.kept += 1;
            } else {
                let id = TileId::new(self.next_id);
                self.next_id += 1;
                self.index.insert(id, planned.key);
                self.tiles
                    .insert(planned.key, Tile::new(id, planned.key, planned.draw_rect));
                diff.added += 1;
            }
            let Some(tile) = self.tiles.get_mut(&planned.key) else {
                continue;
            };
            tile.set_draw_rect(planned.draw_rect);

            // Only an idle tile is submitted, which keeps one decode in flight per tile
            if tile.state() == TileState::Empty {
                let request = DecodeRequest {
                    tile: tile.id(),
                    rect: tile.src_rect(),
                    sample: tile.sample(),
                };
                if scheduler.submit(request) {
                    tile.mark_requested();
                    diff.submitted += 1;
                }
            }
        }

        self.sample = Some(plan.sample);
        self.sink.record(&Diagnostic::TilesUpdated {
            sample: diff.sample,
            added: diff.added,
            kept: diff.kept,
            evicted: diff.evicted,
        });
        diff
    }

    /// Apply a successful decode. Returns true if the tile took the bitmap.
    pub fn decode_completed(&mut self, id: TileId, bitmap: Bitmap) -> bool {
        match self.awaiting_tile(id) {
            Some(tile) => {
                tile.complete(bitmap);
                true
            }
            None => {
                self.pool.release(bitmap);
                self.sink.record(&Diagnostic::ResultDiscarded {
                    reason: "tile no longer awaiting decode",
                });
                false
            }
        }
    }

    /// Apply a classified decode failure. Returns true if the tile was marked failed.
    pub fn decode_failed(&mut self, id: TileId, failure: TileFailure) -> bool {
        let sink = self.sink.clone();
        match self.awaiting_tile(id) {
            Some(tile) => {
                sink.record(&Diagnostic::DecodeFailed {
                    rect: tile.src_rect(),
                    failure: failure.clone(),
                });
                tile.fail(failure);
                true
            }
            None => {
                sink.record(&Diagnostic::ResultDiscarded {
                    reason: "tile no longer awaiting decode",
                });
                false
            }
        }
    }

    /// Evict every tile, returning their memory to the pool.
    pub fn clean(&mut self, reason: &str) {
        self.clear_tiles();
        self.sink.record(&Diagnostic::Cleaned {
            reason: reason.to_string(),
        });
    }

    /// Evict every tile and refuse all further work.
    pub fn recycle(&mut self, reason: &str) {
        self.clean(reason);
        self.recycled = true;
    }

    /// Current tiles, ordered by source rect.
    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.values()
    }

    pub fn get(&self, id: TileId) -> Option<&Tile> {
        self.index.get(&id).and_then(|key| self.tiles.get(key))
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Number of tiles with a decode outstanding.
    pub fn in_flight(&self) -> usize {
        self.count(TileState::DecodeRequested)
    }

    pub fn count(&self, state: TileState) -> usize {
        self.tiles.values().filter(|t| t.state() == state).count()
    }

    /// Downsample factor of the current set, if any update was applied.
    pub fn sample(&self) -> Option<u32> {
        self.sample
    }

    pub fn is_recycled(&self) -> bool {
        self.recycled
    }

    fn awaiting_tile(&mut self, id: TileId) -> Option<&mut Tile> {
        let key = self.index.get(&id)?;
        self.tiles
            .get_mut(key)
            .filter(|tile| tile.state() == TileState::DecodeRequested)
    }

    fn evict(&mut self, key: &TileKey) {
        if let Some(mut tile) = self.tiles.remove(key) {
            self.index.remove(&tile.id());
            if let Some(bitmap) = tile.take_bitmap() {
                self.pool.release(bitmap);
            }
        }
    }

    fn clear_tiles(&mut self) {
        for (_, mut tile) in std::mem::take(&mut self.tiles) {
            if let Some(bitmap) = tile.take_bitmap() {
                self.pool.release(bitmap);
            }
        }
        self.index.clear();
        self.sample = None;
    }
}
