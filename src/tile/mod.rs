//! Tile set computation and lifecycle.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           LargeImageViewer              │
//! └────────────────────┬────────────────────┘
//!                      │ ViewportParams
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              TileManager                │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │  plan_tiles  │  │  BTreeMap       │  │
//! │  │  (sample +   │  │  TileKey → Tile │  │
//! │  │   grid)      │  │  (diff by key)  │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └──────────┬───────────────────┬──────────┘
//!            │ DecodeRequest     │ evicted bitmaps
//!            ▼                   ▼
//! ┌────────────────────┐  ┌─────────────────┐
//! │  DecodeScheduler   │  │   BitmapPool    │
//! └────────────────────┘  └─────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileManager`]: owns the tile set, applies diffs and decode results
//! - [`plan_tiles`] / [`compute_sample`]: pure viewport-to-grid planning
//! - [`Tile`], [`TileKey`], [`TileId`], [`TileState`]: the tile model

mod manager;
mod model;
mod sampling;

pub use manager::{TileDiff, TileManager};
pub use model::{Tile, TileId, TileKey, TileState};
pub use sampling::{compute_sample, plan_tiles, PlannedTile, TilePlan, ViewportParams};
