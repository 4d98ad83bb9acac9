//! Configuration for the viewer and the command-line tool.
//!
//! [`ViewerConfig`] carries the tunables of the tiling pipeline and is what the
//! library consumes. [`Cli`] is the clap front end of the binary; its shared
//! [`TilingArgs`] convert into a `ViewerConfig`.
//!
//! # Environment Variables
//!
//! Tiling options can be set via environment variables with the `LIV_` prefix:
//!
//! - `LIV_TILE_SIZE` - Decoded tile edge in pixels (default: 256)
//! - `LIV_MARGIN` - Preload margin around the viewport, in tiles (default: 1)
//! - `LIV_POOL_MB` - Bitmap pool capacity in MB (default: 32)
//! - `LIV_FORMAT` - Decoded pixel format: rgba8, rgb8, luma8 (default: rgba8)
//! - `LIV_MAX_SAMPLE` - Largest downsample factor (default: 64)
//! - `LIV_CACHE_DIR` - Directory resolving `cache://` URIs

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::bitmap::{PixelFormat, DEFAULT_POOL_CAPACITY};

// =============================================================================
// Default Values
// =============================================================================

/// Default decoded tile edge in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Default preload margin around the visible rect, in tiles.
pub const DEFAULT_PRELOAD_MARGIN: u32 = 1;

/// Default largest downsample factor.
pub const DEFAULT_MAX_SAMPLE: u32 = 64;

const MIN_TILE_SIZE: u32 = 16;
const MAX_TILE_SIZE: u32 = 4096;

// =============================================================================
// Viewer Configuration
// =============================================================================

/// Tunables of the tiling pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewerConfig {
    /// Edge length of a decoded tile in pixels.
    ///
    /// In source coordinates a tile spans `tile_size * sample` pixels.
    pub tile_size: u32,

    /// Ring of extra tiles decoded around the visible rect to hide latency
    /// while panning.
    pub preload_margin: u32,

    /// Maximum idle bytes kept by the bitmap pool.
    pub pool_capacity: usize,

    /// Pixel format decoded tiles are produced in.
    pub pixel_format: PixelFormat,

    /// Largest downsample factor the sampling policy may pick.
    pub max_sample: u32,

    /// Outline tiles while drawing (decoded red, loading blue).
    pub show_tile_rect: bool,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            preload_margin: DEFAULT_PRELOAD_MARGIN,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            pixel_format: PixelFormat::default(),
            max_sample: DEFAULT_MAX_SAMPLE,
            show_tile_rect: false,
        }
    }
}

impl ViewerConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.tile_size < MIN_TILE_SIZE || self.tile_size > MAX_TILE_SIZE {
            return Err(format!(
                "tile_size must be between {} and {}",
                MIN_TILE_SIZE, MAX_TILE_SIZE
            ));
        }

        if self.max_sample == 0 || !self.max_sample.is_power_of_two() {
            return Err("max_sample must be a power of two".to_string());
        }

        if self.preload_margin > 8 {
            return Err("preload_margin must be at most 8 tiles".to_string());
        }

        Ok(())
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// Large Image Viewer - tiled region decoding for very large images.
#[derive(Parser, Debug, Clone)]
#[command(name = "large-image-viewer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Open a region decoder and print the image dimensions.
    Inspect(InspectConfig),

    /// Print the tile plan for a viewport as JSON.
    Plan(PlanConfig),

    /// Decode the tiles for one viewport and composite them into a PNG.
    Render(RenderConfig),
}

/// Options shared by every command that builds a viewer.
#[derive(Args, Debug, Clone)]
pub struct TilingArgs {
    /// Decoded tile edge in pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, env = "LIV_TILE_SIZE")]
    pub tile_size: u32,

    /// Preload margin around the visible rect, in tiles.
    #[arg(long, default_value_t = DEFAULT_PRELOAD_MARGIN, env = "LIV_MARGIN")]
    pub margin: u32,

    /// Bitmap pool capacity in MB.
    #[arg(long, default_value_t = DEFAULT_POOL_CAPACITY / (1024 * 1024), env = "LIV_POOL_MB")]
    pub pool_mb: usize,

    /// Decoded pixel format (rgba8, rgb8, luma8).
    #[arg(long, default_value = "rgba8", env = "LIV_FORMAT")]
    pub format: PixelFormat,

    /// Largest downsample factor (power of two).
    #[arg(long, default_value_t = DEFAULT_MAX_SAMPLE, env = "LIV_MAX_SAMPLE")]
    pub max_sample: u32,

    /// Outline decoded and loading tiles.
    #[arg(long, default_value_t = false)]
    pub show_tile_rect: bool,
}

impl TilingArgs {
    pub fn to_viewer_config(&self) -> ViewerConfig {
        ViewerConfig {
            tile_size: self.tile_size,
            preload_margin: self.margin,
            pool_capacity: self.pool_mb * 1024 * 1024,
            pixel_format: self.format,
            max_sample: self.max_sample,
            show_tile_rect: self.show_tile_rect,
        }
    }
}

impl Default for TilingArgs {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            margin: DEFAULT_PRELOAD_MARGIN,
            pool_mb: DEFAULT_POOL_CAPACITY / (1024 * 1024),
            format: PixelFormat::default(),
            max_sample: DEFAULT_MAX_SAMPLE,
            show_tile_rect: false,
        }
    }
}

/// Viewport description shared by `plan` and `render`.
#[derive(Args, Debug, Clone)]
pub struct ViewportArgs {
    /// Viewport size in view pixels, as WIDTHxHEIGHT.
    #[arg(long, default_value = "1000x1000", value_parser = parse_size)]
    pub viewport: (u32, u32),

    /// Visible rect in image pixels, as LEFT,TOP,RIGHT,BOTTOM.
    #[arg(long, value_parser = parse_rect)]
    pub visible: (i32, i32, i32, i32),

    /// Zoom scale (view pixels per image pixel).
    #[arg(long, default_value_t = 1.0)]
    pub zoom: f32,
}

#[derive(Args, Debug, Clone)]
pub struct InspectConfig {
    /// Image URI (path, file:// or cache://).
    pub uri: String,

    /// Directory resolving cache:// URIs.
    #[arg(long, env = "LIV_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Print JSON instead of text.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct PlanConfig {
    /// Full image size in pixels, as WIDTHxHEIGHT.
    #[arg(long, value_parser = parse_size)]
    pub image: (u32, u32),

    #[command(flatten)]
    pub viewport: ViewportArgs,

    #[command(flatten)]
    pub tiling: TilingArgs,
}

#[derive(Args, Debug, Clone)]
pub struct RenderConfig {
    /// Image URI (path, file:// or cache://).
    pub uri: String,

    /// Output PNG path.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Directory resolving cache:// URIs.
    #[arg(long, env = "LIV_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Seconds to wait for decoding before giving up.
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,

    /// Downsample tiles with a triangle filter instead of nearest-neighbour.
    #[arg(long, default_value_t = false)]
    pub smooth: bool,

    #[command(flatten)]
    pub viewport: ViewportArgs,

    #[command(flatten)]
    pub tiling: TilingArgs,
}

/// Parse `WIDTHxHEIGHT`.
pub fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
    let w = w.trim().parse::<u32>().map_err(|e| format!("width: {}", e))?;
    let h = h.trim().parse::<u32>().map_err(|e| format!("height: {}", e))?;
    Ok((w, h))
}

/// Parse `LEFT,TOP,RIGHT,BOTTOM`.
pub fn parse_rect(s: &str) -> Result<(i32, i32, i32, i32), String> {
    let parts: Vec<i32> = s
        .split(',')
        .map(|p| p.trim().parse::<i32>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("expected LEFT,TOP,RIGHT,BOTTOM: {}", e))?;
    match parts.as_slice() {
        [l, t, r, b] => Ok((*l, *t, *r, *b)),
        _ => Err(format!("expected 4 values, got {}", parts.len())),
    }
}

// =============================================================================
// Tests
// =============================================================================
