//! Large Image Viewer - headless front end for the tiled decode pipeline.
//!
//! `inspect` opens a source and prints its dimensions, `plan` prints the tile
//! grid for a viewport, `render` runs a viewer for one viewport and writes
//! the composited result as an image.

use clap::Parser;
use image::imageops::FilterType;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use large_image_viewer::{
    config::{Cli, Command, InspectConfig, PlanConfig, RenderConfig, ViewportArgs},
    source::{CacheInvalidator, NoopInvalidator},
    tile::ViewportParams,
    DefaultSourceProvider, FileCacheInvalidator, ImageRegionDecoder, ImageSurface,
    LargeImageViewer, Matrix, Rect, Size, SourceKind, SourceProvider, TracingSink, UpdateOutcome,
    ViewerCollaborators,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Inspect(config) => run_inspect(config),
        Command::Plan(config) => run_plan(config),
        Command::Render(config) => run_render(config).await,
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "large_image_viewer=debug"
    } else {
        "large_image_viewer=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn provider_for(cache_dir: Option<&std::path::Path>) -> DefaultSourceProvider {
    match cache_dir {
        Some(dir) => DefaultSourceProvider::with_cache_dir(dir),
        None => DefaultSourceProvider::new(),
    }
}

fn visible_rect(viewport: &ViewportArgs) -> Rect {
    let (left, top, right, bottom) = viewport.visible;
    Rect::new(left, top, right, bottom)
}

// =============================================================================
// Inspect Command
// =============================================================================

fn run_inspect(config: InspectConfig) -> ExitCode {
    let provider = provider_for(config.cache_dir.as_deref());

    let source = match provider.open(&config.uri) {
        Ok(source) => source,
        Err(e) => {
            error!("Failed to open {}: {}", config.uri, e);
            return ExitCode::FAILURE;
        }
    };

    let dimensions = match ImageRegionDecoder::probe(source.as_ref()) {
        Ok(dimensions) => dimensions,
        Err(e) => {
            error!("Failed to read {}: {}", source.identity(), e);
            return ExitCode::FAILURE;
        }
    };

    let kind = match source.kind() {
        SourceKind::CacheBacked { .. } => "cache",
        SourceKind::PlainFile { .. } => "file",
        SourceKind::Other => "other",
    };

    if config.json {
        let json = serde_json::json!({
            "uri": config.uri,
            "identity": source.identity(),
            "kind": kind,
            "width": dimensions.width,
            "height": dimensions.height,
        });
        match serde_json::to_string_pretty(&json) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                error!("Failed to serialize: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        println!("Source:     {}", source.identity());
        println!("Kind:       {}", kind);
        println!("Dimensions: {}", dimensions);
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Plan Command
// =============================================================================

fn run_plan(config: PlanConfig) -> ExitCode {
    let viewer_config = config.tiling.to_viewer_config();
    if let Err(e) = viewer_config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let (width, height) = config.image;
    let (vw, vh) = config.viewport.viewport;
    let params = ViewportParams {
        visible: visible_rect(&config.viewport),
        content: Size::new(width, height),
        viewport: Size::new(vw, vh),
        source: Size::new(width, height),
        zoom: config.viewport.zoom,
    };
    if let Err(e) = params.check() {
        error!("Invalid viewport: {}", e);
        return ExitCode::FAILURE;
    }

    let plan = large_image_viewer::plan_tiles(&params, &viewer_config);
    match serde_json::to_string_pretty(&plan) {
        Ok(text) => {
            println!("{}", text);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to serialize plan: {}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Render Command
// =============================================================================

async fn run_render(config: RenderConfig) -> ExitCode {
    let provider = provider_for(config.cache_dir.as_deref());
    let invalidator: Arc<dyn CacheInvalidator> = match config.cache_dir {
        Some(ref dir) => Arc::new(FileCacheInvalidator::new(dir)),
        None => Arc::new(NoopInvalidator),
    };

    let decoder = if config.smooth {
        ImageRegionDecoder::with_filter(FilterType::Triangle)
    } else {
        ImageRegionDecoder::new()
    };

    let collaborators =
        ViewerCollaborators::new(Arc::new(provider), Arc::new(decoder))
            .with_invalidator(invalidator)
            .with_sink(Arc::new(TracingSink::new()));

    let mut viewer = match LargeImageViewer::new(config.tiling.to_viewer_config(), collaborators) {
        Ok(viewer) => viewer,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let timeout = Duration::from_secs(config.timeout);

    viewer.set_image(&config.uri);
    if tokio::time::timeout(timeout, viewer.settle()).await.is_err() {
        error!("Timed out opening {}", config.uri);
        return ExitCode::FAILURE;
    }
    let Some(content) = viewer.dimensions() else {
        error!("Failed to open {}", config.uri);
        return ExitCode::FAILURE;
    };
    info!("Opened {} ({})", config.uri, content);

    let visible = visible_rect(&config.viewport);
    let zoom = config.viewport.zoom;
    let matrix = Matrix::scale_translate(
        zoom,
        -(visible.left as f32) * zoom,
        -(visible.top as f32) * zoom,
    );
    let (vw, vh) = config.viewport.viewport;

    match viewer.update(&matrix, visible, content, Size::new(vw, vh)) {
        UpdateOutcome::Updated(diff) => {
            info!(
                "Decoding {} tile(s) at sample {}",
                diff.submitted, diff.sample
            );
        }
        UpdateOutcome::FullDisplay => {
            info!("Visible rect covers the whole image, nothing to tile");
        }
        other => {
            error!("Viewport not applied: {:?}", other);
            return ExitCode::FAILURE;
        }
    }

    if tokio::time::timeout(timeout, viewer.settle()).await.is_err() {
        error!("Timed out decoding tiles");
        return ExitCode::FAILURE;
    }

    let mut surface = ImageSurface::new(vw, vh);
    viewer.draw(&mut surface);

    let stats = viewer.pool().stats();
    info!(
        "Pool: {} hits, {} misses, {} bitmaps idle",
        stats.hits, stats.misses, stats.pooled
    );
    viewer.recycle("render finished");

    if let Err(e) = surface.save(&config.output) {
        error!("Failed to write {}: {}", config.output.display(), e);
        return ExitCode::FAILURE;
    }
    info!("Wrote {}", config.output.display());

    ExitCode::SUCCESS
}
