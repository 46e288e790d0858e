//! wsi-pyramid - inspect and export whole slide images.
//!
//! Every slide call runs on a blocking worker so `--timeout-secs` can
//! abandon it without touching the slide lock.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wsi_pyramid::{
    backend::BackendRegistry,
    color::ColorStyle,
    config::{Cli, Command},
    error::{SlideError, TileError},
    format::{detect_format, AssociatedKind},
    pixel::PixelBuffer,
    slide::Slide,
    tile::{DeepZoomGenerator, TileEncoder, TileFormat, TileRequest, TileService},
    worker::run_with_timeout,
};

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Slide(#[from] SlideError),

    #[error(transparent)]
    Tile(#[from] TileError),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{0}")]
    Usage(String),
}

/// Settings shared by every subcommand.
struct Context {
    registry: BackendRegistry,
    timeout: Option<Duration>,
    tile_size: u32,
    overlap: u32,
    jpeg_quality: u8,
    limit_bounds: bool,
    color_style: Option<ColorStyle>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = cli.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }
    let options = match cli.open_options() {
        Ok(options) => options,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let ctx = Context {
        registry: BackendRegistry::new(options),
        timeout: cli.timeout_secs.map(Duration::from_secs),
        tile_size: cli.tile_size,
        overlap: cli.overlap,
        jpeg_quality: cli.jpeg_quality,
        limit_bounds: cli.limit_bounds,
        color_style: cli.color_style,
    };
    debug!(registry = ?ctx.registry, timeout = ?ctx.timeout, "starting");

    match run(&ctx, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize the tracing/logging subsystem. Logs go to stderr so stdout
/// stays clean for JSON and XML output.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "wsi_pyramid=debug"
    } else {
        "wsi_pyramid=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

// =============================================================================
// Commands
// =============================================================================

async fn run(ctx: &Context, command: Command) -> Result<(), CliError> {
    match command {
        Command::Info { slide } => {
            let slide = open_slide(ctx, slide).await?;
            let info = on_worker(ctx, &slide, |s| s.info()).await?;
            let json = serde_json::to_string_pretty(&info)
                .map_err(|e| CliError::Usage(format!("cannot serialize slide info: {e}")))?;
            println!("{json}");
            slide.close();
        }

        Command::Region {
            slide,
            x,
            y,
            level,
            width,
            height,
            biomarker,
            output,
        } => {
            let slide = open_slide(ctx, slide).await?;
            let size = (width as i64, height as i64);
            let pixels = on_worker(ctx, &slide, move |s| match &biomarker {
                Some(name) => s.read_region_biomarker((x, y), level, size, name),
                None => s.read_region((x, y), level, size),
            })
            .await?;
            save_pixels(&pixels, &output, ctx.jpeg_quality)?;
            slide.close();
        }

        Command::Thumbnail {
            slide,
            max_width,
            max_height,
            output,
        } => {
            let slide = open_slide(ctx, slide).await?;
            let pixels = on_worker(ctx, &slide, move |s| s.get_thumbnail((max_width, max_height)))
                .await?;
            save_pixels(&pixels, &output, ctx.jpeg_quality)?;
            slide.close();
        }

        Command::Dzi { slide, format } => {
            let slide = open_slide(ctx, slide).await?;
            let dz = deep_zoom(ctx, &slide)?;
            println!("{}", dz.get_dzi(format));
            slide.close();
        }

        Command::Tile {
            slide,
            path,
            output,
        } => {
            let request = TileRequest::from_path(&path, ctx.jpeg_quality)?;
            let slide = open_slide(ctx, slide).await?;
            let dz = deep_zoom(ctx, &slide)?;

            let kind = slide.format();
            let data = run_with_timeout(kind, ctx.timeout, move || {
                TileService::new()
                    .generate_tile(&dz, &request)
                    .map_err(|e| match e {
                        TileError::Slide(e) => e,
                        other => SlideError::invalid_argument(kind, other.to_string()),
                    })
            })
            .await?;
            write_file(&output, &data)?;
            info!(tile = %path, bytes = data.len(), output = %output.display(), "wrote tile");
            slide.close();
        }

        Command::Associated {
            slide,
            name,
            output,
        } => {
            let kind = AssociatedKind::from_name(&name).ok_or_else(|| {
                CliError::Usage(format!(
                    "unknown associated image '{name}' (expected thumbnail, label, macro or navigate)"
                ))
            })?;
            let slide = open_slide(ctx, slide).await?;
            let pixels = on_worker(ctx, &slide, move |s| s.associated_image(kind))
                .await?
                .ok_or_else(|| CliError::Usage(format!("slide has no {name} image")))?;
            save_pixels(&pixels, &output, ctx.jpeg_quality)?;
            slide.close();
        }
    }
    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

async fn open_slide(ctx: &Context, path: PathBuf) -> Result<Arc<Slide>, CliError> {
    let kind = detect_format(&path)?;
    let registry = ctx.registry.clone();
    let slide = run_with_timeout(kind, ctx.timeout, move || Slide::open_with(&path, &registry))
        .await?;

    let (width, height) = slide.dimensions()?;
    info!(
        path = %slide.path().display(),
        format = %slide.format(),
        width,
        height,
        levels = slide.level_count()?,
        "opened slide"
    );

    if let Some(style) = ctx.color_style {
        if slide.supports_color_correction() {
            slide.apply_color_correction(true, style)?;
            debug!(%style, "color correction on");
        } else {
            warn!(format = %slide.format(), %style, "format has no color correction, reading uncorrected");
        }
    }
    Ok(Arc::new(slide))
}

fn deep_zoom(ctx: &Context, slide: &Arc<Slide>) -> Result<DeepZoomGenerator, SlideError> {
    DeepZoomGenerator::with_limit_bounds(
        Arc::clone(slide),
        ctx.tile_size,
        ctx.overlap,
        ctx.limit_bounds,
    )
}

async fn on_worker<T, F>(ctx: &Context, slide: &Arc<Slide>, f: F) -> Result<T, SlideError>
where
    F: FnOnce(&Slide) -> Result<T, SlideError> + Send + 'static,
    T: Send + 'static,
{
    let slide = Arc::clone(slide);
    run_with_timeout(slide.format(), ctx.timeout, move || f(&slide)).await
}

/// Encode by the output file's extension, PNG when it has none we know.
fn save_pixels(pixels: &PixelBuffer, output: &Path, quality: u8) -> Result<(), CliError> {
    let format = output
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(|ext| ext.parse::<TileFormat>().ok())
        .unwrap_or(TileFormat::Png);
    let data = TileEncoder::new().encode(pixels, format, quality)?;
    write_file(output, &data)?;
    info!(
        output = %output.display(),
        width = pixels.width(),
        height = pixels.height(),
        %format,
        "wrote image"
    );
    Ok(())
}

fn write_file(path: &Path, data: &[u8]) -> Result<(), CliError> {
    std::fs::write(path, data).map_err(|source| CliError::Write {
        path: path.to_path_buf(),
        source,
    })
}
