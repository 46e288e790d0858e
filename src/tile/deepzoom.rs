//! DeepZoom tile pyramid synthesized over a slide's native levels.
//!
//! ```text
//!   DZ level L  (scale = 2^(max - L))
//!   +--------+--------+----+
//!   | 0_0    | 1_0    |2_0 |   tiles are T x T plus an O-pixel border
//!   +--------+--------+----+   on every side that has a neighbor
//!   | 0_1    | 1_1    |2_1 |
//!   +--------+--------+----+
//!        |
//!        v  level-0 rect = tile rect * scale, clamped to the slide
//!   native level = best_level_for_downsample(scale)
//!        |
//!        v  read, then area-average to the exact tile size
//! ```
//!
//! Tile edges come from integer arithmetic on the DZ level grid, so
//! neighbouring tiles always agree on where one ends and the next begins.
//!
//! With `limit_bounds` the grid covers only the rectangle named by the
//! `openslide.bounds-*` properties, shifted so its corner is tile 0_0.

use std::sync::Arc;

use serde::Serialize;
use tracing::trace;

use crate::error::SlideError;
use crate::pixel::PixelBuffer;
use crate::slide::{Region, Slide};

use super::dzi::{dzi_level_dimensions, dzi_level_scale, dzi_tile_count, generate_dzi_xml, max_dzi_level};
use super::encoder::TileFormat;

/// Default tile edge, so that a tile plus a 1-pixel border on both sides is 256.
pub const DEFAULT_TILE_SIZE: u32 = 254;

/// Default overlap border in pixels.
pub const DEFAULT_OVERLAP: u32 = 1;

/// Pixel rectangle of a tile within its DZ level, overlap included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TileBounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// What a viewer needs to lay out one DZ level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeepZoomDescriptor {
    pub level_width: u32,
    pub level_height: u32,
    pub tile_edge: u32,
    pub overlap: u32,
}

/// Origin and length of tile `index` along one axis.
///
/// The non-overlap part of tile `i` is `[i*T, min((i+1)*T, extent))`; the
/// border adds `overlap` on each side that has a neighbour.
fn tile_span(index: u32, count: u32, tile: u32, overlap: u32, extent: u32) -> (u32, u32) {
    let start = index as u64 * tile as u64;
    let before = if index > 0 { overlap as u64 } else { 0 };
    let after = if index + 1 < count { overlap as u64 } else { 0 };
    let origin = start.saturating_sub(before);
    let end = (start + tile as u64 + after).min(extent as u64);
    (origin as u32, (end - origin) as u32)
}

// =============================================================================
// DeepZoomGenerator
// =============================================================================

/// Level-0 rectangle holding scanned content: the `openslide.bounds-*`
/// properties clamped to the slide, or the whole slide.
fn content_bounds(slide: &Slide) -> Result<(u64, u64, u32, u32), SlideError> {
    let (width, height) = slide.dimensions()?;
    let number = |key: &str| -> Result<Option<u64>, SlideError> {
        Ok(slide.property(key)?.and_then(|v| v.trim().parse::<u64>().ok()))
    };

    let x = number("openslide.bounds-x")?.unwrap_or(0).min(width as u64);
    let y = number("openslide.bounds-y")?.unwrap_or(0).min(height as u64);
    let w = number("openslide.bounds-width")?
        .unwrap_or(width as u64)
        .min(width as u64 - x);
    let h = number("openslide.bounds-height")?
        .unwrap_or(height as u64)
        .min(height as u64 - y);
    if w == 0 || h == 0 {
        return Ok((0, 0, width, height));
    }
    Ok((x, y, w as u32, h as u32))
}

/// Power-of-two tile pyramid over one slide.
#[derive(Debug, Clone)]
pub struct DeepZoomGenerator {
    slide: Arc<Slide>,
    tile_size: u32,
    overlap: u32,
    /// Level-0 corner of the tiled area
    offset: (u64, u64),
    width: u32,
    height: u32,
    max_level: u32,
}

impl DeepZoomGenerator {
    /// Tile the whole slide.
    ///
    /// # Errors
    /// `InvalidArgument` for a zero tile size, `HandleClosed` when the slide
    /// is already closed.
    pub fn new(slide: Arc<Slide>, tile_size: u32, overlap: u32) -> Result<Self, SlideError> {
        Self::with_limit_bounds(slide, tile_size, overlap, false)
    }

    /// Tile only the content bounds when `limit_bounds` is set.
    pub fn with_limit_bounds(
        slide: Arc<Slide>,
        tile_size: u32,
        overlap: u32,
        limit_bounds: bool,
    ) -> Result<Self, SlideError> {
        if tile_size == 0 {
            return Err(SlideError::invalid_argument(
                slide.format(),
                "DeepZoom tile size must be at least 1",
            ));
        }
        let (x, y, width, height) = if limit_bounds {
            content_bounds(&slide)?
        } else {
            let (w, h) = slide.dimensions()?;
            (0, 0, w, h)
        };
        Ok(DeepZoomGenerator {
            max_level: max_dzi_level(width, height),
            slide,
            tile_size,
            overlap,
            offset: (x, y),
            width,
            height,
        })
    }

    pub fn slide(&self) -> &Arc<Slide> {
        &self.slide
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn overlap(&self) -> u32 {
        self.overlap
    }

    /// Level-0 origin and size of the tiled area.
    pub fn bounds(&self) -> (u64, u64, u32, u32) {
        (self.offset.0, self.offset.1, self.width, self.height)
    }

    /// Index of the full-resolution level.
    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    pub fn level_count(&self) -> u32 {
        self.max_level + 1
    }

    fn scale(&self, level: u32) -> Result<u64, SlideError> {
        dzi_level_scale(level, self.max_level).ok_or(SlideError::InvalidLevel {
            kind: self.slide.format(),
            level,
            count: self.level_count(),
        })
    }

    /// Pixel size of a DZ level.
    pub fn level_dimensions(&self, level: u32) -> Result<(u32, u32), SlideError> {
        self.scale(level)?;
        Ok(dzi_level_dimensions(self.width, self.height, level, self.max_level))
    }

    /// Columns and rows of tiles at a level.
    pub fn level_tiles(&self, level: u32) -> Result<(u32, u32), SlideError> {
        let (w, h) = self.level_dimensions(level)?;
        Ok(dzi_tile_count(w, h, self.tile_size))
    }

    /// Total number of tiles over all levels.
    pub fn tile_count(&self) -> u64 {
        (0..self.level_count())
            .filter_map(|level| self.level_tiles(level).ok())
            .map(|(cols, rows)| cols as u64 * rows as u64)
            .sum()
    }

    pub fn get_descriptor(&self, level: u32) -> Result<DeepZoomDescriptor, SlideError> {
        let (level_width, level_height) = self.level_dimensions(level)?;
        Ok(DeepZoomDescriptor {
            level_width,
            level_height,
            tile_edge: self.tile_size,
            overlap: self.overlap,
        })
    }

    /// DZI manifest for the whole pyramid.
    pub fn get_dzi(&self, format: TileFormat) -> String {
        generate_dzi_xml(self.width, self.height, self.tile_size, self.overlap, format)
    }

    /// Rectangle a tile covers in its level's pixels.
    ///
    /// # Errors
    /// `InvalidLevel` outside `[0, max_level]`, `InvalidArgument` for a
    /// column or row past the grid.
    pub fn tile_bounds(&self, level: u32, col: u32, row: u32) -> Result<TileBounds, SlideError> {
        let (lw, lh) = self.level_dimensions(level)?;
        let (cols, rows) = dzi_tile_count(lw, lh, self.tile_size);
        if col >= cols || row >= rows {
            return Err(SlideError::invalid_argument(
                self.slide.format(),
                format!("tile {col}_{row} outside the {cols}x{rows} grid of level {level}"),
            ));
        }

        let (x, width) = tile_span(col, cols, self.tile_size, self.overlap, lw);
        let (y, height) = tile_span(row, rows, self.tile_size, self.overlap, lh);
        Ok(TileBounds {
            x,
            y,
            width,
            height,
        })
    }

    /// Render one tile at its exact size.
    pub fn get_tile(&self, level: u32, col: u32, row: u32) -> Result<PixelBuffer, SlideError> {
        let bounds = self.tile_bounds(level, col, row)?;
        let scale = self.scale(level)?;

        let (rx, ry) = (bounds.x as u64 * scale, bounds.y as u64 * scale);
        let w0 = (bounds.width as u64 * scale).min(self.width as u64 - rx);
        let h0 = (bounds.height as u64 * scale).min(self.height as u64 - ry);
        let (x0, y0) = (self.offset.0 + rx, self.offset.1 + ry);

        let native = self.slide.best_level_for_downsample(scale as f64)?;
        let downsample = self.slide.level_downsamples()?[native as usize];
        trace!(level, col, row, native, downsample, "rendering DeepZoom tile");

        if downsample == scale as f64 {
            return self.slide.read_region(
                (x0 as i64, y0 as i64),
                native,
                (bounds.width as i64, bounds.height as i64),
            );
        }

        let region = Region {
            x0: x0 as i64,
            y0: y0 as i64,
            width: w0 as u32,
            height: h0 as u32,
            level: native,
        };
        let pixels = self.slide.read_level0_region(&region)?;
        if pixels.dimensions() == (bounds.width, bounds.height) {
            Ok(pixels)
        } else {
            Ok(pixels.resize_area(bounds.width, bounds.height))
        }
    }
}
