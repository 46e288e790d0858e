//! Region and thumbnail reads on top of the pyramid model.
//!
//! A request is translated to the target level, intersected with the
//! level's content area, and only the intersection is asked of the backend:
//!
//! ```text
//!        requested (nx, ny, w, h)
//!      +----------------------+
//!      | background           |
//!      |     +----------------+------ level content
//!      |     | backend read   |
//!      +-----+----------------+
//!            |
//! ```
//!
//! The caller always receives exactly the size it asked for.

use serde::Serialize;

use crate::backend::ensure_size;
use crate::error::SlideError;
use crate::pixel::PixelBuffer;

use super::manager::ResourceManager;
use super::pyramid::PyramidModel;

/// A rectangle with its origin and size in level-0 pixels, read at `level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Region {
    pub x0: i64,
    pub y0: i64,
    pub width: u32,
    pub height: u32,
    pub level: u32,
}

/// Map the level-0 span `[start, start + len)` onto a level with the given
/// downsample.
///
/// Both edges go through the same `floor`, so two regions sharing an edge
/// in level 0 share it at every level. A non-empty span keeps at least
/// one pixel.
fn level_span(start: i64, len: u32, downsample: f64) -> (i64, u32) {
    let first = (start as f64 / downsample).floor() as i64;
    if len == 0 {
        return (first, 0);
    }
    let end = ((start + len as i64) as f64 / downsample).floor() as i64;
    (first, (end - first).max(1) as u32)
}

/// Answers pixel requests for one slide.
pub struct RegionReader<'a> {
    model: &'a PyramidModel,
    manager: &'a ResourceManager,
    background: [u8; 4],
}

impl<'a> RegionReader<'a> {
    pub fn new(model: &'a PyramidModel, manager: &'a ResourceManager, background: [u8; 4]) -> Self {
        RegionReader {
            model,
            manager,
            background,
        }
    }

    /// Level-pixel size a level-0 region maps to.
    pub fn native_size(&self, region: &Region) -> Result<(u32, u32), SlideError> {
        let ds = self.model.level(region.level)?.downsample;
        Ok((
            level_span(region.x0, region.width, ds).1,
            level_span(region.y0, region.height, ds).1,
        ))
    }

    /// Read a level-0 rectangle at `region.level`.
    ///
    /// The origin maps to `floor(x0 / downsample)` and the far edge to
    /// `floor((x0 + width) / downsample)`; the level size is the distance
    /// between the two, at least one pixel.
    pub fn read_region(&self, region: &Region) -> Result<PixelBuffer, SlideError> {
        let ds = self.model.level(region.level)?.downsample;
        let (nx, w) = level_span(region.x0, region.width, ds);
        let (ny, h) = level_span(region.y0, region.height, ds);
        self.read_native(region.level, nx, ny, w, h)
    }

    /// Read `w` x `h` pixels at (nx, ny) in the level's own coordinates.
    ///
    /// Parts outside the level are filled with the background color.
    pub fn read_native(
        &self,
        level: u32,
        nx: i64,
        ny: i64,
        w: u32,
        h: u32,
    ) -> Result<PixelBuffer, SlideError> {
        self.read_clipped(None, level, nx, ny, w, h)
    }

    /// [`read_native`](Self::read_native) for one named channel.
    pub fn read_native_channel(
        &self,
        channel: &str,
        level: u32,
        nx: i64,
        ny: i64,
        w: u32,
        h: u32,
    ) -> Result<PixelBuffer, SlideError> {
        self.read_clipped(Some(channel), level, nx, ny, w, h)
    }

    fn read_clipped(
        &self,
        channel: Option<&str>,
        level: u32,
        nx: i64,
        ny: i64,
        w: u32,
        h: u32,
    ) -> Result<PixelBuffer, SlideError> {
        let info = *self.model.level(level)?;
        self.manager.ensure_open()?;

        let mut out = PixelBuffer::new_filled(w, h, self.background);

        let x_start = nx.max(0);
        let y_start = ny.max(0);
        let x_end = nx.saturating_add(w as i64).min(info.width as i64);
        let y_end = ny.saturating_add(h as i64).min(info.height as i64);
        if x_start >= x_end || y_start >= y_end {
            return Ok(out);
        }

        let (cw, ch) = ((x_end - x_start) as u32, (y_end - y_start) as u32);
        let kind = self.model.kind();
        let (x, y) = (x_start as u32, y_start as u32);
        let pixels = self.manager.with_backend(|backend| {
            let buffer = match channel {
                Some(name) => backend.read_channel_region(name, level, x, y, cw, ch)?,
                None => backend.read_region(level, x, y, cw, ch)?,
            };
            ensure_size(kind, buffer, cw, ch)
        })?;

        out.blit(
            &pixels,
            0,
            0,
            (x_start - nx) as u32,
            (y_start - ny) as u32,
            cw,
            ch,
        );
        Ok(out)
    }

    /// Output size of a thumbnail fitting in `max_width` x `max_height`.
    pub fn thumbnail_size(&self, max_width: u32, max_height: u32) -> (u32, u32) {
        let (w0, h0) = self.model.dimensions();
        let fit = (w0 as f64 / max_width as f64).max(h0 as f64 / max_height as f64);
        if fit <= 1.0 {
            return (w0, h0);
        }
        (
            ((w0 as f64 / fit).round() as u32).clamp(1, max_width),
            ((h0 as f64 / fit).round() as u32).clamp(1, max_height),
        )
    }

    /// Whole-slide image fitting in the box, aspect ratio preserved.
    ///
    /// Reads the most detailed level not finer than needed and
    /// area-averages it down. Slides smaller than the box come back at
    /// native size.
    pub fn get_thumbnail(&self, max_width: u32, max_height: u32) -> Result<PixelBuffer, SlideError> {
        if max_width == 0 || max_height == 0 {
            return Err(SlideError::invalid_argument(
                self.model.kind(),
                format!("thumbnail box must be non-empty, got {max_width}x{max_height}"),
            ));
        }

        let (w0, h0) = self.model.dimensions();
        let fit = (w0 as f64 / max_width as f64).max(h0 as f64 / max_height as f64);
        if fit <= 1.0 {
            return self.read_native(0, 0, 0, w0, h0);
        }

        let (out_w, out_h) = self.thumbnail_size(max_width, max_height);
        let level = self.model.best_level_for_downsample(fit);
        let (lw, lh) = self.model.level_dimensions(level)?;
        let full = self.read_native(level, 0, 0, lw, lh)?;
        Ok(full.resize_area(out_w, out_h))
    }
}
