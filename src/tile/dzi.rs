//! Deep Zoom Image (DZI) level arithmetic, manifest and tile paths.
//!
//! Deep Zoom numbers its levels the other way round from a slide pyramid:
//! - DZI level 0 = 1x1 pixel (lowest resolution)
//! - DZI max level = full resolution
//!
//! Each level halves the one above it, rounding up, independently of the
//! slide's native levels.

use crate::error::TileError;

use super::encoder::TileFormat;

/// Generate the DZI XML manifest.
///
/// # Example Output
///
/// ```xml
/// <?xml version="1.0" encoding="UTF-8"?>
/// <Image xmlns="http://schemas.microsoft.com/deepzoom/2008"
///        TileSize="254"
///        Overlap="1"
///        Format="jpeg">
///   <Size Width="46920" Height="33600" />
/// </Image>
/// ```
pub fn generate_dzi_xml(
    width: u32,
    height: u32,
    tile_size: u32,
    overlap: u32,
    format: TileFormat,
) -> String {
    let format = format.extension();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Image xmlns="http://schemas.microsoft.com/deepzoom/2008"
       TileSize="{tile_size}"
       Overlap="{overlap}"
       Format="{format}">
  <Size Width="{width}" Height="{height}" />
</Image>"#
    )
}

/// Maximum DZI level: `ceil(log2(max(width, height)))`.
pub fn max_dzi_level(width: u32, height: u32) -> u32 {
    let max_dim = width.max(height);
    if max_dim <= 1 {
        return 0;
    }
    // Bit length of (max_dim - 1) is ceil(log2) without float error
    u32::BITS - (max_dim - 1).leading_zeros()
}

/// Factor from full resolution down to a DZI level, `None` above the max.
pub fn dzi_level_scale(dzi_level: u32, max_level: u32) -> Option<u64> {
    if dzi_level > max_level {
        return None;
    }
    Some(1u64 << (max_level - dzi_level))
}

/// Dimensions at a DZI level, `ceil(dim / scale)` and at least 1.
///
/// Returns `(0, 0)` above the max level.
pub fn dzi_level_dimensions(width: u32, height: u32, dzi_level: u32, max_level: u32) -> (u32, u32) {
    let Some(scale) = dzi_level_scale(dzi_level, max_level) else {
        return (0, 0);
    };
    let level_width = (width as u64).div_ceil(scale) as u32;
    let level_height = (height as u64).div_ceil(scale) as u32;
    (level_width.max(1), level_height.max(1))
}

/// Columns and rows of `tile_size` tiles covering a level.
pub fn dzi_tile_count(level_width: u32, level_height: u32, tile_size: u32) -> (u32, u32) {
    let tiles_x = level_width.div_ceil(tile_size);
    let tiles_y = level_height.div_ceil(tile_size);
    (tiles_x.max(1), tiles_y.max(1))
}

// =============================================================================
// Tile paths
// =============================================================================

/// A parsed `level/col_row.ext` tile address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilePath {
    pub level: u32,
    pub col: u32,
    pub row: u32,
    pub format: TileFormat,
}

impl std::fmt::Display for TilePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}_{}.{}",
            self.level,
            self.col,
            self.row,
            self.format.extension()
        )
    }
}

/// Parse a tile path such as `12/3_5.jpeg`.
///
/// A leading `slide_files/` component, as viewers request it, is accepted.
pub fn parse_tile_path(path: &str) -> Result<TilePath, TileError> {
    let invalid = || TileError::InvalidPath(path.to_string());

    let mut parts = path.trim_start_matches('/').rsplit('/');
    let file = parts.next().ok_or_else(invalid)?;
    let level = parts.next().ok_or_else(invalid)?;
    if parts.next().is_some_and(|dir| !dir.ends_with("_files")) || parts.next().is_some() {
        return Err(invalid());
    }

    let (coords, ext) = file.rsplit_once('.').ok_or_else(invalid)?;
    let format: TileFormat = ext.parse().map_err(|_| invalid())?;
    let (col, row) = coords.split_once('_').ok_or_else(invalid)?;

    Ok(TilePath {
        level: level.parse().map_err(|_| invalid())?,
        col: col.parse().map_err(|_| invalid())?,
        row: row.parse().map_err(|_| invalid())?,
        format,
    })
}
