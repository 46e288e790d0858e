//! UNIC TMAP container parsing (version 7; version 6 lives in [`super::tmap6`]).
//!
//! All integers are little-endian.
//!
//! ```text
//! 0x000  "TMAP07"
//! 0x008  image_format u8, jpeg_quality u8, focus_nums u8, scan_scale u8, bkg_color u8
//! 0x010  pixel_size f32, image_num i32, layer_num i32, tile_num i32, ext_offset i64
//! 0x130  ImageInfo[8]  (32 bytes each)
//!          width i32, height i32, depth i32, type i32, offset i64, length i32, pad
//! 0x230  LayerInfo[16] (32 bytes each)
//!          id i32, scale f32, width i32, height i32,
//!          tile_row i32, tile_col i32, table_offset i32, tile_start i32
//! ```
//!
//! Each layer's tile table holds one 40-byte entry per tile, row-major, with
//! one full table per focus plane. The JPEG payload location sits at byte 24
//! of the entry (offset i64, length i32). Tiles are 256 x 256.

use tracing::debug;

use crate::error::TmapError;
use crate::format::AssociatedKind;
use crate::io::{read_f32_le, read_u32_le, read_u64_le, RangeReader};

use super::detect::is_tmap_header;

/// Edge length of every stored tile.
pub const TMAP_TILE_SIZE: u32 = 256;

/// Header region covering the fixed fields and both info tables.
const HEADER_LEN: usize = 0x230 + LAYER_INFO_COUNT * INFO_LEN;
const IMAGE_INFO_OFFSET: usize = 0x130;
const LAYER_INFO_OFFSET: usize = 0x230;
const IMAGE_INFO_COUNT: usize = 8;
const LAYER_INFO_COUNT: usize = 16;
const INFO_LEN: usize = 32;
const TILE_ENTRY_LEN: u64 = 40;
const TILE_ENTRY_PAYLOAD_AT: u64 = 24;

fn read_i32_le(bytes: &[u8]) -> i32 {
    read_u32_le(bytes) as i32
}

fn read_i64_le(bytes: &[u8]) -> i64 {
    read_u64_le(bytes) as i64
}

// =============================================================================
// Header Structures
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct TmapHeader {
    /// Two-digit version from the magic
    pub version: u8,
    pub image_format: u8,
    pub jpeg_quality: u8,
    /// Number of focus planes, at least 1
    pub focus_count: u8,
    /// Objective magnification of level 0
    pub scan_scale: u8,
    /// Gray level used for missing tiles
    pub background: u8,
    /// Millimetres per pixel
    pub pixel_size: f32,
    pub image_count: i32,
    pub layer_count: i32,
    pub tile_count: i32,
}

/// Embedded associated image (JPEG).
#[derive(Debug, Clone, PartialEq)]
pub struct TmapImageInfo {
    pub kind: AssociatedKind,
    pub width: u32,
    pub height: u32,
    pub offset: u64,
    pub length: u32,
}

/// One pyramid layer and its tile table.
#[derive(Debug, Clone, PartialEq)]
pub struct TmapLayer {
    pub id: i32,
    pub scale: f32,
    pub width: u32,
    pub height: u32,
    pub tile_rows: u32,
    pub tile_cols: u32,
    pub table_offset: u64,
}

impl TmapLayer {
    fn entry_offset(&self, col: u32, row: u32, focus: u32) -> u64 {
        let per_plane = self.tile_rows as u64 * self.tile_cols as u64;
        self.table_offset
            + (row as u64 * self.tile_cols as u64 + col as u64) * TILE_ENTRY_LEN
            + focus as u64 * per_plane * TILE_ENTRY_LEN
    }
}

// =============================================================================
// TmapFile
// =============================================================================

/// Parsed TMAP structure. Pixel payloads stay in the file.
#[derive(Debug, Clone)]
pub struct TmapFile {
    pub header: TmapHeader,
    pub images: Vec<TmapImageInfo>,
    /// Layers with positive dimensions, full resolution first
    pub layers: Vec<TmapLayer>,
}

impl TmapFile {
    /// Parse the fixed header and info tables.
    ///
    /// # Errors
    /// `InvalidMagic` for non-TMAP data, `UnsupportedVersion` for anything
    /// but version 7, `NoLayers` when no layer has a size.
    pub fn parse<R: RangeReader + ?Sized>(reader: &R) -> Result<Self, TmapError> {
        let version = read_version(reader)?;
        if version != 7 {
            return Err(TmapError::UnsupportedVersion(version));
        }

        let data = reader.read_exact_at(0, HEADER_LEN)?;

        let header = TmapHeader {
            version,
            image_format: data[8],
            jpeg_quality: data[9],
            focus_count: data[10].max(1),
            scan_scale: data[11],
            background: data[12],
            pixel_size: read_f32_le(&data[0x10..]),
            image_count: read_i32_le(&data[0x14..]),
            layer_count: read_i32_le(&data[0x18..]),
            tile_count: read_i32_le(&data[0x1C..]),
        };

        let images = (0..IMAGE_INFO_COUNT)
            .filter_map(|i| {
                let raw = &data[IMAGE_INFO_OFFSET + i * INFO_LEN..][..INFO_LEN];
                let width = read_i32_le(&raw[0..]);
                let height = read_i32_le(&raw[4..]);
                let kind = match read_i32_le(&raw[12..]) {
                    0 => AssociatedKind::Thumbnail,
                    1 => AssociatedKind::Navigate,
                    2 => AssociatedKind::Macro,
                    3 => AssociatedKind::Label,
                    _ => return None,
                };
                let offset = read_i64_le(&raw[16..]);
                let length = read_i32_le(&raw[24..]);
                (width > 0 && height > 0 && offset > 0 && length > 0).then(|| TmapImageInfo {
                    kind,
                    width: width as u32,
                    height: height as u32,
                    offset: offset as u64,
                    length: length as u32,
                })
            })
            .collect();

        let layers: Vec<TmapLayer> = (0..LAYER_INFO_COUNT)
            .filter_map(|i| {
                let raw = &data[LAYER_INFO_OFFSET + i * INFO_LEN..][..INFO_LEN];
                let width = read_i32_le(&raw[8..]);
                let height = read_i32_le(&raw[12..]);
                let tile_rows = read_i32_le(&raw[16..]);
                let tile_cols = read_i32_le(&raw[20..]);
                let table_offset = read_i32_le(&raw[24..]);
                (width > 0 && height > 0 && tile_rows >= 0 && tile_cols >= 0 && table_offset >= 0)
                    .then(|| TmapLayer {
                        id: read_i32_le(&raw[0..]),
                        scale: read_f32_le(&raw[4..]),
                        width: width as u32,
                        height: height as u32,
                        tile_rows: tile_rows as u32,
                        tile_cols: tile_cols as u32,
                        table_offset: table_offset as u64,
                    })
            })
            .collect();

        if layers.is_empty() {
            return Err(TmapError::NoLayers);
        }
        debug!(
            layers = layers.len(),
            images = header.image_count,
            focus = header.focus_count,
            "parsed TMAP header"
        );

        Ok(TmapFile {
            header,
            images,
            layers,
        })
    }

    /// Level-0 dimensions.
    pub fn dimensions(&self) -> (u32, u32) {
        self.layers
            .first()
            .map(|l| (l.width, l.height))
            .unwrap_or((0, 0))
    }

    /// Microns per pixel derived from the millimetre pixel size.
    pub fn mpp(&self) -> Option<f64> {
        let mpp = self.header.pixel_size as f64 * 1000.0;
        (mpp.is_finite() && mpp > 0.0).then_some(mpp)
    }

    pub fn image(&self, kind: AssociatedKind) -> Option<&TmapImageInfo> {
        self.images.iter().find(|img| img.kind == kind)
    }

    /// Payload location of one tile, or `None` for tiles never written.
    pub fn tile_location<R: RangeReader + ?Sized>(
        &self,
        reader: &R,
        layer: usize,
        col: u32,
        row: u32,
        focus: u32,
    ) -> Result<Option<(u64, u32)>, TmapError> {
        let Some(layer) = self.layers.get(layer) else {
            return Ok(None);
        };
        if col >= layer.tile_cols || row >= layer.tile_rows {
            return Ok(None);
        }

        let at = layer.entry_offset(col, row, focus) + TILE_ENTRY_PAYLOAD_AT;
        if at + 12 > reader.size() {
            return Ok(None);
        }
        let raw = reader.read_exact_at(at, 12)?;
        let offset = read_i64_le(&raw[0..]);
        let length = read_i32_le(&raw[8..]);
        if offset <= 0 || length <= 0 {
            return Ok(None);
        }
        Ok(Some((offset as u64, length as u32)))
    }

    /// Properties in the `tmap.*` / `openslide.*` naming convention.
    pub fn properties(&self) -> Vec<(String, String)> {
        let (width, height) = self.dimensions();
        let mut props = vec![
            ("openslide.vendor".to_string(), "UNIC".to_string()),
            ("tmap.version".to_string(), self.header.version.to_string()),
            ("tmap.scan_scale".to_string(), self.header.scan_scale.to_string()),
            ("tmap.pixel_size".to_string(), self.header.pixel_size.to_string()),
            ("tmap.focus_count".to_string(), self.header.focus_count.to_string()),
            ("tmap.width".to_string(), width.to_string()),
            ("tmap.height".to_string(), height.to_string()),
        ];
        if let Some(mpp) = self.mpp() {
            props.push(("openslide.mpp-x".to_string(), mpp.to_string()));
            props.push(("openslide.mpp-y".to_string(), mpp.to_string()));
        }
        if self.header.scan_scale > 0 {
            props.push((
                "openslide.objective-power".to_string(),
                self.header.scan_scale.to_string(),
            ));
        }
        props
    }
}

/// Two-digit version from the `TMAPnn` magic.
///
/// # Errors
/// `InvalidMagic` for non-TMAP data.
pub fn read_version<R: RangeReader + ?Sized>(reader: &R) -> Result<u8, TmapError> {
    let head_len = (reader.size() as usize).min(6);
    let head = reader.read_exact_at(0, head_len)?;
    if !is_tmap_header(&head) {
        return Err(TmapError::InvalidMagic);
    }
    Ok((head[4] - b'0') * 10 + (head[5] - b'0'))
}
