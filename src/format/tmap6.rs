//! UNIC TMAP container parsing (version 6).
//!
//! Version 6 cuts the slide into image blocks. Each block record lists up
//! to 24 tiles spread over sub-layers: a layer `k` tile is `tile_width`
//! pixels wide and covers `tile_width * ratio^k` level-0 pixels. Levels
//! coarser than any block sub-layer come from shrink tiles. Payloads with a
//! nonzero file id live in side files named `<stem>.DT<n>`.
//!
//! All integers are little-endian.
//!
//! ```text
//! 0x00  "TMAP06"
//! 0x06  focus u8, format u8, file_num u8, layer_num u8, color u8, checksum u8,
//!       ratio_step u8, max_layer u8, slide_type u8, bkg_color u8
//! 0x10  pixel_size f32, block_count i32, scan_scale i16,
//!       block_cols i16, block_rows i16, block_width i16, block_height i16,
//!       tile_width i16, tile_height i16, air_width i16, air_height i16,
//!       version_minor u8, save_scale u8, shrink_count i32,
//!       width i32, height i32, air_offset i32
//! 0x3C  ExtInfo: 3 x i32, type i32[8], offset i32[8], length i32[8], reserved
//! 0xC0  BlockInfo[block_count]  (304 bytes each)
//!         file_id u8, layer u8, pad[2], dx/dy u8[4], col i16, row i16,
//!         x i32, y i32, Tile[24] (layer u8, col u8, row u8, pad, offset i32, length i32)
//!       ShrinkTile[shrink_count]  (20 bytes each)
//!         file_id u8, layer u8, pad[2], x i32, y i32, offset i32, length i32
//! ```

use std::collections::BTreeSet;

use tracing::debug;

use crate::error::TmapError;
use crate::format::AssociatedKind;
use crate::io::{read_f32_le, read_u16_le, read_u32_le, RangeReader};

use super::tmap::read_version;

const EXT_INFO_OFFSET: usize = 0x3C;
const EXT_SLOTS: usize = 8;
const BLOCK_INFO_OFFSET: usize = 0xC0;
const BLOCK_INFO_LEN: usize = 304;
const BLOCK_TILES: usize = 24;
const BLOCK_TILE_LEN: usize = 12;
const SHRINK_TILE_LEN: usize = 20;

/// Tile edge assumed when the header leaves it zero.
const DEFAULT_TILE_SIZE: u32 = 512;

fn read_i16_le(bytes: &[u8]) -> i16 {
    read_u16_le(bytes) as i16
}

fn read_i32_le(bytes: &[u8]) -> i32 {
    read_u32_le(bytes) as i32
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tmap6Header {
    pub focus_count: u8,
    pub image_format: u8,
    /// Side files declared by the header
    pub file_count: u8,
    /// Size ratio between consecutive levels, 2 to 4
    pub ratio_step: u8,
    pub background: u8,
    /// Millimetres per pixel
    pub pixel_size: f32,
    pub scan_scale: u16,
    pub block_cols: u16,
    pub block_rows: u16,
    pub tile_width: u32,
    pub tile_height: u32,
    pub width: u32,
    pub height: u32,
}

/// Extension images stored in the main file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tmap6ImageKind {
    /// Slide overview with the label on its left third
    MacroLabel,
    Thumbnail,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tmap6Image {
    pub kind: Tmap6ImageKind,
    pub offset: u64,
    pub length: u32,
}

/// One stored JPEG tile, placed by its level-0 origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tmap6Tile {
    /// 0 for the main file, n for `<stem>.DT<n>`
    pub file_id: u8,
    pub layer: u8,
    pub x: u64,
    pub y: u64,
    pub offset: u64,
    pub length: u32,
}

// =============================================================================
// Tmap6File
// =============================================================================

/// Parsed TMAP version 6 structure. Pixel payloads stay in the files.
#[derive(Debug, Clone)]
pub struct Tmap6File {
    pub header: Tmap6Header,
    pub images: Vec<Tmap6Image>,
    block_tiles: Vec<Tmap6Tile>,
    shrink_tiles: Vec<Tmap6Tile>,
    /// Level sizes, full resolution first
    levels: Vec<(u32, u32)>,
}

impl Tmap6File {
    /// Parse the header, extension table, block records and shrink tiles.
    ///
    /// # Errors
    /// `InvalidMagic` for non-TMAP data, `UnsupportedVersion` for anything
    /// but version 6, `NoLayers` when the header yields no level, `Io` when
    /// the records run past the end of the file.
    pub fn parse<R: RangeReader + ?Sized>(reader: &R) -> Result<Self, TmapError> {
        let version = read_version(reader)?;
        if version != 6 {
            return Err(TmapError::UnsupportedVersion(version));
        }

        let fixed = reader.read_exact_at(0, BLOCK_INFO_OFFSET)?;
        let pixel_size = read_f32_le(&fixed[0x10..]);
        let tile_edge = |v: i16| if v > 0 { v as u32 } else { DEFAULT_TILE_SIZE };
        let header = Tmap6Header {
            focus_count: fixed[6].max(1),
            image_format: fixed[7],
            file_count: fixed[8],
            ratio_step: match fixed[12] {
                r @ 2..=4 => r,
                _ => 2,
            },
            background: fixed[15],
            pixel_size: if pixel_size.is_finite() && pixel_size >= 1e-8 {
                pixel_size
            } else {
                1e-4
            },
            scan_scale: read_i16_le(&fixed[24..]).max(0) as u16,
            block_cols: read_i16_le(&fixed[26..]).max(0) as u16,
            block_rows: read_i16_le(&fixed[28..]).max(0) as u16,
            tile_width: tile_edge(read_i16_le(&fixed[34..])),
            tile_height: tile_edge(read_i16_le(&fixed[36..])),
            width: read_i32_le(&fixed[48..]).max(0) as u32,
            height: read_i32_le(&fixed[52..]).max(0) as u32,
        };
        let block_count = read_i32_le(&fixed[20..]).max(0) as usize;
        let shrink_count = read_i32_le(&fixed[44..]).max(0) as usize;

        let levels = level_sizes(&header);
        if levels.is_empty() {
            return Err(TmapError::NoLayers);
        }

        let images = parse_ext_images(&fixed[EXT_INFO_OFFSET..]);

        let records_len = block_count * BLOCK_INFO_LEN + shrink_count * SHRINK_TILE_LEN;
        let records = reader.read_exact_at(BLOCK_INFO_OFFSET as u64, records_len)?;
        let (blocks, shrinks) = records.split_at(block_count * BLOCK_INFO_LEN);

        let mut file = Tmap6File {
            header,
            images,
            block_tiles: Vec::new(),
            shrink_tiles: Vec::new(),
            levels,
        };
        for raw in blocks.chunks_exact(BLOCK_INFO_LEN) {
            file.push_block(raw);
        }
        for raw in shrinks.chunks_exact(SHRINK_TILE_LEN) {
            file.push_shrink_tile(raw);
        }

        debug!(
            levels = file.levels.len(),
            blocks = block_count,
            block_tiles = file.block_tiles.len(),
            shrink_tiles = file.shrink_tiles.len(),
            ratio = file.header.ratio_step,
            "parsed TMAP06 header"
        );
        Ok(file)
    }

    fn push_block(&mut self, raw: &[u8]) {
        let file_id = raw[0];
        let (col, row) = (read_i16_le(&raw[8..]), read_i16_le(&raw[10..]));
        let (bx, by) = (read_i32_le(&raw[12..]), read_i32_le(&raw[16..]));
        if col < 0 || row < 0 || bx < 0 || by < 0 {
            return;
        }

        for tile in raw[20..].chunks_exact(BLOCK_TILE_LEN).take(BLOCK_TILES) {
            let layer = tile[0];
            let offset = read_i32_le(&tile[4..]);
            let length = read_i32_le(&tile[8..]);
            let Some((span_w, span_h)) = self.tile_span(layer) else {
                continue;
            };
            if offset <= 0 || length <= 0 {
                continue;
            }
            self.block_tiles.push(Tmap6Tile {
                file_id,
                layer,
                x: bx as u64 + tile[1] as u64 * span_w,
                y: by as u64 + tile[2] as u64 * span_h,
                offset: offset as u64,
                length: length as u32,
            });
        }
    }

    fn push_shrink_tile(&mut self, raw: &[u8]) {
        let layer = raw[1];
        let (x, y) = (read_i32_le(&raw[4..]), read_i32_le(&raw[8..]));
        let (offset, length) = (read_i32_le(&raw[12..]), read_i32_le(&raw[16..]));
        if self.tile_span(layer).is_none() || x < 0 || y < 0 || offset <= 0 || length <= 0 {
            return;
        }
        self.shrink_tiles.push(Tmap6Tile {
            file_id: raw[0],
            layer,
            x: x as u64,
            y: y as u64,
            offset: offset as u64,
            length: length as u32,
        });
    }

    /// Level-0 pixels covered by one tile of `layer`; `None` past the
    /// last level.
    pub fn tile_span(&self, layer: u8) -> Option<(u64, u64)> {
        if layer as usize >= self.levels.len() {
            return None;
        }
        let scale = self.layer_scale(layer);
        Some((
            self.header.tile_width as u64 * scale,
            self.header.tile_height as u64 * scale,
        ))
    }

    /// `ratio_step ^ layer`
    pub fn layer_scale(&self, layer: u8) -> u64 {
        (self.header.ratio_step as u64).pow(layer as u32)
    }

    /// Level sizes, full resolution first.
    pub fn levels(&self) -> &[(u32, u32)] {
        &self.levels
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.header.width, self.header.height)
    }

    /// Tiles serving `layer`: the block tiles of that sub-layer, else its
    /// shrink tiles.
    pub fn layer_tiles(&self, layer: u8) -> Vec<Tmap6Tile> {
        let blocks: Vec<Tmap6Tile> = self
            .block_tiles
            .iter()
            .filter(|t| t.layer == layer)
            .copied()
            .collect();
        if !blocks.is_empty() {
            return blocks;
        }
        self.shrink_tiles
            .iter()
            .filter(|t| t.layer == layer)
            .copied()
            .collect()
    }

    /// Side file ids referenced by any tile.
    pub fn data_file_ids(&self) -> BTreeSet<u8> {
        self.block_tiles
            .iter()
            .chain(&self.shrink_tiles)
            .map(|t| t.file_id)
            .filter(|&id| id > 0)
            .collect()
    }

    pub fn mpp(&self) -> Option<f64> {
        let mpp = self.header.pixel_size as f64 * 1000.0;
        (mpp.is_finite() && mpp > 0.0).then_some(mpp)
    }

    /// Associated images this file provides.
    pub fn associated_kinds(&self) -> Vec<AssociatedKind> {
        let mut kinds = Vec::new();
        for image in &self.images {
            match image.kind {
                Tmap6ImageKind::Thumbnail => kinds.push(AssociatedKind::Thumbnail),
                Tmap6ImageKind::MacroLabel => {
                    kinds.push(AssociatedKind::Macro);
                    kinds.push(AssociatedKind::Label);
                }
            }
        }
        kinds.sort();
        kinds.dedup();
        kinds
    }

    /// The stored image holding `kind`.
    pub fn image_for(&self, kind: AssociatedKind) -> Option<&Tmap6Image> {
        let wanted = match kind {
            AssociatedKind::Thumbnail => Tmap6ImageKind::Thumbnail,
            AssociatedKind::Macro | AssociatedKind::Label => Tmap6ImageKind::MacroLabel,
            _ => return None,
        };
        self.images.iter().find(|img| img.kind == wanted)
    }

    pub fn properties(&self) -> Vec<(String, String)> {
        let h = &self.header;
        let mut props = vec![
            ("openslide.vendor".to_string(), "UNIC".to_string()),
            ("tmap.version".to_string(), "6".to_string()),
            ("tmap.scan_scale".to_string(), h.scan_scale.to_string()),
            ("tmap.pixel_size".to_string(), h.pixel_size.to_string()),
            ("tmap.focus_count".to_string(), h.focus_count.to_string()),
            ("tmap.ratio_step".to_string(), h.ratio_step.to_string()),
            ("tmap.file_count".to_string(), h.file_count.to_string()),
            ("tmap.width".to_string(), h.width.to_string()),
            ("tmap.height".to_string(), h.height.to_string()),
        ];
        if let Some(mpp) = self.mpp() {
            props.push(("openslide.mpp-x".to_string(), mpp.to_string()));
            props.push(("openslide.mpp-y".to_string(), mpp.to_string()));
        }
        if h.scan_scale > 0 {
            props.push((
                "openslide.objective-power".to_string(),
                h.scan_scale.to_string(),
            ));
        }
        props
    }
}

/// One level per ratio step while the magnification stays at least 1x.
fn level_sizes(header: &Tmap6Header) -> Vec<(u32, u32)> {
    let ratio = header.ratio_step as u32;
    let (mut w, mut h) = (header.width, header.height);
    let mut scale = header.scan_scale as u32;
    let mut levels = Vec::new();
    while scale >= 1 && w > 0 && h > 0 {
        levels.push((w, h));
        w = w.div_ceil(ratio);
        h = h.div_ceil(ratio);
        scale /= ratio;
    }
    levels
}

fn parse_ext_images(ext: &[u8]) -> Vec<Tmap6Image> {
    let field = |table: usize, slot: usize| read_i32_le(&ext[12 + table * 32 + slot * 4..]);
    (0..EXT_SLOTS)
        .filter_map(|slot| {
            let kind = match field(0, slot) {
                1 => Tmap6ImageKind::MacroLabel,
                2 => Tmap6ImageKind::Thumbnail,
                _ => return None,
            };
            let (offset, length) = (field(1, slot), field(2, slot));
            (offset > 0 && length > 0).then(|| Tmap6Image {
                kind,
                offset: offset as u64,
                length: length as u32,
            })
        })
        .collect()
}
