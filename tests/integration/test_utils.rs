//! Test utilities for integration tests.
//!
//! Synthetic slide files (tiled TIFF and TMAP) are built in memory and
//! written to a temporary directory; instrumented in-memory backends stand
//! in for vendor decoders.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use tempfile::TempDir;

use wsi_pyramid::error::SlideError;
use wsi_pyramid::format::{AssociatedKind, BackendKind};
use wsi_pyramid::pixel::PixelBuffer;
use wsi_pyramid::SlideBackend;

// =============================================================================
// Files on disk
// =============================================================================

/// Write `data` as `name` inside `dir`.
pub fn write_slide(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, data).unwrap();
    path
}

/// Baseline JPEG of one solid color.
pub fn solid_jpeg(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb(color));
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, 95)
        .encode_image(&img)
        .unwrap();
    buf
}

/// Split a complete JPEG into a tables-only stream and an abbreviated
/// stream, the way Aperio writers store tiles.
pub fn split_jpeg_tables(full: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut tables = vec![0xFF, 0xD8];
    let mut tile = vec![0xFF, 0xD8];

    let mut pos = 2;
    while pos + 4 <= full.len() {
        let marker = full[pos + 1];
        if marker == 0xDA {
            tile.extend_from_slice(&full[pos..]);
            break;
        }
        let len = u16::from_be_bytes([full[pos + 2], full[pos + 3]]) as usize;
        let segment = &full[pos..pos + 2 + len];
        match marker {
            0xDB | 0xC4 => tables.extend_from_slice(segment),
            _ => tile.extend_from_slice(segment),
        }
        pos += 2 + len;
    }

    tables.extend_from_slice(&[0xFF, 0xD9]);
    (tables, tile)
}

/// Mean absolute channel difference within `tolerance` of `expected`.
pub fn close_to(actual: [u8; 4], expected: [u8; 3], tolerance: i16) -> bool {
    actual[..3]
        .iter()
        .zip(expected)
        .all(|(a, e)| (*a as i16 - e as i16).abs() <= tolerance)
}

// =============================================================================
// TIFF Builder
// =============================================================================

/// How a page's chunks are stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PageData {
    /// Uncompressed RGB; each pixel is `(x, y, page index)` truncated to u8
    Coordinates,
    /// Uncompressed 16-bit gray; each pixel is `(x + y * page index) * 100`
    Gray16,
    /// Self-contained JPEG chunks of one color
    Jpeg([u8; 3]),
    /// Abbreviated JPEG chunks with a shared JPEGTables tag
    JpegTables([u8; 3]),
}

/// One IFD of a synthetic TIFF.
#[derive(Debug, Clone)]
pub struct TiffPage {
    pub width: u32,
    pub height: u32,
    /// Tile edge; `None` stores the page as a single strip
    pub tile: Option<u32>,
    pub data: PageData,
    pub description: Option<String>,
    /// BitsPerSample written for every sample
    pub bits_per_sample: u16,
    /// PlanarConfiguration; 1 is chunky
    pub planar: u16,
}

impl TiffPage {
    pub fn tiled(width: u32, height: u32, tile: u32) -> Self {
        TiffPage {
            width,
            height,
            tile: Some(tile),
            data: PageData::Coordinates,
            description: None,
            bits_per_sample: 8,
            planar: 1,
        }
    }

    pub fn strip(width: u32, height: u32) -> Self {
        TiffPage {
            tile: None,
            ..Self::tiled(width, height, 0)
        }
    }

    pub fn with_data(mut self, data: PageData) -> Self {
        if data == PageData::Gray16 {
            self.bits_per_sample = 16;
        }
        self.data = data;
        self
    }

    pub fn described(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Declare a sample layout the pixel data does not follow.
    pub fn with_layout(mut self, bits_per_sample: u16, planar: u16) -> Self {
        self.bits_per_sample = bits_per_sample;
        self.planar = planar;
        self
    }

    fn samples_per_pixel(&self) -> u16 {
        match self.data {
            PageData::Gray16 => 1,
            _ => 3,
        }
    }
}

enum Value {
    Short(u16),
    Shorts(Vec<u16>),
    Long(Vec<u32>),
    Ascii(String),
    Undefined(Vec<u8>),
}

fn coordinate_chunk(page: &TiffPage, seed: u8, ox: u32, oy: u32, cw: u32, ch: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity((cw * ch * 3) as usize);
    for y in oy..oy + ch {
        for x in ox..ox + cw {
            if x < page.width && y < page.height {
                out.extend([x as u8, y as u8, seed]);
            } else {
                out.extend([0, 0, 0]);
            }
        }
    }
    out
}

fn gray16_chunk(page: &TiffPage, seed: u32, ox: u32, oy: u32, cw: u32, ch: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity((cw * ch * 2) as usize);
    for y in oy..oy + ch {
        for x in ox..ox + cw {
            let v = if x < page.width && y < page.height {
                ((x + y * seed) * 100) as u16
            } else {
                0
            };
            out.extend(v.to_le_bytes());
        }
    }
    out
}

/// Little-endian classic TIFF holding `pages` in order.
pub fn build_tiff(pages: &[TiffPage]) -> Vec<u8> {
    let mut data = b"II*\0\0\0\0\0".to_vec();
    let mut next_ptr = 4usize;

    for (index, page) in pages.iter().enumerate() {
        let seed = index as u8;
        let (cw, ch) = match page.tile {
            Some(t) => (t, t),
            None => (page.width, page.height),
        };
        let origins: Vec<(u32, u32)> = match page.tile {
            Some(t) => (0..page.height.div_ceil(t))
                .flat_map(|ty| (0..page.width.div_ceil(t)).map(move |tx| (tx * t, ty * t)))
                .collect(),
            None => vec![(0, 0)],
        };

        let mut tables = None;
        let mut offsets = Vec::new();
        let mut counts = Vec::new();
        for (ox, oy) in origins {
            let chunk = match page.data {
                PageData::Coordinates => coordinate_chunk(page, seed, ox, oy, cw, ch),
                PageData::Gray16 => gray16_chunk(page, index as u32, ox, oy, cw, ch),
                PageData::Jpeg(color) => solid_jpeg(cw, ch, color),
                PageData::JpegTables(color) => {
                    let (t, tile) = split_jpeg_tables(&solid_jpeg(cw, ch, color));
                    tables = Some(t);
                    tile
                }
            };
            offsets.push(data.len() as u32);
            counts.push(chunk.len() as u32);
            data.extend(chunk);
        }

        let compression = match page.data {
            PageData::Coordinates | PageData::Gray16 => 1,
            _ => 7,
        };
        let spp = page.samples_per_pixel();
        let mut entries: Vec<(u16, Value)> = vec![
            (256, Value::Long(vec![page.width])),
            (257, Value::Long(vec![page.height])),
            (258, Value::Shorts(vec![page.bits_per_sample; spp as usize])),
            (259, Value::Short(compression)),
            (262, Value::Short(if spp == 1 { 1 } else { 2 })),
            (277, Value::Short(spp)),
        ];
        if page.planar != 1 {
            entries.push((284, Value::Short(page.planar)));
        }
        match page.tile {
            Some(t) => {
                entries.push((322, Value::Long(vec![t])));
                entries.push((323, Value::Long(vec![t])));
                entries.push((324, Value::Long(offsets)));
                entries.push((325, Value::Long(counts)));
            }
            None => {
                entries.push((273, Value::Long(offsets)));
                entries.push((278, Value::Long(vec![page.height])));
                entries.push((279, Value::Long(counts)));
            }
        }
        if let Some(desc) = &page.description {
            entries.push((270, Value::Ascii(desc.clone())));
        }
        if let Some(tables) = tables {
            entries.push((347, Value::Undefined(tables)));
        }
        entries.sort_by_key(|e| e.0);

        let ifd_at = data.len();
        data[next_ptr..next_ptr + 4].copy_from_slice(&(ifd_at as u32).to_le_bytes());
        let mut extra_at = ifd_at + 2 + entries.len() * 12 + 4;
        let mut extra = Vec::new();

        data.extend((entries.len() as u16).to_le_bytes());
        for (tag, value) in &entries {
            data.extend(tag.to_le_bytes());
            let (typ, count, payload): (u16, usize, Vec<u8>) = match value {
                Value::Short(v) => (3, 1, v.to_le_bytes().to_vec()),
                Value::Shorts(v) => (3, v.len(), v.iter().flat_map(|x| x.to_le_bytes()).collect()),
                Value::Long(v) => (4, v.len(), v.iter().flat_map(|x| x.to_le_bytes()).collect()),
                Value::Ascii(s) => {
                    let mut bytes = s.clone().into_bytes();
                    bytes.push(0);
                    (2, bytes.len(), bytes)
                }
                Value::Undefined(bytes) => (7, bytes.len(), bytes.clone()),
            };
            data.extend(typ.to_le_bytes());
            data.extend((count as u32).to_le_bytes());
            if payload.len() <= 4 {
                let mut inline = payload;
                inline.resize(4, 0);
                data.extend(inline);
            } else {
                data.extend((extra_at as u32).to_le_bytes());
                extra_at += payload.len();
                extra.extend(payload);
            }
        }
        next_ptr = data.len();
        data.extend(0u32.to_le_bytes());
        data.extend(extra);
    }
    data
}

/// Generic pyramid: 300x200 and 150x100 on 64 px tiles, coordinate pixels.
pub fn generic_pyramid() -> Vec<u8> {
    build_tiff(&[TiffPage::tiled(300, 200, 64), TiffPage::tiled(150, 100, 64)])
}

pub const APERIO_DESCRIPTION: &str =
    "Aperio Image Library v12.0.5\r\n512x384 (256x256) JPEG/RGB Q=70|AppMag = 40|MPP = 0.2520";

/// Aperio-style SVS: JPEG levels with shared tables, a stripped thumbnail
/// and a label.
pub fn aperio_slide() -> Vec<u8> {
    build_tiff(&[
        TiffPage::tiled(512, 384, 128)
            .with_data(PageData::JpegTables([180, 60, 120]))
            .described(APERIO_DESCRIPTION),
        TiffPage::strip(64, 48).with_data(PageData::Jpeg([20, 20, 20])),
        TiffPage::tiled(128, 96, 128).with_data(PageData::JpegTables([60, 180, 120])),
        TiffPage::strip(40, 30)
            .with_data(PageData::Jpeg([250, 250, 250]))
            .described("label 40x30"),
    ])
}

// =============================================================================
// TMAP Builder
// =============================================================================

const TMAP_HEADER_LEN: usize = 0x430;
const TMAP_IMAGE_INFO_AT: usize = 0x130;
const TMAP_LAYER_INFO_AT: usize = 0x230;
const TMAP_TILE: u32 = 256;
pub const TMAP_BACKGROUND: u8 = 230;

fn put_i32(buf: &mut [u8], at: usize, v: i32) {
    buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

fn put_i64(buf: &mut [u8], at: usize, v: i64) {
    buf[at..at + 8].copy_from_slice(&v.to_le_bytes());
}

/// TMAP version 7 file. Layer `i` is `layers[i]` filled with its color;
/// tiles listed in `missing` as `(layer, col, row)` are left out. A 40x20
/// dark label follows the tiles.
pub fn build_tmap(scan_scale: u8, layers: &[(u32, u32, [u8; 3])], missing: &[(usize, u32, u32)]) -> Vec<u8> {
    let mut data = vec![0u8; TMAP_HEADER_LEN];
    data[..6].copy_from_slice(b"TMAP07");
    data[10] = 1;
    data[11] = scan_scale;
    data[12] = TMAP_BACKGROUND;
    data[0x10..0x14].copy_from_slice(&0.00025f32.to_le_bytes());
    put_i32(&mut data, 0x14, 1);
    put_i32(&mut data, 0x18, layers.len() as i32);

    let mut tables = Vec::new();
    for (i, (w, h, _)) in layers.iter().enumerate() {
        let cols = w.div_ceil(TMAP_TILE);
        let rows = h.div_ceil(TMAP_TILE);
        let at = TMAP_LAYER_INFO_AT + i * 32;
        put_i32(&mut data, at, i as i32);
        put_i32(&mut data, at + 8, *w as i32);
        put_i32(&mut data, at + 12, *h as i32);
        put_i32(&mut data, at + 16, rows as i32);
        put_i32(&mut data, at + 20, cols as i32);
        tables.push((at, cols, rows));
    }

    for (i, (at, cols, rows)) in tables.into_iter().enumerate() {
        let table = data.len();
        put_i32(&mut data, at + 24, table as i32);
        data.extend(vec![0u8; (cols * rows) as usize * 40]);

        let payload = solid_jpeg(TMAP_TILE, TMAP_TILE, layers[i].2);
        for row in 0..rows {
            for col in 0..cols {
                if missing.contains(&(i, col, row)) {
                    continue;
                }
                let entry = table + ((row * cols + col) as usize) * 40 + 24;
                let offset = data.len();
                put_i64(&mut data, entry, offset as i64);
                put_i32(&mut data, entry + 8, payload.len() as i32);
                data.extend_from_slice(&payload);
            }
        }
    }

    let label = solid_jpeg(40, 20, [10, 10, 10]);
    let offset = data.len();
    put_i32(&mut data, TMAP_IMAGE_INFO_AT, 40);
    put_i32(&mut data, TMAP_IMAGE_INFO_AT + 4, 20);
    put_i32(&mut data, TMAP_IMAGE_INFO_AT + 12, 3);
    put_i64(&mut data, TMAP_IMAGE_INFO_AT + 16, offset as i64);
    put_i32(&mut data, TMAP_IMAGE_INFO_AT + 24, label.len() as i32);
    data.extend(label);
    data
}

const TMAP6_BLOCKS_AT: usize = 0xC0;
const TMAP6_BLOCK_LEN: usize = 304;

fn put_i16(buf: &mut [u8], at: usize, v: i16) {
    buf[at..at + 2].copy_from_slice(&v.to_le_bytes());
}

/// TMAP version 6 file of 1024x512 at 4x with 256 px tiles and ratio 2,
/// cut into two 512x512 blocks. Block `i` is `blocks[i]` at layer 0 and
/// `coarse` at layer 1; the right block's tiles live in side file 1. No
/// tile is stored for layer 2.
///
/// Returns the main file and the `.DT1` side file.
pub fn build_tmap6(blocks: [[u8; 3]; 2], coarse: [u8; 3]) -> (Vec<u8>, Vec<u8>) {
    let mut data = vec![0u8; TMAP6_BLOCKS_AT + 2 * TMAP6_BLOCK_LEN];
    let mut side = vec![0u8; 16];
    data[..6].copy_from_slice(b"TMAP06");
    data[6] = 1;
    data[8] = 1;
    data[12] = 2;
    data[15] = TMAP_BACKGROUND;
    data[0x10..0x14].copy_from_slice(&0.00025f32.to_le_bytes());
    put_i32(&mut data, 20, 2);
    put_i16(&mut data, 24, 4);
    put_i16(&mut data, 26, 2);
    put_i16(&mut data, 28, 1);
    put_i16(&mut data, 34, TMAP_TILE as i16);
    put_i16(&mut data, 36, TMAP_TILE as i16);
    put_i32(&mut data, 48, 1024);
    put_i32(&mut data, 52, 512);

    for (block, color) in blocks.into_iter().enumerate() {
        let at = TMAP6_BLOCKS_AT + block * TMAP6_BLOCK_LEN;
        let file_id = block as u8;
        data[at] = file_id;
        put_i16(&mut data, at + 8, block as i16);
        put_i32(&mut data, at + 12, block as i32 * 512);

        let tiles = [(0u8, 0u8, 0u8, color), (0, 1, 0, color), (0, 0, 1, color), (0, 1, 1, color), (1, 0, 0, coarse)];
        for (i, (layer, col, row, color)) in tiles.into_iter().enumerate() {
            let payload = solid_jpeg(TMAP_TILE, TMAP_TILE, color);
            let target = if file_id == 0 { &mut data } else { &mut side };
            let offset = target.len();
            target.extend(&payload);

            let entry = at + 20 + i * 12;
            data[entry] = layer;
            data[entry + 1] = col;
            data[entry + 2] = row;
            put_i32(&mut data, entry + 4, offset as i32);
            put_i32(&mut data, entry + 8, payload.len() as i32);
        }
    }
    (data, side)
}

// =============================================================================
// In-memory Backends
// =============================================================================

/// Level geometry only; reads return a solid color per level and are
/// recorded as `(level, x, y, w, h)`.
pub struct GeometryBackend {
    pub levels: Vec<(u32, u32, f64)>,
    pub requests: Arc<Mutex<Vec<(u32, u32, u32, u32, u32)>>>,
}

impl GeometryBackend {
    pub fn new(levels: &[(u32, u32, f64)]) -> Self {
        GeometryBackend {
            levels: levels.to_vec(),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn level_color(level: u32) -> [u8; 4] {
        [40 * level as u8, 100, 200, 255]
    }
}

impl SlideBackend for GeometryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Kfb
    }

    fn level_count(&self) -> u32 {
        self.levels.len() as u32
    }

    fn level_dimensions(&self, level: u32) -> Result<(u32, u32), SlideError> {
        self.check_level(level)?;
        let (w, h, _) = self.levels[level as usize];
        Ok((w, h))
    }

    fn level_downsample(&self, level: u32) -> Result<f64, SlideError> {
        self.check_level(level)?;
        Ok(self.levels[level as usize].2)
    }

    fn read_region(
        &mut self,
        level: u32,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
    ) -> Result<PixelBuffer, SlideError> {
        self.check_level(level)?;
        self.requests.lock().unwrap().push((level, x, y, w, h));
        Ok(PixelBuffer::new_filled(w, h, Self::level_color(level)))
    }

    fn associated_kinds(&self) -> Vec<AssociatedKind> {
        Vec::new()
    }

    fn associated_image(&mut self, _kind: AssociatedKind) -> Result<Option<PixelBuffer>, SlideError> {
        Ok(None)
    }

    fn properties(&self) -> Vec<(String, String)> {
        vec![("openslide.vendor".to_string(), "synthetic".to_string())]
    }
}

/// Shared counters for [`SlowBackend`] instances.
#[derive(Debug, Default)]
pub struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
    pub calls: AtomicUsize,
    pub closes: AtomicUsize,
}

impl InFlight {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// 512x512 single-level backend whose reads sleep for `delay` while
/// tracking how many reads run at once.
pub struct SlowBackend {
    pub delay: Duration,
    pub counters: Arc<InFlight>,
}

impl SlideBackend for SlowBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sdpc
    }

    fn level_count(&self) -> u32 {
        1
    }

    fn level_dimensions(&self, level: u32) -> Result<(u32, u32), SlideError> {
        self.check_level(level)?;
        Ok((512, 512))
    }

    fn level_downsample(&self, level: u32) -> Result<f64, SlideError> {
        self.check_level(level)?;
        Ok(1.0)
    }

    fn read_region(
        &mut self,
        _level: u32,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
    ) -> Result<PixelBuffer, SlideError> {
        self.counters.enter();
        thread::sleep(self.delay);
        self.counters.leave();
        Ok(PixelBuffer::new_filled(w, h, [x as u8, y as u8, 0, 255]))
    }

    fn associated_kinds(&self) -> Vec<AssociatedKind> {
        Vec::new()
    }

    fn associated_image(&mut self, _kind: AssociatedKind) -> Result<Option<PixelBuffer>, SlideError> {
        Ok(None)
    }

    fn properties(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn close(&mut self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }
}
