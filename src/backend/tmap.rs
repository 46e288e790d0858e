//! Backend for UNIC TMAP slides, versions 6 and 7.
//!
//! Version 7 stores every layer as a grid of 256 x 256 JPEG tiles, with one
//! table entry per tile and focus plane. Only focus plane 0 is read. Level
//! `k` is the base size halved `k` times and reads layer `k`; the number of
//! levels follows the scan magnification, one per halving while it stays
//! above 2x.
//!
//! ```text
//!   scan_scale 40  ->  40, 20, 10, 5, 2.5  ->  up to 5 levels
//!   scan_scale 20  ->  20, 10, 5, 2.5      ->  up to 4 levels
//! ```
//!
//! Version 6 places each tile by its level-0 origin (see
//! [`crate::format::tmap6`]). A level without stored tiles is resampled from
//! the nearest finer level that has them.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use tracing::{debug, trace, warn};

use crate::config::OpenOptions;
use crate::error::{SlideError, TmapError};
use crate::format::jpeg::{decode_jpeg, find_jpeg_start};
use crate::format::tmap::{read_version, TmapFile, TMAP_TILE_SIZE};
use crate::format::tmap6::{Tmap6File, Tmap6ImageKind, Tmap6Tile};
use crate::format::{AssociatedKind, BackendKind};
use crate::io::{BlockCache, FileRangeReader, RangeReader};
use crate::pixel::PixelBuffer;

use super::SlideBackend;

const KIND: BackendKind = BackendKind::Tmap;

#[derive(Debug, Clone, Copy)]
struct TmapLevel {
    /// Index into the file's layer table
    layer: usize,
    width: u32,
    height: u32,
    downsample: f64,
}

enum Container {
    V7(TmapFile),
    V6 {
        file: Tmap6File,
        /// Per level: tiles keyed by the tile-grid cell of their origin
        grids: Vec<HashMap<(u32, u32), Vec<Tmap6Tile>>>,
    },
}

/// Reader for TMAP files.
pub struct TmapBackend<R = FileRangeReader> {
    reader: BlockCache<R>,
    /// Version 6 side files by id
    data_files: BTreeMap<u8, BlockCache<R>>,
    container: Container,
    levels: Vec<TmapLevel>,
}

impl TmapBackend<FileRangeReader> {
    /// Open a TMAP file and, for version 6, its `<stem>.DT<n>` side files.
    pub fn open(path: &Path, options: &OpenOptions) -> Result<Self, SlideError> {
        let file = FileRangeReader::open(path).map_err(|e| SlideError::OpenFailure {
            kind: KIND,
            detail: e.to_string(),
        })?;
        let mut backend = Self::from_reader(file, options)?;

        for id in backend.data_file_ids() {
            let side = path.with_extension(format!("DT{id}"));
            match FileRangeReader::open(&side) {
                Ok(reader) => backend.attach_data_file(id, reader, options),
                Err(e) => warn!(
                    path = %side.display(),
                    error = %e,
                    "TMAP side file unavailable, its tiles read as background"
                ),
            }
        }
        Ok(backend)
    }
}

impl<R: RangeReader> TmapBackend<R> {
    /// Parse the header and derive the level chain.
    ///
    /// # Errors
    /// `OpenFailure` for unreadable headers and unsupported versions.
    pub fn from_reader(reader: R, options: &OpenOptions) -> Result<Self, SlideError> {
        let reader = BlockCache::with_capacity(reader, options.block_size, options.cache_blocks);
        let parsed = match read_version(&reader) {
            Ok(6) => Tmap6File::parse(&reader).map(Container::v6),
            Ok(_) => TmapFile::parse(&reader).map(Container::V7),
            Err(e) => Err(e),
        };
        let container = parsed.map_err(|e| {
            if let TmapError::UnsupportedVersion(v) = &e {
                warn!(version = v, "refusing TMAP file");
            }
            SlideError::OpenFailure {
                kind: KIND,
                detail: e.to_string(),
            }
        })?;

        let levels = match &container {
            Container::V7(file) => derive_levels(file),
            Container::V6 { file, .. } => v6_levels(file),
        };
        debug!(
            source = reader.inner().identifier(),
            version = container.version(),
            levels = levels.len(),
            "opened TMAP slide"
        );

        Ok(TmapBackend {
            reader,
            data_files: BTreeMap::new(),
            container,
            levels,
        })
    }

    /// Side file ids the tiles refer to; empty for version 7.
    pub fn data_file_ids(&self) -> Vec<u8> {
        match &self.container {
            Container::V6 { file, .. } => file.data_file_ids().into_iter().collect(),
            Container::V7(_) => Vec::new(),
        }
    }

    /// Serve tiles with file id `id` from `reader`.
    pub fn attach_data_file(&mut self, id: u8, reader: R, options: &OpenOptions) {
        debug!(id, source = reader.identifier(), "attached TMAP side file");
        let cache = BlockCache::with_capacity(reader, options.block_size, options.cache_blocks);
        self.data_files.insert(id, cache);
    }

    fn level(&self, level: u32) -> Result<TmapLevel, SlideError> {
        self.check_level(level)?;
        Ok(self.levels[level as usize])
    }

    fn background(&self) -> [u8; 4] {
        let bg = match &self.container {
            Container::V7(file) => file.header.background,
            Container::V6 { file, .. } => file.header.background,
        };
        [bg, bg, bg, 255]
    }

    /// Decode a JPEG payload, skipping a vendor prefix when the stream does
    /// not start at byte 0.
    fn decode(&self, data: &[u8], what: &str) -> Result<PixelBuffer, SlideError> {
        let first = match decode_jpeg(data) {
            Ok(image) => return Ok(PixelBuffer::from_image(image)),
            Err(e) => e,
        };
        match find_jpeg_start(data).filter(|&start| start > 0) {
            Some(start) => decode_jpeg(&data[start..])
                .map(PixelBuffer::from_image)
                .map_err(|e| SlideError::decode(KIND, format!("{what}: {e}"))),
            None => Err(SlideError::decode(KIND, format!("{what}: {first}"))),
        }
    }

    // =========================================================================
    // Version 7
    // =========================================================================

    fn read_v7(
        &self,
        file: &TmapFile,
        info: TmapLevel,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
    ) -> Result<PixelBuffer, SlideError> {
        let mut out = PixelBuffer::new_filled(w, h, self.background());
        if w == 0 || h == 0 {
            return Ok(out);
        }

        let tile = TMAP_TILE_SIZE;
        for row in y / tile..=(y + h - 1) / tile {
            for col in x / tile..=(x + w - 1) / tile {
                let location = file
                    .tile_location(&self.reader, info.layer, col, row, 0)
                    .map_err(|e| SlideError::backend_io(KIND, e.to_string()))?;
                let Some((offset, len)) = location else {
                    continue;
                };

                let data = read_bytes(&self.reader, offset, len)?;
                let pixels = self.decode(&data, &format!("layer {} tile {col},{row}", info.layer))?;

                let (ox, oy) = (col * tile, row * tile);
                out.blit(
                    &pixels,
                    x.saturating_sub(ox),
                    y.saturating_sub(oy),
                    ox.saturating_sub(x),
                    oy.saturating_sub(y),
                    tile,
                    tile,
                );
            }
        }
        Ok(out)
    }

    // =========================================================================
    // Version 6
    // =========================================================================

    #[allow(clippy::too_many_arguments)]
    fn read_v6(
        &self,
        file: &Tmap6File,
        grids: &[HashMap<(u32, u32), Vec<Tmap6Tile>>],
        level: usize,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
    ) -> Result<PixelBuffer, SlideError> {
        if grids[level].is_empty() {
            if let Some(finer) = (0..level).rev().find(|&l| !grids[l].is_empty()) {
                return self.resample_v6(file, grids, finer, level, x, y, w, h);
            }
        }

        let mut out = PixelBuffer::new_filled(w, h, self.background());
        if w == 0 || h == 0 {
            return Ok(out);
        }
        let (tw, th) = (file.header.tile_width, file.header.tile_height);
        let scale = file.layer_scale(level as u8);
        let (x_end, y_end) = (x as u64 + w as u64, y as u64 + h as u64);

        // A tile whose origin sits in the previous cell can still reach in
        for row in (y / th).saturating_sub(1)..=(y + h - 1) / th {
            for col in (x / tw).saturating_sub(1)..=(x + w - 1) / tw {
                let Some(tiles) = grids[level].get(&(col, row)) else {
                    continue;
                };
                for tile in tiles {
                    let (tx, ty) = (tile.x / scale, tile.y / scale);
                    if tx >= x_end || ty >= y_end || tx + tw as u64 <= x as u64 || ty + th as u64 <= y as u64 {
                        continue;
                    }
                    let Some(pixels) = self.v6_tile(tile, tw, th)? else {
                        continue;
                    };
                    let (tx, ty) = (tx as u32, ty as u32);
                    out.blit(
                        &pixels,
                        x.saturating_sub(tx),
                        y.saturating_sub(ty),
                        tx.saturating_sub(x),
                        ty.saturating_sub(y),
                        tw,
                        th,
                    );
                }
            }
        }
        Ok(out)
    }

    /// Read the matching area of level `finer` and scale it down.
    #[allow(clippy::too_many_arguments)]
    fn resample_v6(
        &self,
        file: &Tmap6File,
        grids: &[HashMap<(u32, u32), Vec<Tmap6Tile>>],
        finer: usize,
        level: usize,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
    ) -> Result<PixelBuffer, SlideError> {
        let mut out = PixelBuffer::new_filled(w, h, self.background());
        let factor = (file.layer_scale(level as u8) / file.layer_scale(finer as u8)) as u32;
        let (fw, fh) = (self.levels[finer].width, self.levels[finer].height);
        let (sx, sy) = (x.saturating_mul(factor), y.saturating_mul(factor));
        if w == 0 || h == 0 || sx >= fw || sy >= fh {
            return Ok(out);
        }
        let sw = w.saturating_mul(factor).min(fw - sx);
        let sh = h.saturating_mul(factor).min(fh - sy);
        trace!(finer, level, factor, "resampling TMAP06 level without tiles");

        let source = self.read_v6(file, grids, finer, sx, sy, sw, sh)?;
        let (dw, dh) = (sw.div_ceil(factor).min(w), sh.div_ceil(factor).min(h));
        out.blit(&source.resize_area(dw, dh), 0, 0, 0, 0, dw, dh);
        Ok(out)
    }

    /// Decode one stored tile at its nominal size; `Ok(None)` when its side
    /// file is not attached.
    fn v6_tile(&self, tile: &Tmap6Tile, tw: u32, th: u32) -> Result<Option<PixelBuffer>, SlideError> {
        let reader = match tile.file_id {
            0 => &self.reader,
            id => match self.data_files.get(&id) {
                Some(reader) => reader,
                None => {
                    trace!(id, "side file missing, tile skipped");
                    return Ok(None);
                }
            },
        };
        let data = read_bytes(reader, tile.offset, tile.length)?;
        let pixels = self.decode(
            &data,
            &format!("layer {} tile at {},{}", tile.layer, tile.x, tile.y),
        )?;
        Ok(Some(if pixels.dimensions() == (tw, th) {
            pixels
        } else {
            pixels.resize_area(tw, th)
        }))
    }

    fn v6_associated(
        &self,
        file: &Tmap6File,
        kind: AssociatedKind,
    ) -> Result<Option<PixelBuffer>, SlideError> {
        let Some(image) = file.image_for(kind) else {
            return Ok(None);
        };
        let data = read_bytes(&self.reader, image.offset, image.length)?;
        let pixels = self.decode(&data, kind.as_str())?;
        if image.kind != Tmap6ImageKind::MacroLabel {
            return Ok(Some(pixels));
        }

        // Label on the left third, macro on the rest
        let (w, h) = pixels.dimensions();
        let label_w = w / 3;
        let part = match kind {
            AssociatedKind::Label => pixels.crop(0, 0, label_w, h, self.background()),
            _ => pixels.crop(label_w, 0, w - label_w, h, self.background()),
        };
        Ok(Some(part))
    }
}

impl Container {
    fn v6(file: Tmap6File) -> Self {
        let (tw, th) = (file.header.tile_width as u64, file.header.tile_height as u64);
        let grids = (0..file.levels().len())
            .map(|level| {
                let scale = file.layer_scale(level as u8);
                let mut grid: HashMap<(u32, u32), Vec<Tmap6Tile>> = HashMap::new();
                for tile in file.layer_tiles(level as u8) {
                    let cell = ((tile.x / scale / tw) as u32, (tile.y / scale / th) as u32);
                    grid.entry(cell).or_default().push(tile);
                }
                grid
            })
            .collect();
        Container::V6 { file, grids }
    }

    fn version(&self) -> u8 {
        match self {
            Container::V7(file) => file.header.version,
            Container::V6 { .. } => 6,
        }
    }
}

fn read_bytes<R: RangeReader>(
    reader: &BlockCache<R>,
    offset: u64,
    len: u32,
) -> Result<bytes::Bytes, SlideError> {
    reader
        .read_exact_at(offset, len as usize)
        .map_err(|e| SlideError::backend_io(KIND, e.to_string()))
}

/// Base size halved once per level, as many levels as the scan
/// magnification allows and the file has layers for.
fn derive_levels(file: &TmapFile) -> Vec<TmapLevel> {
    let count = match file.header.scan_scale {
        0 => file.layers.len(),
        scale => {
            let mut count = 1;
            let mut s = scale as f64;
            while s > 2.0 {
                s /= 2.0;
                count += 1;
            }
            count.min(file.layers.len())
        }
    };

    let (base_w, base_h) = file.dimensions();
    (0..count)
        .map_while(|k| {
            let (width, height) = (base_w >> k, base_h >> k);
            (width > 0 && height > 0).then(|| TmapLevel {
                layer: k,
                width,
                height,
                downsample: base_w as f64 / width as f64,
            })
        })
        .collect()
}

fn v6_levels(file: &Tmap6File) -> Vec<TmapLevel> {
    let base_w = file.dimensions().0 as f64;
    file.levels()
        .iter()
        .enumerate()
        .map(|(layer, &(width, height))| TmapLevel {
            layer,
            width,
            height,
            downsample: base_w / width as f64,
        })
        .collect()
}

impl<R: RangeReader> SlideBackend for TmapBackend<R> {
    fn kind(&self) -> BackendKind {
        KIND
    }

    fn level_count(&self) -> u32 {
        self.levels.len() as u32
    }

    fn level_dimensions(&self, level: u32) -> Result<(u32, u32), SlideError> {
        let level = self.level(level)?;
        Ok((level.width, level.height))
    }

    fn level_downsample(&self, level: u32) -> Result<f64, SlideError> {
        Ok(self.level(level)?.downsample)
    }

    fn read_region(
        &mut self,
        level: u32,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
    ) -> Result<PixelBuffer, SlideError> {
        let info = self.level(level)?;
        match &self.container {
            Container::V7(file) => self.read_v7(file, info, x, y, w, h),
            Container::V6 { file, grids } => self.read_v6(file, grids, info.layer, x, y, w, h),
        }
    }

    fn associated_kinds(&self) -> Vec<AssociatedKind> {
        match &self.container {
            Container::V7(file) => {
                let mut kinds: Vec<_> = file.images.iter().map(|i| i.kind).collect();
                kinds.sort();
                kinds.dedup();
                kinds
            }
            Container::V6 { file, .. } => file.associated_kinds(),
        }
    }

    fn associated_image(
        &mut self,
        kind: AssociatedKind,
    ) -> Result<Option<PixelBuffer>, SlideError> {
        match &self.container {
            Container::V7(file) => {
                let Some(info) = file.image(kind) else {
                    return Ok(None);
                };
                let data = read_bytes(&self.reader, info.offset, info.length)?;
                self.decode(&data, kind.as_str()).map(Some)
            }
            Container::V6 { file, .. } => self.v6_associated(file, kind),
        }
    }

    fn properties(&self) -> Vec<(String, String)> {
        match &self.container {
            Container::V7(file) => file.properties(),
            Container::V6 { file, .. } => file.properties(),
        }
    }

    fn background_color(&self) -> Option<[u8; 4]> {
        Some(self.background())
    }
}
