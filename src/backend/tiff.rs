//! Backend for the TIFF family: Aperio SVS, Ventana BIF, QPTIFF and generic
//! tiled pyramidal TIFF.
//!
//! All pixel access goes through a [`BlockCache`] over the file, so reading
//! neighbouring tiles shares block fetches. A region read decodes every tile
//! that intersects the rectangle and copies the overlapping part:
//!
//! ```text
//!   tile grid (tw x th)           request (x, y, w, h)
//!   +------+------+------+
//!   |      |  ####|###   |        ####  copied from each tile into the
//!   +------+--####|###---+              output at (ox - x, oy - y)
//!   |      |  ####|###   |
//!   +------+------+------+
//! ```
//!
//! Tiles whose offset or byte count is zero were never written by the
//! scanner and stay background.
//!
//! Uncompressed chunks must hold interleaved 8-bit samples. QPTIFF channel
//! reads also accept 16-bit grayscale and stretch each region to 0..255.

use std::path::Path;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::config::OpenOptions;
use crate::error::{SlideError, TiffError};
use crate::format::jpeg::{decode_jpeg, prepare_tile_jpeg};
use crate::format::svs::SvsMetadata;
use crate::format::tiff::{Compression, Layout, TiffImage, TiffPyramid};
use crate::format::{AssociatedKind, BackendKind};
use crate::io::{BlockCache, FileRangeReader, RangeReader};
use crate::pixel::{PixelBuffer, WHITE};

use super::SlideBackend;

/// Reader for tiled pyramidal TIFF files.
pub struct TiffBackend<R = FileRangeReader> {
    kind: BackendKind,
    reader: BlockCache<R>,
    pyramid: TiffPyramid,
    svs: Option<SvsMetadata>,
}

impl TiffBackend<FileRangeReader> {
    /// Open a TIFF-family file from disk.
    pub fn open(path: &Path, kind: BackendKind, options: &OpenOptions) -> Result<Self, SlideError> {
        let file = FileRangeReader::open(path).map_err(|e| SlideError::OpenFailure {
            kind,
            detail: e.to_string(),
        })?;
        Self::from_reader(kind, file, options)
    }
}

impl<R: RangeReader> TiffBackend<R> {
    /// Parse the pyramid from any range reader.
    ///
    /// # Errors
    /// `OpenFailure` when the TIFF structure is invalid or holds no tiled
    /// level.
    pub fn from_reader(kind: BackendKind, reader: R, options: &OpenOptions) -> Result<Self, SlideError> {
        let reader = BlockCache::with_capacity(reader, options.block_size, options.cache_blocks);
        let pyramid = match kind {
            BackendKind::Qptiff => TiffPyramid::parse_qptiff(&reader),
            _ => TiffPyramid::parse(&reader, kind == BackendKind::Aperio),
        }
        .map_err(|e| open_failure(kind, e))?;

        let svs = match (kind, pyramid.description.as_deref()) {
            (BackendKind::Aperio, Some(desc)) => Some(SvsMetadata::parse(desc)),
            _ => None,
        };

        debug!(
            %kind,
            source = reader.inner().identifier(),
            levels = pyramid.level_count(),
            channels = pyramid.channels.len(),
            associated = pyramid.associated.len(),
            "opened TIFF pyramid"
        );

        Ok(TiffBackend {
            kind,
            reader,
            pyramid,
            svs,
        })
    }

    fn level_image(&self, level: u32) -> Result<&TiffImage, SlideError> {
        self.check_level(level)?;
        Ok(&self.pyramid.levels[level as usize].image)
    }

    /// Fetch the stored bytes of one chunk; `Ok(None)` for chunks the file
    /// never wrote.
    fn chunk_bytes(&self, image: &TiffImage, index: usize) -> Result<Option<Bytes>, SlideError> {
        let Some((offset, len)) = image.chunk_location(index) else {
            trace!(ifd = image.ifd_index, chunk = index, "chunk not present");
            return Ok(None);
        };
        let size = self.reader.size();
        let len = match offset.checked_add(len) {
            Some(end) if end <= size => len as usize,
            _ => {
                return Err(SlideError::backend_io(
                    self.kind,
                    format!(
                        "IFD {} chunk {index}: {len} bytes at {offset} run past the end of a {size} byte file",
                        image.ifd_index
                    ),
                ))
            }
        };
        self.reader
            .read_exact_at(offset, len)
            .map(Some)
            .map_err(|e| SlideError::backend_io(self.kind, e.to_string()))
    }

    /// Read and decode one tile or strip into a `cw` x `ch` buffer.
    ///
    /// `Ok(None)` for chunks the file never wrote.
    fn decode_chunk(
        &self,
        image: &TiffImage,
        index: usize,
        cw: u32,
        ch: u32,
    ) -> Result<Option<PixelBuffer>, SlideError> {
        let Some(data) = self.chunk_bytes(image, index)? else {
            return Ok(None);
        };

        let pixels = match image.compression {
            Compression::Jpeg => self.decode_jpeg_chunk(image, index, &data)?,
            Compression::None => {
                self.check_sample_layout(image, &[8])?;
                let raw = match (image.photometric, image.samples_per_pixel) {
                    (0, 1) => {
                        let inverted: Vec<u8> = data.iter().map(|v| 255 - v).collect();
                        PixelBuffer::from_gray(cw, ch, &inverted)
                    }
                    (1, 1) => PixelBuffer::from_gray(cw, ch, &data),
                    (2, 3) => PixelBuffer::from_rgb(cw, ch, &data),
                    (2, 4) => {
                        let len = cw as usize * ch as usize * 4;
                        data.get(..len)
                            .and_then(|b| PixelBuffer::from_rgba(cw, ch, b.to_vec()))
                    }
                    (photometric, spp) => {
                        return Err(SlideError::decode(
                            self.kind,
                            format!(
                                "unsupported photometric interpretation {photometric} with {spp} samples per pixel"
                            ),
                        ))
                    }
                };
                raw.ok_or_else(|| short_chunk(self.kind, image, index, data.len(), cw, ch))?
            }
            other => return Err(unsupported_compression(self.kind, other)),
        };
        Ok(Some(pixels))
    }

    fn decode_jpeg_chunk(
        &self,
        image: &TiffImage,
        index: usize,
        data: &[u8],
    ) -> Result<PixelBuffer, SlideError> {
        let stream = prepare_tile_jpeg(image.jpeg_tables.as_deref(), data);
        let decoded = decode_jpeg(&stream).map_err(|e| {
            SlideError::decode(
                self.kind,
                format!("IFD {} chunk {index}: {e}", image.ifd_index),
            )
        })?;
        Ok(PixelBuffer::from_image(decoded))
    }

    /// `Decode` unless samples are interleaved and of an accepted depth.
    fn check_sample_layout(&self, image: &TiffImage, depths: &[u16]) -> Result<(), SlideError> {
        if !depths.contains(&image.bits_per_sample) {
            return Err(SlideError::decode(
                self.kind,
                format!(
                    "IFD {}: unsupported bits per sample: {}",
                    image.ifd_index,
                    match image.bits_per_sample {
                        0 => "mixed".to_string(),
                        bits => bits.to_string(),
                    }
                ),
            ));
        }
        if image.planar_configuration != 1 && image.samples_per_pixel > 1 {
            return Err(SlideError::decode(
                self.kind,
                format!(
                    "IFD {}: planar configuration {} is not supported",
                    image.ifd_index, image.planar_configuration
                ),
            ));
        }
        Ok(())
    }

    /// Decode one grayscale chunk to raw sample values, widened to 16 bits.
    fn decode_gray_chunk(
        &self,
        image: &TiffImage,
        index: usize,
        cw: u32,
        ch: u32,
    ) -> Result<Option<Vec<u16>>, SlideError> {
        let Some(data) = self.chunk_bytes(image, index)? else {
            return Ok(None);
        };
        let count = cw as usize * ch as usize;

        let (mut values, max): (Vec<u16>, u16) = match image.compression {
            Compression::Jpeg => {
                let pixels = self.decode_jpeg_chunk(image, index, &data)?;
                let values = pixels.as_bytes().chunks_exact(4).map(|p| p[0] as u16).collect();
                (values, u8::MAX as u16)
            }
            Compression::None => {
                self.check_sample_layout(image, &[8, 16])?;
                let bytes_per_sample = image.bits_per_sample as usize / 8;
                if data.len() < count * bytes_per_sample {
                    return Err(short_chunk(self.kind, image, index, data.len(), cw, ch));
                }
                if image.bits_per_sample == 8 {
                    (data[..count].iter().map(|&v| v as u16).collect(), u8::MAX as u16)
                } else {
                    let order = self.pyramid.byte_order();
                    let values = data[..count * 2]
                        .chunks_exact(2)
                        .map(|c| order.read_u16(c))
                        .collect();
                    (values, u16::MAX)
                }
            }
            other => return Err(unsupported_compression(self.kind, other)),
        };
        if image.photometric == 0 {
            values.iter_mut().for_each(|v| *v = max - *v);
        }
        Ok(Some(values))
    }

    /// Read a rectangle of one grayscale channel level and stretch it to
    /// 8 bits: 0/1 masks scale to 0/255, anything else is min-max
    /// normalized over the region, and a flat region reads as black.
    fn read_channel_tiled(
        &self,
        image: &TiffImage,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
    ) -> Result<PixelBuffer, SlideError> {
        if image.samples_per_pixel != 1 {
            return self.read_tiled(image, x, y, w, h);
        }
        let Layout::Tiled {
            tile_width,
            tile_height,
            tiles_x,
            tiles_y,
        } = image.layout
        else {
            return Err(SlideError::backend_io(
                self.kind,
                format!("IFD {} is not tiled", image.ifd_index),
            ));
        };

        let mut values = vec![0u16; w as usize * h as usize];
        if w > 0 && h > 0 && tiles_x > 0 && tiles_y > 0 {
            let last_col = ((x + w - 1) / tile_width).min(tiles_x - 1);
            let last_row = ((y + h - 1) / tile_height).min(tiles_y - 1);
            for row in y / tile_height..=last_row {
                for col in x / tile_width..=last_col {
                    let Some(index) = image.tile_index(col, row) else {
                        continue;
                    };
                    let Some(tile) = self.decode_gray_chunk(image, index, tile_width, tile_height)?
                    else {
                        continue;
                    };

                    let (ox, oy) = (col * tile_width, row * tile_height);
                    let (x0, x1) = (x.max(ox), (x + w).min(ox + tile_width));
                    let (y0, y1) = (y.max(oy), (y + h).min(oy + tile_height));
                    for py in y0..y1 {
                        let src = ((py - oy) * tile_width + (x0 - ox)) as usize;
                        let dst = ((py - y) * w + (x0 - x)) as usize;
                        let n = (x1 - x0) as usize;
                        values[dst..dst + n].copy_from_slice(&tile[src..src + n]);
                    }
                }
            }
        }

        let gray = stretch_to_u8(&values, image.bits_per_sample == 8);
        PixelBuffer::from_gray(w, h, &gray)
            .ok_or_else(|| SlideError::backend_io(self.kind, "channel buffer size mismatch"))
    }

    /// Read a rectangle of a tiled image in its own pixel coordinates.
    fn read_tiled(
        &self,
        image: &TiffImage,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
    ) -> Result<PixelBuffer, SlideError> {
        let mut out = PixelBuffer::new_filled(w, h, WHITE);
        let Layout::Tiled {
            tile_width,
            tile_height,
            tiles_x,
            tiles_y,
        } = image.layout
        else {
            return Err(SlideError::backend_io(
                self.kind,
                format!("IFD {} is not tiled", image.ifd_index),
            ));
        };
        if w == 0 || h == 0 || tiles_x == 0 || tiles_y == 0 {
            return Ok(out);
        }

        let first_col = x / tile_width;
        let first_row = y / tile_height;
        let last_col = ((x + w - 1) / tile_width).min(tiles_x - 1);
        let last_row = ((y + h - 1) / tile_height).min(tiles_y - 1);

        for row in first_row..=last_row {
            for col in first_col..=last_col {
                let Some(index) = image.tile_index(col, row) else {
                    continue;
                };
                let Some(tile) = self.decode_chunk(image, index, tile_width, tile_height)? else {
                    continue;
                };

                let (ox, oy) = (col * tile_width, row * tile_height);
                out.blit(
                    &tile,
                    x.saturating_sub(ox),
                    y.saturating_sub(oy),
                    ox.saturating_sub(x),
                    oy.saturating_sub(y),
                    tile_width,
                    tile_height,
                );
            }
        }
        Ok(out)
    }

    /// Decode an entire image, tiled or stripped.
    fn read_whole(&self, image: &TiffImage) -> Result<PixelBuffer, SlideError> {
        match image.layout {
            Layout::Tiled { .. } => self.read_tiled(image, 0, 0, image.width, image.height),
            Layout::Stripped { rows_per_strip } => {
                let mut out = PixelBuffer::new_filled(image.width, image.height, WHITE);
                for index in 0..image.chunk_count() {
                    let top = index as u32 * rows_per_strip;
                    let rows = rows_per_strip.min(image.height - top);
                    if let Some(strip) = self.decode_chunk(image, index, image.width, rows)? {
                        out.blit(&strip, 0, 0, 0, top, image.width, rows);
                    }
                }
                Ok(out)
            }
        }
    }

    fn vendor(&self) -> &'static str {
        match self.kind {
            BackendKind::Aperio => "aperio",
            BackendKind::Ventana => "ventana",
            BackendKind::Qptiff => "qptiff",
            _ => "generic-tiff",
        }
    }
}

impl<R: RangeReader> SlideBackend for TiffBackend<R> {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn level_count(&self) -> u32 {
        self.pyramid.level_count() as u32
    }

    fn level_dimensions(&self, level: u32) -> Result<(u32, u32), SlideError> {
        let image = self.level_image(level)?;
        Ok((image.width, image.height))
    }

    fn level_downsample(&self, level: u32) -> Result<f64, SlideError> {
        self.check_level(level)?;
        Ok(self.pyramid.levels[level as usize].downsample)
    }

    fn level_padding(&self, level: u32) -> Result<(u32, u32), SlideError> {
        let image = self.level_image(level)?;
        let (pw, ph) = image.padded_dimensions();
        Ok((pw - image.width, ph - image.height))
    }

    fn read_region(
        &mut self,
        level: u32,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
    ) -> Result<PixelBuffer, SlideError> {
        let image = self.level_image(level)?;
        if self.pyramid.channels.is_empty() {
            self.read_tiled(image, x, y, w, h)
        } else {
            self.read_channel_tiled(image, x, y, w, h)
        }
    }

    fn channels(&self) -> Vec<String> {
        self.pyramid.channels.iter().map(|c| c.name.clone()).collect()
    }

    fn read_channel_region(
        &mut self,
        channel: &str,
        level: u32,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
    ) -> Result<PixelBuffer, SlideError> {
        self.check_level(level)?;
        let Some(found) = self.pyramid.channel(channel) else {
            return Err(SlideError::invalid_argument(
                self.kind,
                format!("unknown channel {channel:?}; available: {}", self.channels().join(", ")),
            ));
        };
        let Some(level_entry) = found.levels.get(level as usize) else {
            return Err(SlideError::InvalidLevel {
                kind: self.kind,
                level,
                count: found.levels.len() as u32,
            });
        };
        self.read_channel_tiled(&level_entry.image, x, y, w, h)
    }

    fn associated_kinds(&self) -> Vec<AssociatedKind> {
        let mut kinds: Vec<_> = self.pyramid.associated.iter().map(|a| a.kind).collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }

    fn associated_image(
        &mut self,
        kind: AssociatedKind,
    ) -> Result<Option<PixelBuffer>, SlideError> {
        match self.pyramid.associated(kind) {
            Some(image) => self.read_whole(image).map(Some),
            None => Ok(None),
        }
    }

    fn properties(&self) -> Vec<(String, String)> {
        let mut props = vec![("openslide.vendor".to_string(), self.vendor().to_string())];
        if let Some(desc) = &self.pyramid.description {
            props.push(("tiff.ImageDescription".to_string(), desc.clone()));
        }
        if let Some(svs) = &self.svs {
            props.extend(svs.properties());
        }
        if !self.pyramid.channels.is_empty() {
            props.push(("qptiff.biomarkers".to_string(), self.channels().join(",")));
            props.push((
                "qptiff.biomarker-count".to_string(),
                self.pyramid.channels.len().to_string(),
            ));
        }
        props
    }
}

fn open_failure(kind: BackendKind, err: TiffError) -> SlideError {
    SlideError::OpenFailure {
        kind,
        detail: err.to_string(),
    }
}

fn unsupported_compression(kind: BackendKind, compression: Compression) -> SlideError {
    SlideError::decode(
        kind,
        format!("unsupported compression: {}", compression.name()),
    )
}

fn short_chunk(
    kind: BackendKind,
    image: &TiffImage,
    index: usize,
    len: usize,
    cw: u32,
    ch: u32,
) -> SlideError {
    SlideError::decode(
        kind,
        format!(
            "IFD {} chunk {index}: {len} bytes is short for {cw}x{ch}",
            image.ifd_index
        ),
    )
}

/// Map raw samples to 0..255 the way channel viewers expect.
fn stretch_to_u8(values: &[u16], eight_bit: bool) -> Vec<u8> {
    let (min, max) = values
        .iter()
        .fold((u16::MAX, 0u16), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if eight_bit && max <= 1 {
        values.iter().map(|&v| (v * 255) as u8).collect()
    } else if max > min {
        let span = (max - min) as u32;
        values
            .iter()
            .map(|&v| ((v - min) as u32 * 255 / span) as u8)
            .collect()
    } else {
        vec![0; values.len()]
    }
}
