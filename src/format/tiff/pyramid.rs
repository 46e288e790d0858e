//! TIFF pyramid level identification.
//!
//! A slide TIFF holds several IFDs, and only some of them are pyramid levels:
//!
//! ```text
//! IFD 0  46000 x 32914  tiled     -> level 0
//! IFD 1   1024 x   732  stripped  -> thumbnail (Aperio)
//! IFD 2  11500 x  8228  tiled     -> level 1
//! IFD 3   2875 x  2057  tiled     -> level 2
//! IFD 4    387 x   463  stripped  "label"
//! IFD 5   1280 x   431  stripped  "macro"
//! ```
//!
//! Levels are the tiled IFDs that are not labelled as associated images,
//! sorted largest first and kept while their downsample strictly increases.
//! Tile offsets, byte counts and JPEG tables are loaded once at open.
//!
//! QPTIFF stores one grayscale page per biomarker at every resolution, so
//! same-sized pages there are channels rather than duplicates:
//!
//! ```text
//! IFD 0  8000 x 6000  DAPI     \
//! IFD 1  8000 x 6000  CD8       > level 0 of channels 0..2
//! IFD 2  8000 x 6000  PD-L1    /
//! IFD 3   400 x  300  Thumbnail
//! IFD 4  2000 x 1500  DAPI     \
//! IFD 5  2000 x 1500  CD8       > level 1
//! IFD 6  2000 x 1500  PD-L1    /
//! ```

use bytes::Bytes;
use tracing::debug;

use crate::error::TiffError;
use crate::format::qptiff::{QptiffImageType, QptiffPage};
use crate::format::AssociatedKind;
use crate::io::RangeReader;

use super::parser::{read_ascii, read_entry_bytes, read_u64_array, ByteOrder, Ifd, TiffHeader};
use super::tags::{Compression, TiffTag};

/// Maximum relative difference between x and y downsample of one level.
const MAX_ANISOTROPY: f64 = 0.1;

/// Levels narrower than this are exempt from the anisotropy check; rounding
/// dominates at that size.
const SMALL_LEVEL_DIMENSION: u32 = 64;

// =============================================================================
// TiffImage
// =============================================================================

/// How an image's pixel data is split into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Tiled {
        tile_width: u32,
        tile_height: u32,
        tiles_x: u32,
        tiles_y: u32,
    },
    Stripped {
        rows_per_strip: u32,
    },
}

/// One decodable image in the file: a pyramid level or an associated image.
#[derive(Debug, Clone)]
pub struct TiffImage {
    /// Index of the IFD in the file's chain
    pub ifd_index: usize,
    pub width: u32,
    pub height: u32,
    pub layout: Layout,
    pub compression: Compression,
    pub samples_per_pixel: u16,
    /// Bits of every sample; 0 when the samples differ in depth
    pub bits_per_sample: u16,
    /// 1 = interleaved (chunky), 2 = one plane per sample
    pub planar_configuration: u16,
    pub photometric: u16,
    /// Byte offset of each tile or strip
    pub offsets: Vec<u64>,
    /// Byte count of each tile or strip
    pub byte_counts: Vec<u64>,
    /// Shared JPEG tables, when present
    pub jpeg_tables: Option<Bytes>,
    pub description: Option<String>,
}

impl TiffImage {
    /// Load an image from a parsed IFD. Returns `Ok(None)` for IFDs that
    /// carry no pixel chunks.
    pub fn from_ifd<R: RangeReader + ?Sized>(
        reader: &R,
        header: &TiffHeader,
        ifd: &Ifd,
        ifd_index: usize,
    ) -> Result<Option<Self>, TiffError> {
        let bo = header.byte_order;
        let width = ifd.require_u32(TiffTag::ImageWidth, bo)?;
        let height = ifd.require_u32(TiffTag::ImageLength, bo)?;
        if width == 0 || height == 0 {
            return Ok(None);
        }

        let tiled = ifd.has_tag(TiffTag::TileWidth) && ifd.has_tag(TiffTag::TileOffsets);
        let (layout, offsets_tag, counts_tag) = if tiled {
            let tile_width = ifd.require_u32(TiffTag::TileWidth, bo)?;
            let tile_height = ifd.require_u32(TiffTag::TileLength, bo)?;
            if tile_width == 0 || tile_height == 0 {
                return Err(TiffError::InvalidTagValue {
                    tag: TiffTag::TileWidth.name(),
                    message: "tile dimensions must be non-zero".to_string(),
                });
            }
            let layout = Layout::Tiled {
                tile_width,
                tile_height,
                tiles_x: width.div_ceil(tile_width),
                tiles_y: height.div_ceil(tile_height),
            };
            (layout, TiffTag::TileOffsets, TiffTag::TileByteCounts)
        } else if ifd.has_tag(TiffTag::StripOffsets) {
            let rows_per_strip = ifd
                .get_u32(TiffTag::RowsPerStrip, bo)
                .unwrap_or(height)
                .clamp(1, height);
            (
                Layout::Stripped { rows_per_strip },
                TiffTag::StripOffsets,
                TiffTag::StripByteCounts,
            )
        } else {
            return Ok(None);
        };

        let offsets = match ifd.get_entry_by_tag(offsets_tag) {
            Some(entry) => read_u64_array(reader, header, entry)?,
            None => return Err(TiffError::MissingTag(offsets_tag.name())),
        };
        let byte_counts = match ifd.get_entry_by_tag(counts_tag) {
            Some(entry) => read_u64_array(reader, header, entry)?,
            None => return Err(TiffError::MissingTag(counts_tag.name())),
        };

        let samples_per_pixel = ifd.get_u32(TiffTag::SamplesPerPixel, bo).unwrap_or(1) as u16;
        let bits = match ifd.get_entry_by_tag(TiffTag::BitsPerSample) {
            Some(entry) => read_u64_array(reader, header, entry)?,
            None => Vec::new(),
        };
        let bits_per_sample = match bits.split_first() {
            None => 8,
            Some((first, rest)) if rest.iter().all(|b| b == first) => *first as u16,
            Some(_) => 0,
        };

        let image = TiffImage {
            ifd_index,
            width,
            height,
            layout,
            compression: Compression::from_u16(
                ifd.get_u32(TiffTag::Compression, bo).unwrap_or(1) as u16,
            ),
            samples_per_pixel,
            bits_per_sample,
            planar_configuration: ifd
                .get_u32(TiffTag::PlanarConfiguration, bo)
                .unwrap_or(1) as u16,
            photometric: ifd
                .get_u32(TiffTag::PhotometricInterpretation, bo)
                .unwrap_or(if samples_per_pixel < 3 { 1 } else { 2 }) as u16,
            offsets,
            byte_counts,
            jpeg_tables: ifd
                .get_entry_by_tag(TiffTag::JpegTables)
                .map(|entry| read_entry_bytes(reader, header, entry))
                .transpose()?,
            description: ifd
                .get_entry_by_tag(TiffTag::ImageDescription)
                .and_then(|entry| read_ascii(reader, header, entry).ok()),
        };

        if image.offsets.len() < image.chunk_count() || image.byte_counts.len() < image.chunk_count()
        {
            return Err(TiffError::InvalidTagValue {
                tag: offsets_tag.name(),
                message: format!(
                    "expected {} chunks, found {} offsets and {} byte counts",
                    image.chunk_count(),
                    image.offsets.len(),
                    image.byte_counts.len()
                ),
            });
        }

        Ok(Some(image))
    }

    pub fn is_tiled(&self) -> bool {
        matches!(self.layout, Layout::Tiled { .. })
    }

    /// Number of tiles or strips the layout implies.
    pub fn chunk_count(&self) -> usize {
        match self.layout {
            Layout::Tiled {
                tiles_x, tiles_y, ..
            } => tiles_x as usize * tiles_y as usize,
            Layout::Stripped { rows_per_strip } => self.height.div_ceil(rows_per_strip) as usize,
        }
    }

    /// Pixel grid covered by the stored chunks, which may exceed the image.
    pub fn padded_dimensions(&self) -> (u32, u32) {
        match self.layout {
            Layout::Tiled {
                tile_width,
                tile_height,
                tiles_x,
                tiles_y,
            } => (tiles_x * tile_width, tiles_y * tile_height),
            Layout::Stripped { rows_per_strip } => (
                self.width,
                self.height.div_ceil(rows_per_strip) * rows_per_strip,
            ),
        }
    }

    /// Offset and length of a chunk, or `None` when out of range or empty.
    pub fn chunk_location(&self, index: usize) -> Option<(u64, u64)> {
        let offset = *self.offsets.get(index)?;
        let len = *self.byte_counts.get(index)?;
        (offset != 0 && len != 0).then_some((offset, len))
    }

    /// Row-major tile index.
    pub fn tile_index(&self, tile_x: u32, tile_y: u32) -> Option<usize> {
        match self.layout {
            Layout::Tiled {
                tiles_x, tiles_y, ..
            } if tile_x < tiles_x && tile_y < tiles_y => {
                Some(tile_y as usize * tiles_x as usize + tile_x as usize)
            }
            _ => None,
        }
    }

    fn description_mentions(&self, word: &str) -> bool {
        self.description
            .as_deref()
            .map(|d| d.to_ascii_lowercase().contains(word))
            .unwrap_or(false)
    }

    fn associated_kind(&self) -> Option<AssociatedKind> {
        if self.description_mentions("label") {
            Some(AssociatedKind::Label)
        } else if self.description_mentions("macro") {
            Some(AssociatedKind::Macro)
        } else if self.description_mentions("thumbnail") {
            Some(AssociatedKind::Thumbnail)
        } else {
            None
        }
    }
}

// =============================================================================
// TiffPyramid
// =============================================================================

/// A pyramid level with its downsample relative to level 0.
#[derive(Debug, Clone)]
pub struct TiffLevel {
    pub image: TiffImage,
    pub downsample: f64,
}

/// An associated image found next to the pyramid.
#[derive(Debug, Clone)]
pub struct TiffAssociated {
    pub kind: AssociatedKind,
    pub image: TiffImage,
}

/// One biomarker of a multiplexed QPTIFF with its own level chain.
#[derive(Debug, Clone)]
pub struct TiffChannel {
    pub name: String,
    pub levels: Vec<TiffLevel>,
}

/// Parsed TIFF pyramid with levels sorted from full resolution down.
#[derive(Debug, Clone)]
pub struct TiffPyramid {
    pub header: TiffHeader,
    /// Levels of the slide; for QPTIFF those of the first channel
    pub levels: Vec<TiffLevel>,
    /// Biomarker channels, empty outside QPTIFF
    pub channels: Vec<TiffChannel>,
    pub associated: Vec<TiffAssociated>,
    /// ImageDescription of the first IFD
    pub description: Option<String>,
}

impl TiffPyramid {
    /// Parse every IFD and split it into levels and associated images.
    ///
    /// `first_stripped_is_thumbnail` enables the Aperio convention where the
    /// second IFD is an untiled thumbnail without a description keyword.
    pub fn parse<R: RangeReader + ?Sized>(
        reader: &R,
        first_stripped_is_thumbnail: bool,
    ) -> Result<Self, TiffError> {
        let (header, images, description) = Self::read_images(reader)?;

        let mut candidates = Vec::new();
        let mut associated = Vec::new();
        for image in images {
            if let Some(kind) = image.associated_kind() {
                associated.push(TiffAssociated { kind, image });
            } else if image.is_tiled() {
                candidates.push(image);
            } else if first_stripped_is_thumbnail && image.ifd_index == 1 {
                associated.push(TiffAssociated {
                    kind: AssociatedKind::Thumbnail,
                    image,
                });
            } else {
                debug!(ifd = image.ifd_index, "skipping untiled IFD");
            }
        }

        let levels = Self::order_levels(candidates);
        if levels.is_empty() {
            return Err(TiffError::NoPyramid);
        }

        Ok(TiffPyramid {
            header,
            levels,
            channels: Vec::new(),
            associated,
            description,
        })
    }

    /// Parse a QPTIFF, grouping same-sized pages into biomarker channels.
    ///
    /// Page roles come from the XML `ImageType`; pages without XML fall back
    /// to description keywords. Channel `k` takes the page named like the
    /// `k`-th full-resolution page at each size, else the `k`-th page of
    /// that size.
    pub fn parse_qptiff<R: RangeReader + ?Sized>(reader: &R) -> Result<Self, TiffError> {
        let (header, images, description) = Self::read_images(reader)?;

        let mut candidates = Vec::new();
        let mut associated = Vec::new();
        for image in images {
            let page = image.description.as_deref().and_then(QptiffPage::parse);
            let kind = match &page {
                Some(page) => page.image_type.and_then(QptiffImageType::associated_kind),
                None => image.associated_kind(),
            };
            if let Some(kind) = kind {
                associated.push(TiffAssociated { kind, image });
            } else if image.is_tiled() {
                candidates.push((page.and_then(|p| p.biomarker), image));
            } else {
                debug!(ifd = image.ifd_index, "skipping untiled IFD");
            }
        }

        let channels = Self::group_channels(candidates);
        let levels = match channels.first() {
            Some(first) if !first.levels.is_empty() => first.levels.clone(),
            _ => return Err(TiffError::NoPyramid),
        };
        debug!(
            channels = channels.len(),
            levels = levels.len(),
            "grouped QPTIFF channels"
        );

        Ok(TiffPyramid {
            header,
            levels,
            channels,
            associated,
            description,
        })
    }

    fn read_images<R: RangeReader + ?Sized>(
        reader: &R,
    ) -> Result<(TiffHeader, Vec<TiffImage>, Option<String>), TiffError> {
        let header = TiffHeader::read(reader)?;
        let ifds = Ifd::read_chain(reader, &header)?;

        let description = ifds
            .first()
            .and_then(|ifd| ifd.get_entry_by_tag(TiffTag::ImageDescription))
            .and_then(|entry| read_ascii(reader, &header, entry).ok());

        let mut images = Vec::with_capacity(ifds.len());
        for (index, ifd) in ifds.iter().enumerate() {
            if let Some(image) = TiffImage::from_ifd(reader, &header, ifd, index)? {
                images.push(image);
            }
        }
        Ok((header, images, description))
    }

    fn group_channels(mut candidates: Vec<(Option<String>, TiffImage)>) -> Vec<TiffChannel> {
        // Stable: pages of one size keep their file order
        candidates.sort_by_key(|(_, img)| std::cmp::Reverse(img.width as u64 * img.height as u64));

        let mut groups: Vec<Vec<(Option<String>, TiffImage)>> = Vec::new();
        for candidate in candidates {
            let size = (candidate.1.width, candidate.1.height);
            match groups.last_mut() {
                Some(group) if (group[0].1.width, group[0].1.height) == size => group.push(candidate),
                _ => groups.push(vec![candidate]),
            }
        }
        let Some(full) = groups.first() else {
            return Vec::new();
        };

        let names: Vec<Option<String>> = full.iter().map(|(name, _)| name.clone()).collect();
        names
            .iter()
            .enumerate()
            .map(|(k, name)| {
                let images = groups
                    .iter()
                    .filter_map(|group| {
                        let by_name = name
                            .as_ref()
                            .and_then(|n| group.iter().find(|(m, _)| m.as_ref() == Some(n)));
                        by_name.or_else(|| group.get(k)).map(|(_, img)| img.clone())
                    })
                    .collect();
                TiffChannel {
                    name: name.clone().unwrap_or_else(|| format!("Channel {}", k + 1)),
                    levels: Self::order_levels(images),
                }
            })
            .collect()
    }

    /// Sort by area and keep a strictly decreasing, isotropic chain.
    fn order_levels(mut candidates: Vec<TiffImage>) -> Vec<TiffLevel> {
        candidates.sort_by_key(|img| std::cmp::Reverse(img.width as u64 * img.height as u64));

        let mut levels: Vec<TiffLevel> = Vec::with_capacity(candidates.len());
        let Some(base) = candidates.first() else {
            return levels;
        };
        let (base_w, base_h) = (base.width as f64, base.height as f64);

        for image in candidates {
            let ds_x = base_w / image.width as f64;
            let ds_y = base_h / image.height as f64;
            let downsample = (ds_x + ds_y) / 2.0;

            let small = image.width.min(image.height) < SMALL_LEVEL_DIMENSION;
            if !small && (ds_x - ds_y).abs() / ds_x.max(ds_y) > MAX_ANISOTROPY {
                debug!(ifd = image.ifd_index, ds_x, ds_y, "skipping anisotropic IFD");
                continue;
            }
            if let Some(prev) = levels.last() {
                if downsample <= prev.downsample {
                    debug!(ifd = image.ifd_index, downsample, "skipping duplicate level");
                    continue;
                }
            }
            levels.push(TiffLevel { image, downsample });
        }

        // Level 0 is exactly 1.0 by definition
        if let Some(first) = levels.first_mut() {
            first.downsample = 1.0;
        }
        levels
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.header.byte_order
    }

    pub fn channel(&self, name: &str) -> Option<&TiffChannel> {
        self.channels.iter().find(|c| c.name == name)
    }

    pub fn associated(&self, kind: AssociatedKind) -> Option<&TiffImage> {
        self.associated
            .iter()
            .find(|a| a.kind == kind)
            .map(|a| &a.image)
    }
}
