//! Tile encoder.
//!
//! Turns RGBA pixel buffers into JPEG or PNG bytes.
//!
//! # Design Decisions
//!
//! - **Alpha**: JPEG has no alpha channel, so it is dropped before encoding.
//!   PNG keeps all four channels.
//!
//! - **Quality control**: JPEG quality is configurable per request. PNG
//!   ignores it.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};

use crate::error::TileError;
use crate::pixel::{PixelBuffer, CHANNELS};

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

// =============================================================================
// Tile Format
// =============================================================================

/// Output image format of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TileFormat {
    #[default]
    Jpeg,
    Png,
}

impl TileFormat {
    /// File extension, also used as the DZI `Format` attribute.
    pub const fn extension(self) -> &'static str {
        match self {
            TileFormat::Jpeg => "jpeg",
            TileFormat::Png => "png",
        }
    }

    pub const fn mime_type(self) -> &'static str {
        match self {
            TileFormat::Jpeg => "image/jpeg",
            TileFormat::Png => "image/png",
        }
    }
}

impl fmt::Display for TileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for TileFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(TileFormat::Jpeg),
            "png" => Ok(TileFormat::Png),
            other => Err(format!("unknown tile format '{other}' (expected jpeg or png)")),
        }
    }
}

// =============================================================================
// Encoder
// =============================================================================

/// Encodes pixel buffers to compressed tile bytes.
///
/// # Example
///
/// ```ignore
/// use wsi_pyramid::tile::{TileEncoder, TileFormat};
///
/// let encoder = TileEncoder::new();
/// let jpeg = encoder.encode(&pixels, TileFormat::Jpeg, 85)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct TileEncoder {}

impl TileEncoder {
    pub fn new() -> Self {
        Self {}
    }

    /// Encode `pixels` in `format`. `quality` is clamped to 1-100.
    ///
    /// # Errors
    /// `TileError::Encode` when the codec fails or the buffer is empty.
    pub fn encode(
        &self,
        pixels: &PixelBuffer,
        format: TileFormat,
        quality: u8,
    ) -> Result<Bytes, TileError> {
        let (width, height) = pixels.dimensions();
        if width == 0 || height == 0 {
            return Err(TileError::Encode {
                message: format!("cannot encode an empty {width}x{height} image"),
            });
        }

        let mut output = Vec::new();
        let result = match format {
            TileFormat::Jpeg => {
                let rgb = drop_alpha(pixels.as_bytes());
                JpegEncoder::new_with_quality(&mut output, clamp_quality(quality)).encode(
                    &rgb,
                    width,
                    height,
                    ExtendedColorType::Rgb8,
                )
            }
            TileFormat::Png => PngEncoder::new(&mut output).write_image(
                pixels.as_bytes(),
                width,
                height,
                ExtendedColorType::Rgba8,
            ),
        };
        result.map_err(|e| TileError::Encode {
            message: format!("{format} encoding failed: {e}"),
        })?;

        Ok(Bytes::from(output))
    }

    /// Encode as JPEG at the default quality.
    pub fn encode_default(&self, pixels: &PixelBuffer) -> Result<Bytes, TileError> {
        self.encode(pixels, TileFormat::Jpeg, DEFAULT_JPEG_QUALITY)
    }
}

fn drop_alpha(rgba: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(rgba.len() / CHANNELS * 3);
    for px in rgba.chunks_exact(CHANNELS) {
        rgb.extend_from_slice(&px[..3]);
    }
    rgb
}

/// Check if a quality value is valid (1-100).
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Clamp a quality value to the valid range (1-100).
///
/// Values below 1 become 1, values above 100 become 100.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}

// =============================================================================
// Tests
// =============================================================================
