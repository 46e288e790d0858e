//! Tile Service for producing encoded DeepZoom tiles.
//!
//! The TileService is the entry point for encoded tile requests. It
//! orchestrates:
//! - Request validation
//! - Cache lookups
//! - Tile rendering via [`DeepZoomGenerator`]
//! - JPEG/PNG encoding
//! - Result caching
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         TileService                             │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │                    get_tile()                           │    │
//! │  │  1. Validate params   3. Render tile from slide         │    │
//! │  │  2. Check cache       4. Encode, cache & return         │    │
//! │  └─────────────────────────────────────────────────────────┘    │
//! │           │                    │                    │           │
//! │           ▼                    ▼                    ▼           │
//! │    ┌───────────┐   ┌───────────────────┐   ┌─────────────┐      │
//! │    │ TileCache │   │ DeepZoomGenerator │   │ TileEncoder │      │
//! │    └───────────┘   └───────────────────┘   └─────────────┘      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use bytes::Bytes;
use tracing::debug;

use crate::error::TileError;
use crate::slide::Slide;

use super::cache::{TileCache, TileCacheKey};
use super::deepzoom::DeepZoomGenerator;
use super::dzi::parse_tile_path;
use super::encoder::{is_valid_quality, TileEncoder, TileFormat, DEFAULT_JPEG_QUALITY};

// =============================================================================
// Tile Request
// =============================================================================

/// A request for one DeepZoom tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRequest {
    /// DeepZoom level (0 = 1x1 root)
    pub level: u32,

    /// Tile column (0-indexed from left)
    pub col: u32,

    /// Tile row (0-indexed from top)
    pub row: u32,

    pub format: TileFormat,

    /// JPEG quality (1-100, defaults to 80)
    pub quality: u8,
}

impl TileRequest {
    /// JPEG tile at the default quality.
    pub fn new(level: u32, col: u32, row: u32) -> Self {
        Self {
            level,
            col,
            row,
            format: TileFormat::Jpeg,
            quality: DEFAULT_JPEG_QUALITY,
        }
    }

    pub fn with_format(mut self, format: TileFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    /// Request for a `level/col_row.ext` path.
    pub fn from_path(path: &str, quality: u8) -> Result<Self, TileError> {
        let parsed = parse_tile_path(path)?;
        Ok(Self::new(parsed.level, parsed.col, parsed.row)
            .with_format(parsed.format)
            .with_quality(quality))
    }
}

// =============================================================================
// Tile Response
// =============================================================================

#[derive(Debug, Clone)]
pub struct TileResponse {
    /// The encoded tile
    pub data: Bytes,

    /// Whether this tile was served from cache
    pub cache_hit: bool,

    pub format: TileFormat,
}

// =============================================================================
// Tile Service
// =============================================================================

/// Service for rendering, encoding and caching tiles.
///
/// One service can serve tiles for any number of slides; cache entries are
/// keyed by the slide's path.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use wsi_pyramid::tile::{DeepZoomGenerator, TileRequest, TileService};
///
/// let dz = DeepZoomGenerator::new(Arc::new(slide), 254, 1)?;
/// let service = TileService::new();
///
/// let response = service.get_tile(&dz, &TileRequest::new(12, 3, 5))?;
/// println!("{} bytes, cache hit: {}", response.data.len(), response.cache_hit);
/// ```
#[derive(Debug, Default)]
pub struct TileService {
    cache: TileCache,
    encoder: TileEncoder,
}

impl TileService {
    /// Create a new tile service with default cache settings (100MB).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new tile service with custom cache capacity in bytes.
    pub fn with_cache_capacity(cache_capacity: usize) -> Self {
        Self {
            cache: TileCache::with_capacity(cache_capacity),
            encoder: TileEncoder::new(),
        }
    }

    fn slide_id(slide: &Slide) -> String {
        slide.path().to_string_lossy().into_owned()
    }

    /// Get a tile, using cache when available.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The quality is outside 1-100 for a JPEG tile
    /// - The level or tile coordinates are out of range
    /// - The slide read fails or the slide is closed
    /// - Encoding fails
    pub fn get_tile(
        &self,
        dz: &DeepZoomGenerator,
        request: &TileRequest,
    ) -> Result<TileResponse, TileError> {
        if request.format == TileFormat::Jpeg && !is_valid_quality(request.quality) {
            return Err(TileError::InvalidQuality(request.quality));
        }

        let cache_key = TileCacheKey::new(
            Self::slide_id(dz.slide()),
            request.level,
            request.col,
            request.row,
            request.format,
            request.quality,
        );

        if let Some(data) = self.cache.get(&cache_key) {
            return Ok(TileResponse {
                data,
                cache_hit: true,
                format: request.format,
            });
        }

        let data = self.generate_tile(dz, request)?;
        self.cache.put(cache_key, data.clone());

        Ok(TileResponse {
            data,
            cache_hit: false,
            format: request.format,
        })
    }

    /// Render and encode a tile without touching the cache.
    pub fn generate_tile(
        &self,
        dz: &DeepZoomGenerator,
        request: &TileRequest,
    ) -> Result<Bytes, TileError> {
        let pixels = dz.get_tile(request.level, request.col, request.row)?;
        let data = self.encoder.encode(&pixels, request.format, request.quality)?;
        debug!(
            level = request.level,
            col = request.col,
            row = request.row,
            format = %request.format,
            bytes = data.len(),
            "encoded tile"
        );
        Ok(data)
    }

    /// Encode a whole-slide thumbnail fitting in `max_size`.
    pub fn thumbnail(
        &self,
        slide: &Slide,
        max_size: (u32, u32),
        format: TileFormat,
        quality: u8,
    ) -> Result<Bytes, TileError> {
        if format == TileFormat::Jpeg && !is_valid_quality(quality) {
            return Err(TileError::InvalidQuality(quality));
        }
        let pixels = slide.get_thumbnail(max_size)?;
        self.encoder.encode(&pixels, format, quality)
    }

    /// Get tile cache statistics.
    ///
    /// Returns `(current_size, capacity, entry_count)`.
    pub fn cache_stats(&self) -> (usize, usize, usize) {
        (self.cache.size(), self.cache.capacity(), self.cache.len())
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Drop cached tiles of one slide. Returns how many were removed.
    pub fn invalidate_slide(&self, slide: &Slide) -> usize {
        self.cache.remove_slide(&Self::slide_id(slide))
    }
}
