//! DeepZoom tiling and tile encoding.
//!
//! This module synthesizes a power-of-two DeepZoom pyramid over any open
//! slide and turns its tiles into cached JPEG or PNG bytes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          CLI / embedding code           │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              Tile Service               │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │  TileCache   │  │  TileEncoder    │  │
//! │  │  (encoded    │  │  (RGBA →        │  │
//! │  │   tiles)     │  │   JPEG / PNG)   │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │           DeepZoomGenerator             │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │                 Slide                   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`DeepZoomGenerator`]: tile grid, tile bounds and tile pixels per DZ level
//! - [`TileService`]: validation, caching and encoding around the generator
//! - [`TileCache`]: LRU cache for encoded tiles with size-based eviction
//! - [`TileEncoder`]: RGBA pixel buffers to JPEG or PNG
//! - [`dzi`]: DZI manifest, tile paths and level arithmetic
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use wsi_pyramid::slide::Slide;
//! use wsi_pyramid::tile::{DeepZoomGenerator, TileFormat, TileRequest, TileService};
//!
//! let slide = Arc::new(Slide::open("sample.svs")?);
//! let dz = DeepZoomGenerator::new(slide, 254, 1)?;
//! println!("{}", dz.get_dzi(TileFormat::Jpeg));
//!
//! let service = TileService::new();
//! let tile = service.get_tile(&dz, &TileRequest::from_path("12/3_5.jpeg", 80)?)?;
//! ```

mod cache;
mod deepzoom;
pub mod dzi;
mod encoder;
mod service;

pub use cache::{TileCache, TileCacheKey, DEFAULT_TILE_CACHE_CAPACITY};
pub use deepzoom::{
    DeepZoomDescriptor, DeepZoomGenerator, TileBounds, DEFAULT_OVERLAP, DEFAULT_TILE_SIZE,
};
pub use dzi::{generate_dzi_xml, parse_tile_path, TilePath};
pub use encoder::{
    clamp_quality, is_valid_quality, TileEncoder, TileFormat, DEFAULT_JPEG_QUALITY,
    MAX_JPEG_QUALITY, MIN_JPEG_QUALITY,
};
pub use service::{TileRequest, TileResponse, TileService};
