//! # WSI Pyramid
//!
//! One pyramid-image abstraction over whole slide images stored in
//! mutually incompatible vendor formats.
//!
//! A slide is opened through the backend matching its format; its levels
//! are normalized into a canonical [`slide::PyramidModel`]; region and
//! thumbnail requests are answered pixel-exact; and a power-of-two DeepZoom
//! grid is synthesized on top of whatever native levels the file has.
//!
//! ## Features
//!
//! - **Format detection**: by extension, confirmed by magic bytes
//! - **Built-in backends**: pure-Rust tiled TIFF (generic, Aperio SVS,
//!   Ventana BIF, QPTIFF) and TMAP readers on a block-cached file reader
//! - **Vendor decoders**: pluggable native decoders behind one adapter
//! - **Exact reads**: out-of-bounds areas are filled, sizes always match
//! - **DeepZoom**: seam-exact tiles, DZI manifests, encoded tile caching
//!
//! ## Architecture
//!
//! - [`io`] - Synchronous range reads with LRU block caching
//! - [`mod@format`] - Format detection and container parsers
//! - [`backend`] - The backend contract and its implementations
//! - [`color`] - Vendor LUT color correction
//! - [`slide`] - Slide handle, pyramid model, region reader, lifetime
//! - [`tile`] - DeepZoom generator, encoder, tile cache and service
//! - [`worker`] - Blocking calls with an external timeout
//! - [`config`] - Open options and CLI types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wsi_pyramid::{DeepZoomGenerator, Slide, TileFormat};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let slide = Arc::new(Slide::open("CMU-1.svs")?);
//!     let thumb = slide.get_thumbnail((512, 512))?;
//!     println!("thumbnail is {:?}", thumb.dimensions());
//!
//!     let dz = DeepZoomGenerator::new(Arc::clone(&slide), 254, 1)?;
//!     println!("{}", dz.get_dzi(TileFormat::Jpeg));
//!     let tile = dz.get_tile(dz.max_level(), 0, 0)?;
//!     println!("first tile is {:?}", tile.dimensions());
//!
//!     slide.close();
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod color;
pub mod config;
pub mod error;
pub mod format;
pub mod io;
pub mod pixel;
pub mod slide;
pub mod tile;
pub mod worker;

// Re-export commonly used types
pub use backend::{BackendRegistry, SlideBackend};
pub use color::{ColorCorrection, ColorStyle};
pub use config::{OpenOptions, SdkPaths};
pub use error::{ColorError, IoError, SlideError, TiffError, TileError, TmapError};
pub use format::{detect_format, AssociatedKind, BackendKind};
pub use io::{BlockCache, FileRangeReader, RangeReader};
pub use pixel::PixelBuffer;
pub use slide::{PyramidLevel, PyramidModel, Region, RegionReader, ResourceManager, Slide, SlideInfo};
pub use tile::{
    DeepZoomDescriptor, DeepZoomGenerator, TileBounds, TileCache, TileEncoder, TileFormat,
    TileRequest, TileResponse, TileService,
};
pub use worker::run_with_timeout;
