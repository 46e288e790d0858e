//! Slide abstraction layer.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │                 Slide                   │
//! │  (consumer API, properties, lifetime)   │
//! └──────────┬─────────────────┬────────────┘
//!            │                 │
//!            ▼                 ▼
//! ┌───────────────────┐  ┌─────────────────────┐
//! │   RegionReader    │  │    PyramidModel     │
//! │ (regions, thumbs) │─▶│ (levels, best level)│
//! └─────────┬─────────┘  └─────────────────────┘
//!           │
//!           ▼
//! ┌─────────────────────────────────────────┐
//! │            ResourceManager              │
//! │  (exclusive lock, closed / poisoned)    │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//!            Box<dyn SlideBackend>
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use wsi_pyramid::slide::Slide;
//!
//! let slide = Slide::open("CMU-1.svs")?;
//! let (w, h) = slide.dimensions()?;
//! let region = slide.read_region((w as i64 / 2, h as i64 / 2), 0, (512, 512))?;
//! let thumb = slide.get_thumbnail((1024, 1024))?;
//! slide.close();
//! ```

mod handle;
mod manager;
mod pyramid;
mod region;

pub use handle::{Slide, SlideInfo, SYNTHESIZED_THUMBNAIL_SIZE};
pub use manager::ResourceManager;
pub use pyramid::{PyramidLevel, PyramidModel};
pub use region::{Region, RegionReader};
