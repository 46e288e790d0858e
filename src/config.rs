//! Configuration for the slide reader and its command-line front end.
//!
//! Library callers build an [`OpenOptions`] directly. The binary parses a
//! [`Cli`] from arguments and `WSI_`-prefixed environment variables and
//! converts it with [`Cli::open_options`]:
//!
//! - `WSI_BLOCK_SIZE` - Block size for the file block cache (default: 256 KiB)
//! - `WSI_CACHE_BLOCKS` - Blocks cached per open slide (default: 100)
//! - `WSI_TILE_SIZE` - DeepZoom tile edge (default: 254)
//! - `WSI_OVERLAP` - DeepZoom tile overlap (default: 1)
//! - `WSI_JPEG_QUALITY` - JPEG quality for encoded output (default: 80)
//! - `WSI_BACKGROUND` - Fill color outside the slide, hex RGB (default: backend's, else white)
//! - `WSI_TIMEOUT_SECS` - Per-operation timeout (default: none)
//! - `WSI_SDK_DIRS` - Vendor decoder library directories, `kind=path` comma separated
//! - `WSI_LUT_DIR` - Directory holding `real.lut` / `real2.lut` color presets
//! - `WSI_COLOR_STYLE` - Color correction preset to apply (`real` or `gorgeous`)
//! - `WSI_LIMIT_BOUNDS` - Tile only the scanned content bounds (default: false)
//!
//! Vendor library locations travel inside `OpenOptions`; nothing here
//! touches process-wide state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::{Parser, Subcommand};

use crate::color::ColorStyle;
use crate::format::BackendKind;
use crate::io::{DEFAULT_BLOCK_CACHE_CAPACITY, DEFAULT_BLOCK_SIZE};
use crate::tile::{TileFormat, DEFAULT_JPEG_QUALITY, DEFAULT_OVERLAP, DEFAULT_TILE_SIZE};

// =============================================================================
// Library Options
// =============================================================================

/// Vendor decoder library directory per backend kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SdkPaths(BTreeMap<BackendKind, PathBuf>);

impl SdkPaths {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: BackendKind, dir: impl Into<PathBuf>) -> &mut Self {
        self.0.insert(kind, dir.into());
        self
    }

    pub fn get(&self, kind: BackendKind) -> Option<&Path> {
        self.0.get(&kind).map(PathBuf::as_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (BackendKind, &Path)> {
        self.0.iter().map(|(k, p)| (*k, p.as_path()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One `kind=path` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkDir {
    pub kind: BackendKind,
    pub path: PathBuf,
}

impl FromStr for SdkDir {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, path) = s
            .split_once('=')
            .ok_or_else(|| format!("expected KIND=PATH, got '{s}'"))?;
        let kind = BackendKind::from_name(kind)
            .ok_or_else(|| format!("unknown backend kind '{}'", kind.trim()))?;
        if !kind.requires_sdk() {
            return Err(format!("backend '{kind}' is built in and takes no SDK directory"));
        }
        let path = path.trim();
        if path.is_empty() {
            return Err(format!("empty SDK directory for '{kind}'"));
        }
        Ok(SdkDir {
            kind,
            path: PathBuf::from(path),
        })
    }
}

/// Settings applied when opening a slide.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenOptions {
    /// Block size of the file block cache
    pub block_size: usize,
    /// Blocks kept per open slide
    pub cache_blocks: usize,
    /// Fill color overriding the backend's background
    pub background: Option<[u8; 4]>,
    pub sdk_paths: SdkPaths,
    /// Where color correction presets are looked up
    pub lut_dir: Option<PathBuf>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            block_size: DEFAULT_BLOCK_SIZE,
            cache_blocks: DEFAULT_BLOCK_CACHE_CAPACITY,
            background: None,
            sdk_paths: SdkPaths::new(),
            lut_dir: None,
        }
    }
}

/// Parse `rrggbb` or `#rrggbb` into an opaque RGBA color.
pub fn parse_hex_color(s: &str) -> Result<[u8; 4], String> {
    let hex = s.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("expected a 6-digit hex color, got '{s}'"));
    }
    let channel = |i: usize| {
        u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| format!("bad color '{s}': {e}"))
    };
    Ok([channel(0)?, channel(2)?, channel(4)?, 255])
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// Inspect whole slide images and export regions, thumbnails and DeepZoom
/// tiles.
#[derive(Parser, Debug, Clone)]
#[command(name = "wsi-pyramid")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    // =========================================================================
    // I/O
    // =========================================================================
    /// Block size in bytes for the file block cache.
    #[arg(long, global = true, default_value_t = DEFAULT_BLOCK_SIZE, env = "WSI_BLOCK_SIZE")]
    pub block_size: usize,

    /// Maximum number of blocks cached per open slide.
    #[arg(long, global = true, default_value_t = DEFAULT_BLOCK_CACHE_CAPACITY, env = "WSI_CACHE_BLOCKS")]
    pub cache_blocks: usize,

    /// Vendor decoder library directory as KIND=PATH (repeatable).
    #[arg(long = "sdk-dir", global = true, env = "WSI_SDK_DIRS", value_delimiter = ',')]
    pub sdk_dirs: Vec<String>,

    /// Per-operation timeout in seconds.
    #[arg(long, global = true, env = "WSI_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    // =========================================================================
    // Output
    // =========================================================================
    /// DeepZoom tile edge in pixels.
    #[arg(long, global = true, default_value_t = DEFAULT_TILE_SIZE, env = "WSI_TILE_SIZE")]
    pub tile_size: u32,

    /// DeepZoom tile overlap in pixels.
    #[arg(long, global = true, default_value_t = DEFAULT_OVERLAP, env = "WSI_OVERLAP")]
    pub overlap: u32,

    /// JPEG quality for encoded output (1-100).
    #[arg(long, global = true, default_value_t = DEFAULT_JPEG_QUALITY, env = "WSI_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    /// Fill color for areas outside the slide, as hex RGB.
    #[arg(long, global = true, env = "WSI_BACKGROUND")]
    pub background: Option<String>,

    /// Tile only the scanned content bounds when the slide reports them.
    #[arg(long, global = true, default_value_t = false, env = "WSI_LIMIT_BOUNDS")]
    pub limit_bounds: bool,

    // =========================================================================
    // Color
    // =========================================================================
    /// Directory holding the color correction LUT presets.
    #[arg(long, global = true, env = "WSI_LUT_DIR")]
    pub lut_dir: Option<PathBuf>,

    /// Color correction preset applied to pixel reads (real, gorgeous).
    #[arg(long, global = true, env = "WSI_COLOR_STYLE")]
    pub color_style: Option<ColorStyle>,

    // =========================================================================
    // Logging
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print format, geometry and properties as JSON.
    Info {
        slide: PathBuf,
    },

    /// Export a region; location is in level-0 pixels, size in level pixels.
    Region {
        slide: PathBuf,
        #[arg(long, allow_negative_numbers = true)]
        x: i64,
        #[arg(long, allow_negative_numbers = true)]
        y: i64,
        #[arg(long, default_value_t = 0)]
        level: u32,
        #[arg(long)]
        width: u32,
        #[arg(long)]
        height: u32,
        /// Read one QPTIFF biomarker channel instead of the default view
        #[arg(long)]
        biomarker: Option<String>,
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Export a thumbnail fitting in the given box.
    Thumbnail {
        slide: PathBuf,
        #[arg(long, default_value_t = 512)]
        max_width: u32,
        #[arg(long, default_value_t = 512)]
        max_height: u32,
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print the DeepZoom (.dzi) manifest.
    Dzi {
        slide: PathBuf,
        #[arg(long, default_value = "jpeg")]
        format: TileFormat,
    },

    /// Export one DeepZoom tile addressed as LEVEL/COL_ROW.EXT.
    Tile {
        slide: PathBuf,
        /// Tile path, e.g. "12/3_5.jpeg"
        path: String,
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Export an associated image (thumbnail, label, macro, navigate).
    Associated {
        slide: PathBuf,
        name: String,
        #[arg(short, long)]
        output: PathBuf,
    },
}

impl Cli {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_blocks == 0 {
            return Err("cache_blocks must be greater than 0".to_string());
        }
        if self.block_size < 1024 || self.block_size > 16 * 1024 * 1024 {
            return Err("block_size must be between 1KB and 16MB".to_string());
        }
        if self.tile_size == 0 {
            return Err("tile_size must be greater than 0".to_string());
        }
        if self.overlap >= self.tile_size {
            return Err("overlap must be smaller than tile_size".to_string());
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }
        if self.timeout_secs == Some(0) {
            return Err("timeout_secs must be greater than 0".to_string());
        }
        if let Some(bg) = &self.background {
            parse_hex_color(bg)?;
        }
        for entry in &self.sdk_dirs {
            entry.parse::<SdkDir>()?;
        }
        Ok(())
    }

    /// Library options described by these arguments.
    pub fn open_options(&self) -> Result<OpenOptions, String> {
        let mut sdk_paths = SdkPaths::new();
        for entry in &self.sdk_dirs {
            let dir: SdkDir = entry.parse()?;
            sdk_paths.insert(dir.kind, dir.path);
        }
        Ok(OpenOptions {
            block_size: self.block_size,
            cache_blocks: self.cache_blocks,
            background: self.background.as_deref().map(parse_hex_color).transpose()?,
            sdk_paths,
            lut_dir: self.lut_dir.clone(),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
