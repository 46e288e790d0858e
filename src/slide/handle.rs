//! The consumer-facing slide handle.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::Serialize;
use tracing::debug;

use crate::backend::{BackendRegistry, SlideBackend};
use crate::color::{ColorCorrection, ColorStyle};
use crate::error::SlideError;
use crate::format::{AssociatedKind, BackendKind};
use crate::pixel::{PixelBuffer, WHITE};

use super::manager::ResourceManager;
use super::pyramid::{PyramidLevel, PyramidModel};
use super::region::{Region, RegionReader};

/// Box used when a thumbnail has to be synthesized from the pyramid.
pub const SYNTHESIZED_THUMBNAIL_SIZE: u32 = 512;

/// Formats whose vendors ship color correction LUTs. DYQX and MDSX open
/// as their SDPC and MDS siblings.
pub const COLOR_CORRECTED_KINDS: [BackendKind; 5] = [
    BackendKind::Sdpc,
    BackendKind::Dyj,
    BackendKind::Kfb,
    BackendKind::Mds,
    BackendKind::Tmap,
];

/// Properties consulted for the objective magnification, in order.
const MAGNIFICATION_KEYS: [&str; 4] = [
    "tmap.scan_scale",
    "openslide.objective-power",
    "sdpc.magnification",
    "ventana.Magnification",
];

/// Summary of an open slide, as printed by `wsi-pyramid info`.
#[derive(Debug, Clone, Serialize)]
pub struct SlideInfo {
    pub path: PathBuf,
    pub format: BackendKind,
    pub vendor: Option<String>,
    pub width: u32,
    pub height: u32,
    pub levels: Vec<PyramidLevel>,
    pub mpp: Option<f64>,
    pub magnification: Option<f64>,
    pub associated_images: Vec<AssociatedKind>,
    pub properties: BTreeMap<String, String>,
}

/// An open whole slide image.
///
/// Geometry comes from an immutable [`PyramidModel`]; pixel reads go through
/// one exclusively owned backend handle. Every method fails with
/// `HandleClosed` after [`close`](Slide::close).
#[derive(Debug)]
pub struct Slide {
    path: PathBuf,
    model: PyramidModel,
    manager: ResourceManager,
    properties: BTreeMap<String, String>,
    background: [u8; 4],
    channels: Vec<String>,
    lut_dir: Option<PathBuf>,
    /// Active color correction, applied to every pyramid read
    color: RwLock<Option<ColorCorrection>>,
}

impl Slide {
    /// Open a slide with the built-in backends and default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SlideError> {
        Self::open_with(path, &BackendRegistry::default())
    }

    /// Open a slide through a configured registry.
    pub fn open_with(path: impl AsRef<Path>, registry: &BackendRegistry) -> Result<Self, SlideError> {
        let path = path.as_ref();
        let backend = registry.open(path)?;
        let mut slide = Self::from_backend(path, backend, registry.options().background)?;
        slide.lut_dir = registry.options().lut_dir.clone();
        Ok(slide)
    }

    /// Wrap an already opened backend.
    ///
    /// `background` overrides the backend's fill color. On error the backend
    /// is closed before returning.
    pub fn from_backend(
        path: impl Into<PathBuf>,
        backend: Box<dyn SlideBackend>,
        background: Option<[u8; 4]>,
    ) -> Result<Self, SlideError> {
        let path = path.into();
        let background = background
            .or_else(|| backend.background_color())
            .unwrap_or(WHITE);
        let mut properties: BTreeMap<String, String> = backend.properties().into_iter().collect();
        let channels = backend.channels();

        let manager = ResourceManager::new(backend);
        let model = manager.with_backend(|b| PyramidModel::build(b))?;

        properties.extend(model.properties());
        properties
            .entry("openslide.vendor".to_string())
            .or_insert_with(|| model.kind().as_str().to_string());
        properties.insert(
            "openslide.background-color".to_string(),
            format!(
                "{:02X}{:02X}{:02X}",
                background[0], background[1], background[2]
            ),
        );

        debug!(
            path = %path.display(),
            kind = %model.kind(),
            properties = properties.len(),
            "slide ready"
        );

        Ok(Slide {
            path,
            model,
            manager,
            properties,
            background,
            channels,
            lut_dir: None,
            color: RwLock::new(None),
        })
    }

    fn reader(&self) -> Result<RegionReader<'_>, SlideError> {
        self.manager.ensure_open()?;
        Ok(RegionReader::new(&self.model, &self.manager, self.background))
    }

    fn open_model(&self) -> Result<&PyramidModel, SlideError> {
        self.manager.ensure_open()?;
        Ok(&self.model)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Backend kind selected at open; available even after close.
    pub fn format(&self) -> BackendKind {
        self.model.kind()
    }

    // =========================================================================
    // Geometry
    // =========================================================================

    /// Level-0 width and height.
    pub fn dimensions(&self) -> Result<(u32, u32), SlideError> {
        Ok(self.open_model()?.dimensions())
    }

    pub fn level_count(&self) -> Result<u32, SlideError> {
        Ok(self.open_model()?.level_count())
    }

    pub fn level_dimensions(&self, level: u32) -> Result<(u32, u32), SlideError> {
        self.open_model()?.level_dimensions(level)
    }

    pub fn level_downsamples(&self) -> Result<Vec<f64>, SlideError> {
        Ok(self.open_model()?.level_downsamples())
    }

    pub fn levels(&self) -> Result<&[PyramidLevel], SlideError> {
        Ok(self.open_model()?.levels())
    }

    pub fn best_level_for_downsample(&self, downsample: f64) -> Result<u32, SlideError> {
        Ok(self.open_model()?.best_level_for_downsample(downsample))
    }

    /// Tile-grid padding the backend stores beyond a level's content.
    pub fn level_padding(&self, level: u32) -> Result<(u32, u32), SlideError> {
        self.open_model()?.padding(level)
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    pub fn properties(&self) -> Result<&BTreeMap<String, String>, SlideError> {
        self.manager.ensure_open()?;
        Ok(&self.properties)
    }

    pub fn property(&self, key: &str) -> Result<Option<&str>, SlideError> {
        Ok(self.properties()?.get(key).map(String::as_str))
    }

    fn number(&self, key: &str) -> Option<f64> {
        self.properties
            .get(key)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v > 0.0)
    }

    /// Microns per pixel at level 0.
    ///
    /// Mean of `openslide.mpp-x` and `openslide.mpp-y` when known, else
    /// derived from a TMAP scan magnification.
    pub fn mpp(&self) -> Result<Option<f64>, SlideError> {
        self.manager.ensure_open()?;
        let mpp = match (self.number("openslide.mpp-x"), self.number("openslide.mpp-y")) {
            (Some(x), Some(y)) => Some((x + y) / 2.0),
            (Some(v), None) | (None, Some(v)) => Some(v),
            (None, None) => self.number("tmap.scan_scale").map(|s| 10.0 / s),
        };
        Ok(mpp)
    }

    /// Objective magnification of level 0.
    ///
    /// The first of `tmap.scan_scale`, `openslide.objective-power`,
    /// `sdpc.magnification` and `ventana.Magnification` that parses, else
    /// `10 / mpp`.
    pub fn magnification(&self) -> Result<Option<f64>, SlideError> {
        self.manager.ensure_open()?;
        let declared = MAGNIFICATION_KEYS
            .iter()
            .find_map(|key| self.number(key).filter(|m| *m > 0.0));
        if declared.is_some() {
            return Ok(declared);
        }
        Ok(self.mpp()?.map(|mpp| 10.0 / mpp))
    }

    /// `openslide.vendor`, always set at open.
    pub fn vendor(&self) -> Result<Option<&str>, SlideError> {
        self.property("openslide.vendor")
    }

    /// Fill color used outside the slide content.
    pub fn background(&self) -> [u8; 4] {
        self.background
    }

    /// Geometry and metadata in one serializable value.
    pub fn info(&self) -> Result<SlideInfo, SlideError> {
        let model = self.open_model()?;
        let (width, height) = model.dimensions();
        Ok(SlideInfo {
            path: self.path.clone(),
            format: model.kind(),
            vendor: self.vendor()?.map(str::to_string),
            width,
            height,
            levels: model.levels().to_vec(),
            mpp: self.mpp()?,
            magnification: self.magnification()?,
            associated_images: model.associated_kinds().to_vec(),
            properties: self.properties.clone(),
        })
    }

    // =========================================================================
    // Pixels
    // =========================================================================

    /// Read `size` level pixels at `location` (level-0 coordinates).
    ///
    /// Areas outside the slide are filled with the background color; the
    /// result is always exactly `size`.
    ///
    /// # Errors
    /// `InvalidArgument` for a negative or oversized size, `InvalidLevel`
    /// for an unknown level.
    pub fn read_region(
        &self,
        location: (i64, i64),
        level: u32,
        size: (i64, i64),
    ) -> Result<PixelBuffer, SlideError> {
        let reader = self.reader()?;
        let (nx, ny, w, h) = self.level_request(location, level, size)?;
        Ok(self.corrected(reader.read_native(level, nx, ny, w, h)?))
    }

    /// Level origin and size of a `read_region` style request.
    fn level_request(
        &self,
        location: (i64, i64),
        level: u32,
        size: (i64, i64),
    ) -> Result<(i64, i64, u32, u32), SlideError> {
        let kind = self.format();
        let (w, h) = size;
        if w < 0 || h < 0 {
            return Err(SlideError::invalid_argument(
                kind,
                format!("negative region size {w}x{h}"),
            ));
        }
        let (w, h) = match (u32::try_from(w), u32::try_from(h)) {
            (Ok(w), Ok(h)) => (w, h),
            _ => {
                return Err(SlideError::invalid_argument(
                    kind,
                    format!("region size {w}x{h} is too large"),
                ))
            }
        };

        let ds = self.model.level(level)?.downsample;
        let nx = (location.0 as f64 / ds).floor() as i64;
        let ny = (location.1 as f64 / ds).floor() as i64;
        Ok((nx, ny, w, h))
    }

    /// Read a rectangle whose origin and size are both in level-0 pixels.
    pub fn read_level0_region(&self, region: &Region) -> Result<PixelBuffer, SlideError> {
        Ok(self.corrected(self.reader()?.read_region(region)?))
    }

    /// Whole-slide image fitting in `max_size`, aspect ratio preserved.
    pub fn get_thumbnail(&self, max_size: (u32, u32)) -> Result<PixelBuffer, SlideError> {
        Ok(self.corrected(self.reader()?.get_thumbnail(max_size.0, max_size.1)?))
    }

    // =========================================================================
    // Channels
    // =========================================================================

    /// Biomarker channels of a multiplexed QPTIFF, in file order. Empty for
    /// other slides.
    pub fn biomarkers(&self) -> Result<&[String], SlideError> {
        self.manager.ensure_open()?;
        Ok(&self.channels)
    }

    /// [`read_region`](Self::read_region) restricted to one biomarker,
    /// stretched to 8-bit gray.
    ///
    /// # Errors
    /// `InvalidArgument` for a biomarker the slide does not carry.
    pub fn read_region_biomarker(
        &self,
        location: (i64, i64),
        level: u32,
        size: (i64, i64),
        biomarker: &str,
    ) -> Result<PixelBuffer, SlideError> {
        let reader = self.reader()?;
        if !self.channels.iter().any(|c| c == biomarker) {
            return Err(SlideError::invalid_argument(
                self.format(),
                format!(
                    "biomarker {biomarker:?} not found; available: {}",
                    self.channels.join(", ")
                ),
            ));
        }
        let (nx, ny, w, h) = self.level_request(location, level, size)?;
        reader.read_native_channel(biomarker, level, nx, ny, w, h)
    }

    // =========================================================================
    // Color correction
    // =========================================================================

    pub fn supports_color_correction(&self) -> bool {
        COLOR_CORRECTED_KINDS.contains(&self.format())
    }

    /// Turn vendor color correction on with the `style` preset from the
    /// configured LUT directory, or off.
    ///
    /// # Errors
    /// `InvalidArgument` for formats without vendor LUTs or a malformed
    /// LUT file.
    pub fn apply_color_correction(&self, apply: bool, style: ColorStyle) -> Result<(), SlideError> {
        let lut = if apply {
            self.check_color_support()?;
            let lut = ColorCorrection::for_style(self.lut_dir.as_deref(), style)
                .map_err(|e| SlideError::invalid_argument(self.format(), e.to_string()))?;
            Some(lut)
        } else {
            None
        };
        self.set_color_correction(lut)
    }

    /// Install an explicit correction, or clear it with `None`.
    pub fn set_color_correction(&self, lut: Option<ColorCorrection>) -> Result<(), SlideError> {
        self.manager.ensure_open()?;
        if lut.is_some() {
            self.check_color_support()?;
        }
        debug!(path = %self.path.display(), enabled = lut.is_some(), "color correction changed");
        *self.color.write().unwrap_or_else(|e| e.into_inner()) = lut;
        Ok(())
    }

    /// The active correction, if any.
    pub fn color_correction(&self) -> Option<ColorCorrection> {
        *self.color.read().unwrap_or_else(|e| e.into_inner())
    }

    fn check_color_support(&self) -> Result<(), SlideError> {
        if self.supports_color_correction() {
            Ok(())
        } else {
            Err(SlideError::invalid_argument(
                self.format(),
                format!("color correction is not supported for {}", self.format().name()),
            ))
        }
    }

    fn corrected(&self, mut pixels: PixelBuffer) -> PixelBuffer {
        if let Some(lut) = self.color_correction() {
            lut.apply(&mut pixels);
        }
        pixels
    }

    // =========================================================================
    // Associated images
    // =========================================================================

    /// Associated images stored in the file.
    pub fn associated_images(&self) -> Result<Vec<AssociatedKind>, SlideError> {
        Ok(self.open_model()?.associated_kinds().to_vec())
    }

    /// Decode an associated image. A thumbnail missing from the file is
    /// rendered from the pyramid.
    pub fn associated_image(&self, kind: AssociatedKind) -> Result<Option<PixelBuffer>, SlideError> {
        let stored = self.manager.with_backend(|b| b.associated_image(kind))?;
        match stored {
            None if kind == AssociatedKind::Thumbnail => {
                debug!(path = %self.path.display(), "synthesizing thumbnail");
                self.get_thumbnail((SYNTHESIZED_THUMBNAIL_SIZE, SYNTHESIZED_THUMBNAIL_SIZE))
                    .map(Some)
            }
            other => Ok(other),
        }
    }

    // =========================================================================
    // Lifetime
    // =========================================================================

    /// Release the backend handle. Further calls are no-ops.
    pub fn close(&self) {
        self.manager.close();
    }

    pub fn is_closed(&self) -> bool {
        self.manager.is_closed()
    }
}
