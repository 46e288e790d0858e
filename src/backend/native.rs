//! Adapter for proprietary vendor decoders.
//!
//! Vendor SDKs disagree on nearly every geometric convention. The
//! [`NativeDecoder`] trait describes the foreign surface as it is, and
//! [`SdkAdapter`] turns it into the canonical [`SlideBackend`] view:
//!
//! ```text
//!   native (CoarsestFirst, padded, resolution scale, BGR)
//!     lod 0:   1024 x  768 (+0, +0)   scale 0.25
//!     lod 1:   4096 x 3072 (+96, +64) scale 1.0
//!                    |
//!                    v  SdkAdapter
//!   canonical
//!     level 0: 4000 x 3008   downsample 1.0
//!     level 1: 1024 x  768   downsample 4.0      RGBA8
//! ```
//!
//! Pixel memory handed back by a decoder is wrapped in a [`NativeBuffer`]
//! immediately and released by its `Drop`, on every path.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::error::SlideError;
use crate::format::{AssociatedKind, BackendKind};
use crate::pixel::PixelBuffer;

use super::{ensure_size, SlideBackend};

// =============================================================================
// Foreign Surface
// =============================================================================

/// Direction in which a decoder numbers its levels of detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LodOrder {
    /// LOD 0 is full resolution
    FinestFirst,
    /// LOD 0 is the smallest image
    CoarsestFirst,
}

/// Meaning of the per-LOD scale a decoder reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleConvention {
    /// Larger value means smaller image (1, 2, 4, ...)
    Downsample,
    /// Larger value means larger image (1.0, 0.25, ... or 40, 10, ...)
    Resolution,
}

/// Channel layout of decoder output; always 8 bits per sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativePixelFormat {
    Rgb,
    Rgba,
    Bgr,
    Bgra,
    /// Single channel, also used for pseudo-colored fluorescence planes
    Gray,
}

impl NativePixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            NativePixelFormat::Rgb | NativePixelFormat::Bgr => 3,
            NativePixelFormat::Rgba | NativePixelFormat::Bgra => 4,
            NativePixelFormat::Gray => 1,
        }
    }
}

/// Failure reported by a decoder.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct NativeError {
    pub message: String,
    /// The decoder cannot be used again after this failure
    pub fatal: bool,
}

impl NativeError {
    pub fn new(message: impl Into<String>) -> Self {
        NativeError {
            message: message.into(),
            fatal: false,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        NativeError {
            message: message.into(),
            fatal: true,
        }
    }
}

/// Decoder-owned pixel memory.
pub trait NativeMemory: Send {
    fn bytes(&self) -> &[u8];

    /// Return the memory to the decoder's allocator.
    fn release(self: Box<Self>);
}

impl NativeMemory for Vec<u8> {
    fn bytes(&self) -> &[u8] {
        self
    }

    fn release(self: Box<Self>) {}
}

/// Pixel memory crossing the decoder boundary.
///
/// The memory is released exactly once, when the buffer is dropped.
pub struct NativeBuffer {
    width: u32,
    height: u32,
    format: NativePixelFormat,
    memory: Option<Box<dyn NativeMemory>>,
}

impl NativeBuffer {
    pub fn new(
        width: u32,
        height: u32,
        format: NativePixelFormat,
        memory: Box<dyn NativeMemory>,
    ) -> Self {
        NativeBuffer {
            width,
            height,
            format,
            memory: Some(memory),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> NativePixelFormat {
        self.format
    }

    pub fn bytes(&self) -> &[u8] {
        self.memory.as_deref().map(|m| m.bytes()).unwrap_or(&[])
    }

    /// Convert to RGBA8. `None` when the memory is shorter than the
    /// declared geometry.
    pub fn to_pixels(&self) -> Option<PixelBuffer> {
        let (w, h) = (self.width, self.height);
        let bytes = self.bytes();
        match self.format {
            NativePixelFormat::Rgb => PixelBuffer::from_rgb(w, h, bytes),
            NativePixelFormat::Rgba => {
                let len = w as usize * h as usize * 4;
                bytes
                    .get(..len)
                    .and_then(|b| PixelBuffer::from_rgba(w, h, b.to_vec()))
            }
            NativePixelFormat::Bgr => PixelBuffer::from_bgr(w, h, bytes),
            NativePixelFormat::Bgra => PixelBuffer::from_bgra(w, h, bytes),
            NativePixelFormat::Gray => PixelBuffer::from_gray(w, h, bytes),
        }
    }
}

impl Drop for NativeBuffer {
    fn drop(&mut self) {
        if let Some(memory) = self.memory.take() {
            memory.release();
        }
    }
}

impl fmt::Debug for NativeBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .finish()
    }
}

/// A vendor decoder bound to one open file, in its own conventions.
pub trait NativeDecoder: Send {
    fn lod_count(&self) -> u32;

    fn lod_order(&self) -> LodOrder {
        LodOrder::FinestFirst
    }

    /// Width and height as the decoder reports them.
    fn lod_dimensions(&self, lod: u32) -> Result<(u32, u32), NativeError>;

    /// Right/bottom padding of the decoder's tile grid at a LOD.
    fn lod_padding(&self, _lod: u32) -> Result<(u32, u32), NativeError> {
        Ok((0, 0))
    }

    /// Full-resolution content region declared in the file, if any.
    fn content_size(&self) -> Option<(u32, u32)> {
        None
    }

    fn lod_scale(&self, lod: u32) -> Result<f64, NativeError>;

    fn scale_convention(&self) -> ScaleConvention {
        ScaleConvention::Downsample
    }

    /// Read a rectangle in the LOD's own pixel coordinates.
    fn read_region(
        &mut self,
        lod: u32,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
    ) -> Result<NativeBuffer, NativeError>;

    fn associated_kinds(&self) -> Vec<AssociatedKind> {
        Vec::new()
    }

    fn associated_image(
        &mut self,
        _kind: AssociatedKind,
    ) -> Result<Option<NativeBuffer>, NativeError> {
        Ok(None)
    }

    fn properties(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn background_color(&self) -> Option<[u8; 4]> {
        None
    }

    fn close(&mut self) {}
}

/// Opens a decoder for a slide path, given the configured SDK directory.
pub type DecoderFactory = Arc<
    dyn Fn(&Path, Option<&Path>) -> Result<Box<dyn NativeDecoder>, NativeError> + Send + Sync,
>;

// =============================================================================
// SdkAdapter
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct LevelGeometry {
    lod: u32,
    width: u32,
    height: u32,
    padding: (u32, u32),
    downsample: f64,
}

/// Normalizes a [`NativeDecoder`] into a [`SlideBackend`].
pub struct SdkAdapter {
    kind: BackendKind,
    decoder: Box<dyn NativeDecoder>,
    levels: Vec<LevelGeometry>,
}

impl SdkAdapter {
    /// Query the decoder's geometry once and normalize it.
    ///
    /// # Errors
    /// `OpenFailure` when the decoder reports no level, `BackendIo` when its
    /// geometry is inconsistent.
    pub fn new(kind: BackendKind, decoder: Box<dyn NativeDecoder>) -> Result<Self, SlideError> {
        let count = decoder.lod_count();
        if count == 0 {
            return Err(SlideError::OpenFailure {
                kind,
                detail: "decoder reports no levels".to_string(),
            });
        }

        let io = |e: NativeError| SlideError::backend_io(kind, e.message);
        let lod_for = |level: u32| match decoder.lod_order() {
            LodOrder::FinestFirst => level,
            LodOrder::CoarsestFirst => count - 1 - level,
        };

        // Padding rule is settled on level 0 and applied to every level
        let lod0 = lod_for(0);
        let reported0 = decoder.lod_dimensions(lod0).map_err(io)?;
        let padding0 = decoder.lod_padding(lod0).map_err(io)?;
        let stripped0 = (
            reported0.0.saturating_sub(padding0.0),
            reported0.1.saturating_sub(padding0.1),
        );
        let includes_padding = match decoder.content_size() {
            None => true,
            Some(content) if content == stripped0 => true,
            Some(content) if content == reported0 => {
                debug!(%kind, "reported dimensions already exclude padding");
                false
            }
            Some((cw, ch)) => {
                return Err(SlideError::backend_io(
                    kind,
                    format!(
                        "declared content {cw}x{ch} matches neither reported {}x{} nor unpadded {}x{}",
                        reported0.0, reported0.1, stripped0.0, stripped0.1
                    ),
                ))
            }
        };

        let mut raw_scales = Vec::with_capacity(count as usize);
        let mut levels = Vec::with_capacity(count as usize);
        for level in 0..count {
            let lod = lod_for(level);
            let (rw, rh) = decoder.lod_dimensions(lod).map_err(io)?;
            let padding = decoder.lod_padding(lod).map_err(io)?;
            let (width, height) = if includes_padding {
                if padding.0 >= rw || padding.1 >= rh {
                    return Err(SlideError::backend_io(
                        kind,
                        format!("padding {padding:?} swallows level {level} ({rw}x{rh})"),
                    ));
                }
                (rw - padding.0, rh - padding.1)
            } else {
                (rw, rh)
            };

            let scale = decoder.lod_scale(lod).map_err(io)?;
            if !scale.is_finite() || scale <= 0.0 {
                return Err(SlideError::backend_io(
                    kind,
                    format!("level {level} reports scale {scale}"),
                ));
            }
            raw_scales.push(match decoder.scale_convention() {
                ScaleConvention::Downsample => scale,
                ScaleConvention::Resolution => 1.0 / scale,
            });

            levels.push(LevelGeometry {
                lod,
                width,
                height,
                padding,
                downsample: 0.0,
            });
        }

        let base = raw_scales[0];
        for (geometry, raw) in levels.iter_mut().zip(&raw_scales) {
            geometry.downsample = raw / base;
        }
        levels[0].downsample = 1.0;

        debug!(
            %kind,
            levels = levels.len(),
            order = ?decoder.lod_order(),
            includes_padding,
            "normalized native decoder geometry"
        );

        Ok(SdkAdapter {
            kind,
            decoder,
            levels,
        })
    }

    fn geometry(&self, level: u32) -> Result<&LevelGeometry, SlideError> {
        self.check_level(level)?;
        Ok(&self.levels[level as usize])
    }

    fn native_error(&self, err: NativeError) -> SlideError {
        if err.fatal {
            SlideError::fatal_io(self.kind, err.message)
        } else {
            SlideError::backend_io(self.kind, err.message)
        }
    }

    fn convert(&self, buffer: &NativeBuffer) -> Result<PixelBuffer, SlideError> {
        buffer.to_pixels().ok_or_else(|| {
            let (w, h) = buffer.dimensions();
            SlideError::decode(
                self.kind,
                format!(
                    "native buffer holds {} bytes, {w}x{h} {:?} needs {}",
                    buffer.bytes().len(),
                    buffer.format(),
                    w as usize * h as usize * buffer.format().bytes_per_pixel()
                ),
            )
        })
    }
}

impl SlideBackend for SdkAdapter {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn level_count(&self) -> u32 {
        self.levels.len() as u32
    }

    fn level_dimensions(&self, level: u32) -> Result<(u32, u32), SlideError> {
        self.geometry(level).map(|g| (g.width, g.height))
    }

    fn level_downsample(&self, level: u32) -> Result<f64, SlideError> {
        self.geometry(level).map(|g| g.downsample)
    }

    fn level_padding(&self, level: u32) -> Result<(u32, u32), SlideError> {
        self.geometry(level).map(|g| g.padding)
    }

    fn read_region(
        &mut self,
        level: u32,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
    ) -> Result<PixelBuffer, SlideError> {
        let lod = self.geometry(level)?.lod;
        let buffer = match self.decoder.read_region(lod, x, y, w, h) {
            Ok(buffer) => buffer,
            Err(e) => return Err(self.native_error(e)),
        };
        let pixels = self.convert(&buffer)?;
        ensure_size(self.kind, pixels, w, h)
    }

    fn associated_kinds(&self) -> Vec<AssociatedKind> {
        self.decoder.associated_kinds()
    }

    fn associated_image(
        &mut self,
        kind: AssociatedKind,
    ) -> Result<Option<PixelBuffer>, SlideError> {
        match self.decoder.associated_image(kind) {
            Ok(Some(buffer)) => self.convert(&buffer).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(self.native_error(e)),
        }
    }

    fn properties(&self) -> Vec<(String, String)> {
        self.decoder.properties()
    }

    fn background_color(&self) -> Option<[u8; 4]> {
        self.decoder.background_color()
    }

    fn close(&mut self) {
        self.decoder.close();
    }
}
