//! Backend adapters: one per slide format, behind one capability trait.
//!
//! ```text
//!                   BackendRegistry::open(path)
//!                            |
//!                     detect_format(path)
//!            +---------------+----------------+
//!            |               |                |
//!      TIFF family          TMAP          vendor SDK kinds
//!            |               |                |
//!      TiffBackend      TmapBackend     SdkAdapter<dyn NativeDecoder>
//!            \_______________|________________/
//!                            |
//!                 Box<dyn SlideBackend>
//! ```
//!
//! Every adapter reports levels in canonical order (level 0 = full
//! resolution), content-only dimensions, and RGBA8 pixels. Adapters never
//! retry; failures surface unchanged with the backend kind attached.

mod native;
mod registry;
mod tiff;
mod tmap;

pub use native::{
    DecoderFactory, LodOrder, NativeBuffer, NativeDecoder, NativeError, NativeMemory, NativePixelFormat,
    ScaleConvention, SdkAdapter,
};
pub use registry::BackendRegistry;
pub use tiff::TiffBackend;
pub use tmap::TmapBackend;

use crate::error::SlideError;
use crate::format::{AssociatedKind, BackendKind};
use crate::pixel::PixelBuffer;

/// The capability contract every backend variant implements.
///
/// Geometry queries take `&self` and are answered from data loaded at open.
/// Pixel reads take `&mut self`: native decoders are not assumed reentrant,
/// so callers serialize them (see [`crate::slide::ResourceManager`]).
pub trait SlideBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Number of levels, at least 1 for a usable slide.
    fn level_count(&self) -> u32;

    /// Content-only width and height of a level.
    fn level_dimensions(&self, level: u32) -> Result<(u32, u32), SlideError>;

    /// Downsample of a level relative to level 0.
    fn level_downsample(&self, level: u32) -> Result<f64, SlideError>;

    /// Right and bottom padding the backend's tile grid adds to a level.
    fn level_padding(&self, level: u32) -> Result<(u32, u32), SlideError> {
        self.check_level(level).map(|_| (0, 0))
    }

    /// Read `w` x `h` level pixels at (x, y) in level coordinates.
    ///
    /// Callers only request rectangles inside the level's content area.
    /// The result is exactly `w` x `h`.
    fn read_region(
        &mut self,
        level: u32,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
    ) -> Result<PixelBuffer, SlideError>;

    /// Named channels (QPTIFF biomarkers) readable on their own. Empty for
    /// brightfield slides.
    fn channels(&self) -> Vec<String> {
        Vec::new()
    }

    /// Read one channel like [`read_region`](Self::read_region), as gray
    /// RGBA stretched to 8 bits.
    fn read_channel_region(
        &mut self,
        channel: &str,
        level: u32,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
    ) -> Result<PixelBuffer, SlideError> {
        let _ = (level, x, y, w, h);
        Err(SlideError::invalid_argument(
            self.kind(),
            format!("slide has no channel {channel:?}"),
        ))
    }

    /// Associated images this slide carries.
    fn associated_kinds(&self) -> Vec<AssociatedKind>;

    /// Decode an associated image; `Ok(None)` when not present.
    fn associated_image(&mut self, kind: AssociatedKind)
        -> Result<Option<PixelBuffer>, SlideError>;

    /// Backend-specific properties.
    fn properties(&self) -> Vec<(String, String)>;

    /// Fill color for areas outside the content, when the format defines one.
    fn background_color(&self) -> Option<[u8; 4]> {
        None
    }

    /// Release native resources. Called exactly once by the owner.
    fn close(&mut self) {}

    /// `InvalidLevel` unless `level` is in range.
    fn check_level(&self, level: u32) -> Result<(), SlideError> {
        let count = self.level_count();
        if level < count {
            Ok(())
        } else {
            Err(SlideError::InvalidLevel {
                kind: self.kind(),
                level,
                count,
            })
        }
    }
}

/// Check that a backend returned exactly the requested size.
pub(crate) fn ensure_size(
    kind: BackendKind,
    buffer: PixelBuffer,
    w: u32,
    h: u32,
) -> Result<PixelBuffer, SlideError> {
    if buffer.dimensions() == (w, h) {
        Ok(buffer)
    } else {
        let (bw, bh) = buffer.dimensions();
        Err(SlideError::backend_io(
            kind,
            format!("backend returned {bw}x{bh} for a {w}x{h} request"),
        ))
    }
}
