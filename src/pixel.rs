//! RGBA8 pixel buffers shared by every backend and the public API.
//!
//! All pixel data leaving a backend is normalized to this layout: row-major,
//! four bytes per pixel, non-premultiplied, no row padding.

use image::imageops::{self, FilterType};
use image::RgbaImage;

/// Bytes per RGBA pixel.
pub const CHANNELS: usize = 4;

/// Opaque white, the default fill for areas outside the slide.
pub const WHITE: [u8; 4] = [255, 255, 255, 255];

/// A tightly packed RGBA8 image.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl PixelBuffer {
    /// A buffer with every pixel set to `color`.
    pub fn new_filled(width: u32, height: u32, color: [u8; 4]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * CHANNELS);
        for _ in 0..pixels {
            data.extend_from_slice(&color);
        }
        PixelBuffer {
            width,
            height,
            data,
        }
    }

    /// Wrap raw RGBA bytes. Returns `None` when the length does not match.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        (data.len() == width as usize * height as usize * CHANNELS).then_some(PixelBuffer {
            width,
            height,
            data,
        })
    }

    /// Convert packed BGR bytes (3 per pixel), as produced by most vendor
    /// decoders.
    pub fn from_bgr(width: u32, height: u32, bgr: &[u8]) -> Option<Self> {
        Self::convert(width, height, bgr, 3, |p| [p[2], p[1], p[0], 255])
    }

    /// Convert packed BGRA bytes.
    pub fn from_bgra(width: u32, height: u32, bgra: &[u8]) -> Option<Self> {
        Self::convert(width, height, bgra, 4, |p| [p[2], p[1], p[0], p[3]])
    }

    /// Convert packed RGB bytes.
    pub fn from_rgb(width: u32, height: u32, rgb: &[u8]) -> Option<Self> {
        Self::convert(width, height, rgb, 3, |p| [p[0], p[1], p[2], 255])
    }

    /// Convert 8-bit grayscale.
    pub fn from_gray(width: u32, height: u32, gray: &[u8]) -> Option<Self> {
        Self::convert(width, height, gray, 1, |p| [p[0], p[0], p[0], 255])
    }

    fn convert(
        width: u32,
        height: u32,
        src: &[u8],
        stride: usize,
        f: impl Fn(&[u8]) -> [u8; 4],
    ) -> Option<Self> {
        let pixels = width as usize * height as usize;
        if src.len() < pixels * stride {
            return None;
        }
        let mut data = Vec::with_capacity(pixels * CHANNELS);
        for p in src.chunks_exact(stride).take(pixels) {
            data.extend_from_slice(&f(p));
        }
        Some(PixelBuffer {
            width,
            height,
            data,
        })
    }

    pub fn from_image(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        PixelBuffer {
            width,
            height,
            data: image.into_raw(),
        }
    }

    pub fn into_image(self) -> RgbaImage {
        let (width, height) = (self.width, self.height);
        // Length is an invariant of every constructor
        RgbaImage::from_raw(width, height, self.data)
            .unwrap_or_else(|| RgbaImage::new(width, height))
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Pixel at (x, y). Panics when out of bounds, like slice indexing.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let at = (y as usize * self.width as usize + x as usize) * CHANNELS;
        [
            self.data[at],
            self.data[at + 1],
            self.data[at + 2],
            self.data[at + 3],
        ]
    }

    /// Copy a `w` x `h` block from `src` at (sx, sy) to (dx, dy). The block
    /// is clipped to both buffers.
    pub fn blit(&mut self, src: &PixelBuffer, sx: u32, sy: u32, dx: u32, dy: u32, w: u32, h: u32) {
        let w = w
            .min(src.width.saturating_sub(sx))
            .min(self.width.saturating_sub(dx)) as usize;
        let h = h
            .min(src.height.saturating_sub(sy))
            .min(self.height.saturating_sub(dy)) as usize;
        if w == 0 || h == 0 {
            return;
        }

        let row_bytes = w * CHANNELS;
        for row in 0..h {
            let s = ((sy as usize + row) * src.width as usize + sx as usize) * CHANNELS;
            let d = ((dy as usize + row) * self.width as usize + dx as usize) * CHANNELS;
            self.data[d..d + row_bytes].copy_from_slice(&src.data[s..s + row_bytes]);
        }
    }

    /// A copy of the `w` x `h` window at (x, y); areas outside the buffer
    /// take `fill`.
    pub fn crop(&self, x: u32, y: u32, w: u32, h: u32, fill: [u8; 4]) -> PixelBuffer {
        let mut out = PixelBuffer::new_filled(w, h, fill);
        out.blit(self, x, y, 0, 0, w, h);
        out
    }

    /// Area-average resample to `width` x `height`.
    ///
    /// Downscales go through `imageops::thumbnail`, where every output
    /// pixel is the mean of the source block under its footprint. An axis
    /// that grows falls back to a triangle filter.
    pub fn resize_area(&self, width: u32, height: u32) -> PixelBuffer {
        if (width, height) == (self.width, self.height) {
            return self.clone();
        }
        if width == 0 || height == 0 || self.width == 0 || self.height == 0 {
            return PixelBuffer::new_filled(width, height, [0, 0, 0, 0]);
        }

        let source = self.clone().into_image();
        let resized = if width <= self.width && height <= self.height {
            imageops::thumbnail(&source, width, height)
        } else {
            imageops::resize(&source, width, height, FilterType::Triangle)
        };
        PixelBuffer::from_image(resized)
    }
}
