//! Vendor color correction from d-Viewer style LUT files.
//!
//! A LUT is a small XML document:
//!
//! ```text
//! <lut>
//!   <gamma>0.9</gamma>
//!   <ccm><float>1.1</float> ... nine values, row-major ... </ccm>
//!   <rgbRate><float>1.0</float><float>0.98</float><float>1.02</float></rgbRate>
//! </lut>
//! ```
//!
//! Each RGB pixel is scaled to 0..1, raised to `gamma`, multiplied by the
//! matrix, scaled per channel by `rgbRate` and clipped back to 0..255.
//! Alpha passes through.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ColorError;
use crate::pixel::{PixelBuffer, CHANNELS};

/// Named correction presets shipped with the vendor viewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum ColorStyle {
    #[default]
    Real,
    Gorgeous,
}

impl ColorStyle {
    pub const fn name(self) -> &'static str {
        match self {
            ColorStyle::Real => "Real",
            ColorStyle::Gorgeous => "Gorgeous",
        }
    }

    /// File name of the preset inside a LUT directory.
    pub const fn lut_file(self) -> &'static str {
        match self {
            ColorStyle::Real => "real.lut",
            ColorStyle::Gorgeous => "real2.lut",
        }
    }
}

impl fmt::Display for ColorStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ColorStyle {
    type Err = ColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "real" => Ok(ColorStyle::Real),
            "gorgeous" => Ok(ColorStyle::Gorgeous),
            _ => Err(ColorError::UnknownStyle(s.trim().to_string())),
        }
    }
}

/// Gamma, color matrix and channel gains of one LUT.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ColorCorrection {
    pub gamma: f32,
    /// Row-major 3x3 matrix; output channel `i` is row `i` dot input
    pub ccm: [[f32; 3]; 3],
    pub rgb_rate: [f32; 3],
}

impl Default for ColorCorrection {
    fn default() -> Self {
        ColorCorrection {
            gamma: 1.0,
            ccm: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            rgb_rate: [1.0; 3],
        }
    }
}

impl ColorCorrection {
    /// Parse LUT XML. Missing elements keep their identity values.
    pub fn from_lut_xml(text: &str) -> Result<Self, ColorError> {
        let doc = roxmltree::Document::parse(text).map_err(|e| ColorError::Xml(e.to_string()))?;
        let root = doc.root_element();
        let child = |name: &str| root.children().find(|n| n.has_tag_name(name));

        let mut lut = ColorCorrection::default();
        if let Some(node) = child("gamma") {
            if let Some(text) = node.text() {
                lut.gamma = parse_float("gamma", text)?;
            }
        }
        if let Some(node) = child("ccm") {
            let v: [f32; 9] = floats("ccm", node)?;
            lut.ccm = [[v[0], v[1], v[2]], [v[3], v[4], v[5]], [v[6], v[7], v[8]]];
        }
        if let Some(node) = child("rgbRate") {
            lut.rgb_rate = floats("rgbRate", node)?;
        }
        Ok(lut)
    }

    /// Read and parse a LUT file.
    pub fn load(path: &Path) -> Result<Self, ColorError> {
        let text = std::fs::read_to_string(path).map_err(|e| ColorError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let lut = Self::from_lut_xml(&text)?;
        debug!(path = %path.display(), gamma = lut.gamma, "loaded color LUT");
        Ok(lut)
    }

    /// The preset for `style` from `dir`, or the identity when the
    /// directory does not ship it.
    pub fn for_style(dir: Option<&Path>, style: ColorStyle) -> Result<Self, ColorError> {
        match dir.map(|d| d.join(style.lut_file())) {
            Some(path) if path.is_file() => Self::load(&path),
            Some(path) => {
                warn!(path = %path.display(), %style, "LUT not found, correction is the identity");
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }

    /// Correct every pixel of `pixels` in place.
    pub fn apply(&self, pixels: &mut PixelBuffer) {
        if self.is_identity() {
            return;
        }
        let mut curve = [0f32; 256];
        for (v, out) in curve.iter_mut().enumerate() {
            *out = (v as f32 / 255.0).powf(self.gamma);
        }

        for px in pixels.as_bytes_mut().chunks_exact_mut(CHANNELS) {
            let rgb = [curve[px[0] as usize], curve[px[1] as usize], curve[px[2] as usize]];
            for (i, row) in self.ccm.iter().enumerate() {
                let v = (row[0] * rgb[0] + row[1] * rgb[1] + row[2] * rgb[2]) * self.rgb_rate[i];
                px[i] = (v * 255.0).round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

fn parse_float(element: &'static str, text: &str) -> Result<f32, ColorError> {
    text.trim()
        .parse()
        .map_err(|e| ColorError::InvalidElement {
            element,
            message: format!("'{}': {e}", text.trim()),
        })
}

fn floats<const N: usize>(
    element: &'static str,
    node: roxmltree::Node<'_, '_>,
) -> Result<[f32; N], ColorError> {
    let values = node
        .children()
        .filter(|n| n.has_tag_name("float"))
        .map(|n| parse_float(element, n.text().unwrap_or_default()))
        .collect::<Result<Vec<f32>, _>>()?;
    let count = values.len();
    values.try_into().map_err(|_| ColorError::InvalidElement {
        element,
        message: format!("expected {N} values, found {count}"),
    })
}
