//! Format detection for whole slide image files.
//!
//! Classification is cheap and never decodes pixels:
//!
//! 1. The file extension decides for every vendor-specific suffix.
//! 2. Ambiguous suffixes (`.tif`, `.tiff`, none, unknown) fall back to
//!    sniffing: TIFF/BigTIFF magic, the Aperio marker in the first IFD's
//!    ImageDescription, or the TMAP magic.
//!
//! The same detection drives backend selection at open time.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Serialize;

use crate::error::SlideError;
use crate::io::{FileRangeReader, RangeReader};

use super::tiff::{read_ascii, Ifd, TiffHeader, TiffTag, TIFF_HEADER_SIZE};

/// Bytes read for magic sniffing.
const SNIFF_BYTES: usize = 16;

/// Marker string for Aperio SVS format.
const APERIO_MARKER: &str = "Aperio";

/// TMAP magic prefix; the next two characters carry the version.
pub const TMAP_MAGIC_PREFIX: &[u8] = b"TMAP";

// =============================================================================
// BackendKind
// =============================================================================

/// Closed set of slide formats, one per backend adapter variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Generic tiled pyramidal TIFF
    GenericTiff,
    /// Aperio SVS
    Aperio,
    /// Ventana BIF (BigTIFF)
    Ventana,
    /// PerkinElmer/Akoya QPTIFF
    Qptiff,
    /// UNIC TMAP
    Tmap,
    /// KFBio KFB (vendor SDK)
    Kfb,
    /// Shengqiang SDPC / DYQX (vendor SDK)
    Sdpc,
    /// Olympus VSI (vendor SDK)
    Vsi,
    /// Motic MDS / MDSX (vendor SDK)
    Mds,
    /// TRON (vendor SDK)
    Tron,
    /// Philips iSyntax (vendor SDK)
    Isyntax,
    /// DYJ (vendor SDK)
    Dyj,
    /// BingLi IBL (vendor SDK)
    Ibl,
    /// ZYP (vendor SDK)
    Zyp,
}

impl BackendKind {
    /// All kinds, in declaration order.
    pub const ALL: [BackendKind; 14] = [
        BackendKind::GenericTiff,
        BackendKind::Aperio,
        BackendKind::Ventana,
        BackendKind::Qptiff,
        BackendKind::Tmap,
        BackendKind::Kfb,
        BackendKind::Sdpc,
        BackendKind::Vsi,
        BackendKind::Mds,
        BackendKind::Tron,
        BackendKind::Isyntax,
        BackendKind::Dyj,
        BackendKind::Ibl,
        BackendKind::Zyp,
    ];

    /// Short identifier used in logs, errors and configuration.
    pub const fn as_str(self) -> &'static str {
        match self {
            BackendKind::GenericTiff => "generic-tiff",
            BackendKind::Aperio => "aperio",
            BackendKind::Ventana => "ventana",
            BackendKind::Qptiff => "qptiff",
            BackendKind::Tmap => "tmap",
            BackendKind::Kfb => "kfb",
            BackendKind::Sdpc => "sdpc",
            BackendKind::Vsi => "vsi",
            BackendKind::Mds => "mds",
            BackendKind::Tron => "tron",
            BackendKind::Isyntax => "isyntax",
            BackendKind::Dyj => "dyj",
            BackendKind::Ibl => "ibl",
            BackendKind::Zyp => "zyp",
        }
    }

    /// Human-readable name.
    pub const fn name(self) -> &'static str {
        match self {
            BackendKind::GenericTiff => "Generic Pyramidal TIFF",
            BackendKind::Aperio => "Aperio SVS",
            BackendKind::Ventana => "Ventana BIF",
            BackendKind::Qptiff => "QPTIFF",
            BackendKind::Tmap => "UNIC TMAP",
            BackendKind::Kfb => "KFBio KFB",
            BackendKind::Sdpc => "SDPC",
            BackendKind::Vsi => "Olympus VSI",
            BackendKind::Mds => "Motic MDS",
            BackendKind::Tron => "TRON",
            BackendKind::Isyntax => "Philips iSyntax",
            BackendKind::Dyj => "DYJ",
            BackendKind::Ibl => "BingLi IBL",
            BackendKind::Zyp => "ZYP",
        }
    }

    /// Formats read by the built-in TIFF reader.
    pub const fn is_tiff_family(self) -> bool {
        matches!(
            self,
            BackendKind::GenericTiff
                | BackendKind::Aperio
                | BackendKind::Ventana
                | BackendKind::Qptiff
        )
    }

    /// Formats only reachable through a vendor decoder library.
    pub const fn requires_sdk(self) -> bool {
        !self.is_tiff_family() && !matches!(self, BackendKind::Tmap)
    }

    /// Parse a kind from its short identifier.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Extension Classification
// =============================================================================

/// What a file extension alone says about the format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtensionHint {
    /// Extension identifies the format
    Definite(BackendKind),
    /// TIFF family; needs sniffing to tell vendors apart
    TiffFamily,
    /// Unknown or missing
    Unknown,
}

fn classify_extension(path: &Path) -> ExtensionHint {
    let ext = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => ext.to_ascii_lowercase(),
        None => return ExtensionHint::Unknown,
    };

    let kind = match ext.as_str() {
        "svs" => BackendKind::Aperio,
        "bif" => BackendKind::Ventana,
        "qptiff" => BackendKind::Qptiff,
        "tmap" => BackendKind::Tmap,
        "kfb" => BackendKind::Kfb,
        "sdpc" | "dyqx" => BackendKind::Sdpc,
        "vsi" => BackendKind::Vsi,
        "mds" | "mdsx" => BackendKind::Mds,
        "tron" => BackendKind::Tron,
        "isyntax" => BackendKind::Isyntax,
        "dyj" => BackendKind::Dyj,
        "ibl" => BackendKind::Ibl,
        "zyp" => BackendKind::Zyp,
        "tif" | "tiff" => return ExtensionHint::TiffFamily,
        _ => return ExtensionHint::Unknown,
    };
    ExtensionHint::Definite(kind)
}

// =============================================================================
// Detection
// =============================================================================

/// Detect the backend kind for a slide file.
///
/// # Errors
/// `UnsupportedFormat` when neither the extension nor the leading bytes
/// identify a known format, or the file cannot be read for sniffing.
pub fn detect_format(path: impl AsRef<Path>) -> Result<BackendKind, SlideError> {
    let path = path.as_ref();
    let unsupported = |reason: String| SlideError::UnsupportedFormat {
        path: path.display().to_string(),
        reason,
    };

    let hint = classify_extension(path);
    if let ExtensionHint::Definite(kind) = hint {
        return Ok(kind);
    }

    let mut head = [0u8; SNIFF_BYTES];
    let read = File::open(path)
        .and_then(|mut f| read_up_to(&mut f, &mut head))
        .map_err(|e| unsupported(format!("cannot read file header: {e}")))?;
    let head = &head[..read];

    if is_tiff_header(head) {
        let reader = FileRangeReader::open(path).map_err(|e| unsupported(e.to_string()))?;
        return Ok(classify_tiff(&reader));
    }
    if is_tmap_header(head) {
        return Ok(BackendKind::Tmap);
    }

    Err(unsupported(match hint {
        ExtensionHint::TiffFamily => "extension is .tif/.tiff but the header is not TIFF".into(),
        _ => "unrecognized extension and file signature".into(),
    }))
}

/// Classify an already-identified TIFF by its first ImageDescription.
///
/// Any parse failure degrades to `GenericTiff`; the backend reports real
/// structural errors when it opens the file.
pub fn classify_tiff<R: RangeReader + ?Sized>(reader: &R) -> BackendKind {
    let description = TiffHeader::read(reader).ok().and_then(|header| {
        let ifd = Ifd::read(reader, &header, header.first_ifd_offset).ok()?;
        let entry = ifd.get_entry_by_tag(TiffTag::ImageDescription)?;
        read_ascii(reader, &header, entry).ok()
    });

    match description {
        Some(desc) if desc.contains(APERIO_MARKER) => BackendKind::Aperio,
        Some(desc) if desc.contains("iScan") || desc.contains("Ventana") => BackendKind::Ventana,
        _ => BackendKind::GenericTiff,
    }
}

/// Check if bytes represent a valid TIFF or BigTIFF header.
pub fn is_tiff_header(bytes: &[u8]) -> bool {
    if bytes.len() < TIFF_HEADER_SIZE {
        return false;
    }
    let version = match &bytes[0..2] {
        b"II" => u16::from_le_bytes([bytes[2], bytes[3]]),
        b"MM" => u16::from_be_bytes([bytes[2], bytes[3]]),
        _ => return false,
    };
    version == 42 || version == 43
}

/// Check for a `TMAPnn` signature.
pub fn is_tmap_header(bytes: &[u8]) -> bool {
    bytes.len() >= 6
        && bytes.starts_with(TMAP_MAGIC_PREFIX)
        && bytes[4].is_ascii_digit()
        && bytes[5].is_ascii_digit()
}

fn read_up_to(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

// =============================================================================
// Tests
// =============================================================================
