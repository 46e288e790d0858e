use thiserror::Error;

use crate::format::BackendKind;

/// I/O errors that can occur when reading slide bytes
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Underlying file system error
    #[error("I/O error: {0}")]
    Io(String),

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// File not found
    #[error("File not found: {0}")]
    NotFound(String),
}

impl From<std::io::Error> for IoError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => IoError::NotFound(err.to_string()),
            _ => IoError::Io(err.to_string()),
        }
    }
}

/// Errors that can occur when parsing TIFF files
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// Invalid BigTIFF offset byte size (must be 8)
    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// File is too small to contain a valid TIFF header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// Invalid IFD offset (points outside file or to invalid location)
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Required tag is missing from IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// Unsupported compression scheme
    #[error("Unsupported compression: {0} (only JPEG and uncompressed are supported)")]
    UnsupportedCompression(String),

    /// Pyramid contains no tiled image
    #[error("No tiled pyramid level found")]
    NoPyramid,

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),
}

/// Errors that can occur when parsing TMAP files
#[derive(Debug, Clone, Error)]
pub enum TmapError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// File does not start with a TMAP magic
    #[error("Invalid TMAP magic")]
    InvalidMagic,

    /// Version is recognized but not readable
    #[error("Unsupported TMAP version {0}")]
    UnsupportedVersion(u8),

    /// Header declares no usable layer
    #[error("TMAP file declares no pyramid layer")]
    NoLayers,
}

/// Errors raised while loading a color correction table
#[derive(Debug, Clone, Error)]
pub enum ColorError {
    /// LUT file could not be read
    #[error("Failed to read LUT {path}: {message}")]
    Read { path: String, message: String },

    /// LUT is not well-formed XML
    #[error("Invalid LUT XML: {0}")]
    Xml(String),

    /// An element holds the wrong number of values or a non-number
    #[error("Invalid LUT element <{element}>: {message}")]
    InvalidElement { element: &'static str, message: String },

    /// Style name other than Real or Gorgeous
    #[error("Unknown color style '{0}': expected Real or Gorgeous")]
    UnknownStyle(String),
}

// =============================================================================
// Slide Errors
// =============================================================================

/// Errors surfaced by the slide abstraction.
///
/// Every error raised after format detection carries the backend kind that
/// produced it, so callers can attribute failures without extra context.
#[derive(Debug, Clone, Error)]
pub enum SlideError {
    /// No backend recognizes the file
    #[error("Unsupported format for {path}: {reason}")]
    UnsupportedFormat { path: String, reason: String },

    /// The backend failed to open its native handle
    #[error("[{kind}] failed to open slide: {detail}")]
    OpenFailure { kind: BackendKind, detail: String },

    /// Level index outside the pyramid
    #[error("[{kind}] invalid level {level}: slide has {count} level(s)")]
    InvalidLevel {
        kind: BackendKind,
        level: u32,
        count: u32,
    },

    /// Malformed region or tile request
    #[error("[{kind}] invalid argument: {message}")]
    InvalidArgument { kind: BackendKind, message: String },

    /// Backend read failure or inconsistent backend geometry.
    ///
    /// `fatal` marks failures after which the native handle cannot be
    /// trusted again.
    #[error("[{kind}] backend I/O error: {message}")]
    BackendIo {
        kind: BackendKind,
        message: String,
        fatal: bool,
    },

    /// Pixel data could not be decoded
    #[error("[{kind}] decode error: {message}")]
    Decode { kind: BackendKind, message: String },

    /// Operation attempted on a closed slide
    #[error("[{kind}] slide handle is closed")]
    HandleClosed { kind: BackendKind },
}

impl SlideError {
    /// Backend kind the error originated from, if detection got that far.
    pub fn kind(&self) -> Option<BackendKind> {
        match self {
            SlideError::UnsupportedFormat { .. } => None,
            SlideError::OpenFailure { kind, .. }
            | SlideError::InvalidLevel { kind, .. }
            | SlideError::InvalidArgument { kind, .. }
            | SlideError::BackendIo { kind, .. }
            | SlideError::Decode { kind, .. }
            | SlideError::HandleClosed { kind } => Some(*kind),
        }
    }

    /// Shorthand for `InvalidArgument`.
    pub fn invalid_argument(kind: BackendKind, message: impl Into<String>) -> Self {
        SlideError::InvalidArgument {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for a recoverable `BackendIo`.
    pub fn backend_io(kind: BackendKind, message: impl Into<String>) -> Self {
        SlideError::BackendIo {
            kind,
            message: message.into(),
            fatal: false,
        }
    }

    /// `BackendIo` that poisons the handle it came from.
    pub fn fatal_io(kind: BackendKind, message: impl Into<String>) -> Self {
        SlideError::BackendIo {
            kind,
            message: message.into(),
            fatal: true,
        }
    }

    /// Whether the handle must refuse every later operation.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, SlideError::BackendIo { fatal: true, .. })
    }

    /// Shorthand for `Decode`.
    pub fn decode(kind: BackendKind, message: impl Into<String>) -> Self {
        SlideError::Decode {
            kind,
            message: message.into(),
        }
    }
}

// =============================================================================
// Tile Errors
// =============================================================================

/// Errors raised while producing encoded DeepZoom tiles
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// Underlying slide read failed
    #[error(transparent)]
    Slide(#[from] SlideError),

    /// Tile path could not be parsed
    #[error("Invalid tile path: {0}")]
    InvalidPath(String),

    /// JPEG quality outside 1-100
    #[error("Invalid JPEG quality {0}: must be between 1 and 100")]
    InvalidQuality(u8),

    /// Encoding the output image failed
    #[error("Failed to encode tile: {message}")]
    Encode { message: String },
}
