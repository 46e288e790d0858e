//! TIFF tag, field type and compression vocabulary.
//!
//! Only the identifiers a slide reader needs are named; anything else is kept
//! as a raw number on the entry and ignored.

// =============================================================================
// Field Types
// =============================================================================

/// Encoding of an IFD entry's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FieldType {
    Byte = 1,
    Ascii = 2,
    Short = 3,
    Long = 4,
    Rational = 5,
    Undefined = 7,
    /// BigTIFF only
    Long8 = 16,
    /// BigTIFF only
    Ifd8 = 18,
}

impl FieldType {
    /// Size of a single value of this type in bytes.
    #[inline]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            FieldType::Byte | FieldType::Ascii | FieldType::Undefined => 1,
            FieldType::Short => 2,
            FieldType::Long => 4,
            FieldType::Rational | FieldType::Long8 | FieldType::Ifd8 => 8,
        }
    }

    /// Returns `None` for types a slide reader never needs.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(FieldType::Byte),
            2 => Some(FieldType::Ascii),
            3 => Some(FieldType::Short),
            4 => Some(FieldType::Long),
            5 => Some(FieldType::Rational),
            7 => Some(FieldType::Undefined),
            16 => Some(FieldType::Long8),
            18 => Some(FieldType::Ifd8),
            _ => None,
        }
    }

    /// Whether `count` values of this type fit in the entry's value field.
    #[inline]
    pub fn fits_inline(self, count: u64, is_bigtiff: bool) -> bool {
        let threshold = if is_bigtiff { 8 } else { 4 };
        self.size_in_bytes() as u64 * count <= threshold
    }
}

// =============================================================================
// Tags
// =============================================================================

/// Tag IDs used to locate pyramid levels, tiles and associated images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TiffTag {
    /// Bit 0 set marks a reduced-resolution image
    NewSubfileType = 254,
    ImageWidth = 256,
    ImageLength = 257,
    BitsPerSample = 258,
    Compression = 259,
    PhotometricInterpretation = 262,
    /// Vendor metadata (Aperio key/value pairs, Ventana XML, "label", "macro")
    ImageDescription = 270,
    StripOffsets = 273,
    SamplesPerPixel = 277,
    RowsPerStrip = 278,
    StripByteCounts = 279,
    PlanarConfiguration = 284,
    TileWidth = 322,
    TileLength = 323,
    TileOffsets = 324,
    TileByteCounts = 325,
    /// Shared quantization/Huffman tables for abbreviated JPEG tiles
    JpegTables = 347,
}

impl TiffTag {
    /// Returns `None` for tags outside the vocabulary above.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            254 => Some(TiffTag::NewSubfileType),
            256 => Some(TiffTag::ImageWidth),
            257 => Some(TiffTag::ImageLength),
            258 => Some(TiffTag::BitsPerSample),
            259 => Some(TiffTag::Compression),
            262 => Some(TiffTag::PhotometricInterpretation),
            270 => Some(TiffTag::ImageDescription),
            273 => Some(TiffTag::StripOffsets),
            277 => Some(TiffTag::SamplesPerPixel),
            278 => Some(TiffTag::RowsPerStrip),
            279 => Some(TiffTag::StripByteCounts),
            284 => Some(TiffTag::PlanarConfiguration),
            322 => Some(TiffTag::TileWidth),
            323 => Some(TiffTag::TileLength),
            324 => Some(TiffTag::TileOffsets),
            325 => Some(TiffTag::TileByteCounts),
            347 => Some(TiffTag::JpegTables),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Name used in error messages.
    pub const fn name(self) -> &'static str {
        match self {
            TiffTag::NewSubfileType => "NewSubfileType",
            TiffTag::ImageWidth => "ImageWidth",
            TiffTag::ImageLength => "ImageLength",
            TiffTag::BitsPerSample => "BitsPerSample",
            TiffTag::Compression => "Compression",
            TiffTag::PhotometricInterpretation => "PhotometricInterpretation",
            TiffTag::ImageDescription => "ImageDescription",
            TiffTag::StripOffsets => "StripOffsets",
            TiffTag::SamplesPerPixel => "SamplesPerPixel",
            TiffTag::RowsPerStrip => "RowsPerStrip",
            TiffTag::StripByteCounts => "StripByteCounts",
            TiffTag::PlanarConfiguration => "PlanarConfiguration",
            TiffTag::TileWidth => "TileWidth",
            TiffTag::TileLength => "TileLength",
            TiffTag::TileOffsets => "TileOffsets",
            TiffTag::TileByteCounts => "TileByteCounts",
            TiffTag::JpegTables => "JPEGTables",
        }
    }
}

// =============================================================================
// Compression
// =============================================================================

/// Compression schemes seen in slide files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Lzw,
    OldJpeg,
    Jpeg,
    Deflate,
    /// Aperio JPEG 2000 (YCbCr or RGB)
    Jpeg2000,
    Other(u16),
}

impl Compression {
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => Compression::None,
            5 => Compression::Lzw,
            6 => Compression::OldJpeg,
            7 => Compression::Jpeg,
            8 | 32946 => Compression::Deflate,
            33003 | 33005 => Compression::Jpeg2000,
            other => Compression::Other(other),
        }
    }

    /// Tile payloads this crate can turn into pixels.
    #[inline]
    pub const fn is_supported(self) -> bool {
        matches!(self, Compression::None | Compression::Jpeg)
    }

    pub fn name(self) -> String {
        match self {
            Compression::None => "None".to_string(),
            Compression::Lzw => "LZW".to_string(),
            Compression::OldJpeg => "Old JPEG".to_string(),
            Compression::Jpeg => "JPEG".to_string(),
            Compression::Deflate => "Deflate".to_string(),
            Compression::Jpeg2000 => "JPEG 2000".to_string(),
            Compression::Other(v) => format!("unknown ({v})"),
        }
    }
}
