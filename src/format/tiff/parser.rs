//! TIFF header, IFD and tag value parsing.
//!
//! ```text
//! Classic TIFF header (8 bytes)       BigTIFF header (16 bytes)
//! 0..2  "II" | "MM"                   0..2   "II" | "MM"
//! 2..4  42                            2..4   43
//! 4..8  first IFD offset (u32)        4..6   offset size (8)
//!                                     6..8   reserved
//!                                     8..16  first IFD offset (u64)
//! ```
//!
//! An IFD is an entry count, that many fixed-size entries, then the offset of
//! the next IFD (0 terminates the chain). Values that fit in the entry's value
//! field are stored inline; larger ones live at the offset it holds.

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::{
    read_u16_be, read_u16_le, read_u32_be, read_u32_le, read_u64_be, read_u64_le, RangeReader,
};

use super::tags::{FieldType, TiffTag};

/// Size of classic TIFF header in bytes
pub const TIFF_HEADER_SIZE: usize = 8;

/// Size of BigTIFF header in bytes
pub const BIGTIFF_HEADER_SIZE: usize = 16;

/// Upper bound on IFDs followed in one file; also breaks offset cycles.
pub const MAX_IFDS: usize = 100;

// =============================================================================
// ByteOrder
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

impl ByteOrder {
    #[inline]
    pub fn read_u16(self, bytes: &[u8]) -> u16 {
        match self {
            ByteOrder::LittleEndian => read_u16_le(bytes),
            ByteOrder::BigEndian => read_u16_be(bytes),
        }
    }

    #[inline]
    pub fn read_u32(self, bytes: &[u8]) -> u32 {
        match self {
            ByteOrder::LittleEndian => read_u32_le(bytes),
            ByteOrder::BigEndian => read_u32_be(bytes),
        }
    }

    #[inline]
    pub fn read_u64(self, bytes: &[u8]) -> u64 {
        match self {
            ByteOrder::LittleEndian => read_u64_le(bytes),
            ByteOrder::BigEndian => read_u64_be(bytes),
        }
    }
}

// =============================================================================
// TiffHeader
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    pub byte_order: ByteOrder,
    pub is_bigtiff: bool,
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    /// Parse a header from the first bytes of a file.
    ///
    /// `bytes` should hold 16 bytes when available so BigTIFF can be read;
    /// `file_size` bounds the first IFD offset.
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self, TiffError> {
        if bytes.len() < TIFF_HEADER_SIZE {
            return Err(TiffError::FileTooSmall {
                required: TIFF_HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
        let byte_order = match magic {
            0x4949 => ByteOrder::LittleEndian,
            0x4D4D => ByteOrder::BigEndian,
            _ => return Err(TiffError::InvalidMagic(magic)),
        };

        let version = byte_order.read_u16(&bytes[2..4]);
        let (is_bigtiff, first_ifd_offset) = match version {
            42 => (false, byte_order.read_u32(&bytes[4..8]) as u64),
            43 => {
                if bytes.len() < BIGTIFF_HEADER_SIZE {
                    return Err(TiffError::FileTooSmall {
                        required: BIGTIFF_HEADER_SIZE as u64,
                        actual: bytes.len() as u64,
                    });
                }
                let offset_size = byte_order.read_u16(&bytes[4..6]);
                if offset_size != 8 {
                    return Err(TiffError::InvalidBigTiffOffsetSize(offset_size));
                }
                (true, byte_order.read_u64(&bytes[8..16]))
            }
            other => return Err(TiffError::InvalidVersion(other)),
        };

        if first_ifd_offset >= file_size {
            return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
        }

        Ok(TiffHeader {
            byte_order,
            is_bigtiff,
            first_ifd_offset,
        })
    }

    /// Read and parse the header from a reader.
    pub fn read<R: RangeReader + ?Sized>(reader: &R) -> Result<Self, TiffError> {
        let len = (BIGTIFF_HEADER_SIZE as u64).min(reader.size()) as usize;
        let bytes = reader.read_exact_at(0, len)?;
        Self::parse(&bytes, reader.size())
    }

    /// 12 bytes for classic TIFF, 20 for BigTIFF.
    #[inline]
    pub const fn ifd_entry_size(&self) -> usize {
        if self.is_bigtiff {
            20
        } else {
            12
        }
    }

    #[inline]
    pub const fn ifd_count_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            2
        }
    }

    #[inline]
    pub const fn value_offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }
}

// =============================================================================
// IFD Entries
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfdEntry {
    pub tag_id: u16,
    pub field_type_raw: u16,
    pub field_type: Option<FieldType>,
    pub count: u64,
    /// Raw value/offset field (4 or 8 bytes)
    pub value_offset_bytes: Vec<u8>,
    pub is_inline: bool,
}

impl IfdEntry {
    /// Total byte size of the entry's values, if the type is known.
    pub fn value_byte_size(&self) -> Option<u64> {
        self.field_type
            .map(|t| t.size_in_bytes() as u64 * self.count)
    }

    /// Offset of out-of-line values.
    pub fn value_offset(&self, byte_order: ByteOrder) -> u64 {
        if self.value_offset_bytes.len() >= 8 {
            byte_order.read_u64(&self.value_offset_bytes)
        } else {
            byte_order.read_u32(&self.value_offset_bytes) as u64
        }
    }

    /// Single inline integer value (Short, Long or Long8).
    pub fn inline_u64(&self, byte_order: ByteOrder) -> Option<u64> {
        if !self.is_inline || self.count != 1 {
            return None;
        }
        match self.field_type? {
            FieldType::Short => Some(byte_order.read_u16(&self.value_offset_bytes) as u64),
            FieldType::Long => Some(byte_order.read_u32(&self.value_offset_bytes) as u64),
            FieldType::Long8 | FieldType::Ifd8 if self.value_offset_bytes.len() >= 8 => {
                Some(byte_order.read_u64(&self.value_offset_bytes))
            }
            _ => None,
        }
    }
}

// =============================================================================
// IFD
// =============================================================================

#[derive(Debug, Clone)]
pub struct Ifd {
    /// File offset the IFD was read from
    pub offset: u64,
    pub entries: Vec<IfdEntry>,
    pub next_ifd_offset: u64,
}

impl Ifd {
    /// Read one IFD at `offset`.
    pub fn read<R: RangeReader + ?Sized>(
        reader: &R,
        header: &TiffHeader,
        offset: u64,
    ) -> Result<Self, TiffError> {
        if offset >= reader.size() {
            return Err(TiffError::InvalidIfdOffset(offset));
        }

        let byte_order = header.byte_order;
        let count_bytes = reader.read_exact_at(offset, header.ifd_count_size())?;
        let entry_count = if header.is_bigtiff {
            byte_order.read_u64(&count_bytes)
        } else {
            byte_order.read_u16(&count_bytes) as u64
        };

        let entry_size = header.ifd_entry_size();
        let body_len = entry_count as usize * entry_size + header.value_offset_size();
        let body = reader.read_exact_at(offset + header.ifd_count_size() as u64, body_len)?;

        let mut entries = Vec::with_capacity(entry_count as usize);
        for i in 0..entry_count as usize {
            let raw = &body[i * entry_size..(i + 1) * entry_size];
            let tag_id = byte_order.read_u16(&raw[0..2]);
            let field_type_raw = byte_order.read_u16(&raw[2..4]);
            let field_type = FieldType::from_u16(field_type_raw);
            let (count, value_bytes) = if header.is_bigtiff {
                (byte_order.read_u64(&raw[4..12]), raw[12..20].to_vec())
            } else {
                (byte_order.read_u32(&raw[4..8]) as u64, raw[8..12].to_vec())
            };
            let is_inline = field_type
                .map(|t| t.fits_inline(count, header.is_bigtiff))
                .unwrap_or(false);

            entries.push(IfdEntry {
                tag_id,
                field_type_raw,
                field_type,
                count,
                value_offset_bytes: value_bytes,
                is_inline,
            });
        }

        let next_raw = &body[entry_count as usize * entry_size..];
        let next_ifd_offset = if header.is_bigtiff {
            byte_order.read_u64(next_raw)
        } else {
            byte_order.read_u32(next_raw) as u64
        };

        Ok(Ifd {
            offset,
            entries,
            next_ifd_offset,
        })
    }

    /// Follow the IFD chain from the header, stopping at `MAX_IFDS`.
    pub fn read_chain<R: RangeReader + ?Sized>(
        reader: &R,
        header: &TiffHeader,
    ) -> Result<Vec<Self>, TiffError> {
        let mut ifds: Vec<Ifd> = Vec::new();
        let mut offset = header.first_ifd_offset;
        while offset != 0 && ifds.len() < MAX_IFDS {
            if ifds.iter().any(|ifd| ifd.offset == offset) {
                break;
            }
            let ifd = Ifd::read(reader, header, offset)?;
            offset = ifd.next_ifd_offset;
            ifds.push(ifd);
        }
        Ok(ifds)
    }

    pub fn get_entry_by_tag(&self, tag: TiffTag) -> Option<&IfdEntry> {
        self.entries.iter().find(|e| e.tag_id == tag.as_u16())
    }

    pub fn has_tag(&self, tag: TiffTag) -> bool {
        self.get_entry_by_tag(tag).is_some()
    }

    /// Inline scalar value of a tag.
    pub fn get_u64(&self, tag: TiffTag, byte_order: ByteOrder) -> Option<u64> {
        self.get_entry_by_tag(tag)?.inline_u64(byte_order)
    }

    pub fn get_u32(&self, tag: TiffTag, byte_order: ByteOrder) -> Option<u32> {
        self.get_u64(tag, byte_order)
            .and_then(|v| u32::try_from(v).ok())
    }

    /// Scalar tag that must be present.
    pub fn require_u32(&self, tag: TiffTag, byte_order: ByteOrder) -> Result<u32, TiffError> {
        self.get_u32(tag, byte_order)
            .ok_or(TiffError::MissingTag(tag.name()))
    }
}

// =============================================================================
// Value Reading
// =============================================================================

/// Raw bytes of an entry's values, inline or fetched.
pub fn read_entry_bytes<R: RangeReader + ?Sized>(
    reader: &R,
    header: &TiffHeader,
    entry: &IfdEntry,
) -> Result<Bytes, TiffError> {
    let size = entry
        .value_byte_size()
        .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;
    if entry.is_inline {
        return Ok(Bytes::copy_from_slice(
            &entry.value_offset_bytes[..size as usize],
        ));
    }
    let offset = entry.value_offset(header.byte_order);
    Ok(reader.read_exact_at(offset, size as usize)?)
}

/// Integer array values (TileOffsets, TileByteCounts, StripOffsets).
pub fn read_u64_array<R: RangeReader + ?Sized>(
    reader: &R,
    header: &TiffHeader,
    entry: &IfdEntry,
) -> Result<Vec<u64>, TiffError> {
    let field_type = entry
        .field_type
        .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;
    if entry.count == 0 {
        return Ok(Vec::new());
    }

    let bytes = read_entry_bytes(reader, header, entry)?;
    let byte_order = header.byte_order;
    let width = field_type.size_in_bytes();
    let values = match field_type {
        FieldType::Short => bytes
            .chunks_exact(width)
            .map(|c| byte_order.read_u16(c) as u64)
            .collect(),
        FieldType::Long => bytes
            .chunks_exact(width)
            .map(|c| byte_order.read_u32(c) as u64)
            .collect(),
        FieldType::Long8 | FieldType::Ifd8 => bytes
            .chunks_exact(width)
            .map(|c| byte_order.read_u64(c))
            .collect(),
        other => {
            return Err(TiffError::InvalidTagValue {
                tag: "array",
                message: format!("expected integer array, got {other:?}"),
            })
        }
    };
    Ok(values)
}

/// ASCII tag value with trailing NULs removed.
pub fn read_ascii<R: RangeReader + ?Sized>(
    reader: &R,
    header: &TiffHeader,
    entry: &IfdEntry,
) -> Result<String, TiffError> {
    let bytes = read_entry_bytes(reader, header, entry)?;
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
}
