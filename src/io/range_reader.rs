use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

use bytes::Bytes;

use crate::error::IoError;

/// Trait for reading byte ranges from a slide file.
///
/// Format parsers only ever ask for `(offset, len)` windows, so a backend can
/// sit on a local file, an in-memory buffer, or a cached view of either.
pub trait RangeReader: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Returns an error if the range is out of bounds or if the read fails.
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError>;

    /// Get the total size of the resource in bytes.
    fn size(&self) -> u64;

    /// Get a unique identifier for this resource (for logging and cache keys).
    fn identifier(&self) -> &str;
}

/// Check a requested range against the resource size.
#[inline]
pub(crate) fn check_range(offset: u64, len: usize, size: u64) -> Result<(), IoError> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(IoError::RangeOutOfBounds {
            offset,
            requested: len as u64,
            size,
        }),
    }
}

// =============================================================================
// Local File Reader
// =============================================================================

/// Range reader over a local file.
///
/// Reads seek and fill under a mutex, so one reader can be shared between
/// threads. The slide lock already serializes backend calls; the mutex only
/// guards the file cursor.
pub struct FileRangeReader {
    file: Mutex<File>,
    size: u64,
    identifier: String,
}

impl FileRangeReader {
    /// Open a file for range reads.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            size,
            identifier: path.display().to_string(),
        })
    }
}

impl RangeReader for FileRangeReader {
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.size)?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        let mut file = self
            .file
            .lock()
            .map_err(|_| IoError::Io(format!("{}: file lock poisoned", self.identifier)))?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

// =============================================================================
// In-Memory Reader
// =============================================================================

/// Range reader over bytes already in memory.
#[derive(Debug, Clone)]
pub struct MemoryRangeReader {
    data: Bytes,
    identifier: String,
}

impl MemoryRangeReader {
    pub fn new(data: impl Into<Bytes>, identifier: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            identifier: identifier.into(),
        }
    }
}

impl RangeReader for MemoryRangeReader {
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.data.len() as u64)?;
        let start = offset as usize;
        Ok(self.data.slice(start..start + len))
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

// =============================================================================
// Endian Helper Functions
// =============================================================================
//
// TIFF files declare their byte order in the header and TMAP headers are
// always little-endian. Callers guarantee slice length.

#[inline]
pub fn read_u16_le(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

#[inline]
pub fn read_u16_be(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

#[inline]
pub fn read_u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[inline]
pub fn read_u32_be(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[inline]
pub fn read_u64_le(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(raw)
}

#[inline]
pub fn read_u64_be(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(raw)
}

#[inline]
pub fn read_f32_le(bytes: &[u8]) -> f32 {
    f32::from_bits(read_u32_le(bytes))
}
