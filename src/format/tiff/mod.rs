//! TIFF and BigTIFF parsing for pyramidal slide files.
//!
//! - **Byte order**: the header declares II (little-endian) or MM
//!   (big-endian); every multi-byte value honors it.
//! - **Classic vs BigTIFF**: 32-bit vs 64-bit offsets, handled by the same
//!   parser.
//! - **IFDs**: one per image. Slides keep pyramid levels, thumbnails,
//!   labels and macro images side by side; [`TiffPyramid`] tells them apart.

mod parser;
mod pyramid;
mod tags;

pub use parser::{
    read_ascii, read_entry_bytes, read_u64_array, ByteOrder, Ifd, IfdEntry, TiffHeader,
    BIGTIFF_HEADER_SIZE, MAX_IFDS, TIFF_HEADER_SIZE,
};
pub use pyramid::{Layout, TiffAssociated, TiffChannel, TiffImage, TiffLevel, TiffPyramid};
pub use tags::{Compression, FieldType, TiffTag};
