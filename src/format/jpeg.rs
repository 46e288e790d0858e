//! JPEG stream helpers shared by the TIFF and TMAP readers.
//!
//! Aperio and many pyramidal TIFF writers store each tile as an
//! "abbreviated" JPEG stream: SOI, then straight to SOS, with the DQT/DHT
//! segments kept once in the `JPEGTables` tag. Before such a tile can be
//! decoded the two are spliced:
//!
//! ```text
//! tables: SOI [DQT DHT ...] EOI
//! tile:   SOI [SOF SOS scan] EOI
//! merged: SOI [DQT DHT ...] [SOF SOS scan] EOI
//! ```

use std::io::Cursor;

use bytes::{Bytes, BytesMut};
use image::{ImageFormat, ImageReader, RgbaImage};

pub const SOI: [u8; 2] = [0xFF, 0xD8];
pub const EOI: [u8; 2] = [0xFF, 0xD9];
const DHT: u8 = 0xC4;
const DQT: u8 = 0xDB;
const SOS: u8 = 0xDA;

/// True when the stream reaches SOS before any DQT/DHT segment.
pub fn is_abbreviated_stream(data: &[u8]) -> bool {
    if data.len() < 4 || data[0..2] != SOI {
        return false;
    }

    let mut pos = 2;
    while pos + 1 < data.len() {
        if data[pos] != 0xFF {
            pos += 1;
            continue;
        }
        match data[pos + 1] {
            DQT | DHT => return false,
            SOS => return true,
            0x00 | 0xD8 | 0xD9 | 0xFF => pos += 2,
            _ if pos + 3 < data.len() => {
                let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
                pos += 2 + length;
            }
            _ => pos += 2,
        }
    }
    false
}

/// Splice shared tables into an abbreviated tile stream.
pub fn merge_jpeg_tables(tables: &[u8], tile_data: &[u8]) -> Bytes {
    if tables.is_empty() {
        return Bytes::copy_from_slice(tile_data);
    }
    if tile_data.is_empty() {
        return Bytes::new();
    }

    let tables_end = if tables.ends_with(&EOI) {
        tables.len() - 2
    } else {
        tables.len()
    };
    let tile_start = if tile_data.starts_with(&SOI) { 2 } else { 0 };

    let mut merged = BytesMut::with_capacity(tables_end + tile_data.len() - tile_start);
    merged.extend_from_slice(&tables[..tables_end]);
    merged.extend_from_slice(&tile_data[tile_start..]);
    merged.freeze()
}

/// Make a tile stream decodable, merging tables only when it needs them.
pub fn prepare_tile_jpeg(tables: Option<&[u8]>, tile_data: &[u8]) -> Bytes {
    match tables {
        Some(tables) if is_abbreviated_stream(tile_data) => merge_jpeg_tables(tables, tile_data),
        _ => Bytes::copy_from_slice(tile_data),
    }
}

/// Offset of the first `FF D8 FF` sequence, for payloads with a vendor prefix.
pub fn find_jpeg_start(data: &[u8]) -> Option<usize> {
    data.windows(3).position(|w| w == [0xFF, 0xD8, 0xFF])
}

/// Decode a complete JPEG stream into RGBA pixels.
pub fn decode_jpeg(data: &[u8]) -> Result<RgbaImage, image::ImageError> {
    let reader = ImageReader::with_format(Cursor::new(data), ImageFormat::Jpeg);
    Ok(reader.decode()?.to_rgba8())
}
