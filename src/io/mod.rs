//! Byte-range I/O used by the pure-Rust format parsers.

mod block_cache;
mod range_reader;

pub use block_cache::{BlockCache, DEFAULT_BLOCK_CACHE_CAPACITY, DEFAULT_BLOCK_SIZE};
pub use range_reader::{
    read_f32_le, read_u16_be, read_u16_le, read_u32_be, read_u32_le, read_u64_be, read_u64_le,
    FileRangeReader, MemoryRangeReader, RangeReader,
};
