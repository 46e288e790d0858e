use std::num::NonZeroUsize;
use std::sync::Mutex;

use bytes::{Bytes, BytesMut};
use lru::LruCache;
use tracing::trace;

use super::range_reader::check_range;
use super::RangeReader;
use crate::error::IoError;

/// Default block size: 256KB.
pub const DEFAULT_BLOCK_SIZE: usize = 256 * 1024;

/// Default cache capacity in number of blocks (25.6MB with default blocks).
pub const DEFAULT_BLOCK_CACHE_CAPACITY: usize = 100;

/// Block-based caching layer that wraps any RangeReader.
///
/// Format parsers issue many small reads at scattered offsets (IFD entries,
/// tile tables, tile payloads). The cache turns them into fixed-size aligned
/// block reads kept in an LRU:
///
/// ```text
///   read_exact_at(offset, len)
///          │
///          ▼
///   ┌──────────────┐  hit   ┌──────────────────┐
///   │ block index  │───────▶│ LruCache<u64, B> │
///   └──────────────┘        └──────────────────┘
///          │ miss
///          ▼
///   inner.read_exact_at(block * block_size, block_size)
/// ```
pub struct BlockCache<R> {
    inner: R,
    block_size: usize,
    cache: Mutex<LruCache<u64, Bytes>>,
}

impl<R: RangeReader> BlockCache<R> {
    /// Create a new BlockCache with default block size and capacity.
    pub fn new(inner: R) -> Self {
        Self::with_capacity(inner, DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_CACHE_CAPACITY)
    }

    /// Create a new BlockCache with custom block size and capacity.
    ///
    /// Zero values are bumped to one so the cache is always usable.
    pub fn with_capacity(inner: R, block_size: usize, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            block_size: block_size.max(1),
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Access the wrapped reader.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Number of blocks currently cached.
    pub fn cached_blocks(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn get_block(&self, block_idx: u64) -> Result<Bytes, IoError> {
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(data) = cache.get(&block_idx) {
                return Ok(data.clone());
            }
        }

        let data = self.fetch_block_from_source(block_idx)?;
        trace!(
            source = self.inner.identifier(),
            block = block_idx,
            len = data.len(),
            "block cache miss"
        );

        if let Ok(mut cache) = self.cache.lock() {
            cache.put(block_idx, data.clone());
        }
        Ok(data)
    }

    fn fetch_block_from_source(&self, block_idx: u64) -> Result<Bytes, IoError> {
        let offset = block_idx * self.block_size as u64;
        let size = self.inner.size();

        // The last block may be short
        let remaining = size.saturating_sub(offset);
        if remaining == 0 {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: self.block_size as u64,
                size,
            });
        }

        let len = std::cmp::min(self.block_size as u64, remaining) as usize;
        self.inner.read_exact_at(offset, len)
    }
}

impl<R: RangeReader> RangeReader for BlockCache<R> {
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.inner.size())?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        let block_size = self.block_size as u64;
        let start_block = offset / block_size;
        let end_block = (offset + len as u64 - 1) / block_size;

        if start_block == end_block {
            let block = self.get_block(start_block)?;
            let within = (offset % block_size) as usize;
            return Ok(block.slice(within..within + len));
        }

        let mut result = BytesMut::with_capacity(len);
        let mut current = offset;
        let mut remaining = len;
        for block_idx in start_block..=end_block {
            let block = self.get_block(block_idx)?;
            let within = (current % block_size) as usize;
            let take = std::cmp::min(block.len() - within, remaining);
            result.extend_from_slice(&block[within..within + take]);
            remaining -= take;
            current += take as u64;
        }
        Ok(result.freeze())
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }
}
