//! Tile cache for encoded DeepZoom tiles.
//!
//! This module provides an LRU cache for encoded tiles, so repeated requests
//! skip the read, resample and encode steps.
//!
//! # Cache Key
//!
//! Tiles are cached by a composite key including:
//! - Slide identifier (path or ID)
//! - DeepZoom level, column and row
//! - Output format and JPEG quality
//!
//! # Size-Based Eviction
//!
//! The cache tracks the total size of cached tiles in bytes and evicts
//! least-recently-used entries when the capacity is exceeded.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use lru::LruCache;

use super::encoder::TileFormat;

/// Default cache capacity: 100MB
pub const DEFAULT_TILE_CACHE_CAPACITY: usize = 100 * 1024 * 1024;

/// Default maximum number of entries (to bound LRU overhead)
const DEFAULT_MAX_ENTRIES: usize = 10_000;

// =============================================================================
// Cache Key
// =============================================================================

/// Cache key for encoded tiles.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileCacheKey {
    /// Slide identifier, usually its path
    pub slide_id: Arc<str>,

    /// DeepZoom level (0 = 1x1 root)
    pub level: u32,

    pub col: u32,

    pub row: u32,

    pub format: TileFormat,

    /// JPEG quality (1-100); always 0 for PNG
    pub quality: u8,
}

impl TileCacheKey {
    pub fn new(
        slide_id: impl Into<Arc<str>>,
        level: u32,
        col: u32,
        row: u32,
        format: TileFormat,
        quality: u8,
    ) -> Self {
        Self {
            slide_id: slide_id.into(),
            level,
            col,
            row,
            format,
            // PNG output does not depend on quality
            quality: match format {
                TileFormat::Jpeg => quality,
                TileFormat::Png => 0,
            },
        }
    }
}

// =============================================================================
// Tile Cache
// =============================================================================

struct Inner {
    cache: LruCache<TileCacheKey, Bytes>,
    /// Current total size in bytes
    current_size: usize,
}

/// LRU cache for encoded tiles with size-based capacity.
///
/// Safe to share between threads; every operation takes one short lock.
///
/// # Example
///
/// ```
/// use wsi_pyramid::tile::{TileCache, TileCacheKey, TileFormat};
/// use bytes::Bytes;
///
/// let cache = TileCache::new();
///
/// let key = TileCacheKey::new("slides/sample.svs", 12, 1, 2, TileFormat::Jpeg, 80);
/// let tile_data = Bytes::from(vec![0xFF, 0xD8, 0xFF, 0xE0]);
///
/// cache.put(key.clone(), tile_data.clone());
/// assert_eq!(cache.get(&key), Some(tile_data));
/// ```
pub struct TileCache {
    inner: Mutex<Inner>,

    /// Maximum total size in bytes
    max_size: usize,
}

impl TileCache {
    /// Create a new tile cache with default capacity (100MB).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TILE_CACHE_CAPACITY)
    }

    /// Create a new tile cache with the specified capacity in bytes.
    pub fn with_capacity(max_size: usize) -> Self {
        Self::with_capacity_and_entries(max_size, DEFAULT_MAX_ENTRIES)
    }

    /// Create a new tile cache with specified capacity and maximum entries.
    ///
    /// # Arguments
    ///
    /// * `max_size` - Maximum total size of cached tiles in bytes
    /// * `max_entries` - Maximum number of entries in the cache
    pub fn with_capacity_and_entries(max_size: usize, max_entries: usize) -> Self {
        let entries = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                cache: LruCache::new(entries),
                current_size: 0,
            }),
            max_size,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Entries stay consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Get a tile and mark it as recently used.
    pub fn get(&self, key: &TileCacheKey) -> Option<Bytes> {
        self.lock().cache.get(key).cloned()
    }

    /// Check if a tile is in the cache without updating LRU order.
    pub fn contains(&self, key: &TileCacheKey) -> bool {
        self.lock().cache.contains(key)
    }

    /// Store a tile in the cache.
    ///
    /// If the cache is over capacity after insertion, least-recently-used
    /// entries are evicted until the cache is within capacity. A tile larger
    /// than the whole capacity is not stored.
    pub fn put(&self, key: TileCacheKey, data: Bytes) {
        if data.len() > self.max_size {
            return;
        }

        let mut inner = self.lock();
        let data_size = data.len();

        // Returns the replaced value, or the entry evicted for count
        if let Some((_, old)) = inner.cache.push(key, data) {
            inner.current_size = inner.current_size.saturating_sub(old.len());
        }
        inner.current_size += data_size;

        while inner.current_size > self.max_size {
            match inner.cache.pop_lru() {
                Some((_, evicted)) => {
                    inner.current_size = inner.current_size.saturating_sub(evicted.len());
                }
                None => break,
            }
        }
    }

    /// Remove a tile from the cache.
    pub fn remove(&self, key: &TileCacheKey) -> Option<Bytes> {
        let mut inner = self.lock();
        let data = inner.cache.pop(key)?;
        inner.current_size = inner.current_size.saturating_sub(data.len());
        Some(data)
    }

    /// Drop every tile of one slide, e.g. after it was closed.
    pub fn remove_slide(&self, slide_id: &str) -> usize {
        let mut inner = self.lock();
        let keys: Vec<TileCacheKey> = inner
            .cache
            .iter()
            .filter(|(k, _)| &*k.slide_id == slide_id)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            if let Some(data) = inner.cache.pop(key) {
                inner.current_size = inner.current_size.saturating_sub(data.len());
            }
        }
        keys.len()
    }

    /// Clear all entries from the cache.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.cache.clear();
        inner.current_size = 0;
    }

    /// Get the current number of cached tiles.
    pub fn len(&self) -> usize {
        self.lock().cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().cache.is_empty()
    }

    /// Get the current total size of cached tiles in bytes.
    pub fn size(&self) -> usize {
        self.lock().current_size
    }

    /// Get the maximum capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.max_size
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileCache")
            .field("len", &self.len())
            .field("size", &self.size())
            .field("max_size", &self.max_size)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
