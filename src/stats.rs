//! Observability types returned by the cache, reader, and builder.

use std::sync::atomic::{AtomicU64, Ordering};

//tp CacheStats
/// Snapshot of a [`crate::cache::ChunkCache`]'s hit/miss counters and
/// resident-chunk footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub loads_failed: u64,
    pub chunks_resident: usize,
    pub approx_bytes_resident: usize,
}

/// Atomic counters backing [`CacheStats`]; cheap to update from any thread.
#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    pub(crate) hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) loads_failed: AtomicU64,
}

impl CacheCounters {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn record_load_failed(&self) {
        self.loads_failed.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
    pub(crate) fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
    pub(crate) fn loads_failed(&self) -> u64 {
        self.loads_failed.load(Ordering::Relaxed)
    }
}

//tp BuildStats
/// Summary returned by [`crate::builder::Builder::build`] and
/// [`crate::builder::Builder::expand_to_multifile`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildStats {
    pub total_stars: u64,
    pub total_chunks: u32,
    pub num_pixels: u32,
    pub duplicates_removed: u64,
    pub records_filtered: u64,
    pub build_duration: std::time::Duration,
}
