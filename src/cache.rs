//! Bounded, concurrent LRU cache of decompressed chunk payloads.
//!
//! Chunks are handed out as `Arc<[StarRecord]>` clones (design note
//! "cyclic / shared ownership of cached chunks", strategy (a)): once a
//! caller holds a clone, eviction from the cache map can never
//! invalidate the buffer it's scanning.

use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use flate2::read::ZlibDecoder;
use memmap2::Mmap;

use crate::format::ChunkDescriptor;
use crate::record::{StarRecord, RECORD_SIZE};
use crate::stats::{CacheCounters, CacheStats};

/// Default capacity (in chunks) for the monolithic variant — roughly
/// 800 MB resident at 1M-record chunks.
pub const DEFAULT_MONOLITHIC_CAPACITY: usize = 10;
/// Default capacity for the multi-file variant, which skips
/// decompression and so can afford to hold more.
pub const DEFAULT_MULTIFILE_CAPACITY: usize = 64;

//tp ChunkSource
/// Where a [`ChunkCache`] actually fetches a chunk's bytes from.
/// Implemented once for each physical layout (monolithic / multi-file).
pub trait ChunkSource: Send + Sync {
    fn load_chunk(&self, chunk_id: u32) -> std::io::Result<Vec<StarRecord>>;
}

//tp MonolithicSource
/// Reads a compressed (or raw) chunk directly out of the memory-mapped
/// catalog file. No locking needed: a read-only `Mmap` slice can be
/// read concurrently from any number of threads.
pub struct MonolithicSource {
    mmap: Mmap,
    chunks: Vec<ChunkDescriptor>,
    compressed: bool,
}

impl MonolithicSource {
    pub fn new(mmap: Mmap, chunks: Vec<ChunkDescriptor>, compressed: bool) -> Self {
        Self {
            mmap,
            chunks,
            compressed,
        }
    }
}

impl ChunkSource for MonolithicSource {
    fn load_chunk(&self, chunk_id: u32) -> std::io::Result<Vec<StarRecord>> {
        let desc = self
            .chunks
            .get(chunk_id as usize)
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "chunk id out of range"))?;
        let start = desc.file_offset as usize;
        let end = start
            .checked_add(desc.compressed_size as usize)
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "chunk extent overflows"))?;
        let raw = self
            .mmap
            .get(start..end)
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "chunk extent past end of file"))?;
        let bytes = if self.compressed {
            let mut decoder = ZlibDecoder::new(raw);
            let mut out = Vec::with_capacity(desc.uncompressed_size as usize);
            decoder.read_to_end(&mut out)?;
            out
        } else {
            raw.to_vec()
        };
        Ok(StarRecord::decode_all(&bytes))
    }
}

//tp MultiFileSource
/// Reads a chunk's already-decompressed payload from
/// `chunks/chunk_NNN.dat`, opening a fresh file handle per load.
pub struct MultiFileSource {
    chunks_dir: PathBuf,
}

impl MultiFileSource {
    pub fn new(chunks_dir: impl Into<PathBuf>) -> Self {
        Self {
            chunks_dir: chunks_dir.into(),
        }
    }

    pub fn chunk_path(&self, chunk_id: u32) -> PathBuf {
        self.chunks_dir.join(format!("chunk_{chunk_id:03}.dat"))
    }
}

impl ChunkSource for MultiFileSource {
    fn load_chunk(&self, chunk_id: u32) -> std::io::Result<Vec<StarRecord>> {
        let bytes = std::fs::read(self.chunk_path(chunk_id))?;
        Ok(StarRecord::decode_all(&bytes))
    }
}

struct Entry {
    buf: Arc<[StarRecord]>,
    // Atomic so a cache hit can bump recency under a shared read lock
    // instead of serializing behind the write lock.
    last_used: AtomicU64,
}

struct CacheInner {
    entries: HashMap<u32, Entry>,
}

//tp ChunkCache
/// Bounded LRU cache over a [`ChunkSource`]. Safe for concurrent use
/// from many threads; see the module docs for the eviction-safety
/// argument.
pub struct ChunkCache {
    source: Arc<dyn ChunkSource>,
    capacity: usize,
    inner: RwLock<CacheInner>,
    clock: AtomicU64,
    counters: CacheCounters,
}

impl ChunkCache {
    pub fn new(source: Arc<dyn ChunkSource>, capacity: usize) -> Self {
        Self {
            source,
            capacity: capacity.max(1),
            inner: RwLock::new(CacheInner { entries: HashMap::new() }),
            clock: AtomicU64::new(0),
            counters: CacheCounters::default(),
        }
    }

    //mp get_or_load
    /// Fetch a chunk's records, loading and decompressing on miss.
    /// Returns `None` (logged) if the chunk could not be loaded — the
    /// caller continues the query with whatever other chunks it has.
    pub fn get_or_load(&self, chunk_id: u32) -> Option<Arc<[StarRecord]>> {
        {
            // Hit fast path: a shared read lock, so concurrent hits never
            // block each other. Recency is an atomic store, not a map
            // mutation, so it doesn't need the write lock either.
            let inner = self.inner.read().unwrap();
            if let Some(entry) = inner.entries.get(&chunk_id) {
                entry.last_used.store(self.clock.fetch_add(1, Ordering::Relaxed), Ordering::Relaxed);
                self.counters.record_hit();
                return Some(entry.buf.clone());
            }
        }

        self.counters.record_miss();
        let buf: Arc<[StarRecord]> = match self.source.load_chunk(chunk_id) {
            Ok(records) => Arc::from(records),
            Err(err) => {
                log::warn!("chunk {chunk_id} failed to load: {err}");
                self.counters.record_load_failed();
                return None;
            }
        };

        let mut inner = self.inner.write().unwrap();
        let stamp = self.clock.fetch_add(1, Ordering::Relaxed);
        // A racing thread may have already inserted this chunk while we
        // were loading outside the lock; prefer its entry over ours.
        if let Some(entry) = inner.entries.get(&chunk_id) {
            entry.last_used.store(stamp, Ordering::Relaxed);
            return Some(entry.buf.clone());
        }
        evict_if_needed(&mut inner, self.capacity);
        inner.entries.insert(
            chunk_id,
            Entry {
                buf: buf.clone(),
                last_used: AtomicU64::new(stamp),
            },
        );
        Some(buf)
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.read().unwrap();
        let chunks_resident = inner.entries.len();
        let approx_bytes_resident = inner
            .entries
            .values()
            .map(|e| e.buf.len() * RECORD_SIZE)
            .sum();
        CacheStats {
            hits: self.counters.hits(),
            misses: self.counters.misses(),
            loads_failed: self.counters.loads_failed(),
            chunks_resident,
            approx_bytes_resident,
        }
    }
}

/// Evict the oldest 25% of entries (rounded up, at least one) if the
/// map is at capacity. Called only while holding the write lock, so it
/// can never race with an insertion in progress.
fn evict_if_needed(inner: &mut CacheInner, capacity: usize) {
    if inner.entries.len() < capacity {
        return;
    }
    let mut by_age: Vec<(u32, u64)> = inner
        .entries
        .iter()
        .map(|(k, e)| (*k, e.last_used.load(Ordering::Relaxed)))
        .collect();
    by_age.sort_by_key(|&(_, t)| t);
    let n_evict = (inner.entries.len() / 4).max(1);
    for (chunk_id, _) in by_age.into_iter().take(n_evict) {
        inner.entries.remove(&chunk_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingSource {
        loads: AtomicU32,
        fail_chunk: Option<u32>,
    }

    impl ChunkSource for CountingSource {
        fn load_chunk(&self, chunk_id: u32) -> std::io::Result<Vec<StarRecord>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail_chunk == Some(chunk_id) {
                return Err(std::io::Error::other("synthetic failure"));
            }
            Ok(vec![blank_record(chunk_id); 4])
        }
    }

    fn blank_record(tag: u32) -> StarRecord {
        StarRecord {
            source_id: tag as u64,
            ra: 0.0,
            dec: 0.0,
            g_mag: 0.0,
            bp_mag: 0.0,
            rp_mag: 0.0,
            g_mag_error: 0.0,
            bp_mag_error: 0.0,
            rp_mag_error: 0.0,
            parallax: 0.0,
            pmra: 0.0,
            pmdec: 0.0,
            pmra_error: 0.0,
            pmdec_error: 0.0,
            ruwe: 0.0,
            bp_obs: 0,
            rp_obs: 0,
            healpix_pixel: 0,
            designation: None,
        }
    }

    #[test]
    fn hit_avoids_reload() {
        let src = Arc::new(CountingSource { loads: AtomicU32::new(0), fail_chunk: None });
        let cache = ChunkCache::new(src.clone(), 10);
        let a = cache.get_or_load(0).unwrap();
        let b = cache.get_or_load(0).unwrap();
        assert_eq!(Arc::as_ptr(&a), Arc::as_ptr(&b));
        assert_eq!(src.loads.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn eviction_respects_capacity() {
        let src = Arc::new(CountingSource { loads: AtomicU32::new(0), fail_chunk: None });
        let cache = ChunkCache::new(src, 2);
        cache.get_or_load(0);
        cache.get_or_load(1);
        cache.get_or_load(2);
        assert!(cache.stats().chunks_resident <= 2);
    }

    #[test]
    fn failed_load_is_not_cached_and_does_not_poison_cache() {
        let src = Arc::new(CountingSource { loads: AtomicU32::new(0), fail_chunk: Some(1) });
        let cache = ChunkCache::new(src, 10);
        assert!(cache.get_or_load(1).is_none());
        assert!(cache.get_or_load(0).is_some());
        assert_eq!(cache.stats().loads_failed, 1);
    }

    #[test]
    fn concurrent_access_is_consistent() {
        let src = Arc::new(CountingSource { loads: AtomicU32::new(0), fail_chunk: None });
        let cache = Arc::new(ChunkCache::new(src, 4));
        std::thread::scope(|scope| {
            for _ in 0..8 {
                let cache = cache.clone();
                scope.spawn(move || {
                    for id in 0..4 {
                        assert!(cache.get_or_load(id).is_some());
                    }
                });
            }
        });
        let stats = cache.stats();
        assert_eq!(stats.hits + stats.misses, 32);
    }
}
