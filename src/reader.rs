//! The thread-safe catalog reader: open, metadata, and the five query
//! operations over a GAIA18V2 catalog (monolithic file or multi-file
//! directory).

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use rayon::prelude::*;

use crate::cache::{ChunkCache, MonolithicSource, MultiFileSource, DEFAULT_MONOLITHIC_CAPACITY, DEFAULT_MULTIFILE_CAPACITY};
use crate::error::{GaiaError, Result};
use crate::format::{
    chunks_intersecting_range, find_pixel_entry, ChunkDescriptor, Header, HealpixIndexEntry, HEADER_SIZE,
};
use crate::healpix;
use crate::record::StarRecord;
use crate::stats::CacheStats;

/// Minimum number of candidate pixels before a parallel-enabled query
/// actually fans out across a rayon thread pool.
const PARALLEL_PIXEL_THRESHOLD: usize = 4;

//tp CatalogReader
/// An open catalog. Safe to share across threads behind an `Arc`; all
/// query methods take `&self`.
pub struct CatalogReader {
    path: PathBuf,
    header: Header,
    healpix_index: Vec<HealpixIndexEntry>,
    chunk_index: Vec<ChunkDescriptor>,
    cache: ChunkCache,
    source_id_map: RwLock<Option<HashMap<u64, (u32, u32)>>>,
    id_map_disabled: AtomicBool,
    parallel_enabled: AtomicBool,
    num_threads: AtomicUsize,
}

impl CatalogReader {
    //cp open
    /// Open a catalog, auto-detecting the monolithic (single file) or
    /// multi-file (directory with `metadata.dat` + `chunks/`) layout.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.is_dir() {
            Self::open_multifile(path)
        } else {
            Self::open_monolithic(path)
        }
    }

    fn open_monolithic(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| GaiaError::open_failed(path.display().to_string(), e.to_string()))?;
        let file_len = file
            .metadata()
            .map_err(|e| GaiaError::open_failed(path.display().to_string(), e.to_string()))?
            .len();
        let mmap = unsafe { memmap2::Mmap::map(&file) }
            .map_err(|e| GaiaError::open_failed(path.display().to_string(), e.to_string()))?;

        let header = decode_header(&mmap, path)?;
        header.validate_against_file_len(file_len)?;
        let healpix_index = decode_region(
            &mmap,
            header.healpix_index_offset,
            header.healpix_index_size,
            HealpixIndexEntry::decode_all,
        )?;
        let chunk_index = decode_region(
            &mmap,
            header.chunk_index_offset,
            header.chunk_index_size,
            ChunkDescriptor::decode_all,
        )?;

        let compressed = !header.is_uncompressed();
        let source = Arc::new(MonolithicSource::new(mmap, chunk_index.clone(), compressed));
        let cache = ChunkCache::new(source, DEFAULT_MONOLITHIC_CAPACITY);
        Ok(Self::assemble(path.to_path_buf(), header, healpix_index, chunk_index, cache))
    }

    fn open_multifile(dir: &Path) -> Result<Self> {
        let meta_path = dir.join("metadata.dat");
        let bytes = std::fs::read(&meta_path)
            .map_err(|e| GaiaError::open_failed(meta_path.display().to_string(), e.to_string()))?;

        let header = decode_header(&bytes, &meta_path)?;
        header.validate_against_file_len(bytes.len() as u64)?;
        let healpix_index = decode_region(
            &bytes,
            header.healpix_index_offset,
            header.healpix_index_size,
            HealpixIndexEntry::decode_all,
        )?;
        let chunk_index = decode_region(
            &bytes,
            header.chunk_index_offset,
            header.chunk_index_size,
            ChunkDescriptor::decode_all,
        )?;

        let source = Arc::new(MultiFileSource::new(dir.join("chunks")));
        let cache = ChunkCache::new(source, DEFAULT_MULTIFILE_CAPACITY);
        Ok(Self::assemble(dir.to_path_buf(), header, healpix_index, chunk_index, cache))
    }

    fn assemble(
        path: PathBuf,
        header: Header,
        healpix_index: Vec<HealpixIndexEntry>,
        chunk_index: Vec<ChunkDescriptor>,
        cache: ChunkCache,
    ) -> Self {
        Self {
            path,
            header,
            healpix_index,
            chunk_index,
            cache,
            source_id_map: RwLock::new(None),
            id_map_disabled: AtomicBool::new(false),
            parallel_enabled: AtomicBool::new(false),
            num_threads: AtomicUsize::new(0),
        }
    }

    //ap total_stars
    pub fn total_stars(&self) -> u64 {
        self.header.total_stars
    }

    //ap mag_limit
    pub fn mag_limit(&self) -> f64 {
        self.header.mag_limit
    }

    //ap num_pixels
    pub fn num_pixels(&self) -> u32 {
        self.header.num_nonempty_pixels
    }

    //ap num_chunks
    pub fn num_chunks(&self) -> u32 {
        self.header.total_chunks
    }

    //ap healpix_nside
    pub fn healpix_nside(&self) -> u32 {
        self.header.healpix_nside
    }

    //ap cache_stats
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    //mp set_parallel_processing
    /// Enable or disable rayon-backed fan-out for cone-style queries.
    /// `num_threads == 0` uses rayon's default pool sizing.
    pub fn set_parallel_processing(&mut self, enabled: bool, num_threads: usize) {
        self.parallel_enabled.store(enabled, Ordering::Relaxed);
        self.num_threads.store(num_threads, Ordering::Relaxed);
    }

    /// Stop maintaining the lazily-built source-id map and fall back to
    /// a linear chunk-by-chunk scan for [`Self::query_by_source_id`].
    pub fn disable_id_map(&self) {
        self.id_map_disabled.store(true, Ordering::Relaxed);
        *self.source_id_map.write().unwrap() = None;
    }

    //mp query_by_source_id
    pub fn query_by_source_id(&self, id: u64) -> Result<Option<StarRecord>> {
        if !self.id_map_disabled.load(Ordering::Relaxed) {
            self.ensure_id_map();
            let map_guard = self.source_id_map.read().unwrap();
            if let Some(map) = map_guard.as_ref() {
                return Ok(match map.get(&id) {
                    Some(&(chunk_id, idx)) => self
                        .cache
                        .get_or_load(chunk_id)
                        .and_then(|buf| buf.get(idx as usize).cloned()),
                    None => None,
                });
            }
        }

        for chunk_id in 0..self.chunk_index.len() as u32 {
            if let Some(buf) = self.cache.get_or_load(chunk_id) {
                if let Some(r) = buf.iter().find(|r| r.source_id == id) {
                    return Ok(Some(r.clone()));
                }
            }
        }
        Ok(None)
    }

    fn ensure_id_map(&self) {
        if self.source_id_map.read().unwrap().is_some() {
            return;
        }
        let mut guard = self.source_id_map.write().unwrap();
        if guard.is_some() {
            return;
        }
        let mut map = HashMap::with_capacity(self.header.total_stars as usize);
        for chunk_id in 0..self.chunk_index.len() as u32 {
            if let Some(buf) = self.cache.get_or_load(chunk_id) {
                for (i, r) in buf.iter().enumerate() {
                    map.insert(r.source_id, (chunk_id, i as u32));
                }
            }
        }
        *guard = Some(map);
    }

    //mp query_cone
    pub fn query_cone(&self, ra: f64, dec: f64, radius: f64, max_results: usize) -> Result<Vec<StarRecord>> {
        self.query_cone_with_magnitude(ra, dec, radius, f32::NEG_INFINITY, f32::INFINITY, max_results)
    }

    //mp query_cone_with_magnitude
    pub fn query_cone_with_magnitude(
        &self,
        ra: f64,
        dec: f64,
        radius: f64,
        mag_min: f32,
        mag_max: f32,
        max_results: usize,
    ) -> Result<Vec<StarRecord>> {
        validate_cone_args(ra, dec, radius)?;
        if mag_min > mag_max {
            return Err(GaiaError::invalid_argument(format!(
                "mag_min ({mag_min}) > mag_max ({mag_max})"
            )));
        }

        // pixels_in_cone returns a HashSet; collecting it directly would make
        // scan order (and, under max_results, even the returned record set)
        // depend on that HashSet's random seed. Sort for a deterministic,
        // repeatable pixel-then-record order.
        let mut pixels: Vec<u32> = healpix::pixels_in_cone(ra, dec, radius).into_iter().collect();
        pixels.sort_unstable();
        let scan = |pixel_id: u32| self.scan_pixel(pixel_id, ra, dec, radius, mag_min, mag_max);

        let results = if self.parallel_enabled.load(Ordering::Relaxed) && pixels.len() >= PARALLEL_PIXEL_THRESHOLD {
            self.scan_parallel(&pixels, scan, max_results)
        } else {
            scan_sequential(&pixels, scan, max_results)
        };
        Ok(results)
    }

    //mp query_brightest
    /// The `n` records within the cone with the lowest `g_mag`, ascending.
    pub fn query_brightest(&self, ra: f64, dec: f64, radius: f64, n: usize) -> Result<Vec<StarRecord>> {
        let mut all = self.query_cone(ra, dec, radius, 0)?;
        all.sort_by(|a, b| a.g_mag.total_cmp(&b.g_mag));
        all.truncate(n);
        Ok(all)
    }

    //mp count_in_cone
    pub fn count_in_cone(&self, ra: f64, dec: f64, radius: f64) -> Result<u64> {
        validate_cone_args(ra, dec, radius)?;
        let mut pixels: Vec<u32> = healpix::pixels_in_cone(ra, dec, radius).into_iter().collect();
        pixels.sort_unstable();
        let count: u64 = pixels
            .iter()
            .map(|&p| self.scan_pixel(p, ra, dec, radius, f32::NEG_INFINITY, f32::INFINITY).len() as u64)
            .sum();
        Ok(count)
    }

    /// Scan one candidate pixel's star range, filtering by true angular
    /// distance and magnitude. Shared by sequential and parallel fan-out
    /// so both produce identical result sets (up to ordering).
    fn scan_pixel(&self, pixel_id: u32, ra: f64, dec: f64, radius: f64, mag_min: f32, mag_max: f32) -> Vec<StarRecord> {
        let Some(entry) = find_pixel_entry(&self.healpix_index, pixel_id) else {
            return Vec::new();
        };
        let lo = entry.first_star_idx as u64;
        let hi = lo + entry.num_stars as u64;

        let mut out = Vec::new();
        for chunk_idx in chunks_intersecting_range(&self.chunk_index, lo, entry.num_stars as u64) {
            let desc = &self.chunk_index[chunk_idx];
            let Some(buf) = self.cache.get_or_load(desc.chunk_id) else {
                continue;
            };
            for (i, r) in buf.iter().enumerate() {
                let global_idx = desc.first_star_idx + i as u64;
                if global_idx < lo || global_idx >= hi {
                    continue;
                }
                if r.g_mag < mag_min || r.g_mag > mag_max {
                    continue;
                }
                if healpix::haversine_deg(ra, dec, r.ra, r.dec) <= radius {
                    out.push(r.clone());
                }
            }
        }
        out
    }

    fn scan_parallel(
        &self,
        pixels: &[u32],
        scan: impl Fn(u32) -> Vec<StarRecord> + Sync,
        max_results: usize,
    ) -> Vec<StarRecord> {
        let limit_reached = AtomicBool::new(false);
        let results = Mutex::new(Vec::new());

        let run = || {
            pixels.par_iter().for_each(|&pixel_id| {
                if limit_reached.load(Ordering::Relaxed) {
                    return;
                }
                let found = scan(pixel_id);
                if found.is_empty() {
                    return;
                }
                let mut guard = results.lock().unwrap();
                guard.extend(found);
                if max_results != 0 && guard.len() >= max_results {
                    limit_reached.store(true, Ordering::Relaxed);
                }
            });
        };

        let num_threads = self.num_threads.load(Ordering::Relaxed);
        if num_threads > 0 {
            match rayon::ThreadPoolBuilder::new().num_threads(num_threads).build() {
                Ok(pool) => pool.install(run),
                Err(err) => {
                    log::warn!("failed to build a {num_threads}-thread pool, running on rayon's default pool: {err}");
                    run();
                }
            }
        } else {
            run();
        }

        let mut out = results.into_inner().unwrap();
        if max_results != 0 && out.len() > max_results {
            out.truncate(max_results);
        }
        out
    }
}

impl std::fmt::Debug for CatalogReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogReader")
            .field("path", &self.path)
            .field("total_stars", &self.header.total_stars)
            .finish_non_exhaustive()
    }
}

fn scan_sequential(pixels: &[u32], scan: impl Fn(u32) -> Vec<StarRecord>, max_results: usize) -> Vec<StarRecord> {
    let mut out = Vec::new();
    for &pixel_id in pixels {
        out.extend(scan(pixel_id));
        if max_results != 0 && out.len() >= max_results {
            out.truncate(max_results);
            break;
        }
    }
    out
}

fn validate_cone_args(ra: f64, dec: f64, radius: f64) -> Result<()> {
    if !ra.is_finite() || !dec.is_finite() || !radius.is_finite() {
        return Err(GaiaError::invalid_argument("ra/dec/radius must be finite"));
    }
    if radius < 0.0 {
        return Err(GaiaError::invalid_argument(format!("radius must be >= 0, got {radius}")));
    }
    Ok(())
}

fn decode_header(bytes: &[u8], path: &Path) -> Result<Header> {
    if bytes.len() < HEADER_SIZE {
        return Err(GaiaError::open_failed(
            path.display().to_string(),
            format!("file is only {} bytes, shorter than the {HEADER_SIZE}-byte header", bytes.len()),
        ));
    }
    let buf: [u8; HEADER_SIZE] = bytes[..HEADER_SIZE].try_into().unwrap();
    Header::decode(&buf)
}

fn decode_region<T>(bytes: &[u8], offset: u64, size: u64, decode: impl Fn(&[u8]) -> Result<Vec<T>>) -> Result<Vec<T>> {
    let start = offset as usize;
    let end = start + size as usize;
    let region = bytes
        .get(start..end)
        .ok_or_else(|| GaiaError::corrupted(format!("region [{start}, {end}) is out of bounds")))?;
    decode(region)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Build a tiny monolithic catalog file on disk with the given
    /// records (already partitioned into a single chunk covering the
    /// whole pixel range) and return the reader over it.
    fn build_monolithic(dir: &Path, records: &[StarRecord]) -> CatalogReader {
        let mut by_pixel: Vec<(u32, Vec<&StarRecord>)> = Vec::new();
        for r in records {
            match by_pixel.iter_mut().find(|(p, _)| *p == r.healpix_pixel) {
                Some((_, v)) => v.push(r),
                None => by_pixel.push((r.healpix_pixel, vec![r])),
            }
        }
        by_pixel.sort_by_key(|(p, _)| *p);

        let mut ordered: Vec<StarRecord> = Vec::new();
        let mut healpix_index = Vec::new();
        for (pixel, rs) in &by_pixel {
            let first = ordered.len() as u32;
            for r in rs {
                ordered.push((*r).clone());
            }
            healpix_index.push(HealpixIndexEntry {
                pixel_id: *pixel,
                first_star_idx: first,
                num_stars: rs.len() as u32,
                reserved: 0,
            });
        }

        let payload = StarRecord::encode_all(&ordered);
        let chunk_index = vec![ChunkDescriptor {
            chunk_id: 0,
            first_star_idx: 0,
            num_stars: ordered.len() as u32,
            compressed_size: payload.len() as u32,
            uncompressed_size: payload.len() as u32,
            file_offset: HEADER_SIZE as u64
                + (healpix_index.len() * crate::format::HEALPIX_ENTRY_SIZE) as u64
                + crate::format::CHUNK_DESCRIPTOR_SIZE as u64,
            reserved: 0,
        }];

        let healpix_bytes = HealpixIndexEntry::encode_all(&healpix_index);
        let chunk_bytes = ChunkDescriptor::encode_all(&chunk_index);

        let header = Header {
            format_flags: crate::format::FLAG_UNCOMPRESSED,
            total_stars: ordered.len() as u64,
            total_chunks: 1,
            stars_per_chunk: ordered.len().max(1) as u32,
            healpix_nside: healpix::NSIDE,
            mag_limit: 18.0,
            ra_min: 0.0,
            ra_max: 360.0,
            dec_min: -90.0,
            dec_max: 90.0,
            healpix_index_offset: HEADER_SIZE as u64,
            healpix_index_size: healpix_bytes.len() as u64,
            chunk_index_offset: HEADER_SIZE as u64 + healpix_bytes.len() as u64,
            chunk_index_size: chunk_bytes.len() as u64,
            data_offset: chunk_index[0].file_offset,
            data_size: payload.len() as u64,
            num_nonempty_pixels: healpix_index.len() as u32,
            creation_date: "2026-07-26T00:00:00Z".into(),
            source_name: "synthetic test catalog".into(),
        };

        let path = dir.join("catalog.dat");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&header.encode()).unwrap();
        file.write_all(&healpix_bytes).unwrap();
        file.write_all(&chunk_bytes).unwrap();
        file.write_all(&payload).unwrap();
        drop(file);

        CatalogReader::open(&path).unwrap()
    }

    fn star(source_id: u64, ra: f64, dec: f64, g_mag: f32) -> StarRecord {
        StarRecord {
            source_id,
            ra,
            dec,
            g_mag,
            bp_mag: g_mag + 0.5,
            rp_mag: g_mag - 0.5,
            g_mag_error: 0.001,
            bp_mag_error: 0.001,
            rp_mag_error: 0.001,
            parallax: 1.0,
            pmra: 0.0,
            pmdec: 0.0,
            pmra_error: 0.0,
            pmdec_error: 0.0,
            ruwe: 1.0,
            bp_obs: 10,
            rp_obs: 10,
            healpix_pixel: healpix::pixel_of(ra, dec),
            designation: None,
        }
    }

    #[test]
    fn open_and_metadata_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![star(1, 10.0, 20.0, 5.0), star(2, 10.01, 20.01, 6.0)];
        let reader = build_monolithic(dir.path(), &records);
        assert_eq!(reader.total_stars(), 2);
        assert_eq!(reader.healpix_nside(), healpix::NSIDE);
        assert!((reader.mag_limit() - 18.0).abs() < 1e-9);
    }

    #[test]
    fn query_by_source_id_finds_and_misses() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![star(100, 10.0, 20.0, 5.0), star(200, 50.0, -10.0, 8.0)];
        let reader = build_monolithic(dir.path(), &records);
        assert_eq!(reader.query_by_source_id(100).unwrap().unwrap().source_id, 100);
        assert!(reader.query_by_source_id(999).unwrap().is_none());
    }

    #[test]
    fn query_cone_matches_brute_force_haversine() {
        let dir = tempfile::tempdir().unwrap();
        // Pleiades-like cluster plus one far-away star.
        let records = vec![
            star(1, 56.75, 24.12, 2.87),
            star(2, 56.80, 24.10, 5.0),
            star(3, 56.70, 24.20, 6.0),
            star(4, 200.0, -40.0, 3.0),
        ];
        let reader = build_monolithic(dir.path(), &records);
        let found = reader.query_cone(56.75, 24.12, 1.0, 0).unwrap();
        let expected: Vec<u64> = records
            .iter()
            .filter(|r| healpix::haversine_deg(56.75, 24.12, r.ra, r.dec) <= 1.0)
            .map(|r| r.source_id)
            .collect();
        let mut got: Vec<u64> = found.iter().map(|r| r.source_id).collect();
        got.sort();
        let mut expected = expected;
        expected.sort();
        assert_eq!(got, expected);
        assert!(got.contains(&1));
        assert!(!got.contains(&4));
    }

    #[test]
    fn query_cone_respects_max_results() {
        let dir = tempfile::tempdir().unwrap();
        let records: Vec<StarRecord> = (0..20)
            .map(|i| star(i, 10.0 + i as f64 * 0.001, 20.0, i as f32))
            .collect();
        let reader = build_monolithic(dir.path(), &records);
        let found = reader.query_cone(10.0, 20.0, 1.0, 5).unwrap();
        assert_eq!(found.len(), 5);
    }

    #[test]
    fn query_brightest_is_sorted_ascending_and_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![
            star(1, 83.0, 0.0, 9.0),
            star(2, 83.01, 0.0, 2.0),
            star(3, 82.99, 0.0, 6.0),
            star(4, 83.0, 0.01, 4.0),
        ];
        let reader = build_monolithic(dir.path(), &records);
        let found = reader.query_brightest(83.0, 0.0, 5.0, 2).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].source_id, 2);
        assert_eq!(found[1].source_id, 4);
    }

    #[test]
    fn count_in_cone_matches_cone_length() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![star(1, 266.417, -29.006, 10.0), star(2, 266.42, -29.0, 11.0), star(3, 0.0, 0.0, 5.0)];
        let reader = build_monolithic(dir.path(), &records);
        let count = reader.count_in_cone(266.417, -29.006, 0.5).unwrap();
        let cone_len = reader.query_cone(266.417, -29.006, 0.5, 0).unwrap().len() as u64;
        assert_eq!(count, cone_len);
    }

    #[test]
    fn empty_cone_returns_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![star(1, 0.0, 0.0, 5.0)];
        let reader = build_monolithic(dir.path(), &records);
        let found = reader.query_cone(180.0, 0.0, 0.001, 0).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn invalid_arguments_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![star(1, 0.0, 0.0, 5.0)];
        let reader = build_monolithic(dir.path(), &records);
        assert!(reader.query_cone(0.0, 0.0, -1.0, 0).is_err());
        assert!(reader.query_cone(f64::NAN, 0.0, 1.0, 0).is_err());
        assert!(reader.query_cone_with_magnitude(0.0, 0.0, 1.0, 5.0, 1.0, 0).is_err());
    }

    #[test]
    fn sequential_and_parallel_results_match() {
        let dir = tempfile::tempdir().unwrap();
        let records: Vec<StarRecord> = (0..200)
            .map(|i| {
                let ra = (i as f64 * 0.03) % 2.0;
                let dec = (i as f64 * 0.02) % 2.0 - 1.0;
                star(i, ra, dec, (i % 20) as f32)
            })
            .collect();
        let mut reader = build_monolithic(dir.path(), &records);
        let sequential = reader.query_cone(0.0, 0.0, 3.0, 0).unwrap();

        reader.set_parallel_processing(true, 0);
        let parallel = reader.query_cone(0.0, 0.0, 3.0, 0).unwrap();

        let mut seq_ids: Vec<u64> = sequential.iter().map(|r| r.source_id).collect();
        let mut par_ids: Vec<u64> = parallel.iter().map(|r| r.source_id).collect();
        seq_ids.sort();
        par_ids.sort();
        assert_eq!(seq_ids, par_ids);
    }
}
