//! The one-shot build pipeline: upstream records in, a GAIA18V2
//! catalog out.
//!
//! Seven phases, run in order by [`Builder::build`]: filter, dedup +
//! sort by `source_id`, spatial resort by `healpix_pixel`, build the
//! HEALPix index, chunk + compress, write, and (optionally, via
//! [`Builder::expand_to_multifile`]) split into the multi-file layout.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{GaiaError, Result};
use crate::format::{ChunkDescriptor, Header, HealpixIndexEntry, FLAG_UNCOMPRESSED};
use crate::healpix;
use crate::record::{StarRecord, RECORD_SIZE};
use crate::stats::BuildStats;

//tp BuilderConfig
/// Build-time parameters. Passed at call time — no environment
/// variables or config files are read.
#[derive(Debug, Clone, PartialEq)]
pub struct BuilderConfig {
    /// Records fainter than this (higher `g_mag`) are dropped in phase 1.
    pub mag_limit: f64,
    /// HEALPix resolution; must match [`crate::healpix::NSIDE`].
    pub nside: u32,
    /// Target number of records per chunk.
    pub stars_per_chunk: u32,
    /// zlib compression level, 0-9.
    pub compression_level: u32,
    /// Patch size (degrees) the upstream source streams at a time.
    pub patch_deg: f64,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            mag_limit: 18.0,
            nside: healpix::NSIDE,
            stars_per_chunk: 1_000_000,
            compression_level: Compression::best().level(),
            patch_deg: 5.0,
        }
    }
}

//tp UpstreamSource
/// A source of raw upstream records, streamed patch-wise so the
/// builder never needs the whole catalog resident at once.
pub trait UpstreamSource {
    fn for_each_patch(&self, patch_deg: f64, f: &mut dyn FnMut(&[StarRecord])) -> Result<()>;
}

//tp CsvUpstreamSource
/// Reads a flat CSV with Gaia's column names (`source_id`, `ra`, `dec`,
/// `phot_g_mean_mag`, `phot_bp_mean_mag`, `phot_rp_mean_mag`, `parallax`,
/// `pmra`, `pmdec`, `ruwe`, ...). Requires the `csv` feature.
#[cfg(feature = "csv")]
pub struct CsvUpstreamSource {
    path: PathBuf,
}

#[cfg(feature = "csv")]
impl CsvUpstreamSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[cfg(feature = "csv")]
impl UpstreamSource for CsvUpstreamSource {
    fn for_each_patch(&self, _patch_deg: f64, f: &mut dyn FnMut(&[StarRecord])) -> Result<()> {
        let file = File::open(&self.path)
            .map_err(|e| GaiaError::build_failed("filter", format!("opening {}: {e}", self.path.display())))?;
        let mut reader = csv::Reader::from_reader(file);
        let headers = reader
            .headers()
            .map_err(|e| GaiaError::build_failed("filter", e.to_string()))?
            .clone();
        let col = |name: &str| headers.iter().position(|h| h == name);
        let (i_id, i_ra, i_dec, i_g, i_bp, i_rp) = (
            col("source_id"),
            col("ra"),
            col("dec"),
            col("phot_g_mean_mag"),
            col("phot_bp_mean_mag"),
            col("phot_rp_mean_mag"),
        );
        let (i_plx, i_pmra, i_pmdec, i_ruwe) = (col("parallax"), col("pmra"), col("pmdec"), col("ruwe"));

        const BATCH: usize = 8192;
        let mut batch = Vec::with_capacity(BATCH);
        let mut malformed = 0u64;
        for result in reader.records() {
            let row = match result {
                Ok(row) => row,
                Err(e) => {
                    log::warn!("skipping malformed CSV row: {e}");
                    malformed += 1;
                    continue;
                }
            };
            let get_f64 = |idx: Option<usize>| idx.and_then(|i| row.get(i)).and_then(|s| s.parse::<f64>().ok());
            let get_f32 = |idx: Option<usize>| idx.and_then(|i| row.get(i)).and_then(|s| s.parse::<f32>().ok());

            let (Some(source_id), Some(ra), Some(dec), Some(g_mag)) =
                (i_id.and_then(|i| row.get(i)).and_then(|s| s.parse::<u64>().ok()), get_f64(i_ra), get_f64(i_dec), get_f32(i_g))
            else {
                log::warn!("skipping CSV row missing required fields: {:?}", row);
                malformed += 1;
                continue;
            };

            batch.push(StarRecord {
                source_id,
                ra,
                dec,
                g_mag,
                bp_mag: get_f32(i_bp).unwrap_or(g_mag),
                rp_mag: get_f32(i_rp).unwrap_or(g_mag),
                g_mag_error: 0.0,
                bp_mag_error: 0.0,
                rp_mag_error: 0.0,
                parallax: get_f32(i_plx).unwrap_or(0.0),
                pmra: get_f32(i_pmra).unwrap_or(0.0),
                pmdec: get_f32(i_pmdec).unwrap_or(0.0),
                pmra_error: 0.0,
                pmdec_error: 0.0,
                ruwe: get_f32(i_ruwe).unwrap_or(1.0),
                bp_obs: 0,
                rp_obs: 0,
                healpix_pixel: healpix::pixel_of(ra, dec),
                designation: None,
            });

            if batch.len() >= BATCH {
                f(&batch);
                batch.clear();
            }
        }
        if !batch.is_empty() {
            f(&batch);
        }
        if malformed > 0 {
            log::warn!("{malformed} malformed upstream rows were skipped");
        }
        Ok(())
    }
}

//tp Builder
/// Stateless entry point for the build pipeline.
pub struct Builder;

impl Builder {
    //fp build
    /// Run all seven phases, writing a monolithic GAIA18V2 file at
    /// `output_path`.
    pub fn build(
        upstream: &impl UpstreamSource,
        output_path: impl AsRef<Path>,
        config: BuilderConfig,
    ) -> Result<BuildStats> {
        let started = std::time::Instant::now();
        let output_path = output_path.as_ref();

        // Phase 1 writes to a real temp file rather than an in-memory
        // buffer, so an interrupted or failed build leaves a resumable
        // artifact on disk instead of losing the filtered patches.
        let mut temp = tempfile::Builder::new()
            .prefix("gaia-catalog-build-")
            .tempfile()
            .map_err(|e| GaiaError::build_failed("filter", e.to_string()))?;

        let result = Self::build_inner(upstream, output_path, &config, started, &mut temp);
        match result {
            Ok(stats) => Ok(stats),
            Err(err) => {
                let _ = std::fs::remove_file(output_path);
                if let Err(keep_err) = temp.keep() {
                    log::warn!("failed to preserve phase-1 temp file after build error: {keep_err}");
                }
                Err(err)
            }
        }
    }

    fn build_inner(
        upstream: &impl UpstreamSource,
        output_path: &Path,
        config: &BuilderConfig,
        started: std::time::Instant,
        temp: &mut tempfile::NamedTempFile,
    ) -> Result<BuildStats> {
        let mut records_filtered = 0u64;
        let mut total_seen = 0u64;
        {
            let mag_limit = config.mag_limit;
            let temp_file = temp.as_file_mut();
            upstream.for_each_patch(config.patch_deg, &mut |patch: &[StarRecord]| {
                for r in patch {
                    total_seen += 1;
                    if (r.g_mag as f64) > mag_limit {
                        records_filtered += 1;
                        continue;
                    }
                    let mut buf = [0u8; RECORD_SIZE];
                    r.encode(&mut buf);
                    let _ = temp_file.write_all(&buf);
                }
            })?;
        }
        temp.as_file_mut()
            .flush()
            .map_err(|e| GaiaError::build_failed("filter", e.to_string()))?;

        // Phase 2: dedup + sort by source_id.
        let mut bytes = Vec::new();
        temp.reopen()
            .and_then(|mut f| f.read_to_end(&mut bytes))
            .map_err(|e| GaiaError::build_failed("dedup_sort", e.to_string()))?;
        let mut records = StarRecord::decode_all(&bytes);
        records.sort_by_key(|r| r.source_id);
        let before = records.len();
        records.dedup_by_key(|r| r.source_id);
        let duplicates_removed = (before - records.len()) as u64;

        // Phase 3: spatial resort by healpix_pixel (stable, so ties keep
        // source_id order from phase 2).
        records.sort_by_key(|r| r.healpix_pixel);

        // Phase 4: HEALPix index — contiguous runs of equal healpix_pixel.
        let mut healpix_index = Vec::new();
        let mut i = 0usize;
        while i < records.len() {
            let pixel = records[i].healpix_pixel;
            let start = i;
            while i < records.len() && records[i].healpix_pixel == pixel {
                i += 1;
            }
            healpix_index.push(HealpixIndexEntry {
                pixel_id: pixel,
                first_star_idx: start as u32,
                num_stars: (i - start) as u32,
                reserved: 0,
            });
        }

        // Phase 5: chunk + compress.
        let mut chunk_index = Vec::new();
        let mut chunk_payloads: Vec<Vec<u8>> = Vec::new();
        for (chunk_id, chunk_records) in records.chunks(config.stars_per_chunk.max(1) as usize).enumerate() {
            let first_star_idx = chunk_id as u64 * config.stars_per_chunk.max(1) as u64;
            let raw = StarRecord::encode_all(chunk_records);
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(config.compression_level));
            encoder
                .write_all(&raw)
                .and_then(|_| encoder.finish())
                .map(|compressed| {
                    chunk_index.push(ChunkDescriptor {
                        chunk_id: chunk_id as u32,
                        first_star_idx,
                        num_stars: chunk_records.len() as u32,
                        compressed_size: compressed.len() as u32,
                        uncompressed_size: raw.len() as u32,
                        file_offset: 0, // patched in phase 6
                        reserved: 0,
                    });
                    chunk_payloads.push(compressed);
                })
                .map_err(|e| GaiaError::build_failed("chunk_compress", e.to_string()))?;
        }

        // Phase 6: write.
        let healpix_bytes = HealpixIndexEntry::encode_all(&healpix_index);
        let chunk_descriptor_bytes_len = chunk_index.len() * crate::format::CHUNK_DESCRIPTOR_SIZE;
        let header_size = crate::format::HEADER_SIZE as u64;
        let mut offset = header_size + healpix_bytes.len() as u64 + chunk_descriptor_bytes_len as u64;
        for (desc, payload) in chunk_index.iter_mut().zip(&chunk_payloads) {
            desc.file_offset = offset;
            offset += payload.len() as u64;
        }
        let data_offset = header_size + healpix_bytes.len() as u64 + chunk_descriptor_bytes_len as u64;
        let data_size = chunk_payloads.iter().map(|p| p.len() as u64).sum();
        let chunk_index_bytes = ChunkDescriptor::encode_all(&chunk_index);

        let (ra_min, ra_max, dec_min, dec_max) = bounding_box(&records);
        let header = Header {
            format_flags: 0,
            total_stars: records.len() as u64,
            total_chunks: chunk_index.len() as u32,
            stars_per_chunk: config.stars_per_chunk,
            healpix_nside: config.nside,
            mag_limit: config.mag_limit,
            ra_min,
            ra_max,
            dec_min,
            dec_max,
            healpix_index_offset: header_size,
            healpix_index_size: healpix_bytes.len() as u64,
            chunk_index_offset: header_size + healpix_bytes.len() as u64,
            chunk_index_size: chunk_index_bytes.len() as u64,
            data_offset,
            data_size,
            num_nonempty_pixels: healpix_index.len() as u32,
            creation_date: iso_now_placeholder(),
            source_name: "Gaia DR3".to_string(),
        };

        let mut out = File::create(output_path)
            .map_err(|e| GaiaError::build_failed("write", format!("creating {}: {e}", output_path.display())))?;
        out.write_all(&header.encode())
            .and_then(|_| out.write_all(&healpix_bytes))
            .and_then(|_| out.write_all(&chunk_index_bytes))
            .map_err(|e| GaiaError::build_failed("write", e.to_string()))?;
        for payload in &chunk_payloads {
            out.write_all(payload).map_err(|e| GaiaError::build_failed("write", e.to_string()))?;
        }
        out.flush().map_err(|e| GaiaError::build_failed("write", e.to_string()))?;

        Ok(BuildStats {
            total_stars: records.len() as u64,
            total_chunks: chunk_index.len() as u32,
            num_pixels: healpix_index.len() as u32,
            duplicates_removed,
            records_filtered,
            build_duration: started.elapsed(),
        })
    }

    //fp expand_to_multifile
    /// Split a monolithic file into `metadata.dat` + `chunks/chunk_NNN.dat`
    /// under `output_dir`, without touching the index — there is no
    /// separate index-rebuild path for this phase to drift from.
    pub fn expand_to_multifile(monolithic_path: impl AsRef<Path>, output_dir: impl AsRef<Path>) -> Result<BuildStats> {
        let monolithic_path = monolithic_path.as_ref();
        let output_dir = output_dir.as_ref();
        let started = std::time::Instant::now();

        let result = Self::expand_inner(monolithic_path, output_dir, started);
        if result.is_err() {
            let _ = std::fs::remove_dir_all(output_dir);
        }
        result
    }

    fn expand_inner(monolithic_path: &Path, output_dir: &Path, started: std::time::Instant) -> Result<BuildStats> {
        let bytes = std::fs::read(monolithic_path)
            .map_err(|e| GaiaError::build_failed("expand", format!("reading {}: {e}", monolithic_path.display())))?;
        if bytes.len() < crate::format::HEADER_SIZE {
            return Err(GaiaError::build_failed("expand", "source file shorter than header"));
        }
        let header_buf: [u8; crate::format::HEADER_SIZE] =
            bytes[..crate::format::HEADER_SIZE].try_into().unwrap();
        let header = Header::decode(&header_buf)?;
        header.validate_against_file_len(bytes.len() as u64)?;

        let healpix_region = &bytes[header.healpix_index_offset as usize
            ..(header.healpix_index_offset + header.healpix_index_size) as usize];
        let healpix_index = HealpixIndexEntry::decode_all(healpix_region)?;
        let chunk_region =
            &bytes[header.chunk_index_offset as usize..(header.chunk_index_offset + header.chunk_index_size) as usize];
        let chunk_index = ChunkDescriptor::decode_all(chunk_region)?;

        std::fs::create_dir_all(output_dir.join("chunks"))
            .map_err(|e| GaiaError::build_failed("expand", e.to_string()))?;

        let compressed = !header.is_uncompressed();
        for desc in &chunk_index {
            let start = desc.file_offset as usize;
            let end = start + desc.compressed_size as usize;
            let raw = &bytes[start..end];
            let payload: Vec<u8> = if compressed {
                let mut decoder = flate2::read::ZlibDecoder::new(raw);
                let mut out = Vec::with_capacity(desc.uncompressed_size as usize);
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| GaiaError::build_failed("expand", e.to_string()))?;
                out
            } else {
                raw.to_vec()
            };
            let chunk_path = output_dir.join("chunks").join(format!("chunk_{:03}.dat", desc.chunk_id));
            std::fs::write(&chunk_path, &payload).map_err(|e| GaiaError::build_failed("expand", e.to_string()))?;
        }

        // metadata.dat: same index bytes, flagged uncompressed (chunk
        // payloads on disk are now raw). data_offset/data_size are zeroed:
        // metadata.dat carries no chunk payload bytes of its own, they live
        // in chunks/chunk_NNN.dat addressed by chunk_id, not by file_offset.
        let mut uncompressed_header = header.clone();
        uncompressed_header.format_flags |= FLAG_UNCOMPRESSED;
        uncompressed_header.data_offset = 0;
        uncompressed_header.data_size = 0;
        let mut meta = File::create(output_dir.join("metadata.dat"))
            .map_err(|e| GaiaError::build_failed("expand", e.to_string()))?;
        meta.write_all(&uncompressed_header.encode())
            .and_then(|_| meta.write_all(&HealpixIndexEntry::encode_all(&healpix_index)))
            .and_then(|_| meta.write_all(&ChunkDescriptor::encode_all(&chunk_index)))
            .map_err(|e| GaiaError::build_failed("expand", e.to_string()))?;

        Ok(BuildStats {
            total_stars: header.total_stars,
            total_chunks: header.total_chunks,
            num_pixels: header.num_nonempty_pixels,
            duplicates_removed: 0,
            records_filtered: 0,
            build_duration: started.elapsed(),
        })
    }
}

fn bounding_box(records: &[StarRecord]) -> (f64, f64, f64, f64) {
    if records.is_empty() {
        return (0.0, 0.0, 0.0, 0.0);
    }
    let mut ra_min = f64::INFINITY;
    let mut ra_max = f64::NEG_INFINITY;
    let mut dec_min = f64::INFINITY;
    let mut dec_max = f64::NEG_INFINITY;
    for r in records {
        ra_min = ra_min.min(r.ra);
        ra_max = ra_max.max(r.ra);
        dec_min = dec_min.min(r.dec);
        dec_max = dec_max.max(r.dec);
    }
    (ra_min, ra_max, dec_min, dec_max)
}

/// `std::time::SystemTime`-based stand-in for an ISO-8601 build
/// timestamp; exact formatting is a collaborator/CLI concern, this just
/// needs to round-trip through the header's fixed-width field.
fn iso_now_placeholder() -> String {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(d) => format!("unix:{}", d.as_secs()),
        Err(_) => "unix:0".to_string(),
    }
}

/// An in-memory [`UpstreamSource`] used by tests, and available for any
/// caller that already has records in memory (e.g. a collaborator doing
/// incremental builds).
pub struct InMemoryUpstreamSource {
    pub records: Vec<StarRecord>,
}

impl UpstreamSource for InMemoryUpstreamSource {
    fn for_each_patch(&self, _patch_deg: f64, f: &mut dyn FnMut(&[StarRecord])) -> Result<()> {
        for chunk in self.records.chunks(4096) {
            f(chunk);
        }
        Ok(())
    }
}
