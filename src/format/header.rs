//! The 256-byte catalog header.

use crate::error::{GaiaError, Result};

/// Size in bytes of the on-disk header.
pub const HEADER_SIZE: usize = 256;

/// Magic bytes identifying a GAIA18V2 catalog file.
pub const MAGIC: &[u8; 8] = b"GAIA18V2";

/// Current format version.
pub const VERSION: u32 = 2;

/// `format_flags` bit 0: the chunk region holds uncompressed payloads
/// (the multi-file variant's `metadata.dat`).
pub const FLAG_UNCOMPRESSED: u32 = 1 << 0;

const CREATION_DATE_LEN: usize = 32;
const SOURCE_NAME_LEN: usize = 64;

//tp Header
/// Fixed 256-byte region at the start of a GAIA18V2 file (or
/// `metadata.dat` in the multi-file variant).
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub format_flags: u32,
    pub total_stars: u64,
    pub total_chunks: u32,
    pub stars_per_chunk: u32,
    pub healpix_nside: u32,
    pub mag_limit: f64,
    pub ra_min: f64,
    pub ra_max: f64,
    pub dec_min: f64,
    pub dec_max: f64,
    pub healpix_index_offset: u64,
    pub healpix_index_size: u64,
    pub chunk_index_offset: u64,
    pub chunk_index_size: u64,
    pub data_offset: u64,
    pub data_size: u64,
    pub num_nonempty_pixels: u32,
    pub creation_date: String,
    pub source_name: String,
}

impl Header {
    /// True when `format_flags` marks the chunk payloads uncompressed.
    pub fn is_uncompressed(&self) -> bool {
        self.format_flags & FLAG_UNCOMPRESSED != 0
    }

    //fp encode
    /// Write this header's 256-byte little-endian encoding.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        let mut w = Writer { buf: &mut buf, pos: 0 };
        w.bytes(MAGIC);
        w.u32(VERSION);
        w.u32(self.format_flags);
        w.u64(self.total_stars);
        w.u32(self.total_chunks);
        w.u32(self.stars_per_chunk);
        w.u32(self.healpix_nside);
        w.f64(self.mag_limit);
        w.f64(self.ra_min);
        w.f64(self.ra_max);
        w.f64(self.dec_min);
        w.f64(self.dec_max);
        w.u64(self.healpix_index_offset);
        w.u64(self.healpix_index_size);
        w.u64(self.chunk_index_offset);
        w.u64(self.chunk_index_size);
        w.u64(self.data_offset);
        w.u64(self.data_size);
        w.u32(self.num_nonempty_pixels);
        w.fixed_str(&self.creation_date, CREATION_DATE_LEN);
        w.fixed_str(&self.source_name, SOURCE_NAME_LEN);
        // Remaining bytes stay zero (reserved).
        buf
    }

    //fp decode
    /// Parse a header, validating magic and version.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self> {
        let mut r = Reader { buf, pos: 0 };
        let magic = r.bytes(8);
        if magic != MAGIC {
            return Err(GaiaError::open_failed(
                "<catalog>",
                format!("bad magic: {:?}", String::from_utf8_lossy(magic)),
            ));
        }
        let version = r.u32();
        if version != VERSION {
            return Err(GaiaError::open_failed(
                "<catalog>",
                format!("unsupported version {version}, expected {VERSION}"),
            ));
        }
        let format_flags = r.u32();
        let total_stars = r.u64();
        let total_chunks = r.u32();
        let stars_per_chunk = r.u32();
        let healpix_nside = r.u32();
        let mag_limit = r.f64();
        let ra_min = r.f64();
        let ra_max = r.f64();
        let dec_min = r.f64();
        let dec_max = r.f64();
        let healpix_index_offset = r.u64();
        let healpix_index_size = r.u64();
        let chunk_index_offset = r.u64();
        let chunk_index_size = r.u64();
        let data_offset = r.u64();
        let data_size = r.u64();
        let num_nonempty_pixels = r.u32();
        let creation_date = r.fixed_str(CREATION_DATE_LEN);
        let source_name = r.fixed_str(SOURCE_NAME_LEN);

        Ok(Self {
            format_flags,
            total_stars,
            total_chunks,
            stars_per_chunk,
            healpix_nside,
            mag_limit,
            ra_min,
            ra_max,
            dec_min,
            dec_max,
            healpix_index_offset,
            healpix_index_size,
            chunk_index_offset,
            chunk_index_size,
            data_offset,
            data_size,
            num_nonempty_pixels,
            creation_date,
            source_name,
        })
    }

    /// Validate that the regions this header describes fit within a
    /// file of `file_len` bytes. Called right after `decode`.
    pub fn validate_against_file_len(&self, file_len: u64) -> Result<()> {
        let end_of = |offset: u64, size: u64| offset.checked_add(size);
        let regions = [
            ("healpix index", self.healpix_index_offset, self.healpix_index_size),
            ("chunk index", self.chunk_index_offset, self.chunk_index_size),
            ("data", self.data_offset, self.data_size),
        ];
        for (name, offset, size) in regions {
            if size == 0 {
                // An empty region carries no file bytes to bounds-check; this is
                // how metadata.dat (multi-file variant) marks its data region,
                // since chunk payloads live in separate chunk_NNN.dat files.
                continue;
            }
            match end_of(offset, size) {
                Some(end) if end <= file_len => {}
                _ => {
                    return Err(GaiaError::corrupted(format!(
                        "{name} region [{offset}, {offset}+{size}) exceeds file length {file_len}"
                    )))
                }
            }
        }
        Ok(())
    }
}

struct Writer<'a> {
    buf: &'a mut [u8; HEADER_SIZE],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn bytes(&mut self, b: &[u8]) {
        self.buf[self.pos..self.pos + b.len()].copy_from_slice(b);
        self.pos += b.len();
    }
    fn u32(&mut self, v: u32) {
        self.bytes(&v.to_le_bytes());
    }
    fn u64(&mut self, v: u64) {
        self.bytes(&v.to_le_bytes());
    }
    fn f64(&mut self, v: f64) {
        self.bytes(&v.to_le_bytes());
    }
    fn fixed_str(&mut self, s: &str, width: usize) {
        let bytes = s.as_bytes();
        let n = bytes.len().min(width);
        self.buf[self.pos..self.pos + n].copy_from_slice(&bytes[..n]);
        // remaining bytes in the field are already zero.
        self.pos += width;
    }
}

struct Reader<'a> {
    buf: &'a [u8; HEADER_SIZE],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn bytes(&mut self, n: usize) -> &'a [u8] {
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        s
    }
    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.bytes(4).try_into().unwrap())
    }
    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.bytes(8).try_into().unwrap())
    }
    fn f64(&mut self) -> f64 {
        f64::from_le_bytes(self.bytes(8).try_into().unwrap())
    }
    fn fixed_str(&mut self, width: usize) -> String {
        let raw = self.bytes(width);
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Header {
        Header {
            format_flags: 0,
            total_stars: 12345,
            total_chunks: 1,
            stars_per_chunk: 1_000_000,
            healpix_nside: 64,
            mag_limit: 18.0,
            ra_min: 0.0,
            ra_max: 360.0,
            dec_min: -90.0,
            dec_max: 90.0,
            healpix_index_offset: HEADER_SIZE as u64,
            healpix_index_size: 16 * 49152,
            chunk_index_offset: 0,
            chunk_index_size: 40,
            data_offset: 0,
            data_size: 1000,
            num_nonempty_pixels: 49152,
            creation_date: "2026-07-26T00:00:00Z".to_string(),
            source_name: "Gaia DR3".to_string(),
        }
    }

    #[test]
    fn round_trips() {
        let h = sample_header();
        let encoded = h.encode();
        let decoded = Header::decode(&encoded).unwrap();
        assert_eq!(h, decoded);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = sample_header().encode();
        buf[0] = b'X';
        assert!(Header::decode(&buf).is_err());
    }

    #[test]
    fn rejects_bad_version() {
        let mut buf = sample_header().encode();
        buf[8..12].copy_from_slice(&99u32.to_le_bytes());
        assert!(Header::decode(&buf).is_err());
    }

    #[test]
    fn validates_offsets_against_file_len() {
        let h = sample_header();
        assert!(h.validate_against_file_len(2_000_000).is_ok());
        assert!(h.validate_against_file_len(10).is_err());
    }

    #[test]
    fn zero_size_data_region_is_not_bounds_checked() {
        // metadata.dat (multi-file variant) has no on-file data region —
        // chunk payloads live in separate chunk_NNN.dat files.
        let mut h = sample_header();
        h.data_offset = 0;
        h.data_size = 0;
        let file_len = HEADER_SIZE as u64 + h.healpix_index_size + h.chunk_index_size;
        assert!(h.validate_against_file_len(file_len).is_ok());
    }
}
