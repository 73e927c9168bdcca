//! HEALPix index entries and chunk descriptors.

use crate::error::{GaiaError, Result};

/// Size in bytes of one [`HealpixIndexEntry`].
pub const HEALPIX_ENTRY_SIZE: usize = 16;
/// Size in bytes of one [`ChunkDescriptor`].
pub const CHUNK_DESCRIPTOR_SIZE: usize = 40;

//tp HealpixIndexEntry
/// One row of the HEALPix index: the global record range belonging to
/// a single non-empty pixel. Entries are sorted ascending by `pixel_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealpixIndexEntry {
    pub pixel_id: u32,
    pub first_star_idx: u32,
    pub num_stars: u32,
    pub reserved: u32,
}

impl HealpixIndexEntry {
    pub fn encode(&self, out: &mut [u8; HEALPIX_ENTRY_SIZE]) {
        out[0..4].copy_from_slice(&self.pixel_id.to_le_bytes());
        out[4..8].copy_from_slice(&self.first_star_idx.to_le_bytes());
        out[8..12].copy_from_slice(&self.num_stars.to_le_bytes());
        out[12..16].copy_from_slice(&self.reserved.to_le_bytes());
    }

    pub fn decode(buf: &[u8; HEALPIX_ENTRY_SIZE]) -> Self {
        Self {
            pixel_id: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            first_star_idx: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            num_stars: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            reserved: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
        }
    }

    pub fn encode_all(entries: &[HealpixIndexEntry]) -> Vec<u8> {
        let mut out = Vec::with_capacity(entries.len() * HEALPIX_ENTRY_SIZE);
        let mut buf = [0u8; HEALPIX_ENTRY_SIZE];
        for e in entries {
            e.encode(&mut buf);
            out.extend_from_slice(&buf);
        }
        out
    }

    pub fn decode_all(bytes: &[u8]) -> Result<Vec<HealpixIndexEntry>> {
        if bytes.len() % HEALPIX_ENTRY_SIZE != 0 {
            return Err(GaiaError::corrupted(
                "healpix index region length is not a multiple of 16 bytes",
            ));
        }
        Ok(bytes
            .chunks_exact(HEALPIX_ENTRY_SIZE)
            .map(|c| Self::decode(c.try_into().unwrap()))
            .collect())
    }
}

//tp ChunkDescriptor
/// One row of the chunk index: where a chunk's compressed bytes live
/// and which global record range it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub chunk_id: u32,
    pub first_star_idx: u64,
    pub num_stars: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_offset: u64,
    pub reserved: u64,
}

impl ChunkDescriptor {
    pub fn encode(&self, out: &mut [u8; CHUNK_DESCRIPTOR_SIZE]) {
        out[0..4].copy_from_slice(&self.chunk_id.to_le_bytes());
        out[4..12].copy_from_slice(&self.first_star_idx.to_le_bytes());
        out[12..16].copy_from_slice(&self.num_stars.to_le_bytes());
        out[16..20].copy_from_slice(&self.compressed_size.to_le_bytes());
        out[20..24].copy_from_slice(&self.uncompressed_size.to_le_bytes());
        out[24..32].copy_from_slice(&self.file_offset.to_le_bytes());
        out[32..40].copy_from_slice(&self.reserved.to_le_bytes());
    }

    pub fn decode(buf: &[u8; CHUNK_DESCRIPTOR_SIZE]) -> Self {
        Self {
            chunk_id: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            first_star_idx: u64::from_le_bytes(buf[4..12].try_into().unwrap()),
            num_stars: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            compressed_size: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            uncompressed_size: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
            file_offset: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
            reserved: u64::from_le_bytes(buf[32..40].try_into().unwrap()),
        }
    }

    pub fn encode_all(entries: &[ChunkDescriptor]) -> Vec<u8> {
        let mut out = Vec::with_capacity(entries.len() * CHUNK_DESCRIPTOR_SIZE);
        let mut buf = [0u8; CHUNK_DESCRIPTOR_SIZE];
        for e in entries {
            e.encode(&mut buf);
            out.extend_from_slice(&buf);
        }
        out
    }

    pub fn decode_all(bytes: &[u8]) -> Result<Vec<ChunkDescriptor>> {
        if bytes.len() % CHUNK_DESCRIPTOR_SIZE != 0 {
            return Err(GaiaError::corrupted(
                "chunk index region length is not a multiple of 40 bytes",
            ));
        }
        Ok(bytes
            .chunks_exact(CHUNK_DESCRIPTOR_SIZE)
            .map(|c| Self::decode(c.try_into().unwrap()))
            .collect())
    }
}

//fp find_pixel_entry
/// Binary search the (pixel_id-sorted) HEALPix index for `pixel_id`.
pub fn find_pixel_entry(index: &[HealpixIndexEntry], pixel_id: u32) -> Option<&HealpixIndexEntry> {
    index
        .binary_search_by_key(&pixel_id, |e| e.pixel_id)
        .ok()
        .map(|i| &index[i])
}

//fp chunks_intersecting_range
/// Chunk ids whose `[first_star_idx, first_star_idx+num_stars)` range
/// overlaps `[first, first+count)`.
pub fn chunks_intersecting_range(
    chunks: &[ChunkDescriptor],
    first: u64,
    count: u64,
) -> Vec<usize> {
    let end = first + count;
    chunks
        .iter()
        .enumerate()
        .filter(|(_, c)| {
            let c_first = c.first_star_idx;
            let c_end = c_first + c.num_stars as u64;
            c_first < end && first < c_end
        })
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healpix_entry_round_trips() {
        let e = HealpixIndexEntry {
            pixel_id: 42,
            first_star_idx: 1000,
            num_stars: 500,
            reserved: 0,
        };
        let mut buf = [0u8; HEALPIX_ENTRY_SIZE];
        e.encode(&mut buf);
        assert_eq!(HealpixIndexEntry::decode(&buf), e);
    }

    #[test]
    fn chunk_descriptor_round_trips() {
        let c = ChunkDescriptor {
            chunk_id: 3,
            first_star_idx: 3_000_000,
            num_stars: 1_000_000,
            compressed_size: 12_345,
            uncompressed_size: 80_000_000,
            file_offset: 999_999,
            reserved: 0,
        };
        let mut buf = [0u8; CHUNK_DESCRIPTOR_SIZE];
        c.encode(&mut buf);
        assert_eq!(ChunkDescriptor::decode(&buf), c);
    }

    #[test]
    fn binary_search_finds_entry() {
        let idx = vec![
            HealpixIndexEntry { pixel_id: 1, first_star_idx: 0, num_stars: 10, reserved: 0 },
            HealpixIndexEntry { pixel_id: 5, first_star_idx: 10, num_stars: 20, reserved: 0 },
            HealpixIndexEntry { pixel_id: 9, first_star_idx: 30, num_stars: 5, reserved: 0 },
        ];
        assert_eq!(find_pixel_entry(&idx, 5).unwrap().first_star_idx, 10);
        assert!(find_pixel_entry(&idx, 4).is_none());
    }

    #[test]
    fn chunk_intersection_is_correct() {
        let chunks = vec![
            ChunkDescriptor { chunk_id: 0, first_star_idx: 0, num_stars: 100, compressed_size: 1, uncompressed_size: 1, file_offset: 0, reserved: 0 },
            ChunkDescriptor { chunk_id: 1, first_star_idx: 100, num_stars: 100, compressed_size: 1, uncompressed_size: 1, file_offset: 0, reserved: 0 },
            ChunkDescriptor { chunk_id: 2, first_star_idx: 200, num_stars: 100, compressed_size: 1, uncompressed_size: 1, file_offset: 0, reserved: 0 },
        ];
        // A pixel spanning [90, 210) touches all three chunks.
        assert_eq!(chunks_intersecting_range(&chunks, 90, 120), vec![0, 1, 2]);
        assert_eq!(chunks_intersecting_range(&chunks, 0, 50), vec![0]);
    }
}
