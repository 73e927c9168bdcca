//! On-disk format: header, HEALPix index, and chunk index.
//!
//! Byte-exact per the format spec — this is the compatibility boundary
//! shared by the builder and the reader.

pub mod header;
pub mod index;

pub use header::{Header, FLAG_UNCOMPRESSED, HEADER_SIZE, MAGIC, VERSION};
pub use index::{
    chunks_intersecting_range, find_pixel_entry, ChunkDescriptor, HealpixIndexEntry,
    CHUNK_DESCRIPTOR_SIZE, HEALPIX_ENTRY_SIZE,
};
