//! Error types for the catalog engine.
//!
//! One variant per failure kind named in the design: most are fatal to
//! a [`crate::reader::CatalogReader`] or a build; [`GaiaError::ChunkReadFailed`]
//! is caught internally and never escapes a query.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GaiaError>;

//tp GaiaError
/// Errors raised by the catalog reader and builder.
#[derive(Error, Debug)]
pub enum GaiaError {
    /// File missing, unreadable, wrong magic, or unsupported version.
    #[error("failed to open catalog at {path}: {reason}")]
    OpenFailed { path: String, reason: String },

    /// Header offsets or index entries are inconsistent with the file.
    #[error("corrupted index: {0}")]
    CorruptedIndex(String),

    /// A single chunk failed to load or decompress; the query degrades
    /// to partial results rather than propagating this.
    #[error("chunk {chunk_id} failed to load: {reason}")]
    ChunkReadFailed { chunk_id: u32, reason: String },

    /// A query argument is invalid (checked before any I/O).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An allocation needed to serve a query or build the source-id map failed.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// A builder phase failed; partial outputs (other than the phase-1
    /// temp file) have been removed.
    #[error("build failed in phase '{phase}': {reason}")]
    BuildFailed { phase: String, reason: String },

    /// Fallback for I/O errors that don't carry more specific context.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GaiaError {
    pub(crate) fn open_failed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::OpenFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupted(reason: impl Into<String>) -> Self {
        Self::CorruptedIndex(reason.into())
    }

    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument(reason.into())
    }

    pub(crate) fn build_failed(phase: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BuildFailed {
            phase: phase.into(),
            reason: reason.into(),
        }
    }
}
