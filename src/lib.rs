/*!
A local, read-mostly engine for a Gaia DR3-scale star catalog: a
compact on-disk format indexed by HEALPix pixel, a bounded chunk cache,
and a thread-safe reader exposing source-id lookup and cone/magnitude/
brightest/count queries. A companion [`builder`] turns upstream records
into the on-disk format in one pass.

Logging is via the `log` facade; this crate never installs a logger —
that's the embedding binary's job (see `bin/gaia_catalog.rs` for the
`env_logger` setup used here).
*/

pub mod builder;
pub mod cache;
pub mod error;
pub mod format;
pub mod healpix;
pub mod reader;
pub mod record;
pub mod stats;

pub use builder::{Builder, BuilderConfig, InMemoryUpstreamSource, UpstreamSource};
#[cfg(feature = "csv")]
pub use builder::CsvUpstreamSource;
pub use error::{GaiaError, Result};
pub use reader::CatalogReader;
pub use record::{StarRecord, RECORD_SIZE};
pub use stats::{BuildStats, CacheStats};
