//! ENCORE catalog consistency core.
//!
//! Keeps three stores consistent for a music catalog: a relational source of
//! truth for item metadata, a byte cache in front of it, and a blob store for
//! raw media and cover images. Reads go through the cache and are decorated
//! with subject data from an external directory; writes stage the row in a
//! transaction, write the blob, then commit or compensate.
//!
//! - [`CatalogReader`]: cache-aside reads by id, uncached search, enrichment
//! - [`WriteCoordinator`]: uploads, metadata patches, publishing, raw read-back
//! - [`EnrichmentCoordinator`]: bounded, order-preserving subject fan-out
//! - [`CatalogState`]: wiring of all of the above from [`CatalogConfig`]

pub mod config;
pub mod constants;
pub mod db;
pub mod enrichment;
pub mod locator;
pub mod pg;
pub mod probe;
pub mod reader;
pub mod state;
pub mod telemetry;
pub mod writer;

pub use config::{CacheBackend, CacheSettings, CatalogConfig, RepositoryBackend};
pub use db::DbConfig;
pub use enrichment::{EnrichmentConfig, EnrichmentCoordinator};
pub use locator::{key_extension, locator_key, LocatorConfig};
pub use pg::{PgCatalogRepository, PgTransaction, MIGRATION_V1};
pub use probe::{DurationProbe, Mp3DurationProbe};
pub use reader::{CatalogReader, OwnedFetcher, PublishedFetcher};
pub use state::CatalogState;
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
pub use writer::{content_type, read_to_bytes, BucketConfig, RawBlob, UploadLimits, WriteCoordinator};
