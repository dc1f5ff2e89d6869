//! Caching layer for catalog reads.
//!
//! - [`ByteCache`]: namespaced key/value backend with per-entry TTL
//! - [`InMemoryByteCache`] and [`LmdbByteCache`]: the two backends
//! - [`CacheAside`]: batched and single-key reads with fallback to the
//!   source of truth
//! - [`BackgroundExecutor`]: bounded queue that performs cache population
//!   and invalidation off the request path

mod aside;
mod background;
mod lmdb_backend;
mod memory;
mod traits;

pub use aside::{
    first_occurrences, BatchFetcher, CacheAside, CacheAsideMetrics, CacheAsideSnapshot,
};
pub use background::{
    BackgroundConfig, BackgroundExecutor, BackgroundHandle, BackgroundJob, BackgroundMetrics,
    BackgroundSnapshot, DEFAULT_BACKGROUND_JOB_TIMEOUT_MS, DEFAULT_BACKGROUND_QUEUE_CAPACITY,
};
pub use lmdb_backend::{LmdbByteCache, LmdbCacheError};
pub use memory::InMemoryByteCache;
pub use traits::{ByteCache, CacheStats, CacheableEntity};
