//! ENCORE Storage - Collaborator Traits and Implementations
//!
//! Defines the seams between the catalog core and the stores it coordinates:
//! the relational repository, the blob store, the byte cache and the subject
//! directory. In-memory implementations of each live here alongside the
//! LMDB cache and filesystem blob store. The PostgreSQL repository lives in
//! encore-catalog.

pub mod blob;
pub mod cache;
pub mod directory;
pub mod memory;
pub mod repository;

pub use blob::{BlobReader, BlobStore, FsBlobStore, MemoryBlobStore};
pub use cache::{
    first_occurrences, BackgroundConfig, BackgroundExecutor, BackgroundHandle,
    BackgroundSnapshot, BatchFetcher, ByteCache, CacheAside, CacheAsideSnapshot, CacheStats,
    CacheableEntity, InMemoryByteCache, LmdbByteCache, LmdbCacheError,
};
pub use directory::{StaticSubjectDirectory, SubjectDirectory, NAME_LOOKUP_LIMIT};
pub use memory::MemoryCatalogRepository;
pub use repository::{
    references_blob, CatalogRepository, CatalogTransaction, ItemQuery, DEFAULT_QUERY_LIMIT,
};
