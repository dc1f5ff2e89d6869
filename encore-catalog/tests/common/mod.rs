//! Shared harness: a catalog wired to in-memory collaborators that tests
//! can inspect and fault.

#![allow(dead_code)]

use std::sync::Arc;

use encore_catalog::{CatalogConfig, CatalogState};
use encore_storage::BackgroundHandle;
use encore_test_utils::fixtures::subject;
use encore_test_utils::{
    EnrichmentSubject, InMemoryByteCache, MemoryBlobStore, MemoryCatalogRepository,
    StaticSubjectDirectory,
};

pub struct Harness {
    pub repo: MemoryCatalogRepository,
    pub blobs: MemoryBlobStore,
    pub cache: InMemoryByteCache,
    pub directory: StaticSubjectDirectory,
    pub state: CatalogState,
    pub handle: BackgroundHandle,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(CatalogConfig::default())
    }

    pub fn with_config(config: CatalogConfig) -> Self {
        let repo = MemoryCatalogRepository::new();
        let blobs = MemoryBlobStore::new();
        let cache = InMemoryByteCache::new();
        let directory = StaticSubjectDirectory::new();
        let (state, handle) = CatalogState::from_parts(
            config,
            Arc::new(repo.clone()),
            Arc::new(blobs.clone()),
            Arc::new(cache.clone()),
            Arc::new(directory.clone()),
        );
        Self {
            repo,
            blobs,
            cache,
            directory,
            state,
            handle,
        }
    }

    /// Register a subject with the directory and return it.
    pub fn subject(&self, name: &str) -> EnrichmentSubject {
        let s = subject(name);
        self.directory.insert(s.clone());
        s
    }

    /// Wait for queued cache population and invalidation jobs.
    pub async fn settle(&self) {
        self.state.cache.executor().flush().await;
    }
}
