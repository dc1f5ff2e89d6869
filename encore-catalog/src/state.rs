//! Shared catalog state: stores, cache and coordinators wired from configuration.

use std::sync::Arc;
use std::time::Instant;

use encore_core::{CatalogError, CatalogResult, StoreError};
use encore_storage::{
    BackgroundExecutor, BackgroundHandle, BlobStore, ByteCache, CacheAside, CatalogRepository,
    FsBlobStore, InMemoryByteCache, LmdbByteCache, MemoryBlobStore, MemoryCatalogRepository,
    SubjectDirectory,
};

use crate::config::{CacheBackend, CatalogConfig, RepositoryBackend};
use crate::enrichment::EnrichmentCoordinator;
use crate::pg::PgCatalogRepository;
use crate::reader::CatalogReader;
use crate::writer::WriteCoordinator;

/// Everything a transport layer needs to serve catalog requests.
#[derive(Clone)]
pub struct CatalogState {
    pub config: CatalogConfig,
    /// Raw repository access for paths that bypass the cache.
    pub repo: Arc<dyn CatalogRepository>,
    pub blobs: Arc<dyn BlobStore>,
    pub cache: CacheAside,
    pub reader: CatalogReader,
    pub writer: WriteCoordinator,
    pub start_time: Instant,
}

impl CatalogState {
    /// Wire a state from already-built collaborators.
    ///
    /// The returned handle owns the background worker; shut it down to drain
    /// pending cache jobs.
    pub fn from_parts(
        config: CatalogConfig,
        repo: Arc<dyn CatalogRepository>,
        blobs: Arc<dyn BlobStore>,
        byte_cache: Arc<dyn ByteCache>,
        directory: Arc<dyn SubjectDirectory>,
    ) -> (Self, BackgroundHandle) {
        let (executor, handle) = BackgroundExecutor::start(config.background.clone());
        let published = config.cache.published_namespace();
        let owned = config.cache.owner_namespace();
        let cache = CacheAside::new(byte_cache, executor, vec![published, owned]);

        let enricher = EnrichmentCoordinator::new(directory, &config.enrichment);
        let reader = CatalogReader::new(
            Arc::clone(&repo),
            cache.clone(),
            enricher,
            published,
            owned,
        );
        let writer = WriteCoordinator::new(Arc::clone(&repo), Arc::clone(&blobs), cache.clone())
            .with_locator(config.locator.clone())
            .with_buckets(config.buckets.clone())
            .with_limits(config.limits.clone());

        let state = Self {
            config,
            repo,
            blobs,
            cache,
            reader,
            writer,
            start_time: Instant::now(),
        };
        (state, handle)
    }

    /// Build every store named by `config` and wire the state.
    ///
    /// A Postgres repository has its schema applied before use.
    pub async fn from_config(
        config: CatalogConfig,
        directory: Arc<dyn SubjectDirectory>,
    ) -> CatalogResult<(Self, BackgroundHandle)> {
        config.validate()?;

        let repo: Arc<dyn CatalogRepository> = match config.repository {
            RepositoryBackend::Memory => Arc::new(MemoryCatalogRepository::new()),
            RepositoryBackend::Postgres => {
                let repo = PgCatalogRepository::new(config.db.create_pool()?);
                repo.migrate().await.map_err(CatalogError::Upstream)?;
                Arc::new(repo)
            }
        };

        let blobs: Arc<dyn BlobStore> = match &config.blob_root {
            Some(root) => Arc::new(FsBlobStore::new(root.clone())),
            None => Arc::new(MemoryBlobStore::new()),
        };

        let byte_cache: Arc<dyn ByteCache> = match config.cache.backend {
            CacheBackend::Memory => Arc::new(InMemoryByteCache::new()),
            CacheBackend::Lmdb => {
                std::fs::create_dir_all(&config.cache.lmdb_path).map_err(|e| {
                    CatalogError::Upstream(StoreError::Unavailable {
                        reason: format!(
                            "cannot create cache directory {}: {}",
                            config.cache.lmdb_path.display(),
                            e
                        ),
                    })
                })?;
                let cache = LmdbByteCache::open(&config.cache.lmdb_path, config.cache.lmdb_max_size_mb)
                    .map_err(|e| CatalogError::Upstream(e.into()))?;
                Arc::new(cache)
            }
        };

        tracing::info!(
            repository = ?config.repository,
            cache = ?config.cache.backend,
            blob_root = ?config.blob_root,
            "Catalog state initialized"
        );

        Ok(Self::from_parts(config, repo, blobs, byte_cache, directory))
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }
}
