//! Catalog Configuration Module
//!
//! Every setting is read from `ENCORE_*` environment variables with
//! development defaults. Unknown backend names are rejected; numeric values
//! that fail to parse fall back to their defaults.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use encore_core::{BlobKind, CacheNamespace, ConfigError};
use encore_storage::BackgroundConfig;

use crate::constants::{DEFAULT_LMDB_MAX_SIZE_MB, DEFAULT_OWNER_TTL_SECS, DEFAULT_PUBLISHED_TTL_SECS};
use crate::db::DbConfig;
use crate::enrichment::EnrichmentConfig;
use crate::locator::LocatorConfig;
use crate::writer::{BucketConfig, UploadLimits};

// ============================================================================
// BACKEND SELECTION
// ============================================================================

/// Where cache entries live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheBackend {
    #[default]
    Memory,
    Lmdb,
}

impl FromStr for CacheBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(CacheBackend::Memory),
            "lmdb" => Ok(CacheBackend::Lmdb),
            other => Err(ConfigError::InvalidValue {
                field: "ENCORE_CACHE_BACKEND".to_string(),
                value: other.to_string(),
                reason: "expected memory or lmdb".to_string(),
            }),
        }
    }
}

/// Which relational store backs the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepositoryBackend {
    #[default]
    Memory,
    Postgres,
}

impl FromStr for RepositoryBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(RepositoryBackend::Memory),
            "postgres" | "postgresql" => Ok(RepositoryBackend::Postgres),
            other => Err(ConfigError::InvalidValue {
                field: "ENCORE_REPOSITORY".to_string(),
                value: other.to_string(),
                reason: "expected memory or postgres".to_string(),
            }),
        }
    }
}

fn env_parsed<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_backend<T: FromStr<Err = ConfigError> + Default>(key: &str) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value.parse(),
        _ => Ok(T::default()),
    }
}

// ============================================================================
// CACHE
// ============================================================================

/// Cache backend and per-namespace TTLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub backend: CacheBackend,
    pub published_ttl: Duration,
    pub owner_ttl: Duration,
    /// LMDB environment directory, used when `backend` is `Lmdb`.
    pub lmdb_path: PathBuf,
    pub lmdb_max_size_mb: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            published_ttl: Duration::from_secs(DEFAULT_PUBLISHED_TTL_SECS),
            owner_ttl: Duration::from_secs(DEFAULT_OWNER_TTL_SECS),
            lmdb_path: PathBuf::from("./data/cache"),
            lmdb_max_size_mb: DEFAULT_LMDB_MAX_SIZE_MB,
        }
    }
}

impl CacheSettings {
    /// Create CacheSettings from environment variables.
    ///
    /// - `ENCORE_CACHE_BACKEND`: memory | lmdb (default: memory)
    /// - `ENCORE_CACHE_PUBLISHED_TTL_SECS` (default: 300)
    /// - `ENCORE_CACHE_OWNER_TTL_SECS` (default: 300)
    /// - `ENCORE_CACHE_PATH`: LMDB directory (default: ./data/cache)
    /// - `ENCORE_CACHE_MAX_SIZE_MB`: LMDB map size (default: 256)
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            backend: env_backend("ENCORE_CACHE_BACKEND")?,
            published_ttl: Duration::from_secs(
                env_parsed("ENCORE_CACHE_PUBLISHED_TTL_SECS").unwrap_or(DEFAULT_PUBLISHED_TTL_SECS),
            ),
            owner_ttl: Duration::from_secs(
                env_parsed("ENCORE_CACHE_OWNER_TTL_SECS").unwrap_or(DEFAULT_OWNER_TTL_SECS),
            ),
            lmdb_path: std::env::var("ENCORE_CACHE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data/cache")),
            lmdb_max_size_mb: env_parsed("ENCORE_CACHE_MAX_SIZE_MB")
                .unwrap_or(DEFAULT_LMDB_MAX_SIZE_MB),
        })
    }

    pub fn published_namespace(&self) -> CacheNamespace {
        CacheNamespace::published(self.published_ttl)
    }

    pub fn owner_namespace(&self) -> CacheNamespace {
        CacheNamespace::owner(self.owner_ttl)
    }
}

// ============================================================================
// CATALOG
// ============================================================================

/// Full configuration for a catalog instance.
#[derive(Debug, Clone, Default)]
pub struct CatalogConfig {
    pub repository: RepositoryBackend,
    pub db: DbConfig,
    /// Root directory for blobs. `None` keeps blobs in memory.
    pub blob_root: Option<PathBuf>,
    pub cache: CacheSettings,
    pub enrichment: EnrichmentConfig,
    pub background: BackgroundConfig,
    pub locator: LocatorConfig,
    pub limits: UploadLimits,
    pub buckets: BucketConfig,
}

impl CatalogConfig {
    /// Load every section from the environment and validate the result.
    ///
    /// - `ENCORE_REPOSITORY`: memory | postgres (default: memory)
    /// - `ENCORE_BLOB_ROOT`: filesystem blob root (default: in-memory blobs)
    ///
    /// Section variables are documented on each section's `from_env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            repository: env_backend("ENCORE_REPOSITORY")?,
            db: DbConfig::from_env(),
            blob_root: std::env::var("ENCORE_BLOB_ROOT")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            cache: CacheSettings::from_env()?,
            enrichment: EnrichmentConfig::from_env(),
            background: BackgroundConfig::from_env(),
            locator: LocatorConfig::from_env(),
            limits: UploadLimits::from_env(),
            buckets: BucketConfig::from_env(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the catalog cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.published_ttl.is_zero() {
            return Err(invalid("ENCORE_CACHE_PUBLISHED_TTL_SECS", "0", "TTL must be positive"));
        }
        if self.cache.owner_ttl.is_zero() {
            return Err(invalid("ENCORE_CACHE_OWNER_TTL_SECS", "0", "TTL must be positive"));
        }
        if self.cache.backend == CacheBackend::Lmdb && self.cache.lmdb_max_size_mb == 0 {
            return Err(invalid("ENCORE_CACHE_MAX_SIZE_MB", "0", "map size must be positive"));
        }
        for kind in [BlobKind::Media, BlobKind::Cover] {
            if self.limits.limit_for(kind) == 0 {
                return Err(invalid(
                    match kind {
                        BlobKind::Media => "ENCORE_MAX_MEDIA_BYTES",
                        BlobKind::Cover => "ENCORE_MAX_COVER_BYTES",
                    },
                    "0",
                    "size limit must be positive",
                ));
            }
        }
        if self.buckets.media.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "ENCORE_MEDIA_BUCKET".to_string(),
            });
        }
        if self.buckets.covers.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "ENCORE_COVER_BUCKET".to_string(),
            });
        }
        if self.buckets.media == self.buckets.covers {
            return Err(invalid(
                "ENCORE_COVER_BUCKET",
                &self.buckets.covers,
                "media and cover buckets must differ",
            ));
        }
        if self.locator.host.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "ENCORE_PUBLIC_HOST".to_string(),
            });
        }
        Ok(())
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
