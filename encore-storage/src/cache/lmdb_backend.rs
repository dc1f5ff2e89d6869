//! LMDB-backed byte cache.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! key-value store that survives process restarts.
//!
//! # Value Format
//!
//! `[expires_at millis: 8 bytes LE][payload]`. Expired entries read as
//! misses and are removed lazily on the next lookup.

use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use encore_core::{StoreError, StoreResult};
use heed::types::Bytes as RawBytes;
use heed::{Database, Env, EnvOpenOptions};

use super::traits::{ByteCache, CacheStats};

const HEADER_LEN: usize = 8;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored value is shorter than its header.
    #[error("Corrupt entry: {0}")]
    Corrupt(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for StoreError {
    fn from(e: LmdbCacheError) -> Self {
        match e {
            LmdbCacheError::Corrupt(reason) => StoreError::Corrupt { reason },
            other => StoreError::Unavailable {
                reason: other.to_string(),
            },
        }
    }
}

fn txn_err(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// LMDB-backed implementation of [`ByteCache`].
pub struct LmdbByteCache {
    env: Env,
    db: Database<RawBytes, RawBytes>,
    stats: Arc<RwLock<CacheStats>>,
}

impl LmdbByteCache {
    /// Open (or create) a cache under `path` with a map of `max_size_mb` megabytes.
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<RawBytes, RawBytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        let entry_count = db.len(&wtxn).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;

        tracing::debug!(entry_count, "opened LMDB cache");

        Ok(Self {
            env,
            db,
            stats: Arc::new(RwLock::new(CacheStats {
                entry_count,
                ..Default::default()
            })),
        })
    }

    fn with_stats(&self, f: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            f(&mut stats);
        }
    }

    fn encode(value: &[u8], ttl: Duration) -> Vec<u8> {
        let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = Utc::now().timestamp_millis().saturating_add(ttl_millis);
        let mut full = Vec::with_capacity(HEADER_LEN + value.len());
        full.extend_from_slice(&expires_at.to_le_bytes());
        full.extend_from_slice(value);
        full
    }

    /// Split a stored value into (expires_at millis, payload).
    fn decode(raw: &[u8]) -> Result<(i64, &[u8]), LmdbCacheError> {
        if raw.len() < HEADER_LEN {
            return Err(LmdbCacheError::Corrupt(format!(
                "entry of {} bytes has no header",
                raw.len()
            )));
        }
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&raw[..HEADER_LEN]);
        Ok((i64::from_le_bytes(header), &raw[HEADER_LEN..]))
    }

    /// Delete `key`, returning the stored length of the removed entry.
    fn remove(&self, key: &str) -> Result<Option<u64>, LmdbCacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let previous = self
            .db
            .get(&wtxn, key.as_bytes())
            .map_err(txn_err)?
            .map(|raw| raw.len() as u64);
        if previous.is_some() {
            self.db.delete(&mut wtxn, key.as_bytes()).map_err(txn_err)?;
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(previous)
    }
}

#[async_trait]
impl ByteCache for LmdbByteCache {
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        let lookup = {
            let rtxn = self.env.read_txn().map_err(txn_err)?;
            match self.db.get(&rtxn, key.as_bytes()).map_err(txn_err)? {
                Some(raw) => {
                    let (expires_at, payload) = Self::decode(raw)?;
                    Some((expires_at, Bytes::copy_from_slice(payload)))
                }
                None => None,
            }
        };

        match lookup {
            Some((expires_at, payload)) if expires_at > Utc::now().timestamp_millis() => {
                self.with_stats(|s| s.hits += 1);
                Ok(Some(payload))
            }
            Some(_) => {
                if let Some(len) = self.remove(key)? {
                    self.with_stats(|s| {
                        s.expirations += 1;
                        s.entry_count = s.entry_count.saturating_sub(1);
                        s.memory_bytes = s.memory_bytes.saturating_sub(len);
                    });
                }
                self.with_stats(|s| s.misses += 1);
                Ok(None)
            }
            None => {
                self.with_stats(|s| s.misses += 1);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> StoreResult<()> {
        let full = Self::encode(&value, ttl);

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let previous = self
            .db
            .get(&wtxn, key.as_bytes())
            .map_err(txn_err)?
            .map(|raw| raw.len() as u64);
        self.db
            .put(&mut wtxn, key.as_bytes(), &full)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;

        self.with_stats(|s| {
            match previous {
                Some(len) => s.memory_bytes = s.memory_bytes.saturating_sub(len),
                None => s.entry_count += 1,
            }
            s.memory_bytes += full.len() as u64;
        });
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        if let Some(len) = self.remove(key)? {
            self.with_stats(|s| {
                s.entry_count = s.entry_count.saturating_sub(1);
                s.memory_bytes = s.memory_bytes.saturating_sub(len);
            });
        }
        Ok(())
    }

    async fn stats(&self) -> StoreResult<CacheStats> {
        Ok(self.stats.read().map(|s| s.clone()).unwrap_or_default())
    }
}
