//! In-process byte cache with per-entry expiry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use encore_core::{StoreError, StoreResult};
use tokio::time::Instant;

use super::traits::{ByteCache, CacheStats};

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    expires_at: Instant,
}

/// Shared in-memory cache. Clones share state.
///
/// Expiry uses `tokio::time::Instant`, so paused-clock tests can advance
/// past a TTL without sleeping. `set_unavailable(true)` makes every call fail
/// the way an unreachable remote cache would.
#[derive(Debug, Clone, Default)]
pub struct InMemoryByteCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    stats: Arc<RwLock<CacheStats>>,
    unavailable: Arc<AtomicBool>,
    get_calls: Arc<AtomicU64>,
    set_calls: Arc<AtomicU64>,
    delete_calls: Arc<AtomicU64>,
}

impl InMemoryByteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Store raw bytes directly, bypassing serialization (used to plant corrupt entries).
    pub fn insert_raw(&self, key: &str, value: impl Into<Bytes>, ttl: Duration) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                key.to_string(),
                Entry {
                    value: value.into(),
                    expires_at: Instant::now() + ttl,
                },
            );
        }
    }

    /// True when `key` holds an unexpired value. Does not touch statistics.
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .map(|entries| {
                entries
                    .get(key)
                    .is_some_and(|e| e.expires_at > Instant::now())
            })
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_calls(&self) -> u64 {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> u64 {
        self.set_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> u64 {
        self.delete_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable {
                reason: "cache offline".to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn with_stats(&self, f: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            f(&mut stats);
        }
    }
}

#[async_trait]
impl ByteCache for InMemoryByteCache {
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                let value = entry.value.clone();
                self.with_stats(|s| s.hits += 1);
                Ok(Some(value))
            }
            Some(_) => {
                entries.remove(key);
                self.with_stats(|s| {
                    s.misses += 1;
                    s.expirations += 1;
                    s.entry_count = s.entry_count.saturating_sub(1);
                });
                Ok(None)
            }
            None => {
                self.with_stats(|s| s.misses += 1);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> StoreResult<()> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let size = value.len() as u64;
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        let previous = entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        self.with_stats(|s| {
            if let Some(prev) = &previous {
                s.memory_bytes = s.memory_bytes.saturating_sub(prev.value.len() as u64);
            } else {
                s.entry_count += 1;
            }
            s.memory_bytes += size;
        });
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        if let Some(prev) = entries.remove(key) {
            self.with_stats(|s| {
                s.entry_count = s.entry_count.saturating_sub(1);
                s.memory_bytes = s.memory_bytes.saturating_sub(prev.value.len() as u64);
            });
        }
        Ok(())
    }

    async fn stats(&self) -> StoreResult<CacheStats> {
        self.stats
            .read()
            .map(|s| s.clone())
            .map_err(|_| StoreError::LockPoisoned)
    }
}
