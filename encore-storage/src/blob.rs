//! Blob store abstraction.
//!
//! Blobs are addressed by `(bucket, key)`. The store is not transactional:
//! a `put` is visible as soon as it returns and is only undone by an
//! explicit `delete`.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use encore_core::{StoreError, StoreResult};
use tokio::io::AsyncRead;
use uuid::Uuid;

/// Streaming handle to a stored blob.
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `content` under `(bucket, key)`, replacing any previous blob.
    ///
    /// `size` is the caller-declared length and must match `content`.
    async fn put(&self, bucket: &str, key: &str, content: Bytes, size: u64) -> StoreResult<()>;

    /// Open a blob for reading. `EmptyResult` if it does not exist.
    async fn get(&self, bucket: &str, key: &str) -> StoreResult<BlobReader>;

    /// Remove a blob. Removing an absent blob is not an error.
    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<()>;
}

fn check_size(content: &Bytes, size: u64) -> StoreResult<()> {
    if content.len() as u64 != size {
        return Err(StoreError::Internal {
            reason: format!(
                "declared size {} does not match content length {}",
                size,
                content.len()
            ),
        });
    }
    Ok(())
}

// ============================================================================
// IN-MEMORY
// ============================================================================

#[derive(Debug, Default)]
struct BlobCalls {
    puts: AtomicUsize,
    gets: AtomicUsize,
    deletes: AtomicUsize,
}

/// Shared in-memory blob store. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<RwLock<HashMap<(String, String), Bytes>>>,
    fail_puts: Arc<AtomicBool>,
    fail_deletes: Arc<AtomicBool>,
    calls: Arc<BlobCalls>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Direct read of stored bytes, bypassing the reader interface.
    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.objects
            .read()
            .ok()
            .and_then(|objects| objects.get(&(bucket.to_string(), key.to_string())).cloned())
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn put_calls(&self) -> usize {
        self.calls.puts.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.calls.gets.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.calls.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bucket: &str, key: &str, content: Bytes, size: u64) -> StoreResult<()> {
        self.calls.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                reason: "blob put failed (injected)".to_string(),
            });
        }
        check_size(&content, size)?;
        let mut objects = self.objects.write().map_err(|_| StoreError::LockPoisoned)?;
        objects.insert((bucket.to_string(), key.to_string()), content);
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> StoreResult<BlobReader> {
        self.calls.gets.fetch_add(1, Ordering::SeqCst);
        let content = self.object(bucket, key).ok_or(StoreError::EmptyResult)?;
        Ok(Box::new(Cursor::new(content)))
    }

    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.calls.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                reason: "blob delete failed (injected)".to_string(),
            });
        }
        let mut objects = self.objects.write().map_err(|_| StoreError::LockPoisoned)?;
        objects.remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}

// ============================================================================
// FILESYSTEM
// ============================================================================

/// Blob store rooted at a local directory: `{root}/{bucket}/{key}`.
///
/// Writes go to a temporary sibling and are renamed into place, so readers
/// never observe a partially written blob.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, bucket: &str, key: &str) -> StoreResult<PathBuf> {
        for (what, part) in [("bucket", bucket), ("key", key)] {
            if part.is_empty()
                || part.starts_with('.')
                || part.contains(['/', '\\'])
                || part.contains("..")
            {
                return Err(StoreError::Internal {
                    reason: format!("invalid blob {}: {:?}", what, part),
                });
            }
        }
        Ok(self.root.join(bucket).join(key))
    }
}

fn io_err(e: std::io::Error) -> StoreError {
    StoreError::Unavailable {
        reason: e.to_string(),
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, bucket: &str, key: &str, content: Bytes, size: u64) -> StoreResult<()> {
        check_size(&content, size)?;
        let path = self.path_for(bucket, key)?;
        let dir = self.root.join(bucket);
        tokio::fs::create_dir_all(&dir).await.map_err(io_err)?;

        let tmp = dir.join(format!(".{}.{}.tmp", key, Uuid::now_v7()));
        tokio::fs::write(&tmp, &content).await.map_err(io_err)?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_err(e));
        }
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> StoreResult<BlobReader> {
        let path = self.path_for(bucket, key)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::EmptyResult),
            Err(e) => Err(io_err(e)),
        }
    }

    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<()> {
        let path = self.path_for(bucket, key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(e)),
        }
    }
}
