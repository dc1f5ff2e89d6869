//! Cross-store writes.
//!
//! An upload touches two stores that share no transaction: the relational
//! row and the blob. The row change is staged in an open transaction, the
//! blob is written while that transaction is still open, and only then is
//! the transaction committed. A failed blob write rolls the row back. A
//! failed commit leaves a blob nobody references, which is deleted unless
//! the previous committed row already pointed at the same key.
//!
//! Every successful write schedules invalidation of the touched ids in all
//! cache namespaces.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use encore_core::{
    object_key, BlobKind, BlobPayload, CatalogError, CatalogItem, CatalogResult, ItemId,
    ItemPatch, MetadataPatch, RequestContext, StoreError, SubjectId, ValidationError, WriteIntent,
};
use encore_storage::{
    first_occurrences, BlobReader, BlobStore, CacheAside, CatalogRepository, CatalogTransaction,
};
use tracing::Instrument;

use crate::constants::{
    DEFAULT_COVER_BUCKET, DEFAULT_MAX_COVER_BYTES, DEFAULT_MAX_MEDIA_BYTES, DEFAULT_MEDIA_BUCKET,
};
use crate::locator::{key_extension, locator_key, LocatorConfig};
use crate::probe::{DurationProbe, Mp3DurationProbe};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Per-kind payload size limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_media_bytes: u64,
    pub max_cover_bytes: u64,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_media_bytes: DEFAULT_MAX_MEDIA_BYTES,
            max_cover_bytes: DEFAULT_MAX_COVER_BYTES,
        }
    }
}

impl UploadLimits {
    /// Create UploadLimits from environment variables.
    ///
    /// - `ENCORE_MAX_MEDIA_BYTES`: raw media limit (default: 50 MiB)
    /// - `ENCORE_MAX_COVER_BYTES`: cover image limit (default: 5 MiB)
    pub fn from_env() -> Self {
        Self {
            max_media_bytes: std::env::var("ENCORE_MAX_MEDIA_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_MEDIA_BYTES),
            max_cover_bytes: std::env::var("ENCORE_MAX_COVER_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_COVER_BYTES),
        }
    }

    pub fn limit_for(&self, kind: BlobKind) -> u64 {
        match kind {
            BlobKind::Media => self.max_media_bytes,
            BlobKind::Cover => self.max_cover_bytes,
        }
    }
}

/// Blob buckets per kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketConfig {
    pub media: String,
    pub covers: String,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            media: DEFAULT_MEDIA_BUCKET.to_string(),
            covers: DEFAULT_COVER_BUCKET.to_string(),
        }
    }
}

impl BucketConfig {
    /// Create BucketConfig from environment variables.
    ///
    /// - `ENCORE_MEDIA_BUCKET` (default: media)
    /// - `ENCORE_COVER_BUCKET` (default: covers)
    pub fn from_env() -> Self {
        Self {
            media: std::env::var("ENCORE_MEDIA_BUCKET")
                .unwrap_or_else(|_| DEFAULT_MEDIA_BUCKET.to_string()),
            covers: std::env::var("ENCORE_COVER_BUCKET")
                .unwrap_or_else(|_| DEFAULT_COVER_BUCKET.to_string()),
        }
    }

    pub fn bucket_for(&self, kind: BlobKind) -> &str {
        match kind {
            BlobKind::Media => &self.media,
            BlobKind::Cover => &self.covers,
        }
    }
}

/// Content type served for a blob key.
pub fn content_type(key: &str) -> &'static str {
    match key_extension(key).map(str::to_ascii_lowercase).as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

/// An opened blob ready to stream back to a caller.
pub struct RawBlob {
    pub key: String,
    pub content_type: &'static str,
    pub reader: BlobReader,
}

impl std::fmt::Debug for RawBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawBlob")
            .field("key", &self.key)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// COORDINATOR
// ============================================================================

/// Orchestrates writes across the relational store, the blob store and the cache.
#[derive(Clone)]
pub struct WriteCoordinator {
    repo: Arc<dyn CatalogRepository>,
    blobs: Arc<dyn BlobStore>,
    cache: CacheAside,
    probe: Arc<dyn DurationProbe>,
    locator: LocatorConfig,
    buckets: BucketConfig,
    limits: UploadLimits,
}

impl WriteCoordinator {
    pub fn new(repo: Arc<dyn CatalogRepository>, blobs: Arc<dyn BlobStore>, cache: CacheAside) -> Self {
        Self {
            repo,
            blobs,
            cache,
            probe: Arc::new(Mp3DurationProbe),
            locator: LocatorConfig::default(),
            buckets: BucketConfig::default(),
            limits: UploadLimits::default(),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn DurationProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_locator(mut self, locator: LocatorConfig) -> Self {
        self.locator = locator;
        self
    }

    pub fn with_buckets(mut self, buckets: BucketConfig) -> Self {
        self.buckets = buckets;
        self
    }

    pub fn with_limits(mut self, limits: UploadLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn buckets(&self) -> &BucketConfig {
        &self.buckets
    }

    /// Store a media or cover payload for an item and return its public locator.
    ///
    /// Metadata fields in the intent's patch are applied in the same
    /// transaction as the blob reference.
    pub async fn upload(&self, ctx: &RequestContext, intent: WriteIntent) -> CatalogResult<String> {
        self.upload_inner(ctx, intent)
            .instrument(ctx.span("upload"))
            .await
    }

    async fn upload_inner(&self, ctx: &RequestContext, intent: WriteIntent) -> CatalogResult<String> {
        let WriteIntent {
            item_id,
            actor_id,
            patch,
            payload,
        } = intent;
        let payload = payload.ok_or_else(|| ValidationError::RequiredFieldMissing {
            field: "payload".to_string(),
        })?;
        let extension = self.validate_payload(&payload)?;
        validate_metadata(&patch, false)?;
        ctx.ensure_active()?;

        let previous = self.owned_item(ctx, actor_id, item_id).await?;
        if payload.kind == BlobKind::Media && previous.is_published() {
            return Err(CatalogError::AlreadyFinalized { id: item_id });
        }

        let duration = match payload.kind {
            BlobKind::Media => Some(self.probe.probe(payload.content.clone())?),
            BlobKind::Cover => None,
        };

        let name = patch.name.clone().unwrap_or_else(|| previous.name.clone());
        let key = object_key(previous.owner_id, &name, &extension);
        let locator = self.locator.locator(payload.kind, &key);
        let size = payload.content.len() as u64;

        let mut row_patch = ItemPatch::from(patch);
        match payload.kind {
            BlobKind::Media => {
                row_patch.blob_ref = Some(key.clone());
                row_patch.weight_bytes = Some(size as i64);
                row_patch.duration_micros =
                    duration.map(|d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX));
            }
            BlobKind::Cover => {
                row_patch.image_ref = Some(locator.clone());
            }
        }

        let bucket = self.buckets.bucket_for(payload.kind);
        let mut tx = self.begin(ctx).await?;

        let updated = match ctx.run(self.patch(&mut *tx, actor_id, item_id, &row_patch)).await {
            Ok(updated) => updated,
            Err(e) => {
                self.rollback(tx).await;
                return Err(e);
            }
        };
        log_changes(item_id, &previous, &updated);

        let put = ctx
            .run(async {
                self.blobs
                    .put(bucket, &key, payload.content.clone(), size)
                    .await
                    .map_err(CatalogError::Upstream)
            })
            .await;
        if let Err(e) = put {
            tracing::warn!(item_id = %item_id, bucket, key = %key, error = %e, "Blob write failed, rolling back");
            self.rollback(tx).await;
            if matches!(e, CatalogError::Cancelled) {
                // The put may have landed before the race was decided.
                self.compensate(bucket, &key, &previous, payload.kind).await;
            }
            return Err(e);
        }

        if ctx.is_cancelled() {
            self.rollback(tx).await;
            self.compensate(bucket, &key, &previous, payload.kind).await;
            return Err(CatalogError::Cancelled);
        }

        // Commit is not raced against cancellation: once sent, its outcome is reported.
        if let Err(e) = tx.commit().await {
            tracing::error!(item_id = %item_id, key = %key, error = %e, "Commit failed after blob write");
            self.compensate(bucket, &key, &previous, payload.kind).await;
            return Err(CatalogError::Internal {
                reason: format!("commit failed after blob write: {}", e),
            });
        }

        self.cache.invalidate(&[item_id]);
        tracing::info!(
            item_id = %item_id,
            kind = %payload.kind,
            key = %key,
            bytes = size,
            "Upload committed"
        );
        Ok(locator)
    }

    /// Change relational metadata only. Returns the committed row.
    pub async fn patch_metadata(
        &self,
        ctx: &RequestContext,
        intent: WriteIntent,
    ) -> CatalogResult<CatalogItem> {
        async {
            let WriteIntent {
                item_id,
                actor_id,
                patch,
                payload,
            } = intent;
            if payload.is_some() {
                return Err(ValidationError::InvalidValue {
                    field: "payload".to_string(),
                    reason: "metadata updates carry no payload".to_string(),
                }
                .into());
            }
            validate_metadata(&patch, true)?;
            ctx.ensure_active()?;

            let previous = self.owned_item(ctx, actor_id, item_id).await?;
            let row_patch = ItemPatch::from(patch);
            let mut tx = self.begin(ctx).await?;
            let updated = match ctx.run(self.patch(&mut *tx, actor_id, item_id, &row_patch)).await {
                Ok(updated) => updated,
                Err(e) => {
                    self.rollback(tx).await;
                    return Err(e);
                }
            };
            if ctx.is_cancelled() {
                self.rollback(tx).await;
                return Err(CatalogError::Cancelled);
            }
            tx.commit().await.map_err(|e| CatalogError::Internal {
                reason: format!("commit failed: {}", e),
            })?;

            log_changes(item_id, &previous, &updated);
            self.cache.invalidate(&[item_id]);
            Ok(updated)
        }
        .instrument(ctx.span("patch_metadata"))
        .await
    }

    /// Publish draft items owned by `actor`. All-or-nothing.
    ///
    /// Every item must exist, be owned by `actor`, be unpublished and carry
    /// uploaded media.
    pub async fn publish(
        &self,
        ctx: &RequestContext,
        actor: SubjectId,
        ids: &[ItemId],
    ) -> CatalogResult<Vec<CatalogItem>> {
        async {
            let unique = first_occurrences(ids);
            if unique.is_empty() {
                return Err(ValidationError::RequiredFieldMissing {
                    field: "ids".to_string(),
                }
                .into());
            }
            ctx.ensure_active()?;

            let rows = ctx
                .run(async {
                    match self.repo.owned_by_ids(actor, &unique).await {
                        Ok(rows) => Ok(rows),
                        Err(StoreError::EmptyResult) => Ok(Vec::new()),
                        Err(e) => Err(CatalogError::from_store(e, None)),
                    }
                })
                .await?;
            for id in &unique {
                let row = rows
                    .iter()
                    .find(|r| r.id == *id)
                    .ok_or(CatalogError::NotFound { id: *id })?;
                if row.is_published() {
                    return Err(CatalogError::AlreadyFinalized { id: *id });
                }
                if row.blob_ref.is_none() {
                    return Err(ValidationError::InvalidValue {
                        field: "blob_ref".to_string(),
                        reason: format!("item {} has no uploaded media", id),
                    }
                    .into());
                }
            }

            let mut tx = self.begin(ctx).await?;
            let at = Utc::now();
            let published = match ctx
                .run(async {
                    tx.publish_items(actor, &unique, at)
                        .await
                        .map_err(|e| CatalogError::from_store(e, None))
                })
                .await
            {
                Ok(published) => published,
                Err(e) => {
                    self.rollback(tx).await;
                    return Err(e);
                }
            };
            if ctx.is_cancelled() {
                self.rollback(tx).await;
                return Err(CatalogError::Cancelled);
            }
            tx.commit().await.map_err(|e| CatalogError::Internal {
                reason: format!("commit failed: {}", e),
            })?;

            self.cache.invalidate(&unique);
            tracing::info!(count = published.len(), "Items published");
            Ok(published)
        }
        .instrument(ctx.span("publish"))
        .await
    }

    /// Open a stored blob by locator or bare key.
    pub async fn read_raw(
        &self,
        ctx: &RequestContext,
        kind: BlobKind,
        locator: &str,
    ) -> CatalogResult<RawBlob> {
        let key = locator_key(locator).ok_or_else(|| ValidationError::InvalidValue {
            field: "key".to_string(),
            reason: format!("no blob key in {:?}", locator),
        })?;
        let extension = key_extension(key).unwrap_or_default().to_ascii_lowercase();
        if !kind.accepts_extension(&extension) {
            return Err(ValidationError::UnsupportedExtension {
                kind,
                extension,
            }
            .into());
        }

        let bucket = self.buckets.bucket_for(kind);
        let reader = ctx
            .run(async {
                self.blobs.get(bucket, key).await.map_err(|e| match e {
                    StoreError::EmptyResult => CatalogError::BlobNotFound {
                        key: key.to_string(),
                    },
                    e => CatalogError::Upstream(e),
                })
            })
            .await?;
        Ok(RawBlob {
            key: key.to_string(),
            content_type: content_type(key),
            reader,
        })
    }

    // ------------------------------------------------------------------------

    /// Normalized extension of a payload that passed validation.
    fn validate_payload(&self, payload: &BlobPayload) -> Result<String, ValidationError> {
        let extension = payload
            .extension
            .trim()
            .trim_start_matches('.')
            .to_ascii_lowercase();
        if !payload.kind.accepts_extension(&extension) {
            return Err(ValidationError::UnsupportedExtension {
                kind: payload.kind,
                extension,
            });
        }
        let actual = payload.content.len() as u64;
        if actual != payload.declared_size {
            return Err(ValidationError::SizeMismatch {
                declared: payload.declared_size,
                actual,
            });
        }
        if actual == 0 {
            return Err(ValidationError::InvalidValue {
                field: "content".to_string(),
                reason: "payload is empty".to_string(),
            });
        }
        let limit = self.limits.limit_for(payload.kind);
        if actual > limit {
            return Err(ValidationError::PayloadTooLarge {
                size: actual,
                limit,
            });
        }
        Ok(extension)
    }

    async fn owned_item(
        &self,
        ctx: &RequestContext,
        actor: SubjectId,
        id: ItemId,
    ) -> CatalogResult<CatalogItem> {
        ctx.run(async {
            self.repo
                .owned_item(actor, id)
                .await
                .map_err(|e| CatalogError::from_store(e, Some(id)))
        })
        .await
    }

    async fn begin(&self, ctx: &RequestContext) -> CatalogResult<Box<dyn CatalogTransaction>> {
        ctx.run(async {
            self.repo
                .begin()
                .await
                .map_err(|e| CatalogError::from_store(e, None))
        })
        .await
    }

    async fn patch(
        &self,
        tx: &mut dyn CatalogTransaction,
        actor: SubjectId,
        id: ItemId,
        patch: &ItemPatch,
    ) -> CatalogResult<CatalogItem> {
        tx.patch_item(actor, id, patch)
            .await
            .map_err(|e| CatalogError::from_store(e, Some(id)))
    }

    async fn rollback(&self, tx: Box<dyn CatalogTransaction>) {
        if let Err(e) = tx.rollback().await {
            tracing::warn!(error = %e, "Rollback failed");
        }
    }

    /// Delete a blob written by a write that did not commit.
    ///
    /// Skipped when any committed row references `key` (this item's previous
    /// row, or another item that kept the key after a rename), since the put
    /// replaced a blob that is still live. A failed reference check keeps
    /// the blob.
    async fn compensate(&self, bucket: &str, key: &str, previous: &CatalogItem, kind: BlobKind) {
        let referenced = match kind {
            BlobKind::Media => previous.blob_ref.as_deref() == Some(key),
            BlobKind::Cover => previous.image_ref.as_deref().and_then(locator_key) == Some(key),
        };
        let referenced = referenced
            || match self.repo.blob_in_use(kind, key).await {
                Ok(in_use) => in_use,
                Err(e) => {
                    tracing::warn!(
                        bucket,
                        key,
                        error = %e,
                        "Cannot check blob references, keeping blob"
                    );
                    true
                }
            };
        if referenced {
            tracing::info!(bucket, key, "Blob still referenced by committed row, keeping it");
            return;
        }
        match self.blobs.delete(bucket, key).await {
            Ok(()) => tracing::info!(bucket, key, "Orphaned blob removed"),
            Err(e) => tracing::error!(bucket, key, error = %e, "Failed to remove orphaned blob"),
        }
    }
}

fn validate_metadata(patch: &MetadataPatch, required: bool) -> Result<(), ValidationError> {
    if required && patch.is_empty() {
        return Err(ValidationError::EmptyPatch);
    }
    if let Some(name) = &patch.name {
        if name.trim().is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "name".to_string(),
                reason: "must not be blank".to_string(),
            });
        }
    }
    Ok(())
}

fn log_changes(item_id: ItemId, before: &CatalogItem, after: &CatalogItem) {
    let changes = before.diff(after);
    if changes.is_empty() {
        return;
    }
    let rendered: Vec<String> = changes.iter().map(ToString::to_string).collect();
    tracing::info!(item_id = %item_id, changes = ?rendered, "Item updated");
}

/// Read a whole blob into memory. Intended for small objects and tests.
pub async fn read_to_bytes(blob: RawBlob) -> CatalogResult<Bytes> {
    use tokio::io::AsyncReadExt;

    let mut reader = blob.reader;
    let mut buf = Vec::new();
    reader
        .read_to_end(&mut buf)
        .await
        .map_err(|e| CatalogError::Upstream(StoreError::Unavailable {
            reason: format!("reading blob {}: {}", blob.key, e),
        }))?;
    Ok(Bytes::from(buf))
}
