//! Relational source-of-truth traits.
//!
//! Reads are exposed directly on [`CatalogRepository`]; every mutation goes
//! through a [`CatalogTransaction`] so the write coordinator can hold it open
//! across the blob-store step and decide to commit or roll back afterwards.

use async_trait::async_trait;
use encore_core::{BlobKind, CatalogItem, ItemId, ItemPatch, StoreResult, SubjectId, Timestamp};

/// Default and maximum page size for filtered queries.
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Filtered query over catalog items. Never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemQuery {
    /// Case-insensitive substring match on the item name.
    pub name_contains: Option<String>,
    pub owner_id: Option<SubjectId>,
    pub published_only: bool,
    pub limit: usize,
    pub offset: usize,
}

impl Default for ItemQuery {
    fn default() -> Self {
        Self {
            name_contains: None,
            owner_id: None,
            published_only: true,
            limit: DEFAULT_QUERY_LIMIT,
            offset: 0,
        }
    }
}

impl ItemQuery {
    pub fn by_name(fragment: impl Into<String>) -> Self {
        Self {
            name_contains: Some(fragment.into()),
            ..Default::default()
        }
    }

    pub fn with_owner(mut self, owner_id: SubjectId) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    pub fn including_drafts(mut self) -> Self {
        self.published_only = false;
        self
    }

    pub fn with_page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit.clamp(1, DEFAULT_QUERY_LIMIT);
        self.offset = offset;
        self
    }

    /// In-process evaluation of the filter (pagination excluded).
    pub fn matches(&self, item: &CatalogItem) -> bool {
        if self.published_only && !item.is_published() {
            return false;
        }
        if let Some(owner) = self.owner_id {
            if item.owner_id != owner {
                return false;
            }
        }
        match &self.name_contains {
            Some(fragment) => item
                .name
                .to_lowercase()
                .contains(&fragment.to_lowercase()),
            None => true,
        }
    }
}

/// Read access to catalog items plus a transaction factory.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Get an item by id. `EmptyResult` if it does not exist.
    async fn item(&self, id: ItemId) -> StoreResult<CatalogItem>;

    /// Get an item owned by `owner`. `EmptyResult` if missing or owned by someone else.
    async fn owned_item(&self, owner: SubjectId, id: ItemId) -> StoreResult<CatalogItem>;

    /// Published items among `ids`, in request order. Missing ids are skipped.
    async fn published_by_ids(&self, ids: &[ItemId]) -> StoreResult<Vec<CatalogItem>>;

    /// Items among `ids` owned by `owner`, in request order. Missing ids are skipped.
    async fn owned_by_ids(&self, owner: SubjectId, ids: &[ItemId])
        -> StoreResult<Vec<CatalogItem>>;

    /// Filtered query, ordered by upload time descending.
    async fn search(&self, query: &ItemQuery) -> StoreResult<Vec<CatalogItem>>;

    /// Whether any committed row references blob `key`.
    ///
    /// Media rows hold the bare key in `blob_ref`; cover rows hold a locator
    /// in `image_ref` whose last path segment is the key.
    async fn blob_in_use(&self, kind: BlobKind, key: &str) -> StoreResult<bool>;

    /// Open a transaction for mutations.
    async fn begin(&self) -> StoreResult<Box<dyn CatalogTransaction>>;
}

/// In-process form of [`CatalogRepository::blob_in_use`] for one row.
pub fn references_blob(item: &CatalogItem, kind: BlobKind, key: &str) -> bool {
    match kind {
        BlobKind::Media => item.blob_ref.as_deref() == Some(key),
        BlobKind::Cover => item
            .image_ref
            .as_deref()
            .is_some_and(|r| {
                r == key || r.strip_suffix(key).is_some_and(|head| head.ends_with('/'))
            }),
    }
}

/// An open relational transaction.
///
/// Dropping a transaction without `commit` or `rollback` discards its changes.
#[async_trait]
pub trait CatalogTransaction: Send {
    /// Apply `patch` to the item if `owner` owns it and return the updated row.
    ///
    /// `EmptyResult` when no row matches both id and owner.
    async fn patch_item(
        &mut self,
        owner: SubjectId,
        id: ItemId,
        patch: &ItemPatch,
    ) -> StoreResult<CatalogItem>;

    /// Mark every item in `ids` as published at `at`.
    async fn publish_items(
        &mut self,
        owner: SubjectId,
        ids: &[ItemId],
        at: Timestamp,
    ) -> StoreResult<Vec<CatalogItem>> {
        let patch = ItemPatch {
            published_at: Some(at),
            ..Default::default()
        };
        let mut updated = Vec::with_capacity(ids.len());
        for id in ids {
            updated.push(self.patch_item(owner, *id, &patch).await?);
        }
        Ok(updated)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
