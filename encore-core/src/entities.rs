//! Core entity structures

use crate::{ItemId, SubjectId, Timestamp};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A catalog item (track) as stored in the relational source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: ItemId,
    pub owner_id: SubjectId,
    pub name: String,
    /// Blob key of the uploaded media. Null until an upload commits.
    pub blob_ref: Option<String>,
    /// Public locator of the cover image.
    pub image_ref: Option<String>,
    pub weight_bytes: Option<i64>,
    pub duration_micros: Option<i64>,
    pub uploaded_at: Timestamp,
    /// Null means draft.
    pub published_at: Option<Timestamp>,
    #[serde(default)]
    pub featured_subject_ids: Vec<SubjectId>,
}

impl CatalogItem {
    pub fn is_published(&self) -> bool {
        self.published_at.is_some()
    }

    /// Fields that differ between `self` (before) and `after`.
    pub fn diff(&self, after: &CatalogItem) -> Vec<FieldChange> {
        let mut changes = Vec::new();
        let mut push = |field: &'static str, before: String, after: String| {
            if before != after {
                changes.push(FieldChange {
                    field,
                    before,
                    after,
                });
            }
        };
        push("name", self.name.clone(), after.name.clone());
        push(
            "featured_subject_ids",
            format!("{:?}", self.featured_subject_ids),
            format!("{:?}", after.featured_subject_ids),
        );
        push("blob_ref", format!("{:?}", self.blob_ref), format!("{:?}", after.blob_ref));
        push("image_ref", format!("{:?}", self.image_ref), format!("{:?}", after.image_ref));
        push(
            "weight_bytes",
            format!("{:?}", self.weight_bytes),
            format!("{:?}", after.weight_bytes),
        );
        push(
            "duration_micros",
            format!("{:?}", self.duration_micros),
            format!("{:?}", after.duration_micros),
        );
        push(
            "published_at",
            format!("{:?}", self.published_at),
            format!("{:?}", after.published_at),
        );
        changes
    }
}

/// One changed field, rendered for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub field: &'static str,
    pub before: String,
    pub after: String,
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.field, self.before, self.after)
    }
}

/// Externally-owned subject data (artist profile) used to decorate rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentSubject {
    pub id: SubjectId,
    pub display_name: String,
    pub label: Option<String>,
    pub avatar_ref: Option<String>,
}

/// A row that can be enriched with its subjects.
pub trait CatalogRow {
    fn primary_subject_id(&self) -> SubjectId;
    fn secondary_subject_ids(&self) -> &[SubjectId];
}

impl CatalogRow for CatalogItem {
    fn primary_subject_id(&self) -> SubjectId {
        self.owner_id
    }

    fn secondary_subject_ids(&self) -> &[SubjectId] {
        &self.featured_subject_ids
    }
}

/// Subjects resolved for one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectSet {
    pub primary: EnrichmentSubject,
    pub secondary: Vec<EnrichmentSubject>,
}

impl SubjectSet {
    /// Match a directory lookup result back onto the requested ids.
    ///
    /// Returns `None` when the primary subject is absent. Secondary subjects
    /// keep the requested order; unknown ones are skipped.
    pub fn resolve(
        primary_id: SubjectId,
        secondary_ids: &[SubjectId],
        found: Vec<EnrichmentSubject>,
    ) -> Option<SubjectSet> {
        let mut by_id: std::collections::HashMap<SubjectId, EnrichmentSubject> =
            found.into_iter().map(|s| (s.id, s)).collect();
        let secondary = secondary_ids
            .iter()
            .filter(|id| **id != primary_id)
            .filter_map(|id| by_id.get(id).cloned())
            .collect();
        let primary = by_id.remove(&primary_id)?;
        Some(SubjectSet { primary, secondary })
    }
}

/// Catalog item decorated with its owner and featured subjects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedItem {
    pub item: CatalogItem,
    pub owner: EnrichmentSubject,
    pub featured: Vec<EnrichmentSubject>,
}

impl EnrichedItem {
    pub fn build(item: CatalogItem, subjects: SubjectSet) -> Self {
        Self {
            item,
            owner: subjects.primary,
            featured: subjects.secondary,
        }
    }
}

// ============================================================================
// WRITE TYPES
// ============================================================================

/// Which bucket/column a blob payload targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobKind {
    /// Raw audio.
    Media,
    /// Cover image.
    Cover,
}

impl BlobKind {
    pub fn allowed_extensions(&self) -> &'static [&'static str] {
        match self {
            BlobKind::Media => &["mp3"],
            BlobKind::Cover => &["jpg", "jpeg", "png"],
        }
    }

    pub fn accepts_extension(&self, extension: &str) -> bool {
        self.allowed_extensions().contains(&extension)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BlobKind::Media => "media",
            BlobKind::Cover => "cover",
        }
    }
}

impl fmt::Display for BlobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relational fields a caller may change directly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataPatch {
    pub name: Option<String>,
    pub featured_subject_ids: Option<Vec<SubjectId>>,
}

impl MetadataPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.featured_subject_ids.is_none()
    }
}

/// Binary content accompanying a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobPayload {
    pub kind: BlobKind,
    pub extension: String,
    pub declared_size: u64,
    pub content: Bytes,
}

/// Descriptor of one write request. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteIntent {
    pub item_id: ItemId,
    pub actor_id: SubjectId,
    pub patch: MetadataPatch,
    pub payload: Option<BlobPayload>,
}

impl WriteIntent {
    pub fn metadata(item_id: ItemId, actor_id: SubjectId, patch: MetadataPatch) -> Self {
        Self {
            item_id,
            actor_id,
            patch,
            payload: None,
        }
    }

    pub fn upload(item_id: ItemId, actor_id: SubjectId, payload: BlobPayload) -> Self {
        Self {
            item_id,
            actor_id,
            patch: MetadataPatch::default(),
            payload: Some(payload),
        }
    }
}

/// Storage-level patch applied inside a relational transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemPatch {
    pub name: Option<String>,
    pub featured_subject_ids: Option<Vec<SubjectId>>,
    pub blob_ref: Option<String>,
    pub image_ref: Option<String>,
    pub weight_bytes: Option<i64>,
    pub duration_micros: Option<i64>,
    pub published_at: Option<Timestamp>,
}

impl ItemPatch {
    pub fn is_empty(&self) -> bool {
        *self == ItemPatch::default()
    }

    /// Return `item` with every set field overwritten.
    pub fn apply_to(&self, item: &CatalogItem) -> CatalogItem {
        let mut next = item.clone();
        if let Some(name) = &self.name {
            next.name = name.clone();
        }
        if let Some(ids) = &self.featured_subject_ids {
            next.featured_subject_ids = ids.clone();
        }
        if let Some(blob_ref) = &self.blob_ref {
            next.blob_ref = Some(blob_ref.clone());
        }
        if let Some(image_ref) = &self.image_ref {
            next.image_ref = Some(image_ref.clone());
        }
        if let Some(weight) = self.weight_bytes {
            next.weight_bytes = Some(weight);
        }
        if let Some(duration) = self.duration_micros {
            next.duration_micros = Some(duration);
        }
        if let Some(published_at) = self.published_at {
            next.published_at = Some(published_at);
        }
        next
    }
}

impl From<MetadataPatch> for ItemPatch {
    fn from(patch: MetadataPatch) -> Self {
        ItemPatch {
            name: patch.name,
            featured_subject_ids: patch.featured_subject_ids,
            ..Default::default()
        }
    }
}

// ============================================================================
// CACHE NAMESPACES
// ============================================================================

/// Logical cache partition with its own TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheNamespace {
    pub name: &'static str,
    pub ttl: Duration,
}

impl CacheNamespace {
    pub const PUBLISHED: &'static str = "published-items";
    pub const OWNER: &'static str = "owner-items";

    pub fn published(ttl: Duration) -> Self {
        Self {
            name: Self::PUBLISHED,
            ttl,
        }
    }

    pub fn owner(ttl: Duration) -> Self {
        Self {
            name: Self::OWNER,
            ttl,
        }
    }

    /// Physical cache key for an item in this namespace.
    pub fn key(&self, id: ItemId) -> String {
        format!("{}:{}", self.name, id)
    }
}
