//! ENCORE Test Utilities
//!
//! Shared test infrastructure for the ENCORE workspace:
//! - Proptest generators for catalog entities
//! - Fixtures for items, subjects and synthetic media
//! - Custom assertions for the catalog error taxonomy

// Re-export in-memory collaborators from their source crate
pub use encore_storage::{
    InMemoryByteCache, MemoryBlobStore, MemoryCatalogRepository, StaticSubjectDirectory,
};

// Re-export core types for convenience
pub use encore_core::{
    object_key, BlobKind, BlobPayload, CatalogError, CatalogItem, CatalogResult,
    EnrichmentSubject, ItemId, MetadataPatch, RequestContext, StoreError, SubjectId, Timestamp,
    ValidationError, WriteIntent,
};

use bytes::Bytes;
use chrono::Utc;
use uuid::Uuid;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating catalog entities.

    use super::*;
    use proptest::prelude::*;

    /// Generate a random UUID.
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    /// Generate a non-blank item name.
    pub fn arb_item_name() -> impl Strategy<Value = String> {
        "[A-Za-z0-9][A-Za-z0-9 ._-]{0,40}"
    }

    pub fn arb_blob_kind() -> impl Strategy<Value = BlobKind> {
        prop_oneof![Just(BlobKind::Media), Just(BlobKind::Cover)]
    }

    /// An extension the given kind accepts.
    pub fn arb_extension(kind: BlobKind) -> impl Strategy<Value = String> {
        proptest::sample::select(kind.allowed_extensions()).prop_map(str::to_string)
    }

    pub fn arb_subject() -> impl Strategy<Value = EnrichmentSubject> {
        (
            arb_uuid(),
            "[A-Za-z ]{1,24}",
            proptest::option::of("[A-Za-z ]{1,16}"),
        )
            .prop_map(|(id, display_name, label)| EnrichmentSubject {
                id,
                display_name,
                label,
                avatar_ref: None,
            })
    }

    /// Items owned by `owner`, a mix of drafts and published rows.
    pub fn arb_catalog_item(owner: SubjectId) -> impl Strategy<Value = CatalogItem> {
        (
            arb_uuid(),
            arb_item_name(),
            any::<bool>(),
            proptest::collection::vec(arb_uuid(), 0..4),
        )
            .prop_map(move |(id, name, published, featured)| CatalogItem {
                id,
                owner_id: owner,
                name,
                blob_ref: None,
                image_ref: None,
                weight_bytes: None,
                duration_micros: None,
                uploaded_at: Utc::now(),
                published_at: published.then(Utc::now),
                featured_subject_ids: featured,
            })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;

    /// One MPEG-1 Layer III frame header: 128 kbps, 44.1 kHz, no padding.
    pub const MP3_FRAME_HEADER: [u8; 4] = [0xff, 0xfb, 0x90, 0x00];

    /// Byte length of a frame with [`MP3_FRAME_HEADER`].
    pub const MP3_FRAME_LEN: usize = 417;

    /// Playback time of one frame, in microseconds (1152 samples at 44.1 kHz).
    pub const MP3_FRAME_MICROS: f64 = 1152.0 * 1_000_000.0 / 44_100.0;

    pub fn subject(name: &str) -> EnrichmentSubject {
        EnrichmentSubject {
            id: Uuid::now_v7(),
            display_name: name.to_string(),
            label: None,
            avatar_ref: None,
        }
    }

    /// A draft item with no media.
    pub fn draft_item(owner: SubjectId, name: &str) -> CatalogItem {
        CatalogItem {
            id: Uuid::now_v7(),
            owner_id: owner,
            name: name.to_string(),
            blob_ref: None,
            image_ref: None,
            weight_bytes: None,
            duration_micros: None,
            uploaded_at: Utc::now(),
            published_at: None,
            featured_subject_ids: vec![],
        }
    }

    /// A published item whose media is already stored under its derived key.
    pub fn published_item(owner: SubjectId, name: &str) -> CatalogItem {
        CatalogItem {
            blob_ref: Some(object_key(owner, name, "mp3")),
            weight_bytes: Some(MP3_FRAME_LEN as i64),
            published_at: Some(Utc::now()),
            ..draft_item(owner, name)
        }
    }

    pub fn with_featured(mut item: CatalogItem, featured: &[SubjectId]) -> CatalogItem {
        item.featured_subject_ids = featured.to_vec();
        item
    }

    /// Exactly `len` bytes of decodable MP3: whole frames, then zero padding.
    pub fn synthetic_mp3(len: usize) -> Bytes {
        let mut content = vec![0u8; len];
        let frames = len / MP3_FRAME_LEN;
        for i in 0..frames {
            let start = i * MP3_FRAME_LEN;
            content[start..start + 4].copy_from_slice(&MP3_FRAME_HEADER);
        }
        Bytes::from(content)
    }

    /// Number of whole frames in [`synthetic_mp3`] of `len` bytes.
    pub fn synthetic_mp3_frames(len: usize) -> usize {
        len / MP3_FRAME_LEN
    }

    pub fn mp3_payload(len: usize) -> BlobPayload {
        BlobPayload {
            kind: BlobKind::Media,
            extension: "mp3".to_string(),
            declared_size: len as u64,
            content: synthetic_mp3(len),
        }
    }

    /// Opaque cover bytes; covers are not decoded.
    pub fn cover_payload(extension: &str, len: usize) -> BlobPayload {
        BlobPayload {
            kind: BlobKind::Cover,
            extension: extension.to_string(),
            declared_size: len as u64,
            content: Bytes::from(vec![0x89u8; len]),
        }
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over the catalog error taxonomy.

    use super::*;

    pub fn assert_not_found<T: std::fmt::Debug>(result: &CatalogResult<T>, expected: ItemId) {
        match result {
            Err(CatalogError::NotFound { id }) => assert_eq!(*id, expected),
            other => panic!("expected NotFound({}), got {:?}", expected, other),
        }
    }

    pub fn assert_already_finalized<T: std::fmt::Debug>(result: &CatalogResult<T>) {
        assert!(
            matches!(result, Err(CatalogError::AlreadyFinalized { .. })),
            "expected AlreadyFinalized, got {:?}",
            result
        );
    }

    pub fn assert_validation_failed<T: std::fmt::Debug>(result: &CatalogResult<T>) {
        assert!(
            matches!(result, Err(CatalogError::ValidationFailed(_))),
            "expected ValidationFailed, got {:?}",
            result
        );
    }

    pub fn assert_upstream<T: std::fmt::Debug>(result: &CatalogResult<T>) {
        assert!(
            matches!(result, Err(CatalogError::Upstream(_))),
            "expected Upstream, got {:?}",
            result
        );
    }

    pub fn assert_internal<T: std::fmt::Debug>(result: &CatalogResult<T>) {
        assert!(
            matches!(result, Err(CatalogError::Internal { .. })),
            "expected Internal, got {:?}",
            result
        );
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_synthetic_mp3_has_exact_length() {
        let content = synthetic_mp3(2_000_000);
        assert_eq!(content.len(), 2_000_000);
        assert_eq!(&content[..4], &MP3_FRAME_HEADER);
        assert_eq!(synthetic_mp3_frames(2_000_000), 4796);
    }

    #[test]
    fn test_published_item_has_media() {
        let owner = Uuid::now_v7();
        let item = published_item(owner, "Song");
        assert!(item.is_published());
        assert_eq!(item.blob_ref, Some(object_key(owner, "Song", "mp3")));
    }
}
