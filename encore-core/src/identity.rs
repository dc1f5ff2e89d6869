//! Identity types for catalog entities

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Catalog item identifier using UUIDv7 for timestamp-sortable IDs.
pub type ItemId = Uuid;

/// Identifier of an externally-owned subject (artist, label, ...).
pub type SubjectId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Separator placed between owner id and item name when deriving object keys.
pub const OBJECT_KEY_SEPARATOR: char = '\u{2}';

/// Generate a new UUIDv7 item id (timestamp-sortable).
pub fn new_item_id() -> ItemId {
    Uuid::now_v7()
}

/// Returns true when a secondary-subject list is the single nil sentinel.
///
/// Rows stored with "no featured subjects" carry `[Uuid::nil()]` in some
/// upstream schemas; callers treat that exactly like an empty list.
pub fn is_nil_sentinel(ids: &[SubjectId]) -> bool {
    matches!(ids, [only] if only.is_nil())
}

/// Deterministic blob key for an item: `hex(sha256(owner ‖ 0x02 ‖ name)).ext`.
///
/// The same owner, name and extension always yield the same key, so a
/// retried upload overwrites the blob rather than leaving an orphan.
pub fn object_key(owner_id: SubjectId, item_name: &str, extension: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(owner_id.to_string().as_bytes());
    let mut sep = [0u8; 4];
    hasher.update(OBJECT_KEY_SEPARATOR.encode_utf8(&mut sep).as_bytes());
    hasher.update(item_name.as_bytes());
    format!("{}.{}", hex::encode(hasher.finalize()), extension)
}
