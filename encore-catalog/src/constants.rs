//! Constants for the ENCORE catalog
//!
//! Defaults for every environment-driven setting live here.

// ============================================================================
// CACHE
// ============================================================================

/// Default TTL for the published-items namespace (5 minutes)
pub const DEFAULT_PUBLISHED_TTL_SECS: u64 = 300;

/// Default TTL for the owner-items namespace (5 minutes)
pub const DEFAULT_OWNER_TTL_SECS: u64 = 300;

/// Default LMDB map size in megabytes
pub const DEFAULT_LMDB_MAX_SIZE_MB: usize = 256;

// ============================================================================
// ENRICHMENT
// ============================================================================

/// Default cap on concurrent subject lookups per enrichment call
pub const DEFAULT_ENRICHMENT_MAX_IN_FLIGHT: usize = 32;

// ============================================================================
// UPLOADS
// ============================================================================

/// Default maximum raw media size (50 MiB)
pub const DEFAULT_MAX_MEDIA_BYTES: u64 = 50 * 1024 * 1024;

/// Default maximum cover image size (5 MiB)
pub const DEFAULT_MAX_COVER_BYTES: u64 = 5 * 1024 * 1024;

/// Default bucket for raw media
pub const DEFAULT_MEDIA_BUCKET: &str = "media";

/// Default bucket for cover images
pub const DEFAULT_COVER_BUCKET: &str = "covers";

// ============================================================================
// LOCATORS
// ============================================================================

/// Default public host used when building locators
pub const DEFAULT_PUBLIC_HOST: &str = "localhost:8080";

/// Path prefix under which raw media is served
pub const MEDIA_LOCATOR_PATH: &str = "/catalog/api/v1/item/raw/";

/// Path prefix under which cover images are served
pub const COVER_LOCATOR_PATH: &str = "/catalog/api/v1/item/image/raw/";
