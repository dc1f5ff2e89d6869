//! Public locators for stored blobs.
//!
//! A locator is the externally visible URL of a blob:
//! `{scheme}://{host}{path}{key}`. The key is always the last path segment,
//! so a read-back never needs the relational store.

use encore_core::BlobKind;

use crate::constants::{COVER_LOCATOR_PATH, DEFAULT_PUBLIC_HOST, MEDIA_LOCATOR_PATH};

/// Host and scheme used when building locators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorConfig {
    pub host: String,
    pub https: bool,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_PUBLIC_HOST.to_string(),
            https: false,
        }
    }
}

impl LocatorConfig {
    /// Create LocatorConfig from environment variables.
    ///
    /// - `ENCORE_PUBLIC_HOST`: host[:port] placed in locators (default: localhost:8080)
    /// - `ENCORE_PUBLIC_HTTPS`: "true" to emit https locators (default: false)
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("ENCORE_PUBLIC_HOST")
                .ok()
                .filter(|h| !h.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_PUBLIC_HOST.to_string()),
            https: std::env::var("ENCORE_PUBLIC_HTTPS")
                .map(|s| s.eq_ignore_ascii_case("true") || s == "1")
                .unwrap_or(false),
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.https {
            "https"
        } else {
            "http"
        }
    }

    /// Locator for `key` in the bucket serving `kind`.
    pub fn locator(&self, kind: BlobKind, key: &str) -> String {
        let path = match kind {
            BlobKind::Media => MEDIA_LOCATOR_PATH,
            BlobKind::Cover => COVER_LOCATOR_PATH,
        };
        format!("{}://{}{}{}", self.scheme(), self.host, path, key)
    }
}

/// Trailing key of a locator, or of a bare key.
pub fn locator_key(locator: &str) -> Option<&str> {
    let trimmed = locator.split(['?', '#']).next().unwrap_or(locator);
    let key = trimmed.rsplit('/').next().unwrap_or(trimmed);
    if key.is_empty() || key.starts_with('.') {
        None
    } else {
        Some(key)
    }
}

/// Extension of a blob key (text after the last dot).
pub fn key_extension(key: &str) -> Option<&str> {
    key.rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
}
