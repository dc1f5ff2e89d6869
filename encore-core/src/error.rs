//! Error types for ENCORE operations

use crate::{BlobKind, ItemId};
use thiserror::Error;

/// Failures reported by a collaborator store (relational, blob, cache, directory).
///
/// Relational errors are classified by SQLSTATE so callers can tell a
/// constraint violation from an outage.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("No rows matched the query")]
    EmptyResult,

    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("Foreign key constraint violated: {constraint}")]
    ForeignKeyViolation { constraint: String },

    #[error("Not-null constraint violated on column {column}")]
    NotNullViolation { column: String },

    #[error("Check constraint violated: {constraint}")]
    CheckViolation { constraint: String },

    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Stored value is corrupt: {reason}")]
    Corrupt { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Store error: {reason}")]
    Internal { reason: String },
}

impl StoreError {
    /// True for errors that originate from a constraint in the relational schema.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            StoreError::UniqueViolation { .. }
                | StoreError::ForeignKeyViolation { .. }
                | StoreError::NotNullViolation { .. }
                | StoreError::CheckViolation { .. }
        )
    }
}

/// Validation errors raised before any store is touched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unsupported {kind} extension: {extension}")]
    UnsupportedExtension { kind: BlobKind, extension: String },

    #[error("Declared size {declared} does not match payload length {actual}")]
    SizeMismatch { declared: u64, actual: u64 },

    #[error("Payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("Media could not be decoded: {reason}")]
    UndecodableMedia { reason: String },

    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Patch contains no changes")]
    EmptyPatch,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Caller-visible error taxonomy for catalog operations.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("Item not found: {id}")]
    NotFound { id: ItemId },

    #[error("Blob not found: {key}")]
    BlobNotFound { key: String },

    #[error("Item {id} is published and no longer accepts media uploads")]
    AlreadyFinalized { id: ItemId },

    #[error("Conflict: {0}")]
    Conflict(StoreError),

    #[error("Validation error: {0}")]
    ValidationFailed(#[from] ValidationError),

    #[error("Upstream store failure: {0}")]
    Upstream(StoreError),

    #[error("Internal error: {reason}")]
    Internal { reason: String },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl CatalogError {
    /// Classify a store error that surfaced during a write or a source-of-truth read.
    ///
    /// `EmptyResult` only becomes `NotFound` when the caller can name the item;
    /// otherwise it is an upstream fault.
    pub fn from_store(err: StoreError, item: Option<ItemId>) -> Self {
        match (err, item) {
            (StoreError::EmptyResult, Some(id)) => CatalogError::NotFound { id },
            (err @ StoreError::UniqueViolation { .. }, _) => CatalogError::Conflict(err),
            (err @ StoreError::ForeignKeyViolation { .. }, _) => CatalogError::Conflict(err),
            (err, _) => CatalogError::Upstream(err),
        }
    }

    /// HTTP status the transport layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            CatalogError::NotFound { .. } | CatalogError::BlobNotFound { .. } => 404,
            CatalogError::AlreadyFinalized { .. } => 412,
            CatalogError::Conflict(_) => 409,
            CatalogError::ValidationFailed(_) => 400,
            CatalogError::Upstream(_) => 503,
            CatalogError::Internal { .. } | CatalogError::Config(_) => 500,
            CatalogError::Cancelled => 499,
        }
    }

    /// Short machine-readable code, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            CatalogError::NotFound { .. } | CatalogError::BlobNotFound { .. } => "NOT_FOUND",
            CatalogError::AlreadyFinalized { .. } => "ALREADY_FINALIZED",
            CatalogError::Conflict(_) => "CONFLICT",
            CatalogError::ValidationFailed(_) => "VALIDATION_FAILED",
            CatalogError::Upstream(_) => "UPSTREAM",
            CatalogError::Internal { .. } => "INTERNAL",
            CatalogError::Cancelled => "CANCELLED",
            CatalogError::Config(_) => "CONFIG",
        }
    }
}

/// Result type alias for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Result type alias for collaborator store calls.
pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_store_error_display_unique() {
        let err = StoreError::UniqueViolation {
            constraint: "items_name_key".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Unique constraint"));
        assert!(msg.contains("items_name_key"));
        assert!(err.is_constraint_violation());
        assert!(!StoreError::EmptyResult.is_constraint_violation());
    }

    #[test]
    fn test_validation_error_display_extension() {
        let err = ValidationError::UnsupportedExtension {
            kind: BlobKind::Media,
            extension: "wav".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("media"));
        assert!(msg.contains("wav"));
    }

    #[test]
    fn test_from_store_classification() {
        let id = Uuid::nil();
        assert!(matches!(
            CatalogError::from_store(StoreError::EmptyResult, Some(id)),
            CatalogError::NotFound { .. }
        ));
        assert!(matches!(
            CatalogError::from_store(StoreError::EmptyResult, None),
            CatalogError::Upstream(StoreError::EmptyResult)
        ));
        assert!(matches!(
            CatalogError::from_store(
                StoreError::UniqueViolation {
                    constraint: "x".into()
                },
                Some(id)
            ),
            CatalogError::Conflict(_)
        ));
        assert!(matches!(
            CatalogError::from_store(
                StoreError::Unavailable {
                    reason: "down".into()
                },
                Some(id)
            ),
            CatalogError::Upstream(_)
        ));
    }

    #[test]
    fn test_status_codes() {
        let id = Uuid::nil();
        assert_eq!(CatalogError::NotFound { id }.status_code(), 404);
        assert_eq!(
            CatalogError::BlobNotFound {
                key: "k.mp3".into()
            }
            .status_code(),
            404
        );
        assert_eq!(CatalogError::AlreadyFinalized { id }.status_code(), 412);
        assert_eq!(
            CatalogError::ValidationFailed(ValidationError::EmptyPatch).status_code(),
            400
        );
        assert_eq!(CatalogError::Upstream(StoreError::LockPoisoned).status_code(), 503);
        assert_eq!(CatalogError::Cancelled.code(), "CANCELLED");
    }

    #[test]
    fn test_catalog_error_from_variants() {
        let validation = CatalogError::from(ValidationError::RequiredFieldMissing {
            field: "name".to_string(),
        });
        assert!(matches!(validation, CatalogError::ValidationFailed(_)));

        let config = CatalogError::from(ConfigError::MissingRequired {
            field: "ENCORE_DB_HOST".to_string(),
        });
        assert!(matches!(config, CatalogError::Config(_)));
    }
}
