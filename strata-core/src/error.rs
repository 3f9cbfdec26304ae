//! Error types for STRATA operations
//!
//! These errors stay inside the cache boundary: store implementations return
//! them, and the object cache facade logs them and degrades to a negative
//! result instead of handing them to callers.

use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Persistent store unavailable")]
    Unavailable,

    #[error("Backend operation {operation} failed: {reason}")]
    Backend { operation: String, reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Deserialization failed for {key}: {reason}")]
    Deserialization { key: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    /// Create a backend error for the named operation.
    pub fn backend(operation: impl Into<String>, reason: impl ToString) -> Self {
        StorageError::Backend {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Cache key must not be empty")]
    EmptyKey,

    #[error("Cache group {group:?} must not contain ':'")]
    InvalidGroup { group: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub fn invalid(field: &str, value: impl ToString, reason: &str) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Master error type for all STRATA errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StrataError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for STRATA operations.
pub type StrataResult<T> = Result<T, StrataError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_backend() {
        let err = StorageError::backend("fetch", "disk on fire");
        let msg = format!("{}", err);
        assert!(msg.contains("fetch"));
        assert!(msg.contains("disk on fire"));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::invalid("key_salt", "", "must not be empty");
        let msg = format!("{}", err);
        assert!(msg.contains("key_salt"));
        assert!(msg.contains("must not be empty"));
    }

    #[test]
    fn test_strata_error_from_storage() {
        let err: StrataError = StorageError::Unavailable.into();
        assert!(matches!(err, StrataError::Storage(StorageError::Unavailable)));
        assert!(format!("{}", err).contains("unavailable"));
    }

    #[test]
    fn test_strata_error_from_validation() {
        let err: StrataError = ValidationError::EmptyKey.into();
        assert_eq!(err, StrataError::Validation(ValidationError::EmptyKey));
    }

    #[test]
    fn test_invalid_group_display() {
        let err = ValidationError::InvalidGroup {
            group: "a:b".to_string(),
        };
        assert!(format!("{}", err).contains("\"a:b\""));
    }
}
