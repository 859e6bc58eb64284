//! Error types for Quarry operations

use thiserror::Error;

/// Backing store and cache storage errors.
///
/// Adapter implementations map their driver errors onto these variants; the
/// cache layer propagates them unchanged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {model} with id {id}")]
    NotFound { model: String, id: String },

    #[error("Lookup on {model}.{field} failed: {reason}")]
    LookupFailed {
        model: String,
        field: String,
        reason: String,
    },

    #[error("Query on {model} failed: {reason}")]
    QueryFailed { model: String, reason: String },

    #[error("Write to {model} failed: {reason}")]
    WriteFailed { model: String, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Validation errors raised before any store access.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unknown field {field} on model {model}")]
    UnknownField { model: String, field: String },

    #[error("Invalid operand for {field} {operator}: {reason}")]
    InvalidOperand {
        field: String,
        operator: String,
        reason: String,
    },

    #[error("Row for model {model} has no string primary key")]
    MissingPrimaryKey { model: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Unknown filter operator: {operator}")]
    UnknownOperator { operator: String },

    #[error("Unknown order direction: {direction}")]
    UnknownDirection { direction: String },
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

/// Forensic monitor errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MonitorError {
    #[error("Monitor I/O error on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Corrupt monitor index at line {line}: {reason}")]
    CorruptIndex { line: usize, reason: String },
}

/// Master error type for all Quarry errors.
#[derive(Debug, Clone, Error)]
pub enum QuarryError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Monitor error: {0}")]
    Monitor(#[from] MonitorError),
}

/// Result type alias for Quarry operations.
pub type QuarryResult<T> = Result<T, QuarryError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_not_found() {
        let err = StorageError::NotFound {
            model: "transfer".to_string(),
            id: "0xabc".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Entity not found"));
        assert!(msg.contains("transfer"));
        assert!(msg.contains("0xabc"));
    }

    #[test]
    fn test_validation_error_display_unknown_field() {
        let err = ValidationError::UnknownField {
            model: "account".to_string(),
            field: "balanse".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Unknown field"));
        assert!(msg.contains("balanse"));
        assert!(msg.contains("account"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "store_cache_threshold".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("store_cache_threshold"));
        assert!(msg.contains("0"));
        assert!(msg.contains("must be positive"));
    }

    #[test]
    fn test_quarry_error_from_variants() {
        let storage = QuarryError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, QuarryError::Storage(_)));

        let validation = QuarryError::from(ValidationError::UnknownOperator {
            operator: "~".to_string(),
        });
        assert!(matches!(validation, QuarryError::Validation(_)));

        let config = QuarryError::from(ConfigError::MissingRequired {
            field: "monitor_out_dir".to_string(),
        });
        assert!(matches!(config, QuarryError::Config(_)));

        let monitor = QuarryError::from(MonitorError::CorruptIndex {
            line: 3,
            reason: "truncated".to_string(),
        });
        assert!(matches!(monitor, QuarryError::Monitor(_)));
    }

    #[test]
    fn test_storage_error_display_lock_poisoned() {
        let err = StorageError::LockPoisoned;
        let msg = format!("{}", err);
        assert!(msg.contains("lock poisoned"));
    }
}
