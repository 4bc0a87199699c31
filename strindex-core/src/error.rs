//! Error types for strindex operations

use thiserror::Error;

/// Persistent store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Store query failed during {operation}: {reason}")]
    QueryFailed { operation: String, reason: String },

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Id {value} does not fit the {target} column type")]
    InvalidId { value: String, target: String },
}

/// Cache tier errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache backend error: {reason}")]
    Backend { reason: String },

    #[error("Corrupt cache entry for {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Errors raised while parsing a composite `"org_id:string"` key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyParseError {
    #[error("Composite key {key:?} has no ':' separator")]
    MissingSeparator { key: String },

    #[error("Composite key {key:?} has an invalid org id: {reason}")]
    InvalidOrgId { key: String, reason: String },
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

/// Metrics and logging setup errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("Failed to register metric {name}: {reason}")]
    Registration { name: String, reason: String },
}

/// Master error type for all strindex errors.
#[derive(Debug, Clone, Error)]
pub enum IndexerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Key parse error: {0}")]
    KeyParse(#[from] KeyParseError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
}

/// Result type alias for strindex operations.
pub type IndexerResult<T> = Result<T, IndexerError>;

// =============================================================================
// TESTS
// =============================================================================
