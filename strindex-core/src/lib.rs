//! strindex Core - Key Resolution Types
//!
//! Value types for the batched, multi-tenant string-to-integer indexer:
//! what to resolve ([`KeyCollection`]), what came back ([`KeyResult`],
//! [`KeyResults`]) and how each resolution happened ([`FetchType`],
//! [`Metadata`]). Pure, synchronous data structures; all I/O lives in the
//! storage and indexer crates.

pub mod config;
pub mod enums;
pub mod error;
pub mod key;
pub mod results;

pub use config::IndexerConfig;
pub use enums::{FetchType, FetchTypeParseError, UseCaseKey, UseCaseParseError};
pub use error::{
    CacheError, ConfigError, IndexerError, IndexerResult, KeyParseError, StoreError,
    TelemetryError,
};
pub use key::{composite_key, KeyCollection, KeyResult, COMPOSITE_SEPARATOR};
pub use results::{FetchTypeExt, KeyResults, Metadata, OrgResults};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Organization (tenant) identifier.
pub type OrgId = u64;

/// Integer id a string resolves to. Stores hand out ids starting at 1.
pub type IndexId = u64;
