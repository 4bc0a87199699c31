//! Cache tier of the indexer.
//!
//! The cache is the first tier consulted by `bulk_record` and the last one
//! written to. It is best-effort by contract: a miss or a failure only costs
//! a store round trip, never correctness.
//!
//! # Use Case Isolation
//!
//! Physical keys are built through [`CacheKey`], which cannot be constructed
//! without a namespace and a use case. Two use cases never share an entry,
//! and a whole use case can be dropped by prefix.

pub mod cache_key;
pub mod lmdb_backend;
pub mod memory_backend;
pub mod traits;

pub use cache_key::CacheKey;
pub use lmdb_backend::{LmdbCacheError, LmdbIndexerCache};
pub use memory_backend::InMemoryCache;
pub use traits::{CacheStats, IndexerCache};
