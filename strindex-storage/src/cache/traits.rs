//! Cache tier trait.
//!
//! The cache maps composite `"org_id:string"` keys to ids, one keyspace per
//! use case. It is best-effort: callers treat failures as misses.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use strindex_core::{IndexId, IndexerResult, UseCaseKey};

/// Cache backend trait for pluggable cache implementations.
///
/// Implementations must be thread-safe and support concurrent access.
///
/// # Semantics
///
/// - Unknown and expired keys are simply absent from `get_many` results.
/// - Reads never extend an entry's TTL; only `set_many` does.
/// - Keys are composite `"org_id:string"` strings; the physical key layout
///   is the backend's business (see [`super::CacheKey`]).
#[async_trait]
pub trait IndexerCache: Send + Sync {
    /// Look up many keys at once.
    async fn get_many(
        &self,
        use_case_id: UseCaseKey,
        keys: &[String],
    ) -> IndexerResult<HashMap<String, IndexId>>;

    /// Store many entries at once, each expiring after `ttl`.
    async fn set_many(
        &self,
        use_case_id: UseCaseKey,
        entries: &HashMap<String, IndexId>,
        ttl: Duration,
    ) -> IndexerResult<()>;

    /// Remove every cached entry of a use case.
    async fn invalidate_use_case(&self, use_case_id: UseCaseKey) -> IndexerResult<u64>;

    /// Get cache statistics.
    async fn stats(&self) -> IndexerResult<CacheStats>;

    /// Look up a single key.
    async fn get(&self, use_case_id: UseCaseKey, key: &str) -> IndexerResult<Option<IndexId>> {
        let keys = [key.to_string()];
        let found = self.get_many(use_case_id, &keys).await?;
        Ok(found.get(key).copied())
    }

    /// Store a single key.
    async fn set(
        &self,
        use_case_id: UseCaseKey,
        key: &str,
        id: IndexId,
        ttl: Duration,
    ) -> IndexerResult<()> {
        let entries = HashMap::from([(key.to_string(), id)]);
        self.set_many(use_case_id, &entries, ttl).await
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses, expired entries included.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate memory usage in bytes.
    pub memory_bytes: u64,
    /// Number of entries dropped because they expired.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }
}
