//! Tiered indexer.
//!
//! `bulk_record` narrows the unresolved set tier by tier:
//!
//! 1. cache (`CacheHit`)
//! 2. hardcoded table (`Hardcoded`, with `is_global`)
//! 3. store read (`DbRead`)
//! 4. rate limited get-or-create (`FirstSeen` or `RateLimited`)
//!
//! then merges the tiers in order and writes the mapped ids back to the
//! cache. Cache failures degrade to misses. Store failures abort the call.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use strindex_core::{
    composite_key, FetchType, FetchTypeExt, IndexId, IndexerConfig, IndexerResult, KeyCollection,
    KeyResult, KeyResults, OrgId, UseCaseKey,
};
use strindex_storage::{HardcodedTable, IndexerCache, StringStore, WritesLimiter};

use crate::telemetry::metrics::with_metrics;
use crate::StringIndexer;

/// Upper bound on the retention extension write of one `bulk_record` call.
pub const DEFAULT_TOUCH_TIMEOUT: Duration = Duration::from_millis(250);

/// Number of keys each tier resolved in one `bulk_record` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierCounts {
    pub cache_hit: usize,
    pub hardcoded: usize,
    pub db_read: usize,
    pub first_seen: usize,
    pub rate_limited: usize,
}

impl TierCounts {
    pub fn get(&self, fetch_type: FetchType) -> usize {
        match fetch_type {
            FetchType::CacheHit => self.cache_hit,
            FetchType::Hardcoded => self.hardcoded,
            FetchType::DbRead => self.db_read,
            FetchType::FirstSeen => self.first_seen,
            FetchType::RateLimited => self.rate_limited,
        }
    }

    pub fn total(&self) -> usize {
        FetchType::ALL.iter().map(|t| self.get(*t)).sum()
    }
}

/// Cache, hardcoded table and store composed into one [`StringIndexer`].
pub struct TieredIndexer<C, S> {
    cache: Arc<C>,
    store: Arc<S>,
    hardcoded: HardcodedTable,
    limiter: WritesLimiter,
    config: IndexerConfig,
    touch_timeout: Duration,
}

impl<C, S> TieredIndexer<C, S>
where
    C: IndexerCache,
    S: StringStore,
{
    /// Create an indexer with the built-in hardcoded table and a writes
    /// limiter built from `config`.
    pub fn new(cache: Arc<C>, store: Arc<S>, config: IndexerConfig) -> IndexerResult<Self> {
        config.validate()?;
        Ok(Self {
            cache,
            store,
            hardcoded: HardcodedTable::shared_strings(),
            limiter: WritesLimiter::from_config(&config),
            config,
            touch_timeout: DEFAULT_TOUCH_TIMEOUT,
        })
    }

    pub fn with_hardcoded(mut self, hardcoded: HardcodedTable) -> Self {
        self.hardcoded = hardcoded;
        self
    }

    pub fn with_limiter(mut self, limiter: WritesLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    /// Bound the retention extension write. A slow or unreachable store
    /// then delays a fully cached batch by at most `timeout`.
    pub fn with_touch_timeout(mut self, timeout: Duration) -> Self {
        self.touch_timeout = timeout;
        self
    }

    pub fn limiter(&self) -> &WritesLimiter {
        &self.limiter
    }

    pub fn cache(&self) -> &Arc<C> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Delete store entries not seen within the configured retention.
    pub async fn purge_stale(&self, use_case_id: UseCaseKey) -> IndexerResult<u64> {
        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        let purged = self.store.purge_stale(use_case_id, cutoff).await?;
        tracing::info!(use_case = %use_case_id, purged, %cutoff, "purged stale strings");
        Ok(purged)
    }

    /// Like [`StringIndexer::bulk_record`], also returning per-tier counts.
    pub async fn bulk_record_with_counts(
        &self,
        use_case_id: UseCaseKey,
        keys: &KeyCollection,
    ) -> IndexerResult<(KeyResults, TierCounts)> {
        let started = Instant::now();
        let mut counts = TierCounts::default();
        if keys.is_empty() {
            return Ok((KeyResults::new(), counts));
        }

        // 1. Cache
        let mut cache_results = self.read_cache(use_case_id, keys).await;
        counts.cache_hit = cache_results.mapped_count();

        // 2. Hardcoded table
        let remaining = cache_results.get_unmapped_keys(keys);
        let mut hardcoded_results = KeyResults::new();
        let matches = self.hardcoded.lookup_collection(use_case_id, &remaining);
        counts.hardcoded = matches.len();
        hardcoded_results.add_key_results(
            matches.global,
            Some(FetchType::Hardcoded),
            Some(FetchTypeExt { is_global: true }),
        );
        hardcoded_results.add_key_results(
            matches.scoped,
            Some(FetchType::Hardcoded),
            Some(FetchTypeExt { is_global: false }),
        );

        // 3. Store read
        let remaining = hardcoded_results.get_unmapped_keys(&remaining);
        let mut db_read_results = KeyResults::new();
        if !remaining.is_empty() {
            let found = self.store.bulk_lookup(use_case_id, &remaining).await?;
            counts.db_read = found.len();
            db_read_results.add_key_results(found, Some(FetchType::DbRead), None);
        }

        // 4. Create
        let remaining = db_read_results.get_unmapped_keys(&remaining);
        let mut created_results = KeyResults::new();
        if !remaining.is_empty() {
            let outcome = self.limiter.check_writes(use_case_id, &remaining);
            counts.rate_limited = outcome.rate_limited.len();
            for (key_result, is_global) in outcome.rate_limited {
                created_results.add_key_result(
                    key_result,
                    Some(FetchType::RateLimited),
                    Some(FetchTypeExt { is_global }),
                );
            }

            if !outcome.granted.is_empty() {
                let created = self
                    .store
                    .bulk_create_if_absent(use_case_id, &outcome.granted)
                    .await?;
                counts.first_seen = created.len();
                created_results.add_key_results(created, Some(FetchType::FirstSeen), None);
            }
        }

        // 5. Merge, extend retention, write back
        let merged = cache_results
            .merge(&hardcoded_results)
            .merge(&db_read_results)
            .merge(&created_results);

        self.touch_known(use_case_id, &cache_results, &db_read_results)
            .await;
        self.write_back(use_case_id, &merged, &hardcoded_results)
            .await;

        let elapsed = started.elapsed();
        with_metrics(|m| {
            for fetch_type in FetchType::ALL {
                m.record_fetch(use_case_id, fetch_type, counts.get(fetch_type));
            }
            m.observe_bulk_record(use_case_id, elapsed.as_secs_f64());
        });
        tracing::debug!(
            use_case = %use_case_id,
            keys = keys.size(),
            cache_hit = counts.cache_hit,
            hardcoded = counts.hardcoded,
            db_read = counts.db_read,
            first_seen = counts.first_seen,
            rate_limited = counts.rate_limited,
            elapsed_ms = elapsed.as_millis() as u64,
            "bulk_record"
        );

        Ok((merged, counts))
    }

    async fn read_cache(&self, use_case_id: UseCaseKey, keys: &KeyCollection) -> KeyResults {
        let mut cache_results = KeyResults::new();
        let cached = match self.cache.get_many(use_case_id, &keys.as_strings()).await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!(use_case = %use_case_id, error = %e, "cache read failed, treating as misses");
                with_metrics(|m| m.record_cache_error("get_many"));
                return cache_results;
            }
        };

        for (key, id) in cached {
            match KeyResult::from_string(&key, Some(id)) {
                Ok(key_result) if keys.contains(key_result.org_id, &key_result.string) => {
                    cache_results.add_key_result(key_result, Some(FetchType::CacheHit), None);
                }
                Ok(_) => {
                    tracing::warn!(use_case = %use_case_id, key = %key, "cache returned a key that was not requested");
                }
                Err(e) => {
                    tracing::warn!(use_case = %use_case_id, error = %e, "unparseable cache key");
                }
            }
        }
        cache_results
    }

    /// Bump `last_seen` of every store-backed key this call saw. Keys served
    /// from the cache are included so a hot key is never purged while its
    /// cache entry keeps being refreshed.
    async fn touch_known(
        &self,
        use_case_id: UseCaseKey,
        cache_results: &KeyResults,
        db_read_results: &KeyResults,
    ) {
        let mut seen: HashMap<OrgId, HashSet<String>> = HashMap::new();
        for tier in [cache_results, db_read_results] {
            for (org_id, strings) in tier.get_mapped_results() {
                seen.entry(org_id).or_default().extend(
                    strings
                        .into_iter()
                        .filter(|(_, id)| id.is_some())
                        .map(|(string, _)| string),
                );
            }
        }

        let seen = KeyCollection::new(seen);
        if seen.is_empty() {
            return;
        }
        let touch = self
            .store
            .touch(use_case_id, &seen, Utc::now(), self.config.stale_after);
        match tokio::time::timeout(self.touch_timeout, touch).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                tracing::warn!(use_case = %use_case_id, error = %e, "failed to extend retention");
            }
            Err(_) => {
                tracing::warn!(
                    use_case = %use_case_id,
                    timeout_ms = self.touch_timeout.as_millis() as u64,
                    keys = seen.size(),
                    "retention extension timed out"
                );
            }
        }
    }

    async fn write_back(
        &self,
        use_case_id: UseCaseKey,
        merged: &KeyResults,
        hardcoded_results: &KeyResults,
    ) {
        let mut entries = merged.get_mapped_key_strings_to_ints();
        for key in hardcoded_results.get_mapped_key_strings_to_ints().keys() {
            entries.remove(key);
        }
        if entries.is_empty() {
            return;
        }

        if let Err(e) = self
            .cache
            .set_many(use_case_id, &entries, self.config.cache_ttl)
            .await
        {
            tracing::warn!(use_case = %use_case_id, error = %e, entries = entries.len(), "cache write failed");
            with_metrics(|m| m.record_cache_error("set_many"));
        }
    }
}

#[async_trait]
impl<C, S> StringIndexer for TieredIndexer<C, S>
where
    C: IndexerCache,
    S: StringStore,
{
    async fn bulk_record(
        &self,
        use_case_id: UseCaseKey,
        org_strings: HashMap<OrgId, HashSet<String>>,
    ) -> IndexerResult<KeyResults> {
        let keys = KeyCollection::new(org_strings);
        let (results, _) = self.bulk_record_with_counts(use_case_id, &keys).await?;
        Ok(results)
    }

    async fn resolve(
        &self,
        use_case_id: UseCaseKey,
        org_id: OrgId,
        string: &str,
    ) -> IndexerResult<Option<IndexId>> {
        if let Some((id, _)) = self.hardcoded.lookup(use_case_id, string) {
            return Ok(Some(id));
        }

        let key = composite_key(org_id, string);
        match self.cache.get(use_case_id, &key).await {
            Ok(Some(id)) => return Ok(Some(id)),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(use_case = %use_case_id, error = %e, "cache read failed, falling back to store");
                with_metrics(|m| m.record_cache_error("get"));
            }
        }

        let id = self.store.lookup(use_case_id, org_id, string).await?;
        if let Some(id) = id {
            // Fill the miss only; existing entries keep their expiry.
            if let Err(e) = self
                .cache
                .set(use_case_id, &key, id, self.config.cache_ttl)
                .await
            {
                tracing::warn!(use_case = %use_case_id, error = %e, "cache fill failed");
                with_metrics(|m| m.record_cache_error("set"));
            }
        }
        Ok(id)
    }

    async fn reverse_resolve(
        &self,
        use_case_id: UseCaseKey,
        id: IndexId,
    ) -> IndexerResult<Option<String>> {
        if let Some(string) = self.hardcoded.reverse_lookup(use_case_id, id) {
            return Ok(Some(string.to_string()));
        }
        self.store.reverse_lookup(use_case_id, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strindex_storage::{InMemoryCache, InMemoryStore};

    fn indexer() -> TieredIndexer<InMemoryCache, InMemoryStore> {
        TieredIndexer::new(
            Arc::new(InMemoryCache::default()),
            Arc::new(InMemoryStore::new()),
            IndexerConfig::default(),
        )
        .expect("default config is valid")
    }

    #[test]
    fn test_tier_counts_total() {
        let counts = TierCounts {
            cache_hit: 1,
            hardcoded: 2,
            db_read: 3,
            first_seen: 4,
            rate_limited: 5,
        };
        assert_eq!(counts.total(), 15);
        assert_eq!(counts.get(FetchType::DbRead), 3);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = TieredIndexer::new(
            Arc::new(InMemoryCache::default()),
            Arc::new(InMemoryStore::new()),
            IndexerConfig::default().with_namespace(""),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_empty_batch_touches_nothing() {
        let indexer = indexer();
        let results = indexer
            .bulk_record(UseCaseKey::ReleaseHealth, HashMap::new())
            .await
            .expect("empty batch should succeed");
        assert!(results.results().is_empty());
        assert_eq!(indexer.store().call_counts().lookups, 0);
    }

    #[tokio::test]
    async fn test_hardcoded_strings_are_not_cached() {
        let indexer = indexer();
        let org_strings = HashMap::from([(1, HashSet::from(["environment".to_string()]))]);
        let results = indexer
            .bulk_record(UseCaseKey::ReleaseHealth, org_strings)
            .await
            .expect("bulk_record should succeed");

        let meta = results.get_fetch_metadata()["environment"];
        assert_eq!(meta.fetch_type, FetchType::Hardcoded);
        assert_eq!(meta.fetch_type_ext, Some(FetchTypeExt { is_global: true }));
        assert!(indexer.cache().is_empty());
        assert_eq!(indexer.store().call_counts().lookups, 0);
    }

    #[tokio::test]
    async fn test_reverse_resolve_hardcoded() {
        let indexer = indexer();
        let id = indexer
            .resolve(UseCaseKey::Performance, 9, "transaction")
            .await
            .expect("resolve should succeed")
            .expect("transaction is hardcoded");
        let string = indexer
            .reverse_resolve(UseCaseKey::Performance, id)
            .await
            .expect("reverse_resolve should succeed");
        assert_eq!(string.as_deref(), Some("transaction"));
    }
}
