//! In-process cache backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use strindex_core::{CacheError, IndexId, IndexerResult, UseCaseKey};

use super::cache_key::CacheKey;
use super::traits::{CacheStats, IndexerCache};

#[derive(Debug, Clone, Copy)]
struct Entry {
    id: IndexId,
    expires_at: DateTime<Utc>,
}

/// Concurrent in-memory cache with per-entry expiry.
///
/// Expired entries are removed lazily when a lookup finds them. The
/// `set_failing` switch makes every call return a backend error, which lets
/// callers exercise their degraded paths.
#[derive(Debug)]
pub struct InMemoryCache {
    namespace: String,
    entries: DashMap<String, Entry>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    failing: AtomicBool,
}

impl InMemoryCache {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            failing: AtomicBool::new(false),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Expiry of a cached entry, expired or not.
    pub fn expires_at(&self, use_case_id: UseCaseKey, key: &str) -> Option<DateTime<Utc>> {
        let encoded = CacheKey::new(&self.namespace, use_case_id, key).encode();
        self.entries.get(&encoded).map(|entry| entry.expires_at)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check_available(&self) -> IndexerResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::Backend {
                reason: "in-memory cache switched to failing".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new("strindex")
    }
}

#[async_trait]
impl IndexerCache for InMemoryCache {
    async fn get_many(
        &self,
        use_case_id: UseCaseKey,
        keys: &[String],
    ) -> IndexerResult<HashMap<String, IndexId>> {
        self.check_available()?;
        let now = Utc::now();
        let mut found = HashMap::with_capacity(keys.len());

        for key in keys {
            let encoded = CacheKey::new(&self.namespace, use_case_id, key).encode();
            let entry = self.entries.get(&encoded).map(|e| *e);
            match entry {
                Some(entry) if entry.expires_at > now => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    found.insert(key.clone(), entry.id);
                }
                Some(_) => {
                    // Only drop it if nobody refreshed it in the meantime.
                    if self
                        .entries
                        .remove_if(&encoded, |_, e| e.expires_at <= now)
                        .is_some()
                    {
                        self.evictions.fetch_add(1, Ordering::Relaxed);
                    }
                    self.misses.fetch_add(1, Ordering::Relaxed);
                }
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        Ok(found)
    }

    async fn set_many(
        &self,
        use_case_id: UseCaseKey,
        entries: &HashMap<String, IndexId>,
        ttl: Duration,
    ) -> IndexerResult<()> {
        self.check_available()?;
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = Utc::now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        for (key, id) in entries {
            let encoded = CacheKey::new(&self.namespace, use_case_id, key).encode();
            self.entries.insert(
                encoded,
                Entry {
                    id: *id,
                    expires_at,
                },
            );
        }
        Ok(())
    }

    async fn invalidate_use_case(&self, use_case_id: UseCaseKey) -> IndexerResult<u64> {
        self.check_available()?;
        let prefix = CacheKey::use_case_prefix(&self.namespace, use_case_id);
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(&prefix));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }

    async fn stats(&self) -> IndexerResult<CacheStats> {
        let memory_bytes = self
            .entries
            .iter()
            .map(|e| (e.key().len() + std::mem::size_of::<Entry>()) as u64)
            .sum();
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.entries.len() as u64,
            memory_bytes,
            evictions: self.evictions.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    fn keys(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|k| k.to_string()).collect()
    }

    #[tokio::test]
    async fn test_unknown_keys_are_absent() {
        let cache = InMemoryCache::default();
        let found = cache
            .get_many(UseCaseKey::ReleaseHealth, &keys(&["1:a", "1:b"]))
            .await
            .expect("get_many should succeed");
        assert!(found.is_empty());

        let stats = cache.stats().await.expect("stats should succeed");
        assert_eq!(stats.misses, 2);
    }

    #[tokio::test]
    async fn test_set_many_then_get_many() {
        let cache = InMemoryCache::default();
        let entries = HashMap::from([("1:a".to_string(), 10), ("2:e".to_string(), 12)]);
        cache
            .set_many(UseCaseKey::ReleaseHealth, &entries, TTL)
            .await
            .expect("set_many should succeed");

        let found = cache
            .get_many(UseCaseKey::ReleaseHealth, &keys(&["1:a", "2:e", "3:x"]))
            .await
            .expect("get_many should succeed");
        assert_eq!(found, entries);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_reads_do_not_extend_ttl() {
        let cache = InMemoryCache::default();
        cache
            .set(UseCaseKey::ReleaseHealth, "1:a", 10, TTL)
            .await
            .expect("set should succeed");
        let before = cache.expires_at(UseCaseKey::ReleaseHealth, "1:a");

        let _ = cache.get(UseCaseKey::ReleaseHealth, "1:a").await;
        let after = cache.expires_at(UseCaseKey::ReleaseHealth, "1:a");

        assert!(before.is_some());
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_expired_entry_is_evicted_on_read() {
        let cache = InMemoryCache::default();
        cache
            .set(UseCaseKey::ReleaseHealth, "1:a", 10, Duration::ZERO)
            .await
            .expect("set should succeed");

        let id = cache
            .get(UseCaseKey::ReleaseHealth, "1:a")
            .await
            .expect("get should succeed");
        assert!(id.is_none());
        assert!(cache.is_empty());

        let stats = cache.stats().await.expect("stats should succeed");
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_invalidate_use_case_keeps_other_use_cases() {
        let cache = InMemoryCache::default();
        cache
            .set(UseCaseKey::ReleaseHealth, "1:a", 1, TTL)
            .await
            .expect("set should succeed");
        cache
            .set(UseCaseKey::Performance, "1:a", 2, TTL)
            .await
            .expect("set should succeed");

        let removed = cache
            .invalidate_use_case(UseCaseKey::ReleaseHealth)
            .await
            .expect("invalidate should succeed");
        assert_eq!(removed, 1);

        let kept = cache
            .get(UseCaseKey::Performance, "1:a")
            .await
            .expect("get should succeed");
        assert_eq!(kept, Some(2));
    }

    #[tokio::test]
    async fn test_failing_switch() {
        let cache = InMemoryCache::default();
        cache.set_failing(true);

        let err = cache
            .get(UseCaseKey::ReleaseHealth, "1:a")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            strindex_core::IndexerError::Cache(CacheError::Backend { .. })
        ));

        cache.set_failing(false);
        assert!(cache.get(UseCaseKey::ReleaseHealth, "1:a").await.is_ok());
    }
}
