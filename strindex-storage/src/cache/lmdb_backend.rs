//! LMDB-backed cache implementation with use case isolation.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! key-value store shared by every indexer process on a host.
//!
//! # Layout
//!
//! Keys are [`CacheKey::encode`] bytes. Values are 16 bytes:
//! `[id: u64 LE][expires_at_millis: i64 LE]`.
//!
//! Expired entries are reported as misses and left in place until they are
//! overwritten, purged with [`LmdbIndexerCache::purge_expired`] or dropped
//! by [`IndexerCache::invalidate_use_case`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use strindex_core::{CacheError, IndexId, IndexerError, IndexerResult, UseCaseKey};

use super::cache_key::CacheKey;
use super::traits::{CacheStats, IndexerCache};

const VALUE_LEN: usize = 16;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A stored value does not have the expected layout.
    #[error("Corrupt value under {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for IndexerError {
    fn from(e: LmdbCacheError) -> Self {
        match e {
            LmdbCacheError::Corrupt { key, reason } => {
                IndexerError::Cache(CacheError::Corrupt { key, reason })
            }
            other => IndexerError::Cache(CacheError::Backend {
                reason: other.to_string(),
            }),
        }
    }
}

/// Per-use-case statistics tracking.
#[derive(Debug, Default)]
struct UseCaseStatsInner {
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// LMDB-backed indexer cache.
///
/// # Example
///
/// ```ignore
/// use strindex_storage::cache::{IndexerCache, LmdbIndexerCache};
/// use strindex_core::UseCaseKey;
///
/// let cache = LmdbIndexerCache::new("/var/lib/strindex/cache", "strindex", 256)?;
/// cache.set(UseCaseKey::ReleaseHealth, "1:environment", 7, ttl).await?;
/// let id = cache.get(UseCaseKey::ReleaseHealth, "1:environment").await?;
/// ```
pub struct LmdbIndexerCache {
    env: Env,
    db: Database<Bytes, Bytes>,
    namespace: String,
    use_case_stats: Arc<RwLock<HashMap<UseCaseKey, UseCaseStatsInner>>>,
}

impl LmdbIndexerCache {
    /// Create a new LMDB cache.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `namespace` - Prefix of every physical key
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn new<P: AsRef<Path>>(
        path: P,
        namespace: impl Into<String>,
        max_size_mb: usize,
    ) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process;
        // heed requires the caller to uphold that.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(Self {
            env,
            db,
            namespace: namespace.into(),
            use_case_stats: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Get statistics for a specific use case. Entry counts are not tracked
    /// per use case.
    pub fn use_case_stats(&self, use_case_id: UseCaseKey) -> CacheStats {
        if let Ok(stats) = self.use_case_stats.read() {
            if let Some(inner) = stats.get(&use_case_id) {
                return CacheStats {
                    hits: inner.hits,
                    misses: inner.misses,
                    evictions: inner.evictions,
                    ..Default::default()
                };
            }
        }
        CacheStats::default()
    }

    /// Delete every expired entry of a use case. Returns the number removed.
    pub fn purge_expired(&self, use_case_id: UseCaseKey) -> Result<u64, LmdbCacheError> {
        let prefix = CacheKey::use_case_prefix(&self.namespace, use_case_id);
        let now_millis = Utc::now().timestamp_millis();

        let expired: Vec<Vec<u8>> = self
            .collect_with_prefix(prefix.as_bytes())?
            .into_iter()
            .filter(|(_, value)| match decode_value(value) {
                Some((_, expires_at)) => expires_at <= now_millis,
                None => true,
            })
            .map(|(key, _)| key)
            .collect();

        let deleted = self.delete_keys(&expired)?;
        if let Ok(mut stats) = self.use_case_stats.write() {
            stats.entry(use_case_id).or_default().evictions += deleted;
        }
        Ok(deleted)
    }

    fn record_lookup(&self, use_case_id: UseCaseKey, hits: u64, misses: u64, expired: u64) {
        if let Ok(mut stats) = self.use_case_stats.write() {
            let inner = stats.entry(use_case_id).or_default();
            inner.hits += hits;
            inner.misses += misses;
            inner.evictions += expired;
        }
    }

    /// Collect the entries whose key starts with `prefix`.
    fn collect_with_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, LmdbCacheError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let iter = self
            .db
            .prefix_iter(&rtxn, prefix)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let mut entries = Vec::new();
        for result in iter {
            let (key, value) = result.map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }

    fn delete_keys(&self, keys: &[Vec<u8>]) -> Result<u64, LmdbCacheError> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let mut deleted = 0u64;
        for key in keys {
            if self
                .db
                .delete(&mut wtxn, key)
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?
            {
                deleted += 1;
            }
        }

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        Ok(deleted)
    }
}

fn encode_value(id: IndexId, expires_at: DateTime<Utc>) -> [u8; VALUE_LEN] {
    let mut bytes = [0u8; VALUE_LEN];
    bytes[0..8].copy_from_slice(&id.to_le_bytes());
    bytes[8..16].copy_from_slice(&expires_at.timestamp_millis().to_le_bytes());
    bytes
}

fn decode_value(bytes: &[u8]) -> Option<(IndexId, i64)> {
    if bytes.len() != VALUE_LEN {
        return None;
    }
    let id = u64::from_le_bytes(bytes[0..8].try_into().ok()?);
    let expires_at = i64::from_le_bytes(bytes[8..16].try_into().ok()?);
    Some((id, expires_at))
}

fn expiry_after(ttl: Duration) -> DateTime<Utc> {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
    Utc::now()
        .checked_add_signed(ttl)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[async_trait]
impl IndexerCache for LmdbIndexerCache {
    async fn get_many(
        &self,
        use_case_id: UseCaseKey,
        keys: &[String],
    ) -> IndexerResult<HashMap<String, IndexId>> {
        let now_millis = Utc::now().timestamp_millis();
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let mut found = HashMap::with_capacity(keys.len());
        let (mut hits, mut misses, mut expired) = (0u64, 0u64, 0u64);

        for key in keys {
            let encoded = CacheKey::new(&self.namespace, use_case_id, key).encode();
            let value = self
                .db
                .get(&rtxn, encoded.as_bytes())
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

            match value {
                Some(bytes) => {
                    let (id, expires_at) =
                        decode_value(bytes).ok_or_else(|| LmdbCacheError::Corrupt {
                            key: key.clone(),
                            reason: format!("expected {} bytes, found {}", VALUE_LEN, bytes.len()),
                        })?;
                    if expires_at <= now_millis {
                        misses += 1;
                        expired += 1;
                    } else {
                        hits += 1;
                        found.insert(key.clone(), id);
                    }
                }
                None => misses += 1,
            }
        }

        self.record_lookup(use_case_id, hits, misses, expired);
        Ok(found)
    }

    async fn set_many(
        &self,
        use_case_id: UseCaseKey,
        entries: &HashMap<String, IndexId>,
        ttl: Duration,
    ) -> IndexerResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let expires_at = expiry_after(ttl);
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        for (key, id) in entries {
            let encoded = CacheKey::new(&self.namespace, use_case_id, key).encode();
            let bytes = encode_value(*id, expires_at);
            self.db
                .put(&mut wtxn, encoded.as_bytes(), &bytes)
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        }

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        Ok(())
    }

    async fn invalidate_use_case(&self, use_case_id: UseCaseKey) -> IndexerResult<u64> {
        let prefix = CacheKey::use_case_prefix(&self.namespace, use_case_id);
        let keys: Vec<Vec<u8>> = self
            .collect_with_prefix(prefix.as_bytes())?
            .into_iter()
            .map(|(key, _)| key)
            .collect();

        let deleted = self.delete_keys(&keys)?;

        if let Ok(mut stats) = self.use_case_stats.write() {
            stats.remove(&use_case_id);
        }
        Ok(deleted)
    }

    async fn stats(&self) -> IndexerResult<CacheStats> {
        let (entry_count, memory_bytes) = {
            let rtxn = self
                .env
                .read_txn()
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            let prefix = CacheKey::namespace_prefix(&self.namespace);
            let iter = self
                .db
                .prefix_iter(&rtxn, prefix.as_bytes())
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

            let mut count = 0u64;
            let mut bytes = 0u64;
            for result in iter {
                let (key, value) =
                    result.map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
                count += 1;
                bytes += (key.len() + value.len()) as u64;
            }
            (count, bytes)
        };

        let mut stats = CacheStats {
            entry_count,
            memory_bytes,
            ..Default::default()
        };
        if let Ok(per_use_case) = self.use_case_stats.read() {
            for inner in per_use_case.values() {
                stats.hits += inner.hits;
                stats.misses += inner.misses;
                stats.evictions += inner.evictions;
            }
        }
        Ok(stats)
    }
}
