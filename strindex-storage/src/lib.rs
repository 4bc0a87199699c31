//! strindex Storage - Collaborators of the Tiered Indexer
//!
//! Cache tier, hardcoded table, persistent stores and the writes limiter.
//! The PostgreSQL store lives in [`postgres`]; [`InMemoryStore`] below backs
//! tests and single-process deployments.

pub mod cache;
pub mod hardcoded;
pub mod limiter;
pub mod postgres;
pub mod store;

pub use cache::{CacheKey, CacheStats, InMemoryCache, IndexerCache, LmdbCacheError, LmdbIndexerCache};
pub use hardcoded::{HardcodedMatches, HardcodedTable, STATIC_ID_PREFIX};
pub use limiter::{LimitOutcome, WritesLimiter};
pub use postgres::{PgConfig, PostgresStore};
pub use store::{stale_cutoff, StringStore};

use ::async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use strindex_core::{
    IndexId, IndexerResult, KeyCollection, KeyResult, OrgId, StoreError, UseCaseKey,
};

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Row {
    id: IndexId,
    last_seen: DateTime<Utc>,
}

#[derive(Debug)]
struct UseCaseTable {
    by_key: HashMap<(OrgId, String), Row>,
    by_id: HashMap<IndexId, (OrgId, String)>,
    next_id: IndexId,
}

impl Default for UseCaseTable {
    fn default() -> Self {
        Self {
            by_key: HashMap::new(),
            by_id: HashMap::new(),
            next_id: 1,
        }
    }
}

/// Number of store calls made, by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCallCounts {
    pub lookups: u64,
    pub creates: u64,
    pub touches: u64,
}

/// In-memory store for tests and single-process use.
///
/// A single write lock around get-or-create makes creation atomic. The
/// availability switch makes every call fail with
/// [`StoreError::Unavailable`] to simulate an outage.
#[derive(Debug)]
pub struct InMemoryStore {
    tables: RwLock<HashMap<UseCaseKey, UseCaseTable>>,
    available: AtomicBool,
    lookups: AtomicU64,
    creates: AtomicU64,
    touches: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            lookups: AtomicU64::new(0),
            creates: AtomicU64::new(0),
            touches: AtomicU64::new(0),
        }
    }

    /// Drop every mapping. Ids restart at 1.
    pub fn clear(&self) -> IndexerResult<()> {
        self.write()?.clear();
        Ok(())
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn call_counts(&self) -> StoreCallCounts {
        StoreCallCounts {
            lookups: self.lookups.load(Ordering::Relaxed),
            creates: self.creates.load(Ordering::Relaxed),
            touches: self.touches.load(Ordering::Relaxed),
        }
    }

    /// When a key was last seen.
    pub fn last_seen(
        &self,
        use_case_id: UseCaseKey,
        org_id: OrgId,
        string: &str,
    ) -> IndexerResult<Option<DateTime<Utc>>> {
        let tables = self.read()?;
        Ok(tables
            .get(&use_case_id)
            .and_then(|t| t.by_key.get(&(org_id, string.to_string())))
            .map(|row| row.last_seen))
    }

    /// Overwrite `last_seen` of an existing key. Returns false if the key
    /// does not exist.
    pub fn set_last_seen(
        &self,
        use_case_id: UseCaseKey,
        org_id: OrgId,
        string: &str,
        last_seen: DateTime<Utc>,
    ) -> IndexerResult<bool> {
        let mut tables = self.write()?;
        let row = tables
            .get_mut(&use_case_id)
            .and_then(|t| t.by_key.get_mut(&(org_id, string.to_string())));
        Ok(match row {
            Some(row) => {
                row.last_seen = last_seen;
                true
            }
            None => false,
        })
    }

    fn check_available(&self) -> IndexerResult<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                reason: "in-memory store switched off".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn read(&self) -> IndexerResult<RwLockReadGuard<'_, HashMap<UseCaseKey, UseCaseTable>>> {
        self.tables.read().map_err(|_| StoreError::LockPoisoned.into())
    }

    fn write(&self) -> IndexerResult<RwLockWriteGuard<'_, HashMap<UseCaseKey, UseCaseTable>>> {
        self.tables.write().map_err(|_| StoreError::LockPoisoned.into())
    }
}

#[async_trait]
impl StringStore for InMemoryStore {
    async fn bulk_lookup(
        &self,
        use_case_id: UseCaseKey,
        keys: &KeyCollection,
    ) -> IndexerResult<Vec<KeyResult>> {
        self.check_available()?;
        self.lookups.fetch_add(1, Ordering::Relaxed);

        let tables = self.read()?;
        let Some(table) = tables.get(&use_case_id) else {
            return Ok(Vec::new());
        };

        Ok(keys
            .as_tuples()
            .into_iter()
            .filter_map(|(org_id, string)| {
                table
                    .by_key
                    .get(&(org_id, string.to_string()))
                    .map(|row| KeyResult::new(org_id, string, Some(row.id)))
            })
            .collect())
    }

    async fn bulk_create_if_absent(
        &self,
        use_case_id: UseCaseKey,
        keys: &KeyCollection,
    ) -> IndexerResult<Vec<KeyResult>> {
        self.check_available()?;
        self.creates.fetch_add(1, Ordering::Relaxed);

        let now = Utc::now();
        let mut tables = self.write()?;
        let table = tables.entry(use_case_id).or_default();

        let mut results = Vec::with_capacity(keys.size());
        for (org_id, string) in keys.as_tuples() {
            let key = (org_id, string.to_string());
            let id = match table.by_key.get(&key) {
                Some(row) => row.id,
                None => {
                    let id = table.next_id;
                    table.next_id += 1;
                    table.by_id.insert(id, key.clone());
                    table.by_key.insert(key, Row { id, last_seen: now });
                    id
                }
            };
            results.push(KeyResult::new(org_id, string, Some(id)));
        }
        Ok(results)
    }

    async fn touch(
        &self,
        use_case_id: UseCaseKey,
        keys: &KeyCollection,
        seen_at: DateTime<Utc>,
        stale_after: Duration,
    ) -> IndexerResult<u64> {
        self.check_available()?;
        self.touches.fetch_add(1, Ordering::Relaxed);

        let cutoff = stale_cutoff(seen_at, stale_after);
        let mut tables = self.write()?;
        let Some(table) = tables.get_mut(&use_case_id) else {
            return Ok(0);
        };

        let mut touched = 0;
        for (org_id, string) in keys.as_tuples() {
            if let Some(row) = table.by_key.get_mut(&(org_id, string.to_string())) {
                if row.last_seen < cutoff {
                    row.last_seen = seen_at;
                    touched += 1;
                }
            }
        }
        Ok(touched)
    }

    async fn lookup(
        &self,
        use_case_id: UseCaseKey,
        org_id: OrgId,
        string: &str,
    ) -> IndexerResult<Option<IndexId>> {
        self.check_available()?;
        self.lookups.fetch_add(1, Ordering::Relaxed);

        let tables = self.read()?;
        Ok(tables
            .get(&use_case_id)
            .and_then(|t| t.by_key.get(&(org_id, string.to_string())))
            .map(|row| row.id))
    }

    async fn reverse_lookup(
        &self,
        use_case_id: UseCaseKey,
        id: IndexId,
    ) -> IndexerResult<Option<String>> {
        self.check_available()?;
        let tables = self.read()?;
        Ok(tables
            .get(&use_case_id)
            .and_then(|t| t.by_id.get(&id))
            .map(|(_, string)| string.clone()))
    }

    async fn purge_stale(
        &self,
        use_case_id: UseCaseKey,
        cutoff: DateTime<Utc>,
    ) -> IndexerResult<u64> {
        self.check_available()?;
        let mut tables = self.write()?;
        let Some(table) = tables.get_mut(&use_case_id) else {
            return Ok(0);
        };

        let stale: Vec<(OrgId, String)> = table
            .by_key
            .iter()
            .filter(|(_, row)| row.last_seen < cutoff)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &stale {
            if let Some(row) = table.by_key.remove(key) {
                table.by_id.remove(&row.id);
            }
        }
        Ok(stale.len() as u64)
    }

    async fn health_check(&self) -> IndexerResult<bool> {
        Ok(self.available.load(Ordering::SeqCst) && self.tables.read().is_ok())
    }

    async fn count(&self, use_case_id: UseCaseKey) -> IndexerResult<u64> {
        self.check_available()?;
        let tables = self.read()?;
        Ok(tables
            .get(&use_case_id)
            .map(|t| t.by_key.len() as u64)
            .unwrap_or(0))
    }
}

// ============================================================================
// TESTS
// ============================================================================
