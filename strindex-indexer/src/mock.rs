//! Process-local indexer for callers' tests.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use strindex_core::{
    FetchType, FetchTypeExt, IndexId, IndexerResult, KeyCollection, KeyResult, KeyResults, OrgId,
    StoreError, UseCaseKey,
};
use strindex_storage::HardcodedTable;

use crate::StringIndexer;

#[derive(Debug)]
struct MockTable {
    by_key: HashMap<(OrgId, String), IndexId>,
    by_id: HashMap<IndexId, String>,
    next_id: IndexId,
}

impl Default for MockTable {
    fn default() -> Self {
        Self {
            by_key: HashMap::new(),
            by_id: HashMap::new(),
            next_id: 1,
        }
    }
}

/// In-memory [`StringIndexer`] with no cache, store or rate limits.
///
/// Strings in the hardcoded table resolve with `Hardcoded` provenance.
/// Everything else is assigned sequential ids per use case: `FirstSeen` the
/// first time, `DbRead` afterwards.
#[derive(Debug)]
pub struct MockIndexer {
    hardcoded: HardcodedTable,
    tables: RwLock<HashMap<UseCaseKey, MockTable>>,
}

impl Default for MockIndexer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockIndexer {
    pub fn new() -> Self {
        Self::with_hardcoded(HardcodedTable::shared_strings())
    }

    pub fn with_hardcoded(hardcoded: HardcodedTable) -> Self {
        Self {
            hardcoded,
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Number of strings assigned an id for `use_case_id`, hardcoded excluded.
    pub fn len(&self, use_case_id: UseCaseKey) -> IndexerResult<usize> {
        Ok(self
            .read()?
            .get(&use_case_id)
            .map_or(0, |table| table.by_key.len()))
    }

    fn read(&self) -> IndexerResult<RwLockReadGuard<'_, HashMap<UseCaseKey, MockTable>>> {
        self.tables
            .read()
            .map_err(|_| StoreError::LockPoisoned.into())
    }

    fn write(&self) -> IndexerResult<RwLockWriteGuard<'_, HashMap<UseCaseKey, MockTable>>> {
        self.tables
            .write()
            .map_err(|_| StoreError::LockPoisoned.into())
    }
}

#[async_trait]
impl StringIndexer for MockIndexer {
    async fn bulk_record(
        &self,
        use_case_id: UseCaseKey,
        org_strings: HashMap<OrgId, HashSet<String>>,
    ) -> IndexerResult<KeyResults> {
        let keys = KeyCollection::new(org_strings);
        let mut results = KeyResults::new();

        let matches = self.hardcoded.lookup_collection(use_case_id, &keys);
        results.add_key_results(
            matches.global,
            Some(FetchType::Hardcoded),
            Some(FetchTypeExt { is_global: true }),
        );
        results.add_key_results(
            matches.scoped,
            Some(FetchType::Hardcoded),
            Some(FetchTypeExt { is_global: false }),
        );

        let remaining = results.get_unmapped_keys(&keys);
        if remaining.is_empty() {
            return Ok(results);
        }

        let mut tables = self.write()?;
        let table = tables.entry(use_case_id).or_default();
        for (org_id, string) in remaining.as_tuples() {
            let key = (org_id, string.to_string());
            let (id, fetch_type) = match table.by_key.get(&key) {
                Some(id) => (*id, FetchType::DbRead),
                None => {
                    let id = table.next_id;
                    table.next_id += 1;
                    table.by_key.insert(key, id);
                    table.by_id.insert(id, string.to_string());
                    (id, FetchType::FirstSeen)
                }
            };
            results.add_key_result(KeyResult::new(org_id, string, Some(id)), Some(fetch_type), None);
        }
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
        Ok(self
            .read()?
            .get(&use_case_id)
            .and_then(|table| table.by_key.get(&(org_id, string.to_string())))
            .copied())
    }

    async fn reverse_resolve(
        &self,
        use_case_id: UseCaseKey,
        id: IndexId,
    ) -> IndexerResult<Option<String>> {
        if let Some(string) = self.hardcoded.reverse_lookup(use_case_id, id) {
            return Ok(Some(string.to_string()));
        }
        Ok(self
            .read()?
            .get(&use_case_id)
            .and_then(|table| table.by_id.get(&id))
            .cloned())
    }
}
