//! strindex Indexer - String to Integer Resolution
//!
//! The [`StringIndexer`] contract and its implementations:
//!
//! - [`TieredIndexer`]: cache, then hardcoded table, then store read, then
//!   rate limited creation.
//! - [`MockIndexer`]: process-local, for callers' tests.
//!
//! Implementations are picked when the process is wired up; callers hold an
//! `Arc<dyn StringIndexer>`.

pub mod mock;
pub mod telemetry;
pub mod tiered;

pub use mock::MockIndexer;
pub use tiered::{TierCounts, TieredIndexer};

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use strindex_core::{IndexId, IndexerResult, KeyResults, OrgId, UseCaseKey};

/// Resolution service contract.
///
/// Every operation is scoped to a use case. Unknown strings and ids resolve
/// to `None`; only failures of a tier that is required for correctness
/// (the persistent store) surface as errors.
#[async_trait]
pub trait StringIndexer: Send + Sync {
    /// Resolve every string to a stable id, creating ids for strings never
    /// seen before.
    ///
    /// Concurrent calls with overlapping input converge on the same ids.
    /// Rate limited strings come back with an absent id and
    /// [`strindex_core::FetchType::RateLimited`] provenance.
    async fn bulk_record(
        &self,
        use_case_id: UseCaseKey,
        org_strings: HashMap<OrgId, HashSet<String>>,
    ) -> IndexerResult<KeyResults>;

    /// Single-key [`Self::bulk_record`]. Extends the string's retention.
    async fn record(
        &self,
        use_case_id: UseCaseKey,
        org_id: OrgId,
        string: &str,
    ) -> IndexerResult<Option<IndexId>> {
        let org_strings = HashMap::from([(org_id, HashSet::from([string.to_string()]))]);
        let results = self.bulk_record(use_case_id, org_strings).await?;
        Ok(results
            .get(org_id)
            .and_then(|strings| strings.get(string))
            .copied()
            .flatten())
    }

    /// Look up a string without creating it or extending its retention.
    async fn resolve(
        &self,
        use_case_id: UseCaseKey,
        org_id: OrgId,
        string: &str,
    ) -> IndexerResult<Option<IndexId>>;

    /// Find the string an id was assigned to.
    async fn reverse_resolve(
        &self,
        use_case_id: UseCaseKey,
        id: IndexId,
    ) -> IndexerResult<Option<String>>;
}
