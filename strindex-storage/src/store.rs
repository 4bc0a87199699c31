//! Persistent store trait.
//!
//! The store is the source of truth for `(use case, org, string) -> id`
//! mappings. Every implementation must make creation an atomic
//! get-or-create: concurrent first-seen creation of the same key from any
//! number of workers or processes converges to a single id.

use ::async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use strindex_core::{IndexId, IndexerResult, KeyCollection, KeyResult, OrgId, UseCaseKey};

/// Async persistent store for string mappings.
///
/// All operations are scoped to one use case. Ids are unique per use case
/// and start at 1.
#[async_trait]
pub trait StringStore: Send + Sync {
    // ========================================================================
    // BULK OPERATIONS
    // ========================================================================

    /// Read existing mappings. Only keys that exist are returned, each with
    /// `id: Some(_)`.
    async fn bulk_lookup(
        &self,
        use_case_id: UseCaseKey,
        keys: &KeyCollection,
    ) -> IndexerResult<Vec<KeyResult>>;

    /// Get or create a mapping for every key.
    ///
    /// Returns one result per key with `id: Some(_)`. Keys created by a
    /// concurrent caller come back with that caller's id.
    async fn bulk_create_if_absent(
        &self,
        use_case_id: UseCaseKey,
        keys: &KeyCollection,
    ) -> IndexerResult<Vec<KeyResult>>;

    /// Extend the retention of existing keys.
    ///
    /// Sets `last_seen = seen_at` on every key whose `last_seen` is older
    /// than `seen_at - stale_after`, so hot keys are written at most once
    /// per `stale_after`. Returns the number of keys touched.
    async fn touch(
        &self,
        use_case_id: UseCaseKey,
        keys: &KeyCollection,
        seen_at: DateTime<Utc>,
        stale_after: Duration,
    ) -> IndexerResult<u64>;

    // ========================================================================
    // SINGLE KEY READS
    // ========================================================================

    /// Look up one key without touching it.
    async fn lookup(
        &self,
        use_case_id: UseCaseKey,
        org_id: OrgId,
        string: &str,
    ) -> IndexerResult<Option<IndexId>>;

    /// Find the string an id was assigned to.
    async fn reverse_lookup(
        &self,
        use_case_id: UseCaseKey,
        id: IndexId,
    ) -> IndexerResult<Option<String>>;

    // ========================================================================
    // RETENTION & DIAGNOSTICS
    // ========================================================================

    /// Delete every key not seen since `cutoff`. Returns the number removed.
    async fn purge_stale(&self, use_case_id: UseCaseKey, cutoff: DateTime<Utc>)
        -> IndexerResult<u64>;

    /// Check if the store is reachable.
    async fn health_check(&self) -> IndexerResult<bool>;

    /// Number of mappings held for a use case.
    async fn count(&self, use_case_id: UseCaseKey) -> IndexerResult<u64>;
}

/// Cutoff before which a `last_seen` counts as stale.
pub fn stale_cutoff(seen_at: DateTime<Utc>, stale_after: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(stale_after)
        .ok()
        .and_then(|d| seen_at.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
