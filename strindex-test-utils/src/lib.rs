//! strindex Test Utilities
//!
//! Shared test infrastructure for the strindex workspace:
//! - Proptest generators for keys, collections and provenance
//! - Fixtures for common resolution scenarios
//! - Assertions over `KeyResults` and error variants

pub use strindex_storage::{HardcodedTable, InMemoryCache, InMemoryStore, WritesLimiter};

pub use strindex_core::{
    composite_key, CacheError, FetchType, FetchTypeExt, IndexId, IndexerConfig, IndexerError,
    IndexerResult, KeyCollection, KeyResult, KeyResults, Metadata, OrgId, StoreError, UseCaseKey,
};

use std::collections::{HashMap, HashSet};

/// Install a test tracing subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Build a collection from `(org, strings)` pairs.
pub fn collection(entries: &[(OrgId, &[&str])]) -> KeyCollection {
    let mut mapping: HashMap<OrgId, HashSet<String>> = HashMap::new();
    for (org_id, strings) in entries {
        mapping
            .entry(*org_id)
            .or_default()
            .extend(strings.iter().map(|s| s.to_string()));
    }
    KeyCollection::new(mapping)
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for strindex types.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_org_id() -> impl Strategy<Value = OrgId> {
        1u64..10_000
    }

    /// Metric names and tag values. May contain `:` so composite key parsing
    /// is exercised on the first separator only.
    pub fn arb_string() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-z_.]{1,16}",
            "[cdsg]:[a-z]{1,8}/[a-z_]{1,8}@[a-z]{2,11}",
            "[a-z]{1,6}:[a-z0-9:]{0,8}",
        ]
    }

    pub fn arb_use_case() -> impl Strategy<Value = UseCaseKey> {
        prop_oneof![Just(UseCaseKey::ReleaseHealth), Just(UseCaseKey::Performance)]
    }

    pub fn arb_fetch_type() -> impl Strategy<Value = FetchType> {
        proptest::sample::select(FetchType::ALL.to_vec())
    }

    pub fn arb_fetch_type_ext() -> impl Strategy<Value = Option<FetchTypeExt>> {
        proptest::option::of(any::<bool>().prop_map(|is_global| FetchTypeExt { is_global }))
    }

    pub fn arb_org_strings() -> impl Strategy<Value = HashMap<OrgId, HashSet<String>>> {
        proptest::collection::hash_map(
            arb_org_id(),
            proptest::collection::hash_set(arb_string(), 1..8),
            0..6,
        )
    }

    pub fn arb_key_collection() -> impl Strategy<Value = KeyCollection> {
        arb_org_strings().prop_map(KeyCollection::new)
    }

    /// A key result with an id that may be absent.
    pub fn arb_key_result() -> impl Strategy<Value = KeyResult> {
        (arb_org_id(), arb_string(), proptest::option::of(1u64..1_000_000))
            .prop_map(|(org_id, string, id)| KeyResult::new(org_id, string, id))
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common resolution scenarios.

    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    /// Four orgs with a mix of shared and unique strings:
    /// `{1: {a, b, c}, 2: {e, f}, 3: {g}, 4: {h}}`.
    pub fn four_org_collection() -> KeyCollection {
        collection(&[
            (1, &["a", "b", "c"]),
            (2, &["e", "f"]),
            (3, &["g"]),
            (4, &["h"]),
        ])
    }

    /// Default config with writes limiting switched off.
    pub fn unlimited_config() -> IndexerConfig {
        IndexerConfig::default()
            .with_namespace("strindex-test")
            .without_writes_limit()
    }

    /// Config with a short cache TTL and tight writes limits.
    pub fn limited_config(per_org_per_minute: u32, global_per_minute: u32) -> IndexerConfig {
        IndexerConfig::default()
            .with_namespace("strindex-test")
            .with_cache_ttl(Duration::from_secs(60))
            .with_writes_limits(per_org_per_minute, global_per_minute)
    }

    /// Fresh in-memory cache and store.
    pub fn memory_tiers() -> (Arc<InMemoryCache>, Arc<InMemoryStore>) {
        (
            Arc::new(InMemoryCache::new("strindex-test")),
            Arc::new(InMemoryStore::new()),
        )
    }

    /// Small hardcoded table with one global and one scoped entry per use case.
    pub fn small_hardcoded_table() -> HardcodedTable {
        HardcodedTable::new()
            .with_global("environment", strindex_storage::STATIC_ID_PREFIX + 1)
            .with_scoped(
                UseCaseKey::ReleaseHealth,
                "c:sessions/session@none",
                strindex_storage::STATIC_ID_PREFIX + 1001,
            )
            .with_scoped(
                UseCaseKey::Performance,
                "d:transactions/duration@millisecond",
                strindex_storage::STATIC_ID_PREFIX + 2001,
            )
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over resolution results.

    use super::*;

    /// Assert that `(org_id, string)` resolved to `expected`.
    #[track_caller]
    pub fn assert_resolved(
        results: &KeyResults,
        org_id: OrgId,
        string: &str,
        expected: Option<IndexId>,
    ) {
        let actual = results.get(org_id).and_then(|strings| strings.get(string));
        assert_eq!(
            actual,
            Some(&expected),
            "Expected {}:{} to resolve to {:?}",
            org_id,
            string,
            expected
        );
    }

    /// Assert the provenance recorded for `string`.
    #[track_caller]
    pub fn assert_fetch_type(
        results: &KeyResults,
        string: &str,
        fetch_type: FetchType,
        fetch_type_ext: Option<FetchTypeExt>,
    ) {
        match results.get_fetch_metadata().get(string) {
            Some(meta) => {
                assert_eq!(meta.fetch_type, fetch_type, "fetch type of {:?}", string);
                assert_eq!(meta.fetch_type_ext, fetch_type_ext, "fetch type ext of {:?}", string);
            }
            None => panic!("No metadata recorded for {:?}", string),
        }
    }

    /// Assert every key in `keys` is present in `results` with an id.
    #[track_caller]
    pub fn assert_all_mapped(results: &KeyResults, keys: &KeyCollection) {
        for (org_id, string) in keys.as_tuples() {
            let id = results
                .get(org_id)
                .and_then(|strings| strings.get(string))
                .copied()
                .flatten();
            assert!(
                matches!(id, Some(id) if id != 0),
                "Expected {}:{} to be mapped, got {:?}",
                org_id,
                string,
                id
            );
        }
    }

    /// Assert that `results` holds exactly the keys of `keys`.
    #[track_caller]
    pub fn assert_same_keys(results: &KeyResults, keys: &KeyCollection) {
        let actual: HashSet<(OrgId, String)> = results
            .results()
            .iter()
            .flat_map(|(org_id, strings)| strings.keys().map(move |s| (*org_id, s.clone())))
            .collect();
        let expected: HashSet<(OrgId, String)> = keys
            .as_tuples()
            .into_iter()
            .map(|(org_id, s)| (org_id, s.to_string()))
            .collect();
        assert_eq!(actual, expected);
    }

    #[track_caller]
    pub fn assert_store_error<T: std::fmt::Debug>(result: &IndexerResult<T>) {
        match result {
            Err(IndexerError::Store(_)) => {}
            other => panic!("Expected Store error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_store_unavailable<T: std::fmt::Debug>(result: &IndexerResult<T>) {
        match result {
            Err(IndexerError::Store(StoreError::Unavailable { .. })) => {}
            other => panic!("Expected Store Unavailable error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &IndexerResult<T>) {
        match result {
            Err(IndexerError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
