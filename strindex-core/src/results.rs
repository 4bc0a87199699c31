//! Accumulated resolution results and their provenance.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::key::composite_key;
use crate::{FetchType, IndexId, KeyCollection, KeyResult, OrgId};

/// Extra provenance detail.
///
/// `is_global` separates entries shared by every tenant (and every use case)
/// from entries scoped more narrowly. Set on hardcoded and rate-limited
/// resolutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchTypeExt {
    pub is_global: bool,
}

/// Provenance of the most recent resolution recorded for a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub id: Option<IndexId>,
    pub fetch_type: FetchType,
    pub fetch_type_ext: Option<FetchTypeExt>,
}

/// Per-org mapping from string to resolved id. `None` marks a string whose
/// resolution was attempted but produced no id.
pub type OrgResults = HashMap<String, Option<IndexId>>;

/// Mutable accumulator of resolutions across one or more tiers.
///
/// Provenance (`meta`) is keyed by the bare string, not by `(org, string)`:
/// the same string resolved for two orgs keeps only the last provenance
/// recorded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyResults {
    results: HashMap<OrgId, OrgResults>,
    meta: HashMap<String, Metadata>,
}

impl KeyResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the results for `org_id`, inserting an empty mapping if the org
    /// has never been seen.
    pub fn org_results_mut(&mut self, org_id: OrgId) -> &mut OrgResults {
        self.results.entry(org_id).or_default()
    }

    /// Direct access to one org's mapping. Like [`Self::org_results_mut`],
    /// this leaves an empty mapping behind for unseen orgs.
    pub fn org_results(&mut self, org_id: OrgId) -> &OrgResults {
        self.org_results_mut(org_id)
    }

    /// Read-only access without inserting anything.
    pub fn get(&self, org_id: OrgId) -> Option<&OrgResults> {
        self.results.get(&org_id)
    }

    /// The raw results, including orgs with empty mappings.
    pub fn results(&self) -> &HashMap<OrgId, OrgResults> {
        &self.results
    }

    pub fn add_key_result(
        &mut self,
        key_result: KeyResult,
        fetch_type: Option<FetchType>,
        fetch_type_ext: Option<FetchTypeExt>,
    ) {
        let KeyResult { org_id, string, id } = key_result;
        if let Some(fetch_type) = fetch_type {
            self.meta.insert(
                string.clone(),
                Metadata {
                    id,
                    fetch_type,
                    fetch_type_ext,
                },
            );
        }
        self.org_results_mut(org_id).insert(string, id);
    }

    /// Record every result in order. Later entries win for repeated strings.
    pub fn add_key_results<I>(
        &mut self,
        key_results: I,
        fetch_type: Option<FetchType>,
        fetch_type_ext: Option<FetchTypeExt>,
    ) where
        I: IntoIterator<Item = KeyResult>,
    {
        for key_result in key_results {
            self.add_key_result(key_result, fetch_type, fetch_type_ext);
        }
    }

    /// Only the orgs that have at least one string recorded.
    pub fn get_mapped_results(&self) -> HashMap<OrgId, OrgResults> {
        self.results
            .iter()
            .filter(|(_, strings)| !strings.is_empty())
            .map(|(org_id, strings)| (*org_id, strings.clone()))
            .collect()
    }

    /// Keys from `keys` that have no id here yet.
    ///
    /// A key is unmapped when its string is missing from the org's results or
    /// its id is absent or zero. Every org in `keys` gets an (possibly empty)
    /// entry in `results` as a side effect.
    pub fn get_unmapped_keys(&mut self, keys: &KeyCollection) -> KeyCollection {
        let mut unmapped_org_strings: HashMap<OrgId, HashSet<String>> = HashMap::new();
        for (org_id, strings) in keys.mapping() {
            let org_results = self.org_results_mut(*org_id);
            for string in strings {
                let mapped = matches!(org_results.get(string), Some(Some(id)) if *id != 0);
                if !mapped {
                    unmapped_org_strings
                        .entry(*org_id)
                        .or_default()
                        .insert(string.clone());
                }
            }
        }

        KeyCollection::new(unmapped_org_strings)
    }

    /// Flatten resolved entries to `{"1:a": 10, "2:e": 13}`, the shape taken
    /// by a bulk cache write. Entries without an id are left out.
    pub fn get_mapped_key_strings_to_ints(&self) -> HashMap<String, IndexId> {
        let mut cache_key_results = HashMap::new();
        for (org_id, strings) in &self.results {
            for (string, id) in strings {
                if let Some(id) = id {
                    cache_key_results.insert(composite_key(*org_id, string), *id);
                }
            }
        }
        cache_key_results
    }

    pub fn get_fetch_metadata(&self) -> &HashMap<String, Metadata> {
        &self.meta
    }

    /// Combine two accumulators into a new one.
    ///
    /// For `results`, `self` wins when both sides hold the same string for
    /// the same org. For `meta`, `other` wins. Tiered resolution relies on
    /// this: `earlier.merge(&later)` keeps earlier ids and later provenance.
    pub fn merge(&self, other: &KeyResults) -> KeyResults {
        let mut new_results = KeyResults::new();

        for (org_id, strings) in other.results.iter().chain(self.results.iter()) {
            new_results
                .org_results_mut(*org_id)
                .extend(strings.iter().map(|(s, id)| (s.clone(), *id)));
        }

        new_results
            .meta
            .extend(self.meta.iter().map(|(s, m)| (s.clone(), *m)));
        new_results
            .meta
            .extend(other.meta.iter().map(|(s, m)| (s.clone(), *m)));

        new_results
    }

    /// Number of `(org, string)` entries that carry an id.
    pub fn mapped_count(&self) -> usize {
        self.results
            .values()
            .flat_map(|strings| strings.values())
            .filter(|id| id.is_some())
            .count()
    }

    /// Count provenance records by fetch type.
    pub fn fetch_type_counts(&self) -> HashMap<FetchType, usize> {
        let mut counts = HashMap::new();
        for metadata in self.meta.values() {
            *counts.entry(metadata.fetch_type).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> KeyCollection {
        KeyCollection::from_iter([(1, "a"), (1, "b"), (1, "c"), (2, "e"), (2, "f")])
    }

    #[test]
    fn test_add_key_result_records_id_and_meta() {
        let mut results = KeyResults::new();
        results.add_key_result(KeyResult::new(1, "a", Some(10)), Some(FetchType::CacheHit), None);

        assert_eq!(results.get(1).unwrap().get("a"), Some(&Some(10)));
        let meta = results.get_fetch_metadata().get("a").unwrap();
        assert_eq!(meta.id, Some(10));
        assert_eq!(meta.fetch_type, FetchType::CacheHit);
        assert_eq!(meta.fetch_type_ext, None);
    }

    #[test]
    fn test_add_key_result_without_fetch_type_skips_meta() {
        let mut results = KeyResults::new();
        results.add_key_result(KeyResult::new(1, "a", Some(10)), None, None);
        assert!(results.get_fetch_metadata().is_empty());
        assert_eq!(results.mapped_count(), 1);
    }

    #[test]
    fn test_add_key_results_last_write_wins() {
        let mut results = KeyResults::new();
        results.add_key_results(
            vec![KeyResult::new(1, "a", Some(1)), KeyResult::new(1, "a", Some(2))],
            Some(FetchType::DbRead),
            None,
        );
        assert_eq!(results.get(1).unwrap().get("a"), Some(&Some(2)));
        assert_eq!(results.get_fetch_metadata()["a"].id, Some(2));
    }

    #[test]
    fn test_get_unmapped_keys_returns_residual() {
        let mut results = KeyResults::new();
        results.add_key_results(
            vec![
                KeyResult::new(1, "a", Some(10)),
                KeyResult::new(1, "b", None),
                KeyResult::new(2, "e", Some(0)),
            ],
            None,
            None,
        );

        let unmapped = results.get_unmapped_keys(&keys());
        let mut tuples = unmapped.as_tuples();
        tuples.sort();
        assert_eq!(tuples, vec![(1, "b"), (1, "c"), (2, "e"), (2, "f")]);
    }

    #[test]
    fn test_get_unmapped_keys_is_empty_after_full_resolution() {
        let keys = keys();
        let mut results = KeyResults::new();
        results.add_key_results(
            keys.as_tuples()
                .into_iter()
                .enumerate()
                .map(|(i, (org_id, s))| KeyResult::new(org_id, s, Some(i as u64 + 1))),
            Some(FetchType::FirstSeen),
            None,
        );
        assert!(results.get_unmapped_keys(&keys).is_empty());
    }

    #[test]
    fn test_get_unmapped_keys_vivifies_orgs() {
        let mut results = KeyResults::new();
        let unmapped = results.get_unmapped_keys(&KeyCollection::from_iter([(7, "x")]));
        assert_eq!(unmapped.size(), 1);
        assert_eq!(results.results().get(&7), Some(&OrgResults::new()));
        assert!(results.get_mapped_results().is_empty());
    }

    #[test]
    fn test_org_results_vivifies_unseen_org() {
        let mut results = KeyResults::new();
        assert!(results.org_results(3).is_empty());
        assert!(results.results().contains_key(&3));
        assert!(results.get(4).is_none());
        assert!(!results.results().contains_key(&4));
    }

    #[test]
    fn test_get_mapped_results_drops_empty_orgs() {
        let mut results = KeyResults::new();
        results.org_results_mut(9);
        results.add_key_result(KeyResult::new(1, "a", None), None, None);

        let mapped = results.get_mapped_results();
        assert_eq!(mapped.len(), 1);
        assert_eq!(mapped[&1].get("a"), Some(&None));
    }

    #[test]
    fn test_get_mapped_key_strings_to_ints_skips_absent_ids() {
        let mut results = KeyResults::new();
        results.add_key_results(
            vec![
                KeyResult::new(1, "a", Some(10)),
                KeyResult::new(1, "b", Some(11)),
                KeyResult::new(1, "c", None),
                KeyResult::new(2, "e", Some(13)),
            ],
            None,
            None,
        );

        let flattened = results.get_mapped_key_strings_to_ints();
        let expected: HashMap<String, IndexId> = [("1:a", 10), ("1:b", 11), ("2:e", 13)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(flattened, expected);
    }

    #[test]
    fn test_merge_results_favor_receiver_meta_favors_argument() {
        let mut a = KeyResults::new();
        a.add_key_result(KeyResult::new(1, "x", Some(5)), Some(FetchType::CacheHit), None);
        let mut b = KeyResults::new();
        b.add_key_result(KeyResult::new(1, "x", Some(9)), Some(FetchType::DbRead), None);

        let merged = a.merge(&b);
        let expected: HashMap<OrgId, OrgResults> =
            [(1, [("x".to_string(), Some(5))].into_iter().collect())]
                .into_iter()
                .collect();
        assert_eq!(merged.results(), &expected);
        assert_eq!(merged.get_fetch_metadata()["x"].fetch_type, FetchType::DbRead);
        assert_eq!(merged.get_fetch_metadata()["x"].id, Some(9));
    }

    #[test]
    fn test_merge_does_not_mutate_inputs() {
        let mut a = KeyResults::new();
        a.add_key_result(KeyResult::new(1, "a", Some(1)), Some(FetchType::CacheHit), None);
        let mut b = KeyResults::new();
        b.add_key_result(KeyResult::new(2, "b", Some(2)), Some(FetchType::DbRead), None);
        let (a_before, b_before) = (a.clone(), b.clone());

        let merged = a.merge(&b);
        assert_eq!(a, a_before);
        assert_eq!(b, b_before);
        assert_eq!(merged.mapped_count(), 2);
        assert_eq!(merged.get_fetch_metadata().len(), 2);
    }

    #[test]
    fn test_meta_collides_across_orgs() {
        let mut results = KeyResults::new();
        results.add_key_result(KeyResult::new(1, "a", Some(1)), Some(FetchType::CacheHit), None);
        results.add_key_result(
            KeyResult::new(2, "a", None),
            Some(FetchType::RateLimited),
            Some(FetchTypeExt { is_global: false }),
        );

        assert_eq!(results.get_fetch_metadata().len(), 1);
        assert_eq!(results.get_fetch_metadata()["a"].fetch_type, FetchType::RateLimited);
        assert_eq!(results.get(1).unwrap()["a"], Some(1));
    }

    #[test]
    fn test_fetch_type_counts() {
        let mut results = KeyResults::new();
        results.add_key_results(
            vec![KeyResult::new(1, "a", Some(1)), KeyResult::new(1, "b", Some(2))],
            Some(FetchType::DbRead),
            None,
        );
        results.add_key_result(KeyResult::new(1, "c", Some(3)), Some(FetchType::FirstSeen), None);

        let counts = results.fetch_type_counts();
        assert_eq!(counts[&FetchType::DbRead], 2);
        assert_eq!(counts[&FetchType::FirstSeen], 1);
        assert!(!counts.contains_key(&FetchType::CacheHit));
    }

    #[test]
    fn test_metadata_serializes_compactly() {
        let meta = Metadata {
            id: Some(4),
            fetch_type: FetchType::Hardcoded,
            fetch_type_ext: Some(FetchTypeExt { is_global: true }),
        };
        let json = serde_json::to_value(meta).unwrap();
        assert_eq!(json["fetch_type"], "h");
        assert_eq!(json["fetch_type_ext"]["is_global"], true);
    }
}
