//! Keys to resolve and single-key resolutions.
//!
//! A key is an `(org_id, string)` pair, represented either as a tuple
//! `(1, "a")` or as the composite string `"1:a"`.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{IndexId, KeyParseError, OrgId};

/// Separator between org id and string in a composite key.
pub const COMPOSITE_SEPARATOR: char = ':';

/// Format the composite `"{org_id}:{string}"` form of a key.
pub fn composite_key(org_id: OrgId, string: &str) -> String {
    format!("{}{}{}", org_id, COMPOSITE_SEPARATOR, string)
}

// ============================================================================
// KEY COLLECTION
// ============================================================================

/// An immutable group of keys, partitioned by organization.
///
/// Initial mapping is org ids to sets of strings:
/// `{ 1: {"a", "b", "c"}, 2: {"e", "f"} }`
///
/// The size is computed once at construction. Flattened views are rebuilt on
/// every call and come back in no particular order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyCollection {
    mapping: HashMap<OrgId, HashSet<String>>,
    size: usize,
}

impl KeyCollection {
    pub fn new(mapping: HashMap<OrgId, HashSet<String>>) -> Self {
        let size = mapping.values().map(HashSet::len).sum();
        Self { mapping, size }
    }

    pub fn mapping(&self) -> &HashMap<OrgId, HashSet<String>> {
        &self.mapping
    }

    /// Total number of strings across all organizations.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn contains(&self, org_id: OrgId, string: &str) -> bool {
        self.mapping
            .get(&org_id)
            .is_some_and(|strings| strings.contains(string))
    }

    /// All keys as `(org_id, string)` pairs.
    pub fn as_tuples(&self) -> Vec<(OrgId, &str)> {
        let mut key_pairs = Vec::with_capacity(self.size);
        for (org_id, strings) in &self.mapping {
            key_pairs.extend(strings.iter().map(|string| (*org_id, string.as_str())));
        }
        key_pairs
    }

    /// All keys as composite strings, e.g. `"1:a"`.
    pub fn as_strings(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.size);
        for (org_id, strings) in &self.mapping {
            keys.extend(strings.iter().map(|string| composite_key(*org_id, string)));
        }
        keys
    }

    pub fn into_mapping(self) -> HashMap<OrgId, HashSet<String>> {
        self.mapping
    }
}

impl From<HashMap<OrgId, HashSet<String>>> for KeyCollection {
    fn from(mapping: HashMap<OrgId, HashSet<String>>) -> Self {
        Self::new(mapping)
    }
}

impl<S: Into<String>> FromIterator<(OrgId, S)> for KeyCollection {
    fn from_iter<I: IntoIterator<Item = (OrgId, S)>>(iter: I) -> Self {
        let mut mapping: HashMap<OrgId, HashSet<String>> = HashMap::new();
        for (org_id, string) in iter {
            mapping.entry(org_id).or_default().insert(string.into());
        }
        Self::new(mapping)
    }
}

// ============================================================================
// KEY RESULT
// ============================================================================

/// One resolved (or attempted) `(org_id, string) -> id` mapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyResult {
    pub org_id: OrgId,
    pub string: String,
    pub id: Option<IndexId>,
}

impl KeyResult {
    pub fn new(org_id: OrgId, string: impl Into<String>, id: Option<IndexId>) -> Self {
        Self {
            org_id,
            string: string.into(),
            id,
        }
    }

    /// Parse a composite key back into a result carrying `id`.
    ///
    /// Splits on the first separator only: the string part may itself
    /// contain `:`.
    pub fn from_string(key: &str, id: Option<IndexId>) -> Result<Self, KeyParseError> {
        let (org_part, string) =
            key.split_once(COMPOSITE_SEPARATOR)
                .ok_or_else(|| KeyParseError::MissingSeparator {
                    key: key.to_string(),
                })?;
        let org_id = org_part
            .parse::<OrgId>()
            .map_err(|e| KeyParseError::InvalidOrgId {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self::new(org_id, string, id))
    }

    pub fn composite_key(&self) -> String {
        composite_key(self.org_id, &self.string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_collection() -> KeyCollection {
        KeyCollection::from_iter([(1, "a"), (1, "b"), (1, "c"), (2, "e"), (2, "f")])
    }

    #[test]
    fn test_size_counts_all_orgs() {
        let collection = sample_collection();
        assert_eq!(collection.size(), 5);
        assert!(!collection.is_empty());
        assert!(KeyCollection::default().is_empty());
    }

    #[test]
    fn test_as_tuples_and_as_strings_cover_every_key() {
        let collection = sample_collection();

        let mut tuples = collection.as_tuples();
        tuples.sort();
        assert_eq!(tuples, vec![(1, "a"), (1, "b"), (1, "c"), (2, "e"), (2, "f")]);

        let mut strings = collection.as_strings();
        strings.sort();
        assert_eq!(strings, vec!["1:a", "1:b", "1:c", "2:e", "2:f"]);
    }

    #[test]
    fn test_from_iter_deduplicates() {
        let collection = KeyCollection::from_iter([(1, "a"), (1, "a"), (2, "a")]);
        assert_eq!(collection.size(), 2);
        assert!(collection.contains(1, "a"));
        assert!(collection.contains(2, "a"));
        assert!(!collection.contains(3, "a"));
    }

    #[test]
    fn test_from_string_parses_composite_key() {
        let result = KeyResult::from_string("1:a", Some(10)).unwrap();
        assert_eq!(result, KeyResult::new(1, "a", Some(10)));
    }

    #[test]
    fn test_from_string_splits_on_first_separator_only() {
        let result = KeyResult::from_string("42:release:1.0:abc", Some(7)).unwrap();
        assert_eq!(result.org_id, 42);
        assert_eq!(result.string, "release:1.0:abc");
        assert_eq!(result.composite_key(), "42:release:1.0:abc");
    }

    #[test]
    fn test_from_string_allows_empty_string_part() {
        let result = KeyResult::from_string("3:", None).unwrap();
        assert_eq!(result, KeyResult::new(3, "", None));
    }

    #[test]
    fn test_from_string_rejects_missing_separator() {
        let err = KeyResult::from_string("no-separator", Some(1)).unwrap_err();
        assert!(matches!(err, KeyParseError::MissingSeparator { .. }));
    }

    #[test]
    fn test_from_string_rejects_non_numeric_org() {
        let err = KeyResult::from_string("org:a", Some(1)).unwrap_err();
        assert!(matches!(err, KeyParseError::InvalidOrgId { .. }));
    }
}
