//! Static table of well-known strings.
//!
//! Strings that show up in nearly every metric (tag keys such as
//! `environment`, session statuses, metric names) never reach the store:
//! they resolve from this table with fixed ids. Every built-in id is at or
//! above [`STATIC_ID_PREFIX`], a range stores never hand out.

use std::collections::HashMap;

use strindex_core::{IndexId, KeyCollection, KeyResult, UseCaseKey};

/// Lowest id of the static range.
pub const STATIC_ID_PREFIX: IndexId = 1 << 63;

/// Tag keys and values shared by every use case.
const GLOBAL_STRINGS: &[&str] = &[
    "environment",
    "release",
    "session.status",
    "transaction",
    "transaction.status",
    "transaction.op",
    "http.method",
    "http.status_code",
    "browser.name",
    "os.name",
    "geo.country_code",
    "platform",
    "production",
    "staging",
    "init",
    "crashed",
    "abnormal",
    "errored",
    "errored_preaggr",
    "exited",
    "healthy",
    "ok",
    "cancelled",
    "unknown",
    "internal_error",
];

/// Metric names only meaningful to release health.
const RELEASE_HEALTH_STRINGS: &[&str] = &[
    "c:sessions/session@none",
    "s:sessions/user@none",
    "s:sessions/error@none",
    "d:sessions/duration@second",
];

/// Metric names only meaningful to performance.
const PERFORMANCE_STRINGS: &[&str] = &[
    "d:transactions/duration@millisecond",
    "s:transactions/user@none",
    "c:transactions/count_per_root_project@none",
    "d:transactions/measurements.lcp@millisecond",
    "d:transactions/measurements.fcp@millisecond",
    "d:transactions/measurements.fid@millisecond",
    "d:transactions/measurements.cls@none",
    "d:transactions/measurements.ttfb@millisecond",
];

const RELEASE_HEALTH_OFFSET: IndexId = 1_000;
const PERFORMANCE_OFFSET: IndexId = 2_000;

/// Lookup-only mapping from strings to fixed ids.
///
/// Global entries are shared by every use case and every org and report
/// `is_global = true`. Scoped entries belong to one use case and take
/// precedence over a global entry for the same string.
#[derive(Debug, Clone, Default)]
pub struct HardcodedTable {
    global: HashMap<String, IndexId>,
    scoped: HashMap<UseCaseKey, HashMap<String, IndexId>>,
    global_reverse: HashMap<IndexId, String>,
    scoped_reverse: HashMap<UseCaseKey, HashMap<IndexId, String>>,
}

impl HardcodedTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in table of well-known strings.
    pub fn shared_strings() -> Self {
        let mut table = Self::new();
        for (offset, string) in (1..).zip(GLOBAL_STRINGS) {
            table = table.with_global(*string, STATIC_ID_PREFIX + offset);
        }
        for (offset, string) in (1..).zip(RELEASE_HEALTH_STRINGS) {
            table = table.with_scoped(
                UseCaseKey::ReleaseHealth,
                *string,
                STATIC_ID_PREFIX + RELEASE_HEALTH_OFFSET + offset,
            );
        }
        for (offset, string) in (1..).zip(PERFORMANCE_STRINGS) {
            table = table.with_scoped(
                UseCaseKey::Performance,
                *string,
                STATIC_ID_PREFIX + PERFORMANCE_OFFSET + offset,
            );
        }
        table
    }

    pub fn with_global(mut self, string: impl Into<String>, id: IndexId) -> Self {
        let string = string.into();
        self.global_reverse.insert(id, string.clone());
        self.global.insert(string, id);
        self
    }

    pub fn with_scoped(
        mut self,
        use_case_id: UseCaseKey,
        string: impl Into<String>,
        id: IndexId,
    ) -> Self {
        let string = string.into();
        self.scoped_reverse
            .entry(use_case_id)
            .or_default()
            .insert(id, string.clone());
        self.scoped.entry(use_case_id).or_default().insert(string, id);
        self
    }

    /// Resolve a string to `(id, is_global)`.
    pub fn lookup(&self, use_case_id: UseCaseKey, string: &str) -> Option<(IndexId, bool)> {
        if let Some(id) = self
            .scoped
            .get(&use_case_id)
            .and_then(|strings| strings.get(string))
        {
            return Some((*id, false));
        }
        self.global.get(string).map(|id| (*id, true))
    }

    pub fn reverse_lookup(&self, use_case_id: UseCaseKey, id: IndexId) -> Option<&str> {
        self.scoped_reverse
            .get(&use_case_id)
            .and_then(|ids| ids.get(&id))
            .or_else(|| self.global_reverse.get(&id))
            .map(String::as_str)
    }

    /// Resolve every key of a collection the table knows about.
    ///
    /// Results are grouped by `is_global` so callers can tag each group
    /// with its own provenance.
    pub fn lookup_collection(
        &self,
        use_case_id: UseCaseKey,
        keys: &KeyCollection,
    ) -> HardcodedMatches {
        let mut matches = HardcodedMatches::default();
        for (org_id, string) in keys.as_tuples() {
            match self.lookup(use_case_id, string) {
                Some((id, true)) => matches.global.push(KeyResult::new(org_id, string, Some(id))),
                Some((id, false)) => matches.scoped.push(KeyResult::new(org_id, string, Some(id))),
                None => {}
            }
        }
        matches
    }

    pub fn len(&self) -> usize {
        self.global.len() + self.scoped.values().map(HashMap::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keys resolved by [`HardcodedTable::lookup_collection`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HardcodedMatches {
    pub global: Vec<KeyResult>,
    pub scoped: Vec<KeyResult>,
}

impl HardcodedMatches {
    pub fn len(&self) -> usize {
        self.global.len() + self.scoped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_empty() && self.scoped.is_empty()
    }
}
