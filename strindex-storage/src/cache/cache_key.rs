//! Physical cache key encoding.
//!
//! A `CacheKey` can only be built from a namespace, a use case and a
//! composite `"org_id:string"` key, so every physical key is scoped to one
//! use case by construction.

use sha2::{Digest, Sha256};
use strindex_core::UseCaseKey;

/// Separator between the segments of a physical key.
const SEPARATOR: char = ':';

/// Length of the hex-encoded SHA-256 digest segment.
const DIGEST_HEX_LEN: usize = 64;

/// A cache key scoped to a namespace and a use case.
///
/// # Format
///
/// `{namespace}:{use_case}:{sha256_hex(composite_key)}`
///
/// The composite key is hashed so that physical keys have a bounded length
/// no matter how long the tag string is (LMDB caps keys at 511 bytes).
/// Keys sort by namespace and use case first, so a prefix scan covers one
/// use case.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Private inner data - cannot be constructed externally
    inner: CacheKeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKeyInner {
    namespace: String,
    use_case: UseCaseKey,
    digest: String,
}

impl CacheKey {
    pub fn new(namespace: &str, use_case: UseCaseKey, composite_key: &str) -> Self {
        let digest = hex::encode(Sha256::digest(composite_key.as_bytes()));
        Self {
            inner: CacheKeyInner {
                namespace: namespace.to_string(),
                use_case,
                digest,
            },
        }
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    pub fn use_case(&self) -> UseCaseKey {
        self.inner.use_case
    }

    /// Encode to the string stored in the backend.
    pub fn encode(&self) -> String {
        let mut encoded = Self::use_case_prefix(&self.inner.namespace, self.inner.use_case);
        encoded.push_str(&self.inner.digest);
        encoded
    }

    /// Prefix shared by every key in one namespace.
    pub fn namespace_prefix(namespace: &str) -> String {
        format!("{}{}", namespace, SEPARATOR)
    }

    /// Prefix shared by every key of one use case in one namespace.
    pub fn use_case_prefix(namespace: &str, use_case: UseCaseKey) -> String {
        format!(
            "{}{}{}",
            Self::namespace_prefix(namespace),
            use_case.as_str(),
            SEPARATOR
        )
    }

    /// Length of any encoded key for this namespace and use case.
    pub fn encoded_len(namespace: &str, use_case: UseCaseKey) -> usize {
        Self::use_case_prefix(namespace, use_case).len() + DIGEST_HEX_LEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_format() {
        let key = CacheKey::new("strindex", UseCaseKey::ReleaseHealth, "1:a");
        let encoded = key.encode();

        assert!(encoded.starts_with("strindex:release-health:"));
        assert_eq!(encoded.len(), CacheKey::encoded_len("strindex", UseCaseKey::ReleaseHealth));
        assert_eq!(key.namespace(), "strindex");
        assert_eq!(key.use_case(), UseCaseKey::ReleaseHealth);
    }

    #[test]
    fn test_encode_is_deterministic() {
        let a = CacheKey::new("ns", UseCaseKey::Performance, "7:transaction");
        let b = CacheKey::new("ns", UseCaseKey::Performance, "7:transaction");
        assert_eq!(a, b);
        assert_eq!(a.encode(), b.encode());
    }

    #[test]
    fn test_use_cases_do_not_share_keys() {
        let a = CacheKey::new("ns", UseCaseKey::ReleaseHealth, "1:a");
        let b = CacheKey::new("ns", UseCaseKey::Performance, "1:a");
        assert_ne!(a.encode(), b.encode());
    }

    #[test]
    fn test_orgs_do_not_share_keys() {
        let a = CacheKey::new("ns", UseCaseKey::ReleaseHealth, "1:a");
        let b = CacheKey::new("ns", UseCaseKey::ReleaseHealth, "2:a");
        assert_ne!(a.encode(), b.encode());
    }

    #[test]
    fn test_namespace_prefix_is_delimited() {
        let key = CacheKey::new("ns2", UseCaseKey::ReleaseHealth, "1:a").encode();
        assert!(key.starts_with(&CacheKey::namespace_prefix("ns2")));
        assert!(!key.starts_with(&CacheKey::namespace_prefix("ns")));
    }

    #[test]
    fn test_long_strings_have_bounded_keys() {
        let long = format!("1:{}", "x".repeat(10_000));
        let key = CacheKey::new("ns", UseCaseKey::ReleaseHealth, &long);
        assert_eq!(key.encode().len(), CacheKey::encoded_len("ns", UseCaseKey::ReleaseHealth));
        assert!(key.encode().len() < 511);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn use_case_strategy() -> impl Strategy<Value = UseCaseKey> {
        prop::sample::select(UseCaseKey::ALL.to_vec())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Property: the use case prefix is a prefix of every key for that use case.
        #[test]
        fn prop_use_case_prefix_is_prefix(
            use_case in use_case_strategy(),
            org_id in any::<u64>(),
            string in ".*",
        ) {
            let composite = format!("{}:{}", org_id, string);
            let key = CacheKey::new("strindex", use_case, &composite);
            let prefix = CacheKey::use_case_prefix("strindex", use_case);
            prop_assert!(key.encode().starts_with(&prefix));
        }

        /// Property: distinct composite keys produce distinct physical keys.
        #[test]
        fn prop_distinct_composites_distinct_keys(
            a in "[0-9]{1,3}:[a-z:]{0,8}",
            b in "[0-9]{1,3}:[a-z:]{0,8}",
        ) {
            let key_a = CacheKey::new("ns", UseCaseKey::ReleaseHealth, &a);
            let key_b = CacheKey::new("ns", UseCaseKey::ReleaseHealth, &b);
            if a == b {
                prop_assert_eq!(key_a.encode(), key_b.encode());
            } else {
                prop_assert_ne!(key_a.encode(), key_b.encode());
            }
        }
    }
}
