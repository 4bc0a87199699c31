//! Rate limiting of first-seen string creation.
//!
//! Each use case has one quota per org and one quota shared by every org.
//! A key must pass both to be created. Denied keys are surfaced with an
//! absent id instead of failing the batch.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use strindex_core::{IndexerConfig, KeyCollection, KeyResult, OrgId, UseCaseKey};

/// `check_writes` calls between sweeps of idle org limiters.
const RETAIN_RECENT_EVERY: u64 = 1024;

/// Result of [`WritesLimiter::check_writes`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LimitOutcome {
    /// Keys allowed to be created.
    pub granted: KeyCollection,
    /// Denied keys with an absent id, paired with `is_global`: true when
    /// the shared quota denied the key, false for the org's own quota.
    pub rate_limited: Vec<(KeyResult, bool)>,
}

impl LimitOutcome {
    /// Keys denied by their org's quota.
    pub fn org_limited(&self) -> impl Iterator<Item = &KeyResult> {
        self.rate_limited
            .iter()
            .filter(|(_, is_global)| !is_global)
            .map(|(key, _)| key)
    }

    /// Keys denied by the shared quota.
    pub fn global_limited(&self) -> impl Iterator<Item = &KeyResult> {
        self.rate_limited
            .iter()
            .filter(|(_, is_global)| *is_global)
            .map(|(key, _)| key)
    }
}

/// Per-org and global creation quotas, one set per use case.
///
/// Both quotas are governor keyed limiters over a dashmap state store. Org
/// state whose quota has fully replenished is dropped every
/// `RETAIN_RECENT_EVERY` checks, so memory follows the number of orgs
/// writing recently rather than every org ever seen.
pub struct WritesLimiter {
    enabled: bool,
    per_org_per_minute: NonZeroU32,
    global_per_minute: NonZeroU32,
    org_limiter: DefaultKeyedRateLimiter<(UseCaseKey, OrgId)>,
    global_limiter: DefaultKeyedRateLimiter<UseCaseKey>,
    checks: AtomicU64,
}

impl std::fmt::Debug for WritesLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WritesLimiter")
            .field("enabled", &self.enabled)
            .field("per_org_per_minute", &self.per_org_per_minute)
            .field("global_per_minute", &self.global_per_minute)
            .field("tracked_orgs", &self.org_limiter.len())
            .finish()
    }
}

impl WritesLimiter {
    /// Create a limiter. Zero quotas are raised to one.
    pub fn new(per_org_per_minute: u32, global_per_minute: u32) -> Self {
        let per_org_per_minute = NonZeroU32::new(per_org_per_minute).unwrap_or(NonZeroU32::MIN);
        let global_per_minute = NonZeroU32::new(global_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            enabled: true,
            per_org_per_minute,
            global_per_minute,
            org_limiter: RateLimiter::dashmap(Quota::per_minute(per_org_per_minute)),
            global_limiter: RateLimiter::dashmap(Quota::per_minute(global_per_minute)),
            checks: AtomicU64::new(0),
        }
    }

    /// A limiter that grants everything.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(1, 1)
        }
    }

    pub fn from_config(config: &IndexerConfig) -> Self {
        if config.writes_limit_enabled {
            Self::new(
                config.writes_per_org_per_minute,
                config.writes_global_per_minute,
            )
        } else {
            Self::disabled()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of (use case, org) pairs with limiter state.
    pub fn tracked_orgs(&self) -> usize {
        self.org_limiter.len()
    }

    /// Drop limiter state that is indistinguishable from a fresh quota.
    pub fn retain_recent(&self) {
        self.org_limiter.retain_recent();
        self.org_limiter.shrink_to_fit();
    }

    /// Split `keys` into keys allowed to be created and rate limited keys.
    ///
    /// Each granted key consumes one unit of its org's quota and one unit
    /// of the shared quota. The org quota is checked first.
    pub fn check_writes(&self, use_case_id: UseCaseKey, keys: &KeyCollection) -> LimitOutcome {
        if !self.enabled || keys.is_empty() {
            return LimitOutcome {
                granted: keys.clone(),
                rate_limited: Vec::new(),
            };
        }

        let checks = self.checks.fetch_add(1, Ordering::Relaxed) + 1;
        if checks % RETAIN_RECENT_EVERY == 0 {
            self.retain_recent();
        }

        let mut granted = Vec::with_capacity(keys.size());
        let mut rate_limited = Vec::new();

        for (org_id, string) in keys.as_tuples() {
            if self.org_limiter.check_key(&(use_case_id, org_id)).is_err() {
                rate_limited.push((KeyResult::new(org_id, string, None), false));
            } else if self.global_limiter.check_key(&use_case_id).is_err() {
                rate_limited.push((KeyResult::new(org_id, string, None), true));
            } else {
                granted.push((org_id, string));
            }
        }

        if !rate_limited.is_empty() {
            tracing::debug!(
                use_case = %use_case_id,
                granted = granted.len(),
                rate_limited = rate_limited.len(),
                "writes limit reached"
            );
        }

        LimitOutcome {
            granted: granted.into_iter().collect(),
            rate_limited,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn org_keys(org_id: OrgId, count: usize) -> KeyCollection {
        (0..count).map(|i| (org_id, format!("tag-{}", i))).collect()
    }

    #[test]
    fn test_disabled_limiter_grants_everything() {
        let limiter = WritesLimiter::disabled();
        let keys = org_keys(1, 50);
        let outcome = limiter.check_writes(UseCaseKey::ReleaseHealth, &keys);
        assert_eq!(outcome.granted, keys);
        assert!(outcome.rate_limited.is_empty());
    }

    #[test]
    fn test_per_org_quota() {
        let limiter = WritesLimiter::new(3, 100);
        let outcome = limiter.check_writes(UseCaseKey::ReleaseHealth, &org_keys(1, 5));

        assert_eq!(outcome.granted.size(), 3);
        assert_eq!(outcome.rate_limited.len(), 2);
        assert_eq!(outcome.org_limited().count(), 2);
        assert!(outcome.rate_limited.iter().all(|(key, _)| key.id.is_none()));
    }

    #[test]
    fn test_orgs_have_separate_quotas() {
        let limiter = WritesLimiter::new(2, 100);
        let _ = limiter.check_writes(UseCaseKey::ReleaseHealth, &org_keys(1, 2));

        let outcome = limiter.check_writes(UseCaseKey::ReleaseHealth, &org_keys(2, 2));
        assert_eq!(outcome.granted.size(), 2);
        assert!(outcome.rate_limited.is_empty());
    }

    #[test]
    fn test_global_quota_marks_is_global() {
        let limiter = WritesLimiter::new(10, 10);
        let _ = limiter.check_writes(UseCaseKey::Performance, &org_keys(1, 10));

        let outcome = limiter.check_writes(UseCaseKey::Performance, &org_keys(2, 3));
        assert!(outcome.granted.is_empty());
        assert_eq!(outcome.global_limited().count(), 3);
        assert_eq!(outcome.org_limited().count(), 0);
    }

    #[test]
    fn test_use_cases_have_separate_quotas() {
        let limiter = WritesLimiter::new(2, 2);
        let _ = limiter.check_writes(UseCaseKey::ReleaseHealth, &org_keys(1, 2));

        let outcome = limiter.check_writes(UseCaseKey::Performance, &org_keys(1, 2));
        assert_eq!(outcome.granted.size(), 2);
    }

    #[test]
    fn test_from_config() {
        let enabled = WritesLimiter::from_config(&IndexerConfig::new().with_writes_limits(5, 50));
        assert!(enabled.is_enabled());

        let disabled = WritesLimiter::from_config(&IndexerConfig::new().without_writes_limit());
        assert!(!disabled.is_enabled());
    }

    #[test]
    fn test_tracked_orgs_and_retain_recent() {
        let limiter = WritesLimiter::new(1, 100);
        for org_id in 1..=5 {
            let _ = limiter.check_writes(UseCaseKey::ReleaseHealth, &org_keys(org_id, 1));
        }
        assert_eq!(limiter.tracked_orgs(), 5);

        // Exhausted quotas are still in use and survive a sweep.
        limiter.retain_recent();
        let outcome = limiter.check_writes(UseCaseKey::ReleaseHealth, &org_keys(1, 1));
        assert_eq!(outcome.org_limited().count(), 1);
    }

    #[test]
    fn test_disabled_limiter_tracks_nothing() {
        let limiter = WritesLimiter::disabled();
        let _ = limiter.check_writes(UseCaseKey::ReleaseHealth, &org_keys(1, 3));
        assert_eq!(limiter.tracked_orgs(), 0);
    }
}
