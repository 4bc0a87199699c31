//! Indexer configuration
//!
//! Loaded from environment variables with sensible defaults for development.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{ConfigError, IndexerError, IndexerResult};

/// Tunables shared by the cache tier, the store and the writes limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Prefix of every physical cache key.
    pub cache_namespace: String,
    /// TTL applied to every cache write.
    pub cache_ttl: Duration,
    /// A store entry is only re-touched once its `last_seen` is older than this.
    pub stale_after: Duration,
    /// Entries not seen for this long are eligible for purging.
    pub retention: Duration,

    /// Whether creation of new strings is rate limited.
    pub writes_limit_enabled: bool,
    /// New strings one org may create per use case per minute.
    pub writes_per_org_per_minute: u32,
    /// New strings all orgs together may create per use case per minute.
    pub writes_global_per_minute: u32,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            cache_namespace: "strindex".to_string(),
            cache_ttl: Duration::from_secs(2 * 3600),
            stale_after: Duration::from_secs(12 * 3600),
            retention: Duration::from_secs(90 * 86400),
            writes_limit_enabled: true,
            writes_per_org_per_minute: 10_000,
            writes_global_per_minute: 100_000,
        }
    }
}

impl IndexerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an IndexerConfig from environment variables.
    ///
    /// Environment variables:
    /// - `STRINDEX_CACHE_NAMESPACE`: cache key prefix (default: "strindex")
    /// - `STRINDEX_CACHE_TTL_SECS`: cache entry TTL (default: 7200)
    /// - `STRINDEX_STALE_AFTER_SECS`: last_seen touch threshold (default: 43200)
    /// - `STRINDEX_RETENTION_DAYS`: retention of unseen entries (default: 90)
    /// - `STRINDEX_WRITES_LIMIT_ENABLED`: "true" or "false" (default: true)
    /// - `STRINDEX_WRITES_PER_ORG_PER_MINUTE`: per-org creation quota (default: 10000)
    /// - `STRINDEX_WRITES_GLOBAL_PER_MINUTE`: global creation quota (default: 100000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cache_namespace = std::env::var("STRINDEX_CACHE_NAMESPACE")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.cache_namespace);

        let cache_ttl = env_secs("STRINDEX_CACHE_TTL_SECS").unwrap_or(defaults.cache_ttl);

        let stale_after = env_secs("STRINDEX_STALE_AFTER_SECS").unwrap_or(defaults.stale_after);

        let retention = std::env::var("STRINDEX_RETENTION_DAYS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(days_to_duration)
            .unwrap_or(defaults.retention);

        let writes_limit_enabled = std::env::var("STRINDEX_WRITES_LIMIT_ENABLED")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(defaults.writes_limit_enabled);

        let writes_per_org_per_minute = std::env::var("STRINDEX_WRITES_PER_ORG_PER_MINUTE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.writes_per_org_per_minute);

        let writes_global_per_minute = std::env::var("STRINDEX_WRITES_GLOBAL_PER_MINUTE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.writes_global_per_minute);

        Self {
            cache_namespace,
            cache_ttl,
            stale_after,
            retention,
            writes_limit_enabled,
            writes_per_org_per_minute,
            writes_global_per_minute,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.cache_namespace = namespace.into();
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_stale_after(mut self, duration: Duration) -> Self {
        self.stale_after = duration;
        self
    }

    pub fn with_retention(mut self, duration: Duration) -> Self {
        self.retention = duration;
        self
    }

    /// Set both creation quotas and enable the limiter.
    pub fn with_writes_limits(mut self, per_org_per_minute: u32, global_per_minute: u32) -> Self {
        self.writes_limit_enabled = true;
        self.writes_per_org_per_minute = per_org_per_minute;
        self.writes_global_per_minute = global_per_minute;
        self
    }

    pub fn without_writes_limit(mut self) -> Self {
        self.writes_limit_enabled = false;
        self
    }

    /// Validate the configuration.
    ///
    /// Returns Ok(()) if valid, Err(IndexerError::Config) if invalid.
    pub fn validate(&self) -> IndexerResult<()> {
        if self.cache_namespace.trim().is_empty() {
            return Err(IndexerError::Config(ConfigError::MissingRequired {
                field: "cache_namespace".to_string(),
            }));
        }

        if self.cache_ttl.is_zero() {
            return Err(invalid("cache_ttl", format!("{:?}", self.cache_ttl), "must be positive"));
        }

        if self.retention <= self.stale_after {
            return Err(invalid(
                "retention",
                format!("{:?}", self.retention),
                "must be longer than stale_after",
            ));
        }

        if self.writes_limit_enabled {
            if self.writes_per_org_per_minute == 0 {
                return Err(invalid(
                    "writes_per_org_per_minute",
                    "0".to_string(),
                    "must be positive when the writes limit is enabled",
                ));
            }
            if self.writes_global_per_minute < self.writes_per_org_per_minute {
                return Err(invalid(
                    "writes_global_per_minute",
                    self.writes_global_per_minute.to_string(),
                    "must be at least writes_per_org_per_minute",
                ));
            }
        }

        Ok(())
    }
}

fn days_to_duration(days: u64) -> Duration {
    Duration::from_secs(days.saturating_mul(86_400))
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn invalid(field: &str, value: String, reason: &str) -> IndexerError {
    IndexerError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value,
        reason: reason.to_string(),
    })
}
