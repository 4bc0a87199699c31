//! Enum types shared across the indexer

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// USE CASES
// ============================================================================

/// Namespace partitioning metric string indexing by product area.
///
/// Every lookup and creation is scoped to one use case; the same string in
/// two use cases resolves to two independent ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum UseCaseKey {
    /// Session and user counts. Kept as the default for older callers, new
    /// callers should always pass the use case explicitly.
    #[default]
    ReleaseHealth,
    /// Transaction and span metrics.
    Performance,
}

impl UseCaseKey {
    /// All known use cases, in declaration order.
    pub const ALL: [UseCaseKey; 2] = [UseCaseKey::ReleaseHealth, UseCaseKey::Performance];

    /// Stable string form used in cache keys, table names and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            UseCaseKey::ReleaseHealth => "release-health",
            UseCaseKey::Performance => "performance",
        }
    }
}

impl fmt::Display for UseCaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for UseCaseKey {
    type Err = UseCaseParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "release-health" | "release_health" => Ok(UseCaseKey::ReleaseHealth),
            "performance" => Ok(UseCaseKey::Performance),
            _ => Err(UseCaseParseError(s.to_string())),
        }
    }
}

/// Error when parsing an unknown use case string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UseCaseParseError(pub String);

impl fmt::Display for UseCaseParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid use case: {}", self.0)
    }
}

impl std::error::Error for UseCaseParseError {}

// ============================================================================
// FETCH PROVENANCE
// ============================================================================

/// Which tier produced a resolution.
///
/// Serialized as a single-character discriminant for compact log and wire
/// representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FetchType {
    #[serde(rename = "c")]
    CacheHit,
    #[serde(rename = "h")]
    Hardcoded,
    #[serde(rename = "d")]
    DbRead,
    #[serde(rename = "f")]
    FirstSeen,
    #[serde(rename = "r")]
    RateLimited,
}

impl FetchType {
    pub const ALL: [FetchType; 5] = [
        FetchType::CacheHit,
        FetchType::Hardcoded,
        FetchType::DbRead,
        FetchType::FirstSeen,
        FetchType::RateLimited,
    ];

    pub fn as_char(&self) -> char {
        match self {
            FetchType::CacheHit => 'c',
            FetchType::Hardcoded => 'h',
            FetchType::DbRead => 'd',
            FetchType::FirstSeen => 'f',
            FetchType::RateLimited => 'r',
        }
    }

    pub fn from_char(c: char) -> Result<Self, FetchTypeParseError> {
        match c {
            'c' => Ok(FetchType::CacheHit),
            'h' => Ok(FetchType::Hardcoded),
            'd' => Ok(FetchType::DbRead),
            'f' => Ok(FetchType::FirstSeen),
            'r' => Ok(FetchType::RateLimited),
            _ => Err(FetchTypeParseError(c.to_string())),
        }
    }

    /// Human readable label, used for metric labels.
    pub fn label(&self) -> &'static str {
        match self {
            FetchType::CacheHit => "cache_hit",
            FetchType::Hardcoded => "hardcoded",
            FetchType::DbRead => "db_read",
            FetchType::FirstSeen => "first_seen",
            FetchType::RateLimited => "rate_limited",
        }
    }
}

impl fmt::Display for FetchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl FromStr for FetchType {
    type Err = FetchTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Self::from_char(c),
            _ => Err(FetchTypeParseError(s.to_string())),
        }
    }
}

/// Error when parsing an invalid fetch type discriminant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTypeParseError(pub String);

impl fmt::Display for FetchTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid fetch type: {}", self.0)
    }
}

impl std::error::Error for FetchTypeParseError {}
