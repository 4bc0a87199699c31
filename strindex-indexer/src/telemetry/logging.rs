//! Tracing subscriber initialization.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use strindex_core::{IndexerResult, TelemetryError};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line, for log shippers.
    Json,
    /// Human readable output.
    Pretty,
}

/// Logging configuration from environment variables.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Output format
    pub format: LogFormat,
    /// Filter directives used when `RUST_LOG` is not set
    pub default_filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            default_filter: "strindex_indexer=info,strindex_storage=info,warn".to_string(),
        }
    }
}

impl LogConfig {
    /// Reads `STRINDEX_LOG_FORMAT` (`json` or `pretty`) and
    /// `STRINDEX_LOG_FILTER`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            format: match std::env::var("STRINDEX_LOG_FORMAT").as_deref() {
                Ok("pretty") => LogFormat::Pretty,
                _ => defaults.format,
            },
            default_filter: std::env::var("STRINDEX_LOG_FILTER")
                .unwrap_or(defaults.default_filter),
        }
    }
}

/// Install the global tracing subscriber.
///
/// Call once at startup. `RUST_LOG` takes precedence over the configured
/// default filter.
pub fn init_logging(config: &LogConfig) -> IndexerResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };

    result.map_err(|e| TelemetryError::Registration {
        name: "tracing_subscriber".to_string(),
        reason: e.to_string(),
    })?;

    tracing::info!(format = ?config.format, "Logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.default_filter.contains("strindex_indexer"));
    }
}
