//! Prometheus Metrics Definitions
//!
//! Fetch provenance, batch latency and cache tier failures, registered once
//! in the default registry.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use strindex_core::{FetchType, IndexerResult, TelemetryError, UseCaseKey};

/// `bulk_record` latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s
const BULK_RECORD_LATENCY_BUCKETS: &[f64] =
    &[0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0];

/// Global metrics instance - initialized on first use
pub static METRICS: Lazy<IndexerResult<IndexerMetrics>> = Lazy::new(IndexerMetrics::new);

/// Container for all indexer metrics.
#[derive(Clone)]
pub struct IndexerMetrics {
    /// Resolved keys - labels: use_case, fetch_type
    pub fetch_total: CounterVec,

    /// `bulk_record` duration histogram - labels: use_case
    pub bulk_record_duration_seconds: HistogramVec,

    /// Swallowed cache failures - labels: operation
    pub cache_errors_total: CounterVec,
}

impl IndexerMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> IndexerResult<Self> {
        Ok(Self {
            fetch_total: register_counter_vec!(
                "strindex_fetch_total",
                "Total number of keys resolved, by tier",
                &["use_case", "fetch_type"]
            )
            .map_err(|e| registration_error("strindex_fetch_total", e))?,

            bulk_record_duration_seconds: register_histogram_vec!(
                "strindex_bulk_record_duration_seconds",
                "bulk_record duration in seconds",
                &["use_case"],
                BULK_RECORD_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| registration_error("strindex_bulk_record_duration_seconds", e))?,

            cache_errors_total: register_counter_vec!(
                "strindex_cache_errors_total",
                "Total number of cache tier failures that were ignored",
                &["operation"]
            )
            .map_err(|e| registration_error("strindex_cache_errors_total", e))?,
        })
    }

    /// Record `count` keys resolved by one tier.
    pub fn record_fetch(&self, use_case_id: UseCaseKey, fetch_type: FetchType, count: usize) {
        if count == 0 {
            return;
        }
        self.fetch_total
            .with_label_values(&[use_case_id.as_str(), fetch_type.label()])
            .inc_by(count as f64);
    }

    pub fn observe_bulk_record(&self, use_case_id: UseCaseKey, duration_secs: f64) {
        self.bulk_record_duration_seconds
            .with_label_values(&[use_case_id.as_str()])
            .observe(duration_secs);
    }

    pub fn record_cache_error(&self, operation: &str) {
        self.cache_errors_total.with_label_values(&[operation]).inc();
    }
}

fn registration_error(name: &str, e: prometheus::Error) -> strindex_core::IndexerError {
    TelemetryError::Registration {
        name: name.to_string(),
        reason: e.to_string(),
    }
    .into()
}

/// Run `f` against the global metrics, if they registered.
pub fn with_metrics(f: impl FnOnce(&IndexerMetrics)) {
    if let Ok(metrics) = METRICS.as_ref() {
        f(metrics);
    }
}

/// Render the default registry in the Prometheus text format.
pub fn render() -> IndexerResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| registration_error("encode", e))?;
    String::from_utf8(buffer).map_err(|e| {
        TelemetryError::Registration {
            name: "encode".to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_metrics_register() {
        assert!(METRICS.as_ref().is_ok());
    }

    #[test]
    fn test_record_fetch_increments_counter() {
        let metrics = METRICS.as_ref().expect("metrics should register");
        let counter = metrics
            .fetch_total
            .with_label_values(&["performance", "hardcoded"]);
        let before = counter.get();

        metrics.record_fetch(UseCaseKey::Performance, FetchType::Hardcoded, 3);
        metrics.record_fetch(UseCaseKey::Performance, FetchType::Hardcoded, 0);

        assert!(counter.get() - before >= 3.0);
    }

    #[test]
    fn test_render_contains_metric_names() {
        with_metrics(|m| m.record_cache_error("get_many"));
        let text = render().expect("render should succeed");
        assert!(text.contains("strindex_cache_errors_total"));
    }

    #[test]
    fn test_double_registration_is_a_telemetry_error() {
        let _ = METRICS.as_ref();
        let err = IndexerMetrics::new().err().expect("second registration must fail");
        assert!(matches!(
            err,
            strindex_core::IndexerError::Telemetry(TelemetryError::Registration { .. })
        ));
    }
}
