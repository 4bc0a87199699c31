//! Logging and metrics.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use metrics::{render as render_metrics, IndexerMetrics, METRICS};
