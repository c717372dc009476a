//! Built-in metrics and their aggregation.
//!
//! Metric names follow the conventional load-testing vocabulary so threshold
//! expressions read the same way they do in scenario scripts elsewhere:
//! `http_reqs`, `http_req_failed`, `http_req_duration`, `checks`,
//! `iterations`, `data_received`.

pub mod collector;
pub mod reporter;
pub mod summary;

pub use collector::Collector;
pub use summary::{RateStats, Summary, TrendStats};

pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const CHECKS: &str = "checks";
pub const ITERATIONS: &str = "iterations";
pub const DATA_RECEIVED: &str = "data_received";

/// How a metric aggregates its samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Monotonic total; `rate` means per-second throughput.
    Counter,
    /// Fraction of samples that were true.
    Rate,
    /// Distribution of millisecond timings.
    Trend,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Counter => write!(f, "counter"),
            MetricKind::Rate => write!(f, "rate"),
            MetricKind::Trend => write!(f, "trend"),
        }
    }
}

/// Kind of a built-in metric, or `None` for names this engine never emits.
pub fn metric_kind(name: &str) -> Option<MetricKind> {
    match name {
        HTTP_REQS | ITERATIONS | DATA_RECEIVED => Some(MetricKind::Counter),
        HTTP_REQ_FAILED | CHECKS => Some(MetricKind::Rate),
        HTTP_REQ_DURATION => Some(MetricKind::Trend),
        _ => None,
    }
}
