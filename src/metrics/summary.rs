//! Serializable snapshots of a run's aggregated metrics.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Snapshot of a rate metric: how many samples were true out of all samples.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RateStats {
    pub trues: u64,
    pub total: u64,
}

impl RateStats {
    /// Fraction of true samples in [0, 1]; 0 when nothing was recorded.
    pub fn rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.trues as f64 / self.total as f64
        }
    }
}

/// Snapshot of a trend metric, all values in milliseconds.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TrendStats {
    pub count: u64,
    pub avg: f64,
    pub min: f64,
    pub med: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
}

/// End-of-run (or mid-run) aggregate view of every built-in metric.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub started_at: DateTime<Utc>,
    pub elapsed_sec: f64,
    pub http_reqs: u64,
    /// Requests per second over the whole run.
    pub rps: f64,
    pub http_req_failed: RateStats,
    pub checks: RateStats,
    pub http_req_duration: TrendStats,
    pub iterations: u64,
    pub data_received: u64,
    pub peak_vus: u64,
}
