//! Thread-safe metric collection shared by every virtual user.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use hdrhistogram::Histogram;
use parking_lot::RwLock;

use super::summary::{RateStats, Summary, TrendStats};
use crate::request::RequestOutcome;

/// Duration samples are recorded in microseconds. Ten minutes of headroom
/// exceeds any configurable request timeout.
const TREND_HIGH_MICROS: u64 = 600_000_000;

/// Shared collector for one run. Cheap to clone; all clones feed the same
/// counters and histogram.
#[derive(Clone)]
pub struct Collector {
    inner: Arc<Inner>,
}

struct Inner {
    http_reqs: AtomicU64,
    http_req_failed: AtomicU64,
    iterations: AtomicU64,
    data_received: AtomicU64,
    checks_passed: AtomicU64,
    checks_failed: AtomicU64,
    active_vus: AtomicU64,
    peak_vus: AtomicU64,
    durations_micros: RwLock<Histogram<u64>>,
    started: Instant,
    started_at: DateTime<Utc>,
}

impl Collector {
    pub fn new() -> Self {
        // 3 significant digits of precision for latency percentiles.
        let hist = Histogram::new_with_bounds(1, TREND_HIGH_MICROS, 3)
            .expect("failed to create latency histogram");
        Self {
            inner: Arc::new(Inner {
                http_reqs: AtomicU64::new(0),
                http_req_failed: AtomicU64::new(0),
                iterations: AtomicU64::new(0),
                data_received: AtomicU64::new(0),
                checks_passed: AtomicU64::new(0),
                checks_failed: AtomicU64::new(0),
                active_vus: AtomicU64::new(0),
                peak_vus: AtomicU64::new(0),
                durations_micros: RwLock::new(hist),
                started: Instant::now(),
                started_at: Utc::now(),
            }),
        }
    }

    /// Record one request outcome: the request count, the failure rate
    /// sample, the byte count, any latency sample, and every check result.
    pub fn record(&self, outcome: &RequestOutcome) {
        self.inner.http_reqs.fetch_add(1, Ordering::Relaxed);
        if !outcome.passed {
            self.inner.http_req_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.inner
            .data_received
            .fetch_add(outcome.bytes_received, Ordering::Relaxed);

        if let Some(latency) = outcome.latency {
            let micros = (latency.as_micros() as u64).clamp(1, TREND_HIGH_MICROS);
            let mut hist = self.inner.durations_micros.write();
            let _ = hist.record(micros);
        }

        for check in &outcome.checks {
            if check.passed {
                self.inner.checks_passed.fetch_add(1, Ordering::Relaxed);
            } else {
                self.inner.checks_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn iteration_completed(&self) {
        self.inner.iterations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn vu_started(&self) {
        let now = self.inner.active_vus.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner.peak_vus.fetch_max(now, Ordering::Relaxed);
    }

    pub fn vu_stopped(&self) {
        self.inner.active_vus.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_vus(&self) -> u64 {
        self.inner.active_vus.load(Ordering::Relaxed)
    }

    pub fn http_reqs(&self) -> u64 {
        self.inner.http_reqs.load(Ordering::Relaxed)
    }

    pub fn iterations(&self) -> u64 {
        self.inner.iterations.load(Ordering::Relaxed)
    }

    pub fn data_received(&self) -> u64 {
        self.inner.data_received.load(Ordering::Relaxed)
    }

    pub fn failed_stats(&self) -> RateStats {
        RateStats {
            trues: self.inner.http_req_failed.load(Ordering::Relaxed),
            total: self.inner.http_reqs.load(Ordering::Relaxed),
        }
    }

    pub fn check_stats(&self) -> RateStats {
        let passed = self.inner.checks_passed.load(Ordering::Relaxed);
        let failed = self.inner.checks_failed.load(Ordering::Relaxed);
        RateStats {
            trues: passed,
            total: passed + failed,
        }
    }

    /// Duration at `quantile` (0.0 ..= 1.0) in milliseconds.
    pub fn duration_quantile_ms(&self, quantile: f64) -> f64 {
        let hist = self.inner.durations_micros.read();
        if hist.is_empty() {
            return 0.0;
        }
        hist.value_at_quantile(quantile) as f64 / 1000.0
    }

    pub fn duration_stats(&self) -> TrendStats {
        let hist = self.inner.durations_micros.read();
        if hist.is_empty() {
            return TrendStats::default();
        }
        TrendStats {
            count: hist.len(),
            avg: hist.mean() / 1000.0,
            min: hist.min() as f64 / 1000.0,
            med: hist.value_at_quantile(0.50) as f64 / 1000.0,
            p90: hist.value_at_quantile(0.90) as f64 / 1000.0,
            p95: hist.value_at_quantile(0.95) as f64 / 1000.0,
            p99: hist.value_at_quantile(0.99) as f64 / 1000.0,
            max: hist.max() as f64 / 1000.0,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.inner.started.elapsed()
    }

    pub fn summary(&self) -> Summary {
        let elapsed = self.elapsed().as_secs_f64();
        let http_reqs = self.http_reqs();
        let rps = if elapsed > 0.0 {
            http_reqs as f64 / elapsed
        } else {
            0.0
        };
        Summary {
            started_at: self.inner.started_at,
            elapsed_sec: elapsed,
            http_reqs,
            rps,
            http_req_failed: self.failed_stats(),
            checks: self.check_stats(),
            http_req_duration: self.duration_stats(),
            iterations: self.iterations(),
            data_received: self.data_received(),
            peak_vus: self.inner.peak_vus.load(Ordering::Relaxed),
        }
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}
