//! Threshold expressions over aggregated metrics.
//!
//! A threshold binds one metric to a pass/fail expression such as
//! `rate<0.01` or `p(99)<1000`. Expressions are parsed up front so a bad
//! options file fails before any load is generated, and evaluated against
//! the full aggregated stream, never against individual requests.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::metrics::{metric_kind, Collector, MetricKind};

#[derive(Debug, Error)]
pub enum ThresholdError {
    #[error("unknown metric '{0}'")]
    UnknownMetric(String),
    #[error("malformed threshold expression '{0}': expected <aggregation><op><number>")]
    Malformed(String),
    #[error("invalid percentile in '{0}': must be between 0 and 100")]
    BadPercentile(String),
    #[error("aggregation '{agg}' is not supported for {kind} metric '{metric}'")]
    IncompatibleAggregation {
        agg: String,
        kind: MetricKind,
        metric: String,
    },
}

// ---------------------------------------------------------------------------
// Expression grammar: <aggregation> <op> <number>
// ---------------------------------------------------------------------------

/// How the metric stream is reduced to the single value an expression tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregate {
    /// Rate metrics: fraction of true samples. Counters: per-second rate.
    Rate,
    Count,
    Avg,
    Min,
    Max,
    Med,
    /// Percentile in 0..=100, e.g. `p(99)`.
    Percentile(f64),
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregate::Rate => write!(f, "rate"),
            Aggregate::Count => write!(f, "count"),
            Aggregate::Avg => write!(f, "avg"),
            Aggregate::Min => write!(f, "min"),
            Aggregate::Max => write!(f, "max"),
            Aggregate::Med => write!(f, "med"),
            Aggregate::Percentile(q) => write!(f, "p({})", q),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Op {
    fn apply(self, left: f64, right: f64) -> bool {
        match self {
            Op::Lt => left < right,
            Op::Le => left <= right,
            Op::Gt => left > right,
            Op::Ge => left >= right,
            Op::Eq => left == right,
            Op::Ne => left != right,
        }
    }
}

/// One parsed expression, e.g. `p(99) < 1000`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Expression {
    pub agg: Aggregate,
    pub op: Op,
    pub value: f64,
}

impl Expression {
    /// Parse an expression string. Whitespace anywhere is tolerated.
    pub fn parse(source: &str) -> Result<Self, ThresholdError> {
        let compact: String = source.split_whitespace().collect();
        // Two-character operators must be tried first.
        const OPS: [(&str, Op); 6] = [
            ("<=", Op::Le),
            (">=", Op::Ge),
            ("==", Op::Eq),
            ("!=", Op::Ne),
            ("<", Op::Lt),
            (">", Op::Gt),
        ];
        for (symbol, op) in OPS {
            if let Some(idx) = compact.find(symbol) {
                let agg_str = &compact[..idx];
                let value_str = &compact[idx + symbol.len()..];
                let agg = parse_aggregate(agg_str, source)?;
                let value: f64 = value_str
                    .parse()
                    .map_err(|_| ThresholdError::Malformed(source.to_string()))?;
                return Ok(Self { agg, op, value });
            }
        }
        Err(ThresholdError::Malformed(source.to_string()))
    }
}

fn parse_aggregate(s: &str, source: &str) -> Result<Aggregate, ThresholdError> {
    match s {
        "rate" => Ok(Aggregate::Rate),
        "count" => Ok(Aggregate::Count),
        "avg" => Ok(Aggregate::Avg),
        "min" => Ok(Aggregate::Min),
        "max" => Ok(Aggregate::Max),
        "med" => Ok(Aggregate::Med),
        other => {
            if let Some(inner) = other.strip_prefix("p(").and_then(|r| r.strip_suffix(')')) {
                let q: f64 = inner
                    .parse()
                    .map_err(|_| ThresholdError::Malformed(source.to_string()))?;
                if !(0.0..=100.0).contains(&q) {
                    return Err(ThresholdError::BadPercentile(source.to_string()));
                }
                Ok(Aggregate::Percentile(q))
            } else {
                Err(ThresholdError::Malformed(source.to_string()))
            }
        }
    }
}

fn compatible(kind: MetricKind, agg: Aggregate) -> bool {
    match kind {
        MetricKind::Counter => matches!(agg, Aggregate::Count | Aggregate::Rate),
        MetricKind::Rate => matches!(agg, Aggregate::Rate),
        MetricKind::Trend => matches!(
            agg,
            Aggregate::Avg
                | Aggregate::Min
                | Aggregate::Max
                | Aggregate::Med
                | Aggregate::Percentile(_)
        ),
    }
}

// ---------------------------------------------------------------------------
// Thresholds and verdicts
// ---------------------------------------------------------------------------

/// One metric bound to one expression.
#[derive(Debug, Clone)]
pub struct Threshold {
    pub metric: String,
    pub expr: Expression,
    /// The expression as written, for reporting.
    pub source: String,
    pub abort_on_fail: bool,
}

impl Threshold {
    /// Build and validate a threshold: the metric must be a name this engine
    /// emits and the aggregation must fit the metric's kind.
    pub fn new(metric: &str, source: &str, abort_on_fail: bool) -> Result<Self, ThresholdError> {
        let kind = metric_kind(metric)
            .ok_or_else(|| ThresholdError::UnknownMetric(metric.to_string()))?;
        let expr = Expression::parse(source)?;
        if !compatible(kind, expr.agg) {
            return Err(ThresholdError::IncompatibleAggregation {
                agg: expr.agg.to_string(),
                kind,
                metric: metric.to_string(),
            });
        }
        Ok(Self {
            metric: metric.to_string(),
            expr,
            source: source.to_string(),
            abort_on_fail,
        })
    }

    /// Evaluate against everything recorded so far.
    pub fn evaluate(&self, collector: &Collector, elapsed: Duration) -> Verdict {
        let observed = self.observed_value(collector, elapsed);
        Verdict {
            metric: self.metric.clone(),
            source: self.source.clone(),
            observed,
            passed: self.expr.op.apply(observed, self.expr.value),
        }
    }

    fn observed_value(&self, collector: &Collector, elapsed: Duration) -> f64 {
        use crate::metrics::{
            CHECKS, DATA_RECEIVED, HTTP_REQS, HTTP_REQ_DURATION, HTTP_REQ_FAILED, ITERATIONS,
        };
        let counter = |count: u64| match self.expr.agg {
            Aggregate::Count => count as f64,
            Aggregate::Rate => {
                let secs = elapsed.as_secs_f64();
                if secs > 0.0 {
                    count as f64 / secs
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };
        match self.metric.as_str() {
            HTTP_REQS => counter(collector.http_reqs()),
            ITERATIONS => counter(collector.iterations()),
            DATA_RECEIVED => counter(collector.data_received()),
            HTTP_REQ_FAILED => collector.failed_stats().rate(),
            CHECKS => collector.check_stats().rate(),
            HTTP_REQ_DURATION => {
                let stats = collector.duration_stats();
                match self.expr.agg {
                    Aggregate::Avg => stats.avg,
                    Aggregate::Min => stats.min,
                    Aggregate::Max => stats.max,
                    Aggregate::Med => stats.med,
                    Aggregate::Percentile(q) => collector.duration_quantile_ms(q / 100.0),
                    _ => 0.0,
                }
            }
            _ => 0.0,
        }
    }
}

/// Outcome of one threshold at evaluation time.
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub metric: String,
    pub source: String,
    pub observed: f64,
    pub passed: bool,
}

/// Evaluate every threshold, preserving input order.
pub fn evaluate_all(thresholds: &[Threshold], collector: &Collector, elapsed: Duration) -> Vec<Verdict> {
    thresholds
        .iter()
        .map(|t| t.evaluate(collector, elapsed))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{CheckResult, RequestOutcome};

    fn outcome(passed: bool, latency_ms: u64) -> RequestOutcome {
        RequestOutcome {
            status: Some(if passed { 200 } else { 500 }),
            latency: Some(Duration::from_millis(latency_ms)),
            bytes_received: 0,
            error: None,
            passed,
            checks: vec![CheckResult {
                name: "response code was 200".to_string(),
                passed,
            }],
        }
    }

    #[test]
    fn test_parse_rate_expression() {
        let expr = Expression::parse("rate<0.01").unwrap();
        assert_eq!(expr.agg, Aggregate::Rate);
        assert_eq!(expr.op, Op::Lt);
        assert!((expr.value - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_parse_percentile_expression() {
        let expr = Expression::parse("p(99)<1000").unwrap();
        assert_eq!(expr.agg, Aggregate::Percentile(99.0));
        assert_eq!(expr.op, Op::Lt);
        assert_eq!(expr.value, 1000.0);

        let expr = Expression::parse("p(99.9) <= 250").unwrap();
        assert_eq!(expr.agg, Aggregate::Percentile(99.9));
        assert_eq!(expr.op, Op::Le);
    }

    #[test]
    fn test_parse_tolerates_whitespace() {
        let expr = Expression::parse("  avg >= 10.5 ").unwrap();
        assert_eq!(expr.agg, Aggregate::Avg);
        assert_eq!(expr.op, Op::Ge);
        assert_eq!(expr.value, 10.5);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            Expression::parse("pct(99)<5"),
            Err(ThresholdError::Malformed(_))
        ));
        assert!(matches!(
            Expression::parse("rate<abc"),
            Err(ThresholdError::Malformed(_))
        ));
        assert!(matches!(
            Expression::parse("rate?0.1"),
            Err(ThresholdError::Malformed(_))
        ));
        assert!(matches!(
            Expression::parse("p(101)<5"),
            Err(ThresholdError::BadPercentile(_))
        ));
    }

    #[test]
    fn test_threshold_rejects_unknown_metric() {
        let err = Threshold::new("http_req_sending", "p(99)<5", false).unwrap_err();
        assert!(matches!(err, ThresholdError::UnknownMetric(_)));
    }

    #[test]
    fn test_threshold_rejects_incompatible_aggregation() {
        // Percentiles make no sense on a rate metric.
        let err = Threshold::new("http_req_failed", "p(99)<5", false).unwrap_err();
        assert!(matches!(err, ThresholdError::IncompatibleAggregation { .. }));
        // Fractional rate makes no sense on a trend metric.
        let err = Threshold::new("http_req_duration", "rate<0.5", false).unwrap_err();
        assert!(matches!(err, ThresholdError::IncompatibleAggregation { .. }));
    }

    #[test]
    fn test_evaluate_failure_rate_boundary() {
        let collector = Collector::new();
        for i in 0..100 {
            collector.record(&outcome(i != 0, 20));
        }
        // Exactly 1% failed: strict less-than fails, <= passes.
        let strict = Threshold::new("http_req_failed", "rate<0.01", false).unwrap();
        let v = strict.evaluate(&collector, Duration::from_secs(10));
        assert!(!v.passed);
        assert!((v.observed - 0.01).abs() < 1e-9);

        let loose = Threshold::new("http_req_failed", "rate<=0.01", false).unwrap();
        assert!(loose.evaluate(&collector, Duration::from_secs(10)).passed);
    }

    #[test]
    fn test_evaluate_duration_percentile() {
        let collector = Collector::new();
        for ms in 1..=100u64 {
            collector.record(&outcome(true, ms));
        }
        let t = Threshold::new("http_req_duration", "p(99)<1000", false).unwrap();
        let v = t.evaluate(&collector, Duration::from_secs(1));
        assert!(v.passed);
        assert!(v.observed > 90.0 && v.observed < 110.0, "observed={}", v.observed);

        let t = Threshold::new("http_req_duration", "med>200", false).unwrap();
        assert!(!t.evaluate(&collector, Duration::from_secs(1)).passed);
    }

    #[test]
    fn test_evaluate_counter_rate_uses_elapsed() {
        let collector = Collector::new();
        for _ in 0..10 {
            collector.record(&outcome(true, 5));
        }
        // 10 requests over 2 seconds = 5/s.
        let t = Threshold::new("http_reqs", "rate>4", false).unwrap();
        let v = t.evaluate(&collector, Duration::from_secs(2));
        assert!(v.passed);
        assert!((v.observed - 5.0).abs() < 1e-9);

        let t = Threshold::new("http_reqs", "count==10", false).unwrap();
        assert!(t.evaluate(&collector, Duration::from_secs(2)).passed);
    }

    #[test]
    fn test_evaluate_checks_rate() {
        let collector = Collector::new();
        for i in 0..4 {
            collector.record(&outcome(i < 3, 5));
        }
        let t = Threshold::new("checks", "rate>0.7", false).unwrap();
        let v = t.evaluate(&collector, Duration::from_secs(1));
        assert!(v.passed);
        assert!((v.observed - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_empty_collector_rate_passes_default_thresholds() {
        let collector = Collector::new();
        let t = Threshold::new("http_req_failed", "rate<0.01", false).unwrap();
        assert!(t.evaluate(&collector, Duration::ZERO).passed);
    }

    #[test]
    fn test_evaluate_all_preserves_order() {
        let collector = Collector::new();
        let thresholds = vec![
            Threshold::new("http_req_failed", "rate<0.01", false).unwrap(),
            Threshold::new("http_req_duration", "p(99)<1000", false).unwrap(),
        ];
        let verdicts = evaluate_all(&thresholds, &collector, Duration::ZERO);
        assert_eq!(verdicts.len(), 2);
        assert_eq!(verdicts[0].metric, "http_req_failed");
        assert_eq!(verdicts[1].metric, "http_req_duration");
    }
}
