//! Run orchestration: wires scenarios, metrics, thresholds, and storage
//! into a single load-test run.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{ExecutorKind, Options};
use crate::executor::{ConstantVus, RampingVus};
use crate::metrics::{reporter, Collector, Summary};
use crate::request::{HttpGetIteration, Iteration};
use crate::storage;
use crate::thresholds::{evaluate_all, Threshold, Verdict};

/// How often abort_on_fail thresholds are re-checked mid-run.
const ABORT_CHECK_INTERVAL: Duration = Duration::from_secs(2);

/// How a finished run is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every threshold held.
    Passed,
    /// At least one threshold failed.
    Failed,
    /// Stopped early, but every threshold held.
    Interrupted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Passed => "passed",
            RunStatus::Failed => "failed",
            RunStatus::Interrupted => "interrupted",
        }
    }
}

/// Everything a caller needs to report and exit after a run.
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub summary: Summary,
    pub verdicts: Vec<Verdict>,
}

impl RunOutcome {
    /// True when every threshold held.
    pub fn passed(&self) -> bool {
        self.verdicts.iter().all(|v| v.passed)
    }
}

#[derive(Serialize)]
struct SummaryExport<'a> {
    run_id: &'a str,
    status: &'a str,
    summary: &'a Summary,
    thresholds: &'a [Verdict],
}

/// Execute every configured scenario and return the aggregated outcome.
///
/// Scenarios run concurrently against one shared collector. The run ends
/// when every executor finishes its schedule, when a threshold marked
/// abort_on_fail is crossed, or on Ctrl-C. The first Ctrl-C drains VUs
/// through their graceful_stop window; a second one abandons the drain.
pub async fn run(options: &Options) -> Result<RunOutcome> {
    let run_id = Uuid::new_v4().to_string();
    let thresholds = options.compile_thresholds().context("invalid thresholds")?;
    let collector = Collector::new();
    let iteration: Arc<dyn Iteration> = Arc::new(HttpGetIteration::new(&options.request)?);

    info!(
        %run_id,
        url = %options.request.url,
        scenarios = options.scenarios.len(),
        thresholds = thresholds.len(),
        "starting load test"
    );

    let (stop_tx, stop_rx) = watch::channel(false);

    let reporter_task = tokio::spawn(reporter::run_progress_loop(
        collector.clone(),
        options.output.progress_interval,
    ));
    let watcher_task = spawn_abort_watcher(&thresholds, collector.clone(), stop_tx.clone());

    let mut scenario_tasks = Vec::new();
    for (name, scenario) in &options.scenarios {
        let iteration = iteration.clone();
        let collector = collector.clone();
        let stop_rx = stop_rx.clone();
        let task = match scenario.kind()? {
            ExecutorKind::RampingVus => {
                let exec = RampingVus::new(name, scenario);
                tokio::spawn(async move { exec.run(iteration, collector, stop_rx).await })
            }
            ExecutorKind::ConstantVus => {
                let exec = ConstantVus::new(name, scenario);
                tokio::spawn(async move { exec.run(iteration, collector, stop_rx).await })
            }
        };
        scenario_tasks.push(task);
    }

    let mut interrupted = false;
    let mut scenarios_done = futures::future::join_all(scenario_tasks);
    tokio::select! {
        results = &mut scenarios_done => log_join_errors(results),
        _ = tokio::signal::ctrl_c() => {
            interrupted = true;
            warn!("interrupt received, draining virtual users");
            let _ = stop_tx.send(true);
            tokio::select! {
                results = &mut scenarios_done => log_join_errors(results),
                _ = tokio::signal::ctrl_c() => {
                    warn!("second interrupt, abandoning drain");
                }
            }
        }
    }

    if let Some(task) = watcher_task {
        task.abort();
    }
    reporter_task.abort();

    let elapsed = collector.elapsed();
    let summary = collector.summary();
    let verdicts = evaluate_all(&thresholds, &collector, elapsed);

    let status = if verdicts.iter().any(|v| !v.passed) {
        RunStatus::Failed
    } else if interrupted || *stop_rx.borrow() {
        RunStatus::Interrupted
    } else {
        RunStatus::Passed
    };

    info!(
        %run_id,
        status = status.as_str(),
        http_reqs = summary.http_reqs,
        elapsed_sec = summary.elapsed_sec,
        "load test finished"
    );

    reporter::print_final_report(&summary, &verdicts, &options.request.check_label());

    if let Some(path) = &options.output.summary_export {
        export_summary(path, &run_id, status, &summary, &verdicts)
            .with_context(|| format!("failed to export summary to {}", path.display()))?;
    }

    if options.storage.enabled {
        if let Err(err) = persist(options, &run_id, status, &summary, &verdicts) {
            warn!(error = %err, "failed to record run history");
        }
    }

    Ok(RunOutcome {
        run_id,
        status,
        summary,
        verdicts,
    })
}

/// Watch abort_on_fail thresholds and flip the stop flag when one is
/// crossed. Returns None when nothing asked to abort.
fn spawn_abort_watcher(
    thresholds: &[Threshold],
    collector: Collector,
    stop_tx: watch::Sender<bool>,
) -> Option<tokio::task::JoinHandle<()>> {
    let watched: Vec<Threshold> = thresholds
        .iter()
        .filter(|t| t.abort_on_fail)
        .cloned()
        .collect();
    if watched.is_empty() {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ABORT_CHECK_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let elapsed = collector.elapsed();
            for threshold in &watched {
                let verdict = threshold.evaluate(&collector, elapsed);
                if !verdict.passed {
                    warn!(
                        metric = %verdict.metric,
                        threshold = %verdict.source,
                        observed = verdict.observed,
                        "abort_on_fail threshold crossed, stopping run"
                    );
                    let _ = stop_tx.send(true);
                    return;
                }
            }
        }
    }))
}

fn log_join_errors(results: Vec<Result<(), tokio::task::JoinError>>) {
    for result in results {
        if let Err(err) = result {
            warn!(error = %err, "scenario task failed");
        }
    }
}

fn export_summary(
    path: &Path,
    run_id: &str,
    status: RunStatus,
    summary: &Summary,
    verdicts: &[Verdict],
) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let export = SummaryExport {
        run_id,
        status: status.as_str(),
        summary,
        thresholds: verdicts,
    };
    std::fs::write(path, serde_json::to_string_pretty(&export)?)?;
    info!(path = %path.display(), "summary exported");
    Ok(())
}

fn persist(
    options: &Options,
    run_id: &str,
    status: RunStatus,
    summary: &Summary,
    verdicts: &[Verdict],
) -> Result<()> {
    let pool = storage::open_pool(&options.storage.db_path)?;
    let export = SummaryExport {
        run_id,
        status: status.as_str(),
        summary,
        thresholds: verdicts,
    };
    let record = storage::RunRecord {
        run_id: run_id.to_string(),
        scenarios: options
            .scenarios
            .keys()
            .cloned()
            .collect::<Vec<_>>()
            .join(","),
        status: status.as_str().to_string(),
        total_requests: summary.http_reqs,
        failed_requests: summary.http_req_failed.trues,
        duration_sec: summary.elapsed_sec,
        p50_ms: summary.http_req_duration.med,
        p95_ms: summary.http_req_duration.p95,
        p99_ms: summary.http_req_duration.p99,
        max_ms: summary.http_req_duration.max,
        summary_json: serde_json::to_string(&export)?,
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    storage::save_run(&pool, &record)?;
    info!(%run_id, db = %options.storage.db_path, "run recorded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScenarioConfig;
    use std::collections::BTreeMap;

    // 127.0.0.1:1 refuses connections immediately, so every request is a
    // fast failed data point.
    fn refused_options(duration: Duration) -> Options {
        let mut options = Options::default();
        options.request.url = "http://127.0.0.1:1/api/images/numbers/{n}".to_string();
        options.scenarios = BTreeMap::from([(
            "refused".to_string(),
            ScenarioConfig {
                executor: "constant-vus".to_string(),
                vus: 2,
                duration: Some(duration),
                graceful_stop: Duration::from_secs(2),
                ..ScenarioConfig::default()
            },
        )]);
        options.storage.enabled = false;
        options
    }

    #[tokio::test]
    async fn test_run_against_refused_port_fails_thresholds() {
        let options = refused_options(Duration::from_millis(300));
        let outcome = run(&options).await.unwrap();

        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(!outcome.passed());
        assert!(outcome.summary.http_reqs > 0);
        assert!(outcome.summary.http_req_failed.rate() > 0.99);
        // Stock thresholds: http_req_duration p(99) and http_req_failed rate.
        assert_eq!(outcome.verdicts.len(), 2);
        assert!(outcome
            .verdicts
            .iter()
            .any(|v| v.metric == "http_req_failed" && !v.passed));
    }

    #[tokio::test]
    async fn test_abort_on_fail_stops_long_run_early() {
        let mut options = refused_options(Duration::from_secs(60));
        options.thresholds = BTreeMap::from([(
            "http_req_failed".to_string(),
            vec![crate::config::ThresholdSpec::Detailed {
                threshold: "rate<0.01".to_string(),
                abort_on_fail: true,
            }],
        )]);

        let started = std::time::Instant::now();
        let outcome = run(&options).await.unwrap();

        // The watcher ticks every 2s, so the run must end long before the
        // scheduled 60s.
        assert!(started.elapsed() < Duration::from_secs(20));
        assert_eq!(outcome.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_summary_export_written() {
        let dir = tempfile::TempDir::new().unwrap();
        let export_path = dir.path().join("summary.json");
        let mut options = refused_options(Duration::from_millis(200));
        options.output.summary_export = Some(export_path.clone());

        let outcome = run(&options).await.unwrap();

        let raw = std::fs::read_to_string(&export_path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["run_id"], outcome.run_id);
        assert_eq!(value["status"], "failed");
        assert_eq!(value["thresholds"].as_array().unwrap().len(), 2);
        assert!(value["summary"]["http_reqs"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_run_recorded_in_history() {
        let dir = tempfile::TempDir::new().unwrap();
        let db_path = dir.path().join("runs.db");
        let mut options = refused_options(Duration::from_millis(200));
        options.storage.enabled = true;
        options.storage.db_path = db_path.to_str().unwrap().to_string();

        let outcome = run(&options).await.unwrap();

        let pool = storage::open_pool(options.storage.db_path.as_str()).unwrap();
        let runs = storage::recent_runs(&pool, 5).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, outcome.run_id);
        assert_eq!(runs[0].status, "failed");
        assert_eq!(runs[0].scenarios, "refused");
        assert!(runs[0].total_requests > 0);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(RunStatus::Passed.as_str(), "passed");
        assert_eq!(RunStatus::Failed.as_str(), "failed");
        assert_eq!(RunStatus::Interrupted.as_str(), "interrupted");
    }
}
