//! Console reporting: live progress lines and the end-of-run summary.

use std::time::Duration;

use super::collector::Collector;
use super::summary::Summary;
use crate::thresholds::Verdict;

/// Print one progress line every `every` until the task is aborted.
pub async fn run_progress_loop(collector: Collector, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    // Consume the immediate first tick so the run starts quietly.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        print_progress_line(&collector);
    }
}

pub fn print_progress_line(collector: &Collector) {
    let elapsed = collector.elapsed().as_secs_f64();
    let rps = if elapsed > 0.0 {
        collector.http_reqs() as f64 / elapsed
    } else {
        0.0
    };
    let stats = collector.duration_stats();
    let failed = collector.failed_stats();
    println!(
        "t={:>5.0}s  vus={:>4}  iters={:>9}  rps={:>8.1}  p95={:>8.1}ms  fail={:>6.2}%",
        elapsed,
        collector.active_vus(),
        collector.iterations(),
        rps,
        stats.p95,
        failed.rate() * 100.0
    );
}

/// Print the final summary table and one PASS/FAIL line per threshold.
pub fn print_final_report(summary: &Summary, verdicts: &[Verdict], check_label: &str) {
    println!("\n=== Load Test Summary ===");
    println!("  {:<22} {:.1}s", "duration", summary.elapsed_sec);
    println!(
        "  {:<22} {} ({:.1}/s)",
        "http_reqs", summary.http_reqs, summary.rps
    );
    let d = &summary.http_req_duration;
    println!(
        "  {:<22} avg={:.1}ms min={:.1}ms med={:.1}ms p90={:.1}ms p95={:.1}ms p99={:.1}ms max={:.1}ms",
        "http_req_duration", d.avg, d.min, d.med, d.p90, d.p95, d.p99, d.max
    );
    println!(
        "  {:<22} {:.2}% ({} of {})",
        "http_req_failed",
        summary.http_req_failed.rate() * 100.0,
        summary.http_req_failed.trues,
        summary.http_req_failed.total
    );
    println!(
        "  {:<22} {:.2}% ({} of {}) - {}",
        "checks",
        summary.checks.rate() * 100.0,
        summary.checks.trues,
        summary.checks.total,
        check_label
    );
    println!(
        "  {:<22} {} ({}/s)",
        "data_received",
        fmt_bytes(summary.data_received),
        fmt_bytes(per_second(summary.data_received, summary.elapsed_sec))
    );
    println!("  {:<22} {}", "iterations", summary.iterations);
    println!("  {:<22} {}", "peak_vus", summary.peak_vus);

    if !verdicts.is_empty() {
        println!("\nThresholds:");
        for v in verdicts {
            let status = if v.passed { "PASS" } else { "FAIL" };
            println!(
                "  {:<4} | {:<20} | {} (observed {:.4})",
                status, v.metric, v.source, v.observed
            );
        }
    }
    println!();
}

fn per_second(total: u64, elapsed_sec: f64) -> u64 {
    if elapsed_sec > 0.0 {
        (total as f64 / elapsed_sec) as u64
    } else {
        0
    }
}

fn fmt_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "kB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
