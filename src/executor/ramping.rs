//! Ramping virtual-user executor.
//!
//! Stages execute in declared order. Between stage boundaries the active VU
//! count is linearly interpolated from the previous stage's target (or
//! `start_vus` before the first boundary) toward the current stage's target,
//! clamped to the segment so a ramp never overshoots.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::{await_with_grace, spawn_vu, wait_for_stop, VuHandle, TICK};
use crate::config::{ScenarioConfig, StageConfig};
use crate::metrics::Collector;
use crate::request::Iteration;

// ---------------------------------------------------------------------------
// RampPlan
// ---------------------------------------------------------------------------

/// Pure VU schedule for a ramping scenario. Separate from the executor so
/// the timeline can be inspected (and tested) without generating load.
#[derive(Debug, Clone)]
pub struct RampPlan {
    start_vus: u64,
    stages: Vec<StageConfig>,
}

impl RampPlan {
    pub fn new(start_vus: u64, stages: Vec<StageConfig>) -> Self {
        Self { start_vus, stages }
    }

    pub fn from_config(config: &ScenarioConfig) -> Self {
        Self::new(config.start_vus, config.stages.clone())
    }

    /// Sum of all stage durations.
    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    /// Highest VU count the schedule ever asks for.
    pub fn peak_vus(&self) -> u64 {
        self.stages
            .iter()
            .map(|s| s.target)
            .max()
            .unwrap_or(0)
            .max(self.start_vus)
    }

    /// Cumulative (end offset, target) pairs, one per stage.
    pub fn boundaries(&self) -> Vec<(Duration, u64)> {
        let mut acc = Duration::ZERO;
        self.stages
            .iter()
            .map(|s| {
                acc += s.duration;
                (acc, s.target)
            })
            .collect()
    }

    /// Desired VU count `elapsed` into the schedule.
    pub fn vus_at(&self, elapsed: Duration) -> u64 {
        let mut from = self.start_vus;
        let mut stage_start = Duration::ZERO;
        for stage in &self.stages {
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                if stage.duration.is_zero() {
                    return stage.target;
                }
                let frac =
                    (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
                let from_f = from as f64;
                let to_f = stage.target as f64;
                let value = (from_f + (to_f - from_f) * frac).round();
                let (lo, hi) = if from_f <= to_f {
                    (from_f, to_f)
                } else {
                    (to_f, from_f)
                };
                return value.clamp(lo, hi) as u64;
            }
            from = stage.target;
            stage_start = stage_end;
        }
        // Past the last stage the schedule holds its final target.
        self.stages.last().map(|s| s.target).unwrap_or(self.start_vus)
    }
}

// ---------------------------------------------------------------------------
// RampingVus executor
// ---------------------------------------------------------------------------

/// Drive a VU pool along a [`RampPlan`].
pub struct RampingVus {
    scenario: String,
    plan: RampPlan,
    graceful_stop: Duration,
}

impl RampingVus {
    pub fn new(scenario: &str, config: &ScenarioConfig) -> Self {
        Self {
            scenario: scenario.to_string(),
            plan: RampPlan::from_config(config),
            graceful_stop: config.graceful_stop,
        }
    }

    /// Run the schedule to completion, or until `stop_rx` flips.
    pub async fn run(
        &self,
        iteration: Arc<dyn Iteration>,
        collector: Collector,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let total = self.plan.total_duration();
        info!(
            scenario = %self.scenario,
            total_sec = total.as_secs_f64(),
            peak_vus = self.plan.peak_vus(),
            stages = self.plan.stages.len(),
            "starting ramping-vus executor"
        );

        let started = tokio::time::Instant::now();
        let mut ticker = tokio::time::interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut pool: Vec<VuHandle> = Vec::new();
        let mut draining: Vec<tokio::task::JoinHandle<()>> = Vec::new();
        let mut next_id: u64 = 0;

        loop {
            tokio::select! {
                biased;

                _ = wait_for_stop(&mut stop_rx) => {
                    debug!(scenario = %self.scenario, "stop signal received, ramping down");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let elapsed = started.elapsed();
            if elapsed >= total {
                break;
            }

            let desired = self.plan.vus_at(elapsed) as usize;
            if desired > pool.len() {
                for _ in pool.len()..desired {
                    pool.push(spawn_vu(next_id, iteration.clone(), collector.clone()));
                    next_id += 1;
                }
            } else if desired < pool.len() {
                // Newest VUs stop first; each finishes its current iteration.
                for handle in pool.split_off(desired) {
                    draining.push(handle.stop());
                }
            }
        }

        debug!(
            scenario = %self.scenario,
            active = pool.len(),
            draining = draining.len(),
            "schedule complete, stopping virtual users"
        );
        for handle in pool {
            draining.push(handle.stop());
        }
        await_with_grace(draining, self.graceful_stop).await;
        info!(scenario = %self.scenario, "ramping-vus executor finished");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
