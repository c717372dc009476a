//! Constant virtual-user executor: a fixed pool for a fixed duration.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use super::{await_with_grace, spawn_vu, wait_for_stop, VuHandle};
use crate::config::ScenarioConfig;
use crate::metrics::Collector;
use crate::request::Iteration;

pub struct ConstantVus {
    scenario: String,
    vus: u64,
    duration: Duration,
    graceful_stop: Duration,
}

impl ConstantVus {
    pub fn new(scenario: &str, config: &ScenarioConfig) -> Self {
        Self {
            scenario: scenario.to_string(),
            vus: config.vus,
            // Options::validate guarantees this is set for constant-vus.
            duration: config.duration.unwrap_or_default(),
            graceful_stop: config.graceful_stop,
        }
    }

    pub async fn run(
        &self,
        iteration: Arc<dyn Iteration>,
        collector: Collector,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        info!(
            scenario = %self.scenario,
            vus = self.vus,
            duration_sec = self.duration.as_secs_f64(),
            "starting constant-vus executor"
        );

        let mut pool: Vec<VuHandle> = Vec::with_capacity(self.vus as usize);
        for id in 0..self.vus {
            pool.push(spawn_vu(id, iteration.clone(), collector.clone()));
        }

        tokio::select! {
            biased;

            _ = wait_for_stop(&mut stop_rx) => {
                debug!(scenario = %self.scenario, "stop signal received");
            }
            _ = tokio::time::sleep(self.duration) => {}
        }

        let draining: Vec<_> = pool.into_iter().map(VuHandle::stop).collect();
        await_with_grace(draining, self.graceful_stop).await;
        info!(scenario = %self.scenario, "constant-vus executor finished");
    }
}
