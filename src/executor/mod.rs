//! Virtual-user executors: the strategies that animate a scenario's VU pool.
//!
//! Each virtual user is a tokio task looping the iteration function. An
//! executor reconciles the live pool against its schedule and stops VUs
//! gracefully: a signaled VU finishes its current iteration before exiting,
//! capped by the scenario's `graceful_stop`.

pub mod constant;
pub mod ramping;

pub use constant::ConstantVus;
pub use ramping::{RampPlan, RampingVus};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::metrics::Collector;
use crate::request::Iteration;

/// Pool reconciliation interval for ramping executors.
pub(crate) const TICK: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Virtual-user tasks
// ---------------------------------------------------------------------------

/// Handle to one live virtual user.
pub(crate) struct VuHandle {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl VuHandle {
    /// Ask the VU to stop after its current iteration and hand back the task
    /// to await.
    pub fn stop(self) -> JoinHandle<()> {
        let _ = self.stop_tx.send(());
        self.task
    }
}

/// Keeps the active-VU gauge honest even when a task is aborted mid-iteration.
struct VuGuard {
    collector: Collector,
}

impl Drop for VuGuard {
    fn drop(&mut self) {
        self.collector.vu_stopped();
    }
}

/// Spawn one virtual user looping the iteration function until signaled.
/// The stop signal is only observed between iterations.
pub(crate) fn spawn_vu(id: u64, iteration: Arc<dyn Iteration>, collector: Collector) -> VuHandle {
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        trace!(vu = id, "virtual user started");
        collector.vu_started();
        let _guard = VuGuard {
            collector: collector.clone(),
        };
        loop {
            match stop_rx.try_recv() {
                Ok(()) | Err(oneshot::error::TryRecvError::Closed) => break,
                Err(oneshot::error::TryRecvError::Empty) => {}
            }
            let outcome = iteration.run().await;
            collector.record(&outcome);
            collector.iteration_completed();
        }
        trace!(vu = id, "virtual user stopped");
    });
    VuHandle { stop_tx, task }
}

/// Await stopped VU tasks, allowing `grace` in total for in-flight
/// iterations to finish; anything still running afterwards is aborted.
pub(crate) async fn await_with_grace(tasks: Vec<JoinHandle<()>>, grace: Duration) {
    let deadline = tokio::time::Instant::now() + grace;
    let mut aborted = 0usize;
    for mut task in tasks {
        if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
            task.abort();
            // Wait for the cancellation to land so gauges settle.
            let _ = task.await;
            aborted += 1;
        }
    }
    if aborted > 0 {
        debug!(aborted, "VUs exceeded graceful_stop and were aborted");
    }
}

/// Resolve when the shared stop flag flips to true (or its sender is gone).
pub(crate) async fn wait_for_stop(rx: &mut watch::Receiver<bool>) {
    if *rx.borrow() {
        return;
    }
    while rx.changed().await.is_ok() {
        if *rx.borrow() {
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod testing {
    use std::time::Duration;

    use crate::request::{Iteration, RequestOutcome};

    /// Iteration that just sleeps and reports success.
    pub struct SleepIteration {
        pub delay: Duration,
    }

    #[async_trait::async_trait]
    impl Iteration for SleepIteration {
        async fn run(&self) -> RequestOutcome {
            tokio::time::sleep(self.delay).await;
            RequestOutcome {
                status: Some(200),
                latency: Some(self.delay),
                bytes_received: 1,
                error: None,
                passed: true,
                checks: Vec::new(),
            }
        }
    }
}
