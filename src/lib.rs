//! Rampede -- Ramping virtual-user load generator for HTTP services.
//!
//! This crate provides the core library for load-test scenarios: stage-based
//! virtual-user ramping, request iteration, metric aggregation, threshold
//! evaluation, and run-history storage.

pub mod config;
pub mod executor;
pub mod metrics;
pub mod request;
pub mod runner;
pub mod storage;
pub mod thresholds;

pub use config::Options;
pub use metrics::{Collector, Summary};
pub use runner::{run, RunOutcome, RunStatus};
pub use thresholds::{Threshold, Verdict};
