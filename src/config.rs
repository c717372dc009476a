//! TOML options for a load-test run.
//!
//! A run is described by a single options file: the request every virtual
//! user loops, named scenarios with their executors and ramp stages, and
//! thresholds over the aggregated metrics. Compiled-in defaults reproduce
//! the stock `breaking` ramp so the binary is useful with no file at all.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::thresholds::{Threshold, ThresholdError};

// ---------------------------------------------------------------------------
// Top-level options
// ---------------------------------------------------------------------------

/// Root options for a load-test run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
    #[serde(default)]
    pub request: RequestConfig,
    #[serde(default = "default_scenarios")]
    pub scenarios: BTreeMap<String, ScenarioConfig>,
    #[serde(default = "default_thresholds")]
    pub thresholds: BTreeMap<String, Vec<ThresholdSpec>>,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            request: RequestConfig::default(),
            scenarios: default_scenarios(),
            thresholds: default_thresholds(),
            output: OutputConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Options {
    /// Load options from a TOML file at `path` and validate them.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read options file: {}", path.display()))?;
        let options: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse options file: {}", path.display()))?;
        options
            .validate()
            .with_context(|| format!("invalid options file: {}", path.display()))?;
        info!(path = %path.display(), "loaded run options");
        Ok(options)
    }

    /// Try to load options from, in order:
    /// 1. The path specified by the `RAMPEDE_CONFIG` environment variable.
    /// 2. `rampede.toml` in the working directory.
    /// 3. Fall back to compiled-in defaults (the stock `breaking` ramp).
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var("RAMPEDE_CONFIG") {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(opts) => return opts,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "RAMPEDE_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local_path = Path::new("rampede.toml");
        if local_path.exists() {
            match Self::load(local_path) {
                Ok(opts) => return opts,
                Err(e) => {
                    warn!(
                        path = %local_path.display(),
                        error = %e,
                        "local options file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no options file found, using compiled-in defaults");
        Self::default()
    }

    /// Check everything that can be checked before any load is generated.
    pub fn validate(&self) -> Result<()> {
        if self.scenarios.is_empty() {
            bail!("no scenarios defined");
        }
        for (name, scenario) in &self.scenarios {
            scenario
                .validate()
                .with_context(|| format!("scenario '{}'", name))?;
        }
        self.request.validate()?;
        // A zero interval would panic the progress ticker.
        if self.output.progress_interval.is_zero() {
            bail!("output progress_interval must be greater than zero");
        }
        self.compile_thresholds()?;
        Ok(())
    }

    /// Compile the raw threshold table into typed, metric-checked thresholds.
    pub fn compile_thresholds(&self) -> Result<Vec<Threshold>, ThresholdError> {
        let mut compiled = Vec::new();
        for (metric, specs) in &self.thresholds {
            for spec in specs {
                compiled.push(Threshold::new(metric, spec.expression(), spec.abort_on_fail())?);
            }
        }
        Ok(compiled)
    }

    /// Multiply every stage and scenario duration by `factor`.
    /// Used by `run --duration-scale` to rehearse a long ramp in seconds.
    pub fn scale_durations(&mut self, factor: f64) -> Result<()> {
        for (name, scenario) in self.scenarios.iter_mut() {
            for stage in &mut scenario.stages {
                stage.duration = scale_duration(stage.duration, factor)
                    .with_context(|| format!("scenario '{}'", name))?;
            }
            if let Some(d) = scenario.duration {
                scenario.duration = Some(
                    scale_duration(d, factor).with_context(|| format!("scenario '{}'", name))?,
                );
            }
        }
        Ok(())
    }
}

fn scale_duration(duration: Duration, factor: f64) -> Result<Duration> {
    match Duration::try_from_secs_f64(duration.as_secs_f64() * factor) {
        Ok(scaled) => Ok(scaled),
        Err(_) => bail!(
            "duration scale {} overflows {}",
            factor,
            humantime::format_duration(duration)
        ),
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// The HTTP request every virtual user iterates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Target URL. A literal `{n}` is replaced per iteration with a uniform
    /// random integer in `[0, random_n_max)`.
    pub url: String,
    /// Exclusive upper bound for the `{n}` substitution.
    pub random_n_max: u64,
    /// Per-request timeout.
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    /// Status code the per-response check asserts; anything else counts
    /// toward `http_req_failed`.
    pub expected_status: u16,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080/api/images/numbers/{n}".to_string(),
            random_n_max: 10_000,
            timeout: Duration::from_secs(30),
            expected_status: 200,
        }
    }
}

impl RequestConfig {
    fn validate(&self) -> Result<()> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            bail!("request url must start with http:// or https://: '{}'", self.url);
        }
        if self.random_n_max == 0 {
            bail!("request random_n_max must be greater than zero");
        }
        if !(100..=599).contains(&self.expected_status) {
            bail!(
                "request expected_status {} is not a valid HTTP status",
                self.expected_status
            );
        }
        Ok(())
    }

    /// Label of the per-response status check, e.g. `response code was 200`.
    pub fn check_label(&self) -> String {
        format!("response code was {}", self.expected_status)
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

/// Executor strategies a scenario can run under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    RampingVus,
    ConstantVus,
}

impl FromStr for ExecutorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ramping-vus" => Ok(Self::RampingVus),
            "constant-vus" | "constant" => Ok(Self::ConstantVus),
            other => bail!("unknown executor kind '{}'", other),
        }
    }
}

/// One named scenario: an executor kind plus its schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Executor kind: `ramping-vus` or `constant-vus`.
    pub executor: String,
    /// VU count before the first ramping stage completes.
    pub start_vus: u64,
    /// Ordered ramp stages (ramping-vus only).
    pub stages: Vec<StageConfig>,
    /// Fixed VU count (constant-vus only).
    pub vus: u64,
    /// Total duration (constant-vus only).
    #[serde(with = "opt_duration_str", skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
    /// How long a stopping VU may take to finish its current iteration
    /// before it is aborted.
    #[serde(with = "duration_str")]
    pub graceful_stop: Duration,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            executor: "ramping-vus".to_string(),
            start_vus: 1,
            stages: Vec::new(),
            vus: 1,
            duration: None,
            graceful_stop: Duration::from_secs(30),
        }
    }
}

impl ScenarioConfig {
    pub fn kind(&self) -> Result<ExecutorKind> {
        self.executor.parse()
    }

    fn validate(&self) -> Result<()> {
        match self.kind()? {
            ExecutorKind::RampingVus => {
                if self.stages.is_empty() {
                    bail!("ramping-vus requires at least one stage");
                }
            }
            ExecutorKind::ConstantVus => {
                if self.vus == 0 {
                    bail!("constant-vus requires vus > 0");
                }
                if self.duration.is_none() {
                    bail!("constant-vus requires a duration");
                }
            }
        }
        Ok(())
    }
}

/// A (duration, target) pair: ramp the active VU count linearly toward
/// `target` over `duration`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StageConfig {
    #[serde(with = "duration_str")]
    pub duration: Duration,
    pub target: u64,
}

// ---------------------------------------------------------------------------
// Thresholds (raw form; compiled by crate::thresholds)
// ---------------------------------------------------------------------------

/// One threshold entry as written in TOML: either a bare expression string
/// or a detailed table with an abort flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdSpec {
    Expr(String),
    Detailed {
        threshold: String,
        #[serde(default)]
        abort_on_fail: bool,
    },
}

impl ThresholdSpec {
    pub fn expression(&self) -> &str {
        match self {
            Self::Expr(s) => s,
            Self::Detailed { threshold, .. } => threshold,
        }
    }

    pub fn abort_on_fail(&self) -> bool {
        match self {
            Self::Expr(_) => false,
            Self::Detailed { abort_on_fail, .. } => *abort_on_fail,
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Console reporting and export configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Interval between live progress lines.
    #[serde(with = "duration_str")]
    pub progress_interval: Duration,
    /// Optional path for the end-of-run summary JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_export: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            progress_interval: Duration::from_secs(2),
            summary_export: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Run-history persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Whether finished runs are recorded at all.
    pub enabled: bool,
    /// SQLite database path.
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: "data/rampede.db".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults: the stock `breaking` ramp
// ---------------------------------------------------------------------------

fn default_scenarios() -> BTreeMap<String, ScenarioConfig> {
    let steps: [(u64, u64); 8] = [
        (10, 20),
        (50, 20),
        (50, 40),
        (50, 60),
        (50, 80),
        (50, 100),
        (50, 120),
        (50, 140),
    ];
    let stages = steps
        .iter()
        .map(|&(secs, target)| StageConfig {
            duration: Duration::from_secs(secs),
            target,
        })
        .collect();

    let mut scenarios = BTreeMap::new();
    scenarios.insert(
        "breaking".to_string(),
        ScenarioConfig {
            executor: "ramping-vus".to_string(),
            start_vus: 1,
            stages,
            ..ScenarioConfig::default()
        },
    );
    scenarios
}

fn default_thresholds() -> BTreeMap<String, Vec<ThresholdSpec>> {
    let mut thresholds = BTreeMap::new();
    thresholds.insert(
        "http_req_failed".to_string(),
        vec![ThresholdSpec::Expr("rate<0.01".to_string())],
    );
    thresholds.insert(
        "http_req_duration".to_string(),
        vec![ThresholdSpec::Expr("p(99)<1000".to_string())],
    );
    thresholds
}

// ---------------------------------------------------------------------------
// Humantime (de)serialization for durations
// ---------------------------------------------------------------------------

mod duration_str {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(de)?;
        humantime::parse_duration(s.trim()).map_err(de::Error::custom)
    }
}

mod opt_duration_str {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, ser: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => ser.serialize_some(&humantime::format_duration(*d).to_string()),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Duration>, D::Error> {
        let s: Option<String> = Option::deserialize(de)?;
        match s {
            Some(s) => humantime::parse_duration(s.trim())
                .map(Some)
                .map_err(de::Error::custom),
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
