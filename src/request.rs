//! The request every virtual user iterates, and its per-response checks.

use std::time::Instant;

use anyhow::{Context, Result};
use rand::Rng;
use reqwest::Client;

use crate::config::RequestConfig;

/// Result of one per-response check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
}

/// Everything one iteration produced. Failures are data points, not errors:
/// transport problems, timeouts, and unexpected statuses all come back
/// inside the outcome and feed the failure-rate metric.
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    /// HTTP status, if a response line was received.
    pub status: Option<u16>,
    /// Wall time of the completed exchange. `None` when the request never
    /// produced a response (connect failure, timeout before headers).
    pub latency: Option<std::time::Duration>,
    /// Body bytes read.
    pub bytes_received: u64,
    pub error: Option<String>,
    /// Whether this request counts as successful for `http_req_failed`.
    pub passed: bool,
    pub checks: Vec<CheckResult>,
}

/// One virtual-user iteration.
#[async_trait::async_trait]
pub trait Iteration: Send + Sync {
    async fn run(&self) -> RequestOutcome;
}

/// The default iteration: one GET against the configured URL, with a `{n}`
/// placeholder substituted per iteration by a uniform random integer in
/// `[0, random_n_max)`, and a single status check.
pub struct HttpGetIteration {
    client: Client,
    url_template: String,
    random_n_max: u64,
    expected_status: u16,
    check_label: String,
}

impl HttpGetIteration {
    pub fn new(config: &RequestConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("rampede/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            url_template: config.url.clone(),
            random_n_max: config.random_n_max,
            expected_status: config.expected_status,
            check_label: config.check_label(),
        })
    }

    fn next_url(&self) -> String {
        if self.url_template.contains("{n}") {
            let n = rand::thread_rng().gen_range(0..self.random_n_max);
            self.url_template.replace("{n}", &n.to_string())
        } else {
            self.url_template.clone()
        }
    }

    fn status_check(&self, status: u16) -> CheckResult {
        CheckResult {
            name: self.check_label.clone(),
            passed: status == self.expected_status,
        }
    }
}

#[async_trait::async_trait]
impl Iteration for HttpGetIteration {
    async fn run(&self) -> RequestOutcome {
        let url = self.next_url();
        let start = Instant::now();
        let result = self.client.get(&url).send().await;

        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                let check = self.status_check(status);
                match response.bytes().await {
                    Ok(body) => RequestOutcome {
                        status: Some(status),
                        latency: Some(start.elapsed()),
                        bytes_received: body.len() as u64,
                        error: None,
                        passed: check.passed,
                        checks: vec![check],
                    },
                    // Headers arrived but the body did not: the status check
                    // still ran, the request itself failed.
                    Err(e) => RequestOutcome {
                        status: Some(status),
                        latency: Some(start.elapsed()),
                        bytes_received: 0,
                        error: Some(e.to_string()),
                        passed: false,
                        checks: vec![check],
                    },
                }
            }
            Err(e) => RequestOutcome {
                status: None,
                latency: None,
                bytes_received: 0,
                error: Some(e.to_string()),
                passed: false,
                checks: vec![CheckResult {
                    name: self.check_label.clone(),
                    passed: false,
                }],
            },
        }
    }
}
