// src/retry.rs
//! Per-keyword retry controller with a fixed backoff schedule.

use std::future::Future;
use std::time::Duration;

use metrics::counter;
use tracing::{error, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before attempt n+2 is `delays[n]`; the last entry repeats.
    pub delays: Vec<Duration>,
}

impl RetryPolicy {
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            delays: cfg.retry_delays(),
        }
    }

    /// Wait after the `failed_attempt`-th failure (0-based).
    pub fn delay_for(&self, failed_attempt: usize) -> Duration {
        self.delays
            .get(failed_attempt)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or_default()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// Terminal failure of a retried unit.
#[derive(Debug)]
pub struct RetryFailure {
    pub attempts: u32,
    pub error: PipelineError,
}

/// Run `op` until it succeeds, returns a non-retryable error, or the attempt
/// budget is spent. Only `PipelineError::is_retryable` errors are retried.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    keyword: &str,
    mut op: F,
) -> Result<T, RetryFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let max = policy.max_attempts.max(1);
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < max => {
                let delay = policy.delay_for((attempt - 1) as usize);
                warn!(
                    target: "pipeline",
                    keyword,
                    attempt,
                    max_attempts = max,
                    delay_secs = delay.as_secs_f64(),
                    error = %e,
                    "transient provider error; backing off"
                );
                counter!("pipeline_keyword_retries_total").increment(1);
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!(target: "pipeline", keyword, attempts = attempt, error = %e, "keyword unit failed");
                counter!("pipeline_keyword_failures_total").increment(1);
                return Err(RetryFailure {
                    attempts: attempt,
                    error: e,
                });
            }
        }
    }
}
