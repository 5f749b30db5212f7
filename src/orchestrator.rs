// src/orchestrator.rs
//! Fan-out of keyword units, each wrapped in the retry controller, plus the
//! periodic scheduler that drives it.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::gauge;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::PipelineError;
use crate::model::KeywordConfig;
use crate::pipeline::{KeywordPipeline, KeywordStats};
use crate::retry::{run_with_retry, RetryFailure, RetryPolicy};

#[derive(Debug)]
pub enum KeywordOutcome {
    Completed(KeywordStats),
    Failed { attempts: u32, error: PipelineError },
}

impl KeywordOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, KeywordOutcome::Failed { .. })
    }
}

#[derive(Debug)]
pub struct KeywordReport {
    pub keyword: String,
    pub outcome: KeywordOutcome,
}

#[derive(Debug)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub force: bool,
    /// Same order as the dispatched keyword list.
    pub keywords: Vec<KeywordReport>,
}

impl RunReport {
    pub fn failed(&self) -> usize {
        self.keywords.iter().filter(|k| k.outcome.is_failed()).count()
    }

    pub fn persisted(&self) -> usize {
        self.keywords
            .iter()
            .map(|k| match &k.outcome {
                KeywordOutcome::Completed(s) => s.persisted,
                KeywordOutcome::Failed { .. } => 0,
            })
            .sum()
    }

    pub fn get(&self, keyword: &str) -> Option<&KeywordOutcome> {
        self.keywords
            .iter()
            .find(|k| k.keyword == keyword)
            .map(|k| &k.outcome)
    }
}

/// Trimmed, non-empty, first occurrence wins. An empty list falls back to
/// `default_keyword`.
pub fn resolve_keywords(cfg: &KeywordConfig, default_keyword: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for k in &cfg.keywords {
        let k = k.trim();
        if !k.is_empty() && !out.iter().any(|seen| seen == k) {
            out.push(k.to_string());
        }
    }
    if out.is_empty() {
        out.push(default_keyword.to_string());
    }
    out
}

#[derive(Clone)]
pub struct Orchestrator {
    pipeline: KeywordPipeline,
    policy: RetryPolicy,
}

impl Orchestrator {
    pub fn new(pipeline: KeywordPipeline) -> Self {
        let policy = RetryPolicy::from_config(pipeline.config());
        Self { pipeline, policy }
    }

    /// Read the keyword list and run every keyword concurrently.
    pub async fn run_once(&self, force: bool) -> Result<RunReport, PipelineError> {
        let cfg = self.pipeline.store().keyword_config().await?;
        let keywords = resolve_keywords(&cfg, &self.pipeline.config().default_keyword);
        Ok(self.run_keywords(keywords, force).await)
    }

    /// One spawned task per keyword. A failing or panicking unit only affects
    /// its own report entry.
    pub async fn run_keywords(&self, keywords: Vec<String>, force: bool) -> RunReport {
        let started_at = Utc::now();
        gauge!("pipeline_last_run_ts").set(started_at.timestamp() as f64);
        info!(target: "pipeline", keywords = keywords.len(), force, "dispatching keyword units");

        let handles: Vec<(String, JoinHandle<Result<KeywordStats, RetryFailure>>)> = keywords
            .into_iter()
            .map(|kw| {
                let pipeline = self.pipeline.clone();
                let policy = self.policy.clone();
                let task_kw = kw.clone();
                let handle = tokio::spawn(async move {
                    run_with_retry(&policy, &task_kw, |_attempt| {
                        let pipeline = pipeline.clone();
                        let kw = task_kw.clone();
                        async move { pipeline.process_keyword(&kw, force).await }
                    })
                    .await
                });
                (kw, handle)
            })
            .collect();

        let mut reports = Vec::with_capacity(handles.len());
        for (keyword, handle) in handles {
            let outcome = match handle.await {
                Ok(Ok(stats)) => KeywordOutcome::Completed(stats),
                Ok(Err(RetryFailure { attempts, error })) => KeywordOutcome::Failed { attempts, error },
                Err(join_err) => {
                    error!(target: "pipeline", keyword = %keyword, error = %join_err, "keyword task aborted");
                    KeywordOutcome::Failed {
                        attempts: 0,
                        error: PipelineError::Aborted(join_err.to_string()),
                    }
                }
            };
            reports.push(KeywordReport { keyword, outcome });
        }

        let report = RunReport {
            started_at,
            force,
            keywords: reports,
        };
        log_summary(&report);
        report
    }

    /// Run, then sleep `scraping_interval_minutes` (re-read every cycle),
    /// until `shutdown` resolves.
    pub async fn run_scheduler<S>(&self, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            match self.run_once(false).await {
                Ok(_) => {}
                Err(e) => error!(target: "pipeline", error = %e, "run could not start"),
            }

            let minutes = match self.pipeline.store().keyword_config().await {
                Ok(cfg) => cfg.scraping_interval_minutes,
                Err(e) => {
                    warn!(target: "pipeline", error = %e, "keyword config unreadable; using 60 minute interval");
                    60
                }
            };
            let wait = Duration::from_secs(u64::from(minutes.max(1)) * 60);
            info!(target: "pipeline", minutes, "next run scheduled");

            tokio::select! {
                _ = &mut shutdown => {
                    info!(target: "pipeline", "scheduler stopping");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

fn log_summary(report: &RunReport) {
    for k in &report.keywords {
        match &k.outcome {
            KeywordOutcome::Completed(s) => info!(
                target: "pipeline",
                keyword = %k.keyword,
                persisted = s.persisted,
                duplicates = s.duplicates,
                chunks_failed = s.chunks_failed,
                "keyword completed"
            ),
            KeywordOutcome::Failed { attempts, error } => error!(
                target: "pipeline",
                keyword = %k.keyword,
                attempts,
                error = %error,
                "keyword failed"
            ),
        }
    }
    info!(
        target: "pipeline",
        keywords = report.keywords.len(),
        failed = report.failed(),
        persisted = report.persisted(),
        "run finished"
    );
}
