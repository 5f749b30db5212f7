// src/metrics.rs
use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "pipeline_search_cache_hits_total",
            "Keyword runs served from the search cache."
        );
        describe_counter!("pipeline_search_calls_total", "Live search API calls.");
        describe_counter!(
            "pipeline_fetch_failures_total",
            "Candidate URLs dropped due to fetch/extract failure."
        );
        describe_counter!(
            "pipeline_articles_extracted_total",
            "Articles that passed extraction and length checks."
        );
        describe_counter!(
            "pipeline_chunks_failed_total",
            "Analysis chunks dropped (timeout, schema, provider)."
        );
        describe_counter!("pipeline_news_persisted_total", "News rows committed.");
        describe_counter!(
            "pipeline_duplicates_skipped_total",
            "Articles skipped on url/fingerprint conflict."
        );
        describe_counter!("pipeline_metrics_persisted_total", "Metric rows committed.");
        describe_counter!(
            "pipeline_notifications_enqueued_total",
            "Notification jobs enqueued."
        );
        describe_counter!(
            "pipeline_keyword_retries_total",
            "Keyword unit retries after transient provider errors."
        );
        describe_counter!(
            "pipeline_keyword_failures_total",
            "Keyword units that ended in a terminal failure."
        );
        describe_histogram!("pipeline_analysis_ms", "Analysis call latency in milliseconds.");
        describe_gauge!(
            "pipeline_last_run_ts",
            "Unix ts when the orchestrator last dispatched."
        );
    });
}

/// Install the Prometheus recorder with its own HTTP listener on `addr`.
pub fn install_exporter(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("prometheus: install exporter")?;
    ensure_metrics_described();
    Ok(())
}
