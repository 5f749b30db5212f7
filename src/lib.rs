// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod analyze;
pub mod config;
pub mod dedup;
pub mod error;
pub mod fetch;
pub mod metrics;
pub mod model;
pub mod notify;
pub mod orchestrator;
pub mod persist;
pub mod pipeline;
pub mod retry;
pub mod search;
pub mod store;

pub use crate::config::{PipelineConfig, Secrets};
pub use crate::error::{PipelineError, ProviderError, SchemaError};
pub use crate::orchestrator::{KeywordOutcome, Orchestrator, RunReport};
pub use crate::pipeline::{KeywordPipeline, KeywordStats};
pub use crate::store::Store;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::analyze::provider::build_provider;
use crate::analyze::BatchAnalyzer;
use crate::fetch::HttpPageExtractor;
use crate::notify::{EmailNotifier, LogNotifier, NotificationDispatcher, Notifier};
use crate::search::{DisabledSearcher, NewsSearcher, SearchCache, SerperNewsSearcher};

/// Build the production clients from config + secrets and wire them into a
/// pipeline. Returns the delivery worker handle alongside.
pub fn build_pipeline(
    store: Store,
    cfg: PipelineConfig,
    secrets: &Secrets,
) -> Result<(KeywordPipeline, tokio::task::JoinHandle<()>)> {
    let cfg = Arc::new(cfg);

    let searcher: Arc<dyn NewsSearcher> = match &secrets.serper_api_key {
        Some(key) => Arc::new(SerperNewsSearcher::new(key)?),
        None => {
            warn!(target: "search", "SERPER_API_KEY not set; searches return nothing");
            Arc::new(DisabledSearcher)
        }
    };

    let provider = build_provider(
        secrets.openai_api_key.as_deref(),
        secrets.openai_model.as_deref(),
    )
    .context("building analysis provider")?;
    if secrets.openai_api_key.is_none() {
        warn!(target: "analyze", "OPENAI_API_KEY not set; every chunk will fail");
    }

    let notifier: Arc<dyn Notifier> = match &secrets.smtp {
        Some(smtp) => Arc::new(EmailNotifier::new(smtp)?),
        None => Arc::new(LogNotifier),
    };

    let extractor = Arc::new(HttpPageExtractor::new(
        std::time::Duration::from_secs(cfg.fetch_timeout_secs),
        cfg.max_page_bytes,
    )?);
    let analyzer = BatchAnalyzer::new(provider, cfg.analysis_timeout());
    let (dispatcher, worker) = NotificationDispatcher::spawn(notifier, cfg.high_impact_threshold);

    info!(
        searcher = searcher.name(),
        analyzer = analyzer.provider_name(),
        chunk_size = cfg.chunk_size,
        "pipeline wired"
    );

    let pipeline = KeywordPipeline::new(
        store,
        SearchCache::new(searcher, cfg.clone()),
        extractor,
        analyzer,
        dispatcher,
        cfg,
    );
    Ok((pipeline, worker))
}
