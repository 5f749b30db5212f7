// src/pipeline.rs
//! One keyword, end to end: search cache → fetch/extract → batch analysis →
//! persistence → alerts. Chunks run strictly one after another.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use tracing::{info, warn};

use crate::analyze::{BatchAnalyzer, ChunkError};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::fetch::{collect_work_items, PageExtractor};
use crate::notify::NotificationDispatcher;
use crate::persist::persist_chunk;
use crate::search::SearchCache;
use crate::store::Store;

/// What one successful keyword run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordStats {
    pub candidates: usize,
    pub articles: usize,
    pub chunks: usize,
    pub chunks_failed: usize,
    pub persisted: usize,
    pub duplicates: usize,
    pub metrics: usize,
    pub notifications: usize,
    /// Analyses dropped because the provider returned more than asked for.
    pub extra_discarded: usize,
    /// Articles left unpersisted because the provider returned too few analyses.
    pub unmatched: usize,
}

/// Injected services for a keyword run. Cheap to clone; every clone shares
/// the same clients and store pool.
#[derive(Clone)]
pub struct KeywordPipeline {
    store: Store,
    search: SearchCache,
    extractor: Arc<dyn PageExtractor>,
    analyzer: BatchAnalyzer,
    dispatcher: NotificationDispatcher,
    cfg: Arc<PipelineConfig>,
}

impl KeywordPipeline {
    pub fn new(
        store: Store,
        search: SearchCache,
        extractor: Arc<dyn PageExtractor>,
        analyzer: BatchAnalyzer,
        dispatcher: NotificationDispatcher,
        cfg: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            store,
            search,
            extractor,
            analyzer,
            dispatcher,
            cfg,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    /// Run one keyword unit. Each storage step takes its own connection and
    /// gives it back before the next fetch, analysis call or cooldown, so
    /// sibling units never wait on this one. Timeouts and schema failures drop
    /// their chunk and the run carries on; a transient provider error aborts
    /// the unit so the retry controller can re-run it.
    pub async fn process_keyword(
        &self,
        keyword: &str,
        force: bool,
    ) -> Result<KeywordStats, PipelineError> {
        let mut stats = KeywordStats::default();

        let urls = self.search.resolve_urls(&self.store, keyword, force).await?;
        stats.candidates = urls.len();

        let items =
            collect_work_items(&self.store, self.extractor.as_ref(), &urls, &self.cfg).await?;
        stats.articles = items.len();
        info!(target: "pipeline", keyword, candidates = urls.len(), articles = items.len(), "work items ready");

        let chunks: Vec<_> = items.chunks(self.cfg.chunk_size.max(1)).collect();
        stats.chunks = chunks.len();
        let cooldown = self.cfg.chunk_cooldown();

        for (idx, chunk) in chunks.iter().enumerate() {
            let analyzed = match self.analyzer.analyze_chunk(keyword, chunk).await {
                Ok(a) => a,
                Err(ChunkError::Provider(e)) if e.is_transient() => {
                    warn!(target: "pipeline", keyword, chunk = idx, error = %e, "transient provider error; aborting unit");
                    return Err(e.into());
                }
                Err(e) => {
                    warn!(target: "pipeline", keyword, chunk = idx, size = chunk.len(), error = %e, "chunk dropped");
                    counter!("pipeline_chunks_failed_total").increment(1);
                    stats.chunks_failed += 1;
                    continue;
                }
            };
            stats.extra_discarded += analyzed.extra_discarded;
            stats.unmatched += analyzed.unmatched;

            {
                let mut session = self.store.session().await?;
                let write =
                    persist_chunk(&mut session, keyword, &analyzed.pairs, Utc::now()).await?;
                stats.persisted += write.persisted.len();
                stats.duplicates += write.duplicates;
                stats.metrics += write.metrics;

                for item in &write.persisted {
                    match self.dispatcher.enqueue_for_item(&mut session, item).await {
                        Ok(n) => stats.notifications += n,
                        Err(e) => {
                            warn!(target: "notify", keyword, news_id = item.id, error = %e, "subscriber lookup failed; alerts skipped")
                        }
                    }
                }
            }

            if idx + 1 < chunks.len() && !cooldown.is_zero() {
                tokio::time::sleep(cooldown).await;
            }
        }

        info!(
            target: "pipeline",
            keyword,
            persisted = stats.persisted,
            duplicates = stats.duplicates,
            chunks_failed = stats.chunks_failed,
            notifications = stats.notifications,
            "keyword processed"
        );
        Ok(stats)
    }
}
