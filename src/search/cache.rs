// src/search/cache.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{debug, info};

use super::{prioritize_links, NewsSearcher, SearchQuery};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::store::Store;

/// Per-keyword search results with a TTL, backed by the `search_cache` table.
#[derive(Clone)]
pub struct SearchCache {
    searcher: Arc<dyn NewsSearcher>,
    cfg: Arc<PipelineConfig>,
}

impl SearchCache {
    pub fn new(searcher: Arc<dyn NewsSearcher>, cfg: Arc<PipelineConfig>) -> Self {
        Self { searcher, cfg }
    }

    /// Candidate URLs for `keyword`. A fresh cache entry short-circuits the
    /// search unless `force` is set; otherwise search, prioritise, cap, and
    /// overwrite the keyword's cache row. No connection is held across the
    /// search call.
    pub async fn resolve_urls(
        &self,
        store: &Store,
        keyword: &str,
        force: bool,
    ) -> Result<Vec<String>, PipelineError> {
        self.resolve_urls_at(store, keyword, force, Utc::now()).await
    }

    pub(crate) async fn resolve_urls_at(
        &self,
        store: &Store,
        keyword: &str,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, PipelineError> {
        if !force {
            let cached = store.session().await?.latest_cache_entry(keyword).await?;
            if let Some(entry) = cached {
                let age = now.signed_duration_since(entry.created_at);
                let fresh = age.to_std().map(|a| a < self.cfg.cache_ttl()).unwrap_or(true);
                if fresh {
                    debug!(target: "search", keyword, urls = entry.urls.len(), "search cache hit");
                    counter!("pipeline_search_cache_hits_total").increment(1);
                    return Ok(entry.urls);
                }
            }
        }

        let query = SearchQuery {
            keyword: keyword.to_string(),
            region: self.cfg.search_region.clone(),
            language: self.cfg.search_language.clone(),
            recency: self.cfg.search_recency.clone(),
        };
        let raw = self
            .searcher
            .search(&query)
            .await
            .map_err(|e| PipelineError::Search(format!("{}: {e:#}", self.searcher.name())))?;
        let found = raw.len();
        let urls = prioritize_links(raw, &self.cfg.region_suffix, self.cfg.max_cached_links);

        store.session().await?.upsert_cache(keyword, &urls, now).await?;
        info!(target: "search", keyword, found, kept = urls.len(), force, "search cache refreshed");
        Ok(urls)
    }
}
