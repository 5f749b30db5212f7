// tests/common/mod.rs
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use market_intel_pipeline::analyze::{AnalysisProvider, BatchAnalyzer, BatchRequest};
use market_intel_pipeline::fetch::{ExtractedPage, PageExtractor};
use market_intel_pipeline::notify::{NotificationDispatcher, NotificationJob, Notifier};
use market_intel_pipeline::search::{NewsSearcher, SearchCache, SearchQuery};
use market_intel_pipeline::{KeywordPipeline, PipelineConfig, ProviderError, Store};

pub async fn temp_store() -> (Store, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("e2e.db").display());
    (Store::open(&url).await.unwrap(), dir)
}

/// Store with a tiny pool that gives up on a connection after `wait`.
pub async fn small_store(connections: u32, wait: Duration) -> (Store, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("small.db").display());
    let store = Store::open_with_limits(&url, connections, wait).await.unwrap();
    (store, dir)
}

/// No cooldown and no backoff; everything else at production values.
pub fn fast_config() -> PipelineConfig {
    PipelineConfig {
        chunk_cooldown_secs: 0,
        retry_delays_secs: vec![0],
        ..PipelineConfig::default()
    }
}

/// Hex token soup unique to `seed`, long enough to pass the length gate.
pub fn article_text(seed: &str) -> String {
    use sha2::{Digest, Sha256};
    (0..12)
        .map(|i| format!("{:x}", Sha256::digest(format!("{seed}-{i}"))))
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Default)]
pub struct CountingSearcher {
    pub results: HashMap<String, Vec<String>>,
    pub calls: Mutex<Vec<String>>,
}

impl CountingSearcher {
    pub fn with(mut self, keyword: &str, links: &[&str]) -> Self {
        self.results.insert(
            keyword.to_string(),
            links.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl NewsSearcher for CountingSearcher {
    async fn search(&self, q: &SearchQuery) -> anyhow::Result<Vec<String>> {
        self.calls.lock().push(q.keyword.clone());
        match self.results.get(&q.keyword) {
            Some(v) => Ok(v.clone()),
            None => anyhow::bail!("no results configured for {}", q.keyword),
        }
    }
    fn name(&self) -> &'static str {
        "counting"
    }
}

#[derive(Default)]
pub struct MapExtractor {
    pub pages: HashMap<String, ExtractedPage>,
    pub calls: Mutex<Vec<String>>,
    /// Simulated download time per page.
    pub latency: Option<Duration>,
}

impl MapExtractor {
    pub fn page(mut self, url: &str, text: String, title: Option<&str>) -> Self {
        self.pages.insert(
            url.to_string(),
            ExtractedPage {
                text,
                title: title.map(str::to_string),
                date: None,
            },
        );
        self
    }

    pub fn slow(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl PageExtractor for MapExtractor {
    async fn extract(&self, url: &str) -> anyhow::Result<Option<ExtractedPage>> {
        self.calls.lock().push(url.to_string());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match self.pages.get(url) {
            Some(p) => Ok(Some(p.clone())),
            None => anyhow::bail!("404 for {url}"),
        }
    }
    fn name(&self) -> &'static str {
        "map"
    }
}

pub enum Canned {
    Body(String),
    Quota,
}

/// Replies per industry; each call to an industry pops its next reply,
/// the last one repeats.
#[derive(Default)]
pub struct CannedProvider {
    pub replies: Mutex<HashMap<String, Vec<Canned>>>,
    pub requests: Mutex<Vec<BatchRequest>>,
}

impl CannedProvider {
    pub fn reply(self, industry: &str, r: Canned) -> Self {
        self.replies
            .lock()
            .entry(industry.to_string())
            .or_default()
            .push(r);
        self
    }

    pub fn calls_for(&self, industry: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.industry == industry)
            .count()
    }
}

#[async_trait]
impl AnalysisProvider for CannedProvider {
    async fn analyze(&self, request: &BatchRequest) -> Result<String, ProviderError> {
        self.requests.lock().push(request.clone());
        let mut replies = self.replies.lock();
        let queue = replies
            .get_mut(&request.industry)
            .ok_or(ProviderError::EmptyResponse)?;
        let reply = if queue.len() > 1 {
            queue.remove(0)
        } else {
            match queue.first() {
                Some(Canned::Body(b)) => Canned::Body(b.clone()),
                Some(Canned::Quota) => Canned::Quota,
                None => return Err(ProviderError::EmptyResponse),
            }
        };
        match reply {
            Canned::Body(b) => Ok(b),
            Canned::Quota => Err(ProviderError::from_status(
                429,
                "{\"error\":{\"status\":\"RESOURCE_EXHAUSTED\"}}".into(),
            )),
        }
    }
    fn name(&self) -> &'static str {
        "canned"
    }
}

#[derive(Default)]
pub struct Outbox {
    pub jobs: Mutex<Vec<NotificationJob>>,
}

#[async_trait]
impl Notifier for Outbox {
    async fn deliver(&self, job: &NotificationJob) -> anyhow::Result<()> {
        self.jobs.lock().push(job.clone());
        Ok(())
    }
    fn name(&self) -> &'static str {
        "outbox"
    }
}

pub fn analysis(impact: f64, metrics: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "summary": "Two sentence summary. Second sentence.",
        "sentiment_score": 6.0,
        "impact_score": impact,
        "urgency": "Medium",
        "risk_type": "Supply Chain",
        "action_recommendation": "Secure supply.",
        "published_date": "2025-05-01",
        "extracted_metrics": metrics
    })
}

pub fn batch(entries: Vec<serde_json::Value>) -> String {
    serde_json::json!({ "analyses": entries }).to_string()
}

pub struct Harness {
    pub pipeline: KeywordPipeline,
    pub worker: tokio::task::JoinHandle<()>,
}

pub fn harness(
    store: Store,
    searcher: Arc<CountingSearcher>,
    extractor: Arc<MapExtractor>,
    provider: Arc<CannedProvider>,
    outbox: Arc<Outbox>,
    cfg: PipelineConfig,
) -> Harness {
    let cfg = Arc::new(cfg);
    let (dispatcher, worker) = NotificationDispatcher::spawn(outbox, cfg.high_impact_threshold);
    let pipeline = KeywordPipeline::new(
        store,
        SearchCache::new(searcher, cfg.clone()),
        extractor,
        BatchAnalyzer::new(provider, Duration::from_secs(5)),
        dispatcher,
        cfg,
    );
    Harness { pipeline, worker }
}
