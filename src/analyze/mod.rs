// src/analyze/mod.rs
//! Batch analysis: fixed-size chunks of work items → one provider call per
//! chunk → validated, order-aligned analyses.

pub mod provider;
pub mod schema;

use std::time::{Duration, Instant};

use metrics::histogram;
use thiserror::Error;
use tracing::{info, warn};

use crate::error::{ProviderError, SchemaError};
use crate::fetch::WorkItem;
use crate::model::UNTITLED;

pub use provider::{AnalysisProvider, ArticlePrompt, BatchRequest, DynProvider};
pub use schema::{decode_batch, ArticleAnalysis, BatchAnalysis, ExtractedMetric};

/// Why a chunk produced nothing.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("analysis timed out after {0:?}")]
    Timeout(Duration),
    #[error("schema validation failed: {0}")]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl ChunkError {
    /// Quota / overload signals that should bubble up to the retry controller.
    pub fn is_transient(&self) -> bool {
        match self {
            ChunkError::Provider(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Validated analyses paired with the article each one describes.
#[derive(Debug, Clone)]
pub struct AnalyzedChunk {
    pub pairs: Vec<(WorkItem, ArticleAnalysis)>,
    /// Provider returned more entries than articles; the extras were discarded.
    pub extra_discarded: usize,
    /// Trailing articles the provider returned no analysis for.
    pub unmatched: usize,
}

#[derive(Clone)]
pub struct BatchAnalyzer {
    provider: DynProvider,
    timeout: Duration,
}

impl BatchAnalyzer {
    pub fn new(provider: DynProvider, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Analyze one chunk. The provider call is bounded by the timeout, and the
    /// response is accepted or rejected as a whole.
    pub async fn analyze_chunk(
        &self,
        industry: &str,
        chunk: &[WorkItem],
    ) -> Result<AnalyzedChunk, ChunkError> {
        let request = BatchRequest {
            industry: industry.to_string(),
            articles: chunk
                .iter()
                .map(|w| ArticlePrompt {
                    title: w.title.clone().unwrap_or_else(|| UNTITLED.to_string()),
                    text: w.text.clone(),
                })
                .collect(),
        };

        let t0 = Instant::now();
        let raw = tokio::time::timeout(self.timeout, self.provider.analyze(&request))
            .await
            .map_err(|_| ChunkError::Timeout(self.timeout))??;
        histogram!("pipeline_analysis_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        let batch = match decode_batch(&raw) {
            Ok(b) => b,
            // Quota envelopes sometimes arrive with a 200 status.
            Err(e) if raw.contains("RESOURCE_EXHAUSTED") => {
                warn!(target: "analyze", error = %e, "undecodable response carries quota signal");
                return Err(ProviderError::ResourceExhausted(e.to_string()).into());
            }
            Err(e) => return Err(e.into()),
        };

        Ok(align(industry, chunk, batch))
    }
}

/// Pair analyses with articles by position. Extra analyses are dropped;
/// articles without an analysis are left out. Both cases are logged.
fn align(industry: &str, chunk: &[WorkItem], batch: BatchAnalysis) -> AnalyzedChunk {
    let returned = batch.analyses.len();
    let extra_discarded = returned.saturating_sub(chunk.len());
    let unmatched = chunk.len().saturating_sub(returned);

    if extra_discarded > 0 || unmatched > 0 {
        warn!(
            target: "analyze",
            industry,
            articles = chunk.len(),
            returned,
            extra_discarded,
            unmatched,
            "analysis count mismatch"
        );
    } else {
        info!(target: "analyze", industry, articles = chunk.len(), "chunk analyzed");
    }

    let pairs = chunk
        .iter()
        .cloned()
        .zip(batch.analyses)
        .collect::<Vec<_>>();

    AnalyzedChunk {
        pairs,
        extra_discarded,
        unmatched,
    }
}
