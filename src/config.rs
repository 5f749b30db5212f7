// src/config.rs
//! Pipeline tunables. Every field has a default, so an empty or missing
//! `config/pipeline.toml` yields the production constants.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";

fn default_cache_ttl_secs() -> u64 {
    3600
}
fn default_max_cached_links() -> usize {
    8
}
fn default_region_suffix() -> String {
    ".vn".to_string()
}
fn default_search_region() -> String {
    "vn".to_string()
}
fn default_search_language() -> String {
    "vi".to_string()
}
fn default_search_recency() -> String {
    "w".to_string()
}
fn default_min_article_chars() -> usize {
    300
}
fn default_max_article_chars() -> usize {
    4000
}
fn default_chunk_size() -> usize {
    5
}
fn default_analysis_timeout_secs() -> u64 {
    90
}
fn default_retry_delays_secs() -> Vec<u64> {
    vec![10, 30, 60]
}
fn default_max_attempts() -> u32 {
    3
}
fn default_chunk_cooldown_secs() -> u64 {
    2
}
fn default_high_impact_threshold() -> f64 {
    8.0
}
fn default_keyword() -> String {
    "EV market expansion".to_string()
}
fn default_fetch_timeout_secs() -> u64 {
    20
}
fn default_max_page_bytes() -> usize {
    2 * 1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Search cache entries younger than this are reused.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_max_cached_links")]
    pub max_cached_links: usize,
    /// Host suffix of preferred (regional) sources, e.g. ".vn".
    #[serde(default = "default_region_suffix")]
    pub region_suffix: String,
    #[serde(default = "default_search_region")]
    pub search_region: String,
    #[serde(default = "default_search_language")]
    pub search_language: String,
    /// Recency window passed to the search provider ("d", "w", "m").
    #[serde(default = "default_search_recency")]
    pub search_recency: String,
    #[serde(default = "default_min_article_chars")]
    pub min_article_chars: usize,
    #[serde(default = "default_max_article_chars")]
    pub max_article_chars: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_analysis_timeout_secs")]
    pub analysis_timeout_secs: u64,
    #[serde(default = "default_retry_delays_secs")]
    pub retry_delays_secs: Vec<u64>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_chunk_cooldown_secs")]
    pub chunk_cooldown_secs: u64,
    /// Items scoring strictly above this fan out notifications.
    #[serde(default = "default_high_impact_threshold")]
    pub high_impact_threshold: f64,
    /// Used when the keyword list in storage is empty.
    #[serde(default = "default_keyword")]
    pub default_keyword: String,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Downloads stop after this many bytes of HTML.
    #[serde(default = "default_max_page_bytes")]
    pub max_page_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            max_cached_links: default_max_cached_links(),
            region_suffix: default_region_suffix(),
            search_region: default_search_region(),
            search_language: default_search_language(),
            search_recency: default_search_recency(),
            min_article_chars: default_min_article_chars(),
            max_article_chars: default_max_article_chars(),
            chunk_size: default_chunk_size(),
            analysis_timeout_secs: default_analysis_timeout_secs(),
            retry_delays_secs: default_retry_delays_secs(),
            max_attempts: default_max_attempts(),
            chunk_cooldown_secs: default_chunk_cooldown_secs(),
            high_impact_threshold: default_high_impact_threshold(),
            default_keyword: default_keyword(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_page_bytes: default_max_page_bytes(),
        }
    }
}

impl PipelineConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }

    pub fn chunk_cooldown(&self) -> Duration {
        Duration::from_secs(self.chunk_cooldown_secs)
    }

    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_secs
            .iter()
            .map(|s| Duration::from_secs(*s))
            .collect()
    }

    /// Parse TOML and sanitize values that would stall or break the pipeline.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: PipelineConfig = toml::from_str(s).context("parsing pipeline config toml")?;
        Ok(cfg.sanitized())
    }

    fn sanitized(mut self) -> Self {
        let d = PipelineConfig::default();
        if self.chunk_size == 0 {
            self.chunk_size = d.chunk_size;
        }
        if self.max_cached_links == 0 {
            self.max_cached_links = d.max_cached_links;
        }
        if self.max_attempts == 0 {
            self.max_attempts = d.max_attempts;
        }
        if self.retry_delays_secs.is_empty() {
            self.retry_delays_secs = d.retry_delays_secs;
        }
        if self.analysis_timeout_secs == 0 {
            self.analysis_timeout_secs = d.analysis_timeout_secs;
        }
        if self.max_article_chars < self.min_article_chars {
            std::mem::swap(&mut self.max_article_chars, &mut self.min_article_chars);
        }
        if !(0.0..=10.0).contains(&self.high_impact_threshold) {
            self.high_impact_threshold = d.high_impact_threshold;
        }
        if self.max_page_bytes == 0 {
            self.max_page_bytes = d.max_page_bytes;
        }
        if self.default_keyword.trim().is_empty() {
            self.default_keyword = d.default_keyword;
        }
        self
    }
}

/// Load config from an explicit path.
pub fn load_config_from(path: &Path) -> Result<PipelineConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading pipeline config from {}", path.display()))?;
    PipelineConfig::from_toml_str(&content)
}

/// Resolution order:
/// 1) $PIPELINE_CONFIG_PATH (must exist)
/// 2) config/pipeline.toml
/// 3) built-in defaults
pub fn load_config_default() -> Result<PipelineConfig> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_config_from(&pb);
        }
        return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
    }
    let p = PathBuf::from(DEFAULT_CONFIG_PATH);
    if p.exists() {
        return load_config_from(&p);
    }
    Ok(PipelineConfig::default())
}

/// Credentials and endpoints taken from the environment (`.env` in dev).
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub database_url: String,
    pub serper_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_model: Option<String>,
    pub smtp: Option<SmtpSettings>,
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub user: String,
    pub pass: String,
    pub from: String,
}

impl Secrets {
    pub fn from_env() -> Self {
        let var = |k: &str| std::env::var(k).ok().filter(|v| !v.trim().is_empty());
        let smtp = match (
            var("SMTP_HOST"),
            var("SMTP_USER"),
            var("SMTP_PASS"),
            var("NOTIFY_EMAIL_FROM"),
        ) {
            (Some(host), Some(user), Some(pass), Some(from)) => Some(SmtpSettings {
                host,
                user,
                pass,
                from,
            }),
            _ => None,
        };
        Self {
            database_url: var("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://market_intel.db".to_string()),
            serper_api_key: var("SERPER_API_KEY"),
            openai_api_key: var("OPENAI_API_KEY"),
            openai_model: var("OPENAI_MODEL"),
            smtp,
        }
    }
}
