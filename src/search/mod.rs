// src/search/mod.rs
//! News search client and link prioritisation.

pub mod cache;

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::counter;
use serde::Deserialize;
use tracing::info;

pub use cache::SearchCache;

const SERPER_NEWS_URL: &str = "https://google.serper.dev/news";

/// Region/language/recency-biased query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub keyword: String,
    pub region: String,
    pub language: String,
    /// "d" | "w" | "m" | "y"
    pub recency: String,
}

#[async_trait]
pub trait NewsSearcher: Send + Sync {
    /// Ranked result links, best first.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<String>>;
    fn name(&self) -> &'static str;
}

/// Serper.dev Google News endpoint.
pub struct SerperNewsSearcher {
    api_key: String,
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct SerperNewsResponse {
    #[serde(default)]
    news: Vec<SerperNewsItem>,
}

#[derive(Debug, Deserialize)]
struct SerperNewsItem {
    #[serde(default)]
    link: String,
}

impl SerperNewsSearcher {
    pub fn new(api_key: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("building search http client")?;
        Ok(Self {
            api_key: api_key.to_string(),
            client,
            endpoint: SERPER_NEWS_URL.to_string(),
        })
    }

    pub fn with_endpoint(mut self, url: &str) -> Self {
        self.endpoint = url.to_string();
        self
    }
}

#[async_trait]
impl NewsSearcher for SerperNewsSearcher {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<String>> {
        info!(target: "search", keyword = %query.keyword, region = %query.region, "serper news search");
        counter!("pipeline_search_calls_total").increment(1);

        let body = serde_json::json!({
            "q": query.keyword,
            "tbs": format!("qdr:{}", query.recency),
            "gl": query.region,
            "hl": query.language,
        });

        let data: SerperNewsResponse = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("serper request failed")?
            .error_for_status()
            .context("serper non-2xx")?
            .json()
            .await
            .context("parsing serper response")?;

        let links: Vec<String> = data
            .news
            .into_iter()
            .map(|n| n.link)
            .filter(|l| !l.is_empty())
            .collect();
        info!(target: "search", keyword = %query.keyword, count = links.len(), "serper search complete");
        Ok(links)
    }

    fn name(&self) -> &'static str {
        "serper"
    }
}

/// Used when no search API key is configured; every search comes back empty.
pub struct DisabledSearcher;

#[async_trait]
impl NewsSearcher for DisabledSearcher {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<String>> {
        tracing::warn!(target: "search", keyword = %query.keyword, "search disabled (no SERPER_API_KEY)");
        Ok(Vec::new())
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// True when the link's host ends with `suffix` (e.g. ".vn").
pub fn is_regional(link: &str, suffix: &str) -> bool {
    let suffix = suffix.trim().to_ascii_lowercase();
    if suffix.is_empty() {
        return false;
    }
    url::Url::parse(link)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .is_some_and(|host| {
            host.ends_with(&suffix) || format!(".{host}") == suffix
        })
}

/// Regional links first (in ranked order), then the rest, deduplicated and
/// capped at `max`.
pub fn prioritize_links(links: Vec<String>, region_suffix: &str, max: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let unique: Vec<String> = links
        .into_iter()
        .filter(|l| seen.insert(l.clone()))
        .collect();

    let (regional, other): (Vec<String>, Vec<String>) = unique
        .into_iter()
        .partition(|l| is_regional(l, region_suffix));

    regional.into_iter().chain(other).take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::serve_once;

    fn links(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn regional_match_is_host_suffix() {
        assert!(is_regional("https://vnexpress.vn/a", ".vn"));
        assert!(is_regional("https://TUOITRE.VN/a?x=1", ".vn"));
        assert!(!is_regional("https://vnexpress.net/a", ".vn"));
        assert!(!is_regional("https://example.com/path.vn", ".vn"));
        assert!(!is_regional("not a url", ".vn"));
    }

    #[test]
    fn ten_links_three_regional() {
        let input = links(&[
            "https://a.com/1",
            "https://b.vn/2",
            "https://c.com/3",
            "https://d.com/4",
            "https://e.vn/5",
            "https://f.com/6",
            "https://g.com/7",
            "https://h.vn/8",
            "https://i.com/9",
            "https://j.com/10",
        ]);
        let out = prioritize_links(input, ".vn", 8);
        assert_eq!(out.len(), 8);
        assert_eq!(
            &out[..3],
            &links(&["https://b.vn/2", "https://e.vn/5", "https://h.vn/8"])[..]
        );
        assert_eq!(
            &out[3..],
            &links(&[
                "https://a.com/1",
                "https://c.com/3",
                "https://d.com/4",
                "https://f.com/6",
                "https://g.com/7"
            ])[..]
        );
    }

    #[test]
    fn no_regional_keeps_rank_order_and_cap() {
        let input: Vec<String> = (0..12).map(|i| format!("https://x{i}.com/")).collect();
        let out = prioritize_links(input.clone(), ".vn", 8);
        assert_eq!(out, input[..8].to_vec());
    }

    fn request_json(raw: &str) -> serde_json::Value {
        let body = raw.split("\r\n\r\n").nth(1).unwrap_or_default();
        serde_json::from_str(body).unwrap()
    }

    #[tokio::test]
    async fn serper_query_carries_region_language_and_recency() {
        let reply = serde_json::json!({
            "news": [
                {"title": "a", "link": "https://a.vn/1"},
                {"title": "no link"},
                {"title": "b", "link": "https://b.com/2"}
            ]
        });
        let (base, server) = serve_once(200, "application/json", reply.to_string()).await;
        let searcher = SerperNewsSearcher::new("key-123").unwrap().with_endpoint(&base);
        let query = SearchQuery {
            keyword: "EV market".into(),
            region: "vn".into(),
            language: "vi".into(),
            recency: "w".into(),
        };

        let links = searcher.search(&query).await.unwrap();
        assert_eq!(links, vec!["https://a.vn/1".to_string(), "https://b.com/2".to_string()]);

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST / HTTP/1.1"));
        assert!(raw.to_ascii_lowercase().contains("x-api-key: key-123"));
        let sent = request_json(&raw);
        assert_eq!(sent["q"], "EV market");
        assert_eq!(sent["gl"], "vn");
        assert_eq!(sent["hl"], "vi");
        assert_eq!(sent["tbs"], "qdr:w");
    }

    #[tokio::test]
    async fn serper_error_status_is_a_search_failure() {
        let (base, _server) = serve_once(403, "application/json", "{}".into()).await;
        let searcher = SerperNewsSearcher::new("bad").unwrap().with_endpoint(&base);
        let query = SearchQuery {
            keyword: "steel".into(),
            region: "vn".into(),
            language: "vi".into(),
            recency: "w".into(),
        };
        let err = searcher.search(&query).await.unwrap_err();
        assert!(format!("{err:#}").contains("serper non-2xx"));
    }

    #[test]
    fn duplicates_collapse() {
        let input = links(&["https://a.vn/1", "https://a.vn/1", "https://b.com/2"]);
        assert_eq!(
            prioritize_links(input, ".vn", 8),
            links(&["https://a.vn/1", "https://b.com/2"])
        );
    }
}
