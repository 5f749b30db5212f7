// src/fetch/mod.rs
//! Candidate URL → analysable work item.

pub mod html;

use anyhow::Result;
use async_trait::async_trait;
use metrics::counter;
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::dedup::filter_new_urls;
use crate::store::Store;

pub use html::HttpPageExtractor;

/// Output of the page-fetch-and-extract service.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtractedPage {
    pub text: String,
    pub title: Option<String>,
    /// Raw date string from page metadata, unparsed.
    pub date: Option<String>,
}

#[async_trait]
pub trait PageExtractor: Send + Sync {
    /// Download `url` and extract its main text. `Ok(None)` means the page had
    /// nothing extractable.
    async fn extract(&self, url: &str) -> Result<Option<ExtractedPage>>;
    fn name(&self) -> &'static str;
}

/// One article ready for analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub url: String,
    /// Extracted text, truncated to the configured maximum.
    pub text: String,
    pub title: Option<String>,
    pub metadata_date: Option<String>,
}

/// Fetch and extract every URL not yet stored, in discovery order.
/// Fetch/extract failures drop that URL only. The stored-url check runs on its
/// own connection, released before the first download.
pub async fn collect_work_items(
    store: &Store,
    extractor: &dyn PageExtractor,
    urls: &[String],
    cfg: &PipelineConfig,
) -> Result<Vec<WorkItem>, sqlx::Error> {
    let fresh = {
        let mut session = store.session().await?;
        filter_new_urls(&mut session, urls).await?
    };
    let mut out = Vec::with_capacity(fresh.len());

    for url in fresh {
        let page = match extractor.extract(&url).await {
            Ok(Some(p)) => p,
            Ok(None) => {
                debug!(target: "fetch", url = %url, "nothing extracted");
                counter!("pipeline_fetch_failures_total").increment(1);
                continue;
            }
            Err(e) => {
                warn!(target: "fetch", url = %url, error = %format!("{e:#}"), "fetch failed; dropping url");
                counter!("pipeline_fetch_failures_total").increment(1);
                continue;
            }
        };

        if let Some(item) = to_work_item(url, page, cfg) {
            counter!("pipeline_articles_extracted_total").increment(1);
            out.push(item);
        }
    }
    Ok(out)
}

fn to_work_item(url: String, page: ExtractedPage, cfg: &PipelineConfig) -> Option<WorkItem> {
    let len = page.text.chars().count();
    if len < cfg.min_article_chars {
        debug!(target: "fetch", url = %url, len, "too short; skipped");
        return None;
    }
    Some(WorkItem {
        url,
        text: truncate_chars(&page.text, cfg.max_article_chars),
        title: page.title.filter(|t| !t.trim().is_empty()),
        metadata_date: page.date,
    })
}

/// First `max` characters (not bytes) of `s`.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Canned pages keyed by URL; unknown URLs fail like a network error.
    #[derive(Default)]
    pub struct FakeExtractor {
        pub pages: HashMap<String, ExtractedPage>,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeExtractor {
        pub fn with_page(mut self, url: &str, text: &str, title: Option<&str>, date: Option<&str>) -> Self {
            self.pages.insert(
                url.to_string(),
                ExtractedPage {
                    text: text.to_string(),
                    title: title.map(str::to_string),
                    date: date.map(str::to_string),
                },
            );
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageExtractor for FakeExtractor {
        async fn extract(&self, url: &str) -> Result<Option<ExtractedPage>> {
            self.calls.lock().unwrap().push(url.to_string());
            match self.pages.get(url) {
                Some(p) => Ok(Some(p.clone())),
                None => Err(anyhow::anyhow!("connection refused")),
            }
        }
        fn name(&self) -> &'static str {
            "fake"
        }
    }

    /// Loopback HTTP/1.1 server that answers exactly one request with
    /// `status` and `body`. The handle yields the raw request it received.
    pub async fn serve_once(
        status: u16,
        content_type: &'static str,
        body: String,
    ) -> (String, tokio::task::JoinHandle<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = sock.read(&mut buf).await.unwrap_or(0);
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                if request_complete(&raw) {
                    break;
                }
            }
            let head = format!(
                "HTTP/1.1 {status} Stub\r\ncontent-type: {content_type}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                body.len()
            );
            // The client may hang up early on purpose.
            let _ = sock.write_all(head.as_bytes()).await;
            let _ = sock.write_all(body.as_bytes()).await;
            let _ = sock.shutdown().await;
            String::from_utf8_lossy(&raw).into_owned()
        });
        (format!("http://{addr}"), handle)
    }

    fn request_complete(raw: &[u8]) -> bool {
        let Some(end) = raw.windows(4).position(|w| w == b"\r\n\r\n") else {
            return false;
        };
        let head = String::from_utf8_lossy(&raw[..end]).to_ascii_lowercase();
        let body_len = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        raw.len() >= end + 4 + body_len
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeExtractor;
    use super::*;
    use crate::store::testing::temp_store;

    fn long_text(seed: &str, n: usize) -> String {
        let mut s = String::new();
        while s.chars().count() < n {
            s.push_str(seed);
            s.push(' ');
        }
        s
    }

    #[test]
    fn truncation_is_char_safe() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        let vi = "Thị trường xe điện";
        assert_eq!(truncate_chars(vi, 4).chars().count(), 4);
    }

    #[tokio::test]
    async fn drops_failures_and_short_pages_and_truncates() {
        let (store, _dir) = temp_store().await;
        let body = long_text("EV battery makers expand capacity.", 5000);
        let ex = FakeExtractor::default()
            .with_page("https://a.vn/1", &body, Some("Battery boom"), Some("2025-03-01"))
            .with_page("https://b.com/2", "too short", Some("Short"), None)
            .with_page("https://d.com/4", &long_text("x", 300), None, None);

        let urls: Vec<String> = ["https://a.vn/1", "https://b.com/2", "https://c.com/3", "https://d.com/4"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let cfg = PipelineConfig::default();
        let items = collect_work_items(&store, &ex, &urls, &cfg).await.unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].url, "https://a.vn/1");
        assert_eq!(items[0].text.chars().count(), 4000);
        assert_eq!(items[0].title.as_deref(), Some("Battery boom"));
        assert_eq!(items[0].metadata_date.as_deref(), Some("2025-03-01"));
        assert_eq!(items[1].url, "https://d.com/4");
        assert_eq!(items[1].title, None);
        assert_eq!(ex.calls().len(), 4);
    }

    #[tokio::test]
    async fn stored_urls_are_never_fetched() {
        let (store, _dir) = temp_store().await;
        sqlx::query(
            "INSERT INTO news (title, url, content_hash, published_at, created_at) \
             VALUES ('t', 'https://a.vn/1', 'h', '2025-01-01T00:00:00Z', '2025-01-01T00:00:00Z')",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let ex = FakeExtractor::default();
        let urls = vec!["https://a.vn/1".to_string()];
        let items = collect_work_items(&store, &ex, &urls, &PipelineConfig::default())
            .await
            .unwrap();
        assert!(items.is_empty());
        assert!(ex.calls().is_empty());
    }
}
