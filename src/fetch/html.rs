// src/fetch/html.rs
//! HTTP fetch + Readability extraction + metadata scraping.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use regex::Regex;
use spider_transformations::transformation::content::{
    transform_content_input, ReturnFormat, TransformConfig, TransformInput,
};
use tracing::debug;

use super::{ExtractedPage, PageExtractor};

const USER_AGENT: &str = "market-intel-pipeline/0.1 (+news ingestion)";

/// Meta keys that carry a publish date, in priority order.
const DATE_META_KEYS: &[&str] = &[
    "article:published_time",
    "og:published_time",
    "datepublished",
    "pubdate",
    "publishdate",
    "date",
    "dc.date",
    "dc.date.issued",
];

pub struct HttpPageExtractor {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl HttpPageExtractor {
    pub fn new(timeout: Duration, max_body_bytes: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()
            .context("building fetch http client")?;
        Ok(Self {
            client,
            max_body_bytes: max_body_bytes.max(1),
        })
    }

    /// GET `url` and read at most `max_body_bytes` of the body.
    pub(crate) async fn fetch_html(&self, url: url::Url) -> Result<Vec<u8>> {
        let mut resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .context("fetch request")?
            .error_for_status()
            .context("fetch non-2xx")?;

        let announced = resp.content_length();
        if announced.is_some_and(|len| len > self.max_body_bytes as u64) {
            debug!(target: "fetch", url = %url, announced, cap = self.max_body_bytes, "oversized page; reading prefix only");
        }

        let mut body = Vec::with_capacity(
            announced.map_or(64 * 1024, |len| len as usize).min(self.max_body_bytes),
        );
        while let Some(chunk) = resp.chunk().await.context("fetch body")? {
            let room = self.max_body_bytes - body.len();
            if chunk.len() >= room {
                body.extend_from_slice(&chunk[..room]);
                break;
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

#[async_trait]
impl PageExtractor for HttpPageExtractor {
    async fn extract(&self, url: &str) -> Result<Option<ExtractedPage>> {
        let parsed = url::Url::parse(url).context("invalid url")?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            bail!("only http/https urls are fetched, got {}", parsed.scheme());
        }

        let body = self.fetch_html(parsed).await?;
        let page = extract_page(&body, url);
        debug!(target: "fetch", url, bytes = body.len(), chars = page.text.chars().count(), "extracted");
        if page.text.is_empty() {
            return Ok(None);
        }
        Ok(Some(page))
    }

    fn name(&self) -> &'static str {
        "http+readability"
    }
}

/// Main text via Readability plus title/date from page metadata.
pub fn extract_page(html: &[u8], url: &str) -> ExtractedPage {
    let text = clean_text(&readability_text(html, url));
    let raw = String::from_utf8_lossy(html);
    let meta = meta_tags(&raw);
    ExtractedPage {
        text,
        title: page_title(&raw, &meta),
        date: page_date(&raw, &meta),
    }
}

fn readability_text(html: &[u8], url: &str) -> String {
    let parsed_url = url::Url::parse(url).ok();
    let config = TransformConfig {
        readability: true,
        main_content: true,
        return_format: ReturnFormat::Markdown,
        filter_images: true,
        filter_svg: true,
        clean_html: true,
    };
    let input = TransformInput {
        url: parsed_url.as_ref(),
        content: html,
        screenshot_bytes: None,
        encoding: None,
        selector_config: None,
        ignore_tags: None,
    };
    transform_content_input(input, &config)
}

/// Collapse runs of spaces and blank lines; keep paragraph breaks.
pub fn clean_text(s: &str) -> String {
    static RE_SPACES: OnceCell<Regex> = OnceCell::new();
    static RE_BLANKS: OnceCell<Regex> = OnceCell::new();
    let re_spaces = RE_SPACES.get_or_init(|| Regex::new(r"[ \t\u{00A0}]+").unwrap());
    let re_blanks = RE_BLANKS.get_or_init(|| Regex::new(r"\n\s*\n+").unwrap());

    let out = html_escape::decode_html_entities(s);
    let out = re_spaces.replace_all(&out, " ");
    let out = re_blanks.replace_all(&out, "\n\n");
    out.trim().to_string()
}

/// Lower-cased `name`/`property`/`itemprop` → `content` for every `<meta>` tag.
fn meta_tags(html: &str) -> HashMap<String, String> {
    static RE_META: OnceCell<Regex> = OnceCell::new();
    static RE_ATTR: OnceCell<Regex> = OnceCell::new();
    let re_meta = RE_META.get_or_init(|| Regex::new(r"(?is)<meta\s[^>]*>").unwrap());
    let re_attr = RE_ATTR.get_or_init(|| {
        Regex::new(r#"(?is)([a-z][a-z0-9:_-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
    });

    let mut out = HashMap::new();
    for tag in re_meta.find_iter(html) {
        let mut key = None;
        let mut content = None;
        for cap in re_attr.captures_iter(tag.as_str()) {
            let attr = cap[1].to_ascii_lowercase();
            let val = cap
                .get(2)
                .or_else(|| cap.get(3))
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            match attr.as_str() {
                "name" | "property" | "itemprop" => key = Some(val.to_ascii_lowercase()),
                "content" => content = Some(val),
                _ => {}
            }
        }
        if let (Some(k), Some(c)) = (key, content) {
            if !c.is_empty() {
                out.entry(k).or_insert(c);
            }
        }
    }
    out
}

fn page_title(html: &str, meta: &HashMap<String, String>) -> Option<String> {
    if let Some(t) = meta.get("og:title").or_else(|| meta.get("twitter:title")) {
        return Some(clean_text(t));
    }
    static RE_TITLE: OnceCell<Regex> = OnceCell::new();
    let re = RE_TITLE.get_or_init(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());
    re.captures(html)
        .map(|c| clean_text(&c[1]))
        .filter(|t| !t.is_empty())
}

/// `datePublished` from the first JSON-LD block that has one. Handles a bare
/// object, a top-level array and an `@graph` list.
fn json_ld_date(html: &str) -> Option<String> {
    static RE_LD: OnceCell<Regex> = OnceCell::new();
    let re = RE_LD.get_or_init(|| {
        Regex::new(r#"(?is)<script[^>]*type\s*=\s*["']application/ld\+json["'][^>]*>(.*?)</script>"#)
            .unwrap()
    });

    fn published(node: &serde_json::Value) -> Option<String> {
        if let Some(items) = node.as_array() {
            return items.iter().find_map(published);
        }
        if let Some(date) = node.get("datePublished").and_then(|v| v.as_str()) {
            let date = date.trim();
            if !date.is_empty() {
                return Some(date.to_string());
            }
        }
        node.get("@graph").and_then(published)
    }

    re.captures_iter(html)
        .filter_map(|c| serde_json::from_str::<serde_json::Value>(c[1].trim()).ok())
        .find_map(|v| published(&v))
}

fn page_date(html: &str, meta: &HashMap<String, String>) -> Option<String> {
    if let Some(date) = json_ld_date(html) {
        return Some(date);
    }
    for key in DATE_META_KEYS {
        if let Some(v) = meta.get(*key) {
            return Some(v.clone());
        }
    }
    static RE_TIME: OnceCell<Regex> = OnceCell::new();
    let re = RE_TIME
        .get_or_init(|| Regex::new(r#"(?is)<time[^>]*\sdatetime\s*=\s*["']([^"']+)["']"#).unwrap());
    re.captures(html).map(|c| c[1].trim().to_string())
}
