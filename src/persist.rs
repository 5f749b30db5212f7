// src/persist.rs
//! Chunk writer: analyses → `news` + `market_trends` rows in one transaction.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use metrics::counter;
use sqlx::{Sqlite, Transaction};
use tracing::{debug, info};

use crate::analyze::{ArticleAnalysis, ExtractedMetric};
use crate::dedup::fingerprint;
use crate::fetch::WorkItem;
use crate::model::{MetricType, NewsItem, MARKET_COMPANY, UNTITLED};
use crate::store::KeywordSession;

/// Naive layouts tried after RFC 3339 / RFC 2822; read as UTC.
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];
const NAIVE_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y", "%B %d, %Y"];

/// Best-effort date parse. Offsets are converted to UTC; naive values are
/// taken to already be UTC.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for f in NAIVE_DATETIME_FORMATS {
        if let Ok(n) = NaiveDateTime::parse_from_str(s, f) {
            return Some(n.and_utc());
        }
    }
    for f in NAIVE_DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, f) {
            return d.and_hms_opt(0, 0, 0).map(|n| n.and_utc());
        }
    }
    None
}

/// Page metadata first, then the provider's date, then `now`.
pub fn resolve_publish_instant(
    metadata_date: Option<&str>,
    provider_date: Option<&str>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    metadata_date
        .and_then(parse_date)
        .or_else(|| provider_date.and_then(parse_date))
        .unwrap_or(now)
}

pub fn source_domain(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

/// Result of committing one chunk.
#[derive(Debug, Clone, Default)]
pub struct ChunkWrite {
    /// Newly inserted rows, in chunk order.
    pub persisted: Vec<NewsItem>,
    /// Articles skipped on a url or fingerprint conflict.
    pub duplicates: usize,
    pub metrics: usize,
}

/// Write every analysed article of a chunk and its non-zero metrics inside a
/// single transaction. A url/fingerprint conflict skips that article only.
pub async fn persist_chunk(
    session: &mut KeywordSession,
    industry: &str,
    pairs: &[(WorkItem, ArticleAnalysis)],
    now: DateTime<Utc>,
) -> Result<ChunkWrite, sqlx::Error> {
    let mut tx = session.begin().await?;
    let mut out = ChunkWrite::default();

    for (item, analysis) in pairs {
        match insert_article(&mut tx, industry, item, analysis, now).await? {
            Some((news, metric_rows)) => {
                out.metrics += metric_rows;
                out.persisted.push(news);
            }
            None => {
                debug!(target: "persist", url = %item.url, "duplicate url or fingerprint; skipped");
                out.duplicates += 1;
            }
        }
    }

    tx.commit().await?;

    counter!("pipeline_news_persisted_total").increment(out.persisted.len() as u64);
    counter!("pipeline_duplicates_skipped_total").increment(out.duplicates as u64);
    counter!("pipeline_metrics_persisted_total").increment(out.metrics as u64);
    info!(
        target: "persist",
        industry,
        persisted = out.persisted.len(),
        duplicates = out.duplicates,
        metrics = out.metrics,
        "chunk committed"
    );
    Ok(out)
}

async fn insert_article(
    tx: &mut Transaction<'_, Sqlite>,
    industry: &str,
    item: &WorkItem,
    analysis: &ArticleAnalysis,
    now: DateTime<Utc>,
) -> Result<Option<(NewsItem, usize)>, sqlx::Error> {
    let published_at = resolve_publish_instant(
        item.metadata_date.as_deref(),
        analysis.published_date.as_deref(),
        now,
    );
    let title = item
        .title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| UNTITLED.to_string());
    let content_hash = fingerprint(&item.text);
    let domain = source_domain(&item.url);
    let primary = analysis.extracted_metrics.first();

    let id: Option<i64> = sqlx::query_scalar(
        "INSERT INTO news (title, url, source_domain, summary, content_hash, \
           sentiment_score, impact_score, urgency, risk_type, action_recommendation, \
           price_value, unit, industry_tag, published_at, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15) \
         ON CONFLICT DO NOTHING RETURNING id",
    )
    .bind(&title)
    .bind(&item.url)
    .bind(&domain)
    .bind(&analysis.summary)
    .bind(&content_hash)
    .bind(analysis.sentiment_score)
    .bind(analysis.impact_score)
    .bind(analysis.urgency.as_str())
    .bind(analysis.risk_type.as_str())
    .bind(&analysis.action_recommendation)
    .bind(primary.map(|m| m.value))
    .bind(primary.map(|m| m.unit.as_str()))
    .bind(industry)
    .bind(published_at)
    .bind(now)
    .fetch_optional(&mut **tx)
    .await?;

    let Some(id) = id else {
        return Ok(None);
    };

    let mut metric_rows = 0;
    for m in analysis.extracted_metrics.iter().filter(|m| m.value != 0.0) {
        insert_metric(tx, id, industry, m, published_at, now).await?;
        metric_rows += 1;
    }

    let news = NewsItem {
        id,
        url: item.url.clone(),
        source_domain: domain,
        content_hash,
        title,
        summary: analysis.summary.clone(),
        sentiment_score: analysis.sentiment_score,
        impact_score: analysis.impact_score,
        urgency: analysis.urgency,
        risk_type: analysis.risk_type,
        action_recommendation: analysis.action_recommendation.clone(),
        price_value: primary.map(|m| m.value),
        unit: primary.map(|m| m.unit.clone()),
        industry_tag: industry.to_string(),
        published_at,
        created_at: now,
    };
    Ok(Some((news, metric_rows)))
}

async fn insert_metric(
    tx: &mut Transaction<'_, Sqlite>,
    news_id: i64,
    industry: &str,
    m: &ExtractedMetric,
    published_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    let company = if m.company.trim().is_empty() {
        MARKET_COMPANY
    } else {
        m.company.trim()
    };
    sqlx::query(
        "INSERT INTO market_trends (news_id, metric_name, company_name, metric_value, \
           metric_unit, metric_type, industry_tag, published_at, timestamp) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )
    .bind(news_id)
    .bind(&m.name)
    .bind(company)
    .bind(m.value)
    .bind(&m.unit)
    .bind(MetricType::classify(&m.name, &m.unit).as_str())
    .bind(industry)
    .bind(published_at)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
