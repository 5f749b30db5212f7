// src/store.rs
//! SQLite-backed shared storage. The schema mirrors the tables owned by the
//! surrounding application; the pipeline only needs read access to keyword
//! config and subscribers, and write access to news / metrics / cache rows.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::types::Json;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use crate::model::{
    KeywordConfig, MetricRecord, MetricType, NewsItem, RiskCategory, SearchCacheEntry,
    Subscriber, Urgency,
};

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS news (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        url TEXT NOT NULL UNIQUE,
        source_domain TEXT,
        summary TEXT,
        content_hash TEXT NOT NULL UNIQUE,
        sentiment_score REAL NOT NULL DEFAULT 0,
        impact_score REAL NOT NULL DEFAULT 0,
        urgency TEXT NOT NULL DEFAULT 'Low',
        risk_type TEXT NOT NULL DEFAULT 'None',
        action_recommendation TEXT,
        price_value REAL,
        unit TEXT,
        industry_tag TEXT,
        published_at TEXT NOT NULL,
        created_at TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_news_industry ON news (industry_tag)",
    "CREATE INDEX IF NOT EXISTS idx_news_published ON news (published_at)",
    r#"CREATE TABLE IF NOT EXISTS market_trends (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        news_id INTEGER NOT NULL REFERENCES news (id) ON DELETE CASCADE,
        metric_name TEXT NOT NULL,
        company_name TEXT,
        metric_value REAL NOT NULL CHECK (metric_value <> 0),
        metric_unit TEXT,
        metric_type TEXT NOT NULL DEFAULT 'absolute',
        industry_tag TEXT,
        published_at TEXT NOT NULL,
        timestamp TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_trends_news ON market_trends (news_id)",
    r#"CREATE TABLE IF NOT EXISTS search_cache (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        keyword TEXT NOT NULL,
        urls TEXT NOT NULL,
        created_at TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_search_cache_keyword ON search_cache (keyword)",
    r#"CREATE TABLE IF NOT EXISTS admin_configs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        search_keywords TEXT NOT NULL DEFAULT '[]',
        scraping_interval_minutes INTEGER NOT NULL DEFAULT 60,
        last_run_at TEXT
    )"#,
    r#"CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        email TEXT NOT NULL UNIQUE,
        hashed_password TEXT NOT NULL DEFAULT '',
        is_admin INTEGER NOT NULL DEFAULT 0,
        industry_preference TEXT,
        receive_email_alerts INTEGER NOT NULL DEFAULT 1
    )"#,
];

pub const DEFAULT_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if needed) the database at `database_url` and ensure the schema.
    pub async fn open(database_url: &str) -> Result<Self, sqlx::Error> {
        Self::open_with_limits(database_url, DEFAULT_MAX_CONNECTIONS, DEFAULT_ACQUIRE_TIMEOUT)
            .await
    }

    /// `open` with an explicit pool size and connection wait limit.
    pub async fn open_with_limits(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, sqlx::Error> {
        info!(target: "persist", url = database_url, max_connections, "opening store");
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10))
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(acquire_timeout)
            .connect_with(options)
            .await?;

        {
            let mut conn = pool.acquire().await?;
            for stmt in SCHEMA {
                sqlx::query(stmt).execute(&mut *conn).await?;
            }
        }
        debug!(target: "persist", "schema ensured");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Connection for one storage step of a keyword unit. Never share across
    /// units, and drop it before any network call or sleep.
    pub async fn session(&self) -> Result<KeywordSession, sqlx::Error> {
        let conn = self.pool.acquire().await?;
        Ok(KeywordSession { conn })
    }

    /// Latest admin config row; empty default when the admin never saved one.
    pub async fn keyword_config(&self) -> Result<KeywordConfig, sqlx::Error> {
        let row = sqlx::query(
            "SELECT search_keywords, scraping_interval_minutes, last_run_at \
             FROM admin_configs ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(KeywordConfig::default());
        };
        let Json(keywords): Json<Vec<String>> = row.try_get("search_keywords")?;
        let interval: i64 = row.try_get("scraping_interval_minutes")?;
        Ok(KeywordConfig {
            keywords,
            scraping_interval_minutes: u32::try_from(interval).unwrap_or(60),
            last_run_at: row.try_get("last_run_at")?,
        })
    }

    /// Admin-side write, used for seeding and tests.
    pub async fn save_keyword_config(&self, cfg: &KeywordConfig) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO admin_configs (search_keywords, scraping_interval_minutes, last_run_at) \
             VALUES (?1, ?2, ?3)",
        )
        .bind(Json(&cfg.keywords))
        .bind(i64::from(cfg.scraping_interval_minutes))
        .bind(cfg.last_run_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Admin-side write, used for seeding and tests.
    pub async fn upsert_subscriber(&self, sub: &Subscriber) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO users (email, industry_preference, receive_email_alerts) \
             VALUES (?1, ?2, ?3) \
             ON CONFLICT (email) DO UPDATE SET \
               industry_preference = excluded.industry_preference, \
               receive_email_alerts = excluded.receive_email_alerts",
        )
        .bind(&sub.email)
        .bind(&sub.industry_preference)
        .bind(sub.receive_email_alerts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_news(&self) -> Result<Vec<NewsItem>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM news ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(news_from_row).collect()
    }

    pub async fn list_metrics(&self) -> Result<Vec<MetricRecord>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM market_trends ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(metric_from_row).collect()
    }

    pub async fn cache_entries(&self, keyword: &str) -> Result<Vec<SearchCacheEntry>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT keyword, urls, created_at FROM search_cache WHERE keyword = ?1 ORDER BY id",
        )
        .bind(keyword)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(cache_from_row).collect()
    }

    /// Admin-side delete. Metrics go with their article.
    pub async fn delete_news(&self, id: i64) -> Result<bool, sqlx::Error> {
        let res = sqlx::query("DELETE FROM news WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}

/// A pooled connection checked out for one storage step.
pub struct KeywordSession {
    conn: PoolConnection<Sqlite>,
}

impl KeywordSession {
    /// Most recent cache entry for `keyword`, regardless of age.
    pub async fn latest_cache_entry(
        &mut self,
        keyword: &str,
    ) -> Result<Option<SearchCacheEntry>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT keyword, urls, created_at FROM search_cache \
             WHERE keyword = ?1 ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(keyword)
        .fetch_optional(&mut *self.conn)
        .await?;
        row.as_ref().map(cache_from_row).transpose()
    }

    /// Overwrite the keyword's cache row in place; insert only if none exists.
    pub async fn upsert_cache(
        &mut self,
        keyword: &str,
        urls: &[String],
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        let updated = sqlx::query(
            "UPDATE search_cache SET urls = ?1, created_at = ?2 WHERE id = ( \
               SELECT id FROM search_cache WHERE keyword = ?3 \
               ORDER BY created_at DESC, id DESC LIMIT 1)",
        )
        .bind(Json(urls))
        .bind(now)
        .bind(keyword)
        .execute(&mut *self.conn)
        .await?;

        if updated.rows_affected() == 0 {
            sqlx::query("INSERT INTO search_cache (keyword, urls, created_at) VALUES (?1, ?2, ?3)")
                .bind(keyword)
                .bind(Json(urls))
                .bind(now)
                .execute(&mut *self.conn)
                .await?;
        }
        Ok(())
    }

    pub async fn news_exists(&mut self, url: &str) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM news WHERE url = ?1")
            .bind(url)
            .fetch_optional(&mut *self.conn)
            .await?;
        Ok(row.is_some())
    }

    pub async fn alert_subscribers(
        &mut self,
        industry: &str,
    ) -> Result<Vec<Subscriber>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT email, industry_preference, receive_email_alerts FROM users \
             WHERE industry_preference = ?1 AND receive_email_alerts = 1 ORDER BY id",
        )
        .bind(industry)
        .fetch_all(&mut *self.conn)
        .await?;
        rows.iter()
            .map(|r| {
                Ok(Subscriber {
                    email: r.try_get("email")?,
                    industry_preference: r.try_get("industry_preference")?,
                    receive_email_alerts: r.try_get("receive_email_alerts")?,
                })
            })
            .collect()
    }

    pub async fn begin(&mut self) -> Result<Transaction<'_, Sqlite>, sqlx::Error> {
        sqlx::Connection::begin(&mut *self.conn).await
    }
}

fn parse_label<T: DeserializeOwned>(col: &str, raw: String) -> Result<T, sqlx::Error> {
    serde_json::from_value(serde_json::Value::String(raw)).map_err(|e| sqlx::Error::ColumnDecode {
        index: col.to_string(),
        source: Box::new(e),
    })
}

fn cache_from_row(row: &SqliteRow) -> Result<SearchCacheEntry, sqlx::Error> {
    let Json(urls): Json<Vec<String>> = row.try_get("urls")?;
    Ok(SearchCacheEntry {
        keyword: row.try_get("keyword")?,
        urls,
        created_at: row.try_get("created_at")?,
    })
}

fn news_from_row(row: &SqliteRow) -> Result<NewsItem, sqlx::Error> {
    let urgency: Urgency = parse_label("urgency", row.try_get("urgency")?)?;
    let risk_type: RiskCategory = parse_label("risk_type", row.try_get("risk_type")?)?;
    Ok(NewsItem {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        source_domain: row.try_get("source_domain")?,
        content_hash: row.try_get("content_hash")?,
        title: row.try_get("title")?,
        summary: row.try_get::<Option<String>, _>("summary")?.unwrap_or_default(),
        sentiment_score: row.try_get("sentiment_score")?,
        impact_score: row.try_get("impact_score")?,
        urgency,
        risk_type,
        action_recommendation: row
            .try_get::<Option<String>, _>("action_recommendation")?
            .unwrap_or_default(),
        price_value: row.try_get("price_value")?,
        unit: row.try_get("unit")?,
        industry_tag: row.try_get::<Option<String>, _>("industry_tag")?.unwrap_or_default(),
        published_at: row.try_get("published_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn metric_from_row(row: &SqliteRow) -> Result<MetricRecord, sqlx::Error> {
    let metric_type: MetricType = parse_label("metric_type", row.try_get("metric_type")?)?;
    Ok(MetricRecord {
        id: row.try_get("id")?,
        news_id: row.try_get("news_id")?,
        metric_name: row.try_get("metric_name")?,
        company_name: row.try_get::<Option<String>, _>("company_name")?.unwrap_or_default(),
        metric_value: row.try_get("metric_value")?,
        metric_unit: row.try_get::<Option<String>, _>("metric_unit")?.unwrap_or_default(),
        metric_type,
        industry_tag: row.try_get::<Option<String>, _>("industry_tag")?.unwrap_or_default(),
        published_at: row.try_get("published_at")?,
    })
}
