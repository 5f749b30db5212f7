// src/model.rs
//! Rows the pipeline reads and writes.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const UNTITLED: &str = "Untitled Market Report";
pub const MARKET_COMPANY: &str = "Market";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum Urgency {
    High,
    Medium,
    Low,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::High => "High",
            Urgency::Medium => "Medium",
            Urgency::Low => "Low",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum RiskCategory {
    Policy,
    Competition,
    #[serde(rename = "Supply Chain")]
    SupplyChain,
    Financial,
    None,
}

impl RiskCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskCategory::Policy => "Policy",
            RiskCategory::Competition => "Competition",
            RiskCategory::SupplyChain => "Supply Chain",
            RiskCategory::Financial => "Financial",
            RiskCategory::None => "None",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Absolute,
    Ratio,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Absolute => "absolute",
            MetricType::Ratio => "ratio",
        }
    }

    /// Percent-like units or share/ratio names are ratios regardless of what
    /// the provider labelled them.
    pub fn classify(name: &str, unit: &str) -> MetricType {
        let unit = unit.to_ascii_lowercase();
        let name = name.to_ascii_lowercase();
        let ratio_unit = unit.contains('%') || unit.contains("percent");
        let ratio_name = ["share", "percentage", "ratio"]
            .iter()
            .any(|w| name.contains(w));
        if ratio_unit || ratio_name {
            MetricType::Ratio
        } else {
            MetricType::Absolute
        }
    }
}

/// Admin-owned crawler configuration. Read-only here.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordConfig {
    pub keywords: Vec<String>,
    pub scraping_interval_minutes: u32,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl Default for KeywordConfig {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            scraping_interval_minutes: 60,
            last_run_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchCacheEntry {
    pub keyword: String,
    pub urls: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewsItem {
    pub id: i64,
    pub url: String,
    pub source_domain: Option<String>,
    pub content_hash: String,
    pub title: String,
    pub summary: String,
    pub sentiment_score: f64,
    pub impact_score: f64,
    pub urgency: Urgency,
    pub risk_type: RiskCategory,
    pub action_recommendation: String,
    pub price_value: Option<f64>,
    pub unit: Option<String>,
    pub industry_tag: String,
    pub published_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub id: i64,
    pub news_id: i64,
    pub metric_name: String,
    pub company_name: String,
    pub metric_value: f64,
    pub metric_unit: String,
    pub metric_type: MetricType,
    pub industry_tag: String,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    pub email: String,
    pub industry_preference: Option<String>,
    pub receive_email_alerts: bool,
}
