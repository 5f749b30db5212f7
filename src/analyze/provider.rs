// src/analyze/provider.rs
//! Generative-analysis provider abstraction + the OpenAI-compatible client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::schema::batch_json_schema;
use crate::error::ProviderError;

const OPENAI_API_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// One article as presented to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticlePrompt {
    pub title: String,
    pub text: String,
}

/// A multi-article analysis request for one industry keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    pub industry: String,
    pub articles: Vec<ArticlePrompt>,
}

impl BatchRequest {
    /// Numbered article blocks separated by `---`, in input order.
    pub fn render_articles(&self) -> String {
        self.articles
            .iter()
            .enumerate()
            .map(|(i, a)| format!("Article {}: {}\n{}", i + 1, a.title, a.text))
            .collect::<Vec<_>>()
            .join("\n---\n")
    }

    pub fn user_prompt(&self) -> String {
        format!(
            "Analyze the following {count} market news articles for the industry: {industry}.\n\
             Return exactly {count} analyses in the `analyses` array, in the SAME ORDER as the \
             articles below.\n\nArticles:\n{articles}",
            count = self.articles.len(),
            industry = self.industry,
            articles = self.render_articles()
        )
    }
}

/// Low-level provider: does the remote call and returns the raw JSON body of
/// the structured answer. Validation happens in the caller.
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    async fn analyze(&self, request: &BatchRequest) -> Result<String, ProviderError>;
    fn name(&self) -> &'static str;
}

pub type DynProvider = Arc<dyn AnalysisProvider>;

const SYSTEM_PROMPT: &str = "You are a market intelligence analyst. For each article give a \
concise two-sentence summary, a sentiment score (0 very negative, 5 neutral, 10 very positive), \
an impact score (0-10, business importance for the industry), urgency (High/Medium/Low), the \
primary risk category (Policy, Competition, Supply Chain, Financial, None), a short actionable \
recommendation for a business manager, the publication date if stated, and any concrete \
numeric business figures (non-zero values only; company 'Market' when general; data_type \
'ratio' for percentages/shares, otherwise 'absolute').";

/// OpenAI Chat Completions with `json_schema` structured output.
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: &str, model_override: Option<&str>) -> Result<Self, ProviderError> {
        // Overall call deadline is enforced by the analyzer; this is a backstop.
        let http = reqwest::Client::builder()
            .user_agent("market-intel-pipeline/0.1")
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(180))
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            api_key: api_key.to_string(),
            model: model_override.unwrap_or(DEFAULT_MODEL).to_string(),
            base_url: OPENAI_API_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct JsonSchemaFormat {
    name: &'static str,
    strict: bool,
    schema: serde_json::Value,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
    json_schema: JsonSchemaFormat,
}

#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Deserialize)]
struct Resp {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}

#[derive(Deserialize)]
struct ChoiceMsg {
    content: Option<String>,
}

#[async_trait]
impl AnalysisProvider for OpenAiProvider {
    async fn analyze(&self, request: &BatchRequest) -> Result<String, ProviderError> {
        let user = request.user_prompt();
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Msg {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: 0.1,
            response_format: ResponseFormat {
                format_type: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: "news_batch_analysis",
                    strict: true,
                    schema: batch_json_schema(),
                },
            },
        };

        debug!(target: "analyze", model = %self.model, articles = request.articles.len(), "provider request");

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), body));
        }

        let body: Resp = resp
            .json()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ProviderError::EmptyResponse)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Used when no provider key is configured.
pub struct DisabledProvider;

#[async_trait]
impl AnalysisProvider for DisabledProvider {
    async fn analyze(&self, _request: &BatchRequest) -> Result<String, ProviderError> {
        Err(ProviderError::NotConfigured)
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Build the provider from an optional key; no key → disabled.
pub fn build_provider(api_key: Option<&str>, model: Option<&str>) -> Result<DynProvider, ProviderError> {
    match api_key {
        Some(key) => Ok(Arc::new(OpenAiProvider::new(key, model)?)),
        None => Ok(Arc::new(DisabledProvider)),
    }
}
