// src/error.rs
use thiserror::Error;

/// Signatures the analysis provider uses for quota / overload responses.
const TRANSIENT_MARKERS: &[&str] = &["RESOURCE_EXHAUSTED", "ResourceExhausted", "429", "503"];

/// Failure talking to the generative-analysis provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider rate limited (429): {0}")]
    RateLimited(String),
    #[error("provider unavailable (503): {0}")]
    Unavailable(String),
    #[error("provider resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("provider http error ({status}): {body}")]
    Http { status: u16, body: String },
    #[error("provider request failed: {0}")]
    Transport(String),
    #[error("provider returned no content")]
    EmptyResponse,
    #[error("provider not configured")]
    NotConfigured,
}

impl ProviderError {
    /// Map a non-success HTTP status + body into the right variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            429 => ProviderError::RateLimited(body),
            503 => ProviderError::Unavailable(body),
            _ if body.contains("RESOURCE_EXHAUSTED") || body.contains("ResourceExhausted") => {
                ProviderError::ResourceExhausted(body)
            }
            _ => ProviderError::Http { status, body },
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::RateLimited(_)
            | ProviderError::Unavailable(_)
            | ProviderError::ResourceExhausted(_) => true,
            ProviderError::Transport(msg) => has_transient_marker(msg),
            _ => false,
        }
    }
}

pub(crate) fn has_transient_marker(msg: &str) -> bool {
    TRANSIENT_MARKERS.iter().any(|m| msg.contains(m))
}

/// Structured validation failure for an analysis batch.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchemaError {
    #[error("malformed json: {0}")]
    Malformed(String),
    #[error("{path}: {message}")]
    Invalid { path: String, message: String },
}

impl SchemaError {
    pub fn invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
        SchemaError::Invalid {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Failure of one keyword unit.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("search failed: {0}")]
    Search(String),
    #[error(transparent)]
    Store(#[from] sqlx::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("keyword task aborted: {0}")]
    Aborted(String),
}

impl PipelineError {
    /// Retry predicate: only quota / unavailability signals from the analysis
    /// provider are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Provider(e) => e.is_transient(),
            _ => false,
        }
    }
}
