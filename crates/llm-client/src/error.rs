use std::time::Duration;

use thiserror::Error;

/// Longest response body kept in an error message.
pub const MAX_ERROR_BODY: usize = 2000;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error(
        "no LLM provider configured: set OPENAI_API_KEY (optionally OPENAI_MODEL/OPENAI_API_BASE/OPENAI_ORG) \
         or GEMINI_API_KEY (optionally GEMINI_MODEL)"
    )]
    NotConfigured,

    #[error("invalid {name}={value:?}: {reason}")]
    InvalidSetting {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("HTTP {status} from {url}: {body}")]
    Http {
        status: u16,
        url: String,
        body: String,
        retry_after: Option<Duration>,
    },

    #[error("HTTP request failed to {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} timed out after {secs}s")]
    Timeout { url: String, secs: u64 },

    #[error("invalid JSON response from {url}: {body}")]
    Parse { url: String, body: String },
}

impl LlmError {
    /// Rate limits, gateway errors, dropped connections and timeouts are worth
    /// another attempt; everything else is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Http { status, .. } => is_retryable_status(*status),
            LlmError::Transport { .. } | LlmError::Timeout { .. } => true,
            LlmError::NotConfigured | LlmError::InvalidSetting { .. } | LlmError::Parse { .. } => {
                false
            }
        }
    }

    /// Server-supplied `Retry-After` hint, when the response carried one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            LlmError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Clip `body` to [`MAX_ERROR_BODY`] characters on a char boundary.
pub fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => body[..idx].to_string(),
        None => body.to_string(),
    }
}
