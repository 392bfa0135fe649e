use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::truncate_body;
use crate::provider::{GeminiConfig, LlmConfig, OpenAiConfig, Provider};
use crate::types::{
    ChatMessage, ChatRequest, ChatResponse, Content, GenerateRequest, GenerateResponse,
    GenerationConfig, Part,
};
use crate::{LlmError, Result};

// ─── LlmClient ────────────────────────────────────────────────────────────

/// One-shot text completion against the configured provider.
#[derive(Debug, Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("storywork/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| LlmError::Transport {
                url: "<client builder>".into(),
                source,
            })?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Send `prompt` as a single user message and return the reply text.
    ///
    /// Exactly one HTTP attempt; inspect [`LlmError::is_retryable`] to decide
    /// whether to try again.
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        match &self.config.provider {
            Provider::OpenAi(cfg) => self.complete_openai(cfg, prompt).await,
            Provider::Gemini(cfg) => self.complete_gemini(cfg, prompt).await,
        }
    }

    /// A single low-cost call that surfaces bad keys, models or endpoints
    /// before a batch starts. The reply content is ignored.
    pub async fn preflight(&self) -> Result<()> {
        self.complete("ping").await.map(|_| ())
    }

    async fn complete_openai(&self, cfg: &OpenAiConfig, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", cfg.api_base);
        let body = ChatRequest {
            model: cfg.model.clone(),
            messages: vec![ChatMessage::user(prompt)],
            max_completion_tokens: cfg.max_completion_tokens,
        };
        let mut req = self.http.post(&url).bearer_auth(&cfg.api_key).json(&body);
        if let Some(org) = &cfg.organization {
            req = req.header("OpenAI-Organization", org);
        }
        let resp: ChatResponse = self.send_json(req, &url).await?;
        Ok(resp.text())
    }

    async fn complete_gemini(&self, cfg: &GeminiConfig, prompt: &str) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", cfg.api_base, cfg.model);
        let body = GenerateRequest {
            contents: vec![Content {
                role: Some("user".into()),
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: cfg.max_output_tokens,
            },
        };
        let req = self
            .http
            .post(&url)
            .header("x-goog-api-key", cfg.api_key.as_str())
            .json(&body);
        let resp: GenerateResponse = self.send_json(req, &url).await?;
        Ok(resp.text())
    }

    async fn send_json<T: DeserializeOwned + Default>(
        &self,
        req: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<T> {
        debug!(url, provider = self.config.provider.name(), "llm request");
        let resp = req.send().await.map_err(|e| self.map_transport(e, url))?;
        let status = resp.status();
        let retry_after = parse_retry_after(resp.headers());
        let raw = resp.text().await.map_err(|e| self.map_transport(e, url))?;

        if !status.is_success() {
            return Err(LlmError::Http {
                status: status.as_u16(),
                url: url.to_string(),
                body: truncate_body(&raw),
                retry_after,
            });
        }
        parse_body(&raw, url)
    }

    /// The wrapped error loses its URL; callers only ever see `url`, which
    /// carries no credentials.
    fn map_transport(&self, source: reqwest::Error, url: &str) -> LlmError {
        let source = source.without_url();
        if source.is_timeout() {
            LlmError::Timeout {
                url: url.to_string(),
                secs: self.config.timeout.as_secs(),
            }
        } else {
            LlmError::Transport {
                url: url.to_string(),
                source,
            }
        }
    }
}

fn parse_body<T: DeserializeOwned + Default>(raw: &str, url: &str) -> Result<T> {
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(raw).map_err(|_| LlmError::Parse {
        url: url.to_string(),
        body: truncate_body(raw),
    })
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    let secs: f64 = value.parse().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}
