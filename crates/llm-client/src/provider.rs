use std::fmt;
use std::time::Duration;

use crate::{LlmError, Result};

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-5.2";
pub const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MAX_TOKENS: u32 = 2000;

pub const DEFAULT_TIMEOUT_SECS: u64 = 900;
pub const MIN_TIMEOUT_SECS: u64 = 30;
pub const MAX_TIMEOUT_SECS: u64 = 3600;

// ─── Provider configs ─────────────────────────────────────────────────────

#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub api_base: String,
    pub organization: Option<String>,
    pub max_completion_tokens: u32,
}

#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub api_base: String,
    pub max_output_tokens: u32,
}

// Keys never reach logs.
impl fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .field("organization", &self.organization)
            .field("max_completion_tokens", &self.max_completion_tokens)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .field("max_output_tokens", &self.max_output_tokens)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum Provider {
    OpenAi(OpenAiConfig),
    Gemini(GeminiConfig),
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAi(_) => "openai",
            Provider::Gemini(_) => "gemini",
        }
    }

    pub fn model(&self) -> &str {
        match self {
            Provider::OpenAi(c) => &c.model,
            Provider::Gemini(c) => &c.model,
        }
    }
}

// ─── LlmConfig ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: Provider,
    /// Ceiling for a single HTTP attempt.
    pub timeout: Duration,
}

impl LlmConfig {
    /// Read provider settings from the process environment.
    ///
    /// OpenAI wins when both `OPENAI_API_KEY` and `GEMINI_API_KEY` are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`LlmConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let timeout = parse_timeout(get("LLM_TIMEOUT_S").as_deref())?;

        if let Some(api_key) = get("OPENAI_API_KEY") {
            let max_completion_tokens =
                parse_tokens("OPENAI_MAX_COMPLETION_TOKENS", get("OPENAI_MAX_COMPLETION_TOKENS"))?;
            return Ok(Self {
                provider: Provider::OpenAi(OpenAiConfig {
                    api_key,
                    model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.into()),
                    api_base: get("OPENAI_API_BASE")
                        .unwrap_or_else(|| DEFAULT_OPENAI_BASE.into())
                        .trim_end_matches('/')
                        .to_string(),
                    organization: get("OPENAI_ORG"),
                    max_completion_tokens,
                }),
                timeout,
            });
        }

        if let Some(api_key) = get("GEMINI_API_KEY") {
            return Ok(Self {
                provider: Provider::Gemini(GeminiConfig {
                    api_key,
                    model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.into()),
                    api_base: get("GEMINI_API_BASE")
                        .unwrap_or_else(|| DEFAULT_GEMINI_BASE.into())
                        .trim_end_matches('/')
                        .to_string(),
                    max_output_tokens: DEFAULT_MAX_TOKENS,
                }),
                timeout,
            });
        }

        Err(LlmError::NotConfigured)
    }
}

/// `LLM_TIMEOUT_S`: whole seconds, default 900, clamped to 30..=3600.
pub fn parse_timeout(raw: Option<&str>) -> Result<Duration> {
    let Some(raw) = raw else {
        return Ok(Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    };
    let secs: u64 = raw.parse().map_err(|_| LlmError::InvalidSetting {
        name: "LLM_TIMEOUT_S",
        value: raw.to_string(),
        reason: "expected integer seconds".into(),
    })?;
    Ok(Duration::from_secs(secs.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS)))
}

fn parse_tokens(name: &'static str, raw: Option<String>) -> Result<u32> {
    let Some(raw) = raw else {
        return Ok(DEFAULT_MAX_TOKENS);
    };
    raw.parse().map_err(|_| LlmError::InvalidSetting {
        name,
        value: raw.clone(),
        reason: "expected a positive integer".into(),
    })
}
