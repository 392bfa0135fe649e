use std::path::PathBuf;

use thiserror::Error;

use crate::engine::CallFailure;

#[derive(Debug, Error)]
pub enum StoryworkError {
    #[error("plan not found: {0}")]
    PlanNotFound(PathBuf),

    #[error("plan file {path} is corrupt ({reason}); repair it or rerun with --force-refresh-plan")]
    PlanCorrupt { path: PathBuf, reason: String },

    #[error("lock file {path} exists and is recent (age={age_secs}s); use --force to override")]
    LockHeld { path: PathBuf, age_secs: u64 },

    #[error("invalid selector '{0}': {1}")]
    InvalidSelector(String, String),

    #[error("invalid range '{0}': expected like '10-20' or '10..20' with positive values")]
    InvalidRange(String),

    #[error("invalid regex pattern: {0}")]
    InvalidPattern(String),

    #[error("invalid work item key '{0}'")]
    InvalidKey(String),

    #[error("missing required input: {0}")]
    MissingInput(PathBuf),

    #[error("missing domain agent for domain:{domain}; expected one of: {candidates}")]
    MissingDomainAgent { domain: String, candidates: String },

    #[error("business rules dir not found: {0}")]
    BusinessRulesMissing(PathBuf),

    #[error("business rules dir is empty: {0}")]
    BusinessRulesEmpty(PathBuf),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Remote(CallFailure),

    #[error("unexpected response from {url}: {detail}")]
    UnexpectedResponse { url: String, detail: String },

    #[error(transparent)]
    Llm(#[from] llm_client::LlmError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StoryworkError {
    /// Errors that must stop a run before any plan mutation.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            StoryworkError::MissingInput(_)
                | StoryworkError::Config(_)
                | StoryworkError::InvalidPattern(_)
                | StoryworkError::Llm(llm_client::LlmError::NotConfigured)
                | StoryworkError::Llm(llm_client::LlmError::InvalidSetting { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, StoryworkError>;
