//! `llm-client`: minimal chat-completion driver for the story rewrite batch.
//!
//! Speaks two wire protocols behind one call surface so the batch engine can
//! treat the model as an opaque `(prompt) -> text` function.
//!
//! # Architecture
//!
//! ```text
//! LlmConfig::from_env()
//!     │            OPENAI_API_KEY  → Provider::OpenAi
//!     │            GEMINI_API_KEY  → Provider::Gemini
//!     ▼
//! LlmClient       ← reqwest client with a per-request timeout
//!     │
//!     ▼
//! complete(prompt) → Result<String, LlmError>
//!                     LlmError::is_retryable() / retry_after()
//! ```
//!
//! A single `complete` call performs exactly one HTTP attempt. Retries,
//! backoff and throttling belong to the caller.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use llm_client::{LlmClient, LlmConfig};
//!
//! let client = LlmClient::new(LlmConfig::from_env()?)?;
//! client.preflight().await?;
//! let text = client.complete("Rewrite this story…").await?;
//! ```

pub mod client;
pub mod error;
pub mod provider;
pub mod types;


pub use client::LlmClient;
pub use error::LlmError;
pub use provider::{GeminiConfig, LlmConfig, OpenAiConfig, Provider};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, LlmError>;
