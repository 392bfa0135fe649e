use std::future::Future;

use llm_client::LlmClient;

use crate::engine::{Attempt, Outcome};

/// Per-item pipeline run by the dispatcher.
///
/// Implementations must never panic on bad input: every problem becomes an
/// [`Outcome`]. They must not touch the plan file.
pub trait Processor: Send + Sync + 'static {
    fn process(&self, key: &str) -> impl Future<Output = Outcome> + Send;
}

/// A `(prompt) -> text` transform, classified for the retry loop.
pub trait TextTransform: Send + Sync + 'static {
    fn transform(&self, prompt: &str) -> impl Future<Output = Attempt<String>> + Send;
}

impl TextTransform for LlmClient {
    async fn transform(&self, prompt: &str) -> Attempt<String> {
        self.complete(prompt).await.into()
    }
}
