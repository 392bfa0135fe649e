use crate::engine::{DispatchOptions, RateLimiter, RetryPolicy};
use crate::error::{Result, StoryworkError};
use crate::paths;
use crate::validate::REWRITE_MARKERS;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Engine tuning read from `<root>/.storywork.yaml`. Every field is optional;
/// command-line flags override whatever the file says.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Minimum spacing between LLM calls across all workers. 0 disables.
    #[serde(default = "default_pause_seconds")]
    pub pause_seconds: f64,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,
    #[serde(default = "default_max_backend_matches")]
    pub max_backend_matches: usize,
    #[serde(default = "default_required_markers")]
    pub required_markers: Vec<String>,
}

fn default_concurrency() -> usize {
    1
}

fn default_pause_seconds() -> f64 {
    15.0
}

fn default_breaker_threshold() -> u32 {
    3
}

fn default_max_backend_matches() -> usize {
    3
}

fn default_required_markers() -> Vec<String> {
    REWRITE_MARKERS.iter().map(|m| m.to_string()).collect()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            pause_seconds: default_pause_seconds(),
            retry: RetryPolicy::default(),
            breaker_threshold: default_breaker_threshold(),
            max_backend_matches: default_max_backend_matches(),
            required_markers: default_required_markers(),
        }
    }
}

impl EngineConfig {
    /// Load the config file under `root`, or defaults when there is none.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        let data = match std::fs::read_to_string(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(&data)
            .map_err(|e| StoryworkError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(StoryworkError::Config("concurrency must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(StoryworkError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if !self.pause_seconds.is_finite() || self.pause_seconds < 0.0 {
            return Err(StoryworkError::Config(
                "pause_seconds must be a non-negative number".into(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(StoryworkError::Config(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            concurrency: self.concurrency,
            breaker_threshold: self.breaker_threshold,
        }
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::from_secs_f64(self.pause_seconds)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
