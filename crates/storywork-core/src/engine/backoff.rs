use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::RateLimiter;

// ---------------------------------------------------------------------------
// Attempt: tagged result of one external call
// ---------------------------------------------------------------------------

/// What a single external call produced, classified for the retry loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt<T> {
    Success(T),
    Retryable {
        detail: String,
        retry_after: Option<Duration>,
    },
    Fatal(String),
}

impl<T> Attempt<T> {
    pub fn retryable(detail: impl Into<String>) -> Self {
        Attempt::Retryable {
            detail: detail.into(),
            retry_after: None,
        }
    }
}

impl<T> From<Result<T, llm_client::LlmError>> for Attempt<T> {
    fn from(result: Result<T, llm_client::LlmError>) -> Self {
        match result {
            Ok(v) => Attempt::Success(v),
            Err(e) if e.is_retryable() => Attempt::Retryable {
                retry_after: e.retry_after(),
                detail: e.to_string(),
            },
            Err(e) => Attempt::Fatal(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// CallFailure
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum CallFailure {
    /// Every attempt hit a retryable failure.
    Exhausted { attempts: u32, last: String },
    Fatal(String),
}

impl CallFailure {
    pub fn is_transport(&self) -> bool {
        matches!(self, CallFailure::Exhausted { .. })
    }
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallFailure::Exhausted { attempts, last } => {
                write!(f, "{last} (gave up after {attempts} attempt(s))")
            }
            CallFailure::Fatal(detail) => f.write_str(detail),
        }
    }
}

impl std::error::Error for CallFailure {}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter() -> bool {
    true
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

impl RetryPolicy {
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Un-jittered delay after the `attempt`-th failure (1-based):
    /// `base * 2^(attempt-1)`, capped at `max_delay`.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let ms = self.base_delay_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(ms.min(self.max_delay_ms))
    }

    /// Worst-case total sleep across a fully exhausted budget, jitter included.
    pub fn max_total_delay(&self) -> Duration {
        let sleeps = self.max_attempts.max(1) - 1;
        let total: Duration = (1..=sleeps).map(|a| self.base_delay_for(a)).sum();
        if self.jitter {
            total + total / 4
        } else {
            total
        }
    }
}

// ---------------------------------------------------------------------------
// Backoff: retry controller
// ---------------------------------------------------------------------------

/// Runs an external call under a timeout, a shared rate limiter and a retry
/// budget. Only [`Attempt::Retryable`] results (and timeouts) are retried.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    call_timeout: Duration,
    limiter: Option<Arc<RateLimiter>>,
}

impl Backoff {
    pub fn new(policy: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            policy,
            call_timeout,
            limiter: None,
        }
    }

    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Sleep before the next attempt. A server `Retry-After` replaces the
    /// computed delay; both are capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(hint) = retry_after {
            return hint.min(self.policy.max_delay());
        }
        let base = self.policy.base_delay_for(attempt);
        if self.policy.jitter && !base.is_zero() {
            let extra_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 4);
            base + Duration::from_millis(extra_ms)
        } else {
            base
        }
    }

    pub async fn execute<T, F, Fut>(&self, mut op: F) -> Result<T, CallFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            if let Some(limiter) = &self.limiter {
                limiter.wait().await;
            }
            let result = match tokio::time::timeout(self.call_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Attempt::retryable(format!(
                    "timed out after {}s",
                    self.call_timeout.as_secs()
                )),
            };
            match result {
                Attempt::Success(value) => return Ok(value),
                Attempt::Fatal(detail) => return Err(CallFailure::Fatal(detail)),
                Attempt::Retryable {
                    detail,
                    retry_after,
                } => {
                    if attempt >= max_attempts {
                        return Err(CallFailure::Exhausted {
                            attempts: attempt,
                            last: detail,
                        });
                    }
                    let delay = self.delay_for(attempt, retry_after);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "retryable failure: {detail}"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1_000,
            max_delay_ms: 4_000,
            jitter: false,
        }
    }

    #[test]
    fn delays_double_and_cap() {
        let p = policy(6);
        let delays: Vec<u64> = (1..=5).map(|a| p.base_delay_for(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 4, 4]);
    }

    #[test]
    fn retry_after_overrides_but_is_capped() {
        let b = Backoff::new(policy(3), Duration::from_secs(60));
        assert_eq!(b.delay_for(1, Some(Duration::from_secs(3))), Duration::from_secs(3));
        assert_eq!(b.delay_for(1, Some(Duration::from_secs(90))), Duration::from_secs(4));
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let mut p = policy(3);
        p.jitter = true;
        let b = Backoff::new(p, Duration::from_secs(60));
        for _ in 0..50 {
            let d = b.delay_for(2, None);
            assert!(d >= Duration::from_secs(2) && d <= Duration::from_millis(2_500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_exactly_max_attempts_within_budget() {
        let b = Backoff::new(policy(4), Duration::from_secs(60));
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<(), _> = b
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Attempt::retryable("HTTP 503 from upstream") }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(
            result.unwrap_err(),
            CallFailure::Exhausted {
                attempts: 4,
                last: "HTTP 503 from upstream".into()
            }
        );
        // 1s + 2s + 4s of backoff, nothing more.
        assert!(start.elapsed() <= policy(4).max_total_delay());
        assert_eq!(policy(4).max_total_delay(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_is_not_retried() {
        let b = Backoff::new(policy(5), Duration::from_secs(60));
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = b
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Attempt::Fatal("HTTP 400 bad request".into()) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!result.unwrap_err().is_transport());
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let b = Backoff::new(policy(4), Duration::from_secs(60));
        let calls = AtomicU32::new(0);
        let result = b
            .execute(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Attempt::Retryable {
                            detail: "HTTP 429 slow down".into(),
                            retry_after: Some(Duration::from_secs(2)),
                        }
                    } else {
                        Attempt::Success("ok")
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_retryable() {
        let b = Backoff::new(policy(2), Duration::from_secs(5));
        let result: Result<(), _> = b
            .execute(|| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Attempt::Success(())
            })
            .await;
        let err = result.unwrap_err();
        assert!(err.is_transport());
        assert!(err.to_string().contains("timed out after 5s"));
    }

    #[test]
    fn llm_errors_classify() {
        let retryable: Attempt<()> = Attempt::from(Err(llm_client::LlmError::Http {
            status: 502,
            url: "u".into(),
            body: String::new(),
            retry_after: None,
        }));
        assert!(matches!(retryable, Attempt::Retryable { .. }));

        let fatal: Attempt<()> = Attempt::from(Err(llm_client::LlmError::Http {
            status: 401,
            url: "u".into(),
            body: String::new(),
            retry_after: None,
        }));
        assert!(matches!(fatal, Attempt::Fatal(_)));
    }
}
