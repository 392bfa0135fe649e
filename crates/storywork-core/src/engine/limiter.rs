use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Minimum spacing between external calls, shared by every worker.
///
/// One clock for the whole run: callers queue on the mutex, so with an
/// interval of 15s and four workers the calls still go out 15s apart.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    next_allowed: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_allowed: Mutex::new(None),
        }
    }

    /// Build from a seconds value; zero, negative or non-finite disables throttling.
    pub fn from_secs_f64(secs: f64) -> Self {
        let interval = if secs.is_finite() && secs > 0.0 {
            Duration::from_secs_f64(secs)
        } else {
            Duration::ZERO
        };
        Self::new(interval)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Block until the next call may go out, then reserve the following slot.
    pub async fn wait(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let mut next = self.next_allowed.lock().await;
        if let Some(at) = *next {
            if Instant::now() < at {
                tokio::time::sleep_until(at).await;
            }
        }
        *next = Some(Instant::now() + self.min_interval);
    }
}
