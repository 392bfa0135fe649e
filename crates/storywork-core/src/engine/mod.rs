//! Batch execution engine.
//!
//! ```text
//! Dispatcher ──claims──▶ Plan (single owner, saved on every transition)
//!     │
//!     ├─ spawns ─▶ Processor::process(key) ─▶ Outcome
//!     │                 │
//!     │                 └─ Backoff::execute ─▶ RateLimiter::wait ─▶ external call
//!     │
//!     └─ CircuitBreaker (consecutive transport-class failures)
//! ```

mod backoff;
mod breaker;
mod dispatcher;
mod limiter;
mod outcome;
mod processor;

pub use backoff::{Attempt, Backoff, CallFailure, RetryPolicy};
pub use breaker::CircuitBreaker;
pub use dispatcher::{DispatchOptions, Dispatcher, RunReport};
pub use limiter::RateLimiter;
pub use outcome::{ItemFailure, Outcome, Stage};
pub use processor::{Processor, TextTransform};
