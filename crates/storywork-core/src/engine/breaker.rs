use crate::engine::Outcome;

/// Stops scheduling after a run of consecutive transport-class item failures.
///
/// Only failures whose retry budget was exhausted count. A completion, a skip
/// or any other failure resets the streak. A threshold of 0 never trips.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    consecutive: u32,
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            consecutive: 0,
        }
    }

    /// Record one item outcome. Returns `true` once the breaker is open.
    pub fn record(&mut self, outcome: &Outcome) -> bool {
        match outcome {
            Outcome::Failed(f) if f.transport => self.consecutive += 1,
            Outcome::Previewed { .. } => {}
            _ => self.consecutive = 0,
        }
        self.is_open()
    }

    pub fn is_open(&self) -> bool {
        self.threshold > 0 && self.consecutive >= self.threshold
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}
