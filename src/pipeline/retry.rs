use crate::config::types::RetryConfig;
use std::cmp;
use std::time::Duration;

/// Exponential backoff schedule: doubles after each retry, capped at `max_backoff`.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            next: cmp::min(config.initial_backoff, config.max_backoff),
            max: config.max_backoff,
        }
    }

    /// Delay to wait before the next retry
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = cmp::min(self.next.saturating_mul(2), self.max);
        delay
    }
}
