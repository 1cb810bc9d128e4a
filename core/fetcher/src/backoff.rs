use std::cmp;
use std::time::{Duration, Instant};

const BACKOFF_STEP_SECS: u64 = 2;
const BACKOFF_MAX_SECS: u64 = 15;

/// Linear reconnect backoff: each consecutive failure adds one step, capped.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    failures: u32,
    next_attempt: Option<Instant>,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconnectBackoff {
    pub fn new() -> Self {
        Self {
            failures: 0,
            next_attempt: None,
        }
    }

    pub fn ready(&self, now: Instant) -> bool {
        self.next_attempt.map(|at| now >= at).unwrap_or(true)
    }

    /// Records a failed or lost connection and returns the delay before the
    /// next attempt.
    pub fn record_failure(&mut self, now: Instant) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let delay = compute_delay(self.failures);
        self.next_attempt = Some(now + delay);
        delay
    }

    pub fn reset(&mut self) {
        self.failures = 0;
        self.next_attempt = None;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

fn compute_delay(failures: u32) -> Duration {
    let backoff = BACKOFF_STEP_SECS.saturating_mul(u64::from(failures));
    Duration::from_secs(cmp::min(backoff, BACKOFF_MAX_SECS))
}
