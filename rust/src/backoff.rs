use std::time::Duration;

use rand::Rng;

/// Exponential reconnect/retry delay with up to 10% additive jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            attempt: 0,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Un-jittered delay for the next attempt.
    pub fn floor(&self) -> Duration {
        let factor = 1u32 << self.attempt.min(16);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn next_delay(&mut self) -> Duration {
        let floor = self.floor();
        self.attempt = self.attempt.saturating_add(1);
        let jitter_cap = (floor.as_millis() / 10) as u64;
        if jitter_cap == 0 {
            return floor;
        }
        floor + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_cap))
    }
}
